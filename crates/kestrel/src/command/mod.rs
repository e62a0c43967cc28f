//! Command dispatch (spec §4.10, §6): the per-connection [`context::ConnectionState`],
//! the worker-local [`dispatcher::Dispatcher`] table, and the handlers it
//! invokes.

pub mod context;
pub mod dispatcher;
pub mod handlers;
pub mod parser;
pub mod schema;

pub use context::ConnectionState;
pub use dispatcher::Dispatcher;
pub use parser::ParserContext;
pub use schema::{ArgType, TokenArg, TokenSchema};
