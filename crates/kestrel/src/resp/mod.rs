//! RESP2/RESP3 wire protocol (spec §4.9): the value model, the incremental
//! request reader, and the reply writer. Hand-rolled rather than pulled from
//! a crate - there is no dependency in the stack that speaks this wire
//! format, and the framing is small enough that reimplementing it the way
//! the original `protocol_redis_reader.c`/`protocol_redis_writer.c` do is
//! more direct than adapting a generic codec crate to it.

pub mod assembler;
pub mod reader;
pub mod value;
pub mod writer;

pub use assembler::{ArgValue, CommandAssembler};
pub use reader::{ReadEvent, RespError, RespReader};
pub use value::RespValue;
pub use writer::Writer;

/// Which reply encoding a connection has negotiated via `HELLO` (spec §6
/// `HELLO`). RESP2 is the default until a client asks for RESP3.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RespVersion {
    Resp2,
    Resp3,
}

impl Default for RespVersion {
    fn default() -> Self {
        Self::Resp2
    }
}
