//! Command dispatch table (spec §4.10, mirroring `module_redis_command.c`'s
//! command-name -> handler lookup): a case-insensitive [`HashtableSpsc`]
//! built once per worker at startup and probed once per request - the same
//! "build once, read many times, never mutated concurrently" shape the
//! per-worker SPSC hashtable exists for.

use crate::config::AuthMode;
use crate::error::CommandError;
use crate::hashtable::spsc::HashtableSpsc;
use crate::lock::TransactionIdAllocator;
use crate::resp::{ArgValue, RespValue};
use crate::Services;

use super::context::ConnectionState;
use super::handlers;

pub type HandlerFn = fn(&Services, &TransactionIdAllocator, &mut ConnectionState, &[Vec<u8>]) -> Result<RespValue, CommandError>;

/// A handler that consumes its arguments by value instead of as borrowed
/// byte slices (spec §4.10): the only caller of this today is `SET`, whose
/// value argument can be handed straight to storage as a [`ChunkSequence`]
/// without a copy (see [`crate::resp::ArgValue::into_sequence`]).
pub type StreamingHandlerFn = fn(&Services, &TransactionIdAllocator, &mut ConnectionState, Vec<ArgValue>) -> Result<RespValue, CommandError>;

#[derive(Clone, Copy)]
enum HandlerKind {
    Legacy(HandlerFn),
    Streaming(StreamingHandlerFn),
}

struct Entry {
    min_args: usize,
    /// Whether this command may run before `AUTH` succeeds (spec §6
    /// "Authentication errors").
    allowed_unauthenticated: bool,
    kind: HandlerKind,
}

/// A worker-local, read-only command table.
pub struct Dispatcher {
    table: HashtableSpsc<Entry>,
}

macro_rules! register {
    ($table:expr, $name:expr, $min_args:expr, $handler:expr) => {
        assert!($table.insert($name.as_bytes(), Entry { min_args: $min_args, allowed_unauthenticated: false, kind: HandlerKind::Legacy($handler) }));
    };
    ($table:expr, $name:expr, $min_args:expr, $handler:expr, unauthenticated) => {
        assert!($table.insert($name.as_bytes(), Entry { min_args: $min_args, allowed_unauthenticated: true, kind: HandlerKind::Legacy($handler) }));
    };
}

macro_rules! register_streaming {
    ($table:expr, $name:expr, $min_args:expr, $handler:expr) => {
        assert!($table.insert($name.as_bytes(), Entry { min_args: $min_args, allowed_unauthenticated: false, kind: HandlerKind::Streaming($handler) }));
    };
}

impl Dispatcher {
    pub fn new() -> Self {
        let mut table = HashtableSpsc::new(64, true);

        register!(table, "HELLO", 1, handlers::connection::hello, unauthenticated);
        register!(table, "PING", 1, handlers::connection::ping, unauthenticated);
        register!(table, "QUIT", 1, handlers::connection::quit, unauthenticated);
        register!(table, "AUTH", 2, handlers::connection::auth, unauthenticated);
        register!(table, "SHUTDOWN", 1, handlers::connection::shutdown);

        register!(table, "GET", 2, handlers::keys::get);
        register_streaming!(table, "SET", 3, handlers::keys::set);
        register!(table, "SETEX", 4, handlers::keys::setex);
        register!(table, "PSETEX", 4, handlers::keys::psetex);
        register!(table, "SETNX", 3, handlers::keys::setnx);
        register!(table, "SETRANGE", 4, handlers::keys::setrange);
        register!(table, "GETSET", 3, handlers::keys::getset);
        register!(table, "GETEX", 2, handlers::keys::getex);
        register!(table, "GETDEL", 2, handlers::keys::getdel);
        register!(table, "APPEND", 3, handlers::keys::append);
        register!(table, "INCR", 2, handlers::keys::incr);
        register!(table, "DECR", 2, handlers::keys::decr);
        register!(table, "INCRBY", 3, handlers::keys::incrby);
        register!(table, "DECRBY", 3, handlers::keys::decrby);
        register!(table, "INCRBYFLOAT", 3, handlers::keys::incrbyfloat);
        register!(table, "MSET", 3, handlers::keys::mset);
        register!(table, "MSETNX", 3, handlers::keys::msetnx);
        register!(table, "MGET", 2, handlers::keys::mget);
        register!(table, "COPY", 3, handlers::keys::copy);
        register!(table, "RENAMENX", 3, handlers::keys::renamenx);
        register!(table, "EXISTS", 2, handlers::keys::exists);
        register!(table, "TOUCH", 2, handlers::keys::touch);
        register!(table, "TYPE", 2, handlers::keys::type_cmd);
        register!(table, "EXPIRE", 3, handlers::keys::expire);
        register!(table, "PEXPIRE", 3, handlers::keys::pexpire);
        register!(table, "EXPIREAT", 3, handlers::keys::expireat);
        register!(table, "PEXPIREAT", 3, handlers::keys::pexpireat);
        register!(table, "PERSIST", 2, handlers::keys::persist);
        register!(table, "TTL", 2, handlers::keys::ttl);
        register!(table, "PTTL", 2, handlers::keys::pttl);
        register!(table, "EXPIRETIME", 2, handlers::keys::expiretime);
        register!(table, "DEL", 2, handlers::keys::del);
        register!(table, "UNLINK", 2, handlers::keys::del);
        register!(table, "KEYS", 2, handlers::keys::keys);
        register!(table, "SCAN", 2, handlers::keys::scan);
        register!(table, "GETRANGE", 4, handlers::keys::getrange);
        register!(table, "SUBSTR", 4, handlers::keys::getrange);
        register!(table, "STRLEN", 2, handlers::keys::strlen);
        register!(table, "BITCOUNT", 2, handlers::keys::bitcount);
        register!(table, "LCS", 3, handlers::keys::lcs);
        register!(table, "FLUSHDB", 1, handlers::keys::flushdb);
        register!(table, "DBSIZE", 1, handlers::keys::dbsize);
        register!(table, "SELECT", 2, handlers::keys::select);

        register!(table, "CONFIG", 2, handlers::server::config);
        register!(table, "BGSAVE", 1, handlers::server::bgsave);
        register!(table, "SAVE", 1, handlers::server::save);

        Self { table }
    }

    /// Look up and run `args[0]` against `args[1..]`. Arity, auth, and the
    /// disabled-commands list (spec §6 "Any command issued against a
    /// disabled name... returns an error") are all checked here, once, so no
    /// handler needs to repeat them.
    pub fn dispatch(&self, services: &Services, allocator: &TransactionIdAllocator, conn: &mut ConnectionState, args: Vec<ArgValue>) -> RespValue {
        let Some(name) = args.first() else {
            return RespValue::from(CommandError::protocol("ERR empty command"));
        };
        let name_bytes = name.materialize();
        let command_name = String::from_utf8_lossy(&name_bytes).to_ascii_uppercase();

        if services.config.disabled_commands.contains(&command_name) {
            return RespValue::from(CommandError::protocol(format!("ERR '{command_name}' is disabled")));
        }

        let Some(entry) = self.table.get(&name_bytes) else {
            return RespValue::from(CommandError::unknown_command(&command_name));
        };

        if !entry.allowed_unauthenticated && !conn.authenticated && !matches!(services.config.auth, AuthMode::Disabled) {
            conn.terminate_connection = true;
            return RespValue::from(CommandError::Auth("NOAUTH Authentication required".to_string()));
        }

        if args.len() < entry.min_args {
            return RespValue::from(CommandError::wrong_arity(&command_name));
        }

        let result = match entry.kind {
            HandlerKind::Legacy(handler) => {
                let byte_args: Vec<Vec<u8>> = args.iter().map(ArgValue::materialize).collect();
                handler(services, allocator, conn, &byte_args)
            }
            HandlerKind::Streaming(handler) => handler(services, allocator, conn, args),
        };

        match result {
            Ok(value) => value,
            Err(e) => {
                if e.is_fatal() {
                    conn.terminate_connection = true;
                }
                RespValue::from(e)
            }
        }
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use std::sync::Arc;

    fn services() -> Services {
        Services::new(Arc::new(Config::default()))
    }

    fn args(strs: &[&str]) -> Vec<ArgValue> {
        strs.iter().map(|s| ArgValue::Bytes(s.as_bytes().to_vec())).collect()
    }

    #[test]
    fn unknown_command_reports_error() {
        let dispatcher = Dispatcher::new();
        let svc = services();
        let allocator = TransactionIdAllocator::new(0);
        let mut conn = ConnectionState::new(&svc.config.auth);
        let reply = dispatcher.dispatch(&svc, &allocator, &mut conn, args(&["FROBNICATE"]));
        assert!(matches!(reply, RespValue::SimpleError(_)));
    }

    #[test]
    fn set_then_get_round_trips_through_dispatch() {
        let dispatcher = Dispatcher::new();
        let svc = services();
        let allocator = TransactionIdAllocator::new(0);
        let mut conn = ConnectionState::new(&svc.config.auth);

        let reply = dispatcher.dispatch(&svc, &allocator, &mut conn, args(&["SET", "foo", "bar"]));
        assert_eq!(reply, RespValue::ok());

        let reply = dispatcher.dispatch(&svc, &allocator, &mut conn, args(&["GET", "foo"]));
        assert_eq!(reply, RespValue::from_str("bar"));
    }

    #[test]
    fn wrong_arity_is_rejected_before_the_handler_runs() {
        let dispatcher = Dispatcher::new();
        let svc = services();
        let allocator = TransactionIdAllocator::new(0);
        let mut conn = ConnectionState::new(&svc.config.auth);
        let reply = dispatcher.dispatch(&svc, &allocator, &mut conn, args(&["GET"]));
        assert!(matches!(reply, RespValue::SimpleError(_)));
    }

    #[test]
    fn disabled_command_is_rejected() {
        let dispatcher = Dispatcher::new();
        let mut config = Config::default();
        config.disabled_commands.insert("FLUSHDB".to_string());
        let svc = Services::new(Arc::new(config));
        let allocator = TransactionIdAllocator::new(0);
        let mut conn = ConnectionState::new(&svc.config.auth);
        let reply = dispatcher.dispatch(&svc, &allocator, &mut conn, args(&["FLUSHDB"]));
        assert!(matches!(reply, RespValue::SimpleError(_)));
    }
}
