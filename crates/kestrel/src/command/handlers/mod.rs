//! Command handlers (spec §6), grouped the way the original implementation's
//! `module_redis_command.c` groups them: connection-level commands, the key
//! space commands, and the handful of server-level commands this
//! specification covers.

pub mod connection;
pub mod keys;
pub mod server;
pub(crate) mod util;
