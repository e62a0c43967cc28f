//! Server-level commands (spec §6): `CONFIG GET`, `BGSAVE`, `SAVE`.

use crate::config::EvictionPolicy;
use crate::error::CommandError;
use crate::lock::TransactionIdAllocator;
use crate::resp::RespValue;
use crate::Services;

use super::super::context::ConnectionState;
use super::util::{glob_match, now_ms};

fn eviction_policy_name(policy: EvictionPolicy) -> &'static str {
    match policy {
        EvictionPolicy::NoEviction => "noeviction",
        EvictionPolicy::AllKeysLru => "allkeys-lru",
        EvictionPolicy::AllKeysLfu => "allkeys-lfu",
        EvictionPolicy::AllKeysRandom => "allkeys-random",
        EvictionPolicy::VolatileLru => "volatile-lru",
        EvictionPolicy::VolatileLfu => "volatile-lfu",
        EvictionPolicy::VolatileRandom => "volatile-random",
        EvictionPolicy::VolatileTtl => "volatile-ttl",
    }
}

/// `CONFIG GET pattern`: every parameter this specification's configuration
/// surface exposes, glob-matched by name (spec §6, §4.12), flattened into
/// `name, value, name, value, ...` the way Redis's `CONFIG GET` replies.
pub fn config(services: &Services, _allocator: &TransactionIdAllocator, _conn: &mut ConnectionState, args: &[Vec<u8>]) -> Result<RespValue, CommandError> {
    let sub = args.get(1).ok_or_else(|| CommandError::wrong_arity("config"))?;
    if !sub.eq_ignore_ascii_case(b"GET") {
        return Err(CommandError::argument(format!(
            "ERR Unknown CONFIG subcommand '{}'",
            String::from_utf8_lossy(sub)
        )));
    }
    let pattern = args.get(2).ok_or_else(|| CommandError::wrong_arity("config"))?;

    let config = &services.config;
    let params: [(&str, String); 7] = [
        ("maxclients", config.workers.to_string()),
        ("databases", config.databases.to_string()),
        ("maxmemory", config.storage_hard_limit_bytes.to_string()),
        ("maxmemory-policy", eviction_policy_name(config.eviction_policy).to_string()),
        ("save", format!("{}", config.snapshot.interval.as_secs())),
        ("dir", config.snapshot.path.parent().unwrap_or(std::path::Path::new(".")).display().to_string()),
        ("proto-max-bulk-len", config.max_command_length.to_string()),
    ];

    let mut out = Vec::new();
    for (name, value) in params {
        if glob_match(pattern, name.as_bytes()) {
            out.push(RespValue::from_str(name));
            out.push(RespValue::from_str(value));
        }
    }
    Ok(RespValue::Array(out))
}

/// `BGSAVE`: request an immediate snapshot run (spec §4.11) without
/// blocking the caller; the snapshot fiber picks it up at its next trigger
/// check.
pub fn bgsave(services: &Services, _allocator: &TransactionIdAllocator, _conn: &mut ConnectionState, _args: &[Vec<u8>]) -> Result<RespValue, CommandError> {
    if services.snapshot.is_running() {
        return Err(CommandError::argument("ERR Background save already in progress"));
    }
    services.snapshot.request_immediate_run();
    Ok(RespValue::SimpleString("Background saving started".to_string()))
}

/// `SAVE`: run a snapshot synchronously on the calling fiber, blocking the
/// connection (and, per spec §5, every other fiber on this worker) until it
/// finishes — the original implementation's in-line, non-backgrounded
/// persistence path.
pub fn save(services: &Services, _allocator: &TransactionIdAllocator, _conn: &mut ConnectionState, _args: &[Vec<u8>]) -> Result<RespValue, CommandError> {
    if services.snapshot.is_running() {
        return Err(CommandError::argument("ERR Background save already in progress"));
    }
    services
        .snapshot
        .run(&services.storage, &services.config, now_ms(), || {
            // Only yield when actually running on a fiber's stack: `SAVE`
            // issued from a connection fiber lets other fibers run between
            // blocks (spec §5), but nothing requires a scheduler to be
            // present to run a snapshot (e.g. an offline/administrative call).
            if crate::fiber::Scheduler::current_id().is_some() {
                crate::fiber::Scheduler::yield_now();
            }
        })
        .map_err(|e| CommandError::Internal(e.to_string()))?;
    Ok(RespValue::ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use std::sync::Arc;

    fn services() -> Services {
        Services::new(Arc::new(Config::default()))
    }

    fn args(strs: &[&str]) -> Vec<Vec<u8>> {
        strs.iter().map(|s| s.as_bytes().to_vec()).collect()
    }

    #[test]
    fn config_get_matches_by_glob() {
        let svc = services();
        let allocator = TransactionIdAllocator::new(0);
        let mut conn = ConnectionState::new(&svc.config.auth);
        let reply = config(&svc, &allocator, &mut conn, &args(&["CONFIG", "GET", "maxmemory*"])).unwrap();
        match reply {
            RespValue::Array(items) => {
                assert_eq!(items.len(), 4);
                assert_eq!(items[0], RespValue::from_str("maxmemory"));
            }
            other => panic!("expected an array, got {other:?}"),
        }
    }

    #[test]
    fn config_get_unknown_subcommand_is_an_error() {
        let svc = services();
        let allocator = TransactionIdAllocator::new(0);
        let mut conn = ConnectionState::new(&svc.config.auth);
        assert!(config(&svc, &allocator, &mut conn, &args(&["CONFIG", "SET", "x"])).is_err());
    }

    #[test]
    fn save_writes_a_dump_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = Config::default();
        cfg.snapshot.path = dir.path().join("dump.kestrel");
        let svc = Services::new(Arc::new(cfg));
        let allocator = TransactionIdAllocator::new(0);
        let mut conn = ConnectionState::new(&svc.config.auth);

        let reply = save(&svc, &allocator, &mut conn, &args(&["SAVE"])).unwrap();
        assert_eq!(reply, RespValue::ok());
        assert!(svc.config.snapshot.path.exists());
    }

    #[test]
    fn bgsave_requests_a_run_without_blocking() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = Config::default();
        cfg.snapshot.path = dir.path().join("dump.kestrel");
        let svc = Services::new(Arc::new(cfg));
        let allocator = TransactionIdAllocator::new(0);
        let mut conn = ConnectionState::new(&svc.config.auth);

        let reply = bgsave(&svc, &allocator, &mut conn, &args(&["BGSAVE"])).unwrap();
        assert_eq!(reply, RespValue::SimpleString("Background saving started".to_string()));
        assert!(!svc.config.snapshot.path.exists());
    }
}
