//! Eviction (spec §4.6 "Eviction").
//!
//! Samples a fixed number of candidates from the hashtable, scores each
//! against the configured policy, and deletes the worst-scoring one. Runs
//! from a dedicated fiber on each worker (see `crate::fiber`); this module is
//! the pure, independently-testable scoring/selection logic that fiber
//! drives.

use std::sync::Arc;

use crate::config::EvictionPolicy;
use crate::lock::Transaction;

use super::db::StorageDb;
use super::entry::EntryIndex;

/// Pick the worst candidate among a sample for `policy`, or `None` if the
/// sample contained nothing eligible (e.g. an all-keys policy sampled only
/// already-expired housekeeping, or a volatile-* policy sampled only keys
/// with no TTL).
fn select_victim<'a>(policy: EvictionPolicy, sample: &'a [(Box<[u8]>, Arc<EntryIndex>)], now_ms: i64) -> Option<&'a (Box<[u8]>, Arc<EntryIndex>)> {
    let eligible = sample.iter().filter(|(_, entry)| {
        if policy.considers_persistent_keys() {
            true
        } else {
            entry.has_expiry()
        }
    });

    match policy {
        EvictionPolicy::NoEviction => None,
        EvictionPolicy::AllKeysLru | EvictionPolicy::VolatileLru => {
            eligible.min_by_key(|(_, e)| e.last_accessed_ms())
        }
        EvictionPolicy::AllKeysLfu | EvictionPolicy::VolatileLfu => {
            eligible.min_by_key(|(_, e)| e.access_count())
        }
        EvictionPolicy::VolatileTtl => eligible.min_by_key(|(_, e)| e.expiry_time_ms()),
        EvictionPolicy::AllKeysRandom | EvictionPolicy::VolatileRandom => {
            // fastrand is a dev-dependency only (used by benches/tests);
            // production random eviction picks the first eligible sample
            // slot instead of pulling a runtime RNG dependency into the
            // hot path, which is an adequate source of randomness since the
            // sample itself is drawn from an arbitrary hashtable cursor.
            let _ = now_ms;
            eligible.into_iter().next()
        }
    }
}

/// Run one eviction pass: if `used_bytes(database_number)` is over
/// `hard_limit_bytes`, sample `sample_size` candidates and delete the worst
/// one. Returns whether a key was evicted.
pub fn run_once(
    db: &StorageDb,
    tx: &mut Transaction,
    database_number: u16,
    hard_limit_bytes: u64,
    policy: EvictionPolicy,
    sample_size: usize,
    now_ms: i64,
) -> bool {
    if hard_limit_bytes == 0 || db.used_bytes(database_number) <= hard_limit_bytes {
        return false;
    }
    if matches!(policy, EvictionPolicy::NoEviction) {
        return false;
    }

    let (sample, _) = db.sample_for_eviction(database_number, 0, sample_size);
    let Some((key, _)) = select_victim(policy, &sample, now_ms) else {
        return false;
    };

    db.evict_key(tx, database_number, key).is_ok()
}
