//! Storage engine configuration - single source of truth.
//!
//! # Architecture
//!
//! - **Level 1 (Static)**: compile-time tunables that shape memory layout
//!   (chunk size, bitmap shard width) and are never read from a config file.
//! - **Level 2 (Dynamic)**: [`Config`], the operator-facing, validated record
//!   built by the binary (from CLI flags and/or a TOML file) and handed to
//!   the core as an opaque, read-only value. The core never parses argv or a
//!   config file itself; that is the binary's job (see `kestreld`).

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::ConfigError;

// ---------------------------------------------------------------------
// Level 1: static constants
// ---------------------------------------------------------------------

/// Largest byte region a single [`crate::storage::chunk::Chunk`] may cover.
pub const CHUNK_MAX_SIZE: usize = 64 * 1024;

/// Bits per [`crate::bitmap`] shard word.
pub const BITMAP_SHARD_SIZE: usize = 64;

/// Bounded neighborhood width (in chunks) the hashtable probes before
/// declaring `OUT_OF_SPACE`, see spec §4.2.
pub const DEFAULT_HASHTABLE_NEIGHBORHOOD: usize = 4;

/// Number of slots per hashtable bucket chunk (`K` in spec §4.2), chosen to
/// match a 256-bit SIMD compare of 16-bit tags.
pub const HASHTABLE_CHUNK_SLOTS: usize = 14;

/// Eviction sample size, spec §4.6.
pub const EVICTION_SAMPLE_SIZE: usize = 16;

/// Sentinel for "no expiry" on an [`crate::storage::entry::EntryIndex`].
pub const NO_EXPIRY: i64 = i64::MIN;

/// Default number of guard pages placed below a fiber's usable stack region.
pub const FIBER_GUARD_PAGES: usize = 1;

/// Default fiber stack size (excluding guard pages).
pub const DEFAULT_FIBER_STACK_SIZE: usize = 256 * 1024;

/// Bulk-string arguments whose declared length is at or above this many
/// bytes stream straight into a [`crate::storage::sequence::ChunkSequence`]
/// as their `ArgumentData` events arrive, rather than first materializing
/// into a `Vec<u8>` (spec §4.10, "long strings are streamed"). Tied to
/// [`CHUNK_MAX_SIZE`] since anything smaller fits a single chunk anyway.
pub const ARGUMENT_STREAM_THRESHOLD: usize = CHUNK_MAX_SIZE;

// ---------------------------------------------------------------------
// Level 2: dynamic, operator-facing configuration
// ---------------------------------------------------------------------

/// Authentication mode for new connections.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthMode {
    Disabled,
    Password(String),
    UserPass(HashMap<String, String>),
}

/// Eviction policy selected when `storage_hard_limit_bytes` is exceeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvictionPolicy {
    NoEviction,
    AllKeysLru,
    AllKeysLfu,
    AllKeysRandom,
    VolatileLru,
    VolatileLfu,
    VolatileRandom,
    VolatileTtl,
}

impl EvictionPolicy {
    /// Whether this policy is permitted to select a key with no TTL set.
    pub fn considers_persistent_keys(self) -> bool {
        matches!(self, Self::AllKeysLru | Self::AllKeysLfu | Self::AllKeysRandom)
    }
}

/// Background snapshot writer tuning, spec §4.11.
#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotConfig {
    pub path: PathBuf,
    pub interval: Duration,
    pub min_changed_keys: u64,
    pub min_changed_bytes: u64,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("dump.kestrel"),
            interval: Duration::from_secs(300),
            min_changed_keys: 100,
            min_changed_bytes: 1024 * 1024,
        }
    }
}

/// Validated, operator-facing runtime configuration.
///
/// Constructed once by the binary before any worker thread is spawned and
/// shared read-only thereafter via [`std::sync::Arc`] — the "global mutable
/// modules registry" pattern re-expressed as an immutable, explicitly built
/// service record (see DESIGN.md).
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub bind_addr: SocketAddr,
    pub workers: usize,
    pub max_command_length: usize,
    pub max_arguments_per_command: usize,
    pub max_key_length: usize,
    pub databases: u16,
    pub disabled_commands: HashSet<String>,
    pub auth: AuthMode,
    pub storage_hard_limit_bytes: u64,
    pub eviction_policy: EvictionPolicy,
    pub snapshot: SnapshotConfig,
    pub hashtable_initial_capacity: usize,
    pub hashtable_chunk_neighborhood: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:6380".parse().unwrap(),
            workers: std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1),
            max_command_length: 512 * 1024 * 1024,
            max_arguments_per_command: 1024 * 1024,
            max_key_length: 512 * 1024 * 1024,
            databases: 16,
            disabled_commands: HashSet::new(),
            auth: AuthMode::Disabled,
            storage_hard_limit_bytes: 0,
            eviction_policy: EvictionPolicy::NoEviction,
            snapshot: SnapshotConfig::default(),
            hashtable_initial_capacity: 4096,
            hashtable_chunk_neighborhood: DEFAULT_HASHTABLE_NEIGHBORHOOD,
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.workers == 0 {
            return Err(ConfigError::InvalidValue {
                field: "workers",
                reason: "must be at least 1".into(),
            });
        }
        if self.max_key_length == 0 {
            return Err(ConfigError::InvalidValue {
                field: "max_key_length",
                reason: "must be at least 1".into(),
            });
        }
        if self.databases == 0 {
            return Err(ConfigError::InvalidValue {
                field: "databases",
                reason: "must be at least 1".into(),
            });
        }
        if self.hashtable_chunk_neighborhood == 0 {
            return Err(ConfigError::InvalidValue {
                field: "hashtable_chunk_neighborhood",
                reason: "must be at least 1".into(),
            });
        }
        if self.storage_hard_limit_bytes > 0
            && self.eviction_policy == EvictionPolicy::NoEviction
        {
            log::warn!(
                "[config] storage_hard_limit_bytes is set but eviction_policy is NoEviction; \
                 writes will fail once the limit is hit instead of evicting"
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn zero_workers_rejected() {
        let mut cfg = Config::default();
        cfg.workers = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn zero_databases_rejected() {
        let mut cfg = Config::default();
        cfg.databases = 0;
        assert!(cfg.validate().is_err());
    }
}
