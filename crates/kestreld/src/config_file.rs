//! TOML configuration file loading and CLI-flag overrides, converted into a
//! validated `kestrel::config::Config`. The core library never reads a file
//! or parses argv itself (see `kestrel::lib` module docs) - that boundary is
//! drawn here, the same way `hdds-router/src/config.rs` owns TOML
//! (de)serialization for `RouterConfig` while the library crate stays
//! format-agnostic.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use kestrel::config::{AuthMode, Config, EvictionPolicy, SnapshotConfig};
use serde::Deserialize;

/// On-disk shape of `kestreld.toml`. Every field is optional so an operator
/// can specify only what differs from the built-in defaults; CLI flags then
/// override whatever this produces.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub bind_addr: Option<SocketAddr>,
    pub workers: Option<usize>,
    pub databases: Option<u16>,
    pub max_command_length: Option<usize>,
    pub max_arguments_per_command: Option<usize>,
    pub max_key_length: Option<usize>,
    pub disabled_commands: Option<Vec<String>>,
    pub password: Option<String>,
    pub storage_hard_limit_bytes: Option<u64>,
    pub eviction_policy: Option<String>,
    pub snapshot: Option<FileSnapshotConfig>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileSnapshotConfig {
    pub path: Option<PathBuf>,
    pub interval_secs: Option<u64>,
    pub min_changed_keys: Option<u64>,
    pub min_changed_bytes: Option<u64>,
}

impl FileConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let parsed: Self = toml::from_str(&text)?;
        Ok(parsed)
    }

    /// Fold this file's settings over `kestrel::config::Config::default()`.
    pub fn apply(self, mut config: Config) -> anyhow::Result<Config> {
        if let Some(v) = self.bind_addr {
            config.bind_addr = v;
        }
        if let Some(v) = self.workers {
            config.workers = v;
        }
        if let Some(v) = self.databases {
            config.databases = v;
        }
        if let Some(v) = self.max_command_length {
            config.max_command_length = v;
        }
        if let Some(v) = self.max_arguments_per_command {
            config.max_arguments_per_command = v;
        }
        if let Some(v) = self.max_key_length {
            config.max_key_length = v;
        }
        if let Some(v) = self.disabled_commands {
            config.disabled_commands = v.into_iter().map(|s| s.to_ascii_uppercase()).collect::<HashSet<_>>();
        }
        if let Some(password) = self.password {
            config.auth = AuthMode::Password(password);
        }
        if let Some(v) = self.storage_hard_limit_bytes {
            config.storage_hard_limit_bytes = v;
        }
        if let Some(name) = self.eviction_policy {
            config.eviction_policy = parse_eviction_policy(&name)?;
        }
        if let Some(snapshot) = self.snapshot {
            apply_snapshot(snapshot, &mut config.snapshot);
        }
        Ok(config)
    }
}

fn apply_snapshot(file: FileSnapshotConfig, snapshot: &mut SnapshotConfig) {
    if let Some(v) = file.path {
        snapshot.path = v;
    }
    if let Some(v) = file.interval_secs {
        snapshot.interval = Duration::from_secs(v);
    }
    if let Some(v) = file.min_changed_keys {
        snapshot.min_changed_keys = v;
    }
    if let Some(v) = file.min_changed_bytes {
        snapshot.min_changed_bytes = v;
    }
}

fn parse_eviction_policy(name: &str) -> anyhow::Result<EvictionPolicy> {
    match name {
        "noeviction" => Ok(EvictionPolicy::NoEviction),
        "allkeys-lru" => Ok(EvictionPolicy::AllKeysLru),
        "allkeys-lfu" => Ok(EvictionPolicy::AllKeysLfu),
        "allkeys-random" => Ok(EvictionPolicy::AllKeysRandom),
        "volatile-lru" => Ok(EvictionPolicy::VolatileLru),
        "volatile-lfu" => Ok(EvictionPolicy::VolatileLfu),
        "volatile-random" => Ok(EvictionPolicy::VolatileRandom),
        "volatile-ttl" => Ok(EvictionPolicy::VolatileTtl),
        other => anyhow::bail!("unknown eviction_policy '{other}'"),
    }
}
