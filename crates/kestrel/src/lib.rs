//! # kestrel - a sharded, multi-core in-memory key-value store
//!
//! A Redis wire-compatible (RESP2/RESP3) key-value engine built around a
//! sharded, concurrent storage core: a lock-free slot bitmap allocator, a
//! chunked hashtable with SIMD-probe-shaped tag vectors, a transactional
//! per-key spinlock, and an epoch-reclaimed chunked value store, all
//! composed into an atomic read-modify-write pipeline. Client connections
//! and background jobs (snapshotting, eviction) are cooperative fibers
//! multiplexed one-per-core by a hand-rolled stack-switching scheduler, fed
//! by an `io_uring`-backed network ring.
//!
//! ## Architecture
//!
//! ```text
//! +-------------------------------------------------------------------+
//! |  net::ring (io_uring)  ->  resp::reader  ->  command::dispatcher   |
//! +-------------------------------------------------------------------+
//! |            storage::db (RMW engine: begin / commit_* / abort)     |
//! |   hashtable::mcmp  |  lock::{spinlock,transaction}  |  bitmap::mpmc|
//! |   storage::{chunk,sequence,entry,epoch}                            |
//! +-------------------------------------------------------------------+
//! |        fiber::scheduler  (one per worker, one OS thread each)      |
//! |   connection fibers | snapshot::writer fiber | eviction fiber      |
//! +-------------------------------------------------------------------+
//! ```
//!
//! ## Modules
//!
//! - [`bitmap`] - lock-free (MPMC) and single-writer (SPSC) slot allocators.
//! - [`hashtable`] - the concurrent chunked key -> value-index table (MCMP)
//!   and the single-writer table backing per-worker command lookup (SPSC).
//! - [`lock`] - the transactional per-key RW spinlock and the transaction
//!   handle that tracks which locks it holds.
//! - [`storage`] - chunked values, the entry index, epoch reclamation, the
//!   RMW engine, and eviction.
//! - [`fiber`] - the cooperative, per-worker stack-switching scheduler.
//! - [`net`] - the `io_uring` network ring and per-connection buffers.
//! - [`resp`] - the RESP2/RESP3 wire protocol reader and writer.
//! - [`command`] - the command dispatch table and handlers.
//! - [`snapshot`] - the background point-in-time dump writer.
//! - [`config`] - static tunables and the operator-facing dynamic config.
//! - [`error`] - the crate's error taxonomy.
//!
//! This crate never parses a config file, binds a socket from argv, installs
//! a signal handler, or sets up logging - those are the `kestreld` binary's
//! job. The library only ever consumes an already-validated [`config::Config`].

pub mod bitmap;
pub mod command;
pub mod config;
pub mod error;
pub mod fiber;
pub mod hashtable;
pub mod lock;
pub mod net;
pub mod resp;
pub mod snapshot;
pub mod storage;

use std::sync::Arc;

use config::Config;
use snapshot::SnapshotCoordinator;
use storage::StorageDb;

/// The process-wide, read-only set of collaborators every worker shares:
/// the validated configuration, the sharded storage database, and the
/// snapshot scheduling state the snapshot fiber and `BGSAVE`/`SAVE` both
/// drive. Built once by the binary before any worker thread is spawned (the
/// "global mutable modules registry... expressed as a process-wide service
/// registry populated at initialization... read-only thereafter"
/// re-architecture spec §9 calls for) and handed to every worker as a
/// `&Services` or, across threads, via [`std::sync::Arc`].
pub struct Services {
    pub config: Arc<Config>,
    pub storage: StorageDb,
    pub snapshot: SnapshotCoordinator,
}

impl Services {
    pub fn new(config: Arc<Config>) -> Self {
        let storage = StorageDb::new(&config);
        Self { config, storage, snapshot: SnapshotCoordinator::new() }
    }
}

/// kestrel's version string, reported by `HELLO` and `CONFIG GET`.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
