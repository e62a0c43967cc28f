//! Value storage (spec §3, §4.5, §4.6): chunked byte sequences, the entry
//! index they hang off, epoch-deferred reclamation, the per-database RMW
//! engine that ties the hashtable and transactional locks together, and the
//! eviction policy that runs on top of it.

pub mod chunk;
pub mod db;
pub mod entry;
pub mod epoch;
pub mod eviction;
pub mod sequence;

pub use chunk::Chunk;
pub use db::{RmwStatus, StorageDb};
pub use entry::{EntryIndex, ValueType};
pub use sequence::ChunkSequence;
