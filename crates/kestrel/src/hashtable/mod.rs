//! Hashtables (spec §4.2, §4.3): [`mcmp`] maps stored keys to value indices
//! under concurrent access, [`spsc`] backs per-worker command/token lookup
//! tables that only their owning worker ever writes.

pub mod hash;
pub mod mcmp;
pub mod spsc;

pub use mcmp::{ConcurrentHashtable, InsertOutcome};
pub use spsc::HashtableSpsc;
