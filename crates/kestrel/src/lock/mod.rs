//! Transactional locking (spec §4.4): a per-key [`spinlock::RwSpinlock`] plus
//! the [`transaction::Transaction`] that tracks which locks it holds so it
//! can release all of them, even on an error path, in one call.

pub mod spinlock;
pub mod transaction;

pub use spinlock::{read_lock, try_write_lock, write_lock, RwSpinlock};
pub use transaction::{Transaction, TransactionIdAllocator};
