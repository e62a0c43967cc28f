//! Transactions (spec §4.4).
//!
//! A transaction is just an id plus the list of locks it currently holds, in
//! acquisition order, so `release` can walk it in reverse and hand every lock
//! back regardless of how the operation using it ended. Mirrors `transaction_t`
//! and `transaction_acquire`/`transaction_release` in the original
//! implementation, with the locks list expressed as a plain `Vec` (which
//! already grows geometrically) instead of a manually doubled array.

use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;

use super::spinlock::RwSpinlock;

enum LockEntry {
    Write(Arc<RwSpinlock>),
    Read(Arc<RwSpinlock>),
}

/// A unit of work holding zero or more [`RwSpinlock`]s. `id() == 0` means the
/// transaction has not been acquired (or has already been released).
pub struct Transaction {
    worker_index: u16,
    transaction_index: u16,
    locks: Vec<LockEntry>,
}

impl Transaction {
    /// The packed `(worker_index:16, transaction_index:16)` id, `0` meaning
    /// unacquired.
    pub fn id(&self) -> u32 {
        ((self.worker_index as u32) << 16) | self.transaction_index as u32
    }

    pub(crate) fn record_write_lock(&mut self, lock: &Arc<RwSpinlock>) {
        self.locks.push(LockEntry::Write(Arc::clone(lock)));
    }

    pub(crate) fn record_read_lock(&mut self, lock: &Arc<RwSpinlock>) {
        self.locks.push(LockEntry::Read(Arc::clone(lock)));
    }

    /// Unlock every lock this transaction holds, in reverse acquisition
    /// order, then reset its id to unacquired. Idempotent: calling it twice,
    /// or on a transaction that acquired nothing, is a no-op.
    pub fn release(&mut self) {
        while let Some(entry) = self.locks.pop() {
            match entry {
                LockEntry::Write(lock) => lock.unlock_write(),
                LockEntry::Read(lock) => lock.unlock_read(),
            }
        }
        self.worker_index = 0;
        self.transaction_index = 0;
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if !self.locks.is_empty() {
            self.release();
        }
    }
}

/// Issues fresh, non-reused transaction ids for one worker.
///
/// `transaction_index` is a per-worker monotonic counter that skips `0`
/// (`0` means "unacquired"), matching `transaction_peek_current_thread_index`
/// plus the id-assignment half of `transaction_acquire`.
pub struct TransactionIdAllocator {
    worker_index: u16,
    next: AtomicU16,
}

impl TransactionIdAllocator {
    pub fn new(worker_index: u16) -> Self {
        Self { worker_index, next: AtomicU16::new(1) }
    }

    /// Assign a fresh `(worker_index, transaction_index)` pair and return an
    /// empty, ready-to-use transaction.
    pub fn acquire(&self) -> Transaction {
        let transaction_index = loop {
            let current = self.next.fetch_add(1, Ordering::Relaxed);
            if current != 0 {
                break current;
            }
            // Wrapped around to 0, which is reserved; draw again.
        };

        Transaction {
            worker_index: self.worker_index,
            transaction_index,
            locks: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lock::spinlock::{read_lock, try_write_lock};

    #[test]
    fn acquire_never_hands_out_zero_id() {
        let allocator = TransactionIdAllocator::new(3);
        for _ in 0..10 {
            assert_ne!(allocator.acquire().id(), 0);
        }
    }

    #[test]
    fn release_unlocks_everything_in_reverse_order() {
        let allocator = TransactionIdAllocator::new(0);
        let mut tx = allocator.acquire();
        let a = Arc::new(RwSpinlock::new());
        let b = Arc::new(RwSpinlock::new());

        assert!(try_write_lock(&a, &mut tx));
        assert!(read_lock(&b, &mut tx));

        tx.release();

        assert!(!a.is_locked());
        assert!(!b.is_locked());
        assert_eq!(tx.id(), 0);
    }

    #[test]
    fn dropping_a_transaction_releases_its_locks() {
        let allocator = TransactionIdAllocator::new(0);
        let lock = Arc::new(RwSpinlock::new());
        {
            let mut tx = allocator.acquire();
            assert!(try_write_lock(&lock, &mut tx));
        }
        assert!(!lock.is_locked());
    }
}
