//! Transactional RW spinlock (spec §4.4).
//!
//! Packs a 32-bit holder transaction id and a 32-bit reader count into one
//! atomic word, mirroring `transaction_spinlock_lock` in the original
//! implementation (there the lock is write-only; the reader count is this
//! crate's extension to let `read_lock` share the same word, per spec §4.4's
//! data model). A write lock requires the whole word to be zero; a read lock
//! only requires no *other* transaction to hold the write half.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::lock::transaction::Transaction;

/// Spins this many times before declaring a lock possibly stuck and giving
/// up, logging at `error`. The original implementation uses `1 << 26`; this
/// is scaled down since cooperative fibers yield far more often than OS
/// threads spinning on a futex-free lock.
const STUCK_SPIN_THRESHOLD: u64 = 1 << 20;

#[derive(Default)]
pub struct RwSpinlock {
    word: AtomicU64,
}

fn pack(holder: u32, readers: u32) -> u64 {
    ((holder as u64) << 32) | readers as u64
}

fn holder_of(word: u64) -> u32 {
    (word >> 32) as u32
}

fn readers_of(word: u64) -> u32 {
    word as u32
}

impl RwSpinlock {
    pub fn new() -> Self {
        Self { word: AtomicU64::new(0) }
    }

    pub fn is_locked(&self) -> bool {
        self.word.load(Ordering::Acquire) != 0
    }

    pub fn is_owned_by(&self, tx_id: u32) -> bool {
        holder_of(self.word.load(Ordering::Acquire)) == tx_id
    }

    /// Release one write-lock holding. Only called from
    /// [`crate::lock::transaction::Transaction::release`].
    pub(crate) fn unlock_write(&self) {
        self.word.store(0, Ordering::Release);
    }

    /// Release one read-lock holding.
    pub(crate) fn unlock_read(&self) {
        loop {
            let current = self.word.load(Ordering::Acquire);
            let readers = readers_of(current).saturating_sub(1);
            let holder = if readers == 0 { 0 } else { holder_of(current) };
            let new_value = pack(holder, readers);
            if self
                .word
                .compare_exchange(current, new_value, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                return;
            }
        }
    }
}

/// Attempt to take `lock`'s write half for `transaction`, succeeding without
/// retry only when the word is entirely zero, or when `transaction` already
/// holds it (re-entrant). Mirrors `transaction_spinlock_try_lock`, which
/// takes the lock as an explicit first argument rather than a method
/// receiver so it can register itself on the transaction's lock list.
pub fn try_write_lock(lock: &Arc<RwSpinlock>, transaction: &mut Transaction) -> bool {
    let tx_id = transaction.id();
    debug_assert_ne!(tx_id, 0, "transaction must be acquired before locking");

    let current = lock.word.load(Ordering::Acquire);
    if current != 0 && holder_of(current) == tx_id {
        transaction.record_write_lock(lock);
        return true;
    }

    let new_value = pack(tx_id, 0);
    let res = lock
        .word
        .compare_exchange(0, new_value, Ordering::AcqRel, Ordering::Relaxed)
        .is_ok();

    if res {
        transaction.record_write_lock(lock);
    }
    res
}

/// Spin [`try_write_lock`] until it succeeds or the stuck-lock threshold is
/// hit, in which case `false` is returned and the caller must abort its
/// operation.
pub fn write_lock(lock: &Arc<RwSpinlock>, transaction: &mut Transaction) -> bool {
    let mut spins: u64 = 0;
    while !try_write_lock(lock, transaction) {
        spins += 1;
        if spins == STUCK_SPIN_THRESHOLD {
            log::error!(
                "[lock::spinlock] possible stuck transactional spinlock for transaction {}",
                transaction.id()
            );
            return false;
        }
        std::hint::spin_loop();
    }
    true
}

/// Take a read lock on `lock`, allowed only when unheld or already held (in
/// either mode) by `transaction`.
pub fn read_lock(lock: &Arc<RwSpinlock>, transaction: &mut Transaction) -> bool {
    let tx_id = transaction.id();
    debug_assert_ne!(tx_id, 0, "transaction must be acquired before locking");

    loop {
        let current = lock.word.load(Ordering::Acquire);
        let holder = holder_of(current);
        if holder != 0 && holder != tx_id {
            return false;
        }
        let new_value = pack(holder, readers_of(current) + 1);
        if lock
            .word
            .compare_exchange(current, new_value, Ordering::AcqRel, Ordering::Relaxed)
            .is_ok()
        {
            transaction.record_read_lock(lock);
            return true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lock::transaction::TransactionIdAllocator;

    #[test]
    fn write_lock_excludes_other_transactions() {
        let allocator = TransactionIdAllocator::new(0);
        let mut tx_a = allocator.acquire();
        let mut tx_b = allocator.acquire();
        let lock = Arc::new(RwSpinlock::new());

        assert!(try_write_lock(&lock, &mut tx_a));
        assert!(!try_write_lock(&lock, &mut tx_b));

        tx_a.release();
        assert!(try_write_lock(&lock, &mut tx_b));
    }

    #[test]
    fn write_lock_is_reentrant_for_same_transaction() {
        let allocator = TransactionIdAllocator::new(0);
        let mut tx = allocator.acquire();
        let lock = Arc::new(RwSpinlock::new());

        assert!(try_write_lock(&lock, &mut tx));
        assert!(try_write_lock(&lock, &mut tx));
        tx.release();
        assert!(!lock.is_locked());
    }

    #[test]
    fn read_lock_allows_multiple_readers() {
        let allocator = TransactionIdAllocator::new(0);
        let mut tx_a = allocator.acquire();
        let mut tx_b = allocator.acquire();
        let lock = Arc::new(RwSpinlock::new());

        assert!(read_lock(&lock, &mut tx_a));
        assert!(read_lock(&lock, &mut tx_b));
        tx_a.release();
        assert!(lock.is_locked());
        tx_b.release();
        assert!(!lock.is_locked());
    }

    #[test]
    fn read_lock_blocked_by_other_writer() {
        let allocator = TransactionIdAllocator::new(0);
        let mut tx_a = allocator.acquire();
        let mut tx_b = allocator.acquire();
        let lock = Arc::new(RwSpinlock::new());

        assert!(try_write_lock(&lock, &mut tx_a));
        assert!(!read_lock(&lock, &mut tx_b));
    }
}
