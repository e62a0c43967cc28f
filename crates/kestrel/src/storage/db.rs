//! Storage DB / RMW engine (spec §4.6).
//!
//! Composes the bitmap (C1), hashtable (C2), transactional spinlock (C4) and
//! chunked values (C5) into the atomic per-key pipeline every mutating
//! command uses: `op_rmw_begin` locks and looks up, a `commit_*` publishes
//! the result, `op_rmw_abort` backs out on error.
//!
//! A hashtable slot's `value_index` indirects through a per-database
//! [`DashMap`] of entries rather than a flat array the bitmap directly
//! indexes into — `DashMap` already gives the sharded-lock slab the bitmap
//! would otherwise exist to protect, so the bitmap here is only the index
//! *allocator*, not the storage itself.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use crossbeam::queue::SegQueue;
use dashmap::DashMap;

use crate::bitmap::mpmc::SlotBitmapMpmc;
use crate::config::Config;
use crate::error::StorageError;
use crate::hashtable::mcmp::{ConcurrentHashtable, InsertOutcome};
use crate::lock::{self, RwSpinlock, Transaction};

use super::entry::{EntryIndex, ValueType};
use super::epoch;
use super::sequence::ChunkSequence;

/// A status handle produced by [`StorageDb::op_rmw_begin`], carrying
/// everything a `commit_*`/`op_rmw_abort` call needs.
pub struct RmwStatus {
    database_number: u16,
    key: Box<[u8]>,
    existing_value_index: Option<u64>,
    existing_entry: Option<Arc<EntryIndex>>,
}

impl RmwStatus {
    pub fn key(&self) -> &[u8] {
        &self.key
    }

    pub fn existing_entry(&self) -> Option<&Arc<EntryIndex>> {
        self.existing_entry.as_ref()
    }

    pub fn exists(&self) -> bool {
        self.existing_value_index.is_some()
    }
}

struct Database {
    hashtable: ConcurrentHashtable,
    chunk_locks: Vec<Arc<RwSpinlock>>,
    entries: DashMap<u64, Arc<EntryIndex>>,
    bitmap: SlotBitmapMpmc,
    changed_keys: AtomicU64,
    changed_bytes: AtomicU64,
    total_bytes: AtomicU64,
    /// Spec §4.11: while a background snapshot is in progress, `commit_*`
    /// paths that would otherwise free an entry whose chunk the snapshot
    /// cursor hasn't reached yet instead push it onto `snapshot_pending_deletes`
    /// so the snapshot writer can still serialize its point-in-time value.
    snapshot_running: AtomicBool,
    snapshot_cursor: AtomicUsize,
    snapshot_pending_deletes: SegQueue<(Box<[u8]>, Arc<EntryIndex>)>,
}

impl Database {
    fn new(config: &Config) -> Self {
        let hashtable = ConcurrentHashtable::new(config.hashtable_initial_capacity, config.hashtable_chunk_neighborhood);
        let chunk_locks = (0..hashtable.chunk_count()).map(|_| Arc::new(RwSpinlock::new())).collect();
        Self {
            hashtable,
            chunk_locks,
            entries: DashMap::new(),
            bitmap: SlotBitmapMpmc::new(config.hashtable_initial_capacity),
            changed_keys: AtomicU64::new(0),
            changed_bytes: AtomicU64::new(0),
            total_bytes: AtomicU64::new(0),
            snapshot_running: AtomicBool::new(false),
            snapshot_cursor: AtomicUsize::new(0),
            snapshot_pending_deletes: SegQueue::new(),
        }
    }

    fn chunk_lock_for(&self, key: &[u8]) -> Arc<RwSpinlock> {
        Arc::clone(&self.chunk_locks[self.hashtable.chunk_index_for_key(key)])
    }

    /// Retire a value displaced from the table (by update, delete, rename,
    /// eviction, or lazy expiry): if a snapshot is running and its scan
    /// cursor hasn't yet reached this key's chunk - i.e. the key "has not
    /// yet been snapshotted" (spec §4.11) - hand the entry to the snapshot
    /// writer's pending-delete queue instead of the epoch GC, so the
    /// snapshot can still serialize the point-in-time value it would
    /// otherwise miss.
    fn retire_or_preserve_for_snapshot(&self, key: &[u8], entry: Arc<EntryIndex>) {
        entry.mark_deleted();
        if self.snapshot_running.load(Ordering::Acquire) {
            let chunk_index = self.hashtable.chunk_index_for_key(key);
            if chunk_index >= self.snapshot_cursor.load(Ordering::Acquire) {
                self.snapshot_pending_deletes.push((key.to_vec().into_boxed_slice(), entry));
                return;
            }
        }
        let guard = epoch::pin();
        epoch::retire(&guard, entry);
    }
}

/// The sharded, multi-database key-value store (spec §4.6, §5).
pub struct StorageDb {
    databases: Vec<Database>,
}

impl StorageDb {
    pub fn new(config: &Config) -> Self {
        Self {
            databases: (0..config.databases).map(|_| Database::new(config)).collect(),
        }
    }

    pub fn database_count(&self) -> u16 {
        self.databases.len() as u16
    }

    fn database(&self, database_number: u16) -> &Database {
        &self.databases[database_number as usize]
    }

    pub fn dbsize(&self, database_number: u16) -> usize {
        self.database(database_number).entries.len()
    }

    /// Total bytes currently stored in `database_number`'s values, tracked
    /// incrementally for the eviction hard-limit check.
    pub fn used_bytes(&self, database_number: u16) -> u64 {
        self.database(database_number).total_bytes.load(Ordering::Relaxed)
    }

    pub fn changed_keys(&self, database_number: u16) -> u64 {
        self.database(database_number).changed_keys.load(Ordering::Relaxed)
    }

    pub fn changed_bytes(&self, database_number: u16) -> u64 {
        self.database(database_number).changed_bytes.load(Ordering::Relaxed)
    }

    pub fn reset_changed_counters(&self, database_number: u16) {
        let db = self.database(database_number);
        db.changed_keys.store(0, Ordering::Relaxed);
        db.changed_bytes.store(0, Ordering::Relaxed);
    }

    /// Remove every key in `database_number` (`FLUSHDB`).
    pub fn flush(&self, database_number: u16) {
        let db = self.database(database_number);
        db.hashtable.clear();
        db.entries.clear();
        db.bitmap.clear();
        db.total_bytes.store(0, Ordering::Relaxed);
    }

    /// Begin a read-modify-write: write-locks the key's owning chunk under
    /// `tx` and looks up any existing entry.
    pub fn op_rmw_begin(&self, tx: &mut Transaction, database_number: u16, key: &[u8]) -> Result<RmwStatus, StorageError> {
        let db = self.database(database_number);
        let lock = db.chunk_lock_for(key);
        if !lock::write_lock(&lock, tx) {
            return Err(StorageError::LockStuck);
        }

        let existing_value_index = db.hashtable.search(key);
        let existing_entry = existing_value_index.and_then(|vi| db.entries.get(&vi).map(|e| Arc::clone(e.value())));

        Ok(RmwStatus {
            database_number,
            key: key.to_vec().into_boxed_slice(),
            existing_value_index,
            existing_entry,
        })
    }

    /// Abort an in-progress RMW: no mutation took place, so there is nothing
    /// to undo. The chunk lock is released when `tx` is released or dropped.
    pub fn op_rmw_abort(&self, _status: RmwStatus) {}

    /// Publish a new value for `status.key()`, replacing whatever was there
    /// and retiring the old entry to the epoch GC.
    pub fn commit_update(
        &self,
        status: RmwStatus,
        value_type: ValueType,
        new_seq: ChunkSequence,
        new_expiry_ms: i64,
        now_ms: i64,
    ) -> Result<Arc<EntryIndex>, StorageError> {
        let db = self.database(status.database_number);
        let new_size = new_seq.size() as u64;
        let new_entry = EntryIndex::new(value_type, new_seq, new_expiry_ms, status.database_number, now_ms);

        let value_index = match status.existing_value_index {
            Some(vi) => vi,
            None => {
                let vi = db.bitmap.get_next_available().ok_or(StorageError::OutOfSpace)?;
                if let InsertOutcome::Updated(stale_index) = db.hashtable.insert_or_update(&status.key, vi as u64)? {
                    // Another writer raced us between search and insert;
                    // release the bitmap slot we grabbed for nothing and
                    // reuse the slot the hashtable actually holds.
                    db.bitmap.release(vi);
                    stale_index
                } else {
                    vi as u64
                }
            }
        };

        let old_size = if let Some(old) = db.entries.insert(value_index, Arc::clone(&new_entry)) {
            let old_size = old.value().size() as u64;
            db.retire_or_preserve_for_snapshot(&status.key, old);
            old_size
        } else {
            0
        };

        db.changed_keys.fetch_add(1, Ordering::Relaxed);
        db.changed_bytes.fetch_add(new_size, Ordering::Relaxed);
        if new_size >= old_size {
            db.total_bytes.fetch_add(new_size - old_size, Ordering::Relaxed);
        } else {
            db.total_bytes.fetch_sub(old_size - new_size, Ordering::Relaxed);
        }

        Ok(new_entry)
    }

    /// Update only `expiry_time_ms` on an existing entry, leaving its value
    /// sequence untouched (e.g. `EXPIRE`, `PERSIST`).
    pub fn commit_metadata(&self, status: &RmwStatus, new_expiry_ms: i64) -> Result<(), StorageError> {
        let entry = status.existing_entry.as_ref().ok_or(StorageError::NotFound)?;
        entry.set_expiry_time_ms(new_expiry_ms);
        Ok(())
    }

    /// Remove `status.key()` entirely.
    pub fn commit_delete(&self, status: RmwStatus) -> Result<(), StorageError> {
        let db = self.database(status.database_number);
        let value_index = status.existing_value_index.ok_or(StorageError::NotFound)?;

        db.hashtable.delete(&status.key);
        if let Some((_, entry)) = db.entries.remove(&value_index) {
            db.total_bytes.fetch_sub(entry.value().size() as u64, Ordering::Relaxed);
            db.retire_or_preserve_for_snapshot(&status.key, entry);
        }
        db.bitmap.release(value_index as usize);
        db.changed_keys.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Atomically move `src_status.key()` to `dst_status.key()` within the
    /// same database, failing if the destination exists and `replace` is
    /// false. Both statuses must come from the same `database_number`.
    pub fn commit_rename(&self, src_status: RmwStatus, dst_status: RmwStatus, replace: bool) -> Result<(), StorageError> {
        debug_assert_eq!(src_status.database_number, dst_status.database_number);
        if dst_status.existing_value_index.is_some() && !replace {
            return Err(StorageError::DestinationExists);
        }

        let db = self.database(src_status.database_number);
        let value_index = src_status.existing_value_index.ok_or(StorageError::NotFound)?;

        db.hashtable.delete(&src_status.key);
        let outcome = db.hashtable.insert_or_update(&dst_status.key, value_index)?;

        if let InsertOutcome::Updated(old_value_index) = outcome {
            if let Some((_, old_entry)) = db.entries.remove(&old_value_index) {
                db.total_bytes.fetch_sub(old_entry.value().size() as u64, Ordering::Relaxed);
                db.retire_or_preserve_for_snapshot(&dst_status.key, old_entry);
            }
            db.bitmap.release(old_value_index as usize);
        }

        // `value_index` itself is unchanged - only the hashtable's key ->
        // value_index mapping moved, so `db.entries` needs no update.
        db.changed_keys.fetch_add(2, Ordering::Relaxed);
        Ok(())
    }

    /// Non-mutating read: returns the entry for `key`, pinning it, unless it
    /// has expired, in which case a lazy delete is issued and `None` is
    /// returned (spec §4.6 "Expiry").
    pub fn get_entry_index_for_read(
        &self,
        tx: &mut Transaction,
        database_number: u16,
        key: &[u8],
        now_ms: i64,
    ) -> Result<Option<Arc<EntryIndex>>, StorageError> {
        let db = self.database(database_number);
        let Some(value_index) = db.hashtable.search(key) else {
            return Ok(None);
        };
        let Some(entry) = db.entries.get(&value_index).map(|e| Arc::clone(e.value())) else {
            return Ok(None);
        };

        if entry.is_expired_at(now_ms) {
            self.lazy_expire(tx, database_number, key, value_index)?;
            return Ok(None);
        }

        entry.pin_for_read(now_ms);
        Ok(Some(entry))
    }

    fn lazy_expire(&self, tx: &mut Transaction, database_number: u16, key: &[u8], expected_value_index: u64) -> Result<(), StorageError> {
        let db = self.database(database_number);
        let lock = db.chunk_lock_for(key);
        if !lock::write_lock(&lock, tx) {
            return Err(StorageError::LockStuck);
        }

        // Re-check under the lock: another fiber may have already deleted or
        // replaced this key between our lock-free read and taking the lock.
        if db.hashtable.search(key) == Some(expected_value_index) {
            db.hashtable.delete(key);
            if let Some((_, entry)) = db.entries.remove(&expected_value_index) {
                db.total_bytes.fetch_sub(entry.value().size() as u64, Ordering::Relaxed);
                db.retire_or_preserve_for_snapshot(key, entry);
            }
            db.bitmap.release(expected_value_index as usize);
            db.changed_keys.fetch_add(1, Ordering::Relaxed);
        }
        Ok(())
    }

    /// Sample up to `count` live `(key, entry)` pairs starting at `cursor`,
    /// for [`super::eviction`] to rank. Not a consistent snapshot: see spec
    /// §4.2 "Iteration".
    pub(crate) fn sample_for_eviction(&self, database_number: u16, cursor: usize, count: usize) -> (Vec<(Box<[u8]>, Arc<EntryIndex>)>, Option<usize>) {
        let db = self.database(database_number);
        let (pairs, next) = db.hashtable.scan(cursor, count);
        let out = pairs
            .into_iter()
            .filter_map(|(key, value_index)| db.entries.get(&value_index).map(|e| (key, Arc::clone(e.value()))))
            .collect();
        (out, next)
    }

    /// Start a background snapshot pass over `database_number`: from this
    /// point on, `commit_*` paths preserve entries the scan cursor hasn't
    /// reached yet instead of handing them straight to the epoch GC (spec
    /// §4.11).
    pub fn snapshot_begin(&self, database_number: u16) {
        let db = self.database(database_number);
        db.snapshot_cursor.store(0, Ordering::Release);
        db.snapshot_running.store(true, Ordering::Release);
    }

    /// End a background snapshot pass, draining and releasing any
    /// pending-delete entries the writer didn't already drain.
    pub fn snapshot_end(&self, database_number: u16) {
        let db = self.database(database_number);
        db.snapshot_running.store(false, Ordering::Release);
        while let Some((_, entry)) = db.snapshot_pending_deletes.pop() {
            let guard = epoch::pin();
            epoch::retire(&guard, entry);
        }
    }

    pub fn snapshot_is_running(&self, database_number: u16) -> bool {
        self.database(database_number).snapshot_running.load(Ordering::Acquire)
    }

    /// Advance the snapshot scan cursor to `chunk_index`, the chunk the
    /// writer is about to start serializing.
    pub fn snapshot_set_cursor(&self, database_number: u16, chunk_index: usize) {
        self.database(database_number).snapshot_cursor.store(chunk_index, Ordering::Release);
    }

    /// Walk live `(key, entry)` pairs for the snapshot writer, reusing the
    /// same chunk-ordered scan [`Self::sample_for_eviction`] uses — the
    /// writer advances `snapshot_cursor` to the chunk index each returned
    /// `next` cursor names before asking for the next block, which is what
    /// makes `retire_or_preserve_for_snapshot`'s "chunk not yet reached"
    /// check correct.
    pub fn snapshot_scan_block(&self, database_number: u16, cursor: usize, limit: usize) -> (Vec<(Box<[u8]>, Arc<EntryIndex>)>, Option<usize>) {
        self.sample_for_eviction(database_number, cursor, limit)
    }

    /// Drain entries foreground writers preserved because the snapshot
    /// hadn't reached their chunk yet, handing ownership to the caller (the
    /// snapshot writer, which serializes them then retires them itself).
    pub fn snapshot_drain_pending_deletes(&self, database_number: u16) -> Vec<(Box<[u8]>, Arc<EntryIndex>)> {
        let db = self.database(database_number);
        let mut out = Vec::new();
        while let Some(pair) = db.snapshot_pending_deletes.pop() {
            out.push(pair);
        }
        out
    }

    /// Delete `key` as the victim of an eviction pass, running the same
    /// locked RMW pipeline a foreground `DEL` would.
    pub fn evict_key(&self, tx: &mut Transaction, database_number: u16, key: &[u8]) -> Result<(), StorageError> {
        let status = self.op_rmw_begin(tx, database_number, key)?;
        if !status.exists() {
            self.op_rmw_abort(status);
            return Ok(());
        }
        self.commit_delete(status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NO_EXPIRY;
    use crate::lock::TransactionIdAllocator;

    fn test_db() -> (StorageDb, TransactionIdAllocator) {
        let mut config = Config::default();
        config.databases = 2;
        config.hashtable_initial_capacity = 64;
        (StorageDb::new(&config), TransactionIdAllocator::new(0))
    }

    #[test]
    fn set_then_get_round_trips() {
        let (db, allocator) = test_db();
        let mut tx = allocator.acquire();
        let status = db.op_rmw_begin(&mut tx, 0, b"foo").unwrap();
        db.commit_update(status, ValueType::String, ChunkSequence::from_bytes(b"bar"), NO_EXPIRY, 0).unwrap();
        tx.release();

        let mut tx = allocator.acquire();
        let entry = db.get_entry_index_for_read(&mut tx, 0, b"foo", 0).unwrap().unwrap();
        assert_eq!(entry.value().to_vec(), b"bar");
    }

    #[test]
    fn get_after_expiry_returns_none_and_deletes() {
        let (db, allocator) = test_db();
        let mut tx = allocator.acquire();
        let status = db.op_rmw_begin(&mut tx, 0, b"foo").unwrap();
        db.commit_update(status, ValueType::String, ChunkSequence::from_bytes(b"bar"), 1000, 0).unwrap();
        tx.release();

        let mut tx = allocator.acquire();
        assert!(db.get_entry_index_for_read(&mut tx, 0, b"foo", 2000).unwrap().is_none());
        assert_eq!(db.dbsize(0), 0);
    }

    #[test]
    fn delete_removes_key() {
        let (db, allocator) = test_db();
        let mut tx = allocator.acquire();
        let status = db.op_rmw_begin(&mut tx, 0, b"foo").unwrap();
        db.commit_update(status, ValueType::String, ChunkSequence::from_bytes(b"bar"), NO_EXPIRY, 0).unwrap();
        tx.release();

        let mut tx = allocator.acquire();
        let status = db.op_rmw_begin(&mut tx, 0, b"foo").unwrap();
        db.commit_delete(status).unwrap();
        tx.release();

        assert_eq!(db.dbsize(0), 0);
    }

    #[test]
    fn rename_moves_value_to_new_key() {
        let (db, allocator) = test_db();
        let mut tx = allocator.acquire();
        let status = db.op_rmw_begin(&mut tx, 0, b"src").unwrap();
        db.commit_update(status, ValueType::String, ChunkSequence::from_bytes(b"v"), NO_EXPIRY, 0).unwrap();
        tx.release();

        let mut tx = allocator.acquire();
        let src_status = db.op_rmw_begin(&mut tx, 0, b"src").unwrap();
        let dst_status = db.op_rmw_begin(&mut tx, 0, b"dst").unwrap();
        db.commit_rename(src_status, dst_status, false).unwrap();
        tx.release();

        let mut tx = allocator.acquire();
        assert!(db.get_entry_index_for_read(&mut tx, 0, b"src", 0).unwrap().is_none());
        assert_eq!(db.get_entry_index_for_read(&mut tx, 0, b"dst", 0).unwrap().unwrap().value().to_vec(), b"v");
    }

    #[test]
    fn rename_without_replace_fails_when_destination_exists() {
        let (db, allocator) = test_db();
        for (key, value) in [(b"src".as_slice(), b"1".as_slice()), (b"dst".as_slice(), b"2".as_slice())] {
            let mut tx = allocator.acquire();
            let status = db.op_rmw_begin(&mut tx, 0, key).unwrap();
            db.commit_update(status, ValueType::String, ChunkSequence::from_bytes(value), NO_EXPIRY, 0).unwrap();
            tx.release();
        }

        let mut tx = allocator.acquire();
        let src_status = db.op_rmw_begin(&mut tx, 0, b"src").unwrap();
        let dst_status = db.op_rmw_begin(&mut tx, 0, b"dst").unwrap();
        assert_eq!(db.commit_rename(src_status, dst_status, false).unwrap_err(), StorageError::DestinationExists);
    }

    #[test]
    fn flush_clears_database() {
        let (db, allocator) = test_db();
        let mut tx = allocator.acquire();
        let status = db.op_rmw_begin(&mut tx, 0, b"foo").unwrap();
        db.commit_update(status, ValueType::String, ChunkSequence::from_bytes(b"bar"), NO_EXPIRY, 0).unwrap();
        tx.release();

        db.flush(0);
        assert_eq!(db.dbsize(0), 0);
    }

    #[test]
    fn delete_during_snapshot_before_cursor_preserves_entry_for_draining() {
        let (db, allocator) = test_db();
        let mut tx = allocator.acquire();
        let status = db.op_rmw_begin(&mut tx, 0, b"foo").unwrap();
        db.commit_update(status, ValueType::String, ChunkSequence::from_bytes(b"bar"), NO_EXPIRY, 0).unwrap();
        tx.release();

        db.snapshot_begin(0);
        // Cursor starts at 0, so every chunk index is still "ahead" of it.
        let mut tx = allocator.acquire();
        let status = db.op_rmw_begin(&mut tx, 0, b"foo").unwrap();
        db.commit_delete(status).unwrap();
        tx.release();

        let drained = db.snapshot_drain_pending_deletes(0);
        assert_eq!(drained.len(), 1);
        assert_eq!(drained[0].0.as_ref(), b"foo");
        assert_eq!(drained[0].1.value().to_vec(), b"bar");

        db.snapshot_end(0);
        assert!(!db.snapshot_is_running(0));
    }

    #[test]
    fn delete_during_snapshot_after_cursor_retires_normally() {
        let (db, allocator) = test_db();
        let mut tx = allocator.acquire();
        let status = db.op_rmw_begin(&mut tx, 0, b"foo").unwrap();
        db.commit_update(status, ValueType::String, ChunkSequence::from_bytes(b"bar"), NO_EXPIRY, 0).unwrap();
        tx.release();

        db.snapshot_begin(0);
        // Move the cursor past every chunk: the writer already scanned it.
        db.snapshot_set_cursor(0, db.database(0).hashtable.chunk_count());

        let mut tx = allocator.acquire();
        let status = db.op_rmw_begin(&mut tx, 0, b"foo").unwrap();
        db.commit_delete(status).unwrap();
        tx.release();

        assert!(db.snapshot_drain_pending_deletes(0).is_empty());
        db.snapshot_end(0);
    }
}
