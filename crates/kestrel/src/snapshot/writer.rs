//! The background snapshot writer (spec §4.11): checks its trigger
//! conditions, then walks the storage database in bounded blocks, yielding
//! between them so foreground command handlers keep running, and drains the
//! pending-delete queue [`crate::storage::StorageDb`] fills while a run is
//! in flight. Mirrors the original fiber's check -> prepare -> process_block
//! -> drain -> finalize loop (`worker_fiber_storage_db_snapshot_rdb.c`).

use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};

use crc32fast::Hasher;
use tempfile::NamedTempFile;

use crate::config::{Config, SnapshotConfig};
use crate::storage::StorageDb;

use super::format::{self, TocEntry};
use super::SnapshotError;

/// Live entries scanned per block before yielding back to the scheduler
/// (spec §4.11 step 3 "bounded range of the hashtable's chunks").
const BLOCK_SIZE: usize = 256;

/// Per-worker snapshot scheduling and run state (spec §4.11). One instance
/// is shared by the snapshot fiber and by `BGSAVE`/`SAVE` handlers that want
/// to force an immediate run.
pub struct SnapshotCoordinator {
    next_run_time_ms: AtomicI64,
    running: AtomicBool,
    changed_keys_baseline: AtomicU64,
    changed_bytes_baseline: AtomicU64,
}

impl SnapshotCoordinator {
    pub fn new() -> Self {
        Self {
            next_run_time_ms: AtomicI64::new(0),
            running: AtomicBool::new(false),
            changed_keys_baseline: AtomicU64::new(0),
            changed_bytes_baseline: AtomicU64::new(0),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Spec §4.11 `should_run`: has the configured interval elapsed.
    pub fn should_run(&self, now_ms: i64) -> bool {
        now_ms >= self.next_run_time_ms.load(Ordering::Acquire)
    }

    /// Spec §4.11 `enough_keys_data_changed`: has the configured number of
    /// keys or bytes changed since the baseline taken at the last completed
    /// run.
    pub fn enough_changed(&self, storage: &StorageDb, config: &SnapshotConfig) -> bool {
        let (keys, bytes) = self.totals(storage);
        keys.saturating_sub(self.changed_keys_baseline.load(Ordering::Acquire)) >= config.min_changed_keys
            || bytes.saturating_sub(self.changed_bytes_baseline.load(Ordering::Acquire)) >= config.min_changed_bytes
    }

    /// Spec §4.11 `skip_run`: trigger conditions unmet, reschedule without
    /// running.
    pub fn skip_run(&self, now_ms: i64, config: &SnapshotConfig) {
        self.next_run_time_ms.store(now_ms + config.interval.as_millis() as i64, Ordering::Release);
    }

    /// Force the next `should_run` check to pass immediately (`BGSAVE`/`SAVE`).
    pub fn request_immediate_run(&self) {
        self.next_run_time_ms.store(0, Ordering::Release);
    }

    fn totals(&self, storage: &StorageDb) -> (u64, u64) {
        let mut keys = 0u64;
        let mut bytes = 0u64;
        for db in 0..storage.database_count() {
            keys += storage.changed_keys(db);
            bytes += storage.changed_bytes(db);
        }
        (keys, bytes)
    }

    /// Run one full snapshot, calling `yield_between_blocks` after each
    /// block so a fiber-scheduled caller can let other fibers run (spec
    /// §4.11 step 3 "releasing the lock between blocks"; §5 "long-running
    /// loops ... yield between iterations"). On success, reschedules the
    /// next run `config.snapshot.interval` out and rebases the
    /// changed-keys/bytes baseline; on failure, reschedules immediately so
    /// the next check retries (spec §4.11 step 6).
    pub fn run(&self, storage: &StorageDb, config: &Config, now_ms: i64, mut yield_between_blocks: impl FnMut()) -> Result<(), SnapshotError> {
        self.running.store(true, Ordering::Release);
        let result = self.run_inner(storage, &config.snapshot, &mut yield_between_blocks);
        self.running.store(false, Ordering::Release);

        match &result {
            Ok(()) => {
                self.next_run_time_ms.store(now_ms + config.snapshot.interval.as_millis() as i64, Ordering::Release);
                let (keys, bytes) = self.totals(storage);
                self.changed_keys_baseline.store(keys, Ordering::Release);
                self.changed_bytes_baseline.store(bytes, Ordering::Release);
            }
            Err(_) => {
                self.next_run_time_ms.store(now_ms, Ordering::Release);
            }
        }
        result
    }

    fn run_inner(&self, storage: &StorageDb, config: &SnapshotConfig, yield_between_blocks: &mut impl FnMut()) -> Result<(), SnapshotError> {
        let parent = config.path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or_else(|| Path::new("."));
        let mut tmp = NamedTempFile::new_in(parent)?;

        let database_count = storage.database_count();
        format::write_header(tmp.as_file_mut(), database_count as u32)?;

        let toc_offset = tmp.as_file_mut().stream_position()?;
        let placeholder = TocEntry { database_number: 0, entry_count: 0, data_size: 0 };
        for _ in 0..database_count {
            format::write_toc_entry(tmp.as_file_mut(), &placeholder)?;
        }
        let body_offset = tmp.as_file_mut().stream_position()?;

        let mut toc = Vec::with_capacity(database_count as usize);
        for database_number in 0..database_count {
            let (entry_count, data_size) = write_database(tmp.as_file_mut(), storage, database_number, yield_between_blocks)?;
            toc.push(TocEntry { database_number, entry_count, data_size });
        }
        let end_offset = tmp.as_file_mut().stream_position()?;

        tmp.as_file_mut().seek(SeekFrom::Start(toc_offset))?;
        for entry in &toc {
            format::write_toc_entry(tmp.as_file_mut(), entry)?;
        }

        let crc = checksum_range(tmp.as_file_mut(), body_offset, end_offset)?;
        tmp.as_file_mut().seek(SeekFrom::Start(end_offset))?;
        tmp.as_file_mut().write_all(&crc.to_le_bytes())?;
        tmp.as_file_mut().flush()?;

        tmp.persist(&config.path).map_err(|e| SnapshotError::Io(e.error))?;
        Ok(())
    }
}

impl Default for SnapshotCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

/// Serialize one database: the `process_block` loop over live entries,
/// followed by draining `entry_index_to_be_deleted` once the last block has
/// been marked (spec §4.11 steps 3-4).
fn write_database(file: &mut File, storage: &StorageDb, database_number: u16, yield_between_blocks: &mut impl FnMut()) -> Result<(u64, u64), SnapshotError> {
    storage.snapshot_begin(database_number);

    let mut entry_count = 0u64;
    let mut data_size = 0u64;
    let mut cursor = Some(0usize);

    while let Some(c) = cursor {
        storage.snapshot_set_cursor(database_number, c);
        let (block, next) = storage.snapshot_scan_block(database_number, c, BLOCK_SIZE);
        for (key, entry) in block {
            if entry.is_deleted() {
                continue;
            }
            let value = entry.value().to_vec();
            format::write_entry(file, &key, entry.value_type, entry.expiry_time_ms(), &value)?;
            entry_count += 1;
            data_size += value.len() as u64;
        }
        cursor = next;
        yield_between_blocks();
    }

    for (key, entry) in storage.snapshot_drain_pending_deletes(database_number) {
        let value = entry.value().to_vec();
        format::write_entry(file, &key, entry.value_type, entry.expiry_time_ms(), &value)?;
        entry_count += 1;
        data_size += value.len() as u64;
    }

    storage.snapshot_end(database_number);
    Ok((entry_count, data_size))
}

fn checksum_range(file: &mut File, start: u64, end: u64) -> Result<u32, SnapshotError> {
    file.seek(SeekFrom::Start(start))?;
    let mut hasher = Hasher::new();
    let mut remaining = end - start;
    let mut buf = [0u8; 64 * 1024];
    while remaining > 0 {
        let want = buf.len().min(remaining as usize);
        file.read_exact(&mut buf[..want])?;
        hasher.update(&buf[..want]);
        remaining -= want as u64;
    }
    Ok(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::ValueType;

    fn test_storage() -> (StorageDb, Config) {
        let mut config = Config::default();
        config.databases = 2;
        config.hashtable_initial_capacity = 64;
        (StorageDb::new(&config), config)
    }

    #[test]
    fn run_produces_a_readable_dump() {
        let (storage, mut config) = test_storage();
        let dir = tempfile::tempdir().unwrap();
        config.snapshot.path = dir.path().join("dump.kestrel");

        {
            let mut tx = crate::lock::TransactionIdAllocator::new(0).acquire();
            let status = storage.op_rmw_begin(&mut tx, 0, b"foo").unwrap();
            storage.commit_update(status, ValueType::String, crate::storage::ChunkSequence::from_bytes(b"bar"), crate::config::NO_EXPIRY, 0).unwrap();
            tx.release();
        }

        let coordinator = SnapshotCoordinator::new();
        coordinator.run(&storage, &config, 0, || {}).unwrap();

        let mut file = File::open(&config.snapshot.path).unwrap();
        let database_count = format::read_header(&mut file).unwrap();
        assert_eq!(database_count, 2);

        let toc: Vec<_> = (0..database_count).map(|_| format::read_toc_entry(&mut file).unwrap()).collect();
        assert_eq!(toc[0].entry_count, 1);
        assert_eq!(toc[1].entry_count, 0);

        let entry = format::read_entry(&mut file).unwrap().unwrap();
        assert_eq!(entry.key, b"foo");
        assert_eq!(entry.value, b"bar");
        assert!(format::read_entry(&mut file).unwrap().is_none());
    }

    #[test]
    fn should_run_false_until_interval_elapses() {
        let coordinator = SnapshotCoordinator::new();
        let config = Config::default();
        assert!(coordinator.should_run(0));
        coordinator.skip_run(0, &config.snapshot);
        assert!(!coordinator.should_run(1));
        assert!(coordinator.should_run(config.snapshot.interval.as_millis() as i64));
    }

    #[test]
    fn enough_changed_tracks_baseline_after_a_run() {
        let (storage, mut config) = test_storage();
        config.snapshot.min_changed_keys = 1;
        let coordinator = SnapshotCoordinator::new();
        assert!(!coordinator.enough_changed(&storage, &config.snapshot));

        let mut tx = crate::lock::TransactionIdAllocator::new(0).acquire();
        let status = storage.op_rmw_begin(&mut tx, 0, b"foo").unwrap();
        storage.commit_update(status, ValueType::String, crate::storage::ChunkSequence::from_bytes(b"bar"), crate::config::NO_EXPIRY, 0).unwrap();
        tx.release();

        assert!(coordinator.enough_changed(&storage, &config.snapshot));
    }
}
