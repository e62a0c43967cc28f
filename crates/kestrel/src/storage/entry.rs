//! Entry Index (spec §3): the addressable storage record a key's hashtable
//! slot points to.

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, Ordering};
use std::sync::Arc;

use super::sequence::ChunkSequence;
use crate::config::NO_EXPIRY;

/// The kind of value an [`EntryIndex`] holds. Only `String` is in scope
/// (hashes, lists, sets are out of scope per spec §1 Non-goals); the
/// enumeration still exists so `TYPE` has something honest to report and so
/// adding a variant later doesn't require touching the RMW engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueType {
    String,
}

impl ValueType {
    pub fn type_name(self) -> &'static str {
        match self {
            Self::String => "string",
        }
    }

    /// The on-disk tag `snapshot::format` writes for this type (spec §6
    /// "for each entry `(... type u8 ...)`").
    pub fn as_u8(self) -> u8 {
        match self {
            Self::String => 0,
        }
    }

    pub fn from_u8(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(Self::String),
            _ => None,
        }
    }
}

/// Immutable-after-publication except `expiry_time_ms` (changed only under
/// an RMW holding the owning chunk's write lock) and `readers_counter`
/// (atomic, bumped by every pin/unpin regardless of lock).
///
/// Reclaiming one is just letting its last `Arc` clone drop: Rust's
/// reference counting already gives the "freed when readers_counter reaches
/// zero and deleted is set" invariant spec §3 describes for a
/// manually-managed language, so `readers_counter` here tracks *pins for
/// diagnostic/eviction purposes* rather than gating the free itself.
pub struct EntryIndex {
    pub value_type: ValueType,
    value: ChunkSequence,
    expiry_time_ms: AtomicI64,
    readers_counter: AtomicU32,
    deleted: AtomicBool,
    pub database_number: u16,
    created_at_ms: i64,
    last_accessed_ms: AtomicI64,
    access_count: AtomicU32,
}

impl EntryIndex {
    pub fn new(value_type: ValueType, value: ChunkSequence, expiry_time_ms: i64, database_number: u16, now_ms: i64) -> Arc<Self> {
        Arc::new(Self {
            value_type,
            value,
            expiry_time_ms: AtomicI64::new(expiry_time_ms),
            readers_counter: AtomicU32::new(0),
            deleted: AtomicBool::new(false),
            database_number,
            created_at_ms: now_ms,
            last_accessed_ms: AtomicI64::new(now_ms),
            access_count: AtomicU32::new(0),
        })
    }

    pub fn value(&self) -> &ChunkSequence {
        &self.value
    }

    pub fn expiry_time_ms(&self) -> i64 {
        self.expiry_time_ms.load(Ordering::Acquire)
    }

    pub fn set_expiry_time_ms(&self, value: i64) {
        self.expiry_time_ms.store(value, Ordering::Release);
    }

    pub fn has_expiry(&self) -> bool {
        self.expiry_time_ms() != NO_EXPIRY
    }

    pub fn is_expired_at(&self, now_ms: i64) -> bool {
        self.has_expiry() && now_ms >= self.expiry_time_ms()
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted.load(Ordering::Acquire)
    }

    pub fn mark_deleted(&self) {
        self.deleted.store(true, Ordering::Release);
    }

    /// Pin this entry for read access, as spec §4.6's
    /// `current_entry_index_prep_for_read` / `get_entry_index_for_read` do.
    pub fn pin_for_read(&self, now_ms: i64) {
        self.readers_counter.fetch_add(1, Ordering::AcqRel);
        self.last_accessed_ms.store(now_ms, Ordering::Release);
        self.access_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Release a pin taken by [`Self::pin_for_read`].
    pub fn unpin(&self) {
        self.readers_counter.fetch_sub(1, Ordering::AcqRel);
    }

    pub fn readers_counter(&self) -> u32 {
        self.readers_counter.load(Ordering::Acquire)
    }

    pub fn last_accessed_ms(&self) -> i64 {
        self.last_accessed_ms.load(Ordering::Acquire)
    }

    pub fn access_count(&self) -> u32 {
        self.access_count.load(Ordering::Relaxed)
    }

    pub fn created_at_ms(&self) -> i64 {
        self.created_at_ms
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_expiry_sentinel_reports_no_expiry() {
        let entry = EntryIndex::new(ValueType::String, ChunkSequence::from_bytes(b"v"), NO_EXPIRY, 0, 1000);
        assert!(!entry.has_expiry());
        assert!(!entry.is_expired_at(i64::MAX));
    }

    #[test]
    fn expiry_in_the_past_is_expired() {
        let entry = EntryIndex::new(ValueType::String, ChunkSequence::from_bytes(b"v"), 1000, 0, 0);
        assert!(entry.is_expired_at(1000));
        assert!(!entry.is_expired_at(999));
    }

    #[test]
    fn value_type_tag_round_trips() {
        assert_eq!(ValueType::from_u8(ValueType::String.as_u8()), Some(ValueType::String));
        assert_eq!(ValueType::from_u8(0xff), None);
    }

    #[test]
    fn pin_and_unpin_track_readers_counter() {
        let entry = EntryIndex::new(ValueType::String, ChunkSequence::from_bytes(b"v"), NO_EXPIRY, 0, 0);
        entry.pin_for_read(0);
        entry.pin_for_read(0);
        assert_eq!(entry.readers_counter(), 2);
        entry.unpin();
        assert_eq!(entry.readers_counter(), 1);
    }
}
