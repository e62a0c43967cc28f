//! Concurrent chunked hashtable, MCMP (spec §4.2).
//!
//! Cells are grouped into fixed-size chunks so a probe only has to take one
//! lock and scan one small tag array. The original implementation scans tags
//! with raw SIMD compares under a hand-rolled spinlock; here a chunk's tags
//! and slots live behind one [`parking_lot::RwLock`] — a chunk is small
//! enough (`HASHTABLE_CHUNK_SLOTS` slots) that a short read-lock hold plus a
//! plain `==` scan costs about the same as an unsafe SIMD probe would, without
//! the `unsafe`. Pinning a found entry against concurrent deletion is the
//! storage layer's job (`storage::entry::EntryIndex::readers_counter`), not
//! this table's — the hashtable only ever hands back a `value_index`.

use parking_lot::RwLock;

use super::hash::{fnv1_64, half_hash_tag};
use crate::config::HASHTABLE_CHUNK_SLOTS as K;
use crate::error::StorageError;

#[derive(Clone)]
struct Slot {
    tag: u16,
    key_hash: u64,
    key: Box<[u8]>,
    value_index: u64,
}

struct ChunkData {
    slots: [Option<Slot>; K],
}

impl ChunkData {
    fn empty() -> Self {
        Self {
            slots: std::array::from_fn(|_| None),
        }
    }
}

/// Outcome of [`ConcurrentHashtable::insert_or_update`].
pub enum InsertOutcome {
    /// A new key was inserted.
    Inserted,
    /// An existing key's value index was replaced; the old value is returned
    /// so the caller can retire it.
    Updated(u64),
}

/// A fixed-capacity, chunk-sharded hashtable mapping byte-string keys to a
/// `u64` value index (spec §4.2).
pub struct ConcurrentHashtable {
    chunks: Vec<RwLock<ChunkData>>,
    neighborhood: usize,
}

impl ConcurrentHashtable {
    /// Build a table with room for at least `capacity` keys, probing up to
    /// `neighborhood` chunks per operation.
    pub fn new(capacity: usize, neighborhood: usize) -> Self {
        let chunks_count = capacity.div_ceil(K).max(1);
        Self {
            chunks: (0..chunks_count).map(|_| RwLock::new(ChunkData::empty())).collect(),
            neighborhood: neighborhood.max(1),
        }
    }

    pub fn capacity(&self) -> usize {
        self.chunks.len() * K
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    /// The chunk a key's hash maps to, exposed so the storage DB (spec §4.6)
    /// can apply its own per-chunk transactional lock over the same
    /// sharding this table already uses internally.
    pub fn chunk_index_for_key(&self, key: &[u8]) -> usize {
        self.chunk_index_for_hash(fnv1_64(key))
    }

    fn chunk_index_for_hash(&self, hash: u64) -> usize {
        (hash as usize) % self.chunks.len()
    }

    /// Remove every key (spec's `FLUSHDB`).
    pub fn clear(&self) {
        for chunk in &self.chunks {
            *chunk.write() = ChunkData::empty();
        }
    }

    /// Look up `key`, returning its current value index if present.
    pub fn search(&self, key: &[u8]) -> Option<u64> {
        let hash = fnv1_64(key);
        let tag = half_hash_tag(hash);
        let base = self.chunk_index_for_hash(hash);
        let chunks_count = self.chunks.len();

        for step in 0..self.neighborhood {
            let chunk_index = (base + step) % chunks_count;
            let chunk = self.chunks[chunk_index].read();
            for slot in chunk.slots.iter().flatten() {
                if slot.tag == tag && slot.key_hash == hash && slot.key.as_ref() == key {
                    return Some(slot.value_index);
                }
            }
        }
        None
    }

    /// Insert a new key or overwrite the value index of an existing one.
    ///
    /// Fails with [`StorageError::OutOfSpace`] when the key is new and every
    /// chunk in the neighborhood is full.
    pub fn insert_or_update(&self, key: &[u8], value_index: u64) -> Result<InsertOutcome, StorageError> {
        let hash = fnv1_64(key);
        let tag = half_hash_tag(hash);
        let base = self.chunk_index_for_hash(hash);
        let chunks_count = self.chunks.len();

        let mut first_empty: Option<(usize, usize)> = None;

        for step in 0..self.neighborhood {
            let chunk_index = (base + step) % chunks_count;
            let mut chunk = self.chunks[chunk_index].write();

            for (slot_index, slot) in chunk.slots.iter_mut().enumerate() {
                match slot {
                    Some(existing) if existing.tag == tag && existing.key_hash == hash && existing.key.as_ref() == key => {
                        let old = existing.value_index;
                        existing.value_index = value_index;
                        return Ok(InsertOutcome::Updated(old));
                    }
                    None if first_empty.is_none() => {
                        first_empty = Some((chunk_index, slot_index));
                    }
                    _ => {}
                }
            }
        }

        let Some((chunk_index, slot_index)) = first_empty else {
            return Err(StorageError::OutOfSpace);
        };

        let mut chunk = self.chunks[chunk_index].write();
        // Tag is published last (this assignment is the final field write
        // before the write-lock drops) so a concurrent reader never observes
        // a half-installed slot, per spec §4.2 "Insertion/update".
        chunk.slots[slot_index] = Some(Slot {
            key_hash: hash,
            key: key.to_vec().into_boxed_slice(),
            value_index,
            tag,
        });
        Ok(InsertOutcome::Inserted)
    }

    /// Remove `key`, returning its value index if it was present.
    pub fn delete(&self, key: &[u8]) -> Option<u64> {
        let hash = fnv1_64(key);
        let tag = half_hash_tag(hash);
        let base = self.chunk_index_for_hash(hash);
        let chunks_count = self.chunks.len();

        for step in 0..self.neighborhood {
            let chunk_index = (base + step) % chunks_count;
            let mut chunk = self.chunks[chunk_index].write();
            for slot in chunk.slots.iter_mut() {
                let matches = matches!(slot, Some(s) if s.tag == tag && s.key_hash == hash && s.key.as_ref() == key);
                if matches {
                    return slot.take().map(|s| s.value_index);
                }
            }
        }
        None
    }

    /// Walk chunks starting at `cursor`, emitting up to `limit` occupied
    /// `(key, value_index)` pairs, returning the next cursor (`None` once the
    /// whole table has been walked). Not snapshot-consistent: see spec §4.2
    /// "Iteration".
    pub fn scan(&self, cursor: usize, limit: usize) -> (Vec<(Box<[u8]>, u64)>, Option<usize>) {
        let chunks_count = self.chunks.len();
        let mut out = Vec::new();
        let mut chunk_index = cursor % chunks_count.max(1);

        if chunks_count == 0 {
            return (out, None);
        }

        loop {
            let chunk = self.chunks[chunk_index].read();
            for slot in chunk.slots.iter().flatten() {
                out.push((slot.key.clone(), slot.value_index));
                if out.len() >= limit {
                    let next = chunk_index + 1;
                    return (out, if next < chunks_count { Some(next) } else { None });
                }
            }
            drop(chunk);
            chunk_index += 1;
            if chunk_index >= chunks_count {
                return (out, None);
            }
        }
    }
}
