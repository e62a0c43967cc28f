//! Single-writer hashtable (spec §4.3).
//!
//! Used for per-worker command tables and per-command token tables: built
//! once at worker startup, read many times per request, never mutated
//! concurrently. Linear-probes a power-of-two bucket array within a fixed
//! `max_range`, matching `hashtable_spsc_find_bucket_index_by_key_*` in the
//! original implementation. Case-sensitive and case-insensitive lookups are
//! separate entry points differing only in the hash and comparator used.

use super::hash::{fnv1_64, fnv1_64_ci, spsc_cmp_hash};

const DEFAULT_MAX_RANGE: usize = 24;

#[derive(Clone)]
struct Bucket<V> {
    cmp_hash: u32,
    key: Box<[u8]>,
    value: V,
}

/// A fixed-capacity, single-writer open-addressed table.
pub struct HashtableSpsc<V> {
    buckets: Vec<Option<Bucket<V>>>,
    buckets_count_pow2: usize,
    max_range: usize,
    case_insensitive: bool,
}

impl<V> HashtableSpsc<V> {
    /// Build a table sized for at least `expected_entries`, rounded up to a
    /// power of two, with the default probe range.
    pub fn new(expected_entries: usize, case_insensitive: bool) -> Self {
        Self::with_max_range(expected_entries, case_insensitive, DEFAULT_MAX_RANGE)
    }

    pub fn with_max_range(expected_entries: usize, case_insensitive: bool, max_range: usize) -> Self {
        let buckets_count_pow2 = expected_entries.max(1).next_power_of_two();
        Self {
            buckets: (0..buckets_count_pow2 + max_range).map(|_| None).collect(),
            buckets_count_pow2,
            max_range,
            case_insensitive,
        }
    }

    fn hash(&self, key: &[u8]) -> u64 {
        if self.case_insensitive {
            fnv1_64_ci(key)
        } else {
            fnv1_64(key)
        }
    }

    fn key_matches(&self, stored: &[u8], key: &[u8]) -> bool {
        if self.case_insensitive {
            stored.eq_ignore_ascii_case(key)
        } else {
            stored == key
        }
    }

    fn bucket_index_from_hash(&self, hash: u64) -> usize {
        (hash as usize) & (self.buckets_count_pow2 - 1)
    }

    fn find_bucket_index(&self, key: &[u8]) -> Option<usize> {
        let hash = self.hash(key);
        let cmp_hash = spsc_cmp_hash(hash);
        let start = self.bucket_index_from_hash(hash);
        let end = (start + self.max_range).min(self.buckets.len());

        for index in start..end {
            let Some(bucket) = &self.buckets[index] else {
                continue;
            };
            if bucket.cmp_hash == cmp_hash && self.key_matches(&bucket.key, key) {
                return Some(index);
            }
        }
        None
    }

    fn find_empty_bucket_index(&self, key: &[u8]) -> Option<usize> {
        let hash = self.hash(key);
        let start = self.bucket_index_from_hash(hash);
        let end = (start + self.max_range).min(self.buckets.len());
        (start..end).find(|&index| self.buckets[index].is_none())
    }

    pub fn get(&self, key: &[u8]) -> Option<&V> {
        self.find_bucket_index(key).map(|index| &self.buckets[index].as_ref().unwrap().value)
    }

    /// Insert `key`, returning `false` (and leaving the table unchanged) when
    /// the probe range is exhausted with no free bucket — the caller should
    /// `upsize` and retry.
    pub fn insert(&mut self, key: &[u8], value: V) -> bool {
        if let Some(index) = self.find_bucket_index(key) {
            self.buckets[index] = Some(Bucket {
                cmp_hash: spsc_cmp_hash(self.hash(key)),
                key: key.to_vec().into_boxed_slice(),
                value,
            });
            return true;
        }
        let Some(index) = self.find_empty_bucket_index(key) else {
            return false;
        };
        self.buckets[index] = Some(Bucket {
            cmp_hash: spsc_cmp_hash(self.hash(key)),
            key: key.to_vec().into_boxed_slice(),
            value,
        });
        true
    }

    /// Grow the bucket array, rehashing every live entry. Used once at
    /// construction time if the initial sizing guess turns out to be too
    /// small (spec §4.3 "companion `upsize` operation").
    pub fn upsize(&mut self, new_expected_entries: usize) {
        let new_pow2 = new_expected_entries.max(1).next_power_of_two();
        if new_pow2 <= self.buckets_count_pow2 {
            return;
        }

        let old_buckets = std::mem::take(&mut self.buckets);
        self.buckets_count_pow2 = new_pow2;
        self.buckets = (0..new_pow2 + self.max_range).map(|_| None).collect();

        for bucket in old_buckets.into_iter().flatten() {
            let hash = self.hash(&bucket.key);
            let start = self.bucket_index_from_hash(hash);
            let end = (start + self.max_range).min(self.buckets.len());
            if let Some(index) = (start..end).find(|&i| self.buckets[i].is_none()) {
                self.buckets[index] = Some(bucket);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_then_get_case_sensitive() {
        let mut ht = HashtableSpsc::new(16, false);
        assert!(ht.insert(b"GET", 1u32));
        assert_eq!(ht.get(b"GET"), Some(&1));
        assert_eq!(ht.get(b"get"), None);
    }

    #[test]
    fn insert_then_get_case_insensitive() {
        let mut ht = HashtableSpsc::new(16, true);
        assert!(ht.insert(b"GET", 1u32));
        assert_eq!(ht.get(b"get"), Some(&1));
        assert_eq!(ht.get(b"GeT"), Some(&1));
    }

    #[test]
    fn upsize_preserves_existing_entries() {
        let mut ht = HashtableSpsc::new(4, false);
        for i in 0..4u32 {
            assert!(ht.insert(format!("k{i}").as_bytes(), i));
        }
        ht.upsize(64);
        for i in 0..4u32 {
            assert_eq!(ht.get(format!("k{i}").as_bytes()), Some(&i));
        }
        assert!(ht.insert(b"k-new", 99));
    }
}
