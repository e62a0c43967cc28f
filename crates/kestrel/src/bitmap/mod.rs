//! Slot bitmap allocators (spec §4.1).
//!
//! Two variants share the same shard+used-count shape: [`mpmc`] supports
//! concurrent producers and consumers via CAS, [`spsc`] assumes a single
//! writer and adds a full-shard scan bitmap on top.

pub mod mpmc;
pub mod spsc;

/// 16-bit lookup table mapping a two-byte window of a shard to the index of
/// its first zero bit (or `u8::MAX` if the window is fully set).
///
/// Matches `slots_bitmap_mpmc_first_free_bit_table` in the original
/// implementation: each entry is computed once at module load via
/// [`build_first_free_bit_table`] rather than checked into source, since a
/// 64 KiB literal table buys nothing a const fn doesn't already give us.
pub(crate) fn first_free_bit_table() -> &'static [u8; 65536] {
    use std::sync::OnceLock;
    static TABLE: OnceLock<Box<[u8; 65536]>> = OnceLock::new();
    TABLE.get_or_init(|| Box::new(build_first_free_bit_table()))
}

fn build_first_free_bit_table() -> [u8; 65536] {
    let mut table = [0u8; 65536];
    for (window, slot) in table.iter_mut().enumerate() {
        *slot = first_zero_bit_naive(window as u16);
    }
    table
}

fn first_zero_bit_naive(window: u16) -> u8 {
    for bit in 0..16 {
        if window & (1 << bit) == 0 {
            return bit;
        }
    }
    u8::MAX
}

/// Find the first zero bit in a 64-bit shard by probing each of its four
/// 16-bit halves against the precomputed lookup table (spec §4.1 step 2).
pub(crate) fn shard_find_first_zero(shard: u64) -> Option<u8> {
    let table = first_free_bit_table();
    for half_index in 0..4u32 {
        let window = ((shard >> (half_index * 16)) & 0xFFFF) as u16;
        let bit = table[window as usize];
        if bit != u8::MAX {
            return Some(bit as u8 + (half_index * 16) as u8);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_shard_finds_bit_zero() {
        assert_eq!(shard_find_first_zero(0), Some(0));
    }

    #[test]
    fn full_shard_finds_nothing() {
        assert_eq!(shard_find_first_zero(u64::MAX), None);
    }

    #[test]
    fn finds_first_gap() {
        // bits 0..=4 set, bit 5 free
        assert_eq!(shard_find_first_zero(0b0001_1111), Some(5));
    }

    #[test]
    fn finds_gap_in_upper_half() {
        let shard = 0xFFFF_FFFF_FFFFu64; // low 48 bits set, bit 48 free
        assert_eq!(shard_find_first_zero(shard), Some(48));
    }
}
