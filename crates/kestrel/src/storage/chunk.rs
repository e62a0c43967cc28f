//! Chunks (spec §4.5): the fixed-size unit a value is sliced into.
//!
//! The original implementation can back a chunk with a storage channel and
//! stage it into a caller-owned buffer on read. This crate only ever keeps
//! values in memory (no block-IO backing is in scope), so a chunk degenerates
//! to an owned, capacity-bounded byte buffer; `chunk_read`/`chunk_write`
//! still take the shape spec §4.5 describes so the storage DB above them
//! reads the same either way.

use crate::config::CHUNK_MAX_SIZE;

/// A single fixed-capacity region of a [`super::sequence::ChunkSequence`].
#[derive(Clone, Debug)]
pub struct Chunk {
    data: Vec<u8>,
}

impl Chunk {
    /// Allocate a chunk able to hold up to `length` bytes (`length` must not
    /// exceed [`CHUNK_MAX_SIZE`]).
    pub fn with_length(length: usize) -> Self {
        debug_assert!(length <= CHUNK_MAX_SIZE);
        Self { data: vec![0u8; length] }
    }

    pub fn chunk_length(&self) -> usize {
        self.data.len()
    }

    /// Write `buf` into this chunk at `offset`, bounded by `chunk_length`.
    /// Returns the number of bytes actually written.
    pub fn chunk_write(&mut self, offset: usize, buf: &[u8]) -> usize {
        if offset >= self.data.len() {
            return 0;
        }
        let n = buf.len().min(self.data.len() - offset);
        self.data[offset..offset + n].copy_from_slice(&buf[..n]);
        n
    }

    /// Read up to `len` bytes starting at `offset` into `out`, returning the
    /// number of bytes copied.
    pub fn chunk_read(&self, offset: usize, len: usize, out: &mut [u8]) -> usize {
        if offset >= self.data.len() {
            return 0;
        }
        let n = len.min(self.data.len() - offset).min(out.len());
        out[..n].copy_from_slice(&self.data[offset..offset + n]);
        n
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_then_read_round_trips() {
        let mut chunk = Chunk::with_length(16);
        assert_eq!(chunk.chunk_write(4, b"hello"), 5);
        let mut out = [0u8; 5];
        assert_eq!(chunk.chunk_read(4, 5, &mut out), 5);
        assert_eq!(&out, b"hello");
    }

    #[test]
    fn write_is_bounded_by_chunk_length() {
        let mut chunk = Chunk::with_length(4);
        assert_eq!(chunk.chunk_write(2, b"hello"), 2);
        assert_eq!(&chunk.as_bytes()[2..4], b"he");
    }
}
