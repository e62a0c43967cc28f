//! Chunk sequences (spec §4.5): an ordered, immutable-after-publication list
//! of [`Chunk`]s representing one value.

use super::chunk::Chunk;
use crate::config::CHUNK_MAX_SIZE;

/// An ordered list of chunks whose `chunk_length`s sum to `size`. All chunks
/// but possibly the last are full.
#[derive(Clone, Debug)]
pub struct ChunkSequence {
    chunks: Vec<Chunk>,
    size: usize,
}

impl ChunkSequence {
    /// Allocate a sequence of `⌈size / CHUNK_MAX_SIZE⌉` chunks able to hold
    /// exactly `size` bytes.
    pub fn allocate(size: usize) -> Self {
        if size == 0 {
            return Self { chunks: Vec::new(), size: 0 };
        }
        let full_chunks = size / CHUNK_MAX_SIZE;
        let remainder = size % CHUNK_MAX_SIZE;
        let mut chunks = Vec::with_capacity(full_chunks + usize::from(remainder > 0));
        for _ in 0..full_chunks {
            chunks.push(Chunk::with_length(CHUNK_MAX_SIZE));
        }
        if remainder > 0 {
            chunks.push(Chunk::with_length(remainder));
        }
        Self { chunks, size }
    }

    /// Build a sequence directly from `bytes`, chunked at `CHUNK_MAX_SIZE`
    /// boundaries — the common path for command handlers that already have
    /// the whole value in hand (e.g. `SET`).
    pub fn from_bytes(bytes: &[u8]) -> Self {
        let mut seq = Self::allocate(bytes.len());
        seq.write(0, bytes);
        seq
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn count(&self) -> usize {
        self.chunks.len()
    }

    /// Write `buf` starting at absolute offset `offset`, spanning as many
    /// chunks as needed.
    pub fn write(&mut self, offset: usize, buf: &[u8]) {
        let mut remaining = buf;
        let mut pos = offset;
        while !remaining.is_empty() {
            let (chunk_index, chunk_offset) = self.locate(pos);
            let Some(chunk) = self.chunks.get_mut(chunk_index) else {
                break;
            };
            let written = chunk.chunk_write(chunk_offset, remaining);
            if written == 0 {
                break;
            }
            remaining = &remaining[written..];
            pos += written;
        }
    }

    /// Read `len` bytes starting at absolute offset `offset` into a freshly
    /// allocated buffer (the caller-owned staging buffer spec §4.5 mentions
    /// for storage-channel-backed chunks; here it is unconditional since
    /// every chunk already lives in memory).
    pub fn read_to_vec(&self, offset: usize, len: usize) -> Vec<u8> {
        let mut out = vec![0u8; len];
        let mut pos = offset;
        let mut written = 0;
        while written < len {
            let (chunk_index, chunk_offset) = self.locate(pos);
            let Some(chunk) = self.chunks.get(chunk_index) else {
                break;
            };
            let n = chunk.chunk_read(chunk_offset, len - written, &mut out[written..]);
            if n == 0 {
                break;
            }
            written += n;
            pos += n;
        }
        out.truncate(written);
        out
    }

    /// Concatenate the whole sequence into one buffer.
    pub fn to_vec(&self) -> Vec<u8> {
        self.read_to_vec(0, self.size)
    }

    fn locate(&self, offset: usize) -> (usize, usize) {
        (offset / CHUNK_MAX_SIZE, offset % CHUNK_MAX_SIZE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_bytes_round_trips() {
        let seq = ChunkSequence::from_bytes(b"the quick brown fox");
        assert_eq!(seq.to_vec(), b"the quick brown fox");
    }

    #[test]
    fn spans_multiple_chunks() {
        let value = vec![7u8; CHUNK_MAX_SIZE * 2 + 123];
        let seq = ChunkSequence::from_bytes(&value);
        assert_eq!(seq.count(), 3);
        assert_eq!(seq.to_vec(), value);
    }

    #[test]
    fn partial_read_within_a_chunk() {
        let seq = ChunkSequence::from_bytes(b"0123456789");
        assert_eq!(seq.read_to_vec(3, 4), b"3456");
    }
}
