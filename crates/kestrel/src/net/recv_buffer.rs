//! Per-connection receive buffer (spec §4.8): "a rewindable ring buffer that
//! preserves trailing partial-message bytes across reads". Network reads
//! append to the tail; [`crate::resp::assembler::CommandAssembler`] is fed
//! the filled prefix and, once it assembles a full command,
//! [`RecvBuffer::consume`] drops the bytes it parsed, sliding any leftover
//! partial command down to the front rather than losing it.

const DEFAULT_CAPACITY: usize = 16 * 1024;

/// Owns a growable byte buffer with a filled length distinct from its
/// capacity: `[0, len)` holds bytes received but not yet consumed by the
/// reader, `[len, buf.len())` is spare capacity the ring can read directly
/// into.
pub struct RecvBuffer {
    buf: Vec<u8>,
    len: usize,
}

impl RecvBuffer {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self { buf: vec![0u8; capacity], len: 0 }
    }

    /// The bytes received and not yet consumed.
    pub fn filled(&self) -> &[u8] {
        &self.buf[..self.len]
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// A writable slice for the network layer to read into directly,
    /// growing the backing buffer first if there's no spare room left.
    pub fn spare_capacity_mut(&mut self, want: usize) -> &mut [u8] {
        let have = self.buf.len() - self.len;
        if have < want {
            self.buf.resize(self.len + want, 0);
        }
        &mut self.buf[self.len..]
    }

    /// Record that `n` bytes were written into the slice
    /// [`Self::spare_capacity_mut`] returned.
    pub fn commit(&mut self, n: usize) {
        self.len += n;
        debug_assert!(self.len <= self.buf.len());
    }

    /// Drop `n` already-parsed bytes from the front, sliding whatever
    /// remains (a partial next command, typically) down to offset zero -
    /// the "rewind" spec §4.8 describes.
    pub fn consume(&mut self, n: usize) {
        debug_assert!(n <= self.len);
        self.buf.copy_within(n..self.len, 0);
        self.len -= n;
    }
}

impl Default for RecvBuffer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commit_extends_filled_region() {
        let mut rb = RecvBuffer::with_capacity(8);
        let spare = rb.spare_capacity_mut(4);
        spare[..4].copy_from_slice(b"abcd");
        rb.commit(4);
        assert_eq!(rb.filled(), b"abcd");
    }

    #[test]
    fn consume_slides_trailing_bytes_to_the_front() {
        let mut rb = RecvBuffer::with_capacity(8);
        rb.spare_capacity_mut(6)[..6].copy_from_slice(b"ab\r\ncd");
        rb.commit(6);
        rb.consume(4);
        assert_eq!(rb.filled(), b"cd");
    }

    #[test]
    fn spare_capacity_grows_the_buffer_when_short() {
        let mut rb = RecvBuffer::with_capacity(4);
        rb.spare_capacity_mut(4)[..4].copy_from_slice(b"abcd");
        rb.commit(4);
        let spare = rb.spare_capacity_mut(100);
        assert!(spare.len() >= 100);
    }

    #[test]
    fn consuming_everything_leaves_an_empty_buffer() {
        let mut rb = RecvBuffer::with_capacity(8);
        rb.spare_capacity_mut(3)[..3].copy_from_slice(b"foo");
        rb.commit(3);
        rb.consume(3);
        assert!(rb.is_empty());
    }
}
