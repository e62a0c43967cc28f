//! Per-connection send buffer (spec §4.8): an append-only staging area for
//! outgoing bytes. Handlers and the RESP writer append into it through
//! [`Self::pending_mut`]; the ring drains everything staged so far with
//! [`Self::take`] to submit as one `send` completion.

/// An append-only staging area for outgoing bytes.
pub struct SendBuffer {
    buf: Vec<u8>,
}

impl SendBuffer {
    pub fn new() -> Self {
        Self { buf: Vec::new() }
    }

    /// Direct mutable access to the staging buffer for callers that append
    /// through an encoder expecting `&mut Vec<u8>` (e.g.
    /// [`crate::resp::writer::Writer::encode`]).
    pub fn pending_mut(&mut self) -> &mut Vec<u8> {
        &mut self.buf
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn pending(&self) -> &[u8] {
        &self.buf
    }

    /// Drain everything staged since the last flush, for the ring to submit
    /// as one `send` completion.
    pub fn take(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.buf)
    }
}

impl Default for SendBuffer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn take_drains_and_resets() {
        let mut sb = SendBuffer::new();
        sb.pending_mut().extend_from_slice(b"hello");
        let drained = sb.take();
        assert_eq!(drained, b"hello");
        assert!(sb.is_empty());
    }
}
