//! Bridges [`RespReader`]'s event stream to whole command arguments (spec
//! §4.10): each argument is assembled either as a plain buffer or, once its
//! declared length reaches [`ARGUMENT_STREAM_THRESHOLD`], straight into a
//! [`ChunkSequence`] as its `ArgumentData` events arrive - so a handler that
//! wants the sequence never pays for an intermediate `Vec<u8>` copy of a
//! large value.

use crate::config::ARGUMENT_STREAM_THRESHOLD;
use crate::storage::sequence::ChunkSequence;

use super::reader::{ReadEvent, RespError, RespReader};

/// One assembled command argument. Small arguments (and the command name
/// itself) stay as a plain buffer; large bulk-string values are built
/// directly as a [`ChunkSequence`], letting a storage-writing handler hand
/// it straight to `commit_update` with no extra copy.
#[derive(Debug, Clone)]
pub enum ArgValue {
    Bytes(Vec<u8>),
    Streamed(ChunkSequence),
}

impl ArgValue {
    pub fn len(&self) -> usize {
        match self {
            Self::Bytes(b) => b.len(),
            Self::Streamed(s) => s.size(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy this argument's bytes into a fresh `Vec<u8>`, for handlers that
    /// only need a short metadata value (a flag, a count, a key).
    pub fn materialize(&self) -> Vec<u8> {
        match self {
            Self::Bytes(b) => b.clone(),
            Self::Streamed(s) => s.to_vec(),
        }
    }

    /// Consume this argument as a [`ChunkSequence`], without copying if it
    /// was already streamed into one.
    pub fn into_sequence(self) -> ChunkSequence {
        match self {
            Self::Bytes(b) => ChunkSequence::from_bytes(&b),
            Self::Streamed(s) => s,
        }
    }
}

enum Building {
    Bytes(Vec<u8>),
    Streamed(ChunkSequence, usize),
}

/// Drives a [`RespReader`] to completion for one command at a time,
/// assembling its arguments as [`ArgValue`]s.
pub struct CommandAssembler {
    reader: RespReader,
    args: Vec<ArgValue>,
    building: Option<Building>,
}

impl CommandAssembler {
    pub fn new() -> Self {
        Self { reader: RespReader::new(), args: Vec::new(), building: None }
    }

    /// Try to assemble one full command from the front of `buf`. Returns
    /// `Ok(None)` if more bytes are needed; `Ok(Some((args, consumed)))`
    /// once a command is complete, where `consumed` bytes should be dropped
    /// from the front of the caller's receive buffer.
    pub fn next_command(
        &mut self,
        buf: &[u8],
        max_command_length: usize,
        max_arguments_per_command: usize,
    ) -> Result<Option<(Vec<ArgValue>, usize)>, RespError> {
        let mut events = Vec::new();
        loop {
            events.clear();
            self.reader.poll(buf, max_command_length, max_arguments_per_command, &mut events)?;
            if events.is_empty() {
                return Ok(None);
            }

            for event in &events {
                match *event {
                    ReadEvent::CommandBegin => {}
                    ReadEvent::ArgumentBegin { length } => {
                        self.building = Some(if length >= ARGUMENT_STREAM_THRESHOLD {
                            Building::Streamed(ChunkSequence::allocate(length), 0)
                        } else {
                            Building::Bytes(Vec::with_capacity(length))
                        });
                    }
                    ReadEvent::ArgumentData { offset, data_length } => {
                        let slice = &buf[offset..offset + data_length];
                        match self.building.as_mut().expect("ArgumentData without a matching ArgumentBegin") {
                            Building::Bytes(b) => b.extend_from_slice(slice),
                            Building::Streamed(seq, written) => {
                                seq.write(*written, slice);
                                *written += data_length;
                            }
                        }
                    }
                    ReadEvent::ArgumentEnd { .. } => {
                        let value = match self.building.take().expect("ArgumentEnd without a built argument") {
                            Building::Bytes(b) => ArgValue::Bytes(b),
                            Building::Streamed(seq, _) => ArgValue::Streamed(seq),
                        };
                        self.args.push(value);
                    }
                    ReadEvent::CommandEnd { consumed } => {
                        return Ok(Some((std::mem::take(&mut self.args), consumed)));
                    }
                }
            }
        }
    }
}

impl Default for CommandAssembler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assembles_a_small_command_as_bytes() {
        let mut assembler = CommandAssembler::new();
        let buf = b"*2\r\n$3\r\nSET\r\n$3\r\nfoo\r\n";
        let (args, consumed) = assembler.next_command(buf, 1024, 1024).unwrap().unwrap();
        assert_eq!(consumed, buf.len());
        assert_eq!(args.len(), 2);
        assert_eq!(args[0].materialize(), b"SET");
        assert_eq!(args[1].materialize(), b"foo");
        assert!(matches!(args[0], ArgValue::Bytes(_)));
    }

    #[test]
    fn streams_a_large_argument_into_a_chunk_sequence() {
        let mut assembler = CommandAssembler::new();
        let value = vec![b'x'; ARGUMENT_STREAM_THRESHOLD + 10];
        let mut buf = format!("*2\r\n$3\r\nfoo\r\n${}\r\n", value.len()).into_bytes();
        buf.extend_from_slice(&value);
        buf.extend_from_slice(b"\r\n");

        let (args, consumed) = assembler.next_command(&buf, 4 * 1024 * 1024, 1024).unwrap().unwrap();
        assert_eq!(consumed, buf.len());
        assert!(matches!(args[1], ArgValue::Streamed(_)));
        assert_eq!(args[1].materialize(), value);
    }

    #[test]
    fn incomplete_command_returns_none_and_can_be_resumed() {
        let mut assembler = CommandAssembler::new();
        let partial = b"*2\r\n$3\r\nSET\r\n$3\r\nfo";
        assert!(assembler.next_command(partial, 1024, 1024).unwrap().is_none());

        let full = b"*2\r\n$3\r\nSET\r\n$3\r\nfoo\r\n";
        let (args, consumed) = assembler.next_command(full, 1024, 1024).unwrap().unwrap();
        assert_eq!(consumed, full.len());
        assert_eq!(args[1].materialize(), b"foo");
    }

    #[test]
    fn leaves_a_second_command_for_the_next_call() {
        let mut assembler = CommandAssembler::new();
        let buf = b"*1\r\n$3\r\nfoo\r\n*1\r\n$3\r\nbar\r\n";
        let (args, consumed) = assembler.next_command(buf, 1024, 1024).unwrap().unwrap();
        assert_eq!(args[0].materialize(), b"foo");

        let (args2, _) = assembler.next_command(&buf[consumed..], 1024, 1024).unwrap().unwrap();
        assert_eq!(args2[0].materialize(), b"bar");
    }
}
