//! Incremental request reader (spec §4.9), mirroring
//! `protocol_redis_reader.c`'s two entry protocols: a RESP array of bulk
//! strings, and the inline protocol (a bare line of whitespace-separated
//! tokens, used by `redis-cli`'s raw mode and health-check scripts).
//!
//! Unlike a reader that hands back a fully materialized command, this one
//! is a resumable state machine that emits discrete events -
//! [`ReadEvent::CommandBegin`], [`ReadEvent::ArgumentBegin`],
//! [`ReadEvent::ArgumentData`] (one or more per argument, each pointing at a
//! slice of the caller's buffer rather than copying it), [`ReadEvent::ArgumentEnd`],
//! [`ReadEvent::CommandEnd`] - so a caller assembling a long bulk-string
//! argument can stream the bytes straight into storage instead of buffering
//! the whole value first (spec §4.10). [`RespReader::poll`] never consumes a
//! partial command: if `buf` doesn't yet hold enough bytes for the next
//! event it simply returns having emitted nothing further, and the caller is
//! expected to read more bytes and poll again with the same (extended)
//! buffer - the "rewind on short read" behavior spec §4.9 describes,
//! expressed here as not advancing rather than an actual seek-back.

/// Caps how much work a single [`RespReader::poll`] call does, so a reader
/// driven by a fixed per-iteration budget (spec §4.9's fiber scheduler
/// cooperates with bounded per-tick work) can't be made to loop forever by a
/// pathologically large buffer.
pub const MAX_EVENTS_PER_POLL: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RespError {
    Protocol(String),
}

impl std::fmt::Display for RespError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Protocol(m) => write!(f, "{m}"),
        }
    }
}

impl std::error::Error for RespError {}

impl From<RespError> for crate::error::CommandError {
    fn from(e: RespError) -> Self {
        match e {
            RespError::Protocol(m) => crate::error::CommandError::protocol(m),
        }
    }
}

/// One step of parsing a single command off the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadEvent {
    /// A new command has started parsing.
    CommandBegin,
    /// The next argument's declared length is known; a buffer of this many
    /// bytes should be prepared to receive it (streamed, if large - spec
    /// §4.10).
    ArgumentBegin { length: usize },
    /// `data_length` bytes of the current argument are available at
    /// `buf[offset..offset + data_length]`, where `buf` is the same slice
    /// passed to [`RespReader::poll`]. An argument may be covered by more
    /// than one `ArgumentData` event if it arrives across several `poll`
    /// calls.
    ArgumentData { offset: usize, data_length: usize },
    /// The current argument is fully read; `index` is its position in the
    /// command (0 is the command name) and `length` its total size.
    ArgumentEnd { index: usize, length: usize },
    /// The command is fully read; `consumed` bytes should be dropped from
    /// the front of the connection's receive buffer.
    CommandEnd { consumed: usize },
}

#[derive(Clone)]
enum Phase {
    AwaitCommand,
    InlineAwaitLine,
    InlineEmit { line_end: usize, tokens: Vec<(usize, usize)>, next: usize },
    MultibulkHeader,
    ArgHeader { index: usize, declared: usize },
    ArgData { index: usize, declared: usize, len: usize, sent: usize },
    ArgTrailer { index: usize, declared: usize, len: usize },
}

/// A resumable parser for one command at a time. `pos` is always the offset
/// into the *current* command's bytes (it resets to zero once a
/// [`ReadEvent::CommandEnd`] is emitted), so the caller's receive buffer
/// must have already dropped the previous command's bytes before the next
/// `poll` call.
pub struct RespReader {
    phase: Phase,
    pos: usize,
}

impl RespReader {
    pub fn new() -> Self {
        Self { phase: Phase::AwaitCommand, pos: 0 }
    }

    /// Advance parsing as far as `buf` and the per-call event budget allow,
    /// appending [`ReadEvent`]s to `events`. Stops (without erroring) the
    /// moment more bytes are needed, the event budget is spent, or a
    /// [`ReadEvent::CommandEnd`] has just been emitted - each call parses at
    /// most one command's worth of progress.
    pub fn poll(
        &mut self,
        buf: &[u8],
        max_command_length: usize,
        max_arguments_per_command: usize,
        events: &mut Vec<ReadEvent>,
    ) -> Result<(), RespError> {
        loop {
            if events.len() >= MAX_EVENTS_PER_POLL {
                return Ok(());
            }

            let phase = std::mem::replace(&mut self.phase, Phase::AwaitCommand);
            match phase {
                Phase::AwaitCommand => {
                    if self.pos >= buf.len() {
                        self.phase = Phase::AwaitCommand;
                        return Ok(());
                    }
                    events.push(ReadEvent::CommandBegin);
                    self.phase = if buf[self.pos] == b'*' { Phase::MultibulkHeader } else { Phase::InlineAwaitLine };
                }

                Phase::InlineAwaitLine => match find_crlf(buf, self.pos) {
                    Some(line_end) => {
                        let line = &buf[self.pos..line_end];
                        let mut tokens = Vec::new();
                        let mut i = 0;
                        while i < line.len() {
                            while i < line.len() && (line[i] == b' ' || line[i] == b'\t') {
                                i += 1;
                            }
                            let start = i;
                            while i < line.len() && line[i] != b' ' && line[i] != b'\t' {
                                i += 1;
                            }
                            if i > start {
                                tokens.push((self.pos + start, i - start));
                            }
                        }
                        self.phase = Phase::InlineEmit { line_end: line_end + 2, tokens, next: 0 };
                    }
                    None => {
                        if buf.len() - self.pos > max_command_length {
                            return Err(RespError::Protocol("ERR Protocol error: too big inline request".into()));
                        }
                        self.phase = Phase::InlineAwaitLine;
                        return Ok(());
                    }
                },

                Phase::InlineEmit { line_end, tokens, next } => {
                    if next >= tokens.len() {
                        self.pos = line_end;
                        events.push(ReadEvent::CommandEnd { consumed: self.pos });
                        self.phase = Phase::AwaitCommand;
                        self.pos = 0;
                        return Ok(());
                    }
                    if events.len() + 3 > MAX_EVENTS_PER_POLL {
                        self.phase = Phase::InlineEmit { line_end, tokens, next };
                        return Ok(());
                    }
                    let (offset, length) = tokens[next];
                    events.push(ReadEvent::ArgumentBegin { length });
                    events.push(ReadEvent::ArgumentData { offset, data_length: length });
                    events.push(ReadEvent::ArgumentEnd { index: next, length });
                    self.phase = Phase::InlineEmit { line_end, tokens, next: next + 1 };
                }

                Phase::MultibulkHeader => match read_integer_line(buf, self.pos, b'*')? {
                    None => {
                        self.phase = Phase::MultibulkHeader;
                        return Ok(());
                    }
                    Some((count, header_end)) => {
                        if count < 0 {
                            // A null array (`*-1\r\n`) carries no command; treat it as
                            // an empty request so the caller simply skips it.
                            self.pos = header_end;
                            events.push(ReadEvent::CommandEnd { consumed: self.pos });
                            self.phase = Phase::AwaitCommand;
                            self.pos = 0;
                            return Ok(());
                        }
                        if count as usize > max_arguments_per_command {
                            return Err(RespError::Protocol("ERR Protocol error: invalid multibulk length".into()));
                        }
                        self.pos = header_end;
                        if count == 0 {
                            events.push(ReadEvent::CommandEnd { consumed: self.pos });
                            self.phase = Phase::AwaitCommand;
                            self.pos = 0;
                            return Ok(());
                        }
                        self.phase = Phase::ArgHeader { index: 0, declared: count as usize };
                    }
                },

                Phase::ArgHeader { index, declared } => {
                    if index == declared {
                        events.push(ReadEvent::CommandEnd { consumed: self.pos });
                        self.phase = Phase::AwaitCommand;
                        self.pos = 0;
                        return Ok(());
                    }
                    match read_integer_line(buf, self.pos, b'$')? {
                        None => {
                            self.phase = Phase::ArgHeader { index, declared };
                            return Ok(());
                        }
                        Some((len, header_end)) => {
                            if len < 0 || len as usize > max_command_length {
                                return Err(RespError::Protocol("ERR Protocol error: invalid bulk length".into()));
                            }
                            self.pos = header_end;
                            events.push(ReadEvent::ArgumentBegin { length: len as usize });
                            self.phase = Phase::ArgData { index, declared, len: len as usize, sent: 0 };
                        }
                    }
                }

                Phase::ArgData { index, declared, len, sent } => {
                    if sent == len {
                        self.phase = Phase::ArgTrailer { index, declared, len };
                    } else {
                        let available = (buf.len().saturating_sub(self.pos)).min(len - sent);
                        if available == 0 {
                            self.phase = Phase::ArgData { index, declared, len, sent };
                            return Ok(());
                        }
                        events.push(ReadEvent::ArgumentData { offset: self.pos, data_length: available });
                        self.pos += available;
                        self.phase = Phase::ArgData { index, declared, len, sent: sent + available };
                    }
                }

                Phase::ArgTrailer { index, declared, len } => {
                    if buf.len() < self.pos + 2 {
                        self.phase = Phase::ArgTrailer { index, declared, len };
                        return Ok(());
                    }
                    if &buf[self.pos..self.pos + 2] != b"\r\n" {
                        return Err(RespError::Protocol("ERR Protocol error: expected '\\r\\n'".into()));
                    }
                    self.pos += 2;
                    events.push(ReadEvent::ArgumentEnd { index, length: len });
                    self.phase = Phase::ArgHeader { index: index + 1, declared };
                }
            }
        }
    }
}

impl Default for RespReader {
    fn default() -> Self {
        Self::new()
    }
}

fn find_crlf(buf: &[u8], from: usize) -> Option<usize> {
    buf[from..].windows(2).position(|w| w == b"\r\n").map(|p| from + p)
}

/// Parse a `*<digits>\r\n`-shaped header (also reused for `$<digits>\r\n`
/// bulk-string length headers with a different leading byte).
fn read_integer_line(buf: &[u8], pos: usize, expected_prefix: u8) -> Result<Option<(i64, usize)>, RespError> {
    if pos >= buf.len() {
        return Ok(None);
    }
    if buf[pos] != expected_prefix {
        return Err(RespError::Protocol(format!(
            "ERR Protocol error: expected '{}', got '{}'",
            expected_prefix as char, buf[pos] as char
        )));
    }
    let Some(line_end) = find_crlf(buf, pos + 1) else {
        return Ok(None);
    };
    let digits = std::str::from_utf8(&buf[pos + 1..line_end])
        .map_err(|_| RespError::Protocol("ERR Protocol error: invalid length".into()))?;
    let value: i64 = digits
        .parse()
        .map_err(|_| RespError::Protocol("ERR Protocol error: invalid multibulk length".to_string()))?;
    Ok(Some((value, line_end + 2)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(reader: &mut RespReader, buf: &[u8]) -> Vec<ReadEvent> {
        let mut events = Vec::new();
        reader.poll(buf, 1024, 1024, &mut events).unwrap();
        events
    }

    #[test]
    fn parses_resp_array_of_bulk_strings() {
        let buf = b"*2\r\n$3\r\nGET\r\n$3\r\nfoo\r\n";
        let mut reader = RespReader::new();
        let events = drain(&mut reader, buf);
        assert_eq!(
            events,
            vec![
                ReadEvent::CommandBegin,
                ReadEvent::ArgumentBegin { length: 3 },
                ReadEvent::ArgumentData { offset: 8, data_length: 3 },
                ReadEvent::ArgumentEnd { index: 0, length: 3 },
                ReadEvent::ArgumentBegin { length: 3 },
                ReadEvent::ArgumentData { offset: 17, data_length: 3 },
                ReadEvent::ArgumentEnd { index: 1, length: 3 },
                ReadEvent::CommandEnd { consumed: buf.len() },
            ]
        );
    }

    #[test]
    fn incomplete_array_waits_for_more_bytes() {
        let buf = b"*2\r\n$3\r\nGET\r\n$3\r\nfo";
        let mut reader = RespReader::new();
        let events = drain(&mut reader, buf);
        assert!(!events.iter().any(|e| matches!(e, ReadEvent::CommandEnd { .. })));
    }

    #[test]
    fn incomplete_header_waits_for_more_bytes() {
        let buf = b"*2\r\n$3\r\n";
        let mut reader = RespReader::new();
        let events = drain(&mut reader, buf);
        assert!(!events.iter().any(|e| matches!(e, ReadEvent::CommandEnd { .. })));
    }

    #[test]
    fn resumes_a_partial_argument_across_polls() {
        let mut reader = RespReader::new();
        let mut events = Vec::new();
        reader.poll(b"*1\r\n$6\r\nfoo", 1024, 1024, &mut events).unwrap();
        assert!(events.contains(&ReadEvent::ArgumentData { offset: 8, data_length: 3 }));
        assert!(!events.iter().any(|e| matches!(e, ReadEvent::ArgumentEnd { .. })));

        events.clear();
        let buf = b"*1\r\n$6\r\nfoobar\r\n";
        reader.poll(buf, 1024, 1024, &mut events).unwrap();
        assert!(events.contains(&ReadEvent::ArgumentData { offset: 11, data_length: 3 }));
        assert!(events.contains(&ReadEvent::CommandEnd { consumed: buf.len() }));
    }

    #[test]
    fn parses_inline_command() {
        let buf = b"PING\r\n";
        let mut reader = RespReader::new();
        let events = drain(&mut reader, buf);
        assert_eq!(
            events,
            vec![
                ReadEvent::CommandBegin,
                ReadEvent::ArgumentBegin { length: 4 },
                ReadEvent::ArgumentData { offset: 0, data_length: 4 },
                ReadEvent::ArgumentEnd { index: 0, length: 4 },
                ReadEvent::CommandEnd { consumed: buf.len() },
            ]
        );
    }

    #[test]
    fn inline_command_with_multiple_tokens() {
        let buf = b"SET foo bar\r\n";
        let mut reader = RespReader::new();
        let events = drain(&mut reader, buf);
        let begins: Vec<usize> = events
            .iter()
            .filter_map(|e| if let ReadEvent::ArgumentBegin { length } = e { Some(*length) } else { None })
            .collect();
        assert_eq!(begins, vec![3, 3, 3]);
    }

    #[test]
    fn rejects_oversized_argument_count() {
        let buf = b"*5\r\n";
        let mut reader = RespReader::new();
        let mut events = Vec::new();
        assert!(reader.poll(buf, 1024, 2, &mut events).is_err());
    }

    #[test]
    fn rejects_malformed_bulk_length() {
        let buf = b"*1\r\n$-5\r\n";
        let mut reader = RespReader::new();
        let mut events = Vec::new();
        assert!(reader.poll(buf, 1024, 1024, &mut events).is_err());
    }

    #[test]
    fn stops_after_one_command_leaving_trailing_bytes_unread() {
        let buf = b"*1\r\n$3\r\nfoo\r\n*1\r\n$3\r\nbar\r\n";
        let mut reader = RespReader::new();
        let events = drain(&mut reader, buf);
        let consumed = match events.last() {
            Some(ReadEvent::CommandEnd { consumed }) => *consumed,
            _ => panic!("expected a CommandEnd"),
        };
        assert_eq!(consumed, 13);

        let mut reader2 = RespReader::new();
        let events2 = drain(&mut reader2, &buf[consumed..]);
        assert!(events2.contains(&ReadEvent::ArgumentData { offset: 8, data_length: 3 }));
    }
}
