//! Crate-wide error types.
//!
//! Each subsystem defines its own plain enum (no `thiserror`) and converts
//! into [`CommandError`] at the point where a failure needs to become a RESP
//! reply, per the error taxonomy in the specification.

use std::fmt;

/// Errors surfaced to a connected client as a RESP error reply.
///
/// The taxonomy mirrors the specification's error handling design: protocol
/// errors keep the connection open, authentication and fatal storage errors
/// close it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    /// Malformed RESP, unknown command, wrong arity.
    Protocol(String),
    /// Bad integer, out-of-range offset, invalid expiry, wrong type.
    Argument(String),
    /// Missing or incorrect credentials.
    Auth(String),
    /// Hashtable neighborhood full, chunk allocation failed.
    Storage(String),
    /// Stuck lock, CAS loop exhausted, or any other broken invariant.
    Internal(String),
}

impl CommandError {
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    pub fn argument(msg: impl Into<String>) -> Self {
        Self::Argument(msg.into())
    }

    pub fn wrong_type() -> Self {
        Self::Argument(
            "WRONGTYPE Operation against a key holding the wrong kind of value".to_string(),
        )
    }

    pub fn not_integer() -> Self {
        Self::Argument("ERR value is not an integer or out of range".to_string())
    }

    pub fn wrong_arity(cmd: &str) -> Self {
        Self::Protocol(format!("ERR wrong number of arguments for '{cmd}' command"))
    }

    pub fn unknown_command(cmd: &str) -> Self {
        Self::Protocol(format!("ERR unknown command '{cmd}'"))
    }

    /// Whether the connection must be closed after this error is flushed.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Auth(_) | Self::Internal(_))
    }

    /// The RESP simple-error message, including the conventional error-code
    /// prefix (`ERR`, `WRONGTYPE`, ...) when the caller already embedded one.
    pub fn reply_message(&self) -> String {
        match self {
            Self::Protocol(m) | Self::Argument(m) | Self::Auth(m) | Self::Storage(m)
            | Self::Internal(m) => {
                if m.splitn(2, ' ').next().map(|w| w.chars().all(|c| c.is_ascii_uppercase())) == Some(true) {
                    m.clone()
                } else {
                    format!("ERR {m}")
                }
            }
        }
    }
}

impl fmt::Display for CommandError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.reply_message())
    }
}

impl std::error::Error for CommandError {}

/// Errors from [`crate::storage::db`] operations, independent of any RESP
/// framing concern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// The hashtable's bounded neighborhood had no free slot for the key.
    OutOfSpace,
    /// The chunk allocator could not satisfy a `sequence_allocate` request.
    AllocationFailed,
    /// `commit_rename` target exists and the caller did not request replace.
    DestinationExists,
    /// The requested key does not exist (or has lazily expired).
    NotFound,
    /// The entry exists but holds a value of a different type.
    WrongType,
    /// A transactional spinlock spun past its stuck-lock threshold.
    LockStuck,
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            Self::OutOfSpace => "hashtable neighborhood is full",
            Self::AllocationFailed => "chunk allocation failed",
            Self::DestinationExists => "destination key already exists",
            Self::NotFound => "key not found",
            Self::WrongType => "value is not the expected type",
            Self::LockStuck => "a transactional lock appears stuck",
        };
        write!(f, "{msg}")
    }
}

impl std::error::Error for StorageError {}

impl From<StorageError> for CommandError {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::OutOfSpace | StorageError::AllocationFailed => {
                CommandError::Storage(e.to_string())
            }
            StorageError::DestinationExists => CommandError::Argument(
                "ERR target key name is busy".to_string(),
            ),
            StorageError::NotFound => CommandError::Argument("ERR no such key".to_string()),
            StorageError::WrongType => CommandError::wrong_type(),
            StorageError::LockStuck => {
                CommandError::Internal("a transactional lock appears stuck".to_string())
            }
        }
    }
}

/// Errors from [`crate::snapshot`] serialization and dump-file I/O.
#[derive(Debug)]
pub enum SnapshotError {
    Io(std::io::Error),
    /// Bad magic, unsupported version, or an unrecognized value-type tag.
    Format(String),
}

impl fmt::Display for SnapshotError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "snapshot I/O error: {e}"),
            Self::Format(m) => write!(f, "corrupt snapshot: {m}"),
        }
    }
}

impl std::error::Error for SnapshotError {}

impl From<std::io::Error> for SnapshotError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

/// Errors from [`crate::net`] ring initialization (spec §4.8: "unavailable
/// features fail initialization with a reported reason").
#[derive(Debug)]
pub enum NetworkError {
    Io(std::io::Error),
    /// A required `io_uring` feature or opcode this ring depends on isn't
    /// available on the running kernel; carries which one.
    UnsupportedRingFeature(&'static str),
}

impl fmt::Display for NetworkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "network I/O error: {e}"),
            Self::UnsupportedRingFeature(feature) => {
                write!(f, "io_uring ring initialization failed: missing required feature '{feature}'")
            }
        }
    }
}

impl std::error::Error for NetworkError {}

impl From<std::io::Error> for NetworkError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

/// Errors raised while constructing or validating a [`crate::config::Config`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    InvalidValue { field: &'static str, reason: String },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidValue { field, reason } => {
                write!(f, "invalid config field '{field}': {reason}")
            }
        }
    }
}

impl std::error::Error for ConfigError {}
