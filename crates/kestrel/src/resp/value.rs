//! The reply value model (spec §4.9). One enum covers every RESP3 type; a
//! [`super::Writer`] degrades the RESP3-only variants to their nearest RESP2
//! shape when the connection hasn't negotiated RESP3.

/// A value a command handler hands to the writer. Handlers build these
/// without caring which wire version the connection negotiated - that
/// decision is [`super::Writer`]'s alone.
#[derive(Debug, Clone, PartialEq)]
pub enum RespValue {
    SimpleString(String),
    BlobString(Vec<u8>),
    VerbatimString { format: [u8; 3], data: Vec<u8> },
    Integer(i64),
    Double(f64),
    BigNumber(String),
    Null,
    Boolean(bool),
    Array(Vec<RespValue>),
    Map(Vec<(RespValue, RespValue)>),
    Set(Vec<RespValue>),
    Push(Vec<RespValue>),
    SimpleError(String),
    BlobError(Vec<u8>),
}

impl RespValue {
    pub fn ok() -> Self {
        Self::SimpleString("OK".to_string())
    }

    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self::BlobString(bytes.into())
    }

    pub fn from_str(s: impl Into<String>) -> Self {
        Self::BlobString(s.into().into_bytes())
    }

    pub fn array(values: Vec<RespValue>) -> Self {
        Self::Array(values)
    }
}

impl From<crate::error::CommandError> for RespValue {
    fn from(e: crate::error::CommandError) -> Self {
        Self::SimpleError(e.reply_message())
    }
}
