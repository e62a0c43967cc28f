//! Reply encoding (spec §4.9, mirroring `protocol_redis_writer.c`'s type tag
//! bytes): `+` simple string, `$` blob string, `=` verbatim string, `:`
//! number, `,` double, `(` big number, `_` null, `#` boolean, `*` array,
//! `%` map, `~` set, `>` push, `-` simple error, `!` blob error.
//!
//! RESP3-only shapes (map, set, push, boolean, double, big number, the `_`
//! null) degrade to their RESP2 equivalent when the connection hasn't sent
//! `HELLO 3` - a map becomes a flat array of alternating key/value entries,
//! a boolean becomes `:0`/`:1`, a double becomes a blob string of its
//! formatted digits, and so on.

use std::io::Write;

use super::value::RespValue;
use super::RespVersion;

/// Encodes [`RespValue`]s for one connection's negotiated [`RespVersion`].
pub struct Writer {
    version: RespVersion,
}

impl Writer {
    pub fn new(version: RespVersion) -> Self {
        Self { version }
    }

    pub fn set_version(&mut self, version: RespVersion) {
        self.version = version;
    }

    pub fn version(&self) -> RespVersion {
        self.version
    }

    /// Append the wire encoding of `value` to `out`.
    pub fn encode(&self, value: &RespValue, out: &mut Vec<u8>) {
        match value {
            RespValue::SimpleString(s) => {
                out.push(b'+');
                out.extend_from_slice(s.as_bytes());
                out.extend_from_slice(b"\r\n");
            }
            RespValue::BlobString(bytes) => self.write_blob_string(b'$', bytes, out),
            RespValue::VerbatimString { format, data } => {
                if self.version == RespVersion::Resp3 {
                    let mut payload = Vec::with_capacity(4 + data.len());
                    payload.extend_from_slice(format);
                    payload.push(b':');
                    payload.extend_from_slice(data);
                    self.write_blob_string(b'=', &payload, out);
                } else {
                    self.write_blob_string(b'$', data, out);
                }
            }
            RespValue::Integer(n) => {
                out.push(b':');
                let _ = write!(out, "{n}");
                out.extend_from_slice(b"\r\n");
            }
            RespValue::Double(d) => {
                if self.version == RespVersion::Resp3 {
                    out.push(b',');
                    self.write_double_body(*d, out);
                    out.extend_from_slice(b"\r\n");
                } else {
                    let mut body = Vec::new();
                    self.write_double_body(*d, &mut body);
                    self.write_blob_string(b'$', &body, out);
                }
            }
            RespValue::BigNumber(s) => {
                if self.version == RespVersion::Resp3 {
                    out.push(b'(');
                    out.extend_from_slice(s.as_bytes());
                    out.extend_from_slice(b"\r\n");
                } else {
                    self.write_blob_string(b'$', s.as_bytes(), out);
                }
            }
            RespValue::Null => {
                if self.version == RespVersion::Resp3 {
                    out.extend_from_slice(b"_\r\n");
                } else {
                    out.extend_from_slice(b"$-1\r\n");
                }
            }
            RespValue::Boolean(b) => {
                if self.version == RespVersion::Resp3 {
                    out.push(b'#');
                    out.push(if *b { b't' } else { b'f' });
                    out.extend_from_slice(b"\r\n");
                } else {
                    out.push(b':');
                    out.push(if *b { b'1' } else { b'0' });
                    out.extend_from_slice(b"\r\n");
                }
            }
            RespValue::Array(items) => self.write_aggregate(b'*', items, out),
            RespValue::Set(items) => {
                self.write_aggregate(if self.version == RespVersion::Resp3 { b'~' } else { b'*' }, items, out);
            }
            RespValue::Push(items) => {
                self.write_aggregate(if self.version == RespVersion::Resp3 { b'>' } else { b'*' }, items, out);
            }
            RespValue::Map(pairs) => {
                if self.version == RespVersion::Resp3 {
                    out.push(b'%');
                    let _ = write!(out, "{}", pairs.len());
                    out.extend_from_slice(b"\r\n");
                    for (k, v) in pairs {
                        self.encode(k, out);
                        self.encode(v, out);
                    }
                } else {
                    out.push(b'*');
                    let _ = write!(out, "{}", pairs.len() * 2);
                    out.extend_from_slice(b"\r\n");
                    for (k, v) in pairs {
                        self.encode(k, out);
                        self.encode(v, out);
                    }
                }
            }
            RespValue::SimpleError(msg) => {
                out.push(b'-');
                out.extend_from_slice(msg.as_bytes());
                out.extend_from_slice(b"\r\n");
            }
            RespValue::BlobError(bytes) => {
                if self.version == RespVersion::Resp3 {
                    self.write_blob_string(b'!', bytes, out);
                } else {
                    out.push(b'-');
                    out.extend_from_slice(bytes);
                    out.extend_from_slice(b"\r\n");
                }
            }
        }
    }

    fn write_blob_string(&self, tag: u8, bytes: &[u8], out: &mut Vec<u8>) {
        out.push(tag);
        let _ = write!(out, "{}", bytes.len());
        out.extend_from_slice(b"\r\n");
        out.extend_from_slice(bytes);
        out.extend_from_slice(b"\r\n");
    }

    fn write_aggregate(&self, tag: u8, items: &[RespValue], out: &mut Vec<u8>) {
        out.push(tag);
        let _ = write!(out, "{}", items.len());
        out.extend_from_slice(b"\r\n");
        for item in items {
            self.encode(item, out);
        }
    }

    fn write_double_body(&self, d: f64, out: &mut Vec<u8>) {
        if d.is_infinite() {
            out.extend_from_slice(if d > 0.0 { b"inf" } else { b"-inf" });
        } else if d.is_nan() {
            out.extend_from_slice(b"nan");
        } else {
            let _ = write!(out, "{d}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(version: RespVersion, value: RespValue) -> Vec<u8> {
        let writer = Writer::new(version);
        let mut out = Vec::new();
        writer.encode(&value, &mut out);
        out
    }

    #[test]
    fn simple_string() {
        assert_eq!(encode(RespVersion::Resp2, RespValue::ok()), b"+OK\r\n");
    }

    #[test]
    fn blob_string() {
        assert_eq!(encode(RespVersion::Resp2, RespValue::from_str("hi")), b"$2\r\nhi\r\n");
    }

    #[test]
    fn null_degrades_to_resp2_bulk_null() {
        assert_eq!(encode(RespVersion::Resp2, RespValue::Null), b"$-1\r\n");
        assert_eq!(encode(RespVersion::Resp3, RespValue::Null), b"_\r\n");
    }

    #[test]
    fn boolean_degrades_to_integer_in_resp2() {
        assert_eq!(encode(RespVersion::Resp2, RespValue::Boolean(true)), b":1\r\n");
        assert_eq!(encode(RespVersion::Resp3, RespValue::Boolean(true)), b"#t\r\n");
    }

    #[test]
    fn map_degrades_to_flat_array_in_resp2() {
        let map = RespValue::Map(vec![(RespValue::from_str("a"), RespValue::Integer(1))]);
        assert_eq!(encode(RespVersion::Resp2, map.clone()), b"*2\r\n$1\r\na\r\n:1\r\n");
        assert_eq!(encode(RespVersion::Resp3, map), b"%1\r\n$1\r\na\r\n:1\r\n");
    }

    #[test]
    fn array_of_blob_strings() {
        let arr = RespValue::array(vec![RespValue::from_str("a"), RespValue::from_str("bc")]);
        assert_eq!(encode(RespVersion::Resp2, arr), b"*2\r\n$1\r\na\r\n$2\r\nbc\r\n");
    }

    #[test]
    fn simple_error() {
        assert_eq!(
            encode(RespVersion::Resp2, RespValue::SimpleError("ERR bad".into())),
            b"-ERR bad\r\n"
        );
    }
}
