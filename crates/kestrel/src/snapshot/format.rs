//! On-disk snapshot layout (spec §6 "Persisted state layout"): a 16-byte
//! header, a per-database table of contents, a run of per-entry records,
//! and a trailing checksum over the entry region.

use std::io::{self, Read, Write};

use crate::storage::ValueType;

use super::SnapshotError;

pub const MAGIC: &[u8; 8] = b"KESTRDB1";
pub const FORMAT_VERSION: u32 = 1;
pub const HEADER_LEN: usize = 16;
pub const TOC_ENTRY_LEN: usize = 18;

/// One database's slot in the table of contents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TocEntry {
    pub database_number: u16,
    pub entry_count: u64,
    pub data_size: u64,
}

/// A decoded `(key, type, expiry, value)` record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedEntry {
    pub key: Vec<u8>,
    pub value_type: ValueType,
    pub expiry_ms: i64,
    pub value: Vec<u8>,
}

pub fn write_header<W: Write>(w: &mut W, database_count: u32) -> io::Result<()> {
    w.write_all(MAGIC)?;
    w.write_all(&FORMAT_VERSION.to_le_bytes())?;
    w.write_all(&database_count.to_le_bytes())?;
    Ok(())
}

/// Read and validate the header, returning the database count the TOC will
/// list.
pub fn read_header<R: Read>(r: &mut R) -> Result<u32, SnapshotError> {
    let mut buf = [0u8; HEADER_LEN];
    r.read_exact(&mut buf)?;
    if &buf[0..8] != MAGIC {
        return Err(SnapshotError::Format("bad magic".to_string()));
    }
    let version = u32::from_le_bytes(buf[8..12].try_into().unwrap());
    if version != FORMAT_VERSION {
        return Err(SnapshotError::Format(format!("unsupported snapshot format version {version}")));
    }
    Ok(u32::from_le_bytes(buf[12..16].try_into().unwrap()))
}

pub fn write_toc_entry<W: Write>(w: &mut W, entry: &TocEntry) -> io::Result<()> {
    w.write_all(&entry.database_number.to_le_bytes())?;
    w.write_all(&entry.entry_count.to_le_bytes())?;
    w.write_all(&entry.data_size.to_le_bytes())?;
    Ok(())
}

pub fn read_toc_entry<R: Read>(r: &mut R) -> io::Result<TocEntry> {
    let mut buf = [0u8; TOC_ENTRY_LEN];
    r.read_exact(&mut buf)?;
    Ok(TocEntry {
        database_number: u16::from_le_bytes(buf[0..2].try_into().unwrap()),
        entry_count: u64::from_le_bytes(buf[2..10].try_into().unwrap()),
        data_size: u64::from_le_bytes(buf[10..18].try_into().unwrap()),
    })
}

/// `(key_len u32, key bytes, type u8, expiry_ms i64, value_len u64, value
/// bytes)`, per spec §6.
pub fn write_entry<W: Write>(w: &mut W, key: &[u8], value_type: ValueType, expiry_ms: i64, value: &[u8]) -> io::Result<()> {
    w.write_all(&(key.len() as u32).to_le_bytes())?;
    w.write_all(key)?;
    w.write_all(&[value_type.as_u8()])?;
    w.write_all(&expiry_ms.to_le_bytes())?;
    w.write_all(&(value.len() as u64).to_le_bytes())?;
    w.write_all(value)?;
    Ok(())
}

/// Read one entry, or `None` at a clean end-of-stream (no partial record
/// started).
pub fn read_entry<R: Read>(r: &mut R) -> Result<Option<DecodedEntry>, SnapshotError> {
    let mut key_len_buf = [0u8; 4];
    match r.read_exact(&mut key_len_buf) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }
    let key_len = u32::from_le_bytes(key_len_buf) as usize;
    let mut key = vec![0u8; key_len];
    r.read_exact(&mut key)?;

    let mut type_buf = [0u8; 1];
    r.read_exact(&mut type_buf)?;
    let value_type = ValueType::from_u8(type_buf[0])
        .ok_or_else(|| SnapshotError::Format(format!("unknown value type tag {}", type_buf[0])))?;

    let mut expiry_buf = [0u8; 8];
    r.read_exact(&mut expiry_buf)?;
    let expiry_ms = i64::from_le_bytes(expiry_buf);

    let mut value_len_buf = [0u8; 8];
    r.read_exact(&mut value_len_buf)?;
    let value_len = u64::from_le_bytes(value_len_buf) as usize;
    let mut value = vec![0u8; value_len];
    r.read_exact(&mut value)?;

    Ok(Some(DecodedEntry { key, value_type, expiry_ms, value }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn header_round_trips() {
        let mut buf = Vec::new();
        write_header(&mut buf, 16).unwrap();
        assert_eq!(buf.len(), HEADER_LEN);
        assert_eq!(read_header(&mut Cursor::new(buf)).unwrap(), 16);
    }

    #[test]
    fn header_rejects_bad_magic() {
        let buf = vec![0u8; HEADER_LEN];
        assert!(matches!(read_header(&mut Cursor::new(buf)), Err(SnapshotError::Format(_))));
    }

    #[test]
    fn toc_entry_round_trips() {
        let mut buf = Vec::new();
        let entry = TocEntry { database_number: 3, entry_count: 42, data_size: 1024 };
        write_toc_entry(&mut buf, &entry).unwrap();
        assert_eq!(buf.len(), TOC_ENTRY_LEN);
        assert_eq!(read_toc_entry(&mut Cursor::new(buf)).unwrap(), entry);
    }

    #[test]
    fn entry_round_trips() {
        let mut buf = Vec::new();
        write_entry(&mut buf, b"foo", ValueType::String, 1234, b"bar").unwrap();
        let decoded = read_entry(&mut Cursor::new(buf)).unwrap().unwrap();
        assert_eq!(decoded.key, b"foo");
        assert_eq!(decoded.value_type, ValueType::String);
        assert_eq!(decoded.expiry_ms, 1234);
        assert_eq!(decoded.value, b"bar");
    }

    #[test]
    fn reading_past_end_of_stream_is_none() {
        assert!(read_entry(&mut Cursor::new(Vec::new())).unwrap().is_none());
    }

    #[test]
    fn two_entries_back_to_back() {
        let mut buf = Vec::new();
        write_entry(&mut buf, b"a", ValueType::String, NO_EXPIRY_SENTINEL, b"1").unwrap();
        write_entry(&mut buf, b"bb", ValueType::String, NO_EXPIRY_SENTINEL, b"22").unwrap();
        let mut cursor = Cursor::new(buf);
        let first = read_entry(&mut cursor).unwrap().unwrap();
        let second = read_entry(&mut cursor).unwrap().unwrap();
        assert_eq!(first.key, b"a");
        assert_eq!(second.key, b"bb");
        assert!(read_entry(&mut cursor).unwrap().is_none());
    }

    const NO_EXPIRY_SENTINEL: i64 = i64::MIN;
}
