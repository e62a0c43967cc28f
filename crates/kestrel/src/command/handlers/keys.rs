//! Key-space commands (spec §6): `GET`/`SET` and friends, expiry, existence,
//! iteration (`KEYS`/`SCAN`), and the handful of string-inspection commands
//! (`GETRANGE`, `STRLEN`, `BITCOUNT`, `LCS`).
//!
//! Every mutating command follows the same shape as the storage DB's RMW
//! pipeline (spec §4.6): acquire a transaction, `op_rmw_begin`, decide a
//! `commit_*`, release. Reads go through `get_entry_index_for_read`, which
//! also carries out the lazy-expire check (spec §4.6 "Expiry").

use std::sync::{Arc, OnceLock};

use crate::config::NO_EXPIRY;
use crate::error::CommandError;
use crate::hashtable::spsc::HashtableSpsc;
use crate::lock::TransactionIdAllocator;
use crate::resp::{ArgValue, RespValue};
use crate::storage::entry::{EntryIndex, ValueType};
use crate::storage::sequence::ChunkSequence;
use crate::Services;

use super::super::context::ConnectionState;
use super::super::parser::ParserContext;
use super::super::schema::{ArgType, TokenArg, TokenSchema};
use super::util::{glob_match, now_ms, parse_f64, parse_i64, resolve_index};

fn read_value(services: &Services, allocator: &TransactionIdAllocator, db: u16, key: &[u8]) -> Result<Option<Arc<EntryIndex>>, CommandError> {
    let mut tx = allocator.acquire();
    let entry = services.storage.get_entry_index_for_read(&mut tx, db, key, now_ms())?;
    tx.release();
    if let Some(entry) = &entry {
        entry.unpin();
    }
    Ok(entry)
}

pub fn get(services: &Services, allocator: &TransactionIdAllocator, conn: &mut ConnectionState, args: &[Vec<u8>]) -> Result<RespValue, CommandError> {
    match read_value(services, allocator, conn.database_number, &args[1])? {
        Some(entry) => Ok(RespValue::from_bytes(entry.value().to_vec())),
        None => Ok(RespValue::Null),
    }
}

enum ExpiryOpt {
    None,
    KeepTtl,
    At(i64),
}

const SET_TOKENS: &[TokenArg] = &[
    TokenArg { token: "EX", name: "ex", ty: ArgType::Integer, takes_value: true, one_of_group: Some(0) },
    TokenArg { token: "PX", name: "px", ty: ArgType::Integer, takes_value: true, one_of_group: Some(0) },
    TokenArg { token: "EXAT", name: "exat", ty: ArgType::Integer, takes_value: true, one_of_group: Some(0) },
    TokenArg { token: "PXAT", name: "pxat", ty: ArgType::Integer, takes_value: true, one_of_group: Some(0) },
    TokenArg { token: "KEEPTTL", name: "keepttl", ty: ArgType::Integer, takes_value: false, one_of_group: Some(0) },
    TokenArg { token: "NX", name: "nx", ty: ArgType::Integer, takes_value: false, one_of_group: Some(1) },
    TokenArg { token: "XX", name: "xx", ty: ArgType::Integer, takes_value: false, one_of_group: Some(1) },
    TokenArg { token: "GET", name: "get", ty: ArgType::Integer, takes_value: false, one_of_group: None },
];
const SET_SCHEMA: TokenSchema = TokenSchema { command: "SET", tokens: SET_TOKENS };
static SET_TABLE: OnceLock<HashtableSpsc<usize>> = OnceLock::new();

/// `SET key value [EX s|PX ms|EXAT ts|PXAT ts|KEEPTTL] [NX|XX] [GET]`.
///
/// The value argument streams straight from the wire into storage (spec
/// §4.10): a large bulk string the reader already assembled as a
/// [`ChunkSequence`] is handed to `commit_update` without ever being copied
/// into a `Vec<u8>`.
pub fn set(services: &Services, allocator: &TransactionIdAllocator, conn: &mut ConnectionState, mut args: Vec<ArgValue>) -> Result<RespValue, CommandError> {
    let key = args[1].materialize();
    let now = now_ms();

    let table = SET_TABLE.get_or_init(|| SET_SCHEMA.build_table());
    let flag_bytes: Vec<Vec<u8>> = args[3..].iter().map(ArgValue::materialize).collect();
    let parsed = ParserContext::parse(&SET_SCHEMA, table, &flag_bytes)?;

    let expiry = if parsed.present("keepttl") {
        ExpiryOpt::KeepTtl
    } else if let Some(s) = parsed.integer("ex") {
        ExpiryOpt::At(now + s * 1000)
    } else if let Some(ms) = parsed.integer("px") {
        ExpiryOpt::At(now + ms)
    } else if let Some(s) = parsed.integer("exat") {
        ExpiryOpt::At(s * 1000)
    } else if let Some(ms) = parsed.integer("pxat") {
        ExpiryOpt::At(ms)
    } else {
        ExpiryOpt::None
    };
    let nx = parsed.present("nx");
    let xx = parsed.present("xx");
    let get_old = parsed.present("get");

    let mut tx = allocator.acquire();
    let status = services.storage.op_rmw_begin(&mut tx, conn.database_number, &key)?;
    let exists = status.exists();
    let old_value = if get_old { status.existing_entry().map(|e| e.value().to_vec()) } else { None };

    if (nx && exists) || (xx && !exists) {
        services.storage.op_rmw_abort(status);
        tx.release();
        return if get_old {
            Ok(old_value.map(RespValue::from_bytes).unwrap_or(RespValue::Null))
        } else {
            Ok(RespValue::Null)
        };
    }

    let new_expiry = match expiry {
        ExpiryOpt::None => NO_EXPIRY,
        ExpiryOpt::At(ms) => ms,
        ExpiryOpt::KeepTtl => status.existing_entry().map(|e| e.expiry_time_ms()).unwrap_or(NO_EXPIRY),
    };

    let value = std::mem::replace(&mut args[2], ArgValue::Bytes(Vec::new())).into_sequence();
    services.storage.commit_update(status, ValueType::String, value, new_expiry, now)?;
    tx.release();

    if get_old {
        Ok(old_value.map(RespValue::from_bytes).unwrap_or(RespValue::Null))
    } else {
        Ok(RespValue::ok())
    }
}

fn set_with_expiry(services: &Services, allocator: &TransactionIdAllocator, db: u16, key: &[u8], value: &[u8], expiry_ms: i64) -> Result<(), CommandError> {
    let mut tx = allocator.acquire();
    let status = services.storage.op_rmw_begin(&mut tx, db, key)?;
    services.storage.commit_update(status, ValueType::String, ChunkSequence::from_bytes(value), expiry_ms, now_ms())?;
    tx.release();
    Ok(())
}

pub fn setex(services: &Services, allocator: &TransactionIdAllocator, conn: &mut ConnectionState, args: &[Vec<u8>]) -> Result<RespValue, CommandError> {
    let seconds = parse_i64(&args[2])?;
    if seconds <= 0 {
        return Err(CommandError::argument("ERR invalid expire time in 'setex' command"));
    }
    set_with_expiry(services, allocator, conn.database_number, &args[1], &args[3], now_ms() + seconds * 1000)?;
    Ok(RespValue::ok())
}

pub fn psetex(services: &Services, allocator: &TransactionIdAllocator, conn: &mut ConnectionState, args: &[Vec<u8>]) -> Result<RespValue, CommandError> {
    let ms = parse_i64(&args[2])?;
    if ms <= 0 {
        return Err(CommandError::argument("ERR invalid expire time in 'psetex' command"));
    }
    set_with_expiry(services, allocator, conn.database_number, &args[1], &args[3], now_ms() + ms)?;
    Ok(RespValue::ok())
}

pub fn setnx(services: &Services, allocator: &TransactionIdAllocator, conn: &mut ConnectionState, args: &[Vec<u8>]) -> Result<RespValue, CommandError> {
    let mut tx = allocator.acquire();
    let status = services.storage.op_rmw_begin(&mut tx, conn.database_number, &args[1])?;
    if status.exists() {
        services.storage.op_rmw_abort(status);
        tx.release();
        return Ok(RespValue::Integer(0));
    }
    services.storage.commit_update(status, ValueType::String, ChunkSequence::from_bytes(&args[2]), NO_EXPIRY, now_ms())?;
    tx.release();
    Ok(RespValue::Integer(1))
}

pub fn setrange(services: &Services, allocator: &TransactionIdAllocator, conn: &mut ConnectionState, args: &[Vec<u8>]) -> Result<RespValue, CommandError> {
    let offset = parse_i64(&args[2])?;
    if offset < 0 {
        return Err(CommandError::argument("ERR offset is out of range"));
    }
    let offset = offset as usize;
    let addition = &args[3];

    let mut tx = allocator.acquire();
    let status = services.storage.op_rmw_begin(&mut tx, conn.database_number, &args[1])?;
    let mut bytes = status.existing_entry().map(|e| e.value().to_vec()).unwrap_or_default();
    let new_len = (offset + addition.len()).max(bytes.len());
    if new_len > bytes.len() {
        bytes.resize(new_len, 0);
    }
    bytes[offset..offset + addition.len()].copy_from_slice(addition);
    let expiry = status.existing_entry().map(|e| e.expiry_time_ms()).unwrap_or(NO_EXPIRY);

    let len = bytes.len();
    services.storage.commit_update(status, ValueType::String, ChunkSequence::from_bytes(&bytes), expiry, now_ms())?;
    tx.release();
    Ok(RespValue::Integer(len as i64))
}

pub fn getset(services: &Services, allocator: &TransactionIdAllocator, conn: &mut ConnectionState, args: &[Vec<u8>]) -> Result<RespValue, CommandError> {
    let mut tx = allocator.acquire();
    let status = services.storage.op_rmw_begin(&mut tx, conn.database_number, &args[1])?;
    let old = status.existing_entry().map(|e| e.value().to_vec());
    services.storage.commit_update(status, ValueType::String, ChunkSequence::from_bytes(&args[2]), NO_EXPIRY, now_ms())?;
    tx.release();
    Ok(old.map(RespValue::from_bytes).unwrap_or(RespValue::Null))
}

const GETEX_TOKENS: &[TokenArg] = &[
    TokenArg { token: "EX", name: "ex", ty: ArgType::Integer, takes_value: true, one_of_group: Some(0) },
    TokenArg { token: "PX", name: "px", ty: ArgType::Integer, takes_value: true, one_of_group: Some(0) },
    TokenArg { token: "EXAT", name: "exat", ty: ArgType::Integer, takes_value: true, one_of_group: Some(0) },
    TokenArg { token: "PXAT", name: "pxat", ty: ArgType::Integer, takes_value: true, one_of_group: Some(0) },
    TokenArg { token: "PERSIST", name: "persist", ty: ArgType::Integer, takes_value: false, one_of_group: Some(0) },
];
const GETEX_SCHEMA: TokenSchema = TokenSchema { command: "GETEX", tokens: GETEX_TOKENS };
static GETEX_TABLE: OnceLock<HashtableSpsc<usize>> = OnceLock::new();

pub fn getex(services: &Services, allocator: &TransactionIdAllocator, conn: &mut ConnectionState, args: &[Vec<u8>]) -> Result<RespValue, CommandError> {
    let now = now_ms();
    let table = GETEX_TABLE.get_or_init(|| GETEX_SCHEMA.build_table());
    let parsed = ParserContext::parse(&GETEX_SCHEMA, table, &args[2..])?;

    let new_expiry = if parsed.present("persist") {
        Some(NO_EXPIRY)
    } else if let Some(s) = parsed.integer("ex") {
        Some(now + s * 1000)
    } else if let Some(ms) = parsed.integer("px") {
        Some(now + ms)
    } else if let Some(s) = parsed.integer("exat") {
        Some(s * 1000)
    } else {
        parsed.integer("pxat")
    };

    let mut tx = allocator.acquire();
    let status = services.storage.op_rmw_begin(&mut tx, conn.database_number, &args[1])?;
    if !status.exists() {
        services.storage.op_rmw_abort(status);
        tx.release();
        return Ok(RespValue::Null);
    }
    let value = status.existing_entry().unwrap().value().to_vec();
    if let Some(expiry) = new_expiry {
        services.storage.commit_metadata(&status, expiry)?;
    }
    services.storage.op_rmw_abort(status);
    tx.release();
    Ok(RespValue::from_bytes(value))
}

pub fn getdel(services: &Services, allocator: &TransactionIdAllocator, conn: &mut ConnectionState, args: &[Vec<u8>]) -> Result<RespValue, CommandError> {
    let mut tx = allocator.acquire();
    let status = services.storage.op_rmw_begin(&mut tx, conn.database_number, &args[1])?;
    if !status.exists() {
        services.storage.op_rmw_abort(status);
        tx.release();
        return Ok(RespValue::Null);
    }
    let value = status.existing_entry().unwrap().value().to_vec();
    services.storage.commit_delete(status)?;
    tx.release();
    Ok(RespValue::from_bytes(value))
}

pub fn append(services: &Services, allocator: &TransactionIdAllocator, conn: &mut ConnectionState, args: &[Vec<u8>]) -> Result<RespValue, CommandError> {
    let mut tx = allocator.acquire();
    let status = services.storage.op_rmw_begin(&mut tx, conn.database_number, &args[1])?;
    let mut bytes = status.existing_entry().map(|e| e.value().to_vec()).unwrap_or_default();
    let expiry = status.existing_entry().map(|e| e.expiry_time_ms()).unwrap_or(NO_EXPIRY);
    bytes.extend_from_slice(&args[2]);
    let len = bytes.len();
    services.storage.commit_update(status, ValueType::String, ChunkSequence::from_bytes(&bytes), expiry, now_ms())?;
    tx.release();
    Ok(RespValue::Integer(len as i64))
}

fn incr_by(services: &Services, allocator: &TransactionIdAllocator, db: u16, key: &[u8], delta: i64) -> Result<i64, CommandError> {
    let mut tx = allocator.acquire();
    let status = services.storage.op_rmw_begin(&mut tx, db, key)?;
    let current = match status.existing_entry() {
        Some(entry) => parse_i64(&entry.value().to_vec())?,
        None => 0,
    };
    let new_value = current.checked_add(delta).ok_or_else(|| CommandError::argument("ERR increment or decrement would overflow"))?;
    let expiry = status.existing_entry().map(|e| e.expiry_time_ms()).unwrap_or(NO_EXPIRY);
    services.storage.commit_update(status, ValueType::String, ChunkSequence::from_bytes(new_value.to_string().as_bytes()), expiry, now_ms())?;
    tx.release();
    Ok(new_value)
}

pub fn incr(services: &Services, allocator: &TransactionIdAllocator, conn: &mut ConnectionState, args: &[Vec<u8>]) -> Result<RespValue, CommandError> {
    Ok(RespValue::Integer(incr_by(services, allocator, conn.database_number, &args[1], 1)?))
}

pub fn decr(services: &Services, allocator: &TransactionIdAllocator, conn: &mut ConnectionState, args: &[Vec<u8>]) -> Result<RespValue, CommandError> {
    Ok(RespValue::Integer(incr_by(services, allocator, conn.database_number, &args[1], -1)?))
}

pub fn incrby(services: &Services, allocator: &TransactionIdAllocator, conn: &mut ConnectionState, args: &[Vec<u8>]) -> Result<RespValue, CommandError> {
    let delta = parse_i64(&args[2])?;
    Ok(RespValue::Integer(incr_by(services, allocator, conn.database_number, &args[1], delta)?))
}

pub fn decrby(services: &Services, allocator: &TransactionIdAllocator, conn: &mut ConnectionState, args: &[Vec<u8>]) -> Result<RespValue, CommandError> {
    let delta = parse_i64(&args[2])?;
    Ok(RespValue::Integer(incr_by(services, allocator, conn.database_number, &args[1], -delta)?))
}

pub fn incrbyfloat(services: &Services, allocator: &TransactionIdAllocator, conn: &mut ConnectionState, args: &[Vec<u8>]) -> Result<RespValue, CommandError> {
    let delta = parse_f64(&args[2])?;
    let mut tx = allocator.acquire();
    let status = services.storage.op_rmw_begin(&mut tx, conn.database_number, &args[1])?;
    let current = match status.existing_entry() {
        Some(entry) => parse_f64(&entry.value().to_vec())?,
        None => 0.0,
    };
    let new_value = current + delta;
    let expiry = status.existing_entry().map(|e| e.expiry_time_ms()).unwrap_or(NO_EXPIRY);
    let formatted = format!("{new_value}");
    services.storage.commit_update(status, ValueType::String, ChunkSequence::from_bytes(formatted.as_bytes()), expiry, now_ms())?;
    tx.release();
    Ok(RespValue::from_str(formatted))
}

pub fn mset(services: &Services, allocator: &TransactionIdAllocator, conn: &mut ConnectionState, args: &[Vec<u8>]) -> Result<RespValue, CommandError> {
    if (args.len() - 1) % 2 != 0 {
        return Err(CommandError::wrong_arity("mset"));
    }
    let now = now_ms();
    let mut tx = allocator.acquire();
    for pair in args[1..].chunks(2) {
        let status = services.storage.op_rmw_begin(&mut tx, conn.database_number, &pair[0])?;
        services.storage.commit_update(status, ValueType::String, ChunkSequence::from_bytes(&pair[1]), NO_EXPIRY, now)?;
    }
    tx.release();
    Ok(RespValue::ok())
}

pub fn msetnx(services: &Services, allocator: &TransactionIdAllocator, conn: &mut ConnectionState, args: &[Vec<u8>]) -> Result<RespValue, CommandError> {
    if (args.len() - 1) % 2 != 0 {
        return Err(CommandError::wrong_arity("msetnx"));
    }
    let now = now_ms();
    let mut tx = allocator.acquire();

    let mut statuses = Vec::with_capacity((args.len() - 1) / 2);
    for pair in args[1..].chunks(2) {
        let status = services.storage.op_rmw_begin(&mut tx, conn.database_number, &pair[0])?;
        statuses.push((status, &pair[1]));
    }

    if statuses.iter().any(|(status, _)| status.exists()) {
        for (status, _) in statuses {
            services.storage.op_rmw_abort(status);
        }
        tx.release();
        return Ok(RespValue::Integer(0));
    }

    for (status, value) in statuses {
        services.storage.commit_update(status, ValueType::String, ChunkSequence::from_bytes(value), NO_EXPIRY, now)?;
    }
    tx.release();
    Ok(RespValue::Integer(1))
}

pub fn mget(services: &Services, allocator: &TransactionIdAllocator, conn: &mut ConnectionState, args: &[Vec<u8>]) -> Result<RespValue, CommandError> {
    let mut out = Vec::with_capacity(args.len() - 1);
    for key in &args[1..] {
        let value = read_value(services, allocator, conn.database_number, key)?
            .map(|e| RespValue::from_bytes(e.value().to_vec()))
            .unwrap_or(RespValue::Null);
        out.push(value);
    }
    Ok(RespValue::array(out))
}

const COPY_TOKENS: &[TokenArg] = &[TokenArg { token: "REPLACE", name: "replace", ty: ArgType::Integer, takes_value: false, one_of_group: None }];
const COPY_SCHEMA: TokenSchema = TokenSchema { command: "COPY", tokens: COPY_TOKENS };
static COPY_TABLE: OnceLock<HashtableSpsc<usize>> = OnceLock::new();

pub fn copy(services: &Services, allocator: &TransactionIdAllocator, conn: &mut ConnectionState, args: &[Vec<u8>]) -> Result<RespValue, CommandError> {
    let table = COPY_TABLE.get_or_init(|| COPY_SCHEMA.build_table());
    let parsed = ParserContext::parse(&COPY_SCHEMA, table, &args[3..])?;
    let replace = parsed.present("replace");

    let mut tx = allocator.acquire();
    let src_status = services.storage.op_rmw_begin(&mut tx, conn.database_number, &args[1])?;
    if !src_status.exists() {
        services.storage.op_rmw_abort(src_status);
        tx.release();
        return Ok(RespValue::Integer(0));
    }
    let src_entry = src_status.existing_entry().unwrap().clone();
    let dst_status = services.storage.op_rmw_begin(&mut tx, conn.database_number, &args[2])?;
    if dst_status.exists() && !replace {
        services.storage.op_rmw_abort(src_status);
        services.storage.op_rmw_abort(dst_status);
        tx.release();
        return Ok(RespValue::Integer(0));
    }
    services.storage.op_rmw_abort(src_status);
    services.storage.commit_update(dst_status, src_entry.value_type, ChunkSequence::from_bytes(&src_entry.value().to_vec()), src_entry.expiry_time_ms(), now_ms())?;
    tx.release();
    Ok(RespValue::Integer(1))
}

pub fn renamenx(services: &Services, allocator: &TransactionIdAllocator, conn: &mut ConnectionState, args: &[Vec<u8>]) -> Result<RespValue, CommandError> {
    let mut tx = allocator.acquire();
    let src_status = services.storage.op_rmw_begin(&mut tx, conn.database_number, &args[1])?;
    if !src_status.exists() {
        services.storage.op_rmw_abort(src_status);
        tx.release();
        return Err(CommandError::argument("ERR no such key"));
    }
    let dst_status = services.storage.op_rmw_begin(&mut tx, conn.database_number, &args[2])?;
    if dst_status.exists() {
        services.storage.op_rmw_abort(src_status);
        services.storage.op_rmw_abort(dst_status);
        tx.release();
        return Ok(RespValue::Integer(0));
    }
    services.storage.commit_rename(src_status, dst_status, false)?;
    tx.release();
    Ok(RespValue::Integer(1))
}

pub fn exists(services: &Services, allocator: &TransactionIdAllocator, conn: &mut ConnectionState, args: &[Vec<u8>]) -> Result<RespValue, CommandError> {
    let mut count = 0;
    for key in &args[1..] {
        if read_value(services, allocator, conn.database_number, key)?.is_some() {
            count += 1;
        }
    }
    Ok(RespValue::Integer(count))
}

pub fn touch(services: &Services, allocator: &TransactionIdAllocator, conn: &mut ConnectionState, args: &[Vec<u8>]) -> Result<RespValue, CommandError> {
    exists(services, allocator, conn, args)
}

pub fn type_cmd(services: &Services, allocator: &TransactionIdAllocator, conn: &mut ConnectionState, args: &[Vec<u8>]) -> Result<RespValue, CommandError> {
    match read_value(services, allocator, conn.database_number, &args[1])? {
        Some(entry) => Ok(RespValue::SimpleString(entry.value_type.type_name().to_string())),
        None => Ok(RespValue::SimpleString("none".to_string())),
    }
}

enum ExpireCondition {
    Always,
    Nx,
    Xx,
    Gt,
    Lt,
}

fn parse_expire_condition(args: &[Vec<u8>], idx: usize) -> Result<ExpireCondition, CommandError> {
    match args.get(idx) {
        None => Ok(ExpireCondition::Always),
        Some(flag) => match flag.to_ascii_uppercase().as_slice() {
            b"NX" => Ok(ExpireCondition::Nx),
            b"XX" => Ok(ExpireCondition::Xx),
            b"GT" => Ok(ExpireCondition::Gt),
            b"LT" => Ok(ExpireCondition::Lt),
            _ => Err(CommandError::argument("ERR Unsupported option")),
        },
    }
}

fn expire_at(services: &Services, allocator: &TransactionIdAllocator, conn: &mut ConnectionState, args: &[Vec<u8>], new_expiry_ms: i64) -> Result<RespValue, CommandError> {
    let condition = parse_expire_condition(args, 3)?;

    let mut tx = allocator.acquire();
    let status = services.storage.op_rmw_begin(&mut tx, conn.database_number, &args[1])?;
    let Some(entry) = status.existing_entry().cloned() else {
        services.storage.op_rmw_abort(status);
        tx.release();
        return Ok(RespValue::Integer(0));
    };

    let allowed = match condition {
        ExpireCondition::Always => true,
        ExpireCondition::Nx => !entry.has_expiry(),
        ExpireCondition::Xx => entry.has_expiry(),
        ExpireCondition::Gt => entry.has_expiry() && new_expiry_ms > entry.expiry_time_ms(),
        ExpireCondition::Lt => !entry.has_expiry() || new_expiry_ms < entry.expiry_time_ms(),
    };

    if !allowed {
        services.storage.op_rmw_abort(status);
        tx.release();
        return Ok(RespValue::Integer(0));
    }

    services.storage.commit_metadata(&status, new_expiry_ms)?;
    services.storage.op_rmw_abort(status);
    tx.release();
    Ok(RespValue::Integer(1))
}

pub fn expire(services: &Services, allocator: &TransactionIdAllocator, conn: &mut ConnectionState, args: &[Vec<u8>]) -> Result<RespValue, CommandError> {
    let seconds = parse_i64(&args[2])?;
    expire_at(services, allocator, conn, args, now_ms() + seconds * 1000)
}

pub fn pexpire(services: &Services, allocator: &TransactionIdAllocator, conn: &mut ConnectionState, args: &[Vec<u8>]) -> Result<RespValue, CommandError> {
    let ms = parse_i64(&args[2])?;
    expire_at(services, allocator, conn, args, now_ms() + ms)
}

pub fn expireat(services: &Services, allocator: &TransactionIdAllocator, conn: &mut ConnectionState, args: &[Vec<u8>]) -> Result<RespValue, CommandError> {
    let seconds = parse_i64(&args[2])?;
    expire_at(services, allocator, conn, args, seconds * 1000)
}

pub fn pexpireat(services: &Services, allocator: &TransactionIdAllocator, conn: &mut ConnectionState, args: &[Vec<u8>]) -> Result<RespValue, CommandError> {
    let ms = parse_i64(&args[2])?;
    expire_at(services, allocator, conn, args, ms)
}

pub fn persist(services: &Services, allocator: &TransactionIdAllocator, conn: &mut ConnectionState, args: &[Vec<u8>]) -> Result<RespValue, CommandError> {
    let mut tx = allocator.acquire();
    let status = services.storage.op_rmw_begin(&mut tx, conn.database_number, &args[1])?;
    let had_expiry = status.existing_entry().is_some_and(|e| e.has_expiry());
    if !had_expiry {
        services.storage.op_rmw_abort(status);
        tx.release();
        return Ok(RespValue::Integer(0));
    }
    services.storage.commit_metadata(&status, NO_EXPIRY)?;
    services.storage.op_rmw_abort(status);
    tx.release();
    Ok(RespValue::Integer(1))
}

pub fn ttl(services: &Services, allocator: &TransactionIdAllocator, conn: &mut ConnectionState, args: &[Vec<u8>]) -> Result<RespValue, CommandError> {
    match read_value(services, allocator, conn.database_number, &args[1])? {
        None => Ok(RespValue::Integer(-2)),
        Some(entry) if !entry.has_expiry() => Ok(RespValue::Integer(-1)),
        Some(entry) => Ok(RespValue::Integer(((entry.expiry_time_ms() - now_ms()).max(0)) / 1000)),
    }
}

pub fn pttl(services: &Services, allocator: &TransactionIdAllocator, conn: &mut ConnectionState, args: &[Vec<u8>]) -> Result<RespValue, CommandError> {
    match read_value(services, allocator, conn.database_number, &args[1])? {
        None => Ok(RespValue::Integer(-2)),
        Some(entry) if !entry.has_expiry() => Ok(RespValue::Integer(-1)),
        Some(entry) => Ok(RespValue::Integer((entry.expiry_time_ms() - now_ms()).max(0))),
    }
}

pub fn expiretime(services: &Services, allocator: &TransactionIdAllocator, conn: &mut ConnectionState, args: &[Vec<u8>]) -> Result<RespValue, CommandError> {
    match read_value(services, allocator, conn.database_number, &args[1])? {
        None => Ok(RespValue::Integer(-2)),
        Some(entry) if !entry.has_expiry() => Ok(RespValue::Integer(-1)),
        Some(entry) => Ok(RespValue::Integer(entry.expiry_time_ms() / 1000)),
    }
}

pub fn del(services: &Services, allocator: &TransactionIdAllocator, conn: &mut ConnectionState, args: &[Vec<u8>]) -> Result<RespValue, CommandError> {
    let mut deleted = 0;
    for key in &args[1..] {
        let mut tx = allocator.acquire();
        let status = services.storage.op_rmw_begin(&mut tx, conn.database_number, key)?;
        if status.exists() {
            services.storage.commit_delete(status)?;
            deleted += 1;
        } else {
            services.storage.op_rmw_abort(status);
        }
        tx.release();
    }
    Ok(RespValue::Integer(deleted))
}

pub fn keys(services: &Services, allocator: &TransactionIdAllocator, conn: &mut ConnectionState, args: &[Vec<u8>]) -> Result<RespValue, CommandError> {
    let pattern = &args[1];
    let mut out = Vec::new();
    let mut cursor = Some(0usize);
    while let Some(c) = cursor {
        let (batch, next) = services.storage.sample_for_eviction(conn.database_number, c, usize::MAX);
        for (key, _) in &batch {
            if glob_match(pattern, key) {
                out.push(RespValue::from_bytes(key.to_vec()));
            }
        }
        cursor = next;
    }
    Ok(RespValue::array(out))
}

const SCAN_TOKENS: &[TokenArg] = &[
    TokenArg { token: "MATCH", name: "match", ty: ArgType::ShortString, takes_value: true, one_of_group: None },
    TokenArg { token: "COUNT", name: "count", ty: ArgType::Integer, takes_value: true, one_of_group: None },
];
const SCAN_SCHEMA: TokenSchema = TokenSchema { command: "SCAN", tokens: SCAN_TOKENS };
static SCAN_TABLE: OnceLock<HashtableSpsc<usize>> = OnceLock::new();

pub fn scan(services: &Services, allocator: &TransactionIdAllocator, conn: &mut ConnectionState, args: &[Vec<u8>]) -> Result<RespValue, CommandError> {
    let cursor = parse_i64(&args[1])?.max(0) as usize;

    let table = SCAN_TABLE.get_or_init(|| SCAN_SCHEMA.build_table());
    let parsed = ParserContext::parse(&SCAN_SCHEMA, table, &args[2..])?;
    let pattern = parsed.bytes("match");
    let count = parsed.integer("count").unwrap_or(10) as usize;

    let (batch, next) = services.storage.sample_for_eviction(conn.database_number, cursor, count.max(1));
    let matched: Vec<RespValue> = batch
        .into_iter()
        .filter(|(key, _)| pattern.map_or(true, |p| glob_match(p, key)))
        .map(|(key, _)| RespValue::from_bytes(key.to_vec()))
        .collect();

    Ok(RespValue::array(vec![RespValue::from_str(next.unwrap_or(0).to_string()), RespValue::array(matched)]))
}

pub fn getrange(services: &Services, allocator: &TransactionIdAllocator, conn: &mut ConnectionState, args: &[Vec<u8>]) -> Result<RespValue, CommandError> {
    let start = parse_i64(&args[2])?;
    let end = parse_i64(&args[3])?;

    match read_value(services, allocator, conn.database_number, &args[1])? {
        None => Ok(RespValue::from_bytes(Vec::new())),
        Some(entry) => {
            let bytes = entry.value().to_vec();
            let len = bytes.len();
            if len == 0 {
                return Ok(RespValue::from_bytes(Vec::new()));
            }
            let start = resolve_index(start, len);
            let end_incl = if end < 0 {
                len.saturating_sub((-end) as usize)
            } else {
                (end as usize).min(len - 1)
            };
            if start > end_incl || start >= len {
                return Ok(RespValue::from_bytes(Vec::new()));
            }
            Ok(RespValue::from_bytes(bytes[start..=end_incl].to_vec()))
        }
    }
}

pub fn strlen(services: &Services, allocator: &TransactionIdAllocator, conn: &mut ConnectionState, args: &[Vec<u8>]) -> Result<RespValue, CommandError> {
    match read_value(services, allocator, conn.database_number, &args[1])? {
        None => Ok(RespValue::Integer(0)),
        Some(entry) => Ok(RespValue::Integer(entry.value().size() as i64)),
    }
}

pub fn bitcount(services: &Services, allocator: &TransactionIdAllocator, conn: &mut ConnectionState, args: &[Vec<u8>]) -> Result<RespValue, CommandError> {
    let Some(entry) = read_value(services, allocator, conn.database_number, &args[1])? else {
        return Ok(RespValue::Integer(0));
    };
    let bytes = entry.value().to_vec();

    if args.len() == 2 {
        return Ok(RespValue::Integer(bytes.iter().map(|b| b.count_ones() as i64).sum()));
    }
    if args.len() < 4 {
        return Err(CommandError::wrong_arity("bitcount"));
    }

    let start = parse_i64(&args[2])?;
    let end = parse_i64(&args[3])?;
    let by_bit = args.get(4).is_some_and(|a| a.eq_ignore_ascii_case(b"BIT"));

    let total_bits = bytes.len() * 8;
    let unit_len = if by_bit { total_bits } else { bytes.len() };
    if unit_len == 0 {
        return Ok(RespValue::Integer(0));
    }
    let start_unit = resolve_index(start, unit_len);
    let end_unit_incl = if end < 0 {
        unit_len.saturating_sub((-end) as usize)
    } else {
        (end as usize).min(unit_len - 1)
    };
    if start_unit > end_unit_incl {
        return Ok(RespValue::Integer(0));
    }

    let count = if by_bit {
        (start_unit..=end_unit_incl)
            .filter(|&bit| {
                let byte = bytes[bit / 8];
                (byte >> (7 - (bit % 8))) & 1 == 1
            })
            .count()
    } else {
        bytes[start_unit..=end_unit_incl].iter().map(|b| b.count_ones() as usize).sum()
    };
    Ok(RespValue::Integer(count as i64))
}

const LCS_TOKENS: &[TokenArg] = &[
    TokenArg { token: "LEN", name: "len", ty: ArgType::Integer, takes_value: false, one_of_group: None },
    TokenArg { token: "IDX", name: "idx", ty: ArgType::Integer, takes_value: false, one_of_group: None },
    TokenArg { token: "MINMATCHLEN", name: "minmatchlen", ty: ArgType::Integer, takes_value: true, one_of_group: None },
    TokenArg { token: "WITHMATCHLEN", name: "withmatchlen", ty: ArgType::Integer, takes_value: false, one_of_group: None },
];
const LCS_SCHEMA: TokenSchema = TokenSchema { command: "LCS", tokens: LCS_TOKENS };
static LCS_TABLE: OnceLock<HashtableSpsc<usize>> = OnceLock::new();

/// Longest common subsequence of two keys' values (spec §6 `LCS`). Supports
/// the plain string reply, `LEN`, and `IDX [MINMATCHLEN n] [WITHMATCHLEN]`.
pub fn lcs(services: &Services, allocator: &TransactionIdAllocator, conn: &mut ConnectionState, args: &[Vec<u8>]) -> Result<RespValue, CommandError> {
    let a = read_value(services, allocator, conn.database_number, &args[1])?.map(|e| e.value().to_vec()).unwrap_or_default();
    let b = read_value(services, allocator, conn.database_number, &args[2])?.map(|e| e.value().to_vec()).unwrap_or_default();

    let table = LCS_TABLE.get_or_init(|| LCS_SCHEMA.build_table());
    let parsed = ParserContext::parse(&LCS_SCHEMA, table, &args[3..])?;
    let want_len = parsed.present("len");
    let want_idx = parsed.present("idx");
    let min_match_len = parsed.integer("minmatchlen").unwrap_or(0).max(0) as usize;
    let with_match_len = parsed.present("withmatchlen");
    if want_len && want_idx {
        return Err(CommandError::argument("ERR If you want both the length and indexes, please just use IDX"));
    }

    let (m, n) = (a.len(), b.len());
    let mut dp = vec![vec![0u32; n + 1]; m + 1];
    for i in 1..=m {
        for j in 1..=n {
            dp[i][j] = if a[i - 1] == b[j - 1] {
                dp[i - 1][j - 1] + 1
            } else {
                dp[i - 1][j].max(dp[i][j - 1])
            };
        }
    }
    let lcs_len = dp[m][n] as i64;

    if want_len {
        return Ok(RespValue::Integer(lcs_len));
    }

    // Walk the DP table back from (m, n), collecting matching runs.
    let mut matches = Vec::new();
    let (mut i, mut j) = (m, n);
    let mut run_end: Option<(usize, usize)> = None;
    while i > 0 && j > 0 {
        if a[i - 1] == b[j - 1] {
            if run_end.is_none() {
                run_end = Some((i - 1, j - 1));
            }
            i -= 1;
            j -= 1;
        } else {
            if let Some((end_a, end_b)) = run_end.take() {
                let start_a = i;
                let start_b = j;
                let len = end_a - start_a + 1;
                if len >= min_match_len.max(1) {
                    matches.push((start_a, end_a, start_b, end_b, len));
                }
            }
            if dp[i - 1][j] >= dp[i][j - 1] {
                i -= 1;
            } else {
                j -= 1;
            }
        }
    }
    if let Some((end_a, end_b)) = run_end.take() {
        let len = end_a - i + 1;
        if len >= min_match_len.max(1) {
            matches.push((i, end_a, j, end_b, len));
        }
    }

    if want_idx {
        let match_values: Vec<RespValue> = matches
            .into_iter()
            .map(|(sa, ea, sb, eb, len)| {
                let mut entry = vec![
                    RespValue::array(vec![RespValue::Integer(sa as i64), RespValue::Integer(ea as i64)]),
                    RespValue::array(vec![RespValue::Integer(sb as i64), RespValue::Integer(eb as i64)]),
                ];
                if with_match_len {
                    entry.push(RespValue::Integer(len as i64));
                }
                RespValue::array(entry)
            })
            .collect();
        return Ok(RespValue::Map(vec![
            (RespValue::from_str("matches"), RespValue::array(match_values)),
            (RespValue::from_str("len"), RespValue::Integer(lcs_len)),
        ]));
    }

    // Plain string reply: reconstruct the subsequence itself.
    let mut out = Vec::with_capacity(dp[m][n] as usize);
    let (mut i, mut j) = (m, n);
    while i > 0 && j > 0 {
        if a[i - 1] == b[j - 1] {
            out.push(a[i - 1]);
            i -= 1;
            j -= 1;
        } else if dp[i - 1][j] >= dp[i][j - 1] {
            i -= 1;
        } else {
            j -= 1;
        }
    }
    out.reverse();
    Ok(RespValue::from_bytes(out))
}

pub fn flushdb(services: &Services, _allocator: &TransactionIdAllocator, conn: &mut ConnectionState, args: &[Vec<u8>]) -> Result<RespValue, CommandError> {
    if let Some(flag) = args.get(1) {
        match flag.to_ascii_uppercase().as_slice() {
            b"ASYNC" | b"SYNC" => {}
            _ => return Err(CommandError::argument("ERR syntax error")),
        }
    }
    services.storage.flush(conn.database_number);
    Ok(RespValue::ok())
}

pub fn dbsize(services: &Services, _allocator: &TransactionIdAllocator, conn: &mut ConnectionState, _args: &[Vec<u8>]) -> Result<RespValue, CommandError> {
    Ok(RespValue::Integer(services.storage.dbsize(conn.database_number) as i64))
}

pub fn select(services: &Services, _allocator: &TransactionIdAllocator, conn: &mut ConnectionState, args: &[Vec<u8>]) -> Result<RespValue, CommandError> {
    let index = parse_i64(&args[1])?;
    if index < 0 || index >= services.storage.database_count() as i64 {
        return Err(CommandError::argument("ERR DB index is out of range"));
    }
    conn.database_number = index as u16;
    Ok(RespValue::ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AuthMode, Config};

    fn services() -> Services {
        Services::new(Arc::new(Config::default()))
    }

    fn conn() -> ConnectionState {
        ConnectionState::new(&AuthMode::Disabled)
    }

    fn args(strs: &[&str]) -> Vec<Vec<u8>> {
        strs.iter().map(|s| s.as_bytes().to_vec()).collect()
    }

    fn arg_values(strs: &[&str]) -> Vec<ArgValue> {
        strs.iter().map(|s| ArgValue::Bytes(s.as_bytes().to_vec())).collect()
    }

    #[test]
    fn get_on_missing_key_is_null() {
        let svc = services();
        let alloc = TransactionIdAllocator::new(0);
        let mut c = conn();
        assert_eq!(get(&svc, &alloc, &mut c, &args(&["GET", "nope"])).unwrap(), RespValue::Null);
    }

    #[test]
    fn set_then_get_round_trips() {
        let svc = services();
        let alloc = TransactionIdAllocator::new(0);
        let mut c = conn();
        set(&svc, &alloc, &mut c, arg_values(&["SET", "foo", "bar"])).unwrap();
        assert_eq!(get(&svc, &alloc, &mut c, &args(&["GET", "foo"])).unwrap(), RespValue::from_str("bar"));
    }

    #[test]
    fn set_nx_does_not_overwrite_existing() {
        let svc = services();
        let alloc = TransactionIdAllocator::new(0);
        let mut c = conn();
        set(&svc, &alloc, &mut c, arg_values(&["SET", "foo", "bar"])).unwrap();
        let reply = set(&svc, &alloc, &mut c, arg_values(&["SET", "foo", "baz", "NX"])).unwrap();
        assert_eq!(reply, RespValue::Null);
        assert_eq!(get(&svc, &alloc, &mut c, &args(&["GET", "foo"])).unwrap(), RespValue::from_str("bar"));
    }

    #[test]
    fn incr_then_incrby_accumulate() {
        let svc = services();
        let alloc = TransactionIdAllocator::new(0);
        let mut c = conn();
        set(&svc, &alloc, &mut c, arg_values(&["SET", "c", "10"])).unwrap();
        assert_eq!(incr(&svc, &alloc, &mut c, &args(&["INCR", "c"])).unwrap(), RespValue::Integer(11));
        assert_eq!(incrby(&svc, &alloc, &mut c, &args(&["INCRBY", "c", "5"])).unwrap(), RespValue::Integer(16));
    }

    #[test]
    fn incr_on_non_integer_is_an_error() {
        let svc = services();
        let alloc = TransactionIdAllocator::new(0);
        let mut c = conn();
        set(&svc, &alloc, &mut c, arg_values(&["SET", "c", "abc"])).unwrap();
        assert!(incr(&svc, &alloc, &mut c, &args(&["INCR", "c"])).is_err());
    }

    #[test]
    fn setrange_pads_with_nul_bytes() {
        let svc = services();
        let alloc = TransactionIdAllocator::new(0);
        let mut c = conn();
        let reply = setrange(&svc, &alloc, &mut c, &args(&["SETRANGE", "k", "10", "hello"])).unwrap();
        assert_eq!(reply, RespValue::Integer(15));
        let value = match get(&svc, &alloc, &mut c, &args(&["GET", "k"])).unwrap() {
            RespValue::BlobString(b) => b,
            other => panic!("expected blob string, got {other:?}"),
        };
        assert_eq!(&value[..10], &[0u8; 10]);
        assert_eq!(&value[10..], b"hello");
    }

    #[test]
    fn mset_then_mget_round_trips_with_missing_key() {
        let svc = services();
        let alloc = TransactionIdAllocator::new(0);
        let mut c = conn();
        mset(&svc, &alloc, &mut c, &args(&["MSET", "k1", "v1", "k2", "v2"])).unwrap();
        let reply = mget(&svc, &alloc, &mut c, &args(&["MGET", "k1", "k2", "k3"])).unwrap();
        assert_eq!(reply, RespValue::array(vec![RespValue::from_str("v1"), RespValue::from_str("v2"), RespValue::Null]));
    }

    #[test]
    fn expire_then_ttl_then_expired_get() {
        let svc = services();
        let alloc = TransactionIdAllocator::new(0);
        let mut c = conn();
        set(&svc, &alloc, &mut c, arg_values(&["SET", "k", "v"])).unwrap();
        expire(&svc, &alloc, &mut c, &args(&["EXPIRE", "k", "100"])).unwrap();
        assert_eq!(ttl(&svc, &alloc, &mut c, &args(&["TTL", "k"])).unwrap(), RespValue::Integer(100));
        persist(&svc, &alloc, &mut c, &args(&["PERSIST", "k"])).unwrap();
        assert_eq!(ttl(&svc, &alloc, &mut c, &args(&["TTL", "k"])).unwrap(), RespValue::Integer(-1));
    }

    #[test]
    fn del_reports_only_keys_that_existed() {
        let svc = services();
        let alloc = TransactionIdAllocator::new(0);
        let mut c = conn();
        set(&svc, &alloc, &mut c, arg_values(&["SET", "k1", "v"])).unwrap();
        let reply = del(&svc, &alloc, &mut c, &args(&["DEL", "k1", "k2"])).unwrap();
        assert_eq!(reply, RespValue::Integer(1));
    }

    #[test]
    fn getrange_negative_indices() {
        let svc = services();
        let alloc = TransactionIdAllocator::new(0);
        let mut c = conn();
        set(&svc, &alloc, &mut c, arg_values(&["SET", "k", "This is a string"])).unwrap();
        let reply = getrange(&svc, &alloc, &mut c, &args(&["GETRANGE", "k", "-3", "-1"])).unwrap();
        assert_eq!(reply, RespValue::from_str("ing"));
    }

    #[test]
    fn bitcount_whole_string() {
        let svc = services();
        let alloc = TransactionIdAllocator::new(0);
        let mut c = conn();
        set(&svc, &alloc, &mut c, arg_values(&["SET", "k", "foobar"])).unwrap();
        assert_eq!(bitcount(&svc, &alloc, &mut c, &args(&["BITCOUNT", "k"])).unwrap(), RespValue::Integer(26));
    }

    #[test]
    fn lcs_returns_longest_common_subsequence() {
        let svc = services();
        let alloc = TransactionIdAllocator::new(0);
        let mut c = conn();
        set(&svc, &alloc, &mut c, arg_values(&["SET", "key1", "ohmytext"])).unwrap();
        set(&svc, &alloc, &mut c, arg_values(&["SET", "key2", "mynewtext"])).unwrap();
        let reply = lcs(&svc, &alloc, &mut c, &args(&["LCS", "key1", "key2"])).unwrap();
        assert_eq!(reply, RespValue::from_str("mytext"));
    }

    #[test]
    fn lcs_len_option() {
        let svc = services();
        let alloc = TransactionIdAllocator::new(0);
        let mut c = conn();
        set(&svc, &alloc, &mut c, arg_values(&["SET", "key1", "ohmytext"])).unwrap();
        set(&svc, &alloc, &mut c, arg_values(&["SET", "key2", "mynewtext"])).unwrap();
        let reply = lcs(&svc, &alloc, &mut c, &args(&["LCS", "key1", "key2", "LEN"])).unwrap();
        assert_eq!(reply, RespValue::Integer(6));
    }

    #[test]
    fn select_changes_the_connections_database() {
        let svc = services();
        let alloc = TransactionIdAllocator::new(0);
        let mut c = conn();
        select(&svc, &alloc, &mut c, &args(&["SELECT", "1"])).unwrap();
        assert_eq!(c.database_number, 1);
        assert!(select(&svc, &alloc, &mut c, &args(&["SELECT", "999"])).is_err());
    }

    #[test]
    fn select_rejects_an_index_that_would_truncate_to_a_valid_u16() {
        // 65536 truncates to 0 as a u16, which is in range; the comparison
        // must happen on the untruncated i64.
        let svc = services();
        let alloc = TransactionIdAllocator::new(0);
        let mut c = conn();
        assert!(select(&svc, &alloc, &mut c, &args(&["SELECT", "65536"])).is_err());
    }

    #[test]
    fn flushdb_then_dbsize_is_zero() {
        let svc = services();
        let alloc = TransactionIdAllocator::new(0);
        let mut c = conn();
        mset(&svc, &alloc, &mut c, &args(&["MSET", "a", "1", "b", "2"])).unwrap();
        assert_eq!(dbsize(&svc, &alloc, &mut c, &args(&["DBSIZE"])).unwrap(), RespValue::Integer(2));
        flushdb(&svc, &alloc, &mut c, &args(&["FLUSHDB"])).unwrap();
        assert_eq!(dbsize(&svc, &alloc, &mut c, &args(&["DBSIZE"])).unwrap(), RespValue::Integer(0));
    }
}
