//! Connection-level commands (spec §6): `HELLO`, `PING`, `QUIT`, `AUTH`,
//! `SHUTDOWN`.

use crate::config::AuthMode;
use crate::error::CommandError;
use crate::lock::TransactionIdAllocator;
use crate::resp::{RespValue, RespVersion};
use crate::Services;

use super::super::context::ConnectionState;

fn check_credentials(auth: &AuthMode, username: Option<&[u8]>, password: &[u8]) -> bool {
    match auth {
        AuthMode::Disabled => true,
        AuthMode::Password(expected) => username.is_none() && password == expected.as_bytes(),
        AuthMode::UserPass(users) => match username {
            Some(u) => std::str::from_utf8(u)
                .ok()
                .and_then(|u| users.get(u))
                .is_some_and(|expected| password == expected.as_bytes()),
            None => false,
        },
    }
}

pub fn hello(services: &Services, _allocator: &TransactionIdAllocator, conn: &mut ConnectionState, args: &[Vec<u8>]) -> Result<RespValue, CommandError> {
    let mut i = 1;
    if let Some(version_arg) = args.get(i) {
        match version_arg.as_slice() {
            b"2" => conn.resp_version = RespVersion::Resp2,
            b"3" => conn.resp_version = RespVersion::Resp3,
            _ => return Err(CommandError::argument("NOPROTO unsupported protocol version")),
        }
        i += 1;
    }

    while i < args.len() {
        match args[i].to_ascii_uppercase().as_slice() {
            b"AUTH" => {
                let (username, password) = if args.len() >= i + 3 {
                    (Some(args[i + 1].as_slice()), args[i + 2].as_slice())
                } else {
                    return Err(CommandError::protocol("ERR wrong number of arguments for 'hello' command"));
                };
                if !check_credentials(&services.config.auth, username, password) {
                    return Err(CommandError::Auth("WRONGPASS invalid username-password pair".to_string()));
                }
                conn.authenticated = true;
                i += 3;
            }
            b"SETNAME" => {
                let name = args.get(i + 1).ok_or_else(|| CommandError::protocol("ERR wrong number of arguments for 'hello' command"))?;
                conn.name = Some(String::from_utf8_lossy(name).to_string());
                i += 2;
            }
            _ => return Err(CommandError::argument("ERR syntax error in HELLO")),
        }
    }

    if !conn.authenticated && !matches!(services.config.auth, AuthMode::Disabled) {
        return Err(CommandError::Auth("NOAUTH HELLO must be called with AUTH if requirepass is set".to_string()));
    }

    Ok(RespValue::Map(vec![
        (RespValue::from_str("server"), RespValue::from_str("kestrel")),
        (RespValue::from_str("version"), RespValue::from_str(env!("CARGO_PKG_VERSION"))),
        (RespValue::from_str("proto"), RespValue::Integer(if conn.resp_version == RespVersion::Resp3 { 3 } else { 2 })),
        (RespValue::from_str("id"), RespValue::Integer(0)),
        (RespValue::from_str("mode"), RespValue::from_str("standalone")),
        (RespValue::from_str("role"), RespValue::from_str("master")),
        (RespValue::from_str("modules"), RespValue::Array(Vec::new())),
    ]))
}

pub fn ping(_services: &Services, _allocator: &TransactionIdAllocator, _conn: &mut ConnectionState, args: &[Vec<u8>]) -> Result<RespValue, CommandError> {
    match args.get(1) {
        Some(message) => Ok(RespValue::from_bytes(message.clone())),
        None => Ok(RespValue::SimpleString("PONG".to_string())),
    }
}

pub fn quit(_services: &Services, _allocator: &TransactionIdAllocator, conn: &mut ConnectionState, _args: &[Vec<u8>]) -> Result<RespValue, CommandError> {
    conn.terminate_connection = true;
    Ok(RespValue::ok())
}

pub fn auth(services: &Services, _allocator: &TransactionIdAllocator, conn: &mut ConnectionState, args: &[Vec<u8>]) -> Result<RespValue, CommandError> {
    let (username, password) = if args.len() >= 3 {
        (Some(args[1].as_slice()), args[2].as_slice())
    } else {
        (None, args[1].as_slice())
    };

    if matches!(services.config.auth, AuthMode::Disabled) {
        return Err(CommandError::argument("ERR Client sent AUTH, but no password is set"));
    }

    if !check_credentials(&services.config.auth, username, password) {
        return Err(CommandError::Auth("WRONGPASS invalid username-password pair".to_string()));
    }

    conn.authenticated = true;
    Ok(RespValue::ok())
}

pub fn shutdown(_services: &Services, _allocator: &TransactionIdAllocator, conn: &mut ConnectionState, args: &[Vec<u8>]) -> Result<RespValue, CommandError> {
    if let Some(flag) = args.get(1) {
        match flag.to_ascii_uppercase().as_slice() {
            b"NOSAVE" | b"SAVE" => {}
            _ => return Err(CommandError::argument("ERR syntax error")),
        }
    }
    // The worker's accept loop observes `terminate_connection` and, for
    // `SHUTDOWN` specifically, also sets the process-wide shutdown flag that
    // every fiber scheduler checks at its next suspension point (spec §5
    // "A shutdown request sets a worker-level terminate flag").
    conn.terminate_connection = true;
    Ok(RespValue::ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use std::sync::Arc;

    fn conn() -> ConnectionState {
        ConnectionState::new(&AuthMode::Disabled)
    }

    #[test]
    fn ping_without_message() {
        let svc = Services::new(Arc::new(Config::default()));
        let allocator = TransactionIdAllocator::new(0);
        let mut c = conn();
        assert_eq!(ping(&svc, &allocator, &mut c, &[b"PING".to_vec()]).unwrap(), RespValue::SimpleString("PONG".into()));
    }

    #[test]
    fn ping_echoes_message() {
        let svc = Services::new(Arc::new(Config::default()));
        let allocator = TransactionIdAllocator::new(0);
        let mut c = conn();
        let reply = ping(&svc, &allocator, &mut c, &[b"PING".to_vec(), b"hi".to_vec()]).unwrap();
        assert_eq!(reply, RespValue::from_bytes(b"hi".to_vec()));
    }

    #[test]
    fn hello_3_switches_resp_version() {
        let svc = Services::new(Arc::new(Config::default()));
        let allocator = TransactionIdAllocator::new(0);
        let mut c = conn();
        hello(&svc, &allocator, &mut c, &[b"HELLO".to_vec(), b"3".to_vec()]).unwrap();
        assert_eq!(c.resp_version, RespVersion::Resp3);
    }

    #[test]
    fn auth_without_requirepass_is_an_error() {
        let svc = Services::new(Arc::new(Config::default()));
        let allocator = TransactionIdAllocator::new(0);
        let mut c = conn();
        assert!(auth(&svc, &allocator, &mut c, &[b"AUTH".to_vec(), b"pw".to_vec()]).is_err());
    }

    #[test]
    fn auth_with_correct_password_succeeds() {
        let mut config = Config::default();
        config.auth = AuthMode::Password("secret".to_string());
        let svc = Services::new(Arc::new(config));
        let allocator = TransactionIdAllocator::new(0);
        let mut c = ConnectionState::new(&svc.config.auth);
        assert!(!c.authenticated);
        auth(&svc, &allocator, &mut c, &[b"AUTH".to_vec(), b"secret".to_vec()]).unwrap();
        assert!(c.authenticated);
    }
}
