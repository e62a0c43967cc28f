//! Per-connection state threaded through every command dispatch (spec §5 ``Shared
//! resource policy'': "Send/recv buffers: owned by the connection's worker").

use crate::config::AuthMode;
use crate::resp::RespVersion;

/// Everything about a single client connection that outlives any one
/// command: which database it has `SELECT`ed, which RESP version it
/// negotiated via `HELLO`, whether it has authenticated, and whether the
/// accept loop should close the socket after the current reply is flushed.
#[derive(Debug, Clone)]
pub struct ConnectionState {
    pub database_number: u16,
    pub resp_version: RespVersion,
    pub authenticated: bool,
    pub name: Option<String>,
    pub terminate_connection: bool,
}

impl ConnectionState {
    pub fn new(auth: &AuthMode) -> Self {
        Self {
            database_number: 0,
            resp_version: RespVersion::Resp2,
            authenticated: matches!(auth, AuthMode::Disabled),
            name: None,
            terminate_connection: false,
        }
    }
}
