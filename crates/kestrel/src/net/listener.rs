//! TCP listener socket creation (spec §4.8), grounded on the admin API
//! server's `create_tcp_listener`, generalized with `SO_REUSEPORT` so every
//! worker can bind its own listener socket to the same address and let the
//! kernel fan out incoming connections across them instead of funneling
//! every accept through a single shared fd.

use std::net::SocketAddr;
use std::os::unix::io::{IntoRawFd, RawFd};

use socket2::{Domain, Protocol, Socket, Type};

/// Bind and listen on `addr` with `SO_REUSEPORT` set, handing back the raw
/// fd for a worker's [`super::ring::IoRing`] accept loop. Left non-blocking
/// so a stray `accept()` outside the ring (there shouldn't be one) can't
/// stall a thread.
pub fn bind_reuseport(addr: SocketAddr, backlog: i32) -> std::io::Result<RawFd> {
    let domain = if addr.is_ipv6() { Domain::IPV6 } else { Domain::IPV4 };
    let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    socket.set_reuse_port(true)?;
    socket.bind(&addr.into())?;
    socket.listen(backlog)?;
    socket.set_nonblocking(true)?;
    Ok(socket.into_raw_fd())
}
