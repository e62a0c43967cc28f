//! Network front end (spec §4.8): per-connection buffers plus, on Linux with
//! the `io-uring-net` feature, the `io_uring` ring that drives them.
//!
//! [`recv_buffer`]/[`send_buffer`] are plain, allocation-owning types with
//! no dependency on the ring itself, so they build everywhere and are unit
//! tested without a kernel that supports `io_uring`. [`connection`] ties
//! them to a file descriptor and the command dispatcher. [`ring`] is the
//! actual I/O driver and is feature-gated.

pub mod connection;
pub mod listener;
pub mod recv_buffer;
pub mod send_buffer;

#[cfg(feature = "io-uring-net")]
pub mod ring;

pub use connection::Connection;
pub use listener::bind_reuseport;
pub use recv_buffer::RecvBuffer;
pub use send_buffer::SendBuffer;

#[cfg(feature = "io-uring-net")]
pub use ring::IoRing;
