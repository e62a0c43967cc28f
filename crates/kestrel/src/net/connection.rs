//! A single client connection: the fd the ring reads/writes, the command
//! dispatch state [`ConnectionState`] carries across requests, and the
//! buffers in between (spec §4.8, §5 "send/recv buffers: owned by the
//! connection's worker").

use std::os::unix::io::RawFd;

use crate::command::context::ConnectionState;
use crate::command::Dispatcher;
use crate::config::AuthMode;
use crate::error::CommandError;
use crate::lock::TransactionIdAllocator;
use crate::resp::assembler::CommandAssembler;
use crate::resp::{RespValue, Writer};
use crate::Services;

use super::recv_buffer::RecvBuffer;
use super::send_buffer::SendBuffer;

pub struct Connection {
    pub fd: RawFd,
    pub state: ConnectionState,
    pub recv: RecvBuffer,
    pub send: SendBuffer,
    writer: Writer,
    assembler: CommandAssembler,
}

impl Connection {
    pub fn new(fd: RawFd, auth: &AuthMode) -> Self {
        let state = ConnectionState::new(auth);
        let writer = Writer::new(state.resp_version);
        Self { fd, state, recv: RecvBuffer::new(), send: SendBuffer::new(), writer, assembler: CommandAssembler::new() }
    }

    /// Parse and dispatch every complete command currently buffered,
    /// encoding each reply into [`Self::send`]. Returns `false` once the
    /// connection should be closed (a `QUIT`/`SHUTDOWN` handler set
    /// `terminate_connection`, or a fatal [`crate::error::CommandError`]
    /// closed it per spec §6 "Authentication errors").
    ///
    /// `dispatcher` and `allocator` are worker-local; `services` is the
    /// shared, read-only process state.
    pub fn process_commands(&mut self, services: &Services, dispatcher: &Dispatcher, allocator: &TransactionIdAllocator) -> bool {
        loop {
            let outcome = self.assembler.next_command(self.recv.filled(), services.config.max_command_length, services.config.max_arguments_per_command);

            let (args, consumed) = match outcome {
                Ok(Some((args, consumed))) => (args, consumed),
                Ok(None) => return true,
                Err(e) => {
                    let reply: RespValue = CommandError::from(e).into();
                    self.writer.encode(&reply, self.send.pending_mut());
                    return false;
                }
            };
            self.recv.consume(consumed);

            if args.is_empty() {
                continue;
            }

            let reply = dispatcher.dispatch(services, allocator, &mut self.state, args);
            self.writer.set_version(self.state.resp_version);
            self.writer.encode(&reply, self.send.pending_mut());

            if self.state.terminate_connection {
                return false;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use std::sync::Arc;

    fn services() -> Services {
        Services::new(Arc::new(Config::default()))
    }

    #[test]
    fn a_full_command_is_parsed_dispatched_and_replied_to() {
        let svc = services();
        let dispatcher = Dispatcher::new();
        let allocator = TransactionIdAllocator::new(0);
        let mut conn = Connection::new(3, &svc.config.auth);

        let line = b"*3\r\n$3\r\nSET\r\n$3\r\nfoo\r\n$3\r\nbar\r\n";
        conn.recv.spare_capacity_mut(line.len())[..line.len()].copy_from_slice(line);
        conn.recv.commit(line.len());

        assert!(conn.process_commands(&svc, &dispatcher, &allocator));
        assert!(conn.recv.is_empty());
        assert_eq!(conn.send.pending(), b"+OK\r\n");
    }

    #[test]
    fn a_partial_command_is_left_buffered() {
        let svc = services();
        let dispatcher = Dispatcher::new();
        let allocator = TransactionIdAllocator::new(0);
        let mut conn = Connection::new(3, &svc.config.auth);

        let partial = b"*3\r\n$3\r\nSET\r\n$3\r\nfo";
        conn.recv.spare_capacity_mut(partial.len())[..partial.len()].copy_from_slice(partial);
        conn.recv.commit(partial.len());

        assert!(conn.process_commands(&svc, &dispatcher, &allocator));
        assert_eq!(conn.recv.filled(), partial);
        assert!(conn.send.is_empty());
    }

    #[test]
    fn quit_tells_the_caller_to_close_the_connection() {
        let svc = services();
        let dispatcher = Dispatcher::new();
        let allocator = TransactionIdAllocator::new(0);
        let mut conn = Connection::new(3, &svc.config.auth);

        let line = b"*1\r\n$4\r\nQUIT\r\n";
        conn.recv.spare_capacity_mut(line.len())[..line.len()].copy_from_slice(line);
        conn.recv.commit(line.len());

        assert!(!conn.process_commands(&svc, &dispatcher, &allocator));
    }
}
