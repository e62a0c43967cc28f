//! `io_uring`-backed network ring (spec §4.8), grounded on the original
//! implementation's `network_io_iouring.h` API shape (init/probe/enqueue/
//! submit/cqe_foreach) and on the tagged-`user_data` completion dispatch
//! pattern from `ShardReactor` in the vortex-core reference.
//!
//! Three SQE kinds only: accept, recv, send. Each submission's `user_data`
//! packs a kind tag into the high 16 bits and the waiting fiber's id into
//! the low 48, so [`IoRing::drain_completions`] can route a completion back
//! to the fiber that's parked on it ([`Scheduler::park_on_io`]) without a
//! side table.
//!
//! Gated behind the `io-uring-net` feature: the crate (minus this front
//! end) still builds on non-Linux hosts without it.

use std::io;
use std::os::unix::io::RawFd;

use io_uring::{opcode, types, IoUring, Probe};

use crate::error::NetworkError;
use crate::fiber::{FiberId, Scheduler};

const TAG_KIND_SHIFT: u64 = 48;
const TAG_ID_MASK: u64 = (1 << TAG_KIND_SHIFT) - 1;

const KIND_ACCEPT: u64 = 1;
const KIND_RECV: u64 = 2;
const KIND_SEND: u64 = 3;

fn make_tag(kind: u64, fiber: FiberId) -> u64 {
    (kind << TAG_KIND_SHIFT) | (fiber as u64 & TAG_ID_MASK)
}

fn tag_kind(tag: u64) -> u64 {
    tag >> TAG_KIND_SHIFT
}

fn tag_fiber(tag: u64) -> FiberId {
    (tag & TAG_ID_MASK) as FiberId
}

/// One decoded completion, already matched back to the fiber parked on it.
#[derive(Debug)]
pub enum Completion {
    Accept { fiber: FiberId, fd: RawFd },
    Recv { fiber: FiberId, bytes: usize },
    Send { fiber: FiberId, bytes: usize },
    Error { fiber: FiberId, error: io::Error },
}

/// A worker's `io_uring` instance plus the opcodes it has confirmed the
/// kernel supports.
pub struct IoRing {
    ring: IoUring,
    pending_submissions: usize,
}

impl IoRing {
    /// Build a ring with `entries` submission-queue slots, probing for the
    /// accept/recv/send opcodes this ring depends on. Spec §4.8:
    /// "unavailable features fail initialization with a reported reason".
    pub fn new(entries: u32) -> Result<Self, NetworkError> {
        let ring = IoUring::builder().build(entries).map_err(NetworkError::Io)?;

        let mut probe = Probe::new();
        ring.submitter().register_probe(&mut probe).map_err(NetworkError::Io)?;
        for (opcode, name) in [
            (opcode::Accept::CODE, "accept"),
            (opcode::Recv::CODE, "recv"),
            (opcode::Send::CODE, "send"),
        ] {
            if !probe.is_supported(opcode) {
                return Err(NetworkError::UnsupportedRingFeature(name));
            }
        }

        Ok(Self { ring, pending_submissions: 0 })
    }

    /// Enqueue an accept on `listener_fd`, tagged with the fiber waiting on
    /// the next inbound connection.
    pub fn enqueue_accept(&mut self, listener_fd: RawFd, fiber: FiberId) {
        let entry = opcode::Accept::new(types::Fd(listener_fd), std::ptr::null_mut(), std::ptr::null_mut())
            .build()
            .user_data(make_tag(KIND_ACCEPT, fiber));
        self.push(entry);
    }

    /// Enqueue a recv into `buf` (typically [`super::recv_buffer::RecvBuffer::spare_capacity_mut`]).
    pub fn enqueue_recv(&mut self, fd: RawFd, buf: &mut [u8], fiber: FiberId) {
        let entry = opcode::Recv::new(types::Fd(fd), buf.as_mut_ptr(), buf.len() as u32)
            .build()
            .user_data(make_tag(KIND_RECV, fiber));
        self.push(entry);
    }

    /// Enqueue a send of `buf` (typically [`super::send_buffer::SendBuffer::take`]'s result).
    pub fn enqueue_send(&mut self, fd: RawFd, buf: &[u8], fiber: FiberId) {
        let entry = opcode::Send::new(types::Fd(fd), buf.as_ptr(), buf.len() as u32)
            .build()
            .user_data(make_tag(KIND_SEND, fiber));
        self.push(entry);
    }

    /// Push `entry`, busy-looping on `submit()` if the submission queue is
    /// momentarily full rather than dropping the request.
    fn push(&mut self, entry: io_uring::squeue::Entry) {
        loop {
            // SAFETY: `entry`'s buffer pointers stay valid until its
            // completion is drained - callers hold the owning `RecvBuffer`/
            // `SendBuffer`/fd for at least that long.
            let pushed = unsafe { self.ring.submission().push(&entry) };
            if pushed.is_ok() {
                self.pending_submissions += 1;
                return;
            }
            let _ = self.ring.submit();
        }
    }

    pub fn submit(&mut self) -> io::Result<usize> {
        self.ring.submit()
    }

    pub fn submit_and_wait(&mut self, want: usize) -> io::Result<usize> {
        self.ring.submit_and_wait(want)
    }

    pub fn pending_submissions(&self) -> usize {
        self.pending_submissions
    }

    /// Drain every completed SQE, decode it, and wake the fiber each one was
    /// tagged for so the worker's scheduler picks it back up on the next
    /// `run_once` (the original's `cqe_foreach` loop, spec §4.8/§4.7).
    pub fn drain_completions(&mut self, scheduler: &mut Scheduler) -> Vec<Completion> {
        let mut out = Vec::new();
        let mut cq = self.ring.completion();
        cq.sync();
        for cqe in &mut cq {
            self.pending_submissions -= 1;
            let tag = cqe.user_data();
            let fiber = tag_fiber(tag);
            let result = cqe.result();

            let completion = if result < 0 {
                let error = io::Error::from_raw_os_error(-result);
                log::error!("ring completion for fiber {fiber} failed: {error}");
                Completion::Error { fiber, error }
            } else {
                match tag_kind(tag) {
                    KIND_ACCEPT => Completion::Accept { fiber, fd: result as RawFd },
                    KIND_RECV => Completion::Recv { fiber, bytes: result as usize },
                    _ => Completion::Send { fiber, bytes: result as usize },
                }
            };
            out.push(completion);
            scheduler.wake_parked(fiber);
        }
        out
    }
}
