//! One worker: an OS thread pinned to its own `io_uring` instance and fiber
//! scheduler (spec §4.7, §5 "one worker = one OS thread = one scheduler").
//! Grounded on `hdds/src/admin/api/server.rs`'s `accept_loop` shape (accept
//! -> per-connection handler) re-expressed as completion-driven fibers
//! instead of blocking reads on their own OS threads.

use std::cell::RefCell;
use std::collections::HashMap;
use std::net::TcpStream;
use std::os::unix::io::{FromRawFd, RawFd};
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use kestrel::command::Dispatcher;
use kestrel::fiber::{FiberId, Scheduler};
use kestrel::lock::TransactionIdAllocator;
use kestrel::net::ring::{Completion, IoRing};
use kestrel::net::Connection;
use kestrel::storage::eviction;
use kestrel::Services;

/// Tag reserved for the listening socket's accept SQE, which isn't tied to
/// any fiber (the driver loop itself re-submits it).
const ACCEPT_FIBER: FiberId = FiberId::MAX;

const EVICTION_INTERVAL_MS: u64 = 100;
const SNAPSHOT_CHECK_INTERVAL_MS: u64 = 1000;
const RECV_CHUNK: usize = 16 * 1024;

/// Completions the driver loop has decoded but whose owning fiber hasn't
/// resumed yet; a fiber reads (and removes) its own entry right after
/// [`Scheduler::park_on_io`] returns.
type PendingResults = Rc<RefCell<HashMap<FiberId, Completion>>>;

pub fn run(worker_index: u16, services: Arc<Services>, listener_fd: RawFd, shutdown: Arc<AtomicBool>) -> std::io::Result<()> {
    let ring = Rc::new(RefCell::new(IoRing::new(256).map_err(std::io::Error::other)?));
    let results: PendingResults = Rc::new(RefCell::new(HashMap::new()));
    let dispatcher = Rc::new(Dispatcher::new());
    let allocator = Rc::new(TransactionIdAllocator::new(worker_index));

    let mut scheduler = Scheduler::new();

    spawn_eviction_fiber(&mut scheduler, Arc::clone(&services), Rc::clone(&allocator));
    spawn_snapshot_fiber(&mut scheduler, Arc::clone(&services));

    ring.borrow_mut().enqueue_accept(listener_fd, ACCEPT_FIBER);

    while !shutdown.load(Ordering::Relaxed) {
        scheduler.run_once();

        ring.borrow_mut().submit()?;
        let completions = ring.borrow_mut().drain_completions(&mut scheduler);

        // TODO: register a timeout SQE instead of polling, so idle workers
        // don't wake 200 times a second just to re-check sleeping fibers
        // and the shutdown flag.
        if completions.is_empty() {
            std::thread::sleep(Duration::from_millis(5));
            continue;
        }

        for completion in completions {
            match completion {
                Completion::Accept { fd, .. } => {
                    spawn_connection_fiber(&mut scheduler, fd, Arc::clone(&services), Rc::clone(&dispatcher), Rc::clone(&allocator), Rc::clone(&ring), Rc::clone(&results));
                    ring.borrow_mut().enqueue_accept(listener_fd, ACCEPT_FIBER);
                }
                Completion::Error { fiber, error } if fiber == ACCEPT_FIBER => {
                    log::warn!("[worker {worker_index}] accept failed: {error}, retrying");
                    ring.borrow_mut().enqueue_accept(listener_fd, ACCEPT_FIBER);
                }
                other => {
                    let fiber = completion_fiber(&other);
                    results.borrow_mut().insert(fiber, other);
                }
            }
        }
    }

    scheduler.request_shutdown();
    scheduler.run_to_completion();
    Ok(())
}

fn completion_fiber(completion: &Completion) -> FiberId {
    match completion {
        Completion::Accept { fiber, .. } | Completion::Recv { fiber, .. } | Completion::Send { fiber, .. } | Completion::Error { fiber, .. } => *fiber,
    }
}

/// Wait for the specific completion this fiber's own last submission
/// produced, discarding anything else queued for a different fiber id (the
/// shared map holds at most one pending entry per fiber at a time, since a
/// fiber only ever has one submission in flight).
fn await_own_completion(results: &PendingResults) -> Option<Completion> {
    let me = Scheduler::current_id().expect("await_own_completion called outside a fiber");
    loop {
        if !Scheduler::park_on_io() {
            return None;
        }
        if let Some(completion) = results.borrow_mut().remove(&me) {
            return Some(completion);
        }
    }
}

fn spawn_connection_fiber(
    scheduler: &mut Scheduler,
    fd: RawFd,
    services: Arc<Services>,
    dispatcher: Rc<Dispatcher>,
    allocator: Rc<TransactionIdAllocator>,
    ring: Rc<RefCell<IoRing>>,
    results: PendingResults,
) {
    let _ = scheduler.spawn_default("connection", move || {
        let mut conn = Connection::new(fd, &services.config.auth);

        loop {
            let me = Scheduler::current_id().unwrap();
            {
                let spare = conn.recv.spare_capacity_mut(RECV_CHUNK);
                ring.borrow_mut().enqueue_recv(fd, spare, me);
            }
            let Some(Completion::Recv { bytes, .. }) = await_own_completion(&results) else {
                break;
            };
            if bytes == 0 {
                break;
            }
            conn.recv.commit(bytes);

            if !conn.process_commands(&services, &dispatcher, &allocator) {
                flush(&mut conn, &ring, &results);
                break;
            }
            if !flush(&mut conn, &ring, &results) {
                break;
            }
        }

        // Reconstructing an owning `TcpStream` and dropping it closes `fd`
        // without pulling `libc` into this binary just for `close(2)`.
        // SAFETY: `fd` was handed to us by an `accept` completion and isn't
        // used anywhere else in this worker past this point.
        unsafe { drop(TcpStream::from_raw_fd(fd)) };
    });
}

/// Send everything staged in `conn.send`, if anything, and wait for it to
/// land. Returns `false` if the send failed (socket gone).
fn flush(conn: &mut Connection, ring: &Rc<RefCell<IoRing>>, results: &PendingResults) -> bool {
    if conn.send.is_empty() {
        return true;
    }
    // `outbox` lives in this fiber's own (heap-boxed) call frame across the
    // suspension below, so the pointer the ring holds stays valid until the
    // completion arrives - the same stackful-coroutine guarantee the recv
    // path relies on.
    let outbox = conn.send.take();
    let me = Scheduler::current_id().unwrap();
    ring.borrow_mut().enqueue_send(conn.fd, &outbox, me);
    matches!(await_own_completion(results), Some(Completion::Send { .. }))
}

fn spawn_eviction_fiber(scheduler: &mut Scheduler, services: Arc<Services>, allocator: Rc<TransactionIdAllocator>) {
    let _ = scheduler.spawn_default("eviction", move || loop {
        let mut tx = allocator.acquire();
        for database_number in 0..services.storage.database_count() {
            eviction::run_once(
                &services.storage,
                &mut tx,
                database_number,
                services.config.storage_hard_limit_bytes,
                services.config.eviction_policy,
                kestrel::config::EVICTION_SAMPLE_SIZE,
                now_ms(),
            );
        }
        tx.release();
        if !Scheduler::wait_ms(EVICTION_INTERVAL_MS) {
            break;
        }
    });
}

fn spawn_snapshot_fiber(scheduler: &mut Scheduler, services: Arc<Services>) {
    let _ = scheduler.spawn_default("snapshot", move || loop {
        let now = now_ms();
        if services.snapshot.should_run(now) {
            if services.snapshot.enough_changed(&services.storage, &services.config.snapshot) {
                if let Err(e) = services.snapshot.run(&services.storage, &services.config, now, || {
                    Scheduler::yield_now();
                }) {
                    log::error!("[snapshot] run failed: {e}");
                }
            } else {
                services.snapshot.skip_run(now, &services.config.snapshot);
            }
        }
        if !Scheduler::wait_ms(SNAPSHOT_CHECK_INTERVAL_MS) {
            break;
        }
    });
}

fn now_ms() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as i64
}
