//! The per-worker cooperative scheduler (spec §4.7, §5).
//!
//! One [`Scheduler`] owns every fiber on its worker thread: connection
//! handlers, the snapshot writer, the eviction job. It round-robins a ready
//! queue and a timer-sorted suspended set, switching stacks via
//! [`super::context::switch`]. A fiber only ever gives up control at
//! [`Scheduler::yield_now`] or [`Scheduler::wait_ms`] - there is no
//! preemption, matching spec §5's "a fiber may only suspend at explicit ...
//! sites".
//!
//! The scheduler is accessed from inside a running fiber (to yield, to wait)
//! through a thread-local pointer rather than being threaded through every
//! call site as an explicit argument - the same shape the original
//! implementation's `fiber_scheduler_switch_back()` free function has (no
//! receiver, operates on "whatever scheduler owns the calling thread").

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;
use std::time::{Duration, Instant};

use super::context;
use super::stack::FiberStack;
use crate::config::DEFAULT_FIBER_STACK_SIZE;

pub type FiberId = usize;

enum RunState {
    Ready,
    /// Parked until `Instant` (from [`Scheduler::wait_ms`]).
    SleepingUntil(Instant),
    /// Parked until explicitly requeued (from an I/O-ring completion wait).
    ParkedOnIo,
    Terminated,
}

struct FiberSlot {
    name: &'static str,
    stack: FiberStack,
    sp: *mut u8,
    state: RunState,
    terminate_requested: bool,
}

/// Shared mutable scheduler state, reachable both from [`Scheduler`]'s owner
/// and, via thread-local, from code running on a fiber's own stack.
struct Inner {
    fibers: Vec<Option<FiberSlot>>,
    ready: VecDeque<FiberId>,
    current: Option<FiberId>,
    /// Saved stack pointer of the OS thread itself, valid only while a fiber
    /// is running (i.e. between a switch-in and the matching switch-back).
    home_sp: Cell<*mut u8>,
    shutdown_requested: bool,
}

thread_local! {
    static CURRENT: RefCell<Option<Rc<RefCell<Inner>>>> = const { RefCell::new(None) };
}

/// One worker thread's fiber scheduler.
pub struct Scheduler {
    inner: Rc<RefCell<Inner>>,
}

impl Scheduler {
    pub fn new() -> Self {
        let inner = Rc::new(RefCell::new(Inner {
            fibers: Vec::new(),
            ready: VecDeque::new(),
            current: None,
            home_sp: Cell::new(std::ptr::null_mut()),
            shutdown_requested: false,
        }));
        Self { inner }
    }

    /// Spawn a new fiber running `entry` on a stack of `stack_size` bytes,
    /// returning its id. The fiber is scheduled but not run until the next
    /// [`Self::run_once`]/[`Self::run`].
    pub fn spawn<F>(&mut self, name: &'static str, stack_size: usize, entry: F) -> std::io::Result<FiberId>
    where
        F: FnOnce() + 'static,
    {
        let stack = FiberStack::new(stack_size, crate::config::FIBER_GUARD_PAGES)?;

        // Double-boxed: `entry` is `?Sized`-unfriendly as a raw trampoline
        // argument, so box it once as `Box<dyn FnOnce()>`, then box *that*
        // fat pointer so a single thin `*mut u8` can carry it through the
        // architecture trampoline and back.
        let boxed: Box<dyn FnOnce()> = Box::new(entry);
        let data = Box::into_raw(Box::new(boxed)) as *mut u8;

        let sp = context::prepare(stack.top(), data);

        let mut inner = self.inner.borrow_mut();
        let id = inner.fibers.len();
        inner.fibers.push(Some(FiberSlot {
            name,
            stack,
            sp,
            state: RunState::Ready,
            terminate_requested: false,
        }));
        inner.ready.push_back(id);
        Ok(id)
    }

    /// Spawn a fiber on the default stack size (spec §3 `DEFAULT_FIBER_STACK_SIZE`).
    pub fn spawn_default<F>(&mut self, name: &'static str, entry: F) -> std::io::Result<FiberId>
    where
        F: FnOnce() + 'static,
    {
        self.spawn(name, DEFAULT_FIBER_STACK_SIZE, entry)
    }

    /// Request that `id` observe termination at its next suspension point
    /// (spec §4.7 "Cancellation is cooperative").
    pub fn request_terminate(&mut self, id: FiberId) {
        if let Some(Some(slot)) = self.inner.borrow_mut().fibers.get_mut(id) {
            slot.terminate_requested = true;
        }
    }

    /// Request every fiber terminate at its next suspension point (a
    /// worker-level shutdown, spec §5 "a shutdown request sets a
    /// worker-level terminate flag").
    pub fn request_shutdown(&mut self) {
        let mut inner = self.inner.borrow_mut();
        inner.shutdown_requested = true;
        for slot in inner.fibers.iter_mut().flatten() {
            slot.terminate_requested = true;
        }
    }

    pub fn is_empty(&self) -> bool {
        self.inner.borrow().fibers.iter().all(Option::is_none)
    }

    /// Run every ready fiber once, then wake any sleepers whose deadline has
    /// passed, and return. The caller (the worker's main loop) decides how
    /// long to block the underlying OS thread (typically: the I/O ring's
    /// `submit_and_wait`) between calls.
    pub fn run_once(&mut self) {
        self.wake_due_sleepers();

        let ready: Vec<FiberId> = {
            let mut inner = self.inner.borrow_mut();
            std::mem::take(&mut inner.ready).into_iter().collect()
        };

        for id in ready {
            self.resume(id);
        }
    }

    /// Run until every fiber has terminated (used by tests and by a worker
    /// that has nothing else to block on).
    pub fn run_to_completion(&mut self) {
        while !self.is_empty() {
            self.run_once();
        }
    }

    fn wake_due_sleepers(&mut self) {
        let now = Instant::now();
        let mut inner = self.inner.borrow_mut();
        for (id, slot) in inner.fibers.iter_mut().enumerate() {
            let Some(slot) = slot else { continue };
            if let RunState::SleepingUntil(deadline) = slot.state {
                if now >= deadline {
                    slot.state = RunState::Ready;
                    inner.ready.push_back(id);
                }
            }
        }
    }

    /// Move a fiber parked on an I/O wait back onto the ready queue (called
    /// by the net I/O ring when a registered completion arrives).
    pub fn wake_parked(&mut self, id: FiberId) {
        let mut inner = self.inner.borrow_mut();
        if let Some(Some(slot)) = inner.fibers.get_mut(id) {
            if matches!(slot.state, RunState::ParkedOnIo) {
                slot.state = RunState::Ready;
                inner.ready.push_back(id);
            }
        }
    }

    /// Switch into fiber `id`, returning only once it suspends or
    /// terminates.
    fn resume(&mut self, id: FiberId) {
        let to_sp = {
            let inner = self.inner.borrow();
            match &inner.fibers[id] {
                Some(slot) => slot.sp,
                None => return,
            }
        };

        {
            let mut inner = self.inner.borrow_mut();
            inner.current = Some(id);
        }
        CURRENT.with(|c| *c.borrow_mut() = Some(Rc::clone(&self.inner)));

        let mut home_sp: *mut u8 = std::ptr::null_mut();
        self.inner.borrow().home_sp.set(std::ptr::null_mut());
        // SAFETY: `to_sp` is either this fiber's never-yet-run primed stack
        // pointer (from `context::prepare`) or the stack pointer it saved at
        // its last `switch` back here; `&mut home_sp` is a local the
        // scheduler alone writes and reads, valid for the call's duration.
        unsafe { context::switch(&mut home_sp, to_sp) };

        CURRENT.with(|c| *c.borrow_mut() = None);

        let mut inner = self.inner.borrow_mut();
        inner.current = None;
        // `terminated_self` (set from inside the fiber via `mark_terminated`
        // before its final switch-back) tells us whether to reclaim the
        // slot; a fiber that merely yielded is left in place, already
        // requeued by `yield_now`/`wait_ms` before it switched away.
        if let Some(Some(slot)) = inner.fibers.get(id) {
            if matches!(slot.state, RunState::Terminated) {
                inner.fibers[id] = None;
            }
        }
    }

    /// Called once, from inside the running fiber, when its entry closure
    /// returns. Marks the slot terminated and switches back to the
    /// scheduler's home context; never returns.
    fn terminate_current(&self) -> ! {
        let home_sp = {
            let mut inner = self.inner.borrow_mut();
            let id = inner.current.expect("terminate_current called outside a fiber");
            if let Some(Some(slot)) = inner.fibers.get_mut(id) {
                slot.state = RunState::Terminated;
            }
            inner.home_sp.get()
        };
        let mut unused: *mut u8 = std::ptr::null_mut();
        // SAFETY: `home_sp` was saved by `resume`'s `switch` call for this
        // exact activation; this is its matching return switch. `unused`'s
        // write is discarded because this fiber's stack is never resumed
        // again once `fibers[id]` is cleared by `resume`.
        unsafe { context::switch(&mut unused, home_sp) };
        unreachable!("a terminated fiber's stack must never be switched back into");
    }

    /// Suspend the calling fiber, placing it back on the ready queue, and
    /// switch to whichever context (scheduler or another fiber) resumed it.
    /// Must be called from inside a running fiber. Returns `true` if the
    /// fiber should continue, `false` if termination has been requested
    /// (spec §4.7: "the next suspension point... return[s] a failure").
    pub fn yield_now() -> bool {
        with_current(|inner_rc| {
            let id = {
                let inner = inner_rc.borrow();
                inner.current.expect("yield_now called outside a fiber")
            };
            let terminate = {
                let mut inner = inner_rc.borrow_mut();
                let slot = inner.fibers[id].as_mut().expect("fiber slot missing");
                slot.state = RunState::Ready;
                slot.terminate_requested
            };
            inner_rc.borrow_mut().ready.push_back(id);
            Self::suspend_to_home(&inner_rc, id);
            !terminate
        })
    }

    /// Suspend the calling fiber for at least `ms` milliseconds.
    pub fn wait_ms(ms: u64) -> bool {
        with_current(|inner_rc| {
            let id = {
                let inner = inner_rc.borrow();
                inner.current.expect("wait_ms called outside a fiber")
            };
            let terminate = {
                let mut inner = inner_rc.borrow_mut();
                let slot = inner.fibers[id].as_mut().expect("fiber slot missing");
                slot.state = RunState::SleepingUntil(Instant::now() + Duration::from_millis(ms));
                slot.terminate_requested
            };
            Self::suspend_to_home(&inner_rc, id);
            !terminate
        })
    }

    /// Suspend the calling fiber until [`Scheduler::wake_parked`] is called
    /// for its id (the I/O ring's completion-wait suspension point).
    pub fn park_on_io() -> bool {
        with_current(|inner_rc| {
            let id = {
                let inner = inner_rc.borrow();
                inner.current.expect("park_on_io called outside a fiber")
            };
            let terminate = {
                let mut inner = inner_rc.borrow_mut();
                let slot = inner.fibers[id].as_mut().expect("fiber slot missing");
                slot.state = RunState::ParkedOnIo;
                slot.terminate_requested
            };
            Self::suspend_to_home(&inner_rc, id);
            !terminate
        })
    }

    /// The id of the fiber currently running on this thread, if any.
    pub fn current_id() -> Option<FiberId> {
        CURRENT.with(|c| c.borrow().as_ref().and_then(|inner| inner.borrow().current))
    }

    fn suspend_to_home(inner_rc: &Rc<RefCell<Inner>>, id: FiberId) {
        let home_sp = inner_rc.borrow().home_sp.get();
        let sp_slot: *mut *mut u8 = {
            let mut inner = inner_rc.borrow_mut();
            &mut inner.fibers[id].as_mut().unwrap().sp as *mut *mut u8
        };
        // SAFETY: `sp_slot` points at this fiber's own saved-sp field inside
        // `Inner`, borrowed mutably only for the duration of taking its
        // address (the `RefCell` borrow itself is dropped before the switch
        // runs); `home_sp` is the scheduler's context saved by the matching
        // `resume`.
        unsafe { context::switch(sp_slot, home_sp) };
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

fn with_current<R>(f: impl FnOnce(Rc<RefCell<Inner>>) -> R) -> R {
    let inner = CURRENT.with(|c| c.borrow().clone()).expect("no scheduler is running on this thread");
    f(inner)
}

/// Entered once per fiber, from the architecture trampoline, on its very
/// first resumption. Recovers the boxed entry closure from `data`, runs it
/// to completion, then hands control back to the scheduler forever (the
/// slot is reclaimed by [`Scheduler::resume`] and this stack is never
/// switched back into).
pub(super) fn run_fiber_entry(data: *mut u8) -> ! {
    // SAFETY: `data` is exactly the pointer `Scheduler::spawn` produced via
    // `Box::into_raw(Box::new(boxed_closure))`, and this runs exactly once
    // per fiber (the trampoline is only ever reached on first resumption).
    let boxed: Box<Box<dyn FnOnce()>> = unsafe { Box::from_raw(data as *mut Box<dyn FnOnce()>) };
    (*boxed)();

    let inner = CURRENT.with(|c| c.borrow().clone()).expect("fiber entry ran with no scheduler bound");
    let scheduler = Scheduler { inner };
    // `scheduler` is a temporary view over the shared `Rc`, not a second
    // owner of the worker's real `Scheduler` - dropping it here just drops
    // one more `Rc` clone.
    std::mem::forget(scheduler.terminate_current());
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell as StdRefCell;
    use std::rc::Rc as StdRc;

    #[test]
    fn a_fiber_runs_to_completion() {
        let ran = StdRc::new(StdRefCell::new(false));
        let mut scheduler = Scheduler::new();
        let ran2 = StdRc::clone(&ran);
        scheduler.spawn_default("test", move || {
            *ran2.borrow_mut() = true;
        }).unwrap();

        scheduler.run_to_completion();
        assert!(*ran.borrow());
        assert!(scheduler.is_empty());
    }

    #[test]
    fn a_fiber_can_yield_multiple_times() {
        let count = StdRc::new(StdRefCell::new(0));
        let mut scheduler = Scheduler::new();
        let count2 = StdRc::clone(&count);
        scheduler.spawn_default("test", move || {
            for _ in 0..3 {
                *count2.borrow_mut() += 1;
                Scheduler::yield_now();
            }
        }).unwrap();

        scheduler.run_once();
        assert_eq!(*count.borrow(), 1);
        scheduler.run_once();
        assert_eq!(*count.borrow(), 2);
        scheduler.run_once();
        assert_eq!(*count.borrow(), 3);
        scheduler.run_once();
        assert!(scheduler.is_empty());
    }

    #[test]
    fn terminate_request_is_observed_at_next_yield() {
        let observed = StdRc::new(StdRefCell::new(true));
        let mut scheduler = Scheduler::new();
        let observed2 = StdRc::clone(&observed);
        let id = scheduler.spawn_default("test", move || loop {
            if !Scheduler::yield_now() {
                *observed2.borrow_mut() = false;
                break;
            }
        }).unwrap();

        scheduler.run_once();
        scheduler.request_terminate(id);
        scheduler.run_to_completion();
        assert!(!*observed.borrow());
    }

    #[test]
    fn multiple_fibers_interleave_round_robin() {
        let order = StdRc::new(StdRefCell::new(Vec::new()));
        let mut scheduler = Scheduler::new();

        for tag in [1, 2, 3] {
            let order = StdRc::clone(&order);
            scheduler.spawn_default("test", move || {
                order.borrow_mut().push(tag);
                Scheduler::yield_now();
                order.borrow_mut().push(tag * 10);
            }).unwrap();
        }

        scheduler.run_once();
        assert_eq!(*order.borrow(), vec![1, 2, 3]);
        scheduler.run_once();
        assert_eq!(*order.borrow(), vec![1, 2, 3, 10, 20, 30]);
    }
}
