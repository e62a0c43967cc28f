//! Architecture-specific fiber context switch (spec §4.7: "a tiny assembly
//! routine that saves callee-saved registers on the current stack and
//! restores them from the target stack").
//!
//! Only the registers each ABI designates callee-saved are touched here;
//! everything else is the compiler's own responsibility to spill before the
//! call into [`switch`], exactly as for any ordinary function call.

#[cfg(target_arch = "x86_64")]
#[path = "x86_64.rs"]
mod arch;

#[cfg(target_arch = "aarch64")]
#[path = "aarch64.rs"]
mod arch;

pub use arch::{prepare, switch};

/// Entered exactly once, from the architecture's trampoline stub, on a
/// fiber's very first resumption. Recovers the boxed entry closure and runs
/// it; never returns normally - it hands control back to the scheduler once
/// the closure finishes.
extern "C" fn real_trampoline(data: *mut u8) -> ! {
    super::scheduler::run_fiber_entry(data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fiber::stack::FiberStack;
    use std::sync::atomic::{AtomicU64, Ordering};

    static SEEN: AtomicU64 = AtomicU64::new(0);

    extern "C" fn record_and_return(data: *mut u8) -> ! {
        SEEN.store(data as u64, Ordering::SeqCst);
        // A fiber entrypoint never returns in production (the scheduler
        // parks it instead); for this unit test we just need to observe
        // that the switch landed here with the right argument, so abort
        // the process path by spinning - the test thread never reaches
        // this fiber's stack again once it asserts on `SEEN`.
        loop {
            std::hint::spin_loop();
        }
    }

    #[test]
    fn prepared_stack_is_page_aligned_below_top() {
        let stack = FiberStack::new(64 * 1024, 1).unwrap();
        let sp = prepare(stack.top(), 0xdead_beef as *mut u8);
        assert!((sp as usize) < (stack.top() as usize));
        assert_eq!(sp as usize % 8, 0);
    }

    // Exercising a real `switch` into `record_and_return` would spawn a
    // thread whose stack we never reclaim (the entrypoint spins forever by
    // construction) — that shape is covered instead by
    // `fiber::scheduler`'s integration tests, which drive a fiber through
    // `Scheduler::run` and observe it yielding back normally.
    #[allow(dead_code)]
    fn unused_reference_to_silence_dead_code_lint() {
        let _ = record_and_return as extern "C" fn(*mut u8) -> !;
    }
}
