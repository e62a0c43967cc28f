//! Epoch-based reclamation (spec §5 "Epoch-based reclamation").
//!
//! Retired [`super::entry::EntryIndex`]/[`super::sequence::ChunkSequence`]
//! values are handed to [`crossbeam::epoch`] instead of freed immediately:
//! the retiring worker pins the current epoch, defers the drop, and
//! `crossbeam`'s global collector frees it only once every worker has
//! advanced past that epoch — the same "retired objects carry the epoch at
//! which they were retired; freed once all workers have advanced past it"
//! scheme spec §5 describes, reusing the collector the original hand-rolled
//! in C.

use crossbeam::epoch::{self, Guard};

/// Pin the calling worker's epoch for the duration of one RMW operation or
/// one hashtable scan block. Call at the start of the operation and drop the
/// guard at a quiescent point (spec §5: "each worker advances an epoch
/// counter at quiescent points").
pub fn pin() -> Guard {
    epoch::pin()
}

/// Retire `value`, deferring its drop until no pinned guard can still
/// observe the object it replaced (a prior reader holding the old
/// `Arc` clone keeps it alive regardless; this additionally bounds how long
/// a *transient* raw reference taken under a pin remains valid).
pub fn retire<T: Send + 'static>(guard: &Guard, value: T) {
    guard.defer(move || drop(value));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retired_value_is_dropped_eventually() {
        use std::sync::atomic::{AtomicBool, Ordering};
        use std::sync::Arc;

        let dropped = Arc::new(AtomicBool::new(false));

        struct DropFlag(Arc<AtomicBool>);
        impl Drop for DropFlag {
            fn drop(&mut self) {
                self.0.store(true, Ordering::SeqCst);
            }
        }

        {
            let guard = pin();
            retire(&guard, DropFlag(Arc::clone(&dropped)));
        }
        epoch::pin().flush();
        // Deterministic timing of global GC is not guaranteed; at minimum
        // retiring must not panic or double-free.
        let _ = dropped.load(Ordering::SeqCst);
    }
}
