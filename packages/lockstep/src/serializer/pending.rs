// pending operations and the completion handle that releases their busy slot.

use super::error::OperationError;
use crate::util::AtomicTake;
use std::{
    cell::Cell,
    fmt::{self, Formatter, Debug},
    sync::Arc,
};


// completion handler supplied by the submitter.
pub(crate) type Handler<R, E> = Box<dyn FnOnce(Result<R, OperationError<E>>) + Send + 'static>;

// one submitted unit of work. owned by its channel's queue until dispatched, then by the
// dispatch job, then split between the operation function (payload) and the completion
// trampoline (key and handler).
pub(crate) struct PendingOperation<K, P, R, E> {
    pub(crate) key: K,
    pub(crate) payload: P,
    pub(crate) on_complete: Handler<R, E>,
}

// the continuation that runs when an in-flight operation finishes: fires the handler, then
// releases the busy slot / advances the key's queue. bound to the key at dispatch.
pub(crate) type Trampoline<R, E> = Box<dyn FnOnce(Result<R, OperationError<E>>) + Send + 'static>;

// one-shot cell holding a trampoline. whoever takes it owns the release.
pub(crate) type Slot<R, E> = Arc<AtomicTake<Trampoline<R, E>>>;

// failure message for a completion handle dropped by a panic the dispatch boundary never saw.
pub(crate) const DROPPED_BY_PANIC: &str = "panicked while holding completion handle";

thread_local! {
    // address of the slot whose operation function is currently being called on this thread,
    // within a panic-catching dispatch boundary. 0 if none.
    static GUARDED_SLOT: Cell<usize> = const { Cell::new(0) };
    // whether the guarded slot's completion handle was dropped by a panic, leaving the release
    // to the boundary.
    static DEFERRED: Cell<bool> = const { Cell::new(false) };
}

fn slot_addr<R, E>(slot: &Slot<R, E>) -> usize {
    Arc::as_ptr(slot) as *const () as usize
}

// run f with the given slot marked as guarded on this thread. also returns whether the slot's
// completion handle was dropped by a panic meanwhile, in which case the caller owns the release
// even if f caught the panic itself.
pub(crate) fn guarded<R, E, T>(slot: &Slot<R, E>, f: impl FnOnce() -> T) -> (T, bool) {
    struct Restore(usize, bool);

    impl Drop for Restore {
        fn drop(&mut self) {
            GUARDED_SLOT.with(|g| g.set(self.0));
            DEFERRED.with(|d| d.set(self.1));
        }
    }

    let _restore = Restore(
        GUARDED_SLOT.with(|g| g.replace(slot_addr(slot))),
        DEFERRED.with(|d| d.replace(false)),
    );
    let out = f();
    (out, DEFERRED.with(|d| d.get()))
}


/// Handle through which an operation function signals that it finished
///
/// Holding a `Done` means holding the key's busy slot: no other operation for the same key will
/// be dispatched until it is used. Calling [`complete`](Self::complete) (or [`ok`](Self::ok) or
/// [`fail`](Self::fail)) consumes it, so it can be used at most once.
///
/// If a `Done` is dropped without being used, the operation is considered failed with
/// [`OperationError::Abandoned`] (or [`OperationError::Panicked`] if dropped by a panic), and
/// the busy slot is released all the same.
pub struct Done<R, E> {
    slot: Slot<R, E>,
}

impl<R, E> Done<R, E> {
    pub(crate) fn new(slot: Slot<R, E>) -> Self {
        Done { slot }
    }

    /// Signal that the operation finished with the given result
    pub fn complete(self, result: Result<R, E>) {
        self.finish(result.map_err(OperationError::Failed));
    }

    /// Signal that the operation succeeded
    pub fn ok(self, value: R) {
        self.complete(Ok(value));
    }

    /// Signal that the operation failed
    pub fn fail(self, error: E) {
        self.complete(Err(error));
    }

    fn finish(self, result: Result<R, OperationError<E>>) {
        if let Some(trampoline) = self.slot.take() {
            trampoline(result);
        }
    }
}

impl<R, E> Drop for Done<R, E> {
    fn drop(&mut self) {
        let panicking = std::thread::panicking();
        if panicking && GUARDED_SLOT.with(|g| g.get()) == slot_addr(&self.slot) {
            // the dispatch boundary will report the panic, with its message if it sees it
            DEFERRED.with(|d| d.set(true));
            return;
        }
        let Some(trampoline) = self.slot.take() else { return };
        if panicking {
            warn!("completion handle dropped by a panic");
            trampoline(Err(OperationError::Panicked(DROPPED_BY_PANIC.to_string())));
        } else {
            warn!("completion handle dropped without completing");
            trampoline(Err(OperationError::Abandoned));
        }
    }
}

impl<R, E> Debug for Done<R, E> {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        f.debug_struct("Done")
            .field("used", &self.slot.is_taken())
            .finish()
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use std::{
        panic::{catch_unwind, AssertUnwindSafe},
        sync::Mutex,
    };

    type Log = Arc<Mutex<Vec<Result<u32, String>>>>;

    fn slot(log: &Log) -> Slot<u32, &'static str> {
        let log = Arc::clone(log);
        let trampoline: Trampoline<u32, &'static str> = Box::new(move |result| {
            log.lock().unwrap().push(result.map_err(|e| e.to_string()));
        });
        Arc::new(AtomicTake::some(trampoline))
    }

    #[test]
    fn complete_fires_once() {
        let log = Log::default();
        let done = Done::new(slot(&log));
        done.ok(7);
        assert_eq!(*log.lock().unwrap(), vec![Ok(7)]);
    }

    #[test]
    fn drop_counts_as_abandoned() {
        let log = Log::default();
        drop(Done::new(slot(&log)));
        assert_eq!(
            *log.lock().unwrap(),
            vec![Err("operation dropped without completing".to_string())],
        );
    }

    #[test]
    fn unguarded_panic_reports_panicked() {
        let log = Log::default();
        let done = Done::new(slot(&log));
        let result = catch_unwind(AssertUnwindSafe(move || {
            let _done = done;
            panic!("boom");
        }));
        assert!(result.is_err());
        assert_eq!(
            *log.lock().unwrap(),
            vec![Err("operation panicked: panicked while holding completion handle".to_string())],
        );
    }

    #[test]
    fn guarded_panic_leaves_slot_to_boundary() {
        let log = Log::default();
        let slot = slot(&log);
        let done = Done::new(Arc::clone(&slot));
        let (result, deferred) = guarded(&slot, || catch_unwind(AssertUnwindSafe(move || {
            let _done = done;
            panic!("boom");
        })));
        assert!(result.is_err());
        assert!(deferred);
        assert!(log.lock().unwrap().is_empty());
        assert!(!slot.is_taken());
        GUARDED_SLOT.with(|g| assert_eq!(g.get(), 0));
        DEFERRED.with(|d| assert!(!d.get()));
    }

    #[test]
    fn guarded_records_panic_caught_inside() {
        let log = Log::default();
        let slot = slot(&log);
        let done = Done::new(Arc::clone(&slot));
        let ((), deferred) = guarded(&slot, || {
            let caught = catch_unwind(AssertUnwindSafe(move || {
                let _done = done;
                panic!("boom");
            }));
            assert!(caught.is_err());
        });
        assert!(deferred);
        assert!(!slot.is_taken());
    }

    #[test]
    fn guarded_without_panic_defers_nothing() {
        let log = Log::default();
        let slot = slot(&log);
        let done = Done::new(Arc::clone(&slot));
        let ((), deferred) = guarded(&slot, move || done.ok(3));
        assert!(!deferred);
        assert_eq!(*log.lock().unwrap(), vec![Ok(3)]);
    }
}
