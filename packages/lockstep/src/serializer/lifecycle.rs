// open/closed state, outstanding operation count, and drain notification.

use super::error::{ClosedError, panic_message};
use smallvec::SmallVec;
use std::{
    panic::{catch_unwind, AssertUnwindSafe},
    sync::{
        atomic::{AtomicUsize, Ordering::{AcqRel, Acquire}},
        Mutex,
    },
};


// high bit of Lifecycle.state. the remaining bits count outstanding operations.
const CLOSED: usize = 1 << (usize::BITS - 1);

pub(crate) type DrainHandler = Box<dyn FnOnce() + Send + 'static>;

// tracks whether submissions are still accepted and how many accepted operations have not yet
// completed. the closed bit and the count share one atomic so that "closed and nothing
// outstanding" is observed exactly once, by exactly one party, which then fires the drain
// handlers.
pub(crate) struct Lifecycle {
    state: AtomicUsize,
    // Some until drained. handlers registered after draining run immediately.
    on_drained: Mutex<Option<SmallVec<[DrainHandler; 1]>>>,
}

impl Lifecycle {
    pub(crate) fn new() -> Self {
        Lifecycle {
            state: AtomicUsize::new(0),
            on_drained: Mutex::new(Some(SmallVec::new())),
        }
    }

    // count a new operation, unless closed.
    pub(crate) fn begin(&self) -> Result<(), ClosedError> {
        self.state
            .fetch_update(AcqRel, Acquire, |state| {
                if state & CLOSED != 0 {
                    None
                } else {
                    debug_assert!(state + 1 < CLOSED, "outstanding operation count overflow");
                    Some(state + 1)
                }
            })
            .map(|_| ())
            .map_err(|_| ClosedError)
    }

    // uncount an operation that completed or was rejected after being counted.
    pub(crate) fn finish_one(&self) {
        let prev = self.state.fetch_sub(1, AcqRel);
        debug_assert!(prev & !CLOSED > 0, "outstanding operation count underflow (internal bug)");
        if prev == CLOSED | 1 {
            self.drained();
        }
    }

    // stop accepting operations. on_drained runs once everything outstanding has finished,
    // possibly immediately on this thread. returns whether this call did the closing.
    pub(crate) fn close(&self, on_drained: DrainHandler) -> bool {
        {
            let mut handlers = self.on_drained.lock().unwrap();
            match handlers.as_mut() {
                Some(handlers) => handlers.push(on_drained),
                None => {
                    drop(handlers);
                    run_drain_handler(on_drained);
                    return false;
                }
            }
        }

        let prev = self.state.fetch_or(CLOSED, AcqRel);
        if prev == 0 {
            self.drained();
        }
        prev & CLOSED == 0
    }

    pub(crate) fn outstanding(&self) -> usize {
        self.state.load(Acquire) & !CLOSED
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.state.load(Acquire) & CLOSED != 0
    }

    fn drained(&self) {
        let handlers = self.on_drained.lock().unwrap().take()
            .expect("drained twice (internal bug)");
        debug!(handlers = handlers.len(), "serializer drained");
        for handler in handlers {
            run_drain_handler(handler);
        }
    }
}

// run a drain handler, containing any panic so the remaining handlers still run.
fn run_drain_handler(handler: DrainHandler) {
    if let Err(panic) = catch_unwind(AssertUnwindSafe(handler)) {
        error!(panic = %panic_message(&*panic), "drain handler panicked");
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{
        Arc,
        atomic::{AtomicUsize, Ordering::Relaxed},
    };
    use std::thread;

    fn counter_handler(count: &Arc<AtomicUsize>) -> DrainHandler {
        let count = Arc::clone(count);
        Box::new(move || { count.fetch_add(1, Relaxed); })
    }

    #[test]
    fn close_when_idle_drains_immediately() {
        let lifecycle = Lifecycle::new();
        let fired = Arc::new(AtomicUsize::new(0));
        assert!(lifecycle.close(counter_handler(&fired)));
        assert_eq!(fired.load(Relaxed), 1);
        assert!(lifecycle.is_closed());
        assert_eq!(lifecycle.begin(), Err(ClosedError));

        // late handler runs immediately
        assert!(!lifecycle.close(counter_handler(&fired)));
        assert_eq!(fired.load(Relaxed), 2);
    }

    #[test]
    fn close_waits_for_outstanding() {
        let lifecycle = Lifecycle::new();
        let fired = Arc::new(AtomicUsize::new(0));
        lifecycle.begin().unwrap();
        lifecycle.begin().unwrap();
        assert!(lifecycle.close(counter_handler(&fired)));
        assert!(!lifecycle.close(counter_handler(&fired)));
        assert_eq!(lifecycle.outstanding(), 2);
        lifecycle.finish_one();
        assert_eq!(fired.load(Relaxed), 0);
        lifecycle.finish_one();
        assert_eq!(fired.load(Relaxed), 2);
        assert_eq!(lifecycle.outstanding(), 0);
    }

    #[test]
    fn panicking_handler_does_not_block_others() {
        let lifecycle = Lifecycle::new();
        let fired = Arc::new(AtomicUsize::new(0));
        lifecycle.begin().unwrap();
        lifecycle.close(Box::new(|| panic!("handler failure")));
        lifecycle.close(counter_handler(&fired));
        lifecycle.finish_one();
        assert_eq!(fired.load(Relaxed), 1);
    }

    #[test]
    fn racing_close_fires_exactly_once_per_handler() {
        for _ in 0..200 {
            let lifecycle = Arc::new(Lifecycle::new());
            let fired = Arc::new(AtomicUsize::new(0));
            for _ in 0..8 {
                lifecycle.begin().unwrap();
            }
            let joins = (0..8)
                .map(|i| {
                    let lifecycle = Arc::clone(&lifecycle);
                    let handler = counter_handler(&fired);
                    thread::spawn(move || {
                        if i % 2 == 0 {
                            lifecycle.close(handler);
                        } else {
                            drop(handler);
                        }
                        lifecycle.finish_one();
                    })
                })
                .collect::<Vec<_>>();
            for join in joins {
                join.join().unwrap();
            }
            assert_eq!(fired.load(Relaxed), 4);
        }
    }
}
