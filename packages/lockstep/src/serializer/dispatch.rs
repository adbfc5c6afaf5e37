// the dispatcher: decides between dispatching and queueing, and advances a key's queue when its
// in-flight operation completes.

use super::{
    error::*,
    lifecycle::{Lifecycle, DrainHandler},
    pending::{PendingOperation, Handler, Trampoline, Done, guarded, DROPPED_BY_PANIC},
    registry::{Registry, Admit},
};
use crate::{
    exec::Executor,
    hooks::Hooks,
    util::AtomicTake,
};
use std::{
    hash::Hash,
    panic::{catch_unwind, AssertUnwindSafe},
    sync::Arc,
    time::Instant,
};


/// The unit of work a serializer performs
///
/// `call` must initiate the work for `payload` and return without waiting for it. When the work
/// finishes, however much later and on whatever thread, the operation must use `done` to report
/// the result. Until it does, no other operation for the same key will be dispatched.
///
/// Implemented for all suitable closures `Fn(P, Done<R, E>)`.
pub trait Operation<P, R, E>: Send + Sync + 'static {
    /// Start the work for one payload
    fn call(&self, payload: P, done: Done<R, E>);
}

impl<P, R, E, F> Operation<P, R, E> for F
where
    F: Fn(P, Done<R, E>) + Send + Sync + 'static,
{
    fn call(&self, payload: P, done: Done<R, E>) {
        self(payload, done)
    }
}

// settings fixed at construction.
pub(crate) struct Config {
    pub(crate) reclaim_idle: bool,
    pub(crate) queue_bound: Option<usize>,
}

// state shared by all handles to a serializer and by all of its in-flight operations.
pub(crate) struct Shared<K, P, R, E> {
    pub(crate) operation: Box<dyn Operation<P, R, E>>,
    pub(crate) executor: Arc<dyn Executor>,
    pub(crate) hooks: Arc<dyn Hooks<K>>,
    pub(crate) registry: Registry<K, PendingOperation<K, P, R, E>>,
    pub(crate) lifecycle: Lifecycle,
    pub(crate) config: Config,
}

impl<K, P, R, E> Shared<K, P, R, E>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    P: Send + 'static,
    R: Send + 'static,
    E: Send + 'static,
{
    // accept an operation, then dispatch it or queue it behind the key's in-flight operation.
    pub(crate) fn submit(
        self: &Arc<Self>,
        key: K,
        payload: P,
        on_complete: Handler<R, E>,
    ) -> Result<(), SubmitError<P>> {
        if let Err(e) = self.lifecycle.begin() {
            self.hook(|hooks| hooks.on_reject(&key));
            trace!("rejected submission to closed serializer");
            return Err(SubmitError { payload, cause: e.into() });
        }

        let pending = PendingOperation { key: key.clone(), payload, on_complete };
        match self.registry.admit(&key, pending, self.config.queue_bound) {
            Admit::Dispatch(pending) => {
                self.hook(|hooks| hooks.on_submit(&key, false));
                self.dispatch(pending);
            }
            Admit::Queued(depth) => {
                self.hook(|hooks| hooks.on_submit(&key, true));
                trace!(depth, "queued behind in-flight operation");
            }
            Admit::Full(pending, bound) => {
                self.lifecycle.finish_one();
                self.hook(|hooks| hooks.on_reject(&key));
                trace!(bound, "rejected submission to full channel");
                return Err(SubmitError {
                    payload: pending.payload,
                    cause: QueueFullError { bound }.into(),
                });
            }
        }
        Ok(())
    }

    pub(crate) fn shutdown(&self, on_drained: DrainHandler) {
        if self.lifecycle.close(on_drained) {
            debug!(
                outstanding = self.lifecycle.outstanding(),
                busy_channels = self.registry.busy_count(),
                "serializer shutting down",
            );
        }
    }

    // call an instrumentation hook. a panicking hook is logged and otherwise ignored, so it can
    // never interrupt a busy slot transition.
    fn hook(&self, f: impl FnOnce(&dyn Hooks<K>)) {
        if let Err(panic) = catch_unwind(AssertUnwindSafe(|| f(&*self.hooks))) {
            error!(panic = %panic_message(&*panic), "instrumentation hook panicked");
        }
    }

    // hand an operation whose key's busy slot is already claimed to the executor.
    fn dispatch(self: &Arc<Self>, pending: PendingOperation<K, P, R, E>) {
        self.hook(|hooks| hooks.on_dispatch(&pending.key));
        let job = DispatchJob { shared: Arc::clone(self), pending: Some(pending) };
        self.executor.execute(Box::new(move || job.run()));
    }

    // call the operation function. this is the dispatch boundary: a panic escaping the
    // operation function, or dropping its completion handle, is converted into a failed
    // completion here.
    fn run(self: &Arc<Self>, pending: PendingOperation<K, P, R, E>) {
        let PendingOperation { key, payload, on_complete } = pending;
        trace!("dispatching operation");

        let started = Instant::now();
        let shared = Arc::clone(self);
        let trampoline: Trampoline<R, E> = Box::new(move |result| {
            shared.complete(key, on_complete, started, result)
        });
        let slot = Arc::new(AtomicTake::some(trampoline));
        let done = Done::new(Arc::clone(&slot));

        let (called, deferred) = guarded(&slot, || {
            catch_unwind(AssertUnwindSafe(|| self.operation.call(payload, done)))
        });
        match called {
            Err(panic) => {
                let msg = panic_message(&*panic);
                if let Some(trampoline) = slot.take() {
                    warn!(panic = %msg, "operation function panicked");
                    trampoline(Err(OperationError::Panicked(msg)));
                } else {
                    warn!(panic = %msg, "operation function panicked after completing");
                }
            }
            // the handle was dropped by a panic that the operation function caught itself
            Ok(()) if deferred => {
                if let Some(trampoline) = slot.take() {
                    warn!("completion handle dropped by a caught panic");
                    trampoline(Err(OperationError::Panicked(DROPPED_BY_PANIC.to_string())));
                }
            }
            Ok(()) => (),
        }
    }

    // the completion trampoline for an operation on `key`. runs exactly once per dispatch.
    fn complete(
        self: &Arc<Self>,
        key: K,
        on_complete: Handler<R, E>,
        started: Instant,
        result: Result<R, OperationError<E>>,
    ) {
        if let Some(next) = self.settle(key, on_complete, started, result) {
            trace!("advancing to next queued operation");
            self.dispatch(next);
        }
    }

    // fail an operation whose dispatch job was dropped without running, along with everything
    // queued behind it on the same key. an executor that drops jobs is shutting down, so the
    // queue is failed in place rather than handed to it again.
    fn abandon(&self, pending: PendingOperation<K, P, R, E>) {
        let mut next = Some(pending);
        let mut abandoned = 0usize;
        while let Some(PendingOperation { key, on_complete, .. }) = next {
            next = self.settle(key, on_complete, Instant::now(), Err(OperationError::Abandoned));
            abandoned += 1;
        }
        warn!(abandoned, "dispatch job dropped without running");
    }

    // fire the handler for an operation on `key` and release its busy slot. returns the next
    // queued operation for the key, which now holds the slot and must be dispatched.
    fn settle(
        &self,
        key: K,
        on_complete: Handler<R, E>,
        started: Instant,
        result: Result<R, OperationError<E>>,
    ) -> Option<PendingOperation<K, P, R, E>> {
        let ok = result.is_ok();
        let handled = catch_unwind(AssertUnwindSafe(move || on_complete(result)));
        self.hook(|hooks| hooks.on_complete(&key, started.elapsed(), ok));

        // the busy slot is released / passed on no matter how the operation or its handler went
        let next = self.registry.advance(&key, self.config.reclaim_idle);
        self.lifecycle.finish_one();

        if let Err(panic) = handled {
            error!(panic = %panic_message(&*panic), "completion handler panicked");
        }
        next
    }
}


// a dispatch in transit through the executor. if the executor drops it without running it, the
// operation fails with Abandoned instead of holding its key's busy slot forever.
struct DispatchJob<K, P, R, E>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    P: Send + 'static,
    R: Send + 'static,
    E: Send + 'static,
{
    shared: Arc<Shared<K, P, R, E>>,
    pending: Option<PendingOperation<K, P, R, E>>,
}

impl<K, P, R, E> DispatchJob<K, P, R, E>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    P: Send + 'static,
    R: Send + 'static,
    E: Send + 'static,
{
    fn run(mut self) {
        if let Some(pending) = self.pending.take() {
            self.shared.run(pending);
        }
    }
}

impl<K, P, R, E> Drop for DispatchJob<K, P, R, E>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    P: Send + 'static,
    R: Send + 'static,
    E: Send + 'static,
{
    fn drop(&mut self) {
        if let Some(pending) = self.pending.take() {
            self.shared.abandon(pending);
        }
    }
}
