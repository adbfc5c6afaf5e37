// exposed API of serializers

use self::future::*;
use super::{
    dispatch::{Shared, Config, Operation},
    error::*,
    lifecycle::Lifecycle,
    pending::Done,
    registry::{Registry, ChannelStatus},
};
use crate::{
    exec::Executor,
    hooks::{Hooks, NoHooks},
};
use std::{
    future::Future,
    hash::Hash,
    sync::Arc,
};
use tokio::sync::oneshot;


/// Keyed operation serializer
///
/// Runs at most one operation at a time per key, in submission order, while operations on
/// different keys run independently of each other. Operations are performed by a single
/// [`Operation`] supplied at construction; each submission provides the key, the payload to
/// pass to the operation, and a handler for the result.
///
/// Cloning a `Serializer` produces another handle to the same instance. Dropping all handles does
/// not cancel anything: work that was already submitted still runs to completion.
pub struct Serializer<K, P, R = (), E = anyhow::Error> {
    shared: Arc<Shared<K, P, R, E>>,
}

impl<K, P, R, E> Serializer<K, P, R, E>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    P: Send + 'static,
    R: Send + 'static,
    E: Send + 'static,
{
    /// Construct with default settings
    ///
    /// Dispatches run on `executor`. See [`Operation`] for the contract `operation` must uphold.
    pub fn new<X, O>(executor: X, operation: O) -> Self
    where
        X: Executor,
        O: Operation<P, R, E>,
    {
        Self::builder(executor, operation).build()
    }

    /// Start configuring a serializer
    pub fn builder<X, O>(executor: X, operation: O) -> Builder<K, P, R, E>
    where
        X: Executor,
        O: Operation<P, R, E>,
    {
        Builder {
            executor: Arc::new(executor),
            operation: Box::new(operation),
            hooks: Arc::new(NoHooks),
            reclaim_idle: false,
            queue_bound: None,
        }
    }

    /// Construct from an async function, with default settings
    ///
    /// Each dispatched operation's future is spawned onto `handle`, and its output completes the
    /// operation.
    pub fn from_async<F, Fut>(handle: tokio::runtime::Handle, f: F) -> Self
    where
        F: Fn(P) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, E>> + Send + 'static,
    {
        Self::async_builder(handle, f).build()
    }

    /// Start configuring a serializer from an async function
    ///
    /// See [`from_async`](Self::from_async).
    pub fn async_builder<F, Fut>(handle: tokio::runtime::Handle, f: F) -> Builder<K, P, R, E>
    where
        F: Fn(P) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, E>> + Send + 'static,
    {
        let spawn_on = handle.clone();
        Self::builder(handle, move |payload: P, done: Done<R, E>| {
            let fut = f(payload);
            drop(spawn_on.spawn(async move { done.complete(fut.await) }));
        })
    }

    /// Submit an operation for `key`
    ///
    /// Never blocks. If accepted, `on_complete` will be called exactly once with the operation's
    /// result, after every operation previously submitted for the same key has completed, and
    /// never from within this call. If rejected, the payload is handed back and `on_complete` is
    /// dropped without being called.
    pub fn submit<F>(&self, key: K, payload: P, on_complete: F) -> Result<(), SubmitError<P>>
    where
        F: FnOnce(Result<R, OperationError<E>>) + Send + 'static,
    {
        self.shared.submit(key, payload, Box::new(on_complete))
    }

    /// Submit an operation for `key`, getting a future for its result
    ///
    /// Like [`submit`](Self::submit), but the result is delivered through the returned
    /// [`CompletionFut`]. Dropping the future does not cancel the operation.
    pub fn submit_fut(&self, key: K, payload: P) -> Result<CompletionFut<R, E>, SubmitError<P>> {
        let (send, recv) = oneshot::channel();
        self.submit(key, payload, move |result| {
            // the receiver may have been dropped, which is fine
            let _ = send.send(result);
        })?;
        Ok(CompletionFut { recv, terminated: false })
    }

    /// Stop accepting submissions, and call `on_drained` once all accepted operations complete
    ///
    /// Submissions after this fail with [`ClosedError`]. Every operation accepted before this
    /// still runs, and its completion handler fires before `on_drained` does. `on_drained` may be
    /// called on this thread before this returns, if nothing is outstanding. May be called more
    /// than once; every `on_drained` is called.
    pub fn shutdown<F>(&self, on_drained: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.shared.shutdown(Box::new(on_drained));
    }

    /// Stop accepting submissions, getting a future which resolves once all accepted operations
    /// complete
    ///
    /// See [`shutdown`](Self::shutdown).
    pub fn shutdown_fut(&self) -> DrainFut {
        let (send, recv) = oneshot::channel();
        self.shutdown(move || {
            let _ = send.send(());
        });
        DrainFut { recv, terminated: false }
    }

    /// Whether [`shutdown`](Self::shutdown) has been called
    pub fn is_closed(&self) -> bool {
        self.shared.lifecycle.is_closed()
    }

    /// Number of operations accepted but not yet completed, in flight or queued
    pub fn outstanding(&self) -> usize {
        self.shared.lifecycle.outstanding()
    }

    /// Status of `key`'s channel, if it exists
    ///
    /// A channel exists from a key's first submission on. With
    /// [`reclaim_idle`](Builder::set_reclaim_idle), it stops existing whenever it drains.
    pub fn status(&self, key: &K) -> Option<ChannelStatus> {
        self.shared.registry.status(key)
    }

    /// All keys that currently have a channel
    pub fn keys(&self) -> Vec<K> {
        self.shared.registry.keys()
    }
}

impl<K, P, R, E> Clone for Serializer<K, P, R, E> {
    fn clone(&self) -> Self {
        Serializer { shared: Arc::clone(&self.shared) }
    }
}


/// Configuration for a [`Serializer`]
pub struct Builder<K, P, R, E> {
    executor: Arc<dyn Executor>,
    operation: Box<dyn Operation<P, R, E>>,
    hooks: Arc<dyn Hooks<K>>,
    reclaim_idle: bool,
    queue_bound: Option<usize>,
}

impl<K, P, R, E> Builder<K, P, R, E>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    P: Send + 'static,
    R: Send + 'static,
    E: Send + 'static,
{
    /// Install instrumentation hooks
    ///
    /// Defaults to [`NoHooks`].
    pub fn set_hooks(&mut self, hooks: Arc<dyn Hooks<K>>) -> &mut Self {
        self.hooks = hooks;
        self
    }

    /// Ownership-chaining version of [`set_hooks`](Self::set_hooks)
    pub fn with_hooks(mut self, hooks: Arc<dyn Hooks<K>>) -> Self {
        self.hooks = hooks;
        self
    }

    /// Set whether a key's channel is removed as soon as it drains
    ///
    /// Defaults to false, in which case channels stay around dormant for reuse, which suits a
    /// small set of keys used over and over. Set to true if keys are many or short-lived.
    pub fn set_reclaim_idle(&mut self, reclaim_idle: bool) -> &mut Self {
        self.reclaim_idle = reclaim_idle;
        self
    }

    /// Ownership-chaining version of [`set_reclaim_idle`](Self::set_reclaim_idle)
    pub fn with_reclaim_idle(mut self, reclaim_idle: bool) -> Self {
        self.reclaim_idle = reclaim_idle;
        self
    }

    /// Set a maximum number of queued operations per key
    ///
    /// Defaults to `None`, meaning unbounded. The in-flight operation does not count towards the
    /// bound. Submissions beyond it fail with [`QueueFullError`].
    pub fn set_queue_bound(&mut self, bound: Option<usize>) -> &mut Self {
        self.queue_bound = bound;
        self
    }

    /// Ownership-chaining version of [`set_queue_bound`](Self::set_queue_bound)
    pub fn with_queue_bound(mut self, bound: Option<usize>) -> Self {
        self.queue_bound = bound;
        self
    }

    /// Construct the serializer
    pub fn build(self) -> Serializer<K, P, R, E> {
        Serializer {
            shared: Arc::new(Shared {
                operation: self.operation,
                executor: self.executor,
                hooks: self.hooks,
                registry: Registry::new(),
                lifecycle: Lifecycle::new(),
                config: Config {
                    reclaim_idle: self.reclaim_idle,
                    queue_bound: self.queue_bound,
                },
            }),
        }
    }
}


// future types for serializers.
pub(crate) mod future {
    use super::*;
    use std::{
        task::{Poll, Context},
        pin::Pin,
    };

    /// Future for the result of an operation submitted with
    /// [`submit_fut`](Serializer::submit_fut)
    ///
    /// Dropping this does not cancel the operation; its result is then discarded.
    pub struct CompletionFut<R, E> {
        pub(super) recv: oneshot::Receiver<Result<R, OperationError<E>>>,
        pub(super) terminated: bool,
    }

    // the sender half is only dropped unused if the handler itself was dropped, which does not
    // happen to accepted operations.
    fn map_completion<R, E>(
        result: Result<Result<R, OperationError<E>>, oneshot::error::RecvError>,
    ) -> Result<R, OperationError<E>> {
        result.unwrap_or(Err(OperationError::Abandoned))
    }

    impl<R, E> Future for CompletionFut<R, E> {
        type Output = Result<R, OperationError<E>>;

        fn poll(self: Pin<&mut Self>, cx: &mut Context) -> Poll<Self::Output> {
            let this = self.get_mut();
            // for implementation of FusedFuture
            if this.terminated {
                return Poll::Pending;
            }
            Pin::new(&mut this.recv)
                .poll(cx)
                .map(|result| {
                    this.terminated = true;
                    map_completion(result)
                })
        }
    }

    impl<R, E> CompletionFut<R, E> {
        /// Block until the operation completes
        ///
        /// Panics if called from within an async execution context, or if this future has
        /// already resolved.
        pub fn block(self) -> Result<R, OperationError<E>> {
            assert!(!self.terminated, "CompletionFut.block called after terminated");
            map_completion(self.recv.blocking_recv())
        }

        /// Whether this future has already resolved
        pub fn is_terminated(&self) -> bool {
            self.terminated
        }
    }

    #[cfg(feature = "futures")]
    impl<R, E> futures::future::FusedFuture for CompletionFut<R, E> {
        fn is_terminated(&self) -> bool {
            Self::is_terminated(self)
        }
    }


    /// Future which resolves once a shut-down serializer has drained
    ///
    /// See [`shutdown_fut`](Serializer::shutdown_fut).
    pub struct DrainFut {
        pub(super) recv: oneshot::Receiver<()>,
        pub(super) terminated: bool,
    }

    impl Future for DrainFut {
        type Output = ();

        fn poll(self: Pin<&mut Self>, cx: &mut Context) -> Poll<()> {
            let this = self.get_mut();
            if this.terminated {
                return Poll::Pending;
            }
            // the drain handler is never dropped without being called
            Pin::new(&mut this.recv)
                .poll(cx)
                .map(|_| this.terminated = true)
        }
    }

    impl DrainFut {
        /// Block until the serializer has drained
        ///
        /// Panics if called from within an async execution context, or if this future has
        /// already resolved.
        pub fn block(self) {
            assert!(!self.terminated, "DrainFut.block called after terminated");
            let _ = self.recv.blocking_recv();
        }

        /// Whether this future has already resolved
        pub fn is_terminated(&self) -> bool {
            self.terminated
        }
    }

    #[cfg(feature = "futures")]
    impl futures::future::FusedFuture for DrainFut {
        fn is_terminated(&self) -> bool {
            Self::is_terminated(self)
        }
    }
}


// ==== tests ====
