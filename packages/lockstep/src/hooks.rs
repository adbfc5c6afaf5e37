//! Instrumentation hooks.
//!
//! The serializer itself exposes no metrics. Calling systems that want operation counts or
//! latencies install a [`Hooks`] implementation, such as [`Counters`], and export from there in
//! whatever format they use.

use std::{
    sync::atomic::{AtomicU64, Ordering::Relaxed},
    time::Duration,
};


/// Callbacks invoked by the serializer at points of interest
///
/// All methods default to doing nothing. They run inline on whatever thread triggered the event,
/// so they should be quick.
pub trait Hooks<K>: Send + Sync + 'static {
    /// An operation was accepted for `key`; `queued` is whether it had to wait behind another
    fn on_submit(&self, key: &K, queued: bool) {
        let _ = (key, queued);
    }

    /// A submission for `key` was rejected
    fn on_reject(&self, key: &K) {
        let _ = key;
    }

    /// An operation for `key` was handed to the executor
    fn on_dispatch(&self, key: &K) {
        let _ = key;
    }

    /// An operation for `key` completed `latency` after it was dispatched
    fn on_complete(&self, key: &K, latency: Duration, ok: bool) {
        let _ = (key, latency, ok);
    }
}

/// Hooks that do nothing.
#[derive(Debug, Default, Copy, Clone)]
pub struct NoHooks;

impl<K> Hooks<K> for NoHooks {}


/// Hooks that count events with atomics
#[derive(Debug, Default)]
pub struct Counters {
    submitted: AtomicU64,
    queued: AtomicU64,
    rejected: AtomicU64,
    dispatched: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    latency_nanos: AtomicU64,
}

/// Point-in-time copy of a [`Counters`]
#[derive(Debug, Default, Copy, Clone, Eq, PartialEq)]
pub struct CountersSnapshot {
    /// Accepted submissions
    pub submitted: u64,
    /// Accepted submissions that had to wait behind another operation on the same key
    pub queued: u64,
    /// Rejected submissions
    pub rejected: u64,
    /// Operations handed to the executor
    pub dispatched: u64,
    /// Operations completed, successfully or not
    pub completed: u64,
    /// Operations completed with an error
    pub failed: u64,
    /// Sum of dispatch-to-completion latencies
    pub total_latency: Duration,
}

impl Counters {
    /// Construct zeroed.
    pub fn new() -> Self {
        Self::default()
    }

    /// Read all counters.
    ///
    /// Counters are read individually, so a snapshot taken while operations are running may mix
    /// slightly different moments.
    pub fn snapshot(&self) -> CountersSnapshot {
        CountersSnapshot {
            submitted: self.submitted.load(Relaxed),
            queued: self.queued.load(Relaxed),
            rejected: self.rejected.load(Relaxed),
            dispatched: self.dispatched.load(Relaxed),
            completed: self.completed.load(Relaxed),
            failed: self.failed.load(Relaxed),
            total_latency: Duration::from_nanos(self.latency_nanos.load(Relaxed)),
        }
    }
}

impl CountersSnapshot {
    /// Mean dispatch-to-completion latency, if anything has completed.
    pub fn mean_latency(&self) -> Option<Duration> {
        u32::try_from(self.completed).ok()
            .filter(|&n| n > 0)
            .map(|n| self.total_latency / n)
    }
}

impl<K> Hooks<K> for Counters {
    fn on_submit(&self, _: &K, queued: bool) {
        self.submitted.fetch_add(1, Relaxed);
        if queued {
            self.queued.fetch_add(1, Relaxed);
        }
    }

    fn on_reject(&self, _: &K) {
        self.rejected.fetch_add(1, Relaxed);
    }

    fn on_dispatch(&self, _: &K) {
        self.dispatched.fetch_add(1, Relaxed);
    }

    fn on_complete(&self, _: &K, latency: Duration, ok: bool) {
        let nanos = u64::try_from(latency.as_nanos()).unwrap_or(u64::MAX);
        self.latency_nanos.fetch_add(nanos, Relaxed);
        if !ok {
            self.failed.fetch_add(1, Relaxed);
        }
        self.completed.fetch_add(1, Relaxed);
    }
}
