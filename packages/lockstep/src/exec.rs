//! Where dispatches run.
//!
//! The serializer never calls the operation function inline from [`submit`][1] or from inside a
//! completion. Every dispatch is handed to an [`Executor`] as a [`Job`] instead, which keeps
//! completion handlers from ever firing synchronously within `submit` and keeps a long chain of
//! synchronously-completing operations on one key from growing the stack.
//!
//! [1]: crate::Serializer::submit

use std::{
    collections::VecDeque,
    sync::{Arc, Mutex},
};


/// A unit of deferred work.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Runs jobs at some later point.
///
/// Implementations must not run a job inside the call to `execute` itself. A job should eventually
/// be run; a job dropped without running, as when an executor shuts down, fails its operation and
/// everything queued behind it on the same key with [`Abandoned`][1].
///
/// [1]: crate::error::OperationError::Abandoned
pub trait Executor: Send + Sync + 'static {
    /// Schedule a job.
    fn execute(&self, job: Job);
}

impl Executor for tokio::runtime::Handle {
    fn execute(&self, job: Job) {
        drop(self.spawn(async move { job() }));
    }
}

impl<X: Executor + ?Sized> Executor for Arc<X> {
    fn execute(&self, job: Job) {
        (**self).execute(job)
    }
}


/// Single cooperative queue of jobs, run explicitly by the owner.
///
/// Nothing happens until [`step`](Self::step) or [`run_until_idle`](Self::run_until_idle) is
/// called. Jobs run in the order they were scheduled, one at a time, on the calling thread. This
/// makes interleavings fully deterministic, which is useful for tests and for hosts that drive
/// their own event loop.
#[derive(Default)]
pub struct StepExecutor {
    jobs: Mutex<VecDeque<Job>>,
}

impl StepExecutor {
    /// Construct empty.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Number of jobs waiting to run.
    pub fn pending(&self) -> usize {
        self.jobs.lock().unwrap().len()
    }

    /// Run the job at the front of the queue, if any.
    ///
    /// Returns whether a job ran. The queue lock is not held while the job runs, so jobs may
    /// schedule further jobs.
    pub fn step(&self) -> bool {
        let job = self.jobs.lock().unwrap().pop_front();
        match job {
            Some(job) => {
                job();
                true
            }
            None => false,
        }
    }

    /// Drop all waiting jobs without running them, as a shutting-down executor would.
    ///
    /// Returns the number of jobs dropped. The queue lock is not held while they drop.
    pub fn clear(&self) -> usize {
        let jobs = std::mem::take(&mut *self.jobs.lock().unwrap());
        let cleared = jobs.len();
        drop(jobs);
        cleared
    }

    /// Run jobs until the queue is empty, including jobs scheduled by other jobs.
    ///
    /// Returns the number of jobs that ran.
    pub fn run_until_idle(&self) -> usize {
        let mut ran = 0;
        while self.step() {
            ran += 1;
        }
        ran
    }
}

impl Executor for StepExecutor {
    fn execute(&self, job: Job) {
        self.jobs.lock().unwrap().push_back(job);
    }
}
