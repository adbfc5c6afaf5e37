//! Keyed operation serializer.
//!
//! A [`Serializer`] runs at most one asynchronous operation at a time per key, completing them in
//! submission order, while operations on unrelated keys proceed in parallel. It is meant to sit
//! underneath something like a storage wrapper, keyed by record id, so that writes to the same
//! record never overlap.
//!
//! ```
//! use lockstep::{Serializer, Done, StepExecutor};
//! use std::sync::{Arc, Mutex};
//!
//! let exec = StepExecutor::new();
//! let log = Arc::new(Mutex::new(Vec::new()));
//!
//! let serializer = Serializer::<&str, u32, u32, ()>::new(
//!     Arc::clone(&exec),
//!     |n: u32, done: Done<u32, ()>| done.ok(n * 10),
//! );
//! for n in 1..=3 {
//!     let log = Arc::clone(&log);
//!     serializer
//!         .submit("record-1", n, move |result| log.lock().unwrap().push(result.unwrap()))
//!         .unwrap();
//! }
//! exec.run_until_idle();
//! assert_eq!(*log.lock().unwrap(), vec![10, 20, 30]);
//! ```

#[macro_use]
extern crate tracing;

mod serializer;
mod util;
pub mod exec;
pub mod hooks;

pub use crate::{
    serializer::{
        api::*,
        dispatch::Operation,
        pending::Done,
        registry::ChannelStatus,
    },
    exec::{Executor, StepExecutor},
};

/// Error types
pub mod error {
    pub use crate::serializer::error::*;
}

/// Future types
pub mod future {
    pub use crate::serializer::api::future::*;
}
