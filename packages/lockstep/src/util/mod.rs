//! Internal utilities.

mod atomic_take;
mod small_queue;

pub(crate) use self::{
    atomic_take::AtomicTake,
    small_queue::SmallQueue,
};
