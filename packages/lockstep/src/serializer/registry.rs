// per-key channel bookkeeping.

use crate::util::SmallQueue;
use dashmap::DashMap;
use std::hash::Hash;


// number of queued operations a channel stores without heap allocating.
const INLINE_QUEUE_LEN: usize = 1;

// heap allocation a drained channel queue may keep for reuse, in elements. anything larger is
// released when the channel goes idle, so a one-off burst doesn't pin memory forever.
const RETAINED_QUEUE_ALLOC: usize = 64;


/// Point-in-time status of one key's channel
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct ChannelStatus {
    /// Whether an operation for the key is in flight
    pub busy: bool,
    /// Number of operations waiting behind the in-flight one
    pub queued: usize,
}

impl ChannelStatus {
    /// Whether nothing is in flight or queued
    pub fn is_drained(&self) -> bool {
        !self.busy && self.queued == 0
    }
}

// mutable state of one key.
//
// invariants:
// - busy is true iff an operation for the key has been dispatched and not yet completed.
// - if busy is false, queue is empty.
pub(crate) struct ChannelState<T> {
    busy: bool,
    queue: SmallQueue<T, INLINE_QUEUE_LEN>,
}

// safety: shared references to a ChannelState (dashmap read guards) are only used to read busy
// and the queue length. queued elements are only ever touched through a write guard, so they are
// never accessed from two threads at once and only need to be Send.
unsafe impl<T: Send> Sync for ChannelState<T> {}

impl<T> ChannelState<T> {
    fn status(&self) -> ChannelStatus {
        ChannelStatus { busy: self.busy, queued: self.queue.len() }
    }

    fn is_drained(&self) -> bool {
        !self.busy && self.queue.is_empty()
    }
}

impl<T> Default for ChannelState<T> {
    fn default() -> Self {
        ChannelState { busy: false, queue: SmallQueue::new() }
    }
}

// outcome of admitting an operation to its channel.
pub(crate) enum Admit<T> {
    // the channel was idle and is now busy. the caller must dispatch the operation.
    Dispatch(T),
    // the channel was busy. the operation was queued, with this many now queued.
    Queued(usize),
    // the channel was busy and its queue was at this bound. the operation is handed back.
    Full(T, usize),
}

// mapping from key to channel state. channels are created on first use.
//
// each check-and-mutate happens while holding the key's dashmap shard lock, which makes the
// busy transition and the queue mutation a single atomic step.
pub(crate) struct Registry<K, T> {
    channels: DashMap<K, ChannelState<T>>,
}

impl<K: Eq + Hash + Clone, T> Registry<K, T> {
    pub(crate) fn new() -> Self {
        Registry { channels: DashMap::new() }
    }

    // get-or-create the key's channel and either claim its busy slot or queue behind it.
    pub(crate) fn admit(&self, key: &K, op: T, bound: Option<usize>) -> Admit<T> {
        let mut state = match self.channels.get_mut(key) {
            Some(state) => state,
            None => self.channels.entry(key.clone()).or_default(),
        };
        debug_assert!(state.busy || state.queue.is_empty(), "idle channel with queue (internal bug)");

        if !state.busy {
            state.busy = true;
            return Admit::Dispatch(op);
        }
        if let Some(bound) = bound {
            if state.queue.len() >= bound {
                return Admit::Full(op, bound);
            }
        }
        state.queue.push_back(op);
        Admit::Queued(state.queue.len())
    }

    // release the key's busy slot. if anything is queued, the slot passes straight to the head
    // of the queue, which is returned for dispatch; otherwise the channel goes idle.
    //
    // panics if the channel is not busy.
    pub(crate) fn advance(&self, key: &K, reclaim_idle: bool) -> Option<T> {
        let mut state = self.channels.get_mut(key)
            .expect("completion for unknown channel (internal bug)");
        assert!(state.busy, "completion for idle channel (internal bug)");

        if let Some(next) = state.queue.pop_front() {
            return Some(next);
        }
        state.busy = false;
        if state.queue.shrink_if_empty(RETAINED_QUEUE_ALLOC) {
            trace!("released queue allocation of drained channel");
        }
        drop(state);

        // the channel may have been claimed again in between, which remove_if re-checks under
        // the shard lock
        if reclaim_idle && self.channels.remove_if(key, |_, state| state.is_drained()).is_some() {
            trace!("reclaimed idle channel");
        }
        None
    }

    pub(crate) fn status(&self, key: &K) -> Option<ChannelStatus> {
        self.channels.get(key).map(|state| state.status())
    }

    pub(crate) fn keys(&self) -> Vec<K> {
        self.channels.iter().map(|entry| entry.key().clone()).collect()
    }

    // number of channels currently busy.
    pub(crate) fn busy_count(&self) -> usize {
        self.channels.iter().filter(|entry| entry.busy).count()
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.channels.len()
    }
}
