// implementation of the keyed operation serializer.
//
// the architecture is as such:
//
// serializer handles wrap around Arc<shared state>
//                                    |
//          /-------------------------/
//          v
//       shared state
//          |
//          |------ it contains a registry, a dashmap from key to channel state. a channel state
//          |       is a busy flag plus a queue of pending operations. the busy flag and the queue
//          |       are only ever changed together, under the key's dashmap shard lock.
//          |
//          |------ it contains the lifecycle: an atomic word holding the closed bit and the count
//          |       of outstanding operations, plus the handlers to call once closed and drained.
//          |
//          \------ it contains the operation function, the executor dispatches are run on, and
//                  instrumentation hooks.
//
// an operation's life:
//
//   submit --> lifecycle.begin --> registry.admit --(idle)--> dispatch --> executor --> run
//                                        |                                               |
//                                     (busy)                          operation.call(payload, done)
//                                        |                                               |
//                                        v                                               v
//                                  channel queue <------- registry.advance <------- trampoline
//                                                          (pop next or idle)     (fires handler)
//
// the busy slot of a key is represented by the one-shot slot behind the operation's Done handle.
// every exit path of an operation (done used, done dropped, panic during the call, panic while
// holding done) races to take that slot, and exactly one of them wins and runs the trampoline.
//
// the organization of these modules is as such:
//
//      registry<---------\
//                        |
//      lifecycle<--------dispatch: the sin-eater of the concurrency. owns every transition of
//                        |  ^      channel state and lifecycle, and the dispatch boundary.
//      pending<----------/  |
//                           |
//                           api: public facade, builder, and future types. the crate re-exports
//                                this API publicly.
//
// there is also the error module, which contains the relevant error types, which is also
// re-exported publicly.

pub(crate) mod error;
pub(crate) mod api;
pub(crate) mod dispatch;
pub(crate) mod pending;
pub(crate) mod registry;

mod lifecycle;
