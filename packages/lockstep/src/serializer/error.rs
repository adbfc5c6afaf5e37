// serializer error types.

use thiserror::Error;


// ==== base error types ====


/// Error for trying to submit to a serializer which has been shut down
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Error)]
#[error("serializer is shut down")]
pub struct ClosedError;

/// Error for trying to submit to a key whose queue is already at the configured bound
///
/// Only the queued operations count towards the bound, not the one currently in flight.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Error)]
#[error("per-key queue is full ({bound} operations queued)")]
pub struct QueueFullError {
    /// The configured per-key bound
    pub bound: usize,
}


// ==== compound error types ====


/// Reason a submission was rejected
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Error)]
pub enum SubmitErrorCause {
    /// [`Serializer::shutdown`](crate::Serializer::shutdown) has been called
    #[error(transparent)]
    Closed(#[from] ClosedError),
    /// The key's queue is at its bound
    #[error(transparent)]
    QueueFull(#[from] QueueFullError),
}

/// Error for trying to submit to a serializer
///
/// Rejection is synchronous: the operation was never queued, its completion handler has been
/// dropped without being called, and the payload is handed back.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Error)]
#[error("submission rejected: {cause}")]
pub struct SubmitError<P> {
    /// The payload that could not be submitted
    pub payload: P,
    /// The reason the payload could not be submitted
    pub cause: SubmitErrorCause,
}

impl<P> SubmitError<P> {
    /// Whether this was rejected because the serializer is shut down
    pub fn is_closed(&self) -> bool {
        matches!(self.cause, SubmitErrorCause::Closed(_))
    }

    /// Discard the payload, keeping only the cause
    pub fn into_cause(self) -> SubmitErrorCause {
        self.cause
    }
}

/// Failure of a single operation, delivered to that operation's completion handler only
///
/// An operation failure never affects other queued or future operations on the same key. There
/// is no automatic retry; callers wanting one resubmit.
#[derive(Debug, Error)]
pub enum OperationError<E> {
    /// The operation function reported an error
    #[error("operation failed: {0}")]
    Failed(E),
    /// The operation function panicked, either synchronously during dispatch or later while
    /// holding the completion handle
    #[error("operation panicked: {0}")]
    Panicked(String),
    /// The operation was dropped without completing
    ///
    /// Either the operation function dropped its completion handle unused, or the executor
    /// dropped the dispatch before it ran, as happens when an executor shuts down.
    #[error("operation dropped without completing")]
    Abandoned,
}

impl<E> OperationError<E> {
    /// Get the error reported by the operation function, if that is what happened
    pub fn reported(&self) -> Option<&E> {
        match self {
            OperationError::Failed(e) => Some(e),
            _ => None,
        }
    }

    /// Transform the reported error type
    pub fn map<F>(self, f: impl FnOnce(E) -> F) -> OperationError<F> {
        match self {
            OperationError::Failed(e) => OperationError::Failed(f(e)),
            OperationError::Panicked(msg) => OperationError::Panicked(msg),
            OperationError::Abandoned => OperationError::Abandoned,
        }
    }
}

// extract a printable message from a caught panic payload.
pub(crate) fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&'static str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "<non-string panic payload>".to_string()
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display() {
        let e = SubmitError { payload: 5u8, cause: ClosedError.into() };
        assert_eq!(e.to_string(), "submission rejected: serializer is shut down");
        assert!(e.is_closed());

        let e = SubmitError { payload: (), cause: QueueFullError { bound: 3 }.into() };
        assert_eq!(e.to_string(), "submission rejected: per-key queue is full (3 operations queued)");
        assert!(!e.is_closed());

        let e = OperationError::Failed(anyhow::anyhow!("disk on fire"));
        assert_eq!(e.to_string(), "operation failed: disk on fire");
    }

    #[test]
    fn panic_messages() {
        let static_str: Box<dyn std::any::Any + Send> = Box::new("boom");
        assert_eq!(panic_message(&*static_str), "boom");
        let string: Box<dyn std::any::Any + Send> = Box::new(format!("boom {}", 2));
        assert_eq!(panic_message(&*string), "boom 2");
        let other: Box<dyn std::any::Any + Send> = Box::new(7u32);
        assert_eq!(panic_message(&*other), "<non-string panic payload>");
    }

    #[test]
    fn map_keeps_variant() {
        let e: OperationError<u8> = OperationError::Failed(3);
        assert_eq!(e.map(|n| n as u32 * 2).reported(), Some(&6));
        let e: OperationError<u8> = OperationError::Abandoned;
        assert!(e.map(|n| n as u32).reported().is_none());
    }
}
