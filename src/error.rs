//! Errors surfaced by the merger and its parts.
//!
//! Two families live here. Misuse errors ([`EmptySetError`],
//! [`DoubleCloseError`], [`MergeError::AlreadyTerminated`]) mean the merger was
//! driven incorrectly and are never retried. Cancellation and timeouts are
//! ordinary outcomes of [`Merger::run`](crate::Merger::run).

use std::time::Duration;

use thiserror::Error;

/// `wait_any` was called on a readiness set with no active sources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("waited on an empty readiness set")]
pub struct EmptySetError;

/// The output sink was closed a second time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("output sink closed more than once")]
pub struct DoubleCloseError;

/// A value could not be handed to the output sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SendError {
    /// The sink was already closed by its owner.
    #[error("output sink is closed")]
    Closed,
    /// The consumer dropped the [`Output`](crate::sink::Output) stream.
    #[error("output stream was dropped by its consumer")]
    Disconnected,
}

/// The result of a merge that did not end with every source drained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum MergeError {
    /// The coordinator waited on an empty readiness set.
    #[error(transparent)]
    EmptySet(#[from] EmptySetError),
    /// A terminated merger was run again.
    #[error("merger has already terminated")]
    AlreadyTerminated,
    /// The output sink was closed twice.
    #[error(transparent)]
    DoubleClose(#[from] DoubleCloseError),
    /// The cancellation signal resolved before all sources closed.
    #[error("merge was cancelled")]
    Cancelled,
    /// No source produced an event within the configured wait timeout.
    #[error("no source became ready within {0:?}")]
    TimedOut(Duration),
    /// The consumer dropped the output stream while values were in flight.
    #[error("output stream was dropped by its consumer")]
    OutputDropped,
}

impl MergeError {
    /// Returns `true` if this error reports a programming error rather than
    /// an expected outcome.
    pub fn is_misuse(&self) -> bool {
        matches!(
            self,
            MergeError::EmptySet(_) | MergeError::AlreadyTerminated | MergeError::DoubleClose(_)
        )
    }

    /// Returns `true` for cancellation and timeouts.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, MergeError::Cancelled | MergeError::TimedOut(_))
    }
}

impl From<SendError> for MergeError {
    fn from(err: SendError) -> Self {
        match err {
            // Only the coordinator sends, and it stops sending once it closes.
            SendError::Closed => MergeError::AlreadyTerminated,
            SendError::Disconnected => MergeError::OutputDropped,
        }
    }
}

/// A source handed to a [`Registrar`](crate::Registrar) after the merger
/// stopped accepting new sources.
///
/// The rejected source is handed back unpolled.
#[derive(Error)]
#[error("merger no longer accepts new sources")]
pub struct RegisterError<S>(pub S);

impl<S> RegisterError<S> {
    /// Recover the rejected source.
    pub fn into_inner(self) -> S {
        self.0
    }
}

impl<S> std::fmt::Debug for RegisterError<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("RegisterError").field(&"..").finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn misuse_classification() {
        assert!(MergeError::from(EmptySetError).is_misuse());
        assert!(MergeError::from(DoubleCloseError).is_misuse());
        assert!(MergeError::AlreadyTerminated.is_misuse());
        assert!(!MergeError::Cancelled.is_misuse());
        assert!(MergeError::TimedOut(Duration::from_millis(5)).is_cancellation());
        assert!(!MergeError::OutputDropped.is_cancellation());
    }

    #[test]
    fn send_errors_map_onto_merge_errors() {
        assert_eq!(
            MergeError::from(SendError::Disconnected),
            MergeError::OutputDropped
        );
        assert_eq!(
            MergeError::from(SendError::Closed),
            MergeError::AlreadyTerminated
        );
    }

    #[test]
    fn register_error_returns_source() {
        let err = RegisterError(7u8);
        assert_eq!(err.to_string(), "merger no longer accepts new sources");
        assert_eq!(err.into_inner(), 7);
    }
}
