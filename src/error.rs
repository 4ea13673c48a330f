//! Error types for signal operations.

use std::sync::Arc;

use crate::graph::SignalId;

/// Errors produced by signals and the runtime.
///
/// Every variant that carries a foreign error wraps it in `Arc<anyhow::Error>`
/// so that `SignalError` stays cheap to clone. This matters because the same
/// error is handed both to the tracer and to a signal's error handler.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SignalError {
    /// A revision below 1 was supplied.
    #[error("invalid revision {revision}: revisions start at 1")]
    InvalidRevision {
        /// The rejected revision.
        revision: u64,
    },

    /// A local write would need a revision past `u64::MAX`.
    #[error("revision {revision} cannot be advanced by a local write")]
    RevisionExhausted {
        /// The current, maximal revision.
        revision: u64,
    },

    /// An empty revision id was supplied.
    #[error("revision id must not be empty")]
    InvalidId,

    /// A value could not be canonically encoded.
    #[error("value cannot be encoded: {0}")]
    Serialization(Arc<anyhow::Error>),

    /// The signal is frozen and rejects writes.
    #[error("signal is frozen")]
    Frozen,

    /// The signal has been disposed.
    #[error("signal is disposed")]
    Disposed,

    /// A debounce that is not a whole number of milliseconds in
    /// `0..=MAX_DEBOUNCE` was supplied.
    #[error("invalid debounce of {nanos}ns: expected whole milliseconds up to 2147483647")]
    InvalidDebounce {
        /// The rejected duration in nanoseconds.
        nanos: u128,
    },

    /// `merge` was called without any source.
    #[error("merge requires at least one source signal")]
    EmptyMerge,

    /// A merge source is not a live node of the caller's runtime.
    #[error("{id:?} is not a live signal of this runtime")]
    NotASignal {
        /// The offending source.
        id: SignalId,
    },

    /// A subscriber returned an error or panicked.
    ///
    /// Only ever delivered through [`Signal::on_error`](crate::Signal::on_error).
    #[error("listener failed: {0}")]
    Listener(Arc<anyhow::Error>),

    /// A derivation function returned an error or panicked.
    #[error("derivation failed: {0}")]
    Derivation(Arc<anyhow::Error>),
}

impl SignalError {
    pub(crate) fn serialization(err: impl Into<anyhow::Error>) -> Self {
        SignalError::Serialization(Arc::new(err.into()))
    }

    pub(crate) fn listener(err: anyhow::Error) -> Self {
        SignalError::Listener(Arc::new(err))
    }

    pub(crate) fn derivation(err: anyhow::Error) -> Self {
        SignalError::Derivation(Arc::new(err))
    }

    /// Returns `true` for errors raised by user callbacks rather than by the
    /// write protocol itself.
    pub fn is_callback_error(&self) -> bool {
        matches!(self, SignalError::Listener(_) | SignalError::Derivation(_))
    }

    /// Returns the wrapped foreign error, if any.
    pub fn source_error(&self) -> Option<&Arc<anyhow::Error>> {
        match self {
            SignalError::Serialization(e)
            | SignalError::Listener(e)
            | SignalError::Derivation(e) => Some(e),
            _ => None,
        }
    }

    /// Attempts to downcast the wrapped foreign error to a specific type.
    pub fn downcast_ref<E: std::error::Error + Send + Sync + 'static>(&self) -> Option<&E> {
        self.source_error().and_then(|e| e.downcast_ref::<E>())
    }
}
