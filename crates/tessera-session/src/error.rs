use tessera_core::{ClockError, SyncError, TimestampError};

/// Error returned by session and replica operations.
///
/// `E` is the store backend's error type; store failures are passed through
/// unchanged in [`SessionError::Store`].
#[derive(Debug, thiserror::Error)]
pub enum SessionError<E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    /// The clock could not produce or merge a timestamp.
    #[error(transparent)]
    Clock(#[from] ClockError),

    /// A sync message did not fit the local tree. Restart the exchange.
    #[error(transparent)]
    Sync(#[from] SyncError),

    /// A fragment carried a malformed timestamp; the whole packet was rejected.
    #[error("invalid fragment timestamp: {0}")]
    InvalidTimestamp(#[from] TimestampError),

    /// A fragment addressed a different document.
    #[error("fragment for document {found:?} sent to document {expected:?}")]
    ForeignFragment {
        /// The session's document.
        expected: String,
        /// The document named by the fragment.
        found: String,
    },

    /// The storage backend failed. Nothing from the failed command was
    /// applied in memory.
    #[error("store error: {0}")]
    Store(#[source] E),

    /// No document with this id exists.
    #[error("document {0:?} not found")]
    DocumentNotFound(String),

    /// The session has been closed.
    #[error("document session is closed")]
    Closed,

    /// A blocking persistence task panicked or was cancelled.
    #[error("persistence worker failed: {0}")]
    Worker(#[from] tokio::task::JoinError),
}

impl<E> SessionError<E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    /// Whether retrying with a fresh sync handshake may succeed.
    pub fn is_retryable_sync(&self) -> bool {
        matches!(self, SessionError::Sync(SyncError::ProtocolMismatch { .. }))
    }
}
