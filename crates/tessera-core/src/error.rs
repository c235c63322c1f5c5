//! Error types shared by the clock, the causal index and the sync protocol.

/// Failure to build, encode or parse a [`Timestamp`](crate::Timestamp).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TimestampError {
    /// The physical time does not fit the configured fixed-width field.
    #[error("time overflow: value exceeds maximum {max}")]
    TimeOverflow {
        /// Largest value the field can hold.
        max: u64,
    },

    /// The logical counter does not fit the configured fixed-width field.
    #[error("counter overflow: value exceeds maximum {max}")]
    CounterOverflow {
        /// Largest value the field can hold.
        max: u64,
    },

    /// A serialized timestamp had the wrong length.
    #[error("invalid timestamp format: expected {expected} characters, got {actual}")]
    InvalidFormat {
        /// Length the layout requires.
        expected: usize,
        /// Length that was given.
        actual: usize,
    },

    /// The node id has the wrong length or contains non-alphanumeric characters.
    #[error("invalid node id {id:?}: expected {expected} alphanumeric characters")]
    InvalidId {
        /// The rejected id.
        id: String,
        /// Required id length.
        expected: usize,
    },

    /// A field contained characters outside its numeral alphabet.
    #[error("failed to parse {field} from {input:?}")]
    Parse {
        /// Which field failed: `time`, `counter` or `suffix`.
        field: &'static str,
        /// The offending text.
        input: String,
    },

    /// The timestamp layout itself is unusable.
    #[error("invalid timestamp config: {reason}")]
    InvalidConfig {
        /// What is wrong with the layout.
        reason: &'static str,
    },
}

impl TimestampError {
    /// Whether this error reports a fixed-width field being exceeded.
    pub fn is_overflow(&self) -> bool {
        matches!(
            self,
            TimestampError::TimeOverflow { .. } | TimestampError::CounterOverflow { .. }
        )
    }
}

/// Failure of a [`HybridClock`](crate::HybridClock) operation.
///
/// A failed call never advances the clock.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClockError {
    /// The result does not fit the timestamp layout.
    #[error(transparent)]
    Timestamp(#[from] TimestampError),

    /// The logical time would run ahead of the wall clock by more than the
    /// configured bound.
    #[error("clock drift exceeded: logical time {logical} is ahead of wall time {wall} by more than {max_drift} ms")]
    DriftExceeded {
        /// Logical time the call would have produced, in ms.
        logical: u64,
        /// Wall time at the call, in ms.
        wall: u64,
        /// Allowed lead, in ms.
        max_drift: u64,
    },
}

/// Failure while handling a sync message.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SyncError {
    /// The message is well-formed but disagrees with the local tree shape.
    /// The exchange should be restarted with a fresh root announcement.
    #[error("protocol mismatch at path {path:?}: {reason}")]
    ProtocolMismatch {
        /// Tree path the message referred to.
        path: String,
        /// What did not fit.
        reason: &'static str,
    },

    /// A path or leaf suffix could not be decoded.
    #[error("invalid timestamp in sync message: {0}")]
    InvalidTimestamp(#[from] TimestampError),
}

impl SyncError {
    pub(crate) fn mismatch(path: &str, reason: &'static str) -> Self {
        SyncError::ProtocolMismatch {
            path: path.to_string(),
            reason,
        }
    }
}
