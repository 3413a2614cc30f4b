//! Error types for event validation.
//!
//! Validation failures are caller errors: the boundary adapter maps them to
//! a client-error response and the event never reaches the queue.

use thiserror::Error;

/// Result type alias using `CoreError`.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Errors raised while building or validating core types.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    /// The event could not be accepted as-is.
    #[error("invalid event: {reason}")]
    InvalidEvent {
        /// Why the event was rejected
        reason: String,
    },
}

impl CoreError {
    /// Creates an invalid event error.
    pub fn invalid_event(reason: impl Into<String>) -> Self {
        Self::InvalidEvent { reason: reason.into() }
    }
}
