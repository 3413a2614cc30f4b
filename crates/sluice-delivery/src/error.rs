//! Error types for durable-log delivery.
//!
//! Transport errors are categorized so the retry loop can tell transient
//! failures (network, timeout, 5xx, 429) from permanent ones, and so log
//! lines carry a stable `category` field.

use std::fmt;

use thiserror::Error;

/// Result type alias for delivery operations.
pub type Result<T> = std::result::Result<T, DeliveryError>;

/// Errors raised while writing events to the durable log.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeliveryError {
    /// The event could not be encoded.
    #[error("serialization failed: {message}")]
    Serialization {
        /// Encoder error message
        message: String,
    },

    /// Connection to the log endpoint failed.
    #[error("network connection failed: {message}")]
    Network {
        /// Error message describing the network failure
        message: String,
    },

    /// A single write attempt exceeded its timeout.
    #[error("write timed out after {timeout_ms}ms")]
    Timeout {
        /// Per-attempt timeout that was exceeded
        timeout_ms: u64,
    },

    /// The log rejected the write (4xx other than 429).
    #[error("client error: HTTP {status_code}")]
    ClientError {
        /// HTTP status code (4xx)
        status_code: u16,
        /// Response body content
        body: String,
    },

    /// The log failed to accept the write (5xx).
    #[error("server error: HTTP {status_code}")]
    ServerError {
        /// HTTP status code (5xx)
        status_code: u16,
        /// Response body content
        body: String,
    },

    /// The log asked the writer to slow down.
    #[error("rate limited: retry after {retry_after_seconds}s")]
    RateLimited {
        /// Seconds to wait before retrying
        retry_after_seconds: u64,
    },

    /// Every attempt allowed by the retry policy failed.
    #[error("write failed after {attempts} attempts: {last_error}")]
    RetriesExhausted {
        /// Number of attempts made
        attempts: u32,
        /// Error from the final attempt
        last_error: String,
    },

    /// Both the primary and the dead-letter write failed.
    #[error("dead-letter write failed: {dead_letter} (primary: {primary})")]
    DeadLetterFailed {
        /// Why the primary write failed
        primary: String,
        /// Why the dead-letter write failed
        dead_letter: String,
    },

    /// The transport was closed before the write.
    #[error("transport for {destination} is closed")]
    Closed {
        /// Destination of the closed transport
        destination: String,
    },

    /// Invalid transport configuration.
    #[error("invalid transport configuration: {message}")]
    Configuration {
        /// Configuration error message
        message: String,
    },
}

impl DeliveryError {
    /// Creates a serialization error.
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization { message: message.into() }
    }

    /// Creates a network error from a message.
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network { message: message.into() }
    }

    /// Creates a timeout error.
    pub fn timeout(timeout_ms: u64) -> Self {
        Self::Timeout { timeout_ms }
    }

    /// Creates a client error from an HTTP response.
    pub fn client_error(status_code: u16, body: impl Into<String>) -> Self {
        Self::ClientError { status_code, body: body.into() }
    }

    /// Creates a server error from an HTTP response.
    pub fn server_error(status_code: u16, body: impl Into<String>) -> Self {
        Self::ServerError { status_code, body: body.into() }
    }

    /// Creates a rate limit error with retry guidance.
    pub fn rate_limited(retry_after_seconds: u64) -> Self {
        Self::RateLimited { retry_after_seconds }
    }

    /// Creates a retries exhausted error.
    pub fn retries_exhausted(attempts: u32, last_error: impl Into<String>) -> Self {
        Self::RetriesExhausted { attempts, last_error: last_error.into() }
    }

    /// Creates a double-failure error.
    pub fn dead_letter_failed(primary: impl Into<String>, dead_letter: impl Into<String>) -> Self {
        Self::DeadLetterFailed { primary: primary.into(), dead_letter: dead_letter.into() }
    }

    /// Creates a closed-transport error.
    pub fn closed(destination: impl Into<String>) -> Self {
        Self::Closed { destination: destination.into() }
    }

    /// Creates a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration { message: message.into() }
    }

    /// Determines if a single failed attempt should be tried again.
    ///
    /// Returns `true` for network errors, timeouts, server errors (5xx) and
    /// rate limits.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network { .. }
            | Self::Timeout { .. }
            | Self::ServerError { .. }
            | Self::RateLimited { .. } => true,

            Self::Serialization { .. }
            | Self::ClientError { .. }
            | Self::RetriesExhausted { .. }
            | Self::DeadLetterFailed { .. }
            | Self::Closed { .. }
            | Self::Configuration { .. } => false,
        }
    }

    /// Returns the server-requested delay for rate limits.
    pub fn retry_after_seconds(&self) -> Option<u64> {
        match self {
            Self::RateLimited { retry_after_seconds } => Some(*retry_after_seconds),
            _ => None,
        }
    }

    /// Category for log fields.
    pub fn category(&self) -> ErrorCategory {
        ErrorCategory::from(self)
    }
}

/// Category of delivery error for logs and monitoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Encoding failures.
    Serialization,
    /// Network connectivity issues and timeouts.
    Network,
    /// Rejections by the log (4xx).
    Client,
    /// Log-side failures (5xx).
    Server,
    /// Rate limiting.
    RateLimit,
    /// Retry budget spent.
    Exhausted,
    /// Primary and dead-letter both failed.
    DeadLetter,
    /// Transport already closed.
    Closed,
    /// Configuration problems.
    Configuration,
}

impl From<&DeliveryError> for ErrorCategory {
    fn from(error: &DeliveryError) -> Self {
        match error {
            DeliveryError::Serialization { .. } => Self::Serialization,
            DeliveryError::Network { .. } | DeliveryError::Timeout { .. } => Self::Network,
            DeliveryError::ClientError { .. } => Self::Client,
            DeliveryError::ServerError { .. } => Self::Server,
            DeliveryError::RateLimited { .. } => Self::RateLimit,
            DeliveryError::RetriesExhausted { .. } => Self::Exhausted,
            DeliveryError::DeadLetterFailed { .. } => Self::DeadLetter,
            DeliveryError::Closed { .. } => Self::Closed,
            DeliveryError::Configuration { .. } => Self::Configuration,
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Serialization => write!(f, "serialization"),
            Self::Network => write!(f, "network"),
            Self::Client => write!(f, "client"),
            Self::Server => write!(f, "server"),
            Self::RateLimit => write!(f, "rate_limit"),
            Self::Exhausted => write!(f, "exhausted"),
            Self::DeadLetter => write!(f, "dead_letter"),
            Self::Closed => write!(f, "closed"),
            Self::Configuration => write!(f, "configuration"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_errors_identified_correctly() {
        assert!(DeliveryError::network("connection refused").is_retryable());
        assert!(DeliveryError::timeout(10_000).is_retryable());
        assert!(DeliveryError::server_error(503, "unavailable").is_retryable());
        assert!(DeliveryError::rate_limited(1).is_retryable());

        assert!(!DeliveryError::client_error(400, "bad record").is_retryable());
        assert!(!DeliveryError::serialization("bad float").is_retryable());
        assert!(!DeliveryError::retries_exhausted(3, "timeout").is_retryable());
        assert!(!DeliveryError::closed("events").is_retryable());
        assert!(!DeliveryError::dead_letter_failed("a", "b").is_retryable());
    }

    #[test]
    fn rate_limit_retry_after_extracted() {
        assert_eq!(DeliveryError::rate_limited(7).retry_after_seconds(), Some(7));
        assert_eq!(DeliveryError::timeout(100).retry_after_seconds(), None);
    }

    #[test]
    fn categories_render_as_snake_case() {
        assert_eq!(DeliveryError::network("x").category().to_string(), "network");
        assert_eq!(DeliveryError::rate_limited(1).category().to_string(), "rate_limit");
        assert_eq!(DeliveryError::dead_letter_failed("a", "b").category().to_string(), "dead_letter");
    }

    #[test]
    fn exhausted_error_carries_last_failure() {
        let error = DeliveryError::retries_exhausted(3, DeliveryError::server_error(500, "").to_string());
        assert_eq!(error.to_string(), "write failed after 3 attempts: server error: HTTP 500");
    }
}
