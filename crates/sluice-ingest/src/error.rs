//! Error types for admission, the worker pool and bulk import.

use thiserror::Error;

/// Result type alias for ingestion operations.
pub type Result<T> = std::result::Result<T, IngestError>;

/// Why an event was not admitted.
///
/// Both variants are resolved synchronously at admission; the caller decides
/// how to report them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AdmitError {
    /// The queue is at capacity.
    #[error("ingestion queue is full")]
    QueueFull,

    /// Shutdown has begun and admission is closed.
    #[error("ingestion service is shutting down")]
    Closed,
}

/// Errors from starting, stopping or running ingestion.
#[derive(Debug, Error)]
pub enum IngestError {
    /// Invalid service or import configuration.
    #[error("invalid configuration: {message}")]
    Configuration {
        /// Configuration error message
        message: String,
    },

    /// A worker task panicked.
    #[error("worker {worker_id} panicked: {error}")]
    WorkerPanic {
        /// Index of the worker that panicked
        worker_id: usize,
        /// Panic or join error description
        error: String,
    },

    /// Bulk import failed.
    #[error("import failed: {message}")]
    Import {
        /// Description of the failure
        message: String,
    },

    /// File or state I/O failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The CSV reader failed.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

impl IngestError {
    /// Creates a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration { message: message.into() }
    }

    /// Creates an import error.
    pub fn import(message: impl Into<String>) -> Self {
        Self::Import { message: message.into() }
    }
}
