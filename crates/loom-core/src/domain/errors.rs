//! Error types and their classification.
//!
//! - business failures: [`ActivityError`], returned by user handlers
//! - infrastructure failures: [`StoreError`] / [`EngineError`] with a
//!   non-fatal [`ErrorKind`], retried by recoverable actions
//! - fatal failures: [`ErrorKind::Fatal`], never retried

use thiserror::Error;

use super::ids::JobId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Likely to succeed if retried.
    Transient,
    /// Retrying will not help (bad input, missing record).
    Permanent,
    /// Storage or coordination failure.
    Infrastructure,
    /// The process should stop.
    Fatal,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("job not found: {0}")]
    NotFound(JobId),

    #[error("store failed irrecoverably: {0}")]
    Fatal(String),
}

impl StoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            StoreError::Unavailable(_) => ErrorKind::Infrastructure,
            StoreError::NotFound(_) => ErrorKind::Permanent,
            StoreError::Fatal(_) => ErrorKind::Fatal,
        }
    }
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("queue read superseded by a newer reader")]
    QueueWaiterSuperseded,

    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("fatal: {0}")]
    Fatal(String),

    #[error("{0}")]
    Internal(String),
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::Store(e) => e.kind(),
            EngineError::QueueWaiterSuperseded => ErrorKind::Transient,
            EngineError::InvalidConfiguration(_) => ErrorKind::Permanent,
            EngineError::Fatal(_) => ErrorKind::Fatal,
            EngineError::Internal(_) => ErrorKind::Transient,
        }
    }

    pub fn is_fatal(&self) -> bool {
        self.kind() == ErrorKind::Fatal
    }
}

/// Failure reported by user work. Handled by the error handling policy.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct ActivityError {
    message: String,
}

impl ActivityError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<String> for ActivityError {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

impl From<&str> for ActivityError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

impl From<serde_json::Error> for ActivityError {
    fn from(e: serde_json::Error) -> Self {
        Self::new(format!("json decode: {e}"))
    }
}
