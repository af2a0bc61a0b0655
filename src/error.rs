//! Error types for queue operations.

use crate::task::TaskStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type used throughout the crate.
pub type QueueResult<T> = Result<T, QueueError>;

/// Main error type for queue operations.
#[derive(Error, Debug)]
pub enum QueueError {
    /// Enqueue payload failed validation (unknown type tag or missing fields)
    #[error("invalid task payload: {message}")]
    InvalidPayload {
        /// What was wrong with the payload
        message: String,
    },

    /// Priority outside the 1-10 range
    #[error("invalid priority {value}, expected 1..=10")]
    InvalidPriority {
        /// The rejected value
        value: u8,
    },

    /// A lifecycle transition was attempted from a state that does not allow it
    #[error("cannot {op} a task in status {from}")]
    InvalidTransition {
        /// Status the task was in
        from: TaskStatus,
        /// The attempted operation
        op: &'static str,
    },

    /// A pending retry was popped before its backoff elapsed
    #[error("task is not due until {until}")]
    NotYetDue {
        /// Earliest time the task may be started
        until: DateTime<Utc>,
    },

    /// No task with the given id (or not visible to the calling owner)
    #[error("task '{task_id}' not found")]
    NotFound {
        /// The id that was looked up
        task_id: String,
    },

    /// A task handler reported a failure
    #[error("handler failed: {0}")]
    Handler(#[from] HandlerError),

    /// The priority index backend is unreachable; enqueue/dequeue fail fast
    #[error("priority index unavailable: {message}")]
    IndexUnavailable {
        /// Error message
        message: String,
        /// Optional underlying error
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Task record store error
    #[error("task store error: {message}")]
    Store {
        /// Error message
        message: String,
        /// Optional underlying error
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Serialization/deserialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration error (missing handler registration, bad settings)
    #[error("configuration error: {message}")]
    Config {
        /// Error message
        message: String,
    },

    /// Redis index error
    #[cfg(feature = "redis-index")]
    #[cfg_attr(docsrs, doc(cfg(feature = "redis-index")))]
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
}

impl QueueError {
    /// Create an index-unavailable error with an underlying cause.
    pub fn index<E>(message: impl Into<String>, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::IndexUnavailable {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a store error with an underlying cause.
    pub fn store<E>(message: impl Into<String>, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Store {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create a not-found error.
    pub fn not_found(task_id: impl Into<String>) -> Self {
        Self::NotFound {
            task_id: task_id.into(),
        }
    }
}

/// Structured failure surfaced by a task handler.
///
/// Handlers are opaque to the core: whatever they raise is captured here,
/// stored on the task record verbatim, and retried up to the attempt budget.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[error("[{code}] {message}")]
pub struct HandlerError {
    /// Human-readable failure message.
    pub message: String,
    /// Machine-readable code, e.g. `HANDLER_ERROR`, `PANIC`, `WORKER_STOPPED`.
    pub code: String,
    /// Optional backtrace or upstream error detail.
    pub trace: Option<String>,
}

impl HandlerError {
    /// Generic handler failure.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: "HANDLER_ERROR".to_string(),
            trace: None,
        }
    }

    /// Handler failure with a specific code.
    pub fn with_code(message: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: code.into(),
            trace: None,
        }
    }

    /// Attach trace detail.
    pub fn trace(mut self, trace: impl Into<String>) -> Self {
        self.trace = Some(trace.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_transition_message() {
        let err = QueueError::InvalidTransition {
            from: TaskStatus::Processing,
            op: "cancel",
        };
        assert_eq!(err.to_string(), "cannot cancel a task in status PROCESSING");
    }

    #[test]
    fn handler_error_display() {
        let err = HandlerError::with_code("rate limited", "HTTP_429");
        assert_eq!(err.to_string(), "[HTTP_429] rate limited");
    }
}
