//! Error types for the alert engine
//!
//! Provides structured error handling for all processing operations.

use thiserror::Error;

/// Processing error types
#[derive(Debug, Error)]
pub enum ProcessorError {
    /// Redis connection or operation error
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// Database operation error
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// JSON serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Queue operation error
    #[error("Queue error: {0}")]
    Queue(String),

    /// Generic internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ProcessorError {
    /// Check if this error is retryable
    ///
    /// Transient errors (broken connections, timeouts) are retryable and the
    /// delivery is requeued. Permanent errors (undecodable payloads) are not;
    /// redelivering a poison message can never succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ProcessorError::Redis(_) | ProcessorError::Database(_) | ProcessorError::Queue(_)
        )
    }

    /// Create a queue error
    pub fn queue(details: impl Into<String>) -> Self {
        ProcessorError::Queue(details.into())
    }

    /// Create an internal error
    pub fn internal(details: impl Into<String>) -> Self {
        ProcessorError::Internal(details.into())
    }
}

impl From<shared::Error> for ProcessorError {
    fn from(e: shared::Error) -> Self {
        match e {
            shared::Error::Database(e) => ProcessorError::Database(e),
            other => ProcessorError::Internal(other.to_string()),
        }
    }
}

/// Convenience result type for processing operations
pub type ProcessorResult<T> = Result<T, ProcessorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_errors() {
        // Retryable errors
        assert!(ProcessorError::queue("connection lost").is_retryable());
        assert!(ProcessorError::Redis(redis::RedisError::from((
            redis::ErrorKind::IoError,
            "connection refused",
        )))
        .is_retryable());

        // Non-retryable errors
        assert!(!ProcessorError::internal("unknown").is_retryable());
    }

    #[test]
    fn test_serialization_error_is_permanent() {
        let json_err: serde_json::Error = serde_json::from_str::<String>("invalid").unwrap_err();
        let err: ProcessorError = json_err.into();
        assert!(!err.is_retryable());
        assert!(matches!(err, ProcessorError::Serialization(_)));
    }

    #[test]
    fn test_shared_database_error_stays_retryable() {
        let err: ProcessorError = shared::Error::Database(sqlx::Error::PoolTimedOut).into();
        assert!(err.is_retryable());
        assert!(matches!(err, ProcessorError::Database(_)));
    }
}
