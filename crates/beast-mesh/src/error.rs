//! Error types for coordination bus operations

use thiserror::Error;

/// Result type for bus and coordinator operations
pub type MeshResult<T> = Result<T, MeshError>;

/// Errors that can occur while talking to the coordination bus
#[derive(Error, Debug)]
pub enum MeshError {
    /// Connection to the bus failed or the bus is unreachable
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Failed to publish a message
    #[error("Publish failed: {0}")]
    PublishFailed(String),

    /// Failed to receive a message
    #[error("Receive failed: {0}")]
    ReceiveFailed(String),

    /// Failed to subscribe to the topic
    #[error("Subscribe failed: {0}")]
    SubscribeFailed(String),

    /// Message serialization failed
    #[error("Serialization failed: {0}")]
    SerializationFailed(String),

    /// Message deserialization failed
    #[error("Deserialization failed: {0}")]
    DeserializationFailed(String),

    /// Operation timed out
    #[error("Operation timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Coordinator is not running (never started, draining or stopped)
    #[error("Coordinator not running: {0}")]
    NotRunning(String),

    /// Backend-specific error (Redis, etc.)
    #[error("Backend error: {0}")]
    BackendError(String),
}

#[cfg(feature = "redis")]
impl From<redis::RedisError> for MeshError {
    fn from(err: redis::RedisError) -> Self {
        MeshError::BackendError(err.to_string())
    }
}

impl From<serde_json::Error> for MeshError {
    fn from(err: serde_json::Error) -> Self {
        MeshError::SerializationFailed(err.to_string())
    }
}
