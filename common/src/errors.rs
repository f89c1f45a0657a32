// Error handling framework

use thiserror::Error;

/// Schedule-configuration errors
#[derive(Error, Debug)]
pub enum ScheduleError {
    #[error("Invalid interval '{value}': {reason}")]
    InvalidInterval { value: String, reason: String },

    #[error("Event '{event}' of entity type '{entity_type}' cannot use the indefinite interval")]
    IndefiniteEventInterval { entity_type: String, event: String },

    #[error("Invalid schedule document: {0}")]
    InvalidDocument(String),
}

/// Datastore errors
#[derive(Error, Debug)]
pub enum DatastoreError {
    #[error("Datastore connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Datastore health check failed: {0}")]
    HealthCheckFailed(String),

    #[error("Query execution failed: {0}")]
    QueryFailed(String),

    #[error("Malformed entity record for '{entity_key}': {reason}")]
    MalformedRecord { entity_key: String, reason: String },
}

impl From<sqlx::Error> for DatastoreError {
    fn from(err: sqlx::Error) -> Self {
        DatastoreError::QueryFailed(err.to_string())
    }
}

/// Queue-related errors
#[derive(Error, Debug)]
pub enum QueueError {
    #[error("Failed to connect to queue: {0}")]
    Connection(String),

    #[error("Failed to create stream: {0}")]
    StreamCreation(String),

    #[error("Failed to publish message: {0}")]
    PublishFailed(String),

    #[error("Message serialization failed: {0}")]
    SerializationFailed(String),

    #[error("Queue operation timeout: {0}")]
    Timeout(String),
}
