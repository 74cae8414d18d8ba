//! Projection error types.

use thiserror::Error;

/// Errors that can occur during projection processing.
#[derive(Debug, Error)]
pub enum ProjectionError {
    /// The payload does not match the schema of its event type.
    #[error("Malformed {event_type} payload: {source}")]
    MalformedPayload {
        event_type: String,
        source: serde_json::Error,
    },

    /// Reading the log during a rebuild failed.
    #[error("Event log error: {0}")]
    EventLog(#[from] event_log::EventLogError),

    /// The view store rejected a write.
    #[error("View store error: {0}")]
    Store(String),
}

/// Result type for projection operations.
pub type Result<T> = std::result::Result<T, ProjectionError>;
