use thiserror::Error;

/// Raised when an envelope is built without its mandatory fields.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EnvelopeError {
    #[error("Missing required envelope field: {0}")]
    MissingField(&'static str),
}

/// Errors that can occur when publishing to or consuming from the log.
#[derive(Debug, Error)]
pub enum EventLogError {
    /// The envelope violated the wire contract.
    #[error("Invalid envelope: {0}")]
    Envelope(#[from] EnvelopeError),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The transport refused the record.
    #[error("Transport unavailable: {0}")]
    Unavailable(String),

    /// A consumer worker task died before finishing its partition.
    #[error("Consumer worker failed: {0}")]
    Worker(String),
}

/// Result type for event log operations.
pub type Result<T> = std::result::Result<T, EventLogError>;
