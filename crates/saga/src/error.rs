//! Saga error types.

use std::time::Duration;

use common::OrderId;
use domain::{DeliveryError, OrderError, PaymentError, StoreError};
use event_log::{EnvelopeError, EventLogError};
use thiserror::Error;

use crate::lock::LockError;

/// Errors that can occur while a service handles a command or an event.
///
/// Business outcomes (rejections, declines, duplicates) are never errors;
/// anything returned here makes the transport redeliver the event.
#[derive(Debug, Error)]
pub enum SagaError {
    /// Another worker holds the order's lock. Retry later.
    #[error("Timed out after {waited:?} waiting for the lock on order {order_id}")]
    LockTimeout { order_id: OrderId, waited: Duration },

    #[error("Lock registry error: {0}")]
    Lock(#[from] LockError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Order error: {0}")]
    Order(#[from] OrderError),

    #[error("Payment error: {0}")]
    Payment(#[from] PaymentError),

    #[error("Delivery error: {0}")]
    Delivery(#[from] DeliveryError),

    #[error("Envelope error: {0}")]
    Envelope(#[from] EnvelopeError),

    #[error("Event log error: {0}")]
    EventLog(#[from] EventLogError),

    /// The payload does not match the schema of its event type.
    #[error("Malformed {event_type} payload: {source}")]
    MalformedPayload {
        event_type: String,
        source: serde_json::Error,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl SagaError {
    /// Failures that leave no partial state and resolve on their own.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SagaError::LockTimeout { .. } | SagaError::Lock(_) | SagaError::EventLog(_)
        )
    }
}

/// Convenience type alias for saga results.
pub type Result<T> = std::result::Result<T, SagaError>;
