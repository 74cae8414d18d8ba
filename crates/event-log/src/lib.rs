//! Wire contract and transport for the order fulfillment saga.
//!
//! Every service speaks [`EventEnvelope`] over per-domain topics named by
//! [`Topics`]. Records are partitioned by order id, so a consumer worker
//! sees all events of one order in the order they were appended.

pub mod consumer;
pub mod envelope;
pub mod error;
pub mod event_type;
pub mod memory;
pub mod publisher;
pub mod retry;
pub mod topic;

pub use common::OrderId;
pub use consumer::{ConsumeStats, Consumer, EventHandler};
pub use envelope::{EventEnvelope, EventEnvelopeBuilder, EventId};
pub use error::{EnvelopeError, EventLogError, Result};
pub use event_type::EventType;
pub use memory::{InMemoryEventLog, Record};
pub use publisher::{EventPublisher, RecordPosition};
pub use retry::{RetryConfig, retry_with_backoff};
pub use topic::{EventDomain, Topics, dead_letter_topic};

/// Producer identity of the order service.
pub const ORDER_SERVICE: &str = "order-service";
/// Producer identity of the inventory service.
pub const INVENTORY_SERVICE: &str = "inventory-service";
/// Producer identity of the payment service.
pub const PAYMENT_SERVICE: &str = "payment-service";
/// Producer identity of the delivery service.
pub const DELIVERY_SERVICE: &str = "delivery-service";
