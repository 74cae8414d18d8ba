//! The four participants of the fulfillment choreography.
//!
//! Each service persists its own decision and announces it only after the
//! transaction commits. Redelivered triggers are absorbed by a pre-existence
//! check against the service's own table.

pub mod delivery;
pub mod inventory;
pub mod order;
pub mod payment;

pub use delivery::{AssignmentOutcome, DeliveryAssigner, DriverDispatch, SimulatedDispatch, DRIVER_ROSTER};
pub use inventory::{InventoryReserver, ReservationOutcome, SimulatedStockCheck, StockCheck};
pub use order::{NewOrder, NewOrderItem, OrderOriginator};
pub use payment::{
    DuplicateLayer, GatewayOutcome, PaymentGateway, PaymentOutcome, PaymentProcessor,
    PaymentRequest, SimulatedGateway,
};

use std::sync::Arc;

use common::OrderId;
use domain::{StoreTransaction, TransactionScope};
use event_log::{EventEnvelope, EventPublisher, EventType};
use serde::Serialize;

use crate::error::{Result, SagaError};

/// Builds an outbound envelope for `order_id`.
pub(crate) fn envelope<P: Serialize>(
    event_type: EventType,
    order_id: &OrderId,
    correlation_id: &str,
    producer: &str,
    payload: &P,
) -> Result<EventEnvelope> {
    Ok(EventEnvelope::builder()
        .event_type(event_type)
        .order_id(order_id.clone())
        .correlation_id(correlation_id)
        .producer(producer)
        .payload(payload)?
        .build()?)
}

/// Decodes the payload of an inbound envelope.
pub(crate) fn decode<T: serde::de::DeserializeOwned>(envelope: &EventEnvelope) -> Result<T> {
    envelope
        .payload_as()
        .map_err(|source| SagaError::MalformedPayload {
            event_type: envelope.event_type.clone(),
            source,
        })
}

/// Why a listener let an event pass without acting on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Ignored {
    /// The `eventType` is not one of the saga's event types.
    UnknownType,
    /// A known type this listener does not react to.
    Unrelated,
}

/// Acknowledges an event the listener does not handle. Unknown types are
/// dropped rather than retried.
pub(crate) fn ignore(envelope: &EventEnvelope) -> Ignored {
    match envelope.kind() {
        None => {
            tracing::warn!(
                event_type = %envelope.event_type,
                event_id = %envelope.event_id,
                order_id = %envelope.order_id,
                "dropping event of unknown type"
            );
            Ignored::UnknownType
        }
        Some(_) => {
            tracing::debug!(event_type = %envelope.event_type, "ignoring event");
            Ignored::Unrelated
        }
    }
}

/// Publishes `envelope` once `scope` commits.
///
/// A publish failure at that point cannot undo the commit; it is logged and
/// counted.
pub(crate) fn announce_after_commit<T: StoreTransaction>(
    scope: &mut TransactionScope<T>,
    publisher: Arc<dyn EventPublisher>,
    topic: String,
    envelope: EventEnvelope,
) {
    scope.after_commit(move || async move {
        match publisher.publish(&topic, &envelope).await {
            Ok(position) => tracing::debug!(
                event_type = %envelope.event_type,
                order_id = %envelope.order_id,
                partition = position.partition,
                offset = position.offset,
                "event announced"
            ),
            Err(err) => {
                metrics::counter!("events_publish_failed_total", "topic" => topic.clone())
                    .increment(1);
                tracing::error!(
                    error = %err,
                    topic = %topic,
                    event_id = %envelope.event_id,
                    order_id = %envelope.order_id,
                    "failed to publish event after commit"
                );
            }
        }
    });
}
