use chrono::{DateTime, Utc};
use common::OrderId;
use domain::{
    CustomerId, DeliveryPayload, Money, OrderCreatedPayload, PaymentPayload, ReservationPayload,
};
use event_log::{EventEnvelope, EventType};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::ViewStatus;
use crate::{ProjectionError, Result};

/// Which event last set the ETA. At equal timestamps a revision beats the
/// initial estimate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum EtaSource {
    Assignment,
    Revision,
}

/// The field updates one event contributes to an order's view.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderViewPatch {
    pub order_id: OrderId,
    pub event_type: EventType,
    pub occurred_at: DateTime<Utc>,
    pub customer_id: Option<CustomerId>,
    pub total_amount: Option<Money>,
    pub currency: Option<String>,
    pub status: Option<ViewStatus>,
    pub payment_id: Option<i64>,
    pub delivery_id: Option<String>,
    pub driver_name: Option<String>,
    pub estimated_delivery_time: Option<(DateTime<Utc>, EtaSource)>,
}

impl OrderViewPatch {
    fn empty(envelope: &EventEnvelope, event_type: EventType) -> Self {
        Self {
            order_id: envelope.order_id.clone(),
            event_type,
            occurred_at: envelope.occurred_at,
            customer_id: None,
            total_amount: None,
            currency: None,
            status: ViewStatus::for_event(event_type),
            payment_id: None,
            delivery_id: None,
            driver_name: None,
            estimated_delivery_time: None,
        }
    }

    /// Translates an envelope into a patch. `None` for event types the
    /// view does not track.
    pub fn from_envelope(envelope: &EventEnvelope) -> Result<Option<Self>> {
        let Some(event_type) = envelope.kind() else {
            return Ok(None);
        };
        let mut patch = Self::empty(envelope, event_type);

        match event_type {
            EventType::OrderCreated => {
                let created: OrderCreatedPayload = decode(envelope)?;
                patch.customer_id = Some(created.customer_id);
                patch.total_amount = Some(created.total_amount);
                patch.currency = Some(created.currency);
            }
            EventType::InventoryReserved | EventType::InventoryRejected => {
                // Validated for shape only; the view takes nothing from it.
                let _: ReservationPayload = decode(envelope)?;
            }
            EventType::PaymentAuthorized => {
                let payment: PaymentPayload = decode(envelope)?;
                patch.payment_id = payment.payment_id;
            }
            EventType::PaymentFailed => {
                let _: PaymentPayload = decode(envelope)?;
            }
            EventType::DeliveryAssigned => {
                let delivery: DeliveryPayload = decode(envelope)?;
                patch.delivery_id = Some(delivery.delivery_id);
                patch.driver_name = Some(delivery.driver_name);
                patch.estimated_delivery_time =
                    Some((delivery.estimated_delivery_time, EtaSource::Assignment));
            }
            EventType::EtaUpdated => {
                let delivery: DeliveryPayload = decode(envelope)?;
                patch.estimated_delivery_time =
                    Some((delivery.estimated_delivery_time, EtaSource::Revision));
            }
        }
        Ok(Some(patch))
    }
}

fn decode<T: DeserializeOwned>(envelope: &EventEnvelope) -> Result<T> {
    envelope
        .payload_as()
        .map_err(|source| ProjectionError::MalformedPayload {
            event_type: envelope.event_type.clone(),
            source,
        })
}

/// Denormalized, eventually consistent summary of one order.
///
/// Fields merge independently, so the view converges to the same values
/// whatever order the events arrive in:
/// - customer, total and currency fill in whenever an `order.created` arrives
/// - status only moves forward along the saga; within a stage the later event wins
/// - the ETA follows the latest estimate by occurrence time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderView {
    pub order_id: OrderId,
    pub customer_id: Option<CustomerId>,
    pub total_amount: Option<Money>,
    pub currency: Option<String>,
    pub status: ViewStatus,
    pub payment_id: Option<i64>,
    pub delivery_id: Option<String>,
    pub driver_name: Option<String>,
    pub estimated_delivery_time: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip)]
    status_as_of: Option<DateTime<Utc>>,
    #[serde(skip)]
    eta_as_of: Option<(DateTime<Utc>, EtaSource)>,
}

impl OrderView {
    /// A placeholder for an order whose creation event has not arrived yet.
    pub fn partial(order_id: OrderId) -> Self {
        let now = Utc::now();
        Self {
            order_id,
            customer_id: None,
            total_amount: None,
            currency: None,
            status: ViewStatus::Created,
            payment_id: None,
            delivery_id: None,
            driver_name: None,
            estimated_delivery_time: None,
            created_at: now,
            updated_at: now,
            status_as_of: None,
            eta_as_of: None,
        }
    }

    /// Whether `order.created` has been folded in.
    pub fn is_partial(&self) -> bool {
        self.customer_id.is_none()
    }

    /// Folds `patch` in field by field.
    pub fn apply(&mut self, patch: &OrderViewPatch) {
        if let Some(customer_id) = &patch.customer_id {
            self.customer_id = Some(customer_id.clone());
        }
        if let Some(total_amount) = patch.total_amount {
            self.total_amount = Some(total_amount);
        }
        if let Some(currency) = &patch.currency {
            self.currency = Some(currency.clone());
        }
        if patch.event_type == EventType::OrderCreated {
            self.created_at = patch.occurred_at;
        }

        if let Some(status) = patch.status
            && self.advances_status(status, patch.occurred_at)
        {
            self.status = status;
            self.status_as_of = Some(patch.occurred_at);
        }

        if let Some(payment_id) = patch.payment_id {
            self.payment_id = Some(payment_id);
        }
        if let Some(delivery_id) = &patch.delivery_id {
            self.delivery_id = Some(delivery_id.clone());
        }
        if let Some(driver_name) = &patch.driver_name {
            self.driver_name = Some(driver_name.clone());
        }

        if let Some((eta, source)) = patch.estimated_delivery_time {
            let stamp = (patch.occurred_at, source);
            if self.eta_as_of.is_none_or(|current| stamp >= current) {
                self.estimated_delivery_time = Some(eta);
                self.eta_as_of = Some(stamp);
            }
        }

        self.updated_at = Utc::now();
    }

    fn advances_status(&self, next: ViewStatus, occurred_at: DateTime<Utc>) -> bool {
        let Some(as_of) = self.status_as_of else {
            return true;
        };
        (next.rank(), occurred_at) > (self.status.rank(), as_of)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use std::str::FromStr;

    fn patch(event_type: EventType, occurred_at: DateTime<Utc>) -> OrderViewPatch {
        OrderViewPatch {
            order_id: OrderId::from("ord-1"),
            event_type,
            occurred_at,
            customer_id: None,
            total_amount: None,
            currency: None,
            status: ViewStatus::for_event(event_type),
            payment_id: None,
            delivery_id: None,
            driver_name: None,
            estimated_delivery_time: None,
        }
    }

    fn created(at: DateTime<Utc>) -> OrderViewPatch {
        OrderViewPatch {
            customer_id: Some(CustomerId::new("cust-1")),
            total_amount: Some(Money::from_str("50.00").unwrap()),
            currency: Some("USD".into()),
            ..patch(EventType::OrderCreated, at)
        }
    }

    #[test]
    fn test_late_creation_fills_fields_without_reverting_status() {
        let t0 = Utc::now();
        let mut view = OrderView::partial(OrderId::from("ord-1"));

        view.apply(&OrderViewPatch {
            delivery_id: Some("DEL-1".into()),
            driver_name: Some("Sam Patel".into()),
            estimated_delivery_time: Some((t0 + Duration::minutes(45), EtaSource::Assignment)),
            ..patch(EventType::DeliveryAssigned, t0 + Duration::seconds(3))
        });
        assert!(view.is_partial());
        assert_eq!(view.status, ViewStatus::DeliveryAssigned);

        view.apply(&created(t0));
        assert!(!view.is_partial());
        assert_eq!(view.status, ViewStatus::DeliveryAssigned);
        assert_eq!(view.customer_id, Some(CustomerId::new("cust-1")));
        assert_eq!(view.total_amount, Some(Money::from_str("50.00").unwrap()));
        assert_eq!(view.currency.as_deref(), Some("USD"));
        assert_eq!(view.created_at, t0);
        assert_eq!(view.delivery_id.as_deref(), Some("DEL-1"));
    }

    #[test]
    fn test_status_never_regresses() {
        let t0 = Utc::now();
        let mut view = OrderView::partial(OrderId::from("ord-1"));

        view.apply(&patch(EventType::PaymentAuthorized, t0 + Duration::seconds(2)));
        view.apply(&patch(EventType::InventoryReserved, t0 + Duration::seconds(1)));
        assert_eq!(view.status, ViewStatus::PaymentAuthorized);
    }

    #[test]
    fn test_replayed_event_is_idempotent() {
        let t0 = Utc::now();
        let mut view = OrderView::partial(OrderId::from("ord-1"));
        let reserved = patch(EventType::InventoryReserved, t0);

        view.apply(&created(t0));
        view.apply(&reserved);
        let once = view.clone();
        view.apply(&reserved);
        view.apply(&created(t0));

        assert_eq!(view.status, once.status);
        assert_eq!(view.total_amount, once.total_amount);
        assert_eq!(view.created_at, once.created_at);
    }

    #[test]
    fn test_revision_wins_over_assignment_regardless_of_arrival() {
        let t0 = Utc::now();
        let initial = t0 + Duration::minutes(40);
        let revised = t0 + Duration::minutes(47);

        let assigned = OrderViewPatch {
            delivery_id: Some("DEL-1".into()),
            driver_name: Some("Taylor Kim".into()),
            estimated_delivery_time: Some((initial, EtaSource::Assignment)),
            ..patch(EventType::DeliveryAssigned, t0)
        };
        let eta = OrderViewPatch {
            estimated_delivery_time: Some((revised, EtaSource::Revision)),
            ..patch(EventType::EtaUpdated, t0)
        };

        let mut in_order = OrderView::partial(OrderId::from("ord-1"));
        in_order.apply(&assigned);
        in_order.apply(&eta);

        let mut reversed = OrderView::partial(OrderId::from("ord-1"));
        reversed.apply(&eta);
        reversed.apply(&assigned);

        assert_eq!(in_order.estimated_delivery_time, Some(revised));
        assert_eq!(reversed.estimated_delivery_time, Some(revised));
        assert_eq!(reversed.status, ViewStatus::DeliveryAssigned);
    }

    #[test]
    fn test_failed_payment_attaches_no_payment_id() {
        let mut view = OrderView::partial(OrderId::from("ord-1"));
        view.apply(&patch(EventType::PaymentFailed, Utc::now()));
        assert_eq!(view.status, ViewStatus::PaymentFailed);
        assert_eq!(view.payment_id, None);
    }

    #[test]
    fn test_patch_from_unknown_event_type() {
        let envelope = EventEnvelope::builder()
            .event_type("order.cancelled")
            .order_id("ord-1")
            .build()
            .unwrap();
        assert_eq!(OrderViewPatch::from_envelope(&envelope).unwrap(), None);
    }

    #[test]
    fn test_patch_from_malformed_payload() {
        let envelope = EventEnvelope::builder()
            .event_type(EventType::DeliveryAssigned)
            .order_id("ord-1")
            .payload_raw(serde_json::json!({ "deliveryId": 5 }))
            .build()
            .unwrap();
        let err = OrderViewPatch::from_envelope(&envelope).unwrap_err();
        assert!(matches!(err, ProjectionError::MalformedPayload { .. }));
    }

    #[test]
    fn test_view_wire_format() {
        let mut view = OrderView::partial(OrderId::from("ord-1"));
        view.apply(&created(Utc::now()));
        let json = serde_json::to_value(&view).unwrap();
        assert_eq!(json["orderId"], "ord-1");
        assert_eq!(json["status"], "CREATED");
        assert_eq!(json["totalAmount"], "50.00");
        assert!(json.get("statusAsOf").is_none());
    }
}
