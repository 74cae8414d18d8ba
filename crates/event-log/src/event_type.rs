use serde::{Deserialize, Serialize};

use crate::topic::EventDomain;

/// Every event type exchanged by the saga.
///
/// The wire form is the `domain.action` string returned by [`EventType::as_str`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    #[serde(rename = "order.created")]
    OrderCreated,
    #[serde(rename = "inventory.reserved")]
    InventoryReserved,
    #[serde(rename = "inventory.rejected")]
    InventoryRejected,
    #[serde(rename = "payment.authorized")]
    PaymentAuthorized,
    #[serde(rename = "payment.failed")]
    PaymentFailed,
    #[serde(rename = "delivery.assigned")]
    DeliveryAssigned,
    #[serde(rename = "eta.updated")]
    EtaUpdated,
}

impl EventType {
    pub const ALL: [EventType; 7] = [
        EventType::OrderCreated,
        EventType::InventoryReserved,
        EventType::InventoryRejected,
        EventType::PaymentAuthorized,
        EventType::PaymentFailed,
        EventType::DeliveryAssigned,
        EventType::EtaUpdated,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::OrderCreated => "order.created",
            EventType::InventoryReserved => "inventory.reserved",
            EventType::InventoryRejected => "inventory.rejected",
            EventType::PaymentAuthorized => "payment.authorized",
            EventType::PaymentFailed => "payment.failed",
            EventType::DeliveryAssigned => "delivery.assigned",
            EventType::EtaUpdated => "eta.updated",
        }
    }

    /// Parses a wire string. Unknown types yield `None` so consumers can
    /// drop them without failing.
    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_str() == value)
    }

    /// The domain whose topic carries this event.
    pub fn domain(&self) -> EventDomain {
        match self {
            EventType::OrderCreated => EventDomain::Order,
            EventType::InventoryReserved | EventType::InventoryRejected => EventDomain::Inventory,
            EventType::PaymentAuthorized | EventType::PaymentFailed => EventDomain::Payment,
            EventType::DeliveryAssigned | EventType::EtaUpdated => EventDomain::Delivery,
        }
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<EventType> for String {
    fn from(event_type: EventType) -> Self {
        event_type.as_str().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_recognizes_every_wire_name() {
        for event_type in EventType::ALL {
            assert_eq!(EventType::parse(event_type.as_str()), Some(event_type));
        }
    }

    #[test]
    fn parse_rejects_unknown_types() {
        assert_eq!(EventType::parse("order.shipped"), None);
        assert_eq!(EventType::parse(""), None);
    }

    #[test]
    fn eta_updates_travel_on_the_delivery_topic() {
        assert_eq!(EventType::EtaUpdated.domain(), EventDomain::Delivery);
        assert_eq!(EventType::InventoryRejected.domain(), EventDomain::Inventory);
    }

    #[test]
    fn serde_uses_wire_names() {
        let json = serde_json::to_string(&EventType::PaymentAuthorized).unwrap();
        assert_eq!(json, "\"payment.authorized\"");
    }
}
