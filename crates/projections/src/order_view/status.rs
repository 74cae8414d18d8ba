use event_log::EventType;
use serde::{Deserialize, Serialize};

/// Status shown on the order view.
///
/// Extends the order's own lifecycle with the delivery stage, which only
/// the read side tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ViewStatus {
    #[default]
    Created,
    InventoryReserved,
    InventoryRejected,
    PaymentAuthorized,
    PaymentFailed,
    DeliveryAssigned,
}

impl ViewStatus {
    pub const ALL: [ViewStatus; 6] = [
        ViewStatus::Created,
        ViewStatus::InventoryReserved,
        ViewStatus::InventoryRejected,
        ViewStatus::PaymentAuthorized,
        ViewStatus::PaymentFailed,
        ViewStatus::DeliveryAssigned,
    ];

    /// Status an event moves the view to. `eta.updated` leaves it alone.
    pub fn for_event(event_type: EventType) -> Option<Self> {
        match event_type {
            EventType::OrderCreated => Some(ViewStatus::Created),
            EventType::InventoryReserved => Some(ViewStatus::InventoryReserved),
            EventType::InventoryRejected => Some(ViewStatus::InventoryRejected),
            EventType::PaymentAuthorized => Some(ViewStatus::PaymentAuthorized),
            EventType::PaymentFailed => Some(ViewStatus::PaymentFailed),
            EventType::DeliveryAssigned => Some(ViewStatus::DeliveryAssigned),
            EventType::EtaUpdated => None,
        }
    }

    /// Position along the saga. A view never moves to a lower rank.
    pub fn rank(&self) -> u8 {
        match self {
            ViewStatus::Created => 0,
            ViewStatus::InventoryReserved | ViewStatus::InventoryRejected => 1,
            ViewStatus::PaymentAuthorized | ViewStatus::PaymentFailed => 2,
            ViewStatus::DeliveryAssigned => 3,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ViewStatus::Created => "CREATED",
            ViewStatus::InventoryReserved => "INVENTORY_RESERVED",
            ViewStatus::InventoryRejected => "INVENTORY_REJECTED",
            ViewStatus::PaymentAuthorized => "PAYMENT_AUTHORIZED",
            ViewStatus::PaymentFailed => "PAYMENT_FAILED",
            ViewStatus::DeliveryAssigned => "DELIVERY_ASSIGNED",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|status| status.as_str() == value)
    }
}

impl std::fmt::Display for ViewStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
