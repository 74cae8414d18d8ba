//! Order status machine.

use event_log::EventType;
use serde::{Deserialize, Serialize};

/// Where an order stands in the fulfillment saga.
///
/// No single service owns the whole machine; each transition is announced
/// by the event of the service that performed it:
/// ```text
/// Created ──order.created──► (inventory service)
///    ├── inventory.reserved ──► InventoryReserved ──► (payment service)
///    │                              ├── payment.authorized ──► PaymentAuthorized
///    │                              └── payment.failed ──────► PaymentFailed      [terminal]
///    └── inventory.rejected ──► InventoryRejected                                 [terminal]
/// ```
/// Delivery assignment follows `PaymentAuthorized` without changing the
/// order status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    #[default]
    Created,
    InventoryReserved,
    InventoryRejected,
    PaymentAuthorized,
    PaymentFailed,
}

impl OrderStatus {
    pub const ALL: [OrderStatus; 5] = [
        OrderStatus::Created,
        OrderStatus::InventoryReserved,
        OrderStatus::InventoryRejected,
        OrderStatus::PaymentAuthorized,
        OrderStatus::PaymentFailed,
    ];

    /// The status an event announces, if it announces one.
    pub fn after(event_type: EventType) -> Option<OrderStatus> {
        match event_type {
            EventType::OrderCreated => Some(OrderStatus::Created),
            EventType::InventoryReserved => Some(OrderStatus::InventoryReserved),
            EventType::InventoryRejected => Some(OrderStatus::InventoryRejected),
            EventType::PaymentAuthorized => Some(OrderStatus::PaymentAuthorized),
            EventType::PaymentFailed => Some(OrderStatus::PaymentFailed),
            EventType::DeliveryAssigned | EventType::EtaUpdated => None,
        }
    }

    /// Returns true if the saga may move from `self` to `next`.
    pub fn can_transition_to(&self, next: OrderStatus) -> bool {
        matches!(
            (self, next),
            (
                OrderStatus::Created,
                OrderStatus::InventoryReserved | OrderStatus::InventoryRejected
            ) | (
                OrderStatus::InventoryReserved,
                OrderStatus::PaymentAuthorized | OrderStatus::PaymentFailed
            )
        )
    }

    /// Rejected and failed orders never progress.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::InventoryRejected | OrderStatus::PaymentFailed
        )
    }

    /// How far along the saga the status is: 0 created, 1 inventory decided,
    /// 2 payment decided.
    pub fn stage(&self) -> u8 {
        match self {
            OrderStatus::Created => 0,
            OrderStatus::InventoryReserved | OrderStatus::InventoryRejected => 1,
            OrderStatus::PaymentAuthorized | OrderStatus::PaymentFailed => 2,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Created => "CREATED",
            OrderStatus::InventoryReserved => "INVENTORY_RESERVED",
            OrderStatus::InventoryRejected => "INVENTORY_REJECTED",
            OrderStatus::PaymentAuthorized => "PAYMENT_AUTHORIZED",
            OrderStatus::PaymentFailed => "PAYMENT_FAILED",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.as_str() == value)
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
