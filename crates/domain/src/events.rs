//! Payload schemas carried in [`event_log::EventEnvelope::payload`], one per event type.

use chrono::{DateTime, Utc};
use common::OrderId;
use serde::{Deserialize, Serialize};

use crate::delivery::{Delivery, DeliveryStatus};
use crate::order::{CustomerId, ItemId, Money, Order, OrderItem};
use crate::payment::{Payment, PaymentStatus};
use crate::reservation::Reservation;

/// Currency assumed when a reservation payload omits it.
pub const DEFAULT_CURRENCY: &str = "USD";

fn default_currency() -> String {
    DEFAULT_CURRENCY.to_string()
}

/// `order.created`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderCreatedPayload {
    pub customer_id: CustomerId,
    pub total_amount: Money,
    pub currency: String,
    #[serde(default)]
    pub items: Vec<OrderItemDetail>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderItemDetail {
    pub item_id: ItemId,
    pub quantity: u32,
    pub unit_price: Money,
}

impl From<&OrderItem> for OrderItemDetail {
    fn from(item: &OrderItem) -> Self {
        Self {
            item_id: item.item_id.clone(),
            quantity: item.quantity,
            unit_price: item.unit_price,
        }
    }
}

impl From<&Order> for OrderCreatedPayload {
    fn from(order: &Order) -> Self {
        Self {
            customer_id: order.customer_id.clone(),
            total_amount: order.total_amount(),
            currency: order.currency.clone(),
            items: order.items().iter().map(OrderItemDetail::from).collect(),
        }
    }
}

/// `inventory.reserved` and `inventory.rejected`
///
/// Older producers may omit amount and currency; they default to zero and USD.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReservationPayload {
    pub order_id: OrderId,
    #[serde(default)]
    pub amount: Money,
    #[serde(default = "default_currency")]
    pub currency: String,
    pub customer_id: CustomerId,
}

impl From<&Reservation> for ReservationPayload {
    fn from(reservation: &Reservation) -> Self {
        Self {
            order_id: reservation.order_id.clone(),
            amount: reservation.amount,
            currency: reservation.currency.clone(),
            customer_id: reservation.customer_id.clone(),
        }
    }
}

/// `payment.authorized` and `payment.failed`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentPayload {
    #[serde(default)]
    pub payment_id: Option<i64>,
    pub order_id: OrderId,
    pub amount: Money,
    pub currency: String,
    pub status: PaymentStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
}

impl From<&Payment> for PaymentPayload {
    fn from(payment: &Payment) -> Self {
        Self {
            payment_id: payment.id,
            order_id: payment.order_id.clone(),
            amount: payment.amount,
            currency: payment.currency.clone(),
            status: payment.status,
            failure_reason: payment.failure_reason.clone(),
        }
    }
}

/// `delivery.assigned` and `eta.updated`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryPayload {
    pub order_id: OrderId,
    pub delivery_id: String,
    pub driver_name: String,
    pub status: DeliveryStatus,
    pub estimated_delivery_time: DateTime<Utc>,
}

impl From<&Delivery> for DeliveryPayload {
    fn from(delivery: &Delivery) -> Self {
        Self {
            order_id: delivery.order_id.clone(),
            delivery_id: delivery.delivery_id.clone(),
            driver_name: delivery.driver_name.clone(),
            status: delivery.status,
            estimated_delivery_time: delivery.estimated_delivery_time,
        }
    }
}
