//! Stock reservations owned by the inventory service.

use chrono::{DateTime, Utc};
use common::OrderId;
use serde::{Deserialize, Serialize};

use crate::order::{CustomerId, Money};

/// Outcome of the stock check for an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReservationStatus {
    Reserved,
    Rejected,
}

impl ReservationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReservationStatus::Reserved => "RESERVED",
            ReservationStatus::Rejected => "REJECTED",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "RESERVED" => Some(ReservationStatus::Reserved),
            "REJECTED" => Some(ReservationStatus::Rejected),
            _ => None,
        }
    }
}

impl std::fmt::Display for ReservationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The single reservation decision recorded for an order.
///
/// Written once and never updated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reservation {
    #[serde(skip)]
    pub id: Option<i64>,
    pub order_id: OrderId,
    pub customer_id: CustomerId,
    pub amount: Money,
    pub currency: String,
    pub status: ReservationStatus,
    pub created_at: DateTime<Utc>,
}

impl Reservation {
    pub fn new(
        order_id: OrderId,
        customer_id: CustomerId,
        amount: Money,
        currency: impl Into<String>,
        status: ReservationStatus,
    ) -> Self {
        Self {
            id: None,
            order_id,
            customer_id,
            amount,
            currency: currency.into(),
            status,
            created_at: Utc::now(),
        }
    }

    pub fn is_reserved(&self) -> bool {
        self.status == ReservationStatus::Reserved
    }
}
