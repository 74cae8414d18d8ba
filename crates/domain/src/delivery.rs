//! Deliveries owned by the delivery service.

use chrono::{DateTime, Utc};
use common::OrderId;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeliveryStatus {
    #[default]
    Assigned,
    InTransit,
}

impl DeliveryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryStatus::Assigned => "ASSIGNED",
            DeliveryStatus::InTransit => "IN_TRANSIT",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "ASSIGNED" => Some(DeliveryStatus::Assigned),
            "IN_TRANSIT" => Some(DeliveryStatus::InTransit),
            _ => None,
        }
    }
}

impl std::fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DeliveryError {
    #[error("Delivery {delivery_id} cannot move from {from} to {to}")]
    InvalidTransition {
        delivery_id: String,
        from: DeliveryStatus,
        to: DeliveryStatus,
    },
}

/// A driver assignment for an order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Delivery {
    #[serde(skip)]
    pub id: Option<i64>,
    pub order_id: OrderId,
    pub delivery_id: String,
    pub driver_name: String,
    pub status: DeliveryStatus,
    pub estimated_delivery_time: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Delivery {
    /// Assigns a driver, generating a `DEL-XXXXXXXX` delivery id.
    pub fn assign(
        order_id: OrderId,
        driver_name: impl Into<String>,
        estimated_delivery_time: DateTime<Utc>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: None,
            order_id,
            delivery_id: generate_delivery_id(),
            driver_name: driver_name.into(),
            status: DeliveryStatus::Assigned,
            estimated_delivery_time,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn update_eta(&mut self, estimated_delivery_time: DateTime<Utc>) {
        self.estimated_delivery_time = estimated_delivery_time;
        self.updated_at = Utc::now();
    }

    pub fn start_transit(&mut self) -> Result<(), DeliveryError> {
        if self.status != DeliveryStatus::Assigned {
            return Err(DeliveryError::InvalidTransition {
                delivery_id: self.delivery_id.clone(),
                from: self.status,
                to: DeliveryStatus::InTransit,
            });
        }
        self.status = DeliveryStatus::InTransit;
        self.updated_at = Utc::now();
        Ok(())
    }
}

fn generate_delivery_id() -> String {
    let simple = Uuid::new_v4().simple().to_string();
    format!("DEL-{}", simple[..8].to_uppercase())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_assign_generates_delivery_id() {
        let delivery = Delivery::assign(OrderId::from("ord-1"), "Sam Patel", Utc::now());
        assert_eq!(delivery.status, DeliveryStatus::Assigned);
        assert!(delivery.delivery_id.starts_with("DEL-"));
        assert_eq!(delivery.delivery_id.len(), 12);
        assert!(
            delivery.delivery_id[4..]
                .chars()
                .all(|c| c.is_ascii_hexdigit() && !c.is_ascii_lowercase())
        );
    }

    #[test]
    fn test_update_eta() {
        let eta = Utc::now() + Duration::minutes(45);
        let mut delivery = Delivery::assign(OrderId::from("ord-1"), "Taylor Kim", eta);
        let revised = eta + Duration::minutes(5);
        delivery.update_eta(revised);
        assert_eq!(delivery.estimated_delivery_time, revised);
    }

    #[test]
    fn test_transit_only_from_assigned() {
        let mut delivery = Delivery::assign(OrderId::from("ord-1"), "Casey Johnson", Utc::now());
        delivery.start_transit().unwrap();
        assert_eq!(delivery.status, DeliveryStatus::InTransit);
        assert!(matches!(
            delivery.start_transit(),
            Err(DeliveryError::InvalidTransition { .. })
        ));
    }
}
