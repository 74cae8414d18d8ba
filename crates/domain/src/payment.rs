//! Payments owned by the payment service.

use chrono::{DateTime, Utc};
use common::OrderId;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::order::Money;

/// Reason recorded when the gateway declines a charge.
pub const DECLINED_REASON: &str = "Payment declined";

/// Lifecycle of a single payment.
///
/// ```text
/// Pending ──► Authorized   [terminal]
///    └──────► Failed       [terminal]
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    #[default]
    Pending,
    Authorized,
    Failed,
}

impl PaymentStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, PaymentStatus::Authorized | PaymentStatus::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "PENDING",
            PaymentStatus::Authorized => "AUTHORIZED",
            PaymentStatus::Failed => "FAILED",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "PENDING" => Some(PaymentStatus::Pending),
            "AUTHORIZED" => Some(PaymentStatus::Authorized),
            "FAILED" => Some(PaymentStatus::Failed),
            _ => None,
        }
    }
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PaymentError {
    #[error("Payment for order {order_id} is already {status}")]
    AlreadyTerminal {
        order_id: OrderId,
        status: PaymentStatus,
    },
}

/// The one payment permitted per order.
///
/// `idempotency_key` is the id of the event that triggered the charge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Payment {
    pub id: Option<i64>,
    pub order_id: OrderId,
    pub idempotency_key: String,
    pub amount: Money,
    pub currency: String,
    pub status: PaymentStatus,
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Payment {
    pub fn pending(
        order_id: OrderId,
        idempotency_key: impl Into<String>,
        amount: Money,
        currency: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: None,
            order_id,
            idempotency_key: idempotency_key.into(),
            amount,
            currency: currency.into(),
            status: PaymentStatus::Pending,
            failure_reason: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn authorize(&mut self) -> Result<(), PaymentError> {
        self.settle(PaymentStatus::Authorized, None)
    }

    pub fn fail(&mut self, reason: impl Into<String>) -> Result<(), PaymentError> {
        self.settle(PaymentStatus::Failed, Some(reason.into()))
    }

    pub fn is_authorized(&self) -> bool {
        self.status == PaymentStatus::Authorized
    }

    fn settle(
        &mut self,
        status: PaymentStatus,
        failure_reason: Option<String>,
    ) -> Result<(), PaymentError> {
        if self.status.is_terminal() {
            return Err(PaymentError::AlreadyTerminal {
                order_id: self.order_id.clone(),
                status: self.status,
            });
        }
        self.status = status;
        self.failure_reason = failure_reason;
        self.updated_at = Utc::now();
        Ok(())
    }
}
