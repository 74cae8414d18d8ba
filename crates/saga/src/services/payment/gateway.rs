use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use common::OrderId;
use domain::{Money, DECLINED_REASON};

use crate::decision::Decision;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayOutcome {
    Approved,
    Declined { reason: String },
}

/// The external card processor. Every call is a real charge attempt.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn charge(&self, order_id: &OrderId, amount: Money, currency: &str) -> GatewayOutcome;
}

/// Gateway with a fixed latency and a pluggable approval decision.
pub struct SimulatedGateway {
    latency: Duration,
    decision: Arc<dyn Decision>,
    calls: AtomicU64,
}

impl SimulatedGateway {
    pub fn new(latency: Duration, decision: Arc<dyn Decision>) -> Self {
        Self {
            latency,
            decision,
            calls: AtomicU64::new(0),
        }
    }

    /// Number of charge attempts so far.
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PaymentGateway for SimulatedGateway {
    async fn charge(&self, order_id: &OrderId, amount: Money, currency: &str) -> GatewayOutcome {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        if self.decision.decide() {
            tracing::debug!(%order_id, %amount, currency, "charge approved");
            GatewayOutcome::Approved
        } else {
            tracing::debug!(%order_id, %amount, currency, "charge declined");
            GatewayOutcome::Declined {
                reason: DECLINED_REASON.to_string(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decision::Scripted;

    #[tokio::test]
    async fn test_counts_calls_and_follows_decision() {
        let gateway = SimulatedGateway::new(Duration::ZERO, Arc::new(Scripted::new([true, false], true)));
        let order_id = OrderId::from("ord-1");

        assert_eq!(gateway.charge(&order_id, Money::from_minor(100), "USD").await, GatewayOutcome::Approved);
        assert_eq!(
            gateway.charge(&order_id, Money::from_minor(100), "USD").await,
            GatewayOutcome::Declined { reason: "Payment declined".into() }
        );
        assert_eq!(gateway.calls(), 2);
    }
}
