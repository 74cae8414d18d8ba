use std::sync::Arc;

use async_trait::async_trait;
use event_log::EventEnvelope;
use tokio::sync::RwLock;

use super::{OrderViewPatch, OrderViewStore};
use crate::Result;
use crate::projection::{Projection, ProjectionPosition};

const NAME: &str = "order_view";

/// Materializes [`OrderView`](super::OrderView)s from all four domains.
#[derive(Clone)]
pub struct OrderViewProjection<S> {
    store: S,
    position: Arc<RwLock<ProjectionPosition>>,
}

impl<S: OrderViewStore> OrderViewProjection<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            position: Arc::new(RwLock::new(ProjectionPosition::zero())),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }
}

#[async_trait]
impl<S: OrderViewStore> Projection for OrderViewProjection<S> {
    fn name(&self) -> &'static str {
        NAME
    }

    #[tracing::instrument(skip(self, event), fields(order_id = %event.order_id, event_type = %event.event_type))]
    async fn handle(&self, event: &EventEnvelope) -> Result<()> {
        let Some(patch) = OrderViewPatch::from_envelope(event)? else {
            tracing::warn!("unknown event type, skipping");
            let mut position = self.position.write().await;
            *position = position.skipped();
            return Ok(());
        };

        let view = self.store.merge(&patch).await?;
        metrics::counter!(
            "projection_events_processed_total",
            "projection" => NAME,
            "event_type" => patch.event_type.as_str()
        )
        .increment(1);
        tracing::debug!(status = %view.status, "order view updated");

        let mut position = self.position.write().await;
        *position = position.applied();
        Ok(())
    }

    async fn position(&self) -> ProjectionPosition {
        *self.position.read().await
    }

    async fn reset(&self) -> Result<()> {
        self.store.clear().await?;
        *self.position.write().await = ProjectionPosition::zero();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::order_view::{InMemoryOrderViewStore, ViewStatus};
    use common::OrderId;
    use domain::{Money, PaymentPayload, PaymentStatus};
    use event_log::EventType;

    fn authorized(order_id: &str, payment_id: i64) -> EventEnvelope {
        EventEnvelope::builder()
            .event_type(EventType::PaymentAuthorized)
            .order_id(order_id)
            .payload(&PaymentPayload {
                payment_id: Some(payment_id),
                order_id: OrderId::from(order_id),
                amount: Money::from_minor(5000),
                currency: "USD".into(),
                status: PaymentStatus::Authorized,
                failure_reason: None,
            })
            .unwrap()
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_status_event_before_creation_creates_partial_view() {
        let store = InMemoryOrderViewStore::new();
        let projection = OrderViewProjection::new(store.clone());

        projection.handle(&authorized("ord-1", 9)).await.unwrap();

        let view = store.find(&OrderId::from("ord-1")).await.unwrap().unwrap();
        assert!(view.is_partial());
        assert_eq!(view.status, ViewStatus::PaymentAuthorized);
        assert_eq!(view.payment_id, Some(9));
        assert_eq!(projection.position().await.events_applied, 1);
    }

    #[tokio::test]
    async fn test_unknown_events_are_skipped() {
        let store = InMemoryOrderViewStore::new();
        let projection = OrderViewProjection::new(store.clone());
        let unknown = EventEnvelope::builder()
            .event_type("order.cancelled")
            .order_id("ord-1")
            .build()
            .unwrap();

        projection.handle(&unknown).await.unwrap();

        assert!(store.is_empty().await);
        assert_eq!(projection.position().await.events_skipped, 1);
    }

    #[tokio::test]
    async fn test_reset_clears_views() {
        let store = InMemoryOrderViewStore::new();
        let projection = OrderViewProjection::new(store.clone());
        projection.handle(&authorized("ord-1", 1)).await.unwrap();

        projection.reset().await.unwrap();

        assert!(store.is_empty().await);
        assert_eq!(projection.position().await, ProjectionPosition::zero());
    }

    #[tokio::test]
    async fn test_find_all_lists_every_order() {
        let store = InMemoryOrderViewStore::new();
        let projection = OrderViewProjection::new(store.clone());
        projection.handle(&authorized("ord-1", 1)).await.unwrap();
        projection.handle(&authorized("ord-2", 2)).await.unwrap();

        let views = store.find_all().await.unwrap();
        assert_eq!(views.len(), 2);
        assert!(views.iter().all(|v| v.customer_id.is_none()));
    }
}
