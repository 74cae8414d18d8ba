//! Decides whether stock can be reserved for a newly created order.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use domain::store::{ReservationRepository, ReservationTransaction};
use domain::{
    OrderCreatedPayload, OrderItemDetail, Reservation, ReservationPayload, ReservationStatus,
    StoreError, TransactionScope,
};
use common::OrderId;
use event_log::{EventEnvelope, EventHandler, EventPublisher, EventType, Topics, INVENTORY_SERVICE};

use super::{announce_after_commit, decode, envelope, ignore};
use crate::decision::Decision;
use crate::error::{Result, SagaError};

/// Stock availability oracle.
#[async_trait]
pub trait StockCheck: Send + Sync {
    async fn is_available(&self, order_id: &OrderId, items: &[OrderItemDetail]) -> bool;
}

/// Stock check with a fixed latency and a pluggable outcome.
pub struct SimulatedStockCheck {
    latency: Duration,
    decision: Arc<dyn Decision>,
}

impl SimulatedStockCheck {
    pub fn new(latency: Duration, decision: Arc<dyn Decision>) -> Self {
        Self { latency, decision }
    }
}

#[async_trait]
impl StockCheck for SimulatedStockCheck {
    async fn is_available(&self, _order_id: &OrderId, _items: &[OrderItemDetail]) -> bool {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        self.decision.decide()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ReservationOutcome {
    Recorded(Reservation),
    /// A decision for this order already exists. Nothing was published.
    AlreadyProcessed,
}

pub struct InventoryReserver<R> {
    repository: R,
    stock: Arc<dyn StockCheck>,
    publisher: Arc<dyn EventPublisher>,
    topics: Topics,
}

impl<R: ReservationRepository> InventoryReserver<R> {
    pub fn new(
        repository: R,
        stock: Arc<dyn StockCheck>,
        publisher: Arc<dyn EventPublisher>,
        topics: Topics,
    ) -> Self {
        Self {
            repository,
            stock,
            publisher,
            topics,
        }
    }

    /// Records one reservation decision per order and announces it.
    #[tracing::instrument(skip(self, created), fields(order_id = %created.order_id, event_id = %created.event_id))]
    pub async fn reserve(&self, created: &EventEnvelope) -> Result<ReservationOutcome> {
        let payload: OrderCreatedPayload = decode(created)?;
        let order_id = created.order_id.clone();

        let mut scope = TransactionScope::new(self.repository.begin().await?);
        if scope.tx().exists_by_order_id(&order_id).await? {
            scope.rollback().await?;
            tracing::info!("reservation already decided, skipping redelivery");
            return Ok(ReservationOutcome::AlreadyProcessed);
        }

        let status = if self.stock.is_available(&order_id, &payload.items).await {
            ReservationStatus::Reserved
        } else {
            ReservationStatus::Rejected
        };
        let reservation = Reservation::new(
            order_id.clone(),
            payload.customer_id,
            payload.total_amount,
            payload.currency,
            status,
        );

        let saved = match scope.tx().save(reservation).await {
            Ok(saved) => saved,
            Err(err) => {
                scope.rollback().await?;
                return already_processed_or(err);
            }
        };

        let event_type = match status {
            ReservationStatus::Reserved => EventType::InventoryReserved,
            ReservationStatus::Rejected => EventType::InventoryRejected,
        };
        let decided = envelope(
            event_type,
            &order_id,
            created.correlation_id(),
            INVENTORY_SERVICE,
            &ReservationPayload::from(&saved),
        )?;
        announce_after_commit(
            &mut scope,
            Arc::clone(&self.publisher),
            self.topics.for_event(event_type),
            decided,
        );
        if let Err(err) = scope.commit().await {
            return already_processed_or(err);
        }

        metrics::counter!("reservations_total", "status" => status.as_str()).increment(1);
        tracing::info!(status = %status, "reservation decided");
        Ok(ReservationOutcome::Recorded(saved))
    }
}

/// A concurrent redelivery won the insert race.
fn already_processed_or(err: StoreError) -> Result<ReservationOutcome> {
    if err.is_unique_violation() {
        tracing::info!("concurrent reservation detected, skipping");
        Ok(ReservationOutcome::AlreadyProcessed)
    } else {
        Err(SagaError::Store(err))
    }
}

#[async_trait]
impl<R: ReservationRepository> EventHandler for InventoryReserver<R> {
    type Error = SagaError;

    async fn handle(&self, envelope: &EventEnvelope) -> Result<()> {
        match envelope.kind() {
            Some(EventType::OrderCreated) => self.reserve(envelope).await.map(|_| ()),
            _ => {
                ignore(envelope);
                Ok(())
            }
        }
    }
}
