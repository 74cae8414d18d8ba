//! Assigns a driver once payment is authorized.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use domain::store::{DeliveryRepository, DeliveryTransaction};
use domain::{Delivery, DeliveryPayload, PaymentPayload, PaymentStatus, StoreError, TransactionScope};
use event_log::{EventEnvelope, EventHandler, EventPublisher, EventType, Topics, DELIVERY_SERVICE};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

use super::{announce_after_commit, decode, envelope, ignore};
use crate::error::{Result, SagaError};

pub const DRIVER_ROSTER: [&str; 5] = [
    "Alex Rodriguez",
    "Jordan Smith",
    "Sam Patel",
    "Taylor Kim",
    "Casey Johnson",
];

/// Driver selection and ETA estimation.
pub trait DriverDispatch: Send + Sync {
    fn pick_driver(&self) -> String;

    /// Initial estimate for an assignment made at `now`.
    fn estimate(&self, now: DateTime<Utc>) -> DateTime<Utc>;

    /// A later, refined estimate.
    fn revise(&self, eta: DateTime<Utc>) -> DateTime<Utc>;
}

/// Picks from [`DRIVER_ROSTER`], estimates 30 to 60 minutes out and revises
/// by -5 to +10 minutes.
pub struct SimulatedDispatch {
    rng: Mutex<StdRng>,
}

impl SimulatedDispatch {
    pub fn new(seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self { rng: Mutex::new(rng) }
    }

    fn with_rng<T>(&self, f: impl FnOnce(&mut StdRng) -> T) -> T {
        match self.rng.lock() {
            Ok(mut rng) => f(&mut rng),
            Err(poisoned) => f(&mut poisoned.into_inner()),
        }
    }
}

impl DriverDispatch for SimulatedDispatch {
    fn pick_driver(&self) -> String {
        self.with_rng(|rng| DRIVER_ROSTER.choose(rng).copied().unwrap_or(DRIVER_ROSTER[0]))
            .to_string()
    }

    fn estimate(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now + Duration::minutes(self.with_rng(|rng| rng.gen_range(30..=60)))
    }

    fn revise(&self, eta: DateTime<Utc>) -> DateTime<Utc> {
        eta + Duration::minutes(self.with_rng(|rng| rng.gen_range(-5..=10)))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum AssignmentOutcome {
    Assigned(Delivery),
    AlreadyProcessed,
}

pub struct DeliveryAssigner<R> {
    repository: R,
    dispatch: Arc<dyn DriverDispatch>,
    publisher: Arc<dyn EventPublisher>,
    topics: Topics,
}

impl<R: DeliveryRepository> DeliveryAssigner<R> {
    pub fn new(
        repository: R,
        dispatch: Arc<dyn DriverDispatch>,
        publisher: Arc<dyn EventPublisher>,
        topics: Topics,
    ) -> Self {
        Self {
            repository,
            dispatch,
            publisher,
            topics,
        }
    }

    /// Creates the order's delivery and announces the assignment followed by
    /// a revised ETA.
    #[tracing::instrument(skip(self, authorized), fields(order_id = %authorized.order_id, event_id = %authorized.event_id))]
    pub async fn assign(&self, authorized: &EventEnvelope) -> Result<AssignmentOutcome> {
        let payment: PaymentPayload = decode(authorized)?;
        if payment.status != PaymentStatus::Authorized {
            tracing::warn!(status = %payment.status, "authorization event without authorized status");
            return Ok(AssignmentOutcome::AlreadyProcessed);
        }
        let order_id = authorized.order_id.clone();

        let mut scope = TransactionScope::new(self.repository.begin().await?);
        if scope.tx().exists_by_order_id(&order_id).await? {
            scope.rollback().await?;
            tracing::info!("delivery already assigned, skipping redelivery");
            return Ok(AssignmentOutcome::AlreadyProcessed);
        }

        let eta = self.dispatch.estimate(Utc::now());
        let delivery = Delivery::assign(order_id.clone(), self.dispatch.pick_driver(), eta);
        let mut delivery = match scope.tx().save(delivery).await {
            Ok(saved) => saved,
            Err(err) => {
                scope.rollback().await?;
                return already_processed_or(err);
            }
        };
        let assigned = envelope(
            EventType::DeliveryAssigned,
            &order_id,
            authorized.correlation_id(),
            DELIVERY_SERVICE,
            &DeliveryPayload::from(&delivery),
        )?;

        delivery.update_eta(self.dispatch.revise(delivery.estimated_delivery_time));
        let delivery = scope.tx().save(delivery).await?;
        let revised = envelope(
            EventType::EtaUpdated,
            &order_id,
            authorized.correlation_id(),
            DELIVERY_SERVICE,
            &DeliveryPayload::from(&delivery),
        )?;

        let topic = self.topics.for_event(EventType::DeliveryAssigned);
        announce_after_commit(&mut scope, Arc::clone(&self.publisher), topic.clone(), assigned);
        announce_after_commit(&mut scope, Arc::clone(&self.publisher), topic, revised);
        if let Err(err) = scope.commit().await {
            return already_processed_or(err);
        }

        metrics::counter!("deliveries_assigned_total").increment(1);
        tracing::info!(
            delivery_id = %delivery.delivery_id,
            driver = %delivery.driver_name,
            eta = %delivery.estimated_delivery_time,
            "driver assigned"
        );
        Ok(AssignmentOutcome::Assigned(delivery))
    }
}

fn already_processed_or(err: StoreError) -> Result<AssignmentOutcome> {
    if err.violates(domain::store::DELIVERIES_ORDER_ID_KEY) {
        tracing::info!("concurrent assignment detected, skipping");
        Ok(AssignmentOutcome::AlreadyProcessed)
    } else {
        Err(SagaError::Store(err))
    }
}

#[async_trait]
impl<R: DeliveryRepository> EventHandler for DeliveryAssigner<R> {
    type Error = SagaError;

    async fn handle(&self, envelope: &EventEnvelope) -> Result<()> {
        match envelope.kind() {
            Some(EventType::PaymentAuthorized) => self.assign(envelope).await.map(|_| ()),
            _ => {
                ignore(envelope);
                Ok(())
            }
        }
    }
}
