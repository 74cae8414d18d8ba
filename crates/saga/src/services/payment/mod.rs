//! Charges the customer exactly once per order.
//!
//! Redeliveries of `inventory.reserved` are absorbed by four layers, in order:
//!
//! 1. a per-order lock (`order:{orderId}`) serializing concurrent attempts,
//! 2. the dedup cache, keyed by the triggering event id,
//! 3. a durable lookup by idempotency key, then by order id,
//! 4. the store's unique constraints, caught when saving or committing.
//!
//! Only the store is authoritative. The cache is written, and the result
//! announced, after the payment commits.

mod gateway;

pub use gateway::{GatewayOutcome, PaymentGateway, SimulatedGateway};

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use common::OrderId;
use domain::store::{PaymentRepository, PaymentTransaction};
use domain::{
    CustomerId, Money, Payment, PaymentPayload, PaymentStatus, ReservationPayload, StoreError,
    TransactionScope,
};
use event_log::{EventEnvelope, EventHandler, EventPublisher, EventType, Topics, PAYMENT_SERVICE};

use super::{announce_after_commit, decode, envelope, ignore};
use crate::config::PaymentConfig;
use crate::dedup::DedupCache;
use crate::error::{Result, SagaError};
use crate::lock::{LockGuard, LockRegistry};

/// One attempt to charge for a reserved order.
#[derive(Debug, Clone, PartialEq)]
pub struct PaymentRequest {
    pub order_id: OrderId,
    /// Id of the triggering event.
    pub idempotency_key: String,
    pub customer_id: CustomerId,
    pub amount: Money,
    pub currency: String,
    pub correlation_id: String,
}

impl PaymentRequest {
    pub fn from_reservation(reserved: &EventEnvelope) -> Result<Self> {
        let payload: ReservationPayload = decode(reserved)?;
        Ok(Self {
            order_id: reserved.order_id.clone(),
            idempotency_key: reserved.event_id.to_string(),
            customer_id: payload.customer_id,
            amount: payload.amount,
            currency: payload.currency,
            correlation_id: reserved.correlation_id().to_string(),
        })
    }
}

/// Which layer recognized a redelivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DuplicateLayer {
    Cache,
    IdempotencyKey,
    /// The order was already charged under another idempotency key.
    Order,
    /// Another attempt committed first.
    Constraint,
}

impl DuplicateLayer {
    pub fn as_str(&self) -> &'static str {
        match self {
            DuplicateLayer::Cache => "cache",
            DuplicateLayer::IdempotencyKey => "idempotency_key",
            DuplicateLayer::Order => "order",
            DuplicateLayer::Constraint => "constraint",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PaymentOutcome {
    /// The gateway was called and the result committed and announced.
    Processed(Payment),
    /// Nothing was charged or published.
    Duplicate {
        layer: DuplicateLayer,
        existing: Option<Payment>,
    },
}

impl PaymentOutcome {
    pub fn payment(&self) -> Option<&Payment> {
        match self {
            PaymentOutcome::Processed(payment) => Some(payment),
            PaymentOutcome::Duplicate { existing, .. } => existing.as_ref(),
        }
    }

    pub fn is_duplicate(&self) -> bool {
        matches!(self, PaymentOutcome::Duplicate { .. })
    }
}

pub struct PaymentProcessor<R, L> {
    repository: R,
    locks: L,
    cache: Arc<dyn DedupCache>,
    gateway: Arc<dyn PaymentGateway>,
    publisher: Arc<dyn EventPublisher>,
    topics: Topics,
    config: PaymentConfig,
}

impl<R: PaymentRepository, L: LockRegistry> PaymentProcessor<R, L> {
    pub fn new(
        repository: R,
        locks: L,
        cache: Arc<dyn DedupCache>,
        gateway: Arc<dyn PaymentGateway>,
        publisher: Arc<dyn EventPublisher>,
        topics: Topics,
        config: PaymentConfig,
    ) -> Self {
        Self {
            repository,
            locks,
            cache,
            gateway,
            publisher,
            topics,
            config,
        }
    }

    /// Runs one attempt inside the order's critical section.
    ///
    /// Fails with the retryable [`SagaError::LockTimeout`] when the lock
    /// cannot be obtained in time. The lock is released on every path.
    #[tracing::instrument(
        skip(self, request),
        fields(order_id = %request.order_id, idempotency_key = %request.idempotency_key)
    )]
    pub async fn process(&self, request: PaymentRequest) -> Result<PaymentOutcome> {
        let started = Instant::now();
        let lock_name = request.order_id.lock_name();

        let Some(guard) = self
            .locks
            .try_lock(&lock_name, self.config.lock_wait, self.config.lock_ttl)
            .await?
        else {
            metrics::counter!("payments_lock_timeouts_total").increment(1);
            tracing::warn!(lock = %lock_name, "timed out waiting for order lock");
            return Err(SagaError::LockTimeout {
                order_id: request.order_id,
                waited: self.config.lock_wait,
            });
        };

        let outcome = self.process_locked(&request).await;

        if let Err(err) = guard.release().await {
            tracing::warn!(error = %err, lock = %lock_name, "failed to release order lock");
        }
        metrics::histogram!("payment_processing_duration_seconds")
            .record(started.elapsed().as_secs_f64());
        outcome
    }

    async fn process_locked(&self, request: &PaymentRequest) -> Result<PaymentOutcome> {
        let dedup_key = self.config.dedup_key(&request.idempotency_key);

        match self.cache.is_processed(&dedup_key).await {
            Ok(true) => {
                metrics::counter!("payments_dedup_cache_hits_total").increment(1);
                let existing = self
                    .repository
                    .find_by_idempotency_key(&request.idempotency_key)
                    .await?;
                return Ok(duplicate(DuplicateLayer::Cache, existing));
            }
            Ok(false) => {}
            Err(err) => {
                tracing::warn!(error = %err, "dedup cache unavailable, relying on the store");
            }
        }

        let mut scope = TransactionScope::new(self.repository.begin().await?);

        if scope
            .tx()
            .exists_by_idempotency_key(&request.idempotency_key)
            .await?
        {
            let existing = scope
                .tx()
                .find_by_idempotency_key(&request.idempotency_key)
                .await?;
            scope.rollback().await?;
            metrics::counter!("payments_dedup_store_hits_total").increment(1);
            self.backfill(&dedup_key).await;
            return Ok(duplicate(DuplicateLayer::IdempotencyKey, existing));
        }

        if let Some(existing) = scope.tx().find_by_order_id(&request.order_id).await? {
            scope.rollback().await?;
            tracing::info!(
                existing_key = %existing.idempotency_key,
                "order already charged under another idempotency key"
            );
            self.backfill(&dedup_key).await;
            return Ok(duplicate(DuplicateLayer::Order, Some(existing)));
        }

        let mut payment = Payment::pending(
            request.order_id.clone(),
            &request.idempotency_key,
            request.amount,
            &request.currency,
        );
        match self
            .gateway
            .charge(&request.order_id, request.amount, &request.currency)
            .await
        {
            GatewayOutcome::Approved => payment.authorize()?,
            GatewayOutcome::Declined { reason } => payment.fail(reason)?,
        }

        let saved = match scope.tx().save(payment).await {
            Ok(saved) => saved,
            Err(err) if err.is_unique_violation() => {
                scope.rollback().await?;
                return self.recover_from_conflict(request, &dedup_key, err).await;
            }
            Err(err) => return Err(err.into()),
        };

        let event_type = match saved.status {
            PaymentStatus::Authorized => EventType::PaymentAuthorized,
            _ => EventType::PaymentFailed,
        };
        let result = envelope(
            event_type,
            &saved.order_id,
            &request.correlation_id,
            PAYMENT_SERVICE,
            &PaymentPayload::from(&saved),
        )?;

        let cache = Arc::clone(&self.cache);
        let ttl = self.config.dedup_ttl;
        let key = dedup_key.clone();
        scope.after_commit(move || async move {
            if let Err(err) = cache.mark_processed(&key, ttl).await {
                tracing::warn!(error = %err, key = %key, "failed to record payment in dedup cache");
            }
        });
        announce_after_commit(
            &mut scope,
            Arc::clone(&self.publisher),
            self.topics.for_event(event_type),
            result,
        );

        if let Err(err) = scope.commit().await {
            if err.is_unique_violation() {
                return self.recover_from_conflict(request, &dedup_key, err).await;
            }
            return Err(err.into());
        }

        if saved.is_authorized() {
            metrics::counter!("payments_processed_total").increment(1);
        } else {
            metrics::counter!("payments_failed_total").increment(1);
        }
        tracing::info!(
            payment_id = ?saved.id,
            status = %saved.status,
            amount = %saved.amount,
            "payment recorded"
        );
        Ok(PaymentOutcome::Processed(saved))
    }

    /// A concurrent attempt committed first; report its payment instead.
    async fn recover_from_conflict(
        &self,
        request: &PaymentRequest,
        dedup_key: &str,
        err: StoreError,
    ) -> Result<PaymentOutcome> {
        let existing = match self
            .repository
            .find_by_idempotency_key(&request.idempotency_key)
            .await?
        {
            Some(existing) => Some(existing),
            None => self.repository.find_by_order_id(&request.order_id).await?,
        };
        let Some(existing) = existing else {
            return Err(err.into());
        };

        tracing::info!(error = %err, "concurrent payment committed first");
        self.backfill(dedup_key).await;
        Ok(duplicate(DuplicateLayer::Constraint, Some(existing)))
    }

    async fn backfill(&self, dedup_key: &str) {
        if let Err(err) = self
            .cache
            .mark_processed(dedup_key, self.config.dedup_ttl)
            .await
        {
            tracing::warn!(error = %err, key = dedup_key, "failed to backfill dedup cache");
        }
    }
}

fn duplicate(layer: DuplicateLayer, existing: Option<Payment>) -> PaymentOutcome {
    metrics::counter!("payments_duplicate_total", "layer" => layer.as_str()).increment(1);
    tracing::info!(
        layer = layer.as_str(),
        payment_id = ?existing.as_ref().and_then(|payment| payment.id),
        "duplicate payment attempt absorbed"
    );
    PaymentOutcome::Duplicate { layer, existing }
}

#[async_trait]
impl<R: PaymentRepository, L: LockRegistry> EventHandler for PaymentProcessor<R, L> {
    type Error = SagaError;

    async fn handle(&self, envelope: &EventEnvelope) -> Result<()> {
        match envelope.kind() {
            Some(EventType::InventoryReserved) => {
                let request = PaymentRequest::from_reservation(envelope)?;
                self.process(request).await.map(|_| ())
            }
            _ => {
                ignore(envelope);
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decision::Always;
    use crate::dedup::InMemoryDedupCache;
    use crate::lock::{InMemoryLockRegistry, LockError};
    use domain::store::InMemoryPaymentRepository;
    use domain::{DECLINED_REASON, PaymentStatus};
    use event_log::{InMemoryEventLog, INVENTORY_SERVICE};
    use std::str::FromStr;
    use std::time::Duration;

    const PAYMENT_TOPIC: &str = "raw.payment-events";

    type Processor<L = InMemoryLockRegistry> = PaymentProcessor<InMemoryPaymentRepository, L>;

    struct Fixture<L = InMemoryLockRegistry> {
        log: InMemoryEventLog,
        repository: InMemoryPaymentRepository,
        locks: L,
        cache: Arc<InMemoryDedupCache>,
        gateway: Arc<SimulatedGateway>,
        processor: Arc<Processor<L>>,
    }

    fn fixture_with<L: LockRegistry + Clone>(locks: L, approve: bool, latency: Duration) -> Fixture<L> {
        let log = InMemoryEventLog::default();
        let repository = InMemoryPaymentRepository::new();
        let cache = Arc::new(InMemoryDedupCache::new());
        let gateway = Arc::new(SimulatedGateway::new(latency, Arc::new(Always(approve))));
        let processor = Arc::new(PaymentProcessor::new(
            repository.clone(),
            locks.clone(),
            Arc::clone(&cache) as Arc<dyn DedupCache>,
            Arc::clone(&gateway) as Arc<dyn PaymentGateway>,
            Arc::new(log.clone()),
            Topics::default(),
            PaymentConfig::default(),
        ));
        Fixture {
            log,
            repository,
            locks,
            cache,
            gateway,
            processor,
        }
    }

    fn fixture(approve: bool, latency: Duration) -> Fixture {
        fixture_with(InMemoryLockRegistry::new(), approve, latency)
    }

    fn reserved(order_id: &str) -> EventEnvelope {
        EventEnvelope::builder()
            .event_type(EventType::InventoryReserved)
            .order_id(order_id)
            .correlation_id(order_id)
            .producer(INVENTORY_SERVICE)
            .payload(&ReservationPayload {
                order_id: OrderId::from(order_id),
                amount: Money::from_str("50.00").unwrap(),
                currency: "USD".into(),
                customer_id: CustomerId::new("cust-1"),
            })
            .unwrap()
            .build()
            .unwrap()
    }

    fn request(envelope: &EventEnvelope) -> PaymentRequest {
        PaymentRequest::from_reservation(envelope).unwrap()
    }

    #[tokio::test]
    async fn test_authorizes_and_announces_once() {
        let f = fixture(true, Duration::ZERO);
        let event = reserved("ord-1");

        let outcome = f.processor.process(request(&event)).await.unwrap();
        let PaymentOutcome::Processed(payment) = outcome else {
            panic!("expected a processed payment");
        };
        assert_eq!(payment.status, PaymentStatus::Authorized);
        assert_eq!(payment.idempotency_key, event.event_id.to_string());

        let events = f.log.envelopes(PAYMENT_TOPIC).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind(), Some(EventType::PaymentAuthorized));
        assert_eq!(events[0].correlation_id(), "ord-1");
        let payload: PaymentPayload = events[0].payload_as().unwrap();
        assert_eq!(payload.payment_id, payment.id);
        assert_eq!(payload.amount, Money::from_str("50.00").unwrap());
        assert_eq!(payload.failure_reason, None);

        let key = PaymentConfig::default().dedup_key(&payment.idempotency_key);
        assert!(f.cache.is_processed(&key).await.unwrap());
        assert!(!f.locks.is_locked("order:ord-1"));
    }

    #[tokio::test]
    async fn test_decline_is_recorded_and_announced() {
        let f = fixture(false, Duration::ZERO);

        f.processor.process(request(&reserved("ord-1"))).await.unwrap();

        let events = f.log.envelopes(PAYMENT_TOPIC).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind(), Some(EventType::PaymentFailed));
        let payload: PaymentPayload = events[0].payload_as().unwrap();
        assert_eq!(payload.status, PaymentStatus::Failed);
        assert_eq!(payload.failure_reason.as_deref(), Some(DECLINED_REASON));
    }

    #[tokio::test]
    async fn test_redelivery_hits_the_cache() {
        let f = fixture(true, Duration::ZERO);
        let event = reserved("ord-1");

        f.processor.process(request(&event)).await.unwrap();
        let second = f.processor.process(request(&event)).await.unwrap();

        assert!(matches!(
            second,
            PaymentOutcome::Duplicate { layer: DuplicateLayer::Cache, existing: Some(_) }
        ));
        assert_eq!(f.gateway.calls(), 1);
        assert_eq!(f.repository.count().await, 1);
        assert_eq!(f.log.record_count(PAYMENT_TOPIC).await, 1);
    }

    #[tokio::test]
    async fn test_evicted_cache_falls_back_to_store_and_backfills() {
        let f = fixture(true, Duration::ZERO);
        let event = reserved("ord-1");
        let key = PaymentConfig::default().dedup_key(&event.event_id.to_string());

        f.processor.process(request(&event)).await.unwrap();
        assert!(f.cache.evict(&key));

        let second = f.processor.process(request(&event)).await.unwrap();
        assert!(matches!(
            second,
            PaymentOutcome::Duplicate { layer: DuplicateLayer::IdempotencyKey, .. }
        ));
        assert!(f.cache.is_processed(&key).await.unwrap());
        assert_eq!(f.gateway.calls(), 1);
        assert_eq!(f.log.record_count(PAYMENT_TOPIC).await, 1);
    }

    #[tokio::test]
    async fn test_unavailable_cache_is_not_fatal() {
        let f = fixture(true, Duration::ZERO);
        let event = reserved("ord-1");
        f.cache.set_unavailable(true);

        let first = f.processor.process(request(&event)).await.unwrap();
        let second = f.processor.process(request(&event)).await.unwrap();

        assert!(!first.is_duplicate());
        assert!(matches!(
            second,
            PaymentOutcome::Duplicate { layer: DuplicateLayer::IdempotencyKey, .. }
        ));
        assert_eq!(f.gateway.calls(), 1);
        assert_eq!(f.log.record_count(PAYMENT_TOPIC).await, 1);
    }

    #[tokio::test]
    async fn test_second_key_for_same_order_is_a_duplicate() {
        let f = fixture(true, Duration::ZERO);

        let first = f.processor.process(request(&reserved("ord-1"))).await.unwrap();
        let second = f.processor.process(request(&reserved("ord-1"))).await.unwrap();

        assert!(matches!(
            second,
            PaymentOutcome::Duplicate { layer: DuplicateLayer::Order, .. }
        ));
        assert_eq!(second.payment(), first.payment());
        assert_eq!(f.gateway.calls(), 1);
        assert_eq!(f.repository.count().await, 1);
        assert_eq!(f.log.record_count(PAYMENT_TOPIC).await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_lock_timeout_is_retryable_and_charges_nothing() {
        let f = fixture(true, Duration::ZERO);
        let config = PaymentConfig::default();
        let _held = f
            .locks
            .try_lock("order:ord-1", config.lock_wait, config.lock_ttl)
            .await
            .unwrap()
            .unwrap();

        let err = f.processor.process(request(&reserved("ord-1"))).await.unwrap_err();

        assert!(matches!(err, SagaError::LockTimeout { .. }));
        assert!(err.is_retryable());
        assert_eq!(f.gateway.calls(), 0);
        assert_eq!(f.repository.count().await, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_redeliveries_charge_once() {
        let f = fixture(true, Duration::from_millis(20));
        let event = reserved("ord-1");

        let attempts: Vec<_> = (0..10)
            .map(|_| {
                let processor = Arc::clone(&f.processor);
                let request = request(&event);
                tokio::spawn(async move { processor.process(request).await })
            })
            .collect();

        let mut processed = 0;
        for attempt in attempts {
            if !attempt.await.unwrap().unwrap().is_duplicate() {
                processed += 1;
            }
        }

        assert_eq!(processed, 1);
        assert_eq!(f.gateway.calls(), 1);
        assert_eq!(f.repository.count().await, 1);
        assert_eq!(f.log.record_count(PAYMENT_TOPIC).await, 1);
        assert!(!f.locks.is_locked("order:ord-1"));
    }

    #[tokio::test]
    async fn test_closely_spaced_redeliveries_charge_once() {
        let f = fixture(true, Duration::from_millis(20));
        let event = reserved("ord-1");

        let mut attempts = Vec::new();
        for _ in 0..5 {
            let processor = Arc::clone(&f.processor);
            let request = request(&event);
            attempts.push(tokio::spawn(async move { processor.process(request).await }));
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        for attempt in attempts {
            attempt.await.unwrap().unwrap();
        }

        assert_eq!(f.gateway.calls(), 1);
        assert_eq!(f.repository.count().await, 1);
        assert_eq!(f.log.record_count(PAYMENT_TOPIC).await, 1);
    }

    /// Grants every request, as an expired or partitioned lock would.
    #[derive(Clone, Default)]
    struct NoLocks;

    struct NoGuard;

    #[async_trait]
    impl LockGuard for NoGuard {
        fn name(&self) -> &str {
            ""
        }

        async fn release(self) -> std::result::Result<(), LockError> {
            Ok(())
        }
    }

    #[async_trait]
    impl LockRegistry for NoLocks {
        type Guard = NoGuard;

        async fn try_lock(
            &self,
            _name: &str,
            _wait: Duration,
            _lease: Duration,
        ) -> std::result::Result<Option<NoGuard>, LockError> {
            Ok(Some(NoGuard))
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_uniqueness_holds_without_the_lock() {
        let f = fixture_with(NoLocks, true, Duration::from_millis(50));
        let event = reserved("ord-1");

        let first = {
            let processor = Arc::clone(&f.processor);
            let request = request(&event);
            tokio::spawn(async move { processor.process(request).await })
        };
        let second = {
            let processor = Arc::clone(&f.processor);
            let request = request(&event);
            tokio::spawn(async move { processor.process(request).await })
        };
        let outcomes = [first.await.unwrap().unwrap(), second.await.unwrap().unwrap()];

        assert_eq!(outcomes.iter().filter(|o| !o.is_duplicate()).count(), 1);
        assert_eq!(f.repository.count().await, 1);
        assert_eq!(f.log.record_count(PAYMENT_TOPIC).await, 1);
    }

    #[tokio::test]
    async fn test_publish_failure_keeps_the_payment() {
        let f = fixture(true, Duration::ZERO);
        f.log.fail_next_publishes(1);

        let outcome = f.processor.process(request(&reserved("ord-1"))).await.unwrap();

        assert!(!outcome.is_duplicate());
        assert_eq!(f.repository.count().await, 1);
        assert_eq!(f.log.record_count(PAYMENT_TOPIC).await, 0);
    }

    #[tokio::test]
    async fn test_handler_ignores_rejections() {
        let f = fixture(true, Duration::ZERO);
        let rejected = EventEnvelope::builder()
            .event_type(EventType::InventoryRejected)
            .order_id("ord-1")
            .payload(&ReservationPayload {
                order_id: OrderId::from("ord-1"),
                amount: Money::zero(),
                currency: "USD".into(),
                customer_id: CustomerId::new("cust-1"),
            })
            .unwrap()
            .build()
            .unwrap();

        f.processor.handle(&rejected).await.unwrap();
        assert_eq!(f.gateway.calls(), 0);
        assert_eq!(f.repository.count().await, 0);
    }

    #[tokio::test]
    async fn test_reservation_defaults_apply() {
        let f = fixture(true, Duration::ZERO);
        let sparse = EventEnvelope::builder()
            .event_type(EventType::InventoryReserved)
            .order_id("ord-1")
            .payload_raw(serde_json::json!({ "orderId": "ord-1", "customerId": "cust-1" }))
            .build()
            .unwrap();

        f.processor.handle(&sparse).await.unwrap();

        let payments = f.repository.rows().await;
        assert_eq!(payments.len(), 1);
        assert!(payments[0].amount.is_zero());
        assert_eq!(payments[0].currency, "USD");
    }
}
