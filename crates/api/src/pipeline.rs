//! Assembles the saga: one event log, four services, one materializer.
//!
//! Every service gets its own consumer group so each sees every record of
//! the topics it subscribes to. The materializer listens to all primary
//! topics.

use std::sync::Arc;

use domain::store::{
    InMemoryDeliveryRepository, InMemoryOrderRepository, InMemoryPaymentRepository,
    InMemoryReservationRepository,
};
use event_log::{
    Consumer, DELIVERY_SERVICE, EventDomain, EventPublisher, INVENTORY_SERVICE, InMemoryEventLog,
    PAYMENT_SERVICE, Result, Topics,
};
use projections::{InMemoryOrderViewStore, OrderViewProjection, ProjectionProcessor};
use saga::{
    DeliveryAssigner, InMemoryDedupCache, InMemoryLockRegistry, InventoryReserver,
    OrderOriginator, PaymentProcessor, Probability, SimulatedDispatch, SimulatedGateway,
    SimulatedStockCheck,
};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::{AppState, Config};

pub const MATERIALIZER_GROUP: &str = "order-view-materializer";

type Reserver = InventoryReserver<InMemoryReservationRepository>;
type Processor = PaymentProcessor<InMemoryPaymentRepository, InMemoryLockRegistry>;
type Assigner = DeliveryAssigner<InMemoryDeliveryRepository>;

pub struct Pipeline {
    log: InMemoryEventLog,
    state: AppState,
    inventory: Consumer<Reserver>,
    payment: Consumer<Processor>,
    delivery: Consumer<Assigner>,
    materializer: Consumer<ProjectionProcessor>,
}

impl Pipeline {
    pub fn new(config: &Config) -> Self {
        let log = InMemoryEventLog::new(config.topic_partitions);
        let topics = config.topics();
        let publisher: Arc<dyn EventPublisher> = Arc::new(log.clone());

        let orders = Arc::new(OrderOriginator::new(
            InMemoryOrderRepository::new(),
            publisher.clone(),
            topics.clone(),
        ));

        let stock = SimulatedStockCheck::new(
            config.stock_latency,
            Arc::new(Probability::new(config.stock_success_rate, config.seed_for(0))),
        );
        let reserver = InventoryReserver::new(
            InMemoryReservationRepository::new(),
            Arc::new(stock),
            publisher.clone(),
            topics.clone(),
        );

        let gateway = SimulatedGateway::new(
            config.gateway_latency,
            Arc::new(Probability::new(config.gateway_success_rate, config.seed_for(1))),
        );
        let processor = PaymentProcessor::new(
            InMemoryPaymentRepository::new(),
            InMemoryLockRegistry::new(),
            Arc::new(InMemoryDedupCache::new()),
            Arc::new(gateway),
            publisher.clone(),
            topics.clone(),
            config.payment.clone(),
        );

        let assigner = DeliveryAssigner::new(
            InMemoryDeliveryRepository::new(),
            Arc::new(SimulatedDispatch::new(config.seed_for(2))),
            publisher,
            topics.clone(),
        );

        let views = InMemoryOrderViewStore::new();
        let mut materializer = ProjectionProcessor::new();
        materializer.register(Box::new(OrderViewProjection::new(views.clone())));

        let inventory = Consumer::new(log.clone(), INVENTORY_SERVICE, Arc::new(reserver))
            .subscribe(topics.primary(EventDomain::Order))
            .with_retry(config.retry.clone());
        let payment = Consumer::new(log.clone(), PAYMENT_SERVICE, Arc::new(processor))
            .subscribe(topics.primary(EventDomain::Inventory))
            .with_retry(config.retry.clone());
        let delivery = Consumer::new(log.clone(), DELIVERY_SERVICE, Arc::new(assigner))
            .subscribe(topics.primary(EventDomain::Payment))
            .with_retry(config.retry.clone());

        let materializer = topics.all_primary().into_iter().fold(
            Consumer::new(log.clone(), MATERIALIZER_GROUP, Arc::new(materializer))
                .with_retry(config.retry.clone()),
            |consumer, topic| consumer.subscribe(topic),
        );

        Self {
            log,
            state: AppState {
                orders,
                views,
                topics,
            },
            inventory,
            payment,
            delivery,
            materializer,
        }
    }

    pub fn state(&self) -> AppState {
        self.state.clone()
    }

    pub fn log(&self) -> &InMemoryEventLog {
        &self.log
    }

    pub fn topics(&self) -> &Topics {
        &self.state.topics
    }

    /// Drives every consumer until no record is left anywhere.
    ///
    /// Deterministic alternative to [`Pipeline::spawn`] for tests and tools.
    pub async fn run_until_idle(&self) -> Result<usize> {
        let mut total = 0;
        loop {
            let handled = self.inventory.run_until_idle().await?.handled
                + self.payment.run_until_idle().await?.handled
                + self.delivery.run_until_idle().await?.handled
                + self.materializer.run_until_idle().await?.handled;
            if handled == 0 {
                return Ok(total);
            }
            total += handled;
        }
    }

    /// Starts every consumer on its own task. They stop once `shutdown`
    /// flips to `true`.
    pub fn spawn(self, shutdown: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        tracing::info!(
            namespace = %self.state.topics.namespace(),
            partitions = self.log.partitions(),
            "Starting consumers"
        );
        vec![
            tokio::spawn(self.inventory.run(shutdown.clone())),
            tokio::spawn(self.payment.run(shutdown.clone())),
            tokio::spawn(self.delivery.run(shutdown.clone())),
            tokio::spawn(self.materializer.run(shutdown)),
        ]
    }
}
