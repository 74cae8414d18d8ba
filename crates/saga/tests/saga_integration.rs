//! The four services wired through the in-memory event log.

use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use domain::store::{
    InMemoryDeliveryRepository, InMemoryOrderRepository, InMemoryPaymentRepository,
    InMemoryReservationRepository, PaymentRepository, ReservationRepository,
};
use domain::{CustomerId, ItemId, Money, PaymentStatus, ReservationStatus};
use event_log::consumer::{HEADER_ATTEMPTS, HEADER_ORIGINAL_TOPIC};
use event_log::{
    Consumer, EventEnvelope, EventType, InMemoryEventLog, OrderId, RetryConfig, Topics,
    dead_letter_topic,
};
use saga::{
    Always, DeliveryAssigner, InMemoryDedupCache, InMemoryLockRegistry, InventoryReserver,
    NewOrder, NewOrderItem, OrderOriginator, PaymentConfig, PaymentProcessor, SimulatedDispatch,
    SimulatedGateway, SimulatedStockCheck,
};

const ORDER_TOPIC: &str = "raw.order-events";
const INVENTORY_TOPIC: &str = "raw.inventory-events";
const PAYMENT_TOPIC: &str = "raw.payment-events";
const DELIVERY_TOPIC: &str = "raw.delivery-events";

struct Harness {
    log: InMemoryEventLog,
    originator: OrderOriginator<InMemoryOrderRepository>,
    reservations: InMemoryReservationRepository,
    payments: InMemoryPaymentRepository,
    deliveries: InMemoryDeliveryRepository,
    gateway: Arc<SimulatedGateway>,
    inventory: Consumer<InventoryReserver<InMemoryReservationRepository>>,
    payment: Consumer<PaymentProcessor<InMemoryPaymentRepository, InMemoryLockRegistry>>,
    delivery: Consumer<DeliveryAssigner<InMemoryDeliveryRepository>>,
}

impl Harness {
    fn new(in_stock: bool, approve: bool) -> Self {
        let log = InMemoryEventLog::default();
        let topics = Topics::default();
        let retry = RetryConfig::immediate(3);

        let originator = OrderOriginator::new(
            InMemoryOrderRepository::new(),
            Arc::new(log.clone()),
            topics.clone(),
        );

        let reservations = InMemoryReservationRepository::new();
        let reserver = InventoryReserver::new(
            reservations.clone(),
            Arc::new(SimulatedStockCheck::new(Duration::ZERO, Arc::new(Always(in_stock)))),
            Arc::new(log.clone()),
            topics.clone(),
        );

        let payments = InMemoryPaymentRepository::new();
        let gateway = Arc::new(SimulatedGateway::new(Duration::ZERO, Arc::new(Always(approve))));
        let processor = PaymentProcessor::new(
            payments.clone(),
            InMemoryLockRegistry::new(),
            Arc::new(InMemoryDedupCache::new()),
            gateway.clone(),
            Arc::new(log.clone()),
            topics.clone(),
            PaymentConfig::default(),
        );

        let deliveries = InMemoryDeliveryRepository::new();
        let assigner = DeliveryAssigner::new(
            deliveries.clone(),
            Arc::new(SimulatedDispatch::new(Some(3))),
            Arc::new(log.clone()),
            topics.clone(),
        );

        Self {
            inventory: Consumer::new(log.clone(), "inventory-service", Arc::new(reserver))
                .subscribe(ORDER_TOPIC)
                .with_retry(retry.clone()),
            payment: Consumer::new(log.clone(), "payment-service", Arc::new(processor))
                .subscribe(INVENTORY_TOPIC)
                .with_retry(retry.clone()),
            delivery: Consumer::new(log.clone(), "delivery-service", Arc::new(assigner))
                .subscribe(PAYMENT_TOPIC)
                .with_retry(retry),
            log,
            originator,
            reservations,
            payments,
            deliveries,
            gateway,
        }
    }

    async fn settle(&self) {
        loop {
            let handled = self.inventory.run_until_idle().await.unwrap().handled
                + self.payment.run_until_idle().await.unwrap().handled
                + self.delivery.run_until_idle().await.unwrap().handled;
            if handled == 0 {
                break;
            }
        }
    }

    async fn place_order(&self) -> OrderId {
        let order = self
            .originator
            .create_order(NewOrder {
                customer_id: CustomerId::new("cust-1"),
                currency: "USD".into(),
                items: vec![NewOrderItem {
                    item_id: ItemId::new("SKU-1"),
                    quantity: 2,
                    unit_price: Money::from_str("25.00").unwrap(),
                }],
            })
            .await
            .unwrap();
        order.order_id
    }

    async fn types(&self, topic: &str) -> Vec<EventType> {
        self.log
            .envelopes(topic)
            .await
            .unwrap()
            .iter()
            .filter_map(EventEnvelope::kind)
            .collect()
    }
}

#[tokio::test]
async fn test_happy_path_reaches_delivery() {
    let h = Harness::new(true, true);
    let order_id = h.place_order().await;
    h.settle().await;

    assert_eq!(h.types(INVENTORY_TOPIC).await, vec![EventType::InventoryReserved]);
    assert_eq!(h.types(PAYMENT_TOPIC).await, vec![EventType::PaymentAuthorized]);
    assert_eq!(
        h.types(DELIVERY_TOPIC).await,
        vec![EventType::DeliveryAssigned, EventType::EtaUpdated]
    );

    let payment = h.payments.find_by_order_id(&order_id).await.unwrap().unwrap();
    assert_eq!(payment.status, PaymentStatus::Authorized);
    assert_eq!(payment.amount, Money::from_str("50.00").unwrap());
    assert_eq!(h.deliveries.count().await, 1);

    // Every event of the saga carries the order id as correlation id.
    for topic in [ORDER_TOPIC, INVENTORY_TOPIC, PAYMENT_TOPIC, DELIVERY_TOPIC] {
        for envelope in h.log.envelopes(topic).await.unwrap() {
            assert_eq!(envelope.correlation_id(), order_id.as_str());
        }
    }
}

#[tokio::test]
async fn test_rejection_ends_the_saga() {
    let h = Harness::new(false, true);
    let order_id = h.place_order().await;
    h.settle().await;

    let reservation = h.reservations.find_by_order_id(&order_id).await.unwrap().unwrap();
    assert_eq!(reservation.status, ReservationStatus::Rejected);
    assert_eq!(h.types(INVENTORY_TOPIC).await, vec![EventType::InventoryRejected]);
    assert_eq!(h.gateway.calls(), 0);
    assert_eq!(h.log.record_count(PAYMENT_TOPIC).await, 0);
    assert_eq!(h.log.record_count(DELIVERY_TOPIC).await, 0);
}

#[tokio::test]
async fn test_decline_ends_the_saga() {
    let h = Harness::new(true, false);
    let order_id = h.place_order().await;
    h.settle().await;

    let payment = h.payments.find_by_order_id(&order_id).await.unwrap().unwrap();
    assert_eq!(payment.status, PaymentStatus::Failed);
    assert_eq!(payment.failure_reason.as_deref(), Some("Payment declined"));
    assert_eq!(h.types(PAYMENT_TOPIC).await, vec![EventType::PaymentFailed]);
    assert_eq!(h.log.record_count(DELIVERY_TOPIC).await, 0);
}

#[tokio::test]
async fn test_redelivered_events_change_nothing() {
    let h = Harness::new(true, true);
    h.place_order().await;
    h.settle().await;

    // The transport hands every record to its consumers once more.
    for topic in [ORDER_TOPIC, INVENTORY_TOPIC, PAYMENT_TOPIC] {
        for record in h.log.records(topic).await {
            h.log
                .append(topic, &record.key, record.value.clone(), BTreeMap::new())
                .await;
        }
    }
    h.settle().await;

    assert_eq!(h.reservations.count().await, 1);
    assert_eq!(h.payments.count().await, 1);
    assert_eq!(h.deliveries.count().await, 1);
    assert_eq!(h.gateway.calls(), 1);
    assert_eq!(h.log.record_count(INVENTORY_TOPIC).await, 2);
    assert_eq!(h.log.record_count(PAYMENT_TOPIC).await, 2);
    assert_eq!(h.log.record_count(DELIVERY_TOPIC).await, 2);
}

#[tokio::test]
async fn test_malformed_reservation_is_dead_lettered() {
    let h = Harness::new(true, true);
    let poison = EventEnvelope::builder()
        .event_type(EventType::InventoryReserved)
        .order_id("ord-poison")
        .payload_raw(serde_json::json!({ "customerId": ["not", "a", "string"] }))
        .build()
        .unwrap();
    h.log
        .append(
            INVENTORY_TOPIC,
            "ord-poison",
            poison.to_json().unwrap(),
            BTreeMap::new(),
        )
        .await;

    h.settle().await;

    let dead = h.log.records(&dead_letter_topic(INVENTORY_TOPIC)).await;
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].headers[HEADER_ATTEMPTS], "3");
    assert_eq!(dead[0].headers[HEADER_ORIGINAL_TOPIC], INVENTORY_TOPIC);
    assert_eq!(h.payments.count().await, 0);
    assert_eq!(h.gateway.calls(), 0);
}
