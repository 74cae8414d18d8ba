//! Order view convergence under reordering, replay and rebuild.

use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use domain::{
    CustomerId, DeliveryPayload, DeliveryStatus, ItemId, Money, OrderCreatedPayload,
    OrderItemDetail, PaymentPayload, PaymentStatus, ReservationPayload,
};
use event_log::{
    Consumer, EventEnvelope, EventPublisher, EventType, InMemoryEventLog, OrderId, Topics,
};
use projections::{
    InMemoryOrderViewStore, OrderView, OrderViewProjection, OrderViewStore, ProjectionProcessor,
    ViewStatus,
};

fn at(t0: DateTime<Utc>, seconds: i64) -> DateTime<Utc> {
    t0 + Duration::seconds(seconds)
}

fn envelope<P: serde::Serialize>(
    event_type: EventType,
    order_id: &str,
    occurred_at: DateTime<Utc>,
    payload: &P,
) -> EventEnvelope {
    EventEnvelope::builder()
        .event_type(event_type)
        .order_id(order_id)
        .occurred_at(occurred_at)
        .payload(payload)
        .unwrap()
        .build()
        .unwrap()
}

/// created, reserved, authorized, assigned, eta.updated for one order.
fn saga_events(order_id: &str, t0: DateTime<Utc>) -> Vec<EventEnvelope> {
    let id = OrderId::from(order_id);
    let total = Money::from_str("50.00").unwrap();
    let eta = at(t0, 45 * 60);
    let delivery = |status_eta: DateTime<Utc>| DeliveryPayload {
        order_id: id.clone(),
        delivery_id: "DEL-0A1B2C3D".into(),
        driver_name: "Jordan Smith".into(),
        status: DeliveryStatus::Assigned,
        estimated_delivery_time: status_eta,
    };

    vec![
        envelope(
            EventType::OrderCreated,
            order_id,
            t0,
            &OrderCreatedPayload {
                customer_id: CustomerId::new("cust-1"),
                total_amount: total,
                currency: "USD".into(),
                items: vec![OrderItemDetail {
                    item_id: ItemId::new("SKU-1"),
                    quantity: 2,
                    unit_price: Money::from_str("25.00").unwrap(),
                }],
            },
        ),
        envelope(
            EventType::InventoryReserved,
            order_id,
            at(t0, 1),
            &ReservationPayload {
                order_id: id.clone(),
                amount: total,
                currency: "USD".into(),
                customer_id: CustomerId::new("cust-1"),
            },
        ),
        envelope(
            EventType::PaymentAuthorized,
            order_id,
            at(t0, 2),
            &PaymentPayload {
                payment_id: Some(17),
                order_id: id.clone(),
                amount: total,
                currency: "USD".into(),
                status: PaymentStatus::Authorized,
                failure_reason: None,
            },
        ),
        envelope(EventType::DeliveryAssigned, order_id, at(t0, 3), &delivery(eta)),
        envelope(
            EventType::EtaUpdated,
            order_id,
            at(t0, 3),
            &delivery(eta + Duration::minutes(7)),
        ),
    ]
}

fn permutations(items: &[usize]) -> Vec<Vec<usize>> {
    if items.len() <= 1 {
        return vec![items.to_vec()];
    }
    let mut all = Vec::new();
    for (i, first) in items.iter().enumerate() {
        let mut rest = items.to_vec();
        rest.remove(i);
        for mut tail in permutations(&rest) {
            tail.insert(0, *first);
            all.push(tail);
        }
    }
    all
}

/// Comparable view with the wall-clock write time normalized.
fn settled(mut view: OrderView) -> OrderView {
    view.updated_at = DateTime::<Utc>::default();
    view
}

async fn fold(events: &[EventEnvelope]) -> OrderView {
    let store = InMemoryOrderViewStore::new();
    let mut processor = ProjectionProcessor::new();
    processor.register(Box::new(OrderViewProjection::new(store.clone())));
    for event in events {
        processor.process_event(event).await.unwrap();
    }
    let order_id = events[0].order_id.clone();
    store.find(&order_id).await.unwrap().unwrap()
}

#[tokio::test]
async fn test_every_arrival_order_converges() {
    let t0 = Utc::now();
    let events = saga_events("ord-1", t0);
    let expected = settled(fold(&events).await);

    assert_eq!(expected.status, ViewStatus::DeliveryAssigned);
    assert_eq!(expected.total_amount, Some(Money::from_str("50.00").unwrap()));
    assert_eq!(expected.payment_id, Some(17));
    assert_eq!(expected.created_at, t0);
    assert_eq!(
        expected.estimated_delivery_time,
        Some(at(t0, 45 * 60) + Duration::minutes(7))
    );

    for order in permutations(&[0, 1, 2, 3, 4]) {
        let shuffled: Vec<EventEnvelope> = order.iter().map(|i| events[*i].clone()).collect();
        assert_eq!(settled(fold(&shuffled).await), expected, "arrival order {order:?}");
    }
}

#[tokio::test]
async fn test_assignment_before_creation() {
    let t0 = Utc::now();
    let events = saga_events("ord-1", t0);
    let store = InMemoryOrderViewStore::new();
    let projection = OrderViewProjection::new(store.clone());
    let mut processor = ProjectionProcessor::new();
    processor.register(Box::new(projection));

    processor.process_event(&events[3]).await.unwrap();
    let partial = store.find(&OrderId::from("ord-1")).await.unwrap().unwrap();
    assert!(partial.is_partial());
    assert_eq!(partial.status, ViewStatus::DeliveryAssigned);
    assert_eq!(partial.driver_name.as_deref(), Some("Jordan Smith"));

    processor.process_event(&events[0]).await.unwrap();
    let merged = store.find(&OrderId::from("ord-1")).await.unwrap().unwrap();
    assert_eq!(merged.status, ViewStatus::DeliveryAssigned);
    assert_eq!(merged.customer_id, Some(CustomerId::new("cust-1")));
    assert_eq!(merged.total_amount, Some(Money::from_str("50.00").unwrap()));
    assert_eq!(merged.currency.as_deref(), Some("USD"));
    assert_eq!(merged.delivery_id.as_deref(), Some("DEL-0A1B2C3D"));
}

#[tokio::test]
async fn test_replay_changes_nothing() {
    let t0 = Utc::now();
    let events = saga_events("ord-1", t0);
    let once = settled(fold(&events).await);

    let twice: Vec<EventEnvelope> = events.iter().chain(events.iter()).cloned().collect();
    assert_eq!(settled(fold(&twice).await), once);
}

#[tokio::test]
async fn test_consumer_materializes_all_topics() {
    let log = InMemoryEventLog::default();
    let topics = Topics::default();
    let t0 = Utc::now();

    // Publish downstream events first, as independent topic consumption may.
    for event in saga_events("ord-1", t0).into_iter().rev() {
        let topic = topics.for_event(event.kind().unwrap());
        log.publish(&topic, &event).await.unwrap();
    }

    let store = InMemoryOrderViewStore::new();
    let mut processor = ProjectionProcessor::new();
    processor.register(Box::new(OrderViewProjection::new(store.clone())));
    let mut consumer = Consumer::new(log.clone(), "order-view-materializer", Arc::new(processor));
    for topic in topics.all_primary() {
        consumer = consumer.subscribe(topic);
    }

    let stats = consumer.run_until_idle().await.unwrap();
    assert_eq!(stats.handled, 5);

    let view = store.find(&OrderId::from("ord-1")).await.unwrap().unwrap();
    assert_eq!(view.status, ViewStatus::DeliveryAssigned);
    assert!(!view.is_partial());
}

#[tokio::test]
async fn test_rebuild_reproduces_the_views() {
    let log = InMemoryEventLog::default();
    let topics = Topics::default();
    let t0 = Utc::now();
    for order_id in ["ord-1", "ord-2"] {
        for event in saga_events(order_id, t0) {
            log.publish(&topics.for_event(event.kind().unwrap()), &event)
                .await
                .unwrap();
        }
    }

    let store = InMemoryOrderViewStore::new();
    let mut processor = ProjectionProcessor::new();
    processor.register(Box::new(OrderViewProjection::new(store.clone())));

    let replayed = processor.rebuild(&log, &topics.all_primary()).await.unwrap();
    assert_eq!(replayed, 10);
    let first: Vec<OrderView> = store.find_all().await.unwrap().into_iter().map(settled).collect();

    processor.rebuild(&log, &topics.all_primary()).await.unwrap();
    let second: Vec<OrderView> = store.find_all().await.unwrap().into_iter().map(settled).collect();

    assert_eq!(first.len(), 2);
    assert_eq!(first, second);
}
