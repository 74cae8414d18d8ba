//! Originates orders and starts the choreography.

use std::sync::Arc;

use common::OrderId;
use domain::store::{OrderRepository, OrderTransaction};
use domain::{CustomerId, ItemId, Money, Order, OrderCreatedPayload, OrderError, OrderItem, TransactionScope};
use event_log::{EventPublisher, EventType, Topics, ORDER_SERVICE};
use serde::{Deserialize, Serialize};

use super::{announce_after_commit, envelope};
use crate::error::Result;

/// A request to place an order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewOrder {
    pub customer_id: CustomerId,
    pub currency: String,
    #[serde(default)]
    pub items: Vec<NewOrderItem>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewOrderItem {
    pub item_id: ItemId,
    pub quantity: u32,
    pub unit_price: Money,
}

pub struct OrderOriginator<R> {
    repository: R,
    publisher: Arc<dyn EventPublisher>,
    topics: Topics,
}

impl<R: OrderRepository> OrderOriginator<R> {
    pub fn new(repository: R, publisher: Arc<dyn EventPublisher>, topics: Topics) -> Self {
        Self {
            repository,
            publisher,
            topics,
        }
    }

    /// Validates and persists a new order, then announces `order.created`.
    ///
    /// The order id doubles as the correlation id of the whole saga.
    #[tracing::instrument(skip(self, request), fields(customer_id = %request.customer_id))]
    pub async fn create_order(&self, request: NewOrder) -> Result<Order> {
        if request.items.is_empty() {
            return Err(OrderError::NoItems.into());
        }

        let mut order = Order::new(request.customer_id, request.currency)?;
        for item in request.items {
            order.add_item(OrderItem::new(item.item_id, item.quantity, item.unit_price))?;
        }

        let mut scope = TransactionScope::new(self.repository.begin().await?);
        let order = match scope.tx().save(order).await {
            Ok(order) => order,
            Err(err) => {
                scope.rollback().await?;
                return Err(err.into());
            }
        };

        let created = envelope(
            EventType::OrderCreated,
            &order.order_id,
            order.order_id.as_str(),
            ORDER_SERVICE,
            &OrderCreatedPayload::from(&order),
        )?;
        announce_after_commit(
            &mut scope,
            Arc::clone(&self.publisher),
            self.topics.for_event(EventType::OrderCreated),
            created,
        );
        scope.commit().await?;

        metrics::counter!("orders_created_total").increment(1);
        tracing::info!(
            order_id = %order.order_id,
            total = %order.total_amount(),
            "order created"
        );
        Ok(order)
    }

    pub async fn get_order(&self, order_id: &OrderId) -> Result<Option<Order>> {
        Ok(self.repository.find_by_order_id(order_id).await?)
    }
}
