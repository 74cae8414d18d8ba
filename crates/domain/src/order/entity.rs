use chrono::{DateTime, Utc};
use common::OrderId;
use serde::{Deserialize, Serialize};

use super::{CustomerId, ItemId, Money, OrderError, OrderItem, OrderStatus};

/// An order as persisted by the order service.
///
/// `total_amount` always equals the sum of the items' totals; every
/// operation that touches items recomputes it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    /// Surrogate key assigned by the store.
    #[serde(skip)]
    pub id: Option<i64>,
    pub order_id: OrderId,
    pub customer_id: CustomerId,
    pub currency: String,
    total_amount: Money,
    pub status: OrderStatus,
    items: Vec<OrderItem>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    /// Starts a new order with no items.
    pub fn new(customer_id: CustomerId, currency: impl Into<String>) -> Result<Self, OrderError> {
        let currency = currency.into();
        if customer_id.as_str().trim().is_empty() {
            return Err(OrderError::CustomerIdRequired);
        }
        if currency.trim().is_empty() {
            return Err(OrderError::CurrencyRequired);
        }

        let now = Utc::now();
        Ok(Self {
            id: None,
            order_id: OrderId::new(),
            customer_id,
            currency,
            total_amount: Money::zero(),
            status: OrderStatus::Created,
            items: Vec::new(),
            created_at: now,
            updated_at: now,
        })
    }

    /// Rebuilds an order read back from storage.
    #[allow(clippy::too_many_arguments)]
    pub fn restore(
        id: i64,
        order_id: OrderId,
        customer_id: CustomerId,
        currency: String,
        status: OrderStatus,
        items: Vec<OrderItem>,
        created_at: DateTime<Utc>,
        updated_at: DateTime<Utc>,
    ) -> Result<Self, OrderError> {
        let total_amount = total_of(&items)?;
        Ok(Self {
            id: Some(id),
            order_id,
            customer_id,
            currency,
            total_amount,
            status,
            items,
            created_at,
            updated_at,
        })
    }

    pub fn total_amount(&self) -> Money {
        self.total_amount
    }

    pub fn items(&self) -> &[OrderItem] {
        &self.items
    }

    pub fn add_item(&mut self, item: OrderItem) -> Result<(), OrderError> {
        if item.quantity == 0 {
            return Err(OrderError::InvalidQuantity {
                item_id: item.item_id.to_string(),
                quantity: item.quantity,
            });
        }
        if item.unit_price.is_negative() {
            return Err(OrderError::InvalidPrice {
                item_id: item.item_id.to_string(),
                price: item.unit_price,
            });
        }

        let total_amount = item
            .total_price()
            .and_then(|line| self.total_amount.checked_add(line))
            .ok_or_else(|| OrderError::AmountOverflow {
                item_id: item.item_id.to_string(),
            })?;

        self.items.push(item);
        self.total_amount = total_amount;
        self.updated_at = Utc::now();
        Ok(())
    }

    pub fn remove_item(&mut self, item_id: &ItemId) -> Result<OrderItem, OrderError> {
        let index = self
            .items
            .iter()
            .position(|item| &item.item_id == item_id)
            .ok_or_else(|| OrderError::ItemNotFound {
                item_id: item_id.to_string(),
            })?;

        let removed = self.items.remove(index);
        self.total_amount = total_of(&self.items)?;
        self.updated_at = Utc::now();
        Ok(removed)
    }

    /// Moves the order along the saga, rejecting moves the status machine
    /// does not allow.
    ///
    /// The originator never advances its own row today; downstream progress
    /// lives in the order view. This is the guard a listener that mirrors
    /// saga events back onto the order row must go through.
    pub fn transition_to(&mut self, next: OrderStatus) -> Result<(), OrderError> {
        if !self.status.can_transition_to(next) {
            return Err(OrderError::InvalidStatusTransition {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        self.updated_at = Utc::now();
        Ok(())
    }

}

fn total_of(items: &[OrderItem]) -> Result<Money, OrderError> {
    items.iter().try_fold(Money::zero(), |total, item| {
        item.total_price()
            .and_then(|line| total.checked_add(line))
            .ok_or_else(|| OrderError::AmountOverflow {
                item_id: item.item_id.to_string(),
            })
    })
}
