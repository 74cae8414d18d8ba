//! Orders owned by the order service.

mod entity;
mod status;
mod value_objects;

pub use entity::Order;
pub use status::OrderStatus;
pub use value_objects::{CustomerId, ItemId, Money, OrderItem};

use thiserror::Error;

/// Errors that can occur during order operations.
#[derive(Debug, Error)]
pub enum OrderError {
    #[error("Customer ID is required")]
    CustomerIdRequired,

    #[error("Currency is required")]
    CurrencyRequired,

    #[error("Order has no items")]
    NoItems,

    #[error("Invalid quantity for {item_id}: {quantity} (must be greater than 0)")]
    InvalidQuantity { item_id: String, quantity: u32 },

    #[error("Invalid price for {item_id}: {price} (must not be negative)")]
    InvalidPrice { item_id: String, price: Money },

    #[error("Order amount overflows at item {item_id}")]
    AmountOverflow { item_id: String },

    #[error("Item not found: {item_id}")]
    ItemNotFound { item_id: String },

    #[error("Invalid status transition: {from} -> {to}")]
    InvalidStatusTransition {
        from: OrderStatus,
        to: OrderStatus,
    },
}
