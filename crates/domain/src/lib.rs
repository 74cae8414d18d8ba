//! Write side of the order fulfillment saga.
//!
//! This crate provides:
//! - the entities each service persists (order, reservation, payment, delivery)
//! - the order status machine the saga drives
//! - payload schemas for every event type
//! - transactional stores with post-commit hooks, in memory and on PostgreSQL

pub mod delivery;
pub mod events;
pub mod order;
pub mod payment;
pub mod reservation;
pub mod store;

pub use common::OrderId;
pub use delivery::{Delivery, DeliveryError, DeliveryStatus};
pub use events::{
    DeliveryPayload, OrderCreatedPayload, OrderItemDetail, PaymentPayload, ReservationPayload,
};
pub use order::{CustomerId, ItemId, Money, Order, OrderError, OrderItem, OrderStatus};
pub use payment::{DECLINED_REASON, Payment, PaymentError, PaymentStatus};
pub use reservation::{Reservation, ReservationStatus};
pub use store::{StoreError, StoreTransaction, TransactionScope};
