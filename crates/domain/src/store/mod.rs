//! Storage access for the write side.
//!
//! Each service owns one table and reaches it through exactly the
//! operations it needs. Writes happen inside a transaction obtained with
//! `begin`, usually wrapped in a [`TransactionScope`] so events are
//! announced only after the commit.

mod error;
pub mod memory;
pub mod postgres;
mod scope;

use async_trait::async_trait;
use common::OrderId;

pub use error::{Result, StoreError};
pub use memory::{
    InMemoryDeliveryRepository, InMemoryOrderRepository, InMemoryPaymentRepository,
    InMemoryReservationRepository, MemoryRepository, MemoryTransaction,
};
pub use postgres::{
    PgDeliveryRepository, PgOrderRepository, PgPaymentRepository, PgRepository,
    PgReservationRepository, PgTransaction, run_migrations,
};
pub use scope::TransactionScope;

use crate::delivery::Delivery;
use crate::order::Order;
use crate::payment::Payment;
use crate::reservation::Reservation;

/// Unique constraint on `orders.order_id`.
pub const ORDERS_ORDER_ID_KEY: &str = "orders_order_id_key";
/// Unique constraint on `reservations.order_id`.
pub const RESERVATIONS_ORDER_ID_KEY: &str = "reservations_order_id_key";
/// Unique constraint on `payments.order_id`.
pub const PAYMENTS_ORDER_ID_KEY: &str = "payments_order_id_key";
/// Unique constraint on `payments.idempotency_key`.
pub const PAYMENTS_IDEMPOTENCY_KEY: &str = "payments_idempotency_key_key";
/// Unique constraint on `deliveries.order_id`.
pub const DELIVERIES_ORDER_ID_KEY: &str = "deliveries_order_id_key";
/// Unique constraint on `deliveries.delivery_id`.
pub const DELIVERIES_DELIVERY_ID_KEY: &str = "deliveries_delivery_id_key";

/// A unit of atomic work against one store.
#[async_trait]
pub trait StoreTransaction: Send + Sized + 'static {
    async fn commit(self) -> Result<()>;

    async fn rollback(self) -> Result<()>;
}

#[async_trait]
pub trait OrderTransaction: StoreTransaction {
    /// Inserts a new order or updates an existing one, returning it with its id.
    async fn save(&mut self, order: Order) -> Result<Order>;
}

#[async_trait]
pub trait OrderRepository: Send + Sync {
    type Tx: OrderTransaction;

    async fn begin(&self) -> Result<Self::Tx>;

    async fn find_by_order_id(&self, order_id: &OrderId) -> Result<Option<Order>>;
}

#[async_trait]
pub trait ReservationTransaction: StoreTransaction {
    async fn exists_by_order_id(&mut self, order_id: &OrderId) -> Result<bool>;

    /// Inserts the reservation. Reservations are never updated.
    async fn save(&mut self, reservation: Reservation) -> Result<Reservation>;
}

#[async_trait]
pub trait ReservationRepository: Send + Sync {
    type Tx: ReservationTransaction;

    async fn begin(&self) -> Result<Self::Tx>;

    async fn find_by_order_id(&self, order_id: &OrderId) -> Result<Option<Reservation>>;
}

#[async_trait]
pub trait PaymentTransaction: StoreTransaction {
    async fn find_by_order_id(&mut self, order_id: &OrderId) -> Result<Option<Payment>>;

    async fn find_by_idempotency_key(&mut self, key: &str) -> Result<Option<Payment>>;

    async fn exists_by_idempotency_key(&mut self, key: &str) -> Result<bool>;

    /// Inserts a new payment or updates an existing one.
    ///
    /// Fails with [`StoreError::UniqueViolation`] on
    /// [`PAYMENTS_IDEMPOTENCY_KEY`] or [`PAYMENTS_ORDER_ID_KEY`].
    async fn save(&mut self, payment: Payment) -> Result<Payment>;
}

#[async_trait]
pub trait PaymentRepository: Send + Sync {
    type Tx: PaymentTransaction;

    async fn begin(&self) -> Result<Self::Tx>;

    async fn find_by_order_id(&self, order_id: &OrderId) -> Result<Option<Payment>>;

    async fn find_by_idempotency_key(&self, key: &str) -> Result<Option<Payment>>;
}

#[async_trait]
pub trait DeliveryTransaction: StoreTransaction {
    async fn exists_by_order_id(&mut self, order_id: &OrderId) -> Result<bool>;

    /// Inserts a new delivery or updates an existing one.
    async fn save(&mut self, delivery: Delivery) -> Result<Delivery>;
}

#[async_trait]
pub trait DeliveryRepository: Send + Sync {
    type Tx: DeliveryTransaction;

    async fn begin(&self) -> Result<Self::Tx>;

    async fn find_by_order_id(&self, order_id: &OrderId) -> Result<Option<Delivery>>;
}
