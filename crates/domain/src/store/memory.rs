//! In-memory stores with the same uniqueness semantics as the SQL schema.
//!
//! Uniqueness is checked when a row is staged against committed rows and
//! checked again at commit, so two transactions racing on the same key
//! behave like they do against PostgreSQL: one commits, the other gets
//! [`StoreError::UniqueViolation`].

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use common::OrderId;
use tokio::sync::RwLock;

use super::{
    DELIVERIES_DELIVERY_ID_KEY, DELIVERIES_ORDER_ID_KEY, DeliveryRepository, DeliveryTransaction,
    ORDERS_ORDER_ID_KEY, OrderRepository, OrderTransaction, PAYMENTS_IDEMPOTENCY_KEY,
    PAYMENTS_ORDER_ID_KEY, PaymentRepository, PaymentTransaction, RESERVATIONS_ORDER_ID_KEY,
    ReservationRepository, ReservationTransaction, Result, StoreError, StoreTransaction,
};
use crate::delivery::Delivery;
use crate::order::Order;
use crate::payment::Payment;
use crate::reservation::Reservation;

/// A row type that can live in a [`MemoryRepository`].
pub trait TableRow: Clone + Send + Sync + 'static {
    fn id(&self) -> Option<i64>;

    fn set_id(&mut self, id: i64);

    fn order_id(&self) -> &OrderId;

    /// `(constraint name, value)` pairs that must be unique across the table.
    fn unique_keys(&self) -> Vec<(&'static str, String)>;
}

impl TableRow for Order {
    fn id(&self) -> Option<i64> {
        self.id
    }

    fn set_id(&mut self, id: i64) {
        self.id = Some(id);
    }

    fn order_id(&self) -> &OrderId {
        &self.order_id
    }

    fn unique_keys(&self) -> Vec<(&'static str, String)> {
        vec![(ORDERS_ORDER_ID_KEY, self.order_id.to_string())]
    }
}

impl TableRow for Reservation {
    fn id(&self) -> Option<i64> {
        self.id
    }

    fn set_id(&mut self, id: i64) {
        self.id = Some(id);
    }

    fn order_id(&self) -> &OrderId {
        &self.order_id
    }

    fn unique_keys(&self) -> Vec<(&'static str, String)> {
        vec![(RESERVATIONS_ORDER_ID_KEY, self.order_id.to_string())]
    }
}

impl TableRow for Payment {
    fn id(&self) -> Option<i64> {
        self.id
    }

    fn set_id(&mut self, id: i64) {
        self.id = Some(id);
    }

    fn order_id(&self) -> &OrderId {
        &self.order_id
    }

    fn unique_keys(&self) -> Vec<(&'static str, String)> {
        vec![
            (PAYMENTS_IDEMPOTENCY_KEY, self.idempotency_key.clone()),
            (PAYMENTS_ORDER_ID_KEY, self.order_id.to_string()),
        ]
    }
}

impl TableRow for Delivery {
    fn id(&self) -> Option<i64> {
        self.id
    }

    fn set_id(&mut self, id: i64) {
        self.id = Some(id);
    }

    fn order_id(&self) -> &OrderId {
        &self.order_id
    }

    fn unique_keys(&self) -> Vec<(&'static str, String)> {
        vec![
            (DELIVERIES_ORDER_ID_KEY, self.order_id.to_string()),
            (DELIVERIES_DELIVERY_ID_KEY, self.delivery_id.clone()),
        ]
    }
}

struct Table<R> {
    rows: BTreeMap<i64, R>,
    next_id: i64,
}

impl<R> Default for Table<R> {
    fn default() -> Self {
        Self {
            rows: BTreeMap::new(),
            next_id: 1,
        }
    }
}

/// First constraint `row` would violate against `others`.
fn conflict<'a, R: TableRow>(row: &R, others: impl Iterator<Item = &'a R>) -> Option<&'static str> {
    let keys = row.unique_keys();
    others
        .filter(|other| other.id() != row.id())
        .find_map(|other| {
            let taken = other.unique_keys();
            keys.iter()
                .find(|key| taken.contains(key))
                .map(|(constraint, _)| *constraint)
        })
}

/// Table of rows kept in memory, for tests and single-process runs.
pub struct MemoryRepository<R> {
    table: Arc<RwLock<Table<R>>>,
}

pub type InMemoryOrderRepository = MemoryRepository<Order>;
pub type InMemoryReservationRepository = MemoryRepository<Reservation>;
pub type InMemoryPaymentRepository = MemoryRepository<Payment>;
pub type InMemoryDeliveryRepository = MemoryRepository<Delivery>;

impl<R> Clone for MemoryRepository<R> {
    fn clone(&self) -> Self {
        Self {
            table: self.table.clone(),
        }
    }
}

impl<R> Default for MemoryRepository<R> {
    fn default() -> Self {
        Self {
            table: Arc::new(RwLock::new(Table::default())),
        }
    }
}

impl<R: TableRow> MemoryRepository<R> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Committed rows in id order.
    pub async fn rows(&self) -> Vec<R> {
        self.table.read().await.rows.values().cloned().collect()
    }

    pub async fn count(&self) -> usize {
        self.table.read().await.rows.len()
    }

    /// Removes every committed row.
    pub async fn clear(&self) {
        self.table.write().await.rows.clear();
    }

    async fn find_committed<F>(&self, predicate: F) -> Option<R>
    where
        F: Fn(&R) -> bool + Send,
    {
        let table = self.table.read().await;
        table.rows.values().find(|row| predicate(row)).cloned()
    }

    async fn find_by_order(&self, order_id: &OrderId) -> Option<R> {
        self.find_committed(|row| row.order_id() == order_id).await
    }

    fn transaction(&self) -> MemoryTransaction<R> {
        MemoryTransaction {
            table: self.table.clone(),
            staged: Vec::new(),
        }
    }
}

/// Writes staged against a [`MemoryRepository`] until commit.
pub struct MemoryTransaction<R> {
    table: Arc<RwLock<Table<R>>>,
    staged: Vec<R>,
}

impl<R: TableRow> MemoryTransaction<R> {
    /// Looks at this transaction's own writes first, then committed rows.
    async fn find<F>(&self, predicate: F) -> Option<R>
    where
        F: Fn(&R) -> bool + Send,
    {
        if let Some(row) = self.staged.iter().rev().find(|row| predicate(row)) {
            return Some(row.clone());
        }
        let table = self.table.read().await;
        table.rows.values().find(|row| predicate(row)).cloned()
    }

    async fn stage(&mut self, mut row: R) -> Result<R> {
        {
            let mut table = self.table.write().await;
            if row.id().is_none() {
                let id = table.next_id;
                table.next_id += 1;
                row.set_id(id);
            }

            let violated = conflict(&row, table.rows.values())
                .or_else(|| conflict(&row, self.staged.iter()));
            if let Some(constraint) = violated {
                return Err(StoreError::UniqueViolation {
                    constraint: constraint.to_string(),
                });
            }
        }

        match self.staged.iter_mut().find(|staged| staged.id() == row.id()) {
            Some(staged) => *staged = row.clone(),
            None => self.staged.push(row.clone()),
        }
        Ok(row)
    }
}

#[async_trait]
impl<R: TableRow> StoreTransaction for MemoryTransaction<R> {
    async fn commit(self) -> Result<()> {
        let Self { table, staged } = self;
        let mut table = table.write().await;

        for row in &staged {
            if let Some(constraint) = conflict(row, table.rows.values()) {
                return Err(StoreError::UniqueViolation {
                    constraint: constraint.to_string(),
                });
            }
        }
        for row in staged {
            if let Some(id) = row.id() {
                table.rows.insert(id, row);
            }
        }
        Ok(())
    }

    async fn rollback(self) -> Result<()> {
        Ok(())
    }
}

#[async_trait]
impl OrderTransaction for MemoryTransaction<Order> {
    async fn save(&mut self, order: Order) -> Result<Order> {
        self.stage(order).await
    }
}

#[async_trait]
impl OrderRepository for MemoryRepository<Order> {
    type Tx = MemoryTransaction<Order>;

    async fn begin(&self) -> Result<Self::Tx> {
        Ok(self.transaction())
    }

    async fn find_by_order_id(&self, order_id: &OrderId) -> Result<Option<Order>> {
        Ok(self.find_by_order(order_id).await)
    }
}

#[async_trait]
impl ReservationTransaction for MemoryTransaction<Reservation> {
    async fn exists_by_order_id(&mut self, order_id: &OrderId) -> Result<bool> {
        Ok(self.find(|row| &row.order_id == order_id).await.is_some())
    }

    async fn save(&mut self, reservation: Reservation) -> Result<Reservation> {
        self.stage(reservation).await
    }
}

#[async_trait]
impl ReservationRepository for MemoryRepository<Reservation> {
    type Tx = MemoryTransaction<Reservation>;

    async fn begin(&self) -> Result<Self::Tx> {
        Ok(self.transaction())
    }

    async fn find_by_order_id(&self, order_id: &OrderId) -> Result<Option<Reservation>> {
        Ok(self.find_by_order(order_id).await)
    }
}

#[async_trait]
impl PaymentTransaction for MemoryTransaction<Payment> {
    async fn find_by_order_id(&mut self, order_id: &OrderId) -> Result<Option<Payment>> {
        Ok(self.find(|row| &row.order_id == order_id).await)
    }

    async fn find_by_idempotency_key(&mut self, key: &str) -> Result<Option<Payment>> {
        Ok(self.find(|row| row.idempotency_key == key).await)
    }

    async fn exists_by_idempotency_key(&mut self, key: &str) -> Result<bool> {
        Ok(self.find(|row| row.idempotency_key == key).await.is_some())
    }

    async fn save(&mut self, payment: Payment) -> Result<Payment> {
        self.stage(payment).await
    }
}

#[async_trait]
impl PaymentRepository for MemoryRepository<Payment> {
    type Tx = MemoryTransaction<Payment>;

    async fn begin(&self) -> Result<Self::Tx> {
        Ok(self.transaction())
    }

    async fn find_by_order_id(&self, order_id: &OrderId) -> Result<Option<Payment>> {
        Ok(self.find_by_order(order_id).await)
    }

    async fn find_by_idempotency_key(&self, key: &str) -> Result<Option<Payment>> {
        Ok(self.find_committed(|row| row.idempotency_key == key).await)
    }
}

#[async_trait]
impl DeliveryTransaction for MemoryTransaction<Delivery> {
    async fn exists_by_order_id(&mut self, order_id: &OrderId) -> Result<bool> {
        Ok(self.find(|row| &row.order_id == order_id).await.is_some())
    }

    async fn save(&mut self, delivery: Delivery) -> Result<Delivery> {
        self.stage(delivery).await
    }
}

#[async_trait]
impl DeliveryRepository for MemoryRepository<Delivery> {
    type Tx = MemoryTransaction<Delivery>;

    async fn begin(&self) -> Result<Self::Tx> {
        Ok(self.transaction())
    }

    async fn find_by_order_id(&self, order_id: &OrderId) -> Result<Option<Delivery>> {
        Ok(self.find_by_order(order_id).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::order::{CustomerId, Money};
    use crate::reservation::ReservationStatus;

    fn payment(order: &str, key: &str) -> Payment {
        Payment::pending(OrderId::from(order), key, Money::from_minor(5000), "USD")
    }

    #[tokio::test]
    async fn commit_assigns_ids_and_publishes_rows() {
        let repo = InMemoryPaymentRepository::new();
        let mut tx = repo.begin().await.unwrap();
        let saved = tx.save(payment("ord-1", "evt-1")).await.unwrap();
        assert_eq!(saved.id, Some(1));

        assert_eq!(repo.count().await, 0);
        tx.commit().await.unwrap();
        assert_eq!(repo.count().await, 1);
        assert_eq!(
            repo.find_by_idempotency_key("evt-1").await.unwrap().unwrap().id,
            Some(1)
        );
    }

    #[tokio::test]
    async fn transaction_sees_its_own_writes() {
        let repo = InMemoryPaymentRepository::new();
        let mut tx = repo.begin().await.unwrap();
        tx.save(payment("ord-1", "evt-1")).await.unwrap();

        assert!(tx.exists_by_idempotency_key("evt-1").await.unwrap());
        assert!(tx.find_by_order_id(&OrderId::from("ord-1")).await.unwrap().is_some());
        assert!(repo.find_by_order_id(&OrderId::from("ord-1")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn rollback_discards_writes() {
        let repo = InMemoryPaymentRepository::new();
        let mut tx = repo.begin().await.unwrap();
        tx.save(payment("ord-1", "evt-1")).await.unwrap();
        tx.rollback().await.unwrap();

        assert_eq!(repo.count().await, 0);
    }

    #[tokio::test]
    async fn duplicate_idempotency_key_is_rejected_at_save() {
        let repo = InMemoryPaymentRepository::new();
        let mut tx = repo.begin().await.unwrap();
        tx.save(payment("ord-1", "evt-1")).await.unwrap();
        tx.commit().await.unwrap();

        let mut tx = repo.begin().await.unwrap();
        let err = tx.save(payment("ord-2", "evt-1")).await.unwrap_err();
        assert!(err.violates(PAYMENTS_IDEMPOTENCY_KEY));
    }

    #[tokio::test]
    async fn second_payment_for_same_order_is_rejected() {
        let repo = InMemoryPaymentRepository::new();
        let mut tx = repo.begin().await.unwrap();
        tx.save(payment("ord-1", "evt-1")).await.unwrap();
        tx.commit().await.unwrap();

        let mut tx = repo.begin().await.unwrap();
        let err = tx.save(payment("ord-1", "evt-2")).await.unwrap_err();
        assert!(err.violates(PAYMENTS_ORDER_ID_KEY));
    }

    #[tokio::test]
    async fn racing_transactions_conflict_at_commit() {
        let repo = InMemoryPaymentRepository::new();
        let mut first = repo.begin().await.unwrap();
        let mut second = repo.begin().await.unwrap();
        first.save(payment("ord-1", "evt-1")).await.unwrap();
        second.save(payment("ord-1", "evt-1")).await.unwrap();

        first.commit().await.unwrap();
        let err = second.commit().await.unwrap_err();
        assert!(err.is_unique_violation());
        assert_eq!(repo.count().await, 1);
    }

    #[tokio::test]
    async fn saving_again_updates_in_place() {
        let repo = InMemoryPaymentRepository::new();
        let mut tx = repo.begin().await.unwrap();
        let mut saved = tx.save(payment("ord-1", "evt-1")).await.unwrap();
        saved.authorize().unwrap();
        tx.save(saved).await.unwrap();
        tx.commit().await.unwrap();

        let rows = repo.rows().await;
        assert_eq!(rows.len(), 1);
        assert!(rows[0].is_authorized());
    }

    #[tokio::test]
    async fn reservation_existence_check() {
        let repo = InMemoryReservationRepository::new();
        let order_id = OrderId::from("ord-1");
        let mut tx = repo.begin().await.unwrap();
        assert!(!tx.exists_by_order_id(&order_id).await.unwrap());

        tx.save(Reservation::new(
            order_id.clone(),
            CustomerId::new("cust-1"),
            Money::zero(),
            "USD",
            ReservationStatus::Rejected,
        ))
        .await
        .unwrap();
        tx.commit().await.unwrap();

        let mut tx = repo.begin().await.unwrap();
        assert!(tx.exists_by_order_id(&order_id).await.unwrap());
    }
}
