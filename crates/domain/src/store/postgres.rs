//! PostgreSQL stores. Schema lives in `migrations/` at the workspace root.

use std::marker::PhantomData;

use async_trait::async_trait;
use common::OrderId;
use sqlx::{PgConnection, PgPool, Postgres, Row, postgres::PgRow};

use super::{
    DeliveryRepository, DeliveryTransaction, OrderRepository, OrderTransaction, PaymentRepository,
    PaymentTransaction, ReservationRepository, ReservationTransaction, Result, StoreError,
    StoreTransaction,
};
use crate::delivery::{Delivery, DeliveryStatus};
use crate::order::{CustomerId, Money, Order, OrderItem, OrderStatus};
use crate::payment::{Payment, PaymentStatus};
use crate::reservation::{Reservation, ReservationStatus};

/// Runs the database migrations.
pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("../../migrations").run(pool).await?;
    Ok(())
}

/// Repository over one table, sharing a connection pool.
pub struct PgRepository<R> {
    pool: PgPool,
    _row: PhantomData<fn() -> R>,
}

pub type PgOrderRepository = PgRepository<Order>;
pub type PgReservationRepository = PgRepository<Reservation>;
pub type PgPaymentRepository = PgRepository<Payment>;
pub type PgDeliveryRepository = PgRepository<Delivery>;

impl<R> Clone for PgRepository<R> {
    fn clone(&self) -> Self {
        Self::new(self.pool.clone())
    }
}

impl<R> PgRepository<R> {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            _row: PhantomData,
        }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn transaction(&self) -> Result<PgTransaction<R>> {
        Ok(PgTransaction {
            tx: self.pool.begin().await?,
            _row: PhantomData,
        })
    }
}

/// An open database transaction scoped to one table.
pub struct PgTransaction<R> {
    tx: sqlx::Transaction<'static, Postgres>,
    _row: PhantomData<fn() -> R>,
}

#[async_trait]
impl<R: 'static> StoreTransaction for PgTransaction<R> {
    async fn commit(self) -> Result<()> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self) -> Result<()> {
        self.tx.rollback().await?;
        Ok(())
    }
}

fn corrupt(table: &'static str, reason: impl Into<String>) -> StoreError {
    StoreError::Corrupt {
        table,
        reason: reason.into(),
    }
}

// ---------------------------------------------------------------------------
// orders

async fn fetch_order(conn: &mut PgConnection, order_id: &OrderId) -> Result<Option<Order>> {
    let row = sqlx::query(
        r#"
        SELECT id, order_id, customer_id, currency, status, created_at, updated_at
        FROM orders
        WHERE order_id = $1
        "#,
    )
    .bind(order_id.as_str())
    .fetch_optional(&mut *conn)
    .await?;

    let Some(row) = row else {
        return Ok(None);
    };

    let id: i64 = row.try_get("id")?;
    let item_rows = sqlx::query(
        "SELECT item_id, quantity, unit_price FROM order_items WHERE order_pk = $1 ORDER BY position",
    )
    .bind(id)
    .fetch_all(&mut *conn)
    .await?;

    let items = item_rows
        .iter()
        .map(|item| -> Result<OrderItem> {
            let quantity: i64 = item.try_get("quantity")?;
            let quantity = u32::try_from(quantity)
                .map_err(|_| corrupt("order_items", format!("quantity {quantity}")))?;
            Ok(OrderItem::new(
                item.try_get::<String, _>("item_id")?,
                quantity,
                Money::new(item.try_get("unit_price")?),
            ))
        })
        .collect::<Result<Vec<_>>>()?;


    let status: String = row.try_get("status")?;
    let status = OrderStatus::parse(&status).ok_or_else(|| corrupt("orders", status.clone()))?;

    let order = Order::restore(
        id,
        OrderId::from(row.try_get::<String, _>("order_id")?),
        CustomerId::new(row.try_get::<String, _>("customer_id")?),
        row.try_get("currency")?,
        status,
        items,
        row.try_get("created_at")?,
        row.try_get("updated_at")?,
    )
    .map_err(|e| corrupt("orders", e.to_string()))?;
    Ok(Some(order))
}

async fn insert_items(conn: &mut PgConnection, order_pk: i64, items: &[OrderItem]) -> Result<()> {
    for (position, item) in items.iter().enumerate() {
        sqlx::query(
            r#"
            INSERT INTO order_items (order_pk, position, item_id, quantity, unit_price)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(order_pk)
        .bind(position as i32)
        .bind(item.item_id.as_str())
        .bind(i64::from(item.quantity))
        .bind(item.unit_price.amount())
        .execute(&mut *conn)
        .await?;
    }
    Ok(())
}

#[async_trait]
impl OrderTransaction for PgTransaction<Order> {
    async fn save(&mut self, mut order: Order) -> Result<Order> {
        let conn: &mut PgConnection = &mut self.tx;
        match order.id {
            None => {
                let row = sqlx::query(
                    r#"
                    INSERT INTO orders (order_id, customer_id, currency, total_amount, status, created_at, updated_at)
                    VALUES ($1, $2, $3, $4, $5, $6, $7)
                    RETURNING id
                    "#,
                )
                .bind(order.order_id.as_str())
                .bind(order.customer_id.as_str())
                .bind(&order.currency)
                .bind(order.total_amount().amount())
                .bind(order.status.as_str())
                .bind(order.created_at)
                .bind(order.updated_at)
                .fetch_one(&mut *conn)
                .await?;
                order.id = Some(row.try_get("id")?);
            }
            Some(id) => {
                sqlx::query(
                    "UPDATE orders SET total_amount = $2, status = $3, updated_at = $4 WHERE id = $1",
                )
                .bind(id)
                .bind(order.total_amount().amount())
                .bind(order.status.as_str())
                .bind(order.updated_at)
                .execute(&mut *conn)
                .await?;
                sqlx::query("DELETE FROM order_items WHERE order_pk = $1")
                    .bind(id)
                    .execute(&mut *conn)
                    .await?;
            }
        }

        if let Some(id) = order.id {
            insert_items(conn, id, order.items()).await?;
        }
        Ok(order)
    }
}

#[async_trait]
impl OrderRepository for PgRepository<Order> {
    type Tx = PgTransaction<Order>;

    async fn begin(&self) -> Result<Self::Tx> {
        self.transaction().await
    }

    async fn find_by_order_id(&self, order_id: &OrderId) -> Result<Option<Order>> {
        let mut conn = self.pool.acquire().await?;
        fetch_order(&mut conn, order_id).await
    }
}

// ---------------------------------------------------------------------------
// reservations

fn reservation_from_row(row: &PgRow) -> Result<Reservation> {
    let status: String = row.try_get("status")?;
    Ok(Reservation {
        id: Some(row.try_get("id")?),
        order_id: OrderId::from(row.try_get::<String, _>("order_id")?),
        customer_id: CustomerId::new(row.try_get::<String, _>("customer_id")?),
        amount: Money::new(row.try_get("amount")?),
        currency: row.try_get("currency")?,
        status: ReservationStatus::parse(&status)
            .ok_or_else(|| corrupt("reservations", status.clone()))?,
        created_at: row.try_get("created_at")?,
    })
}

const RESERVATION_COLUMNS: &str = "id, order_id, customer_id, amount, currency, status, created_at";

#[async_trait]
impl ReservationTransaction for PgTransaction<Reservation> {
    async fn exists_by_order_id(&mut self, order_id: &OrderId) -> Result<bool> {
        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM reservations WHERE order_id = $1)")
                .bind(order_id.as_str())
                .fetch_one(&mut *self.tx)
                .await?;
        Ok(exists)
    }

    async fn save(&mut self, mut reservation: Reservation) -> Result<Reservation> {
        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO reservations (order_id, customer_id, amount, currency, status, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING id
            "#,
        )
        .bind(reservation.order_id.as_str())
        .bind(reservation.customer_id.as_str())
        .bind(reservation.amount.amount())
        .bind(&reservation.currency)
        .bind(reservation.status.as_str())
        .bind(reservation.created_at)
        .fetch_one(&mut *self.tx)
        .await?;
        reservation.id = Some(id);
        Ok(reservation)
    }
}

#[async_trait]
impl ReservationRepository for PgRepository<Reservation> {
    type Tx = PgTransaction<Reservation>;

    async fn begin(&self) -> Result<Self::Tx> {
        self.transaction().await
    }

    async fn find_by_order_id(&self, order_id: &OrderId) -> Result<Option<Reservation>> {
        let sql = format!("SELECT {RESERVATION_COLUMNS} FROM reservations WHERE order_id = $1");
        sqlx::query(&sql)
            .bind(order_id.as_str())
            .fetch_optional(&self.pool)
            .await?
            .as_ref()
            .map(reservation_from_row)
            .transpose()
    }
}

// ---------------------------------------------------------------------------
// payments

const PAYMENT_COLUMNS: &str = "id, order_id, idempotency_key, amount, currency, status, \
                               failure_reason, created_at, updated_at";

fn payment_from_row(row: &PgRow) -> Result<Payment> {
    let status: String = row.try_get("status")?;
    Ok(Payment {
        id: Some(row.try_get("id")?),
        order_id: OrderId::from(row.try_get::<String, _>("order_id")?),
        idempotency_key: row.try_get("idempotency_key")?,
        amount: Money::new(row.try_get("amount")?),
        currency: row.try_get("currency")?,
        status: PaymentStatus::parse(&status).ok_or_else(|| corrupt("payments", status.clone()))?,
        failure_reason: row.try_get("failure_reason")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

async fn fetch_payment(
    conn: &mut PgConnection,
    column: &'static str,
    value: &str,
) -> Result<Option<Payment>> {
    let sql = format!("SELECT {PAYMENT_COLUMNS} FROM payments WHERE {column} = $1");
    sqlx::query(&sql)
        .bind(value)
        .fetch_optional(conn)
        .await?
        .as_ref()
        .map(payment_from_row)
        .transpose()
}

#[async_trait]
impl PaymentTransaction for PgTransaction<Payment> {
    async fn find_by_order_id(&mut self, order_id: &OrderId) -> Result<Option<Payment>> {
        fetch_payment(&mut self.tx, "order_id", order_id.as_str()).await
    }

    async fn find_by_idempotency_key(&mut self, key: &str) -> Result<Option<Payment>> {
        fetch_payment(&mut self.tx, "idempotency_key", key).await
    }

    async fn exists_by_idempotency_key(&mut self, key: &str) -> Result<bool> {
        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM payments WHERE idempotency_key = $1)")
                .bind(key)
                .fetch_one(&mut *self.tx)
                .await?;
        Ok(exists)
    }

    async fn save(&mut self, mut payment: Payment) -> Result<Payment> {
        match payment.id {
            None => {
                let id: i64 = sqlx::query_scalar(
                    r#"
                    INSERT INTO payments (order_id, idempotency_key, amount, currency, status,
                                          failure_reason, created_at, updated_at)
                    VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                    RETURNING id
                    "#,
                )
                .bind(payment.order_id.as_str())
                .bind(&payment.idempotency_key)
                .bind(payment.amount.amount())
                .bind(&payment.currency)
                .bind(payment.status.as_str())
                .bind(&payment.failure_reason)
                .bind(payment.created_at)
                .bind(payment.updated_at)
                .fetch_one(&mut *self.tx)
                .await?;
                payment.id = Some(id);
            }
            Some(id) => {
                sqlx::query(
                    "UPDATE payments SET status = $2, failure_reason = $3, updated_at = $4 WHERE id = $1",
                )
                .bind(id)
                .bind(payment.status.as_str())
                .bind(&payment.failure_reason)
                .bind(payment.updated_at)
                .execute(&mut *self.tx)
                .await?;
            }
        }
        Ok(payment)
    }
}

#[async_trait]
impl PaymentRepository for PgRepository<Payment> {
    type Tx = PgTransaction<Payment>;

    async fn begin(&self) -> Result<Self::Tx> {
        self.transaction().await
    }

    async fn find_by_order_id(&self, order_id: &OrderId) -> Result<Option<Payment>> {
        let mut conn = self.pool.acquire().await?;
        fetch_payment(&mut conn, "order_id", order_id.as_str()).await
    }

    async fn find_by_idempotency_key(&self, key: &str) -> Result<Option<Payment>> {
        let mut conn = self.pool.acquire().await?;
        fetch_payment(&mut conn, "idempotency_key", key).await
    }
}

// ---------------------------------------------------------------------------
// deliveries

fn delivery_from_row(row: &PgRow) -> Result<Delivery> {
    let status: String = row.try_get("status")?;
    Ok(Delivery {
        id: Some(row.try_get("id")?),
        order_id: OrderId::from(row.try_get::<String, _>("order_id")?),
        delivery_id: row.try_get("delivery_id")?,
        driver_name: row.try_get("driver_name")?,
        status: DeliveryStatus::parse(&status)
            .ok_or_else(|| corrupt("deliveries", status.clone()))?,
        estimated_delivery_time: row.try_get("estimated_delivery_time")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

#[async_trait]
impl DeliveryTransaction for PgTransaction<Delivery> {
    async fn exists_by_order_id(&mut self, order_id: &OrderId) -> Result<bool> {
        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM deliveries WHERE order_id = $1)")
                .bind(order_id.as_str())
                .fetch_one(&mut *self.tx)
                .await?;
        Ok(exists)
    }

    async fn save(&mut self, mut delivery: Delivery) -> Result<Delivery> {
        match delivery.id {
            None => {
                let id: i64 = sqlx::query_scalar(
                    r#"
                    INSERT INTO deliveries (order_id, delivery_id, driver_name, status,
                                            estimated_delivery_time, created_at, updated_at)
                    VALUES ($1, $2, $3, $4, $5, $6, $7)
                    RETURNING id
                    "#,
                )
                .bind(delivery.order_id.as_str())
                .bind(&delivery.delivery_id)
                .bind(&delivery.driver_name)
                .bind(delivery.status.as_str())
                .bind(delivery.estimated_delivery_time)
                .bind(delivery.created_at)
                .bind(delivery.updated_at)
                .fetch_one(&mut *self.tx)
                .await?;
                delivery.id = Some(id);
            }
            Some(id) => {
                sqlx::query(
                    r#"
                    UPDATE deliveries
                    SET status = $2, estimated_delivery_time = $3, updated_at = $4
                    WHERE id = $1
                    "#,
                )
                .bind(id)
                .bind(delivery.status.as_str())
                .bind(delivery.estimated_delivery_time)
                .bind(delivery.updated_at)
                .execute(&mut *self.tx)
                .await?;
            }
        }
        Ok(delivery)
    }
}

#[async_trait]
impl DeliveryRepository for PgRepository<Delivery> {
    type Tx = PgTransaction<Delivery>;

    async fn begin(&self) -> Result<Self::Tx> {
        self.transaction().await
    }

    async fn find_by_order_id(&self, order_id: &OrderId) -> Result<Option<Delivery>> {
        sqlx::query(
            r#"
            SELECT id, order_id, delivery_id, driver_name, status, estimated_delivery_time,
                   created_at, updated_at
            FROM deliveries
            WHERE order_id = $1
            "#,
        )
        .bind(order_id.as_str())
        .fetch_optional(&self.pool)
        .await?
        .as_ref()
        .map(delivery_from_row)
        .transpose()
    }
}
