//! Choreographed order fulfillment.
//!
//! No coordinator drives the saga. Each service reacts to the previous
//! service's event, records its own decision and announces it:
//!
//! 1. [`OrderOriginator`] persists the order and emits `order.created`
//! 2. [`InventoryReserver`] emits `inventory.reserved` or `inventory.rejected`
//! 3. [`PaymentProcessor`] charges once and emits `payment.authorized` or `payment.failed`
//! 4. [`DeliveryAssigner`] emits `delivery.assigned` then `eta.updated`
//!
//! Rejections and declines end the saga; nothing is compensated.

pub mod config;
pub mod decision;
pub mod dedup;
pub mod error;
pub mod lock;
pub mod services;

pub use config::PaymentConfig;
pub use decision::{Always, Decision, Probability, Scripted};
pub use dedup::{CacheError, DedupCache, InMemoryDedupCache};
pub use error::{Result, SagaError};
pub use lock::{
    InMemoryLockRegistry, LockError, LockGuard, LockRegistry, PgAdvisoryLockRegistry,
};
pub use services::{
    AssignmentOutcome, DeliveryAssigner, DriverDispatch, DuplicateLayer, GatewayOutcome,
    InventoryReserver, NewOrder, NewOrderItem, OrderOriginator, PaymentGateway, PaymentOutcome,
    PaymentProcessor, PaymentRequest, ReservationOutcome, SimulatedDispatch, SimulatedGateway,
    SimulatedStockCheck, StockCheck, DRIVER_ROSTER,
};
