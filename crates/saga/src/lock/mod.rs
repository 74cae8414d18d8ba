//! Named, expiring mutual exclusion across workers.
//!
//! The payment processor serializes work per order through a lock named
//! `order:{orderId}`. Acquisition waits a bounded time; a holder that never
//! releases loses the lock once its lease expires.

mod memory;
mod postgres;

pub use memory::{InMemoryLockGuard, InMemoryLockRegistry};
pub use postgres::{PgAdvisoryLockGuard, PgAdvisoryLockRegistry};

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LockError {
    #[error("Lock backend unavailable: {0}")]
    Backend(#[from] sqlx::Error),
}

#[async_trait]
pub trait LockRegistry: Send + Sync {
    type Guard: LockGuard;

    /// Waits up to `wait` for `name`. `None` means the wait elapsed while
    /// someone else held it.
    async fn try_lock(
        &self,
        name: &str,
        wait: Duration,
        lease: Duration,
    ) -> Result<Option<Self::Guard>, LockError>;
}

/// Proof of ownership. Dropping a guard also releases the lock.
#[async_trait]
pub trait LockGuard: Send + Sized {
    fn name(&self) -> &str;

    async fn release(self) -> Result<(), LockError>;
}
