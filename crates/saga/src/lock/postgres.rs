use std::time::Duration;

use async_trait::async_trait;
use sqlx::pool::PoolConnection;
use sqlx::{PgPool, Postgres};
use tokio::time::Instant;

use super::{LockError, LockGuard, LockRegistry};

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Lock registry backed by PostgreSQL session advisory locks.
///
/// The lock lives as long as the session that took it, so a crashed holder
/// loses it when its connection drops. The lease argument is therefore not
/// needed and is ignored.
///
/// Every held lock pins one pooled connection until it is released. Waiters
/// only borrow a connection for each poll.
#[derive(Clone)]
pub struct PgAdvisoryLockRegistry {
    pool: PgPool,
    poll_interval: Duration,
}

impl PgAdvisoryLockRegistry {
    /// `pool` should be dedicated to locking and sized for the number of
    /// orders processed at once. Sharing it with the payment store lets
    /// held locks starve the transactions they guard.
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }
}

#[async_trait]
impl LockRegistry for PgAdvisoryLockRegistry {
    type Guard = PgAdvisoryLockGuard;

    #[tracing::instrument(skip(self))]
    async fn try_lock(
        &self,
        name: &str,
        wait: Duration,
        _lease: Duration,
    ) -> Result<Option<PgAdvisoryLockGuard>, LockError> {
        let deadline = Instant::now() + wait;

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let Ok(conn) = tokio::time::timeout(remaining, self.pool.acquire()).await else {
                tracing::debug!(lock = name, "No connection free before the lock deadline");
                return Ok(None);
            };
            let mut conn = conn?;

            let acquired: bool =
                sqlx::query_scalar("SELECT pg_try_advisory_lock(hashtextextended($1, 0))")
                    .bind(name)
                    .fetch_one(&mut *conn)
                    .await?;

            if acquired {
                return Ok(Some(PgAdvisoryLockGuard {
                    conn: Some(conn),
                    name: name.to_string(),
                }));
            }
            // Back to the pool while waiting.
            drop(conn);

            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            tokio::time::sleep(self.poll_interval.min(deadline - now)).await;
        }
    }
}

pub struct PgAdvisoryLockGuard {
    conn: Option<PoolConnection<Postgres>>,
    name: String,
}

#[async_trait]
impl LockGuard for PgAdvisoryLockGuard {
    fn name(&self) -> &str {
        &self.name
    }

    async fn release(mut self) -> Result<(), LockError> {
        if let Some(mut conn) = self.conn.take() {
            let result = sqlx::query("SELECT pg_advisory_unlock(hashtextextended($1, 0))")
                .bind(&self.name)
                .execute(&mut *conn)
                .await;
            if let Err(err) = result {
                // Never hand a session that may still hold the lock back to the pool.
                drop(conn.detach());
                return Err(err.into());
            }
        }
        Ok(())
    }
}

impl Drop for PgAdvisoryLockGuard {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            // Closing the session releases every advisory lock it holds.
            drop(conn.detach());
        }
    }
}
