//! Core projection trait and position tracking.

use async_trait::async_trait;
use event_log::EventEnvelope;

use crate::Result;

/// Tracks how many events a projection has consumed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProjectionPosition {
    /// Events that changed the read model.
    pub events_applied: u64,
    /// Events of types the projection does not fold.
    pub events_skipped: u64,
}

impl ProjectionPosition {
    pub fn zero() -> Self {
        Self::default()
    }

    pub fn applied(&self) -> Self {
        Self {
            events_applied: self.events_applied + 1,
            ..*self
        }
    }

    pub fn skipped(&self) -> Self {
        Self {
            events_skipped: self.events_skipped + 1,
            ..*self
        }
    }

    pub fn total(&self) -> u64 {
        self.events_applied + self.events_skipped
    }
}

impl std::fmt::Display for ProjectionPosition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "position(applied={}, skipped={})",
            self.events_applied, self.events_skipped
        )
    }
}

/// Folds events into a read model it owns exclusively.
///
/// Delivery is at least once and in no particular order across topics, so
/// `handle` must be idempotent and commutative per order.
#[async_trait]
pub trait Projection: Send + Sync {
    fn name(&self) -> &'static str;

    async fn handle(&self, event: &EventEnvelope) -> Result<()>;

    async fn position(&self) -> ProjectionPosition;

    /// Drops the read model so it can be rebuilt from the log.
    async fn reset(&self) -> Result<()>;
}
