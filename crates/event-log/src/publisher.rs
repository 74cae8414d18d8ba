use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{EventEnvelope, Result};

/// Where a published record landed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordPosition {
    pub topic: String,
    pub partition: u32,
    pub offset: u64,
}

/// Outbound side of the transport.
///
/// Implementations serialize the envelope to its wire format and key the
/// record by `order_id`, so every event of one order lands on the same
/// partition.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, topic: &str, envelope: &EventEnvelope) -> Result<RecordPosition>;
}
