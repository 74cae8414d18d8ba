use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Notify, RwLock};

use crate::{
    EventEnvelope, EventLogError, Result,
    publisher::{EventPublisher, RecordPosition},
};

/// Partitions per topic unless configured otherwise.
pub const DEFAULT_PARTITIONS: u32 = 3;

/// A single entry of a topic partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub topic: String,
    pub partition: u32,
    pub offset: u64,
    pub key: String,
    pub value: String,
    pub headers: BTreeMap<String, String>,
    pub timestamp: DateTime<Utc>,
}

impl Record {
    /// Parses the record value as an envelope.
    pub fn envelope(&self) -> Result<EventEnvelope> {
        EventEnvelope::from_json(&self.value)
    }
}

type Partitions = Vec<Vec<Record>>;

/// Partitioned, append-only log kept in memory.
///
/// Topics are created on first append. Consumer groups track their
/// committed offsets here, mirroring a broker that owns offsets.
#[derive(Clone)]
pub struct InMemoryEventLog {
    partitions: u32,
    topics: Arc<RwLock<HashMap<String, Partitions>>>,
    offsets: Arc<RwLock<HashMap<(String, String, u32), u64>>>,
    appended: Arc<Notify>,
    failing_publishes: Arc<AtomicU32>,
}

impl InMemoryEventLog {
    pub fn new(partitions: u32) -> Self {
        Self {
            partitions: partitions.max(1),
            topics: Arc::default(),
            offsets: Arc::default(),
            appended: Arc::new(Notify::new()),
            failing_publishes: Arc::default(),
        }
    }

    pub fn partitions(&self) -> u32 {
        self.partitions
    }

    /// Partition a key is routed to.
    pub fn partition_for(&self, key: &str) -> u32 {
        (fnv1a(key.as_bytes()) % u64::from(self.partitions)) as u32
    }

    /// Appends a raw record keyed by `key`.
    pub async fn append(
        &self,
        topic: &str,
        key: &str,
        value: String,
        headers: BTreeMap<String, String>,
    ) -> RecordPosition {
        let partition = self.partition_for(key);
        let position = {
            let mut topics = self.topics.write().await;
            let partitions = topics
                .entry(topic.to_string())
                .or_insert_with(|| vec![Vec::new(); self.partitions as usize]);
            let records = &mut partitions[partition as usize];
            let offset = records.len() as u64;
            records.push(Record {
                topic: topic.to_string(),
                partition,
                offset,
                key: key.to_string(),
                value,
                headers,
                timestamp: Utc::now(),
            });
            RecordPosition {
                topic: topic.to_string(),
                partition,
                offset,
            }
        };
        self.appended.notify_waiters();
        position
    }

    /// Records of one partition starting at `from_offset`.
    pub async fn fetch(&self, topic: &str, partition: u32, from_offset: u64) -> Vec<Record> {
        let topics = self.topics.read().await;
        topics
            .get(topic)
            .and_then(|partitions| partitions.get(partition as usize))
            .map(|records| {
                records
                    .iter()
                    .skip(from_offset as usize)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Every record of a topic, partition by partition.
    pub async fn records(&self, topic: &str) -> Vec<Record> {
        let topics = self.topics.read().await;
        topics
            .get(topic)
            .map(|partitions| partitions.iter().flatten().cloned().collect())
            .unwrap_or_default()
    }

    /// Envelopes of a topic in append order per partition.
    pub async fn envelopes(&self, topic: &str) -> Result<Vec<EventEnvelope>> {
        self.records(topic)
            .await
            .iter()
            .map(Record::envelope)
            .collect()
    }

    pub async fn record_count(&self, topic: &str) -> usize {
        let topics = self.topics.read().await;
        topics
            .get(topic)
            .map(|partitions| partitions.iter().map(Vec::len).sum())
            .unwrap_or(0)
    }

    /// Next offset the group will read from a partition.
    pub async fn committed_offset(&self, group: &str, topic: &str, partition: u32) -> u64 {
        let offsets = self.offsets.read().await;
        offsets
            .get(&(group.to_string(), topic.to_string(), partition))
            .copied()
            .unwrap_or(0)
    }

    pub async fn commit_offset(&self, group: &str, topic: &str, partition: u32, next: u64) {
        let mut offsets = self.offsets.write().await;
        offsets.insert((group.to_string(), topic.to_string(), partition), next);
    }

    /// Signal fired after every append.
    pub fn notifier(&self) -> Arc<Notify> {
        self.appended.clone()
    }

    /// Makes the next `count` publishes fail as if the broker were down.
    pub fn fail_next_publishes(&self, count: u32) {
        self.failing_publishes.store(count, Ordering::SeqCst);
    }

    fn take_injected_failure(&self) -> bool {
        self.failing_publishes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

impl Default for InMemoryEventLog {
    fn default() -> Self {
        Self::new(DEFAULT_PARTITIONS)
    }
}

#[async_trait]
impl EventPublisher for InMemoryEventLog {
    async fn publish(&self, topic: &str, envelope: &EventEnvelope) -> Result<RecordPosition> {
        if self.take_injected_failure() {
            return Err(EventLogError::Unavailable(format!(
                "publish to {topic} rejected"
            )));
        }

        let value = envelope.to_json()?;
        let position = self
            .append(topic, envelope.order_id.as_str(), value, BTreeMap::new())
            .await;

        metrics::counter!("events_published_total", "topic" => topic.to_string()).increment(1);
        tracing::debug!(
            topic,
            partition = position.partition,
            offset = position.offset,
            event_type = %envelope.event_type,
            order_id = %envelope.order_id,
            "Published event"
        );
        Ok(position)
    }
}

/// FNV-1a, stable across processes so partition assignment is reproducible.
fn fnv1a(bytes: &[u8]) -> u64 {
    const OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;
    bytes.iter().fold(OFFSET_BASIS, |hash, byte| {
        (hash ^ u64::from(*byte)).wrapping_mul(PRIME)
    })
}
