//! Consumer-group runtime over [`InMemoryEventLog`].
//!
//! One worker per subscribed `(topic, partition)` drains records in offset
//! order, so events of the same order are handled sequentially while
//! different orders proceed in parallel. A record whose handler keeps
//! failing is redelivered per [`RetryConfig`] and then moved to the
//! topic's dead-letter twin with diagnostic headers.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::task::JoinSet;

use crate::{
    EventEnvelope, EventLogError, Result,
    memory::{InMemoryEventLog, Record},
    retry::{RetryConfig, retry_with_backoff},
    topic::dead_letter_topic,
};

pub const HEADER_ERROR: &str = "x-error";
pub const HEADER_ATTEMPTS: &str = "x-attempts";
pub const HEADER_ORIGINAL_TOPIC: &str = "x-original-topic";

const IDLE_POLL: Duration = Duration::from_millis(250);

/// Inbound side of a service.
///
/// Returning `Err` asks the transport to redeliver. Business outcomes
/// such as duplicates or unknown event types must return `Ok`.
#[async_trait]
pub trait EventHandler: Send + Sync {
    type Error: std::fmt::Display + Send;

    async fn handle(&self, envelope: &EventEnvelope) -> std::result::Result<(), Self::Error>;
}

/// Outcome of a poll.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConsumeStats {
    pub handled: usize,
    pub dead_lettered: usize,
}

impl ConsumeStats {
    pub fn is_empty(&self) -> bool {
        self.handled == 0 && self.dead_lettered == 0
    }

    fn merge(&mut self, other: ConsumeStats) {
        self.handled += other.handled;
        self.dead_lettered += other.dead_lettered;
    }
}

/// A consumer group bound to one handler.
pub struct Consumer<H> {
    log: InMemoryEventLog,
    group: String,
    topics: Vec<String>,
    handler: Arc<H>,
    retry: RetryConfig,
}

impl<H> Consumer<H>
where
    H: EventHandler + 'static,
{
    pub fn new(log: InMemoryEventLog, group: impl Into<String>, handler: Arc<H>) -> Self {
        Self {
            log,
            group: group.into(),
            topics: Vec::new(),
            handler,
            retry: RetryConfig::default(),
        }
    }

    pub fn subscribe(mut self, topic: impl Into<String>) -> Self {
        self.topics.push(topic.into());
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    /// Drains every record currently available on the subscribed topics.
    pub async fn poll_once(&self) -> Result<ConsumeStats> {
        let mut workers = JoinSet::new();
        for topic in &self.topics {
            for partition in 0..self.log.partitions() {
                let worker = PartitionWorker {
                    log: self.log.clone(),
                    group: self.group.clone(),
                    topic: topic.clone(),
                    partition,
                    handler: self.handler.clone(),
                    retry: self.retry.clone(),
                };
                workers.spawn(worker.drain());
            }
        }

        let mut stats = ConsumeStats::default();
        while let Some(joined) = workers.join_next().await {
            let worker_stats = joined.map_err(|e| EventLogError::Worker(e.to_string()))?;
            stats.merge(worker_stats);
        }
        Ok(stats)
    }

    /// Polls until nothing is left, including records produced while handling.
    pub async fn run_until_idle(&self) -> Result<ConsumeStats> {
        let mut total = ConsumeStats::default();
        loop {
            let stats = self.poll_once().await?;
            if stats.is_empty() {
                return Ok(total);
            }
            total.merge(stats);
        }
    }

    /// Consumes until `shutdown` flips to `true`.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(group = %self.group, topics = ?self.topics, "Consumer started");
        let notify = self.log.notifier();

        while !*shutdown.borrow() {
            let appended = notify.notified();
            match self.poll_once().await {
                Ok(stats) if !stats.is_empty() => continue,
                Ok(_) => {}
                Err(e) => tracing::error!(group = %self.group, error = %e, "Poll failed"),
            }

            tokio::select! {
                _ = appended => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                _ = tokio::time::sleep(IDLE_POLL) => {}
            }
        }

        tracing::info!(group = %self.group, "Consumer stopped");
    }
}

struct PartitionWorker<H> {
    log: InMemoryEventLog,
    group: String,
    topic: String,
    partition: u32,
    handler: Arc<H>,
    retry: RetryConfig,
}

impl<H: EventHandler> PartitionWorker<H> {
    async fn drain(self) -> ConsumeStats {
        let mut stats = ConsumeStats::default();
        let from = self
            .log
            .committed_offset(&self.group, &self.topic, self.partition)
            .await;

        for record in self.log.fetch(&self.topic, self.partition, from).await {
            if self.deliver(&record).await {
                stats.handled += 1;
            } else {
                stats.dead_lettered += 1;
            }
            self.log
                .commit_offset(&self.group, &self.topic, self.partition, record.offset + 1)
                .await;
        }
        stats
    }

    /// Returns `false` when the record ended up dead-lettered.
    async fn deliver(&self, record: &Record) -> bool {
        let context = format!("{}/{}/{}", self.group, record.topic, record.offset);
        let attempts = AtomicU32::new(0);
        let outcome = retry_with_backoff(
            || async {
                attempts.fetch_add(1, Ordering::Relaxed);
                let envelope = record.envelope().map_err(|e| e.to_string())?;
                self.handler
                    .handle(&envelope)
                    .await
                    .map_err(|e| e.to_string())
            },
            &self.retry,
            &context,
        )
        .await;

        let redeliveries = attempts.load(Ordering::Relaxed).saturating_sub(1);
        if redeliveries > 0 {
            metrics::counter!("consumer_retries_total", "group" => self.group.clone())
                .increment(u64::from(redeliveries));
        }

        match outcome {
            Ok(()) => true,
            Err((error, attempts)) => {
                self.dead_letter(record, &error, attempts).await;
                false
            }
        }
    }

    async fn dead_letter(&self, record: &Record, error: &str, attempts: u32) {
        let dlq = dead_letter_topic(&record.topic);
        let mut headers = record.headers.clone();
        headers.insert(HEADER_ERROR.to_string(), error.to_string());
        headers.insert(HEADER_ATTEMPTS.to_string(), attempts.to_string());
        headers.insert(HEADER_ORIGINAL_TOPIC.to_string(), record.topic.clone());

        let position = self
            .log
            .append(&dlq, &record.key, record.value.clone(), headers)
            .await;

        metrics::counter!("events_dead_lettered_total", "topic" => record.topic.clone())
            .increment(1);
        tracing::warn!(
            group = %self.group,
            topic = %record.topic,
            dead_letter_topic = %dlq,
            offset = record.offset,
            dead_letter_offset = position.offset,
            attempts,
            error,
            "Record moved to dead-letter topic"
        );
    }
}
