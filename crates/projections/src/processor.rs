//! Fans events out to projections and rebuilds them from the log.

use async_trait::async_trait;
use event_log::{EventEnvelope, EventHandler, InMemoryEventLog};

use crate::projection::Projection;
use crate::{ProjectionError, Result};

/// Delivers each consumed event to every registered projection.
///
/// Registered with a consumer subscribed to every primary topic, it is the
/// materializer's inbound side.
#[derive(Default)]
pub struct ProjectionProcessor {
    projections: Vec<Box<dyn Projection>>,
}

impl ProjectionProcessor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, projection: Box<dyn Projection>) {
        self.projections.push(projection);
    }

    pub fn projection_count(&self) -> usize {
        self.projections.len()
    }

    #[tracing::instrument(skip(self, event), fields(event_type = %event.event_type, order_id = %event.order_id))]
    pub async fn process_event(&self, event: &EventEnvelope) -> Result<()> {
        for projection in &self.projections {
            projection.handle(event).await?;
        }
        Ok(())
    }

    /// Resets every projection and replays all records of `topics`.
    ///
    /// Records that do not parse as envelopes are skipped; they were
    /// dead-lettered when first consumed.
    #[tracing::instrument(skip(self, log))]
    pub async fn rebuild(&self, log: &InMemoryEventLog, topics: &[String]) -> Result<u64> {
        for projection in &self.projections {
            projection.reset().await?;
        }

        let mut replayed = 0;
        for topic in topics {
            for record in log.records(topic).await {
                let event = match record.envelope() {
                    Ok(event) => event,
                    Err(err) => {
                        tracing::warn!(error = %err, %topic, offset = record.offset, "skipping unreadable record");
                        continue;
                    }
                };
                self.process_event(&event).await?;
                replayed += 1;
            }
        }

        tracing::info!(replayed, "projections rebuilt");
        Ok(replayed)
    }
}

#[async_trait]
impl EventHandler for ProjectionProcessor {
    type Error = ProjectionError;

    async fn handle(&self, envelope: &EventEnvelope) -> Result<()> {
        self.process_event(envelope).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::projection::ProjectionPosition;
    use std::collections::BTreeMap;
    use std::sync::Arc;
    use tokio::sync::RwLock;

    /// Counts every event it sees.
    struct CountingProjection {
        count: Arc<RwLock<u64>>,
    }

    impl CountingProjection {
        fn new() -> (Self, Arc<RwLock<u64>>) {
            let count = Arc::new(RwLock::new(0));
            (
                Self {
                    count: Arc::clone(&count),
                },
                count,
            )
        }
    }

    #[async_trait]
    impl Projection for CountingProjection {
        fn name(&self) -> &'static str {
            "counting"
        }

        async fn handle(&self, _event: &EventEnvelope) -> Result<()> {
            *self.count.write().await += 1;
            Ok(())
        }

        async fn position(&self) -> ProjectionPosition {
            ProjectionPosition {
                events_applied: *self.count.read().await,
                events_skipped: 0,
            }
        }

        async fn reset(&self) -> Result<()> {
            *self.count.write().await = 0;
            Ok(())
        }
    }

    fn event(order_id: &str) -> EventEnvelope {
        EventEnvelope::builder()
            .event_type("test.event")
            .order_id(order_id)
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_fans_out_to_every_projection() {
        let (first, first_count) = CountingProjection::new();
        let (second, second_count) = CountingProjection::new();
        let mut processor = ProjectionProcessor::new();
        processor.register(Box::new(first));
        processor.register(Box::new(second));
        assert_eq!(processor.projection_count(), 2);

        processor.handle(&event("ord-1")).await.unwrap();

        assert_eq!(*first_count.read().await, 1);
        assert_eq!(*second_count.read().await, 1);
    }

    #[tokio::test]
    async fn test_rebuild_resets_and_replays() {
        let log = InMemoryEventLog::default();
        let topic = "raw.order-events".to_string();
        for order_id in ["ord-1", "ord-2"] {
            log.append(&topic, order_id, event(order_id).to_json().unwrap(), BTreeMap::new())
                .await;
        }
        log.append(&topic, "ord-3", "not json".into(), BTreeMap::new())
            .await;

        let (projection, count) = CountingProjection::new();
        let mut processor = ProjectionProcessor::new();
        processor.register(Box::new(projection));
        processor.process_event(&event("ord-9")).await.unwrap();

        let replayed = processor.rebuild(&log, &[topic]).await.unwrap();

        assert_eq!(replayed, 2);
        assert_eq!(*count.read().await, 2);
    }

    #[tokio::test]
    async fn test_empty_rebuild() {
        let (projection, count) = CountingProjection::new();
        let mut processor = ProjectionProcessor::new();
        processor.register(Box::new(projection));

        let replayed = processor
            .rebuild(&InMemoryEventLog::default(), &["raw.order-events".to_string()])
            .await
            .unwrap();
        assert_eq!(replayed, 0);
        assert_eq!(*count.read().await, 0);
    }
}
