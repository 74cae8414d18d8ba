use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use common::OrderId;
use tokio::sync::RwLock;

use super::{OrderView, OrderViewPatch};
use crate::Result;

/// Storage for order views.
#[async_trait]
pub trait OrderViewStore: Send + Sync {
    /// Finds or creates the view for `patch.order_id` and applies the patch,
    /// atomically with respect to other merges of the same order.
    async fn merge(&self, patch: &OrderViewPatch) -> Result<OrderView>;

    async fn find(&self, order_id: &OrderId) -> Result<Option<OrderView>>;

    /// Every view, oldest first.
    async fn find_all(&self) -> Result<Vec<OrderView>>;

    async fn clear(&self) -> Result<()>;
}

#[derive(Clone, Default)]
pub struct InMemoryOrderViewStore {
    views: Arc<RwLock<HashMap<OrderId, OrderView>>>,
}

impl InMemoryOrderViewStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.views.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.views.read().await.is_empty()
    }
}

#[async_trait]
impl OrderViewStore for InMemoryOrderViewStore {
    async fn merge(&self, patch: &OrderViewPatch) -> Result<OrderView> {
        let mut views = self.views.write().await;
        let view = views.entry(patch.order_id.clone()).or_insert_with(|| {
            tracing::debug!(order_id = %patch.order_id, event_type = %patch.event_type, "synthesizing partial view");
            OrderView::partial(patch.order_id.clone())
        });
        view.apply(patch);
        Ok(view.clone())
    }

    async fn find(&self, order_id: &OrderId) -> Result<Option<OrderView>> {
        Ok(self.views.read().await.get(order_id).cloned())
    }

    async fn find_all(&self) -> Result<Vec<OrderView>> {
        let mut views: Vec<OrderView> = self.views.read().await.values().cloned().collect();
        views.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.order_id.cmp(&b.order_id))
        });
        Ok(views)
    }

    async fn clear(&self) -> Result<()> {
        self.views.write().await.clear();
        Ok(())
    }
}
