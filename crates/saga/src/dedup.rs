//! Fast-path record of idempotency keys that have already been handled.
//!
//! The cache is an optimization only. Entries expire, may be evicted and the
//! backend may be unreachable; the durable uniqueness check stays the authority.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::time::Instant;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Dedup cache unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait DedupCache: Send + Sync {
    async fn is_processed(&self, key: &str) -> Result<bool, CacheError>;

    async fn mark_processed(&self, key: &str, ttl: Duration) -> Result<(), CacheError>;
}

/// Process-local cache with per-entry expiry.
#[derive(Clone, Default)]
pub struct InMemoryDedupCache {
    entries: Arc<Mutex<HashMap<String, Instant>>>,
    unavailable: Arc<AtomicBool>,
}

impl InMemoryDedupCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<String, Instant>> {
        match self.entries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn check_available(&self) -> Result<(), CacheError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(CacheError::Unavailable("cache marked offline".into()));
        }
        Ok(())
    }

    /// Forget a key, as an eviction or a cache restart would.
    pub fn evict(&self, key: &str) -> bool {
        self.entries().remove(key).is_some()
    }

    pub fn clear(&self) {
        self.entries().clear();
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries().values().filter(|expires| **expires > now).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Make every call fail until switched back.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }
}

#[async_trait]
impl DedupCache for InMemoryDedupCache {
    async fn is_processed(&self, key: &str) -> Result<bool, CacheError> {
        self.check_available()?;
        let now = Instant::now();
        let mut entries = self.entries();
        match entries.get(key) {
            Some(expires_at) if *expires_at > now => Ok(true),
            Some(_) => {
                entries.remove(key);
                Ok(false)
            }
            None => Ok(false),
        }
    }

    async fn mark_processed(&self, key: &str, ttl: Duration) -> Result<(), CacheError> {
        self.check_available()?;
        self.entries()
            .insert(key.to_string(), Instant::now() + ttl);
        Ok(())
    }
}
