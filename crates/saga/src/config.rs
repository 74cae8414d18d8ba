use std::time::Duration;

/// Tuning of the payment critical section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentConfig {
    /// How long to wait for the per-order lock before giving up.
    pub lock_wait: Duration,
    /// How long a lock survives a holder that never releases it.
    pub lock_ttl: Duration,
    /// Lifetime of a dedup cache entry.
    pub dedup_ttl: Duration,
    /// Prepended to the event id to form the dedup cache key.
    pub dedup_prefix: String,
}

impl PaymentConfig {
    pub fn dedup_key(&self, idempotency_key: &str) -> String {
        format!("{}{}", self.dedup_prefix, idempotency_key)
    }
}

impl Default for PaymentConfig {
    fn default() -> Self {
        Self {
            lock_wait: Duration::from_secs(5),
            lock_ttl: Duration::from_secs(30),
            dedup_ttl: Duration::from_secs(24 * 60 * 60),
            dedup_prefix: "payment:dedup:".to_string(),
        }
    }
}
