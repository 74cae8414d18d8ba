use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;
use tokio::time::Instant;

use super::{LockError, LockGuard, LockRegistry};

struct Lease {
    token: u64,
    expires_at: Instant,
}

#[derive(Default)]
struct Registry {
    leases: Mutex<HashMap<String, Lease>>,
    released: Notify,
    next_token: AtomicU64,
}

impl Registry {
    fn leases(&self) -> MutexGuard<'_, HashMap<String, Lease>> {
        match self.leases.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn release(&self, name: &str, token: u64) {
        let mut leases = self.leases();
        if leases.get(name).is_some_and(|lease| lease.token == token) {
            leases.remove(name);
        }
        drop(leases);
        self.released.notify_waiters();
    }
}

/// Process-local lock registry.
#[derive(Clone, Default)]
pub struct InMemoryLockRegistry {
    registry: Arc<Registry>,
}

impl InMemoryLockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `name` currently has an unexpired holder.
    pub fn is_locked(&self, name: &str) -> bool {
        let now = Instant::now();
        self.registry
            .leases()
            .get(name)
            .is_some_and(|lease| lease.expires_at > now)
    }
}

#[async_trait]
impl LockRegistry for InMemoryLockRegistry {
    type Guard = InMemoryLockGuard;

    async fn try_lock(
        &self,
        name: &str,
        wait: Duration,
        lease: Duration,
    ) -> Result<Option<InMemoryLockGuard>, LockError> {
        let deadline = Instant::now() + wait;

        loop {
            // Registered before inspecting the map so a release in between
            // still wakes us.
            let released = self.registry.released.notified();

            let held_until = {
                let mut leases = self.registry.leases();
                let now = Instant::now();
                match leases.get(name) {
                    Some(current) if current.expires_at > now => current.expires_at,
                    _ => {
                        let token = self.registry.next_token.fetch_add(1, Ordering::Relaxed);
                        leases.insert(
                            name.to_string(),
                            Lease {
                                token,
                                expires_at: now + lease,
                            },
                        );
                        tracing::trace!(lock = name, token, "lock acquired");
                        return Ok(Some(InMemoryLockGuard {
                            registry: Arc::clone(&self.registry),
                            name: name.to_string(),
                            token,
                            released: false,
                        }));
                    }
                }
            };

            if Instant::now() >= deadline {
                return Ok(None);
            }

            tokio::select! {
                _ = released => {}
                _ = tokio::time::sleep_until(held_until.min(deadline)) => {}
            }
        }
    }
}

pub struct InMemoryLockGuard {
    registry: Arc<Registry>,
    name: String,
    token: u64,
    released: bool,
}

impl InMemoryLockGuard {
    fn release_now(&mut self) {
        if !self.released {
            self.released = true;
            self.registry.release(&self.name, self.token);
        }
    }
}

#[async_trait]
impl LockGuard for InMemoryLockGuard {
    fn name(&self) -> &str {
        &self.name
    }

    async fn release(mut self) -> Result<(), LockError> {
        self.release_now();
        Ok(())
    }
}

impl Drop for InMemoryLockGuard {
    fn drop(&mut self) {
        self.release_now();
    }
}
