use std::pin::Pin;

use super::{Result, StoreTransaction};

type PostCommitHook = Box<dyn FnOnce() -> Pin<Box<dyn Future<Output = ()> + Send>> + Send>;

/// An open transaction plus the work that must happen only once it is durable.
///
/// Hooks registered with [`after_commit`](Self::after_commit) run in
/// registration order right after a successful commit. They are dropped
/// unrun when the commit fails or the scope is rolled back or dropped.
pub struct TransactionScope<T> {
    tx: T,
    hooks: Vec<PostCommitHook>,
}

impl<T: StoreTransaction> TransactionScope<T> {
    pub fn new(tx: T) -> Self {
        Self {
            tx,
            hooks: Vec::new(),
        }
    }

    /// The underlying transaction, for reads and writes inside the scope.
    pub fn tx(&mut self) -> &mut T {
        &mut self.tx
    }

    pub fn after_commit<F, Fut>(&mut self, hook: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.hooks.push(Box::new(move || Box::pin(hook())));
    }

    pub fn pending_hooks(&self) -> usize {
        self.hooks.len()
    }

    /// Commits, then runs the post-commit hooks in order.
    pub async fn commit(self) -> Result<()> {
        let Self { tx, hooks } = self;
        tx.commit().await?;
        for hook in hooks {
            hook().await;
        }
        Ok(())
    }

    /// Rolls back and discards every hook.
    pub async fn rollback(self) -> Result<()> {
        let Self { tx, hooks } = self;
        if !hooks.is_empty() {
            tracing::debug!(discarded = hooks.len(), "Rolling back, post-commit hooks discarded");
        }
        drop(hooks);
        tx.rollback().await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use tokio::sync::Mutex;

    use super::*;
    use crate::store::StoreError;

    struct FakeTx {
        fail_commit: bool,
        log: Arc<Mutex<Vec<&'static str>>>,
    }

    #[async_trait]
    impl StoreTransaction for FakeTx {
        async fn commit(self) -> Result<()> {
            if self.fail_commit {
                return Err(StoreError::UniqueViolation {
                    constraint: "payments_order_id_key".into(),
                });
            }
            self.log.lock().await.push("commit");
            Ok(())
        }

        async fn rollback(self) -> Result<()> {
            self.log.lock().await.push("rollback");
            Ok(())
        }
    }

    fn scope(fail_commit: bool) -> (TransactionScope<FakeTx>, Arc<Mutex<Vec<&'static str>>>) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut scope = TransactionScope::new(FakeTx {
            fail_commit,
            log: log.clone(),
        });
        for name in ["first", "second"] {
            let log = log.clone();
            scope.after_commit(move || async move {
                log.lock().await.push(name);
            });
        }
        (scope, log)
    }

    #[tokio::test]
    async fn hooks_run_after_commit_in_order() {
        let (scope, log) = scope(false);
        assert_eq!(scope.pending_hooks(), 2);

        scope.commit().await.unwrap();
        assert_eq!(*log.lock().await, vec!["commit", "first", "second"]);
    }

    #[tokio::test]
    async fn failed_commit_skips_hooks() {
        let (scope, log) = scope(true);

        let err = scope.commit().await.unwrap_err();
        assert!(err.violates("payments_order_id_key"));
        assert!(log.lock().await.is_empty());
    }

    #[tokio::test]
    async fn rollback_skips_hooks() {
        let (scope, log) = scope(false);

        scope.rollback().await.unwrap();
        assert_eq!(*log.lock().await, vec!["rollback"]);
    }
}
