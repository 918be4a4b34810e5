//! Retry wrapper for remote operations
//!
//! [`RetryingStore`] decorates any [`RemoteStore`] so that an operation failing
//! with `BridgeError::ConnectionLost` is retried according to a
//! [`RetryPolicy`]. Every other error is returned unchanged on first sight.

use async_trait::async_trait;
use bridge_traits::error::{BridgeError, Result};
use bridge_traits::storage::{RemoteEntry, RemoteStore, RemoteTag};
use core_runtime::config::RetryPolicy;
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{error, info, warn};

/// `RemoteStore` decorator that retries on connection loss
pub struct RetryingStore {
    inner: Arc<dyn RemoteStore>,
    policy: RetryPolicy,
}

impl RetryingStore {
    pub fn new(inner: Arc<dyn RemoteStore>, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    async fn run<T, F, Fut>(&self, operation: &str, mut call: F) -> Result<T>
    where
        F: FnMut() -> Fut + Send,
        Fut: Future<Output = Result<T>> + Send,
        T: Send,
    {
        let started = Instant::now();
        let mut failures: u32 = 0;

        loop {
            match call().await {
                Ok(value) => {
                    if failures > 0 {
                        info!(operation, attempts = failures + 1, "Remote operation recovered");
                    }
                    return Ok(value);
                }
                Err(e) if e.is_connection_lost() => {
                    failures = failures.saturating_add(1);

                    if !self.policy.should_retry(failures, started.elapsed()) {
                        error!(operation, attempts = failures, error = %e, "Giving up on remote operation");
                        return Err(BridgeError::RetriesExhausted {
                            operation: operation.to_string(),
                            attempts: failures,
                            message: e.to_string(),
                        });
                    }

                    let delay = self.policy.backoff.delay(failures);
                    warn!(
                        operation,
                        attempt = failures,
                        retry_in_secs = delay.as_secs(),
                        error = %e,
                        "Connection lost, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[async_trait]
impl RemoteStore for RetryingStore {
    async fn list(&self, directory: &str) -> Result<Vec<RemoteEntry>> {
        self.run("list", || self.inner.list(directory)).await
    }

    async fn get_tags(&self, item_id: &str) -> Result<Vec<RemoteTag>> {
        self.run("get_tags", || self.inner.get_tags(item_id)).await
    }

    async fn list_all_tags(&self) -> Result<Vec<RemoteTag>> {
        self.run("list_all_tags", || self.inner.list_all_tags()).await
    }

    async fn move_item(&self, source_path: &str, destination_path: &str) -> Result<()> {
        self.run("move", || self.inner.move_item(source_path, destination_path))
            .await
    }

    async fn unassign_tag(&self, item_id: &str, tag_id: &str) -> Result<()> {
        self.run("unassign_tag", || self.inner.unassign_tag(item_id, tag_id))
            .await
    }

    async fn download(&self, remote_path: &str, local_path: &Path) -> Result<()> {
        self.run("download", || self.inner.download(remote_path, local_path))
            .await
    }

    async fn upload(&self, local_path: &Path, remote_path: &str) -> Result<()> {
        self.run("upload", || self.inner.upload(local_path, remote_path))
            .await
    }

    async fn delete(&self, remote_path: &str) -> Result<()> {
        self.run("delete", || self.inner.delete(remote_path)).await
    }

    async fn exists(&self, remote_path: &str) -> Result<bool> {
        self.run("exists", || self.inner.exists(remote_path)).await
    }

    async fn create_directory(&self, remote_path: &str) -> Result<()> {
        self.run("create_directory", || self.inner.create_directory(remote_path))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_runtime::config::Backoff;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    /// Fails `list` with the given error until `failures` runs out
    struct FlakyList {
        failures: AtomicU32,
        calls: AtomicU32,
        error: fn() -> BridgeError,
    }

    impl FlakyList {
        fn new(failures: u32, error: fn() -> BridgeError) -> Self {
            Self {
                failures: AtomicU32::new(failures),
                calls: AtomicU32::new(0),
                error,
            }
        }
    }

    #[async_trait]
    impl RemoteStore for FlakyList {
        async fn list(&self, directory: &str) -> Result<Vec<RemoteEntry>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let remaining = self.failures.load(Ordering::SeqCst);
            if remaining > 0 {
                self.failures.store(remaining - 1, Ordering::SeqCst);
                return Err((self.error)());
            }
            Ok(vec![RemoteEntry {
                path: Some(format!("{}/raw_1.png", directory)),
                ..Default::default()
            }])
        }

        async fn get_tags(&self, _item_id: &str) -> Result<Vec<RemoteTag>> {
            Ok(Vec::new())
        }

        async fn list_all_tags(&self) -> Result<Vec<RemoteTag>> {
            Ok(Vec::new())
        }

        async fn move_item(&self, _source: &str, _destination: &str) -> Result<()> {
            Ok(())
        }

        async fn unassign_tag(&self, _item_id: &str, _tag_id: &str) -> Result<()> {
            Ok(())
        }

        async fn download(&self, _remote: &str, _local: &Path) -> Result<()> {
            Ok(())
        }

        async fn upload(&self, _local: &Path, _remote: &str) -> Result<()> {
            Ok(())
        }

        async fn delete(&self, _remote: &str) -> Result<()> {
            Ok(())
        }

        async fn exists(&self, _remote: &str) -> Result<bool> {
            Ok(true)
        }

        async fn create_directory(&self, _remote: &str) -> Result<()> {
            Ok(())
        }
    }

    fn connection_lost() -> BridgeError {
        BridgeError::ConnectionLost("connection reset by peer".to_string())
    }

    fn server_error() -> BridgeError {
        BridgeError::OperationFailed("status 500".to_string())
    }

    #[tokio::test(start_paused = true)]
    async fn test_default_policy_sleeps_between_each_failure() {
        let inner = Arc::new(FlakyList::new(4, connection_lost));
        let store = RetryingStore::new(inner.clone(), RetryPolicy::default());

        let started = Instant::now();
        let entries = store.list("_raw").await.unwrap();

        assert_eq!(entries.len(), 1);
        assert_eq!(inner.calls.load(Ordering::SeqCst), 5);
        assert_eq!(started.elapsed(), Duration::from_secs(4 * 180));
    }

    #[tokio::test(start_paused = true)]
    async fn test_bounded_policy_gives_up() {
        let inner = Arc::new(FlakyList::new(10, connection_lost));
        let policy = RetryPolicy::bounded(3, Backoff::Fixed(Duration::from_secs(1)));
        let store = RetryingStore::new(inner.clone(), policy);

        let err = store.list("_raw").await.unwrap_err();

        assert!(matches!(
            err,
            BridgeError::RetriesExhausted { attempts: 3, ref operation, .. } if operation == "list"
        ));
        assert_eq!(inner.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_other_errors_are_not_retried() {
        let inner = Arc::new(FlakyList::new(1, server_error));
        let store = RetryingStore::new(inner.clone(), RetryPolicy::default());

        let started = Instant::now();
        let err = store.list("_raw").await.unwrap_err();

        assert!(matches!(err, BridgeError::OperationFailed(_)));
        assert_eq!(inner.calls.load(Ordering::SeqCst), 1);
        assert_eq!(started.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_elapsed_budget_stops_retrying() {
        let inner = Arc::new(FlakyList::new(10, connection_lost));
        let policy = RetryPolicy::unbounded(Backoff::Fixed(Duration::from_secs(60)))
            .with_max_elapsed(Duration::from_secs(150));
        let store = RetryingStore::new(inner.clone(), policy);

        let err = store.list("_raw").await.unwrap_err();

        assert!(matches!(err, BridgeError::RetriesExhausted { attempts: 3, .. }));
        assert_eq!(inner.calls.load(Ordering::SeqCst), 3);
    }
}
