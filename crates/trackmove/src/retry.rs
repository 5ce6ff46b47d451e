use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::activity::{Activity, ActivityHeader, ActivityId, MetadataUpdate};
use crate::backend::{Backend, BackendError, Capabilities, Capability};
use crate::track::Track;

/// Bounded exponential backoff for transient backend failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first one. Zero behaves like one.
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(8),
        }
    }
}

impl RetryPolicy {
    /// A single attempt, no retries.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
        }
    }

    /// Delay before retry number `retry` (1-based): 1x, 2x, 4x ... capped.
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 1u32 << retry.saturating_sub(1).min(16);
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }

    /// Run `op` until it succeeds, fails with a non-transient error, or the
    /// attempts are used up. The last error is returned.
    pub async fn run<T, F, Fut>(&self, what: &str, mut op: F) -> Result<T, BackendError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, BackendError>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match op().await {
                Err(err) if err.is_transient() && attempt < max_attempts => {
                    let delay = self.backoff(attempt);
                    tracing::warn!(
                        operation = what,
                        attempt,
                        max_attempts,
                        ?delay,
                        error = %err,
                        "transient failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                result => return result,
            }
        }
    }
}

/// A backend that delegates to an inner backend, retrying transient failures.
pub struct RetryingBackend {
    inner: Arc<dyn Backend>,
    policy: RetryPolicy,
}

impl RetryingBackend {
    pub fn new(inner: Arc<dyn Backend>, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }
}

#[async_trait::async_trait]
impl Backend for RetryingBackend {
    fn label(&self) -> &str {
        self.inner.label()
    }

    fn capabilities(&self) -> Capabilities {
        self.inner.capabilities()
    }

    fn supports(&self, capability: Capability) -> bool {
        self.inner.supports(capability)
    }

    async fn list(&self) -> Result<Vec<ActivityHeader>, BackendError> {
        self.policy.run("list", || self.inner.list()).await
    }

    async fn fetch(&self, id: &ActivityId) -> Result<Track, BackendError> {
        self.policy.run("fetch", || self.inner.fetch(id)).await
    }

    async fn save(&self, activity: &Activity) -> Result<ActivityId, BackendError> {
        self.policy.run("save", || self.inner.save(activity)).await
    }

    async fn remove(&self, id: &ActivityId) -> Result<(), BackendError> {
        self.policy.run("remove", || self.inner.remove(id)).await
    }

    async fn update_metadata(
        &self,
        id: &ActivityId,
        update: &MetadataUpdate,
    ) -> Result<(), BackendError> {
        self.policy
            .run("update_metadata", || self.inner.update_metadata(id, update))
            .await
    }
}
