//! Worker concurrency limiter.
//!
//! Bounds how many executions of a named operation are in flight across all
//! processes. A slot is acquired before the work runs and returned after,
//! including on the error and cancellation paths: the acquired slot lives in
//! a [`SlotGuard`] whose drop releases it in the background, so a caller
//! abandoned mid-work never orphans a slot for longer than it takes the
//! release task to run (or, failing everything, the lease to expire).

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::Rng;
use tracing::warn;

use super::lock::{KeySlotLock, SlotLock, WorkerId};
use crate::error::{DenialKind, FloodgateError, Result};
use crate::pool::PoolManager;

/// Policy parameters for one concurrency-limited resource.
#[derive(Debug, Clone)]
pub struct WorkerPolicy {
    /// Resource name; the slot pool is shared across processes by name.
    pub name: String,
    /// Maximum simultaneously held slots.
    pub max: u32,
    /// How long a slot may be held before the lock considers it abandoned.
    /// `None` means slots only free on explicit release.
    pub lease_timeout: Option<Duration>,
    /// Backend pool selector; `None` uses the default pool.
    pub pool: Option<String>,
}

impl WorkerPolicy {
    /// A policy for `name` with `max` concurrent slots and no lease timeout.
    pub fn new(name: impl Into<String>, max: u32) -> Self {
        Self {
            name: name.into(),
            max,
            lease_timeout: None,
            pool: None,
        }
    }

    /// Bound each slot lease to `timeout`.
    pub fn lease_timeout(mut self, timeout: Duration) -> Self {
        self.lease_timeout = Some(timeout);
        self
    }

    /// Select a backend pool by name.
    pub fn pool(mut self, pool: impl Into<String>) -> Self {
        self.pool = Some(pool.into());
        self
    }
}

/// Scoped ownership of an acquired slot.
///
/// Release is explicit on the happy path so storage errors surface; if the
/// guard is dropped instead (cancellation, early return), the release runs
/// as a spawned task.
struct SlotGuard {
    lock: Arc<dyn SlotLock>,
    name: String,
    worker: Option<WorkerId>,
}

impl SlotGuard {
    fn new(lock: Arc<dyn SlotLock>, name: String, worker: WorkerId) -> Self {
        Self {
            lock,
            name,
            worker: Some(worker),
        }
    }

    async fn release(mut self) -> Result<()> {
        if let Some(worker) = self.worker.take() {
            self.lock.release(&self.name, &worker).await?;
        }
        Ok(())
    }
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        let Some(worker) = self.worker.take() else {
            return;
        };
        let lock = self.lock.clone();
        let name = std::mem::take(&mut self.name);
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                let _ = lock.release(&name, &worker).await;
            });
        }
    }
}

/// Concurrency limiter shared by all processes pointing at the same storage
/// pools.
pub struct WorkerLimiter {
    pools: Arc<PoolManager>,
}

impl WorkerLimiter {
    /// Create a limiter with its backend pools injected.
    pub fn new(pools: Arc<PoolManager>) -> Self {
        Self { pools }
    }

    fn lock_for(&self, policy: &WorkerPolicy) -> Result<Arc<dyn SlotLock>> {
        let backend = self.pools.select(policy.pool.as_deref())?;
        Ok(Arc::new(KeySlotLock::new(backend)))
    }

    /// Acquire a slot, run `work`, release the slot, return `work`'s output.
    /// Fails with [`FloodgateError::WorkerLimitExceeded`] if all slots are
    /// held.
    pub async fn run<F, Fut, T>(&self, policy: &WorkerPolicy, work: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let lock = self.lock_for(policy)?;
        match lock
            .acquire(&policy.name, policy.max, policy.lease_timeout)
            .await?
        {
            Some(worker) => self.run_held(lock, policy, worker, work).await,
            None => Err(FloodgateError::WorkerLimitExceeded {
                name: policy.name.clone(),
                kind: DenialKind::Immediate,
            }),
        }
    }

    /// Like [`run`](Self::run), but on denial return `fallback(name)`
    /// instead. Infrastructure errors still propagate.
    pub async fn run_or_else<F, Fut, T, C>(
        &self,
        policy: &WorkerPolicy,
        work: F,
        fallback: C,
    ) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
        C: FnOnce(&str) -> T,
    {
        match self.run(policy, work).await {
            Err(err) if err.is_denial() => Ok(fallback(&policy.name)),
            other => other,
        }
    }

    /// Acquire a slot, retrying with jittered backoff until one frees or
    /// `blocking_timeout` elapses, then run `work`. `None` retries
    /// indefinitely.
    ///
    /// The 1-10ms randomized wait desynchronizes callers contending for the
    /// same slots; the wait is clipped so the total never exceeds the
    /// remaining budget.
    pub async fn run_blocking<F, Fut, T>(
        &self,
        policy: &WorkerPolicy,
        blocking_timeout: Option<Duration>,
        work: F,
    ) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let lock = self.lock_for(policy)?;
        let mut retry_start: Option<Instant> = None;

        loop {
            if let Some(worker) = lock
                .acquire(&policy.name, policy.max, policy.lease_timeout)
                .await?
            {
                return self.run_held(lock, policy, worker, work).await;
            }

            let started = *retry_start.get_or_insert_with(Instant::now);
            let remaining = match blocking_timeout {
                None => None,
                Some(timeout) => {
                    let remaining = timeout.saturating_sub(started.elapsed());
                    if remaining.is_zero() {
                        warn!(
                            resource = %policy.name,
                            timeout_ms = timeout.as_millis() as u64,
                            "Blocking slot acquisition timed out"
                        );
                        return Err(FloodgateError::WorkerLimitExceeded {
                            name: policy.name.clone(),
                            kind: DenialKind::Timeout,
                        });
                    }
                    Some(remaining)
                }
            };

            let mut wait = Duration::from_millis(rand::thread_rng().gen_range(1..=10));
            if let Some(remaining) = remaining {
                wait = wait.min(remaining);
            }
            tokio::time::sleep(wait).await;
        }
    }

    /// Blocking variant of [`run_or_else`](Self::run_or_else).
    pub async fn run_blocking_or_else<F, Fut, T, C>(
        &self,
        policy: &WorkerPolicy,
        blocking_timeout: Option<Duration>,
        work: F,
        fallback: C,
    ) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
        C: FnOnce(&str) -> T,
    {
        match self.run_blocking(policy, blocking_timeout, work).await {
            Err(err) if err.is_denial() => Ok(fallback(&policy.name)),
            other => other,
        }
    }

    async fn run_held<F, Fut, T>(
        &self,
        lock: Arc<dyn SlotLock>,
        policy: &WorkerPolicy,
        worker: WorkerId,
        work: F,
    ) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let guard = SlotGuard::new(lock, policy.name.clone(), worker);
        let result = work().await;
        guard.release().await?;
        Ok(result)
    }
}
