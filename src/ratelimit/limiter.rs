//! Public token-bucket limiter API.
//!
//! A [`RateLimiter`] is constructed once with its backend pools injected and
//! shared across tasks; every call names the resource it limits and carries
//! its own policy, so one limiter instance serves any number of buckets.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use super::bucket::{Decision, TokenBucket};
use super::rate::{Rate, TimeUnit};
use crate::clock::{system_clock, Clock};
use crate::error::{DenialKind, FloodgateError, Result};
use crate::pool::PoolManager;
use crate::storage::BucketStore;

/// Policy parameters for one rate-limited resource.
#[derive(Debug, Clone)]
pub struct BucketPolicy {
    /// Resource name; buckets are shared across processes by name.
    pub name: String,
    /// Maximum tokens the bucket holds.
    pub capacity: u64,
    /// Tokens refilled per `unit`. `None` means the bucket fully refills in
    /// one unit (`fill == capacity`).
    pub fill: Option<u64>,
    /// Refill time unit.
    pub unit: TimeUnit,
    /// Tokens deducted per call.
    pub deduct: u64,
    /// Backend pool selector; `None` uses the default pool.
    pub pool: Option<String>,
}

impl BucketPolicy {
    /// A policy for `name` with `capacity` tokens refilling once per second,
    /// deducting one token per call.
    pub fn new(name: impl Into<String>, capacity: u64) -> Self {
        Self {
            name: name.into(),
            capacity,
            fill: None,
            unit: TimeUnit::Second,
            deduct: 1,
            pool: None,
        }
    }

    /// Set the refill amount per unit.
    pub fn fill(mut self, fill: u64) -> Self {
        self.fill = Some(fill);
        self
    }

    /// Set the refill time unit.
    pub fn unit(mut self, unit: TimeUnit) -> Self {
        self.unit = unit;
        self
    }

    /// Set the tokens deducted per call.
    pub fn deduct(mut self, deduct: u64) -> Self {
        self.deduct = deduct;
        self
    }

    /// Select a backend pool by name.
    pub fn pool(mut self, pool: impl Into<String>) -> Self {
        self.pool = Some(pool.into());
        self
    }

    fn rate(&self) -> Rate {
        Rate::new(self.fill.unwrap_or(self.capacity), self.unit)
    }
}

/// Token-bucket rate limiter shared by all processes pointing at the same
/// storage pools.
pub struct RateLimiter {
    pools: Arc<PoolManager>,
    clock: Arc<dyn Clock>,
}

impl RateLimiter {
    /// Create a limiter using the system wall clock.
    pub fn new(pools: Arc<PoolManager>) -> Self {
        Self::with_clock(pools, system_clock())
    }

    /// Create a limiter with an injected clock.
    pub fn with_clock(pools: Arc<PoolManager>, clock: Arc<dyn Clock>) -> Self {
        Self { pools, clock }
    }

    fn bucket(&self, policy: &BucketPolicy) -> Result<TokenBucket> {
        if policy.fill == Some(0) {
            return Err(FloodgateError::Config(
                "bucket fill must be at least 1".to_string(),
            ));
        }
        let backend = self.pools.select(policy.pool.as_deref())?;
        let store = BucketStore::new(backend, &policy.name);
        TokenBucket::new(store, policy.capacity, policy.rate(), self.clock.clone())
    }

    /// Consume `policy.deduct` tokens immediately, or fail with
    /// [`FloodgateError::RateLimitExceeded`].
    pub async fn consume(&self, policy: &BucketPolicy) -> Result<()> {
        let bucket = self.bucket(policy)?;
        match bucket.consume(policy.deduct).await? {
            Decision::Allowed => Ok(()),
            Decision::Denied { .. } => Err(FloodgateError::RateLimitExceeded {
                name: policy.name.clone(),
                kind: DenialKind::Immediate,
            }),
        }
    }

    /// Consume tokens, suspending until the bucket refills enough or
    /// `timeout` elapses. `None` waits indefinitely.
    ///
    /// The wait between attempts is the analytically projected refill time
    /// for the deficit, clipped to the remaining budget; there is no
    /// arbitrary-interval polling.
    pub async fn consume_blocking(
        &self,
        policy: &BucketPolicy,
        timeout: Option<Duration>,
    ) -> Result<()> {
        let bucket = self.bucket(policy)?;
        let deadline = timeout.map(|t| tokio::time::Instant::now() + t);

        loop {
            match bucket.consume(policy.deduct).await? {
                Decision::Allowed => return Ok(()),
                Decision::Denied { retry_after } => {
                    let mut wait = retry_after;
                    if let Some(deadline) = deadline {
                        let remaining =
                            deadline.saturating_duration_since(tokio::time::Instant::now());
                        if remaining.is_zero() {
                            warn!(
                                bucket = %policy.name,
                                timeout_ms = timeout.map(|t| t.as_millis() as u64),
                                "Blocking consume timed out"
                            );
                            return Err(FloodgateError::RateLimitExceeded {
                                name: policy.name.clone(),
                                kind: DenialKind::Timeout,
                            });
                        }
                        wait = wait.min(remaining);
                    }
                    tokio::time::sleep(wait).await;
                }
            }
        }
    }

    /// Read-only projection of the tokens currently available to `policy`.
    pub async fn available_tokens(&self, policy: &BucketPolicy) -> Result<u64> {
        self.bucket(policy)?.tokens().await
    }

    /// Delete the persisted state of the bucket `name`. The next consume
    /// bootstraps it full again.
    pub async fn remove(&self, name: &str, pool: Option<&str>) -> Result<bool> {
        let backend = self.pools.select(pool)?;
        BucketStore::new(backend, name).remove().await
    }

    /// Run `work` if a consume succeeds, propagating the denial otherwise.
    pub async fn limit<F, Fut, T>(&self, policy: &BucketPolicy, work: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        self.consume(policy).await?;
        Ok(work().await)
    }

    /// Run `work` if a consume succeeds; on denial return `fallback(name)`
    /// instead. Infrastructure errors still propagate.
    pub async fn limit_or_else<F, Fut, T, C>(
        &self,
        policy: &BucketPolicy,
        work: F,
        fallback: C,
    ) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
        C: FnOnce(&str) -> T,
    {
        match self.consume(policy).await {
            Ok(()) => Ok(work().await),
            Err(err) if err.is_denial() => Ok(fallback(&policy.name)),
            Err(err) => Err(err),
        }
    }

    /// Blocking variant of [`limit`](Self::limit).
    pub async fn limit_blocking<F, Fut, T>(
        &self,
        policy: &BucketPolicy,
        timeout: Option<Duration>,
        work: F,
    ) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        self.consume_blocking(policy, timeout).await?;
        Ok(work().await)
    }

    /// Blocking variant of [`limit_or_else`](Self::limit_or_else).
    pub async fn limit_blocking_or_else<F, Fut, T, C>(
        &self,
        policy: &BucketPolicy,
        timeout: Option<Duration>,
        work: F,
        fallback: C,
    ) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
        C: FnOnce(&str) -> T,
    {
        match self.consume_blocking(policy, timeout).await {
            Ok(()) => Ok(work().await),
            Err(err) if err.is_denial() => Ok(fallback(&policy.name)),
            Err(err) => Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::storage::MemoryBackend;
    use std::time::Instant;

    fn limiter_with_clock() -> (RateLimiter, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::starting_at(1_000_000.0));
        let pools = PoolManager::single(Arc::new(MemoryBackend::new()));
        (RateLimiter::with_clock(pools, clock.clone()), clock)
    }

    fn limiter() -> RateLimiter {
        RateLimiter::new(PoolManager::single(Arc::new(MemoryBackend::new())))
    }

    #[tokio::test]
    async fn test_consume_until_denied() {
        let (limiter, _clock) = limiter_with_clock();
        let policy = BucketPolicy::new("api", 3).fill(3);

        for _ in 0..3 {
            limiter.consume(&policy).await.unwrap();
        }

        let err = limiter.consume(&policy).await.unwrap_err();
        match err {
            FloodgateError::RateLimitExceeded { name, kind } => {
                assert_eq!(name, "api");
                assert_eq!(kind, DenialKind::Immediate);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_fill_defaults_to_capacity() {
        // Without an explicit fill, the bucket fully refills in one unit.
        let (limiter, clock) = limiter_with_clock();
        let policy = BucketPolicy::new("burst", 4);

        for _ in 0..4 {
            limiter.consume(&policy).await.unwrap();
        }
        assert!(limiter.consume(&policy).await.is_err());

        clock.advance(1.0);
        assert_eq!(limiter.available_tokens(&policy).await.unwrap(), 4);
    }

    #[tokio::test]
    async fn test_deduct_more_than_one() {
        let (limiter, _clock) = limiter_with_clock();
        let policy = BucketPolicy::new("bulk", 10).fill(10).deduct(4);

        limiter.consume(&policy).await.unwrap();
        limiter.consume(&policy).await.unwrap();
        // 2 tokens left, deduct is 4.
        assert!(limiter.consume(&policy).await.is_err());
        assert_eq!(limiter.available_tokens(&policy).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_available_tokens_does_not_mutate() {
        let (limiter, _clock) = limiter_with_clock();
        let policy = BucketPolicy::new("peek", 5);

        assert_eq!(limiter.available_tokens(&policy).await.unwrap(), 5);
        assert_eq!(limiter.available_tokens(&policy).await.unwrap(), 5);
    }

    #[tokio::test]
    async fn test_consume_blocking_waits_for_refill() {
        let limiter = limiter();
        // 50 tokens/second: one token every 20ms.
        let policy = BucketPolicy::new("blocking", 1).fill(50);

        limiter.consume(&policy).await.unwrap();

        let started = Instant::now();
        limiter.consume_blocking(&policy, None).await.unwrap();
        let waited = started.elapsed();

        assert!(waited < Duration::from_secs(1), "waited {waited:?}");
    }

    #[tokio::test]
    async fn test_consume_blocking_times_out() {
        let limiter = limiter();
        // One token per hour: refill will not happen within the test.
        let policy = BucketPolicy::new("slow", 1).fill(1).unit(TimeUnit::Hour);

        limiter.consume(&policy).await.unwrap();

        let started = Instant::now();
        let err = limiter
            .consume_blocking(&policy, Some(Duration::from_millis(50)))
            .await
            .unwrap_err();
        let waited = started.elapsed();

        match err {
            FloodgateError::RateLimitExceeded { name, kind } => {
                assert_eq!(name, "slow");
                assert_eq!(kind, DenialKind::Timeout);
            }
            other => panic!("unexpected error: {other}"),
        }
        // Bounded by the timeout plus a scheduling quantum.
        assert!(waited >= Duration::from_millis(45), "waited {waited:?}");
        assert!(waited < Duration::from_secs(1), "waited {waited:?}");
    }

    #[tokio::test]
    async fn test_limit_runs_work_when_allowed() {
        let (limiter, _clock) = limiter_with_clock();
        let policy = BucketPolicy::new("wrapped", 1);

        let result = limiter.limit(&policy, || async { 42 }).await.unwrap();
        assert_eq!(result, 42);
    }

    #[tokio::test]
    async fn test_limit_or_else_falls_back_on_denial() {
        let (limiter, _clock) = limiter_with_clock();
        let policy = BucketPolicy::new("fallback", 1);

        limiter.consume(&policy).await.unwrap();

        let result = limiter
            .limit_or_else(&policy, || async { "fresh" }, |_name| "cached")
            .await
            .unwrap();
        assert_eq!(result, "cached");
    }

    #[tokio::test]
    async fn test_infrastructure_errors_skip_the_fallback() {
        let (limiter, _clock) = limiter_with_clock();
        let policy = BucketPolicy::new("orphan", 1).pool("missing");

        let err = limiter
            .limit_or_else(&policy, || async { "fresh" }, |_name| "cached")
            .await
            .unwrap_err();
        assert!(matches!(err, FloodgateError::UnknownPool(_)));
    }

    #[tokio::test]
    async fn test_zero_fill_is_rejected() {
        let (limiter, _clock) = limiter_with_clock();
        let policy = BucketPolicy::new("never", 1).fill(0);

        assert!(matches!(
            limiter.consume(&policy).await.unwrap_err(),
            FloodgateError::Config(_)
        ));
    }

    #[tokio::test]
    async fn test_remove_then_consume_bootstraps_full() {
        let (limiter, _clock) = limiter_with_clock();
        let policy = BucketPolicy::new("reset", 2);

        limiter.consume(&policy).await.unwrap();
        limiter.consume(&policy).await.unwrap();
        assert!(limiter.consume(&policy).await.is_err());

        assert!(limiter.remove("reset", None).await.unwrap());
        limiter.consume(&policy).await.unwrap();
    }
}
