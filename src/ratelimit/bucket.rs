//! Token bucket over shared storage.
//!
//! The bucket's entire persisted state is one timestamp (see
//! [`BucketStore`]); the current token count is derived from elapsed time on
//! every attempt. A consume that succeeds advances the timestamp by the
//! time-value of the consumed tokens, so fractional token balances are
//! carried in the timestamp itself and round-trip exactly.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, trace};

use super::rate::Rate;
use crate::clock::Clock;
use crate::error::{FloodgateError, Result};
use crate::storage::BucketStore;

/// Comparison slack for the time-to-tokens derivation. Epoch-scale doubles
/// carry sub-microsecond quantization, so a bucket holding exactly `n` tokens
/// can derive to fractionally under `n`; the slack keeps it consumable.
const TOKEN_EPSILON: f64 = 1e-6;

/// Outcome of a consume attempt.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Decision {
    /// Tokens were deducted.
    Allowed,
    /// Not enough tokens; `retry_after` is the analytically computed wait
    /// until the deficit refills at the bucket's rate.
    Denied { retry_after: Duration },
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allowed)
    }
}

/// A token bucket for one named resource.
///
/// Every consume attempt runs read-modify-write under the store's
/// distributed mutex, so concurrent processes serialize on the same bucket.
pub struct TokenBucket {
    store: BucketStore,
    capacity: u64,
    rate: Rate,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for TokenBucket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenBucket")
            .field("capacity", &self.capacity)
            .field("rate", &self.rate)
            .finish_non_exhaustive()
    }
}

impl TokenBucket {
    /// Create a bucket holding at most `capacity` tokens, refilling at `rate`.
    pub fn new(
        store: BucketStore,
        capacity: u64,
        rate: Rate,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        if capacity == 0 {
            return Err(FloodgateError::Config(
                "bucket capacity must be at least 1".to_string(),
            ));
        }
        Ok(Self {
            store,
            capacity,
            rate,
            clock,
        })
    }

    /// The resource name this bucket limits.
    pub fn name(&self) -> &str {
        self.store.name()
    }

    /// The timestamp a bucket full at `now` would carry: shifted back by the
    /// time-value of `capacity` tokens.
    fn full_timestamp(&self, now: f64) -> f64 {
        now - self.rate.seconds_for(self.capacity as f64)
    }

    /// Tokens available at `now` given the stored timestamp, in
    /// `[0, capacity]`.
    fn derive_tokens(&self, stored: f64, now: f64) -> f64 {
        let elapsed = (now - stored).max(0.0);
        (elapsed * self.rate.tokens_per_second()).min(self.capacity as f64)
    }

    /// Ensure persisted state exists; a new bucket starts full.
    pub async fn bootstrap(&self) -> Result<()> {
        let now = self.clock.now();
        self.store.bootstrap(self.full_timestamp(now)).await
    }

    /// Attempt to consume `amount` tokens.
    pub async fn consume(&self, amount: u64) -> Result<Decision> {
        if amount == 0 {
            return Err(FloodgateError::Config(
                "consume amount must be at least 1".to_string(),
            ));
        }
        if amount > self.capacity {
            return Err(FloodgateError::Config(format!(
                "consume amount {} exceeds bucket capacity {}",
                amount, self.capacity
            )));
        }

        let guard = self.store.lock().await?;
        let outcome = self.consume_locked(amount).await;
        let released = guard.release().await;
        let decision = outcome?;
        released?;

        match decision {
            Decision::Allowed => {
                trace!(bucket = %self.name(), amount, "Consume allowed");
            }
            Decision::Denied { retry_after } => {
                debug!(
                    bucket = %self.name(),
                    amount,
                    retry_after_ms = retry_after.as_millis() as u64,
                    "Consume denied"
                );
            }
        }
        Ok(decision)
    }

    async fn consume_locked(&self, amount: u64) -> Result<Decision> {
        let now = self.clock.now();
        self.store.bootstrap(self.full_timestamp(now)).await?;

        let stored = self.store.read().await?;
        let tokens = self.derive_tokens(stored, now);
        let amount_f = amount as f64;

        if tokens + TOKEN_EPSILON >= amount_f {
            // Advance the timestamp by the time-value of the deduction. The
            // base is clamped so a long-saturated bucket doesn't bank surplus
            // elapsed time beyond its capacity.
            let base = stored.max(self.full_timestamp(now));
            self.store.write(base + self.rate.seconds_for(amount_f)).await?;
            Ok(Decision::Allowed)
        } else {
            Ok(Decision::Denied {
                retry_after: self.rate.duration_for(amount_f - tokens),
            })
        }
    }

    /// Read-only projection of the currently available tokens.
    ///
    /// Bootstraps absent state (the formula needs a baseline timestamp) but
    /// never deducts.
    pub async fn tokens(&self) -> Result<u64> {
        let guard = self.store.lock().await?;
        let outcome: Result<u64> = async {
            let now = self.clock.now();
            self.store.bootstrap(self.full_timestamp(now)).await?;
            let stored = self.store.read().await?;
            Ok((self.derive_tokens(stored, now) + TOKEN_EPSILON).floor() as u64)
        }
        .await;
        let released = guard.release().await;
        let tokens = outcome?;
        released?;
        Ok(tokens)
    }

    /// Delete the bucket's persisted state.
    pub async fn remove(&self) -> Result<bool> {
        self.store.remove().await
    }
}
