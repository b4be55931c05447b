//! Named distributed mutex over the storage backend.
//!
//! Buckets are mutated read-modify-write by many processes at once, so every
//! refill-then-consume runs under an exclusive, named lock scoped to the
//! bucket's key. The lock is a `set_nx` of a random owner token with a TTL
//! (the TTL reclaims locks from crashed holders), and release is an atomic
//! compare-and-delete on that token.

use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::Rng;
use tracing::{trace, warn};
use uuid::Uuid;

use super::backend::StorageBackend;
use crate::error::{FloodgateError, Result};

/// How long a held lock survives before the store reclaims it.
const LOCK_TTL: Duration = Duration::from_secs(3);
/// How long an acquirer spins before reporting the store contended/unreachable.
const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(10);

/// An exclusive, named cross-process lock.
pub struct DistributedMutex {
    backend: Arc<dyn StorageBackend>,
    key: String,
}

impl DistributedMutex {
    /// Create a mutex guarding the resource `name`.
    pub fn new(backend: Arc<dyn StorageBackend>, name: &str) -> Self {
        Self {
            backend,
            key: format!("floodgate:mutex:{name}"),
        }
    }

    /// Acquire the lock, spinning with jittered sleeps until it is free.
    ///
    /// The returned guard must outlive the critical section; prefer the
    /// explicit [`MutexGuard::release`] so release errors surface. Holding
    /// the lock longer than its TTL forfeits exclusivity.
    pub async fn acquire(&self) -> Result<MutexGuard> {
        let token = Uuid::new_v4().to_string().into_bytes();
        let deadline = Instant::now() + ACQUIRE_TIMEOUT;

        loop {
            if self
                .backend
                .set_nx(&self.key, &token, Some(LOCK_TTL))
                .await?
            {
                trace!(key = %self.key, "Acquired mutex");
                return Ok(MutexGuard {
                    backend: self.backend.clone(),
                    key: self.key.clone(),
                    token,
                    released: false,
                });
            }

            if Instant::now() >= deadline {
                warn!(key = %self.key, "Timed out acquiring mutex");
                return Err(FloodgateError::StorageUnavailable(format!(
                    "timed out acquiring mutex {}",
                    self.key
                )));
            }

            // Jitter desynchronizes contending acquirers.
            let backoff = Duration::from_millis(rand::thread_rng().gen_range(1..=10));
            tokio::time::sleep(backoff).await;
        }
    }
}

/// Holds the lock until released or dropped.
pub struct MutexGuard {
    backend: Arc<dyn StorageBackend>,
    key: String,
    token: Vec<u8>,
    released: bool,
}

impl MutexGuard {
    /// Release the lock, surfacing any storage error.
    pub async fn release(mut self) -> Result<()> {
        self.released = true;
        self.backend.del_if_eq(&self.key, &self.token).await?;
        trace!(key = %self.key, "Released mutex");
        Ok(())
    }
}

impl Drop for MutexGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        // Dropped without an explicit release (error path or cancellation).
        // Release in the background; if no runtime is available the TTL
        // reclaims the lock.
        let backend = self.backend.clone();
        let key = std::mem::take(&mut self.key);
        let token = std::mem::take(&mut self.token);
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                let _ = backend.del_if_eq(&key, &token).await;
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryBackend;

    #[tokio::test]
    async fn test_acquire_and_release() {
        let backend: Arc<dyn StorageBackend> = Arc::new(MemoryBackend::new());
        let mutex = DistributedMutex::new(backend.clone(), "bucket-a");

        let guard = mutex.acquire().await.unwrap();
        assert!(backend.exists("floodgate:mutex:bucket-a").await.unwrap());

        guard.release().await.unwrap();
        assert!(!backend.exists("floodgate:mutex:bucket-a").await.unwrap());
    }

    #[tokio::test]
    async fn test_mutual_exclusion_across_tasks() {
        let backend: Arc<dyn StorageBackend> = Arc::new(MemoryBackend::new());
        let counter = Arc::new(parking_lot::Mutex::new((0u32, 0u32))); // (current, max seen)

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let backend = backend.clone();
            let counter = counter.clone();
            tasks.push(tokio::spawn(async move {
                let mutex = DistributedMutex::new(backend, "shared");
                for _ in 0..5 {
                    let guard = mutex.acquire().await.unwrap();
                    {
                        let mut c = counter.lock();
                        c.0 += 1;
                        c.1 = c.1.max(c.0);
                    }
                    tokio::time::sleep(Duration::from_millis(1)).await;
                    counter.lock().0 -= 1;
                    guard.release().await.unwrap();
                }
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        // Never more than one holder inside the critical section.
        assert_eq!(counter.lock().1, 1);
    }

    #[tokio::test]
    async fn test_drop_releases_in_background() {
        let backend: Arc<dyn StorageBackend> = Arc::new(MemoryBackend::new());
        let mutex = DistributedMutex::new(backend.clone(), "dropped");

        {
            let _guard = mutex.acquire().await.unwrap();
        }

        // The drop path spawns the release; give it a beat to run.
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!backend.exists("floodgate:mutex:dropped").await.unwrap());
    }
}
