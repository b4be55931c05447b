//! Persistence of token bucket state.
//!
//! A bucket persists as a single value: the last-refill timestamp, epoch
//! seconds as an IEEE-754 double. Token counts are never stored; they are
//! derived from elapsed time on every read, which keeps fractional refill
//! exact and makes the stored state immune to drift. The double is packed
//! big-endian into exactly eight bytes so it round-trips losslessly.

use std::sync::Arc;

use tracing::debug;

use super::backend::StorageBackend;
use super::mutex::{DistributedMutex, MutexGuard};
use crate::error::{FloodgateError, Result};

fn pack_timestamp(microtime: f64) -> [u8; 8] {
    microtime.to_be_bytes()
}

fn unpack_timestamp(data: &[u8]) -> Result<f64> {
    let bytes: [u8; 8] = data.try_into().map_err(|_| {
        FloodgateError::StorageCorrupt(format!(
            "bucket timestamp must be 8 bytes, got {}",
            data.len()
        ))
    })?;
    Ok(f64::from_be_bytes(bytes))
}

/// Shared, cross-process store for one bucket's timestamp.
///
/// All reads and writes are network I/O against the shared backend; nothing
/// is cached in-process, since other processes mutate the same key. Callers
/// must hold the store's mutex across any read-modify-write.
pub struct BucketStore {
    backend: Arc<dyn StorageBackend>,
    name: String,
    key: String,
    mutex: DistributedMutex,
}

impl BucketStore {
    /// Create a store for the bucket `name`.
    pub fn new(backend: Arc<dyn StorageBackend>, name: &str) -> Self {
        let mutex = DistributedMutex::new(backend.clone(), name);
        Self {
            backend,
            name: name.to_string(),
            key: format!("floodgate:bucket:{name}"),
            mutex,
        }
    }

    /// The bucket name this store persists.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Acquire the mutex guarding this bucket's state.
    pub async fn lock(&self) -> Result<MutexGuard> {
        self.mutex.acquire().await
    }

    /// Whether state has been bootstrapped for this bucket.
    pub async fn is_bootstrapped(&self) -> Result<bool> {
        self.backend.exists(&self.key).await
    }

    /// Idempotently ensure a timestamp exists, writing `microtime` if absent.
    pub async fn bootstrap(&self, microtime: f64) -> Result<()> {
        let created = self
            .backend
            .set_nx(&self.key, &pack_timestamp(microtime), None)
            .await?;
        if created {
            debug!(bucket = %self.name, microtime, "Bootstrapped bucket state");
        }
        Ok(())
    }

    /// Read the persisted last-refill timestamp.
    pub async fn read(&self) -> Result<f64> {
        match self.backend.get(&self.key).await? {
            Some(data) => unpack_timestamp(&data),
            None => Err(FloodgateError::StorageCorrupt(format!(
                "bucket state missing for {}",
                self.name
            ))),
        }
    }

    /// Persist a new last-refill timestamp.
    pub async fn write(&self, microtime: f64) -> Result<()> {
        self.backend.set(&self.key, &pack_timestamp(microtime)).await
    }

    /// Delete the persisted state. Returns whether state was present.
    pub async fn remove(&self) -> Result<bool> {
        self.backend.del(&self.key).await
    }
}
