//! Storage backend trait for the shared key-value store.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;

/// Abstraction over the Redis-like store backing both limiters.
///
/// The store is assumed to be a single logical, linearizable-per-key service
/// shared by every process enforcing a limit. `set_nx` and `del_if_eq` are the
/// atomic primitives the distributed mutex and the worker slot lock build on;
/// implementations must guarantee that concurrent `set_nx` calls for the same
/// key never both succeed.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Whether a value exists for `key`.
    async fn exists(&self, key: &str) -> Result<bool>;

    /// Fetch the value for `key`, or `None` if absent.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Unconditionally store `value` under `key`.
    async fn set(&self, key: &str, value: &[u8]) -> Result<()>;

    /// Delete `key`. Returns whether a value was present.
    async fn del(&self, key: &str) -> Result<bool>;

    /// Store `value` under `key` only if the key is absent, with an optional
    /// expiry. Returns whether the write won.
    async fn set_nx(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<bool>;

    /// Delete `key` only if its current value equals `value`, atomically.
    /// Returns whether a deletion happened.
    async fn del_if_eq(&self, key: &str, value: &[u8]) -> Result<bool>;
}

impl fmt::Debug for dyn StorageBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("StorageBackend")
    }
}
