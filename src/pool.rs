//! Named backend pools.
//!
//! The original design resolved pools through process-global state; here the
//! registry is an explicit, injectable value so limiters can be constructed
//! with test doubles. Callers select a pool per operation by name, or fall
//! back to the default pool.

use std::sync::Arc;

use dashmap::DashMap;
use tracing::info;

use crate::config::FloodgateConfig;
use crate::error::{FloodgateError, Result};
use crate::storage::{RedisBackend, StorageBackend};

/// Name of the pool used when a caller does not select one.
pub const DEFAULT_POOL: &str = "default";

/// Registry of named storage backends.
pub struct PoolManager {
    pools: DashMap<String, Arc<dyn StorageBackend>>,
    default_pool: String,
}

impl PoolManager {
    /// Create an empty registry with [`DEFAULT_POOL`] as the default.
    pub fn new() -> Self {
        Self::with_default_pool(DEFAULT_POOL)
    }

    /// Create an empty registry with a custom default pool name.
    pub fn with_default_pool(name: &str) -> Self {
        Self {
            pools: DashMap::new(),
            default_pool: name.to_string(),
        }
    }

    /// Convenience: a registry whose default pool is `backend`.
    pub fn single(backend: Arc<dyn StorageBackend>) -> Arc<Self> {
        let pools = Self::new();
        pools.register(DEFAULT_POOL, backend);
        Arc::new(pools)
    }

    /// Build a registry from configuration, connecting one Redis backend per
    /// configured pool.
    pub async fn from_config(config: &FloodgateConfig) -> Result<Self> {
        let pools = Self::with_default_pool(&config.default_pool);
        for (name, pool_config) in &config.pools {
            let backend = RedisBackend::connect(&pool_config.url).await?;
            pools.register(name, Arc::new(backend));
            info!(pool = %name, "Connected storage pool");
        }
        Ok(pools)
    }

    /// Register (or replace) a backend under `name`.
    pub fn register(&self, name: &str, backend: Arc<dyn StorageBackend>) {
        self.pools.insert(name.to_string(), backend);
    }

    /// Resolve a pool selector to its backend. `None` selects the default
    /// pool.
    pub fn select(&self, pool: Option<&str>) -> Result<Arc<dyn StorageBackend>> {
        let name = pool.unwrap_or(&self.default_pool);
        self.pools
            .get(name)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| FloodgateError::UnknownPool(name.to_string()))
    }
}

impl Default for PoolManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryBackend;

    #[test]
    fn test_select_default_pool() {
        let pools = PoolManager::single(Arc::new(MemoryBackend::new()));
        assert!(pools.select(None).is_ok());
        assert!(pools.select(Some(DEFAULT_POOL)).is_ok());
    }

    #[test]
    fn test_select_named_pool() {
        let pools = PoolManager::new();
        pools.register("cache", Arc::new(MemoryBackend::new()));

        assert!(pools.select(Some("cache")).is_ok());
        // No default pool registered.
        assert!(matches!(
            pools.select(None),
            Err(FloodgateError::UnknownPool(_))
        ));
    }

    #[test]
    fn test_unknown_pool_is_an_error() {
        let pools = PoolManager::single(Arc::new(MemoryBackend::new()));
        let err = pools.select(Some("missing")).unwrap_err();
        assert!(matches!(err, FloodgateError::UnknownPool(name) if name == "missing"));
    }
}
