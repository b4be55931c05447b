//! Configuration for storage backend pools.
//!
//! The limiters themselves take all policy parameters per call; the only
//! process-level configuration is which Redis pools exist and which one is
//! the default.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::pool::DEFAULT_POOL;

/// Top-level Floodgate configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FloodgateConfig {
    /// Storage pools by name.
    #[serde(default)]
    pub pools: HashMap<String, PoolConfig>,

    /// Pool used when a caller does not select one.
    #[serde(default = "default_pool_name")]
    pub default_pool: String,
}

impl Default for FloodgateConfig {
    fn default() -> Self {
        Self {
            pools: HashMap::new(),
            default_pool: default_pool_name(),
        }
    }
}

fn default_pool_name() -> String {
    DEFAULT_POOL.to_string()
}

/// Configuration for one storage pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Redis connection URL, e.g. `redis://127.0.0.1:6379`.
    pub url: String,
}

impl FloodgateConfig {
    /// Load configuration from a YAML file.
    pub fn from_file(path: &str) -> crate::error::Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| crate::error::FloodgateError::Config(e.to_string()))?;
        let config: FloodgateConfig = serde_yaml::from_str(&contents)
            .map_err(|e| crate::error::FloodgateError::Config(e.to_string()))?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = FloodgateConfig::default();
        assert!(config.pools.is_empty());
        assert_eq!(config.default_pool, DEFAULT_POOL);
    }

    #[test]
    fn test_parse_yaml() {
        let yaml = r#"
pools:
  default:
    url: redis://127.0.0.1:6379
  sessions:
    url: redis://10.0.0.2:6379
default_pool: default
"#;
        let config: FloodgateConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.pools.len(), 2);
        assert_eq!(config.pools["sessions"].url, "redis://10.0.0.2:6379");
        assert_eq!(config.default_pool, "default");
    }
}
