//! In-process storage backend.
//!
//! Implements the same contract as [`RedisBackend`](super::RedisBackend)
//! against a process-local map. Used by the test suites and usable as a
//! single-node backend when no shared store is deployed, at the cost of the
//! cross-process guarantees.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;

use super::backend::StorageBackend;
use crate::error::Result;

#[derive(Clone)]
struct Entry {
    value: Vec<u8>,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|at| Instant::now() >= at)
    }
}

/// A local, lease-aware key-value store.
#[derive(Default)]
pub struct MemoryBackend {
    entries: DashMap<String, Entry>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live (unexpired) keys. Test-facing.
    pub fn len(&self) -> usize {
        self.entries.iter().filter(|e| !e.is_expired()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.entries.get(key).map(|e| !e.is_expired()).unwrap_or(false))
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self
            .entries
            .get(key)
            .filter(|e| !e.is_expired())
            .map(|e| e.value.clone()))
    }

    async fn set(&self, key: &str, value: &[u8]) -> Result<()> {
        self.entries.insert(
            key.to_string(),
            Entry {
                value: value.to_vec(),
                expires_at: None,
            },
        );
        Ok(())
    }

    async fn del(&self, key: &str) -> Result<bool> {
        Ok(self
            .entries
            .remove(key)
            .map(|(_, e)| !e.is_expired())
            .unwrap_or(false))
    }

    async fn set_nx(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<bool> {
        let fresh = Entry {
            value: value.to_vec(),
            expires_at: ttl.map(|t| Instant::now() + t),
        };
        // The dashmap entry lock makes check-then-insert atomic per key.
        match self.entries.entry(key.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(mut occupied) => {
                if occupied.get().is_expired() {
                    occupied.insert(fresh);
                    Ok(true)
                } else {
                    Ok(false)
                }
            }
            dashmap::mapref::entry::Entry::Vacant(vacant) => {
                vacant.insert(fresh);
                Ok(true)
            }
        }
    }

    async fn del_if_eq(&self, key: &str, value: &[u8]) -> Result<bool> {
        let removed = self
            .entries
            .remove_if(key, |_, e| !e.is_expired() && e.value == value);
        Ok(removed.is_some())
    }
}
