//! Redis implementation of the storage backend.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Script};

use super::backend::StorageBackend;
use crate::error::Result;

/// Compare-and-delete, used for mutex and slot release. Deleting only when
/// the stored owner token matches means an expired-and-reclaimed key is never
/// deleted out from under its new holder.
const DEL_IF_EQ_SCRIPT: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('DEL', KEYS[1])
else
    return 0
end
"#;

/// Storage backend over a shared Redis instance.
///
/// Uses a [`ConnectionManager`], which multiplexes and reconnects under the
/// hood, so the backend is cheap to clone and share.
#[derive(Clone)]
pub struct RedisBackend {
    conn: ConnectionManager,
    del_if_eq: Arc<Script>,
}

impl RedisBackend {
    /// Connect to Redis at `url` (e.g. `redis://127.0.0.1:6379`).
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url)?;
        let conn = client.get_connection_manager().await?;
        Ok(Self::new(conn))
    }

    /// Wrap an already established connection manager.
    pub fn new(conn: ConnectionManager) -> Self {
        Self {
            conn,
            del_if_eq: Arc::new(Script::new(DEL_IF_EQ_SCRIPT)),
        }
    }
}

#[async_trait]
impl StorageBackend for RedisBackend {
    async fn exists(&self, key: &str) -> Result<bool> {
        let mut conn = self.conn.clone();
        Ok(conn.exists(key).await?)
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let mut conn = self.conn.clone();
        Ok(conn.get(key).await?)
    }

    async fn set(&self, key: &str, value: &[u8]) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.set(key, value).await?;
        Ok(())
    }

    async fn del(&self, key: &str) -> Result<bool> {
        let mut conn = self.conn.clone();
        let deleted: i64 = conn.del(key).await?;
        Ok(deleted > 0)
    }

    async fn set_nx(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<bool> {
        let mut conn = self.conn.clone();
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value).arg("NX");
        if let Some(ttl) = ttl {
            cmd.arg("PX").arg(ttl.as_millis().max(1) as u64);
        }
        let reply: Option<String> = cmd.query_async(&mut conn).await?;
        Ok(reply.is_some())
    }

    async fn del_if_eq(&self, key: &str, value: &[u8]) -> Result<bool> {
        let mut conn = self.conn.clone();
        let deleted: i64 = self
            .del_if_eq
            .key(key)
            .arg(value)
            .invoke_async(&mut conn)
            .await?;
        Ok(deleted > 0)
    }
}
