//! Redis-backed [`CacheStore`].

use std::collections::HashMap;
use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;

use super::{CacheStore, Result};

/// Store shared by every node through one Redis server.
///
/// Holds a multiplexed connection; clones of it share one socket.
#[derive(Clone)]
pub struct RedisStore {
    conn: MultiplexedConnection,
}

impl RedisStore {
    /// Connect to `url` (e.g. `redis://127.0.0.1:6379/0`).
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url)?;
        let conn = client.get_multiplexed_tokio_connection().await?;
        tracing::info!(url = %redact(url), "connected to redis");
        Ok(Self { conn })
    }

    /// Round-trip a `PING`.
    pub async fn ping(&self) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }
}

/// `HDEL` guarded by an `HGET` comparison, run server-side in one step.
static DELETE_IF_EQUAL: LazyLock<redis::Script> = LazyLock::new(|| {
    redis::Script::new(
        r"if redis.call('HGET', KEYS[1], ARGV[1]) == ARGV[2] then
            return redis.call('HDEL', KEYS[1], ARGV[1])
        end
        return 0",
    )
});

fn ttl_millis(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1)
}

/// Strip the password from a Redis URL for logging.
fn redact(url: &str) -> String {
    match (url.find("://"), url.rfind('@')) {
        (Some(scheme), Some(at)) if at > scheme => format!("{}://***{}", &url[..scheme], &url[at..]),
        _ => url.to_owned(),
    }
}

#[async_trait]
impl CacheStore for RedisStore {
    async fn hash_put(&self, key: &str, field: &str, value: String, ttl: Duration) -> Result<()> {
        let mut conn = self.conn.clone();
        let mut pipe = redis::pipe();
        let _ = pipe
            .atomic()
            .cmd("HSET")
            .arg(key)
            .arg(field)
            .arg(value)
            .ignore()
            .cmd("PEXPIRE")
            .arg(key)
            .arg(ttl_millis(ttl))
            .ignore();
        pipe.query_async::<()>(&mut conn).await?;
        Ok(())
    }

    async fn hash_get(&self, key: &str, field: &str) -> Result<Option<String>> {
        let mut conn = self.conn.clone();
        Ok(redis::cmd("HGET")
            .arg(key)
            .arg(field)
            .query_async(&mut conn)
            .await?)
    }

    async fn hash_get_all(&self, key: &str) -> Result<Vec<(String, String)>> {
        let mut conn = self.conn.clone();
        let map: HashMap<String, String> = redis::cmd("HGETALL").arg(key).query_async(&mut conn).await?;
        Ok(map.into_iter().collect())
    }

    async fn hash_delete(&self, key: &str, field: &str) -> Result<bool> {
        let mut conn = self.conn.clone();
        let removed: u64 = redis::cmd("HDEL")
            .arg(key)
            .arg(field)
            .query_async(&mut conn)
            .await?;
        Ok(removed > 0)
    }

    async fn hash_delete_if(&self, key: &str, field: &str, expected: &str) -> Result<bool> {
        let mut conn = self.conn.clone();
        let removed: u64 = DELETE_IF_EQUAL
            .key(key)
            .arg(field)
            .arg(expected)
            .invoke_async(&mut conn)
            .await?;
        Ok(removed > 0)
    }

    async fn put(&self, key: &str, value: String, ttl: Duration) -> Result<()> {
        let mut conn = self.conn.clone();
        redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("PX")
            .arg(ttl_millis(ttl))
            .query_async::<()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.conn.clone();
        Ok(redis::cmd("GET").arg(key).query_async(&mut conn).await?)
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let mut conn = self.conn.clone();
        let removed: u64 = redis::cmd("DEL").arg(key).query_async(&mut conn).await?;
        Ok(removed > 0)
    }
}
