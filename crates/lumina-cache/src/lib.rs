//! Short-lived write-through cache of resolved key configurations.
//!
//! Values live under `key_config:<hash>` with a one-hour TTL; the rate-limit
//! counter lives under `rate_limit:<hash>` with a one-minute sliding expiry.
//! Cache failures are surfaced as [`CacheError`] so callers can log and fall
//! back to the durable store; they are never fatal to the request path.

use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

const KEY_CONFIG_PREFIX: &str = "key_config:";
const RATE_LIMIT_PREFIX: &str = "rate_limit:";
const KEY_CONFIG_TTL_SECS: u64 = 60 * 60;
const RATE_LIMIT_WINDOW_SECS: i64 = 60;

/// Errors from the cache adapter.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("cache value serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Redis-backed key-configuration cache.
#[derive(Clone)]
pub struct KeyCache {
    conn: ConnectionManager,
}

impl KeyCache {
    pub async fn connect(redis_url: &str) -> Result<Self, CacheError> {
        let client = redis::Client::open(redis_url)?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self { conn })
    }

    /// Fetch a cached key configuration; `None` on miss.
    pub async fn get_key_config<T>(&self, key_hash: &str) -> Result<Option<T>, CacheError>
    where
        T: DeserializeOwned,
    {
        let mut conn = self.conn.clone();
        let payload: Option<String> = conn.get(config_key(key_hash)).await?;
        match payload {
            Some(payload) => {
                debug!(key_hash, "key config cache hit");
                Ok(Some(serde_json::from_str(&payload)?))
            }
            None => {
                debug!(key_hash, "key config cache miss");
                Ok(None)
            }
        }
    }

    /// Store a key configuration with the one-hour TTL.
    pub async fn set_key_config<T>(&self, key_hash: &str, config: &T) -> Result<(), CacheError>
    where
        T: Serialize,
    {
        let payload = serde_json::to_string(config)?;
        let mut conn = self.conn.clone();
        conn.set_ex::<_, _, ()>(config_key(key_hash), payload, KEY_CONFIG_TTL_SECS)
            .await?;
        Ok(())
    }

    /// Drop a cached key configuration. Returns whether an entry existed.
    pub async fn delete_key_config(&self, key_hash: &str) -> Result<bool, CacheError> {
        let mut conn = self.conn.clone();
        let deleted: i64 = conn.del(config_key(key_hash)).await?;
        Ok(deleted > 0)
    }

    /// Atomically bump the per-hash counter inside a one-minute window and
    /// return the new count. The caller decides the policy.
    pub async fn increment_rate_limit(&self, key_hash: &str) -> Result<i64, CacheError> {
        let key = rate_limit_key(key_hash);
        let mut conn = self.conn.clone();
        let (count,): (i64,) = redis::pipe()
            .atomic()
            .incr(&key, 1)
            .expire(&key, RATE_LIMIT_WINDOW_SECS)
            .ignore()
            .query_async(&mut conn)
            .await?;
        Ok(count)
    }
}

fn config_key(key_hash: &str) -> String {
    format!("{KEY_CONFIG_PREFIX}{key_hash}")
}

fn rate_limit_key(key_hash: &str) -> String {
    format!("{RATE_LIMIT_PREFIX}{key_hash}")
}
