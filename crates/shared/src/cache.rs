//! Key-value cache handle
//!
//! Session mirrors and rate-limit counters live here. The production backend
//! is Redis via a shared `ConnectionManager`; the in-memory backend keeps
//! local development and tests running without a Redis instance. Values are
//! plain strings (callers serialize JSON themselves), every entry carries a
//! TTL.

use redis::{aio::ConnectionManager, AsyncCommands};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::RwLock;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
}

/// Shared cache handle, cheap to clone
#[derive(Clone)]
pub enum KvCache {
    Redis(ConnectionManager),
    Memory(MemoryCache),
}

impl KvCache {
    /// Connect to Redis and hold a managed connection (auto-reconnects)
    pub async fn connect(redis_url: &str) -> Result<Self, CacheError> {
        let client = redis::Client::open(redis_url)?;
        let manager = ConnectionManager::new(client).await?;
        Ok(Self::Redis(manager))
    }

    /// In-process map backend for development and tests
    pub fn in_memory() -> Self {
        Self::Memory(MemoryCache::new())
    }

    pub async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        match self {
            Self::Redis(manager) => {
                let mut conn = manager.clone();
                let value: Option<String> = conn.get(key).await?;
                Ok(value)
            }
            Self::Memory(map) => Ok(map.get(key).await),
        }
    }

    /// Store `value` under `key` for `ttl_seconds`. Callers must pass a
    /// positive TTL; Redis rejects zero.
    pub async fn put(&self, key: &str, value: &str, ttl_seconds: u64) -> Result<(), CacheError> {
        match self {
            Self::Redis(manager) => {
                let mut conn = manager.clone();
                let _: () = conn.set_ex(key, value, ttl_seconds).await?;
                Ok(())
            }
            Self::Memory(map) => {
                map.put(key, value, ttl_seconds).await;
                Ok(())
            }
        }
    }

    pub async fn delete(&self, key: &str) -> Result<(), CacheError> {
        match self {
            Self::Redis(manager) => {
                let mut conn = manager.clone();
                let _: () = conn.del(key).await?;
                Ok(())
            }
            Self::Memory(map) => {
                map.delete(key).await;
                Ok(())
            }
        }
    }

    /// Round-trip liveness probe, used by the health endpoint
    pub async fn ping(&self) -> Result<(), CacheError> {
        match self {
            Self::Redis(manager) => {
                let mut conn = manager.clone();
                let _: String = redis::cmd("PING").query_async(&mut conn).await?;
                Ok(())
            }
            Self::Memory(_) => Ok(()),
        }
    }
}

/// Thread-safe in-memory cache with per-entry expiry
#[derive(Clone, Default)]
pub struct MemoryCache {
    entries: Arc<RwLock<HashMap<String, MemoryEntry>>>,
}

#[derive(Clone)]
struct MemoryEntry {
    value: String,
    expires_at: Instant,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    async fn get(&self, key: &str) -> Option<String> {
        let entries = self.entries.read().await;
        let entry = entries.get(key)?;
        if Instant::now() > entry.expires_at {
            return None;
        }
        Some(entry.value.clone())
    }

    async fn put(&self, key: &str, value: &str, ttl_seconds: u64) {
        let entry = MemoryEntry {
            value: value.to_string(),
            expires_at: Instant::now() + Duration::from_secs(ttl_seconds),
        };
        self.entries.write().await.insert(key.to_string(), entry);
    }

    async fn delete(&self, key: &str) {
        self.entries.write().await.remove(key);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]  // Allow unwrap() in tests for cleaner test code
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_get_put() {
        let cache = KvCache::in_memory();

        assert_eq!(cache.get("missing").await.unwrap(), None);

        cache.put("k", "v", 60).await.unwrap();
        assert_eq!(cache.get("k").await.unwrap(), Some("v".to_string()));
    }

    #[tokio::test]
    async fn test_memory_overwrite() {
        let cache = KvCache::in_memory();

        cache.put("k", "first", 60).await.unwrap();
        cache.put("k", "second", 60).await.unwrap();
        assert_eq!(cache.get("k").await.unwrap(), Some("second".to_string()));
    }

    #[tokio::test]
    async fn test_memory_delete() {
        let cache = KvCache::in_memory();

        cache.put("k", "v", 60).await.unwrap();
        cache.delete("k").await.unwrap();
        assert_eq!(cache.get("k").await.unwrap(), None);

        // Deleting a missing key is not an error
        cache.delete("k").await.unwrap();
    }

    #[tokio::test]
    async fn test_memory_expiry() {
        let cache = KvCache::in_memory();

        cache.put("k", "v", 0).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(cache.get("k").await.unwrap(), None);
    }
}
