// cache.rs
//! Key-value cache used for short-lived poll results.

use std::{
    collections::HashMap,
    sync::Arc,
    time::{Duration, Instant},
};

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::Result;

/// Byte-valued cache with per-entry expiry. Implementations are shared across requests.
#[async_trait]
pub trait ResultCache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<()>;

    async fn delete(&self, key: &str) -> Result<()>;
}

#[derive(Debug, Clone)]
struct Entry {
    value: Vec<u8>,
    expires_at: Instant,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// Process-local cache. Expired entries are skipped on read and dropped by `purge_expired`.
#[derive(Clone, Default)]
pub struct InMemoryCache {
    store: Arc<RwLock<HashMap<String, Entry>>>,
}

impl InMemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn purge_expired(&self) {
        let now = Instant::now();
        self.store.write().await.retain(|_, entry| !entry.is_expired(now));
    }

    pub async fn len(&self) -> usize {
        self.store.read().await.len()
    }

    /// Spawns a task that purges expired entries every `interval`.
    pub fn start_purging(&self, interval: Duration) {
        let cache = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                cache.purge_expired().await;
            }
        });
    }
}

#[async_trait]
impl ResultCache for InMemoryCache {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let store = self.store.read().await;
        Ok(store
            .get(key)
            .filter(|entry| !entry.is_expired(Instant::now()))
            .map(|entry| entry.value.clone()))
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<()> {
        let entry = Entry {
            value,
            expires_at: Instant::now() + ttl,
        };
        self.store.write().await.insert(key.to_string(), entry);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.store.write().await.remove(key);
        Ok(())
    }
}

#[cfg(feature = "redis")]
pub use self::redis_cache::RedisCache;

#[cfg(feature = "redis")]
mod redis_cache {
    use std::time::Duration;

    use async_trait::async_trait;
    use redis::{aio::ConnectionManager, AsyncCommands, Client};

    use super::ResultCache;
    use crate::error::{Error, Result};

    /// Cache shared between service instances through Redis.
    #[derive(Clone)]
    pub struct RedisCache {
        conn: ConnectionManager,
    }

    impl RedisCache {
        pub async fn connect(url: &str) -> Result<Self> {
            let client = Client::open(url).map_err(cache_error)?;
            let conn = client
                .get_connection_manager()
                .await
                .map_err(cache_error)?;
            Ok(Self { conn })
        }
    }

    fn cache_error(e: redis::RedisError) -> Error {
        Error::Cache(e.to_string())
    }

    #[async_trait]
    impl ResultCache for RedisCache {
        async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
            let mut conn = self.conn.clone();
            conn.get(key).await.map_err(cache_error)
        }

        async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<()> {
            let mut conn = self.conn.clone();
            // SET EX rejects 0
            let secs = ttl.as_secs().max(1);
            conn.set_ex::<_, _, ()>(key, value, secs)
                .await
                .map_err(cache_error)
        }

        async fn delete(&self, key: &str) -> Result<()> {
            let mut conn = self.conn.clone();
            conn.del::<_, ()>(key).await.map_err(cache_error)
        }
    }
}
