use crate::error::PipelineError;
use async_trait::async_trait;
use redis::AsyncCommands;
use std::collections::{HashMap, HashSet};
use tokio::sync::Mutex;

/// TTL-capable key-value store the publisher writes through. Injected as
/// a collaborator so tests substitute an in-memory double without
/// touching control flow.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Sets `key` to `payload`, expiring after `ttl` seconds. Each key
    /// write is atomic at the protocol level; overwrites replace the
    /// prior payload entirely.
    async fn set_ex(&self, key: &str, payload: &str, ttl: u64) -> Result<(), PipelineError>;
}

pub struct RedisCacheStore {
    client: redis::Client,
}

impl RedisCacheStore {
    pub fn new(url: &str) -> Result<Self, PipelineError> {
        let client = redis::Client::open(url)
            .map_err(|e| PipelineError::Config(format!("invalid redis url: {}", e)))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl CacheStore for RedisCacheStore {
    async fn set_ex(&self, key: &str, payload: &str, ttl: u64) -> Result<(), PipelineError> {
        let mut conn = self
            .client
            .get_async_connection()
            .await
            .map_err(|e| PipelineError::CacheWrite {
                key: key.to_string(),
                reason: e.to_string(),
            })?;
        conn.set_ex(key, payload, ttl)
            .await
            .map_err(|e| PipelineError::CacheWrite {
                key: key.to_string(),
                reason: e.to_string(),
            })
    }
}

/// In-memory cache double for tests: records payload and ttl per key and
/// can be told to fail specific keys to exercise partial-failure paths.
#[derive(Default)]
pub struct MemoryCacheStore {
    entries: Mutex<HashMap<String, (String, u64)>>,
    failing_keys: Mutex<HashSet<String>>,
}

impl MemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn fail_key(&self, key: &str) {
        self.failing_keys.lock().await.insert(key.to_string());
    }

    pub async fn get(&self, key: &str) -> Option<String> {
        self.entries
            .lock()
            .await
            .get(key)
            .map(|(payload, _)| payload.clone())
    }

    pub async fn ttl_of(&self, key: &str) -> Option<u64> {
        self.entries.lock().await.get(key).map(|&(_, ttl)| ttl)
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }
}

#[async_trait]
impl CacheStore for MemoryCacheStore {
    async fn set_ex(&self, key: &str, payload: &str, ttl: u64) -> Result<(), PipelineError> {
        if self.failing_keys.lock().await.contains(key) {
            return Err(PipelineError::CacheWrite {
                key: key.to_string(),
                reason: "injected failure".to_string(),
            });
        }
        self.entries
            .lock()
            .await
            .insert(key.to_string(), (payload.to_string(), ttl));
        Ok(())
    }
}
