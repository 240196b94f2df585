// Shared helpers for the integration tests
#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use stratum::{
    BackendRecord, BackendSubscription, CacheConfig, CacheError, CacheKey, MemoryBackend, Payload,
    PushHandler, Result, StorageBackend, TieredCache,
};

/// Memory backend with switchable failures
#[derive(Default)]
pub struct FaultyBackend {
    pub inner: MemoryBackend,
    pub fail_gets: AtomicBool,
    pub fail_removes: AtomicBool,
    pub fail_clears: AtomicBool,
    pub refuse_subscriptions: AtomicBool,
    /// Number of upcoming writes to reject
    pub failing_sets: AtomicU32,
    pub set_attempts: AtomicU32,
}

impl FaultyBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail_next_sets(&self, count: u32) {
        self.failing_sets.store(count, Ordering::SeqCst);
    }

    fn injected(what: &str) -> CacheError {
        CacheError::backend(format!("injected {} failure", what))
    }
}

#[async_trait]
impl StorageBackend for FaultyBackend {
    async fn get(&self, key: &CacheKey) -> Result<Option<BackendRecord>> {
        if self.fail_gets.load(Ordering::SeqCst) {
            return Err(Self::injected("get"));
        }
        self.inner.get(key).await
    }

    async fn set(
        &self,
        key: &CacheKey,
        payload: &Payload,
        expiration_date: DateTime<Utc>,
    ) -> Result<()> {
        self.set_attempts.fetch_add(1, Ordering::SeqCst);
        let fail = self
            .failing_sets
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if fail {
            return Err(Self::injected("set"));
        }
        self.inner.set(key, payload, expiration_date).await
    }

    async fn remove(&self, key: &CacheKey) -> Result<()> {
        if self.fail_removes.load(Ordering::SeqCst) {
            return Err(Self::injected("remove"));
        }
        self.inner.remove(key).await
    }

    async fn clear(&self) -> Result<()> {
        if self.fail_clears.load(Ordering::SeqCst) {
            return Err(Self::injected("clear"));
        }
        self.inner.clear().await
    }

    fn subscribe_to_updates(
        &self,
        key: &CacheKey,
        handler: PushHandler,
    ) -> Result<BackendSubscription> {
        if self.refuse_subscriptions.load(Ordering::SeqCst) {
            return Err(Self::injected("subscribe"));
        }
        self.inner.subscribe_to_updates(key, handler)
    }
}

/// Defaults without background tasks
pub fn quiet_config() -> CacheConfig {
    let mut config = CacheConfig::default();
    config.tuner.enabled = false;
    config.store.sweep_interval_ms = 0;
    config
}

pub fn cache_over(config: CacheConfig, backend: &MemoryBackend) -> TieredCache {
    TieredCache::new(config, Arc::new(backend.clone())).unwrap()
}
