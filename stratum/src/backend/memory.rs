use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::debug;

use super::{BackendRecord, BackendSubscription, PushHandler, StorageBackend};
use crate::core::error::Result;
use crate::core::types::{CacheKey, Payload};

/// In-process durable tier with a push-update channel
///
/// Writes made through [`StorageBackend::set`] are not echoed to subscribers;
/// [`MemoryBackend::push_update`] plays the part of another client writing.
#[derive(Clone, Default)]
pub struct MemoryBackend {
    inner: Arc<MemoryInner>,
}

#[derive(Default)]
struct MemoryInner {
    records: RwLock<HashMap<CacheKey, BackendRecord>>,
    subscribers: RwLock<HashMap<CacheKey, Vec<(u64, PushHandler)>>>,
    next_subscriber: AtomicU64,
    latency: RwLock<Duration>,
    gets: AtomicU64,
    sets: AtomicU64,
    removes: AtomicU64,
    clears: AtomicU64,
}

/// Operation counters, useful to check which tier served a read
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BackendOpCounts {
    pub gets: u64,
    pub sets: u64,
    pub removes: u64,
    pub clears: u64,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Backend that sleeps `latency` before answering each call
    pub fn with_latency(latency: Duration) -> Self {
        let backend = Self::default();
        backend.set_latency(latency);
        backend
    }

    pub fn set_latency(&self, latency: Duration) {
        *self.inner.latency.write() = latency;
    }

    /// Store a value written elsewhere and push it to subscribers of `key`
    ///
    /// Returns how many handlers were notified.
    pub fn push_update(&self, key: &CacheKey, payload: Payload, expiration_date: DateTime<Utc>) -> usize {
        self.inner.records.write().insert(
            key.clone(),
            BackendRecord {
                payload: payload.clone(),
                expiration_date,
            },
        );

        // Handlers run outside the lock so they may call back into the backend
        let handlers: Vec<PushHandler> = self
            .inner
            .subscribers
            .read()
            .get(key)
            .map(|subs| subs.iter().map(|(_, handler)| Arc::clone(handler)).collect())
            .unwrap_or_default();

        for handler in &handlers {
            handler(payload.clone());
        }

        debug!("Pushed update for {} to {} subscribers", key, handlers.len());
        handlers.len()
    }

    pub fn subscriber_count(&self, key: &CacheKey) -> usize {
        self.inner
            .subscribers
            .read()
            .get(key)
            .map_or(0, |subs| subs.len())
    }

    pub fn len(&self) -> usize {
        self.inner.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.records.read().is_empty()
    }

    /// Raw record, bypassing expiry checks and counters
    pub fn record(&self, key: &CacheKey) -> Option<BackendRecord> {
        self.inner.records.read().get(key).cloned()
    }

    pub fn op_counts(&self) -> BackendOpCounts {
        BackendOpCounts {
            gets: self.inner.gets.load(Ordering::Relaxed),
            sets: self.inner.sets.load(Ordering::Relaxed),
            removes: self.inner.removes.load(Ordering::Relaxed),
            clears: self.inner.clears.load(Ordering::Relaxed),
        }
    }

    async fn simulate_io(&self) {
        let latency = *self.inner.latency.read();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
    }
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    async fn get(&self, key: &CacheKey) -> Result<Option<BackendRecord>> {
        self.inner.gets.fetch_add(1, Ordering::Relaxed);
        self.simulate_io().await;

        let mut records = self.inner.records.write();
        match records.get(key) {
            Some(record) if record.is_expired_at(Utc::now()) => {
                records.remove(key);
                Ok(None)
            }
            Some(record) => Ok(Some(record.clone())),
            None => Ok(None),
        }
    }

    async fn set(
        &self,
        key: &CacheKey,
        payload: &Payload,
        expiration_date: DateTime<Utc>,
    ) -> Result<()> {
        self.inner.sets.fetch_add(1, Ordering::Relaxed);
        self.simulate_io().await;

        self.inner.records.write().insert(
            key.clone(),
            BackendRecord {
                payload: payload.clone(),
                expiration_date,
            },
        );
        Ok(())
    }

    async fn remove(&self, key: &CacheKey) -> Result<()> {
        self.inner.removes.fetch_add(1, Ordering::Relaxed);
        self.simulate_io().await;

        self.inner.records.write().remove(key);
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        self.inner.clears.fetch_add(1, Ordering::Relaxed);
        self.simulate_io().await;

        self.inner.records.write().clear();
        Ok(())
    }

    fn subscribe_to_updates(&self, key: &CacheKey, handler: PushHandler) -> Result<BackendSubscription> {
        let id = self.inner.next_subscriber.fetch_add(1, Ordering::Relaxed);
        self.inner
            .subscribers
            .write()
            .entry(key.clone())
            .or_default()
            .push((id, handler));

        debug!("Backend subscriber {} added for {}", id, key);

        let inner = Arc::downgrade(&self.inner);
        let key = key.clone();
        Ok(BackendSubscription::new(move || {
            if let Some(inner) = inner.upgrade() {
                let mut subscribers = inner.subscribers.write();
                if let Some(subs) = subscribers.get_mut(&key) {
                    subs.retain(|(sub_id, _)| *sub_id != id);
                    if subs.is_empty() {
                        subscribers.remove(&key);
                    }
                }
                debug!("Backend subscriber {} released for {}", id, key);
            }
        }))
    }
}
