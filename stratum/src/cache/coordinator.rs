//! Two-Tier Coordinator
//!
//! Reads go to the entry store first and fall back to the storage backend;
//! backend hits are promoted into the entry store. Writes land in the entry
//! store synchronously and in the backend before `set` resolves (or detached,
//! when `backend.await_writes` is off). Backend push updates refresh the entry
//! store and fan out to local listeners.

use chrono::{DateTime, TimeDelta, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::subscriptions::{SubscriptionRegistry, UpdateSubscription};
use super::tuner::AdaptiveTuner;
use crate::backend::{BackendRecord, PushHandler, StorageBackend};
use crate::codec::ValueCodec;
use crate::config::CacheConfig;
use crate::core::{
    CacheError, CacheKey, CacheResult, CacheStatistics, CacheValue, EntryStore, Payload, Result,
    StatsAggregator, Tier,
};

type FetchOutcome = Result<Option<BackendRecord>>;

/// Cache instance handle; clones share the same tiers
#[derive(Clone)]
pub struct TieredCache {
    inner: Arc<CacheInner>,
}

struct CacheInner {
    config: CacheConfig,
    store: EntryStore,
    stats: Arc<StatsAggregator>,
    codec: ValueCodec,
    backend: Arc<dyn StorageBackend>,
    tuner: Arc<AdaptiveTuner>,
    subscriptions: Arc<SubscriptionRegistry>,
    /// Backend fetches in flight, keyed by cache key
    inflight: Mutex<HashMap<CacheKey, broadcast::Sender<FetchOutcome>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

/// Removes the in-flight marker even if the leading fetch is cancelled
struct InflightGuard<'a> {
    inflight: &'a Mutex<HashMap<CacheKey, broadcast::Sender<FetchOutcome>>>,
    key: &'a CacheKey,
}

impl Drop for InflightGuard<'_> {
    fn drop(&mut self) {
        self.inflight.lock().remove(self.key);
    }
}

enum FetchRole {
    Leader(broadcast::Sender<FetchOutcome>),
    Follower(broadcast::Receiver<FetchOutcome>),
}

impl TieredCache {
    /// Build a cache over `backend`; the configuration is validated first
    pub fn new(config: CacheConfig, backend: Arc<dyn StorageBackend>) -> Result<Self> {
        config.validate()?;

        let stats = Arc::new(StatsAggregator::new());
        let store = EntryStore::new(
            config.store.capacity,
            config.store.default_policy,
            Arc::clone(&stats),
        )?;
        let codec = ValueCodec::new(config.compression.clone(), config.encryption.clone())?;
        let tuner = Arc::new(AdaptiveTuner::new(store.clone(), config.tuner.clone()));
        let subscriptions = Arc::new(SubscriptionRegistry::new(Duration::from_millis(
            config.subscriptions.slow_listener_ms,
        )));

        info!(
            "Tiered cache created: capacity={}, policy={}, compression={}, encryption={}",
            config.store.capacity,
            config.store.default_policy,
            config.compression.enabled,
            codec.encrypts()
        );

        Ok(Self {
            inner: Arc::new(CacheInner {
                config,
                store,
                stats,
                codec,
                backend,
                tuner,
                subscriptions,
                inflight: Mutex::new(HashMap::new()),
                tasks: Mutex::new(Vec::new()),
            }),
        })
    }

    /// Spawn the tuner and the expiry sweeper on the current runtime
    ///
    /// Calling it again while running is a no-op.
    pub fn start(&self) {
        let mut tasks = self.inner.tasks.lock();
        if !tasks.is_empty() {
            debug!("Tiered cache already started");
            return;
        }

        if self.inner.config.tuner.enabled {
            tasks.push(self.inner.tuner.start());
        }

        let sweep_interval_ms = self.inner.config.store.sweep_interval_ms;
        if sweep_interval_ms > 0 {
            tasks.push(self.start_sweeper(Duration::from_millis(sweep_interval_ms)));
        }

        info!("Tiered cache started ({} background tasks)", tasks.len());
    }

    pub fn is_running(&self) -> bool {
        !self.inner.tasks.lock().is_empty()
    }

    /// Stop background tasks and release every subscription
    pub fn shutdown(&self) {
        let tasks: Vec<JoinHandle<()>> = self.inner.tasks.lock().drain(..).collect();
        for task in &tasks {
            task.abort();
        }

        let released = self.inner.subscriptions.release_all();
        info!(
            "Tiered cache shut down: stopped {} tasks, released {} subscribed keys",
            tasks.len(),
            released
        );
    }

    fn start_sweeper(&self, interval: Duration) -> JoinHandle<()> {
        info!("Starting expiry sweeper (interval={:?})", interval);

        let inner = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;

            loop {
                ticker.tick().await;

                let Some(inner) = inner.upgrade() else {
                    break;
                };
                inner.store.purge_expired();
            }
        })
    }

    /// Read a value, using the configured backend timeout
    pub async fn get(&self, identifier: &str, store_name: &str) -> Result<CacheResult> {
        self.get_with_timeout(identifier, store_name, self.inner.config.backend_timeout())
            .await
    }

    /// Read a value; `timeout` bounds the backend call on a local miss
    ///
    /// Every call records exactly one hit (served locally) or one miss.
    pub async fn get_with_timeout(
        &self,
        identifier: &str,
        store_name: &str,
        timeout: Duration,
    ) -> Result<CacheResult> {
        let key = CacheKey::new(identifier, store_name);
        let started = Instant::now();

        if let Some(entry) = self.inner.store.get(&key) {
            self.inner.stats.record_hit(started.elapsed());
            let value = self.inner.codec.decode(&entry.payload)?;
            debug!("GET key={} tier=local", key);
            return Ok(CacheResult::found(key, value, entry.metadata(), Tier::Local));
        }

        let outcome = self.fetch(&key, timeout).await;
        self.inner.stats.record_miss(started.elapsed());

        let record = match outcome? {
            Some(record) if !record.is_expired_at(Utc::now()) => record,
            _ => {
                debug!("GET key={} absent", key);
                return Ok(CacheResult::absent(key));
            }
        };

        // Undecodable data is reported, never promoted
        let value = self.inner.codec.decode(&record.payload)?;
        self.inner
            .store
            .set(key.clone(), record.payload, record.expiration_date);
        let metadata = self.inner.store.peek(&key).unwrap_or_default();

        debug!("GET key={} tier=remote (promoted)", key);
        Ok(CacheResult::found(key, value, metadata, Tier::Remote))
    }

    /// Backend read shared by every concurrent miss on the same key
    ///
    /// Each caller waits at most `timeout`, whether it runs the fetch itself
    /// or joins one already in flight.
    async fn fetch(&self, key: &CacheKey, timeout: Duration) -> FetchOutcome {
        let deadline = tokio::time::Instant::now() + timeout;
        let role = {
            let mut inflight = self.inner.inflight.lock();
            match inflight.get(key) {
                Some(sender) => FetchRole::Follower(sender.subscribe()),
                None => {
                    let (sender, _) = broadcast::channel(1);
                    inflight.insert(key.clone(), sender.clone());
                    FetchRole::Leader(sender)
                }
            }
        };

        match role {
            FetchRole::Leader(sender) => {
                let guard = InflightGuard {
                    inflight: &self.inner.inflight,
                    key,
                };
                let outcome = within(deadline, timeout, self.inner.backend.get(key)).await;
                drop(guard);

                // Nobody waiting is fine
                let _ = sender.send(outcome.clone());
                outcome
            }
            FetchRole::Follower(mut receiver) => {
                let Ok(joined) = tokio::time::timeout_at(deadline, receiver.recv()).await else {
                    debug!("GET key={} gave up waiting on in-flight fetch", key);
                    return Err(CacheError::BackendTimeout(timeout));
                };

                match joined {
                    Ok(Err(CacheError::BackendTimeout(_))) | Err(_) => {
                        // Leader timed out on its own deadline or was cancelled
                        within(deadline, timeout, self.inner.backend.get(key)).await
                    }
                    Ok(outcome) => {
                        debug!("GET key={} joined in-flight fetch", key);
                        outcome
                    }
                }
            }
        }
    }

    /// Write a value to both tiers
    ///
    /// The entry store is updated before the backend is contacted, and stays
    /// updated if the backend write fails.
    pub async fn set(
        &self,
        identifier: &str,
        store_name: &str,
        value: impl Into<CacheValue>,
        expiration_date: DateTime<Utc>,
    ) -> Result<()> {
        let key = CacheKey::new(identifier, store_name);
        let value = value.into();
        let payload = self.inner.codec.encode(&value)?;

        self.inner
            .store
            .set(key.clone(), payload.clone(), expiration_date);
        debug!(
            "SET key={} kind={} size={} expires={}",
            key,
            value.kind(),
            payload.size_bytes(),
            expiration_date
        );

        if self.inner.config.backend.await_writes {
            return self
                .inner
                .write_backend(&key, &payload, expiration_date)
                .await;
        }

        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            if let Err(e) = inner.write_backend(&key, &payload, expiration_date).await {
                warn!("Detached backend write for {} failed: {}", key, e);
            }
        });
        Ok(())
    }

    /// Write a value that expires `ttl` from now
    pub async fn set_with_ttl(
        &self,
        identifier: &str,
        store_name: &str,
        value: impl Into<CacheValue>,
        ttl: Duration,
    ) -> Result<()> {
        self.set(identifier, store_name, value, expires_in(ttl))
            .await
    }

    /// Write a value with the configured default TTL
    pub async fn set_default(
        &self,
        identifier: &str,
        store_name: &str,
        value: impl Into<CacheValue>,
    ) -> Result<()> {
        self.set_with_ttl(identifier, store_name, value, self.inner.config.default_ttl())
            .await
    }

    /// Delete a value from both tiers
    pub async fn remove(&self, identifier: &str, store_name: &str) -> Result<()> {
        let key = CacheKey::new(identifier, store_name);
        self.inner.store.remove(&key);

        with_deadline(
            self.inner.config.backend_timeout(),
            self.inner.backend.remove(&key),
        )
        .await?;

        debug!("DELETE key={}", key);
        Ok(())
    }

    /// Empty both tiers and reset the statistics
    pub async fn clear(&self) -> Result<()> {
        self.inner.store.clear();
        self.inner.stats.reset();

        with_deadline(
            self.inner.config.backend_timeout(),
            self.inner.backend.clear(),
        )
        .await?;

        info!("Tiered cache cleared");
        Ok(())
    }

    /// Receive values pushed by the backend for one key
    ///
    /// Each pushed value is stored locally for the configured freshness
    /// window, then handed to every listener of the key in registration
    /// order.
    ///
    /// Delivery is sequential on the backend's push thread: a listener that
    /// errors or panics is skipped, but a slow listener delays the ones
    /// registered after it and is only reported in the logs. Keep listeners
    /// short, or hand the work to a task.
    pub fn subscribe_to_updates<F>(
        &self,
        identifier: &str,
        store_name: &str,
        listener: F,
    ) -> Result<UpdateSubscription>
    where
        F: Fn(&CacheKey, &CacheValue) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let key = CacheKey::new(identifier, store_name);
        let (id, needs_backend) = self.inner.subscriptions.add(&key, Arc::new(listener));

        if needs_backend {
            match self
                .inner
                .backend
                .subscribe_to_updates(&key, self.push_handler(&key))
            {
                Ok(subscription) => {
                    self.inner.subscriptions.attach_backend(&key, subscription);
                    info!("Subscribed to backend updates for {}", key);
                }
                Err(e) => {
                    self.inner.subscriptions.backend_failed(&key, id);
                    return Err(e);
                }
            }
        }

        Ok(UpdateSubscription::new(&self.inner.subscriptions, key, id))
    }

    fn push_handler(&self, key: &CacheKey) -> PushHandler {
        let inner = Arc::downgrade(&self.inner);
        let key = key.clone();
        Arc::new(move |payload: Payload| {
            if let Some(inner) = inner.upgrade() {
                inner.apply_push(&key, payload);
            }
        })
    }

    pub fn listener_count(&self, identifier: &str, store_name: &str) -> usize {
        self.inner
            .subscriptions
            .listener_count(&CacheKey::new(identifier, store_name))
    }

    pub fn stats(&self) -> CacheStatistics {
        self.inner.stats.snapshot()
    }

    pub fn entry_store(&self) -> &EntryStore {
        &self.inner.store
    }

    pub fn tuner(&self) -> &AdaptiveTuner {
        &self.inner.tuner
    }

    pub fn config(&self) -> &CacheConfig {
        &self.inner.config
    }
}

impl CacheInner {
    async fn write_backend(
        &self,
        key: &CacheKey,
        payload: &Payload,
        expiration_date: DateTime<Utc>,
    ) -> Result<()> {
        let timeout = self.config.backend_timeout();
        let retries = self.config.backend.write_retries;
        let backoff = Duration::from_millis(self.config.backend.retry_backoff_ms);

        let mut attempt = 0;
        loop {
            match with_deadline(timeout, self.backend.set(key, payload, expiration_date)).await {
                Ok(()) => return Ok(()),
                Err(e) if attempt < retries => {
                    attempt += 1;
                    warn!(
                        "Backend write for {} failed (attempt {}/{}): {}",
                        key,
                        attempt,
                        retries + 1,
                        e
                    );
                    tokio::time::sleep(backoff).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn apply_push(&self, key: &CacheKey, payload: Payload) {
        let value = match self.codec.decode(&payload) {
            Ok(value) => value,
            Err(e) => {
                warn!("Dropping undecodable update for {}: {}", key, e);
                return;
            }
        };

        self.store.set(
            key.clone(),
            payload,
            expires_in(self.config.freshness_window()),
        );

        let report = self.subscriptions.dispatch(key, &value);
        debug!(
            "PUSH key={} delivered={} failed={}",
            key, report.delivered, report.failed
        );
    }
}

impl Drop for CacheInner {
    fn drop(&mut self) {
        for task in self.tasks.get_mut().drain(..) {
            task.abort();
        }
    }
}

/// Run a backend call under a deadline; elapsing is a backend error
async fn with_deadline<T>(timeout: Duration, call: impl Future<Output = Result<T>>) -> Result<T> {
    within(tokio::time::Instant::now() + timeout, timeout, call).await
}

/// Like [`with_deadline`], against a deadline fixed earlier by the caller
async fn within<T>(
    deadline: tokio::time::Instant,
    timeout: Duration,
    call: impl Future<Output = Result<T>>,
) -> Result<T> {
    tokio::time::timeout_at(deadline, call)
        .await
        .unwrap_or_else(|_| Err(CacheError::BackendTimeout(timeout)))
}

fn expires_in(ttl: Duration) -> DateTime<Utc> {
    let now = Utc::now();
    TimeDelta::from_std(ttl)
        .ok()
        .and_then(|delta| now.checked_add_signed(delta))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}
