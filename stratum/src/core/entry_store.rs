use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::debug;

use super::error::{CacheError, Result};
use super::stats::StatsAggregator;
use super::types::{CacheEntry, CacheKey, EntryMetadata, EvictionPolicy, Payload};

/// In-memory tier: bounded, TTL-aware, with pluggable eviction ranking
///
/// Capacity, policy and ranking data sit behind one mutex, shared by regular
/// traffic and the tuner.
#[derive(Clone)]
pub struct EntryStore {
    inner: Arc<Mutex<StoreInner>>,
    stats: Arc<StatsAggregator>,
}

struct StoreInner {
    data: HashMap<CacheKey, Slot>,
    /// LRU ordering (oldest tick first)
    recency: BTreeMap<u64, CacheKey>,
    next_tick: u64,
    capacity: usize,
    policy: EvictionPolicy,
    memory_bytes: usize,
}

struct Slot {
    entry: CacheEntry,
    /// Position in the recency index
    recency_tick: u64,
    /// Last access order, used as the LFU tie-break
    access_tick: u64,
}

impl StoreInner {
    fn tick(&mut self) -> u64 {
        self.next_tick += 1;
        self.next_tick
    }

    fn remove_slot(&mut self, key: &CacheKey) -> Option<Slot> {
        let slot = self.data.remove(key)?;
        self.recency.remove(&slot.recency_tick);
        self.memory_bytes = self.memory_bytes.saturating_sub(slot.entry.size_bytes);
        Some(slot)
    }

    /// Pick the entry the active policy ranks lowest
    fn victim(&self) -> Option<CacheKey> {
        match self.policy {
            EvictionPolicy::Lru | EvictionPolicy::Adaptive => {
                self.recency.first_key_value().map(|(_, key)| key.clone())
            }
            EvictionPolicy::Lfu => self
                .data
                .iter()
                .min_by_key(|(_, slot)| (slot.entry.hit_count, slot.access_tick))
                .map(|(key, _)| key.clone()),
        }
    }

    fn purge_expired_at(&mut self, now: DateTime<Utc>) -> usize {
        let expired: Vec<CacheKey> = self
            .data
            .iter()
            .filter(|(_, slot)| slot.entry.is_expired_at(now))
            .map(|(key, _)| key.clone())
            .collect();

        for key in &expired {
            self.remove_slot(key);
        }
        expired.len()
    }

    fn evict_one(&mut self) -> Option<CacheKey> {
        let key = self.victim()?;
        self.remove_slot(&key);
        Some(key)
    }
}

impl EntryStore {
    /// Create an empty store holding at most `capacity` entries
    pub fn new(capacity: usize, policy: EvictionPolicy, stats: Arc<StatsAggregator>) -> Result<Self> {
        if capacity == 0 {
            return Err(CacheError::InvalidConfig(
                "entry store capacity must be greater than 0".to_string(),
            ));
        }

        Ok(Self {
            inner: Arc::new(Mutex::new(StoreInner {
                data: HashMap::with_capacity(capacity.min(16_384)),
                recency: BTreeMap::new(),
                next_tick: 0,
                capacity,
                policy,
                memory_bytes: 0,
            })),
            stats,
        })
    }

    /// Look up a live entry
    ///
    /// Expired entries are purged on access and reported as absent.
    pub fn get(&self, key: &CacheKey) -> Option<CacheEntry> {
        let mut inner = self.inner.lock();
        let now = Utc::now();

        let expired = match inner.data.get(key) {
            Some(slot) => slot.entry.is_expired_at(now),
            None => {
                debug!("L1 MISS key={}", key);
                return None;
            }
        };

        if expired {
            inner.remove_slot(key);
            self.stats.record_eviction();
            self.sync_gauges(&inner);
            debug!("L1 EXPIRED key={}", key);
            return None;
        }

        let access_tick = inner.tick();
        let refresh = inner.policy.refreshes_recency();
        let slot = inner.data.get_mut(key)?;
        slot.entry.last_accessed_date = now;
        slot.entry.hit_count += 1;
        slot.access_tick = access_tick;
        let entry = slot.entry.clone();

        if refresh {
            let old_tick = std::mem::replace(&mut slot.recency_tick, access_tick);
            inner.recency.remove(&old_tick);
            inner.recency.insert(access_tick, key.clone());
        }

        debug!("L1 HIT key={} hits={}", key, entry.hit_count);
        Some(entry)
    }

    /// Metadata of a live entry, without touching counters or ranking
    pub fn peek(&self, key: &CacheKey) -> Option<EntryMetadata> {
        let inner = self.inner.lock();
        inner
            .data
            .get(key)
            .filter(|slot| !slot.entry.is_expired())
            .map(|slot| slot.entry.metadata())
    }

    pub fn contains(&self, key: &CacheKey) -> bool {
        self.peek(key).is_some()
    }

    /// Insert or overwrite an entry
    ///
    /// A new key arriving at a full store evicts exactly one entry first,
    /// unless it is already expired, in which case it is not stored. An
    /// overwrite changes value, expiration and set count but not the entry's
    /// rank. Returns the evicted key, if any.
    pub fn set(
        &self,
        key: CacheKey,
        payload: Payload,
        expiration_date: DateTime<Utc>,
    ) -> Option<CacheKey> {
        let mut inner = self.inner.lock();
        let size = payload.size_bytes();

        // Overwrites keep their place in the eviction ranking
        if let Some(slot) = inner.data.get_mut(&key) {
            let old_size = slot.entry.size_bytes;
            slot.entry.payload = payload;
            slot.entry.size_bytes = size;
            slot.entry.expiration_date = expiration_date;
            slot.entry.set_hit_count += 1;

            inner.memory_bytes = inner.memory_bytes.saturating_sub(old_size) + size;
            self.sync_gauges(&inner);

            debug!("L1 OVERWRITE key={} ({} bytes)", key, size);
            return None;
        }

        // A dead entry never displaces a live one
        if inner.data.len() >= inner.capacity && expiration_date <= Utc::now() {
            debug!("L1 SKIP key={} already expired", key);
            return None;
        }

        let tick = inner.tick();
        let evicted = if inner.data.len() >= inner.capacity {
            let evicted = inner.evict_one();
            if let Some(victim) = &evicted {
                self.stats.record_eviction();
                debug!("L1 EVICT key={} policy={}", victim, inner.policy);
            }
            evicted
        } else {
            None
        };

        inner.recency.insert(tick, key.clone());
        inner.memory_bytes += size;
        inner.data.insert(
            key.clone(),
            Slot {
                entry: CacheEntry::new(key.clone(), payload, expiration_date),
                recency_tick: tick,
                access_tick: tick,
            },
        );
        self.sync_gauges(&inner);

        debug!("L1 PUT key={} ({} bytes)", key, size);
        evicted
    }

    /// Delete an entry; absent keys are ignored
    pub fn remove(&self, key: &CacheKey) -> bool {
        let mut inner = self.inner.lock();
        let removed = inner.remove_slot(key).is_some();
        if removed {
            self.sync_gauges(&inner);
            debug!("L1 DELETE key={}", key);
        }
        removed
    }

    /// Drop every entry and reset local accounting
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        let count = inner.data.len();
        inner.data.clear();
        inner.recency.clear();
        inner.memory_bytes = 0;
        inner.next_tick = 0;
        self.sync_gauges(&inner);

        debug!("L1 CLEAR ({} entries)", count);
    }

    /// Change the maximum entry count, evicting the excess immediately
    ///
    /// Returns how many entries were evicted.
    pub fn resize(&self, new_capacity: usize) -> Result<usize> {
        if new_capacity == 0 {
            return Err(CacheError::InvalidConfig(
                "entry store capacity must be greater than 0".to_string(),
            ));
        }

        let mut inner = self.inner.lock();
        inner.capacity = new_capacity;

        let mut evicted = 0;
        while inner.data.len() > inner.capacity {
            if inner.evict_one().is_none() {
                break;
            }
            evicted += 1;
        }

        self.stats.record_evictions(evicted as u64);
        self.sync_gauges(&inner);

        debug!("L1 RESIZE capacity={} evicted={}", new_capacity, evicted);
        Ok(evicted)
    }

    /// Swap the eviction policy; applies to subsequent evictions
    pub fn set_policy(&self, policy: EvictionPolicy) {
        let mut inner = self.inner.lock();
        if inner.policy != policy {
            debug!("L1 POLICY {} -> {}", inner.policy, policy);
            inner.policy = policy;
        }
    }

    /// Maintenance sweep: drop every expired entry
    pub fn purge_expired(&self) -> usize {
        let mut inner = self.inner.lock();

        let count = inner.purge_expired_at(Utc::now());
        if count > 0 {
            self.stats.record_evictions(count as u64);
            self.sync_gauges(&inner);
            debug!("L1 SWEEP removed {} expired entries", count);
        }
        count
    }

    pub fn len(&self) -> usize {
        self.inner.lock().data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().data.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.inner.lock().capacity
    }

    pub fn policy(&self) -> EvictionPolicy {
        self.inner.lock().policy
    }

    pub fn memory_bytes(&self) -> usize {
        self.inner.lock().memory_bytes
    }

    pub fn keys(&self) -> Vec<CacheKey> {
        self.inner.lock().data.keys().cloned().collect()
    }

    pub fn stats(&self) -> &Arc<StatsAggregator> {
        &self.stats
    }

    fn sync_gauges(&self, inner: &StoreInner) {
        self.stats.set_gauges(inner.data.len(), inner.memory_bytes);
    }
}
