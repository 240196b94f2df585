//! Statistics Aggregator
//!
//! Lock-free hit/miss/eviction bookkeeping shared by the coordinator, the
//! entry store and the tuner. Counters are plain atomics; a snapshot reads
//! each one once, so readers never observe a half-written counter.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Point-in-time view of the cache statistics
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CacheStatistics {
    pub hit_count: u64,
    pub miss_count: u64,
    pub eviction_count: u64,
    /// Sum of recorded access latencies, in nanoseconds
    pub total_access_time_ns: u64,
    pub access_count: u64,
    pub current_entry_count: u64,
    pub current_memory_estimate: u64,
}

impl CacheStatistics {
    /// hits / (hits + misses), 0.0 when nothing was recorded
    pub fn hit_rate(&self) -> f64 {
        let total = self.hit_count + self.miss_count;
        if total == 0 {
            0.0
        } else {
            self.hit_count as f64 / total as f64
        }
    }

    pub fn average_access_time(&self) -> Duration {
        if self.access_count == 0 {
            Duration::ZERO
        } else {
            Duration::from_nanos(self.total_access_time_ns / self.access_count)
        }
    }

    pub fn average_access_ms(&self) -> f64 {
        self.average_access_time().as_secs_f64() * 1000.0
    }
}

/// Shared statistics accumulator
#[derive(Debug, Default)]
pub struct StatsAggregator {
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    access_time_ns: AtomicU64,
    entries: AtomicU64,
    memory_bytes: AtomicU64,
}

impl StatsAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_hit(&self, latency: Duration) {
        self.hits.fetch_add(1, Ordering::Relaxed);
        self.add_latency(latency);
    }

    pub fn record_miss(&self, latency: Duration) {
        self.misses.fetch_add(1, Ordering::Relaxed);
        self.add_latency(latency);
    }

    pub fn record_eviction(&self) {
        self.record_evictions(1);
    }

    pub fn record_evictions(&self, count: u64) {
        if count > 0 {
            self.evictions.fetch_add(count, Ordering::Relaxed);
        }
    }

    /// Mirror the entry store's size gauges
    pub fn set_gauges(&self, entries: usize, memory_bytes: usize) {
        self.entries.store(entries as u64, Ordering::Relaxed);
        self.memory_bytes.store(memory_bytes as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> CacheStatistics {
        let hit_count = self.hits.load(Ordering::Relaxed);
        let miss_count = self.misses.load(Ordering::Relaxed);

        CacheStatistics {
            hit_count,
            miss_count,
            eviction_count: self.evictions.load(Ordering::Relaxed),
            total_access_time_ns: self.access_time_ns.load(Ordering::Relaxed),
            access_count: hit_count + miss_count,
            current_entry_count: self.entries.load(Ordering::Relaxed),
            current_memory_estimate: self.memory_bytes.load(Ordering::Relaxed),
        }
    }

    /// Zero the accumulated counters; size gauges track the live store and
    /// are left alone
    pub fn reset(&self) {
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
        self.evictions.store(0, Ordering::Relaxed);
        self.access_time_ns.store(0, Ordering::Relaxed);
    }

    fn add_latency(&self, latency: Duration) {
        let nanos = u64::try_from(latency.as_nanos()).unwrap_or(u64::MAX);
        self.access_time_ns.fetch_add(nanos, Ordering::Relaxed);
    }
}
