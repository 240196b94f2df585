//! Prometheus Metrics for Stratum
//!
//! Each cache instance owns its registry, so several caches in one process
//! never collide on metric names.

use prometheus::{Encoder, Gauge, IntGauge, Registry, TextEncoder};

use crate::core::{CacheError, CacheStatistics, Result};

pub struct CacheMetrics {
    registry: Registry,
    hits: IntGauge,
    misses: IntGauge,
    evictions: IntGauge,
    entries: IntGauge,
    memory_bytes: IntGauge,
    capacity: IntGauge,
    hit_rate: Gauge,
    average_access_seconds: Gauge,
}

fn metric_error(err: prometheus::Error) -> CacheError {
    CacheError::Internal(format!("metrics: {}", err))
}

impl CacheMetrics {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let int_gauge = |name: &str, help: &str| -> Result<IntGauge> {
            let gauge = IntGauge::new(name, help).map_err(metric_error)?;
            registry
                .register(Box::new(gauge.clone()))
                .map_err(metric_error)?;
            Ok(gauge)
        };

        let hits = int_gauge("stratum_cache_hits", "Hits in the current tuning window")?;
        let misses = int_gauge("stratum_cache_misses", "Misses in the current tuning window")?;
        let evictions = int_gauge(
            "stratum_cache_evictions",
            "Evictions in the current tuning window",
        )?;
        let entries = int_gauge("stratum_cache_entries", "Live entries in the entry store")?;
        let memory_bytes = int_gauge(
            "stratum_cache_memory_bytes",
            "Estimated payload bytes held by the entry store",
        )?;
        let capacity = int_gauge("stratum_cache_capacity", "Current entry store capacity")?;

        let hit_rate = Gauge::new("stratum_cache_hit_rate", "hits / (hits + misses)")
            .map_err(metric_error)?;
        registry
            .register(Box::new(hit_rate.clone()))
            .map_err(metric_error)?;

        let average_access_seconds = Gauge::new(
            "stratum_cache_average_access_seconds",
            "Average get latency in the current tuning window",
        )
        .map_err(metric_error)?;
        registry
            .register(Box::new(average_access_seconds.clone()))
            .map_err(metric_error)?;

        Ok(Self {
            registry,
            hits,
            misses,
            evictions,
            entries,
            memory_bytes,
            capacity,
            hit_rate,
            average_access_seconds,
        })
    }

    /// Copy a statistics snapshot into the gauges
    pub fn observe(&self, stats: &CacheStatistics, capacity: usize) {
        self.hits.set(saturating_i64(stats.hit_count));
        self.misses.set(saturating_i64(stats.miss_count));
        self.evictions.set(saturating_i64(stats.eviction_count));
        self.entries.set(saturating_i64(stats.current_entry_count));
        self.memory_bytes
            .set(saturating_i64(stats.current_memory_estimate));
        self.capacity.set(saturating_i64(capacity as u64));
        self.hit_rate.set(stats.hit_rate());
        self.average_access_seconds
            .set(stats.average_access_time().as_secs_f64());
    }

    /// Text exposition format
    pub fn render(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder
            .encode(&metric_families, &mut buffer)
            .map_err(metric_error)?;
        String::from_utf8(buffer).map_err(|e| CacheError::Internal(e.to_string()))
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}

fn saturating_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}
