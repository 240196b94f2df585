//! Adaptive Tuner
//!
//! Periodic control loop over the entry store. Capacity follows the hit rate,
//! bounded by the configured ceiling and half of the base size. The policy
//! follows access latency and churn. Each cycle measures a fresh window: the
//! statistics are reset once the decisions are applied.

use serde::Serialize;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::TunerConfig;
use crate::core::{CacheStatistics, EntryStore, EvictionPolicy, Result, StatsAggregator};

/// Decisions taken by one tuning cycle
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TuningReport {
    pub previous_capacity: usize,
    pub new_capacity: usize,
    pub previous_policy: EvictionPolicy,
    pub new_policy: EvictionPolicy,
    pub hit_rate: f64,
    pub average_access_ms: f64,
    pub evictions: u64,
}

impl TuningReport {
    pub fn changed(&self) -> bool {
        self.previous_capacity != self.new_capacity || self.previous_policy != self.new_policy
    }
}

pub struct AdaptiveTuner {
    store: EntryStore,
    stats: Arc<StatsAggregator>,
    config: TunerConfig,
}

impl AdaptiveTuner {
    pub fn new(store: EntryStore, config: TunerConfig) -> Self {
        let stats = Arc::clone(store.stats());
        Self {
            store,
            stats,
            config,
        }
    }

    pub fn config(&self) -> &TunerConfig {
        &self.config
    }

    /// Run one cycle against the current window
    ///
    /// Returns `None` for an idle window (no reads, no evictions); the
    /// statistics are left untouched in that case.
    pub fn run_cycle(&self) -> Result<Option<TuningReport>> {
        let snapshot = self.stats.snapshot();
        if snapshot.access_count == 0 && snapshot.eviction_count == 0 {
            debug!("Tuner window idle, skipping");
            return Ok(None);
        }

        let previous_capacity = self.store.capacity();
        let previous_policy = self.store.policy();

        let new_capacity = self.next_capacity(&snapshot, previous_capacity);
        let new_policy = self.next_policy(&snapshot);

        if new_capacity != previous_capacity {
            let evicted = self.store.resize(new_capacity)?;
            info!(
                "Tuner resized store: {} -> {} (hit_rate={:.2}, evicted={})",
                previous_capacity,
                new_capacity,
                snapshot.hit_rate(),
                evicted
            );
        }

        if new_policy != previous_policy {
            self.store.set_policy(new_policy);
            info!(
                "Tuner switched policy: {} -> {} (avg_access={:.3}ms, evictions={}, entries={})",
                previous_policy,
                new_policy,
                snapshot.average_access_ms(),
                snapshot.eviction_count,
                snapshot.current_entry_count
            );
        }

        // Start a fresh window; evictions from the resize above are discarded with it
        self.stats.reset();

        Ok(Some(TuningReport {
            previous_capacity,
            new_capacity,
            previous_policy,
            new_policy,
            hit_rate: snapshot.hit_rate(),
            average_access_ms: snapshot.average_access_ms(),
            evictions: snapshot.eviction_count,
        }))
    }

    fn next_capacity(&self, snapshot: &CacheStatistics, capacity: usize) -> usize {
        // Evictions alone say nothing about the hit rate
        if snapshot.access_count == 0 {
            return capacity;
        }

        let hit_rate = snapshot.hit_rate();
        let step = ((capacity as f64 * self.config.growth_factor).round() as usize).max(1);

        if hit_rate < self.config.low_hit_rate && capacity < self.config.max_capacity {
            (capacity + step).min(self.config.max_capacity)
        } else if hit_rate > self.config.high_hit_rate {
            let floor = (self.config.base_capacity / 2).max(1);
            if capacity > floor {
                capacity.saturating_sub(step).max(floor)
            } else {
                capacity
            }
        } else {
            capacity
        }
    }

    fn next_policy(&self, snapshot: &CacheStatistics) -> EvictionPolicy {
        let churn_limit = snapshot.current_entry_count as f64 * self.config.eviction_ratio;

        if snapshot.average_access_ms() > self.config.slow_access_ms {
            EvictionPolicy::Lfu
        } else if snapshot.eviction_count as f64 > churn_limit {
            EvictionPolicy::Lru
        } else {
            EvictionPolicy::Adaptive
        }
    }

    /// Spawn the periodic loop on the current runtime
    ///
    /// The loop holds a weak reference and ends once the tuner is dropped.
    /// A failed cycle is logged and the loop keeps going.
    pub fn start(self: &Arc<Self>) -> JoinHandle<()> {
        let interval = Duration::from_millis(self.config.interval_ms);
        info!("Starting adaptive tuner (interval={:?})", interval);

        let tuner: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // First tick completes immediately
            ticker.tick().await;

            loop {
                ticker.tick().await;

                let Some(tuner) = tuner.upgrade() else {
                    debug!("Tuner owner dropped, stopping loop");
                    break;
                };

                match tuner.run_cycle() {
                    Ok(Some(report)) if report.changed() => debug!("Tuning cycle: {:?}", report),
                    Ok(_) => {}
                    Err(e) => warn!("Tuning cycle failed: {}", e),
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{CacheKey, Payload};
    use chrono::{Duration as ChronoDuration, Utc};

    fn tuner(capacity: usize, base: usize, max: usize) -> AdaptiveTuner {
        let stats = Arc::new(StatsAggregator::new());
        let store = EntryStore::new(capacity, EvictionPolicy::Adaptive, stats).unwrap();
        AdaptiveTuner::new(
            store,
            TunerConfig {
                base_capacity: base,
                max_capacity: max,
                ..Default::default()
            },
        )
    }

    fn record(tuner: &AdaptiveTuner, hits: u64, misses: u64, latency: Duration) {
        for _ in 0..hits {
            tuner.stats.record_hit(latency);
        }
        for _ in 0..misses {
            tuner.stats.record_miss(latency);
        }
    }

    fn fill(tuner: &AdaptiveTuner, count: usize) {
        let expires = Utc::now() + ChronoDuration::hours(1);
        for i in 0..count {
            tuner.store.set(
                CacheKey::new(format!("k{}", i), "tuner"),
                Payload::plain(vec![0; 8]),
                expires,
            );
        }
    }

    #[test]
    fn test_high_hit_rate_shrinks_and_slow_access_selects_lfu() {
        let tuner = tuner(100, 100, 1000);
        record(&tuner, 95, 5, Duration::from_millis(15));

        let report = tuner.run_cycle().unwrap().unwrap();
        assert_eq!(report.new_capacity, 90);
        assert_eq!(report.new_policy, EvictionPolicy::Lfu);
        assert!((report.hit_rate - 0.95).abs() < f64::EPSILON);
        assert_eq!(tuner.store.capacity(), 90);
        assert_eq!(tuner.store.policy(), EvictionPolicy::Lfu);
    }

    #[test]
    fn test_low_hit_rate_grows_up_to_ceiling() {
        let tuner = tuner(100, 100, 105);
        record(&tuner, 1, 9, Duration::from_micros(10));

        let report = tuner.run_cycle().unwrap().unwrap();
        assert_eq!(report.new_capacity, 105);
        assert_eq!(report.new_policy, EvictionPolicy::Adaptive);

        // Already at the ceiling
        record(&tuner, 1, 9, Duration::from_micros(10));
        let report = tuner.run_cycle().unwrap().unwrap();
        assert_eq!(report.new_capacity, 105);
    }

    #[test]
    fn test_small_capacity_still_grows() {
        let tuner = tuner(3, 3, 100);
        record(&tuner, 0, 4, Duration::ZERO);

        let report = tuner.run_cycle().unwrap().unwrap();
        assert_eq!(report.new_capacity, 4);
    }

    #[test]
    fn test_shrink_floors_at_half_base() {
        let tuner = tuner(52, 100, 1000);
        record(&tuner, 99, 1, Duration::ZERO);
        assert_eq!(tuner.run_cycle().unwrap().unwrap().new_capacity, 50);

        record(&tuner, 99, 1, Duration::ZERO);
        assert_eq!(tuner.run_cycle().unwrap().unwrap().new_capacity, 50);
    }

    #[test]
    fn test_middle_hit_rate_keeps_capacity() {
        let tuner = tuner(100, 100, 1000);
        record(&tuner, 8, 2, Duration::ZERO);

        let report = tuner.run_cycle().unwrap().unwrap();
        assert_eq!(report.new_capacity, 100);
        assert!(!report.changed());
    }

    #[test]
    fn test_churn_selects_lru() {
        let tuner = tuner(10, 10, 100);
        fill(&tuner, 15);
        record(&tuner, 8, 2, Duration::ZERO);

        let report = tuner.run_cycle().unwrap().unwrap();
        assert_eq!(report.evictions, 5);
        assert_eq!(report.new_policy, EvictionPolicy::Lru);
    }

    #[test]
    fn test_idle_window_is_skipped() {
        let tuner = tuner(100, 100, 1000);
        assert!(tuner.run_cycle().unwrap().is_none());
        assert_eq!(tuner.store.capacity(), 100);
    }

    #[test]
    fn test_cycle_resets_statistics() {
        let tuner = tuner(100, 100, 1000);
        fill(&tuner, 3);
        record(&tuner, 5, 5, Duration::from_millis(1));

        tuner.run_cycle().unwrap();
        let stats = tuner.stats.snapshot();
        assert_eq!(stats.hit_count, 0);
        assert_eq!(stats.miss_count, 0);
        assert_eq!(stats.eviction_count, 0);
        assert_eq!(stats.current_entry_count, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_loop_stops_when_tuner_dropped() {
        let tuner = Arc::new(tuner(100, 100, 1000));
        let handle = tuner.start();

        drop(tuner);
        tokio::time::advance(Duration::from_secs(61)).await;
        tokio::time::timeout(Duration::from_secs(120), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
