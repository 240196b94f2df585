use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::compression::CompressionConfig;
use crate::core::{CacheError, EvictionPolicy, Result};
use crate::crypto::{EncryptionConfig, KeyDerivation};

/// Main cache configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub store: StoreConfig,
    pub tuner: TunerConfig,
    pub backend: BackendConfig,
    pub subscriptions: SubscriptionConfig,
    pub compression: CompressionConfig,
    pub encryption: EncryptionConfig,
    pub logging: LoggingConfig,
}

/// In-memory tier
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Initial maximum entry count
    pub capacity: usize,
    pub default_policy: EvictionPolicy,
    pub default_ttl_secs: u64,
    /// Expired-entry sweep interval; 0 disables the sweeper
    pub sweep_interval_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            capacity: 1000,
            default_policy: EvictionPolicy::Adaptive,
            default_ttl_secs: 3600,
            sweep_interval_ms: 1000,
        }
    }
}

/// Adaptive tuner
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TunerConfig {
    pub enabled: bool,
    pub interval_ms: u64,
    /// Reference size; the tuner never shrinks below half of it
    pub base_capacity: usize,
    /// Memory ceiling, expressed in entries
    pub max_capacity: usize,
    pub low_hit_rate: f64,
    pub high_hit_rate: f64,
    /// Fraction of the capacity added or removed per cycle
    pub growth_factor: f64,
    /// Average access time above which LFU is selected
    pub slow_access_ms: f64,
    /// Evictions / entries ratio above which LRU is selected
    pub eviction_ratio: f64,
}

impl Default for TunerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_ms: 60_000,
            base_capacity: 1000,
            max_capacity: 10_000,
            low_hit_rate: 0.7,
            high_hit_rate: 0.9,
            growth_factor: 0.10,
            slow_access_ms: 10.0,
            eviction_ratio: 0.10,
        }
    }
}

/// Durable tier access
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    pub timeout_ms: u64,
    /// Resolve `set` only after the backend write completes
    pub await_writes: bool,
    /// Additional attempts for a failed backend write
    pub write_retries: u32,
    pub retry_backoff_ms: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 5000,
            await_writes: true,
            write_retries: 0,
            retry_backoff_ms: 100,
        }
    }
}

/// Push-update subscriptions
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SubscriptionConfig {
    /// Freshness window applied to pushed values
    pub freshness_secs: u64,
    /// Listener runtime above which a warning is logged
    pub slow_listener_ms: u64,
}

impl Default for SubscriptionConfig {
    fn default() -> Self {
        Self {
            freshness_secs: 24 * 60 * 60,
            slow_listener_ms: 100,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "json".to_string(),
        }
    }
}

impl CacheConfig {
    /// Load and validate configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: CacheConfig = serde_yaml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings that would leave the cache unusable
    pub fn validate(&self) -> Result<()> {
        fn invalid(msg: impl Into<String>) -> Result<()> {
            Err(CacheError::InvalidConfig(msg.into()))
        }

        if self.store.capacity == 0 {
            return invalid("store.capacity must be greater than 0");
        }

        let tuner = &self.tuner;
        if tuner.base_capacity == 0 || tuner.max_capacity == 0 {
            return invalid("tuner.base_capacity and tuner.max_capacity must be greater than 0");
        }
        if tuner.max_capacity < tuner.base_capacity {
            return invalid("tuner.max_capacity must be >= tuner.base_capacity");
        }
        for (name, value) in [
            ("tuner.low_hit_rate", tuner.low_hit_rate),
            ("tuner.high_hit_rate", tuner.high_hit_rate),
            ("tuner.eviction_ratio", tuner.eviction_ratio),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return invalid(format!("{} must be within [0, 1], got {}", name, value));
            }
        }
        if tuner.low_hit_rate >= tuner.high_hit_rate {
            return invalid("tuner.low_hit_rate must be below tuner.high_hit_rate");
        }
        if !(tuner.growth_factor > 0.0 && tuner.growth_factor < 1.0) {
            return invalid("tuner.growth_factor must be within (0, 1)");
        }
        if tuner.slow_access_ms.is_nan() || tuner.slow_access_ms < 0.0 {
            return invalid("tuner.slow_access_ms must not be negative");
        }
        if tuner.enabled && tuner.interval_ms == 0 {
            return invalid("tuner.interval_ms must be greater than 0");
        }

        if self.backend.timeout_ms == 0 {
            return invalid("backend.timeout_ms must be greater than 0");
        }

        if !(1..=22).contains(&self.compression.zstd_level) {
            return invalid("compression.zstd_level must be within 1..=22");
        }

        let encryption = &self.encryption;
        if encryption.enabled {
            if encryption.passphrase.is_empty() {
                return invalid("encryption.passphrase is required when encryption is enabled");
            }
            if encryption.key_derivation == KeyDerivation::Pbkdf2 && encryption.pbkdf2_iterations == 0 {
                return invalid("encryption.pbkdf2_iterations must be greater than 0");
            }
        }

        Ok(())
    }

    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.store.default_ttl_secs)
    }

    pub fn backend_timeout(&self) -> Duration {
        Duration::from_millis(self.backend.timeout_ms)
    }

    pub fn tuner_interval(&self) -> Duration {
        Duration::from_millis(self.tuner.interval_ms)
    }

    pub fn freshness_window(&self) -> Duration {
        Duration::from_secs(self.subscriptions.freshness_secs)
    }
}
