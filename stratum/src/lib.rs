pub mod backend;
pub mod cache;
pub mod codec;
pub mod compression;
pub mod config;
pub mod core;
pub mod crypto;
pub mod metrics;

// Re-export commonly used types
pub use backend::{BackendRecord, BackendSubscription, MemoryBackend, PushHandler, StorageBackend};
pub use cache::{AdaptiveTuner, TieredCache, TuningReport, UpdateListener, UpdateSubscription};
pub use codec::ValueCodec;
pub use compression::{CompressionAlgorithm, CompressionConfig, Compressor};
pub use config::CacheConfig;
pub use core::{
    CacheEntry, CacheError, CacheKey, CacheResult, CacheStatistics, CacheValue, EntryMetadata,
    EntryStore, ErrorKind, EvictionPolicy, Payload, Result, StatsAggregator, Tier,
};
pub use crypto::{EncryptionAlgorithm, EncryptionConfig, Encryptor, KeyDerivation};
pub use metrics::CacheMetrics;
