pub mod entry_store;
pub mod error;
pub mod stats;
pub mod types;

pub use entry_store::EntryStore;
pub use error::{CacheError, ErrorKind, Result};
pub use stats::{CacheStatistics, StatsAggregator};
pub use types::{
    CacheEntry, CacheKey, CacheResult, CacheValue, EntryMetadata, Envelope, EvictionPolicy,
    Payload, Tier,
};
