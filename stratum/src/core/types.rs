use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::compression::CompressionAlgorithm;

/// Cache key: an identifier inside a named store
///
/// At most one live entry exists per key in each tier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CacheKey {
    pub identifier: String,
    pub store_name: String,
}

impl CacheKey {
    pub fn new(identifier: impl Into<String>, store_name: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            store_name: store_name.into(),
        }
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.store_name, self.identifier)
    }
}

/// Application value, tagged with its kind so heterogeneous payloads survive
/// the compression/encryption round trip
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "lowercase")]
pub enum CacheValue {
    String(String),
    List(Vec<String>),
    Hash(BTreeMap<String, String>),
    Json(serde_json::Value),
    Binary(Vec<u8>),
}

impl CacheValue {
    /// Kind tag as stored on the wire
    pub fn kind(&self) -> &'static str {
        match self {
            Self::String(_) => "string",
            Self::List(_) => "list",
            Self::Hash(_) => "hash",
            Self::Json(_) => "json",
            Self::Binary(_) => "binary",
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }
}

impl From<&str> for CacheValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for CacheValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<Vec<u8>> for CacheValue {
    fn from(value: Vec<u8>) -> Self {
        Self::Binary(value)
    }
}

impl From<serde_json::Value> for CacheValue {
    fn from(value: serde_json::Value) -> Self {
        Self::Json(value)
    }
}

/// Encryption parameters carried next to a sealed payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    pub iv: Vec<u8>,
    pub salt: Vec<u8>,
    pub auth_tag: Vec<u8>,
}

/// Post-codec value as held by both tiers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payload {
    /// Serialized value, possibly compressed, possibly ciphertext
    pub data: Vec<u8>,
    /// Algorithm `data` was compressed with (`None` when stored uncompressed)
    pub compression: CompressionAlgorithm,
    /// Present when `data` is ciphertext
    pub envelope: Option<Envelope>,
}

impl Payload {
    pub fn plain(data: Vec<u8>) -> Self {
        Self {
            data,
            compression: CompressionAlgorithm::None,
            envelope: None,
        }
    }

    pub fn is_compressed(&self) -> bool {
        self.compression != CompressionAlgorithm::None
    }

    pub fn is_encrypted(&self) -> bool {
        self.envelope.is_some()
    }

    pub fn size_bytes(&self) -> usize {
        self.data.len()
    }
}

/// Eviction policy for the in-memory tier
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum EvictionPolicy {
    /// Least Recently Used
    Lru,
    /// Least Frequently Used, ties broken by oldest access
    Lfu,
    /// LRU ranking, capacity and policy driven by the tuner
    #[default]
    Adaptive,
}

impl EvictionPolicy {
    /// Whether a read moves the entry to the most-recently-used position
    pub fn refreshes_recency(self) -> bool {
        !matches!(self, Self::Lfu)
    }
}

impl fmt::Display for EvictionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Lru => "lru",
            Self::Lfu => "lfu",
            Self::Adaptive => "adaptive",
        };
        f.write_str(name)
    }
}

/// Entry held by the in-memory tier
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub key: CacheKey,
    pub payload: Payload,
    /// Expired once `now >= expiration_date`
    pub expiration_date: DateTime<Utc>,
    pub last_accessed_date: DateTime<Utc>,
    /// Successful reads
    pub hit_count: u64,
    /// Writes, including the one that created the entry
    pub set_hit_count: u64,
    pub size_bytes: usize,
}

impl CacheEntry {
    pub fn new(key: CacheKey, payload: Payload, expiration_date: DateTime<Utc>) -> Self {
        let size_bytes = payload.size_bytes();
        Self {
            key,
            payload,
            expiration_date,
            last_accessed_date: Utc::now(),
            hit_count: 0,
            set_hit_count: 1,
            size_bytes,
        }
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expiration_date
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    pub fn compressed(&self) -> bool {
        self.payload.is_compressed()
    }

    pub fn metadata(&self) -> EntryMetadata {
        EntryMetadata {
            expiration_date: self.expiration_date,
            last_accessed_date: self.last_accessed_date,
            hit_count: self.hit_count,
            set_hit_count: self.set_hit_count,
            compressed: self.compressed(),
            size_bytes: self.size_bytes,
        }
    }
}

/// Entry metadata returned with every lookup; zeroed for absent results
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntryMetadata {
    pub expiration_date: DateTime<Utc>,
    pub last_accessed_date: DateTime<Utc>,
    pub hit_count: u64,
    pub set_hit_count: u64,
    pub compressed: bool,
    pub size_bytes: usize,
}

impl Default for EntryMetadata {
    fn default() -> Self {
        Self {
            expiration_date: DateTime::<Utc>::UNIX_EPOCH,
            last_accessed_date: DateTime::<Utc>::UNIX_EPOCH,
            hit_count: 0,
            set_hit_count: 0,
            compressed: false,
            size_bytes: 0,
        }
    }
}

/// Tier a result was served from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Local,
    Remote,
}

/// Outcome of a coordinator read
#[derive(Debug, Clone, PartialEq)]
pub struct CacheResult {
    pub key: CacheKey,
    pub value: Option<CacheValue>,
    pub metadata: EntryMetadata,
    pub source: Option<Tier>,
}

impl CacheResult {
    pub fn found(key: CacheKey, value: CacheValue, metadata: EntryMetadata, source: Tier) -> Self {
        Self {
            key,
            value: Some(value),
            metadata,
            source: Some(source),
        }
    }

    /// Explicit absent result with zeroed metadata
    pub fn absent(key: CacheKey) -> Self {
        Self {
            key,
            value: None,
            metadata: EntryMetadata::default(),
            source: None,
        }
    }

    pub fn is_hit(&self) -> bool {
        self.value.is_some()
    }

    pub fn into_value(self) -> Option<CacheValue> {
        self.value
    }
}
