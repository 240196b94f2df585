//! Storage Backend
//!
//! The durable/remote tier is a collaborator behind [`StorageBackend`]. The
//! coordinator treats it as the source of truth: it only ever stores
//! post-codec [`Payload`]s and relies on the backend to report "not found"
//! as `Ok(None)` and transport problems as `Err`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::Arc;

use crate::core::error::Result;
use crate::core::types::{CacheKey, Payload};

pub mod memory;

pub use memory::{BackendOpCounts, MemoryBackend};

/// Value as held by the durable tier
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendRecord {
    pub payload: Payload,
    pub expiration_date: DateTime<Utc>,
}

impl BackendRecord {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expiration_date
    }
}

/// Callback a backend invokes for every value pushed on a subscribed key
pub type PushHandler = Arc<dyn Fn(Payload) + Send + Sync>;

/// Live push-update registration; dropping it releases the subscription
pub struct BackendSubscription {
    release: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl BackendSubscription {
    pub fn new(release: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            release: Some(Box::new(release)),
        }
    }

    /// Subscription for backends without a push channel
    pub fn detached() -> Self {
        Self { release: None }
    }

    pub fn cancel(self) {
        drop(self);
    }
}

impl Drop for BackendSubscription {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl fmt::Debug for BackendSubscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendSubscription")
            .field("active", &self.release.is_some())
            .finish()
    }
}

/// Durable tier consumed by the coordinator
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Fetch a value; `Ok(None)` when the key is unknown
    async fn get(&self, key: &CacheKey) -> Result<Option<BackendRecord>>;

    /// Store a value until `expiration_date`
    async fn set(&self, key: &CacheKey, payload: &Payload, expiration_date: DateTime<Utc>)
    -> Result<()>;

    /// Delete a value; deleting an unknown key is not an error
    async fn remove(&self, key: &CacheKey) -> Result<()>;

    /// Delete everything
    async fn clear(&self) -> Result<()>;

    /// Register for values pushed on `key` by other writers
    fn subscribe_to_updates(&self, key: &CacheKey, handler: PushHandler)
    -> Result<BackendSubscription>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[test]
    fn test_subscription_released_once_on_drop() {
        let released = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&released);
        let subscription = BackendSubscription::new(move || {
            assert!(!flag.swap(true, Ordering::SeqCst));
        });

        assert!(!released.load(Ordering::SeqCst));
        subscription.cancel();
        assert!(released.load(Ordering::SeqCst));
    }

    #[test]
    fn test_detached_subscription() {
        let subscription = BackendSubscription::detached();
        assert_eq!(
            format!("{:?}", subscription),
            "BackendSubscription { active: false }"
        );
    }
}
