//! Per-key listener registry
//!
//! One backend subscription per key is shared by every local listener on that
//! key. Listeners run in registration order; a failing or panicking listener
//! is logged and skipped without affecting the others.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::backend::BackendSubscription;
use crate::core::{CacheError, CacheKey, CacheValue};

/// Callback invoked with every value pushed for a subscribed key
pub type UpdateListener = Arc<dyn Fn(&CacheKey, &CacheValue) -> anyhow::Result<()> + Send + Sync>;

pub(crate) type ListenerId = u64;

enum BackendLink {
    /// First subscriber is registering with the backend
    Pending,
    Active(BackendSubscription),
    /// Backend registration failed; the next subscriber retries it
    Detached,
}

struct KeySubscribers {
    listeners: Vec<(ListenerId, UpdateListener)>,
    backend: BackendLink,
}

/// Outcome of one fan-out
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub delivered: usize,
    pub failed: usize,
}

pub(crate) struct SubscriptionRegistry {
    keys: Mutex<HashMap<CacheKey, KeySubscribers>>,
    next_id: AtomicU64,
    slow_listener: Duration,
}

impl SubscriptionRegistry {
    pub(crate) fn new(slow_listener: Duration) -> Self {
        Self {
            keys: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            slow_listener,
        }
    }

    /// Register a listener; the flag tells the caller to open the backend
    /// subscription for this key
    pub(crate) fn add(&self, key: &CacheKey, listener: UpdateListener) -> (ListenerId, bool) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut keys = self.keys.lock();

        let subs = keys.entry(key.clone()).or_insert_with(|| KeySubscribers {
            listeners: Vec::new(),
            backend: BackendLink::Detached,
        });
        subs.listeners.push((id, listener));

        let needs_backend = matches!(subs.backend, BackendLink::Detached);
        if needs_backend {
            subs.backend = BackendLink::Pending;
        }

        debug!("Listener {} subscribed to {} ({} total)", id, key, subs.listeners.len());
        (id, needs_backend)
    }

    /// Store the backend handle opened for `key`
    pub(crate) fn attach_backend(&self, key: &CacheKey, subscription: BackendSubscription) {
        let unclaimed = {
            let mut keys = self.keys.lock();
            match keys.get_mut(key) {
                Some(subs) => {
                    subs.backend = BackendLink::Active(subscription);
                    None
                }
                None => Some(subscription),
            }
        };

        // Everyone unsubscribed while the backend call was running
        if let Some(subscription) = unclaimed {
            subscription.cancel();
        }
    }

    /// Undo `add` after the backend refused the subscription
    pub(crate) fn backend_failed(&self, key: &CacheKey, id: ListenerId) {
        let mut keys = self.keys.lock();
        if let Some(subs) = keys.get_mut(key) {
            subs.listeners.retain(|(listener_id, _)| *listener_id != id);
            if subs.listeners.is_empty() {
                keys.remove(key);
            } else {
                subs.backend = BackendLink::Detached;
            }
        }
    }

    /// Remove one listener; the backend subscription is released with the
    /// last listener on the key
    pub(crate) fn remove(&self, key: &CacheKey, id: ListenerId) -> bool {
        let released = {
            let mut keys = self.keys.lock();
            let Some(subs) = keys.get_mut(key) else {
                return false;
            };

            let before = subs.listeners.len();
            subs.listeners.retain(|(listener_id, _)| *listener_id != id);
            if subs.listeners.len() == before {
                return false;
            }

            if subs.listeners.is_empty() {
                keys.remove(key)
            } else {
                None
            }
        };

        // Release outside the lock; backends may call back in
        if let Some(KeySubscribers {
            backend: BackendLink::Active(subscription),
            ..
        }) = released
        {
            subscription.cancel();
            debug!("Released backend subscription for {}", key);
        }

        debug!("Listener {} unsubscribed from {}", id, key);
        true
    }

    /// Drop every listener and backend subscription
    pub(crate) fn release_all(&self) -> usize {
        let drained: Vec<KeySubscribers> = self.keys.lock().drain().map(|(_, subs)| subs).collect();
        let count = drained.len();
        drop(drained);
        count
    }

    pub(crate) fn listener_count(&self, key: &CacheKey) -> usize {
        self.keys.lock().get(key).map_or(0, |subs| subs.listeners.len())
    }

    /// Invoke every listener of `key` in registration order
    pub(crate) fn dispatch(&self, key: &CacheKey, value: &CacheValue) -> DispatchReport {
        let listeners: Vec<(ListenerId, UpdateListener)> = self
            .keys
            .lock()
            .get(key)
            .map(|subs| subs.listeners.clone())
            .unwrap_or_default();

        let mut report = DispatchReport::default();
        for (id, listener) in listeners {
            let started = Instant::now();
            let outcome = catch_unwind(AssertUnwindSafe(|| listener(key, value)));
            let elapsed = started.elapsed();

            let failure = match outcome {
                Ok(Ok(())) => None,
                Ok(Err(e)) => Some(CacheError::Listener(e.to_string())),
                Err(_) => Some(CacheError::Listener("listener panicked".to_string())),
            };

            match failure {
                None => report.delivered += 1,
                Some(err) => {
                    report.failed += 1;
                    warn!("Listener {} on {} failed: {}", id, key, err);
                }
            }

            if elapsed > self.slow_listener {
                warn!("Slow listener {} on {}: took {:?}", id, key, elapsed);
            }
        }

        report
    }
}

/// Handle for one listener registration
///
/// Dropping the handle keeps the listener registered; call
/// [`unsubscribe`](Self::unsubscribe) to remove it.
#[derive(Debug)]
pub struct UpdateSubscription {
    registry: Weak<SubscriptionRegistry>,
    key: CacheKey,
    id: ListenerId,
}

impl UpdateSubscription {
    pub(crate) fn new(registry: &Arc<SubscriptionRegistry>, key: CacheKey, id: ListenerId) -> Self {
        Self {
            registry: Arc::downgrade(registry),
            key,
            id,
        }
    }

    pub fn key(&self) -> &CacheKey {
        &self.key
    }

    /// Remove this listener only; returns false if it was already gone
    pub fn unsubscribe(self) -> bool {
        match self.registry.upgrade() {
            Some(registry) => registry.remove(&self.key, self.id),
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex as PlMutex;
    use std::sync::atomic::AtomicBool;

    fn key() -> CacheKey {
        CacheKey::new("feed", "news")
    }

    fn recorder(log: &Arc<PlMutex<Vec<&'static str>>>, name: &'static str) -> UpdateListener {
        let log = Arc::clone(log);
        Arc::new(move |_: &CacheKey, _: &CacheValue| -> anyhow::Result<()> {
            log.lock().push(name);
            Ok(())
        })
    }

    #[test]
    fn test_dispatch_in_registration_order() {
        let registry = SubscriptionRegistry::new(Duration::from_secs(1));
        let log = Arc::new(PlMutex::new(Vec::new()));

        let (_, first) = registry.add(&key(), recorder(&log, "first"));
        let (_, second) = registry.add(&key(), recorder(&log, "second"));
        assert!(first);
        assert!(!second);

        let report = registry.dispatch(&key(), &CacheValue::from("v"));
        assert_eq!(report, DispatchReport { delivered: 2, failed: 0 });
        assert_eq!(*log.lock(), vec!["first", "second"]);
    }

    #[test]
    fn test_failing_listeners_are_isolated() {
        let registry = SubscriptionRegistry::new(Duration::from_secs(1));
        let log = Arc::new(PlMutex::new(Vec::new()));

        registry.add(
            &key(),
            Arc::new(|_: &CacheKey, _: &CacheValue| -> anyhow::Result<()> {
                anyhow::bail!("listener error")
            }),
        );
        registry.add(
            &key(),
            Arc::new(|_: &CacheKey, _: &CacheValue| -> anyhow::Result<()> {
                panic!("listener panic")
            }),
        );
        registry.add(&key(), recorder(&log, "survivor"));

        let report = registry.dispatch(&key(), &CacheValue::from("v"));
        assert_eq!(report, DispatchReport { delivered: 1, failed: 2 });
        assert_eq!(*log.lock(), vec!["survivor"]);
    }

    #[test]
    fn test_last_unsubscribe_releases_backend() {
        let registry = Arc::new(SubscriptionRegistry::new(Duration::from_secs(1)));
        let released = Arc::new(AtomicBool::new(false));
        let log = Arc::new(PlMutex::new(Vec::new()));

        let (a, _) = registry.add(&key(), recorder(&log, "a"));
        let (b, _) = registry.add(&key(), recorder(&log, "b"));
        let flag = Arc::clone(&released);
        registry.attach_backend(
            &key(),
            BackendSubscription::new(move || flag.store(true, Ordering::SeqCst)),
        );

        assert!(UpdateSubscription::new(&registry, key(), a).unsubscribe());
        assert!(!released.load(Ordering::SeqCst));
        assert_eq!(registry.listener_count(&key()), 1);

        assert!(UpdateSubscription::new(&registry, key(), b).unsubscribe());
        assert!(released.load(Ordering::SeqCst));
        assert_eq!(registry.listener_count(&key()), 0);

        // Already gone
        assert!(!registry.remove(&key(), b));
    }

    #[test]
    fn test_backend_failure_allows_retry() {
        let registry = SubscriptionRegistry::new(Duration::from_secs(1));
        let log = Arc::new(PlMutex::new(Vec::new()));

        let (a, needs_backend) = registry.add(&key(), recorder(&log, "a"));
        assert!(needs_backend);
        let (_, needs_backend) = registry.add(&key(), recorder(&log, "b"));
        assert!(!needs_backend);

        registry.backend_failed(&key(), a);
        assert_eq!(registry.listener_count(&key()), 1);

        let (_, needs_backend) = registry.add(&key(), recorder(&log, "c"));
        assert!(needs_backend);
    }

    #[test]
    fn test_release_all() {
        let registry = SubscriptionRegistry::new(Duration::from_secs(1));
        let released = Arc::new(AtomicBool::new(false));
        let log = Arc::new(PlMutex::new(Vec::new()));

        registry.add(&key(), recorder(&log, "a"));
        let flag = Arc::clone(&released);
        registry.attach_backend(
            &key(),
            BackendSubscription::new(move || flag.store(true, Ordering::SeqCst)),
        );

        assert_eq!(registry.release_all(), 1);
        assert!(released.load(Ordering::SeqCst));
        assert_eq!(registry.listener_count(&key()), 0);
    }
}
