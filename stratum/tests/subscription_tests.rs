// Push-update subscription tests: fan-out order, listener isolation and
// backend subscription lifetime.

mod common;

use chrono::{Duration as ChronoDuration, Utc};
use common::{FaultyBackend, cache_over, quiet_config};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use stratum::{
    CacheConfig, CacheKey, CacheValue, MemoryBackend, Payload, TieredCache, Tier, ValueCodec,
};

const STORE: &str = "feeds";

fn encode(config: &CacheConfig, value: impl Into<CacheValue>) -> Payload {
    ValueCodec::new(config.compression.clone(), config.encryption.clone())
        .unwrap()
        .encode(&value.into())
        .unwrap()
}

fn push(backend: &MemoryBackend, id: &str, value: &str) -> usize {
    backend.push_update(
        &CacheKey::new(id, STORE),
        encode(&quiet_config(), value),
        Utc::now() + ChronoDuration::hours(1),
    )
}

type Log = Arc<Mutex<Vec<String>>>;

fn recording(cache: &TieredCache, id: &str, name: &'static str, log: &Log) -> stratum::UpdateSubscription {
    let log = Arc::clone(log);
    cache
        .subscribe_to_updates(id, STORE, move |_key, value| {
            log.lock()
                .push(format!("{}:{}", name, value.as_str().unwrap_or("?")));
            Ok(())
        })
        .unwrap()
}

#[tokio::test]
async fn test_push_reaches_listeners_in_order() {
    let backend = MemoryBackend::new();
    let cache = cache_over(quiet_config(), &backend);
    let log: Log = Arc::default();

    let _first = recording(&cache, "news", "first", &log);
    let _second = recording(&cache, "news", "second", &log);
    assert_eq!(backend.subscriber_count(&CacheKey::new("news", STORE)), 1);

    assert_eq!(push(&backend, "news", "v1"), 1);
    assert_eq!(*log.lock(), vec!["first:v1", "second:v1"]);
}

#[tokio::test]
async fn test_pushed_value_is_stored_with_freshness_window() {
    let backend = MemoryBackend::new();
    let cache = cache_over(quiet_config(), &backend);
    let log: Log = Arc::default();
    let _subscription = recording(&cache, "news", "l", &log);

    push(&backend, "news", "fresh");

    let result = cache.get("news", STORE).await.unwrap();
    assert_eq!(result.source, Some(Tier::Local));
    assert_eq!(result.into_value(), Some(CacheValue::from("fresh")));

    let metadata = cache
        .entry_store()
        .peek(&CacheKey::new("news", STORE))
        .unwrap();
    assert!(metadata.expiration_date > Utc::now() + ChronoDuration::hours(23));
    assert_eq!(backend.op_counts().gets, 0);
}

#[tokio::test]
async fn test_custom_freshness_window() {
    let backend = MemoryBackend::new();
    let mut config = quiet_config();
    config.subscriptions.freshness_secs = 60;
    let cache = cache_over(config, &backend);
    let log: Log = Arc::default();
    let _subscription = recording(&cache, "news", "l", &log);

    push(&backend, "news", "v");

    let metadata = cache
        .entry_store()
        .peek(&CacheKey::new("news", STORE))
        .unwrap();
    assert!(metadata.expiration_date <= Utc::now() + ChronoDuration::seconds(60));
}

#[tokio::test]
async fn test_unsubscribe_keeps_other_listeners() {
    let backend = MemoryBackend::new();
    let cache = cache_over(quiet_config(), &backend);
    let log: Log = Arc::default();

    let first = recording(&cache, "news", "first", &log);
    let _second = recording(&cache, "news", "second", &log);

    assert!(first.unsubscribe());
    assert_eq!(cache.listener_count("news", STORE), 1);

    push(&backend, "news", "v2");
    assert_eq!(*log.lock(), vec!["second:v2"]);
}

#[tokio::test]
async fn test_last_unsubscribe_releases_backend() {
    let backend = MemoryBackend::new();
    let cache = cache_over(quiet_config(), &backend);
    let log: Log = Arc::default();
    let key = CacheKey::new("news", STORE);

    let first = recording(&cache, "news", "first", &log);
    let second = recording(&cache, "news", "second", &log);

    assert!(first.unsubscribe());
    assert_eq!(backend.subscriber_count(&key), 1);
    assert!(second.unsubscribe());
    assert_eq!(backend.subscriber_count(&key), 0);

    assert_eq!(push(&backend, "news", "nobody"), 0);
    assert!(log.lock().is_empty());
}

#[tokio::test]
async fn test_dropping_handle_keeps_listener() {
    let backend = MemoryBackend::new();
    let cache = cache_over(quiet_config(), &backend);
    let log: Log = Arc::default();

    drop(recording(&cache, "news", "kept", &log));

    push(&backend, "news", "v");
    assert_eq!(*log.lock(), vec!["kept:v"]);
}

#[tokio::test]
async fn test_failing_listeners_do_not_stop_delivery() {
    let backend = MemoryBackend::new();
    let cache = cache_over(quiet_config(), &backend);
    let log: Log = Arc::default();

    cache
        .subscribe_to_updates("news", STORE, |_, _| anyhow::bail!("listener refused"))
        .unwrap();
    cache
        .subscribe_to_updates("news", STORE, |_, _| -> anyhow::Result<()> {
            panic!("listener crashed")
        })
        .unwrap();
    let _survivor = recording(&cache, "news", "survivor", &log);

    push(&backend, "news", "v1");
    push(&backend, "news", "v2");

    assert_eq!(*log.lock(), vec!["survivor:v1", "survivor:v2"]);
    // The local tier was still refreshed
    assert_eq!(
        cache.get("news", STORE).await.unwrap().into_value(),
        Some(CacheValue::from("v2"))
    );
}

#[tokio::test]
async fn test_listeners_are_per_key() {
    let backend = MemoryBackend::new();
    let cache = cache_over(quiet_config(), &backend);
    let log: Log = Arc::default();

    let _news = recording(&cache, "news", "news", &log);
    let _sports = recording(&cache, "sports", "sports", &log);

    push(&backend, "sports", "goal");
    assert_eq!(*log.lock(), vec!["sports:goal"]);
}

#[tokio::test]
async fn test_undecodable_push_is_dropped() {
    let backend = MemoryBackend::new();
    let cache = cache_over(quiet_config(), &backend);
    let calls = Arc::new(AtomicUsize::new(0));

    let counter = Arc::clone(&calls);
    let _subscription = cache
        .subscribe_to_updates("news", STORE, move |_, _| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .unwrap();

    backend.push_update(
        &CacheKey::new("news", STORE),
        Payload::plain(vec![0xc1, 0xff, 0x00]),
        Utc::now() + ChronoDuration::hours(1),
    );

    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert!(cache.entry_store().is_empty());
}

#[tokio::test]
async fn test_refused_backend_subscription() {
    let backend = FaultyBackend::new();
    let cache = TieredCache::new(quiet_config(), backend.clone()).unwrap();
    backend.refuse_subscriptions.store(true, Ordering::SeqCst);

    let result = cache.subscribe_to_updates("news", STORE, |_, _| Ok(()));
    assert!(result.unwrap_err().is_backend());
    assert_eq!(cache.listener_count("news", STORE), 0);

    // A later attempt registers again
    backend.refuse_subscriptions.store(false, Ordering::SeqCst);
    cache
        .subscribe_to_updates("news", STORE, |_, _| Ok(()))
        .unwrap();
    assert_eq!(
        backend.inner.subscriber_count(&CacheKey::new("news", STORE)),
        1
    );
}

#[tokio::test]
async fn test_shutdown_releases_backend_subscriptions() {
    let backend = MemoryBackend::new();
    let cache = cache_over(quiet_config(), &backend);
    let log: Log = Arc::default();

    let _news = recording(&cache, "news", "news", &log);
    let _sports = recording(&cache, "sports", "sports", &log);

    cache.shutdown();

    assert_eq!(backend.subscriber_count(&CacheKey::new("news", STORE)), 0);
    assert_eq!(backend.subscriber_count(&CacheKey::new("sports", STORE)), 0);
    assert_eq!(cache.listener_count("news", STORE), 0);
}

#[tokio::test]
async fn test_push_after_cache_dropped_is_ignored() {
    let backend = MemoryBackend::new();
    let cache = cache_over(quiet_config(), &backend);
    let log: Log = Arc::default();

    let _subscription = recording(&cache, "news", "l", &log);
    drop(cache);

    // Handler only holds a weak reference to the cache
    push(&backend, "news", "late");
    assert!(log.lock().is_empty());
}
