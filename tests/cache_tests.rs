use catalog_scraper::cache::Cache;
use catalog_scraper::error::{SourceError, UpstreamError};
use catalog_scraper::models::{CacheKey, ContentItem, MediaType};
use futures::future::join_all;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn page(ids: &[i64]) -> Vec<ContentItem> {
    ids.iter()
        .map(|id| {
            ContentItem::new(
                *id,
                format!("Item {}", id),
                "2024".to_string(),
                None,
                MediaType::Tv,
            )
        })
        .collect()
}

/// Loader that counts its invocations and takes `delay` to answer
async fn counted_load(
    calls: Arc<AtomicUsize>,
    delay: Duration,
    ids: Vec<i64>,
) -> Result<Vec<ContentItem>, SourceError> {
    calls.fetch_add(1, Ordering::SeqCst);
    tokio::time::sleep(delay).await;
    Ok(page(&ids))
}

#[tokio::test(start_paused = true)]
async fn test_repeat_loads_within_ttl_hit_cache() {
    let cache = Cache::new(10, Duration::from_secs(300));
    let calls = Arc::new(AtomicUsize::new(0));
    let key = CacheKey::new("movies", 1);

    let first = cache
        .get_or_load(key.clone(), || {
            counted_load(calls.clone(), Duration::from_millis(10), vec![1, 2])
        })
        .await
        .unwrap();
    let second = cache
        .get_or_load(key.clone(), || {
            counted_load(calls.clone(), Duration::from_millis(10), vec![3])
        })
        .await
        .unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(first, second);
    assert!(Arc::ptr_eq(&first, &second));
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_misses_share_one_load() {
    let cache = Cache::new(10, Duration::from_secs(300));
    let calls = Arc::new(AtomicUsize::new(0));
    let key = CacheKey::new("tv", 2);

    let requests = (0..8).map(|_| {
        let cache = cache.clone();
        let calls = calls.clone();
        let key = key.clone();
        async move {
            cache
                .get_or_load(key, || {
                    counted_load(calls, Duration::from_millis(200), vec![7, 8, 9])
                })
                .await
        }
    });
    let results = join_all(requests).await;

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    let first = results[0].as_ref().unwrap();
    for result in &results {
        assert!(Arc::ptr_eq(first, result.as_ref().unwrap()));
    }

    let stats = cache.stats();
    assert_eq!(stats.loads, 1);
    assert_eq!(stats.coalesced, 7);
    assert!(!cache.is_loading(&key));
}

#[tokio::test(start_paused = true)]
async fn test_failure_reaches_every_waiter_and_is_not_cached() {
    let cache = Cache::new(10, Duration::from_secs(300));
    let calls = Arc::new(AtomicUsize::new(0));
    let key = CacheKey::new("movies", 3);

    let failing = |calls: Arc<AtomicUsize>| async move {
        calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(50)).await;
        Err::<Vec<ContentItem>, _>(SourceError::Upstream(UpstreamError::BadStatus(502)))
    };

    let results = join_all((0..3).map(|_| {
        let cache = cache.clone();
        let calls = calls.clone();
        let key = key.clone();
        async move { cache.get_or_load(key, || failing(calls)).await }
    }))
    .await;

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    for result in results {
        assert_eq!(
            result,
            Err(SourceError::Upstream(UpstreamError::BadStatus(502)))
        );
    }
    assert!(cache.get(&key).is_none());
    assert!(cache.is_empty());

    // The next request tries again
    let retried = cache
        .get_or_load(key.clone(), || {
            counted_load(calls.clone(), Duration::ZERO, vec![1])
        })
        .await;
    assert!(retried.is_ok());
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn test_overflow_evicts_least_recently_accessed() {
    let max_entries = 3;
    let cache = Cache::new(max_entries, Duration::from_secs(300));
    let calls = Arc::new(AtomicUsize::new(0));

    for n in 1..=max_entries as u32 {
        cache
            .get_or_load(CacheKey::new("movies", n), || {
                counted_load(calls.clone(), Duration::ZERO, vec![n as i64])
            })
            .await
            .unwrap();
    }

    // Page 1 is read again, leaving page 2 as least recently used
    assert!(cache.get(&CacheKey::new("movies", 1)).is_some());

    cache
        .get_or_load(CacheKey::new("movies", 99), || {
            counted_load(calls.clone(), Duration::ZERO, vec![99])
        })
        .await
        .unwrap();

    assert_eq!(cache.len(), max_entries);
    assert!(cache.get(&CacheKey::new("movies", 2)).is_none());
    for n in [1, 3, 99] {
        assert!(cache.get(&CacheKey::new("movies", n)).is_some(), "page {} evicted", n);
    }
    assert_eq!(cache.stats().evictions, 1);
}

#[tokio::test(start_paused = true)]
async fn test_expired_entry_is_reloaded() {
    let ttl = Duration::from_secs(60);
    let cache = Cache::new(10, ttl);
    let calls = Arc::new(AtomicUsize::new(0));
    let key = CacheKey::new("tv", 1);

    cache
        .get_or_load(key.clone(), || {
            counted_load(calls.clone(), Duration::ZERO, vec![1])
        })
        .await
        .unwrap();

    tokio::time::advance(ttl).await;
    assert!(cache.get(&key).is_some(), "entry still valid at exactly the TTL");

    tokio::time::advance(Duration::from_secs(1)).await;
    assert!(cache.get(&key).is_none());
    assert_eq!(cache.stats().expirations, 1);

    let reloaded = cache
        .get_or_load(key.clone(), || {
            counted_load(calls.clone(), Duration::ZERO, vec![2])
        })
        .await
        .unwrap();
    assert_eq!(reloaded[0].id(), 2);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn test_abandoned_load_still_fills_cache() {
    let cache = Cache::new(10, Duration::from_secs(300));
    let calls = Arc::new(AtomicUsize::new(0));
    let key = CacheKey::new("movies", 4);

    let impatient = tokio::time::timeout(
        Duration::from_millis(10),
        cache.get_or_load(key.clone(), || {
            counted_load(calls.clone(), Duration::from_millis(100), vec![4])
        }),
    )
    .await;
    assert!(impatient.is_err());
    assert!(cache.is_loading(&key));

    tokio::time::sleep(Duration::from_millis(200)).await;

    assert!(!cache.is_loading(&key));
    assert_eq!(cache.get(&key).unwrap()[0].id(), 4);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}
