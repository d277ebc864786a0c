//! Single-flight cache integration tests

use cretoai_rbac::{CacheConfig, RbacError, SingleFlightCache};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Barrier;
use tokio::task::JoinSet;
use tokio::time::{sleep, Duration};

fn new_cache<V: Clone + Send + Sync + 'static>() -> SingleFlightCache<V> {
    SingleFlightCache::new("integration", &CacheConfig::new(1_000, 300))
}

// ============================================================================
// COALESCING
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_k_concurrent_callers_share_one_fetch() {
    const K: usize = 16;

    let cache: SingleFlightCache<Arc<Vec<String>>> = new_cache();
    let fetches = Arc::new(AtomicUsize::new(0));
    let barrier = Arc::new(Barrier::new(K));
    let mut join_set = JoinSet::new();

    for _ in 0..K {
        let cache = cache.clone();
        let fetches = fetches.clone();
        let barrier = barrier.clone();
        join_set.spawn(async move {
            barrier.wait().await;
            cache
                .get_or_fetch("role:editor", move || async move {
                    fetches.fetch_add(1, Ordering::SeqCst);
                    sleep(Duration::from_millis(100)).await;
                    Ok(Arc::new(vec!["1".to_string(), "2".to_string()]))
                })
                .await
        });
    }

    let mut values = Vec::new();
    while let Some(result) = join_set.join_next().await {
        values.push(result.unwrap().unwrap());
    }

    assert_eq!(fetches.load(Ordering::SeqCst), 1, "fetch must run exactly once");
    assert_eq!(values.len(), K);
    assert!(values.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])), "all callers see the same value");

    let stats = cache.stats();
    assert_eq!(stats.fetches, 1);
    assert_eq!(stats.hits + stats.misses, K);
    assert_eq!(stats.misses, stats.fetches + stats.coalesced);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_keys_do_not_block_each_other() {
    let cache: SingleFlightCache<u64> = new_cache();

    let slow = {
        let cache = cache.clone();
        tokio::spawn(async move {
            cache
                .get_or_fetch("slow", || async {
                    sleep(Duration::from_millis(500)).await;
                    Ok(1)
                })
                .await
        })
    };

    // Give the slow fetch time to start
    sleep(Duration::from_millis(20)).await;

    let start = Instant::now();
    let fast = cache.get_or_fetch("fast", || async { Ok(2) }).await.unwrap();
    assert_eq!(fast, 2);
    assert!(start.elapsed() < Duration::from_millis(400));

    assert_eq!(slow.await.unwrap().unwrap(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_distinct_keys_fetch_independently() {
    let cache: SingleFlightCache<String> = new_cache();
    let fetches = Arc::new(AtomicUsize::new(0));
    let mut join_set = JoinSet::new();

    for i in 0..20 {
        let cache = cache.clone();
        let fetches = fetches.clone();
        let key = format!("role:{}", i % 5);
        join_set.spawn(async move {
            let expected = key.clone();
            let value = cache
                .get_or_fetch(&key, move || async move {
                    fetches.fetch_add(1, Ordering::SeqCst);
                    sleep(Duration::from_millis(50)).await;
                    Ok(expected)
                })
                .await
                .unwrap();
            assert_eq!(value, key);
        });
    }

    while let Some(result) = join_set.join_next().await {
        result.unwrap();
    }
    assert_eq!(fetches.load(Ordering::SeqCst), 5);
    assert_eq!(cache.len(), 5);
}

// ============================================================================
// FAILURES AND INVALIDATION
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_waiters_share_one_error() {
    let cache: SingleFlightCache<u64> = new_cache();
    let mut join_set = JoinSet::new();

    for _ in 0..5 {
        let cache = cache.clone();
        join_set.spawn(async move {
            cache
                .get_or_fetch("role:missing", || async {
                    sleep(Duration::from_millis(50)).await;
                    Err(RbacError::NotFound("role 'missing'".to_string()))
                })
                .await
        });
    }

    let mut errors = Vec::new();
    while let Some(result) = join_set.join_next().await {
        let err = result.unwrap().unwrap_err();
        assert!(err.is_not_found());
        errors.push(err);
    }

    let sources: Vec<_> = errors
        .iter()
        .map(|e| match e {
            RbacError::CacheFetchFailure { source, .. } => source.clone(),
            other => panic!("unexpected error {:?}", other),
        })
        .collect();
    assert!(sources.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
    assert!(cache.is_empty());
    assert_eq!(cache.stats().failures, 1);
}

#[tokio::test]
async fn test_invalidate_unknown_key_is_noop() {
    let cache: SingleFlightCache<u64> = new_cache();
    cache.invalidate("never-cached");
    cache.invalidate_all();

    let value = cache.get_or_fetch("k", || async { Ok(5) }).await.unwrap();
    assert_eq!(value, 5);
    assert_eq!(cache.peek("k"), Some(5));
}
