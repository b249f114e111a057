use memory::{CachedResult, QueryCache, ScoredId};
use std::sync::Arc;
use std::time::Duration;

const EPSILON: Duration = Duration::from_millis(1);

const TTLS: &[Duration] = &[
    Duration::from_secs(1),
    Duration::from_secs(60),
    Duration::from_secs(3_600),
    Duration::from_secs(86_400),
];

fn result(id: &str) -> CachedResult {
    CachedResult {
        results: Arc::new(vec![ScoredId {
            id: id.to_string(),
            score: 0.9,
        }]),
        fingerprint: "fp".to_string(),
    }
}

#[tokio::test(start_paused = true)]
async fn test_entry_valid_until_creation_plus_ttl() {
    for &ttl in TTLS {
        let cache = QueryCache::new(16, ttl);
        cache.put("3:full moon", result("B"), ttl);

        tokio::time::advance(ttl - EPSILON).await;
        assert!(
            cache.get("3:full moon").is_some(),
            "entry must be present at T+L-ε for ttl {ttl:?}"
        );

        tokio::time::advance(EPSILON * 2).await;
        assert!(
            cache.get("3:full moon").is_none(),
            "entry must be absent at T+L+ε for ttl {ttl:?}"
        );
        assert_eq!(cache.len(), 0, "expired entry is removed on read");
    }
}

#[tokio::test(start_paused = true)]
async fn test_hit_does_not_extend_ttl() {
    let ttl = Duration::from_secs(10);
    let cache = QueryCache::new(16, ttl);
    cache.insert("k", result("A"));

    tokio::time::advance(Duration::from_secs(6)).await;
    assert!(cache.get("k").is_some());

    tokio::time::advance(Duration::from_secs(5)).await;
    assert!(cache.get("k").is_none());
}

#[tokio::test(start_paused = true)]
async fn test_sweep_and_lazy_expiry_agree_at_boundary() {
    let ttl = Duration::from_secs(30);
    let lazy = QueryCache::new(16, ttl);
    let swept = QueryCache::new(16, ttl);
    lazy.insert("k", result("A"));
    swept.insert("k", result("A"));

    // ровно T+L: запись уже недействительна для обоих путей
    tokio::time::advance(ttl).await;
    assert!(lazy.get("k").is_none());
    assert_eq!(swept.sweep_expired(), 1);
    assert_eq!(lazy.stats().expirations, swept.stats().expirations);
}

#[tokio::test(start_paused = true)]
async fn test_background_sweeper_removes_expired_entries() {
    let cache = Arc::new(QueryCache::new(16, Duration::from_secs(5)));
    cache.insert("old", result("A"));
    let sweeper = cache.spawn_sweeper(Duration::from_secs(10));

    tokio::time::sleep(Duration::from_secs(4)).await;
    cache.insert("fresh", result("B"));

    tokio::time::sleep(Duration::from_secs(7)).await;
    tokio::task::yield_now().await;

    // "old" истёк на 5s и убран на тике 10s без единого get; "fresh" живёт до 9s
    assert_eq!(cache.len(), 0);
    assert_eq!(cache.stats().expirations, 2);
    sweeper.abort();
}

#[tokio::test(start_paused = true)]
async fn test_sweeper_stops_with_cache() {
    let cache = Arc::new(QueryCache::new(16, Duration::from_secs(5)));
    let sweeper = cache.spawn_sweeper(Duration::from_secs(1));
    drop(cache);

    tokio::time::sleep(Duration::from_secs(3)).await;
    assert!(sweeper.is_finished());
}

#[tokio::test(start_paused = true)]
async fn test_lru_keeps_recently_read_entries() {
    for capacity in [2usize, 8, 64] {
        let cache = QueryCache::new(capacity, Duration::from_secs(60));
        for i in 0..capacity {
            cache.insert(&format!("k{i}"), result("A"));
        }
        // чтение k0 делает его самым свежим
        assert!(cache.get("k0").is_some());
        cache.insert("overflow", result("B"));

        assert_eq!(cache.len(), capacity);
        assert!(cache.get("k0").is_some());
        assert!(cache.get("k1").is_none());
        assert_eq!(cache.stats().evictions, 1);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_get_put_is_safe() {
    let cache = Arc::new(QueryCache::new(32, Duration::from_secs(60)));

    let tasks: Vec<_> = (0..8)
        .map(|worker| {
            let cache = Arc::clone(&cache);
            tokio::spawn(async move {
                for i in 0..500 {
                    let key = format!("q{}", (worker * 7 + i) % 64);
                    if cache.get(&key).is_none() {
                        cache.insert(&key, result(&key));
                    }
                }
            })
        })
        .collect();
    for task in tasks {
        task.await.expect("worker panicked");
    }

    let stats = cache.stats();
    assert!(cache.len() <= 32);
    assert_eq!(stats.hits + stats.misses, 8 * 500);
    assert!(stats.hit_rate() > 0.0);
}
