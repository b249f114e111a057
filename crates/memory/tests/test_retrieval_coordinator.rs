mod common;

use common::*;
use ::common::PipelineError;
use ai::{Embedder, HashingEmbedder};
use chrono::Utc;
use memory::{CacheStore, PassageRecord, QueryKey, ReadinessState, RemoteCacheValue, ScoredId};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn test_full_moon_query_ranks_release_first() {
    let pipeline = started_pipeline(Duration::ZERO).await;

    let results = pipeline
        .context
        .coordinator
        .retrieve("letting go during full moon", 2)
        .await
        .expect("retrieve");

    assert_eq!(results.len(), 2);
    assert_eq!(results[0].id, "B");
    assert_eq!(results[1].id, "A");

    let query = HashingEmbedder::new(DIMENSION)
        .embed("letting go during full moon")
        .expect("embed");
    let all = pipeline.context.index.search(&query, 3).expect("search");
    let score = |id: &str| {
        all.iter()
            .find(|s| s.id == id)
            .map(|s| s.score)
            .expect("scored")
    };
    assert!(results[0].score > score("A"));
    assert!(results[0].score > score("C"));
}

#[tokio::test]
async fn test_repeated_query_is_served_from_cache() {
    let pipeline = started_pipeline(Duration::ZERO).await;
    let coordinator = &pipeline.context.coordinator;
    let baseline = calls(&pipeline.embedder_calls);
    let searches = pipeline.context.index.search_count();

    let first = coordinator.retrieve("Full Moon", 3).await.expect("first");
    let after_first = calls(&pipeline.embedder_calls);
    assert_eq!(after_first, baseline + 1);
    assert_eq!(pipeline.context.index.search_count(), searches + 1);

    // другой регистр и пробелы дают тот же ключ
    let second = coordinator
        .retrieve("  full   MOON ", 3)
        .await
        .expect("second");
    assert_eq!(first, second);
    assert_eq!(calls(&pipeline.embedder_calls), after_first);
    assert_eq!(pipeline.context.index.search_count(), searches + 1);
    assert_eq!(coordinator.stats().local_hits, 1);
}

#[tokio::test]
async fn test_top_k_is_part_of_cache_key() {
    let pipeline = started_pipeline(Duration::ZERO).await;
    let coordinator = &pipeline.context.coordinator;

    let one = coordinator.retrieve("moon", 1).await.expect("k=1");
    let three = coordinator.retrieve("moon", 3).await.expect("k=3");
    assert_eq!(one.len(), 1);
    assert_eq!(three.len(), 3);
    assert_eq!(one[0].id, three[0].id);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_identical_queries_compute_once() {
    let pipeline = started_pipeline(Duration::from_millis(200)).await;
    let coordinator = Arc::clone(&pipeline.context.coordinator);
    let baseline = calls(&pipeline.embedder_calls);
    let searches = pipeline.context.index.search_count();

    let mut handles = Vec::new();
    for _ in 0..12 {
        let coordinator = Arc::clone(&coordinator);
        handles.push(tokio::spawn(async move {
            coordinator.retrieve("eclipse transformation", 2).await
        }));
    }

    let mut results = Vec::new();
    for handle in handles {
        results.push(handle.await.expect("join").expect("retrieve"));
    }

    assert_eq!(calls(&pipeline.embedder_calls), baseline + 1);
    assert_eq!(pipeline.context.index.search_count(), searches + 1);
    assert!(results.windows(2).all(|w| w[0] == w[1]));
    assert_eq!(results[0][0].id, "C");
    assert_eq!(coordinator.in_flight(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_abandoned_waiter_still_populates_cache() {
    let pipeline = started_pipeline(Duration::from_millis(150)).await;
    let coordinator = Arc::clone(&pipeline.context.coordinator);
    let baseline = calls(&pipeline.embedder_calls);

    // вызывающий слой сдаётся раньше, чем закончится вычисление
    let abandoned =
        tokio::time::timeout(Duration::from_millis(20), coordinator.retrieve("new moon", 2)).await;
    assert!(abandoned.is_err());

    tokio::time::sleep(Duration::from_millis(400)).await;
    let results = coordinator.retrieve("new moon", 2).await.expect("retrieve");
    assert_eq!(results[0].id, "A");
    assert_eq!(calls(&pipeline.embedder_calls), baseline + 1);
}

#[tokio::test]
async fn test_retrieve_before_ready_is_not_ready_error() {
    let pipeline = build_pipeline(moon_corpus(), Duration::ZERO, None);

    let err = pipeline
        .context
        .coordinator
        .retrieve("full moon", 2)
        .await
        .unwrap_err();

    assert!(err.is_not_ready());
    assert_eq!(
        err.cause(),
        &PipelineError::ServiceNotReady {
            state: ReadinessState::Starting.to_string()
        }
    );
    assert_eq!(calls(&pipeline.embedder_calls), 0);
}

#[tokio::test]
async fn test_empty_query_and_zero_top_k() {
    let pipeline = started_pipeline(Duration::ZERO).await;
    let coordinator = &pipeline.context.coordinator;

    let err = coordinator.retrieve("   \t ", 3).await.unwrap_err();
    assert!(matches!(err.cause(), PipelineError::InvalidQuery(_)));
    assert!(!err.is_not_ready());

    let empty = coordinator.retrieve("full moon", 0).await.expect("top_k 0");
    assert!(empty.is_empty());
}

#[tokio::test]
async fn test_top_k_larger_than_corpus_is_clamped() {
    let pipeline = started_pipeline(Duration::ZERO).await;
    let results = pipeline
        .context
        .coordinator
        .retrieve("moon", 10_000)
        .await
        .expect("retrieve");
    assert_eq!(results.len(), 3);
}

#[tokio::test]
async fn test_rebuild_invalidates_local_cache() {
    let pipeline = started_pipeline(Duration::ZERO).await;
    let coordinator = &pipeline.context.coordinator;

    let before = coordinator.retrieve("full moon release", 3).await.expect("before");
    assert_eq!(before[0].id, "B");
    assert!(!pipeline.context.cache.is_empty());

    let report = coordinator.rebuild_corpus().await.expect("rebuild");
    assert_eq!(report.passages, 3);
    assert!(report.invalidated_entries >= 1);
    assert!(pipeline.context.cache.is_empty());
}

#[tokio::test]
async fn test_cache_store_outage_degrades_to_miss() {
    let store = Arc::new(OutageCacheStore::default());
    let pipeline = build_pipeline(
        moon_corpus(),
        Duration::ZERO,
        Some(Arc::clone(&store) as Arc<dyn CacheStore>),
    );
    pipeline.context.start().await.expect("start");

    // store падает уже после READY
    store.down.store(true, Ordering::SeqCst);
    let results = pipeline
        .context
        .coordinator
        .retrieve("full moon", 2)
        .await
        .expect("outage must not fail the request");
    assert_eq!(results[0].id, "B");
    // get + фоновая попытка set
    eventually(|| store.calls.load(Ordering::SeqCst) >= 2).await;
}

#[tokio::test]
async fn test_remote_hit_skips_embedding() {
    let store = Arc::new(InMemoryCacheStore::default());
    let shared: Arc<dyn CacheStore> = Arc::clone(&store) as Arc<dyn CacheStore>;

    // оба процесса стартуют до первого запроса: start() очищает namespace
    let first = build_pipeline(moon_corpus(), Duration::ZERO, Some(Arc::clone(&shared)));
    let second = build_pipeline(moon_corpus(), Duration::ZERO, Some(shared));
    first.context.start().await.expect("start first");
    second.context.start().await.expect("start second");

    // первый считает и публикует результат, второй берёт его из общего кэша
    let expected = first
        .context
        .coordinator
        .retrieve("full moon", 2)
        .await
        .expect("first retrieve");
    eventually(|| store.sets.load(Ordering::SeqCst) == 1).await;

    let baseline = calls(&second.embedder_calls);
    let got = second
        .context
        .coordinator
        .retrieve("full moon", 2)
        .await
        .expect("second retrieve");

    assert_eq!(got, expected);
    assert_eq!(calls(&second.embedder_calls), baseline);
    assert_eq!(second.context.coordinator.stats().remote_hits, 1);
}

#[tokio::test]
async fn test_remote_entry_from_other_corpus_is_ignored() {
    let store = Arc::new(InMemoryCacheStore::default());
    let shared: Arc<dyn CacheStore> = Arc::clone(&store) as Arc<dyn CacheStore>;

    let first = build_pipeline(moon_corpus(), Duration::ZERO, Some(Arc::clone(&shared)));
    first.context.start().await.expect("start first");
    first
        .context
        .coordinator
        .retrieve("moon", 2)
        .await
        .expect("retrieve");

    let mut other = moon_corpus();
    other.push(PassageRecord::new("D", "4", "waning moon rest", "lunar"));
    let second = build_pipeline(other, Duration::ZERO, Some(Arc::clone(&shared)));
    second.context.start().await.expect("start second");

    // start() второго процесса очистил namespace: публикуем запись старого корпуса заново
    first.context.cache.invalidate_all();
    first
        .context
        .coordinator
        .retrieve("moon", 2)
        .await
        .expect("republish");
    eventually(|| store.sets.load(Ordering::SeqCst) == 2).await;
    assert_eq!(store.entries.lock().unwrap().len(), 1);

    let baseline = calls(&second.embedder_calls);
    second
        .context
        .coordinator
        .retrieve("moon", 2)
        .await
        .expect("retrieve");
    assert_eq!(calls(&second.embedder_calls), baseline + 1);
    assert_eq!(second.context.coordinator.stats().remote_hits, 0);
}

/// Запись от другого процесса со сдвинутым временем создания
fn seed_remote(pipeline: &TestPipeline, store: &InMemoryCacheStore, query: &str, age: Duration) {
    let fingerprint = pipeline
        .context
        .index
        .snapshot()
        .expect("snapshot")
        .fingerprint()
        .to_string();
    let created_at = Utc::now() - chrono::Duration::seconds(age.as_secs() as i64);
    store.entries.lock().unwrap().insert(
        QueryKey::new(query, 3).cache_key(),
        RemoteCacheValue {
            results: vec![ScoredId {
                id: "B".to_string(),
                score: 0.9,
            }],
            fingerprint,
            created_at,
        },
    );
}

#[tokio::test(start_paused = true)]
async fn test_remote_hit_expires_locally_with_remote_ttl() {
    let store = Arc::new(InMemoryCacheStore::default());
    let pipeline = build_pipeline(
        moon_corpus(),
        Duration::ZERO,
        Some(Arc::clone(&store) as Arc<dyn CacheStore>),
    );
    pipeline.context.start().await.expect("start");
    let coordinator = &pipeline.context.coordinator;
    let ttl = pipeline.context.config.cache.ttl();

    // другой процесс записал результат почти целый TTL назад
    seed_remote(&pipeline, &store, "full moon", ttl - Duration::from_secs(10));
    let baseline = calls(&pipeline.embedder_calls);

    let first = coordinator.retrieve("full moon", 3).await.expect("remote hit");
    assert_eq!(first.len(), 1);
    assert_eq!(first[0].id, "B");
    assert_eq!(coordinator.stats().remote_hits, 1);
    assert_eq!(calls(&pipeline.embedder_calls), baseline);

    store.entries.lock().unwrap().clear();
    tokio::time::advance(Duration::from_secs(5)).await;
    coordinator.retrieve("full moon", 3).await.expect("local hit");
    assert_eq!(coordinator.stats().local_hits, 1);
    assert_eq!(calls(&pipeline.embedder_calls), baseline);

    // остаток remote TTL истёк: локальная копия тоже
    tokio::time::advance(Duration::from_secs(15)).await;
    let recomputed = coordinator.retrieve("full moon", 3).await.expect("recompute");
    assert_eq!(recomputed.len(), 3);
    assert_eq!(calls(&pipeline.embedder_calls), baseline + 1);
}

#[tokio::test]
async fn test_expired_remote_entry_is_a_miss() {
    let store = Arc::new(InMemoryCacheStore::default());
    let pipeline = build_pipeline(
        moon_corpus(),
        Duration::ZERO,
        Some(Arc::clone(&store) as Arc<dyn CacheStore>),
    );
    pipeline.context.start().await.expect("start");
    let ttl = pipeline.context.config.cache.ttl();

    seed_remote(&pipeline, &store, "full moon", ttl + Duration::from_secs(1));
    let baseline = calls(&pipeline.embedder_calls);

    let results = pipeline
        .context
        .coordinator
        .retrieve("full moon", 3)
        .await
        .expect("retrieve");
    assert_eq!(results.len(), 3);
    assert_eq!(calls(&pipeline.embedder_calls), baseline + 1);
    assert_eq!(pipeline.context.coordinator.stats().remote_hits, 0);
}

#[tokio::test]
async fn test_slow_cache_store_write_does_not_delay_results() {
    let store = Arc::new(StallingCacheStore::default());
    let pipeline = build_pipeline(
        moon_corpus(),
        Duration::ZERO,
        Some(Arc::clone(&store) as Arc<dyn CacheStore>),
    );
    pipeline.context.start().await.expect("start");

    // SET висит бесконечно, ответ всё равно приходит сразу
    let results = tokio::time::timeout(
        Duration::from_secs(1),
        pipeline.context.coordinator.retrieve("eclipse", 2),
    )
    .await
    .expect("retrieve must not wait for the cache store write")
    .expect("retrieve");
    assert_eq!(results[0].id, "C");
    eventually(|| store.sets.load(Ordering::SeqCst) == 1).await;
}

/// Store, в котором SET никогда не завершается
#[derive(Default)]
struct StallingCacheStore {
    sets: AtomicUsize,
}

#[async_trait::async_trait]
impl CacheStore for StallingCacheStore {
    fn name(&self) -> &str {
        "cache_store"
    }

    async fn get(&self, _key: &str) -> anyhow::Result<Option<RemoteCacheValue>> {
        Ok(None)
    }

    async fn set(&self, _key: &str, _value: &RemoteCacheValue, _ttl: Duration) -> anyhow::Result<()> {
        self.sets.fetch_add(1, Ordering::SeqCst);
        std::future::pending::<()>().await;
        Ok(())
    }

    async fn healthcheck(&self) -> anyhow::Result<()> {
        Ok(())
    }

    async fn clear_namespace(&self) -> anyhow::Result<u64> {
        Ok(0)
    }
}

/// Store, который можно "уронить" посреди теста
#[derive(Default)]
struct OutageCacheStore {
    down: AtomicBool,
    calls: AtomicUsize,
}

impl OutageCacheStore {
    fn call(&self) -> anyhow::Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.down.load(Ordering::SeqCst) {
            anyhow::bail!("Connection refused (os error 111)")
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl CacheStore for OutageCacheStore {
    fn name(&self) -> &str {
        "cache_store"
    }

    async fn get(&self, _key: &str) -> anyhow::Result<Option<RemoteCacheValue>> {
        self.call()?;
        Ok(None)
    }

    async fn set(&self, _key: &str, _value: &RemoteCacheValue, _ttl: Duration) -> anyhow::Result<()> {
        self.call()
    }

    async fn healthcheck(&self) -> anyhow::Result<()> {
        self.call()
    }

    async fn clear_namespace(&self) -> anyhow::Result<u64> {
        self.call().map(|_| 0)
    }
}
