//! Общие фейки для integration тестов retrieval pipeline:
//! - embedder со счётчиком вызовов и искусственной задержкой
//! - in-memory cache store
//! - управляемые probes зависимостей
#![allow(dead_code)]

use ai::{AiError, Embedder, EmbeddingBackend, HashingEmbedder, ModelLoader};
use anyhow::Result;
use async_trait::async_trait;
use memory::{
    CacheStore, ContextComponents, DependencyProbe, PassageRecord, RemoteCacheValue,
    ServiceConfig, ServiceContext, StaticCorpus, VectorStore,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const DIMENSION: usize = 384;

/// Логи pipeline в вывод теста (`--nocapture`)
pub fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("memory=debug")
        .with_test_writer()
        .try_init();
}

/// Hashing embedder, считающий вызовы; `delay` имитирует тяжёлый инференс
pub struct CountingEmbedder {
    inner: HashingEmbedder,
    pub calls: Arc<AtomicUsize>,
    delay: Duration,
}

impl CountingEmbedder {
    pub fn new(delay: Duration) -> Self {
        Self {
            inner: HashingEmbedder::new(DIMENSION),
            calls: Arc::new(AtomicUsize::new(0)),
            delay,
        }
    }
}

impl Embedder for CountingEmbedder {
    fn model_id(&self) -> &str {
        "counting-hashing"
    }

    fn dimension(&self) -> usize {
        DIMENSION
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>, AiError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        self.inner.embed(text)
    }
}

pub struct FixedLoader(pub Arc<dyn Embedder>);

#[async_trait]
impl ModelLoader for FixedLoader {
    async fn load(&self) -> Result<Arc<dyn Embedder>, AiError> {
        Ok(Arc::clone(&self.0))
    }
}

pub struct FailingLoader;

#[async_trait]
impl ModelLoader for FailingLoader {
    async fn load(&self) -> Result<Arc<dyn Embedder>, AiError> {
        Err(AiError::ModelNotFound("models/all-MiniLM-L6-v2".into()))
    }
}

/// Загрузка модели, которая никогда не завершается
pub struct HangingLoader;

#[async_trait]
impl ModelLoader for HangingLoader {
    async fn load(&self) -> Result<Arc<dyn Embedder>, AiError> {
        std::future::pending::<()>().await;
        Err(AiError::ModelLoadError("unreachable".into()))
    }
}

/// Cache store в памяти со счётчиками
#[derive(Default)]
pub struct InMemoryCacheStore {
    pub entries: Mutex<HashMap<String, RemoteCacheValue>>,
    pub gets: AtomicUsize,
    pub sets: AtomicUsize,
    pub clears: AtomicUsize,
}

#[async_trait]
impl CacheStore for InMemoryCacheStore {
    fn name(&self) -> &str {
        "cache_store"
    }

    async fn get(&self, key: &str) -> Result<Option<RemoteCacheValue>> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        Ok(self.entries.lock().unwrap().get(key).cloned())
    }

    async fn set(&self, key: &str, value: &RemoteCacheValue, _ttl: Duration) -> Result<()> {
        self.sets.fetch_add(1, Ordering::SeqCst);
        self.entries
            .lock()
            .unwrap()
            .insert(key.to_string(), value.clone());
        Ok(())
    }

    async fn healthcheck(&self) -> Result<()> {
        Ok(())
    }

    async fn clear_namespace(&self) -> Result<u64> {
        self.clears.fetch_add(1, Ordering::SeqCst);
        let mut entries = self.entries.lock().unwrap();
        let removed = entries.len() as u64;
        entries.clear();
        Ok(removed)
    }
}

/// Probe, чья доступность переключается из теста
pub struct SwitchProbe {
    name: &'static str,
    pub healthy: AtomicBool,
    pub checks: AtomicUsize,
}

impl SwitchProbe {
    pub fn new(name: &'static str, healthy: bool) -> Arc<Self> {
        Arc::new(Self {
            name,
            healthy: AtomicBool::new(healthy),
            checks: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl DependencyProbe for SwitchProbe {
    fn name(&self) -> &str {
        self.name
    }

    async fn check(&self) -> Result<()> {
        self.checks.fetch_add(1, Ordering::SeqCst);
        if self.healthy.load(Ordering::SeqCst) {
            Ok(())
        } else {
            anyhow::bail!("connection refused")
        }
    }
}

/// Корпус из сценария полнолуния: A, B, C
pub fn moon_corpus() -> Vec<PassageRecord> {
    vec![
        PassageRecord::new("A", "1", "new moon energy", "lunar"),
        PassageRecord::new("B", "2", "full moon release", "lunar"),
        PassageRecord::new("C", "3", "eclipse transformation", "lunar"),
    ]
}

pub fn test_config() -> ServiceConfig {
    let mut config = ServiceConfig::default();
    config.embedding.backend = EmbeddingBackend::Hashing;
    config.embedding.dimension = DIMENSION;
    config.readiness.probe_interval_secs = 1;
    config.readiness.probe_timeout_secs = 5;
    config.readiness.model_timeout_secs = 30;
    config.cache.sweep_interval_secs = 0;
    config
}

pub struct TestPipeline {
    pub context: ServiceContext,
    pub embedder_calls: Arc<AtomicUsize>,
}

/// Контекст с фейковым embedder и in-process корпусом
pub fn build_pipeline(
    records: Vec<PassageRecord>,
    delay: Duration,
    cache_store: Option<Arc<dyn CacheStore>>,
) -> TestPipeline {
    build_pipeline_with(records, delay, None, cache_store)
}

pub fn build_pipeline_with(
    records: Vec<PassageRecord>,
    delay: Duration,
    vector_store: Option<Arc<dyn VectorStore>>,
    cache_store: Option<Arc<dyn CacheStore>>,
) -> TestPipeline {
    build_pipeline_from(test_config(), records, delay, vector_store, cache_store)
}

pub fn build_pipeline_from(
    config: ServiceConfig,
    records: Vec<PassageRecord>,
    delay: Duration,
    vector_store: Option<Arc<dyn VectorStore>>,
    cache_store: Option<Arc<dyn CacheStore>>,
) -> TestPipeline {
    init_test_logging();
    let embedder = Arc::new(CountingEmbedder::new(delay));
    let embedder_calls = Arc::clone(&embedder.calls);
    let context = ServiceContext::assemble(
        config,
        ContextComponents {
            loader: Arc::new(FixedLoader(embedder)),
            corpus: Arc::new(StaticCorpus::new(records)),
            vector_store,
            cache_store,
        },
    );
    TestPipeline {
        context,
        embedder_calls,
    }
}

/// Готовый к запросам pipeline с корпусом A/B/C
pub async fn started_pipeline(delay: Duration) -> TestPipeline {
    let pipeline = build_pipeline(moon_corpus(), delay, None);
    pipeline.context.start().await.expect("pipeline must start");
    pipeline
}

pub fn calls(counter: &Arc<AtomicUsize>) -> usize {
    counter.load(Ordering::SeqCst)
}

/// Дождаться условия; запись в cache store идёт отдельной задачей
pub async fn eventually(mut check: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}
