use crate::cache_store::{CacheStore, RedisCacheStore};
use crate::config::ServiceConfig;
use crate::corpus::{CorpusSource, JsonDirCorpus};
use crate::health::{CacheStoreProbe, DependencyProbe, VectorStoreProbe};
use crate::query_cache::QueryCache;
use crate::readiness::ReadinessGate;
use crate::retrieval::{CoordinatorParts, RebuildReport, RetrievalCoordinator};
use crate::vector_index::VectorIndex;
use crate::vector_store::{QdrantStore, VectorStore};
use ai::{ConfiguredModelLoader, EmbeddingService, ModelLoader};
use anyhow::Result;
use common::RetrievalFailure;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::info;

/// Внешние части, которые можно подменить (тесты, встраивание)
pub struct ContextComponents {
    pub loader: Arc<dyn ModelLoader>,
    pub corpus: Arc<dyn CorpusSource>,
    pub vector_store: Option<Arc<dyn VectorStore>>,
    pub cache_store: Option<Arc<dyn CacheStore>>,
}

impl ContextComponents {
    /// Адаптеры по конфигурации: Qdrant/Redis только если задан URL
    pub fn from_config(config: &ServiceConfig) -> Result<Self> {
        let vector_store = match config.vector_store.url.as_deref() {
            Some(url) => Some(Arc::new(QdrantStore::new(
                url,
                &config.vector_store,
                config.index.metric,
            )?) as Arc<dyn VectorStore>),
            None => None,
        };
        let cache_store = match config.cache_store.url.as_deref() {
            Some(url) => Some(
                Arc::new(RedisCacheStore::new(url, &config.cache_store)?) as Arc<dyn CacheStore>
            ),
            None => None,
        };

        Ok(Self {
            loader: Arc::new(ConfiguredModelLoader::new(config.embedding.clone())),
            corpus: Arc::new(JsonDirCorpus::new(&config.corpus.dir)),
            vector_store,
            cache_store,
        })
    }
}

/// Владелец всех синглтонов процесса: модель, индекс, кэш, gate, coordinator.
///
/// Создаётся один раз при старте и передаётся по ссылке обработчикам запросов.
pub struct ServiceContext {
    pub config: ServiceConfig,
    pub embedding: Arc<EmbeddingService>,
    pub index: Arc<VectorIndex>,
    pub cache: Arc<QueryCache>,
    pub vector_store: Option<Arc<dyn VectorStore>>,
    pub cache_store: Option<Arc<dyn CacheStore>>,
    pub gate: Arc<ReadinessGate>,
    pub coordinator: Arc<RetrievalCoordinator>,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl ServiceContext {
    pub fn from_config(config: ServiceConfig) -> Result<Self> {
        let components = ContextComponents::from_config(&config)?;
        Ok(Self::assemble(config, components))
    }

    pub fn assemble(config: ServiceConfig, components: ContextComponents) -> Self {
        let embedding = Arc::new(EmbeddingService::new(components.loader, &config.embedding));
        let index = Arc::new(VectorIndex::new(
            config.embedding.dimension,
            config.index.clone(),
        ));
        let cache = Arc::new(QueryCache::new(config.cache.capacity, config.cache.ttl()));

        let mut probes: Vec<Arc<dyn DependencyProbe>> = Vec::new();
        if let Some(store) = &components.vector_store {
            probes.push(Arc::new(VectorStoreProbe(Arc::clone(store))));
        }
        if let Some(store) = &components.cache_store {
            probes.push(Arc::new(CacheStoreProbe(Arc::clone(store))));
        }
        let gate = Arc::new(ReadinessGate::new(
            config.readiness.clone(),
            probes,
            Arc::clone(&embedding),
        ));

        let coordinator = Arc::new(RetrievalCoordinator::new(CoordinatorParts {
            gate: Arc::clone(&gate),
            embedding: Arc::clone(&embedding),
            index: Arc::clone(&index),
            cache: Arc::clone(&cache),
            cache_store: components.cache_store.clone(),
            vector_store: components.vector_store.clone(),
            corpus: components.corpus,
            cache_ttl: config.cache.ttl(),
        }));

        Self {
            config,
            embedding,
            index,
            cache,
            vector_store: components.vector_store,
            cache_store: components.cache_store,
            gate,
            coordinator,
            sweeper: Mutex::new(None),
        }
    }

    /// Readiness Gate → первое построение индекса → фоновая очистка кэша
    pub async fn start(&self) -> Result<RebuildReport, RetrievalFailure> {
        self.gate.run().await?;
        let report = self.coordinator.rebuild_corpus().await?;

        if self.config.cache.sweep_interval_secs > 0 {
            let handle = self
                .cache
                .spawn_sweeper(Duration::from_secs(self.config.cache.sweep_interval_secs));
            if let Some(previous) = self.sweeper.lock().replace(handle) {
                previous.abort();
            }
        }

        info!(
            passages = report.passages,
            fingerprint = %report.fingerprint,
            "🚀 Retrieval pipeline started"
        );
        Ok(report)
    }

    pub fn shutdown(&self) {
        if let Some(handle) = self.sweeper.lock().take() {
            handle.abort();
        }
        let stats = self.coordinator.stats();
        info!(
            requests = stats.requests,
            local_hits = stats.local_hits,
            computations = stats.computations,
            failures = stats.failures,
            "Retrieval pipeline stopped"
        );
    }
}

impl Drop for ServiceContext {
    fn drop(&mut self) {
        if let Some(handle) = self.sweeper.get_mut().take() {
            handle.abort();
        }
    }
}
