use crate::cache_store::{CacheStore, RemoteCacheValue};
use crate::corpus::CorpusSource;
use crate::query_cache::{CachedResult, QueryCache};
use crate::readiness::ReadinessGate;
use crate::retry::RetryManager;
use crate::single_flight::{FlightRole, SingleFlight};
use crate::types::{Passage, QueryKey, RankedPassage, ScoredId};
use crate::vector_index::{IndexSnapshot, SearchBackend, VectorIndex};
use crate::vector_store::VectorStore;
use ai::EmbeddingService;
use chrono::Utc;
use common::{OperationTimer, PipelineError, PipelineResult, RequestContext, RetrievalFailure};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, info_span, warn, Instrument};

/// Итог перестройки корпуса
#[derive(Debug, Clone, Serialize)]
pub struct RebuildReport {
    pub passages: usize,
    pub duration_ms: u64,
    pub fingerprint: String,
    pub invalidated_entries: usize,
    pub mirrored: bool,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CoordinatorStats {
    pub requests: u64,
    pub local_hits: u64,
    pub remote_hits: u64,
    pub computations: u64,
    pub shared_results: u64,
    pub failures: u64,
    pub rebuilds: u64,
}

#[derive(Default)]
struct Counters {
    requests: AtomicU64,
    local_hits: AtomicU64,
    remote_hits: AtomicU64,
    computations: AtomicU64,
    shared_results: AtomicU64,
    failures: AtomicU64,
    rebuilds: AtomicU64,
}

/// Всё, что нужно вычислению внутри single-flight задачи
struct Pipeline {
    embedding: Arc<EmbeddingService>,
    index: Arc<VectorIndex>,
    cache: Arc<QueryCache>,
    cache_store: Option<Arc<dyn CacheStore>>,
    vector_store: Option<Arc<dyn VectorStore>>,
    cache_ttl: Duration,
    counters: Counters,
}

impl Pipeline {
    /// Локальный кэш; запись от другого снапшота считается промахом
    fn local_lookup(&self, cache_key: &str, fingerprint: &str) -> Option<CachedResult> {
        self.cache
            .get(cache_key)
            .map(|entry| entry.value)
            .filter(|value| value.fingerprint == fingerprint)
    }

    /// Попадание в remote кэш вместе с остатком его TTL
    async fn remote_lookup(
        &self,
        cache_key: &str,
        fingerprint: &str,
    ) -> Option<(CachedResult, Duration)> {
        let store = self.cache_store.as_ref()?;
        let value = match store.get(cache_key).await {
            Ok(Some(value)) if value.fingerprint == fingerprint => value,
            Ok(_) => return None,
            Err(e) => {
                warn!(error = %e, "Cache store unavailable, treating as miss");
                return None;
            }
        };

        // Запись из будущего (рассинхрон часов) считается только что созданной
        let age = Utc::now()
            .signed_duration_since(value.created_at)
            .to_std()
            .unwrap_or(Duration::ZERO);
        let remaining = self.cache_ttl.saturating_sub(age);
        if remaining.is_zero() {
            debug!(age_secs = age.as_secs(), "Cache store entry expired");
            return None;
        }

        let hit = CachedResult {
            results: Arc::new(value.results),
            fingerprint: value.fingerprint,
        };
        Some((hit, remaining))
    }

    async fn remote_store(&self, cache_key: &str, value: &CachedResult) {
        let Some(store) = self.cache_store.as_ref() else {
            return;
        };
        let payload = RemoteCacheValue {
            results: value.results.as_ref().clone(),
            fingerprint: value.fingerprint.clone(),
            created_at: Utc::now(),
        };
        let result = RetryManager::for_cache_store()
            .retry("cache_store_set", || store.set(cache_key, &payload, self.cache_ttl))
            .await;
        if let Err(e) = result {
            warn!(error = %e, "Cache store write skipped");
        }
    }

    /// Поиск соседей; при backend = qdrant ответ Qdrant сверяется со снапшотом
    async fn search(
        &self,
        snapshot: &IndexSnapshot,
        vector: &[f32],
        top_k: usize,
    ) -> PipelineResult<Vec<ScoredId>> {
        let config = self.index.config();
        if config.backend == SearchBackend::Qdrant {
            if let Some(store) = &self.vector_store {
                match store.search(vector, top_k).await {
                    Ok(hits) => {
                        let results: Vec<ScoredId> = hits
                            .into_iter()
                            .filter(|hit| snapshot.get(&hit.id).is_some())
                            .filter(|hit| config.min_score.map_or(true, |min| hit.score >= min))
                            .take(top_k)
                            .collect();
                        debug!(top_k, hits = results.len(), "Vector store search");
                        return Ok(results);
                    }
                    Err(e) => {
                        warn!(error = %e, "Vector store search failed, using local index");
                    }
                }
            }
        }
        self.index.search_in(snapshot, vector, top_k)
    }

    /// Промах локального кэша: remote → embed → search → заполнить оба кэша
    async fn compute(
        self: Arc<Self>,
        snapshot: Arc<IndexSnapshot>,
        key: QueryKey,
    ) -> PipelineResult<CachedResult> {
        let cache_key = key.cache_key();
        let fingerprint = snapshot.fingerprint().to_string();

        // Лидер мог стартовать сразу после того, как предыдущий лидер заполнил кэш
        if let Some(hit) = self.local_lookup(&cache_key, &fingerprint) {
            return Ok(hit);
        }

        if let Some((hit, remaining)) = self.remote_lookup(&cache_key, &fingerprint).await {
            self.counters.remote_hits.fetch_add(1, Ordering::Relaxed);
            // локальная копия живёт не дольше remote записи
            self.cache.put(&cache_key, hit.clone(), remaining);
            debug!(remaining_secs = remaining.as_secs(), "Cache store hit");
            return Ok(hit);
        }

        self.counters.computations.fetch_add(1, Ordering::Relaxed);
        let vector = self.embedding.embed(&key.normalized).await?;
        let results = self.search(&snapshot, &vector, key.top_k).await?;

        let value = CachedResult {
            results: Arc::new(results),
            fingerprint,
        };
        self.cache.put(&cache_key, value.clone(), self.cache_ttl);

        // Результат отдаётся ожидающим сразу, запись в Redis идёт фоном
        if self.cache_store.is_some() {
            let pipeline = Arc::clone(&self);
            let stored = value.clone();
            tokio::spawn(
                async move { pipeline.remote_store(&cache_key, &stored).await }
                    .instrument(info_span!("cache_store_write")),
            );
        }
        Ok(value)
    }
}

/// Retrieval Coordinator: cache → single-flight(embed → search) → cache.
///
/// Принимает работу только после того, как Readiness Gate дошёл до READY.
pub struct RetrievalCoordinator {
    pipeline: Arc<Pipeline>,
    gate: Arc<ReadinessGate>,
    corpus: Arc<dyn CorpusSource>,
    vector_store: Option<Arc<dyn VectorStore>>,
    flights: SingleFlight<PipelineResult<CachedResult>>,
    rebuild_lock: tokio::sync::Mutex<()>,
}

pub struct CoordinatorParts {
    pub gate: Arc<ReadinessGate>,
    pub embedding: Arc<EmbeddingService>,
    pub index: Arc<VectorIndex>,
    pub cache: Arc<QueryCache>,
    pub cache_store: Option<Arc<dyn CacheStore>>,
    pub vector_store: Option<Arc<dyn VectorStore>>,
    pub corpus: Arc<dyn CorpusSource>,
    pub cache_ttl: Duration,
}

impl RetrievalCoordinator {
    pub fn new(parts: CoordinatorParts) -> Self {
        Self {
            pipeline: Arc::new(Pipeline {
                embedding: parts.embedding,
                index: parts.index,
                cache: parts.cache,
                cache_store: parts.cache_store,
                vector_store: parts.vector_store.clone(),
                cache_ttl: parts.cache_ttl,
                counters: Counters::default(),
            }),
            gate: parts.gate,
            corpus: parts.corpus,
            vector_store: parts.vector_store,
            flights: SingleFlight::new(),
            rebuild_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Ранжированные пассажи для запроса.
    ///
    /// Пустой список - нормальный результат; ошибка всегда несёт исходную причину.
    pub async fn retrieve(
        &self,
        raw_query: &str,
        top_k: usize,
    ) -> Result<Vec<RankedPassage>, RetrievalFailure> {
        let ctx = RequestContext::new();
        let span = info_span!("retrieve", request_id = %ctx.request_id, top_k);
        self.pipeline.counters.requests.fetch_add(1, Ordering::Relaxed);

        let result = self.retrieve_inner(raw_query, top_k).instrument(span).await;
        match &result {
            Ok(passages) => debug!(
                request_id = %ctx.request_id,
                query_len = raw_query.len(),
                hits = passages.len(),
                duration_ms = ctx.elapsed_ms(),
                "Retrieve completed"
            ),
            Err(e) => {
                self.pipeline.counters.failures.fetch_add(1, Ordering::Relaxed);
                warn!(
                    request_id = %ctx.request_id,
                    code = e.code(),
                    error = %e,
                    duration_ms = ctx.elapsed_ms(),
                    "Retrieve failed"
                );
            }
        }
        result.map_err(RetrievalFailure::from)
    }

    async fn retrieve_inner(
        &self,
        raw_query: &str,
        top_k: usize,
    ) -> PipelineResult<Vec<RankedPassage>> {
        if !self.gate.is_ready() {
            return Err(self.gate.not_ready_error());
        }

        let key = QueryKey::new(raw_query, top_k.min(self.pipeline.index.config().max_top_k));
        if key.normalized.is_empty() {
            return Err(PipelineError::InvalidQuery("query must not be empty".into()));
        }
        if key.top_k == 0 {
            return Ok(Vec::new());
        }

        let snapshot = self.pipeline.index.snapshot()?;
        let cache_key = key.cache_key();

        if let Some(hit) = self.pipeline.local_lookup(&cache_key, snapshot.fingerprint()) {
            self.pipeline.counters.local_hits.fetch_add(1, Ordering::Relaxed);
            debug!("Query cache hit");
            return self.resolve(&hit);
        }

        // Снапшот в ключе: запросы после rebuild не присоединяются к старому вычислению
        let flight_key = format!("{}:{}", snapshot.fingerprint(), cache_key);
        let pipeline = Arc::clone(&self.pipeline);
        let (outcome, role) = self
            .flights
            .run(&flight_key, move || pipeline.compute(snapshot, key))
            .await
            .map_err(|e| PipelineError::EmbeddingFailure(e.to_string()))?;

        if role == FlightRole::Follower {
            self.pipeline
                .counters
                .shared_results
                .fetch_add(1, Ordering::Relaxed);
        }
        let value = outcome?;
        self.resolve(&value)
    }

    /// Id → пассажи текущего корпуса; исчезнувшие id отбрасываются
    fn resolve(&self, value: &CachedResult) -> PipelineResult<Vec<RankedPassage>> {
        let current = self.pipeline.index.snapshot()?;
        let mut ranked = Vec::with_capacity(value.results.len());
        for scored in value.results.iter() {
            match current.get(&scored.id) {
                Some(passage) => ranked.push(RankedPassage::new(passage, scored.score)),
                None => debug!(id = %scored.id, "Dropping cached id missing from corpus"),
            }
        }
        Ok(ranked)
    }

    /// Перечитать корпус, пересчитать эмбеддинги и атомарно подменить индекс.
    ///
    /// Перестройки выполняются по одной; при ошибке продолжает работать старый индекс.
    pub async fn rebuild_corpus(&self) -> Result<RebuildReport, RetrievalFailure> {
        if !self.gate.is_ready() {
            return Err(self.gate.not_ready_error().into());
        }
        let _guard = self.rebuild_lock.lock().await;

        let mut timer = OperationTimer::new("corpus_rebuild");
        timer.add_field("source", self.corpus.describe());
        let result = self.rebuild_inner().await;
        if let Ok(report) = &result {
            timer.add_field("passages", report.passages);
        }
        let duration_ms = timer.finish_with_result(&result);
        result
            .map(|report| RebuildReport {
                duration_ms,
                ..report
            })
            .map_err(RetrievalFailure::from)
    }

    async fn rebuild_inner(&self) -> PipelineResult<RebuildReport> {
        info!(source = %self.corpus.describe(), "🔄 Rebuilding corpus");
        let records = self
            .corpus
            .load()
            .await
            .map_err(|e| PipelineError::Corpus(format!("{e:#}")))?;

        let texts: Vec<String> = records.iter().map(|r| r.text.clone()).collect();
        let vectors = self.pipeline.embedding.embed_batch(&texts).await?;
        let passages: Vec<Passage> = records
            .into_iter()
            .zip(vectors)
            .map(|(record, vector)| Passage::from_record(record, vector))
            .collect();

        let mirrored = self.mirror_to_vector_store(&passages).await?;
        let snapshot = self.pipeline.index.rebuild(passages)?;
        self.pipeline.counters.rebuilds.fetch_add(1, Ordering::Relaxed);

        let invalidated_entries = self.pipeline.cache.invalidate_all();
        if let Some(store) = &self.pipeline.cache_store {
            if let Err(e) = store.clear_namespace().await {
                warn!(error = %e, "Cache store namespace not cleared");
            }
        }

        Ok(RebuildReport {
            passages: snapshot.len(),
            duration_ms: 0,
            fingerprint: snapshot.fingerprint().to_string(),
            invalidated_entries,
            mirrored,
        })
    }

    async fn mirror_to_vector_store(&self, passages: &[Passage]) -> PipelineResult<bool> {
        let Some(store) = &self.vector_store else {
            return Ok(false);
        };
        let dimension = self.pipeline.index.dimension();
        let retry = RetryManager::for_vector_store();
        retry
            .retry("vector_store_recreate", || store.recreate(dimension))
            .await
            .map_err(|e| PipelineError::dependency(store.name(), e))?;
        retry
            .retry("vector_store_upsert", || store.upsert(passages))
            .await
            .map_err(|e| PipelineError::dependency(store.name(), e))?;
        info!(points = passages.len(), "Corpus mirrored to vector store");
        Ok(true)
    }

    pub fn gate(&self) -> &Arc<ReadinessGate> {
        &self.gate
    }

    pub fn index(&self) -> &Arc<VectorIndex> {
        &self.pipeline.index
    }

    pub fn cache(&self) -> &Arc<QueryCache> {
        &self.pipeline.cache
    }

    pub fn in_flight(&self) -> usize {
        self.flights.in_flight()
    }

    pub fn stats(&self) -> CoordinatorStats {
        let c = &self.pipeline.counters;
        CoordinatorStats {
            requests: c.requests.load(Ordering::Relaxed),
            local_hits: c.local_hits.load(Ordering::Relaxed),
            remote_hits: c.remote_hits.load(Ordering::Relaxed),
            computations: c.computations.load(Ordering::Relaxed),
            shared_results: c.shared_results.load(Ordering::Relaxed),
            failures: c.failures.load(Ordering::Relaxed),
            rebuilds: c.rebuilds.load(Ordering::Relaxed),
        }
    }
}
