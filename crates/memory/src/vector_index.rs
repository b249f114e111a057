use crate::types::{Passage, ScoredId};
use chrono::{DateTime, Utc};
use common::{PipelineError, PipelineResult};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

/// Метрика сходства запроса и пассажа
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SimilarityMetric {
    #[default]
    Cosine,
    Dot,
}

impl SimilarityMetric {
    pub fn score(&self, a: &[f32], b: &[f32]) -> f32 {
        let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
        match self {
            SimilarityMetric::Dot => dot,
            SimilarityMetric::Cosine => {
                let na = a.iter().map(|x| x * x).sum::<f32>().sqrt();
                let nb = b.iter().map(|x| x * x).sum::<f32>().sqrt();
                if na == 0.0 || nb == 0.0 {
                    0.0
                } else {
                    dot / (na * nb)
                }
            }
        }
    }
}

/// Где выполняется поиск ближайших пассажей
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SearchBackend {
    /// In-process снапшот
    #[default]
    Local,
    /// Зеркало корпуса в Qdrant; при ошибке поиск уходит в локальный снапшот
    Qdrant,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    pub metric: SimilarityMetric,
    pub backend: SearchBackend,
    /// Результаты ниже порога отбрасываются после ранжирования
    pub min_score: Option<f32>,
    /// Верхняя граница top_k для одного запроса
    pub max_top_k: usize,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            metric: SimilarityMetric::Cosine,
            backend: SearchBackend::Local,
            min_score: None,
            max_top_k: 50,
        }
    }
}

/// Полностью построенный, неизменяемый индекс
#[derive(Debug)]
pub struct IndexSnapshot {
    passages: Vec<Arc<Passage>>,
    positions: HashMap<String, usize>,
    dimension: usize,
    fingerprint: String,
    built_at: DateTime<Utc>,
}

impl IndexSnapshot {
    fn new(passages: Vec<Passage>, dimension: usize) -> PipelineResult<Self> {
        let mut positions = HashMap::with_capacity(passages.len());
        let mut hasher = Sha256::new();
        hasher.update(dimension.to_le_bytes());

        for (pos, passage) in passages.iter().enumerate() {
            if passage.embedding.len() != dimension {
                return Err(PipelineError::DimensionMismatch {
                    expected: dimension,
                    actual: passage.embedding.len(),
                });
            }
            if positions.insert(passage.id.clone(), pos).is_some() {
                return Err(PipelineError::Corpus(format!(
                    "duplicate passage id {}",
                    passage.id
                )));
            }
            hasher.update(passage.id.as_bytes());
            hasher.update([0u8]);
            hasher.update(passage.text.as_bytes());
            hasher.update([0u8]);
        }

        Ok(Self {
            passages: passages.into_iter().map(Arc::new).collect(),
            positions,
            dimension,
            fingerprint: format!("{:x}", hasher.finalize()),
            built_at: Utc::now(),
        })
    }

    pub fn get(&self, id: &str) -> Option<&Arc<Passage>> {
        self.positions.get(id).map(|&pos| &self.passages[pos])
    }

    pub fn passages(&self) -> &[Arc<Passage>] {
        &self.passages
    }

    pub fn len(&self) -> usize {
        self.passages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.passages.is_empty()
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// SHA-256 по id и текстам пассажей; меняется при любой перестройке корпуса
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    pub fn built_at(&self) -> DateTime<Utc> {
        self.built_at
    }

    /// Brute-force поиск по всем пассажам.
    ///
    /// Сортировка стабильная: при равных score выше тот, кто раньше в корпусе.
    pub fn search(
        &self,
        query: &[f32],
        top_k: usize,
        metric: SimilarityMetric,
        min_score: Option<f32>,
    ) -> PipelineResult<Vec<ScoredId>> {
        if query.len() != self.dimension {
            return Err(PipelineError::DimensionMismatch {
                expected: self.dimension,
                actual: query.len(),
            });
        }
        if self.passages.is_empty() || top_k == 0 {
            return Ok(Vec::new());
        }

        let mut scored: Vec<(usize, f32)> = self
            .passages
            .iter()
            .enumerate()
            .map(|(pos, p)| (pos, metric.score(query, &p.embedding)))
            .collect();
        scored.sort_by(|a, b| b.1.total_cmp(&a.1));

        Ok(scored
            .into_iter()
            .take(top_k.min(self.passages.len()))
            .filter(|(_, score)| min_score.map_or(true, |min| *score >= min))
            .map(|(pos, score)| ScoredId {
                id: self.passages[pos].id.clone(),
                score,
            })
            .collect())
    }
}

/// Векторный индекс с атомарной заменой снапшота.
///
/// Читатели берут `Arc` на текущий снапшот и ищут без блокировок;
/// перестройка собирает новый снапшот целиком и только потом подменяет указатель.
pub struct VectorIndex {
    current: RwLock<Option<Arc<IndexSnapshot>>>,
    dimension: usize,
    config: IndexConfig,
    searches: AtomicU64,
    builds: AtomicU64,
}

impl VectorIndex {
    pub fn new(dimension: usize, config: IndexConfig) -> Self {
        Self {
            current: RwLock::new(None),
            dimension,
            config,
            searches: AtomicU64::new(0),
            builds: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &IndexConfig {
        &self.config
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Первое построение индекса
    pub fn build(&self, passages: Vec<Passage>) -> PipelineResult<Arc<IndexSnapshot>> {
        self.rebuild(passages)
    }

    /// Построить новый снапшот и атомарно подменить текущий.
    ///
    /// При ошибке текущий снапшот остаётся на месте.
    pub fn rebuild(&self, passages: Vec<Passage>) -> PipelineResult<Arc<IndexSnapshot>> {
        let snapshot = Arc::new(IndexSnapshot::new(passages, self.dimension)?);

        let previous = self.current.write().replace(Arc::clone(&snapshot));
        self.builds.fetch_add(1, Ordering::Relaxed);

        info!(
            passages = snapshot.len(),
            fingerprint = %&snapshot.fingerprint()[..12],
            previous = ?previous.as_ref().map(|s| s.len()),
            "🔄 Vector index swapped"
        );
        Ok(snapshot)
    }

    pub fn snapshot(&self) -> PipelineResult<Arc<IndexSnapshot>> {
        self.current
            .read()
            .as_ref()
            .cloned()
            .ok_or(PipelineError::IndexNotReady)
    }

    pub fn is_built(&self) -> bool {
        self.current.read().is_some()
    }

    pub fn search(&self, query: &[f32], top_k: usize) -> PipelineResult<Vec<ScoredId>> {
        let snapshot = self.snapshot()?;
        self.search_in(&snapshot, query, top_k)
    }

    /// Поиск в уже взятом снапшоте (тот же, по которому потом резолвятся id)
    pub fn search_in(
        &self,
        snapshot: &IndexSnapshot,
        query: &[f32],
        top_k: usize,
    ) -> PipelineResult<Vec<ScoredId>> {
        self.searches.fetch_add(1, Ordering::Relaxed);
        let results = snapshot.search(query, top_k, self.config.metric, self.config.min_score)?;
        debug!(top_k, hits = results.len(), "Index search");
        Ok(results)
    }

    pub fn search_count(&self) -> u64 {
        self.searches.load(Ordering::Relaxed)
    }

    pub fn build_count(&self) -> u64 {
        self.builds.load(Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        self.current.read().as_ref().map_or(0, |s| s.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
