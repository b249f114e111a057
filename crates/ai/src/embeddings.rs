use crate::models::ModelLoader;
use crate::{AiError, EmbeddingConfig};
use common::{PipelineError, PipelineResult};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{debug, info};

/// Синхронная модель эмбеддингов.
///
/// Реализации детерминированы: одинаковый текст на одной модели даёт
/// одинаковый вектор длины `dimension()`.
pub trait Embedder: Send + Sync {
    fn model_id(&self) -> &str;

    fn dimension(&self) -> usize;

    fn embed(&self, text: &str) -> Result<Vec<f32>, AiError>;

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, AiError> {
        texts.iter().map(|t| self.embed(t)).collect()
    }
}

#[derive(Debug, Clone, Default)]
pub struct EmbeddingStats {
    pub inferences: u64,
    pub model_loads: u64,
}

/// Общий для процесса сервис эмбеддингов.
///
/// Модель материализуется не более одного раза: конкурентные вызовы
/// `materialize` ждут одну загрузку, а ошибка загрузки запоминается и
/// возвращается всем последующим вызовам.
pub struct EmbeddingService {
    loader: Arc<dyn ModelLoader>,
    model: OnceCell<PipelineResult<Arc<dyn Embedder>>>,
    max_input_chars: usize,
    inferences: AtomicU64,
    model_loads: AtomicU64,
}

impl EmbeddingService {
    pub fn new(loader: Arc<dyn ModelLoader>, config: &EmbeddingConfig) -> Self {
        Self {
            loader,
            model: OnceCell::new(),
            max_input_chars: config.max_input_chars,
            inferences: AtomicU64::new(0),
            model_loads: AtomicU64::new(0),
        }
    }

    /// Загрузить модель (или вернуть уже загруженную)
    pub async fn materialize(&self) -> PipelineResult<Arc<dyn Embedder>> {
        self.model
            .get_or_init(|| async {
                self.model_loads.fetch_add(1, Ordering::Relaxed);
                let result = self.loader.load().await.map_err(PipelineError::from);
                match &result {
                    Ok(model) => info!(
                        model = model.model_id(),
                        dimension = model.dimension(),
                        "✅ Embedding model materialized"
                    ),
                    Err(e) => tracing::error!(error = %e, "Embedding model failed to materialize"),
                }
                result
            })
            .await
            .clone()
    }

    pub fn is_materialized(&self) -> bool {
        matches!(self.model.get(), Some(Ok(_)))
    }

    /// Размерность загруженной модели
    pub fn dimension(&self) -> Option<usize> {
        match self.model.get() {
            Some(Ok(model)) => Some(model.dimension()),
            _ => None,
        }
    }

    /// Вектор для одного текста.
    ///
    /// Пустой текст отклоняется, слишком длинный обрезается по границе символа.
    /// Инференс выполняется вне async runtime.
    pub async fn embed(&self, text: &str) -> PipelineResult<Vec<f32>> {
        if text.trim().is_empty() {
            return Err(PipelineError::InvalidQuery("text must not be empty".into()));
        }
        let model = self.materialize().await?;
        let input = truncate_chars(text, self.max_input_chars).to_string();
        if input.len() < text.len() {
            debug!(
                from = text.chars().count(),
                to = self.max_input_chars,
                "Input truncated before embedding"
            );
        }

        self.inferences.fetch_add(1, Ordering::Relaxed);
        let worker = Arc::clone(&model);
        let vector = tokio::task::spawn_blocking(move || worker.embed(&input))
            .await
            .map_err(|e| PipelineError::EmbeddingFailure(format!("embedding task failed: {e}")))??;

        check_dimension(model.dimension(), &vector)?;
        Ok(vector)
    }

    /// Векторы для набора текстов (перестройка корпуса)
    pub async fn embed_batch(&self, texts: &[String]) -> PipelineResult<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        if let Some(pos) = texts.iter().position(|t| t.trim().is_empty()) {
            return Err(PipelineError::InvalidQuery(format!(
                "text #{pos} in batch is empty"
            )));
        }
        let model = self.materialize().await?;
        let inputs: Vec<String> = texts
            .iter()
            .map(|t| truncate_chars(t, self.max_input_chars).to_string())
            .collect();

        self.inferences
            .fetch_add(inputs.len() as u64, Ordering::Relaxed);
        let worker = Arc::clone(&model);
        let vectors = tokio::task::spawn_blocking(move || worker.embed_batch(&inputs))
            .await
            .map_err(|e| PipelineError::EmbeddingFailure(format!("embedding task failed: {e}")))??;

        if vectors.len() != texts.len() {
            return Err(PipelineError::EmbeddingFailure(format!(
                "model returned {} vectors for {} texts",
                vectors.len(),
                texts.len()
            )));
        }
        for vector in &vectors {
            check_dimension(model.dimension(), vector)?;
        }
        Ok(vectors)
    }

    /// Количество текстов, отправленных в модель
    pub fn inference_count(&self) -> u64 {
        self.inferences.load(Ordering::Relaxed)
    }

    pub fn stats(&self) -> EmbeddingStats {
        EmbeddingStats {
            inferences: self.inferences.load(Ordering::Relaxed),
            model_loads: self.model_loads.load(Ordering::Relaxed),
        }
    }
}

fn check_dimension(expected: usize, vector: &[f32]) -> PipelineResult<()> {
    if vector.len() != expected {
        return Err(PipelineError::DimensionMismatch {
            expected,
            actual: vector.len(),
        });
    }
    Ok(())
}

/// Префикс из не более чем `max_chars` символов
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
