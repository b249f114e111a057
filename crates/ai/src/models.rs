use crate::embeddings::Embedder;
use crate::embeddings_hashing::HashingEmbedder;
use crate::{AiError, EmbeddingBackend, EmbeddingConfig};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

/// Источник модели эмбеддингов для `EmbeddingService`
#[async_trait]
pub trait ModelLoader: Send + Sync {
    async fn load(&self) -> Result<Arc<dyn Embedder>, AiError>;
}

/// Загрузчик по `EmbeddingConfig`: hashing backend или ONNX модель
/// из `models_dir` (с докачкой при `auto_download`).
pub struct ConfiguredModelLoader {
    config: EmbeddingConfig,
}

impl ConfiguredModelLoader {
    pub fn new(config: EmbeddingConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl ModelLoader for ConfiguredModelLoader {
    async fn load(&self) -> Result<Arc<dyn Embedder>, AiError> {
        match self.config.backend {
            EmbeddingBackend::Hashing => {
                info!(dimension = self.config.dimension, "Using hashing embedder");
                Ok(Arc::new(HashingEmbedder::new(self.config.dimension)))
            }
            EmbeddingBackend::Onnx => load_onnx(&self.config).await,
        }
    }
}

#[cfg(feature = "onnx")]
async fn load_onnx(config: &EmbeddingConfig) -> Result<Arc<dyn Embedder>, AiError> {
    use crate::embeddings_cpu::OnnxSentenceEmbedder;
    use crate::model_downloader::ModelDownloader;

    let model_dir = if config.auto_download {
        let downloader = ModelDownloader::new(&config.models_dir)
            .map_err(|e| AiError::NetworkError(e.to_string()))?;
        downloader
            .ensure_model(&config.model_name, &config.model_repo)
            .await
            .map_err(|e| AiError::NetworkError(e.to_string()))?
    } else {
        let dir = config.model_dir();
        if !dir.join("model.onnx").exists() {
            return Err(AiError::ModelNotFound(dir.display().to_string()));
        }
        dir
    };

    let model_name = config.model_name.clone();
    let dimension = config.dimension;
    let max_length = config.max_length;
    let intra_threads = config.intra_threads;
    let embedder = tokio::task::spawn_blocking(move || {
        OnnxSentenceEmbedder::load(&model_dir, &model_name, dimension, max_length, intra_threads)
    })
    .await
    .map_err(|e| AiError::ModelLoadError(format!("load task failed: {e}")))??;

    Ok(Arc::new(embedder))
}

#[cfg(not(feature = "onnx"))]
async fn load_onnx(_config: &EmbeddingConfig) -> Result<Arc<dyn Embedder>, AiError> {
    Err(AiError::ModelLoadError(
        "ONNX backend requested but the crate was built without the `onnx` feature".into(),
    ))
}
