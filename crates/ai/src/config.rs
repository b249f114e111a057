use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Какой backend превращает текст в вектор
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingBackend {
    /// Sentence-transformer модель через ONNX Runtime
    Onnx,
    /// Детерминированный feature hashing, без модели (offline/тесты)
    Hashing,
}

impl Default for EmbeddingBackend {
    fn default() -> Self {
        if cfg!(feature = "onnx") {
            EmbeddingBackend::Onnx
        } else {
            EmbeddingBackend::Hashing
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub backend: EmbeddingBackend,
    /// Model name (directory name in models_dir)
    pub model_name: String,
    /// Hugging Face repository the model files are fetched from
    pub model_repo: String,
    /// Persistent model cache across restarts
    pub models_dir: PathBuf,
    /// Embedding dimension D
    pub dimension: usize,
    /// Maximum sequence length in tokens (tokenizer truncation)
    pub max_length: usize,
    /// Входной текст длиннее этого числа символов обрезается
    pub max_input_chars: usize,
    /// ONNX intra-op threads
    pub intra_threads: usize,
    /// Скачивать модель при отсутствии в models_dir
    pub auto_download: bool,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            backend: EmbeddingBackend::default(),
            model_name: "all-MiniLM-L6-v2".to_string(),
            model_repo: "sentence-transformers/all-MiniLM-L6-v2".to_string(),
            models_dir: PathBuf::from("models"),
            dimension: 384,
            max_length: 256,
            max_input_chars: 2048,
            intra_threads: num_cpus::get().min(4),
            auto_download: true,
        }
    }
}

impl EmbeddingConfig {
    /// Конфигурация без модели: hashing backend заданной размерности
    pub fn hashing(dimension: usize) -> Self {
        Self {
            backend: EmbeddingBackend::Hashing,
            model_name: format!("hashing-{dimension}"),
            dimension,
            auto_download: false,
            ..Self::default()
        }
    }

    pub fn model_dir(&self) -> PathBuf {
        self.models_dir.join(&self.model_name)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.dimension == 0 {
            return Err("embedding.dimension must be greater than 0".to_string());
        }
        if self.max_length == 0 {
            return Err("embedding.max_length must be greater than 0".to_string());
        }
        if self.max_input_chars == 0 {
            return Err("embedding.max_input_chars must be greater than 0".to_string());
        }
        if self.model_name.trim().is_empty() {
            return Err("embedding.model_name must not be empty".to_string());
        }
        Ok(())
    }
}
