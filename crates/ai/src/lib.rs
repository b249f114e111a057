pub mod config;
pub mod embeddings;
pub mod embeddings_hashing;
pub mod errors;
pub mod model_downloader;
pub mod models;

#[cfg(feature = "onnx")]
pub mod embeddings_cpu;

#[cfg(feature = "onnx")]
pub mod ort_setup;

#[cfg(feature = "onnx")]
pub mod tokenization;

pub use config::{EmbeddingBackend, EmbeddingConfig};
pub use embeddings::{truncate_chars, Embedder, EmbeddingService, EmbeddingStats};
pub use embeddings_hashing::HashingEmbedder;
pub use errors::AiError;
pub use model_downloader::ModelDownloader;
pub use models::{ConfiguredModelLoader, ModelLoader};

#[cfg(feature = "onnx")]
pub use embeddings_cpu::OnnxSentenceEmbedder;

pub type Result<T> = std::result::Result<T, AiError>;
