use common::PipelineError;
use std::fmt;

#[derive(Debug)]
pub enum AiError {
    /// Model loading error
    ModelLoadError(String),
    /// Model not found error
    ModelNotFound(String),
    /// Inference error
    InferenceError(String),
    /// Tokenization error
    TokenizerError(String),
    /// Input validation error
    ValidationError(String),
    /// IO error
    IoError(std::io::Error),
    /// Network error (model download)
    NetworkError(String),
}

impl fmt::Display for AiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AiError::ModelLoadError(msg) => write!(f, "Model load error: {}", msg),
            AiError::ModelNotFound(msg) => write!(f, "Model not found: {}", msg),
            AiError::InferenceError(msg) => write!(f, "Inference error: {}", msg),
            AiError::TokenizerError(msg) => write!(f, "Tokenizer error: {}", msg),
            AiError::ValidationError(msg) => write!(f, "Validation error: {}", msg),
            AiError::IoError(e) => write!(f, "IO error: {}", e),
            AiError::NetworkError(msg) => write!(f, "Network error: {}", msg),
        }
    }
}

impl std::error::Error for AiError {}

impl From<std::io::Error> for AiError {
    fn from(e: std::io::Error) -> Self {
        AiError::IoError(e)
    }
}

#[cfg(feature = "onnx")]
impl From<tokenizers::Error> for AiError {
    fn from(e: tokenizers::Error) -> Self {
        AiError::TokenizerError(e.to_string())
    }
}

impl AiError {
    /// Ошибки загрузки модели делают сервис бесполезным, остальные относятся к запросу
    pub fn is_model_unavailable(&self) -> bool {
        matches!(
            self,
            AiError::ModelLoadError(_)
                | AiError::ModelNotFound(_)
                | AiError::IoError(_)
                | AiError::NetworkError(_)
        )
    }
}

impl From<AiError> for PipelineError {
    fn from(e: AiError) -> Self {
        if e.is_model_unavailable() {
            PipelineError::ModelUnavailable(e.to_string())
        } else {
            PipelineError::EmbeddingFailure(e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mapping_into_pipeline_errors() {
        let load: PipelineError = AiError::ModelNotFound("models/x".into()).into();
        assert!(matches!(load, PipelineError::ModelUnavailable(_)));

        let infer: PipelineError = AiError::InferenceError("nan".into()).into();
        assert!(matches!(infer, PipelineError::EmbeddingFailure(_)));

        let tok: PipelineError = AiError::TokenizerError("bad encoding".into()).into();
        assert!(matches!(tok, PipelineError::EmbeddingFailure(_)));
    }
}
