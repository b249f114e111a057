use thiserror::Error;

/// Иерархия ошибок retrieval pipeline
///
/// Все варианты `Clone`: результат одного вычисления (single-flight)
/// раздаётся всем ожидающим запросам.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PipelineError {
    // === Startup / зависимости ===

    #[error("Dependency unavailable: {service} ({reason})")]
    DependencyUnavailable { service: String, reason: String },

    #[error("Service not ready (state: {state})")]
    ServiceNotReady { state: String },

    // === AI/ML specific ===

    #[error("Embedding model unavailable: {0}")]
    ModelUnavailable(String),

    #[error("Embedding failed: {0}")]
    EmbeddingFailure(String),

    #[error("Invalid dimensions: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    // === Index ===

    #[error("Vector index not ready: no corpus has been built yet")]
    IndexNotReady,

    // === Вход / корпус ===

    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    #[error("Corpus error: {0}")]
    Corpus(String),
}

impl PipelineError {
    pub fn dependency(service: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        PipelineError::DependencyUnavailable {
            service: service.into(),
            reason: reason.to_string(),
        }
    }

    /// "Сервис не готов" в отличие от "ничего не найдено"
    pub fn is_not_ready(&self) -> bool {
        matches!(
            self,
            PipelineError::ServiceNotReady { .. }
                | PipelineError::DependencyUnavailable { .. }
                | PipelineError::IndexNotReady
        )
    }

    /// Стабильный код для внешнего слоя (HTTP/CLI)
    pub fn code(&self) -> &'static str {
        match self {
            PipelineError::DependencyUnavailable { .. } => "dependency_unavailable",
            PipelineError::ServiceNotReady { .. } => "service_not_ready",
            PipelineError::ModelUnavailable(_) => "model_unavailable",
            PipelineError::EmbeddingFailure(_) => "embedding_failure",
            PipelineError::DimensionMismatch { .. } => "dimension_mismatch",
            PipelineError::IndexNotReady => "index_not_ready",
            PipelineError::InvalidQuery(_) => "invalid_query",
            PipelineError::Corpus(_) => "corpus_error",
        }
    }
}

pub type PipelineResult<T> = Result<T, PipelineError>;

/// Caller-facing ошибка `retrieve`: оборачивает исходную причину без изменений
#[derive(Error, Debug, Clone, PartialEq)]
#[error("Retrieval failed: {cause}")]
pub struct RetrievalFailure {
    #[source]
    cause: PipelineError,
}

impl RetrievalFailure {
    pub fn new(cause: PipelineError) -> Self {
        Self { cause }
    }

    pub fn cause(&self) -> &PipelineError {
        &self.cause
    }

    pub fn into_cause(self) -> PipelineError {
        self.cause
    }

    pub fn is_not_ready(&self) -> bool {
        self.cause.is_not_ready()
    }

    pub fn code(&self) -> &'static str {
        self.cause.code()
    }
}

impl From<PipelineError> for RetrievalFailure {
    fn from(cause: PipelineError) -> Self {
        Self::new(cause)
    }
}
