pub mod errors;
pub mod structured_logging;

pub use errors::{PipelineError, PipelineResult, RetrievalFailure};

pub use structured_logging::{
    init_structured_logging,
    LoggingConfig,
    StructuredLogEntry,
    ExecutionContext,
    OperationTimer,
    RequestContext,
};
