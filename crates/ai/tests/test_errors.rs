use ai::AiError;
use common::PipelineError;
use std::io;

#[test]
fn test_ai_error_model_not_found() {
    let error = AiError::ModelNotFound("all-MiniLM-L6-v2".to_string());
    assert_eq!(format!("{}", error), "Model not found: all-MiniLM-L6-v2");
    assert!(error.is_model_unavailable());
}

#[test]
fn test_ai_error_inference_error() {
    let error = AiError::InferenceError("output tensor missing".to_string());
    assert_eq!(format!("{}", error), "Inference error: output tensor missing");
    assert!(!error.is_model_unavailable());
}

#[test]
fn test_io_error_conversion() {
    let io_err = io::Error::new(io::ErrorKind::NotFound, "tokenizer.json");
    let error: AiError = io_err.into();
    assert!(format!("{}", error).starts_with("IO error:"));

    let pipeline: PipelineError = error.into();
    assert_eq!(pipeline.code(), "model_unavailable");
}

#[test]
fn test_validation_error_is_embedding_failure() {
    let pipeline: PipelineError = AiError::ValidationError("empty".to_string()).into();
    assert_eq!(pipeline.code(), "embedding_failure");
}
