use ai::{ConfiguredModelLoader, EmbeddingConfig, EmbeddingService};
use common::PipelineError;
use std::sync::Arc;

fn cosine(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

fn hashing_service(dimension: usize) -> EmbeddingService {
    let config = EmbeddingConfig::hashing(dimension);
    EmbeddingService::new(Arc::new(ConfiguredModelLoader::new(config.clone())), &config)
}

#[tokio::test]
async fn test_same_text_same_vector() {
    let service = hashing_service(384);
    let a = service.embed("Trust the dark moon").await.expect("embed");
    let b = service.embed("Trust the dark moon").await.expect("embed");
    assert_eq!(a, b);
    assert_eq!(a.len(), 384);
}

#[tokio::test]
async fn test_overlap_ranks_above_disjoint() {
    let service = hashing_service(384);
    let query = service.embed("new beginnings").await.expect("embed");
    let a = service.embed("new moon").await.expect("embed");
    let b = service.embed("new beginnings").await.expect("embed");
    let c = service.embed("completely unrelated text").await.expect("embed");

    let (sa, sb, sc) = (cosine(&query, &a), cosine(&query, &b), cosine(&query, &c));
    assert!(sb > sa, "exact text must score highest: {sb} vs {sa}");
    assert!(sa > sc, "shared word must beat disjoint text: {sa} vs {sc}");
}

#[tokio::test]
async fn test_long_input_is_truncated_not_rejected() {
    let config = EmbeddingConfig {
        max_input_chars: 16,
        ..EmbeddingConfig::hashing(64)
    };
    let service = EmbeddingService::new(Arc::new(ConfiguredModelLoader::new(config.clone())), &config);

    let long = "moon ".repeat(1000);
    let truncated = service.embed(&long).await.expect("embed");
    let prefix = service.embed(&long[..16]).await.expect("embed");
    assert_eq!(truncated, prefix);
}

#[tokio::test]
async fn test_empty_input_rejected() {
    let service = hashing_service(64);
    let err = service.embed("").await.err().expect("must fail");
    assert!(matches!(err, PipelineError::InvalidQuery(_)));
    assert_eq!(service.stats().model_loads, 0);
}
