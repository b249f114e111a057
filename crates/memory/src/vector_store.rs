use crate::types::{Passage, ScoredId};
use crate::vector_index::SimilarityMetric;
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

/// Внешнее векторное хранилище
#[async_trait]
pub trait VectorStore: Send + Sync {
    fn name(&self) -> &str;

    /// Лёгкая проверка живости для Readiness Gate
    async fn healthcheck(&self) -> Result<()>;

    /// Пересоздать коллекцию под заданную размерность
    async fn recreate(&self, dimension: usize) -> Result<()>;

    async fn upsert(&self, passages: &[Passage]) -> Result<()>;

    async fn search(&self, vector: &[f32], top_k: usize) -> Result<Vec<ScoredId>>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QdrantConfig {
    /// Например `http://localhost:6333`; пусто = vector store не используется
    pub url: Option<String>,
    pub collection: String,
    pub api_key: Option<String>,
    pub timeout_secs: u64,
    pub upsert_batch: usize,
}

impl Default for QdrantConfig {
    fn default() -> Self {
        Self {
            url: None,
            collection: "oracle_passages".to_string(),
            api_key: None,
            timeout_secs: 5,
            upsert_batch: 64,
        }
    }
}

/// Qdrant через REST API
pub struct QdrantStore {
    client: reqwest::Client,
    base_url: String,
    collection: String,
    distance: SimilarityMetric,
    upsert_batch: usize,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    result: Vec<SearchHit>,
}

#[derive(Debug, Deserialize)]
struct SearchHit {
    score: f32,
    #[serde(default)]
    payload: Option<HitPayload>,
}

#[derive(Debug, Deserialize)]
struct HitPayload {
    passage_id: String,
}

/// Стабильный UUID точки для строкового id пассажа
pub fn point_id(passage_id: &str) -> Uuid {
    Uuid::new_v5(&Uuid::NAMESPACE_OID, passage_id.as_bytes())
}

impl QdrantStore {
    pub fn new(base_url: &str, config: &QdrantConfig, distance: SimilarityMetric) -> Result<Self> {
        let mut headers = reqwest::header::HeaderMap::new();
        if let Some(key) = config.api_key.as_deref().filter(|k| !k.is_empty()) {
            let value = reqwest::header::HeaderValue::from_str(key)
                .context("Invalid Qdrant API key")?;
            headers.insert("api-key", value);
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .connect_timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .default_headers(headers)
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            collection: config.collection.clone(),
            distance,
            upsert_batch: config.upsert_batch.max(1),
        })
    }

    fn collection_url(&self) -> String {
        format!("{}/collections/{}", self.base_url, self.collection)
    }

    fn distance_name(&self) -> &'static str {
        match self.distance {
            SimilarityMetric::Cosine => "Cosine",
            SimilarityMetric::Dot => "Dot",
        }
    }
}

async fn ensure_success(response: reqwest::Response, what: &str) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    anyhow::bail!("Qdrant {} failed: HTTP {} {}", what, status, body)
}

#[async_trait]
impl VectorStore for QdrantStore {
    fn name(&self) -> &str {
        "vector_store"
    }

    async fn healthcheck(&self) -> Result<()> {
        let response = self
            .client
            .get(format!("{}/healthz", self.base_url))
            .send()
            .await
            .context("Qdrant is unreachable")?;
        ensure_success(response, "healthcheck").await?;
        Ok(())
    }

    async fn recreate(&self, dimension: usize) -> Result<()> {
        let response = self
            .client
            .delete(self.collection_url())
            .send()
            .await
            .context("Qdrant delete collection request failed")?;
        if response.status() != StatusCode::NOT_FOUND {
            ensure_success(response, "delete collection").await?;
        }

        let body = json!({
            "vectors": { "size": dimension, "distance": self.distance_name() }
        });
        let response = self
            .client
            .put(self.collection_url())
            .json(&body)
            .send()
            .await
            .context("Qdrant create collection request failed")?;
        ensure_success(response, "create collection").await?;

        info!(
            collection = %self.collection,
            dimension,
            distance = self.distance_name(),
            "Qdrant collection recreated"
        );
        Ok(())
    }

    async fn upsert(&self, passages: &[Passage]) -> Result<()> {
        for chunk in passages.chunks(self.upsert_batch) {
            let points: Vec<_> = chunk
                .iter()
                .map(|p| {
                    json!({
                        "id": point_id(&p.id).to_string(),
                        "vector": p.embedding,
                        "payload": {
                            "passage_id": p.id,
                            "card_id": p.card_id,
                            "category": p.category,
                            "text": p.text,
                        }
                    })
                })
                .collect();

            let response = self
                .client
                .put(format!("{}/points?wait=true", self.collection_url()))
                .json(&json!({ "points": points }))
                .send()
                .await
                .context("Qdrant upsert request failed")?;
            ensure_success(response, "upsert").await?;
            debug!(points = chunk.len(), "Qdrant upsert batch");
        }
        Ok(())
    }

    async fn search(&self, vector: &[f32], top_k: usize) -> Result<Vec<ScoredId>> {
        if top_k == 0 {
            return Ok(Vec::new());
        }
        let response = self
            .client
            .post(format!("{}/points/search", self.collection_url()))
            .json(&json!({
                "vector": vector,
                "limit": top_k,
                "with_payload": true,
            }))
            .send()
            .await
            .context("Qdrant search request failed")?;
        let response = ensure_success(response, "search").await?;
        let parsed: SearchResponse = response
            .json()
            .await
            .context("Invalid Qdrant search response")?;

        Ok(parsed
            .result
            .into_iter()
            .filter_map(|hit| {
                hit.payload.map(|p| ScoredId {
                    id: p.passage_id,
                    score: hit.score,
                })
            })
            .collect())
    }
}
