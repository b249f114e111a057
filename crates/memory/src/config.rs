//! Конфигурация сервиса
//!
//! Источники по возрастанию приоритета:
//! - встроенные значения по умолчанию
//! - TOML файл (`--config` или `oracle.toml` в рабочей директории)
//! - переменные окружения `ORACLE_*` (`.env` подгружается через dotenv)
//! - флаги командной строки (применяет cli)

use crate::cache_store::RedisConfig;
use crate::readiness::ReadinessConfig;
use crate::vector_index::{IndexConfig, SearchBackend, SimilarityMetric};
use crate::vector_store::QdrantConfig;
use ai::{EmbeddingBackend, EmbeddingConfig};
use anyhow::{Context, Result};
use common::LoggingConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

pub const DEFAULT_CONFIG_FILE: &str = "oracle.toml";
pub const ENV_PREFIX: &str = "ORACLE_";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub ttl_secs: u64,
    pub capacity: usize,
    /// 0 = только ленивое истечение
    pub sweep_interval_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 86_400,
            capacity: 1024,
            sweep_interval_secs: 60,
        }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CorpusConfig {
    pub dir: PathBuf,
}

impl Default for CorpusConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("data/cards"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    pub default_top_k: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self { default_top_k: 3 }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub embedding: EmbeddingConfig,
    pub index: IndexConfig,
    pub cache: CacheConfig,
    pub readiness: ReadinessConfig,
    pub vector_store: QdrantConfig,
    pub cache_store: RedisConfig,
    pub corpus: CorpusConfig,
    pub retrieval: RetrievalConfig,
    pub logging: LoggingConfig,
}

impl ServiceConfig {
    /// Defaults → TOML → `.env` + `ORACLE_*`
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => {
                let default_path = Path::new(DEFAULT_CONFIG_FILE);
                if default_path.is_file() {
                    Self::from_file(default_path)?
                } else {
                    Self::default()
                }
            }
        };

        dotenv::dotenv().ok();
        config.apply_env_overrides(std::env::vars())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        let config = Self::from_toml(&content)
            .with_context(|| format!("Invalid config {}", path.display()))?;
        debug!(path = %path.display(), "Configuration file loaded");
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Применить переменные `ORACLE_*`; остальные игнорируются
    pub fn apply_env_overrides<I>(&mut self, vars: I) -> Result<()>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (key, value) in vars {
            let Some(name) = key.strip_prefix(ENV_PREFIX) else {
                continue;
            };
            self.apply_env_var(name, &value)
                .with_context(|| format!("Invalid value for {key}: {value:?}"))?;
        }
        Ok(())
    }

    fn apply_env_var(&mut self, name: &str, value: &str) -> Result<()> {
        match name.to_uppercase().as_str() {
            "EMBEDDING_BACKEND" => {
                self.embedding.backend = match value.to_lowercase().as_str() {
                    "onnx" => EmbeddingBackend::Onnx,
                    "hashing" => EmbeddingBackend::Hashing,
                    other => anyhow::bail!("unknown embedding backend '{other}'"),
                }
            }
            "MODEL_NAME" => self.embedding.model_name = value.to_string(),
            "MODEL_REPO" => self.embedding.model_repo = value.to_string(),
            "MODELS_DIR" => self.embedding.models_dir = PathBuf::from(value),
            "EMBEDDING_DIMENSION" => self.embedding.dimension = value.parse()?,
            "AUTO_DOWNLOAD" => self.embedding.auto_download = parse_bool(value)?,
            "METRIC" => {
                self.index.metric = match value.to_lowercase().as_str() {
                    "cosine" => SimilarityMetric::Cosine,
                    "dot" => SimilarityMetric::Dot,
                    other => anyhow::bail!("unknown metric '{other}'"),
                }
            }
            "SEARCH_BACKEND" => {
                self.index.backend = match value.to_lowercase().as_str() {
                    "local" => SearchBackend::Local,
                    "qdrant" => SearchBackend::Qdrant,
                    other => anyhow::bail!("unknown search backend '{other}'"),
                }
            }
            "MIN_SCORE" => {
                self.index.min_score = if value.is_empty() {
                    None
                } else {
                    Some(value.parse()?)
                }
            }
            "MAX_TOP_K" => self.index.max_top_k = value.parse()?,
            "CACHE_TTL_SECS" => self.cache.ttl_secs = value.parse()?,
            "CACHE_CAPACITY" => self.cache.capacity = value.parse()?,
            "CACHE_SWEEP_INTERVAL_SECS" => self.cache.sweep_interval_secs = value.parse()?,
            "PROBE_INTERVAL_SECS" => self.readiness.probe_interval_secs = value.parse()?,
            "PROBE_TIMEOUT_SECS" => self.readiness.probe_timeout_secs = value.parse()?,
            "MODEL_TIMEOUT_SECS" => self.readiness.model_timeout_secs = value.parse()?,
            "QDRANT_URL" => self.vector_store.url = non_empty(value),
            "QDRANT_COLLECTION" => self.vector_store.collection = value.to_string(),
            "QDRANT_API_KEY" => self.vector_store.api_key = non_empty(value),
            "REDIS_URL" => self.cache_store.url = non_empty(value),
            "REDIS_NAMESPACE" => self.cache_store.namespace = value.to_string(),
            "CORPUS_DIR" => self.corpus.dir = PathBuf::from(value),
            "DEFAULT_TOP_K" => self.retrieval.default_top_k = value.parse()?,
            "LOG_LEVEL" => self.logging.level = value.to_lowercase(),
            "LOG_JSON" => self.logging.json_output = parse_bool(value)?,
            _ => debug!(variable = name, "Unknown ORACLE_ variable ignored"),
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        self.embedding
            .validate()
            .map_err(|e| anyhow::anyhow!("embedding: {e}"))?;

        if self.cache.ttl_secs == 0 {
            anyhow::bail!("cache.ttl_secs must be greater than 0");
        }
        if self.cache.capacity == 0 {
            anyhow::bail!("cache.capacity must be greater than 0");
        }
        if self.index.max_top_k == 0 {
            anyhow::bail!("index.max_top_k must be greater than 0");
        }
        if self.retrieval.default_top_k == 0 {
            anyhow::bail!("retrieval.default_top_k must be greater than 0");
        }
        if self.readiness.probe_interval_secs == 0 {
            anyhow::bail!("readiness.probe_interval_secs must be greater than 0");
        }
        if self.readiness.probe_interval_secs > self.readiness.probe_timeout_secs {
            anyhow::bail!(
                "readiness.probe_interval_secs ({}) exceeds probe_timeout_secs ({})",
                self.readiness.probe_interval_secs,
                self.readiness.probe_timeout_secs
            );
        }
        if self.readiness.model_timeout_secs == 0 {
            anyhow::bail!("readiness.model_timeout_secs must be greater than 0");
        }
        if let Some(min_score) = self.index.min_score {
            if !min_score.is_finite() {
                anyhow::bail!("index.min_score must be a finite number");
            }
        }
        if self.index.backend == SearchBackend::Qdrant && self.vector_store.url.is_none() {
            anyhow::bail!("index.backend = \"qdrant\" requires vector_store.url");
        }
        Ok(())
    }
}

fn parse_bool(value: &str) -> Result<bool> {
    match value.to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => anyhow::bail!("expected a boolean, got '{other}'"),
    }
}

fn non_empty(value: &str) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}
