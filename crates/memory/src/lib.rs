pub mod cache_store;
pub mod config;
pub mod context;
pub mod corpus;
pub mod health;
pub mod query_cache;
pub mod readiness;
pub mod retrieval;
pub mod retry;
pub mod single_flight;
mod types;
pub mod vector_index;
pub mod vector_store;

// Основные компоненты retrieval pipeline
pub use config::{CacheConfig, CorpusConfig, RetrievalConfig, ServiceConfig};
pub use context::{ContextComponents, ServiceContext};
pub use corpus::{parse_corpus_json, CorpusSource, JsonDirCorpus, StaticCorpus};
pub use query_cache::{CacheEntry, CacheStats, CachedResult, QueryCache};
pub use retrieval::{CoordinatorParts, CoordinatorStats, RebuildReport, RetrievalCoordinator};
pub use single_flight::{FlightAborted, FlightRole, SingleFlight};
pub use types::{normalize_query, Passage, PassageRecord, QueryKey, RankedPassage, ScoredId};
pub use vector_index::{IndexConfig, IndexSnapshot, SearchBackend, SimilarityMetric, VectorIndex};

// Readiness и внешние зависимости
pub use cache_store::{namespaced_key, CacheStore, RedisCacheStore, RedisConfig, RemoteCacheValue};
pub use health::{probe_all, CacheStoreProbe, DependencyProbe, HealthStatus, ProbeReport, VectorStoreProbe};
pub use readiness::{ReadinessConfig, ReadinessGate, ReadinessState};
pub use retry::{poll_until, PollOutcome, RetryConfig, RetryManager};
pub use vector_store::{point_id, QdrantConfig, QdrantStore, VectorStore};
