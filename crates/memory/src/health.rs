use crate::cache_store::CacheStore;
use crate::retry::poll_until;
use crate::vector_store::VectorStore;
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Лёгкая проверка живости внешней зависимости
#[async_trait]
pub trait DependencyProbe: Send + Sync {
    fn name(&self) -> &str;

    async fn check(&self) -> Result<()>;
}

pub struct VectorStoreProbe(pub Arc<dyn VectorStore>);

#[async_trait]
impl DependencyProbe for VectorStoreProbe {
    fn name(&self) -> &str {
        self.0.name()
    }

    async fn check(&self) -> Result<()> {
        self.0.healthcheck().await
    }
}

pub struct CacheStoreProbe(pub Arc<dyn CacheStore>);

#[async_trait]
impl DependencyProbe for CacheStoreProbe {
    fn name(&self) -> &str {
        self.0.name()
    }

    async fn check(&self) -> Result<()> {
        self.0.healthcheck().await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
}

/// Итог ожидания одной зависимости
#[derive(Debug, Clone, Serialize)]
pub struct ProbeReport {
    pub dependency: String,
    pub status: HealthStatus,
    pub attempts: u32,
    pub elapsed_ms: u64,
    pub last_error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl ProbeReport {
    pub fn is_healthy(&self) -> bool {
        self.status == HealthStatus::Healthy
    }
}

/// Опросить все зависимости параллельно, каждую до успеха или дедлайна
pub async fn probe_all(
    probes: &[Arc<dyn DependencyProbe>],
    interval: Duration,
    deadline: Duration,
) -> Vec<ProbeReport> {
    let attempt_floor = Duration::from_secs(1).min(deadline);
    let checks = probes.iter().map(|probe| {
        let probe = Arc::clone(probe);
        async move {
            let name = probe.name().to_string();
            let outcome = poll_until(&name, interval, deadline, attempt_floor, || {
                let probe = Arc::clone(&probe);
                async move { probe.check().await }
            })
            .await;

            ProbeReport {
                dependency: name,
                status: if outcome.succeeded {
                    HealthStatus::Healthy
                } else {
                    HealthStatus::Unhealthy
                },
                attempts: outcome.attempts,
                elapsed_ms: outcome.elapsed_ms,
                last_error: outcome.last_error,
                timestamp: Utc::now(),
            }
        }
    });
    futures::future::join_all(checks).await
}
