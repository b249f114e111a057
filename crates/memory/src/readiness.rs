use crate::health::{probe_all, DependencyProbe, ProbeReport};
use ai::EmbeddingService;
use common::{OperationTimer, PipelineError, PipelineResult};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, OnceCell};
use tracing::{error, info};

/// Состояние стартовой последовательности
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReadinessState {
    Starting,
    ProbingDependencies,
    MaterializingModel,
    Ready,
    Failed,
}

impl ReadinessState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ReadinessState::Ready | ReadinessState::Failed)
    }
}

impl fmt::Display for ReadinessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ReadinessState::Starting => "STARTING",
            ReadinessState::ProbingDependencies => "PROBING_DEPENDENCIES",
            ReadinessState::MaterializingModel => "MATERIALIZING_MODEL",
            ReadinessState::Ready => "READY",
            ReadinessState::Failed => "FAILED",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReadinessConfig {
    pub probe_interval_secs: u64,
    pub probe_timeout_secs: u64,
    pub model_timeout_secs: u64,
}

impl Default for ReadinessConfig {
    fn default() -> Self {
        Self {
            probe_interval_secs: 1,
            probe_timeout_secs: 90,
            model_timeout_secs: 600,
        }
    }
}

impl ReadinessConfig {
    pub fn probe_interval(&self) -> Duration {
        Duration::from_secs(self.probe_interval_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }

    pub fn model_timeout(&self) -> Duration {
        Duration::from_secs(self.model_timeout_secs)
    }
}

/// Readiness Gate: STARTING → PROBING_DEPENDENCIES → MATERIALIZING_MODEL → READY.
///
/// Любой шаг, превысивший бюджет времени, переводит gate в FAILED.
/// Последовательность выполняется один раз за время жизни процесса:
/// повторный `run` возвращает исход первого.
pub struct ReadinessGate {
    config: ReadinessConfig,
    probes: Vec<Arc<dyn DependencyProbe>>,
    embedding: Arc<EmbeddingService>,
    state_tx: watch::Sender<ReadinessState>,
    outcome: OnceCell<PipelineResult<()>>,
    reports: RwLock<Vec<ProbeReport>>,
    failure: RwLock<Option<PipelineError>>,
}

impl ReadinessGate {
    pub fn new(
        config: ReadinessConfig,
        probes: Vec<Arc<dyn DependencyProbe>>,
        embedding: Arc<EmbeddingService>,
    ) -> Self {
        let (state_tx, _) = watch::channel(ReadinessState::Starting);
        Self {
            config,
            probes,
            embedding,
            state_tx,
            outcome: OnceCell::new(),
            reports: RwLock::new(Vec::new()),
            failure: RwLock::new(None),
        }
    }

    pub fn state(&self) -> ReadinessState {
        *self.state_tx.borrow()
    }

    pub fn is_ready(&self) -> bool {
        self.state() == ReadinessState::Ready
    }

    pub fn subscribe(&self) -> watch::Receiver<ReadinessState> {
        self.state_tx.subscribe()
    }

    /// Причина FAILED, если gate завершился ошибкой
    pub fn failure_reason(&self) -> Option<PipelineError> {
        self.failure.read().clone()
    }

    pub fn probe_reports(&self) -> Vec<ProbeReport> {
        self.reports.read().clone()
    }

    /// Ошибка для запроса, пришедшего до READY
    pub fn not_ready_error(&self) -> PipelineError {
        match self.failure_reason() {
            Some(e @ PipelineError::DependencyUnavailable { .. }) => e,
            _ => PipelineError::ServiceNotReady {
                state: self.state().to_string(),
            },
        }
    }

    pub async fn run(&self) -> PipelineResult<()> {
        self.outcome.get_or_init(|| self.run_once()).await.clone()
    }

    async fn run_once(&self) -> PipelineResult<()> {
        let timer = OperationTimer::new("readiness_gate");
        let result = self.run_phases().await;
        match &result {
            Ok(()) => {
                self.transition(ReadinessState::Ready);
                info!("✅ Readiness gate passed, service is READY");
            }
            Err(e) => {
                *self.failure.write() = Some(e.clone());
                self.transition(ReadinessState::Failed);
                error!(error = %e, "❌ Readiness gate FAILED");
            }
        }
        timer.finish_with_result(&result);
        result
    }

    async fn run_phases(&self) -> PipelineResult<()> {
        self.transition(ReadinessState::ProbingDependencies);
        self.probe_dependencies().await?;

        self.transition(ReadinessState::MaterializingModel);
        self.materialize_model().await
    }

    async fn probe_dependencies(&self) -> PipelineResult<()> {
        if self.probes.is_empty() {
            info!("No external dependencies configured, skipping probes");
            return Ok(());
        }

        info!(
            dependencies = self.probes.len(),
            timeout_secs = self.config.probe_timeout_secs,
            "🔍 Probing dependencies"
        );
        let reports = probe_all(
            &self.probes,
            self.config.probe_interval(),
            self.config.probe_timeout(),
        )
        .await;

        let failed = reports.iter().find(|r| !r.is_healthy()).map(|r| {
            PipelineError::dependency(
                r.dependency.clone(),
                r.last_error
                    .clone()
                    .unwrap_or_else(|| "no response before deadline".to_string()),
            )
        });
        *self.reports.write() = reports;

        match failed {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    async fn materialize_model(&self) -> PipelineResult<()> {
        let budget = self.config.model_timeout();
        match tokio::time::timeout(budget, self.embedding.materialize()).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(PipelineError::ModelUnavailable(format!(
                "model materialization exceeded {budget:?}"
            ))),
        }
    }

    fn transition(&self, next: ReadinessState) {
        let previous = self.state_tx.send_replace(next);
        if previous != next {
            info!(from = %previous, to = %next, "Readiness state changed");
        }
    }
}
