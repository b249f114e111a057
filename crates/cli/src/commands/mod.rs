pub mod probe;
pub mod query;
pub mod rebuild;
pub mod serve;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use common::PipelineError;
use memory::{ReadinessState, RebuildReport, ServiceConfig, ServiceContext};
use std::path::PathBuf;
use tracing::{error, info};

#[derive(Debug, Parser)]
#[command(name = "oracle")]
#[command(about = "[☾] Oracle - семантический поиск по толкованиям карт")]
#[command(version)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Command,
}

/// Флаги, перекрывающие файл конфигурации и `ORACLE_*`
#[derive(Debug, Args)]
pub struct GlobalArgs {
    /// Путь к TOML конфигурации (по умолчанию ./oracle.toml)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Каталог с JSON файлами карт
    #[arg(long, global = true)]
    pub corpus_dir: Option<PathBuf>,

    /// Уровень логирования (error/warn/info/debug/trace)
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    /// Логи в JSON (stderr)
    #[arg(long, global = true)]
    pub log_json: bool,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// [►] Обслуживать запросы со stdin, ответы JSON строками в stdout
    Serve(serve::ServeArgs),
    /// [●] Один запрос: старт, поиск, вывод JSON
    Query(query::QueryArgs),
    /// [↻] Перестроить индекс из корпуса и вывести отчёт
    Rebuild,
    /// [♦] Проверить доступность Qdrant/Redis
    Probe(probe::ProbeArgs),
}

/// Gate не пропустил трафик; отдельный тип ради кода выхода
#[derive(Debug, thiserror::Error)]
#[error("Readiness gate failed: {0}")]
pub struct GateFailed(pub PipelineError);

impl Cli {
    pub async fn run(self) -> Result<()> {
        let config = self.global.load_config()?;
        common::init_structured_logging(&config.logging)
            .context("Failed to initialize logging")?;

        match self.command {
            Command::Serve(args) => serve::run(config, args).await,
            Command::Query(args) => query::run(config, args).await,
            Command::Rebuild => rebuild::run(config).await,
            Command::Probe(args) => probe::run(config, args).await,
        }
    }
}

impl GlobalArgs {
    fn load_config(&self) -> Result<ServiceConfig> {
        let mut config =
            ServiceConfig::load(self.config.as_deref()).context("Failed to load configuration")?;

        if let Some(dir) = &self.corpus_dir {
            config.corpus.dir = dir.clone();
        }
        if let Some(level) = &self.log_level {
            config.logging.level = level.to_lowercase();
        }
        if self.log_json {
            config.logging.json_output = true;
        }
        config.validate()?;
        Ok(config)
    }
}

/// Собрать контекст и пройти старт: gate → первое построение индекса
pub async fn start_context(config: ServiceConfig) -> Result<(ServiceContext, RebuildReport)> {
    let context = ServiceContext::from_config(config)?;

    match context.start().await {
        Ok(report) => Ok((context, report)),
        Err(failure) if context.gate.state() == ReadinessState::Failed => {
            error!(code = failure.code(), "Readiness gate failed: {}", failure.cause());
            Err(GateFailed(failure.into_cause()).into())
        }
        Err(failure) => {
            error!(code = failure.code(), "Startup failed: {}", failure.cause());
            Err(anyhow::Error::new(failure).context("Startup failed"))
        }
    }
}

pub(crate) fn log_shutdown(context: &ServiceContext) {
    context.shutdown();
    info!("👋 Shutdown complete");
}
