use super::GateFailed;
use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use common::PipelineError;
use memory::{
    probe_all, CacheStoreProbe, ContextComponents, DependencyProbe, ProbeReport, ServiceConfig,
    VectorStoreProbe,
};
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Args)]
pub struct ProbeArgs {
    /// Отчёты одной JSON строкой вместо таблицы
    #[arg(long)]
    pub json: bool,
}

/// Только пробы зависимостей, без загрузки модели
pub async fn run(config: ServiceConfig, args: ProbeArgs) -> Result<()> {
    let components = ContextComponents::from_config(&config)?;

    let mut probes: Vec<Arc<dyn DependencyProbe>> = Vec::new();
    if let Some(store) = components.vector_store {
        probes.push(Arc::new(VectorStoreProbe(store)));
    }
    if let Some(store) = components.cache_store {
        probes.push(Arc::new(CacheStoreProbe(store)));
    }

    info!(dependencies = probes.len(), "🔍 Probing dependencies");
    let reports = probe_all(
        &probes,
        config.readiness.probe_interval(),
        config.readiness.probe_timeout(),
    )
    .await;

    if args.json {
        println!(
            "{}",
            serde_json::to_string(&reports).context("Failed to serialize probe reports")?
        );
    } else {
        print_reports(&reports);
    }

    match reports.iter().find(|r| !r.is_healthy()) {
        Some(report) => Err(GateFailed(PipelineError::dependency(
            report.dependency.clone(),
            report.last_error.as_deref().unwrap_or("unreachable"),
        ))
        .into()),
        None => Ok(()),
    }
}

fn print_reports(reports: &[ProbeReport]) {
    println!("{}", "=== Dependency Probes ===".bright_blue().bold());
    if reports.is_empty() {
        println!("{}", "No external dependencies configured".dimmed());
        return;
    }

    for report in reports {
        let icon = if report.is_healthy() {
            "✓".green()
        } else {
            "✗".red()
        };
        println!(
            "{} {:<14} attempts: {:<3} {}ms",
            icon,
            report.dependency.bold(),
            report.attempts,
            report.elapsed_ms
        );
        if let (false, Some(error)) = (report.is_healthy(), &report.last_error) {
            println!("    {}", error.yellow());
        }
    }
}
