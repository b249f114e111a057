use super::{log_shutdown, start_context};
use crate::protocol::Response;
use anyhow::{Context, Result};
use memory::ServiceConfig;

/// Старт сам строит индекс из корпуса (и зеркалит его в Qdrant), отчёт этой сборки и печатаем
pub async fn run(config: ServiceConfig) -> Result<()> {
    let (context, report) = start_context(config).await?;
    log_shutdown(&context);

    println!(
        "{}",
        serde_json::to_string_pretty(&Response::Rebuilt { report })
            .context("Failed to serialize rebuild report")?
    );
    Ok(())
}
