use super::{log_shutdown, start_context};
use crate::protocol::Response;
use anyhow::{Context, Result};
use clap::Args;
use memory::ServiceConfig;

#[derive(Debug, Args)]
pub struct QueryArgs {
    /// Вопрос или название карты
    pub text: String,

    /// Количество результатов (по умолчанию из конфигурации)
    #[arg(short = 'k', long)]
    pub top_k: Option<usize>,
}

pub async fn run(config: ServiceConfig, args: QueryArgs) -> Result<()> {
    let top_k = args.top_k.unwrap_or(config.retrieval.default_top_k);
    let (context, _) = start_context(config).await?;

    let outcome = context.coordinator.retrieve(&args.text, top_k).await;
    log_shutdown(&context);

    let results = outcome.context("Query failed")?;
    let response = Response::Ok {
        id: None,
        query: args.text,
        top_k,
        results,
    };
    println!(
        "{}",
        serde_json::to_string_pretty(&response).context("Failed to serialize results")?
    );
    Ok(())
}
