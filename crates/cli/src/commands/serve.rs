use super::{log_shutdown, start_context};
use crate::protocol::{Request, Response};
use anyhow::{Context, Result};
use clap::Args;
use memory::{ServiceConfig, ServiceContext};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::{mpsc, Semaphore};
use tracing::{debug, info, warn};

#[derive(Debug, Args)]
pub struct ServeArgs {
    /// Сколько запросов обрабатывается одновременно
    #[arg(short, long, default_value_t = 4)]
    pub workers: usize,
}

pub async fn run(config: ServiceConfig, args: ServeArgs) -> Result<()> {
    let default_top_k = config.retrieval.default_top_k;
    let (context, report) = start_context(config).await?;
    let context = Arc::new(context);
    let workers = args.workers.max(1);
    info!(
        workers,
        passages = report.passages,
        "📡 Serving requests from stdin"
    );

    let (responses, rx) = mpsc::unbounded_channel::<Response>();
    let writer = tokio::spawn(write_responses(rx));
    let pool = Arc::new(Semaphore::new(workers));

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        let line = tokio::select! {
            _ = &mut shutdown => {
                info!("Ctrl-C received, draining in-flight requests");
                break;
            }
            line = lines.next_line() => line.context("Failed to read stdin")?,
        };
        let Some(line) = line else {
            debug!("stdin closed");
            break;
        };

        let request = match Request::parse(&line, default_top_k) {
            Ok(Some(request)) => request,
            Ok(None) => continue,
            Err(e) => {
                let _ = responses.send(Response::invalid_request(format!("{e:#}")));
                continue;
            }
        };

        // нет свободного обработчика - stdin не читаем
        let permit = Arc::clone(&pool)
            .acquire_owned()
            .await
            .context("Worker pool closed")?;
        let context = Arc::clone(&context);
        let responses = responses.clone();
        tokio::spawn(async move {
            let response = handle(&context, request).await;
            let _ = responses.send(response);
            drop(permit);
        });
    }

    // все permits вернулись = in-flight запросы отвечены
    let _drained = pool
        .acquire_many(workers as u32)
        .await
        .context("Worker pool closed")?;
    drop(responses);
    writer
        .await
        .context("Response writer panicked")?
        .context("Failed to write to stdout")?;

    log_shutdown(&context);
    Ok(())
}

async fn handle(context: &ServiceContext, request: Request) -> Response {
    match request {
        Request::Query { id, query, top_k } => {
            match context.coordinator.retrieve(&query, top_k).await {
                Ok(results) => Response::Ok {
                    id,
                    query,
                    top_k,
                    results,
                },
                Err(failure) => {
                    warn!(code = failure.code(), "Request failed: {}", failure.cause());
                    Response::failure(id, &failure)
                }
            }
        }
        Request::Rebuild => match context.coordinator.rebuild_corpus().await {
            Ok(report) => Response::Rebuilt { report },
            Err(failure) => {
                warn!(code = failure.code(), "Rebuild failed: {}", failure.cause());
                Response::failure(None, &failure)
            }
        },
    }
}

async fn write_responses(mut rx: mpsc::UnboundedReceiver<Response>) -> std::io::Result<()> {
    let mut stdout = tokio::io::stdout();
    while let Some(response) = rx.recv().await {
        let mut line = response.to_line();
        line.push('\n');
        stdout.write_all(line.as_bytes()).await?;
        stdout.flush().await?;
    }
    Ok(())
}
