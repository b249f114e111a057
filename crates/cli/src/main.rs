use clap::Parser;
use colored::Colorize;
use std::process::ExitCode;
use std::time::Duration;

mod commands;
mod protocol;

use commands::{Cli, GateFailed};

/// Readiness gate ушёл в FAILED
const EXIT_GATE_FAILED: u8 = 2;
const EXIT_ERROR: u8 = 1;

fn main() -> ExitCode {
    let cli = Cli::parse();

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(err) => {
            eprintln!("{} Failed to start tokio runtime: {err}", "[✗]".red().bold());
            return ExitCode::from(EXIT_ERROR);
        }
    };
    let result = runtime.block_on(cli.run());
    // blocking чтение stdin после Ctrl-C не должно держать процесс
    runtime.shutdown_timeout(Duration::from_millis(500));

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{} {err:#}", "[✗]".red().bold());
            if err.downcast_ref::<GateFailed>().is_some() {
                ExitCode::from(EXIT_GATE_FAILED)
            } else {
                ExitCode::from(EXIT_ERROR)
            }
        }
    }
}
