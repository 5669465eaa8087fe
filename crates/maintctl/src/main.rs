//! maintctl - CLI for CMS maintenance tasks and rolling restarts

use clap::Parser;
use std::time::Instant;
use tokio::sync::watch;

use maintctl::cli::Cli;
use maintctl::commands;
use maintctl::errors::{error_code_name, exit_code_for};
use maintctl::logging::{self, ErrorDetails, LogEntry};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    logging::init_tracing(cli.verbose);

    let started = Instant::now();
    let req_id = LogEntry::generate_req_id();

    // in-flight restarts finish; nothing new starts
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, finishing restarts in flight");
            let _ = shutdown_tx.send(true);
        }
    });

    let mut stdout = std::io::stdout();
    let result = commands::dispatch(&cli, shutdown_rx, &mut stdout).await;

    let (exit_code, task_uid, error) = match &result {
        Ok(outcome) => (outcome.exit_code, outcome.task_uid.clone(), None),
        Err(e) => {
            eprintln!("Error: {:#}", e);
            (
                exit_code_for(e),
                cli.task_id().map(String::from),
                Some(ErrorDetails {
                    code: error_code_name(e).to_string(),
                    message: format!("{:#}", e),
                }),
            )
        }
    };

    LogEntry {
        ts: LogEntry::now(),
        req_id,
        command: cli.command_name().to_string(),
        task_uid,
        exit_code,
        duration_ms: started.elapsed().as_millis() as u64,
        ok: exit_code == 0,
        error,
    }
    .write();

    std::process::exit(exit_code);
}
