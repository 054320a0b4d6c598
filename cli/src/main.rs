mod args;
mod driver;
mod logging;
mod report;
mod workload;

use std::process::ExitCode;

use clap::Parser;
use sql_loadgen::context::ExecContext;
use tokio_util::sync::CancellationToken;

use crate::args::{Args, RunConfig};

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    let config = RunConfig::from_args(args);
    if let Err(err) = logging::init(config.verbose, config.log.as_deref()) {
        eprintln!("failed to open log file: {err}");
        return ExitCode::FAILURE;
    }

    let config_json = serde_json::to_string_pretty(&config).unwrap_or_else(|_| "{}".to_string());
    tracing::info!("config: {}", config_json);

    let token = CancellationToken::new();
    let interrupt = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupted, stopping clients");
            interrupt.cancel();
        }
    });

    match driver::run(&config, ExecContext::new(token)).await {
        Ok(report) => {
            match serde_json::to_string_pretty(&report) {
                Ok(json) => println!("{json}"),
                Err(err) => tracing::error!("cannot encode report: {err}"),
            }
            if report.failed_clients() > 0 {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            }
        }
        Err(err) => {
            tracing::error!("{err}");
            ExitCode::FAILURE
        }
    }
}
