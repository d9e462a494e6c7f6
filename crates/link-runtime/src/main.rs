//! # Link Runtime Binary
//!
//! `link-runtime <mode>` provisions (or takes) an endpoint and runs the
//! sender or receiver loop until Ctrl-C or SIGTERM. A failed run is
//! logged once and exits with a non-zero status.

use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use actor_link::service::shutdown::{self, ShutdownTrigger};
use link_runtime::{LinkMode, LinkRuntime, RunOutcome, RuntimeConfig};

/// Actor link runtime.
#[derive(Debug, Parser)]
#[command(name = "link-runtime", version, about)]
struct Args {
    /// Which side of the link to run.
    #[arg(value_enum, env = "LINK_MODE")]
    mode: LinkMode,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // Initialize logging
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .with_thread_ids(true)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let args = Args::parse();
    info!("[runtime] Starting application in {} mode", args.mode);

    let config = RuntimeConfig::from_env(args.mode).context("Invalid configuration")?;
    let runtime = LinkRuntime::new(config);
    runtime.config().log_summary();

    let (trigger, listener) = shutdown::channel();
    tokio::spawn(watch_signals(trigger));

    let code = match runtime.run(listener).await {
        Ok(RunOutcome::Completed(summary)) => {
            info!(
                resource = summary.resource_id.as_deref().unwrap_or("-"),
                "[runtime] Link to {} closed",
                summary.endpoint
            );
            ExitCode::SUCCESS
        }
        Ok(RunOutcome::Interrupted) => {
            info!("[runtime] Interrupted before the link was opened");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("[runtime] {:#}", e);
            ExitCode::FAILURE
        }
    };

    info!("[runtime] Application stopped");
    Ok(code)
}

async fn watch_signals(trigger: ShutdownTrigger) {
    wait_for_signal().await;
    info!("[runtime] Shutdown signal received");
    trigger.trigger();
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut terminate) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = terminate.recv() => {}
            }
        }
        Err(e) => {
            error!("[runtime] Cannot listen for SIGTERM: {}", e);
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
