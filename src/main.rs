use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use simdesk_core::QuestionBank;
use simdesk_server::ServerConfig;
use simdesk_telemetry::{init_telemetry, LogFormat, TelemetryConfig};
use tokio::signal::ctrl_c;
#[cfg(unix)]
use tokio::signal::unix::{signal, SignalKind};

/// Simulation help-desk: chat assistant plus cached simulation API.
#[derive(Debug, Parser)]
#[command(name = "simdesk", version)]
struct Args {
    /// Listen port (overrides SIMDESK_PORT)
    #[arg(long)]
    port: Option<u16>,

    /// Question bank JSON file (overrides SIMDESK_QUESTION_BANK)
    #[arg(long)]
    bank: Option<PathBuf>,

    /// Upstream base URL served under /mirror (overrides SIMDESK_UPSTREAM_URL)
    #[arg(long)]
    upstream_url: Option<String>,

    /// json or pretty (overrides SIMDESK_LOG_FORMAT)
    #[arg(long)]
    log_format: Option<LogFormat>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = ServerConfig::from_env();
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(bank) = args.bank {
        config.question_bank_path = bank;
    }
    if args.upstream_url.is_some() {
        config.upstream_url = args.upstream_url;
    }
    if let Some(format) = args.log_format {
        config.log_format = format;
    }

    let telemetry = init_telemetry(TelemetryConfig {
        format: config.log_format,
        ..Default::default()
    });

    tracing::info!("Starting Simdesk server");

    let bank = QuestionBank::load(&config.question_bank_path).with_context(|| {
        format!(
            "failed to load question bank from {}",
            config.question_bank_path.display()
        )
    })?;

    let handle = simdesk_server::start(config, bank, telemetry.metrics())
        .await
        .context("failed to start server")?;

    tracing::info!(port = handle.port, "Simdesk server ready");

    shutdown_signal().await;
    handle.shutdown().await;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = ctrl_c().await {
            tracing::warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
        tracing::info!("Received Ctrl+C, shutting down");
    };

    #[cfg(unix)]
    let terminate = async {
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                term.recv().await;
                tracing::info!("Received terminate signal, shutting down");
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
