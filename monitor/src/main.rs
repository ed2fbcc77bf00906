//! Transaction monitoring service
//!
//! Ingests transaction-status and checkout-volume metrics over HTTP, evaluates
//! them against threshold and baseline rules, records alerts and pushes live
//! updates to WebSocket clients. Historical seed files are loaded in the
//! background on startup.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use txpulse_monitor::{
    app::{open_stores, AppState},
    config::{LogFormat, MonitorConfig},
    loader::{Readiness, SeedLoader},
    scheduler::Scheduler,
    server,
};

#[derive(Parser)]
#[command(name = "txpulse-monitor")]
#[command(about = "Transaction anomaly monitor", long_about = None)]
#[command(version)]
struct Args {
    /// Path to a TOML/YAML/JSON config file
    #[arg(short, long, env = "TXPULSE_CONFIG")]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,
}

fn init_tracing(format: LogFormat, verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let json = format == LogFormat::Json;

    tracing_subscriber::registry()
        .with(filter)
        .with(json.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!json).then(|| tracing_subscriber::fmt::layer().with_target(false)))
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = MonitorConfig::load(args.config.as_deref())?;
    init_tracing(config.log_format, args.verbose);

    let listen_addr = config.listen_socket()?;
    let admin_addr = config.admin_socket()?;
    info!("Starting txpulse monitor on {}", listen_addr);

    let (metrics_store, alerts) = open_stores(&config.storage).await?;
    let readiness = Arc::new(if config.seed_files.is_empty() {
        Readiness::ready()
    } else {
        Readiness::new()
    });
    let state = Arc::new(AppState::new(
        &config,
        metrics_store.clone(),
        alerts,
        readiness.clone(),
    ));

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Shutdown requested");
            }
            cancel.cancel();
        });
    }

    if !config.seed_files.is_empty() {
        let loader = SeedLoader::new(metrics_store, config.seed_files.clone(), readiness.clone());
        tokio::spawn(async move {
            loader.load().await;
        });
    }

    let scheduler = Arc::new(Scheduler::new(
        state.pipeline.clone(),
        readiness.clone(),
        config.scheduler_interval(),
    ));
    let scheduler_task = tokio::spawn(scheduler.run(cancel.clone()));

    let admin_task = {
        let cancel = cancel.clone();
        tokio::spawn(server::http::serve_admin(admin_addr, readiness, async move {
            cancel.cancelled().await
        }))
    };

    let api_cancel = cancel.clone();
    let api_result = server::serve_api(listen_addr, state, async move {
        api_cancel.cancelled().await
    })
    .await;

    cancel.cancel();
    let _ = scheduler_task.await;
    match admin_task.await {
        Ok(Err(e)) => tracing::error!("Admin server error: {}", e),
        Err(e) => tracing::error!("Admin server task failed: {}", e),
        Ok(Ok(())) => {}
    }

    api_result.context("API server error")?;
    info!("Stopped");
    Ok(())
}
