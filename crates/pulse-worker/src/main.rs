//! pulse-worker - Pulse metrics pipeline worker
//!
//! Loads a TOML configuration, optionally admits a file of recorded webhook
//! deliveries, and runs the worker loop until interrupted.

use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde::Deserialize;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use pulse_core::RawEvent;
use pulse_metrics::InMemoryStorage;
use pulse_queue::InMemoryQueue;
use pulse_worker::{PulseConfig, Worker, WorkerError};

#[derive(Parser)]
#[command(name = "pulse-worker")]
#[command(about = "Pulse metrics pipeline worker")]
#[command(version)]
struct Cli {
    /// Emit logs as JSON
    #[arg(long, global = true, env = "PULSE_LOG_JSON")]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the worker until interrupted
    Run {
        /// Path to config file; defaults apply when omitted
        #[arg(short, long, env = "PULSE_CONFIG")]
        config: Option<PathBuf>,

        /// JSON-lines file of deliveries to admit before starting
        #[arg(long)]
        replay: Option<PathBuf>,
    },

    /// Validate a config file
    CheckConfig {
        /// Path to config file
        #[arg(short, long)]
        config: PathBuf,
    },

    /// Print the default configuration as TOML
    InitConfig,
}

/// One line of a replay file.
#[derive(Debug, Deserialize)]
struct Delivery {
    source: String,
    #[serde(default)]
    event_type: Option<String>,
    #[serde(default)]
    delivery_id: Option<String>,
    payload: serde_json::Value,
}

impl From<Delivery> for RawEvent {
    fn from(delivery: Delivery) -> Self {
        let mut raw = Self::new(delivery.payload.to_string(), delivery.source);
        raw.event_type = delivery.event_type;
        raw.delivery_id = delivery.delivery_id;
        raw
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::from_default_env().add_directive("pulse_worker=info".parse()?);
    tracing_subscriber::registry()
        .with(filter)
        .with(cli.log_json.then(|| fmt::layer().json()))
        .with((!cli.log_json).then(fmt::layer))
        .init();

    match cli.command {
        Commands::Run { config, replay } => {
            run_worker(config.as_deref(), replay.as_deref()).await?;
        }
        Commands::CheckConfig { config } => {
            PulseConfig::from_file(&config)?;
            info!(config = %config.display(), "configuration is valid");
        }
        Commands::InitConfig => {
            let text = toml::to_string_pretty(&PulseConfig::default())
                .context("failed to render default configuration")?;
            print!("{text}");
        }
    }

    Ok(())
}

async fn run_worker(config_path: Option<&Path>, replay: Option<&Path>) -> anyhow::Result<()> {
    let config = match config_path {
        Some(path) => {
            info!(config = %path.display(), "loading configuration");
            PulseConfig::from_file(path)?
        }
        None => PulseConfig::default(),
    };

    let storage = Arc::new(InMemoryStorage::new());
    let worker = Arc::new(Worker::from_config(
        &config,
        Arc::new(InMemoryQueue::new()),
        storage.clone(),
    )?);

    if let Some(path) = replay {
        let admitted = admit_replay(&worker, path)?;
        info!(file = %path.display(), admitted, "replay admitted");
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let running = worker.clone();
    let handle = tokio::spawn(async move { running.run(shutdown_rx).await });

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("shutdown requested");
    shutdown_tx.send(true).ok();
    handle.await.context("worker task panicked")??;

    info!(
        events = storage.event_count(),
        metrics = storage.metric_count(),
        alerts = storage.alerts().len(),
        "pulse-worker stopped"
    );
    Ok(())
}

fn admit_replay(worker: &Worker, path: &Path) -> anyhow::Result<usize> {
    let file = std::fs::File::open(path)
        .with_context(|| format!("failed to open replay file '{}'", path.display()))?;

    let mut admitted = 0;
    for (index, line) in std::io::BufReader::new(file).lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let delivery: Delivery = serde_json::from_str(&line)
            .with_context(|| format!("invalid delivery on line {}", index + 1))?;

        match worker.pipeline().ingest(delivery.into()) {
            Ok(_) => admitted += 1,
            Err(WorkerError::Queue(err)) if err.is_backpressure() => {
                warn!(line = index + 1, error = %err, "replay stopped under backpressure");
                break;
            }
            Err(err) => return Err(err.into()),
        }
    }
    Ok(admitted)
}
