//! Broadcast Express — quota-aware bulk message broadcaster.
//!
//! Loads a recipient list, plans weighted batches and runs one paced
//! broadcast against the loopback transport, logging every lifecycle event.

use anyhow::Context;
use broadcast_core::config::AppConfig;
use broadcast_core::TracingSink;
use broadcast_dispatch::{BroadcastDispatcher, BroadcastObserver, BroadcastOptions, MemoryTransport};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "broadcast-express")]
#[command(about = "Quota-aware bulk message broadcaster")]
#[command(version)]
struct Cli {
    /// File with one recipient address per line
    #[arg(long)]
    recipients: PathBuf,

    /// Message to send; repeat for a multi-message broadcast
    #[arg(long = "message", required = true)]
    messages: Vec<String>,

    /// JSON array of addresses already known to be reachable
    #[arg(long)]
    reachable_seed: Option<PathBuf>,

    /// Write addresses still cached as reachable to this JSON file
    #[arg(long)]
    export_reachable: Option<PathBuf>,

    /// Treat this address as unreachable on the loopback transport
    #[arg(long = "unreachable")]
    unreachable: Vec<String>,

    /// Maximum batch weight (overrides config)
    #[arg(long, env = "BROADCAST_EXPRESS__BROADCAST__RATE_LIMIT_AMOUNT")]
    rate_limit_amount: Option<u64>,

    /// Pacing delay in milliseconds (overrides config)
    #[arg(long, env = "BROADCAST_EXPRESS__BROADCAST__RATE_LIMIT_TIME_MS")]
    rate_limit_time_ms: Option<u64>,

    /// Never delay before the first batch
    #[arg(long, default_value_t = false)]
    skip_initial_delay: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| {
                    "broadcast_express=info,broadcast_dispatch=info,broadcast_core=info".into()
                }),
        )
        .json()
        .init();

    let cli = Cli::parse();

    let mut config = AppConfig::load().unwrap_or_else(|e| {
        warn!(error = %e, "Failed to load config, using defaults");
        AppConfig::default()
    });

    if let Some(amount) = cli.rate_limit_amount {
        config.broadcast.rate_limit_amount = amount;
    }
    if let Some(ms) = cli.rate_limit_time_ms {
        config.broadcast.rate_limit_time_ms = ms;
    }

    info!(
        node_id = %config.node_id,
        rate_limit_amount = config.broadcast.rate_limit_amount,
        rate_limit_time_ms = config.broadcast.rate_limit_time_ms,
        "Configuration loaded"
    );

    let recipients = read_recipients(&cli.recipients)?;
    let seed = match &cli.reachable_seed {
        Some(path) => read_address_list(path)?,
        None => Vec::new(),
    };

    let transport = MemoryTransport::<String>::new().with_unreachable(cli.unreachable.clone());
    let cancel = CancellationToken::new();
    let observer = BroadcastObserver::from_sink(Arc::new(TracingSink));

    let mut dispatcher =
        BroadcastDispatcher::new(transport, recipients, config.broadcast.clone())?
            .with_reachable(seed)
            .with_observer(observer)
            .with_cancellation(cancel.clone());

    let shutdown = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, cancelling broadcast");
            shutdown.cancel();
        }
    });

    let options = BroadcastOptions {
        skip_initial_delay: cli.skip_initial_delay,
    };
    let outcome = dispatcher.broadcast(&cli.messages, options).await;

    if let Some(path) = &cli.export_reachable {
        let reachable = dispatcher.reachable_addresses();
        let json = serde_json::to_string_pretty(&reachable)?;
        std::fs::write(path, json)
            .with_context(|| format!("failed to write {}", path.display()))?;
        info!(
            path = %path.display(),
            addresses = reachable.len(),
            "Reachable addresses exported"
        );
    }

    outcome?;
    info!(
        delivered = dispatcher.transport().deliveries().len(),
        "Broadcast Express finished"
    );
    Ok(())
}

/// One address per line; blank lines and `#` comments are skipped.
fn read_recipients(path: &Path) -> anyhow::Result<Vec<String>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read recipients from {}", path.display()))?;
    Ok(raw
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect())
}

fn read_address_list(path: &Path) -> anyhow::Result<Vec<String>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&raw)
        .with_context(|| format!("{} is not a JSON address list", path.display()))
}
