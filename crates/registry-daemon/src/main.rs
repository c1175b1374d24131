//! Endpoint registry daemon
//!
//! Runs the registry, its snapshot publisher, the eviction scheduler and
//! the WebSocket control plane until SIGINT/SIGTERM.

use anyhow::{Context, Result};
use clap::Parser;
use endpoint_registry::{EvictionScheduler, Registry, RegistryConfig, SnapshotCache, WsServer};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

/// How long in-flight requests get to finish after SIGINT/SIGTERM
const SHUTDOWN_DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Parser, Debug)]
#[command(name = "registry-daemon")]
#[command(about = "Heartbeat-driven endpoint registry", long_about = None)]
#[command(version)]
struct Args {
    /// Configuration file (YAML or JSON)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Control plane listen address
    #[arg(short, long)]
    listen: Option<String>,

    /// Node identity snapshots are published under
    #[arg(long)]
    node_id: Option<String>,

    /// Heartbeat timeout in seconds (0 or less disables eviction)
    #[arg(long, allow_hyphen_values = true)]
    eviction_timeout: Option<i64>,
}

fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt().with_target(false).init();

    let args = Args::parse();

    smol::block_on(async {
        match run(args).await {
            Ok(()) => {
                info!("Daemon shutdown gracefully");
                Ok(())
            }
            Err(e) => {
                error!("Daemon error: {:#}", e);
                Err(e)
            }
        }
    })
}

async fn load_config(args: &Args) -> Result<RegistryConfig> {
    let mut config = match &args.config {
        Some(path) => RegistryConfig::from_file(path)
            .await
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => RegistryConfig::default(),
    };
    config.apply_env().context("Invalid environment configuration")?;

    if let Some(listen) = &args.listen {
        config.server.listen_addr = listen.clone();
    }
    if let Some(node_id) = &args.node_id {
        config.node_id = node_id.clone();
    }
    if let Some(timeout) = args.eviction_timeout {
        config.eviction_timeout_secs = timeout;
    }

    Ok(config)
}

/// Forward SIGINT/SIGTERM into an async channel.
///
/// The receiver closes on the first signal. The returned sender must be
/// held for as long as the daemon runs; without signal support (non-unix)
/// it is the only thing keeping the channel open.
fn shutdown_signal() -> Result<(async_channel::Sender<()>, async_channel::Receiver<()>)> {
    let (tx, rx) = async_channel::bounded(1);

    #[cfg(unix)]
    {
        use signal_hook::{
            consts::{SIGINT, SIGTERM},
            iterator::Signals,
        };

        let tx = tx.clone();
        let mut signals =
            Signals::new([SIGINT, SIGTERM]).context("Failed to register signal handler")?;
        std::thread::spawn(move || {
            if let Some(sig) = signals.forever().next() {
                info!("Received signal {}, shutting down", sig);
                tx.close();
            }
        });
    }

    Ok((tx, rx))
}

async fn run(args: Args) -> Result<()> {
    let config = load_config(&args).await?;

    info!("Starting endpoint registry for node {}", config.node_id);
    info!("Cluster: {}", config.cluster_name);
    if config.eviction_enabled() {
        info!("Heartbeat timeout: {}s", config.eviction_timeout_secs);
    } else {
        info!("Heartbeat eviction disabled");
    }

    let (_shutdown_tx, shutdown) = shutdown_signal()?;

    let cache = Arc::new(SnapshotCache::new());
    let (registry, publisher) = Registry::new(&config, cache.clone());
    let registry = Arc::new(registry);
    let publisher_task = smol::spawn(publisher.run());

    // Nothing is served until the distributor holds a snapshot
    registry
        .publish_initial()
        .await
        .context("Failed to establish initial snapshot")?;

    let (scheduler, stop) = EvictionScheduler::new(registry.clone(), config.eviction_timeout());
    let scheduler_task = smol::spawn(scheduler.run());

    let server = WsServer::new(
        &config.server.listen_addr,
        registry.clone(),
        cache,
        config.node_id.clone(),
    )
    .await
    .context("Failed to bind control plane")?;

    server
        .serve(
            shutdown,
            |handler| smol::spawn(handler).detach(),
            SHUTDOWN_DRAIN_TIMEOUT,
        )
        .await
        .context("Control plane failed")?;

    // The control plane is drained, so the scheduler is the last writer
    stop.stop();
    scheduler_task.await;
    registry.close();
    publisher_task.await;

    Ok(())
}
