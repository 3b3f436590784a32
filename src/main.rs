//! nodeptr - PTR and A records for Kubernetes nodes

use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use kube::Client;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use nodeptr::config::{ControllerConfig, DEFAULT_RESOLVE_ATTEMPTS};
use nodeptr::controller::{self, Reconciler, DEFAULT_MAX_CONCURRENT_NODES};
use nodeptr::provider::{DnsKind, HostingKind};
use nodeptr::retry::{retry_with_backoff, BackoffPolicy, TokioClock};
use nodeptr::watch::{KubeNodeWatcher, NodeEventSource};
use nodeptr::Error;

/// Attempts to re-open the node watch before giving up
const WATCH_RECONNECT_ATTEMPTS: u32 = 5;

/// Automated PTR record updater for Kubernetes nodes
#[derive(Parser, Debug)]
#[command(name = "nodeptr", version, about, long_about = None)]
struct Cli {
    /// Emit logs as JSON lines
    #[arg(long, global = true, env = "NODEPTR_LOG_JSON")]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Watch for new nodes and publish their records
    ///
    /// Each node added to the cluster is polled until it reports an
    /// ExternalIP, then its PTR (and optionally A) record is set.
    Watch(WatchArgs),
}

/// Watch mode arguments
#[derive(Parser, Debug)]
struct WatchArgs {
    /// Provider for PTR updates
    #[arg(long, value_enum, env = "NODEPTR_PROVIDER", default_value_t = HostingKind::Vultr)]
    provider: HostingKind,

    /// Provider for A record updates (optional)
    #[arg(long, value_enum, env = "NODEPTR_DNS")]
    dns: Option<DnsKind>,

    /// Domain suffix for generated records, e.g. scanning.example.com
    #[arg(long, env = "NODEPTR_SUFFIX")]
    suffix: String,

    /// Number of times a node is polled for its ExternalIP
    #[arg(long, env = "NODEPTR_RESOLVE_ATTEMPTS", default_value_t = DEFAULT_RESOLVE_ATTEMPTS)]
    resolve_attempts: u32,

    /// Seconds between polls
    #[arg(long, env = "NODEPTR_RESOLVE_DELAY_SECS", default_value = "5")]
    resolve_delay_secs: u64,

    /// Random spread applied to each poll delay, in [0, 1)
    #[arg(long, env = "NODEPTR_RESOLVE_JITTER", default_value = "0.0")]
    resolve_jitter: f64,

    /// Timeout for a single provider call in seconds
    #[arg(long, env = "NODEPTR_CALL_TIMEOUT_SECS", default_value = "30")]
    call_timeout_secs: u64,

    /// Maximum number of nodes reconciled at the same time
    #[arg(long, env = "NODEPTR_MAX_CONCURRENT_NODES", default_value_t = DEFAULT_MAX_CONCURRENT_NODES)]
    max_concurrent_nodes: usize,
}

impl WatchArgs {
    fn into_config(self) -> nodeptr::Result<ControllerConfig> {
        ControllerConfig::new(self.provider, self.dns, &self.suffix)?
            .with_resolve(
                self.resolve_attempts,
                Duration::from_secs(self.resolve_delay_secs),
                self.resolve_jitter,
            )?
            .with_call_timeout(Duration::from_secs(self.call_timeout_secs))?
            .with_max_concurrent_nodes(self.max_concurrent_nodes)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let (plain, json) = if cli.log_json {
        (None, Some(fmt::layer().json()))
    } else {
        (Some(fmt::layer()), None)
    };
    tracing_subscriber::registry()
        .with(plain)
        .with(json)
        .with(filter)
        .init();

    match cli.command {
        Commands::Watch(args) => run_watch(args).await,
    }
}

/// Run the controller until SIGINT or SIGTERM
async fn run_watch(args: WatchArgs) -> anyhow::Result<()> {
    let config = args.into_config().context("invalid configuration")?;
    info!(
        provider = %config.hosting,
        dns = ?config.dns,
        suffix = %config.suffix.as_str(),
        "nodeptr starting"
    );

    let client = Client::try_default()
        .await
        .context("failed to create Kubernetes client")?;

    let reconciler = controller::from_config(&config, client.clone())
        .await
        .context("failed to configure providers")?;
    let watcher = KubeNodeWatcher::new(client);

    let shutdown = CancellationToken::new();
    tokio::spawn(wait_for_signal(shutdown.clone()));

    let result = watch_until_shutdown(&reconciler, &watcher, &shutdown).await;

    info!(in_flight = reconciler.in_flight(), "Waiting for node workflows to stop");
    shutdown.cancel();
    reconciler.wait_idle().await;
    info!("Shutdown complete");

    result
}

/// Run watch sessions back to back, reconnecting when one ends
async fn watch_until_shutdown(
    reconciler: &Reconciler,
    watcher: &KubeNodeWatcher,
    shutdown: &CancellationToken,
) -> anyhow::Result<()> {
    let reconnect = BackoffPolicy::exponential(WATCH_RECONNECT_ATTEMPTS);

    loop {
        let events = tokio::select! {
            _ = shutdown.cancelled() => return Ok(()),
            opened = retry_with_backoff(&reconnect, &TokioClock, "open_node_watch", || watcher.watch()) => {
                opened.context("failed to establish node watch")?
            }
        };

        match reconciler.run(events, shutdown.clone()).await {
            Ok(()) => return Ok(()),
            Err(Error::WatchClosed) => {
                info!(resume_version = ?watcher.resume_version(), "Node watch session ended, reconnecting");
            }
            Err(e) => {
                error!(error = %e, resume_version = ?watcher.resume_version(), "Node watch failed, reconnecting");
            }
        }
    }
}

async fn wait_for_signal(shutdown: CancellationToken) {
    let ctrl_c = signal::ctrl_c();
    let mut sigterm = match signal::unix::signal(signal::unix::SignalKind::terminate()) {
        Ok(sigterm) => sigterm,
        Err(e) => {
            error!(error = %e, "Failed to install SIGTERM handler");
            if ctrl_c.await.is_ok() {
                info!("Received SIGINT");
            }
            shutdown.cancel();
            return;
        }
    };

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT"),
        _ = sigterm.recv() => info!("Received SIGTERM"),
    }
    shutdown.cancel();
}
