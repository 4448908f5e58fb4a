//! resp-gateway server binary
//!
//! Sets up logging, an embedded reference cluster holding the backing table,
//! the shared command handler, and the TCP accept loop.

use clap::Parser;
use resp_gateway::commands::CommandHandler;
use resp_gateway::config::{self, GatewayConfig};
use resp_gateway::connection::{handle_connection, ConnectionStats};
use resp_gateway::metrics::MetricRegistry;
use resp_gateway::storage::{ExpiryConfig, ExpirySweeper, LocalCluster};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

/// Redis-protocol gateway over a table-backed storage cluster
#[derive(Parser, Debug)]
#[command(name = "resp-gateway")]
#[command(version)]
struct Args {
    /// Listen address (host:port)
    #[arg(short, long, env = "RESP_GATEWAY_LISTEN", default_value = "127.0.0.1:6379")]
    listen: String,

    /// Comma separated cluster master addresses
    #[arg(short, long, env = "RESP_GATEWAY_MASTERS", default_value = "127.0.0.1:7100")]
    masters: String,

    /// Backing table name
    #[arg(short, long, env = "RESP_GATEWAY_TABLE", default_value = config::DEFAULT_TABLE_NAME)]
    table: String,

    /// Timeout applied to every storage session, in milliseconds
    #[arg(long, env = "RESP_GATEWAY_SESSION_TIMEOUT_MS", default_value_t = config::DEFAULT_SESSION_TIMEOUT_MS)]
    session_timeout_ms: u64,

    /// Number of tablets in the embedded cluster's table
    #[arg(long, env = "RESP_GATEWAY_TABLETS", default_value_t = 16)]
    tablets: usize,

    /// Log filter used when RUST_LOG is not set
    #[arg(long, default_value = "info")]
    log_level: String,
}

impl Args {
    fn to_config(&self) -> GatewayConfig {
        GatewayConfig::builder()
            .listen_addr(&self.listen)
            .master_addresses(config::parse_address_list(&self.masters))
            .table_name(&self.table)
            .session_timeout_ms(self.session_timeout_ms)
            .tablets(self.tablets)
            .build()
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true)
        .init();

    let config = args.to_config();
    if config.master_addresses.is_empty() {
        anyhow::bail!("at least one master address is required");
    }
    info!("resp-gateway v{}", resp_gateway::VERSION);
    info!(masters = ?config.master_addresses, table = %config.table_name, "Configuration loaded");

    // The embedded cluster answers for the configured masters.
    let cluster = LocalCluster::new(config.master_addresses.iter().cloned());
    cluster.create_table(&config.table_name, config.tablets)?;
    info!(tablets = config.tablets, "Embedded cluster initialized");

    let sweeper = ExpirySweeper::start(cluster.clone(), ExpiryConfig::default());
    info!("Background expiry sweeper started");

    let metrics = Arc::new(MetricRegistry::new());
    let handler = Arc::new(CommandHandler::new(
        &config,
        Arc::new(cluster.connector()),
        Arc::clone(&metrics),
    )?);
    let stats = Arc::new(ConnectionStats::new());

    let listener = TcpListener::bind(&config.listen_addr).await?;
    info!("Listening on {}", config.listen_addr);

    tokio::select! {
        _ = accept_loop(listener, Arc::clone(&handler), Arc::clone(&stats)) => {}
        res = signal::ctrl_c() => {
            match res {
                Ok(()) => info!("Shutdown signal received, stopping server..."),
                Err(e) => error!(error = %e, "Failed to listen for shutdown signal"),
            }
        }
    }

    sweeper.stop();
    log_summary(&metrics, &stats, &cluster);
    info!("Server shutdown complete");
    Ok(())
}

/// Main loop that accepts incoming connections
async fn accept_loop(
    listener: TcpListener,
    handler: Arc<CommandHandler>,
    stats: Arc<ConnectionStats>,
) {
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                let handler = Arc::clone(&handler);
                let stats = Arc::clone(&stats);
                tokio::spawn(async move {
                    handle_connection(stream, addr, handler, stats).await;
                });
            }
            Err(e) => {
                error!("Failed to accept connection: {}", e);
            }
        }
    }
}

fn log_summary(metrics: &MetricRegistry, stats: &ConnectionStats, cluster: &LocalCluster) {
    info!(
        connections = stats.connections_accepted.load(Ordering::Relaxed),
        commands = stats.commands_processed.load(Ordering::Relaxed),
        errors = stats.error_replies.load(Ordering::Relaxed),
        keys = cluster.len(),
        "Connection summary"
    );
    for (name, snap) in metrics.snapshot() {
        if snap.count == 0 {
            continue;
        }
        info!(
            metric = %name,
            count = snap.count,
            mean = snap.mean,
            p50 = snap.p50,
            p99 = snap.p99,
            max = snap.max,
            "Histogram"
        );
    }
}
