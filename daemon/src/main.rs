//! Kestrel daemon — entry point for running a Kestrel node.

use clap::Parser;
use kestrel_node::logging::{init_logging, LogFormat};
use kestrel_node::{KestrelNode, NodeConfig};

#[derive(Parser)]
#[command(name = "kestrel-daemon", about = "Kestrel permissioned-chain node daemon")]
struct Cli {
    /// Port for P2P connections.
    #[arg(long, env = "KESTREL_P2P_PORT")]
    port: Option<u16>,

    /// Bootstrap peer addresses (comma-separated: "1.2.3.4:30310,5.6.7.8:30310").
    #[arg(long, env = "KESTREL_BOOTSTRAP_PEERS", value_delimiter = ',')]
    bootstrap_peers: Vec<String>,

    /// Maximum number of peer connections.
    #[arg(long, env = "KESTREL_MAX_PEERS")]
    max_peers: Option<usize>,

    /// Hex seed for the node signing key (32 bytes). Generated when absent.
    #[arg(long, env = "KESTREL_KEY_SEED")]
    key_seed: Option<String>,

    /// Election round length in seconds.
    #[arg(long, env = "KESTREL_ROUND_INTERVAL")]
    round_interval_secs: Option<u64>,

    /// Big-period length in seconds.
    #[arg(long, env = "KESTREL_BIG_PERIOD")]
    big_period_secs: Option<u64>,

    /// Log level: "trace", "debug", "info", "warn", "error".
    #[arg(long, default_value = "info", env = "KESTREL_LOG_LEVEL")]
    log_level: String,

    /// Log format: "human" or "json".
    #[arg(long, default_value = "human", env = "KESTREL_LOG_FORMAT")]
    log_format: String,

    /// Path to a TOML configuration file. If provided, file settings are
    /// used as the base; CLI flags and env vars override them.
    #[arg(long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    init_logging(LogFormat::from_str(&cli.log_format), &cli.log_level);

    let mut config = match &cli.config {
        Some(path) => match NodeConfig::from_toml_file(path) {
            Ok(config) => {
                tracing::info!(path, "loaded config file");
                config
            }
            Err(e) => {
                tracing::warn!(path, error = %e, "failed to load config file, using defaults");
                NodeConfig::default()
            }
        },
        None => NodeConfig::default(),
    };

    if let Some(port) = cli.port {
        config.port = port;
    }
    if !cli.bootstrap_peers.is_empty() {
        config.bootstrap_peers = cli.bootstrap_peers;
    }
    if let Some(max_peers) = cli.max_peers {
        config.max_peers = max_peers;
    }
    if cli.key_seed.is_some() {
        config.key_seed = cli.key_seed;
    }
    if let Some(secs) = cli.round_interval_secs {
        config.round_interval_secs = secs;
    }
    if let Some(secs) = cli.big_period_secs {
        config.big_period_secs = secs;
    }
    config.log_level = cli.log_level;
    config.log_format = cli.log_format;

    tracing::info!(
        port = config.port,
        round_interval = config.round_interval_secs,
        big_period = config.big_period_secs,
        delegators = config.delegators.len(),
        "starting kestrel node"
    );
    if !config.bootstrap_peers.is_empty() {
        tracing::info!(peers = %config.bootstrap_peers.join(", "), "bootstrap peers");
    }

    let mut node = KestrelNode::new(config)?;
    node.start().await?;

    let shutdown = node.shutdown_controller();
    shutdown.wait_for_signal().await;

    tracing::info!("shutdown signal received, stopping node");
    node.stop().await?;

    tracing::info!("kestrel daemon exited cleanly");
    Ok(())
}
