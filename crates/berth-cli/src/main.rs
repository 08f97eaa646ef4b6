//! Berth - cluster join preparation
//!
//! Run before the consensus engine starts: decides whether the local node must
//! register with an existing cluster and prints the initial-cluster settings
//! the engine should boot with.

use anyhow::Context;
use berth_cluster::{EtcdConnector, JoinCoordinator, JoinOutcome, TransportConfig};
use berth_core::config::BerthConfig;
use berth_core::types::split_urls;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "berth")]
#[command(author = "Berth Team")]
#[command(version = berth_core::VERSION)]
#[command(about = "Cluster join preparation for consensus-replicated nodes", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Configuration file path
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Human-readable name of this node
    #[arg(long, env = "BERTH_NAME")]
    name: Option<String>,

    /// Data directory
    #[arg(long, env = "BERTH_DATA_DIR")]
    data_dir: Option<String>,

    /// Comma-separated peer URLs advertised to the cluster
    #[arg(long, env = "BERTH_ADVERTISE_PEER_URLS")]
    advertise_peer_urls: Option<String>,

    /// Comma-separated client URLs advertised to the cluster
    #[arg(long, env = "BERTH_ADVERTISE_CLIENT_URLS")]
    advertise_client_urls: Option<String>,

    /// Comma-separated client URLs of the cluster to join
    #[arg(long, env = "BERTH_JOIN")]
    join: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "BERTH_LOG_LEVEL")]
    log_level: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Register with the join target if needed and print the initial cluster
    PrepareJoin {
        /// Print the outcome as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show version information
    Version,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    // Commands that need no configuration
    if let Some(output) = offline_output(&cli) {
        println!("{}", output);
        return Ok(());
    }

    let json = matches!(cli.command, Some(Commands::PrepareJoin { json: true }));
    let config = load_config(&cli)?;

    init_logging(&config);

    let outcome = prepare_join(config).await?;
    println!("{}", render(&outcome, json)?);

    Ok(())
}

fn offline_output(cli: &Cli) -> Option<String> {
    match cli.command {
        Some(Commands::Version) => Some(format!("berth {}", berth_core::VERSION)),
        _ => None,
    }
}

/// Load the file or environment configuration, then apply CLI overrides
fn load_config(cli: &Cli) -> anyhow::Result<BerthConfig> {
    let mut config = if let Some(config_path) = &cli.config {
        let mut config = BerthConfig::from_file(config_path)?;
        config.apply_env();
        config
    } else {
        BerthConfig::from_env()
    };

    // Override with CLI args
    if let Some(name) = &cli.name {
        config.node.name = name.clone();
    }
    if let Some(data_dir) = &cli.data_dir {
        config.node.data_dir = data_dir.into();
    }
    if let Some(urls) = &cli.advertise_peer_urls {
        config.node.advertise_peer_urls = split_urls(urls);
    }
    if let Some(urls) = &cli.advertise_client_urls {
        config.node.advertise_client_urls = split_urls(urls);
    }
    if let Some(join) = &cli.join {
        config.node.join = split_urls(join);
    }
    if let Some(level) = &cli.log_level {
        config.logging.level = level.clone();
    }

    config.validate().context("invalid configuration")?;
    Ok(config)
}

fn init_logging(config: &BerthConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    let registry = tracing_subscriber::registry().with(filter);
    if config.logging.format == "json" {
        registry.with(fmt::layer().json().with_writer(std::io::stderr)).init();
    } else {
        registry
            .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
            .init();
    }
}

async fn prepare_join(config: BerthConfig) -> anyhow::Result<JoinOutcome> {
    let identity = config.identity();
    info!(name = %identity.name, data_dir = ?identity.data_dir, "Preparing cluster join...");

    let connector = EtcdConnector::new(
        TransportConfig::from_config(&config.join, &config.security),
        config.join.lease_ttl(),
    );
    let coordinator = JoinCoordinator::from_config(connector, &config.join);

    let outcome = coordinator
        .prepare_join(&identity)
        .await
        .context("join preparation failed")?;
    Ok(outcome)
}

fn render(outcome: &JoinOutcome, json: bool) -> anyhow::Result<String> {
    if json {
        return Ok(serde_json::to_string(outcome)?);
    }

    let state = outcome
        .initial_cluster_state
        .map(|s| s.as_str())
        .unwrap_or_default();
    Ok(format!(
        "initial-cluster={}\ninitial-cluster-state={}",
        outcome.initial_cluster, state
    ))
}
