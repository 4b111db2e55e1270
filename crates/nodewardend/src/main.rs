//! nodewardend — the search node sidecar.
//!
//! # Usage
//!
//! ```text
//! nodewardend run --config /etc/nodewarden/nodewarden.toml
//! nodewardend --log-format json run --config nodewarden.toml --master
//! ```

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use tracing::info;

use nodewarden_core::NodewardenConfig;
use nodewardend::Sidecar;

#[derive(Parser)]
#[command(name = "nodewardend", about = "Search node sidecar: identity, membership and firewall")]
struct Cli {
    /// Log output format.
    #[arg(long, value_enum, default_value = "text", global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Command {
    /// Register this node and keep the firewall in step until Ctrl-C.
    Run {
        /// Path to nodewarden.toml.
        #[arg(long, default_value = "nodewarden.toml")]
        config: PathBuf,

        /// Override `node.instance_id`.
        #[arg(long)]
        instance_id: Option<String>,

        /// Run the cluster's periodic firewall reconciliation on this node.
        #[arg(long)]
        master: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format)?;

    match cli.command {
        Command::Run {
            config,
            instance_id,
            master,
        } => run(config, instance_id, master).await,
    }
}

fn init_tracing(format: LogFormat) -> anyhow::Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new("info,nodewarden=debug,nodewardend=debug"))?;
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
    Ok(())
}

async fn run(config_path: PathBuf, instance_id: Option<String>, master: bool) -> anyhow::Result<()> {
    let mut config = NodewardenConfig::from_file(&config_path)?;
    config.apply_overrides(instance_id, master)?;
    info!(path = ?config_path, "configuration loaded");

    let sidecar = Sidecar::from_config(config)?;
    let report = sidecar.start().await?;
    info!(logical_id = %report.record.logical_id(), "node registered, waiting for shutdown signal");

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");
    sidecar.shutdown().await;
    Ok(())
}
