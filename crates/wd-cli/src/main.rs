mod commands;

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use wd_core::config::Config;
use wd_telemetry::logging::{self, LogFormat};

/// warden -- run file operations, asking a human before anything destructive.
#[derive(Parser)]
#[command(name = "warden", version, about)]
struct Cli {
    /// Config file (default: ~/.warden/config.toml).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    json_logs: bool,

    /// Override the approval channel provider.
    #[arg(long, global = true, value_parser = ["slack", "file"])]
    channel: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Process one or more requests, then print the audit log.
    Run {
        /// Requests such as "list", "read notes.txt", "delete old-backup.zip".
        #[arg(required = true)]
        requests: Vec<String>,
        /// Print the audit log as JSON.
        #[arg(long)]
        audit_json: bool,
    },

    /// Print the risk tier of an operation kind.
    Classify {
        /// Operation kind (list, read, delete, move, write or an alias).
        kind: String,
    },

    /// Print the effective configuration (default when no subcommand is given).
    Config,
}

fn load_config(cli: &Cli) -> anyhow::Result<Config> {
    let mut cfg = match &cli.config {
        Some(path) => Config::load_from(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => Config::load().context("loading config")?,
    };
    if let Some(provider) = &cli.channel {
        cfg.channel.provider = provider.clone();
    }
    if cli.json_logs {
        cfg.general.log_format = "json".into();
    }
    cfg.validate().context("validating config")?;
    Ok(cfg)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // A missing .env is normal.
    dotenv::dotenv().ok();

    let cli = Cli::parse();
    let cfg = load_config(&cli)?;

    let format = cfg
        .general
        .log_format
        .parse::<LogFormat>()
        .map_err(anyhow::Error::msg)?;
    logging::init(format, "warden", &cfg.general.log_level);

    match cli.command {
        Some(Commands::Run {
            requests,
            audit_json,
        }) => {
            commands::run::run(&cfg, &requests, audit_json).await?;
        }
        Some(Commands::Classify { kind }) => {
            commands::classify::run(&kind)?;
        }
        None | Some(Commands::Config) => {
            commands::config::run(&cfg)?;
        }
    }

    Ok(())
}
