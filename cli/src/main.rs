// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! # AEGIS Chaos CLI
//!
//! The `aegis-chaos` binary hosts the fault-injection server and drives it.
//!
//! ## Commands
//!
//! - `aegis-chaos serve` - Run the HTTP attack surface
//! - `aegis-chaos attack start|status|stop|probe|list` - Drive a running server
//! - `aegis-chaos config show|validate|generate` - Configuration management

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::{Path, PathBuf};

use aegis_chaos::commands::{self, AttackCommand, ConfigCommand};
use aegis_chaos_core::domain::config::{EngineConfig, LoggingConfig};

/// AEGIS Chaos - Controlled fault injection against a target stack
#[derive(Parser)]
#[command(name = "aegis-chaos")]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Path to configuration file (overrides discovery)
    #[arg(
        short,
        long,
        global = true,
        env = "AEGIS_CHAOS_CONFIG_PATH",
        value_name = "FILE"
    )]
    config: Option<PathBuf>,

    /// HTTP API port (default: server.port from config, 8080)
    #[arg(long, global = true, env = "AEGIS_CHAOS_PORT")]
    port: Option<u16>,

    /// HTTP API host (default: server.bind_address from config)
    #[arg(long, global = true, env = "AEGIS_CHAOS_HOST")]
    host: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, env = "AEGIS_CHAOS_LOG_LEVEL")]
    log_level: Option<String>,

    /// Log format (compact, json)
    #[arg(long, global = true, env = "AEGIS_CHAOS_LOG_FORMAT")]
    log_format: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the chaos server
    #[command(name = "serve")]
    Serve,

    /// Attack operations against a running server
    #[command(name = "attack")]
    Attack {
        #[command(subcommand)]
        command: AttackCommand,
    },

    /// Configuration management
    #[command(name = "config")]
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Missing .env is fine
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    let logging = logging_from_config(cli.config.as_deref());
    let level = cli.log_level.clone().unwrap_or(logging.level);
    let format = cli.log_format.clone().unwrap_or(logging.format);
    init_logging(&level, &format)?;

    match cli.command {
        Some(Commands::Serve) => {
            commands::serve::handle_command(cli.config, cli.host.as_deref(), cli.port).await
        }
        Some(Commands::Attack { command }) => {
            let host = cli.host.as_deref().unwrap_or("127.0.0.1");
            let port = cli.port.unwrap_or(8080);
            commands::attack::handle_command(command, host, port).await
        }
        Some(Commands::Config { command }) => {
            commands::config::handle_command(command, cli.config).await
        }
        None => {
            eprintln!("{}", "No command specified. Use --help for usage.".yellow());
            std::process::exit(1);
        }
    }
}

/// Logging section of the configuration file, read without emitting logs.
fn logging_from_config(path: Option<&Path>) -> LoggingConfig {
    path.map(Path::to_path_buf)
        .or_else(EngineConfig::discover_config)
        .and_then(|path| EngineConfig::from_yaml_file(path).ok())
        .map(|config| config.logging)
        .unwrap_or_default()
}

/// Initialize tracing subscriber for logging
fn init_logging(level: &str, format: &str) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(level))
        .context("Failed to create log filter")?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    match format {
        "json" => builder.json().init(),
        "compact" => builder.compact().init(),
        other => anyhow::bail!("Unknown log format '{}'. Expected compact or json", other),
    }

    Ok(())
}
