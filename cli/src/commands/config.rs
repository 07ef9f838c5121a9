// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Configuration management commands
//!
//! Commands: show, validate, generate

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;
use std::path::PathBuf;

use aegis_chaos_core::domain::config::EngineConfig;

#[derive(Subcommand)]
pub enum ConfigCommand {
    /// Show current configuration
    Show {
        /// Show config file paths checked
        #[arg(long)]
        paths: bool,
    },

    /// Validate configuration file
    Validate {
        /// Path to config file (default: discover)
        #[arg(value_name = "FILE")]
        file: Option<PathBuf>,
    },

    /// Generate a configuration file populated with defaults
    Generate {
        /// Output path
        #[arg(short, long, default_value = "./aegis-chaos.yaml")]
        output: PathBuf,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

pub async fn handle_command(command: ConfigCommand, config_override: Option<PathBuf>) -> Result<()> {
    match command {
        ConfigCommand::Show { paths } => show(config_override, paths),
        ConfigCommand::Validate { file } => validate(file.or(config_override)),
        ConfigCommand::Generate { output, force } => generate(output, force),
    }
}

fn show(config_override: Option<PathBuf>, show_paths: bool) -> Result<()> {
    let config = EngineConfig::load_or_default(config_override.clone())
        .context("Failed to load configuration")?;

    if show_paths {
        println!("{}", "Configuration discovery paths:".bold());
        if let Some(path) = &config_override {
            println!("  1. --config flag: {}", path.display());
        } else {
            println!("  1. --config flag: {}", "(not set)".dimmed());
        }
        println!(
            "  2. AEGIS_CHAOS_CONFIG_PATH: {}",
            std::env::var("AEGIS_CHAOS_CONFIG_PATH")
                .unwrap_or_else(|_| "(not set)".to_string())
                .dimmed()
        );
        println!("  3. ./aegis-chaos.yaml");
        println!("  4. ~/.aegis/chaos.yaml");
        println!("  5. /etc/aegis/chaos.yaml");
        println!();
    }

    println!("{}", "Current configuration:".bold());
    println!();

    println!("{}", "Server:".bold());
    println!("  Listen: {}:{}", config.server.bind_address, config.server.port);
    println!();

    let target = &config.target;
    println!("{}", "Target:".bold());
    println!("  API: {}", target.api_base_url);
    println!("  Container: {}", target.container_name);
    println!("  Env file: {}", target.resolve_path(&target.env_file).display());
    match &target.compose_file {
        Some(file) => println!(
            "  Compose: {} (service {})",
            target.resolve_path(file).display(),
            target.compose_service
        ),
        None => println!("  Compose: {}", "(docker restart)".dimmed()),
    }
    match &target.database_url {
        // DatabaseUrl displays with credentials redacted
        Some(url) => println!("  Database: {}", url),
        None => println!("  Database: {}", "(not set)".dimmed()),
    }
    println!("  Schema table: {}", target.schema_version_table);
    println!();

    println!("{}", "Verification:".bold());
    println!(
        "  Rate-limit tolerance: {}",
        config.verification.rate_limit_tolerance
    );
    println!(
        "  Liveness: {} attempts every {}ms",
        config.liveness.max_attempts, config.liveness.interval_ms
    );
    println!();

    println!("{}", "Retention:".bold());
    println!(
        "  TTL {}s, max {} records",
        config.retention.ttl_seconds, config.retention.max_records
    );
    println!();

    println!("{}", "Metrics:".bold());
    if config.metrics.enabled {
        println!("  Prometheus on port {}", config.metrics.port);
    } else {
        println!("  {}", "disabled".dimmed());
    }

    Ok(())
}

fn validate(config_path: Option<PathBuf>) -> Result<()> {
    println!("Validating configuration...");

    let config = EngineConfig::load_or_default(config_path).context("Failed to load configuration")?;

    config
        .validate()
        .context("Configuration validation failed")?;

    println!("{}", "✓ Configuration is valid".green());

    Ok(())
}

fn generate(output: PathBuf, force: bool) -> Result<()> {
    if output.exists() && !force {
        anyhow::bail!("{} already exists (use --force to overwrite)", output.display());
    }

    EngineConfig::default()
        .to_yaml_file(&output)
        .with_context(|| format!("Failed to write config to {:?}", output))?;

    println!(
        "{}",
        format!("✓ Configuration generated: {}", output.display()).green()
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_config_validates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("aegis-chaos.yaml");

        generate(path.clone(), false).unwrap();
        let config = EngineConfig::from_yaml_file(&path).unwrap();
        config.validate().unwrap();

        assert!(generate(path.clone(), false).is_err());
        generate(path, true).unwrap();
    }
}
