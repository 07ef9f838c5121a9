// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! `serve`: load configuration and run the chaos server in the foreground.

use anyhow::{Context, Result};
use std::path::PathBuf;
use tracing::info;

use aegis_chaos_core::domain::config::EngineConfig;

use crate::server::start_server;

pub async fn handle_command(
    config_path: Option<PathBuf>,
    host: Option<&str>,
    port: Option<u16>,
) -> Result<()> {
    let mut config =
        EngineConfig::load_or_default(config_path).context("Failed to load configuration")?;

    if let Some(host) = host {
        config.server.bind_address = host.to_string();
    }
    if let Some(port) = port {
        config.server.port = port;
    }

    config
        .validate()
        .context("Configuration validation failed")?;

    info!(
        target_api = %config.target.api_base_url,
        container = %config.target.container_name,
        "Configuration loaded"
    );

    start_server(config).await
}
