// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Chaos server wiring: collaborators, attack service, HTTP surface.

use anyhow::{Context, Result};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use aegis_chaos_core::{
    application::{Collaborators, StandardAttackService},
    domain::{config::EngineConfig, repository::AttackRepository},
    infrastructure::{
        DockerRuntime, EnvFileStore, EventBus, HttpTargetClient, InMemoryAttackRepository,
        PgDatabaseProvider,
    },
    presentation::api::app,
};

/// Build the real collaborators from configuration.
pub async fn build_collaborators(config: &EngineConfig) -> Result<Collaborators> {
    let runtime = DockerRuntime::new(
        config.docker.socket_path.clone(),
        config.timeouts.docker_seconds,
        config.timeouts.docker_stop_seconds,
    )
    .context("Failed to initialize Docker runtime")?;

    // Crash attacks need Docker; the rest do not
    if let Err(e) = runtime.healthcheck().await {
        warn!("Docker is not reachable, process crash attacks will fail: {}", e);
    }

    let target = HttpTargetClient::new(&config.timeouts, &config.liveness)
        .context("Failed to initialize target HTTP client")?;

    Ok(Collaborators {
        runtime: Arc::new(runtime),
        target: Arc::new(target),
        databases: Arc::new(PgDatabaseProvider::new(
            config.timeouts.database(),
            config.target.schema_version_table.clone(),
        )),
        env_files: EnvFileStore::new(),
    })
}

pub async fn start_server(config: EngineConfig) -> Result<()> {
    let config = Arc::new(config);

    if config.metrics.enabled {
        let addr = SocketAddr::from(([0, 0, 0, 0], config.metrics.port));
        PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()
            .context("Failed to install Prometheus exporter")?;
        info!("Metrics exporter listening on {}", addr);
    }

    let collaborators = build_collaborators(&config).await?;
    let repository: Arc<dyn AttackRepository> = Arc::new(InMemoryAttackRepository::new());
    let service = Arc::new(StandardAttackService::new(
        config.clone(),
        repository,
        collaborators,
        EventBus::with_default_capacity(),
    ));

    let sweeper_cancel = CancellationToken::new();
    let sweeper = service.spawn_retention_sweeper(sweeper_cancel.clone());

    let router = app(service.clone(), config.clone());

    let addr = format!("{}:{}", config.server.bind_address, config.server.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    info!("Chaos server listening on {}", addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server failed")?;

    info!("Chaos server shutting down");

    sweeper_cancel.cancel();
    if let Err(e) = sweeper.await {
        error!("Retention sweeper ended abnormally: {}", e);
    }
    service.shutdown().await;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            info!("Received SIGTERM signal");
        },
    }
}
