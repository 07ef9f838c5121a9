// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use crate::domain::runtime::{ContainerRuntime, RuntimeError, ServiceRef};
use async_trait::async_trait;
use bollard::container::{
    InspectContainerOptions, ListContainersOptions, RestartContainerOptions, StartContainerOptions,
    StopContainerOptions,
};
use bollard::errors::Error as DockerError;
use bollard::Docker;
use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;
use tracing::info;

const COMPOSE_PROJECT_LABEL: &str = "com.docker.compose.project";
const COMPOSE_SERVICE_LABEL: &str = "com.docker.compose.service";

pub struct DockerRuntime {
    docker: Docker,
    /// Seconds docker waits before SIGKILL on stop/restart.
    stop_timeout: i64,
    /// Upper bound on any single engine call.
    call_timeout: Duration,
}

fn status_code(e: &DockerError) -> Option<u16> {
    match e {
        DockerError::DockerResponseServerError { status_code, .. } => Some(*status_code),
        _ => None,
    }
}

impl DockerRuntime {
    pub fn new(socket_path: Option<String>, call_timeout_secs: u64, stop_timeout_secs: u64) -> Result<Self, RuntimeError> {
        let docker = if let Some(path) = socket_path {
            Docker::connect_with_unix(&path, call_timeout_secs, bollard::API_DEFAULT_VERSION).map_err(|e| {
                RuntimeError::Unavailable(format!(
                    "Failed to connect to Docker at {}: {}\n\n\
                     Ensure Docker is running and the socket path is correct.",
                    path, e
                ))
            })?
        } else {
            Docker::connect_with_local_defaults().map_err(|e| {
                RuntimeError::Unavailable(format!(
                    "Failed to connect to Docker: {}\n\n\
                     Common causes:\n\
                     - Docker daemon not running (check: docker ps)\n\
                     - Permission denied accessing Docker socket\n\
                     - Current user not in 'docker' group",
                    e
                ))
            })?
        };

        Ok(Self {
            docker,
            stop_timeout: stop_timeout_secs.min(i64::MAX as u64) as i64,
            call_timeout: Duration::from_secs(call_timeout_secs),
        })
    }

    /// Verify Docker daemon is accessible
    pub async fn healthcheck(&self) -> Result<(), RuntimeError> {
        self.bounded(self.docker.ping())
            .await?
            .map_err(|e| RuntimeError::Unavailable(format!("Cannot connect to Docker daemon: {}", e)))?;
        Ok(())
    }

    async fn bounded<T>(&self, call: impl Future<Output = T>) -> Result<T, RuntimeError> {
        tokio::time::timeout(self.call_timeout, call)
            .await
            .map_err(|_| RuntimeError::Timeout(self.call_timeout.as_secs()))
    }

    async fn service_containers(&self, service: &ServiceRef) -> Result<Vec<(String, String)>, RuntimeError> {
        let mut labels = vec![format!("{}={}", COMPOSE_SERVICE_LABEL, service.service)];
        if let Some(project) = &service.project {
            labels.push(format!("{}={}", COMPOSE_PROJECT_LABEL, project));
        }
        let mut filters = HashMap::new();
        filters.insert("label".to_string(), labels);

        let options = ListContainersOptions::<String> {
            all: true,
            filters,
            ..Default::default()
        };
        let containers = self
            .bounded(self.docker.list_containers(Some(options)))
            .await?
            .map_err(|e| RuntimeError::Unavailable(e.to_string()))?;

        Ok(containers
            .into_iter()
            .filter_map(|c| {
                let id = c.id?;
                let name = c
                    .names
                    .and_then(|names| names.into_iter().next())
                    .map(|n| n.trim_start_matches('/').to_string())
                    .unwrap_or_else(|| id.chars().take(12).collect());
                Some((id, name))
            })
            .collect())
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn is_running(&self, name: &str) -> Result<bool, RuntimeError> {
        let result = self
            .bounded(self.docker.inspect_container(name, None::<InspectContainerOptions>))
            .await?;
        match result {
            Ok(info) => Ok(info.state.and_then(|s| s.running).unwrap_or(false)),
            Err(e) if status_code(&e) == Some(404) => Ok(false),
            Err(e) => Err(RuntimeError::Unavailable(e.to_string())),
        }
    }

    async fn stop(&self, name: &str) -> Result<(), RuntimeError> {
        let options = StopContainerOptions { t: self.stop_timeout };
        match self.bounded(self.docker.stop_container(name, Some(options))).await? {
            Ok(()) => {
                info!("Stopped container: {}", name);
                Ok(())
            }
            // 304: already stopped
            Err(e) if status_code(&e) == Some(304) => Ok(()),
            Err(e) if status_code(&e) == Some(404) => Err(RuntimeError::ContainerNotFound(name.to_string())),
            Err(e) => Err(RuntimeError::StopFailed(e.to_string())),
        }
    }

    async fn start(&self, name: &str) -> Result<(), RuntimeError> {
        match self
            .bounded(self.docker.start_container(name, None::<StartContainerOptions<String>>))
            .await?
        {
            Ok(()) => {
                info!("Started container: {}", name);
                Ok(())
            }
            // 304: already running
            Err(e) if status_code(&e) == Some(304) => Ok(()),
            Err(e) if status_code(&e) == Some(404) => Err(RuntimeError::ContainerNotFound(name.to_string())),
            Err(e) => Err(RuntimeError::StartFailed(e.to_string())),
        }
    }

    async fn restart(&self, name: &str) -> Result<(), RuntimeError> {
        let options = RestartContainerOptions {
            t: self.stop_timeout as isize,
        };
        match self.bounded(self.docker.restart_container(name, Some(options))).await? {
            Ok(()) => {
                info!("Restarted container: {}", name);
                Ok(())
            }
            Err(e) if status_code(&e) == Some(404) => Err(RuntimeError::ContainerNotFound(name.to_string())),
            Err(e) => Err(RuntimeError::RestartFailed(e.to_string())),
        }
    }

    async fn restart_service(&self, service: &ServiceRef) -> Result<Vec<String>, RuntimeError> {
        let containers = self.service_containers(service).await?;
        if containers.is_empty() {
            return Err(RuntimeError::ContainerNotFound(format!(
                "no containers for compose service '{}'{}",
                service.service,
                service
                    .project
                    .as_ref()
                    .map(|p| format!(" in project '{}'", p))
                    .unwrap_or_default()
            )));
        }

        let mut restarted = Vec::with_capacity(containers.len());
        for (id, name) in containers {
            self.restart(&id).await?;
            restarted.push(name);
        }
        Ok(restarted)
    }
}
