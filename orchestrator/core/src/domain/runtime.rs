// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum RuntimeError {
    #[error("Container not found: {0}")]
    ContainerNotFound(String),
    #[error("Failed to stop container: {0}")]
    StopFailed(String),
    #[error("Failed to start container: {0}")]
    StartFailed(String),
    #[error("Failed to restart container: {0}")]
    RestartFailed(String),
    #[error("Container runtime unavailable: {0}")]
    Unavailable(String),
    #[error("Container runtime call timed out after {0}s")]
    Timeout(u64),
}

/// A compose-managed service, addressed by its compose labels.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceRef {
    /// `com.docker.compose.project`; `None` matches any project.
    pub project: Option<String>,
    /// `com.docker.compose.service`
    pub service: String,
}

impl ServiceRef {
    pub fn new(project: Option<String>, service: impl Into<String>) -> Self {
        Self {
            project,
            service: service.into(),
        }
    }

    /// Derive the project the way compose does by default: the name of the
    /// directory holding the compose file, lowercased, restricted to
    /// `[a-z0-9_-]`.
    pub fn from_compose_file(compose_file: Option<&Path>, service: impl Into<String>) -> Self {
        let project = compose_file
            .and_then(|file| file.parent())
            .and_then(|dir| dir.file_name())
            .map(|name| {
                name.to_string_lossy()
                    .to_lowercase()
                    .chars()
                    .filter(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '-')
                    .collect::<String>()
            })
            .filter(|name| !name.is_empty());
        Self::new(project, service)
    }
}

#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// `Ok(false)` for a stopped or unknown container.
    async fn is_running(&self, name: &str) -> Result<bool, RuntimeError>;
    async fn stop(&self, name: &str) -> Result<(), RuntimeError>;
    async fn start(&self, name: &str) -> Result<(), RuntimeError>;
    async fn restart(&self, name: &str) -> Result<(), RuntimeError>;
    /// Restart every container of a compose service; returns their names.
    async fn restart_service(&self, service: &ServiceRef) -> Result<Vec<String>, RuntimeError>;
}
