// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Target Client Port
//!
//! The HTTP surface of the system under test, as seen by the runners. Every
//! call is bounded by an explicit timeout in the implementation; a hung target
//! surfaces as [`TargetError::Timeout`], never as a stalled attack.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

pub const POOL_HOLD_PATH: &str = "/api/v1/pool/hold";
pub const ENV_PROBE_PATH: &str = "/api/v1/test/env";
pub const RATE_LIMIT_CONFIG_PATH: &str = "/api/v1/rate_limit/config";
pub const RATE_LIMIT_STATS_PATH: &str = "/api/v1/rate_limit/stats";
pub const MIGRATION_STATUS_PATH: &str = "/api/v1/migrations/status";

#[derive(Debug, Clone, Error)]
pub enum TargetError {
    #[error("request to {url} timed out")]
    Timeout { url: String },

    #[error("target unreachable: {0}")]
    Unreachable(String),

    #[error("target returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("unexpected response: {0}")]
    Decode(String),
}

/// Rate limiter settings exposed by the target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    pub enabled: bool,
    pub max_requests: u32,
    pub window_seconds: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_requests: 100,
            window_seconds: 60,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitConfigUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_requests: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub window_seconds: Option<u32>,
}

impl From<&RateLimitConfig> for RateLimitConfigUpdate {
    fn from(config: &RateLimitConfig) -> Self {
        Self {
            enabled: Some(config.enabled),
            max_requests: Some(config.max_requests),
            window_seconds: Some(config.window_seconds),
        }
    }
}

/// Response to one pool-hold request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HoldResponse {
    pub status_code: u16,
    pub body: Value,
}

/// Response to an ad-hoc endpoint probe. `body` is the JSON payload when the
/// target sent one, otherwise a short text snippet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EndpointProbe {
    pub status_code: u16,
    pub body: Value,
}

impl EndpointProbe {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status_code)
    }
}

/// Outcome of one flood request. Transport failures carry no status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestOutcome {
    Status(u16),
    Failed(String),
}

#[async_trait]
pub trait TargetClient: Send + Sync {
    /// Ask the target to check out a database connection and hold it.
    async fn hold_connection(&self, base_url: &str, seconds: u32) -> Result<HoldResponse, TargetError>;

    /// One liveness probe. Any transport error or non-200 status is "down".
    async fn probe_liveness(&self, base_url: &str) -> bool;

    async fn probe_endpoint(&self, base_url: &str, path: &str) -> Result<EndpointProbe, TargetError>;

    async fn rate_limit_config(&self, base_url: &str) -> Result<RateLimitConfig, TargetError>;

    /// Push an update and return the configuration the target reports back.
    async fn update_rate_limit_config(
        &self,
        base_url: &str,
        update: &RateLimitConfigUpdate,
    ) -> Result<RateLimitConfig, TargetError>;

    async fn rate_limit_stats(&self, base_url: &str) -> Result<Value, TargetError>;

    async fn send_request(&self, base_url: &str, path: &str) -> RequestOutcome;

    /// Latest migration revision known to the target's code, if it reports one.
    async fn migration_head(&self, base_url: &str) -> Result<Option<String>, TargetError>;
}
