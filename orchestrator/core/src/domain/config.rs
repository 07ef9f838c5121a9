// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Engine Configuration
//
// Defines the configuration schema for the chaos engine, including:
// - HTTP bind address and port
// - Default target (API base URL, container, env file, compose service, database)
// - Timeouts for every external call
// - Settle delays, liveness polling and lock-holder polling
// - Verification tolerance and record retention
// - Logging and metrics settings

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::domain::parameters::{validate_identifier, DatabaseUrl};
use crate::domain::repository::RetentionPolicy;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub target: TargetConfig,

    #[serde(default)]
    pub timeouts: TimeoutConfig,

    #[serde(default)]
    pub timings: TimingConfig,

    #[serde(default)]
    pub liveness: LivenessConfig,

    #[serde(default)]
    pub lock_holder: LockHolderConfig,

    #[serde(default)]
    pub verification: VerificationConfig,

    #[serde(default)]
    pub retention: RetentionConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub metrics: MetricsConfig,

    #[serde(default)]
    pub docker: DockerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_port(),
        }
    }
}

/// Defaults applied when a start request omits a target parameter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetConfig {
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,

    #[serde(default = "default_container_name")]
    pub container_name: String,

    /// Relative paths resolve against `workspace_root`.
    #[serde(default = "default_env_file")]
    pub env_file: PathBuf,

    #[serde(default = "default_compose_file")]
    pub compose_file: Option<PathBuf>,

    #[serde(default = "default_compose_service")]
    pub compose_service: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database_url: Option<DatabaseUrl>,

    #[serde(default = "default_schema_version_table")]
    pub schema_version_table: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace_root: Option<PathBuf>,
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            api_base_url: default_api_base_url(),
            container_name: default_container_name(),
            env_file: default_env_file(),
            compose_file: default_compose_file(),
            compose_service: default_compose_service(),
            database_url: None,
            schema_version_table: default_schema_version_table(),
            workspace_root: None,
        }
    }
}

impl TargetConfig {
    pub fn resolve_path(&self, path: &Path) -> PathBuf {
        match &self.workspace_root {
            Some(root) if path.is_relative() => root.join(path),
            _ => path.to_path_buf(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutConfig {
    #[serde(default = "default_http_request_ms")]
    pub http_request_ms: u64,

    #[serde(default = "default_http_connect_ms")]
    pub http_connect_ms: u64,

    /// Added to the requested hold time for pool-hold requests.
    #[serde(default = "default_pool_hold_grace_ms")]
    pub pool_hold_grace_ms: u64,

    #[serde(default = "default_database_ms")]
    pub database_ms: u64,

    #[serde(default = "default_docker_seconds")]
    pub docker_seconds: u64,

    /// Grace period docker gives a container before SIGKILL on stop/restart.
    #[serde(default = "default_docker_stop_seconds")]
    pub docker_stop_seconds: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            http_request_ms: default_http_request_ms(),
            http_connect_ms: default_http_connect_ms(),
            pool_hold_grace_ms: default_pool_hold_grace_ms(),
            database_ms: default_database_ms(),
            docker_seconds: default_docker_seconds(),
            docker_stop_seconds: default_docker_stop_seconds(),
        }
    }
}

impl TimeoutConfig {
    pub fn http_request(&self) -> Duration {
        Duration::from_millis(self.http_request_ms)
    }

    pub fn http_connect(&self) -> Duration {
        Duration::from_millis(self.http_connect_ms)
    }

    pub fn pool_hold_grace(&self) -> Duration {
        Duration::from_millis(self.pool_hold_grace_ms)
    }

    pub fn database(&self) -> Duration {
        Duration::from_millis(self.database_ms)
    }
}

/// Settle delays after mutating the target.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimingConfig {
    #[serde(default = "default_post_stop_settle_ms")]
    pub post_stop_settle_ms: u64,

    #[serde(default = "default_post_start_settle_ms")]
    pub post_start_settle_ms: u64,

    #[serde(default = "default_post_restart_settle_ms")]
    pub post_restart_settle_ms: u64,

    #[serde(default = "default_post_config_settle_ms")]
    pub post_config_settle_ms: u64,

    /// How long a stop waits for a cancelled cooperative attack to wind down.
    #[serde(default = "default_cancel_grace_ms")]
    pub cancel_grace_ms: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            post_stop_settle_ms: default_post_stop_settle_ms(),
            post_start_settle_ms: default_post_start_settle_ms(),
            post_restart_settle_ms: default_post_restart_settle_ms(),
            post_config_settle_ms: default_post_config_settle_ms(),
            cancel_grace_ms: default_cancel_grace_ms(),
        }
    }
}

impl TimingConfig {
    pub fn post_stop_settle(&self) -> Duration {
        Duration::from_millis(self.post_stop_settle_ms)
    }

    pub fn post_start_settle(&self) -> Duration {
        Duration::from_millis(self.post_start_settle_ms)
    }

    pub fn post_restart_settle(&self) -> Duration {
        Duration::from_millis(self.post_restart_settle_ms)
    }

    pub fn post_config_settle(&self) -> Duration {
        Duration::from_millis(self.post_config_settle_ms)
    }

    pub fn cancel_grace(&self) -> Duration {
        Duration::from_millis(self.cancel_grace_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LivenessConfig {
    #[serde(default = "default_liveness_path")]
    pub path: String,

    #[serde(default = "default_liveness_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_liveness_interval_ms")]
    pub interval_ms: u64,

    #[serde(default = "default_liveness_probe_timeout_ms")]
    pub probe_timeout_ms: u64,
}

impl Default for LivenessConfig {
    fn default() -> Self {
        Self {
            path: default_liveness_path(),
            max_attempts: default_liveness_attempts(),
            interval_ms: default_liveness_interval_ms(),
            probe_timeout_ms: default_liveness_probe_timeout_ms(),
        }
    }
}

impl LivenessConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockHolderConfig {
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// How long a stop waits for the holder to release before reporting
    /// `stopping` (or force-killing, when requested).
    #[serde(default = "default_stop_grace_ms")]
    pub stop_grace_ms: u64,
}

impl Default for LockHolderConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            stop_grace_ms: default_stop_grace_ms(),
        }
    }
}

impl LockHolderConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn stop_grace(&self) -> Duration {
        Duration::from_millis(self.stop_grace_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationConfig {
    /// Fraction of expected 429s that must be observed.
    #[serde(default = "default_rate_limit_tolerance")]
    pub rate_limit_tolerance: f64,

    /// Requests above the restrictive limit sent by the post-restore burst.
    #[serde(default = "default_recovery_burst_margin")]
    pub recovery_burst_margin: u32,
}

impl Default for VerificationConfig {
    fn default() -> Self {
        Self {
            rate_limit_tolerance: default_rate_limit_tolerance(),
            recovery_burst_margin: default_recovery_burst_margin(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionConfig {
    #[serde(default = "default_ttl_seconds")]
    pub ttl_seconds: u64,

    #[serde(default = "default_max_records")]
    pub max_records: usize,

    #[serde(default = "default_sweep_interval_seconds")]
    pub sweep_interval_seconds: u64,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            ttl_seconds: default_ttl_seconds(),
            max_records: default_max_records(),
            sweep_interval_seconds: default_sweep_interval_seconds(),
        }
    }
}

impl RetentionConfig {
    pub fn policy(&self) -> RetentionPolicy {
        RetentionPolicy {
            ttl: chrono::Duration::seconds(self.ttl_seconds.min(i64::MAX as u64) as i64),
            max_records: self.max_records,
        }
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_seconds)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    /// `compact` or `json`
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: default_metrics_port(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DockerConfig {
    /// Unix socket path; local defaults when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub socket_path: Option<String>,
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_api_base_url() -> String {
    "http://localhost:8000".to_string()
}

fn default_container_name() -> String {
    "target_server_api".to_string()
}

fn default_env_file() -> PathBuf {
    PathBuf::from("target_server/backend/.env")
}

fn default_compose_file() -> Option<PathBuf> {
    Some(PathBuf::from("target_server/docker-compose.yml"))
}

fn default_compose_service() -> String {
    "api".to_string()
}

fn default_schema_version_table() -> String {
    "alembic_version".to_string()
}

fn default_http_request_ms() -> u64 {
    10_000
}

fn default_http_connect_ms() -> u64 {
    5_000
}

fn default_pool_hold_grace_ms() -> u64 {
    15_000
}

fn default_database_ms() -> u64 {
    10_000
}

fn default_docker_seconds() -> u64 {
    120
}

fn default_docker_stop_seconds() -> u64 {
    10
}

fn default_post_stop_settle_ms() -> u64 {
    2_000
}

fn default_post_start_settle_ms() -> u64 {
    3_000
}

fn default_post_restart_settle_ms() -> u64 {
    5_000
}

fn default_post_config_settle_ms() -> u64 {
    1_000
}

fn default_cancel_grace_ms() -> u64 {
    10_000
}

fn default_liveness_path() -> String {
    "/healthz".to_string()
}

fn default_liveness_attempts() -> u32 {
    10
}

fn default_liveness_interval_ms() -> u64 {
    1_000
}

fn default_liveness_probe_timeout_ms() -> u64 {
    2_000
}

fn default_poll_interval_ms() -> u64 {
    1_000
}

fn default_stop_grace_ms() -> u64 {
    2_000
}

fn default_rate_limit_tolerance() -> f64 {
    0.8
}

fn default_recovery_burst_margin() -> u32 {
    5
}

fn default_ttl_seconds() -> u64 {
    24 * 60 * 60
}

fn default_max_records() -> usize {
    10_000
}

fn default_sweep_interval_seconds() -> u64 {
    300
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "compact".to_string()
}

fn default_metrics_port() -> u16 {
    9091
}

impl EngineConfig {
    /// Load configuration from YAML file
    pub fn from_yaml_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to YAML file
    pub fn to_yaml_file(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let yaml = serde_yaml::to_string(self)?;
        std::fs::write(path, yaml)?;
        Ok(())
    }

    pub fn from_yaml_str(yaml: &str) -> anyhow::Result<Self> {
        let config = serde_yaml::from_str(yaml)?;
        Ok(config)
    }

    /// Discover configuration file using precedence order
    /// 1. AEGIS_CHAOS_CONFIG_PATH environment variable
    /// 2. ./aegis-chaos.yaml (working directory)
    /// 3. ~/.aegis/chaos.yaml (user home)
    /// 4. /etc/aegis/chaos.yaml (system)
    pub fn discover_config() -> Option<PathBuf> {
        if let Ok(path) = std::env::var("AEGIS_CHAOS_CONFIG_PATH") {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        let cwd = PathBuf::from("./aegis-chaos.yaml");
        if cwd.exists() {
            return Some(cwd);
        }

        if let Some(home) = dirs::home_dir() {
            let user_config = home.join(".aegis").join("chaos.yaml");
            if user_config.exists() {
                return Some(user_config);
            }
        }

        let system_config = PathBuf::from("/etc/aegis/chaos.yaml");
        if system_config.exists() {
            return Some(system_config);
        }

        None
    }

    /// Load configuration with discovery, fallback to default
    pub fn load_or_default(cli_path: Option<PathBuf>) -> anyhow::Result<Self> {
        // Explicit path must exist and parse
        if let Some(path) = cli_path {
            tracing::info!("Loading configuration from explicit path: {:?}", path);
            let mut config = Self::from_yaml_file(&path)
                .map_err(|e| anyhow::anyhow!("Failed to load config at {:?}: {}", path, e))?;
            config.apply_env_overrides();
            return Ok(config);
        }

        if let Some(config_path) = Self::discover_config() {
            tracing::info!("Loading configuration from discovered path: {:?}", config_path);
            let mut config = Self::from_yaml_file(config_path)?;
            config.apply_env_overrides();
            Ok(config)
        } else {
            tracing::warn!("No configuration file found in standard locations. Using defaults.");
            let mut config = Self::default();
            config.apply_env_overrides();
            Ok(config)
        }
    }

    /// Apply environment variable overrides to configuration
    pub fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("AEGIS_CHAOS_TARGET_API_URL") {
            tracing::info!("Environment override: AEGIS_CHAOS_TARGET_API_URL={}", val);
            self.target.api_base_url = val;
        }

        if let Ok(val) = std::env::var("AEGIS_CHAOS_TARGET_DATABASE_URL") {
            match DatabaseUrl::new(val) {
                Ok(url) => {
                    tracing::info!("Environment override: AEGIS_CHAOS_TARGET_DATABASE_URL={}", url);
                    self.target.database_url = Some(url);
                }
                Err(e) => {
                    tracing::warn!("Invalid value for AEGIS_CHAOS_TARGET_DATABASE_URL: {}. Ignoring.", e);
                }
            }
        }

        if let Ok(val) = std::env::var("AEGIS_CHAOS_CONTAINER_NAME") {
            tracing::info!("Environment override: AEGIS_CHAOS_CONTAINER_NAME={}", val);
            self.target.container_name = val;
        }

        if let Ok(val) = std::env::var("AEGIS_CHAOS_ENV_FILE") {
            tracing::info!("Environment override: AEGIS_CHAOS_ENV_FILE={}", val);
            self.target.env_file = PathBuf::from(val);
        }

        if let Ok(val) = std::env::var("AEGIS_CHAOS_COMPOSE_FILE") {
            tracing::info!("Environment override: AEGIS_CHAOS_COMPOSE_FILE={}", val);
            self.target.compose_file = Some(PathBuf::from(val));
        }

        if let Ok(val) = std::env::var("AEGIS_CHAOS_BIND_ADDRESS") {
            tracing::info!("Environment override: AEGIS_CHAOS_BIND_ADDRESS={}", val);
            self.server.bind_address = val;
        }

        if let Ok(val) = std::env::var("AEGIS_CHAOS_PORT") {
            match val.parse::<u16>() {
                Ok(port) => {
                    tracing::info!("Environment override: AEGIS_CHAOS_PORT={}", port);
                    self.server.port = port;
                }
                Err(_) => {
                    tracing::warn!("Invalid value for AEGIS_CHAOS_PORT: '{}'. Ignoring.", val);
                }
            }
        }

        if let Ok(val) = std::env::var("AEGIS_CHAOS_DOCKER_SOCKET") {
            tracing::info!("Environment override: AEGIS_CHAOS_DOCKER_SOCKET={}", val);
            self.docker.socket_path = Some(val);
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        let base = &self.target.api_base_url;
        if !(base.starts_with("http://") || base.starts_with("https://")) {
            anyhow::bail!("Invalid target.api_base_url: '{}'. Must be an http(s) URL", base);
        }

        if self.target.container_name.trim().is_empty() {
            anyhow::bail!("target.container_name must not be empty");
        }

        validate_identifier("schema_version_table", &self.target.schema_version_table)
            .map_err(|e| anyhow::anyhow!("Invalid target.schema_version_table: {}", e))?;

        let tolerance = self.verification.rate_limit_tolerance;
        if !(tolerance > 0.0 && tolerance <= 1.0) {
            anyhow::bail!(
                "Invalid verification.rate_limit_tolerance: {}. Must be in (0, 1]",
                tolerance
            );
        }

        if self.lock_holder.poll_interval_ms == 0 {
            anyhow::bail!("lock_holder.poll_interval_ms must be greater than 0");
        }

        if self.liveness.max_attempts == 0 {
            anyhow::bail!("liveness.max_attempts must be greater than 0");
        }

        if self.timeouts.http_request_ms == 0 || self.timeouts.database_ms == 0 {
            anyhow::bail!("timeouts must be greater than 0");
        }

        if !matches!(self.logging.format.as_str(), "compact" | "json") {
            anyhow::bail!(
                "Invalid logging.format: '{}'. Must be 'compact' or 'json'",
                self.logging.format
            );
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config_is_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.liveness.max_attempts, 10);
        assert_eq!(config.timings.post_restart_settle_ms, 5_000);
        assert_eq!(config.verification.rate_limit_tolerance, 0.8);
        assert_eq!(config.target.schema_version_table, "alembic_version");
    }

    #[test]
    fn test_partial_yaml_fills_defaults() {
        let yaml = r#"
server:
  port: 9000
target:
  api_base_url: http://target:8000
  database_url: postgresql://chaos:pw@db:5432/target
timings:
  post_stop_settle_ms: 0
"#;
        let config = EngineConfig::from_yaml_str(yaml).unwrap();
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.bind_address, "0.0.0.0");
        assert_eq!(config.target.api_base_url, "http://target:8000");
        assert_eq!(
            config.target.database_url.as_ref().map(|u| u.expose()),
            Some("postgresql://chaos:pw@db:5432/target")
        );
        assert_eq!(config.timings.post_stop_settle_ms, 0);
        assert_eq!(config.timings.post_start_settle_ms, 3_000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_yaml_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("aegis-chaos.yaml");
        let mut config = EngineConfig::default();
        config.server.port = 9100;
        config.to_yaml_file(&path).unwrap();
        let loaded = EngineConfig::from_yaml_file(&path).unwrap();
        assert_eq!(loaded.server.port, 9100);
        assert_eq!(loaded.target.container_name, config.target.container_name);
    }

    #[test]
    fn test_validation_rejects_bad_tolerance() {
        let mut config = EngineConfig::default();
        config.verification.rate_limit_tolerance = 1.5;
        assert!(config.validate().is_err());
        config.verification.rate_limit_tolerance = 0.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_zero_poll_interval() {
        let mut config = EngineConfig::default();
        config.lock_holder.poll_interval_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_relative_paths_resolve_against_workspace_root() {
        let mut target = TargetConfig::default();
        assert_eq!(
            target.resolve_path(Path::new(".env")),
            PathBuf::from(".env")
        );
        target.workspace_root = Some(PathBuf::from("/srv/chaos"));
        assert_eq!(
            target.resolve_path(Path::new("backend/.env")),
            PathBuf::from("/srv/chaos/backend/.env")
        );
        assert_eq!(
            target.resolve_path(Path::new("/abs/.env")),
            PathBuf::from("/abs/.env")
        );
    }
}
