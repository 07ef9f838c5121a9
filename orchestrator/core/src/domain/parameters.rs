// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Attack Parameters
//!
//! Typed, validated inputs for each attack kind. Parameters are resolved
//! against the engine configuration at the HTTP edge and validated here before
//! a record is created, so a runner never sees an out-of-range value.

use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::path::PathBuf;
use std::sync::LazyLock;
use std::time::Duration;

use crate::domain::attack::{AttackKind, DomainError};
use crate::domain::sanitize::redact_url;

pub const POOL_CONNECTIONS: (u32, u32) = (1, 500);
pub const POOL_HOLD_SECONDS: (u32, u32) = (1, 600);
pub const ATTACK_DURATION_SECONDS: (u32, u32) = (1, 3600);
pub const LOCK_COUNT: (u32, u32) = (1, 10_000);
pub const RATE_MAX_REQUESTS: (u32, u32) = (1, 1000);
pub const RATE_WINDOW_SECONDS: (u32, u32) = (1, 3600);
pub const FLOOD_REQUESTS: (u32, u32) = (1, 10_000);
pub const FLOOD_RATE: (f64, f64) = (0.1, 100.0);

pub const DEFAULT_ENV_VAR: &str = "EXTERNAL_API_KEY";
pub const DEFAULT_WRONG_VALUE: &str = "INVALID_VALUE_12345";
pub const DEFAULT_LOCK_TABLE: &str = "items";
pub const DEFAULT_RATE_ENDPOINT: &str = "/api/v1/health";

static SQL_IDENTIFIER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_]{0,62}(\.[A-Za-z_][A-Za-z0-9_]{0,62})?$")
        .expect("identifier pattern is valid")
});

static ENV_VAR_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("env var pattern is valid"));

fn check_range(field: &'static str, value: u32, (min, max): (u32, u32)) -> Result<(), DomainError> {
    if value < min || value > max {
        return Err(DomainError::invalid(
            field,
            format!("must be between {} and {}, got {}", min, max, value),
        ));
    }
    Ok(())
}

fn check_duration(duration: Option<u32>) -> Result<(), DomainError> {
    match duration {
        Some(seconds) => check_range("duration_seconds", seconds, ATTACK_DURATION_SECONDS),
        None => Ok(()),
    }
}

fn check_base_url(field: &'static str, url: &str) -> Result<(), DomainError> {
    if !(url.starts_with("http://") || url.starts_with("https://")) {
        return Err(DomainError::invalid(field, "must be an http(s) URL"));
    }
    Ok(())
}

/// Validate a (optionally schema-qualified) SQL identifier.
pub fn validate_identifier(field: &'static str, name: &str) -> Result<(), DomainError> {
    if !SQL_IDENTIFIER.is_match(name) {
        return Err(DomainError::invalid(
            field,
            format!("'{}' is not a valid SQL identifier", name),
        ));
    }
    Ok(())
}

/// Connection string for the target database. Credentials never leave the
/// process: `Debug`, `Display` and `Serialize` all redact the userinfo part.
#[derive(Clone, PartialEq, Eq)]
pub struct DatabaseUrl(String);

impl DatabaseUrl {
    pub fn new(url: impl Into<String>) -> Result<Self, DomainError> {
        let url = url.into();
        if !(url.starts_with("postgres://") || url.starts_with("postgresql://")) {
            return Err(DomainError::invalid(
                "database_url",
                "must be a postgres:// or postgresql:// URL",
            ));
        }
        Ok(Self(url))
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn redacted(&self) -> String {
        redact_url(&self.0)
    }
}

impl fmt::Debug for DatabaseUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("DatabaseUrl").field(&self.redacted()).finish()
    }
}

impl fmt::Display for DatabaseUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.redacted())
    }
}

impl Serialize for DatabaseUrl {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.redacted())
    }
}

impl<'de> Deserialize<'de> for DatabaseUrl {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        DatabaseUrl::new(raw).map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolFloodParams {
    pub target_base_url: String,
    pub connections: u32,
    pub hold_seconds: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CrashType {
    #[default]
    Stop,
    Restart,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessCrashParams {
    pub target_base_url: String,
    pub container_name: String,
    pub crash_type: CrashType,
    pub duration_seconds: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnvFailureType {
    #[default]
    Missing,
    Wrong,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvCorruptParams {
    pub target_base_url: String,
    pub env_file: PathBuf,
    pub env_var_name: String,
    pub failure_type: EnvFailureType,
    pub wrong_value: String,
    pub compose_file: Option<PathBuf>,
    pub compose_service: String,
    pub duration_seconds: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockType {
    #[default]
    TableLock,
    RowLock,
    AdvisoryLock,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LongTransactionParams {
    pub database_url: DatabaseUrl,
    pub lock_type: LockType,
    pub duration_seconds: Option<u32>,
    pub target_table: String,
    pub lock_count: u32,
    /// Derived from the attack id when omitted.
    pub advisory_lock_id: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationFailureType {
    #[default]
    InvalidVersion,
    MissingVersion,
    FutureVersion,
    DbBehindCode,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigrationCorruptParams {
    pub target_base_url: String,
    pub database_url: DatabaseUrl,
    pub failure_type: MigrationFailureType,
    pub duration_seconds: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateLimitFloodParams {
    pub target_base_url: String,
    pub max_requests: u32,
    pub window_seconds: u32,
    pub flood_requests: u32,
    pub flood_rate: f64,
    pub target_endpoint: String,
    pub duration_seconds: Option<u32>,
}

impl RateLimitFloodParams {
    /// Requests the target should reject once the restrictive limit is live.
    pub fn expected_rate_limited(&self) -> u64 {
        u64::from(self.flood_requests.saturating_sub(self.max_requests))
    }
}

/// Parameters of one attack. Serializes as the bare per-kind object; the
/// owning record carries the kind tag.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum AttackParameters {
    PoolFlood(PoolFloodParams),
    ProcessCrash(ProcessCrashParams),
    EnvCorrupt(EnvCorruptParams),
    LongTransaction(LongTransactionParams),
    MigrationCorrupt(MigrationCorruptParams),
    RateLimitFlood(RateLimitFloodParams),
}

impl AttackParameters {
    pub fn kind(&self) -> AttackKind {
        match self {
            AttackParameters::PoolFlood(_) => AttackKind::PoolFlood,
            AttackParameters::ProcessCrash(_) => AttackKind::ProcessCrash,
            AttackParameters::EnvCorrupt(_) => AttackKind::EnvCorrupt,
            AttackParameters::LongTransaction(_) => AttackKind::LongTransaction,
            AttackParameters::MigrationCorrupt(_) => AttackKind::MigrationCorrupt,
            AttackParameters::RateLimitFlood(_) => AttackKind::RateLimitFlood,
        }
    }

    /// Time-boxed attacks schedule their own end; `None` runs until stopped
    /// (or, for one-shot attacks, until the runner is done).
    pub fn duration(&self) -> Option<Duration> {
        let seconds = match self {
            AttackParameters::PoolFlood(_) => None,
            AttackParameters::ProcessCrash(p) => p.duration_seconds,
            AttackParameters::EnvCorrupt(p) => p.duration_seconds,
            AttackParameters::LongTransaction(p) => p.duration_seconds,
            AttackParameters::MigrationCorrupt(p) => p.duration_seconds,
            AttackParameters::RateLimitFlood(p) => p.duration_seconds,
        };
        seconds.map(|s| Duration::from_secs(u64::from(s)))
    }

    /// Whether this attack leaves damage that an explicit stop must undo.
    pub fn has_rollback(&self) -> bool {
        match self {
            AttackParameters::PoolFlood(_) | AttackParameters::LongTransaction(_) => false,
            AttackParameters::ProcessCrash(p) => p.crash_type == CrashType::Stop,
            AttackParameters::EnvCorrupt(_)
            | AttackParameters::MigrationCorrupt(_)
            | AttackParameters::RateLimitFlood(_) => true,
        }
    }

    pub fn validate(&self) -> Result<(), DomainError> {
        match self {
            AttackParameters::PoolFlood(p) => {
                check_base_url("target_base_url", &p.target_base_url)?;
                check_range("connections", p.connections, POOL_CONNECTIONS)?;
                check_range("hold_seconds", p.hold_seconds, POOL_HOLD_SECONDS)
            }
            AttackParameters::ProcessCrash(p) => {
                check_base_url("target_base_url", &p.target_base_url)?;
                if p.container_name.trim().is_empty() {
                    return Err(DomainError::invalid("container_name", "must not be empty"));
                }
                check_duration(p.duration_seconds)
            }
            AttackParameters::EnvCorrupt(p) => {
                check_base_url("target_base_url", &p.target_base_url)?;
                if !ENV_VAR_NAME.is_match(&p.env_var_name) {
                    return Err(DomainError::invalid(
                        "env_var_name",
                        format!("'{}' is not a valid variable name", p.env_var_name),
                    ));
                }
                if p.wrong_value.contains('\n') {
                    return Err(DomainError::invalid("wrong_value", "must be a single line"));
                }
                if p.env_file.as_os_str().is_empty() {
                    return Err(DomainError::invalid("env_file", "must not be empty"));
                }
                if p.compose_service.trim().is_empty() {
                    return Err(DomainError::invalid("compose_service", "must not be empty"));
                }
                check_duration(p.duration_seconds)
            }
            AttackParameters::LongTransaction(p) => {
                validate_identifier("target_table", &p.target_table)?;
                check_range("lock_count", p.lock_count, LOCK_COUNT)?;
                if let Some(id) = p.advisory_lock_id {
                    if id < 0 {
                        return Err(DomainError::invalid("advisory_lock_id", "must be non-negative"));
                    }
                }
                check_duration(p.duration_seconds)
            }
            AttackParameters::MigrationCorrupt(p) => {
                check_base_url("target_base_url", &p.target_base_url)?;
                check_duration(p.duration_seconds)
            }
            AttackParameters::RateLimitFlood(p) => {
                check_base_url("target_base_url", &p.target_base_url)?;
                check_range("max_requests", p.max_requests, RATE_MAX_REQUESTS)?;
                check_range("window_seconds", p.window_seconds, RATE_WINDOW_SECONDS)?;
                check_range("flood_requests", p.flood_requests, FLOOD_REQUESTS)?;
                if !(FLOOD_RATE.0..=FLOOD_RATE.1).contains(&p.flood_rate) {
                    return Err(DomainError::invalid(
                        "flood_rate",
                        format!("must be between {} and {}", FLOOD_RATE.0, FLOOD_RATE.1),
                    ));
                }
                if !p.target_endpoint.starts_with('/') {
                    return Err(DomainError::invalid("target_endpoint", "must start with '/'"));
                }
                check_duration(p.duration_seconds)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rate_limit() -> RateLimitFloodParams {
        RateLimitFloodParams {
            target_base_url: "http://localhost:8000".to_string(),
            max_requests: 5,
            window_seconds: 60,
            flood_requests: 20,
            flood_rate: 5.0,
            target_endpoint: DEFAULT_RATE_ENDPOINT.to_string(),
            duration_seconds: None,
        }
    }

    #[test]
    fn test_pool_flood_ranges() {
        let mut params = PoolFloodParams {
            target_base_url: "http://localhost:8000".to_string(),
            connections: 20,
            hold_seconds: 60,
        };
        assert!(AttackParameters::PoolFlood(params.clone()).validate().is_ok());

        params.connections = 0;
        let err = AttackParameters::PoolFlood(params.clone()).validate().unwrap_err();
        assert!(matches!(err, DomainError::InvalidParameter { field: "connections", .. }));

        params.connections = 500;
        params.hold_seconds = 601;
        let err = AttackParameters::PoolFlood(params).validate().unwrap_err();
        assert!(matches!(err, DomainError::InvalidParameter { field: "hold_seconds", .. }));
    }

    #[test]
    fn test_rate_limit_flood_rate_bounds() {
        let mut params = rate_limit();
        params.flood_rate = 0.05;
        assert!(AttackParameters::RateLimitFlood(params.clone()).validate().is_err());
        params.flood_rate = 100.0;
        assert!(AttackParameters::RateLimitFlood(params).validate().is_ok());
    }

    #[test]
    fn test_expected_rate_limited_saturates() {
        let mut params = rate_limit();
        assert_eq!(params.expected_rate_limited(), 15);
        params.max_requests = 50;
        assert_eq!(params.expected_rate_limited(), 0);
    }

    #[test]
    fn test_identifier_validation() {
        assert!(validate_identifier("t", "items").is_ok());
        assert!(validate_identifier("t", "public.items").is_ok());
        assert!(validate_identifier("t", "items; DROP TABLE users").is_err());
        assert!(validate_identifier("t", "1items").is_err());
        assert!(validate_identifier("t", "a.b.c").is_err());
    }

    #[test]
    fn test_database_url_is_redacted_everywhere() {
        let url = DatabaseUrl::new("postgresql://chaos:s3cret@db:5432/target").unwrap();
        assert_eq!(url.expose(), "postgresql://chaos:s3cret@db:5432/target");
        assert!(!format!("{:?}", url).contains("s3cret"));
        assert!(!url.to_string().contains("s3cret"));
        let json = serde_json::to_string(&url).unwrap();
        assert!(!json.contains("s3cret"));
        assert!(json.contains("db:5432/target"));
    }

    #[test]
    fn test_database_url_requires_postgres_scheme() {
        assert!(DatabaseUrl::new("mysql://root@db/app").is_err());
    }

    #[test]
    fn test_rollback_applicability_by_kind() {
        let crash = ProcessCrashParams {
            target_base_url: "http://localhost:8000".to_string(),
            container_name: "api".to_string(),
            crash_type: CrashType::Restart,
            duration_seconds: None,
        };
        assert!(!AttackParameters::ProcessCrash(crash.clone()).has_rollback());
        let stop = ProcessCrashParams {
            crash_type: CrashType::Stop,
            ..crash
        };
        assert!(AttackParameters::ProcessCrash(stop).has_rollback());
        assert!(AttackParameters::RateLimitFlood(rate_limit()).has_rollback());
    }

    #[test]
    fn test_env_var_name_must_be_identifier() {
        let params = EnvCorruptParams {
            target_base_url: "http://localhost:8000".to_string(),
            env_file: PathBuf::from(".env"),
            env_var_name: "BAD NAME".to_string(),
            failure_type: EnvFailureType::Missing,
            wrong_value: DEFAULT_WRONG_VALUE.to_string(),
            compose_file: None,
            compose_service: "api".to_string(),
            duration_seconds: None,
        };
        assert!(AttackParameters::EnvCorrupt(params).validate().is_err());
    }
}
