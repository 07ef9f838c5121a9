// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Query-string parameters of `POST /break/{kind}`.
//!
//! Every field is optional. Omitted target parameters (base URL, container,
//! env file, database URL) come from the `target` section of the engine
//! configuration; omitted attack parameters take the defaults below. Range
//! checks happen later, in [`AttackParameters::validate`].

use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::path::PathBuf;

use crate::domain::attack::AttackKind;
use crate::domain::config::EngineConfig;
use crate::domain::parameters::{
    AttackParameters, CrashType, DatabaseUrl, EnvCorruptParams, EnvFailureType, LockType, LongTransactionParams,
    MigrationCorruptParams, MigrationFailureType, PoolFloodParams, ProcessCrashParams, RateLimitFloodParams,
    DEFAULT_ENV_VAR, DEFAULT_LOCK_TABLE, DEFAULT_RATE_ENDPOINT, DEFAULT_WRONG_VALUE,
};
use crate::presentation::api::ApiError;

const DEFAULT_CONNECTIONS: u32 = 20;
const DEFAULT_HOLD_SECONDS: u32 = 60;
const DEFAULT_LOCK_COUNT: u32 = 10;
const DEFAULT_MAX_REQUESTS: u32 = 10;
const DEFAULT_WINDOW_SECONDS: u32 = 60;
const DEFAULT_FLOOD_REQUESTS: u32 = 30;
const DEFAULT_FLOOD_RATE: f64 = 5.0;

/// A start request for one attack kind.
pub trait StartQuery: DeserializeOwned + Send + 'static {
    const KIND: AttackKind;

    fn into_parameters(self, config: &EngineConfig) -> Result<AttackParameters, ApiError>;
}

fn base_url(raw: Option<String>, config: &EngineConfig) -> String {
    raw.unwrap_or_else(|| config.target.api_base_url.clone())
}

fn database_url(raw: Option<String>, config: &EngineConfig) -> Result<DatabaseUrl, ApiError> {
    match raw {
        Some(raw) => Ok(DatabaseUrl::new(raw)?),
        None => config.target.database_url.clone().ok_or_else(|| {
            ApiError::Unprocessable(
                "database_url is required when target.database_url is not configured".to_string(),
            )
        }),
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct PoolFloodQuery {
    pub connections: Option<u32>,
    pub hold_seconds: Option<u32>,
    pub target_base_url: Option<String>,
}

impl StartQuery for PoolFloodQuery {
    const KIND: AttackKind = AttackKind::PoolFlood;

    fn into_parameters(self, config: &EngineConfig) -> Result<AttackParameters, ApiError> {
        Ok(AttackParameters::PoolFlood(PoolFloodParams {
            target_base_url: base_url(self.target_base_url, config),
            connections: self.connections.unwrap_or(DEFAULT_CONNECTIONS),
            hold_seconds: self.hold_seconds.unwrap_or(DEFAULT_HOLD_SECONDS),
        }))
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct ProcessCrashQuery {
    pub crash_type: Option<CrashType>,
    pub duration_seconds: Option<u32>,
    pub container_name: Option<String>,
    pub target_base_url: Option<String>,
}

impl StartQuery for ProcessCrashQuery {
    const KIND: AttackKind = AttackKind::ProcessCrash;

    fn into_parameters(self, config: &EngineConfig) -> Result<AttackParameters, ApiError> {
        Ok(AttackParameters::ProcessCrash(ProcessCrashParams {
            target_base_url: base_url(self.target_base_url, config),
            container_name: self
                .container_name
                .unwrap_or_else(|| config.target.container_name.clone()),
            crash_type: self.crash_type.unwrap_or_default(),
            duration_seconds: self.duration_seconds,
        }))
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct EnvCorruptQuery {
    pub env_var_name: Option<String>,
    pub failure_type: Option<EnvFailureType>,
    pub wrong_value: Option<String>,
    pub duration_seconds: Option<u32>,
    pub env_file: Option<PathBuf>,
    pub compose_file: Option<PathBuf>,
    pub compose_service: Option<String>,
    pub target_base_url: Option<String>,
}

impl StartQuery for EnvCorruptQuery {
    const KIND: AttackKind = AttackKind::EnvCorrupt;

    fn into_parameters(self, config: &EngineConfig) -> Result<AttackParameters, ApiError> {
        let target = &config.target;
        let env_file = self.env_file.unwrap_or_else(|| target.env_file.clone());
        let compose_file = self.compose_file.or_else(|| target.compose_file.clone());
        Ok(AttackParameters::EnvCorrupt(EnvCorruptParams {
            target_base_url: base_url(self.target_base_url, config),
            env_file: target.resolve_path(&env_file),
            env_var_name: self.env_var_name.unwrap_or_else(|| DEFAULT_ENV_VAR.to_string()),
            failure_type: self.failure_type.unwrap_or_default(),
            wrong_value: self.wrong_value.unwrap_or_else(|| DEFAULT_WRONG_VALUE.to_string()),
            compose_file: compose_file.map(|file| target.resolve_path(&file)),
            compose_service: self
                .compose_service
                .unwrap_or_else(|| target.compose_service.clone()),
            duration_seconds: self.duration_seconds,
        }))
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct LongTransactionQuery {
    pub lock_type: Option<LockType>,
    pub duration_seconds: Option<u32>,
    pub target_table: Option<String>,
    pub lock_count: Option<u32>,
    pub advisory_lock_id: Option<i64>,
    pub database_url: Option<String>,
}

impl StartQuery for LongTransactionQuery {
    const KIND: AttackKind = AttackKind::LongTransaction;

    fn into_parameters(self, config: &EngineConfig) -> Result<AttackParameters, ApiError> {
        Ok(AttackParameters::LongTransaction(LongTransactionParams {
            database_url: database_url(self.database_url, config)?,
            lock_type: self.lock_type.unwrap_or_default(),
            duration_seconds: self.duration_seconds,
            target_table: self.target_table.unwrap_or_else(|| DEFAULT_LOCK_TABLE.to_string()),
            lock_count: self.lock_count.unwrap_or(DEFAULT_LOCK_COUNT),
            advisory_lock_id: self.advisory_lock_id,
        }))
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct MigrationCorruptQuery {
    pub failure_type: Option<MigrationFailureType>,
    pub duration_seconds: Option<u32>,
    pub database_url: Option<String>,
    pub target_base_url: Option<String>,
}

impl StartQuery for MigrationCorruptQuery {
    const KIND: AttackKind = AttackKind::MigrationCorrupt;

    fn into_parameters(self, config: &EngineConfig) -> Result<AttackParameters, ApiError> {
        Ok(AttackParameters::MigrationCorrupt(MigrationCorruptParams {
            target_base_url: base_url(self.target_base_url, config),
            database_url: database_url(self.database_url, config)?,
            failure_type: self.failure_type.unwrap_or_default(),
            duration_seconds: self.duration_seconds,
        }))
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct RateLimitFloodQuery {
    pub max_requests: Option<u32>,
    pub window_seconds: Option<u32>,
    pub flood_requests: Option<u32>,
    pub flood_rate: Option<f64>,
    pub target_endpoint: Option<String>,
    pub duration_seconds: Option<u32>,
    pub target_base_url: Option<String>,
}

impl StartQuery for RateLimitFloodQuery {
    const KIND: AttackKind = AttackKind::RateLimitFlood;

    fn into_parameters(self, config: &EngineConfig) -> Result<AttackParameters, ApiError> {
        Ok(AttackParameters::RateLimitFlood(RateLimitFloodParams {
            target_base_url: base_url(self.target_base_url, config),
            max_requests: self.max_requests.unwrap_or(DEFAULT_MAX_REQUESTS),
            window_seconds: self.window_seconds.unwrap_or(DEFAULT_WINDOW_SECONDS),
            flood_requests: self.flood_requests.unwrap_or(DEFAULT_FLOOD_REQUESTS),
            flood_rate: self.flood_rate.unwrap_or(DEFAULT_FLOOD_RATE),
            target_endpoint: self
                .target_endpoint
                .unwrap_or_else(|| DEFAULT_RATE_ENDPOINT.to_string()),
            duration_seconds: self.duration_seconds,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_defaults() {
        let config = EngineConfig::default();
        let params = PoolFloodQuery::default().into_parameters(&config).unwrap();
        match params {
            AttackParameters::PoolFlood(p) => {
                assert_eq!(p.connections, 20);
                assert_eq!(p.hold_seconds, 60);
                assert_eq!(p.target_base_url, config.target.api_base_url);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_database_url_falls_back_to_config() {
        let mut config = EngineConfig::default();
        let err = LongTransactionQuery::default().into_parameters(&config).unwrap_err();
        assert!(matches!(err, ApiError::Unprocessable(_)));

        config.target.database_url = Some(DatabaseUrl::new("postgres://chaos@db/target").unwrap());
        let params = LongTransactionQuery::default().into_parameters(&config).unwrap();
        match params {
            AttackParameters::LongTransaction(p) => {
                assert_eq!(p.lock_type, LockType::TableLock);
                assert_eq!(p.target_table, "items");
                assert_eq!(p.lock_count, 10);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_env_file_resolves_against_workspace_root() {
        let mut config = EngineConfig::default();
        config.target.workspace_root = Some(PathBuf::from("/srv/target"));
        let query = EnvCorruptQuery {
            env_file: Some(PathBuf::from(".env")),
            ..Default::default()
        };
        match query.into_parameters(&config).unwrap() {
            AttackParameters::EnvCorrupt(p) => {
                assert_eq!(p.env_file, PathBuf::from("/srv/target/.env"));
                assert_eq!(p.env_var_name, "EXTERNAL_API_KEY");
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}
