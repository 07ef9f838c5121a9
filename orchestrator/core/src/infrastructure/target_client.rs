// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! HTTP Target Client
//!
//! reqwest adapter for the system under test.
//!
//! # API Endpoints
//!
//! - `POST /api/v1/pool/hold?seconds=N` - Hold a pooled DB connection
//! - `GET /healthz` - Liveness (path configurable)
//! - `GET /api/v1/test/env` - Exercise env-dependent configuration
//! - `GET|POST /api/v1/rate_limit/config` - Read / update rate limiter
//! - `GET /api/v1/rate_limit/stats` - Rate limiter counters
//! - `GET /api/v1/migrations/status` - Migration head known to the code

use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;

use crate::domain::config::{LivenessConfig, TimeoutConfig};
use crate::domain::target::{
    EndpointProbe, HoldResponse, RateLimitConfig, RateLimitConfigUpdate, RequestOutcome, TargetClient,
    TargetError, MIGRATION_STATUS_PATH, POOL_HOLD_PATH, RATE_LIMIT_CONFIG_PATH, RATE_LIMIT_STATS_PATH,
};

/// Longest text body kept when a response is not JSON.
const BODY_SNIPPET_LEN: usize = 200;

#[derive(Deserialize)]
struct ConfigEnvelope {
    config: RateLimitConfig,
}

#[derive(Deserialize)]
struct StatsEnvelope {
    stats: Value,
}

#[derive(Deserialize)]
struct MigrationStatus {
    head_version: Option<String>,
}

pub struct HttpTargetClient {
    client: Client,
    pool_hold_grace: Duration,
    liveness_path: String,
    liveness_timeout: Duration,
}

impl HttpTargetClient {
    pub fn new(timeouts: &TimeoutConfig, liveness: &LivenessConfig) -> Result<Self, TargetError> {
        let client = Client::builder()
            .timeout(timeouts.http_request())
            .connect_timeout(timeouts.http_connect())
            .build()
            .map_err(|e| TargetError::Unreachable(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            pool_hold_grace: timeouts.pool_hold_grace(),
            liveness_path: liveness.path.clone(),
            liveness_timeout: liveness.probe_timeout(),
        })
    }

    fn build_url(base_url: &str, path: &str) -> String {
        format!("{}{}", base_url.trim_end_matches('/'), path)
    }

    fn transport_error(url: &str, e: reqwest::Error) -> TargetError {
        if e.is_timeout() {
            TargetError::Timeout { url: url.to_string() }
        } else if e.is_decode() {
            TargetError::Decode(e.to_string())
        } else {
            TargetError::Unreachable(e.without_url().to_string())
        }
    }

    /// JSON payload if the body parses, otherwise a short text snippet.
    async fn body_value(response: Response) -> Value {
        match response.bytes().await {
            Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_else(|_| {
                let text = String::from_utf8_lossy(&bytes);
                Value::String(text.chars().take(BODY_SNIPPET_LEN).collect())
            }),
            Err(_) => Value::Null,
        }
    }

    async fn expect_success(url: &str, response: Response) -> Result<Response, TargetError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| format!("HTTP {}", status));
        tracing::debug!(url, status = status.as_u16(), "Target returned error status");
        Err(TargetError::Status {
            status: status.as_u16(),
            body: body.chars().take(BODY_SNIPPET_LEN).collect(),
        })
    }

    async fn get_json<T: for<'de> Deserialize<'de>>(&self, url: &str) -> Result<T, TargetError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| Self::transport_error(url, e))?;
        let response = Self::expect_success(url, response).await?;
        response
            .json::<T>()
            .await
            .map_err(|e| TargetError::Decode(e.without_url().to_string()))
    }
}

#[async_trait]
impl TargetClient for HttpTargetClient {
    async fn hold_connection(&self, base_url: &str, seconds: u32) -> Result<HoldResponse, TargetError> {
        let url = Self::build_url(base_url, POOL_HOLD_PATH);
        let response = self
            .client
            .post(&url)
            .query(&[("seconds", seconds)])
            .timeout(Duration::from_secs(u64::from(seconds)) + self.pool_hold_grace)
            .send()
            .await
            .map_err(|e| Self::transport_error(&url, e))?;
        let status_code = response.status().as_u16();
        Ok(HoldResponse {
            status_code,
            body: Self::body_value(response).await,
        })
    }

    async fn probe_liveness(&self, base_url: &str) -> bool {
        let url = Self::build_url(base_url, &self.liveness_path);
        match self.client.get(&url).timeout(self.liveness_timeout).send().await {
            Ok(response) => response.status() == StatusCode::OK,
            Err(e) => {
                tracing::debug!(url, error = %e.without_url(), "Liveness probe failed");
                false
            }
        }
    }

    async fn probe_endpoint(&self, base_url: &str, path: &str) -> Result<EndpointProbe, TargetError> {
        let url = Self::build_url(base_url, path);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| Self::transport_error(&url, e))?;
        let status_code = response.status().as_u16();
        Ok(EndpointProbe {
            status_code,
            body: Self::body_value(response).await,
        })
    }

    async fn rate_limit_config(&self, base_url: &str) -> Result<RateLimitConfig, TargetError> {
        let url = Self::build_url(base_url, RATE_LIMIT_CONFIG_PATH);
        let envelope: ConfigEnvelope = self.get_json(&url).await?;
        Ok(envelope.config)
    }

    async fn update_rate_limit_config(
        &self,
        base_url: &str,
        update: &RateLimitConfigUpdate,
    ) -> Result<RateLimitConfig, TargetError> {
        let url = Self::build_url(base_url, RATE_LIMIT_CONFIG_PATH);
        let response = self
            .client
            .post(&url)
            .json(update)
            .send()
            .await
            .map_err(|e| Self::transport_error(&url, e))?;
        let response = Self::expect_success(&url, response).await?;
        let envelope: ConfigEnvelope = response
            .json()
            .await
            .map_err(|e| TargetError::Decode(e.without_url().to_string()))?;
        Ok(envelope.config)
    }

    async fn rate_limit_stats(&self, base_url: &str) -> Result<Value, TargetError> {
        let url = Self::build_url(base_url, RATE_LIMIT_STATS_PATH);
        let envelope: StatsEnvelope = self.get_json(&url).await?;
        Ok(envelope.stats)
    }

    async fn send_request(&self, base_url: &str, path: &str) -> RequestOutcome {
        let url = Self::build_url(base_url, path);
        match self.client.get(&url).send().await {
            Ok(response) => RequestOutcome::Status(response.status().as_u16()),
            Err(e) => RequestOutcome::Failed(Self::transport_error(&url, e).to_string()),
        }
    }

    async fn migration_head(&self, base_url: &str) -> Result<Option<String>, TargetError> {
        let url = Self::build_url(base_url, MIGRATION_STATUS_PATH);
        let status: MigrationStatus = self.get_json(&url).await?;
        Ok(status.head_version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::target::ENV_PROBE_PATH;
    use mockito::Matcher;
    use serde_json::json;

    fn client() -> HttpTargetClient {
        let timeouts = TimeoutConfig {
            http_request_ms: 2_000,
            pool_hold_grace_ms: 1_000,
            ..Default::default()
        };
        HttpTargetClient::new(&timeouts, &LivenessConfig::default()).unwrap()
    }

    #[tokio::test]
    async fn test_rate_limit_config_is_unwrapped() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/api/v1/rate_limit/config")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"config":{"enabled":true,"max_requests":100,"window_seconds":60}}"#)
            .create_async()
            .await;

        let config = client().rate_limit_config(&server.url()).await.unwrap();
        assert_eq!(config, RateLimitConfig::default());
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_update_posts_json_body() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/api/v1/rate_limit/config")
            .match_body(Matcher::Json(json!({
                "enabled": true,
                "max_requests": 5,
                "window_seconds": 60
            })))
            .with_status(200)
            .with_body(r#"{"config":{"enabled":true,"max_requests":5,"window_seconds":60}}"#)
            .create_async()
            .await;

        let update = RateLimitConfigUpdate {
            enabled: Some(true),
            max_requests: Some(5),
            window_seconds: Some(60),
        };
        let applied = client()
            .update_rate_limit_config(&server.url(), &update)
            .await
            .unwrap();
        assert_eq!(applied.max_requests, 5);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_error_status_is_reported() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api/v1/rate_limit/config")
            .with_status(503)
            .with_body("maintenance")
            .create_async()
            .await;

        let err = client().rate_limit_config(&server.url()).await.unwrap_err();
        assert!(matches!(err, TargetError::Status { status: 503, .. }));
    }

    #[tokio::test]
    async fn test_hold_passes_seconds_and_keeps_body() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/api/v1/pool/hold")
            .match_query(Matcher::UrlEncoded("seconds".into(), "3".into()))
            .with_status(200)
            .with_body(r#"{"held_seconds":3}"#)
            .create_async()
            .await;

        let response = client().hold_connection(&server.url(), 3).await.unwrap();
        assert_eq!(response.status_code, 200);
        assert_eq!(response.body, json!({"held_seconds": 3}));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_flood_request_reports_status() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api/v1/health")
            .with_status(429)
            .create_async()
            .await;

        let outcome = client().send_request(&server.url(), "/api/v1/health").await;
        assert_eq!(outcome, RequestOutcome::Status(429));
    }

    #[tokio::test]
    async fn test_liveness_is_false_for_non_200() {
        let mut server = mockito::Server::new_async().await;
        server.mock("GET", "/healthz").with_status(500).create_async().await;
        assert!(!client().probe_liveness(&server.url()).await);
    }

    #[tokio::test]
    async fn test_text_body_becomes_snippet() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api/v1/test/env")
            .with_status(500)
            .with_body("Internal Server Error")
            .create_async()
            .await;

        let probe = client()
            .probe_endpoint(&server.url(), ENV_PROBE_PATH)
            .await
            .unwrap();
        assert_eq!(probe.status_code, 500);
        assert_eq!(probe.body, json!("Internal Server Error"));
    }

    #[tokio::test]
    async fn test_migration_head() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api/v1/migrations/status")
            .with_status(200)
            .with_body(r#"{"head_version":"003","current_version":"003"}"#)
            .create_async()
            .await;

        let head = client().migration_head(&server.url()).await.unwrap();
        assert_eq!(head.as_deref(), Some("003"));
    }
}
