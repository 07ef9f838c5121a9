// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! HTTP client for a running chaos server

use anyhow::{Context, Result};
use reqwest::{Client, Response};
use serde_json::Value;
use std::time::Duration;

use aegis_chaos_core::domain::attack::{AttackId, AttackKind};

#[derive(Debug, Clone)]
pub struct ChaosClient {
    client: Client,
    base_url: String,
}

impl ChaosClient {
    pub fn new(host: &str, port: u16) -> Result<Self> {
        Self::with_base_url(format!("http://{}:{}", host, port))
    }

    pub fn with_base_url(base_url: impl Into<String>) -> Result<Self> {
        // Stopping a lock holder may wait out its grace period
        let client = Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.into(),
        })
    }

    pub async fn health(&self) -> Result<bool> {
        let response = self
            .client
            .get(format!("{}/health", self.base_url))
            .send()
            .await;
        Ok(matches!(response, Ok(r) if r.status().is_success()))
    }

    pub async fn start(&self, kind: AttackKind, params: &[(String, String)]) -> Result<Value> {
        let response = self
            .client
            .post(format!("{}/break/{}", self.base_url, kind))
            .query(params)
            .send()
            .await
            .context("Failed to start attack")?;

        parse(response, "Failed to start attack").await
    }

    pub async fn status(&self, kind: AttackKind, id: AttackId) -> Result<Value> {
        let response = self
            .client
            .get(format!("{}/break/{}/{}", self.base_url, kind, id))
            .send()
            .await
            .context("Failed to get attack status")?;

        parse(response, "Failed to get attack status").await
    }

    pub async fn stop(&self, kind: AttackKind, id: AttackId, force_kill: bool, retry: bool) -> Result<Value> {
        let response = self
            .client
            .post(format!("{}/break/{}/{}/stop", self.base_url, kind, id))
            .query(&[("force_kill", force_kill), ("retry", retry)])
            .send()
            .await
            .context("Failed to stop attack")?;

        parse(response, "Failed to stop attack").await
    }

    pub async fn probe(&self, id: AttackId) -> Result<Value> {
        let response = self
            .client
            .post(format!(
                "{}/break/{}/{}/probe",
                self.base_url,
                AttackKind::LongTransaction,
                id
            ))
            .send()
            .await
            .context("Failed to probe lock")?;

        parse(response, "Failed to probe lock").await
    }

    pub async fn list(&self, kind: Option<AttackKind>) -> Result<Value> {
        let mut request = self.client.get(format!("{}/break", self.base_url));
        if let Some(kind) = kind {
            request = request.query(&[("type", kind.as_str())]);
        }
        let response = request.send().await.context("Failed to list attacks")?;

        parse(response, "Failed to list attacks").await
    }
}

/// Decode a JSON body, turning error responses into their `detail` message.
async fn parse(response: Response, what: &str) -> Result<Value> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        let detail = serde_json::from_str::<Value>(&body)
            .ok()
            .and_then(|v| v.get("detail").and_then(Value::as_str).map(str::to_string))
            .unwrap_or(body);
        anyhow::bail!("{} ({}): {}", what, status, detail);
    }

    response
        .json()
        .await
        .with_context(|| format!("{}: invalid response body", what))
}
