// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # HTTP API
//!
//! | Route | Description |
//! |-------|-------------|
//! | `POST /break/{kind}` | start an attack; kind is canonical or a legacy alias |
//! | `GET /break/{kind}/{attack_id}` | sanitized record with `elapsed_seconds` |
//! | `POST /break/{kind}/{attack_id}/stop` | idempotent stop / rollback (`force_kill`, `retry`) |
//! | `POST /break/{kind}/{attack_id}/probe` | advisory-lock probe of a lock-holder attack |
//! | `GET /break` | record summaries, optionally `?type=` |
//! | `GET /break/events` | lifecycle events as server-sent events, optionally `?attack_id=` |
//! | `GET /health`, `GET /healthz` | liveness |
//!
//! Errors are `{"detail": "..."}` with a sanitized message.

use axum::{
    extract::{rejection::QueryRejection, Path, Query, State},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive},
        IntoResponse, Response, Sse,
    },
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use futures::stream::{Stream, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use std::str::FromStr;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::application::attack_service::{AttackService, AttackServiceError, StopOptions};
use crate::domain::attack::{AttackId, AttackKind, AttackRecord, DomainError};
use crate::domain::config::EngineConfig;
use crate::domain::sanitize::sanitize_message;
use crate::presentation::params::{
    EnvCorruptQuery, LongTransactionQuery, MigrationCorruptQuery, PoolFloodQuery, ProcessCrashQuery,
    RateLimitFloodQuery, StartQuery,
};

pub struct AppState {
    pub service: Arc<dyn AttackService>,
    pub config: Arc<EngineConfig>,
}

#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    Unprocessable(String),
    Conflict(String),
    Internal(String),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Unprocessable(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn detail(&self) -> &str {
        match self {
            ApiError::NotFound(m) | ApiError::Unprocessable(m) | ApiError::Conflict(m) | ApiError::Internal(m) => m,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let detail = sanitize_message(self.detail());
        (self.status(), Json(json!({ "detail": detail }))).into_response()
    }
}

impl From<AttackServiceError> for ApiError {
    fn from(e: AttackServiceError) -> Self {
        match e {
            AttackServiceError::NotFound(_) => ApiError::NotFound(e.to_string()),
            AttackServiceError::InvalidParameters(_) | AttackServiceError::Unsupported(_) => {
                ApiError::Unprocessable(e.to_string())
            }
            AttackServiceError::Unrecoverable { .. } => ApiError::Conflict(e.to_string()),
            AttackServiceError::RollbackFailed { .. } | AttackServiceError::Internal(_) => {
                ApiError::Internal(e.to_string())
            }
        }
    }
}

impl From<DomainError> for ApiError {
    fn from(e: DomainError) -> Self {
        ApiError::Unprocessable(e.to_string())
    }
}

pub fn app(service: Arc<dyn AttackService>, config: Arc<EngineConfig>) -> Router {
    let state = Arc::new(AppState { service, config });

    let router = Router::new()
        .route("/health", get(health))
        .route("/healthz", get(health))
        .route("/break", get(list_attacks))
        .route("/break/events", get(stream_events));
    let router = with_start::<PoolFloodQuery>(router);
    let router = with_start::<ProcessCrashQuery>(router);
    let router = with_start::<EnvCorruptQuery>(router);
    let router = with_start::<LongTransactionQuery>(router);
    let router = with_start::<MigrationCorruptQuery>(router);
    let router = with_start::<RateLimitFloodQuery>(router);

    router
        .route("/break/{kind}/{attack_id}", get(attack_status))
        .route("/break/{kind}/{attack_id}/stop", post(stop_attack))
        .route("/break/{kind}/{attack_id}/probe", post(probe_lock))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Register the start route of one kind under its canonical and legacy names.
fn with_start<Q: StartQuery>(router: Router<Arc<AppState>>) -> Router<Arc<AppState>> {
    let handler = post(start_attack::<Q>);
    router
        .route(&format!("/break/{}", Q::KIND.as_str()), handler.clone())
        .route(&format!("/break/{}", Q::KIND.legacy_name()), handler)
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok", "service": "aegis-chaos" }))
}

async fn start_attack<Q: StartQuery>(
    State(state): State<Arc<AppState>>,
    query: Result<Query<Q>, QueryRejection>,
) -> Result<Json<Value>, ApiError> {
    let Query(query) = query.map_err(|e| ApiError::Unprocessable(e.body_text()))?;
    let parameters = query.into_parameters(&state.config)?;
    let attack_id = state.service.start(parameters).await?;
    Ok(Json(json!({
        "status": "started",
        "attack_id": attack_id,
        "type": Q::KIND,
    })))
}

/// Parse the path and load the record, treating a kind mismatch as unknown.
async fn load(state: &AppState, kind: &str, attack_id: &str) -> Result<AttackRecord, ApiError> {
    let kind = AttackKind::from_str(kind).map_err(|e| ApiError::NotFound(e.to_string()))?;
    let id = AttackId::from_str(attack_id)
        .map_err(|_| ApiError::NotFound(format!("attack not found: {}", attack_id)))?;
    let record = state.service.status(id).await?;
    if record.kind != kind {
        return Err(ApiError::NotFound(format!("attack not found: {}", id)));
    }
    Ok(record)
}

/// Record as served to clients: the serialized record plus derived fields.
fn record_view(record: &AttackRecord) -> Value {
    let mut view = serde_json::to_value(record).unwrap_or_else(|_| json!({}));
    if let Value::Object(map) = &mut view {
        map.insert("attack_id".to_string(), json!(record.id));
        map.insert("elapsed_seconds".to_string(), json!(record.elapsed_seconds(Utc::now())));
    }
    view
}

async fn attack_status(
    State(state): State<Arc<AppState>>,
    Path((kind, attack_id)): Path<(String, String)>,
) -> Result<Json<Value>, ApiError> {
    let record = load(&state, &kind, &attack_id).await?;
    Ok(Json(record_view(&record)))
}

#[derive(Debug, Default, Deserialize)]
struct StopQuery {
    #[serde(default)]
    force_kill: bool,
    #[serde(default)]
    retry: bool,
}

async fn stop_attack(
    State(state): State<Arc<AppState>>,
    Path((kind, attack_id)): Path<(String, String)>,
    query: Result<Query<StopQuery>, QueryRejection>,
) -> Result<Json<Value>, ApiError> {
    let Query(query) = query.map_err(|e| ApiError::Unprocessable(e.body_text()))?;
    let record = load(&state, &kind, &attack_id).await?;
    let options = StopOptions {
        force_kill: query.force_kill,
        retry: query.retry,
    };
    let outcome = state.service.stop(record.id, options).await?;
    Ok(Json(json!({
        "status": outcome.status(),
        "attack_id": record.id,
        "state": outcome.record().state(),
        "attack": record_view(outcome.record()),
    })))
}

async fn probe_lock(
    State(state): State<Arc<AppState>>,
    Path((kind, attack_id)): Path<(String, String)>,
) -> Result<Json<Value>, ApiError> {
    let record = load(&state, &kind, &attack_id).await?;
    let probe = state.service.probe_lock(record.id).await?;
    Ok(Json(json!({
        "attack_id": record.id,
        "lock_id": probe.lock_id,
        "lock_acquired": probe.lock_acquired,
        "attack_state": probe.attack_state,
        "probed_at": probe.probed_at,
    })))
}

#[derive(Debug, Default, Deserialize)]
struct ListQuery {
    #[serde(rename = "type")]
    kind: Option<String>,
}

async fn list_attacks(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Value>, ApiError> {
    let kind = query.kind.as_deref().map(AttackKind::from_str).transpose()?;
    let attacks = state.service.list(kind).await?;
    Ok(Json(json!({
        "count": attacks.len(),
        "attacks": attacks,
    })))
}

#[derive(Debug, Default, Deserialize)]
struct EventsQuery {
    attack_id: Option<String>,
}

async fn stream_events(
    State(state): State<Arc<AppState>>,
    Query(query): Query<EventsQuery>,
) -> Result<Sse<impl Stream<Item = Result<Event, axum::Error>>>, ApiError> {
    let events = match query.attack_id.as_deref() {
        Some(raw) => {
            let id = AttackId::from_str(raw)
                .map_err(|_| ApiError::Unprocessable(format!("invalid attack_id: {}", raw)))?;
            // Only known attacks can be followed
            state.service.status(id).await?;
            state.service.subscribe_attack(id)
        }
        None => state.service.subscribe(),
    };
    let stream = events.map(|event| Event::default().event(event.name()).json_data(&event));
    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}
