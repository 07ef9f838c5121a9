// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! HTTP surface tests: the axum router driven with `oneshot` over the
//! in-memory target stack.

mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::Value;
use std::time::Duration;
use tower::ServiceExt;

use aegis_chaos_core::domain::attack::AttackState;
use aegis_chaos_core::presentation::api::app;

use common::*;

fn router(h: &Harness) -> Router {
    app(h.service.clone(), h.config.clone())
}

async fn send(app: &Router, method: &str, uri: &str) -> (StatusCode, Value) {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into()))
    };
    (status, body)
}

async fn poll_until_terminal(app: &Router, uri: &str) -> Value {
    for _ in 0..250 {
        let (status, body) = send(app, "GET", uri).await;
        assert_eq!(status, StatusCode::OK);
        let state: AttackState = serde_json::from_value(body["state"].clone()).unwrap();
        if state.is_terminal() {
            return body;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("{} never reached a terminal state", uri);
}

#[tokio::test]
async fn test_health_endpoints() {
    let h = harness();
    let app = router(&h);
    for uri in ["/health", "/healthz"] {
        let (status, body) = send(&app, "GET", uri).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }
}

#[tokio::test]
async fn test_start_via_legacy_route_and_read_status() {
    let h = harness();
    let app = router(&h);

    let (status, body) = send(&app, "POST", "/break/db_pool?connections=5&hold_seconds=2").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "started");
    assert_eq!(body["type"], "pool_flood");
    let id = body["attack_id"].as_str().unwrap().to_string();

    let record = poll_until_terminal(&app, &format!("/break/pool_flood/{}", id)).await;
    assert_eq!(record["state"], "completed");
    assert_eq!(record["attack_id"], id.as_str());
    assert_eq!(record["parameters"]["connections"], 5);
    assert!(record["elapsed_seconds"].as_f64().unwrap() >= 0.0);

    // Legacy name reaches the same record
    let (status, _) = send(&app, "GET", &format!("/break/db_pool/{}", id)).await;
    assert_eq!(status, StatusCode::OK);

    // A record is only reachable under its own kind
    let (status, _) = send(&app, "GET", &format!("/break/process_crash/{}", id)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = send(&app, "POST", &format!("/break/pool_flood/{}/stop", id)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "already_completed");
}

#[tokio::test]
async fn test_unknown_ids_are_404() {
    let h = harness();
    let app = router(&h);

    let id = aegis_chaos_core::domain::attack::AttackId::new();
    let (status, body) = send(&app, "GET", &format!("/break/env_corrupt/{}", id)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["detail"].as_str().unwrap().contains("not found"));

    let (status, _) = send(&app, "POST", &format!("/break/env_corrupt/{}/stop", id)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(&app, "GET", "/break/env_corrupt/not-a-uuid").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_invalid_parameters_are_422() {
    let h = harness();
    let app = router(&h);

    let (status, body) = send(&app, "POST", "/break/pool_flood?connections=0").await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(body["detail"].as_str().unwrap().contains("connections"));

    let (status, _) = send(&app, "POST", "/break/pool_flood?connections=many").await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    let (status, _) = send(&app, "POST", "/break/long_transaction?target_table=items;drop").await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    let (status, _) = send(&app, "POST", "/break/rate_limit_flood?flood_rate=500").await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn test_database_url_required_without_config() {
    let mut config = fast_config();
    config.target.database_url = None;
    let h = harness_with(config);
    let app = router(&h);

    let (status, body) = send(&app, "POST", "/break/long_transaction").await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(body["detail"].as_str().unwrap().contains("database_url"));
}

#[tokio::test]
async fn test_failed_attack_stop_is_409_with_sanitized_detail() {
    let h = harness();
    let app = router(&h);

    let (status, body) = send(&app, "POST", "/break/api_crash?container_name=ghost").await;
    assert_eq!(status, StatusCode::OK);
    let id = body["attack_id"].as_str().unwrap().to_string();

    let record = poll_until_terminal(&app, &format!("/break/process_crash/{}", id)).await;
    assert_eq!(record["state"], "failed");

    let (status, body) = send(&app, "POST", &format!("/break/process_crash/{}/stop", id)).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(body["detail"].as_str().unwrap().contains("ghost"));
}

#[tokio::test]
async fn test_lock_attack_status_never_leaks_credentials() {
    let h = harness();
    let app = router(&h);

    let (status, body) = send(&app, "POST", "/break/long_transactions?lock_type=advisory_lock&duration_seconds=1").await;
    assert_eq!(status, StatusCode::OK);
    let id = body["attack_id"].as_str().unwrap().to_string();

    let (status, probe) = send(&app, "POST", &format!("/break/long_transaction/{}/probe", id)).await;
    assert_eq!(status, StatusCode::OK);
    assert!(probe["lock_id"].is_i64());

    let record = poll_until_terminal(&app, &format!("/break/long_transaction/{}", id)).await;
    assert_eq!(record["state"], "completed");
    let text = record.to_string();
    assert!(!text.contains("s3cret"));
    assert!(text.contains("db.test"));
}

#[tokio::test]
async fn test_list_filters_by_type() {
    let h = harness();
    let app = router(&h);

    send(&app, "POST", "/break/pool_flood?connections=1&hold_seconds=1").await;
    send(&app, "POST", "/break/migration_corrupt").await;

    let (status, body) = send(&app, "GET", "/break").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["count"], 2);

    let (status, body) = send(&app, "GET", "/break?type=migrations").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["count"], 1);
    assert_eq!(body["attacks"][0]["type"], "migration_corrupt");

    let (status, _) = send(&app, "GET", "/break?type=meteor").await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
}


#[tokio::test]
async fn test_event_stream_filters_by_known_attack_id() {
    let h = harness();
    let app = router(&h);

    let (status, body) = send(&app, "GET", "/break/events?attack_id=not-a-uuid").await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(body["detail"].as_str().unwrap().contains("attack_id"));

    let unknown = uuid::Uuid::new_v4();
    let (status, _) = send(&app, "GET", &format!("/break/events?attack_id={}", unknown)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (_, body) = send(&app, "POST", "/break/long_transactions?lock_type=table_lock").await;
    let id = body["attack_id"].as_str().unwrap().to_string();

    // The stream never ends; only the head is read
    let request = Request::builder()
        .uri(format!("/break/events?attack_id={}", id))
        .body(Body::empty())
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["content-type"], "text/event-stream");

    h.service.shutdown().await;
}
