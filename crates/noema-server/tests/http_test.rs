use axum::body::{to_bytes, Body};
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use noema_core::{Engine, EngineConfig};
use noema_server::http::{create_router, AppState};
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

async fn app_with(config: EngineConfig) -> Router {
    let engine = Engine::open(config).await.unwrap();
    create_router(AppState::new(Arc::new(engine)))
}

async fn app() -> Router {
    app_with(EngineConfig::in_memory()).await
}

async fn send(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

async fn assert_fact(app: &Router, s: &str, p: &str, o: &str) -> (StatusCode, Value) {
    send(
        app,
        Method::POST,
        "/facts",
        Some(json!({ "subject": s, "predicate": p, "object": o })),
    )
    .await
}

// ── Health ──

#[tokio::test]
async fn test_health() {
    let app = app().await;
    let (status, body) = send(&app, Method::GET, "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["healthy"], true);
    assert_eq!(body["data"]["fact_count"], 0);
}

#[tokio::test]
async fn test_stats_reports_rules() {
    let app = app().await;
    let (status, body) = send(&app, Method::GET, "/stats", None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["data"]["rule_count"].as_u64().unwrap() > 0);
    assert_eq!(body["data"]["store"]["active_facts"], 0);
}

// ── Facts ──

#[tokio::test]
async fn test_assert_and_query_facts() {
    let app = app().await;
    let (status, body) = assert_fact(&app, "dog", "is-a", "mammal").await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["data"]["id"].is_string());

    let (status, body) = send(&app, Method::GET, "/facts?subject=dog&predicate=is-a", None).await;
    assert_eq!(status, StatusCode::OK);
    let facts = body["data"].as_array().unwrap();
    assert_eq!(facts.len(), 1);
    assert_eq!(facts[0]["predicate"], "is-a");
}

#[tokio::test]
async fn test_contradiction_is_conflict() {
    let app = app().await;
    assert_fact(&app, "paris", "capital-of", "france").await;
    let (status, body) = assert_fact(&app, "paris", "capital-of", "germany").await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["success"], false);
    assert_eq!(body["reason"], "consistency_rejected");

    let (_, body) = send(&app, Method::GET, "/facts?predicate=capital-of", None).await;
    assert_eq!(body["data"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_retract_fact() {
    let app = app().await;
    let (_, body) = assert_fact(&app, "whale", "is-a", "fish").await;
    let id = body["data"]["id"].as_str().unwrap().to_string();

    let (status, body) = send(&app, Method::DELETE, &format!("/facts/{}", id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["retracted"], true);

    let (_, body) = send(&app, Method::GET, "/facts?subject=whale", None).await;
    assert!(body["data"].as_array().unwrap().is_empty());

    let (_, body) = send(
        &app,
        Method::GET,
        "/facts?subject=whale&include_inactive=true",
        None,
    )
    .await;
    assert_eq!(body["data"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_retract_bad_and_unknown_ids() {
    let app = app().await;
    let (status, body) = send(&app, Method::DELETE, "/facts/not-an-id", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["reason"], "invalid_input");

    let unknown = "0".repeat(32);
    let (status, _) = send(&app, Method::DELETE, &format!("/facts/{}", unknown), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

// ── Processing ──

#[tokio::test]
async fn test_process_symbolic() {
    let app = app().await;
    assert_fact(&app, "dog", "is-a", "mammal").await;
    assert_fact(&app, "mammal", "is-a", "animal").await;

    let (status, body) = send(
        &app,
        Method::POST,
        "/process",
        Some(json!({ "text": "(dog, is-a, ?)", "mode": "symbolic" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["answer"], "mammal, animal");
    assert_eq!(body["data"]["mode_used"], "SYMBOLIC");
}

#[tokio::test]
async fn test_process_rejects_unknown_mode() {
    let app = app().await;
    let (status, body) = send(
        &app,
        Method::POST,
        "/process",
        Some(json!({ "text": "hello", "mode": "telepathic" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);
}

// ── Learning ──

#[tokio::test]
async fn test_interactions_consolidate() {
    let app = app().await;
    for _ in 0..5 {
        let (status, body) = send(
            &app,
            Method::POST,
            "/interactions",
            Some(json!({ "input": "Paris is the capital of France.", "outcome": "positive" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["data"]["event_id"].is_string());
    }

    let (status, body) = send(&app, Method::POST, "/consolidate", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["promoted"].as_array().unwrap().len(), 1);

    let (_, body) = send(&app, Method::GET, "/facts?predicate=capital-of", None).await;
    assert_eq!(body["data"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_empty_interaction_is_bad_request() {
    let app = app().await;
    let (status, _) = send(&app, Method::POST, "/interactions", Some(json!({ "input": "" }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

// ── Snapshots ──

#[tokio::test]
async fn test_snapshots() {
    let dir = tempfile::tempdir().unwrap();
    let app = app_with(EngineConfig::default().with_data_dir(dir.path())).await;
    assert_fact(&app, "dog", "is-a", "mammal").await;

    let (status, body) = send(&app, Method::POST, "/snapshots", None).await;
    assert_eq!(status, StatusCode::OK);
    let id = body["data"]["id"].as_str().unwrap().to_string();

    let (status, body) = send(&app, Method::GET, "/snapshots", None).await;
    assert_eq!(status, StatusCode::OK);
    let listed = body["data"].as_array().unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0]["id"], id);
}
