//! HTTP-level tests driving the router with `tower::ServiceExt::oneshot`.

use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use paperscout_discovery::{DedupEngine, Orchestrator, OrchestratorConfig, SourceRegistry};
use paperscout_ranker::Ranker;
use paperscout_session::{AugmentConfig, QueryAugmenter, SessionManager};
use paperscout_test_utils::{paper, paper_with_doi, MockEmbedder, MockSource, MockValidator};
use paperscout_web::{router::build_router, state::AppState};
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use tokio::sync::broadcast;
use tower::ServiceExt;

fn app() -> Router {
    let (tx, _) = broadcast::channel(64);
    let source = MockSource::new("mock").with_papers(vec![
        paper_with_doi("Graph attention networks", "10.1/gat", 2018, 900),
        paper("Message passing networks", 2021, 120),
        paper("Spectral graph convolutions", 2017, 450),
    ]);
    let mut registry = SourceRegistry::new();
    registry.register(Arc::new(source));
    let orchestrator = Orchestrator::new(
        registry,
        Arc::new(MockValidator::new()),
        DedupEngine::default(),
        OrchestratorConfig::default(),
    )
    .with_progress(tx.clone());
    let sessions = SessionManager::new(
        Arc::new(orchestrator),
        Arc::new(QueryAugmenter::offline(AugmentConfig::default())),
        Ranker::default(),
        Arc::new(MockEmbedder::new()),
    );
    build_router(AppState::new(Arc::new(sessions), tx))
}

async fn call(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let mut req = Request::builder().method(method).uri(uri);
    let body = match body {
        Some(v) => {
            req = req.header(header::CONTENT_TYPE, "application/json");
            Body::from(v.to_string())
        }
        None => Body::empty(),
    };
    let resp = app.clone().oneshot(req.body(body).unwrap()).await.unwrap();
    let status = resp.status();
    let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    let value = if bytes.is_empty() { Value::Null } else { serde_json::from_slice(&bytes).unwrap() };
    (status, value)
}

async fn new_session(app: &Router) -> String {
    let (status, body) = call(app, Method::POST, "/api/sessions", None).await;
    assert_eq!(status, StatusCode::CREATED);
    body["session_id"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn test_health() {
    let app = app();
    let (status, body) = call(&app, Method::GET, "/api/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["default_sources"], json!(["mock"]));
    assert_eq!(body["top_n"], 20);
}

#[tokio::test]
async fn test_search_rank_select_augment() {
    let app = app();
    let id = new_session(&app).await;

    let (status, iteration) = call(
        &app,
        Method::POST,
        &format!("/api/sessions/{id}/search"),
        Some(json!({ "query": "graph attention" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(iteration["kind"], "initial");
    assert_eq!(iteration["new_paper_ids"].as_array().unwrap().len(), 3);

    let (status, top) = call(&app, Method::GET, &format!("/api/sessions/{id}/top?n=2"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(top["total"], 2);
    assert_eq!(top["papers"][0]["paper"]["title"], "Graph attention networks");
    let best = top["papers"][0]["paper"]["id"].clone();

    let (status, _) = call(
        &app,
        Method::PUT,
        &format!("/api/sessions/{id}/selection"),
        Some(json!({ "paper_ids": [best.clone()] })),
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, outcome) = call(
        &app,
        Method::POST,
        &format!("/api/sessions/{id}/augment"),
        Some(json!({ "paper_ids": [best] })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(outcome["iteration"]["kind"], "augmented");
    assert!(!outcome["augmented"]["query"].as_str().unwrap().is_empty());

    let (_, iterations) = call(&app, Method::GET, &format!("/api/sessions/{id}/iterations"), None).await;
    assert_eq!(iterations.as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn test_error_statuses() {
    let app = app();
    let (status, body) = call(&app, Method::GET, "/api/sessions/00000000-0000-0000-0000-000000000000", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].as_str().unwrap().contains("unknown session"));

    let id = new_session(&app).await;
    let (status, _) = call(
        &app,
        Method::POST,
        &format!("/api/sessions/{id}/augment"),
        Some(json!({ "paper_ids": ["9b2f5a3e-8c1d-4e6f-a7b8-c9d0e1f2a3b4"] })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, _) = call(
        &app,
        Method::POST,
        &format!("/api/sessions/{id}/search"),
        Some(json!({ "query": "gnn", "filters": { "year_from": 2022, "year_to": 2020 } })),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    let (status, _) = call(&app, Method::POST, &format!("/api/sessions/{id}/uploads"), Some(json!({ "papers": [] }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (_, iterations) = call(&app, Method::GET, &format!("/api/sessions/{id}/iterations"), None).await;
    assert_eq!(iterations, json!([]));
}

#[tokio::test]
async fn test_upload_snapshot_restore() {
    let app = app();
    let id = new_session(&app).await;

    let (status, iteration) = call(
        &app,
        Method::POST,
        &format!("/api/sessions/{id}/uploads"),
        Some(json!({ "papers": [{ "title": "My own draft", "abstract": "Graph pooling layers.", "year": 2024 }] })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(iteration["kind"], "upload");

    let (status, snapshot) = call(&app, Method::GET, &format!("/api/sessions/{id}/snapshot"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(snapshot["paper_set"][0]["sources"], json!(["upload"]));

    let (status, _) = call(&app, Method::DELETE, &format!("/api/sessions/{id}"), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, _) = call(&app, Method::GET, &format!("/api/sessions/{id}"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, restored) = call(&app, Method::POST, "/api/sessions/restore", Some(snapshot)).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(restored["session_id"], json!(id));

    let (_, summary) = call(&app, Method::GET, &format!("/api/sessions/{id}"), None).await;
    assert_eq!(summary["state"], "ready");
    assert_eq!(summary["papers"], 1);
}
