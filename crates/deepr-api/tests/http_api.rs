// HTTP surface tests against the full router with fake providers

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use tower::ServiceExt;

use deepr_api::{auth::AuthConfig, router, AppState};
use deepr_contracts::ProviderKind;
use deepr_core::memory::{FakeDocumentStore, FakeProvider};
use deepr_core::provider::ProviderRegistry;
use deepr_core::{DeeprConfig, SystemClock, TruncationSummarizer};
use deepr_engine::Deepr;
use deepr_storage::{ArtifactStore, Database};

const KEY: &str = "dpr_test_key";

async fn test_state() -> (AppState, tempfile::TempDir) {
    let db = Database::in_memory().await.unwrap();
    let blobs = tempfile::tempdir().unwrap();

    let mut providers = ProviderRegistry::new();
    providers.register(Arc::new(FakeProvider::new(ProviderKind::OpenAi)));

    let config = DeeprConfig {
        poll_interval: Duration::from_millis(25),
        campaign_step_interval: Duration::from_millis(25),
        ..DeeprConfig::default()
    };

    let engine = Deepr::init(
        config,
        db,
        ArtifactStore::new(blobs.path()),
        providers,
        Arc::new(FakeDocumentStore::new()),
        Arc::new(TruncationSummarizer::new()),
        Arc::new(SystemClock),
    )
    .await
    .unwrap();

    (
        AppState {
            engine,
            auth: AuthConfig::with_key(KEY),
        },
        blobs,
    )
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn health_is_open_and_reports_ok() {
    let (state, _blobs) = test_state().await;
    let app = router(state.clone());

    let response = app
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "ok");

    state.engine.shutdown();
}

#[tokio::test]
async fn protected_routes_require_an_api_key() {
    let (state, _blobs) = test_state().await;

    let response = router(state.clone())
        .oneshot(Request::get("/jobs").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body = body_json(response).await;
    assert_eq!(body["code"], "auth");

    // Bearer form
    let response = router(state.clone())
        .oneshot(
            Request::get("/jobs")
                .header(header::AUTHORIZATION, format!("Bearer {}", KEY))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    // X-Api-Key form
    let response = router(state.clone())
        .oneshot(
            Request::get("/jobs")
                .header("x-api-key", KEY)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    state.engine.shutdown();
}

#[tokio::test]
async fn create_get_and_cancel_job_roundtrip() {
    let (state, _blobs) = test_state().await;

    let request_body = serde_json::json!({
        "prompt": "Summarise TLS 1.3 record layer",
        "model": "small",
        "budget_cap": 0.10,
        "enable_web_search": true
    });
    let response = router(state.clone())
        .oneshot(
            Request::post("/jobs")
                .header("x-api-key", KEY)
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(request_body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let created = body_json(response).await;
    let job_id = created["job_id"].as_str().unwrap().to_string();
    assert!(created["estimated_cost"].as_f64().unwrap() > 0.0);

    let response = router(state.clone())
        .oneshot(
            Request::get(format!("/jobs/{}", job_id))
                .header("x-api-key", KEY)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let job = body_json(response).await;
    assert_eq!(job["id"].as_str().unwrap(), job_id);

    let response = router(state.clone())
        .oneshot(
            Request::post(format!("/jobs/{}/cancel", job_id))
                .header("x-api-key", KEY)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let cancelled = body_json(response).await;
    assert_eq!(cancelled["status"], "cancelled");

    state.engine.shutdown();
}

#[tokio::test]
async fn unknown_job_is_a_404_with_error_body() {
    let (state, _blobs) = test_state().await;

    let response = router(state.clone())
        .oneshot(
            Request::get(format!("/jobs/{}", uuid::Uuid::now_v7()))
                .header("x-api-key", KEY)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = body_json(response).await;
    assert_eq!(body["code"], "job_not_found");

    state.engine.shutdown();
}

#[tokio::test]
async fn costs_endpoint_reports_bucket_totals() {
    let (state, _blobs) = test_state().await;

    let response = router(state.clone())
        .oneshot(
            Request::get("/costs?period=today")
                .header("x-api-key", KEY)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["period"], "today");
    assert!(body["total"].as_f64().is_some());

    state.engine.shutdown();
}
