//! HTTP API integration tests for reboot-intake

mod helpers;

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tower::util::ServiceExt;

use reboot_common::config::ImageConfig;
use reboot_common::events::EventBus;
use reboot_intake::backoff::RetryPolicy;
use reboot_intake::draft::DraftStore;
use reboot_intake::photo::ImageNormalizer;
use reboot_intake::qr::QrIssuer;
use reboot_intake::records::{RecordStore, SqliteRecordStore};
use reboot_intake::storage::{LocalObjectStore, RemoteUploader};
use reboot_intake::submission::{OrchestratorDeps, SubmissionOrchestrator};
use reboot_intake::{build_router, AppState};

use helpers::{memory_pool, png_data_uri};

const PUBLIC_BASE: &str = "http://localhost/storage";

/// Test app on an in-memory database with local photo storage in a temp dir
async fn create_test_app() -> (Router, TempDir) {
    create_test_app_with(ImageConfig::default().max_bytes).await
}

async fn create_test_app_with(max_photo_bytes: usize) -> (Router, TempDir) {
    let storage_dir = tempfile::tempdir().expect("Failed to create temp dir");

    let event_bus = EventBus::new(100);
    let drafts = DraftStore::new();
    let records: Arc<dyn RecordStore> = Arc::new(SqliteRecordStore::new(memory_pool().await));
    let qr = QrIssuer::new(records.clone(), event_bus.clone());
    let policy = RetryPolicy::new(1, Duration::from_millis(5));

    let uploader = Arc::new(RemoteUploader::new(
        Arc::new(LocalObjectStore::new(storage_dir.path(), PUBLIC_BASE)),
        "shoe-photos",
        policy,
    ));

    let orchestrator = SubmissionOrchestrator::new(OrchestratorDeps {
        drafts: drafts.clone(),
        normalizer: ImageNormalizer::default(),
        uploader,
        records: records.clone(),
        qr: qr.clone(),
        policy,
        event_bus: event_bus.clone(),
    });

    let state = AppState::new(drafts, records, orchestrator, qr, event_bus)
        .with_local_storage(storage_dir.path().to_path_buf())
        .with_max_photo_bytes(max_photo_bytes);

    (build_router(state), storage_dir)
}

async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
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
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, json)
}

/// Data URI carrying `size` bytes of JPEG-labelled payload
fn large_photo_data_uri(size: usize) -> String {
    let payload: Vec<u8> = (0..size).map(|i| (i % 251) as u8).collect();
    format!("data:image/jpeg;base64,{}", BASE64.encode(payload))
}

async fn create_draft(app: &Router) -> String {
    let (status, json) = send(app, "POST", "/api/drafts", None).await;
    assert_eq!(status, StatusCode::CREATED);
    json["session_id"].as_str().unwrap().to_string()
}

async fn fill_draft(app: &Router, session_id: &str) {
    let details = json!({
        "brand": "New Balance",
        "model": "574",
        "size": "42",
        "size_unit": "EU",
        "condition": "like_new",
        "barcode": "0012345678905"
    });
    let (status, _) = send(app, "PUT", &format!("/api/drafts/{}/details", session_id), Some(details)).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let photo = json!({ "data_uri": png_data_uri(1600, 1200) });
    let (status, _) = send(app, "PUT", &format!("/api/drafts/{}/photo", session_id), Some(photo)).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _) = send(
        app,
        "PUT",
        &format!("/api/drafts/{}/rating", session_id),
        Some(json!({ "rating": 8 })),
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);
}

/// Poll the submission until it reaches a settled phase
async fn wait_for_phase(app: &Router, session_id: &str, phase: &str) -> Value {
    for _ in 0..500 {
        let (status, json) = send(app, "GET", &format!("/api/submissions/{}", session_id), None).await;
        assert_eq!(status, StatusCode::OK);
        if json["state"]["phase"] == phase {
            return json;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("submission {} never reached {}", session_id, phase);
}

#[tokio::test]
async fn test_health_endpoint() {
    let (app, _dir) = create_test_app().await;

    let (status, json) = send(&app, "GET", "/health", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "ok");
    assert_eq!(json["module"], "reboot-intake");
}

#[tokio::test]
async fn test_draft_lifecycle() {
    let (app, _dir) = create_test_app().await;
    let session_id = create_draft(&app).await;

    let (status, json) = send(&app, "GET", &format!("/api/drafts/{}", session_id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["has_photo"], false);
    assert_eq!(json["complete"], false);

    fill_draft(&app, &session_id).await;

    let (_, json) = send(&app, "GET", &format!("/api/drafts/{}", session_id), None).await;
    assert_eq!(json["has_photo"], true);
    assert_eq!(json["complete"], true);
    assert_eq!(json["rating"], 8);
    assert_eq!(json["shoe_details"]["size_unit"], "EU");

    let (status, _) = send(&app, "DELETE", &format!("/api/drafts/{}", session_id), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, json) = send(&app, "GET", &format!("/api/drafts/{}", session_id), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["error"]["code"], "NOT_FOUND");
}

#[tokio::test]
async fn test_draft_validation_errors() {
    let (app, _dir) = create_test_app().await;
    let session_id = create_draft(&app).await;

    let blank_brand = json!({
        "brand": "  ",
        "size": "10",
        "size_unit": "US",
        "condition": "good"
    });
    let (status, json) = send(
        &app,
        "PUT",
        &format!("/api/drafts/{}/details", session_id),
        Some(blank_brand),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"]["code"], "BAD_REQUEST");

    let (status, _) = send(
        &app,
        "PUT",
        &format!("/api/drafts/{}/rating", session_id),
        Some(json!({ "rating": 11 })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(
        &app,
        "PUT",
        &format!("/api/drafts/{}/rating", uuid::Uuid::new_v4()),
        Some(json!({ "rating": 5 })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_submit_end_to_end() {
    let (app, _dir) = create_test_app().await;
    let session_id = create_draft(&app).await;
    fill_draft(&app, &session_id).await;

    let (status, json) = send(&app, "POST", &format!("/api/submissions/{}", session_id), None).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(json["session_id"], session_id.as_str());

    let json = wait_for_phase(&app, &session_id, "submitted").await;
    assert_eq!(json["state"]["qr_issued"], true);
    assert_eq!(json["retry_count"], 0);
    let shoe_id = json["state"]["shoe_id"].as_str().unwrap().to_string();

    // Draft entries are gone
    let (status, _) = send(&app, "GET", &format!("/api/drafts/{}", session_id), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (_, json) = send(&app, "GET", "/api/shoes/count", None).await;
    assert_eq!(json["count"], 1);

    let (status, record) = send(&app, "GET", &format!("/api/shoes/{}", shoe_id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(record["brand"], "New Balance");
    assert_eq!(record["condition"], "like_new");
    assert_eq!(record["rating"], 8);
    assert!(record["qr_code"].as_str().unwrap().starts_with("data:image/png;base64,"));

    // The normalized photo is served from local storage
    let photo_url = record["photo_url"].as_str().unwrap();
    let photo_path = photo_url.strip_prefix("http://localhost").unwrap();
    let response = app
        .clone()
        .oneshot(Request::builder().uri(photo_path).body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let photo = image::load_from_memory(&bytes).unwrap();
    assert_eq!((photo.width(), photo.height()), (800, 600));

    // Scanning the issued label finds the record
    let code = format!("SHOE:{}", shoe_id);
    let (status, found) = send(&app, "GET", &format!("/api/shoes/lookup?code={}", code), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(found["id"], shoe_id.as_str());

    let (_, list) = send(&app, "GET", "/api/shoes?limit=5", None).await;
    assert_eq!(list.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_duplicate_submit_creates_one_record() {
    let (app, _dir) = create_test_app().await;
    let session_id = create_draft(&app).await;
    fill_draft(&app, &session_id).await;

    for _ in 0..3 {
        let (status, _) = send(&app, "POST", &format!("/api/submissions/{}", session_id), None).await;
        assert_eq!(status, StatusCode::ACCEPTED);
    }
    wait_for_phase(&app, &session_id, "submitted").await;

    let (status, _) = send(&app, "POST", &format!("/api/submissions/{}", session_id), None).await;
    assert_eq!(status, StatusCode::ACCEPTED);

    let (_, json) = send(&app, "GET", "/api/shoes/count", None).await;
    assert_eq!(json["count"], 1);
}

#[tokio::test]
async fn test_submission_errors() {
    let (app, _dir) = create_test_app().await;
    let unknown = uuid::Uuid::new_v4();

    let (status, _) = send(&app, "POST", &format!("/api/submissions/{}", unknown), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(&app, "POST", &format!("/api/submissions/{}/retry", unknown), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(&app, "DELETE", &format!("/api/submissions/{}", unknown), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    // Empty draft ends in a user-data error; manual retry is allowed
    let session_id = create_draft(&app).await;
    send(&app, "POST", &format!("/api/submissions/{}", session_id), None).await;
    let json = wait_for_phase(&app, &session_id, "error").await;
    assert_eq!(json["state"]["kind"], "user_data");
    assert_eq!(json["state"]["retry_scheduled"], false);

    fill_draft(&app, &session_id).await;
    let (status, _) = send(&app, "POST", &format!("/api/submissions/{}/retry", session_id), None).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    wait_for_phase(&app, &session_id, "submitted").await;

    // Nothing left to retry
    let (status, json) = send(&app, "POST", &format!("/api/submissions/{}/retry", session_id), None).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(json["error"]["code"], "CONFLICT");

    let (status, _) = send(&app, "DELETE", &format!("/api/submissions/{}", session_id), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, _) = send(&app, "GET", &format!("/api/submissions/{}", session_id), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_shoe_lookup_errors() {
    let (app, _dir) = create_test_app().await;

    let (status, json) = send(&app, "GET", "/api/shoes/lookup?code=https://example.com", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"]["code"], "BAD_REQUEST");

    let missing = format!("SHOE:{}", uuid::Uuid::new_v4());
    let (status, _) = send(&app, "GET", &format!("/api/shoes/lookup?code={}", missing), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(&app, "POST", &format!("/api/shoes/{}/qr", uuid::Uuid::new_v4()), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_regenerate_qr() {
    let (app, _dir) = create_test_app().await;
    let session_id = create_draft(&app).await;
    fill_draft(&app, &session_id).await;
    send(&app, "POST", &format!("/api/submissions/{}", session_id), None).await;
    let json = wait_for_phase(&app, &session_id, "submitted").await;
    let shoe_id = json["state"]["shoe_id"].as_str().unwrap().to_string();

    let (status, json) = send(&app, "POST", &format!("/api/shoes/{}/qr", shoe_id), None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["shoe_id"], shoe_id.as_str());
    assert!(json["qr_code"].as_str().unwrap().starts_with("data:image/png;base64,"));
}

#[tokio::test]
async fn test_full_size_photo_accepted() {
    let (app, _dir) = create_test_app().await;
    let session_id = create_draft(&app).await;

    // Well past axum's 2 MB default, well under the 10 MiB photo limit
    let photo = json!({ "data_uri": large_photo_data_uri(3 * 1024 * 1024) });
    let (status, _) = send(&app, "PUT", &format!("/api/drafts/{}/photo", session_id), Some(photo)).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (_, json) = send(&app, "GET", &format!("/api/drafts/{}", session_id), None).await;
    assert_eq!(json["has_photo"], true);
}

#[tokio::test]
async fn test_photo_over_limit_rejected() {
    let (app, _dir) = create_test_app_with(1024 * 1024).await;
    let session_id = create_draft(&app).await;

    let photo = json!({ "data_uri": large_photo_data_uri(2 * 1024 * 1024) });
    let (status, _) = send(&app, "PUT", &format!("/api/drafts/{}/photo", session_id), Some(photo)).await;
    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);

    let (_, json) = send(&app, "GET", &format!("/api/drafts/{}", session_id), None).await;
    assert_eq!(json["has_photo"], false);
}
