//! Integration tests for the batch-scan REST API.
//!
//! These tests drive the router in-process with a fake scan runner and a
//! temporary work directory.
//!
//! Run with: `cargo test --package batch-scan-api --test api_integration`

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{Method, Request, StatusCode},
    Router,
};
use batch_scan_api::{create_api_router, create_api_state};
use batch_scan_core::{JobId, ScanResult, UploadStatus, WorkItem};
use batch_scan_ops::{Config, OpsContext, ScanRunner, UploadRequest, UploadStore};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

/// Fails every commit starting with `bad`; commits starting with `slow`
/// take a while.
struct FakeRunner;

#[async_trait]
impl ScanRunner for FakeRunner {
    async fn run(&self, item: &WorkItem) -> ScanResult {
        if item.commit_sha.starts_with("slow") {
            tokio::time::sleep(Duration::from_millis(300)).await;
        }
        if item.commit_sha.starts_with("bad") {
            ScanResult::failure("analyzer failed: exit status: 2")
        } else {
            ScanResult::success("analysis uploaded")
        }
    }
}

const CSV: &str = "repo_url,commit_sha,project_key\n\
                   https://github.com/acme/api.git,good1,\n\
                   https://github.com/acme/api.git,bad1,\n\
                   https://github.com/acme/web.git,good2,web_key\n";

const SLOW_CSV: &str = "repo_url,commit_sha\n\
                        https://github.com/acme/api.git,slow1\n";

fn test_config(temp: &TempDir) -> Config {
    let mut config = Config::default();
    config.work_dir = temp.path().to_path_buf();
    config.concurrency = 2;
    config
}

/// Create a test router over a fresh work directory.
async fn create_test_router(temp: &TempDir) -> Router {
    let ctx = OpsContext::with_runner(test_config(temp), Arc::new(FakeRunner)).unwrap();
    let state = create_api_state(ctx, CancellationToken::new()).await;
    Router::new().nest("/api", create_api_router(state))
}

async fn send(router: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();

    let body = response.into_body().collect().await.unwrap().to_bytes();
    let json: Value = serde_json::from_slice(&body).unwrap_or(json!(null));

    (status, json)
}

/// Helper to make a GET request.
async fn get(router: &Router, uri: &str) -> (StatusCode, Value) {
    let request = Request::builder()
        .method(Method::GET)
        .uri(uri)
        .body(Body::empty())
        .unwrap();
    send(router, request).await
}

/// Helper to make a POST request with a text body.
async fn post(router: &Router, uri: &str, body: &str) -> (StatusCode, Value) {
    let request = Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header("Content-Type", "text/csv")
        .body(Body::from(body.to_string()))
        .unwrap();
    send(router, request).await
}

/// Poll a job until it leaves the queued/running states.
async fn wait_for_job(router: &Router, job_id: &str) -> Value {
    for _ in 0..200 {
        let (status, json) = get(router, &format!("/api/jobs/{}", job_id)).await;
        assert_eq!(status, StatusCode::OK);
        let state = json["data"]["status"].as_str().unwrap().to_string();
        if state != "queued" && state != "running" {
            return json["data"].clone();
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("job {} did not finish", job_id);
}

/// Poll the upload list until `upload_id` reaches `status`.
async fn wait_for_upload(router: &Router, upload_id: &str, status: &str) -> Value {
    for _ in 0..200 {
        let (_, json) = get(router, "/api/uploads").await;
        let found = json["data"]
            .as_array()
            .unwrap()
            .iter()
            .find(|u| u["upload_id"] == upload_id)
            .cloned()
            .unwrap();
        if found["status"] == status {
            return found;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("upload {} never became {}", upload_id, status);
}

// =============================================================================
// Health
// =============================================================================

#[tokio::test]
async fn test_health_endpoint() {
    let temp = TempDir::new().unwrap();
    let router = create_test_router(&temp).await;

    let (status, json) = get(&router, "/api/health").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["data"]["status"], "ok");
    assert_eq!(json["data"]["checkpoint"]["total"], 0);
    assert_eq!(json["data"]["active_jobs"], 0);
    assert!(json["timestamp"].as_u64().unwrap() > 0);
}

// =============================================================================
// Uploads
// =============================================================================

#[tokio::test]
async fn test_upload_without_scan() {
    let temp = TempDir::new().unwrap();
    let router = create_test_router(&temp).await;

    let (status, json) = post(&router, "/api/uploads?name=batch.csv", CSV).await;

    assert_eq!(status, StatusCode::CREATED);
    let data = &json["data"];
    assert_eq!(data["name"], "batch.csv");
    assert_eq!(data["total_commits"], 3);
    assert_eq!(data["repos"]["https://github.com/acme/api.git"], 2);
    assert_eq!(data["status"], "uploaded");
    assert!(data.get("job_id").is_none());

    let (status, json) = get(&router, "/api/uploads").await;
    assert_eq!(status, StatusCode::OK);
    let uploads = json["data"].as_array().unwrap();
    assert_eq!(uploads.len(), 1);
    assert_eq!(uploads[0]["upload_id"], data["upload_id"]);
}

#[tokio::test]
async fn test_upload_rejects_csv_without_required_columns() {
    let temp = TempDir::new().unwrap();
    let router = create_test_router(&temp).await;

    let (status, json) = post(&router, "/api/uploads", "name,value\nx,y\n").await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["data"]["code"], "INVALID_INPUT");

    let (_, json) = get(&router, "/api/uploads").await;
    assert!(json["data"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_upload_and_scan_runs_job_to_completion() {
    let temp = TempDir::new().unwrap();
    let router = create_test_router(&temp).await;

    let (status, json) = post(&router, "/api/uploads?name=batch.csv&scan=true", CSV).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(json["data"]["status"], "queued");
    let upload_id = json["data"]["upload_id"].as_str().unwrap().to_string();
    let job_id = json["data"]["job_id"].as_str().unwrap().to_string();

    let job = wait_for_job(&router, &job_id).await;
    assert_eq!(job["status"], "completed_with_errors");
    assert_eq!(job["source"], "batch.csv");
    assert_eq!(job["counts"]["succeeded"], 2);
    assert_eq!(job["counts"]["failed"], 1);
    assert_eq!(job["counts"]["pending"], 0);

    let (_, json) = get(&router, "/api/checkpoint/failed").await;
    let failed = json["data"].as_array().unwrap();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0]["commit_sha"], "bad1");
    assert!(failed[0]["error"]
        .as_str()
        .unwrap()
        .contains("exit status: 2"));

    let (_, json) = get(&router, "/api/repos").await;
    let repos = json["data"].as_array().unwrap();
    assert_eq!(repos.len(), 2);

    let (_, json) = get(&router, "/api/checkpoint").await;
    assert_eq!(json["data"]["stats"]["processed"], 2);
    assert_eq!(json["data"]["exists"], true);

    // Failed items are in the checkpoint; the upload itself completed.
    let upload = wait_for_upload(&router, &upload_id, "completed").await;
    assert_eq!(upload["job_id"], job_id.as_str());
}

#[tokio::test]
async fn test_rescanning_stored_upload_skips_processed_items() {
    let temp = TempDir::new().unwrap();
    let router = create_test_router(&temp).await;

    let (_, json) = post(&router, "/api/uploads?name=batch.csv&scan=true", CSV).await;
    let upload_id = json["data"]["upload_id"].as_str().unwrap().to_string();
    let first = json["data"]["job_id"].as_str().unwrap().to_string();
    wait_for_job(&router, &first).await;
    wait_for_upload(&router, &upload_id, "completed").await;

    let (status, json) = post(&router, &format!("/api/uploads/{}/scan", upload_id), "").await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let second = json["data"]["job_id"].as_str().unwrap().to_string();

    let job = wait_for_job(&router, &second).await;
    assert_eq!(job["counts"]["skipped"], 2);
    assert_eq!(job["counts"]["failed"], 1);
    assert_eq!(job["counts"]["succeeded"], 0);

    let (_, json) = get(&router, "/api/jobs").await;
    let jobs = json["data"].as_array().unwrap();
    assert_eq!(jobs.len(), 2);
    assert_eq!(jobs[0]["job_id"], second.as_str());
}

#[tokio::test]
async fn test_scan_unknown_upload_returns_404() {
    let temp = TempDir::new().unwrap();
    let router = create_test_router(&temp).await;

    let (status, json) = post(
        &router,
        "/api/uploads/00000000-0000-4000-8000-000000000000/scan",
        "",
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["data"]["code"], "UPLOAD_NOT_FOUND");

    let (status, _) = post(&router, "/api/uploads/not-an-id/scan", "").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_scan_refused_while_upload_is_busy() {
    let temp = TempDir::new().unwrap();
    let router = create_test_router(&temp).await;

    let (_, json) = post(&router, "/api/uploads?name=slow.csv&scan=true", SLOW_CSV).await;
    let upload_id = json["data"]["upload_id"].as_str().unwrap().to_string();
    let job_id = json["data"]["job_id"].as_str().unwrap().to_string();

    let (status, json) = post(&router, &format!("/api/uploads/{}/scan", upload_id), "").await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(json["data"]["code"], "UPLOAD_BUSY");

    let (_, json) = post(&router, "/api/uploads/scan_all_pending", "").await;
    assert!(json["data"]["queued"].as_array().unwrap().is_empty());

    wait_for_job(&router, &job_id).await;
    let (_, json) = get(&router, "/api/jobs").await;
    assert_eq!(json["data"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_scan_all_pending_queues_unscanned_uploads() {
    let temp = TempDir::new().unwrap();
    let router = create_test_router(&temp).await;

    let (_, first) = post(&router, "/api/uploads?name=first.csv", CSV).await;
    tokio::time::sleep(Duration::from_millis(5)).await;
    let (_, second) = post(&router, "/api/uploads?name=second.csv", SLOW_CSV).await;

    let (status, json) = post(&router, "/api/uploads/scan_all_pending", "").await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let queued = json["data"]["queued"].as_array().unwrap();
    assert_eq!(queued.len(), 2);
    // Oldest first.
    assert_eq!(queued[0]["upload_id"], first["data"]["upload_id"]);
    assert_eq!(queued[1]["upload_id"], second["data"]["upload_id"]);

    for upload in queued {
        let upload_id = upload["upload_id"].as_str().unwrap();
        wait_for_upload(&router, upload_id, "completed").await;
    }

    // Completed uploads are not pending any more.
    let (_, json) = post(&router, "/api/uploads/scan_all_pending", "").await;
    assert!(json["data"]["queued"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_interrupted_upload_is_requeued_on_startup() {
    let temp = TempDir::new().unwrap();
    let uploads = UploadStore::new(test_config(&temp).uploads_dir());
    let upload = uploads
        .save(UploadRequest {
            name: "batch.csv".into(),
            content: CSV.into(),
        })
        .await
        .unwrap();
    // As left by a process that stopped mid-run.
    uploads
        .update(&upload.upload_id, UploadStatus::Running, Some(JobId::new()), None)
        .await
        .unwrap();

    let router = create_test_router(&temp).await;

    let (_, json) = get(&router, "/api/jobs").await;
    let jobs = json["data"].as_array().unwrap();
    assert_eq!(jobs.len(), 1);
    let job_id = jobs[0]["job_id"].as_str().unwrap().to_string();

    let job = wait_for_job(&router, &job_id).await;
    assert_eq!(job["counts"]["succeeded"], 2);
    let upload = wait_for_upload(&router, &upload.upload_id, "completed").await;
    assert_eq!(upload["job_id"], job_id.as_str());
}

// =============================================================================
// Jobs
// =============================================================================

#[tokio::test]
async fn test_unknown_job_returns_404() {
    let temp = TempDir::new().unwrap();
    let router = create_test_router(&temp).await;

    let (status, json) = get(&router, "/api/jobs/00000000-0000-4000-8000-000000000000").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["data"]["code"], "JOB_NOT_FOUND");

    let (status, _) = get(&router, "/api/jobs/garbage").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_jobs_empty_initially() {
    let temp = TempDir::new().unwrap();
    let router = create_test_router(&temp).await;

    let (status, json) = get(&router, "/api/jobs").await;
    assert_eq!(status, StatusCode::OK);
    assert!(json["data"].as_array().unwrap().is_empty());
}
