//! End-to-end coverage of the doc-ocr handler against a mocked ESB:
//! fresh invocation, idempotent replay, and lock contention.

use agentmesh::agents::doc_ocr::{DocOcrHandler, StubOcrAdapter};
use agentmesh::agents::{AgentConfig, AgentContext, JobHandler};
use agentmesh::callback::CallbackPolicy;
use agentmesh::jobs::{JobStatus, JobTracker};
use agentmesh::kv::MemoryKv;
use agentmesh::observability::Metrics;
use agentmesh::staging::EsbClient;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn bare_config() -> AgentConfig {
    serde_json::from_value(json!({})).unwrap()
}

fn policy() -> CallbackPolicy {
    CallbackPolicy { max_retries: 1, base_delay: Duration::from_millis(1), timeout: Duration::from_secs(1) }
}

fn ctx(
    request_id: &str,
    jobs: Arc<JobTracker>,
    esb: EsbClient,
    metrics: Arc<Metrics>,
    staging_dir: &std::path::Path,
    body: serde_json::Value,
) -> AgentContext {
    AgentContext {
        request_id: request_id.to_string(),
        agent_name: "doc-ocr".to_string(),
        config: bare_config(),
        headers: Default::default(),
        query: Default::default(),
        body: Some(body),
        raw_body: Vec::new(),
        jobs,
        esb,
        metrics,
        staging_dir: staging_dir.to_path_buf(),
        http: reqwest::Client::new(),
        idempotency_ttl_secs: 60,
        job_ttl_secs: 60,
        download_timeout: Duration::from_secs(5),
        upload_timeout: Duration::from_secs(5),
        callback_policy: policy(),
    }
}

async fn mocked_esb() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/esb-download"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"%PDF-fake-bytes".to_vec()))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/esb-upload"))
        .respond_with(ResponseTemplate::new(200).set_body_json(true))
        .mount(&server)
        .await;
    server
}

async fn wait_for_terminal(jobs: &JobTracker, request_id: &str) -> agentmesh::jobs::JobRecord {
    for _ in 0..200 {
        if let Some(record) = jobs.get_job(request_id).await.unwrap() {
            if record.status.is_terminal() {
                return record;
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("job {request_id} never reached a terminal status");
}

#[tokio::test]
async fn fresh_invocation_runs_to_success() {
    let esb_server = mocked_esb().await;
    let staging = tempfile::tempdir().unwrap();
    let kv = Arc::new(MemoryKv::new());
    let jobs = Arc::new(JobTracker::new(kv));
    let esb = EsbClient::new(esb_server.uri());
    let handler = DocOcrHandler::new(StubOcrAdapter);

    let body = json!({
        "request_id": "req-fresh-1",
        "file": {"url": "http://fileserver/inbox/report.pdf"},
    });

    let metrics = Arc::new(Metrics::new());
    let response = handler
        .run(ctx("req-fresh-1", jobs.clone(), esb, metrics.clone(), staging.path(), body))
        .await
        .unwrap();
    assert_eq!(response.status(), axum::http::StatusCode::ACCEPTED);

    let record = wait_for_terminal(&jobs, "req-fresh-1").await;
    assert_eq!(record.status, JobStatus::Succeeded);
    let result = record.result.expect("succeeded job carries a result");
    assert_eq!(result["agent"]["stub"], json!(true));
    assert_eq!(result["agent"]["pages_processed"], json!(1));
    assert_eq!(result["staged"].as_array().unwrap().len(), 1);
    assert!(result["esb_upload"]["server_path"].is_string());

    let snapshot = metrics.snapshot();
    assert_eq!(snapshot.jobs_accepted, 1);
    assert_eq!(snapshot.jobs_succeeded, 1);
    assert_eq!(snapshot.jobs_failed, 0);
}

#[tokio::test]
async fn replay_of_a_terminal_job_returns_the_record_without_rerunning() {
    let esb_server = mocked_esb().await;
    let staging = tempfile::tempdir().unwrap();
    let kv = Arc::new(MemoryKv::new());
    let jobs = Arc::new(JobTracker::new(kv));
    let esb = EsbClient::new(esb_server.uri());
    let handler = DocOcrHandler::new(StubOcrAdapter);

    let body = json!({
        "request_id": "req-replay-1",
        "file": {"url": "http://fileserver/inbox/report.pdf"},
    });

    let metrics = Arc::new(Metrics::new());
    handler
        .run(ctx("req-replay-1", jobs.clone(), esb.clone(), metrics.clone(), staging.path(), body.clone()))
        .await
        .unwrap();
    wait_for_terminal(&jobs, "req-replay-1").await;

    let replay = handler
        .run(ctx("req-replay-1", jobs.clone(), esb, metrics, staging.path(), body))
        .await
        .unwrap();
    assert_eq!(replay.status(), axum::http::StatusCode::OK);

    let body_bytes = axum::body::to_bytes(replay.into_body(), usize::MAX).await.unwrap();
    let replayed: serde_json::Value = serde_json::from_slice(&body_bytes).unwrap();
    assert_eq!(replayed["status"], json!("SUCCEEDED"));
}

#[tokio::test]
async fn contended_lock_returns_running_without_spawning_a_second_worker() {
    let esb_server = mocked_esb().await;
    let staging = tempfile::tempdir().unwrap();
    let kv = Arc::new(MemoryKv::new());
    let jobs = Arc::new(JobTracker::new(kv));
    let esb = EsbClient::new(esb_server.uri());
    let handler = DocOcrHandler::new(StubOcrAdapter);

    let held_token = jobs.acquire_lock("req-contend-1", 60).await.unwrap().unwrap();

    let body = json!({
        "request_id": "req-contend-1",
        "file": {"url": "http://fileserver/inbox/report.pdf"},
    });
    let response = handler
        .run(ctx("req-contend-1", jobs.clone(), esb, Arc::new(Metrics::new()), staging.path(), body))
        .await
        .unwrap();
    assert_eq!(response.status(), axum::http::StatusCode::OK);

    let body_bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let parsed: serde_json::Value = serde_json::from_slice(&body_bytes).unwrap();
    assert_eq!(parsed["status"], json!("RUNNING"));

    // No job record should have been written: the held lock stopped the
    // handler before it could start the pipeline.
    assert!(jobs.get_job("req-contend-1").await.unwrap().is_none());

    jobs.release_lock("req-contend-1", &held_token).await;
}

#[tokio::test]
async fn missing_files_are_rejected_before_any_job_state_is_written() {
    let esb_server = mocked_esb().await;
    let staging = tempfile::tempdir().unwrap();
    let kv = Arc::new(MemoryKv::new());
    let jobs = Arc::new(JobTracker::new(kv));
    let esb = EsbClient::new(esb_server.uri());
    let handler = DocOcrHandler::new(StubOcrAdapter);

    let body = json!({"request_id": "req-empty-1"});
    let response = handler
        .run(ctx("req-empty-1", jobs.clone(), esb, Arc::new(Metrics::new()), staging.path(), body))
        .await
        .unwrap();
    assert_eq!(response.status(), axum::http::StatusCode::UNPROCESSABLE_ENTITY);
    assert!(jobs.get_job("req-empty-1").await.unwrap().is_none());
}
