//! Reference agent handler: multi-file OCR pipeline with a real/stub
//! adapter branch and a callback at the end (spec.md §4.7).

use super::{AgentConfig, AgentContext, HandlerError, JobHandler};
use crate::callback;
use crate::jobs::JobStatus;
use crate::staging::{decompose_url, derive_local_filename, EsbClient, StagedFile};
use async_trait::async_trait;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Deserialize, Clone)]
pub struct FileRef {
    pub url: String,
    #[serde(default)]
    pub filename: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct DocOcrRequest {
    #[serde(default)]
    pub request_id: Option<String>,
    #[serde(default)]
    pub file: Option<FileRef>,
    #[serde(default)]
    pub files: Option<Vec<FileRef>>,
    #[serde(default)]
    pub options: Option<Value>,
}

impl DocOcrRequest {
    fn all_files(self) -> Vec<FileRef> {
        let mut files = self.files.unwrap_or_default();
        if let Some(single) = self.file {
            files.insert(0, single);
        }
        files
    }
}

#[derive(Debug, Error)]
pub enum OcrError {
    #[error("{0}")]
    Adapter(String),
}

/// The real-vs-stub seam (spec.md §4.7 step 3).
#[async_trait]
pub trait OcrAdapter: Send + Sync {
    async fn process(&self, staged: &[StagedFile], config: &AgentConfig, options: &Value) -> Result<Value, OcrError>;
}

/// Deterministic adapter used when no real OCR endpoint is configured.
pub struct StubOcrAdapter;

#[async_trait]
impl OcrAdapter for StubOcrAdapter {
    async fn process(&self, staged: &[StagedFile], _config: &AgentConfig, _options: &Value) -> Result<Value, OcrError> {
        Ok(json!({
            "stub": true,
            "pages_processed": staged.len(),
        }))
    }
}

/// Calls a configured OCR endpoint (`run_url`, falling back to
/// `base_url`) with the staged file paths.
pub struct HttpOcrAdapter {
    http: reqwest::Client,
}

impl HttpOcrAdapter {
    pub fn new(http: reqwest::Client) -> Self {
        Self { http }
    }
}

#[async_trait]
impl OcrAdapter for HttpOcrAdapter {
    async fn process(&self, staged: &[StagedFile], config: &AgentConfig, options: &Value) -> Result<Value, OcrError> {
        let url = config
            .run_url
            .clone()
            .or_else(|| config.base_url.clone())
            .ok_or_else(|| OcrError::Adapter("no run_url or base_url configured".to_string()))?;

        let mut request = self.http.post(&url).json(&json!({
            "files": staged.iter().map(|f| f.local_path.display().to_string()).collect::<Vec<_>>(),
            "options": options,
        }));
        for (key, value) in &config.headers {
            request = request.header(key, value);
        }
        if let Some(auth) = &config.authorization {
            request = request.header("Authorization", auth);
        }

        let response = request
            .send()
            .await
            .map_err(|err| OcrError::Adapter(err.to_string()))?;

        if !response.status().is_success() {
            return Err(OcrError::Adapter(format!("ocr endpoint returned {}", response.status())));
        }

        response
            .json::<Value>()
            .await
            .map_err(|err| OcrError::Adapter(err.to_string()))
    }
}

pub struct DocOcrHandler {
    stub: Arc<dyn OcrAdapter>,
    real: Option<Arc<dyn OcrAdapter>>,
}

impl DocOcrHandler {
    pub fn new(stub: impl OcrAdapter + 'static) -> Self {
        Self {
            stub: Arc::new(stub),
            real: None,
        }
    }

    pub fn with_real_adapter(mut self, real: impl OcrAdapter + 'static) -> Self {
        self.real = Some(Arc::new(real));
        self
    }

    fn adapter_for(&self, config: &AgentConfig) -> Arc<dyn OcrAdapter> {
        if config.wants_real_adapter() {
            if let Some(real) = &self.real {
                return real.clone();
            }
            warn!("use_real requested but no real adapter configured, falling back to stub");
        }
        self.stub.clone()
    }
}

fn respond(status: StatusCode, body: Value) -> Response {
    (status, Json(body)).into_response()
}

#[async_trait]
impl JobHandler for DocOcrHandler {
    async fn run(&self, ctx: AgentContext) -> Result<Response, HandlerError> {
        let request: DocOcrRequest = match ctx.body.clone() {
            Some(body) => match serde_json::from_value(body) {
                Ok(req) => req,
                Err(err) => return Ok(respond(StatusCode::UNPROCESSABLE_ENTITY, json!({"error": err.to_string()}))),
            },
            None => DocOcrRequest::default(),
        };

        let files = request.all_files();
        if files.is_empty() {
            return Ok(respond(
                StatusCode::UNPROCESSABLE_ENTITY,
                json!({"error": "at least one of `file` or `files` is required"}),
            ));
        }

        let request_id = ctx.request_id.clone();

        if let Some(existing) = ctx.jobs.get_job(&request_id).await.map_err(|e| HandlerError::Internal(e.to_string()))? {
            return Ok(respond(
                StatusCode::OK,
                serde_json::to_value(&existing).map_err(|e| HandlerError::Internal(e.to_string()))?,
            ));
        }

        let Some(token) = ctx
            .jobs
            .acquire_lock(&request_id, ctx.idempotency_ttl_secs)
            .await
            .map_err(|e| HandlerError::Internal(e.to_string()))?
        else {
            return Ok(respond(StatusCode::OK, json!({"status": "RUNNING"})));
        };

        ctx.jobs
            .set_status(&request_id, JobStatus::Received, None, None, ctx.job_ttl_secs)
            .await
            .map_err(|e| HandlerError::Internal(e.to_string()))?;

        let adapter = self.adapter_for(&ctx.config);
        let options = request.options.unwrap_or(Value::Null);

        ctx.metrics.job_accepted();
        tokio::spawn(run_pipeline(PipelineArgs {
            request_id: request_id.clone(),
            token,
            files,
            options,
            config: ctx.config,
            jobs: ctx.jobs,
            esb: ctx.esb,
            metrics: ctx.metrics,
            staging_dir: ctx.staging_dir,
            http: ctx.http,
            job_ttl_secs: ctx.job_ttl_secs,
            download_timeout: ctx.download_timeout,
            upload_timeout: ctx.upload_timeout,
            callback_policy: ctx.callback_policy,
            adapter,
        }));

        Ok(respond(
            StatusCode::ACCEPTED,
            json!({"request_id": request_id, "status": "RECEIVED"}),
        ))
    }
}

struct PipelineArgs {
    request_id: String,
    token: String,
    files: Vec<FileRef>,
    options: Value,
    config: AgentConfig,
    jobs: Arc<crate::jobs::JobTracker>,
    esb: EsbClient,
    metrics: Arc<crate::observability::Metrics>,
    staging_dir: std::path::PathBuf,
    http: reqwest::Client,
    job_ttl_secs: u64,
    download_timeout: std::time::Duration,
    upload_timeout: std::time::Duration,
    callback_policy: callback::CallbackPolicy,
    adapter: Arc<dyn OcrAdapter>,
}

/// The background worker spawned after `RECEIVED` is written (spec.md §9:
/// "the worker owns the lock token"). Runs to a terminal status or until
/// the process dies; cancellation of the originating HTTP request never
/// reaches it.
async fn run_pipeline(args: PipelineArgs) {
    let PipelineArgs {
        request_id,
        token,
        files,
        options,
        config,
        jobs,
        esb,
        metrics,
        staging_dir,
        http,
        job_ttl_secs,
        download_timeout,
        upload_timeout,
        callback_policy,
        adapter,
    } = args;

    let result = execute(
        &request_id, &files, &options, &config, &jobs, &esb, &staging_dir, download_timeout, upload_timeout, job_ttl_secs, adapter.as_ref(),
    )
    .await;

    let (status, final_result, final_error) = match result {
        Ok(value) => {
            metrics.job_succeeded();
            (JobStatus::Succeeded, Some(value), None)
        }
        Err(err) => {
            metrics.job_failed();
            (JobStatus::Failed, None, Some(err))
        }
    };

    if let Err(err) = jobs
        .set_status(&request_id, status, final_result.clone(), final_error.clone(), job_ttl_secs)
        .await
    {
        warn!(request_id = %request_id, error = %err, "failed to write terminal status");
    }

    if let Some(callback_url) = &config.callback_url {
        let status_str = if status == JobStatus::Succeeded { "SUCCEEDED" } else { "FAILED" };
        callback::deliver(
            &http,
            callback_url,
            &request_id,
            status_str,
            final_result.as_ref(),
            final_error.as_deref(),
            callback_policy,
        )
        .await;
    }

    jobs.release_lock(&request_id, &token).await;
}

#[allow(clippy::too_many_arguments)]
async fn execute(
    request_id: &str,
    files: &[FileRef],
    options: &Value,
    config: &AgentConfig,
    jobs: &crate::jobs::JobTracker,
    esb: &EsbClient,
    staging_dir: &std::path::Path,
    download_timeout: std::time::Duration,
    upload_timeout: std::time::Duration,
    job_ttl_secs: u64,
    adapter: &dyn OcrAdapter,
) -> Result<Value, String> {
    jobs.set_status(request_id, JobStatus::Running, None, None, job_ttl_secs)
        .await
        .map_err(|e| e.to_string())?;

    let mut staged = Vec::with_capacity(files.len());
    let mut seen_names = Vec::new();
    for (index, file_ref) in files.iter().enumerate() {
        let local_filename = derive_local_filename(file_ref.filename.as_deref(), &file_ref.url, index, &mut seen_names);
        let staged_file = esb
            .download(request_id, &file_ref.url, staging_dir, &local_filename, download_timeout)
            .await
            .map_err(|err| format!("download_failed: {err}"))?;
        staged.push(staged_file);
    }

    let adapter_data = adapter
        .process(&staged, config, options)
        .await
        .map_err(|err| err.to_string())?;

    let staged_json: Vec<Value> = staged
        .iter()
        .map(|f| {
            json!({
                "request_id": f.request_id,
                "source_url": f.source_url,
                "local_path": f.local_path.display().to_string(),
                "size_bytes": f.size_bytes,
                "sha256_hex": f.sha256_hex,
            })
        })
        .collect();

    let mut result = json!({
        "staged": staged_json,
        "agent": adapter_data,
    });

    jobs.set_status(request_id, JobStatus::Uploading, Some(result.clone()), None, job_ttl_secs)
        .await
        .map_err(|e| e.to_string())?;

    let mut locations = Vec::with_capacity(staged.len());
    for file in &staged {
        let location = decompose_url(&file.source_url).map_err(|err| format!("upload_failed: {err}"))?;
        locations.push(location);
    }
    let primary = locations.first().ok_or_else(|| "upload_failed: no staged files".to_string())?.clone();
    if locations.iter().any(|l| l.server_path != primary.server_path) {
        warn!(request_id, "staged files resolve to different server paths, using the first as primary");
    }

    let result_filename = format!("{request_id}-result.json");
    let local_result_path = staging_dir.join(request_id).join(&result_filename);
    esb.upload_json(&primary.server_path, &result_filename, &result, &local_result_path, upload_timeout)
        .await
        .map_err(|err| format!("upload_failed: {err}"))?;

    result["esb_upload"] = json!({
        "server_path": primary.server_path,
        "server_file": result_filename,
    });

    info!(request_id, "doc_ocr pipeline succeeded");
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_files_prepends_single_file() {
        let request = DocOcrRequest {
            request_id: None,
            file: Some(FileRef { url: "http://fs/a.pdf".to_string(), filename: None }),
            files: Some(vec![FileRef { url: "http://fs/b.pdf".to_string(), filename: None }]),
            options: None,
        };
        let files = request.all_files();
        assert_eq!(files.len(), 2);
        assert_eq!(files[0].url, "http://fs/a.pdf");
    }

    #[tokio::test]
    async fn stub_adapter_reports_file_count() {
        let staged = vec![];
        let config: AgentConfig = serde_json::from_value(json!({})).unwrap();
        let data = StubOcrAdapter.process(&staged, &config, &Value::Null).await.unwrap();
        assert_eq!(data["pages_processed"], 0);
    }
}
