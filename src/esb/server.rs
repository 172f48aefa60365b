//! Thin streaming bridge to the external file server (spec.md §4.5, §6).

use super::multipart;
use crate::config::Config;
use crate::observability::Metrics;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use futures_util::StreamExt;
use serde::Deserialize;
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::net::TcpListener;
use tracing::{info, warn};

type AnyError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Clone)]
struct AppState {
    config: Arc<Config>,
    http: reqwest::Client,
    metrics: Arc<Metrics>,
}

pub async fn run(address: SocketAddr) -> Result<(), AnyError> {
    let config = Config::load()?;
    let state = AppState {
        config: Arc::new(config),
        http: reqwest::Client::new(),
        metrics: Arc::new(Metrics::new()),
    };

    let app = Router::new()
        .route("/health", get(health))
        .route("/esb-download", post(esb_download))
        .route("/esb-upload", post(esb_upload))
        .with_state(state);

    let listener = TcpListener::bind(address).await?;
    info!(%address, "esb listening");

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({"status": "ok", "metrics": state.metrics.snapshot()}))
}

#[derive(Deserialize)]
struct DownloadRequest {
    server_path: String,
    server_file: String,
    local_file_path: Option<String>,
}

async fn esb_download(State(state): State<AppState>, Json(body): Json<DownloadRequest>) -> Response {
    if body.server_path.is_empty() || body.server_file.is_empty() {
        return (StatusCode::BAD_REQUEST, Json(json!(false))).into_response();
    }

    let target = format!("{}/{}", body.server_path.trim_end_matches('/'), body.server_file);
    let mut request = state.http.get(&target);
    if let (Some(user), Some(pass)) = (&state.config.esb_basic_auth_user, &state.config.esb_basic_auth_pass) {
        request = request.basic_auth(user, Some(pass));
    }

    let response = match request.send().await {
        Ok(response) => response,
        Err(err) => {
            warn!(target, error = %err, "esb.download.transport_error");
            state.metrics.request_failed();
            return (StatusCode::BAD_GATEWAY, Json(json!(false))).into_response();
        }
    };

    if !response.status().is_success() {
        state.metrics.request_failed();
        return (StatusCode::BAD_GATEWAY, Json(json!(false))).into_response();
    }

    match body.local_file_path {
        Some(local_path) => {
            let bytes = match response.bytes().await {
                Ok(bytes) => bytes,
                Err(err) => {
                    warn!(error = %err, "esb.download.read_failed");
                    state.metrics.request_failed();
                    return (StatusCode::BAD_GATEWAY, Json(json!(false))).into_response();
                }
            };
            if let Some(parent) = std::path::Path::new(&local_path).parent() {
                if let Err(err) = tokio::fs::create_dir_all(parent).await {
                    warn!(error = %err, "esb.download.mkdir_failed");
                    state.metrics.request_failed();
                    return (StatusCode::INTERNAL_SERVER_ERROR, Json(json!(false))).into_response();
                }
            }
            if let Err(err) = tokio::fs::write(&local_path, &bytes).await {
                warn!(error = %err, "esb.download.write_failed");
                state.metrics.request_failed();
                return (StatusCode::INTERNAL_SERVER_ERROR, Json(json!(false))).into_response();
            }
            state.metrics.request();
            (StatusCode::OK, Json(json!(true))).into_response()
        }
        None => {
            state.metrics.request();
            let stream = response.bytes_stream().map(|chunk| chunk.map_err(std::io::Error::other));
            let body = axum::body::Body::from_stream(stream);
            Response::builder()
                .status(StatusCode::OK)
                .header("content-type", "application/octet-stream")
                .body(body)
                .unwrap()
        }
    }
}

#[derive(Deserialize)]
struct UploadRequest {
    server_path: String,
    server_file: String,
    local_file_path: String,
}

async fn esb_upload(State(state): State<AppState>, Json(body): Json<UploadRequest>) -> Response {
    if body.server_path.is_empty() || body.server_file.is_empty() || body.local_file_path.is_empty() {
        return (StatusCode::BAD_REQUEST, Json(json!(false))).into_response();
    }

    let bytes = match tokio::fs::read(&body.local_file_path).await {
        Ok(bytes) => bytes,
        Err(err) => {
            warn!(path = %body.local_file_path, error = %err, "esb.upload.read_failed");
            return (StatusCode::INTERNAL_SERVER_ERROR, Json(json!(false))).into_response();
        }
    };

    let unix_ms = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis();
    let boundary = multipart::boundary(unix_ms);
    let multipart_body = multipart::build_body(&boundary, &state.config.esb_upload_field_name, &body.server_file, &bytes);

    let target = state
        .config
        .esb_upload_url
        .clone()
        .unwrap_or_else(|| format!("{}/upload", body.server_path.trim_end_matches('/')));

    let mut request = state
        .http
        .post(&target)
        .header("Pragma", "XMLMD5")
        .header("Content-Type", format!("multipart/form-data; boundary={boundary}"))
        .body(multipart_body);
    if let (Some(user), Some(pass)) = (&state.config.esb_basic_auth_user, &state.config.esb_basic_auth_pass) {
        request = request.basic_auth(user, Some(pass));
    }

    let response = match request.send().await {
        Ok(response) => response,
        Err(err) => {
            warn!(target, error = %err, "esb.upload.transport_error");
            state.metrics.request_failed();
            return (StatusCode::OK, Json(json!(false))).into_response();
        }
    };

    if response.status().is_success() {
        state.metrics.request();
        (StatusCode::OK, Json(json!(true))).into_response()
    } else {
        warn!(target, status = %response.status(), "esb.upload.rejected");
        state.metrics.request_failed();
        (StatusCode::OK, Json(json!(false))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::State;
    use wiremock::matchers::{method as wm_method, path as wm_path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn state() -> AppState {
        AppState {
            config: Arc::new(Config::default()),
            http: reqwest::Client::new(),
            metrics: Arc::new(Metrics::new()),
        }
    }

    #[tokio::test]
    async fn download_rejects_empty_server_path() {
        let response = esb_download(
            State(state()),
            Json(DownloadRequest { server_path: String::new(), server_file: "a.pdf".to_string(), local_file_path: None }),
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn download_writes_to_local_file_path_when_given() {
        let upstream = MockServer::start().await;
        Mock::given(wm_method("GET"))
            .and(wm_path("/inbox/report.pdf"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"hello".to_vec()))
            .mount(&upstream)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let local_path = dir.path().join("out.bin");

        let response = esb_download(
            State(state()),
            Json(DownloadRequest {
                server_path: upstream.uri() + "/inbox",
                server_file: "report.pdf".to_string(),
                local_file_path: Some(local_path.to_str().unwrap().to_string()),
            }),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(tokio::fs::read(&local_path).await.unwrap(), b"hello");
    }

    #[tokio::test]
    async fn download_maps_non_success_upstream_to_bad_gateway() {
        let upstream = MockServer::start().await;
        Mock::given(wm_method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&upstream)
            .await;

        let response = esb_download(
            State(state()),
            Json(DownloadRequest { server_path: upstream.uri(), server_file: "missing.pdf".to_string(), local_file_path: None }),
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    }

    #[tokio::test]
    async fn upload_posts_a_multipart_body_and_reports_true_on_success() {
        let upstream = MockServer::start().await;
        Mock::given(wm_method("POST"))
            .and(wm_path("/upload"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&upstream)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let local_path = dir.path().join("result.json");
        tokio::fs::write(&local_path, b"{\"ok\":true}").await.unwrap();

        let response = esb_upload(
            State(state()),
            Json(UploadRequest {
                server_path: upstream.uri(),
                server_file: "result.json".to_string(),
                local_file_path: local_path.to_str().unwrap().to_string(),
            }),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(value, json!(true));
    }

    #[tokio::test]
    async fn upload_reports_false_without_erroring_when_upstream_rejects() {
        let upstream = MockServer::start().await;
        Mock::given(wm_method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&upstream)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let local_path = dir.path().join("result.json");
        tokio::fs::write(&local_path, b"{}").await.unwrap();

        let mut config = Config::default();
        config.esb_upload_url = Some(format!("{}/upload", upstream.uri()));
        let response = esb_upload(
            State(AppState { config: Arc::new(config), http: reqwest::Client::new(), metrics: Arc::new(Metrics::new()) }),
            Json(UploadRequest {
                server_path: upstream.uri(),
                server_file: "result.json".to_string(),
                local_file_path: local_path.to_str().unwrap().to_string(),
            }),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(value, json!(false));
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate()).expect("failed to install signal handler");
        sigterm.recv().await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("shutdown signal received");
}
