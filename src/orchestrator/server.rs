use super::proxy::api_agent_proxy;
use super::state::AppState;
use crate::agents::AgentContext;
use crate::callback::CallbackPolicy;
use crate::config::Config;
use crate::envelope::Envelope;
use crate::kv::{Kv, MemoryKv, RedisKv};
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json};
use axum::routing::{get, post};
use axum::Router;
use bytes::Bytes;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::info;

type AnyError = Box<dyn std::error::Error + Send + Sync + 'static>;

pub async fn run(address: SocketAddr) -> Result<(), AnyError> {
    let config = Config::load()?;

    let kv: Arc<dyn Kv> = match config.kv_url() {
        Some(url) => Arc::new(RedisKv::connect(&url, config.redis_key_prefix.clone()).await?),
        None => {
            info!("no KV_HOST configured, using an in-process job tracker and route table");
            Arc::new(MemoryKv::new())
        }
    };
    kv.ping().await?;

    let registry = crate::agents::HandlerRegistry::with_defaults();
    let agent_configs = super::agent_configs::load(config.agent_config_file.as_deref())?;

    let state = AppState::new(config, kv, registry, agent_configs);
    state.routes.init(Duration::from_secs(2)).await;

    bootstrap_registration(&state, address);

    let app = app(state);

    let listener = TcpListener::bind(address).await?;
    info!(%address, "orchestrator listening");

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

/// Builds the router from an already-constructed [`AppState`], split out of
/// [`run`] so tests can drive it over a real loopback socket without going
/// through `Config::load`.
pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/register", post(register))
        .route("/agents/{name}", get(agent_status).post(invoke_agent))
        .route("/api/agents/{name}", axum::routing::any(api_agent_proxy))
        .with_state(state)
}

/// Registers every configured agent as `agents.<name>` with the gateway
/// (spec.md §4.11). Spawned in the background: give-up must never block
/// the orchestrator's own startup.
fn bootstrap_registration(state: &AppState, address: SocketAddr) {
    let Some(gateway_url) = state.config.gateway_url.clone() else {
        return;
    };
    let base_url = state
        .config
        .orchestrator_base_url
        .clone()
        .unwrap_or_else(|| format!("http://{address}"));
    let routes: Vec<crate::bootstrap::RouteRegistration> = state
        .agent_configs
        .keys()
        .map(|name| crate::bootstrap::RouteRegistration {
            category: "agents".to_string(),
            action: name.clone(),
            url: format!("{base_url}/agents/{name}"),
        })
        .collect();
    if routes.is_empty() {
        return;
    }

    let http = state.http.clone();
    let max_attempts = state.config.register_max_attempts;
    let retry_delay = Duration::from_secs(state.config.register_retry_seconds);
    tokio::spawn(async move {
        crate::bootstrap::register_all(&http, &gateway_url, &routes, max_attempts, retry_delay).await;
    });
}

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({"status": "ok", "metrics": state.metrics.snapshot()}))
}

#[derive(Deserialize)]
struct RegisterRequest {
    category: String,
    action: String,
    url: String,
}

async fn register(State(state): State<AppState>, Json(body): Json<RegisterRequest>) -> impl IntoResponse {
    match state.routes.add(&body.category, &body.action, &body.url).await {
        Ok(()) => (StatusCode::OK, Json(json!({"code": 0, "msg": "ok"}))).into_response(),
        Err(err) => (StatusCode::SERVICE_UNAVAILABLE, Json(Envelope::error(503, err.to_string()))).into_response(),
    }
}

async fn agent_status(
    State(state): State<AppState>,
    Path(_name): Path<String>,
    Query(query): Query<HashMap<String, String>>,
) -> axum::response::Response {
    let request_id = state.jobs.ensure_request_id(query.get("request_id").cloned());
    match state.jobs.get_job(&request_id).await {
        Ok(Some(record)) => (StatusCode::OK, Json(record)).into_response(),
        Ok(None) => (StatusCode::OK, Json(unknown_record(&request_id))).into_response(),
        Err(err) => (StatusCode::INTERNAL_SERVER_ERROR, Json(Envelope::error(500, err.to_string()))).into_response(),
    }
}

fn unknown_record(request_id: &str) -> Value {
    json!({"request_id": request_id, "status": "UNKNOWN"})
}

async fn invoke_agent(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
    raw_body: Bytes,
) -> axum::response::Response {
    let Some(config) = state.agent_configs.get(&name).cloned() else {
        return (StatusCode::NOT_FOUND, Json(Envelope::error(404, "agent_not_found"))).into_response();
    };

    let handler = match state.registry.resolve(&config, &name) {
        Ok(handler) => handler,
        Err(_) => return (StatusCode::INTERNAL_SERVER_ERROR, Json(Envelope::error(500, "agent_handler_missing"))).into_response(),
    };

    let body: Option<Value> = if raw_body.is_empty() {
        None
    } else {
        match serde_json::from_slice(&raw_body) {
            Ok(value) => Some(value),
            Err(err) => return (StatusCode::BAD_REQUEST, Json(Envelope::error(400, err.to_string()))).into_response(),
        }
    };

    let caller_request_id = body
        .as_ref()
        .and_then(|b| b.get("request_id"))
        .and_then(Value::as_str)
        .map(str::to_string);
    let request_id = state.jobs.ensure_request_id(caller_request_id);

    let header_map: HashMap<String, String> = headers
        .iter()
        .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.as_str().to_string(), v.to_string())))
        .collect();

    let ctx = AgentContext {
        request_id,
        agent_name: name,
        config,
        headers: header_map,
        query,
        body,
        raw_body: raw_body.to_vec(),
        jobs: state.jobs.clone(),
        esb: state.esb.clone(),
        metrics: state.metrics.clone(),
        staging_dir: PathBuf::from(&state.config.staging_dir),
        http: state.http.clone(),
        idempotency_ttl_secs: state.config.idempotency_ttl_sec,
        job_ttl_secs: state.config.job_ttl_sec,
        download_timeout: Duration::from_secs(state.config.request_timeout_sec),
        upload_timeout: Duration::from_secs(state.config.request_timeout_sec),
        callback_policy: CallbackPolicy {
            max_retries: state.config.doc_ocr_callback_max_retries,
            base_delay: Duration::from_secs_f64(state.config.doc_ocr_callback_base_delay_sec),
            timeout: Duration::from_secs(state.config.doc_ocr_callback_timeout_sec),
        },
    };

    match handler.run(ctx).await {
        Ok(response) => response,
        Err(err) => (StatusCode::INTERNAL_SERVER_ERROR, Json(Envelope::error(500, err.to_string()))).into_response(),
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
