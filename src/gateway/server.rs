use super::middleware::{rate_limit, require_api_key, trace_and_log};
use super::proxy::proxy;
use super::state::AppState;
use crate::config::Config;
use crate::envelope::Envelope;
use crate::kv::{Kv, MemoryKv, RedisKv};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use axum::routing::{get, post};
use axum::Router;
use serde::Deserialize;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::info;

type AnyError = Box<dyn std::error::Error + Send + Sync + 'static>;

pub async fn run(address: SocketAddr) -> Result<(), AnyError> {
    let config = Config::load()?;

    let kv: Arc<dyn Kv> = match config.kv_url() {
        Some(url) => {
            info!("connecting to shared kv store");
            Arc::new(RedisKv::connect(&url, config.redis_key_prefix.clone()).await?)
        }
        None => {
            info!("no KV_HOST configured, using an in-process route table");
            Arc::new(MemoryKv::new())
        }
    };
    kv.ping().await?;

    let state = AppState::new(config, kv);
    state.routes.init(Duration::from_secs(2)).await;

    let app = app(state);

    let listener = TcpListener::bind(address).await?;
    info!(%address, "gateway listening");

    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

/// Builds the router from an already-constructed [`AppState`], split out of
/// [`run`] so tests can drive it over a real loopback socket without going
/// through `Config::load`.
pub fn app(state: AppState) -> Router {
    let proxy_path = format!("{}/{{category}}/{{action}}", state.config.api_prefix.trim_end_matches('/'));

    let proxied = Router::new()
        .route(&proxy_path, axum::routing::any(proxy))
        .layer(axum::middleware::from_fn_with_state(state.clone(), rate_limit))
        .layer(axum::middleware::from_fn_with_state(state.clone(), require_api_key));

    Router::new()
        .route("/health", get(health))
        .route("/routes/reload", get(reload_routes))
        .route("/register", post(register))
        .merge(proxied)
        .layer(axum::middleware::from_fn(trace_and_log))
        .with_state(state)
}

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({"status": "ok", "metrics": state.metrics.snapshot()}))
}

async fn reload_routes(State(state): State<AppState>) -> impl IntoResponse {
    match state.routes.reload().await {
        Ok(()) => (StatusCode::OK, Json(Envelope::ok(serde_json::json!({"reloaded": true})))).into_response(),
        Err(err) => (StatusCode::SERVICE_UNAVAILABLE, Json(Envelope::error(503, err.to_string()))).into_response(),
    }
}

#[derive(Deserialize)]
struct RegisterRequest {
    category: String,
    action: String,
    url: String,
}

async fn register(State(state): State<AppState>, Json(body): Json<RegisterRequest>) -> impl IntoResponse {
    match state.routes.add(&body.category, &body.action, &body.url).await {
        Ok(()) => (StatusCode::OK, Json(serde_json::json!({"code": 0, "msg": "ok"}))).into_response(),
        Err(err) => (StatusCode::SERVICE_UNAVAILABLE, Json(Envelope::error(503, err.to_string()))).into_response(),
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
