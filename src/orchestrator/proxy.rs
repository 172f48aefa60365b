//! Secondary proxy (spec.md §6): resolves the same agent through the KV
//! route table, overlaying the per-agent header/query config before
//! forwarding. Shares the gateway's envelope conventions but is kept
//! separate since the overlay step has no gateway counterpart.

use super::state::AppState;
use crate::envelope::Envelope;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Json, Response};
use bytes::Bytes;
use std::time::Duration;
use tracing::warn;

const STRIPPED_HEADERS: &[&str] = &[
    "host",
    "content-length",
    "transfer-encoding",
    "connection",
    "expect",
    "accept-encoding",
];

pub async fn api_agent_proxy(
    State(state): State<AppState>,
    Path(name): Path<String>,
    method: Method,
    headers: HeaderMap,
    uri: Uri,
    body: Bytes,
) -> Response {
    let resolved = state.routes.resolve("agents", &name).await;
    let upstream_url = match resolved {
        Err(_) => {
            state.metrics.request_failed();
            return (StatusCode::SERVICE_UNAVAILABLE, Json(Envelope::error(503, "routes_not_ready"))).into_response();
        }
        Ok(None) => {
            warn!(agent = %name, "routes.miss");
            state.metrics.request_failed();
            return (StatusCode::NOT_FOUND, Json(Envelope::error(404, "route_not_found"))).into_response();
        }
        Ok(Some(url)) => url,
    };

    let overlay = state.agent_configs.get(&name);

    let mut query_pairs: Vec<(String, String)> = uri
        .query()
        .map(|q| url::form_urlencoded::parse(q.as_bytes()).into_owned().collect())
        .unwrap_or_default();
    if let Some(config) = overlay {
        for (key, value) in &config.query {
            query_pairs.push((key.clone(), value.clone()));
        }
    }
    let query_string = url::form_urlencoded::Serializer::new(String::new())
        .extend_pairs(&query_pairs)
        .finish();

    let target = if query_string.is_empty() {
        upstream_url
    } else {
        format!("{upstream_url}?{query_string}")
    };

    let mut outbound = state.http.request(method, &target);
    for (header_name, value) in headers.iter() {
        if STRIPPED_HEADERS.contains(&header_name.as_str()) {
            continue;
        }
        outbound = outbound.header(header_name, value);
    }
    if let Some(config) = overlay {
        for (key, value) in &config.headers {
            outbound = outbound.header(key, value);
        }
    }
    outbound = outbound.timeout(Duration::from_secs(state.config.request_timeout_sec));

    if !body.is_empty() {
        outbound = outbound.body(body);
    }

    state.metrics.request();
    let outcome = outbound.send().await;
    let response = match outcome {
        Ok(response) => response,
        Err(err) if err.is_timeout() => {
            state.metrics.request_failed();
            return (StatusCode::GATEWAY_TIMEOUT, Json(Envelope::error(504, "upstream_timeout"))).into_response();
        }
        Err(err) => {
            warn!(agent = %name, error = %err, "orchestrator.api_proxy.transport_error");
            state.metrics.request_failed();
            return (StatusCode::BAD_GATEWAY, Json(Envelope::error(502, "bad_gateway"))).into_response();
        }
    };

    let status = response.status();
    let text = response.text().await.unwrap_or_default();
    let data = if text.is_empty() {
        serde_json::Value::Null
    } else {
        match serde_json::from_str::<serde_json::Value>(&text) {
            Ok(value) if value.is_object() || value.is_array() => value,
            Ok(scalar) => serde_json::json!({"value": scalar}),
            Err(_) => serde_json::json!({"raw": text}),
        }
    };

    if status.is_success() || status.is_redirection() {
        (StatusCode::OK, Json(Envelope::ok(data))).into_response()
    } else {
        state.metrics.request_failed();
        (StatusCode::BAD_GATEWAY, Json(Envelope::upstream_error(status.as_u16(), data))).into_response()
    }
}
