//! The reverse-proxy engine (spec.md §4.9): resolve a route, forward the
//! request with header hygiene, and normalise the upstream reply into the
//! uniform envelope.

use super::state::AppState;
use crate::envelope::Envelope;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Json, Response};
use bytes::Bytes;
use std::time::Duration;
use tracing::warn;
use uuid::Uuid;

/// Headers stripped before forwarding: hop-by-hop and length-bearing
/// (spec.md §4.9 step 3, §8 "header hygiene").
const STRIPPED_HEADERS: &[&str] = &[
    "host",
    "content-length",
    "transfer-encoding",
    "connection",
    "expect",
    "accept-encoding",
];

pub async fn proxy(
    State(state): State<AppState>,
    Path((category, action)): Path<(String, String)>,
    method: Method,
    headers: HeaderMap,
    uri: Uri,
    body: Bytes,
) -> Response {
    let trace_id = headers
        .get("x-trace-id")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    let request_id = headers
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    if let Some(expected) = &state.config.gw_api_key {
        let provided = headers.get("x-api-key").and_then(|v| v.to_str().ok());
        if provided != Some(expected.as_str()) {
            state.metrics.request_failed();
            return with_trace(
                StatusCode::UNAUTHORIZED,
                Json(Envelope::error(401, "unauthorized")),
                &trace_id,
            );
        }
    }

    let resolved = state.routes.resolve(&category, &action).await;
    let upstream_url = match resolved {
        Err(_) => {
            state.metrics.request_failed();
            return with_trace(StatusCode::SERVICE_UNAVAILABLE, Json(Envelope::error(503, "routes_not_ready")), &trace_id);
        }
        Ok(None) => {
            warn!(category, action, "routes.miss");
            state.metrics.request_failed();
            return with_trace(StatusCode::NOT_FOUND, Json(Envelope::error(404, "route_not_found")), &trace_id);
        }
        Ok(Some(url)) => url,
    };

    let query = uri.query().unwrap_or_default();
    let target = if query.is_empty() {
        upstream_url
    } else {
        format!("{upstream_url}?{query}")
    };

    let mut outbound = state.http.request(method, &target);
    for (name, value) in headers.iter() {
        if STRIPPED_HEADERS.contains(&name.as_str()) {
            continue;
        }
        outbound = outbound.header(name, value);
    }
    outbound = outbound
        .header("x-trace-id", &trace_id)
        .header("x-request-id", &request_id)
        .timeout(Duration::from_secs(state.config.request_timeout_sec));

    if !body.is_empty() {
        outbound = outbound.body(body);
    }

    state.metrics.request();
    let outcome = outbound.send().await;

    let response = match outcome {
        Ok(response) => response,
        Err(err) if err.is_timeout() => {
            state.metrics.request_failed();
            return with_trace(StatusCode::GATEWAY_TIMEOUT, Json(Envelope::error(504, "upstream_timeout")), &trace_id);
        }
        Err(err) => {
            warn!(category, action, error = %err, "gateway.proxy.transport_error");
            state.metrics.request_failed();
            return with_trace(StatusCode::BAD_GATEWAY, Json(Envelope::error(502, "bad_gateway")), &trace_id);
        }
    };

    let upstream_status = response.status();
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

    let envelope = if upstream_status.is_success() || upstream_status.is_redirection() {
        Envelope::ok(data)
    } else {
        state.metrics.request_failed();
        Envelope::upstream_error(upstream_status.as_u16(), data)
    };

    let out_status = if upstream_status.is_success() || upstream_status.is_redirection() {
        StatusCode::OK
    } else {
        StatusCode::BAD_GATEWAY
    };

    with_trace(out_status, Json(envelope), &trace_id)
}

fn with_trace(status: StatusCode, body: Json<Envelope>, trace_id: &str) -> Response {
    let mut response = (status, body).into_response();
    if let Ok(value) = HeaderValue::from_str(trace_id) {
        response.headers_mut().insert(HeaderName::from_static("x-trace-id"), value);
    }
    response
}
