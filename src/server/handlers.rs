//! # Server Handlers
//!
//! HTTP route handlers: the catch-all dispatcher and the admin surface
//! (`add-backend`, `stats`, `health`, `cache-metrics`). The dispatcher's
//! header-forwarding reqwest-to-axum translation reuses the reference
//! crate's `ui_proxy` pattern almost verbatim, generalized from "forward to
//! the one configured backend" to "forward to whichever peer the server
//! pool selects this request."

use super::AppState;
use crate::cache::BackendStat;
use crate::error::ProxyError;
use axum::{
    extract::State,
    http::{HeaderMap, Method, StatusCode, Uri},
    response::{IntoResponse, Json as JsonResponse, Response},
    Json,
};
use serde::Deserialize;
use serde_json::json;

/// The load balancer's own liveness, unrelated to backend health.
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, JsonResponse(json!({ "status": "healthy" })))
}

#[derive(Debug, Deserialize)]
pub struct AddBackendRequest {
    pub url: String,
}

/// `POST /add-backend`. Parses the URL, appends the backend with initial
/// `alive=true`, and invalidates the routing and stats caches.
pub async fn add_backend(
    State(state): State<AppState>,
    Json(body): Json<AddBackendRequest>,
) -> Result<StatusCode, ProxyError> {
    let parsed = url::Url::parse(&body.url)?;
    state.pool.add_backend(parsed.to_string(), &state.caches).await;
    Ok(StatusCode::OK)
}

/// `GET /stats`. Serves the stats cache when fresh; otherwise submits to
/// the stats batcher, which computes the snapshot once even if several
/// `/stats` requests miss in the same window, and re-populates the cache
/// with the result.
pub async fn stats(State(state): State<AppState>) -> Result<Json<Vec<BackendStat>>, ProxyError> {
    if let Some(snapshot) = state.caches.stats.get().await {
        return Ok(Json(snapshot));
    }

    let snapshot = state
        .stats_batcher
        .submit_with_deadline("stats".to_string(), state.config.stats_submit_deadline())
        .await?
        .ok_or_else(|| ProxyError::Internal("stats batch produced no result".to_string()))?;

    state.caches.stats.set(snapshot.clone()).await;
    Ok(Json(snapshot))
}

/// `GET /cache-metrics`. Reports the three cache metrics plus the
/// connection pool's, matching the documented `{"cache_metrics":{…},
/// "pool_metrics":{…}}` shape, plus an aggregate `request_metrics` block
/// (total/successful/failed/error_rate) in the reference crate's own
/// `MetricsCollector` idiom.
pub async fn cache_metrics(State(state): State<AppState>) -> JsonResponse<serde_json::Value> {
    JsonResponse(json!({
        "cache_metrics": state.caches.get_all_metrics().await,
        "pool_metrics": state.connections.metrics(),
        "request_metrics": state.request_metrics.snapshot(),
    }))
}

/// Catch-all dispatcher. Records the total/success/failure request metric
/// around whatever `dispatch_inner` returns, regardless of which of its
/// error paths (no peer, forward failure, body-read failure) was taken.
pub async fn dispatch(
    State(state): State<AppState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: axum::body::Body,
) -> Result<Response, ProxyError> {
    let result = dispatch_inner(&state, method, uri, headers, body).await;
    match &result {
        Ok(_) => state.request_metrics.record_success(),
        Err(_) => state.request_metrics.record_failure(),
    }
    result
}

/// Selects a peer from the server pool, forwards the request through that
/// peer's pooled connection, and increments `success_count` once the
/// forward completes. Responds `503` when no alive peer is available.
async fn dispatch_inner(
    state: &AppState,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: axum::body::Body,
) -> Result<Response, ProxyError> {
    let backend = state
        .pool
        .get_next_peer_with_cache(&state.caches)
        .await
        .ok_or_else(|| ProxyError::ServiceUnavailable("no backend available".to_string()))?;

    let client = state
        .connections
        .get(&backend.url, state.config.pool_request_timeout())
        .await?;

    let path_and_query = uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/");
    let target_url = format!("{}{}", backend.url.trim_end_matches('/'), path_and_query);

    let mut request_builder = client.request(method, &target_url);
    for (name, value) in headers.iter() {
        if name != axum::http::header::HOST {
            request_builder = request_builder.header(name, value);
        }
    }

    let body_bytes = axum::body::to_bytes(body, usize::MAX)
        .await
        .map_err(|e| ProxyError::BadRequest(format!("Failed to read request body: {}", e)))?;

    if !body_bytes.is_empty() {
        request_builder = request_builder.body(body_bytes);
    }

    let response = request_builder
        .send()
        .await
        .map_err(|e| ProxyError::Upstream(format!("forward to {} failed: {}", backend.url, e)))?;

    backend.record_success();

    let status = response.status();
    let mut response_builder = axum::http::Response::builder().status(status);
    for (name, value) in response.headers().iter() {
        response_builder = response_builder.header(name, value);
    }

    let response_body = response
        .bytes()
        .await
        .map_err(|e| ProxyError::Upstream(format!("Failed to read response body: {}", e)))?;

    response_builder
        .body(axum::body::Body::from(response_body))
        .map_err(ProxyError::from)
}
