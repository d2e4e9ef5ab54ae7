//! HTTP surface of the proxy
//!
//! Every path outside `/__werehouse/` is turned into a fetch against the
//! origin and handed to the worker host.

use axum::{
    Json, Router,
    body::Body,
    extract::{Request, State},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, warn};
use url::Url;
use werehouse_core::{CacheWorker, FetchOutcome, WorkerHost, WorkerState};
use werehouse_proxy::Fetcher;
use werehouse_storage::{FetchRequest, FetchResponse};

/// Largest request body forwarded to the origin
const MAX_BODY_BYTES: usize = 16 * 1024 * 1024;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub host: Arc<WorkerHost<CacheWorker>>,
    /// Used directly when the worker declines a request
    pub origin: Arc<dyn Fetcher>,
    pub origin_url: Url,
    pub metrics: Option<PrometheusHandle>,
}

impl AppState {
    pub fn new(
        host: Arc<WorkerHost<CacheWorker>>,
        origin: Arc<dyn Fetcher>,
        origin_url: Url,
        metrics: Option<PrometheusHandle>,
    ) -> Self {
        Self {
            host,
            origin,
            origin_url,
            metrics,
        }
    }
}

/// Health status response
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub namespace: String,
    pub worker: WorkerState,
}

/// Create the main router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/__werehouse/health", get(health))
        .route("/__werehouse/metrics", get(get_metrics))
        .fallback(proxy)
        .with_state(state)
}

/// GET /__werehouse/health
async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let worker = state.host.state();
    let status = if worker == WorkerState::Activated {
        "healthy"
    } else {
        "degraded"
    };

    Json(HealthResponse {
        status: status.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        namespace: state.host.hooks().manager().namespace().to_string(),
        worker,
    })
}

/// GET /__werehouse/metrics - Prometheus metrics endpoint
async fn get_metrics(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(handle) => handle.render().into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

/// Fallback handler: everything else goes through the worker
async fn proxy(State(state): State<AppState>, request: Request) -> Response {
    let fetch_request = match to_fetch_request(&state.origin_url, request).await {
        Ok(r) => r,
        Err(status) => return status.into_response(),
    };

    let response = match state.host.fetch(&fetch_request).await {
        FetchOutcome::Respond(response) => {
            let outcome = if response.is_error() { "error" } else { "worker" };
            metrics::counter!("werehouse_sw_requests_total", "outcome" => outcome).increment(1);
            response
        }
        FetchOutcome::Decline => {
            metrics::counter!("werehouse_sw_declined_total").increment(1);
            debug!("Worker declined {}, forwarding", fetch_request.url);
            match state.origin.fetch(&fetch_request).await {
                Ok(response) => {
                    metrics::counter!("werehouse_sw_requests_total", "outcome" => "passthrough")
                        .increment(1);
                    response
                }
                Err(e) => {
                    warn!("Origin fetch failed for {}: {}", fetch_request.url, e);
                    metrics::counter!("werehouse_sw_requests_total", "outcome" => "error")
                        .increment(1);
                    FetchResponse::network_error()
                }
            }
        }
    };

    into_http_response(response)
}

/// Rebuild an incoming request against the origin
///
/// The path and query replace those of the origin URL; the target is never
/// resolved as a URL reference, so `//other-host/...` stays on the origin.
async fn to_fetch_request(origin: &Url, request: Request) -> Result<FetchRequest, StatusCode> {
    let (parts, body) = request.into_parts();

    let mut url = origin.clone();
    url.set_path(parts.uri.path());
    url.set_query(parts.uri.query());
    if url.origin() != origin.origin() {
        warn!("Refusing to forward {} outside the origin", parts.uri);
        return Err(StatusCode::BAD_REQUEST);
    }

    let body = axum::body::to_bytes(body, MAX_BODY_BYTES)
        .await
        .map_err(|_| StatusCode::PAYLOAD_TOO_LARGE)?;

    Ok(FetchRequest::new(parts.method, url)
        .with_headers(parts.headers)
        .with_body(body))
}

/// Convert a fetch response into what the client sees
///
/// The synthetic error response has no body and maps to 502.
fn into_http_response(response: FetchResponse) -> Response {
    if response.is_error() {
        return StatusCode::BAD_GATEWAY.into_response();
    }

    let mut headers = HeaderMap::with_capacity(response.headers.len());
    for (name, value) in &response.headers {
        // The body is already fully buffered; framing is recomputed
        if name == header::CONTENT_LENGTH || name == header::TRANSFER_ENCODING {
            continue;
        }
        headers.append(name.clone(), value.clone());
    }

    let mut http_response = Response::new(Body::from(response.body));
    *http_response.status_mut() = response.status;
    *http_response.headers_mut() = headers;
    http_response
}
