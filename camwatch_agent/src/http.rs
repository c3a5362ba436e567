//! HTTP routes: Prometheus scrape, health report, device identity, recent logs.

use std::sync::atomic::Ordering;

use axum::{
    extract::{Query, Request, State},
    http::{header, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, error};

use crate::exposition::CONTENT_TYPE;
use crate::logbuf::DEFAULT_CAPACITY;
use crate::metrics::{collect_health, collect_metrics};
use crate::state::AppState;
use crate::types::{DeviceDocument, LogsDocument};

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/health", get(health_handler))
        .route("/device", get(device_handler))
        .route("/logs", get(logs_handler))
        .fallback(not_found)
        .layer(middleware::from_fn_with_state(state.clone(), count_requests))
        .with_state(state)
}

async fn count_requests(State(state): State<AppState>, req: Request, next: Next) -> Response {
    state.http_requests.fetch_add(1, Ordering::Relaxed);
    debug!(method = %req.method(), path = %req.uri().path(), "request");
    next.run(req).await
}

pub async fn metrics_handler(State(state): State<AppState>) -> Response {
    match collect_metrics(&state).await.render() {
        Ok(body) => ([(header::CONTENT_TYPE, CONTENT_TYPE)], body).into_response(),
        Err(e) => {
            error!(error = %e, "encoding metrics failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": e.to_string() })),
            )
                .into_response()
        }
    }
}

pub async fn health_handler(State(state): State<AppState>) -> Response {
    // always 200; the verdict is in the body
    Json(collect_health(&state).await).into_response()
}

pub async fn device_handler(State(state): State<AppState>) -> Response {
    let Some(cache) = state.device_info.as_ref() else {
        return unavailable("device info collection is disabled");
    };
    match cache.get().await {
        Ok(c) => Json(DeviceDocument {
            device: c.value,
            stale: c.stale,
            age_secs: c.age.as_secs(),
        })
        .into_response(),
        Err(e) => unavailable(&e.to_string()),
    }
}

#[derive(Debug, Deserialize)]
pub struct LogsQuery {
    pub limit: Option<usize>,
}

pub async fn logs_handler(
    State(state): State<AppState>,
    Query(q): Query<LogsQuery>,
) -> Response {
    let limit = q.limit.unwrap_or(DEFAULT_CAPACITY);
    let logs = state.logs.recent(limit);
    Json(LogsDocument {
        count: logs.len(),
        logs,
    })
    .into_response()
}

async fn not_found() -> Response {
    (StatusCode::NOT_FOUND, Json(json!({ "error": "not found" }))).into_response()
}

fn unavailable(reason: &str) -> Response {
    (
        StatusCode::SERVICE_UNAVAILABLE,
        Json(json!({ "error": reason })),
    )
        .into_response()
}
