//! HTTP surface of the operator.
//!
//! | route | |
//! |---|---|
//! | `GET /healthz` | 200 while the process serves requests |
//! | `GET /readyz` | 200 once every streaming watch connected, 503 before |
//! | `GET /metrics` | Prometheus text format |
//! | `POST /v1/triggerAction` | `{"commands": [...]}` submitted to the worker pool |

use crate::command::Commands;
use crate::dispatch::WorkerPool;
use crate::error::ControllerError;
use crate::metrics::Metrics;
use crate::watcher::Readiness;
use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

#[derive(Clone, Debug)]
pub struct AppState {
    pub readiness: Readiness,
    pub metrics: Metrics,
    pub pool: WorkerPool,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .route("/v1/triggerAction", post(trigger_action))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve until `cancel` fires
pub async fn serve(addr: &str, state: AppState, cancel: CancellationToken) -> Result<(), ControllerError> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Listening on {}", addr);
    axum::serve(listener, router(state))
        .with_graceful_shutdown(cancel.cancelled_owned())
        .await?;
    Ok(())
}

async fn healthz() -> &'static str {
    "ok"
}

async fn readyz(State(state): State<AppState>) -> Response {
    if state.readiness.is_ready() {
        return (StatusCode::OK, "ready").into_response();
    }
    let pending = state.readiness.pending();
    (
        StatusCode::SERVICE_UNAVAILABLE,
        Json(json!({ "pending": pending })),
    )
        .into_response()
}

async fn metrics(State(state): State<AppState>) -> Response {
    match state.metrics.render() {
        Ok(text) => ([(header::CONTENT_TYPE, "text/plain; version=0.0.4")], text).into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

async fn trigger_action(
    State(state): State<AppState>,
    body: Result<Json<Commands>, JsonRejection>,
) -> Response {
    let Json(Commands { commands }) = match body {
        Ok(body) => body,
        Err(rejection) => {
            warn!("Rejected trigger request: {}", rejection);
            return (StatusCode::BAD_REQUEST, Json(json!({ "error": rejection.body_text() }))).into_response();
        }
    };

    let total = commands.len();
    for (accepted, command) in commands.into_iter().enumerate() {
        info!("Triggered {} for {}", command.name, command.wlid);
        if let Err(e) = state.pool.submit(command).await {
            return (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "error": e.to_string(), "accepted": accepted })),
            )
                .into_response();
        }
    }
    (StatusCode::ACCEPTED, Json(json!({ "accepted": total }))).into_response()
}
