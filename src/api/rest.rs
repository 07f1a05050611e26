// =============================================================================
// REST API Endpoints — Axum 0.7
// =============================================================================
//
// All endpoints live under `/api/v1/`. Health is public; everything else
// requires an authorized caller (`Authorized` extractor).  Read-only views
// admit access-listed accounts; engine control and tick pushes need the
// admin token.
//
// CORS is configured permissively for development; tighten `allowed_origins`
// in production.
// =============================================================================

use std::sync::Arc;

use axum::{
    extract::{Json, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use serde::Serialize;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

use crate::api::auth::{AuthRejection, Authorized};
use crate::app_state::AppState;
use crate::error::EngineError;
use crate::types::{FeedStatus, RawTick};

// =============================================================================
// Router construction
// =============================================================================

/// Build the full REST API router with CORS middleware and shared state.
pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // ── Public ──────────────────────────────────────────────────
        .route("/api/v1/health", get(health))
        // ── Authenticated ───────────────────────────────────────────
        .route("/api/v1/state", get(full_state))
        .route("/api/v1/signal", get(active_signal))
        .route("/api/v1/polls", get(recent_polls))
        .route("/api/v1/digits", get(digit_stats))
        .route("/api/v1/strategy", get(injected_strategy))
        .route("/api/v1/control/start", post(control_start))
        .route("/api/v1/control/stop", post(control_stop))
        .route("/api/v1/ticks", post(push_tick))
        // ── WebSocket (handled in the ws module but mounted here) ───
        .route("/api/v1/ws", get(crate::api::ws::ws_handler))
        // ── Middleware & State ──────────────────────────────────────
        .layer(cors)
        .with_state(state)
}

fn error_body(status: StatusCode, message: impl Into<String>) -> axum::response::Response {
    let body = serde_json::json!({ "error": message.into() });
    (status, Json(body)).into_response()
}

// =============================================================================
// Health (public)
// =============================================================================

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    running: bool,
    feed_status: FeedStatus,
    state_version: u64,
    server_time: i64,
}

async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let view = state.engine.view();
    Json(HealthResponse {
        status: "ok",
        running: state.engine.is_running(),
        feed_status: view.feed_status,
        state_version: state.current_state_version(),
        server_time: chrono::Utc::now().timestamp_millis(),
    })
}

// =============================================================================
// Read-only views (authenticated)
// =============================================================================

async fn full_state(
    _caller: Authorized,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    Json(state.build_snapshot())
}

async fn active_signal(
    _caller: Authorized,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    Json(state.engine.active_signal())
}

async fn recent_polls(
    _caller: Authorized,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    Json(state.engine.recent_polls())
}

async fn digit_stats(
    _caller: Authorized,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    Json(state.engine.digit_stats())
}

async fn injected_strategy(
    _caller: Authorized,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    match state.injected_strategy() {
        Ok(Some(template)) => Json(template).into_response(),
        Ok(None) => error_body(
            StatusCode::NOT_FOUND,
            "No active signal or no strategy template configured",
        ),
        Err(e) => {
            warn!(error = %e, "strategy injection failed");
            error_body(StatusCode::UNPROCESSABLE_ENTITY, e.to_string())
        }
    }
}

// =============================================================================
// Engine control (authenticated)
// =============================================================================

#[derive(Serialize)]
struct ControlResponse {
    running: bool,
    message: String,
}

async fn control_start(
    Authorized(caller): Authorized,
    State(state): State<Arc<AppState>>,
) -> axum::response::Response {
    if !caller.is_admin() {
        return AuthRejection::admin_required().into_response();
    }
    match state.engine.start().await {
        Ok(()) => {
            state.increment_version();
            info!(caller = %caller, "Engine STARTED via API");
            Json(ControlResponse {
                running: state.engine.is_running(),
                message: "Engine running".to_string(),
            })
            .into_response()
        }
        Err(e @ EngineError::UpstreamUnavailable(_)) => {
            state.push_error(e.to_string());
            error_body(StatusCode::SERVICE_UNAVAILABLE, e.to_string())
        }
        Err(e @ EngineError::Cancelled) => error_body(StatusCode::CONFLICT, e.to_string()),
    }
}

async fn control_stop(
    Authorized(caller): Authorized,
    State(state): State<Arc<AppState>>,
) -> axum::response::Response {
    if !caller.is_admin() {
        return AuthRejection::admin_required().into_response();
    }
    state.engine.stop();
    state.increment_version();
    info!(caller = %caller, "Engine STOPPED via API");

    Json(ControlResponse {
        running: state.engine.is_running(),
        message: "Engine stopped".to_string(),
    })
    .into_response()
}

// =============================================================================
// Tick push (admin)
// =============================================================================

#[derive(Serialize)]
struct TickResponse {
    accepted: bool,
    buffer_len: usize,
}

/// Feed one externally sourced tick into the buffer. Malformed values and
/// ticks sent while the engine is stopped are reported as not accepted.
async fn push_tick(
    Authorized(caller): Authorized,
    State(state): State<Arc<AppState>>,
    Json(tick): Json<RawTick>,
) -> axum::response::Response {
    if !caller.is_admin() {
        return AuthRejection::admin_required().into_response();
    }
    let accepted = state.engine.ingest(tick);
    if !accepted {
        warn!(value = tick.value, "pushed tick rejected");
    }
    Json(TickResponse {
        accepted,
        buffer_len: state.engine.view().buffer_len,
    })
    .into_response()
}
