//! REST API handlers for canary rollouts.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use rampart_rollout::RolloutResult;

use crate::handlers::{error_response, rollout_error, ApiResponse};
use crate::ApiState;

/// Request body to start a canary.
#[derive(Debug, serde::Deserialize)]
pub struct StartCanaryRequest {
    pub version: String,
    pub baseline: String,
}

/// Request body to set the canary traffic share.
#[derive(Debug, serde::Deserialize)]
pub struct TrafficRequest {
    pub percentage: i64,
}

fn respond(state: &ApiState, op: &str, result: RolloutResult<()>) -> Response {
    match result {
        Ok(()) => ApiResponse::ok(state.canary.state()).into_response(),
        Err(e) => rollout_error(op, e),
    }
}

/// GET /api/v1/canary
pub async fn get_state(State(state): State<ApiState>) -> impl IntoResponse {
    ApiResponse::ok(state.canary.state())
}

/// POST /api/v1/canary
pub async fn start(
    State(state): State<ApiState>,
    Json(req): Json<StartCanaryRequest>,
) -> impl IntoResponse {
    if req.version.trim().is_empty() || req.baseline.trim().is_empty() {
        return error_response("version and baseline are required", StatusCode::BAD_REQUEST);
    }
    match state.canary.start_canary(&req.version, &req.baseline).await {
        Ok(()) => (StatusCode::CREATED, ApiResponse::ok(state.canary.state())).into_response(),
        Err(e) => rollout_error("start canary", e),
    }
}

/// POST /api/v1/canary/pause
pub async fn pause(State(state): State<ApiState>) -> impl IntoResponse {
    let result = state.canary.pause_canary().await;
    respond(&state, "pause canary", result)
}

/// POST /api/v1/canary/resume
pub async fn resume(State(state): State<ApiState>) -> impl IntoResponse {
    let result = state.canary.resume_canary().await;
    respond(&state, "resume canary", result)
}

/// POST /api/v1/canary/traffic
pub async fn adjust_traffic(
    State(state): State<ApiState>,
    Json(req): Json<TrafficRequest>,
) -> impl IntoResponse {
    let result = state.canary.adjust_traffic(req.percentage).await;
    respond(&state, "adjust canary traffic", result)
}

/// POST /api/v1/canary/complete
pub async fn complete(State(state): State<ApiState>) -> impl IntoResponse {
    let result = state.canary.complete_canary().await;
    respond(&state, "complete canary", result)
}

/// POST /api/v1/canary/rollback
pub async fn rollback(State(state): State<ApiState>) -> impl IntoResponse {
    let result = state.canary.rollback_canary().await;
    respond(&state, "rollback canary", result)
}
