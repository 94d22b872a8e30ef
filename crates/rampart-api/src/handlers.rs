//! Response envelope, error mapping and liveness.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use rampart_rollout::RolloutError;
use tracing::warn;

/// Response wrapper for consistent API format.
#[derive(serde::Serialize)]
pub(crate) struct ApiResponse<T: serde::Serialize> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T: serde::Serialize> ApiResponse<T> {
    pub(crate) fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
        })
    }
}

pub(crate) fn error_response(msg: &str, status: StatusCode) -> Response {
    (
        status,
        Json(ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(msg.to_string()),
        }),
    )
        .into_response()
}

/// HTTP status for a controller error.
///
/// Rejected preconditions are client errors (or 503 when the controller
/// is off), fatal errors are 500 and collaborator failures are 502.
pub fn status_for(err: &RolloutError) -> StatusCode {
    match err {
        RolloutError::InvalidTrafficPercentage(_) => StatusCode::BAD_REQUEST,
        RolloutError::Disabled(_) | RolloutError::ShutDown => StatusCode::SERVICE_UNAVAILABLE,
        e if e.is_precondition() => StatusCode::CONFLICT,
        e if e.is_fatal() => StatusCode::INTERNAL_SERVER_ERROR,
        _ => StatusCode::BAD_GATEWAY,
    }
}

pub(crate) fn rollout_error(op: &str, err: RolloutError) -> Response {
    let status = status_for(&err);
    if status.is_server_error() {
        warn!(%op, error = %err, "rollout operation failed");
    }
    error_response(&err.to_string(), status)
}

/// GET /healthz
pub async fn healthz() -> impl IntoResponse {
    ApiResponse::ok("ok")
}
