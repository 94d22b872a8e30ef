//! REST API handlers for blue-green deployments.
//!
//! Every mutating handler answers with the controller state after the
//! operation, including after failures that changed slot statuses.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use tracing::{error, info};

use crate::handlers::{error_response, rollout_error, ApiResponse};
use crate::ApiState;

/// Request body to deploy a version.
#[derive(Debug, serde::Deserialize)]
pub struct DeployRequest {
    pub version: String,
}

/// GET /api/v1/blue-green
pub async fn get_state(State(state): State<ApiState>) -> impl IntoResponse {
    ApiResponse::ok(state.blue_green.state())
}

/// POST /api/v1/blue-green/deploy
///
/// With auto-switch on, the deploy and the delayed switch run in the
/// background and the handler answers 202 at once. Otherwise it waits for
/// the deploy and answers 200.
pub async fn deploy(
    State(state): State<ApiState>,
    Json(req): Json<DeployRequest>,
) -> impl IntoResponse {
    if req.version.trim().is_empty() {
        return error_response("version must not be empty", StatusCode::BAD_REQUEST);
    }

    if state.blue_green.config().auto_switch {
        let controller = state.blue_green.clone();
        let version = req.version.clone();
        tokio::spawn(async move {
            match controller.deploy_to_standby(&version).await {
                Ok(()) => info!(%version, "background deploy and switch finished"),
                Err(e) => error!(%version, error = %e, "background deploy failed"),
            }
        });
        return (StatusCode::ACCEPTED, ApiResponse::ok(state.blue_green.state())).into_response();
    }

    match state.blue_green.deploy_to_standby(&req.version).await {
        Ok(()) => ApiResponse::ok(state.blue_green.state()).into_response(),
        Err(e) => rollout_error("deploy", e),
    }
}

/// POST /api/v1/blue-green/switch
pub async fn switch(State(state): State<ApiState>) -> impl IntoResponse {
    match state.blue_green.switch_environments().await {
        Ok(()) => ApiResponse::ok(state.blue_green.state()).into_response(),
        Err(e) => rollout_error("switch", e),
    }
}

/// POST /api/v1/blue-green/rollback
pub async fn rollback(State(state): State<ApiState>) -> impl IntoResponse {
    match state.blue_green.rollback().await {
        Ok(()) => ApiResponse::ok(state.blue_green.state()).into_response(),
        Err(e) => rollout_error("rollback", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing;
    use rampart_rollout::{BlueGreenConfig, Slot, SlotStatus};
    use std::time::Duration;

    #[tokio::test]
    async fn state_reports_blue_active() {
        let (state, _) = testing::state();
        let resp = get_state(State(state)).await.into_response();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn deploy_then_switch() {
        let (state, fakes) = testing::state();

        let resp = deploy(
            State(state.clone()),
            Json(DeployRequest {
                version: "v2".to_string(),
            }),
        )
        .await
        .into_response();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(state.blue_green.state().green_version, "v2");

        let resp = switch(State(state.clone())).await.into_response();
        assert_eq!(resp.status(), StatusCode::OK);

        let bg = state.blue_green.state();
        assert_eq!(bg.active_environment, Slot::Green);
        assert_eq!(bg.status(Slot::Blue), SlotStatus::Standby);
        assert_eq!(fakes.router.switches(), vec![(Slot::Blue, Slot::Green)]);
    }

    #[tokio::test]
    async fn auto_switch_deploy_answers_before_switching() {
        let (state, fakes) = testing::state_with(BlueGreenConfig {
            auto_switch: true,
            switch_delay_secs: 0,
            ..testing::blue_green_config()
        });

        let resp = deploy(
            State(state.clone()),
            Json(DeployRequest {
                version: "v2".to_string(),
            }),
        )
        .await
        .into_response();
        assert_eq!(resp.status(), StatusCode::ACCEPTED);

        for _ in 0..200 {
            if state.blue_green.state().active_environment == Slot::Green {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let bg = state.blue_green.state();
        assert_eq!(bg.active_environment, Slot::Green);
        assert_eq!(bg.green_version, "v2");
        assert_eq!(fakes.deployer.calls(), vec![(Slot::Green, "v2".to_string())]);
        assert_eq!(fakes.router.switches(), vec![(Slot::Blue, Slot::Green)]);
    }

    #[tokio::test]
    async fn shut_down_controller_is_unavailable() {
        let (state, fakes) = testing::state();
        state.blue_green.shutdown();

        let resp = switch(State(state)).await.into_response();

        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert!(fakes.router.switches().is_empty());
    }

    #[tokio::test]
    async fn empty_version_rejected() {
        let (state, fakes) = testing::state();
        let resp = deploy(
            State(state),
            Json(DeployRequest {
                version: "  ".to_string(),
            }),
        )
        .await
        .into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert!(fakes.deployer.calls().is_empty());
    }

    #[tokio::test]
    async fn unhealthy_standby_is_bad_gateway() {
        let (state, fakes) = testing::state();
        fakes.health.mark_down("http://green.test");

        let resp = switch(State(state.clone())).await.into_response();

        assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);
        assert_eq!(state.blue_green.state().active_environment, Slot::Blue);
        assert!(fakes.router.switches().is_empty());
    }

    #[tokio::test]
    async fn rollback_after_switch() {
        let (state, fakes) = testing::state();
        switch(State(state.clone())).await.into_response();

        let resp = rollback(State(state.clone())).await.into_response();

        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(state.blue_green.state().active_environment, Slot::Blue);
        assert_eq!(
            fakes.router.switches(),
            vec![(Slot::Blue, Slot::Green), (Slot::Green, Slot::Blue)]
        );
    }
}
