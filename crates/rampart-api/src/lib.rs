//! rampart-api: REST API for Rampart.
//!
//! An external orchestrator drives both deployment controllers through
//! these routes. Every response uses the `{success, data?, error?}`
//! envelope.
//!
//! # API Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | GET | `/api/v1/blue-green` | Blue-green state |
//! | POST | `/api/v1/blue-green/deploy` | Deploy a version to the standby slot |
//! | POST | `/api/v1/blue-green/switch` | Promote the standby slot |
//! | POST | `/api/v1/blue-green/rollback` | Return to the previous slot |
//! | GET | `/api/v1/canary` | Canary state |
//! | POST | `/api/v1/canary` | Start a canary |
//! | POST | `/api/v1/canary/pause` | Pause ramping |
//! | POST | `/api/v1/canary/resume` | Resume ramping |
//! | POST | `/api/v1/canary/traffic` | Set the canary traffic share |
//! | POST | `/api/v1/canary/complete` | Promote the canary to 100% |
//! | POST | `/api/v1/canary/rollback` | Return all traffic to baseline |
//! | GET | `/healthz` | Liveness |

pub mod blue_green_handlers;
pub mod canary_handlers;
pub mod handlers;

#[cfg(test)]
mod testing;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use rampart_rollout::{BlueGreenController, CanaryController};

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub blue_green: Arc<BlueGreenController>,
    pub canary: Arc<CanaryController>,
}

/// Build the complete API router.
pub fn build_router(state: ApiState) -> Router {
    let api_routes = Router::new()
        .route("/blue-green", get(blue_green_handlers::get_state))
        .route("/blue-green/deploy", post(blue_green_handlers::deploy))
        .route("/blue-green/switch", post(blue_green_handlers::switch))
        .route("/blue-green/rollback", post(blue_green_handlers::rollback))
        .route(
            "/canary",
            get(canary_handlers::get_state).post(canary_handlers::start),
        )
        .route("/canary/pause", post(canary_handlers::pause))
        .route("/canary/resume", post(canary_handlers::resume))
        .route("/canary/traffic", post(canary_handlers::adjust_traffic))
        .route("/canary/complete", post(canary_handlers::complete))
        .route("/canary/rollback", post(canary_handlers::rollback))
        .with_state(state);

    Router::new()
        .nest("/api/v1", api_routes)
        .route("/healthz", get(handlers::healthz))
}
