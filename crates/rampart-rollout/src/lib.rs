//! Rampart progressive delivery: blue-green switching and canary ramps.
//!
//! This crate provides the two cooperating deployment state machines:
//! blue-green slot switching with health-gated promotion and automatic
//! rollback, and canary rollout with metrics-driven traffic ramping and
//! automatic rollback.
//!
//! # Components
//!
//! - **`blue_green`**: two-slot controller (deploy, switch, rollback, monitor)
//! - **`canary`**: ramp controller (start, pause/resume, adjust, complete, rollback)
//! - **`capability`**: injected deploy, traffic, metrics and health traits
//! - **`webhook`**: HTTP implementations of those capabilities
//! - **`ticker`**: owned, cancellable periodic tasks
//! - **`config`**: controller configuration
//!
//! # Concurrency
//!
//! Each controller serializes its mutating operations behind one async
//! lock. Background tickers only observe (probe, fetch metrics) and post
//! events to a per-controller queue; a single event-loop task applies
//! them behind the same lock, so automatic rollbacks never interleave
//! with a manual operation.

pub mod blue_green;
pub mod canary;
pub mod capability;
pub mod config;
pub mod error;
pub mod ticker;
pub mod webhook;

#[cfg(test)]
mod testing;

pub use blue_green::{BlueGreenController, BlueGreenState, Slot, SlotStatus};
pub use canary::{
    rollback_reason, should_rollback, BreachReason, CanaryController, CanaryMetrics, CanaryState,
    CanaryStatus, MetricsUpdate,
};
pub use capability::{Deployer, HealthCheck, MetricsSource, TrafficRouter, TrafficRule};
pub use config::{BlueGreenConfig, CanaryConfig, ConfigError};
pub use error::{RolloutError, RolloutResult};
pub use ticker::Ticker;
pub use webhook::{HttpMetricsSource, WebhookDeployer, WebhookRouter};

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Lock a std mutex, recovering from poisoning. State behind these
/// locks is always replaced whole, never left half-written.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn epoch_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
