//! Rollout controller error types.

use thiserror::Error;

use crate::blue_green::Slot;
use crate::canary::CanaryStatus;

/// Errors returned by the blue-green and canary controllers.
#[derive(Debug, Error)]
pub enum RolloutError {
    #[error("{0} deployments are disabled")]
    Disabled(&'static str),

    #[error("controller is shut down")]
    ShutDown,

    #[error("switch already in progress")]
    SwitchInProgress,

    #[error("canary already running")]
    CanaryAlreadyRunning,

    #[error("no active canary")]
    NoActiveCanary,

    #[error("cannot {op} canary while {status}")]
    InvalidTransition {
        op: &'static str,
        status: CanaryStatus,
    },

    #[error("traffic percentage {0} out of range 0-100")]
    InvalidTrafficPercentage(i64),

    #[error("{slot} environment unhealthy: {reason}")]
    Unhealthy { slot: Slot, reason: String },

    #[error("{op} failed: {source}")]
    Capability {
        op: &'static str,
        #[source]
        source: anyhow::Error,
    },

    #[error("{op} timed out after {secs}s")]
    Timeout { op: &'static str, secs: u64 },

    #[error("rollback to {slot} failed: {reason}; operator intervention required")]
    RollbackFailed { slot: Slot, reason: String },
}

impl RolloutError {
    /// Whether the operation was rejected before touching any state.
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            Self::Disabled(_)
                | Self::ShutDown
                | Self::SwitchInProgress
                | Self::CanaryAlreadyRunning
                | Self::NoActiveCanary
                | Self::InvalidTransition { .. }
                | Self::InvalidTrafficPercentage(_)
        )
    }

    /// Whether the error needs an operator (no automatic fallback remains).
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::RollbackFailed { .. })
    }
}

pub type RolloutResult<T> = Result<T, RolloutError>;
