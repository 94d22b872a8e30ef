//! Controller configuration: blue-green switching and canary ramps.

use std::time::Duration;

use thiserror::Error;

use crate::blue_green::Slot;

/// Invalid configuration values.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("{field} must be between 0 and 100, got {value}")]
    OutOfRange { field: &'static str, value: f64 },

    #[error("{0} must be greater than zero")]
    Zero(&'static str),
}

/// Configuration for blue-green deployments.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct BlueGreenConfig {
    pub enabled: bool,
    /// Switch automatically after a successful standby deploy.
    pub auto_switch: bool,
    /// Seconds to wait between deploy and automatic switch.
    pub switch_delay_secs: u64,
    /// Base URL of a slot. `{slot}` is replaced by `blue` or `green`.
    pub health_check_url: String,
    pub health_check_path: String,
    /// Seconds between probes of the active slot.
    pub health_check_interval_secs: u64,
    pub health_check_timeout_secs: u64,
    pub rollback_on_failure: bool,
    /// Seconds to wait after deploy before the first health check.
    pub warmup_secs: u64,
    pub deploy_timeout_secs: u64,
    /// Deadline for traffic switch calls.
    pub capability_timeout_secs: u64,
}

impl Default for BlueGreenConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            auto_switch: false,
            switch_delay_secs: 10,
            health_check_url: "http://{slot}.internal:3000".to_string(),
            health_check_path: "/health".to_string(),
            health_check_interval_secs: 30,
            health_check_timeout_secs: 10,
            rollback_on_failure: true,
            warmup_secs: 30,
            deploy_timeout_secs: 900,
            capability_timeout_secs: 30,
        }
    }
}

impl BlueGreenConfig {
    /// Base URL for a slot's health endpoint.
    pub fn slot_url(&self, slot: Slot) -> String {
        self.health_check_url.replace("{slot}", slot.as_str())
    }

    pub fn health_check_timeout(&self) -> Duration {
        Duration::from_secs(self.health_check_timeout_secs)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.health_check_interval_secs == 0 {
            return Err(ConfigError::Zero("health_check_interval_secs"));
        }
        if self.health_check_timeout_secs == 0 {
            return Err(ConfigError::Zero("health_check_timeout_secs"));
        }
        if self.capability_timeout_secs == 0 {
            return Err(ConfigError::Zero("capability_timeout_secs"));
        }
        if self.deploy_timeout_secs == 0 {
            return Err(ConfigError::Zero("deploy_timeout_secs"));
        }
        Ok(())
    }
}

/// Configuration for canary ramps.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct CanaryConfig {
    pub enabled: bool,
    /// Traffic share (0-100) the canary starts with.
    pub initial_traffic_percentage: u8,
    /// Traffic share added on every ramp step.
    pub increment_percentage: u8,
    /// Minutes between ramp steps.
    pub increment_interval_mins: u64,
    /// Error rate (percentage) above which the canary is rolled back.
    pub max_error_rate: f64,
    pub auto_rollback: bool,
    /// Base URL of the metrics backend.
    pub metrics_endpoint: String,
    pub metrics_path: String,
    /// Seconds between metrics polls.
    pub metrics_interval_secs: u64,
    /// Deadline for traffic split and metrics calls.
    pub capability_timeout_secs: u64,
}

impl Default for CanaryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            initial_traffic_percentage: 10,
            increment_percentage: 10,
            increment_interval_mins: 5,
            max_error_rate: 5.0,
            auto_rollback: true,
            metrics_endpoint: "http://localhost:9090".to_string(),
            metrics_path: "/metrics/canary".to_string(),
            metrics_interval_secs: 30,
            capability_timeout_secs: 30,
        }
    }
}

impl CanaryConfig {
    pub fn increment_interval(&self) -> Duration {
        Duration::from_secs(self.increment_interval_mins * 60)
    }

    pub fn metrics_interval(&self) -> Duration {
        Duration::from_secs(self.metrics_interval_secs)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.initial_traffic_percentage > 100 {
            return Err(ConfigError::OutOfRange {
                field: "initial_traffic_percentage",
                value: self.initial_traffic_percentage as f64,
            });
        }
        if self.increment_percentage == 0 {
            return Err(ConfigError::Zero("increment_percentage"));
        }
        if self.increment_percentage > 100 {
            return Err(ConfigError::OutOfRange {
                field: "increment_percentage",
                value: self.increment_percentage as f64,
            });
        }
        if !(0.0..=100.0).contains(&self.max_error_rate) {
            return Err(ConfigError::OutOfRange {
                field: "max_error_rate",
                value: self.max_error_rate,
            });
        }
        if self.increment_interval_mins == 0 {
            return Err(ConfigError::Zero("increment_interval_mins"));
        }
        if self.metrics_interval_secs == 0 {
            return Err(ConfigError::Zero("metrics_interval_secs"));
        }
        if self.capability_timeout_secs == 0 {
            return Err(ConfigError::Zero("capability_timeout_secs"));
        }
        Ok(())
    }
}
