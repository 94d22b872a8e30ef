//! Health check probe.
//!
//! Issues a single GET against `target + path` with a hard deadline and
//! folds every outcome into a `HealthResult`.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::http::{self, ProbeError};

/// Result of a single health probe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResult {
    pub healthy: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_time_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// The `checks` object from the health body, passed through verbatim.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checks: Option<serde_json::Value>,
}

impl HealthResult {
    /// A passing result.
    pub fn healthy() -> Self {
        Self {
            healthy: true,
            status_code: None,
            response_time_ms: None,
            error: None,
            checks: None,
        }
    }

    /// A failing result with the given reason.
    pub fn unhealthy(error: impl Into<String>) -> Self {
        Self {
            healthy: false,
            status_code: None,
            response_time_ms: None,
            error: Some(error.into()),
            checks: None,
        }
    }

    /// Human-readable failure reason.
    pub fn reason(&self) -> String {
        match (&self.error, self.status_code) {
            (Some(e), _) => e.clone(),
            (None, Some(code)) => format!("status {code}"),
            (None, None) => "unhealthy".to_string(),
        }
    }
}

/// Performs HTTP health probes against deployment targets.
#[derive(Debug, Clone, Default)]
pub struct HealthProbe;

impl HealthProbe {
    pub fn new() -> Self {
        Self
    }

    /// Probe `target_url + path`, giving up after `timeout`.
    ///
    /// Never fails: transport errors, non-2xx statuses and deadline
    /// expiry come back as `healthy == false` with `error` set.
    pub async fn check(&self, target_url: &str, path: &str, timeout: Duration) -> HealthResult {
        let url = http::join_url(target_url, path);
        let started = Instant::now();

        let resp = match http::get(&url, timeout).await {
            Ok(resp) => resp,
            Err(e) => {
                debug!(error = %e, %url, "health probe failed");
                return HealthResult::unhealthy(e.to_string());
            }
        };

        let elapsed = started.elapsed().as_millis() as u64;
        let status_code = resp.status.as_u16();

        if !resp.status.is_success() {
            debug!(status = status_code, %url, "health probe non-2xx");
            return HealthResult {
                status_code: Some(status_code),
                response_time_ms: Some(elapsed),
                ..HealthResult::unhealthy(ProbeError::Status(resp.status).to_string())
            };
        }

        // Non-JSON bodies still count as healthy; only `checks` is optional.
        let checks = resp
            .json::<serde_json::Value>()
            .ok()
            .and_then(|body| body.get("checks").cloned())
            .filter(serde_json::Value::is_object);

        HealthResult {
            status_code: Some(status_code),
            response_time_ms: Some(elapsed),
            checks,
            ..HealthResult::healthy()
        }
    }
}
