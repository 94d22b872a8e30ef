//! Injected capabilities the controllers drive.
//!
//! The controllers never talk to a routing layer, a deploy system or a
//! metrics backend directly. Everything goes through these traits so
//! that the daemon can plug in webhooks and tests can plug in fakes.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use rampart_probe::{HealthProbe, HealthResult};

use crate::blue_green::Slot;
use crate::canary::MetricsUpdate;
use crate::error::{RolloutError, RolloutResult};

/// Deploys an artifact version to a slot.
#[async_trait]
pub trait Deployer: Send + Sync {
    async fn deploy(&self, slot: Slot, version: &str) -> anyhow::Result<()>;
}

/// Moves live traffic between slots and versions.
#[async_trait]
pub trait TrafficRouter: Send + Sync {
    /// Atomically repoint 100% of live traffic from one slot to the other.
    async fn switch_traffic(&self, from: Slot, to: Slot) -> anyhow::Result<()>;

    /// Apply a weighted split. Percentages sum to 100.
    async fn apply_split(&self, rules: &[TrafficRule]) -> anyhow::Result<()>;
}

/// Fetches request/error counters for a version.
#[async_trait]
pub trait MetricsSource: Send + Sync {
    async fn fetch(&self, version: &str) -> anyhow::Result<MetricsUpdate>;
}

/// Probes a deployment target.
#[async_trait]
pub trait HealthCheck: Send + Sync {
    async fn check(&self, url: &str, path: &str, timeout: Duration) -> HealthResult;
}

#[async_trait]
impl HealthCheck for HealthProbe {
    async fn check(&self, url: &str, path: &str, timeout: Duration) -> HealthResult {
        HealthProbe::check(self, url, path, timeout).await
    }
}

/// One weighted routing rule.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct TrafficRule {
    pub version: String,
    pub percentage: u8,
}

impl TrafficRule {
    /// Two rules sending `pct` to `candidate` and the rest to `baseline`.
    pub fn split(candidate: &str, baseline: &str, pct: u8) -> Vec<TrafficRule> {
        let pct = pct.min(100);
        vec![
            TrafficRule {
                version: candidate.to_string(),
                percentage: pct,
            },
            TrafficRule {
                version: baseline.to_string(),
                percentage: 100 - pct,
            },
        ]
    }
}

/// Run a capability call under a deadline, mapping failures into
/// `RolloutError`.
pub(crate) async fn bounded<T, F>(op: &'static str, secs: u64, call: F) -> RolloutResult<T>
where
    F: Future<Output = anyhow::Result<T>>,
{
    match tokio::time::timeout(Duration::from_secs(secs), call).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(source)) => Err(RolloutError::Capability { op, source }),
        Err(_) => Err(RolloutError::Timeout { op, secs }),
    }
}
