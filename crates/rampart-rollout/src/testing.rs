//! Fake capabilities for controller tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use rampart_probe::HealthResult;
use tokio::sync::Notify;

use crate::blue_green::Slot;
use crate::canary::MetricsUpdate;
use crate::capability::{Deployer, HealthCheck, MetricsSource, TrafficRule, TrafficRouter};
use crate::lock;

/// Poll `cond` until it holds, advancing (possibly paused) time.
pub async fn eventually(mut cond: impl FnMut() -> bool) {
    for _ in 0..400 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(250)).await;
    }
    panic!("condition not met in time");
}

#[derive(Default)]
pub struct RecordingDeployer {
    calls: Mutex<Vec<(Slot, String)>>,
    failure: Mutex<Option<String>>,
    gate: Mutex<Option<Arc<Gate>>>,
}

impl RecordingDeployer {
    pub fn calls(&self) -> Vec<(Slot, String)> {
        lock(&self.calls).clone()
    }

    pub fn fail_with(&self, msg: &str) {
        *lock(&self.failure) = Some(msg.to_string());
    }

    pub fn hold_deploys(&self) -> Arc<Gate> {
        let gate = Arc::new(Gate::default());
        *lock(&self.gate) = Some(gate.clone());
        gate
    }
}

#[async_trait]
impl Deployer for RecordingDeployer {
    async fn deploy(&self, slot: Slot, version: &str) -> anyhow::Result<()> {
        lock(&self.calls).push((slot, version.to_string()));
        let gate = lock(&self.gate).take();
        if let Some(gate) = gate {
            gate.entered.notify_one();
            gate.release.notified().await;
        }
        match lock(&self.failure).clone() {
            Some(msg) => Err(anyhow::anyhow!(msg)),
            None => Ok(()),
        }
    }
}

/// Holds a capability call until released.
#[derive(Default)]
pub struct Gate {
    pub entered: Notify,
    pub release: Notify,
}

#[derive(Default)]
pub struct RecordingRouter {
    switches: Mutex<Vec<(Slot, Slot)>>,
    splits: Mutex<Vec<Vec<TrafficRule>>>,
    fail_switch_to: Mutex<Option<Slot>>,
    fail_splits: AtomicBool,
    gate: Mutex<Option<Arc<Gate>>>,
}

impl RecordingRouter {
    pub fn switches(&self) -> Vec<(Slot, Slot)> {
        lock(&self.switches).clone()
    }

    pub fn splits(&self) -> Vec<Vec<TrafficRule>> {
        lock(&self.splits).clone()
    }

    /// Canary share of the most recent split.
    pub fn last_canary_share(&self) -> Option<u8> {
        lock(&self.splits).last().map(|rules| rules[0].percentage)
    }

    pub fn fail_switches_to(&self, slot: Slot) {
        *lock(&self.fail_switch_to) = Some(slot);
    }

    pub fn fail_splits(&self, fail: bool) {
        self.fail_splits.store(fail, Ordering::SeqCst);
    }

    pub fn hold_switches(&self) -> Arc<Gate> {
        let gate = Arc::new(Gate::default());
        *lock(&self.gate) = Some(gate.clone());
        gate
    }

    pub fn release_all(&self) {
        if let Some(gate) = lock(&self.gate).take() {
            gate.release.notify_waiters();
            gate.release.notify_one();
        }
    }
}

#[async_trait]
impl TrafficRouter for RecordingRouter {
    async fn switch_traffic(&self, from: Slot, to: Slot) -> anyhow::Result<()> {
        let gate = lock(&self.gate).clone();
        if let Some(gate) = gate {
            gate.entered.notify_one();
            gate.release.notified().await;
        }
        if *lock(&self.fail_switch_to) == Some(to) {
            anyhow::bail!("router rejected switch to {to}");
        }
        lock(&self.switches).push((from, to));
        Ok(())
    }

    async fn apply_split(&self, rules: &[TrafficRule]) -> anyhow::Result<()> {
        if self.fail_splits.load(Ordering::SeqCst) {
            anyhow::bail!("router unavailable");
        }
        lock(&self.splits).push(rules.to_vec());
        Ok(())
    }
}

/// Health by base URL; unknown URLs are healthy.
#[derive(Default)]
pub struct ScriptedHealth {
    healthy: Mutex<HashMap<String, bool>>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedHealth {
    pub fn set(&self, url: &str, healthy: bool) {
        lock(&self.healthy).insert(url.to_string(), healthy);
    }

    pub fn calls_for(&self, url: &str) -> usize {
        lock(&self.calls).iter().filter(|u| *u == url).count()
    }

    pub fn total_calls(&self) -> usize {
        lock(&self.calls).len()
    }
}

#[async_trait]
impl HealthCheck for ScriptedHealth {
    async fn check(&self, url: &str, _path: &str, _timeout: Duration) -> HealthResult {
        lock(&self.calls).push(url.to_string());
        let healthy = lock(&self.healthy).get(url).copied().unwrap_or(true);
        if healthy {
            HealthResult {
                status_code: Some(200),
                ..HealthResult::healthy()
            }
        } else {
            HealthResult {
                status_code: Some(503),
                ..HealthResult::unhealthy("status 503")
            }
        }
    }
}

/// Returns whatever update is currently scripted.
#[derive(Default)]
pub struct ScriptedMetrics {
    current: Mutex<MetricsUpdate>,
    fail: AtomicBool,
    versions: Mutex<Vec<String>>,
    gate: Mutex<Option<Arc<Gate>>>,
}

impl ScriptedMetrics {
    pub fn set(&self, update: MetricsUpdate) {
        *lock(&self.current) = update;
    }

    pub fn fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn versions(&self) -> Vec<String> {
        lock(&self.versions).clone()
    }

    /// Hold the next fetch until released.
    pub fn hold_fetches(&self) -> Arc<Gate> {
        let gate = Arc::new(Gate::default());
        *lock(&self.gate) = Some(gate.clone());
        gate
    }
}

#[async_trait]
impl MetricsSource for ScriptedMetrics {
    async fn fetch(&self, version: &str) -> anyhow::Result<MetricsUpdate> {
        lock(&self.versions).push(version.to_string());
        let gate = lock(&self.gate).take();
        if let Some(gate) = gate {
            gate.entered.notify_one();
            gate.release.notified().await;
        }
        if self.fail.load(Ordering::SeqCst) {
            anyhow::bail!("metrics backend unreachable");
        }
        Ok(lock(&self.current).clone())
    }
}
