//! In-memory capabilities behind the controllers used in handler tests.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use rampart_probe::HealthResult;
use rampart_rollout::{
    BlueGreenConfig, BlueGreenController, CanaryConfig, CanaryController, Deployer, HealthCheck,
    MetricsSource, MetricsUpdate, Slot, TrafficRouter, TrafficRule,
};

use crate::ApiState;

#[derive(Default)]
pub struct FakeDeployer {
    calls: Mutex<Vec<(Slot, String)>>,
}

impl FakeDeployer {
    pub fn calls(&self) -> Vec<(Slot, String)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Deployer for FakeDeployer {
    async fn deploy(&self, slot: Slot, version: &str) -> anyhow::Result<()> {
        self.calls.lock().unwrap().push((slot, version.to_string()));
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeRouter {
    switches: Mutex<Vec<(Slot, Slot)>>,
    splits: Mutex<Vec<Vec<TrafficRule>>>,
    fail: AtomicBool,
}

impl FakeRouter {
    pub fn switches(&self) -> Vec<(Slot, Slot)> {
        self.switches.lock().unwrap().clone()
    }

    pub fn splits(&self) -> Vec<Vec<TrafficRule>> {
        self.splits.lock().unwrap().clone()
    }

    pub fn fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl TrafficRouter for FakeRouter {
    async fn switch_traffic(&self, from: Slot, to: Slot) -> anyhow::Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            anyhow::bail!("router down");
        }
        self.switches.lock().unwrap().push((from, to));
        Ok(())
    }

    async fn apply_split(&self, rules: &[TrafficRule]) -> anyhow::Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            anyhow::bail!("router down");
        }
        self.splits.lock().unwrap().push(rules.to_vec());
        Ok(())
    }
}

/// Healthy everywhere except the URLs marked down.
#[derive(Default)]
pub struct FakeHealth {
    down: Mutex<Vec<String>>,
}

impl FakeHealth {
    pub fn mark_down(&self, url: &str) {
        self.down.lock().unwrap().push(url.to_string());
    }
}

#[async_trait]
impl HealthCheck for FakeHealth {
    async fn check(&self, url: &str, _path: &str, _timeout: Duration) -> HealthResult {
        if self.down.lock().unwrap().iter().any(|u| u == url) {
            HealthResult::unhealthy("status 503")
        } else {
            HealthResult::healthy()
        }
    }
}

pub struct QuietMetrics;

#[async_trait]
impl MetricsSource for QuietMetrics {
    async fn fetch(&self, _version: &str) -> anyhow::Result<MetricsUpdate> {
        Ok(MetricsUpdate::default())
    }
}

pub struct Fakes {
    pub deployer: Arc<FakeDeployer>,
    pub router: Arc<FakeRouter>,
    pub health: Arc<FakeHealth>,
}

/// Blue-green config with per-slot URLs and instant warmup.
pub fn blue_green_config() -> BlueGreenConfig {
    BlueGreenConfig {
        health_check_url: "http://{slot}.test".to_string(),
        warmup_secs: 0,
        ..Default::default()
    }
}

/// Controllers with instant warmup, wired to fresh fakes.
pub fn state() -> (ApiState, Fakes) {
    state_with(blue_green_config())
}

pub fn state_with(blue_green_config: BlueGreenConfig) -> (ApiState, Fakes) {
    let deployer = Arc::new(FakeDeployer::default());
    let router = Arc::new(FakeRouter::default());
    let health = Arc::new(FakeHealth::default());

    let blue_green = BlueGreenController::new(
        blue_green_config,
        deployer.clone(),
        router.clone(),
        health.clone(),
    );
    let canary = CanaryController::new(CanaryConfig::default(), router.clone(), Arc::new(QuietMetrics));

    (
        ApiState {
            blue_green: Arc::new(blue_green),
            canary: Arc::new(canary),
        },
        Fakes {
            deployer,
            router,
            health,
        },
    )
}
