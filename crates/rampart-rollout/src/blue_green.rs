//! Blue-green controller: two slots, health-gated promotion, rollback.
//!
//! The controller owns a `BlueGreenState` and drives
//! deploy → warmup → health check → promote → monitor → (rollback).
//!
//! Mutating operations are serialized behind an operation lock. The
//! continuous health monitor never touches state itself: a failed probe
//! is posted to the controller's event queue, and the event loop runs
//! the rollback behind the same lock, so an automatic rollback queues
//! behind any in-flight deploy or switch instead of interleaving.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::capability::{bounded, Deployer, HealthCheck, TrafficRouter};
use crate::config::BlueGreenConfig;
use crate::error::{RolloutError, RolloutResult};
use crate::ticker::Ticker;
use crate::{epoch_secs, lock};

/// One of the two interchangeable deployment targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Slot {
    Blue,
    Green,
}

impl Slot {
    pub fn other(self) -> Slot {
        match self {
            Slot::Blue => Slot::Green,
            Slot::Green => Slot::Blue,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Slot::Blue => "blue",
            Slot::Green => "green",
        }
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Deployment status of a single slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SlotStatus {
    Active,
    Standby,
    Deploying,
    Failed,
}

/// Snapshot of the blue-green pair.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct BlueGreenState {
    pub active_environment: Slot,
    pub blue_version: String,
    pub green_version: String,
    pub blue_status: SlotStatus,
    pub green_status: SlotStatus,
    /// Epoch seconds of the last traffic switch.
    pub last_switch: Option<u64>,
    /// Mutual-exclusion flag for `switch_environments`.
    pub switch_in_progress: bool,
}

impl Default for BlueGreenState {
    fn default() -> Self {
        Self::new(Slot::Blue, "", "")
    }
}

impl BlueGreenState {
    /// `active` serves traffic, the other slot is on standby.
    pub fn new(active: Slot, blue_version: &str, green_version: &str) -> Self {
        let mut state = Self {
            active_environment: active,
            blue_version: blue_version.to_string(),
            green_version: green_version.to_string(),
            blue_status: SlotStatus::Standby,
            green_status: SlotStatus::Standby,
            last_switch: None,
            switch_in_progress: false,
        };
        state.set_status(active, SlotStatus::Active);
        state
    }

    pub fn standby(&self) -> Slot {
        self.active_environment.other()
    }

    pub fn status(&self, slot: Slot) -> SlotStatus {
        match slot {
            Slot::Blue => self.blue_status,
            Slot::Green => self.green_status,
        }
    }

    pub fn version(&self, slot: Slot) -> &str {
        match slot {
            Slot::Blue => &self.blue_version,
            Slot::Green => &self.green_version,
        }
    }

    fn set_status(&mut self, slot: Slot, status: SlotStatus) {
        match slot {
            Slot::Blue => self.blue_status = status,
            Slot::Green => self.green_status = status,
        }
    }

    fn set_version(&mut self, slot: Slot, version: &str) {
        match slot {
            Slot::Blue => self.blue_version = version.to_string(),
            Slot::Green => self.green_version = version.to_string(),
        }
    }

    /// Make `slot` active, leaving the other slot in `demoted`.
    fn promote(&mut self, slot: Slot, demoted: SlotStatus) {
        self.active_environment = slot;
        self.set_status(slot, SlotStatus::Active);
        self.set_status(slot.other(), demoted);
    }
}

/// Messages handled by the controller's event loop.
#[derive(Debug)]
enum BlueGreenEvent {
    HealthCheckFailed {
        slot: Slot,
        generation: u64,
        reason: String,
    },
}

/// The health monitor currently running, if any.
struct Monitor {
    slot: Slot,
    generation: u64,
    _ticker: Ticker,
}

struct Shared {
    config: BlueGreenConfig,
    deployer: Arc<dyn Deployer>,
    router: Arc<dyn TrafficRouter>,
    health: Arc<dyn HealthCheck>,
    state: Mutex<BlueGreenState>,
    /// Serializes deploy, switch and rollback.
    ops: tokio::sync::Mutex<()>,
    monitor: Mutex<Option<Monitor>>,
    monitor_generation: AtomicU64,
    /// Set once by `shutdown`; no monitor starts afterwards.
    shut_down: AtomicBool,
    events: mpsc::UnboundedSender<BlueGreenEvent>,
}

/// Drives blue-green deployments for one environment.
///
/// Must be created inside a tokio runtime. Dropping the controller
/// stops the health monitor and the event loop.
pub struct BlueGreenController {
    shared: Arc<Shared>,
    event_loop: JoinHandle<()>,
}

impl BlueGreenController {
    /// Create a controller with blue active and no versions recorded.
    pub fn new(
        config: BlueGreenConfig,
        deployer: Arc<dyn Deployer>,
        router: Arc<dyn TrafficRouter>,
        health: Arc<dyn HealthCheck>,
    ) -> Self {
        let (events, rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            config,
            deployer,
            router,
            health,
            state: Mutex::new(BlueGreenState::default()),
            ops: tokio::sync::Mutex::new(()),
            monitor: Mutex::new(None),
            monitor_generation: AtomicU64::new(0),
            shut_down: AtomicBool::new(false),
            events,
        });
        let event_loop = spawn_event_loop(shared.clone(), rx);
        Self { shared, event_loop }
    }

    /// Seed the initial state (e.g. versions already running).
    pub fn with_state(self, state: BlueGreenState) -> Self {
        *lock(&self.shared.state) = BlueGreenState {
            switch_in_progress: false,
            ..state
        };
        self
    }

    pub fn config(&self) -> &BlueGreenConfig {
        &self.shared.config
    }

    /// Deploy `version` to the slot that is not serving traffic.
    pub async fn deploy_to_standby(&self, version: &str) -> RolloutResult<()> {
        self.shared.ensure_running()?;
        self.shared.deploy_to_standby(version).await?;

        if self.shared.config.auto_switch {
            info!(
                delay_secs = self.shared.config.switch_delay_secs,
                "auto-switch scheduled after standby deploy"
            );
            tokio::time::sleep(Duration::from_secs(self.shared.config.switch_delay_secs)).await;
            self.shared.ensure_running()?;
            self.shared.switch_environments().await?;
        }
        Ok(())
    }

    /// Promote the standby slot to active.
    pub async fn switch_environments(&self) -> RolloutResult<()> {
        self.shared.ensure_running()?;
        self.shared.switch_environments().await
    }

    /// Move traffic back to the other slot and mark the current one failed.
    pub async fn rollback(&self) -> RolloutResult<()> {
        self.shared.ensure_running()?;
        let _op = self.shared.ops.lock().await;
        self.shared.rollback_locked().await
    }

    /// A copy of the current state.
    pub fn state(&self) -> BlueGreenState {
        lock(&self.shared.state).clone()
    }

    /// Start monitoring whichever slot is currently active.
    pub fn start_monitoring(&self) {
        let active = lock(&self.shared.state).active_environment;
        self.shared.start_monitor(active);
    }

    pub fn stop_monitoring(&self) {
        self.shared.stop_monitor();
    }

    pub fn is_monitoring(&self) -> bool {
        lock(&self.shared.monitor).is_some()
    }

    /// The slot under continuous monitoring, if any.
    pub fn monitored_slot(&self) -> Option<Slot> {
        lock(&self.shared.monitor).as_ref().map(|m| m.slot)
    }

    /// Stop the monitor and the event loop. No callback fires afterwards,
    /// and every later operation fails with `ShutDown`. An operation
    /// already in flight finishes without restarting the monitor.
    pub fn shutdown(&self) {
        self.shared.shut_down.store(true, Ordering::SeqCst);
        self.shared.stop_monitor();
        self.event_loop.abort();
        debug!("blue-green controller shut down");
    }
}

impl Drop for BlueGreenController {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn spawn_event_loop(
    shared: Arc<Shared>,
    mut rx: mpsc::UnboundedReceiver<BlueGreenEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            shared.handle_event(event).await;
        }
    })
}

/// Clears `switch_in_progress` on every exit path.
struct SwitchGuard<'a> {
    state: &'a Mutex<BlueGreenState>,
}

impl<'a> SwitchGuard<'a> {
    fn acquire(state: &'a Mutex<BlueGreenState>) -> RolloutResult<Self> {
        let mut st = lock(state);
        if st.switch_in_progress {
            return Err(RolloutError::SwitchInProgress);
        }
        st.switch_in_progress = true;
        Ok(Self { state })
    }
}

impl Drop for SwitchGuard<'_> {
    fn drop(&mut self) {
        lock(self.state).switch_in_progress = false;
    }
}

impl Shared {
    fn ensure_running(&self) -> RolloutResult<()> {
        if self.shut_down.load(Ordering::SeqCst) {
            return Err(RolloutError::ShutDown);
        }
        Ok(())
    }

    async fn probe(&self, slot: Slot) -> rampart_probe::HealthResult {
        self.health
            .check(
                &self.config.slot_url(slot),
                &self.config.health_check_path,
                self.config.health_check_timeout(),
            )
            .await
    }

    async fn deploy_to_standby(&self, version: &str) -> RolloutResult<()> {
        if !self.config.enabled {
            return Err(RolloutError::Disabled("blue-green"));
        }

        let _op = self.ops.lock().await;

        let target = {
            let mut st = lock(&self.state);
            let target = st.standby();
            st.set_status(target, SlotStatus::Deploying);
            target
        };
        info!(slot = %target, %version, "deploying to standby");

        let deployed = bounded(
            "deploy",
            self.config.deploy_timeout_secs,
            self.deployer.deploy(target, version),
        )
        .await;
        if let Err(e) = deployed {
            lock(&self.state).set_status(target, SlotStatus::Failed);
            error!(slot = %target, %version, error = %e, "standby deploy failed");
            return Err(e);
        }

        debug!(slot = %target, warmup_secs = self.config.warmup_secs, "warming up");
        tokio::time::sleep(Duration::from_secs(self.config.warmup_secs)).await;

        let result = self.probe(target).await;
        if !result.healthy {
            lock(&self.state).set_status(target, SlotStatus::Failed);
            let reason = result.reason();
            warn!(slot = %target, %version, %reason, "standby failed health check after deploy");
            return Err(RolloutError::Unhealthy {
                slot: target,
                reason,
            });
        }

        {
            let mut st = lock(&self.state);
            st.set_status(target, SlotStatus::Standby);
            st.set_version(target, version);
        }
        info!(slot = %target, %version, "standby deployed and healthy");
        Ok(())
    }

    async fn switch_environments(&self) -> RolloutResult<()> {
        if !self.config.enabled {
            return Err(RolloutError::Disabled("blue-green"));
        }

        let guard = SwitchGuard::acquire(&self.state)?;
        let op = self.ops.lock().await;

        let (from, to) = {
            let st = lock(&self.state);
            (st.active_environment, st.standby())
        };
        info!(%from, %to, "switching environments");

        let result = self.probe(to).await;
        if !result.healthy {
            let reason = result.reason();
            warn!(slot = %to, %reason, "standby failed final health check, aborting switch");
            return Err(self
                .abort_switch(from, to, false, RolloutError::Unhealthy { slot: to, reason })
                .await);
        }

        let switched = bounded(
            "switch traffic",
            self.config.capability_timeout_secs,
            self.router.switch_traffic(from, to),
        )
        .await;
        if let Err(e) = switched {
            warn!(%from, %to, error = %e, "traffic switch failed, aborting switch");
            return Err(self.abort_switch(from, to, true, e).await);
        }

        {
            let mut st = lock(&self.state);
            st.promote(to, SlotStatus::Standby);
            st.last_switch = Some(epoch_secs());
        }
        drop(guard);
        drop(op);

        info!(active = %to, standby = %from, "environment switch completed");
        self.start_monitor(to);
        Ok(())
    }

    /// Mark `target` failed and, if configured, restore `original`.
    ///
    /// Returns the error to surface: the original cause, or the fatal
    /// rollback failure if restoring `original` was impossible.
    async fn abort_switch(
        &self,
        original: Slot,
        target: Slot,
        reroute: bool,
        cause: RolloutError,
    ) -> RolloutError {
        lock(&self.state).set_status(target, SlotStatus::Failed);

        if !self.config.rollback_on_failure {
            return cause;
        }

        match self.restore(original, target, reroute).await {
            Ok(()) => cause,
            Err(fatal) => fatal,
        }
    }

    /// Put `original` back in front of traffic after a failed switch.
    async fn restore(&self, original: Slot, failed: Slot, reroute: bool) -> RolloutResult<()> {
        warn!(restore = %original, failed = %failed, "rolling back failed switch");

        let result = self.probe(original).await;
        if !result.healthy {
            let reason = result.reason();
            error!(
                slot = %original,
                %reason,
                "rollback target unhealthy; operator intervention required"
            );
            return Err(RolloutError::RollbackFailed {
                slot: original,
                reason,
            });
        }

        if reroute {
            bounded(
                "switch traffic",
                self.config.capability_timeout_secs,
                self.router.switch_traffic(failed, original),
            )
            .await
            .map_err(|e| {
                error!(
                    slot = %original,
                    error = %e,
                    "could not route traffic back; operator intervention required"
                );
                RolloutError::RollbackFailed {
                    slot: original,
                    reason: e.to_string(),
                }
            })?;
        }

        {
            let mut st = lock(&self.state);
            st.promote(original, SlotStatus::Failed);
            if reroute {
                st.last_switch = Some(epoch_secs());
            }
        }
        info!(active = %original, failed = %failed, "switch rolled back");
        Ok(())
    }

    /// Roll back from the active slot to the other one. Caller holds `ops`.
    async fn rollback_locked(&self) -> RolloutResult<()> {
        let (from, to) = {
            let st = lock(&self.state);
            (st.active_environment, st.standby())
        };
        warn!(%from, %to, "rolling back");

        let result = self.probe(to).await;
        if !result.healthy {
            let reason = result.reason();
            self.stop_monitor();
            error!(
                slot = %to,
                %reason,
                "rollback target unhealthy; operator intervention required"
            );
            return Err(RolloutError::RollbackFailed { slot: to, reason });
        }

        let switched = bounded(
            "switch traffic",
            self.config.capability_timeout_secs,
            self.router.switch_traffic(from, to),
        )
        .await;
        if let Err(e) = switched {
            self.stop_monitor();
            error!(
                slot = %to,
                error = %e,
                "rollback traffic switch failed; operator intervention required"
            );
            return Err(RolloutError::RollbackFailed {
                slot: to,
                reason: e.to_string(),
            });
        }

        {
            let mut st = lock(&self.state);
            st.promote(to, SlotStatus::Failed);
            st.last_switch = Some(epoch_secs());
        }
        info!(active = %to, failed = %from, "rollback completed");
        self.start_monitor(to);
        Ok(())
    }

    async fn handle_event(&self, event: BlueGreenEvent) {
        match event {
            BlueGreenEvent::HealthCheckFailed {
                slot,
                generation,
                reason,
            } => {
                let _op = self.ops.lock().await;

                let current = lock(&self.monitor).as_ref().map(|m| m.generation);
                let active = lock(&self.state).active_environment;
                if current != Some(generation) || active != slot {
                    debug!(%slot, generation, "ignoring stale health failure");
                    return;
                }

                if !self.config.rollback_on_failure {
                    warn!(%slot, %reason, "active environment unhealthy; automatic rollback disabled");
                    return;
                }

                warn!(%slot, %reason, "active environment unhealthy, rolling back automatically");
                if let Err(e) = self.rollback_locked().await {
                    error!(%slot, error = %e, "automatic rollback failed");
                }
            }
        }
    }

    fn start_monitor(&self, slot: Slot) {
        // Checked under the monitor lock so a concurrent `shutdown` either
        // sees the new monitor and stops it, or this sees the flag.
        let mut monitor = lock(&self.monitor);
        if self.shut_down.load(Ordering::SeqCst) {
            warn!(%slot, "controller shut down; not monitoring");
            return;
        }

        let generation = self.monitor_generation.fetch_add(1, Ordering::SeqCst) + 1;
        let interval = Duration::from_secs(self.config.health_check_interval_secs);

        let health = self.health.clone();
        let events = self.events.clone();
        let url = self.config.slot_url(slot);
        let path = self.config.health_check_path.clone();
        let timeout = self.config.health_check_timeout();

        let ticker = Ticker::start("blue-green-health", interval, move || {
            let health = health.clone();
            let events = events.clone();
            let url = url.clone();
            let path = path.clone();
            async move {
                let result = health.check(&url, &path, timeout).await;
                if result.healthy {
                    debug!(%slot, "active environment healthy");
                    return;
                }
                let reason = result.reason();
                warn!(%slot, %reason, "active environment failed health check");
                let event = BlueGreenEvent::HealthCheckFailed {
                    slot,
                    generation,
                    reason,
                };
                if events.send(event).is_err() {
                    warn!(%slot, "event loop gone; health failure not handled");
                }
            }
        });

        let previous = monitor.replace(Monitor {
            slot,
            generation,
            _ticker: ticker,
        });
        drop(monitor);
        drop(previous);

        info!(%slot, interval_secs = interval.as_secs(), "health monitoring started");
    }

    fn stop_monitor(&self) {
        if let Some(monitor) = lock(&self.monitor).take() {
            info!(slot = %monitor.slot, "health monitoring stopped");
        }
    }
}
