//! Canary controller: metrics-driven traffic ramp with auto-rollback.
//!
//! Transitions:
//!
//! ```text
//! idle ──start──▶ running ◀──resume── paused
//!                   │  └────pause────▶  │
//!                   ├─complete/ramp 100─┼──▶ completed
//!                   └────rollback───────┴──▶ rolled_back
//! ```
//!
//! Two tickers run per canary: a metrics poll and a ramp step. Pausing
//! stops only the ramp; metrics polling, and therefore metric-triggered
//! rollback, keeps running while paused. Tickers post events tagged
//! with the canary run id; events from an earlier run are dropped.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::capability::{bounded, MetricsSource, TrafficRouter, TrafficRule};
use crate::config::CanaryConfig;
use crate::error::{RolloutError, RolloutResult};
use crate::ticker::Ticker;
use crate::{epoch_secs, lock};

/// Latency ratio (canary / baseline) above which a canary is rolled back.
const MAX_LATENCY_RATIO: f64 = 1.5;

/// Lifecycle of a canary run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CanaryStatus {
    Idle,
    Running,
    Paused,
    Completed,
    RolledBack,
}

impl CanaryStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            CanaryStatus::Idle => "idle",
            CanaryStatus::Running => "running",
            CanaryStatus::Paused => "paused",
            CanaryStatus::Completed => "completed",
            CanaryStatus::RolledBack => "rolled_back",
        }
    }
}

impl fmt::Display for CanaryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Request/error counters for a canary and its baseline.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct CanaryMetrics {
    pub total_requests: u64,
    pub canary_requests: u64,
    pub baseline_requests: u64,
    /// Percentages, 0-100.
    pub error_rate: f64,
    pub canary_error_rate: f64,
    pub baseline_error_rate: f64,
    /// Milliseconds.
    pub average_response_time: f64,
    pub canary_response_time: f64,
    pub baseline_response_time: f64,
}

/// Any subset of `CanaryMetrics`, as returned by a metrics backend.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MetricsUpdate {
    pub total_requests: Option<u64>,
    pub canary_requests: Option<u64>,
    pub baseline_requests: Option<u64>,
    pub error_rate: Option<f64>,
    pub canary_error_rate: Option<f64>,
    pub baseline_error_rate: Option<f64>,
    pub average_response_time: Option<f64>,
    pub canary_response_time: Option<f64>,
    pub baseline_response_time: Option<f64>,
}

impl CanaryMetrics {
    /// Overwrite fields present in `update`; absent fields keep their value.
    pub fn merge(&mut self, update: &MetricsUpdate) {
        fn take<T: Copy>(dst: &mut T, src: Option<T>) {
            if let Some(v) = src {
                *dst = v;
            }
        }
        take(&mut self.total_requests, update.total_requests);
        take(&mut self.canary_requests, update.canary_requests);
        take(&mut self.baseline_requests, update.baseline_requests);
        take(&mut self.error_rate, update.error_rate);
        take(&mut self.canary_error_rate, update.canary_error_rate);
        take(&mut self.baseline_error_rate, update.baseline_error_rate);
        take(&mut self.average_response_time, update.average_response_time);
        take(&mut self.canary_response_time, update.canary_response_time);
        take(&mut self.baseline_response_time, update.baseline_response_time);
    }
}

/// Snapshot of the current canary.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct CanaryState {
    pub enabled: bool,
    pub version: String,
    pub baseline_version: String,
    pub traffic_percentage: u8,
    /// Epoch seconds.
    pub start_time: Option<u64>,
    pub last_increment_time: Option<u64>,
    pub status: CanaryStatus,
    pub metrics: CanaryMetrics,
}

impl Default for CanaryState {
    fn default() -> Self {
        Self {
            enabled: false,
            version: String::new(),
            baseline_version: String::new(),
            traffic_percentage: 0,
            start_time: None,
            last_increment_time: None,
            status: CanaryStatus::Idle,
            metrics: CanaryMetrics::default(),
        }
    }
}

impl CanaryState {
    fn started(version: &str, baseline: &str, pct: u8) -> Self {
        let now = epoch_secs();
        Self {
            enabled: true,
            version: version.to_string(),
            baseline_version: baseline.to_string(),
            traffic_percentage: pct,
            start_time: Some(now),
            last_increment_time: Some(now),
            status: CanaryStatus::Running,
            metrics: CanaryMetrics::default(),
        }
    }

    /// Running or paused.
    pub fn is_active(&self) -> bool {
        matches!(self.status, CanaryStatus::Running | CanaryStatus::Paused)
    }
}

/// Why a canary should be rolled back.
#[derive(Debug, Clone, PartialEq)]
pub enum BreachReason {
    ErrorRate { canary: f64, max: f64 },
    ErrorRateDelta { delta: f64, limit: f64 },
    Latency { ratio: f64 },
}

impl fmt::Display for BreachReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BreachReason::ErrorRate { canary, max } => {
                write!(f, "canary error rate {canary:.2}% exceeds {max:.2}%")
            }
            BreachReason::ErrorRateDelta { delta, limit } => {
                write!(f, "canary error rate {delta:.2} points above baseline (limit {limit:.2})")
            }
            BreachReason::Latency { ratio } => {
                write!(f, "canary response time {ratio:.2}x baseline (limit {MAX_LATENCY_RATIO}x)")
            }
        }
    }
}

/// The first threshold `metrics` breaches, if any.
///
/// The latency ratio is only evaluated once a baseline response time
/// has been observed.
pub fn rollback_reason(metrics: &CanaryMetrics, max_error_rate: f64) -> Option<BreachReason> {
    if metrics.canary_error_rate > max_error_rate {
        return Some(BreachReason::ErrorRate {
            canary: metrics.canary_error_rate,
            max: max_error_rate,
        });
    }

    let delta = metrics.canary_error_rate - metrics.baseline_error_rate;
    let limit = max_error_rate / 2.0;
    if delta > limit {
        return Some(BreachReason::ErrorRateDelta { delta, limit });
    }

    if metrics.baseline_response_time > 0.0 {
        let ratio = metrics.canary_response_time / metrics.baseline_response_time;
        if ratio > MAX_LATENCY_RATIO {
            return Some(BreachReason::Latency { ratio });
        }
    }

    None
}

pub fn should_rollback(metrics: &CanaryMetrics, max_error_rate: f64) -> bool {
    rollback_reason(metrics, max_error_rate).is_some()
}

fn validate_percentage(pct: i64) -> RolloutResult<u8> {
    if (0..=100).contains(&pct) {
        Ok(pct as u8)
    } else {
        Err(RolloutError::InvalidTrafficPercentage(pct))
    }
}

/// Messages handled by the controller's event loop.
#[derive(Debug)]
enum CanaryEvent {
    MetricsCollected { run: u64, update: MetricsUpdate },
    IncrementDue { run: u64 },
}

#[derive(Default)]
struct Tickers {
    metrics: Option<Ticker>,
    increment: Option<Ticker>,
}

struct Shared {
    config: CanaryConfig,
    router: Arc<dyn TrafficRouter>,
    source: Arc<dyn MetricsSource>,
    state: Mutex<CanaryState>,
    /// Serializes every mutating operation, including start.
    ops: tokio::sync::Mutex<()>,
    /// Id of the current run; bumped by every start.
    run: AtomicU64,
    /// Set once by `shutdown`; no ticker starts afterwards.
    shut_down: AtomicBool,
    tickers: Mutex<Tickers>,
    events: mpsc::UnboundedSender<CanaryEvent>,
}

/// Drives canary rollouts between a baseline and a candidate version.
///
/// Must be created inside a tokio runtime. Dropping the controller
/// stops both tickers and the event loop.
pub struct CanaryController {
    shared: Arc<Shared>,
    event_loop: JoinHandle<()>,
}

impl CanaryController {
    pub fn new(
        config: CanaryConfig,
        router: Arc<dyn TrafficRouter>,
        source: Arc<dyn MetricsSource>,
    ) -> Self {
        let (events, rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            config,
            router,
            source,
            state: Mutex::new(CanaryState::default()),
            ops: tokio::sync::Mutex::new(()),
            run: AtomicU64::new(0),
            shut_down: AtomicBool::new(false),
            tickers: Mutex::new(Tickers::default()),
            events,
        });

        let event_loop = tokio::spawn({
            let shared = shared.clone();
            let mut rx = rx;
            async move {
                while let Some(event) = rx.recv().await {
                    shared.handle_event(event).await;
                }
            }
        });

        Self { shared, event_loop }
    }

    pub fn config(&self) -> &CanaryConfig {
        &self.shared.config
    }

    /// Start routing `initial_traffic_percentage` to `version`.
    pub async fn start_canary(&self, version: &str, baseline: &str) -> RolloutResult<()> {
        self.shared.ensure_running()?;
        self.shared.start(version, baseline).await
    }

    /// Stop ramping. Metrics polling continues.
    pub async fn pause_canary(&self) -> RolloutResult<()> {
        self.shared.ensure_running()?;
        let _op = self.shared.ops.lock().await;
        let status = lock(&self.shared.state).status;
        match status {
            CanaryStatus::Running => {
                self.shared.stop_increment();
                lock(&self.shared.state).status = CanaryStatus::Paused;
                info!("canary paused");
                Ok(())
            }
            CanaryStatus::Paused => Err(RolloutError::InvalidTransition { op: "pause", status }),
            _ => Err(RolloutError::NoActiveCanary),
        }
    }

    /// Resume ramping from the current percentage.
    pub async fn resume_canary(&self) -> RolloutResult<()> {
        self.shared.ensure_running()?;
        let _op = self.shared.ops.lock().await;
        let status = lock(&self.shared.state).status;
        match status {
            CanaryStatus::Paused => {
                lock(&self.shared.state).status = CanaryStatus::Running;
                let run = self.shared.run.load(Ordering::SeqCst);
                self.shared.start_increment(run);
                info!("canary resumed");
                Ok(())
            }
            CanaryStatus::Running => Err(RolloutError::InvalidTransition { op: "resume", status }),
            _ => Err(RolloutError::NoActiveCanary),
        }
    }

    /// Route `pct` percent of traffic to the canary.
    pub async fn adjust_traffic(&self, pct: i64) -> RolloutResult<()> {
        let pct = validate_percentage(pct)?;
        self.shared.ensure_running()?;
        let _op = self.shared.ops.lock().await;
        self.shared.adjust_locked(pct).await
    }

    /// Promote the canary to 100% and stop both tickers.
    pub async fn complete_canary(&self) -> RolloutResult<()> {
        self.shared.ensure_running()?;
        let _op = self.shared.ops.lock().await;
        self.shared.complete_locked().await
    }

    /// Return all traffic to the baseline and stop both tickers.
    pub async fn rollback_canary(&self) -> RolloutResult<()> {
        self.shared.ensure_running()?;
        let _op = self.shared.ops.lock().await;
        self.shared.rollback_locked().await
    }

    /// One ramp step. Normally driven by the increment ticker.
    pub async fn auto_increment(&self) -> RolloutResult<()> {
        self.shared.ensure_running()?;
        let _op = self.shared.ops.lock().await;
        self.shared.auto_increment_locked().await
    }

    /// Fetch and merge metrics once, rolling back on a breach.
    /// Normally driven by the metrics ticker.
    pub async fn collect_metrics(&self) -> RolloutResult<()> {
        self.shared.ensure_running()?;
        let (run, version) = {
            let st = lock(&self.shared.state);
            if !st.is_active() {
                return Err(RolloutError::NoActiveCanary);
            }
            (self.shared.run.load(Ordering::SeqCst), st.version.clone())
        };

        let update = self.shared.fetch_metrics(&version).await?;

        let _op = self.shared.ops.lock().await;
        self.shared.apply_metrics_locked(run, update).await
    }

    /// Whether the current metrics breach a rollback threshold.
    pub fn should_rollback(&self) -> bool {
        should_rollback(&lock(&self.shared.state).metrics, self.shared.config.max_error_rate)
    }

    /// A copy of the current state.
    pub fn state(&self) -> CanaryState {
        lock(&self.shared.state).clone()
    }

    /// Whether the ramp ticker is running.
    pub fn is_ramping(&self) -> bool {
        lock(&self.shared.tickers).increment.is_some()
    }

    /// Whether the metrics ticker is running.
    pub fn is_collecting(&self) -> bool {
        lock(&self.shared.tickers).metrics.is_some()
    }

    /// Stop both tickers and the event loop. No callback fires afterwards,
    /// and every later operation fails with `ShutDown`.
    pub fn shutdown(&self) {
        self.shared.shut_down.store(true, Ordering::SeqCst);
        self.shared.stop_tickers();
        self.event_loop.abort();
        debug!("canary controller shut down");
    }
}

impl Drop for CanaryController {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl Shared {
    fn ensure_running(&self) -> RolloutResult<()> {
        if self.shut_down.load(Ordering::SeqCst) {
            return Err(RolloutError::ShutDown);
        }
        Ok(())
    }

    async fn start(&self, version: &str, baseline: &str) -> RolloutResult<()> {
        if !self.config.enabled {
            return Err(RolloutError::Disabled("canary"));
        }

        let _op = self.ops.lock().await;
        self.ensure_running()?;

        let previous = lock(&self.state).status;
        if previous == CanaryStatus::Running {
            return Err(RolloutError::CanaryAlreadyRunning);
        }
        if previous == CanaryStatus::Paused {
            warn!("replacing paused canary");
        }

        let pct = self.config.initial_traffic_percentage.min(100);
        self.apply_split(version, baseline, pct).await?;

        self.stop_tickers();
        // Run id and state change together so a reader never pairs the
        // new run with the previous version.
        let run = {
            let mut st = lock(&self.state);
            let run = self.run.fetch_add(1, Ordering::SeqCst) + 1;
            *st = CanaryState::started(version, baseline, pct);
            run
        };

        self.start_metrics(run, version);
        self.start_increment(run);

        info!(%version, %baseline, pct, run, "canary started");
        Ok(())
    }

    async fn apply_split(&self, version: &str, baseline: &str, pct: u8) -> RolloutResult<()> {
        let rules = TrafficRule::split(version, baseline, pct);
        bounded(
            "apply traffic split",
            self.config.capability_timeout_secs,
            self.router.apply_split(&rules),
        )
        .await
    }

    async fn fetch_metrics(&self, version: &str) -> RolloutResult<MetricsUpdate> {
        bounded(
            "fetch metrics",
            self.config.capability_timeout_secs,
            self.source.fetch(version),
        )
        .await
    }

    /// Versions of the active canary, or `NoActiveCanary`.
    fn active_versions(&self) -> RolloutResult<(String, String)> {
        let st = lock(&self.state);
        if !st.is_active() {
            return Err(RolloutError::NoActiveCanary);
        }
        Ok((st.version.clone(), st.baseline_version.clone()))
    }

    async fn adjust_locked(&self, pct: u8) -> RolloutResult<()> {
        let (version, baseline) = self.active_versions()?;
        self.apply_split(&version, &baseline, pct).await?;

        {
            let mut st = lock(&self.state);
            st.traffic_percentage = pct;
            st.last_increment_time = Some(epoch_secs());
        }
        info!(%version, pct, "canary traffic adjusted");
        Ok(())
    }

    async fn complete_locked(&self) -> RolloutResult<()> {
        let (version, baseline) = self.active_versions()?;
        self.apply_split(&version, &baseline, 100).await?;

        self.stop_tickers();
        {
            let mut st = lock(&self.state);
            st.traffic_percentage = 100;
            st.last_increment_time = Some(epoch_secs());
            st.status = CanaryStatus::Completed;
            st.enabled = false;
        }
        info!(%version, "canary completed");
        Ok(())
    }

    async fn rollback_locked(&self) -> RolloutResult<()> {
        let (version, baseline) = self.active_versions()?;
        if let Err(e) = self.apply_split(&version, &baseline, 0).await {
            error!(%version, %baseline, error = %e, "canary rollback could not restore baseline traffic");
            return Err(e);
        }

        self.stop_tickers();
        {
            let mut st = lock(&self.state);
            st.traffic_percentage = 0;
            st.status = CanaryStatus::RolledBack;
            st.enabled = false;
        }
        warn!(%version, %baseline, "canary rolled back");
        Ok(())
    }

    async fn auto_increment_locked(&self) -> RolloutResult<()> {
        let (status, current) = {
            let st = lock(&self.state);
            (st.status, st.traffic_percentage)
        };
        if status != CanaryStatus::Running {
            debug!(%status, "skipping ramp step");
            return Ok(());
        }

        let next = current
            .saturating_add(self.config.increment_percentage)
            .min(100);
        if next == 100 {
            self.complete_locked().await
        } else {
            self.adjust_locked(next).await
        }
    }

    async fn apply_metrics_locked(&self, run: u64, update: MetricsUpdate) -> RolloutResult<()> {
        let breach = {
            let mut st = lock(&self.state);
            if run != self.run.load(Ordering::SeqCst) || !st.is_active() {
                debug!(run, "dropping metrics for inactive canary run");
                return Ok(());
            }
            st.metrics.merge(&update);
            rollback_reason(&st.metrics, self.config.max_error_rate)
        };

        let Some(reason) = breach else {
            debug!("canary metrics within thresholds");
            return Ok(());
        };

        if !self.config.auto_rollback {
            warn!(%reason, "canary breached thresholds; automatic rollback disabled");
            return Ok(());
        }

        warn!(%reason, "canary breached thresholds, rolling back");
        self.rollback_locked().await
    }

    async fn handle_event(&self, event: CanaryEvent) {
        let _op = self.ops.lock().await;
        match event {
            CanaryEvent::MetricsCollected { run, update } => {
                if let Err(e) = self.apply_metrics_locked(run, update).await {
                    error!(run, error = %e, "metric-triggered rollback failed");
                }
            }
            CanaryEvent::IncrementDue { run } => {
                if run != self.run.load(Ordering::SeqCst) {
                    debug!(run, "dropping ramp step for stale canary run");
                    return;
                }
                if let Err(e) = self.auto_increment_locked().await {
                    warn!(run, error = %e, "canary ramp step failed");
                }
            }
        }
    }

    fn start_metrics(&self, run: u64, version: &str) {
        let mut tickers = lock(&self.tickers);
        if self.shut_down.load(Ordering::SeqCst) {
            debug!(run, "controller shut down; not polling metrics");
            return;
        }

        let source = self.source.clone();
        let events = self.events.clone();
        let version = version.to_string();
        let secs = self.config.capability_timeout_secs;

        let ticker = Ticker::start("canary-metrics", self.config.metrics_interval(), move || {
            let source = source.clone();
            let events = events.clone();
            let version = version.clone();
            async move {
                match bounded("fetch metrics", secs, source.fetch(&version)).await {
                    Ok(update) => {
                        if events.send(CanaryEvent::MetricsCollected { run, update }).is_err() {
                            warn!(run, "event loop gone; canary metrics dropped");
                        }
                    }
                    Err(e) => warn!(%version, error = %e, "canary metrics poll failed"),
                }
            }
        });
        let previous = tickers.metrics.replace(ticker);
        drop(tickers);
        drop(previous);
    }

    fn start_increment(&self, run: u64) {
        let mut tickers = lock(&self.tickers);
        if self.shut_down.load(Ordering::SeqCst) {
            debug!(run, "controller shut down; not ramping");
            return;
        }

        let events = self.events.clone();
        let ticker = Ticker::start("canary-ramp", self.config.increment_interval(), move || {
            if events.send(CanaryEvent::IncrementDue { run }).is_err() {
                warn!(run, "event loop gone; ramp step dropped");
            }
            async {}
        });
        let previous = tickers.increment.replace(ticker);
        drop(tickers);
        drop(previous);
    }

    fn stop_increment(&self) {
        let ticker = lock(&self.tickers).increment.take();
        drop(ticker);
    }

    fn stop_tickers(&self) {
        let stopped = std::mem::take(&mut *lock(&self.tickers));
        drop(stopped);
    }
}
