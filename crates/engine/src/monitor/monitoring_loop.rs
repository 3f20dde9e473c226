//! The periodic driver: snapshot, assess, publish.

use super::{MonitoringStats, SnapshotSource};
use crate::config::ConfigurationManager;
use crate::events::{EventBus, SafetyEvent};
use crate::providers::{HealthProvider, MarketDataProvider};
use crate::risk::{ComprehensiveRiskAssessment, RiskAssessor, RiskSnapshot, window_start};
use chrono::Utc;
use safeguard_domain::SafetyError;
use safeguard_domain::enums::MonitorState;
use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, RwLock, watch};
use tokio::task::{JoinError, JoinHandle};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

struct Running {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

struct LoopInner {
    config: Arc<ConfigurationManager>,
    bus: Arc<EventBus>,
    market: Arc<dyn MarketDataProvider>,
    health: Arc<dyn HealthProvider>,
    assessor: RiskAssessor,
    state: RwLock<MonitorState>,
    stats: RwLock<MonitoringStats>,
    history: RwLock<VecDeque<Arc<ComprehensiveRiskAssessment>>>,
    tick: AtomicU64,
    /// Serializes loop ticks and manual ticks.
    tick_lock: Mutex<()>,
}

/// Timer-driven monitoring loop.
///
/// One dedicated task sleeps until the next deadline, runs a tick, and
/// computes the following deadline from the previous one so the schedule
/// does not drift. Every tick runs in its own task; a panic inside it is
/// reported as a `tick_failure` assessment and the loop carries on.
pub struct MonitoringLoop {
    inner: Arc<LoopInner>,
    control: Mutex<Option<Running>>,
}

impl MonitoringLoop {
    /// Creates a stopped loop. Nothing runs until `start()` or `run_once()`.
    pub fn new(
        config: Arc<ConfigurationManager>,
        bus: Arc<EventBus>,
        market: Arc<dyn MarketDataProvider>,
        health: Arc<dyn HealthProvider>,
    ) -> Self {
        Self {
            inner: Arc::new(LoopInner {
                config,
                bus,
                market,
                health,
                assessor: RiskAssessor,
                state: RwLock::new(MonitorState::Stopped),
                stats: RwLock::new(MonitoringStats::default()),
                history: RwLock::new(VecDeque::new()),
                tick: AtomicU64::new(0),
                tick_lock: Mutex::new(()),
            }),
            control: Mutex::new(None),
        }
    }

    /// Starts the loop. Calling it while running is a no-op.
    ///
    /// Must be called from within a tokio runtime. The first tick runs
    /// immediately.
    pub async fn start(&self) {
        let mut control = self.control.lock().await;
        if let Some(running) = control.as_ref()
            && !running.handle.is_finished()
        {
            debug!("Monitoring loop already running");
            return;
        }

        self.inner.set_state(MonitorState::Starting).await;
        let (shutdown, rx) = watch::channel(false);
        let handle = tokio::spawn(self.inner.clone().run(rx));
        *control = Some(Running { shutdown, handle });

        self.inner.stats.write().await.started_at = Some(Utc::now());
        self.inner.set_state(MonitorState::Running).await;
        info!("Monitoring loop started");
    }

    /// Stops the loop and waits for an in-flight tick to finish.
    pub async fn stop(&self) {
        let mut control = self.control.lock().await;
        let Some(running) = control.take() else {
            self.inner.set_state(MonitorState::Stopped).await;
            return;
        };

        self.inner.set_state(MonitorState::Stopping).await;
        let _ = running.shutdown.send(true);

        if let Err(e) = running.handle.await {
            error!(error = %e, "Monitoring loop terminated abnormally");
            self.inner.stats.write().await.last_error = Some(e.to_string());
            self.inner.set_state(MonitorState::Error).await;
        }

        self.inner.set_state(MonitorState::Stopped).await;
        info!("Monitoring loop stopped");
    }

    /// Runs one tick now, outside the schedule.
    pub async fn run_once(&self) -> Arc<ComprehensiveRiskAssessment> {
        self.inner.guarded_tick().await
    }

    /// Current lifecycle state. A loop task that ended without `stop()` is
    /// reported as `Error`.
    pub async fn state(&self) -> MonitorState {
        self.reap().await;
        *self.inner.state.read().await
    }

    /// Counters and last-tick summary, with the current state.
    pub async fn status(&self) -> MonitoringStats {
        let mut stats = self.inner.stats.read().await.clone();
        stats.state = self.state().await;
        stats
    }

    /// Most recent assessment, if any tick has run.
    pub async fn latest(&self) -> Option<Arc<ComprehensiveRiskAssessment>> {
        self.inner.history.read().await.back().cloned()
    }

    /// Oldest first.
    pub async fn history(&self) -> Vec<Arc<ComprehensiveRiskAssessment>> {
        self.inner.history.read().await.iter().cloned().collect()
    }

    /// Collects a loop task that died on its own and moves to `Error`.
    ///
    /// Skipped while `start()` or `stop()` holds the control lock.
    async fn reap(&self) {
        let Ok(mut control) = self.control.try_lock() else {
            return;
        };
        if !control.as_ref().is_some_and(|r| r.handle.is_finished()) {
            return;
        }
        let Some(running) = control.take() else {
            return;
        };

        let reason = match running.handle.await {
            Ok(()) => "monitoring loop exited unexpectedly".to_string(),
            Err(e) if e.is_panic() => join_failure_reason(e),
            Err(_) => "monitoring loop task cancelled".to_string(),
        };
        error!(reason = %reason, "Monitoring loop died");
        self.inner.stats.write().await.last_error = Some(reason);
        self.inner.set_state(MonitorState::Error).await;
    }
}

impl LoopInner {
    async fn set_state(&self, state: MonitorState) {
        let mut current = self.state.write().await;
        if *current != state {
            debug!(from = %*current, to = %state, "Monitoring state change");
            *current = state;
        }
    }

    async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut deadline = Instant::now();

        loop {
            tokio::select! {
                _ = tokio::time::sleep_until(deadline) => {}
                _ = shutdown.changed() => break,
            }
            if *shutdown.borrow() {
                break;
            }

            let config = self.config.active().await;
            let interval = Duration::from_millis(config.monitoring.interval_ms.max(1));

            if config.monitoring.enabled {
                self.guarded_tick().await;
            } else {
                self.stats.write().await.timer.disabled_cycles += 1;
            }

            let (next, missed) = next_deadline(deadline, interval, Instant::now());
            deadline = next;

            let mut stats = self.stats.write().await;
            stats.timer.cycles += 1;
            stats.timer.last_cycle_at = Some(Utc::now());
            if missed > 0 {
                stats.timer.missed_deadlines += missed;
                warn!(missed, interval_ms = config.monitoring.interval_ms, "Tick overran its interval");
            }
        }

        debug!("Monitoring loop exiting");
    }

    /// Runs one tick in its own task and records the outcome.
    async fn guarded_tick(self: &Arc<Self>) -> Arc<ComprehensiveRiskAssessment> {
        let _serial = self.tick_lock.lock().await;
        let tick = self.tick.fetch_add(1, Ordering::SeqCst) + 1;
        let started = Instant::now();

        let inner = self.clone();
        let result = tokio::spawn(async move { inner.tick(tick).await }).await;
        let latency_ms = started.elapsed().as_secs_f64() * 1000.0;

        let assessment = match result {
            Ok(assessment) => {
                let mut stats = self.stats.write().await;
                stats.ticks_run += 1;
                stats.record_latency(latency_ms);
                Arc::new(assessment)
            }
            Err(e) => {
                let reason = join_failure_reason(e);
                error!(tick, reason = %reason, "Monitoring tick failed");
                let degraded_level = self.config.active().await.degraded_level;
                let mut stats = self.stats.write().await;
                stats.ticks_failed += 1;
                stats.record_latency(latency_ms);
                stats.last_error = Some(reason.clone());
                Arc::new(ComprehensiveRiskAssessment::tick_failure(
                    tick,
                    &reason,
                    degraded_level,
                    Utc::now(),
                ))
            }
        };

        self.record(&assessment).await;
        self.bus.publish(SafetyEvent::RiskAssessed(assessment.clone()));
        assessment
    }

    async fn record(&self, assessment: &Arc<ComprehensiveRiskAssessment>) {
        let history_size = self.config.active().await.monitoring.history_size;
        {
            let mut history = self.history.write().await;
            history.push_back(assessment.clone());
            while history.len() > history_size {
                history.pop_front();
            }
        }

        let mut stats = self.stats.write().await;
        stats.last_tick = Some(assessment.tick);
        stats.last_level = Some(assessment.overall_level);
        stats.last_score = Some(assessment.overall_score);
        stats.last_tick_at = Some(assessment.assessed_at);

        debug!(
            tick = assessment.tick,
            level = %assessment.overall_level,
            score = %assessment.overall_score,
            degraded = assessment.degraded_dimensions.len(),
            "Risk assessed"
        );
    }

    async fn tick(&self, tick: u64) -> ComprehensiveRiskAssessment {
        let config = self.config.active().await;
        let timeout = Duration::from_millis(config.monitoring.snapshot_timeout_ms);
        let thresholds = &config.thresholds;
        let since = window_start(
            Utc::now(),
            thresholds
                .pattern
                .window_secs
                .max(thresholds.performance.window_secs),
        );

        let (positions, account, trades, health) = tokio::join!(
            self.fetch(SnapshotSource::Positions, timeout, self.market.get_positions()),
            self.fetch(SnapshotSource::Account, timeout, self.market.get_account_state()),
            self.fetch(SnapshotSource::Trades, timeout, self.market.get_recent_trades(since)),
            self.fetch(SnapshotSource::Health, timeout, self.health.get_health_snapshot()),
        );

        let snapshot = RiskSnapshot {
            positions,
            account,
            trades,
            health,
            taken_at: Utc::now(),
        };
        self.assessor.assess(&snapshot, &config, tick)
    }

    async fn fetch<T>(
        &self,
        source: SnapshotSource,
        timeout: Duration,
        call: impl Future<Output = anyhow::Result<T>>,
    ) -> Result<T, String> {
        match tokio::time::timeout(timeout, call).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => {
                warn!(source = %source, error = %e, "Snapshot failed");
                self.stats.write().await.timer.source(source).errors += 1;
                Err(e.to_string())
            }
            Err(_) => {
                let err = SafetyError::Timeout {
                    operation: source.to_string(),
                    timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                };
                warn!(source = %source, error = %err, "Snapshot timed out");
                self.stats.write().await.timer.source(source).timeouts += 1;
                Err(err.to_string())
            }
        }
    }
}

/// Next deadline after `previous`, skipping any already in the past.
///
/// Returns the deadline and how many were skipped.
fn next_deadline(previous: Instant, interval: Duration, now: Instant) -> (Instant, u64) {
    let next = previous + interval;
    if next > now {
        return (next, 0);
    }
    let behind = now.duration_since(next).as_nanos();
    let skipped = behind / interval.as_nanos().max(1) + 1;
    let skipped = u32::try_from(skipped).unwrap_or(u32::MAX);
    (next + interval * skipped, u64::from(skipped))
}

fn join_failure_reason(err: JoinError) -> String {
    if err.is_panic() {
        let panic = err.into_panic();
        if let Some(msg) = panic.downcast_ref::<&str>() {
            format!("panic: {msg}")
        } else if let Some(msg) = panic.downcast_ref::<String>() {
            format!("panic: {msg}")
        } else {
            "panic".to_string()
        }
    } else {
        "tick task cancelled".to_string()
    }
}
