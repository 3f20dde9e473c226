//! Alert lifecycle: create, refresh, escalate, acknowledge and resolve.

use super::{AlertFilter, AlertKey, AlertStatistics, SafetyAlert};
use crate::config::ConfigurationManager;
use crate::events::{EventBus, EventHandler, OperationStateChange, SafetyEvent};
use crate::notify::Notifier;
use crate::risk::{ComprehensiveRiskAssessment, MetricReading};
use crate::store::SafetyStore;
use async_trait::async_trait;
use chrono::Utc;
use safeguard_domain::enums::{AlertSeverity, BreachCondition, OperationStatus, RiskDimension};
use safeguard_domain::{SafetyError, SafetyResult};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::sync::{Mutex, mpsc, oneshot};
use tracing::{debug, info, warn};
use uuid::Uuid;

const CONDITION_CLEARED: &str = "condition cleared";

/// Alerts changed by one assessment.
#[derive(Debug, Clone, Default)]
pub struct AssessmentOutcome {
    /// Created or escalated.
    pub raised: Vec<SafetyAlert>,
    pub refreshed: Vec<SafetyAlert>,
    pub resolved: Vec<SafetyAlert>,
}

#[derive(Default)]
struct AlertBook {
    alerts: HashMap<Uuid, SafetyAlert>,
    /// Unresolved alert per key.
    unresolved: HashMap<AlertKey, Uuid>,
    /// Resolved alerts, oldest first, for pruning.
    resolved_order: VecDeque<Uuid>,
}

impl AlertBook {
    fn mark_resolved(&mut self, alert: &SafetyAlert) {
        if self.unresolved.get(&alert.key) == Some(&alert.id) {
            self.unresolved.remove(&alert.key);
        }
        self.resolved_order.push_back(alert.id);
    }

    fn prune(&mut self, max_history: usize) {
        while self.resolved_order.len() > max_history {
            if let Some(id) = self.resolved_order.pop_front() {
                self.alerts.remove(&id);
            }
        }
    }

    /// Refreshes the unresolved alert for `key`, or opens a new one.
    ///
    /// Returns the alert and whether it was raised (new or escalated).
    fn upsert(
        &mut self,
        key: AlertKey,
        severity: AlertSeverity,
        message: String,
        evidence: Option<MetricReading>,
    ) -> (SafetyAlert, bool) {
        if let Some(id) = self.unresolved.get(&key).copied()
            && let Some(alert) = self.alerts.get_mut(&id)
        {
            let escalated = alert.refresh(severity, message, evidence, Utc::now());
            return (alert.clone(), escalated);
        }

        let alert = SafetyAlert::new(key.clone(), severity, message, evidence);
        self.unresolved.insert(key, alert.id);
        self.alerts.insert(alert.id, alert.clone());
        (alert, true)
    }
}

enum Delivery {
    Alert {
        alert: SafetyAlert,
        notify: bool,
        timeout: Duration,
    },
    Flush(oneshot::Sender<()>),
}

/// Appends history and notifies in arrival order, one bounded call at a time.
struct Outbox {
    store: Option<Arc<dyn SafetyStore>>,
    notifier: Option<Arc<dyn Notifier>>,
}

impl Outbox {
    async fn run(self, mut rx: mpsc::UnboundedReceiver<Delivery>) {
        while let Some(delivery) = rx.recv().await {
            match delivery {
                Delivery::Alert {
                    alert,
                    notify,
                    timeout,
                } => self.deliver(&alert, notify, timeout).await,
                Delivery::Flush(done) => {
                    let _ = done.send(());
                }
            }
        }
    }

    async fn deliver(&self, alert: &SafetyAlert, notify: bool, timeout: Duration) {
        let timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        if let Some(store) = &self.store {
            match tokio::time::timeout(timeout, store.append_alert_history(alert)).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(alert = %alert.id, error = %e, "Failed to append alert history"),
                Err(_) => warn!(alert = %alert.id, timeout_ms, "Alert history append timed out"),
            }
        }
        if notify && let Some(notifier) = &self.notifier {
            match tokio::time::timeout(timeout, notifier.deliver(alert)).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(alert = %alert.id, error = %e, "Alert notification failed"),
                Err(_) => warn!(alert = %alert.id, timeout_ms, "Alert notification timed out"),
            }
        }
    }
}

/// Owns every alert. Mutated only through its own operations.
///
/// Lookup and insert happen under one lock, so concurrent assessments can
/// never open two alerts for the same key. Events are published after the
/// lock is released; persistence and notification are queued on an outbox
/// task so a stalled store or notifier never holds up alert processing.
pub struct AlertManager {
    config: Arc<ConfigurationManager>,
    book: Mutex<AlertBook>,
    bus: Option<Arc<EventBus>>,
    store: Option<Arc<dyn SafetyStore>>,
    notifier: Option<Arc<dyn Notifier>>,
    /// Started on first use.
    outbox: OnceLock<mpsc::UnboundedSender<Delivery>>,
}

impl AlertManager {
    /// Creates a manager reading its settings from `config`.
    pub fn new(config: Arc<ConfigurationManager>) -> Self {
        Self {
            config,
            book: Mutex::new(AlertBook::default()),
            bus: None,
            store: None,
            notifier: None,
            outbox: OnceLock::new(),
        }
    }

    /// Publishes `AlertRaised` and `AlertResolved` on `bus`.
    #[must_use]
    pub fn with_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.bus = Some(bus);
        self
    }

    /// Appends every alert state change to the store's history.
    #[must_use]
    pub fn with_store(mut self, store: Arc<dyn SafetyStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Delivers new and escalated alerts to `notifier`.
    #[must_use]
    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Turns the breaches of one assessment into alert changes.
    pub async fn process_assessment(
        &self,
        assessment: &ComprehensiveRiskAssessment,
    ) -> AssessmentOutcome {
        let config = self.config.active().await;
        let settings = &config.alerts;
        let timeout = Duration::from_millis(settings.delivery_timeout_ms);
        let mut outcome = AssessmentOutcome::default();
        let mut breaching = HashSet::new();

        {
            let mut book = self.book.lock().await;

            for (dimension, reading) in assessment.breaches() {
                let key = AlertKey::new(dimension.dimension, reading.condition, None);
                breaching.insert(key.clone());

                let Some(severity) = settings.severity_map.for_level(reading.level) else {
                    continue;
                };
                if severity < settings.min_severity {
                    continue;
                }

                let message = describe(dimension.dimension, reading);
                let (alert, raised) = book.upsert(key, severity, message, Some(reading.clone()));
                if raised {
                    outcome.raised.push(alert);
                } else {
                    outcome.refreshed.push(alert);
                }
            }

            if settings.auto_resolve_on_clear {
                let degraded: HashSet<RiskDimension> =
                    assessment.degraded_dimensions.iter().copied().collect();
                let cleared: Vec<Uuid> = book
                    .unresolved
                    .iter()
                    .filter(|(key, _)| {
                        key.scope.is_none()
                            && !degraded.contains(&key.dimension)
                            && !breaching.contains(*key)
                    })
                    .map(|(_, id)| *id)
                    .collect();

                let now = Utc::now();
                for id in cleared {
                    let Some(alert) = book.alerts.get_mut(&id) else {
                        continue;
                    };
                    if alert.resolve(CONDITION_CLEARED.to_string(), now).is_ok() {
                        let alert = alert.clone();
                        book.mark_resolved(&alert);
                        outcome.resolved.push(alert);
                    }
                }
            }

            book.prune(settings.max_history);
        }

        if !outcome.raised.is_empty() || !outcome.resolved.is_empty() {
            debug!(
                tick = assessment.tick,
                raised = outcome.raised.len(),
                refreshed = outcome.refreshed.len(),
                resolved = outcome.resolved.len(),
                "Alerts updated"
            );
        }

        for alert in &outcome.raised {
            self.announce_raised(alert, timeout);
        }
        for alert in &outcome.resolved {
            self.announce_resolved(alert, timeout);
        }

        outcome
    }

    /// Opens (or refreshes) the emergency alert for an operation whose exit failed.
    pub async fn raise_exit_failure(&self, change: &OperationStateChange) -> SafetyAlert {
        let key = AlertKey::new(
            RiskDimension::Portfolio,
            BreachCondition::ExitFailed,
            Some(change.operation_id.to_string()),
        );
        let message = format!(
            "exit failed for operation {} ({}): {}",
            change.operation_id,
            change.symbol,
            change.reason.as_deref().unwrap_or("unknown error")
        );

        let timeout = self.delivery_timeout().await;
        let (alert, raised) = {
            let mut book = self.book.lock().await;
            book.upsert(key, AlertSeverity::Emergency, message, None)
        };

        if raised {
            self.announce_raised(&alert, timeout);
        }
        alert
    }

    /// Moves an open alert to acknowledged.
    pub async fn acknowledge(&self, id: Uuid) -> SafetyResult<SafetyAlert> {
        let timeout = self.delivery_timeout().await;
        let alert = {
            let mut book = self.book.lock().await;
            let alert = book
                .alerts
                .get_mut(&id)
                .ok_or_else(|| SafetyError::not_found("alert", id.to_string()))?;
            alert.acknowledge(Utc::now())?;
            alert.clone()
        };

        info!(alert = %id, key = %alert.key, "Alert acknowledged");
        self.enqueue(&alert, false, timeout);
        Ok(alert)
    }

    /// Resolves an open or acknowledged alert.
    pub async fn resolve(&self, id: Uuid, reason: impl Into<String>) -> SafetyResult<SafetyAlert> {
        let settings = self.config.active().await.alerts.clone();
        let alert = {
            let mut book = self.book.lock().await;
            let alert = book
                .alerts
                .get_mut(&id)
                .ok_or_else(|| SafetyError::not_found("alert", id.to_string()))?;
            alert.resolve(reason.into(), Utc::now())?;
            let alert = alert.clone();
            book.mark_resolved(&alert);
            book.prune(settings.max_history);
            alert
        };

        self.announce_resolved(&alert, Duration::from_millis(settings.delivery_timeout_ms));
        Ok(alert)
    }

    /// Matching alerts, newest first.
    pub async fn list(&self, filter: &AlertFilter) -> Vec<SafetyAlert> {
        let book = self.book.lock().await;
        let mut alerts: Vec<SafetyAlert> = book
            .alerts
            .values()
            .filter(|a| filter.matches(a))
            .cloned()
            .collect();
        alerts.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        alerts
    }

    /// One alert by id, resolved or not.
    pub async fn get(&self, id: Uuid) -> SafetyResult<SafetyAlert> {
        self.book
            .lock()
            .await
            .alerts
            .get(&id)
            .cloned()
            .ok_or_else(|| SafetyError::not_found("alert", id.to_string()))
    }

    pub async fn unresolved_count(&self) -> usize {
        self.book.lock().await.unresolved.len()
    }

    /// Counts by status and severity over the retained alerts.
    pub async fn statistics(&self) -> AlertStatistics {
        let book = self.book.lock().await;
        AlertStatistics::from_alerts(book.alerts.values())
    }

    /// Waits until every queued history append and notification has been
    /// attempted.
    pub async fn flush(&self) {
        let Some(tx) = self.outbox.get() else {
            return;
        };
        let (done, wait) = oneshot::channel();
        if tx.send(Delivery::Flush(done)).is_ok() {
            let _ = wait.await;
        }
    }

    async fn delivery_timeout(&self) -> Duration {
        Duration::from_millis(self.config.active().await.alerts.delivery_timeout_ms)
    }

    fn announce_raised(&self, alert: &SafetyAlert, timeout: Duration) {
        warn!(
            alert = %alert.id,
            key = %alert.key,
            severity = %alert.severity,
            "Alert raised"
        );
        if let Some(bus) = &self.bus {
            bus.publish(SafetyEvent::AlertRaised(alert.clone()));
        }
        self.enqueue(alert, true, timeout);
    }

    fn announce_resolved(&self, alert: &SafetyAlert, timeout: Duration) {
        info!(
            alert = %alert.id,
            key = %alert.key,
            reason = alert.resolution.as_deref().unwrap_or_default(),
            "Alert resolved"
        );
        if let Some(bus) = &self.bus {
            bus.publish(SafetyEvent::AlertResolved(alert.clone()));
        }
        self.enqueue(alert, false, timeout);
    }

    fn enqueue(&self, alert: &SafetyAlert, notify: bool, timeout: Duration) {
        if self.store.is_none() && !(notify && self.notifier.is_some()) {
            return;
        }
        let tx = self.outbox.get_or_init(|| {
            let (tx, rx) = mpsc::unbounded_channel();
            let outbox = Outbox {
                store: self.store.clone(),
                notifier: self.notifier.clone(),
            };
            tokio::spawn(outbox.run(rx));
            tx
        });
        let delivery = Delivery::Alert {
            alert: alert.clone(),
            notify,
            timeout,
        };
        if tx.send(delivery).is_err() {
            warn!(alert = %alert.id, "Alert outbox closed");
        }
    }
}

#[async_trait]
impl EventHandler for AlertManager {
    async fn handle(&self, event: SafetyEvent) -> anyhow::Result<()> {
        match event {
            SafetyEvent::RiskAssessed(assessment) => {
                self.process_assessment(&assessment).await;
            }
            SafetyEvent::OperationStateChanged(change) if change.to == OperationStatus::Error => {
                self.raise_exit_failure(&change).await;
            }
            _ => {}
        }
        Ok(())
    }
}

fn describe(dimension: RiskDimension, reading: &MetricReading) -> String {
    format!(
        "{dimension} {} at {} (warning {}, critical {})",
        reading.condition,
        reading.value.normalize(),
        reading.threshold.warning,
        reading.threshold.critical
    )
}
