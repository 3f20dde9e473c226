//! Auto-exit supervision of registered operations.
//!
//! Each operation walks `active -> exiting -> closed | error`. The move to
//! `exiting` happens under the operation's own lock, so one operation never
//! has two exit sequences in flight. The exit sequence itself runs on a
//! spawned task that retries `place_exit` with a fixed delay until it fills,
//! the attempt bound is reached, or the operation is deregistered. Each call
//! is bounded by `attempt_timeout_ms` and raced against deregistration.

use super::{ExitReason, OperationRecord, OperationRegistration, SafetyAction};
use crate::alerts::SafetyAlert;
use crate::config::ConfigurationManager;
use crate::events::{EventBus, EventHandler, OperationStateChange, SafetyEvent};
use crate::providers::{ExecutionClient, ExitParams};
use crate::risk::ComprehensiveRiskAssessment;
use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use safeguard_domain::enums::{ActionOutcome, OperationStatus, RiskLevel};
use safeguard_domain::{SafetyError, SafetyResult};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock, watch};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

struct OperationEntry {
    record: OperationRecord,
    /// Flipped to true on deregistration; stops retries and in-flight calls.
    cancel: watch::Sender<bool>,
}

type Registry = RwLock<HashMap<Uuid, Arc<Mutex<OperationEntry>>>>;

/// Shared state an exit task needs after the triggering handler returns.
#[derive(Clone)]
struct ExitWorker {
    execution: Arc<dyn ExecutionClient>,
    bus: Option<Arc<EventBus>>,
    operations: Arc<Registry>,
    finished: Arc<RwLock<VecDeque<OperationRecord>>>,
    actions: Arc<RwLock<VecDeque<SafetyAction>>>,
}

/// Limits captured when an exit sequence starts.
#[derive(Debug, Clone, Copy)]
struct RetryPolicy {
    max_attempts: u32,
    delay: Duration,
    attempt_timeout: Duration,
    max_finished: usize,
}

/// How one `place_exit` attempt ended.
enum AttemptOutcome {
    Filled(Option<Decimal>),
    Failed(String),
    Cancelled,
}

/// Supervises registered operations and force-exits them when a protective
/// condition or an actionable alert fires.
pub struct AutoExitManager {
    config: Arc<ConfigurationManager>,
    worker: ExitWorker,
    last_level: RwLock<RiskLevel>,
    tasks: Mutex<JoinSet<()>>,
}

impl AutoExitManager {
    /// Creates a manager that places exits through `execution`.
    pub fn new(config: Arc<ConfigurationManager>, execution: Arc<dyn ExecutionClient>) -> Self {
        Self {
            config,
            worker: ExitWorker {
                execution,
                bus: None,
                operations: Arc::new(RwLock::new(HashMap::new())),
                finished: Arc::new(RwLock::new(VecDeque::new())),
                actions: Arc::new(RwLock::new(VecDeque::new())),
            },
            last_level: RwLock::new(RiskLevel::Normal),
            tasks: Mutex::new(JoinSet::new()),
        }
    }

    /// Publishes operation state changes on `bus`.
    #[must_use]
    pub fn with_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.worker.bus = Some(bus);
        self
    }

    /// Puts an operation under supervision.
    pub async fn register(&self, registration: OperationRegistration) -> SafetyResult<OperationRecord> {
        let problems = registration.problems();
        if !problems.is_empty() {
            return Err(SafetyError::InvalidConfiguration(problems));
        }

        let id = registration.id;
        let mut operations = self.worker.operations.write().await;
        if operations.contains_key(&id) {
            return Err(SafetyError::duplicate("operation", id.to_string()));
        }

        let record = OperationRecord::new(registration);
        info!(
            operation = %id,
            symbol = %record.registration.symbol,
            side = %record.registration.side,
            quantity = %record.registration.quantity,
            "Operation registered"
        );
        operations.insert(
            id,
            Arc::new(Mutex::new(OperationEntry {
                record: record.clone(),
                cancel: watch::channel(false).0,
            })),
        );
        Ok(record)
    }

    /// Removes an operation from supervision and cancels any pending retries.
    pub async fn deregister(&self, id: Uuid) -> SafetyResult<OperationRecord> {
        let entry = self
            .worker
            .operations
            .write()
            .await
            .remove(&id)
            .ok_or_else(|| SafetyError::not_found("operation", id.to_string()))?;

        let mut entry = entry.lock().await;
        entry.cancel.send_replace(true);

        let from = entry.record.status;
        let now = Utc::now();
        entry.record.status = OperationStatus::Closed;
        entry.record.updated_at = now;
        entry.record.finished_at = Some(now);
        let record = entry.record.clone();
        drop(entry);

        info!(operation = %id, from = %from, "Operation deregistered");
        let max_finished = self.config.active().await.exit.max_finished;
        self.worker.remember(record.clone(), max_finished).await;
        self.worker.publish_change(&record, from, Some("deregistered".to_string()));
        Ok(record)
    }

    /// Live or finished record of an operation.
    pub async fn status(&self, id: Uuid) -> SafetyResult<OperationRecord> {
        let entry = self.worker.operations.read().await.get(&id).cloned();
        if let Some(entry) = entry {
            return Ok(entry.lock().await.record.clone());
        }
        self.worker
            .finished
            .read()
            .await
            .iter()
            .rev()
            .find(|r| r.id() == id)
            .cloned()
            .ok_or_else(|| SafetyError::not_found("operation", id.to_string()))
    }

    /// Operations still under supervision, oldest registration first.
    pub async fn list(&self) -> Vec<OperationRecord> {
        let mut records = Vec::new();
        for entry in self.entries().await {
            records.push(entry.lock().await.record.clone());
        }
        records.sort_by_key(|r| r.registered_at);
        records
    }

    /// Closed or failed operations, most recent last.
    pub async fn finished(&self) -> Vec<OperationRecord> {
        self.worker.finished.read().await.iter().cloned().collect()
    }

    /// Protective actions taken, oldest first.
    pub async fn actions(&self) -> Vec<SafetyAction> {
        self.worker.actions.read().await.iter().cloned().collect()
    }

    /// Waits for every in-flight exit sequence to finish.
    pub async fn drain(&self) {
        let mut tasks = std::mem::take(&mut *self.tasks.lock().await);
        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "Exit task failed");
            }
        }
    }

    /// Updates marks and exits every operation whose conditions now hold.
    pub async fn on_assessment(&self, assessment: &ComprehensiveRiskAssessment) {
        *self.last_level.write().await = assessment.overall_level;
        let config = self.config.active().await;
        let now = Utc::now();

        for entry in self.entries().await {
            let mut guard = entry.lock().await;
            if guard.record.status != OperationStatus::Active {
                continue;
            }
            if let Some(price) = assessment.prices.get(&guard.record.registration.symbol) {
                guard.record.observe_price(*price);
            }
            if let Some(reason) =
                guard
                    .record
                    .evaluate(assessment.overall_level, config.exit.exit_level, now)
            {
                self.begin_exit(&mut guard, reason, None).await;
            }
        }
    }

    /// Re-evaluates operations in the alert's scope when it is severe enough.
    ///
    /// An alert scoped to an operation only affects that operation.
    pub async fn on_alert(&self, alert: &SafetyAlert) {
        let config = self.config.active().await;
        if !alert.is_unresolved() || alert.severity < config.exit.alert_exit_severity {
            return;
        }
        let level = *self.last_level.read().await;
        let now = Utc::now();

        for entry in self.entries().await {
            let mut guard = entry.lock().await;
            if guard.record.status != OperationStatus::Active {
                continue;
            }
            if let Some(scope) = &alert.key.scope
                && *scope != guard.record.id().to_string()
            {
                continue;
            }
            let reason = guard
                .record
                .evaluate(level, config.exit.exit_level, now)
                .unwrap_or(ExitReason::Alert {
                    alert_id: alert.id,
                    severity: alert.severity,
                });
            self.begin_exit(&mut guard, reason, Some(alert.id)).await;
        }
    }

    async fn entries(&self) -> Vec<Arc<Mutex<OperationEntry>>> {
        self.worker.operations.read().await.values().cloned().collect()
    }

    /// Moves an active operation to `exiting` and spawns its exit sequence.
    async fn begin_exit(
        &self,
        entry: &mut OperationEntry,
        reason: ExitReason,
        alert_id: Option<Uuid>,
    ) {
        let config = self.config.active().await;
        let policy = RetryPolicy {
            max_attempts: config.exit.max_exit_attempts.max(1),
            delay: Duration::from_millis(config.exit.retry_delay_ms),
            attempt_timeout: Duration::from_millis(config.exit.attempt_timeout_ms.max(1)),
            max_finished: config.exit.max_finished,
        };

        let record = &mut entry.record;
        let id = record.id();
        record.status = OperationStatus::Exiting;
        record.last_exit_reason = Some(reason.clone());
        record.updated_at = Utc::now();

        let action = SafetyAction::force_exit(id, alert_id, reason.to_string());
        let action_id = action.id;
        self.worker.actions.write().await.push_back(action);
        self.worker.trim_actions(policy.max_finished).await;

        warn!(
            operation = %id,
            symbol = %record.registration.symbol,
            reason = %reason,
            "Exiting operation"
        );
        self.worker
            .publish_change(record, OperationStatus::Active, Some(reason.to_string()));

        let params = ExitParams {
            symbol: record.registration.symbol.clone(),
            side: record.registration.side,
            quantity: record.registration.quantity,
            reference_price: record.mark_price,
            reason: reason.to_string(),
        };
        let worker = self.worker.clone();
        let cancel = entry.cancel.subscribe();

        let mut tasks = self.tasks.lock().await;
        while tasks.try_join_next().is_some() {}
        tasks.spawn(async move {
            worker.execute(id, action_id, params, cancel, policy).await;
        });
    }
}

impl ExitWorker {
    async fn execute(
        &self,
        id: Uuid,
        action_id: Uuid,
        params: ExitParams,
        mut cancel: watch::Receiver<bool>,
        policy: RetryPolicy,
    ) {
        let mut last_error = String::new();

        for attempt in 1..=policy.max_attempts {
            let is_cancelled = *cancel.borrow();
            if is_cancelled {
                self.cancelled(id, action_id, attempt - 1).await;
                return;
            }

            debug!(operation = %id, attempt, "Placing exit");
            match self.attempt(id, &params, &mut cancel, policy).await {
                AttemptOutcome::Filled(fill_price) => {
                    info!(operation = %id, attempt, fill_price = ?fill_price, "Exit filled");
                    self.finish(id, action_id, OperationStatus::Closed, attempt, None, &cancel, policy)
                        .await;
                    return;
                }
                AttemptOutcome::Cancelled => {
                    self.cancelled(id, action_id, attempt).await;
                    return;
                }
                AttemptOutcome::Failed(error) => last_error = error,
            }

            warn!(
                operation = %id,
                attempt,
                max_attempts = policy.max_attempts,
                error = %last_error,
                "Exit attempt failed"
            );
            self.record_attempt(id, attempt, &last_error).await;

            if attempt < policy.max_attempts {
                tokio::select! {
                    _ = tokio::time::sleep(policy.delay) => {}
                    _ = wait_cancelled(&mut cancel) => {}
                }
            }
        }

        let reason = SafetyError::ExecutionFailed {
            operation_id: id.to_string(),
            reason: format!("{} attempts exhausted: {last_error}", policy.max_attempts),
        }
        .to_string();
        error!(operation = %id, error = %reason, "Exit failed");
        self.finish(
            id,
            action_id,
            OperationStatus::Error,
            policy.max_attempts,
            Some(reason),
            &cancel,
            policy,
        )
        .await;
    }

    /// One `place_exit` call, bounded by the attempt timeout and abandoned on
    /// deregistration.
    async fn attempt(
        &self,
        id: Uuid,
        params: &ExitParams,
        cancel: &mut watch::Receiver<bool>,
        policy: RetryPolicy,
    ) -> AttemptOutcome {
        let call = tokio::time::timeout(policy.attempt_timeout, self.execution.place_exit(id, params));
        tokio::select! {
            biased;
            _ = wait_cancelled(cancel) => AttemptOutcome::Cancelled,
            outcome = call => match outcome {
                Ok(Ok(result)) if result.success => AttemptOutcome::Filled(result.fill_price),
                Ok(Ok(result)) => AttemptOutcome::Failed(
                    result.message.unwrap_or_else(|| "exit rejected".to_string()),
                ),
                Ok(Err(e)) => AttemptOutcome::Failed(e.to_string()),
                Err(_) => AttemptOutcome::Failed(
                    SafetyError::Timeout {
                        operation: "place_exit".to_string(),
                        timeout_ms: u64::try_from(policy.attempt_timeout.as_millis()).unwrap_or(u64::MAX),
                    }
                    .to_string(),
                ),
            },
        }
    }

    async fn cancelled(&self, id: Uuid, action_id: Uuid, attempts: u32) {
        info!(operation = %id, attempts, "Exit cancelled");
        self.settle_action(action_id, ActionOutcome::Failed, attempts, Some("cancelled".to_string()))
            .await;
    }

    async fn record_attempt(&self, id: Uuid, attempt: u32, error: &str) {
        let entry = self.operations.read().await.get(&id).cloned();
        if let Some(entry) = entry {
            let mut entry = entry.lock().await;
            entry.record.attempts = attempt;
            entry.record.last_error = Some(error.to_string());
            entry.record.updated_at = Utc::now();
        }
    }

    /// Moves the operation out of `exiting` and out of the live registry.
    #[allow(clippy::too_many_arguments)]
    async fn finish(
        &self,
        id: Uuid,
        action_id: Uuid,
        to: OperationStatus,
        attempts: u32,
        error: Option<String>,
        cancel: &watch::Receiver<bool>,
        policy: RetryPolicy,
    ) {
        let outcome = if to == OperationStatus::Closed {
            ActionOutcome::Applied
        } else {
            ActionOutcome::Failed
        };
        self.settle_action(action_id, outcome, attempts, error.clone()).await;

        let entry = self.operations.read().await.get(&id).cloned();
        let Some(entry) = entry else {
            // Deregistered while the exit was in flight.
            return;
        };

        let record = {
            let mut entry = entry.lock().await;
            let is_cancelled = *cancel.borrow();
            if is_cancelled {
                return;
            }
            let now = Utc::now();
            entry.record.status = to;
            entry.record.attempts = attempts;
            entry.record.last_error = error.clone();
            entry.record.updated_at = now;
            entry.record.finished_at = Some(now);
            self.operations.write().await.remove(&id);
            entry.record.clone()
        };

        self.remember(record.clone(), policy.max_finished).await;
        let reason = error.or_else(|| record.last_exit_reason.as_ref().map(ToString::to_string));
        self.publish_change(&record, OperationStatus::Exiting, reason);
    }

    async fn settle_action(
        &self,
        action_id: Uuid,
        outcome: ActionOutcome,
        attempts: u32,
        error: Option<String>,
    ) {
        let mut actions = self.actions.write().await;
        if let Some(action) = actions.iter_mut().find(|a| a.id == action_id) {
            action.outcome = outcome;
            action.attempts = attempts;
            action.error = error;
            action.updated_at = Utc::now();
        }
    }

    async fn remember(&self, record: OperationRecord, max_finished: usize) {
        let mut finished = self.finished.write().await;
        finished.push_back(record);
        while finished.len() > max_finished {
            finished.pop_front();
        }
    }

    /// Drops the oldest settled actions beyond the retention bound.
    async fn trim_actions(&self, max: usize) {
        let mut actions = self.actions.write().await;
        while actions.len() > max {
            match actions.iter().position(|a| a.outcome != ActionOutcome::Pending) {
                Some(index) => {
                    actions.remove(index);
                }
                None => break,
            }
        }
    }

    fn publish_change(&self, record: &OperationRecord, from: OperationStatus, reason: Option<String>) {
        if let Some(bus) = &self.bus {
            bus.publish(SafetyEvent::OperationStateChanged(OperationStateChange {
                operation_id: record.id(),
                symbol: record.registration.symbol.clone(),
                from,
                to: record.status,
                reason,
                at: record.updated_at,
            }));
        }
    }
}

/// Resolves once the operation is deregistered, or its entry is gone.
async fn wait_cancelled(cancel: &mut watch::Receiver<bool>) {
    let _ = cancel.wait_for(|cancelled| *cancelled).await;
}

#[async_trait]
impl EventHandler for AutoExitManager {
    async fn handle(&self, event: SafetyEvent) -> anyhow::Result<()> {
        match event {
            SafetyEvent::RiskAssessed(assessment) => self.on_assessment(&assessment).await,
            SafetyEvent::AlertRaised(alert) => self.on_alert(&alert).await,
            _ => {}
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerts::{AlertKey, AlertManager};
    use crate::config::SafetyConfiguration;
    use crate::events::EventKind;
    use crate::testing::{
        HangingExecution, RecordingNotifier, ScriptedExecution, assessment_with_drawdown,
        eventually,
    };
    use rust_decimal_macros::dec;
    use safeguard_domain::enums::{AlertSeverity, BreachCondition, PositionSide, RiskDimension};

    fn config(max_attempts: u32, retry_delay_ms: u64) -> Arc<ConfigurationManager> {
        timed_config(max_attempts, retry_delay_ms, 5_000)
    }

    fn timed_config(
        max_attempts: u32,
        retry_delay_ms: u64,
        attempt_timeout_ms: u64,
    ) -> Arc<ConfigurationManager> {
        let mut config = SafetyConfiguration::default();
        config.exit.max_exit_attempts = max_attempts;
        config.exit.retry_delay_ms = retry_delay_ms;
        config.exit.attempt_timeout_ms = attempt_timeout_ms;
        Arc::new(ConfigurationManager::new(config).unwrap())
    }

    fn btc() -> OperationRegistration {
        OperationRegistration::new("BTC-USD", PositionSide::Long, dec!(0.5), dec!(60000))
    }

    #[tokio::test]
    async fn test_critical_assessment_exits_high_does_not() {
        let execution = Arc::new(ScriptedExecution::default());
        let manager = AutoExitManager::new(config(3, 10), execution.clone());
        let op = manager.register(btc()).await.unwrap();

        manager.on_assessment(&assessment_with_drawdown(1, dec!(6))).await;
        manager.drain().await;
        assert_eq!(execution.attempts(), 0);
        assert_eq!(manager.status(op.id()).await.unwrap().status, OperationStatus::Active);

        manager.on_assessment(&assessment_with_drawdown(2, dec!(12))).await;
        manager.drain().await;
        assert_eq!(execution.attempts(), 1);

        let record = manager.status(op.id()).await.unwrap();
        assert_eq!(record.status, OperationStatus::Closed);
        assert!(matches!(
            record.last_exit_reason,
            Some(ExitReason::RiskLevel { level: RiskLevel::Critical, .. })
        ));
        assert!(manager.list().await.is_empty());

        let actions = manager.actions().await;
        assert_eq!(actions.len(), 1);
        assert_eq!(actions[0].outcome, ActionOutcome::Applied);
        assert_eq!(actions[0].attempts, 1);
    }

    #[tokio::test]
    async fn test_repeated_triggers_start_one_exit_sequence() {
        let execution = Arc::new(ScriptedExecution::failing(1));
        let manager = AutoExitManager::new(config(3, 30), execution.clone());
        manager.register(btc()).await.unwrap();

        for tick in 0..4 {
            manager.on_assessment(&assessment_with_drawdown(tick, dec!(15))).await;
        }
        manager.drain().await;

        assert_eq!(execution.attempts(), 2);
        assert_eq!(manager.actions().await.len(), 1);
    }

    #[tokio::test]
    async fn test_retries_then_closes_within_bound() {
        let execution = Arc::new(ScriptedExecution::failing(2));
        let manager = AutoExitManager::new(config(3, 10), execution.clone());
        let op = manager.register(btc()).await.unwrap();

        manager.on_assessment(&assessment_with_drawdown(1, dec!(12))).await;
        manager.drain().await;

        let record = manager.status(op.id()).await.unwrap();
        assert_eq!(record.status, OperationStatus::Closed);
        assert_eq!(record.attempts, 3);
        assert_eq!(execution.attempts(), 3);
    }

    #[tokio::test]
    async fn test_exhausted_exit_moves_to_error_and_raises_emergency_alert() {
        let config = config(2, 10);
        let bus = Arc::new(EventBus::default());
        let notifier = Arc::new(RecordingNotifier::default());
        let alerts = Arc::new(
            AlertManager::new(config.clone())
                .with_bus(bus.clone())
                .with_notifier(notifier.clone()),
        );
        bus.subscribe_arc("alerts", &[EventKind::OperationStateChanged], alerts.clone());
        let (_, mut changes) = bus.subscribe_channel("test", &[EventKind::OperationStateChanged]);

        let execution = Arc::new(ScriptedExecution::failing(5));
        let manager = AutoExitManager::new(config, execution.clone()).with_bus(bus.clone());
        let op = manager.register(btc()).await.unwrap();

        manager.on_assessment(&assessment_with_drawdown(1, dec!(12))).await;
        manager.drain().await;

        assert_eq!(execution.attempts(), 2);
        let record = manager.status(op.id()).await.unwrap();
        assert_eq!(record.status, OperationStatus::Error);
        assert!(record.last_error.unwrap().contains("venue rejected exit"));
        assert_eq!(manager.actions().await[0].outcome, ActionOutcome::Failed);

        let mut seen = Vec::new();
        for _ in 0..2 {
            if let Some(SafetyEvent::OperationStateChanged(change)) = changes.recv().await {
                seen.push((change.from, change.to));
            }
        }
        assert_eq!(
            seen,
            vec![
                (OperationStatus::Active, OperationStatus::Exiting),
                (OperationStatus::Exiting, OperationStatus::Error),
            ]
        );

        assert!(
            eventually(|| {
                let notifier = notifier.clone();
                async move { !notifier.delivered().await.is_empty() }
            })
            .await
        );
        let delivered = notifier.delivered().await;
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].severity, AlertSeverity::Emergency);
        assert_eq!(delivered[0].key.scope, Some(op.id().to_string()));
    }

    #[tokio::test]
    async fn test_duplicate_and_unknown_operations() {
        let manager = AutoExitManager::new(config(3, 10), Arc::new(ScriptedExecution::default()));
        let reg = btc();
        manager.register(reg.clone()).await.unwrap();

        assert!(matches!(
            manager.register(reg).await,
            Err(SafetyError::Duplicate { kind: "operation", .. })
        ));
        assert!(matches!(
            manager.deregister(Uuid::new_v4()).await,
            Err(SafetyError::NotFound { kind: "operation", .. })
        ));
        assert!(matches!(
            manager
                .register(OperationRegistration::new("", PositionSide::Long, dec!(1), dec!(1)))
                .await,
            Err(SafetyError::InvalidConfiguration(_))
        ));
    }

    #[tokio::test]
    async fn test_deregister_cancels_pending_retries() {
        let execution = Arc::new(ScriptedExecution::failing(10));
        let manager = AutoExitManager::new(config(5, 200), execution.clone());
        let op = manager.register(btc()).await.unwrap();

        manager.on_assessment(&assessment_with_drawdown(1, dec!(12))).await;
        assert!(
            eventually(|| {
                let execution = execution.clone();
                async move { execution.attempts() == 1 }
            })
            .await
        );

        let record = manager.deregister(op.id()).await.unwrap();
        assert_eq!(record.status, OperationStatus::Closed);
        manager.drain().await;

        assert_eq!(execution.attempts(), 1);
        let action = &manager.actions().await[0];
        assert_eq!(action.outcome, ActionOutcome::Failed);
        assert_eq!(action.error.as_deref(), Some("cancelled"));
        assert_eq!(manager.status(op.id()).await.unwrap().status, OperationStatus::Closed);
    }

    #[tokio::test]
    async fn test_stop_loss_from_assessed_prices() {
        let execution = Arc::new(ScriptedExecution::default());
        let manager = AutoExitManager::new(config(3, 10), execution.clone());
        let op = manager
            .register(btc().with_stop_price(dec!(58000)))
            .await
            .unwrap();

        let mut assessment = assessment_with_drawdown(1, dec!(0));
        assessment.prices.insert("BTC-USD".to_string(), dec!(59000));
        manager.on_assessment(&assessment).await;
        manager.drain().await;
        assert_eq!(execution.attempts(), 0);
        assert_eq!(manager.status(op.id()).await.unwrap().mark_price, Some(dec!(59000)));

        assessment.prices.insert("BTC-USD".to_string(), dec!(57900));
        manager.on_assessment(&assessment).await;
        manager.drain().await;

        let record = manager.status(op.id()).await.unwrap();
        assert_eq!(record.status, OperationStatus::Closed);
        assert!(matches!(record.last_exit_reason, Some(ExitReason::StopLoss { .. })));
    }

    #[tokio::test]
    async fn test_scoped_alert_exits_only_its_operation() {
        let execution = Arc::new(ScriptedExecution::default());
        let manager = AutoExitManager::new(config(3, 10), execution.clone());
        let first = manager.register(btc()).await.unwrap();
        let second = manager.register(btc()).await.unwrap();

        let alert = SafetyAlert::new(
            AlertKey::new(
                RiskDimension::Portfolio,
                BreachCondition::ExitFailed,
                Some(first.id().to_string()),
            ),
            AlertSeverity::Emergency,
            "scoped".to_string(),
            None,
        );
        manager.on_alert(&alert).await;
        manager.drain().await;

        assert_eq!(manager.status(first.id()).await.unwrap().status, OperationStatus::Closed);
        assert_eq!(manager.status(second.id()).await.unwrap().status, OperationStatus::Active);

        let warning = SafetyAlert::new(
            AlertKey::new(RiskDimension::Portfolio, BreachCondition::Drawdown, None),
            AlertSeverity::Warning,
            "minor".to_string(),
            None,
        );
        manager.on_alert(&warning).await;
        manager.drain().await;
        assert_eq!(manager.status(second.id()).await.unwrap().status, OperationStatus::Active);
        assert_eq!(manager.actions().await[0].alert_id, Some(alert.id));
    }

    #[tokio::test]
    async fn test_hanging_venue_times_out_each_attempt_and_fails() {
        let execution = Arc::new(HangingExecution::default());
        let manager = AutoExitManager::new(timed_config(2, 10, 50), execution.clone());
        let op = manager.register(btc()).await.unwrap();

        manager.on_assessment(&assessment_with_drawdown(1, dec!(12))).await;
        tokio::time::timeout(Duration::from_secs(2), manager.drain())
            .await
            .expect("exit sequence bounded by attempt timeout");

        assert_eq!(execution.attempts(), 2);
        let record = manager.status(op.id()).await.unwrap();
        assert_eq!(record.status, OperationStatus::Error);
        assert_eq!(record.attempts, 2);
        assert!(record.last_error.unwrap().contains("place_exit timed out after 50ms"));
        assert_eq!(manager.actions().await[0].outcome, ActionOutcome::Failed);
    }

    #[tokio::test]
    async fn test_deregister_abandons_in_flight_exit() {
        let execution = Arc::new(HangingExecution::default());
        let manager = AutoExitManager::new(timed_config(3, 10, 30_000), execution.clone());
        let op = manager.register(btc()).await.unwrap();

        manager.on_assessment(&assessment_with_drawdown(1, dec!(12))).await;
        assert!(
            eventually(|| {
                let execution = execution.clone();
                async move { execution.attempts() == 1 }
            })
            .await
        );

        manager.deregister(op.id()).await.unwrap();
        tokio::time::timeout(Duration::from_secs(2), manager.drain())
            .await
            .expect("in-flight exit abandoned on deregistration");

        assert_eq!(execution.attempts(), 1);
        let action = &manager.actions().await[0];
        assert_eq!(action.outcome, ActionOutcome::Failed);
        assert_eq!(action.error.as_deref(), Some("cancelled"));
        assert_eq!(action.attempts, 1);
        assert_eq!(manager.status(op.id()).await.unwrap().status, OperationStatus::Closed);
    }
}
