//! Composition root: builds one instance of every component and wires the
//! bus subscriptions between them.

use crate::alerts::{AlertFilter, AlertManager, AlertStatistics, SafetyAlert};
use crate::config::{
    ConfigurationManager, ConfigurationUpdate, SafetyConfiguration, ValidationLimits,
    ValidationResult,
};
use crate::events::{EventBus, EventBusConfig, EventBusStats, EventKind};
use crate::exit::{AutoExitManager, OperationRecord, OperationRegistration, SafetyAction};
use crate::monitor::{MonitoringLoop, MonitoringStats};
use crate::notify::{LogNotifier, Notifier};
use crate::providers::{ExecutionClient, HealthProvider, MarketDataProvider};
use crate::risk::ComprehensiveRiskAssessment;
use crate::store::SafetyStore;
use safeguard_domain::SafetyResult;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// Builder for [`SafetySystem`].
pub struct SafetySystemBuilder {
    market: Arc<dyn MarketDataProvider>,
    health: Arc<dyn HealthProvider>,
    execution: Arc<dyn ExecutionClient>,
    store: Option<Arc<dyn SafetyStore>>,
    notifier: Option<Arc<dyn Notifier>>,
    configuration: SafetyConfiguration,
    limits: ValidationLimits,
    bus_config: EventBusConfig,
}

impl SafetySystemBuilder {
    /// Persists the configuration and alert history through `store`.
    #[must_use]
    pub fn store(mut self, store: Arc<dyn SafetyStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Defaults to [`LogNotifier`].
    #[must_use]
    pub fn notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Initial configuration, used when nothing valid is persisted.
    #[must_use]
    pub fn configuration(mut self, configuration: SafetyConfiguration) -> Self {
        self.configuration = configuration;
        self
    }

    /// Validation bounds for every configuration install.
    #[must_use]
    pub fn limits(mut self, limits: ValidationLimits) -> Self {
        self.limits = limits;
        self
    }

    #[must_use]
    pub fn bus_config(mut self, bus_config: EventBusConfig) -> Self {
        self.bus_config = bus_config;
        self
    }

    /// Constructs and wires the components.
    ///
    /// Must be called from within a tokio runtime. A persisted configuration
    /// that fails to load is logged and the initial configuration is kept.
    pub async fn build(self) -> anyhow::Result<SafetySystem> {
        let bus = Arc::new(EventBus::new(self.bus_config));

        let mut config = ConfigurationManager::with_limits(self.configuration, self.limits)?
            .with_bus(bus.clone());
        if let Some(store) = &self.store {
            config = config.with_store(store.clone());
        }
        let config = Arc::new(config);
        match config.load_persisted().await {
            Ok(true) => {}
            Ok(false) => {
                if self.store.is_some() {
                    info!("Starting with the initial configuration");
                }
            }
            Err(e) => warn!(error = %e, "Failed to load persisted configuration"),
        }

        let mut alerts = AlertManager::new(config.clone())
            .with_bus(bus.clone())
            .with_notifier(self.notifier.unwrap_or_else(|| Arc::new(LogNotifier)));
        if let Some(store) = &self.store {
            alerts = alerts.with_store(store.clone());
        }
        let alerts = Arc::new(alerts);
        bus.subscribe_arc(
            "alert-manager",
            &[EventKind::RiskAssessed, EventKind::OperationStateChanged],
            alerts.clone(),
        );

        let exits = Arc::new(
            AutoExitManager::new(config.clone(), self.execution).with_bus(bus.clone()),
        );
        bus.subscribe_arc(
            "auto-exit",
            &[EventKind::RiskAssessed, EventKind::AlertRaised],
            exits.clone(),
        );

        let monitor = MonitoringLoop::new(config.clone(), bus.clone(), self.market, self.health);

        let active = config.active().await;
        info!(
            configuration = %active.name,
            version = active.version,
            "Safety system ready"
        );

        Ok(SafetySystem {
            config,
            bus,
            monitor,
            alerts,
            exits,
        })
    }
}

/// The assembled safety engine.
pub struct SafetySystem {
    config: Arc<ConfigurationManager>,
    bus: Arc<EventBus>,
    monitor: MonitoringLoop,
    alerts: Arc<AlertManager>,
    exits: Arc<AutoExitManager>,
}

impl SafetySystem {
    /// Starts building a system around the three collaborators.
    pub fn builder(
        market: Arc<dyn MarketDataProvider>,
        health: Arc<dyn HealthProvider>,
        execution: Arc<dyn ExecutionClient>,
    ) -> SafetySystemBuilder {
        SafetySystemBuilder {
            market,
            health,
            execution,
            store: None,
            notifier: None,
            configuration: SafetyConfiguration::default(),
            limits: ValidationLimits::default(),
            bus_config: EventBusConfig::default(),
        }
    }

    /// The shared event bus.
    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    // Monitoring

    /// Starts the monitoring loop.
    pub async fn start(&self) {
        self.monitor.start().await;
    }

    /// Stops the monitoring loop. Exits already in flight keep running.
    pub async fn stop(&self) {
        self.monitor.stop().await;
    }

    /// Monitoring loop state and counters.
    pub async fn status(&self) -> MonitoringStats {
        self.monitor.status().await
    }

    /// Runs one tick immediately, even when monitoring is disabled.
    pub async fn run_once(&self) -> Arc<ComprehensiveRiskAssessment> {
        self.monitor.run_once().await
    }

    /// Most recent merged assessment.
    pub async fn latest_assessment(&self) -> Option<Arc<ComprehensiveRiskAssessment>> {
        self.monitor.latest().await
    }

    /// Retained assessments, oldest first.
    pub async fn risk_history(&self) -> Vec<Arc<ComprehensiveRiskAssessment>> {
        self.monitor.history().await
    }

    // Alerts

    /// Alerts matching `filter`, newest first.
    pub async fn list_alerts(&self, filter: &AlertFilter) -> Vec<SafetyAlert> {
        self.alerts.list(filter).await
    }

    /// One alert by id.
    pub async fn get_alert(&self, id: Uuid) -> SafetyResult<SafetyAlert> {
        self.alerts.get(id).await
    }

    /// Alert counts by status and severity.
    pub async fn alert_statistics(&self) -> AlertStatistics {
        self.alerts.statistics().await
    }

    /// Acknowledges an open alert.
    pub async fn acknowledge(&self, id: Uuid) -> SafetyResult<SafetyAlert> {
        self.alerts.acknowledge(id).await
    }

    /// Resolves an open or acknowledged alert.
    pub async fn resolve(&self, id: Uuid, reason: impl Into<String>) -> SafetyResult<SafetyAlert> {
        self.alerts.resolve(id, reason).await
    }

    // Configuration

    /// The active configuration.
    pub async fn configuration(&self) -> Arc<SafetyConfiguration> {
        self.config.active().await
    }

    /// Applies a validated partial update.
    pub async fn update_configuration(
        &self,
        update: ConfigurationUpdate,
    ) -> SafetyResult<Arc<SafetyConfiguration>> {
        self.config.apply(update).await
    }

    /// Checks an update without applying it.
    pub async fn validate_configuration(&self, update: &ConfigurationUpdate) -> ValidationResult {
        self.config.validate_update(update).await
    }

    /// Registered presets by name.
    pub async fn presets(&self) -> Vec<Arc<SafetyConfiguration>> {
        self.config.list_presets().await
    }

    /// Adds a named preset.
    pub async fn register_preset(&self, preset: SafetyConfiguration) -> SafetyResult<()> {
        self.config.register_preset(preset).await
    }

    /// Makes a preset the active configuration.
    pub async fn activate_preset(&self, name: &str) -> SafetyResult<Arc<SafetyConfiguration>> {
        self.config.activate_preset(name).await
    }

    // Operations

    /// Puts an operation under auto-exit supervision.
    pub async fn register_operation(
        &self,
        registration: OperationRegistration,
    ) -> SafetyResult<OperationRecord> {
        self.exits.register(registration).await
    }

    /// Removes an operation from supervision, cancelling any exit in flight.
    pub async fn deregister_operation(&self, id: Uuid) -> SafetyResult<OperationRecord> {
        self.exits.deregister(id).await
    }

    /// Live or finished record of an operation.
    pub async fn operation_status(&self, id: Uuid) -> SafetyResult<OperationRecord> {
        self.exits.status(id).await
    }

    /// Operations under supervision.
    pub async fn operations(&self) -> Vec<OperationRecord> {
        self.exits.list().await
    }

    /// Recently finished operations.
    pub async fn finished_operations(&self) -> Vec<OperationRecord> {
        self.exits.finished().await
    }

    /// Protective actions taken, oldest first.
    pub async fn actions(&self) -> Vec<SafetyAction> {
        self.exits.actions().await
    }

    pub fn bus_stats(&self) -> EventBusStats {
        self.bus.stats()
    }

    /// Stops monitoring, waits for in-flight exits, then flushes queued alert
    /// history and notifications.
    pub async fn shutdown(&self) {
        self.monitor.stop().await;
        self.exits.drain().await;
        self.alerts.flush().await;
        info!("Safety system shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::events::SafetyEvent;
    use crate::testing::{
        HangingNotifier, RecordingNotifier, ScriptedExecution, ScriptedMarket, StaticHealth,
        eventually,
    };
    use std::time::Duration;
    use rust_decimal_macros::dec;
    use safeguard_domain::SafetyError;
    use safeguard_domain::enums::{
        AlertSeverity, AlertStatus, OperationStatus, PositionSide, RiskLevel,
    };

    struct Harness {
        system: SafetySystem,
        market: Arc<ScriptedMarket>,
        execution: Arc<ScriptedExecution>,
        notifier: Arc<RecordingNotifier>,
    }

    async fn harness(failures: u32, max_attempts: u32) -> Harness {
        let market = Arc::new(ScriptedMarket::default());
        let execution = Arc::new(ScriptedExecution::failing(failures));
        let notifier = Arc::new(RecordingNotifier::default());
        let mut configuration = SafetyConfiguration::default();
        configuration.exit.max_exit_attempts = max_attempts;
        configuration.exit.retry_delay_ms = 10;

        let system = SafetySystem::builder(
            market.clone(),
            Arc::new(StaticHealth::default()),
            execution.clone(),
        )
        .notifier(notifier.clone())
        .configuration(configuration)
        .build()
        .await
        .unwrap();

        Harness {
            system,
            market,
            execution,
            notifier,
        }
    }

    fn btc() -> OperationRegistration {
        OperationRegistration::new("BTC-USD", PositionSide::Long, dec!(0.5), dec!(60000))
    }

    async fn wait_for_status(system: &SafetySystem, id: Uuid, status: OperationStatus) -> bool {
        eventually(|| async move {
            system
                .operation_status(id)
                .await
                .is_ok_and(|r| r.status == status)
        })
        .await
    }

    #[tokio::test]
    async fn test_drawdown_tick_alerts_and_exits() {
        let h = harness(0, 3).await;
        let op = h.system.register_operation(btc()).await.unwrap();

        h.market.set_drawdown(dec!(6)).await;
        let assessment = h.system.run_once().await;
        assert_eq!(assessment.overall_level, RiskLevel::High);

        h.market.set_drawdown(dec!(12)).await;
        let assessment = h.system.run_once().await;
        assert_eq!(assessment.overall_level, RiskLevel::Critical);

        assert!(wait_for_status(&h.system, op.id(), OperationStatus::Closed).await);
        h.system.shutdown().await;

        assert_eq!(h.execution.attempts(), 1);
        assert!(h.system.operations().await.is_empty());

        let system = &h.system;
        assert!(
            eventually(|| async move {
                let alerts = system.list_alerts(&AlertFilter::default()).await;
                alerts.len() == 1 && alerts[0].severity == AlertSeverity::Critical
            })
            .await
        );
        assert_eq!(h.system.risk_history().await.len(), 2);
    }

    #[tokio::test]
    async fn test_exit_retries_within_bound_raise_no_emergency() {
        let h = harness(2, 3).await;
        let op = h.system.register_operation(btc()).await.unwrap();

        h.market.set_drawdown(dec!(12)).await;
        h.system.run_once().await;

        assert!(wait_for_status(&h.system, op.id(), OperationStatus::Closed).await);
        h.system.shutdown().await;

        assert_eq!(h.execution.attempts(), 3);
        let emergencies = h
            .system
            .list_alerts(&AlertFilter {
                severity: Some(AlertSeverity::Emergency),
                ..Default::default()
            })
            .await;
        assert!(emergencies.is_empty());
    }

    #[tokio::test]
    async fn test_exhausted_exit_raises_one_emergency_alert() {
        let h = harness(2, 2).await;
        let op = h.system.register_operation(btc()).await.unwrap();

        h.market.set_drawdown(dec!(12)).await;
        h.system.run_once().await;

        assert!(wait_for_status(&h.system, op.id(), OperationStatus::Error).await);
        let filter = AlertFilter {
            severity: Some(AlertSeverity::Emergency),
            ..Default::default()
        };
        assert!(
            eventually(|| {
                let filter = filter.clone();
                let system = &h.system;
                async move { system.list_alerts(&filter).await.len() == 1 }
            })
            .await
        );
        h.system.shutdown().await;

        assert_eq!(h.execution.attempts(), 2);
        let delivered = h.notifier.delivered().await;
        assert_eq!(
            delivered
                .iter()
                .filter(|a| a.severity == AlertSeverity::Emergency)
                .count(),
            1
        );
        let actions = h.system.actions().await;
        assert_eq!(actions.len(), 1);
    }

    #[tokio::test]
    async fn test_invalid_update_leaves_configuration_unchanged() {
        let h = harness(0, 3).await;
        let before = h.system.configuration().await;

        let mut exit = before.exit.clone();
        exit.max_exit_attempts = 0;
        let update = ConfigurationUpdate {
            exit: Some(exit),
            ..Default::default()
        };
        assert!(!h.system.validate_configuration(&update).await.valid);
        assert!(matches!(
            h.system.update_configuration(update).await,
            Err(SafetyError::InvalidConfiguration(_))
        ));
        assert_eq!(h.system.configuration().await, before);
    }

    #[tokio::test]
    async fn test_activated_preset_survives_restart() {
        let store = Arc::new(MemoryStore::default());
        let build = || {
            SafetySystem::builder(
                Arc::new(ScriptedMarket::default()),
                Arc::new(StaticHealth::default()),
                Arc::new(ScriptedExecution::default()),
            )
            .store(store.clone())
            .build()
        };

        let first = build().await.unwrap();
        first.activate_preset("conservative").await.unwrap();

        let second = build().await.unwrap();
        assert_eq!(second.configuration().await.name, "conservative");
    }

    #[tokio::test]
    async fn test_stalled_notifier_does_not_stall_monitoring() {
        let market = Arc::new(ScriptedMarket::default());
        let notifier = Arc::new(HangingNotifier::default());
        let mut configuration = SafetyConfiguration::default();
        configuration.alerts.delivery_timeout_ms = 50;
        let system = SafetySystem::builder(
            market.clone(),
            Arc::new(StaticHealth::default()),
            Arc::new(ScriptedExecution::default()),
        )
        .notifier(notifier.clone())
        .configuration(configuration)
        .build()
        .await
        .unwrap();
        let (_, mut raised) = system
            .bus()
            .subscribe_channel("test", &[EventKind::AlertRaised]);

        market.set_drawdown(dec!(12)).await;
        system.run_once().await;
        assert!(matches!(
            tokio::time::timeout(Duration::from_millis(500), raised.recv()).await,
            Ok(Some(SafetyEvent::AlertRaised(_)))
        ));

        market.set_drawdown(dec!(0)).await;
        system.run_once().await;
        let system_ref = &system;
        assert!(
            eventually(|| async move {
                let alerts = system_ref.list_alerts(&AlertFilter::default()).await;
                alerts.len() == 1 && alerts[0].status == AlertStatus::Resolved
            })
            .await
        );

        tokio::time::timeout(Duration::from_secs(2), system.shutdown())
            .await
            .expect("shutdown bounded by the delivery timeout");
    }
}
