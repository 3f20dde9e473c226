//! The safety configuration and its partial updates.

use super::SafetyThresholds;
use safeguard_domain::enums::{AlertSeverity, RiskLevel};
use safeguard_domain::{SafetyError, SafetyResult};
use serde::{Deserialize, Serialize};

/// Settings for the periodic monitoring loop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitoringSettings {
    /// Tick interval.
    pub interval_ms: u64,
    /// Bound applied to every snapshot call.
    pub snapshot_timeout_ms: u64,
    /// Number of merged assessments kept for trend display.
    pub history_size: usize,
    /// When false the loop keeps its schedule but skips assessment.
    pub enabled: bool,
}

impl Default for MonitoringSettings {
    fn default() -> Self {
        Self {
            interval_ms: 10_000,
            snapshot_timeout_ms: 2_000,
            history_size: 120,
            enabled: true,
        }
    }
}

/// Maps a breached risk level to an alert severity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeverityMap {
    pub elevated: AlertSeverity,
    pub high: AlertSeverity,
    pub critical: AlertSeverity,
}

impl Default for SeverityMap {
    fn default() -> Self {
        Self {
            elevated: AlertSeverity::Info,
            high: AlertSeverity::Warning,
            critical: AlertSeverity::Critical,
        }
    }
}

impl SeverityMap {
    /// Returns `None` for `Normal`.
    pub fn for_level(&self, level: RiskLevel) -> Option<AlertSeverity> {
        match level {
            RiskLevel::Normal => None,
            RiskLevel::Elevated => Some(self.elevated),
            RiskLevel::High => Some(self.high),
            RiskLevel::Critical => Some(self.critical),
        }
    }
}

/// Settings for alert management.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertSettings {
    pub severity_map: SeverityMap,
    /// Breaches mapping below this severity do not raise alerts.
    pub min_severity: AlertSeverity,
    /// Resolve unresolved alerts once their condition stops breaching.
    pub auto_resolve_on_clear: bool,
    /// Resolved alerts kept in memory.
    pub max_history: usize,
    /// Bound on each notification and history append.
    #[serde(default = "default_delivery_timeout_ms")]
    pub delivery_timeout_ms: u64,
}

impl Default for AlertSettings {
    fn default() -> Self {
        Self {
            severity_map: SeverityMap::default(),
            min_severity: AlertSeverity::Warning,
            auto_resolve_on_clear: true,
            max_history: 1_000,
            delivery_timeout_ms: default_delivery_timeout_ms(),
        }
    }
}

fn default_delivery_timeout_ms() -> u64 {
    2_000
}

/// Settings for the auto-exit manager.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExitSettings {
    /// Overall risk level at which registered operations are exited.
    pub exit_level: RiskLevel,
    /// Alerts at or above this severity trigger re-evaluation into exit.
    pub alert_exit_severity: AlertSeverity,
    /// Total `place_exit` attempts before an operation moves to `error`.
    pub max_exit_attempts: u32,
    pub retry_delay_ms: u64,
    /// Bound on a single `place_exit` call. A timeout counts as a failed attempt.
    #[serde(default = "default_attempt_timeout_ms")]
    pub attempt_timeout_ms: u64,
    /// Finished operation records kept for status queries.
    pub max_finished: usize,
}

impl Default for ExitSettings {
    fn default() -> Self {
        Self {
            exit_level: RiskLevel::Critical,
            alert_exit_severity: AlertSeverity::Critical,
            max_exit_attempts: 3,
            retry_delay_ms: 500,
            attempt_timeout_ms: default_attempt_timeout_ms(),
            max_finished: 256,
        }
    }
}

fn default_attempt_timeout_ms() -> u64 {
    5_000
}

/// The complete set of safety settings. Exactly one is active at a time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SafetyConfiguration {
    pub name: String,
    /// Assigned by the configuration manager on install.
    #[serde(default)]
    pub version: u64,
    pub thresholds: SafetyThresholds,
    pub monitoring: MonitoringSettings,
    pub alerts: AlertSettings,
    pub exit: ExitSettings,
    /// Level reported by a dimension whose input could not be obtained.
    pub degraded_level: RiskLevel,
}

impl Default for SafetyConfiguration {
    fn default() -> Self {
        Self {
            name: "balanced".to_string(),
            version: 0,
            thresholds: SafetyThresholds::default(),
            monitoring: MonitoringSettings::default(),
            alerts: AlertSettings::default(),
            exit: ExitSettings::default(),
            degraded_level: RiskLevel::Elevated,
        }
    }
}

/// Bounds enforced on top of internal consistency checks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationLimits {
    pub min_interval_ms: u64,
    pub max_interval_ms: u64,
    pub max_exit_attempts: u32,
}

impl Default for ValidationLimits {
    fn default() -> Self {
        Self {
            min_interval_ms: 5_000,
            max_interval_ms: 60_000,
            max_exit_attempts: 10,
        }
    }
}

/// Outcome of validating a candidate configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationResult {
    pub valid: bool,
    pub errors: Vec<String>,
}

impl ValidationResult {
    /// Converts into a `SafetyResult`, carrying every error message.
    pub fn into_result(self) -> SafetyResult<()> {
        if self.valid {
            Ok(())
        } else {
            Err(SafetyError::InvalidConfiguration(self.errors))
        }
    }
}

impl SafetyConfiguration {
    /// Checks ranges, required fields and internal consistency.
    pub fn validate(&self, limits: &ValidationLimits) -> ValidationResult {
        let mut errors = Vec::new();

        if self.name.trim().is_empty() {
            errors.push("name is required".to_string());
        }

        self.thresholds.validate(&mut errors);

        let m = &self.monitoring;
        if m.interval_ms < limits.min_interval_ms || m.interval_ms > limits.max_interval_ms {
            errors.push(format!(
                "monitoring.interval_ms ({}) must be within {}..={}",
                m.interval_ms, limits.min_interval_ms, limits.max_interval_ms
            ));
        }
        if m.snapshot_timeout_ms == 0 {
            errors.push("monitoring.snapshot_timeout_ms must be positive".to_string());
        }
        if m.snapshot_timeout_ms >= m.interval_ms {
            errors.push(format!(
                "monitoring.snapshot_timeout_ms ({}) must be shorter than interval_ms ({})",
                m.snapshot_timeout_ms, m.interval_ms
            ));
        }
        if m.history_size == 0 {
            errors.push("monitoring.history_size must be positive".to_string());
        }

        let map = &self.alerts.severity_map;
        if !(map.elevated <= map.high && map.high <= map.critical) {
            errors.push("alerts.severity_map must be non-decreasing with risk level".to_string());
        }
        if self.alerts.max_history == 0 {
            errors.push("alerts.max_history must be positive".to_string());
        }
        if self.alerts.delivery_timeout_ms == 0 {
            errors.push("alerts.delivery_timeout_ms must be positive".to_string());
        }

        let e = &self.exit;
        if e.exit_level < RiskLevel::High {
            errors.push(format!(
                "exit.exit_level ({}) must be high or critical",
                e.exit_level
            ));
        }
        if !e.alert_exit_severity.is_actionable() {
            errors.push(format!(
                "exit.alert_exit_severity ({}) must be critical or emergency",
                e.alert_exit_severity
            ));
        }
        if e.max_exit_attempts == 0 || e.max_exit_attempts > limits.max_exit_attempts {
            errors.push(format!(
                "exit.max_exit_attempts ({}) must be within 1..={}",
                e.max_exit_attempts, limits.max_exit_attempts
            ));
        }
        if e.attempt_timeout_ms == 0 {
            errors.push("exit.attempt_timeout_ms must be positive".to_string());
        }
        if e.max_finished == 0 {
            errors.push("exit.max_finished must be positive".to_string());
        }

        ValidationResult {
            valid: errors.is_empty(),
            errors,
        }
    }
}

/// A partial update. Present sections replace the active ones wholesale.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigurationUpdate {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub thresholds: Option<SafetyThresholds>,
    #[serde(default)]
    pub monitoring: Option<MonitoringSettings>,
    #[serde(default)]
    pub alerts: Option<AlertSettings>,
    #[serde(default)]
    pub exit: Option<ExitSettings>,
    #[serde(default)]
    pub degraded_level: Option<RiskLevel>,
}

impl ConfigurationUpdate {
    /// Produces the candidate configuration without touching `base`.
    pub fn merge_onto(&self, base: &SafetyConfiguration) -> SafetyConfiguration {
        SafetyConfiguration {
            name: self.name.clone().unwrap_or_else(|| base.name.clone()),
            version: base.version,
            thresholds: self
                .thresholds
                .clone()
                .unwrap_or_else(|| base.thresholds.clone()),
            monitoring: self
                .monitoring
                .clone()
                .unwrap_or_else(|| base.monitoring.clone()),
            alerts: self.alerts.clone().unwrap_or_else(|| base.alerts.clone()),
            exit: self.exit.clone().unwrap_or_else(|| base.exit.clone()),
            degraded_level: self.degraded_level.unwrap_or(base.degraded_level),
        }
    }

    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_configuration_is_valid() {
        let result = SafetyConfiguration::default().validate(&ValidationLimits::default());
        assert!(result.valid, "{:?}", result.errors);
    }

    #[test]
    fn test_interval_bounds_enforced() {
        let mut config = SafetyConfiguration::default();
        config.monitoring.interval_ms = 1_000;
        config.monitoring.snapshot_timeout_ms = 500;
        let result = config.validate(&ValidationLimits::default());
        assert!(!result.valid);
        assert!(result.errors[0].contains("interval_ms"));
    }

    #[test]
    fn test_multiple_errors_are_collected() {
        let mut config = SafetyConfiguration::default();
        config.name = String::new();
        config.exit.max_exit_attempts = 0;
        config.exit.exit_level = RiskLevel::Elevated;
        let err = config
            .validate(&ValidationLimits::default())
            .into_result()
            .unwrap_err();
        match err {
            SafetyError::InvalidConfiguration(errors) => assert_eq!(errors.len(), 3),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_exit_attempt_timeout_required() {
        let mut config = SafetyConfiguration::default();
        config.exit.attempt_timeout_ms = 0;
        let result = config.validate(&ValidationLimits::default());
        assert!(!result.valid);
        assert!(result.errors[0].contains("attempt_timeout_ms"));

        let mut json = serde_json::to_value(SafetyConfiguration::default()).unwrap();
        json["exit"]
            .as_object_mut()
            .unwrap()
            .remove("attempt_timeout_ms");
        let restored: SafetyConfiguration = serde_json::from_value(json).unwrap();
        assert_eq!(restored.exit.attempt_timeout_ms, 5_000);
    }

    #[test]
    fn test_update_merges_sections() {
        let base = SafetyConfiguration::default();
        let update = ConfigurationUpdate {
            degraded_level: Some(RiskLevel::High),
            ..Default::default()
        };
        let merged = update.merge_onto(&base);
        assert_eq!(merged.degraded_level, RiskLevel::High);
        assert_eq!(merged.thresholds, base.thresholds);
        assert!(ConfigurationUpdate::default().is_empty());
    }

    #[test]
    fn test_severity_map() {
        let map = SeverityMap::default();
        assert_eq!(map.for_level(RiskLevel::Normal), None);
        assert_eq!(map.for_level(RiskLevel::Critical), Some(AlertSeverity::Critical));
    }
}
