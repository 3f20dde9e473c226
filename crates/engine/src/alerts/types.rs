use crate::risk::MetricReading;
use chrono::{DateTime, Utc};
use safeguard_domain::enums::{AlertSeverity, AlertStatus, BreachCondition, RiskDimension};
use safeguard_domain::{SafetyError, SafetyResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

/// Identity of the condition an alert is about.
///
/// At most one unresolved alert exists per key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AlertKey {
    pub dimension: RiskDimension,
    pub condition: BreachCondition,
    /// Narrows the key, e.g. to one operation.
    pub scope: Option<String>,
}

impl AlertKey {
    pub fn new(dimension: RiskDimension, condition: BreachCondition, scope: Option<String>) -> Self {
        Self {
            dimension,
            condition,
            scope,
        }
    }
}

impl fmt::Display for AlertKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.dimension, self.condition)?;
        if let Some(scope) = &self.scope {
            write!(f, "/{scope}")?;
        }
        Ok(())
    }
}

/// A tracked alert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SafetyAlert {
    pub id: Uuid,
    pub key: AlertKey,
    pub severity: AlertSeverity,
    pub status: AlertStatus,
    pub message: String,
    /// Latest reading behind the alert.
    pub evidence: Option<MetricReading>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub acknowledged_at: Option<DateTime<Utc>>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub resolution: Option<String>,
    /// Times the breach was observed again while unresolved.
    pub refresh_count: u32,
}

impl SafetyAlert {
    pub fn new(
        key: AlertKey,
        severity: AlertSeverity,
        message: String,
        evidence: Option<MetricReading>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            key,
            severity,
            status: AlertStatus::Open,
            message,
            evidence,
            created_at: now,
            updated_at: now,
            acknowledged_at: None,
            resolved_at: None,
            resolution: None,
            refresh_count: 0,
        }
    }

    pub fn dimension(&self) -> RiskDimension {
        self.key.dimension
    }

    pub fn is_unresolved(&self) -> bool {
        self.status.is_unresolved()
    }

    /// Updates evidence in place. Returns true if the severity escalated.
    ///
    /// Severity never decreases while the alert is unresolved.
    pub(crate) fn refresh(
        &mut self,
        severity: AlertSeverity,
        message: String,
        evidence: Option<MetricReading>,
        now: DateTime<Utc>,
    ) -> bool {
        let escalated = severity > self.severity;
        if escalated {
            self.severity = severity;
        }
        self.message = message;
        self.evidence = evidence;
        self.updated_at = now;
        self.refresh_count = self.refresh_count.saturating_add(1);
        escalated
    }

    pub(crate) fn acknowledge(&mut self, now: DateTime<Utc>) -> SafetyResult<()> {
        self.transition(AlertStatus::Acknowledged)?;
        self.acknowledged_at = Some(now);
        self.updated_at = now;
        Ok(())
    }

    pub(crate) fn resolve(&mut self, reason: String, now: DateTime<Utc>) -> SafetyResult<()> {
        self.transition(AlertStatus::Resolved)?;
        self.resolved_at = Some(now);
        self.resolution = Some(reason);
        self.updated_at = now;
        Ok(())
    }

    fn transition(&mut self, to: AlertStatus) -> SafetyResult<()> {
        if !self.status.can_transition_to(to) {
            return Err(SafetyError::invalid_transition(
                self.id.to_string(),
                self.status,
                to,
            ));
        }
        self.status = to;
        Ok(())
    }

    pub fn time_to_resolution(&self) -> Option<chrono::Duration> {
        self.resolved_at.map(|at| at - self.created_at)
    }
}

/// Query filter for listing alerts. Unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertFilter {
    #[serde(default)]
    pub status: Option<AlertStatus>,
    #[serde(default)]
    pub severity: Option<AlertSeverity>,
    #[serde(default)]
    pub min_severity: Option<AlertSeverity>,
    #[serde(default)]
    pub dimension: Option<RiskDimension>,
}

impl AlertFilter {
    pub fn matches(&self, alert: &SafetyAlert) -> bool {
        self.status.is_none_or(|s| alert.status == s)
            && self.severity.is_none_or(|s| alert.severity == s)
            && self.min_severity.is_none_or(|s| alert.severity >= s)
            && self.dimension.is_none_or(|d| alert.key.dimension == d)
    }
}

/// Alert counters, recomputed on demand.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AlertStatistics {
    pub total: usize,
    pub open: usize,
    pub acknowledged: usize,
    pub resolved: usize,
    pub by_severity: BTreeMap<AlertSeverity, usize>,
    pub by_dimension: BTreeMap<RiskDimension, usize>,
    /// Mean over resolved alerts still in memory.
    pub mean_time_to_resolution_secs: Option<f64>,
    pub oldest_unresolved_at: Option<DateTime<Utc>>,
}

impl AlertStatistics {
    pub fn from_alerts<'a>(alerts: impl IntoIterator<Item = &'a SafetyAlert>) -> Self {
        let mut stats = Self::default();
        let mut resolution_ms: i64 = 0;

        for alert in alerts {
            stats.total += 1;
            match alert.status {
                AlertStatus::Open => stats.open += 1,
                AlertStatus::Acknowledged => stats.acknowledged += 1,
                AlertStatus::Resolved => stats.resolved += 1,
            }
            *stats.by_severity.entry(alert.severity).or_default() += 1;
            *stats.by_dimension.entry(alert.key.dimension).or_default() += 1;

            if let Some(ttr) = alert.time_to_resolution() {
                resolution_ms = resolution_ms.saturating_add(ttr.num_milliseconds());
            }
            if alert.is_unresolved() {
                stats.oldest_unresolved_at = Some(match stats.oldest_unresolved_at {
                    Some(oldest) => oldest.min(alert.created_at),
                    None => alert.created_at,
                });
            }
        }

        if stats.resolved > 0 {
            stats.mean_time_to_resolution_secs =
                Some(resolution_ms as f64 / 1000.0 / stats.resolved as f64);
        }
        stats
    }
}
