use crate::alerts::SafetyAlert;
use crate::risk::ComprehensiveRiskAssessment;
use chrono::{DateTime, Utc};
use safeguard_domain::enums::OperationStatus;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// Named event types used for subscription filters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    ConfigurationChanged,
    RiskAssessed,
    AlertRaised,
    AlertResolved,
    OperationStateChanged,
}

impl EventKind {
    pub const ALL: [EventKind; 5] = [
        EventKind::ConfigurationChanged,
        EventKind::RiskAssessed,
        EventKind::AlertRaised,
        EventKind::AlertResolved,
        EventKind::OperationStateChanged,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ConfigurationChanged => "configuration_changed",
            Self::RiskAssessed => "risk_assessed",
            Self::AlertRaised => "alert_raised",
            Self::AlertResolved => "alert_resolved",
            Self::OperationStateChanged => "operation_state_changed",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A status move of a supervised operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationStateChange {
    pub operation_id: Uuid,
    pub symbol: String,
    pub from: OperationStatus,
    pub to: OperationStatus,
    pub reason: Option<String>,
    pub at: DateTime<Utc>,
}

/// Events carried by the bus.
#[derive(Debug, Clone)]
pub enum SafetyEvent {
    /// A new configuration was installed.
    ConfigurationChanged { name: String, version: u64 },
    /// A tick produced a merged assessment.
    RiskAssessed(Arc<ComprehensiveRiskAssessment>),
    /// An alert was created or escalated.
    AlertRaised(SafetyAlert),
    AlertResolved(SafetyAlert),
    OperationStateChanged(OperationStateChange),
}

impl SafetyEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::ConfigurationChanged { .. } => EventKind::ConfigurationChanged,
            Self::RiskAssessed(_) => EventKind::RiskAssessed,
            Self::AlertRaised(_) => EventKind::AlertRaised,
            Self::AlertResolved(_) => EventKind::AlertResolved,
            Self::OperationStateChanged(_) => EventKind::OperationStateChanged,
        }
    }
}
