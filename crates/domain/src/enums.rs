use serde::{Deserialize, Serialize};
use std::fmt;

/// An independent axis of risk evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskDimension {
    Portfolio,
    Pattern,
    Performance,
    System,
}

impl RiskDimension {
    /// All dimensions in evaluation order.
    pub const ALL: [RiskDimension; 4] = [
        RiskDimension::Portfolio,
        RiskDimension::Pattern,
        RiskDimension::Performance,
        RiskDimension::System,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Portfolio => "portfolio",
            Self::Pattern => "pattern",
            Self::Performance => "performance",
            Self::System => "system",
        }
    }
}

impl fmt::Display for RiskDimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ordered risk level. Merging always takes the maximum.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    #[default]
    Normal,
    Elevated,
    High,
    Critical,
}

impl RiskLevel {
    /// Levels at `High` or above count as a breach.
    pub fn is_breach(&self) -> bool {
        *self >= RiskLevel::High
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::Elevated => "elevated",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertSeverity {
    Info,
    Warning,
    Critical,
    Emergency,
}

impl AlertSeverity {
    pub const ALL: [AlertSeverity; 4] = [
        AlertSeverity::Info,
        AlertSeverity::Warning,
        AlertSeverity::Critical,
        AlertSeverity::Emergency,
    ];

    /// Critical or higher.
    pub fn is_actionable(&self) -> bool {
        matches!(self, Self::Critical | Self::Emergency)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Critical => "critical",
            Self::Emergency => "emergency",
        }
    }
}

impl fmt::Display for AlertSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Alert lifecycle status. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertStatus {
    Open,
    Acknowledged,
    Resolved,
}

impl AlertStatus {
    pub fn can_transition_to(&self, next: AlertStatus) -> bool {
        matches!(
            (self, next),
            (Self::Open, Self::Acknowledged)
                | (Self::Open, Self::Resolved)
                | (Self::Acknowledged, Self::Resolved)
        )
    }

    /// Open or acknowledged.
    pub fn is_unresolved(&self) -> bool {
        !matches!(self, Self::Resolved)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Acknowledged => "acknowledged",
            Self::Resolved => "resolved",
        }
    }
}

impl fmt::Display for AlertStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status of an operation under auto-exit supervision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationStatus {
    Active,
    Exiting,
    Closed,
    Error,
}

impl OperationStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Closed | Self::Error)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Exiting => "exiting",
            Self::Closed => "closed",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PositionSide {
    Long,
    Short,
}

impl fmt::Display for PositionSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Long => "long",
            Self::Short => "short",
        })
    }
}

/// Kind of automated protective response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    ForceExit,
    ReducePosition,
    HaltNewEntries,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionOutcome {
    Pending,
    Applied,
    Failed,
}

/// Lifecycle state of the monitoring loop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MonitorState {
    #[default]
    Stopped,
    Starting,
    Running,
    Stopping,
    Error,
}

impl MonitorState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stopped => "stopped",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for MonitorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The measured condition behind a breach.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreachCondition {
    Drawdown,
    Concentration,
    Leverage,
    ConsecutiveLosses,
    RapidReentry,
    OrderFrequency,
    Loss,
    WinRate,
    ApiLatency,
    ErrorRate,
    DataStaleness,
    TickFailure,
    ExitFailed,
}

impl BreachCondition {
    /// The dimension that owns this condition.
    pub fn dimension(&self) -> RiskDimension {
        match self {
            Self::Drawdown | Self::Concentration | Self::Leverage | Self::ExitFailed => {
                RiskDimension::Portfolio
            }
            Self::ConsecutiveLosses | Self::RapidReentry | Self::OrderFrequency => {
                RiskDimension::Pattern
            }
            Self::Loss | Self::WinRate => RiskDimension::Performance,
            Self::ApiLatency | Self::ErrorRate | Self::DataStaleness | Self::TickFailure => {
                RiskDimension::System
            }
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Drawdown => "drawdown",
            Self::Concentration => "concentration",
            Self::Leverage => "leverage",
            Self::ConsecutiveLosses => "consecutive_losses",
            Self::RapidReentry => "rapid_reentry",
            Self::OrderFrequency => "order_frequency",
            Self::Loss => "loss",
            Self::WinRate => "win_rate",
            Self::ApiLatency => "api_latency",
            Self::ErrorRate => "error_rate",
            Self::DataStaleness => "data_staleness",
            Self::TickFailure => "tick_failure",
            Self::ExitFailed => "exit_failed",
        }
    }
}

impl fmt::Display for BreachCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_risk_level_ordering() {
        assert!(RiskLevel::Normal < RiskLevel::Elevated);
        assert!(RiskLevel::Elevated < RiskLevel::High);
        assert!(RiskLevel::High < RiskLevel::Critical);
        assert!(!RiskLevel::Elevated.is_breach());
        assert!(RiskLevel::High.is_breach());
    }

    #[test]
    fn test_alert_status_transitions() {
        assert!(AlertStatus::Open.can_transition_to(AlertStatus::Acknowledged));
        assert!(AlertStatus::Acknowledged.can_transition_to(AlertStatus::Resolved));
        assert!(!AlertStatus::Resolved.can_transition_to(AlertStatus::Open));
        assert!(!AlertStatus::Acknowledged.can_transition_to(AlertStatus::Open));
        assert!(!AlertStatus::Resolved.can_transition_to(AlertStatus::Resolved));
    }

    #[test]
    fn test_condition_dimension() {
        assert_eq!(
            BreachCondition::Drawdown.dimension(),
            RiskDimension::Portfolio
        );
        assert_eq!(
            BreachCondition::TickFailure.dimension(),
            RiskDimension::System
        );
        assert_eq!(
            BreachCondition::WinRate.dimension(),
            RiskDimension::Performance
        );
    }

    #[test]
    fn test_serde_snake_case() {
        let json = serde_json::to_string(&RiskDimension::Performance).unwrap();
        assert_eq!(json, "\"performance\"");
        let level: RiskLevel = serde_json::from_str("\"critical\"").unwrap();
        assert_eq!(level, RiskLevel::Critical);
    }
}
