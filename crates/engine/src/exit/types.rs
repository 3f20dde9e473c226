use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use safeguard_domain::enums::{
    ActionKind, ActionOutcome, AlertSeverity, OperationStatus, PositionSide, RiskLevel,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// A position handed to the auto-exit manager for supervision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationRegistration {
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,
    pub symbol: String,
    pub side: PositionSide,
    pub quantity: Decimal,
    pub entry_price: Decimal,
    #[serde(default = "Utc::now")]
    pub entry_time: DateTime<Utc>,
    /// Exit once the mark crosses this price against the position.
    #[serde(default)]
    pub stop_price: Option<Decimal>,
    /// Exit once the mark retraces this percentage from its best level.
    #[serde(default)]
    pub trailing_stop_pct: Option<Decimal>,
    #[serde(default)]
    pub max_holding_secs: Option<u64>,
    /// Overrides the configured exit level for this operation.
    #[serde(default)]
    pub exit_level: Option<RiskLevel>,
}

impl OperationRegistration {
    pub fn new(
        symbol: impl Into<String>,
        side: PositionSide,
        quantity: Decimal,
        entry_price: Decimal,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            symbol: symbol.into(),
            side,
            quantity,
            entry_price,
            entry_time: Utc::now(),
            stop_price: None,
            trailing_stop_pct: None,
            max_holding_secs: None,
            exit_level: None,
        }
    }

    #[must_use]
    pub fn with_stop_price(mut self, price: Decimal) -> Self {
        self.stop_price = Some(price);
        self
    }

    #[must_use]
    pub fn with_trailing_stop_pct(mut self, pct: Decimal) -> Self {
        self.trailing_stop_pct = Some(pct);
        self
    }

    #[must_use]
    pub fn with_max_holding_secs(mut self, secs: u64) -> Self {
        self.max_holding_secs = Some(secs);
        self
    }

    #[must_use]
    pub fn with_exit_level(mut self, level: RiskLevel) -> Self {
        self.exit_level = Some(level);
        self
    }

    /// Collects every problem with the registration.
    pub fn problems(&self) -> Vec<String> {
        let mut problems = Vec::new();
        if self.symbol.trim().is_empty() {
            problems.push("symbol is required".to_string());
        }
        if self.quantity <= Decimal::ZERO {
            problems.push("quantity must be positive".to_string());
        }
        if self.entry_price <= Decimal::ZERO {
            problems.push("entry_price must be positive".to_string());
        }
        if let Some(stop) = self.stop_price
            && stop <= Decimal::ZERO
        {
            problems.push("stop_price must be positive".to_string());
        }
        if let Some(pct) = self.trailing_stop_pct
            && (pct <= Decimal::ZERO || pct >= Decimal::ONE_HUNDRED)
        {
            problems.push("trailing_stop_pct must be between 0 and 100".to_string());
        }
        if self.max_holding_secs == Some(0) {
            problems.push("max_holding_secs must be positive".to_string());
        }
        problems
    }
}

/// Why an exit was decided.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExitReason {
    StopLoss {
        stop_price: Decimal,
        mark_price: Decimal,
    },
    TrailingStop {
        high_water_mark: Decimal,
        mark_price: Decimal,
        trailing_stop_pct: Decimal,
    },
    MaxHoldingTime {
        held_secs: i64,
        max_holding_secs: u64,
    },
    RiskLevel {
        level: RiskLevel,
        exit_level: RiskLevel,
    },
    Alert {
        alert_id: Uuid,
        severity: AlertSeverity,
    },
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::StopLoss {
                stop_price,
                mark_price,
            } => write!(f, "stop loss: mark {mark_price} crossed stop {stop_price}"),
            Self::TrailingStop {
                high_water_mark,
                mark_price,
                trailing_stop_pct,
            } => write!(
                f,
                "trailing stop: mark {mark_price} retraced {trailing_stop_pct}% from {high_water_mark}"
            ),
            Self::MaxHoldingTime {
                held_secs,
                max_holding_secs,
            } => write!(f, "held {held_secs}s, limit {max_holding_secs}s"),
            Self::RiskLevel { level, exit_level } => {
                write!(f, "risk level {level} at or above exit level {exit_level}")
            }
            Self::Alert { alert_id, severity } => write!(f, "{severity} alert {alert_id}"),
        }
    }
}

/// Live state of a supervised operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationRecord {
    pub registration: OperationRegistration,
    pub status: OperationStatus,
    pub mark_price: Option<Decimal>,
    /// Best price seen in the position's favour.
    pub high_water_mark: Decimal,
    pub last_exit_reason: Option<ExitReason>,
    pub attempts: u32,
    pub last_error: Option<String>,
    pub registered_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl OperationRecord {
    pub fn new(registration: OperationRegistration) -> Self {
        let now = Utc::now();
        Self {
            high_water_mark: registration.entry_price,
            registration,
            status: OperationStatus::Active,
            mark_price: None,
            last_exit_reason: None,
            attempts: 0,
            last_error: None,
            registered_at: now,
            updated_at: now,
            finished_at: None,
        }
    }

    pub fn id(&self) -> Uuid {
        self.registration.id
    }

    /// Records a new mark and moves the high-water mark in the position's favour.
    pub fn observe_price(&mut self, price: Decimal) {
        self.mark_price = Some(price);
        self.high_water_mark = match self.registration.side {
            PositionSide::Long => self.high_water_mark.max(price),
            PositionSide::Short => self.high_water_mark.min(price),
        };
        self.updated_at = Utc::now();
    }

    /// First exit condition that holds, checked in order: stop, trailing
    /// stop, holding time, risk level.
    pub fn evaluate(
        &self,
        level: RiskLevel,
        default_exit_level: RiskLevel,
        now: DateTime<Utc>,
    ) -> Option<ExitReason> {
        let reg = &self.registration;

        if let (Some(stop_price), Some(mark_price)) = (reg.stop_price, self.mark_price) {
            let crossed = match reg.side {
                PositionSide::Long => mark_price <= stop_price,
                PositionSide::Short => mark_price >= stop_price,
            };
            if crossed {
                return Some(ExitReason::StopLoss {
                    stop_price,
                    mark_price,
                });
            }
        }

        if let (Some(pct), Some(mark_price)) = (reg.trailing_stop_pct, self.mark_price) {
            let hwm = self.high_water_mark;
            let retrace = hwm * pct / Decimal::ONE_HUNDRED;
            let crossed = match reg.side {
                PositionSide::Long => mark_price <= hwm - retrace,
                PositionSide::Short => mark_price >= hwm + retrace,
            };
            if crossed {
                return Some(ExitReason::TrailingStop {
                    high_water_mark: hwm,
                    mark_price,
                    trailing_stop_pct: pct,
                });
            }
        }

        if let Some(max_holding_secs) = reg.max_holding_secs {
            let held_secs = (now - reg.entry_time).num_seconds();
            if held_secs >= 0 && held_secs as u64 >= max_holding_secs {
                return Some(ExitReason::MaxHoldingTime {
                    held_secs,
                    max_holding_secs,
                });
            }
        }

        let exit_level = reg.exit_level.unwrap_or(default_exit_level);
        if level >= exit_level {
            return Some(ExitReason::RiskLevel { level, exit_level });
        }

        None
    }
}

/// An automated protective action and its outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SafetyAction {
    pub id: Uuid,
    pub kind: ActionKind,
    pub operation_id: Uuid,
    /// Alert that triggered the action, if any.
    pub alert_id: Option<Uuid>,
    pub reason: String,
    pub outcome: ActionOutcome,
    pub attempts: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub error: Option<String>,
}

impl SafetyAction {
    pub fn force_exit(operation_id: Uuid, alert_id: Option<Uuid>, reason: String) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            kind: ActionKind::ForceExit,
            operation_id,
            alert_id,
            reason,
            outcome: ActionOutcome::Pending,
            attempts: 0,
            created_at: now,
            updated_at: now,
            error: None,
        }
    }
}
