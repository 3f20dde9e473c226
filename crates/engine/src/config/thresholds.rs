//! Numeric limits per risk dimension.

use rust_decimal::Decimal;
use safeguard_domain::enums::RiskLevel;
use serde::{Deserialize, Serialize};

/// Which side of a threshold is the risky side.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThresholdDirection {
    /// Higher values are riskier (drawdown, latency).
    #[default]
    Above,
    /// Lower values are riskier (win rate).
    Below,
}

/// A warning/critical pair for one metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Threshold {
    pub warning: Decimal,
    pub critical: Decimal,
    #[serde(default)]
    pub direction: ThresholdDirection,
}

impl Threshold {
    /// Creates a threshold where higher values are riskier.
    pub fn above(warning: Decimal, critical: Decimal) -> Self {
        Self {
            warning,
            critical,
            direction: ThresholdDirection::Above,
        }
    }

    /// Creates a threshold where lower values are riskier.
    pub fn below(warning: Decimal, critical: Decimal) -> Self {
        Self {
            warning,
            critical,
            direction: ThresholdDirection::Below,
        }
    }

    /// Maps a measured value to a risk level.
    ///
    /// `elevated_fraction` places the elevated band in front of the warning
    /// threshold: for `Above`, values at or past `warning * fraction` are
    /// elevated; for `Below`, values at or under `warning / fraction`.
    pub fn level(&self, value: Decimal, elevated_fraction: Decimal) -> RiskLevel {
        match self.direction {
            ThresholdDirection::Above => {
                if value >= self.critical {
                    RiskLevel::Critical
                } else if value >= self.warning {
                    RiskLevel::High
                } else if value >= self.warning * elevated_fraction {
                    RiskLevel::Elevated
                } else {
                    RiskLevel::Normal
                }
            }
            ThresholdDirection::Below => {
                let elevated = if elevated_fraction.is_zero() {
                    self.warning
                } else {
                    self.warning
                        .checked_div(elevated_fraction)
                        .unwrap_or(self.warning)
                };
                if value <= self.critical {
                    RiskLevel::Critical
                } else if value <= self.warning {
                    RiskLevel::High
                } else if value <= elevated {
                    RiskLevel::Elevated
                } else {
                    RiskLevel::Normal
                }
            }
        }
    }

    /// Score in `[0, 100]`, reaching 100 at the critical threshold.
    pub fn score(&self, value: Decimal) -> Decimal {
        let raw = match self.direction {
            ThresholdDirection::Above => {
                if self.critical <= Decimal::ZERO {
                    return Decimal::ONE_HUNDRED;
                }
                value
                    .checked_div(self.critical)
                    .and_then(|r| r.checked_mul(Decimal::ONE_HUNDRED))
                    .unwrap_or(Decimal::ONE_HUNDRED)
            }
            ThresholdDirection::Below => {
                if value <= self.critical {
                    return Decimal::ONE_HUNDRED;
                }
                self.critical
                    .checked_div(value)
                    .and_then(|r| r.checked_mul(Decimal::ONE_HUNDRED))
                    .unwrap_or(Decimal::ZERO)
            }
        };
        raw.max(Decimal::ZERO).min(Decimal::ONE_HUNDRED)
    }

    pub(crate) fn validate(&self, name: &str, errors: &mut Vec<String>) {
        match self.direction {
            ThresholdDirection::Above => {
                if self.warning <= Decimal::ZERO {
                    errors.push(format!("{name}: warning must be positive"));
                }
                if self.critical <= self.warning {
                    errors.push(format!(
                        "{name}: warning ({}) must be below critical ({})",
                        self.warning, self.critical
                    ));
                }
            }
            ThresholdDirection::Below => {
                if self.critical < Decimal::ZERO {
                    errors.push(format!("{name}: critical must not be negative"));
                }
                if self.warning <= self.critical {
                    errors.push(format!(
                        "{name}: warning ({}) must be above critical ({}) for a lower-is-worse metric",
                        self.warning, self.critical
                    ));
                }
            }
        }
    }
}

/// Exposure limits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortfolioThresholds {
    /// Drawdown from peak equity or worst position loss, in percent.
    pub drawdown_pct: Threshold,
    /// Largest single position as a percentage of equity.
    pub concentration_pct: Threshold,
    /// Gross exposure divided by equity.
    pub leverage: Threshold,
}

impl Default for PortfolioThresholds {
    fn default() -> Self {
        Self {
            drawdown_pct: Threshold::above(Decimal::new(5, 0), Decimal::new(10, 0)),
            concentration_pct: Threshold::above(Decimal::new(40, 0), Decimal::new(60, 0)),
            leverage: Threshold::above(Decimal::new(3, 0), Decimal::new(5, 0)),
        }
    }
}

/// Behavioural limits over a rolling window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatternThresholds {
    pub consecutive_losses: Threshold,
    pub rapid_reentries: Threshold,
    pub orders_per_hour: Threshold,
    /// Rolling window length.
    pub window_secs: u64,
    /// A re-entry this soon after a losing exit on the same symbol counts as rapid.
    pub rapid_reentry_secs: u64,
}

impl Default for PatternThresholds {
    fn default() -> Self {
        Self {
            consecutive_losses: Threshold::above(Decimal::new(3, 0), Decimal::new(5, 0)),
            rapid_reentries: Threshold::above(Decimal::new(2, 0), Decimal::new(4, 0)),
            orders_per_hour: Threshold::above(Decimal::new(30, 0), Decimal::new(60, 0)),
            window_secs: 3600,
            rapid_reentry_secs: 120,
        }
    }
}

/// PnL trend limits over a rolling window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PerformanceThresholds {
    /// Net loss (realized in window plus unrealized) as a percentage of equity.
    pub loss_pct: Threshold,
    /// Share of winning trades, lower is worse.
    pub win_rate_pct: Threshold,
    pub window_secs: u64,
    /// Win rate is only judged with at least this many trades in the window.
    pub min_trades: u32,
}

impl Default for PerformanceThresholds {
    fn default() -> Self {
        Self {
            loss_pct: Threshold::above(Decimal::new(3, 0), Decimal::new(6, 0)),
            win_rate_pct: Threshold::below(Decimal::new(40, 0), Decimal::new(25, 0)),
            window_secs: 86_400,
            min_trades: 10,
        }
    }
}

/// Operational limits for infrastructure health.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemThresholds {
    pub api_latency_ms: Threshold,
    pub error_rate_pct: Threshold,
    pub data_staleness_ms: Threshold,
}

impl Default for SystemThresholds {
    fn default() -> Self {
        Self {
            api_latency_ms: Threshold::above(Decimal::new(500, 0), Decimal::new(2000, 0)),
            error_rate_pct: Threshold::above(Decimal::new(5, 0), Decimal::new(15, 0)),
            data_staleness_ms: Threshold::above(Decimal::new(5_000, 0), Decimal::new(30_000, 0)),
        }
    }
}

/// Thresholds for all four dimensions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SafetyThresholds {
    pub portfolio: PortfolioThresholds,
    pub pattern: PatternThresholds,
    pub performance: PerformanceThresholds,
    pub system: SystemThresholds,
    /// Fraction of the warning threshold at which a metric becomes elevated.
    pub elevated_fraction: Decimal,
}

impl Default for SafetyThresholds {
    fn default() -> Self {
        Self {
            portfolio: PortfolioThresholds::default(),
            pattern: PatternThresholds::default(),
            performance: PerformanceThresholds::default(),
            system: SystemThresholds::default(),
            elevated_fraction: Decimal::new(75, 2),
        }
    }
}

impl SafetyThresholds {
    pub(crate) fn validate(&self, errors: &mut Vec<String>) {
        let p = &self.portfolio;
        p.drawdown_pct.validate("portfolio.drawdown_pct", errors);
        p.concentration_pct
            .validate("portfolio.concentration_pct", errors);
        p.leverage.validate("portfolio.leverage", errors);

        let pat = &self.pattern;
        pat.consecutive_losses
            .validate("pattern.consecutive_losses", errors);
        pat.rapid_reentries.validate("pattern.rapid_reentries", errors);
        pat.orders_per_hour.validate("pattern.orders_per_hour", errors);
        if pat.window_secs == 0 {
            errors.push("pattern.window_secs must be positive".to_string());
        }
        if pat.rapid_reentry_secs == 0 {
            errors.push("pattern.rapid_reentry_secs must be positive".to_string());
        }

        let perf = &self.performance;
        perf.loss_pct.validate("performance.loss_pct", errors);
        perf.win_rate_pct
            .validate("performance.win_rate_pct", errors);
        if perf.win_rate_pct.warning > Decimal::ONE_HUNDRED {
            errors.push("performance.win_rate_pct: warning must not exceed 100".to_string());
        }
        if perf.window_secs == 0 {
            errors.push("performance.window_secs must be positive".to_string());
        }

        let s = &self.system;
        s.api_latency_ms.validate("system.api_latency_ms", errors);
        s.error_rate_pct.validate("system.error_rate_pct", errors);
        s.data_staleness_ms
            .validate("system.data_staleness_ms", errors);

        if self.elevated_fraction <= Decimal::ZERO || self.elevated_fraction >= Decimal::ONE {
            errors.push(format!(
                "elevated_fraction ({}) must be between 0 and 1",
                self.elevated_fraction
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_above_levels() {
        let t = Threshold::above(dec!(5), dec!(10));
        let f = dec!(0.75);
        assert_eq!(t.level(dec!(1), f), RiskLevel::Normal);
        assert_eq!(t.level(dec!(4), f), RiskLevel::Elevated);
        assert_eq!(t.level(dec!(5), f), RiskLevel::High);
        assert_eq!(t.level(dec!(12), f), RiskLevel::Critical);
    }

    #[test]
    fn test_below_levels() {
        let t = Threshold::below(dec!(40), dec!(25));
        let f = dec!(0.8);
        assert_eq!(t.level(dec!(60), f), RiskLevel::Normal);
        assert_eq!(t.level(dec!(45), f), RiskLevel::Elevated);
        assert_eq!(t.level(dec!(40), f), RiskLevel::High);
        assert_eq!(t.level(dec!(20), f), RiskLevel::Critical);
    }

    #[test]
    fn test_score_is_clamped() {
        let t = Threshold::above(dec!(5), dec!(10));
        assert_eq!(t.score(dec!(5)), dec!(50));
        assert_eq!(t.score(dec!(25)), dec!(100));
        assert_eq!(t.score(Decimal::MAX), dec!(100));

        let b = Threshold::below(dec!(40), dec!(20));
        assert_eq!(b.score(dec!(40)), dec!(50));
        assert_eq!(b.score(dec!(0)), dec!(100));
    }

    #[test]
    fn test_validation_rejects_inverted_pairs() {
        let mut errors = Vec::new();
        Threshold::above(dec!(10), dec!(5)).validate("drawdown", &mut errors);
        Threshold::below(dec!(20), dec!(30)).validate("win_rate", &mut errors);
        assert_eq!(errors.len(), 2);

        let mut errors = Vec::new();
        SafetyThresholds::default().validate(&mut errors);
        assert!(errors.is_empty(), "{errors:?}");
    }
}
