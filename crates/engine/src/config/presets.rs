//! Built-in configuration presets.

use super::{SafetyConfiguration, SafetyThresholds, Threshold};
use rust_decimal::Decimal;
use safeguard_domain::enums::RiskLevel;

pub const CONSERVATIVE: &str = "conservative";
pub const BALANCED: &str = "balanced";
pub const AGGRESSIVE: &str = "aggressive";

/// Tight limits, exits on `high`.
pub fn conservative() -> SafetyConfiguration {
    let mut thresholds = SafetyThresholds::default();
    thresholds.portfolio.drawdown_pct = Threshold::above(Decimal::new(3, 0), Decimal::new(6, 0));
    thresholds.portfolio.concentration_pct =
        Threshold::above(Decimal::new(25, 0), Decimal::new(40, 0));
    thresholds.portfolio.leverage = Threshold::above(Decimal::new(2, 0), Decimal::new(3, 0));
    thresholds.pattern.consecutive_losses =
        Threshold::above(Decimal::new(2, 0), Decimal::new(4, 0));
    thresholds.performance.loss_pct = Threshold::above(Decimal::new(2, 0), Decimal::new(4, 0));

    let mut config = SafetyConfiguration {
        name: CONSERVATIVE.to_string(),
        thresholds,
        ..SafetyConfiguration::default()
    };
    config.exit.exit_level = RiskLevel::High;
    config
}

/// The default configuration.
pub fn balanced() -> SafetyConfiguration {
    SafetyConfiguration {
        name: BALANCED.to_string(),
        ..SafetyConfiguration::default()
    }
}

/// Wide limits for high-turnover strategies.
pub fn aggressive() -> SafetyConfiguration {
    let mut thresholds = SafetyThresholds::default();
    thresholds.portfolio.drawdown_pct = Threshold::above(Decimal::new(10, 0), Decimal::new(20, 0));
    thresholds.portfolio.concentration_pct =
        Threshold::above(Decimal::new(60, 0), Decimal::new(85, 0));
    thresholds.portfolio.leverage = Threshold::above(Decimal::new(5, 0), Decimal::new(10, 0));
    thresholds.pattern.orders_per_hour =
        Threshold::above(Decimal::new(120, 0), Decimal::new(240, 0));
    thresholds.performance.loss_pct = Threshold::above(Decimal::new(6, 0), Decimal::new(12, 0));

    SafetyConfiguration {
        name: AGGRESSIVE.to_string(),
        thresholds,
        ..SafetyConfiguration::default()
    }
}

/// All built-in presets.
pub fn builtin() -> Vec<SafetyConfiguration> {
    vec![conservative(), balanced(), aggressive()]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ValidationLimits;

    #[test]
    fn test_builtin_presets_validate() {
        for preset in builtin() {
            let result = preset.validate(&ValidationLimits::default());
            assert!(result.valid, "{}: {:?}", preset.name, result.errors);
        }
    }
}
