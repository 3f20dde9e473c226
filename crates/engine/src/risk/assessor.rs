use super::{
    ComprehensiveRiskAssessment, DimensionAssessment, RiskSnapshot, assess_pattern,
    assess_performance, assess_portfolio, assess_system,
};
use crate::config::SafetyConfiguration;
use safeguard_domain::enums::RiskDimension;
use std::collections::BTreeMap;
use tracing::debug;

/// Computes the four dimension views from one snapshot.
///
/// Stateless: every call recomputes from the snapshot it is given. A
/// dimension whose inputs failed is reported as degraded at the configured
/// level; the others are unaffected.
#[derive(Debug, Clone, Copy, Default)]
pub struct RiskAssessor;

impl RiskAssessor {
    pub fn assess(
        &self,
        snapshot: &RiskSnapshot,
        config: &SafetyConfiguration,
        tick: u64,
    ) -> ComprehensiveRiskAssessment {
        let thresholds = &config.thresholds;
        let fraction = thresholds.elevated_fraction;
        let at = snapshot.taken_at;
        let degraded = |dimension: RiskDimension, reason: String| {
            debug!(dimension = %dimension, reason = %reason, "Dimension degraded");
            DimensionAssessment::degraded(dimension, reason, config.degraded_level, at)
        };

        let portfolio = match (&snapshot.positions, &snapshot.account) {
            (Ok(positions), Ok(account)) => {
                assess_portfolio(positions, account, &thresholds.portfolio, fraction, at)
            }
            (positions, account) => degraded(
                RiskDimension::Portfolio,
                failure_reason(&[
                    ("positions", positions.as_ref().err()),
                    ("account", account.as_ref().err()),
                ]),
            ),
        };

        let pattern = match &snapshot.trades {
            Ok(trades) => assess_pattern(
                trades,
                snapshot.positions.as_deref().ok(),
                &thresholds.pattern,
                fraction,
                at,
            ),
            Err(e) => degraded(
                RiskDimension::Pattern,
                failure_reason(&[("trades", Some(e))]),
            ),
        };

        let performance = match (&snapshot.trades, &snapshot.positions, &snapshot.account) {
            (Ok(trades), Ok(positions), Ok(account)) => assess_performance(
                trades,
                positions,
                account,
                &thresholds.performance,
                fraction,
                at,
            ),
            (trades, positions, account) => degraded(
                RiskDimension::Performance,
                failure_reason(&[
                    ("trades", trades.as_ref().err()),
                    ("positions", positions.as_ref().err()),
                    ("account", account.as_ref().err()),
                ]),
            ),
        };

        let system = match &snapshot.health {
            Ok(health) => assess_system(health, &thresholds.system, fraction, at),
            Err(e) => degraded(RiskDimension::System, failure_reason(&[("health", Some(e))])),
        };

        let prices: BTreeMap<String, _> = snapshot
            .positions
            .as_deref()
            .unwrap_or_default()
            .iter()
            .map(|p| (p.symbol.clone(), p.mark_price))
            .collect();

        ComprehensiveRiskAssessment::merge(tick, portfolio, pattern, performance, system, prices, at)
    }
}

fn failure_reason(sources: &[(&str, Option<&String>)]) -> String {
    sources
        .iter()
        .filter_map(|(name, err)| err.map(|e| format!("{name}: {e}")))
        .collect::<Vec<_>>()
        .join("; ")
}
