//! Exposure risk: drawdown, concentration and leverage.

use super::{MetricReading, PortfolioRiskAssessment, ratio_pct};
use crate::config::PortfolioThresholds;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use safeguard_domain::entities::{AccountState, Position};
use safeguard_domain::enums::{BreachCondition, RiskDimension};

pub fn assess_portfolio(
    positions: &[Position],
    account: &AccountState,
    thresholds: &PortfolioThresholds,
    elevated_fraction: Decimal,
    at: DateTime<Utc>,
) -> PortfolioRiskAssessment {
    let worst_position = positions
        .iter()
        .map(Position::drawdown_pct)
        .max()
        .unwrap_or(Decimal::ZERO);
    let drawdown = account.drawdown_pct().max(worst_position);

    let largest = positions
        .iter()
        .map(Position::notional)
        .max()
        .unwrap_or(Decimal::ZERO);
    let gross = positions
        .iter()
        .map(Position::notional)
        .fold(Decimal::ZERO, |acc, n| acc.saturating_add(n));

    let (concentration, leverage) = if account.equity <= Decimal::ZERO {
        // No equity left to carry the book.
        let concentration = if positions.is_empty() {
            Decimal::ZERO
        } else {
            Decimal::ONE_HUNDRED
        };
        (concentration, Decimal::MAX)
    } else {
        (
            ratio_pct(largest, account.equity),
            gross.checked_div(account.equity).unwrap_or(Decimal::MAX),
        )
    };

    let readings = vec![
        MetricReading::measure(
            BreachCondition::Drawdown,
            drawdown,
            thresholds.drawdown_pct,
            elevated_fraction,
        ),
        MetricReading::measure(
            BreachCondition::Concentration,
            concentration,
            thresholds.concentration_pct,
            elevated_fraction,
        ),
        MetricReading::measure(
            BreachCondition::Leverage,
            leverage,
            thresholds.leverage,
            elevated_fraction,
        ),
    ];

    PortfolioRiskAssessment::from_readings(RiskDimension::Portfolio, readings, at)
}
