//! Behavioural risk from the agent's own recent trading.

use super::{MetricReading, PatternRiskAssessment, seconds, window_start};
use crate::config::PatternThresholds;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use safeguard_domain::entities::{Position, TradeRecord};
use safeguard_domain::enums::{BreachCondition, RiskDimension};

/// `positions` contribute their entries when available.
pub fn assess_pattern(
    trades: &[TradeRecord],
    positions: Option<&[Position]>,
    thresholds: &PatternThresholds,
    elevated_fraction: Decimal,
    at: DateTime<Utc>,
) -> PatternRiskAssessment {
    let since = window_start(at, thresholds.window_secs);

    let mut recent: Vec<&TradeRecord> = trades.iter().filter(|t| t.closed_at >= since).collect();
    recent.sort_by_key(|t| t.closed_at);

    let consecutive_losses = recent.iter().rev().take_while(|t| t.is_loss()).count();

    let mut entries: Vec<(&str, DateTime<Utc>)> = recent
        .iter()
        .map(|t| (t.symbol.as_str(), t.opened_at))
        .collect();
    if let Some(positions) = positions {
        entries.extend(
            positions
                .iter()
                .filter(|p| p.opened_at >= since)
                .map(|p| (p.symbol.as_str(), p.opened_at)),
        );
    }

    let reentry_window = seconds(thresholds.rapid_reentry_secs);
    let rapid_reentries = entries
        .iter()
        .filter(|(symbol, opened_at)| {
            recent.iter().any(|t| {
                t.is_loss()
                    && t.symbol == *symbol
                    && t.closed_at <= *opened_at
                    && *opened_at - t.closed_at <= reentry_window
            })
        })
        .count();

    let orders_per_hour = Decimal::from(entries.len() as u64 * 3600)
        .checked_div(Decimal::from(thresholds.window_secs))
        .unwrap_or(Decimal::ZERO);

    let readings = vec![
        MetricReading::measure(
            BreachCondition::ConsecutiveLosses,
            Decimal::from(consecutive_losses as u64),
            thresholds.consecutive_losses,
            elevated_fraction,
        ),
        MetricReading::measure(
            BreachCondition::RapidReentry,
            Decimal::from(rapid_reentries as u64),
            thresholds.rapid_reentries,
            elevated_fraction,
        ),
        MetricReading::measure(
            BreachCondition::OrderFrequency,
            orders_per_hour,
            thresholds.orders_per_hour,
            elevated_fraction,
        ),
    ];

    PatternRiskAssessment::from_readings(RiskDimension::Pattern, readings, at)
}
