//! PnL trend over a rolling window.

use super::{MetricReading, PerformanceRiskAssessment, ratio_pct, window_start};
use crate::config::PerformanceThresholds;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use safeguard_domain::entities::{AccountState, Position, TradeRecord};
use safeguard_domain::enums::{BreachCondition, RiskDimension};

pub fn assess_performance(
    trades: &[TradeRecord],
    positions: &[Position],
    account: &AccountState,
    thresholds: &PerformanceThresholds,
    elevated_fraction: Decimal,
    at: DateTime<Utc>,
) -> PerformanceRiskAssessment {
    let since = window_start(at, thresholds.window_secs);
    let recent: Vec<&TradeRecord> = trades.iter().filter(|t| t.closed_at >= since).collect();

    let realized = recent
        .iter()
        .fold(Decimal::ZERO, |acc, t| acc.saturating_add(t.realized_pnl));
    let unrealized = positions
        .iter()
        .fold(Decimal::ZERO, |acc, p| acc.saturating_add(p.unrealized_pnl()));
    let net = realized.saturating_add(unrealized);

    let loss_pct = if net >= Decimal::ZERO {
        Decimal::ZERO
    } else {
        ratio_pct(-net, account.equity)
    };

    let mut readings = vec![MetricReading::measure(
        BreachCondition::Loss,
        loss_pct,
        thresholds.loss_pct,
        elevated_fraction,
    )];

    if !recent.is_empty() && recent.len() as u64 >= u64::from(thresholds.min_trades) {
        let wins = recent.iter().filter(|t| t.realized_pnl > Decimal::ZERO).count();
        let win_rate = ratio_pct(
            Decimal::from(wins as u64),
            Decimal::from(recent.len() as u64),
        );
        readings.push(MetricReading::measure(
            BreachCondition::WinRate,
            win_rate,
            thresholds.win_rate_pct,
            elevated_fraction,
        ));
    }

    PerformanceRiskAssessment::from_readings(RiskDimension::Performance, readings, at)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use rust_decimal_macros::dec;
    use safeguard_domain::enums::{PositionSide, RiskLevel};

    fn trade(pnl: Decimal) -> TradeRecord {
        let now = Utc::now();
        TradeRecord {
            symbol: "BTC-USD".to_string(),
            side: PositionSide::Long,
            quantity: dec!(1),
            entry_price: dec!(100),
            exit_price: dec!(100) + pnl,
            opened_at: now - Duration::seconds(120),
            closed_at: now - Duration::seconds(60),
            realized_pnl: pnl,
        }
    }

    fn account() -> AccountState {
        AccountState {
            equity: dec!(10000),
            peak_equity: dec!(10000),
            balance: dec!(10000),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_loss_includes_unrealized() {
        let trades = vec![trade(dec!(-200)), trade(dec!(50))];
        let position = Position {
            symbol: "ETH-USD".to_string(),
            side: PositionSide::Short,
            quantity: dec!(2),
            entry_price: dec!(1000),
            mark_price: dec!(1125),
            opened_at: Utc::now(),
        };
        let a = assess_performance(
            &trades,
            &[position],
            &account(),
            &PerformanceThresholds::default(),
            dec!(0.75),
            Utc::now(),
        );
        // -200 + 50 - 250 = -400 on 10 000 equity.
        assert_eq!(a.readings[0].value, dec!(4));
        assert_eq!(a.level, RiskLevel::High);
        assert_eq!(a.readings.len(), 1);
    }

    #[test]
    fn test_win_rate_needs_min_trades() {
        let mut trades: Vec<TradeRecord> = (0..8).map(|_| trade(dec!(-1))).collect();
        trades.extend((0..2).map(|_| trade(dec!(1))));
        let a = assess_performance(
            &trades,
            &[],
            &account(),
            &PerformanceThresholds::default(),
            dec!(0.75),
            Utc::now(),
        );
        let win_rate = a
            .readings
            .iter()
            .find(|r| r.condition == BreachCondition::WinRate)
            .unwrap();
        assert_eq!(win_rate.value, dec!(20));
        assert_eq!(win_rate.level, RiskLevel::Critical);

        let a = assess_performance(
            &trades[..5],
            &[],
            &account(),
            &PerformanceThresholds::default(),
            dec!(0.75),
            Utc::now(),
        );
        assert!(a.readings.iter().all(|r| r.condition != BreachCondition::WinRate));
    }
}
