use crate::enums::PositionSide;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// An open position as reported by the market data provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub symbol: String,
    pub side: PositionSide,
    pub quantity: Decimal,
    pub entry_price: Decimal,
    pub mark_price: Decimal,
    pub opened_at: DateTime<Utc>,
}

impl Position {
    /// Current notional exposure, always non-negative. Saturates on overflow.
    pub fn notional(&self) -> Decimal {
        self.quantity.saturating_mul(self.mark_price).abs()
    }

    pub fn entry_notional(&self) -> Decimal {
        self.quantity.saturating_mul(self.entry_price).abs()
    }

    pub fn unrealized_pnl(&self) -> Decimal {
        let diff = self.mark_price.saturating_sub(self.entry_price);
        let quantity = self.quantity.abs();
        match self.side {
            PositionSide::Long => diff.saturating_mul(quantity),
            PositionSide::Short => (-diff).saturating_mul(quantity),
        }
    }

    /// Unrealized loss as a positive percentage of entry notional (zero when in profit).
    pub fn drawdown_pct(&self) -> Decimal {
        let entry = self.entry_notional();
        if entry.is_zero() {
            return Decimal::ZERO;
        }
        let pnl = self.unrealized_pnl();
        if pnl >= Decimal::ZERO {
            return Decimal::ZERO;
        }
        (-pnl)
            .checked_div(entry)
            .map(|ratio| ratio.saturating_mul(Decimal::ONE_HUNDRED))
            .unwrap_or(Decimal::MAX)
    }
}
