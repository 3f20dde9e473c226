use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Account-level state as reported by the market data provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountState {
    /// Current equity including unrealized PnL.
    pub equity: Decimal,
    /// Highest equity observed for the session.
    pub peak_equity: Decimal,
    /// Cash balance.
    pub balance: Decimal,
    pub updated_at: DateTime<Utc>,
}

impl AccountState {
    /// Drawdown from peak equity as a percentage. Saturates on overflow.
    pub fn drawdown_pct(&self) -> Decimal {
        if self.peak_equity <= Decimal::ZERO || self.equity >= self.peak_equity {
            return Decimal::ZERO;
        }
        self.peak_equity
            .saturating_sub(self.equity)
            .checked_div(self.peak_equity)
            .map(|ratio| ratio.saturating_mul(Decimal::ONE_HUNDRED))
            .unwrap_or(Decimal::MAX)
    }
}
