//! Paper trading desk used by `simulate` and `serve`.
//!
//! Prices follow a geometric Brownian motion. Exits fill at the current
//! price unless a configured random rejection fires.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};
use rust_decimal::Decimal;
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use safeguard_domain::entities::{AccountState, HealthSnapshot, Position, TradeRecord};
use safeguard_domain::enums::PositionSide;
use safeguard_engine::exit::OperationRegistration;
use safeguard_engine::providers::{
    ExecutionClient, ExecutionResult, ExitParams, HealthProvider, MarketDataProvider,
};
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

/// Parameters of the simulated market.
#[derive(Debug, Clone)]
pub struct DeskSettings {
    pub symbol: String,
    pub initial_price: Decimal,
    pub capital: Decimal,
    pub quantity: Decimal,
    pub drift: f64,      // annualized drift (mu)
    pub volatility: f64, // annualized volatility (sigma)
    pub time_step: f64,  // years per step
    /// Probability that an exit is rejected.
    pub exit_failure_rate: f64,
    pub seed: Option<u64>,
}

impl Default for DeskSettings {
    fn default() -> Self {
        Self {
            symbol: "BTC-USD".to_string(),
            initial_price: Decimal::from(60_000),
            capital: Decimal::from(100_000),
            quantity: Decimal::ONE,
            drift: 0.0,
            volatility: 0.8,
            time_step: 1.0 / 365.0,
            exit_failure_rate: 0.0,
            seed: None,
        }
    }
}

struct DeskState {
    rng: StdRng,
    price: Decimal,
    realized_pnl: Decimal,
    peak_equity: Decimal,
    position: Option<Position>,
    trades: Vec<TradeRecord>,
}

impl DeskState {
    fn unrealized(&self) -> Decimal {
        self.position
            .as_ref()
            .map(Position::unrealized_pnl)
            .unwrap_or_default()
    }
}

pub struct PaperDesk {
    settings: DeskSettings,
    normal: Normal<f64>,
    state: Mutex<DeskState>,
}

impl PaperDesk {
    pub fn new(settings: DeskSettings) -> Result<Self> {
        let normal = Normal::new(0.0, 1.0).context("standard normal")?;
        let rng = match settings.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        let state = DeskState {
            rng,
            price: settings.initial_price,
            realized_pnl: Decimal::ZERO,
            peak_equity: settings.capital,
            position: None,
            trades: Vec::new(),
        };
        Ok(Self {
            settings,
            normal,
            state: Mutex::new(state),
        })
    }

    /// Opens a position at the current price and describes it for supervision.
    pub async fn open(&self, side: PositionSide) -> OperationRegistration {
        let mut state = self.state.lock().await;
        let price = state.price;
        state.position = Some(Position {
            symbol: self.settings.symbol.clone(),
            side,
            quantity: self.settings.quantity,
            entry_price: price,
            mark_price: price,
            opened_at: Utc::now(),
        });
        OperationRegistration::new(self.settings.symbol.clone(), side, self.settings.quantity, price)
    }

    pub async fn price(&self) -> Decimal {
        self.state.lock().await.price
    }

    pub async fn equity(&self) -> Decimal {
        let state = self.state.lock().await;
        self.settings.capital + state.realized_pnl + state.unrealized()
    }

    /// Moves the price one step along the path.
    pub async fn advance(&self) -> Decimal {
        let dt = self.settings.time_step;
        let vol = self.settings.volatility;
        let drift_term = (self.settings.drift - 0.5 * vol.powi(2)) * dt;
        let vol_term = vol * dt.sqrt();

        let mut state = self.state.lock().await;
        let z = self.normal.sample(&mut state.rng);
        let current = state.price.to_f64().unwrap_or(0.0) * (drift_term + vol_term * z).exp();
        state.price = Decimal::from_f64(current)
            .map(|p| p.round_dp(2))
            .unwrap_or(state.price);

        let price = state.price;
        if let Some(position) = state.position.as_mut() {
            position.mark_price = price;
        }
        let equity = self.settings.capital + state.realized_pnl + state.unrealized();
        state.peak_equity = state.peak_equity.max(equity);
        price
    }
}

#[async_trait]
impl MarketDataProvider for PaperDesk {
    async fn get_positions(&self) -> anyhow::Result<Vec<Position>> {
        Ok(self.state.lock().await.position.iter().cloned().collect())
    }

    async fn get_account_state(&self) -> anyhow::Result<AccountState> {
        let state = self.state.lock().await;
        let equity = self.settings.capital + state.realized_pnl + state.unrealized();
        Ok(AccountState {
            equity,
            peak_equity: state.peak_equity.max(equity),
            balance: self.settings.capital + state.realized_pnl,
            updated_at: Utc::now(),
        })
    }

    async fn get_recent_trades(&self, since: DateTime<Utc>) -> anyhow::Result<Vec<TradeRecord>> {
        let state = self.state.lock().await;
        Ok(state
            .trades
            .iter()
            .filter(|t| t.closed_at >= since)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl HealthProvider for PaperDesk {
    async fn get_health_snapshot(&self) -> anyhow::Result<HealthSnapshot> {
        let mut state = self.state.lock().await;
        Ok(HealthSnapshot {
            latency_ms: state.rng.random_range(20..180),
            error_rate_pct: Decimal::ZERO,
            data_staleness_ms: state.rng.random_range(100..1_500),
            observed_at: Utc::now(),
        })
    }
}

#[async_trait]
impl ExecutionClient for PaperDesk {
    async fn place_exit(
        &self,
        operation_id: Uuid,
        params: &ExitParams,
    ) -> anyhow::Result<ExecutionResult> {
        let mut state = self.state.lock().await;
        if state.rng.random::<f64>() < self.settings.exit_failure_rate {
            return Ok(ExecutionResult::rejected("paper venue rejected the order"));
        }

        let price = state.price;
        let Some(position) = state.position.take() else {
            return Ok(ExecutionResult::rejected("no open position"));
        };
        let mut closed = position.clone();
        closed.mark_price = price;
        let pnl = closed.unrealized_pnl();

        state.realized_pnl += pnl;
        state.trades.push(TradeRecord {
            symbol: position.symbol,
            side: position.side,
            quantity: position.quantity,
            entry_price: position.entry_price,
            exit_price: price,
            opened_at: position.opened_at,
            closed_at: Utc::now(),
            realized_pnl: pnl,
        });
        debug!(operation = %operation_id, symbol = %params.symbol, %price, %pnl, "Paper exit filled");
        Ok(ExecutionResult::filled(price))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn desk(exit_failure_rate: f64) -> PaperDesk {
        PaperDesk::new(DeskSettings {
            seed: Some(7),
            exit_failure_rate,
            ..Default::default()
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_seeded_paths_repeat() {
        let a = desk(0.0);
        let b = desk(0.0);
        for _ in 0..20 {
            assert_eq!(a.advance().await, b.advance().await);
        }
        assert!(a.price().await > Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_exit_closes_position_and_records_trade() {
        let desk = desk(0.0);
        let registration = desk.open(PositionSide::Long).await;
        desk.advance().await;

        let params = ExitParams {
            symbol: registration.symbol.clone(),
            side: registration.side,
            quantity: registration.quantity,
            reference_price: None,
            reason: "test".to_string(),
        };
        let result = desk.place_exit(registration.id, &params).await.unwrap();
        assert!(result.success);
        assert!(desk.get_positions().await.unwrap().is_empty());

        let trades = desk.get_recent_trades(DateTime::<Utc>::MIN_UTC).await.unwrap();
        assert_eq!(trades.len(), 1);
        assert_eq!(desk.equity().await, dec!(100000) + trades[0].realized_pnl);
    }

    #[tokio::test]
    async fn test_rejecting_venue() {
        let desk = desk(1.0);
        let registration = desk.open(PositionSide::Short).await;
        let params = ExitParams {
            symbol: registration.symbol,
            side: registration.side,
            quantity: registration.quantity,
            reference_price: None,
            reason: "test".to_string(),
        };
        let result = desk.place_exit(registration.id, &params).await.unwrap();
        assert!(!result.success);
        assert_eq!(desk.get_positions().await.unwrap().len(), 1);
    }
}
