//! Scripted collaborators and fixtures shared by the unit tests.

use crate::alerts::SafetyAlert;
use crate::config::SafetyConfiguration;
use crate::notify::Notifier;
use crate::providers::{
    ExecutionClient, ExecutionResult, ExitParams, HealthProvider, MarketDataProvider,
};
use crate::risk::{ComprehensiveRiskAssessment, RiskAssessor, RiskSnapshot};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use safeguard_domain::entities::{AccountState, HealthSnapshot, Position, TradeRecord};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use uuid::Uuid;

pub fn account(equity: Decimal, peak: Decimal) -> AccountState {
    AccountState {
        equity,
        peak_equity: peak,
        balance: equity,
        updated_at: Utc::now(),
    }
}

pub fn healthy() -> HealthSnapshot {
    HealthSnapshot {
        latency_ms: 40,
        error_rate_pct: Decimal::ZERO,
        data_staleness_ms: 200,
        observed_at: Utc::now(),
    }
}

/// Assessment whose only non-normal metric is the account drawdown.
pub fn assessment_with_drawdown(tick: u64, drawdown_pct: Decimal) -> ComprehensiveRiskAssessment {
    let equity = dec!(10000) - dec!(100) * drawdown_pct;
    let snapshot = RiskSnapshot {
        positions: Ok(Vec::new()),
        account: Ok(account(equity, dec!(10000))),
        trades: Ok(Vec::new()),
        health: Ok(healthy()),
        taken_at: Utc::now(),
    };
    RiskAssessor.assess(&snapshot, &SafetyConfiguration::default(), tick)
}

/// Market whose account equity can be changed between ticks.
pub struct ScriptedMarket {
    equity: Mutex<Decimal>,
    positions: Mutex<Vec<Position>>,
    pub delay: Mutex<Option<Duration>>,
    pub panic_next: AtomicBool,
    pub calls: AtomicU64,
}

impl Default for ScriptedMarket {
    fn default() -> Self {
        Self {
            equity: Mutex::new(dec!(10000)),
            positions: Mutex::new(Vec::new()),
            delay: Mutex::new(None),
            panic_next: AtomicBool::new(false),
            calls: AtomicU64::new(0),
        }
    }
}

impl ScriptedMarket {
    pub async fn set_drawdown(&self, pct: Decimal) {
        *self.equity.lock().await = dec!(10000) - dec!(100) * pct;
    }

    pub async fn set_positions(&self, positions: Vec<Position>) {
        *self.positions.lock().await = positions;
    }
}

#[async_trait]
impl MarketDataProvider for ScriptedMarket {
    async fn get_positions(&self) -> anyhow::Result<Vec<Position>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.panic_next.swap(false, Ordering::SeqCst) {
            panic!("scripted market panic");
        }
        let delay = *self.delay.lock().await;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(self.positions.lock().await.clone())
    }

    async fn get_account_state(&self) -> anyhow::Result<AccountState> {
        Ok(account(*self.equity.lock().await, dec!(10000)))
    }

    async fn get_recent_trades(&self, _since: DateTime<Utc>) -> anyhow::Result<Vec<TradeRecord>> {
        Ok(Vec::new())
    }
}

/// Health provider that is always healthy, or always failing.
#[derive(Default)]
pub struct StaticHealth {
    pub failing: AtomicBool,
}

#[async_trait]
impl HealthProvider for StaticHealth {
    async fn get_health_snapshot(&self) -> anyhow::Result<HealthSnapshot> {
        if self.failing.load(Ordering::SeqCst) {
            anyhow::bail!("health endpoint unreachable");
        }
        Ok(healthy())
    }
}

/// Execution client that fails a scripted number of times before filling.
pub struct ScriptedExecution {
    outcomes: Mutex<VecDeque<bool>>,
    pub attempts: AtomicU32,
    pub calls: Mutex<Vec<Uuid>>,
}

impl ScriptedExecution {
    /// `failures` rejections, then fills forever.
    pub fn failing(failures: u32) -> Self {
        Self {
            outcomes: Mutex::new((0..failures).map(|_| false).collect()),
            attempts: AtomicU32::new(0),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }
}

impl Default for ScriptedExecution {
    fn default() -> Self {
        Self::failing(0)
    }
}

#[async_trait]
impl ExecutionClient for ScriptedExecution {
    async fn place_exit(
        &self,
        operation_id: Uuid,
        params: &ExitParams,
    ) -> anyhow::Result<ExecutionResult> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        self.calls.lock().await.push(operation_id);
        let fill = self.outcomes.lock().await.pop_front().unwrap_or(true);
        if fill {
            Ok(ExecutionResult::filled(
                params.reference_price.unwrap_or(Decimal::ONE),
            ))
        } else {
            anyhow::bail!("venue rejected exit")
        }
    }
}

/// Execution client whose calls never complete.
#[derive(Default)]
pub struct HangingExecution {
    pub attempts: AtomicU32,
}

impl HangingExecution {
    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ExecutionClient for HangingExecution {
    async fn place_exit(
        &self,
        _operation_id: Uuid,
        _params: &ExitParams,
    ) -> anyhow::Result<ExecutionResult> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        std::future::pending().await
    }
}

/// Notifier whose deliveries never complete.
#[derive(Default)]
pub struct HangingNotifier {
    pub calls: AtomicU32,
}

#[async_trait]
impl Notifier for HangingNotifier {
    async fn deliver(&self, _alert: &SafetyAlert) -> anyhow::Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        std::future::pending().await
    }
}

/// Records every delivered alert.
#[derive(Default)]
pub struct RecordingNotifier {
    delivered: Mutex<Vec<SafetyAlert>>,
}

impl RecordingNotifier {
    pub async fn delivered(&self) -> Vec<SafetyAlert> {
        self.delivered.lock().await.clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn deliver(&self, alert: &SafetyAlert) -> anyhow::Result<()> {
        self.delivered.lock().await.push(alert.clone());
        Ok(())
    }
}

/// Polls `f` until it returns true or two seconds elapse.
pub async fn eventually<F, Fut>(f: F) -> bool
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..400 {
        if f().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    false
}
