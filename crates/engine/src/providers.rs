//! Collaborators the engine consumes: market data, health and execution.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use safeguard_domain::entities::{AccountState, HealthSnapshot, Position, TradeRecord};
use safeguard_domain::enums::PositionSide;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Source of positions, account state and trade history.
///
/// Implementations do not need their own timeouts; the monitoring loop
/// bounds every call.
#[async_trait]
pub trait MarketDataProvider: Send + Sync {
    async fn get_positions(&self) -> anyhow::Result<Vec<Position>>;

    async fn get_account_state(&self) -> anyhow::Result<AccountState>;

    /// Closed trades with `closed_at >= since`.
    async fn get_recent_trades(&self, since: DateTime<Utc>) -> anyhow::Result<Vec<TradeRecord>>;
}

/// Source of infrastructure health signals.
#[async_trait]
pub trait HealthProvider: Send + Sync {
    async fn get_health_snapshot(&self) -> anyhow::Result<HealthSnapshot>;
}

/// What to close.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExitParams {
    pub symbol: String,
    /// Side of the position being closed.
    pub side: PositionSide,
    pub quantity: Decimal,
    /// Last known mark, if any.
    pub reference_price: Option<Decimal>,
    pub reason: String,
}

/// Outcome reported by the execution collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub success: bool,
    pub fill_price: Option<Decimal>,
    pub message: Option<String>,
}

impl ExecutionResult {
    pub fn filled(price: Decimal) -> Self {
        Self {
            success: true,
            fill_price: Some(price),
            message: None,
        }
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Self {
            success: false,
            fill_price: None,
            message: Some(message.into()),
        }
    }
}

/// Places exit orders. Order mechanics are the implementor's concern.
#[async_trait]
pub trait ExecutionClient: Send + Sync {
    async fn place_exit(
        &self,
        operation_id: Uuid,
        params: &ExitParams,
    ) -> anyhow::Result<ExecutionResult>;
}
