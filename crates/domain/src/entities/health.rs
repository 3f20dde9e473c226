use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Infrastructure health signals supplied by the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthSnapshot {
    /// Exchange API round-trip latency.
    pub latency_ms: u64,
    /// API error rate over the provider's own window, as a percentage.
    pub error_rate_pct: Decimal,
    /// Age of the freshest market data.
    pub data_staleness_ms: u64,
    pub observed_at: DateTime<Utc>,
}
