use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use safeguard_domain::enums::{MonitorState, RiskLevel};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// A snapshot call made on every tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotSource {
    Positions,
    Account,
    Trades,
    Health,
}

impl SnapshotSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Positions => "positions",
            Self::Account => "account",
            Self::Trades => "trades",
            Self::Health => "health",
        }
    }
}

impl fmt::Display for SnapshotSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure counters for one snapshot source.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceStats {
    pub timeouts: u64,
    pub errors: u64,
}

/// Timing counters of the loop's scheduler.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TimerCoordinatorStats {
    pub cycles: u64,
    /// Deadlines skipped because a cycle overran.
    pub missed_deadlines: u64,
    /// Cycles skipped because monitoring was disabled.
    pub disabled_cycles: u64,
    pub sources: BTreeMap<SnapshotSource, SourceStats>,
    pub last_cycle_at: Option<DateTime<Utc>>,
}

impl TimerCoordinatorStats {
    pub(crate) fn source(&mut self, source: SnapshotSource) -> &mut SourceStats {
        self.sources.entry(source).or_default()
    }
}

/// Status of the monitoring loop.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MonitoringStats {
    pub state: MonitorState,
    pub ticks_run: u64,
    pub ticks_failed: u64,
    pub last_tick: Option<u64>,
    pub last_level: Option<RiskLevel>,
    pub last_score: Option<Decimal>,
    pub last_tick_at: Option<DateTime<Utc>>,
    pub mean_tick_latency_ms: f64,
    pub last_error: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub timer: TimerCoordinatorStats,
}

impl MonitoringStats {
    pub(crate) fn record_latency(&mut self, latency_ms: f64) {
        let n = (self.ticks_run + self.ticks_failed) as f64;
        if n <= 1.0 {
            self.mean_tick_latency_ms = latency_ms;
        } else {
            self.mean_tick_latency_ms += (latency_ms - self.mean_tick_latency_ms) / n;
        }
    }
}
