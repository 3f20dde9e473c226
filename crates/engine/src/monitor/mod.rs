//! Core monitoring loop and its statistics.

mod monitoring_loop;
mod stats;

pub use monitoring_loop::MonitoringLoop;
pub use stats::{MonitoringStats, SnapshotSource, SourceStats, TimerCoordinatorStats};
