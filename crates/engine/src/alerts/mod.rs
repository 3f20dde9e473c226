//! Alert management: lifecycle, deduplication and statistics.

mod manager;
mod types;

pub use manager::{AlertManager, AssessmentOutcome};
pub use types::{AlertFilter, AlertKey, AlertStatistics, SafetyAlert};
