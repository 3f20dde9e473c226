//! Risk assessment across the portfolio, pattern, performance and system dimensions.

mod assessment;
mod assessor;
mod pattern;
mod performance;
mod portfolio;
mod system;

pub use assessment::{
    ComprehensiveRiskAssessment, DimensionAssessment, MetricReading, PatternRiskAssessment,
    PerformanceRiskAssessment, PortfolioRiskAssessment, RiskSnapshot, SystemRiskAssessment,
};
pub use assessor::RiskAssessor;
pub use pattern::assess_pattern;
pub use performance::assess_performance;
pub use portfolio::assess_portfolio;
pub use system::assess_system;

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;

/// `part / whole * 100`, saturating at `Decimal::MAX` for a non-positive whole.
pub(crate) fn ratio_pct(part: Decimal, whole: Decimal) -> Decimal {
    if whole <= Decimal::ZERO {
        return Decimal::MAX;
    }
    part.checked_div(whole)
        .and_then(|r| r.checked_mul(Decimal::ONE_HUNDRED))
        .unwrap_or(Decimal::MAX)
}

pub(crate) fn seconds(secs: u64) -> Duration {
    Duration::try_seconds(i64::try_from(secs).unwrap_or(i64::MAX)).unwrap_or(Duration::MAX)
}

/// Start of a rolling window ending at `at`.
pub(crate) fn window_start(at: DateTime<Utc>, window_secs: u64) -> DateTime<Utc> {
    at.checked_sub_signed(seconds(window_secs))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}
