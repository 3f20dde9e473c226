//! Infrastructure health risk.

use super::{MetricReading, SystemRiskAssessment};
use crate::config::SystemThresholds;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use safeguard_domain::entities::HealthSnapshot;
use safeguard_domain::enums::{BreachCondition, RiskDimension};

pub fn assess_system(
    health: &HealthSnapshot,
    thresholds: &SystemThresholds,
    elevated_fraction: Decimal,
    at: DateTime<Utc>,
) -> SystemRiskAssessment {
    let readings = vec![
        MetricReading::measure(
            BreachCondition::ApiLatency,
            Decimal::from(health.latency_ms),
            thresholds.api_latency_ms,
            elevated_fraction,
        ),
        MetricReading::measure(
            BreachCondition::ErrorRate,
            health.error_rate_pct,
            thresholds.error_rate_pct,
            elevated_fraction,
        ),
        MetricReading::measure(
            BreachCondition::DataStaleness,
            Decimal::from(health.data_staleness_ms),
            thresholds.data_staleness_ms,
            elevated_fraction,
        ),
    ];

    SystemRiskAssessment::from_readings(RiskDimension::System, readings, at)
}
