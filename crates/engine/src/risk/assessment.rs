use crate::config::Threshold;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use safeguard_domain::entities::{AccountState, HealthSnapshot, Position, TradeRecord};
use safeguard_domain::enums::{BreachCondition, RiskDimension, RiskLevel};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One measured metric against its threshold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricReading {
    pub condition: BreachCondition,
    pub value: Decimal,
    pub threshold: Threshold,
    pub level: RiskLevel,
    /// 0 to 100.
    pub score: Decimal,
}

impl MetricReading {
    pub fn measure(
        condition: BreachCondition,
        value: Decimal,
        threshold: Threshold,
        elevated_fraction: Decimal,
    ) -> Self {
        Self {
            condition,
            value,
            threshold,
            level: threshold.level(value, elevated_fraction),
            score: threshold.score(value),
        }
    }

    /// A breach is a reading at `high` or above.
    pub fn is_breach(&self) -> bool {
        self.level.is_breach()
    }
}

/// Risk view of one dimension for one tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DimensionAssessment {
    pub dimension: RiskDimension,
    pub score: Decimal,
    pub level: RiskLevel,
    pub readings: Vec<MetricReading>,
    /// Set when the inputs for this dimension could not be obtained.
    pub degraded: Option<String>,
    pub assessed_at: DateTime<Utc>,
}

pub type PortfolioRiskAssessment = DimensionAssessment;
pub type PatternRiskAssessment = DimensionAssessment;
pub type PerformanceRiskAssessment = DimensionAssessment;
pub type SystemRiskAssessment = DimensionAssessment;

impl DimensionAssessment {
    /// Level and score are the worst of the readings.
    pub fn from_readings(
        dimension: RiskDimension,
        readings: Vec<MetricReading>,
        assessed_at: DateTime<Utc>,
    ) -> Self {
        let level = readings
            .iter()
            .map(|r| r.level)
            .max()
            .unwrap_or_default();
        let score = readings
            .iter()
            .map(|r| r.score)
            .max()
            .unwrap_or(Decimal::ZERO);
        Self {
            dimension,
            score,
            level,
            readings,
            degraded: None,
            assessed_at,
        }
    }

    /// An assessment for a dimension whose inputs were unavailable.
    pub fn degraded(
        dimension: RiskDimension,
        reason: impl Into<String>,
        level: RiskLevel,
        assessed_at: DateTime<Utc>,
    ) -> Self {
        Self {
            dimension,
            score: Decimal::ZERO,
            level,
            readings: Vec::new(),
            degraded: Some(reason.into()),
            assessed_at,
        }
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded.is_some()
    }

    pub fn breaches(&self) -> impl Iterator<Item = &MetricReading> {
        self.readings.iter().filter(|r| r.is_breach())
    }
}

/// The merged result of one tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComprehensiveRiskAssessment {
    pub tick: u64,
    pub portfolio: PortfolioRiskAssessment,
    pub pattern: PatternRiskAssessment,
    pub performance: PerformanceRiskAssessment,
    pub system: SystemRiskAssessment,
    /// Max of the four dimension levels.
    pub overall_level: RiskLevel,
    /// Max of the four dimension scores.
    pub overall_score: Decimal,
    pub degraded_dimensions: Vec<RiskDimension>,
    /// Mark price per symbol at snapshot time.
    pub prices: BTreeMap<String, Decimal>,
    pub assessed_at: DateTime<Utc>,
}

impl ComprehensiveRiskAssessment {
    pub fn merge(
        tick: u64,
        portfolio: PortfolioRiskAssessment,
        pattern: PatternRiskAssessment,
        performance: PerformanceRiskAssessment,
        system: SystemRiskAssessment,
        prices: BTreeMap<String, Decimal>,
        assessed_at: DateTime<Utc>,
    ) -> Self {
        let dims = [&portfolio, &pattern, &performance, &system];
        let overall_level = dims.iter().map(|d| d.level).max().unwrap_or_default();
        let overall_score = dims
            .iter()
            .map(|d| d.score)
            .max()
            .unwrap_or(Decimal::ZERO);
        let degraded_dimensions = dims
            .iter()
            .filter(|d| d.is_degraded())
            .map(|d| d.dimension)
            .collect();

        Self {
            tick,
            portfolio,
            pattern,
            performance,
            system,
            overall_level,
            overall_score,
            degraded_dimensions,
            prices,
            assessed_at,
        }
    }

    /// The assessment published when a tick itself failed.
    ///
    /// Carries a `tick_failure` breach on the system dimension; every
    /// dimension is marked degraded.
    pub fn tick_failure(
        tick: u64,
        reason: &str,
        degraded_level: RiskLevel,
        assessed_at: DateTime<Utc>,
    ) -> Self {
        let degraded = |dimension| {
            DimensionAssessment::degraded(
                dimension,
                format!("tick failed: {reason}"),
                degraded_level,
                assessed_at,
            )
        };

        let reading = MetricReading::measure(
            BreachCondition::TickFailure,
            Decimal::ONE,
            Threshold::above(Decimal::ONE, Decimal::TWO),
            Decimal::ONE,
        );
        let mut system = DimensionAssessment::from_readings(
            RiskDimension::System,
            vec![reading],
            assessed_at,
        );
        system.level = system.level.max(degraded_level);
        system.degraded = Some(format!("tick failed: {reason}"));

        Self::merge(
            tick,
            degraded(RiskDimension::Portfolio),
            degraded(RiskDimension::Pattern),
            degraded(RiskDimension::Performance),
            system,
            BTreeMap::new(),
            assessed_at,
        )
    }

    pub fn dimensions(&self) -> [&DimensionAssessment; 4] {
        [&self.portfolio, &self.pattern, &self.performance, &self.system]
    }

    pub fn dimension(&self, dimension: RiskDimension) -> &DimensionAssessment {
        match dimension {
            RiskDimension::Portfolio => &self.portfolio,
            RiskDimension::Pattern => &self.pattern,
            RiskDimension::Performance => &self.performance,
            RiskDimension::System => &self.system,
        }
    }

    /// Every breaching reading with its dimension.
    pub fn breaches(&self) -> impl Iterator<Item = (&DimensionAssessment, &MetricReading)> {
        self.dimensions()
            .into_iter()
            .flat_map(|d| d.breaches().map(move |r| (d, r)))
    }
}

/// Inputs gathered for one tick. Each source is independent.
#[derive(Debug, Clone)]
pub struct RiskSnapshot {
    pub positions: Result<Vec<Position>, String>,
    pub account: Result<AccountState, String>,
    pub trades: Result<Vec<TradeRecord>, String>,
    pub health: Result<HealthSnapshot, String>,
    pub taken_at: DateTime<Utc>,
}
