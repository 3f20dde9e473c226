//! Configuration management.
//!
//! Typed settings with defaults, validation, built-in presets and the
//! [`ConfigurationManager`] that owns the single active configuration.

mod manager;
pub mod presets;
mod settings;
mod thresholds;

pub use manager::ConfigurationManager;
pub use settings::{
    AlertSettings, ConfigurationUpdate, ExitSettings, MonitoringSettings, SafetyConfiguration,
    SeverityMap, ValidationLimits, ValidationResult,
};
pub use thresholds::{
    PatternThresholds, PerformanceThresholds, PortfolioThresholds, SafetyThresholds,
    SystemThresholds, Threshold, ThresholdDirection,
};
