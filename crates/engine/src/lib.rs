//! Safety monitoring and auto-exit engine.
//!
//! This crate watches a trading agent and closes its positions when risk
//! gets out of hand:
//! - Periodic risk assessment across portfolio, pattern, performance and
//!   system dimensions
//! - Deduplicated alerts with an acknowledge/resolve lifecycle
//! - Forced exits with bounded retries
//! - Hot-swappable, validated configuration with named presets
//!
//! Components talk through the [`events::EventBus`]; [`system::SafetySystem`]
//! builds and wires them.

/// Alert lifecycle and statistics.
pub mod alerts;
/// Safety configuration, validation and presets.
pub mod config;
/// Event types and the in-process bus.
pub mod events;
/// Operation registry and forced exits.
pub mod exit;
/// The periodic monitoring loop.
pub mod monitor;
/// Alert delivery.
pub mod notify;
/// Collaborator traits.
pub mod providers;
/// Risk evaluators and assessment types.
pub mod risk;
/// Configuration and alert-history persistence.
pub mod store;
/// Composition root.
pub mod system;

#[cfg(test)]
mod testing;

pub use system::{SafetySystem, SafetySystemBuilder};
