//! Domain types for the safeguard safety-monitoring engine.
//!
//! Value types shared by the engine, the API and the CLI:
//! - Risk dimensions, levels and severities
//! - Snapshots received from external collaborators
//! - The error taxonomy

pub mod entities;
pub mod enums;
pub mod error;

pub use error::{SafetyError, SafetyResult};
