//! Operation registry and forced exits.

mod manager;
mod types;

pub use manager::AutoExitManager;
pub use types::{ExitReason, OperationRecord, OperationRegistration, SafetyAction};
