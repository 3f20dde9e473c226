//! Safety events and the bus that carries them between components.

mod bus;
mod types;

pub use bus::{EventBus, EventBusConfig, EventBusStats, EventHandler, SubscriptionId};
pub use types::{EventKind, OperationStateChange, SafetyEvent};
