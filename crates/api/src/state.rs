use chrono::{DateTime, Utc};
use safeguard_engine::SafetySystem;
use std::sync::Arc;

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub system: Arc<SafetySystem>,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    pub fn new(system: Arc<SafetySystem>) -> Self {
        Self {
            system,
            started_at: Utc::now(),
        }
    }

    pub fn uptime_secs(&self) -> i64 {
        (Utc::now() - self.started_at).num_seconds()
    }
}
