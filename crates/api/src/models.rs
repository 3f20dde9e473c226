use safeguard_engine::events::EventBusStats;
use safeguard_engine::monitor::MonitoringStats;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_secs: i64,
}

/// Overall engine status.
#[derive(Debug, Clone, Serialize)]
pub struct StatusResponse {
    pub monitoring: MonitoringStats,
    pub configuration: String,
    pub configuration_version: u64,
    pub unresolved_alerts: usize,
    pub active_operations: usize,
    pub bus: EventBusStats,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResolveRequest {
    /// Defaults to "resolved manually".
    #[serde(default)]
    pub reason: Option<String>,
}
