//! Request handlers. Each one is a thin adapter over [`SafetySystem`].
//!
//! [`SafetySystem`]: safeguard_engine::SafetySystem

use crate::error::ApiError;
use crate::models::{HealthResponse, ResolveRequest, StatusResponse};
use crate::state::AppState;
use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use safeguard_domain::SafetyError;
use safeguard_engine::alerts::{AlertFilter, AlertStatistics, SafetyAlert};
use safeguard_engine::config::{ConfigurationUpdate, SafetyConfiguration, ValidationResult};
use safeguard_engine::exit::{OperationRecord, OperationRegistration, SafetyAction};
use safeguard_engine::monitor::MonitoringStats;
use safeguard_engine::risk::ComprehensiveRiskAssessment;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

type ApiResult<T> = Result<Json<T>, ApiError>;

fn parse_id(raw: &str) -> Result<Uuid, ApiError> {
    Uuid::parse_str(raw).map_err(|_| ApiError::BadRequest(format!("invalid id: {raw}")))
}

// Health and status

pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: state.uptime_secs(),
    })
}

pub async fn status(State(state): State<AppState>) -> Json<StatusResponse> {
    let system = &state.system;
    let configuration = system.configuration().await;
    let alerts = system.alert_statistics().await;
    Json(StatusResponse {
        monitoring: system.status().await,
        configuration: configuration.name.clone(),
        configuration_version: configuration.version,
        unresolved_alerts: alerts.open + alerts.acknowledged,
        active_operations: system.operations().await.len(),
        bus: system.bus_stats(),
    })
}

// Monitoring

pub async fn start_monitor(State(state): State<AppState>) -> Json<MonitoringStats> {
    info!("Monitoring start requested");
    state.system.start().await;
    Json(state.system.status().await)
}

pub async fn stop_monitor(State(state): State<AppState>) -> Json<MonitoringStats> {
    info!("Monitoring stop requested");
    state.system.stop().await;
    Json(state.system.status().await)
}

pub async fn latest_assessment(
    State(state): State<AppState>,
) -> ApiResult<Arc<ComprehensiveRiskAssessment>> {
    state
        .system
        .latest_assessment()
        .await
        .map(Json)
        .ok_or_else(|| SafetyError::not_found("assessment", "latest").into())
}

pub async fn risk_history(
    State(state): State<AppState>,
) -> Json<Vec<Arc<ComprehensiveRiskAssessment>>> {
    Json(state.system.risk_history().await)
}

// Alerts

pub async fn list_alerts(
    State(state): State<AppState>,
    Query(filter): Query<AlertFilter>,
) -> Json<Vec<SafetyAlert>> {
    Json(state.system.list_alerts(&filter).await)
}

pub async fn alert_statistics(State(state): State<AppState>) -> Json<AlertStatistics> {
    Json(state.system.alert_statistics().await)
}

pub async fn get_alert(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<SafetyAlert> {
    let id = parse_id(&id)?;
    Ok(Json(state.system.get_alert(id).await?))
}

pub async fn acknowledge_alert(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<SafetyAlert> {
    let id = parse_id(&id)?;
    Ok(Json(state.system.acknowledge(id).await?))
}

pub async fn resolve_alert(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<ResolveRequest>,
) -> ApiResult<SafetyAlert> {
    let id = parse_id(&id)?;
    let reason = request
        .reason
        .unwrap_or_else(|| "resolved manually".to_string());
    Ok(Json(state.system.resolve(id, reason).await?))
}

// Configuration

pub async fn get_configuration(State(state): State<AppState>) -> Json<Arc<SafetyConfiguration>> {
    Json(state.system.configuration().await)
}

pub async fn update_configuration(
    State(state): State<AppState>,
    Json(update): Json<ConfigurationUpdate>,
) -> ApiResult<Arc<SafetyConfiguration>> {
    Ok(Json(state.system.update_configuration(update).await?))
}

pub async fn validate_configuration(
    State(state): State<AppState>,
    Json(update): Json<ConfigurationUpdate>,
) -> Json<ValidationResult> {
    Json(state.system.validate_configuration(&update).await)
}

pub async fn list_presets(State(state): State<AppState>) -> Json<Vec<Arc<SafetyConfiguration>>> {
    Json(state.system.presets().await)
}

pub async fn activate_preset(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<Arc<SafetyConfiguration>> {
    Ok(Json(state.system.activate_preset(&name).await?))
}

// Operations

pub async fn list_operations(State(state): State<AppState>) -> Json<Vec<OperationRecord>> {
    Json(state.system.operations().await)
}

pub async fn register_operation(
    State(state): State<AppState>,
    Json(registration): Json<OperationRegistration>,
) -> Result<impl IntoResponse, ApiError> {
    let record = state.system.register_operation(registration).await?;
    Ok((StatusCode::CREATED, Json(record)))
}

pub async fn get_operation(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<OperationRecord> {
    let id = parse_id(&id)?;
    Ok(Json(state.system.operation_status(id).await?))
}

pub async fn deregister_operation(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<OperationRecord> {
    let id = parse_id(&id)?;
    Ok(Json(state.system.deregister_operation(id).await?))
}

pub async fn list_actions(State(state): State<AppState>) -> Json<Vec<SafetyAction>> {
    Json(state.system.actions().await)
}
