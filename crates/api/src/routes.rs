use crate::handlers;
use crate::state::AppState;
use axum::{
    Router,
    routing::{get, post},
};
use tower_http::trace::TraceLayer;

/// Builds the application router.
///
/// CORS is not applied here; [`ApiServer`](crate::ApiServer) adds it.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/status", get(handlers::status))
        .route("/monitor/start", post(handlers::start_monitor))
        .route("/monitor/stop", post(handlers::stop_monitor))
        .route("/risk/latest", get(handlers::latest_assessment))
        .route("/risk/history", get(handlers::risk_history))
        .route("/alerts", get(handlers::list_alerts))
        .route("/alerts/stats", get(handlers::alert_statistics))
        .route("/alerts/{id}", get(handlers::get_alert))
        .route("/alerts/{id}/acknowledge", post(handlers::acknowledge_alert))
        .route("/alerts/{id}/resolve", post(handlers::resolve_alert))
        .route(
            "/config",
            get(handlers::get_configuration).put(handlers::update_configuration),
        )
        .route("/config/validate", post(handlers::validate_configuration))
        .route("/config/presets", get(handlers::list_presets))
        .route(
            "/config/presets/{name}/activate",
            post(handlers::activate_preset),
        )
        .route(
            "/operations",
            get(handlers::list_operations).post(handlers::register_operation),
        )
        .route(
            "/operations/{id}",
            get(handlers::get_operation).delete(handlers::deregister_operation),
        )
        .route("/actions", get(handlers::list_actions))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::body::{Body, to_bytes};
    use axum::http::{Request, StatusCode};
    use chrono::{DateTime, Utc};
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;
    use safeguard_domain::entities::{AccountState, HealthSnapshot, Position, TradeRecord};
    use safeguard_domain::enums::PositionSide;
    use safeguard_engine::SafetySystem;
    use safeguard_engine::alerts::AlertFilter;
    use safeguard_engine::config::ConfigurationUpdate;
    use safeguard_engine::exit::OperationRegistration;
    use safeguard_engine::providers::{
        ExecutionClient, ExecutionResult, ExitParams, HealthProvider, MarketDataProvider,
    };
    use serde_json::{Value, json};
    use std::sync::Arc;
    use std::time::Duration;
    use tower::ServiceExt;
    use uuid::Uuid;

    /// Flat account at a fixed drawdown; fills every exit.
    struct Desk {
        equity: Decimal,
    }

    #[async_trait]
    impl MarketDataProvider for Desk {
        async fn get_positions(&self) -> anyhow::Result<Vec<Position>> {
            Ok(Vec::new())
        }

        async fn get_account_state(&self) -> anyhow::Result<AccountState> {
            Ok(AccountState {
                equity: self.equity,
                peak_equity: dec!(10000),
                balance: self.equity,
                updated_at: Utc::now(),
            })
        }

        async fn get_recent_trades(&self, _since: DateTime<Utc>) -> anyhow::Result<Vec<TradeRecord>> {
            Ok(Vec::new())
        }
    }

    #[async_trait]
    impl HealthProvider for Desk {
        async fn get_health_snapshot(&self) -> anyhow::Result<HealthSnapshot> {
            Ok(HealthSnapshot {
                latency_ms: 20,
                error_rate_pct: Decimal::ZERO,
                data_staleness_ms: 100,
                observed_at: Utc::now(),
            })
        }
    }

    #[async_trait]
    impl ExecutionClient for Desk {
        async fn place_exit(
            &self,
            _operation_id: Uuid,
            params: &ExitParams,
        ) -> anyhow::Result<ExecutionResult> {
            Ok(ExecutionResult::filled(
                params.reference_price.unwrap_or(Decimal::ONE),
            ))
        }
    }

    async fn app(equity: Decimal) -> (Router, Arc<SafetySystem>) {
        let desk = Arc::new(Desk { equity });
        let system = Arc::new(
            SafetySystem::builder(desk.clone(), desk.clone(), desk)
                .build()
                .await
                .unwrap(),
        );
        (build_router(AppState::new(system.clone())), system)
    }

    async fn send(router: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let request = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => request
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => request.body(Body::empty()).unwrap(),
        };

        let response = router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, json)
    }

    #[tokio::test]
    async fn test_health() {
        let (router, _) = app(dec!(10000)).await;
        let (status, body) = send(&router, "GET", "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn test_unknown_and_malformed_alert_ids() {
        let (router, _) = app(dec!(10000)).await;

        let uri = format!("/alerts/{}", Uuid::new_v4());
        let (status, body) = send(&router, "GET", &uri, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["code"], 404);

        let (status, _) = send(&router, "GET", "/alerts/not-a-uuid", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_alert_lifecycle_over_http() {
        let (router, system) = app(dec!(8800)).await;
        system.run_once().await;

        let mut alerts = Vec::new();
        for _ in 0..200 {
            alerts = system.list_alerts(&AlertFilter::default()).await;
            if !alerts.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(alerts.len(), 1);
        let id = alerts[0].id;

        let (status, body) = send(&router, "GET", "/alerts?severity=critical", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.as_array().unwrap().len(), 1);

        let (status, body) = send(&router, "POST", &format!("/alerts/{id}/acknowledge"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "acknowledged");

        let resolve = format!("/alerts/{id}/resolve");
        let (status, body) = send(&router, "POST", &resolve, Some(json!({"reason": "hedged"}))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "resolved");

        let (status, body) = send(&router, "POST", &resolve, Some(json!({}))).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["code"], 409);

        let (status, body) = send(&router, "GET", "/alerts/stats", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["resolved"], 1);
    }

    #[tokio::test]
    async fn test_configuration_endpoints() {
        let (router, system) = app(dec!(10000)).await;

        let mut exit = system.configuration().await.exit.clone();
        exit.max_exit_attempts = 0;
        let update = ConfigurationUpdate {
            exit: Some(exit),
            ..Default::default()
        };
        let (status, body) = send(
            &router,
            "PUT",
            "/config",
            Some(serde_json::to_value(&update).unwrap()),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert!(body["error"].as_str().unwrap().contains("max_exit_attempts"));

        let (status, body) = send(&router, "GET", "/config/presets", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.as_array().unwrap().len(), 3);

        let (status, _) = send(&router, "POST", "/config/presets/reckless/activate", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, body) =
            send(&router, "POST", "/config/presets/conservative/activate", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["name"], "conservative");

        let (_, body) = send(&router, "GET", "/config", None).await;
        assert_eq!(body["name"], "conservative");
    }

    #[tokio::test]
    async fn test_operation_endpoints() {
        let (router, _) = app(dec!(10000)).await;
        let registration =
            OperationRegistration::new("BTC-USD", PositionSide::Long, dec!(0.5), dec!(60000));
        let id = registration.id;
        let payload = serde_json::to_value(&registration).unwrap();

        let (status, body) = send(&router, "POST", "/operations", Some(payload.clone())).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["status"], "active");

        let (status, _) = send(&router, "POST", "/operations", Some(payload)).await;
        assert_eq!(status, StatusCode::CONFLICT);

        let uri = format!("/operations/{id}");
        let (status, body) = send(&router, "GET", &uri, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["registration"]["symbol"], "BTC-USD");

        let (status, body) = send(&router, "DELETE", &uri, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "closed");

        let (status, _) = send(&router, "DELETE", &uri, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_latest_assessment_appears_after_a_tick() {
        let (router, system) = app(dec!(10000)).await;

        let (status, _) = send(&router, "GET", "/risk/latest", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        system.run_once().await;
        let (status, body) = send(&router, "GET", "/risk/latest", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["overall_level"], "normal");

        let (_, body) = send(&router, "GET", "/status", None).await;
        assert_eq!(body["monitoring"]["ticks_run"], 1);
    }
}
