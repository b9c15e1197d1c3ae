//! Health Check and Metrics Endpoint
//!
//! Read-only HTTP views of the relay, plus Prometheus metrics.
//!
//! # Endpoints
//!
//! - `GET /health` - JSON health status (upstream, uptime, symbols, averages)
//! - `GET /healthz` - Kubernetes liveness probe (simple OK)
//! - `GET /readyz` - Kubernetes readiness probe (upstream connected)
//! - `GET /metrics` - Prometheus metrics in text format

use std::sync::Arc;

use axum::{Json, Router, extract::State, http::StatusCode, response::IntoResponse, routing::get};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::application::services::{CoreService, HealthSnapshot};
use crate::domain::connection::ConnectionStatus;
use crate::infrastructure::metrics::get_metrics_handle;

// =============================================================================
// Health Response Types
// =============================================================================

/// Health check response.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    /// Overall status.
    pub status: HealthStatus,
    /// Relay version.
    pub version: &'static str,
    /// Current time.
    pub current_time: DateTime<Utc>,
    /// Relay state.
    #[serde(flatten)]
    pub relay: HealthSnapshot,
}

/// Overall health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Upstream connected.
    Healthy,
    /// Serving snapshots but the upstream is down or retrying.
    Degraded,
}

impl From<ConnectionStatus> for HealthStatus {
    fn from(status: ConnectionStatus) -> Self {
        match status {
            ConnectionStatus::Connected => Self::Healthy,
            ConnectionStatus::Disconnected => Self::Degraded,
        }
    }
}

// =============================================================================
// Router
// =============================================================================

/// Health routes bound to `service`.
pub fn router(service: Arc<CoreService>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/healthz", get(liveness_handler))
        .route("/readyz", get(readiness_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(service)
}

// =============================================================================
// HTTP Handlers
// =============================================================================

async fn health_handler(State(service): State<Arc<CoreService>>) -> impl IntoResponse {
    (StatusCode::OK, Json(build_health_response(&service)))
}

async fn liveness_handler() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

async fn readiness_handler(State(service): State<Arc<CoreService>>) -> impl IntoResponse {
    if service.connection().status() == ConnectionStatus::Connected {
        (StatusCode::OK, "READY")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "NOT READY")
    }
}

async fn metrics_handler() -> impl IntoResponse {
    get_metrics_handle().map_or_else(
        || {
            (
                StatusCode::SERVICE_UNAVAILABLE,
                [("content-type", "text/plain")],
                "Metrics not initialized".to_string(),
            )
        },
        |handle| {
            (
                StatusCode::OK,
                [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
                handle.render(),
            )
        },
    )
}

fn build_health_response(service: &CoreService) -> HealthResponse {
    let relay = service.health();
    HealthResponse {
        status: relay.finnhub.into(),
        version: env!("CARGO_PKG_VERSION"),
        current_time: Utc::now(),
        relay,
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use tower::ServiceExt;

    use super::*;
    use crate::application::ports::MockAverageStore;
    use crate::domain::connection::ConnectionMonitor;
    use crate::domain::streaming::{AverageMapping, TrackedSymbols};
    use crate::infrastructure::broadcast::BroadcastConfig;

    fn service(monitor: Arc<ConnectionMonitor>) -> Arc<CoreService> {
        let mut store = MockAverageStore::new();
        store
            .expect_load()
            .returning(|| AverageMapping::from([("SYM".to_string(), 150.0)]));
        Arc::new(CoreService::new(
            TrackedSymbols::new(["SYM"]),
            Arc::new(store),
            monitor,
            BroadcastConfig::default(),
        ))
    }

    async fn get(app: Router, uri: &str) -> (StatusCode, String) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, String::from_utf8(body.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn health_reports_relay_state() {
        let app = router(service(Arc::new(ConnectionMonitor::new())));
        let (status, body) = get(app, "/health").await;

        assert_eq!(status, StatusCode::OK);
        let json: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(json["status"], "degraded");
        assert_eq!(json["finnhub"], "disconnected");
        assert_eq!(json["symbols"][0], "SYM");
        assert_eq!(json["hourlyAverages"]["SYM"], 150.0);
        assert!(json["uptime"].is_number());
    }

    #[tokio::test]
    async fn liveness_is_always_ok() {
        let app = router(service(Arc::new(ConnectionMonitor::new())));
        let (status, body) = get(app, "/healthz").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "OK");
    }

    #[tokio::test]
    async fn readiness_follows_upstream() {
        let monitor = Arc::new(ConnectionMonitor::new());
        let service = service(Arc::clone(&monitor));

        let (status, _) = get(router(Arc::clone(&service)), "/readyz").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

        monitor.connecting();
        monitor.opened();
        let (status, body) = get(router(service), "/readyz").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "READY");
    }

    #[test]
    fn health_status_from_connection() {
        assert_eq!(
            HealthStatus::from(ConnectionStatus::Connected),
            HealthStatus::Healthy
        );
        assert_eq!(
            serde_json::to_string(&HealthStatus::Degraded).unwrap(),
            "\"degraded\""
        );
    }
}
