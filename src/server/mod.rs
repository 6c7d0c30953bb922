//! HTTP server for operators.
//!
//! - `/metrics` - Prometheus metrics in text format
//! - `/health` - liveness check with uptime

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;
use tokio::net::TcpListener;
use tracing::{error, info};

use crate::dispatch::Metrics;

#[derive(Clone)]
struct AppState {
    metrics: Arc<Metrics>,
    started: Instant,
}

pub fn router(metrics: Arc<Metrics>) -> Router {
    let state = AppState {
        metrics,
        started: Instant::now(),
    };

    Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/health", get(health_handler))
        .with_state(state)
}

/// Serve [`router`] on `addr` until the task is dropped.
pub async fn serve(addr: SocketAddr, metrics: Arc<Metrics>) -> anyhow::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!("Metrics server listening on http://{}", addr);

    axum::serve(listener, router(metrics)).await?;
    Ok(())
}

async fn metrics_handler(State(state): State<AppState>) -> Response {
    match state.metrics.encode() {
        Ok(body) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        Err(err) => {
            error!("Failed to encode metrics: {}", err);
            (StatusCode::INTERNAL_SERVER_ERROR, format!("Failed to encode metrics: {err}")).into_response()
        }
    }
}

async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "uptime_seconds": state.started.elapsed().as_secs(),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    fn state() -> AppState {
        AppState {
            metrics: Arc::new(Metrics::new().unwrap()),
            started: Instant::now(),
        }
    }

    #[tokio::test]
    async fn test_metrics_endpoint_exposes_counters() {
        let state = state();
        state.metrics.record_unhandled("command");

        let response = metrics_handler(State(state)).await;
        assert_eq!(response.status(), StatusCode::OK);

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let text = String::from_utf8(body.to_vec()).unwrap();
        assert!(text.contains("anjani_unhandled_error{category=\"command\"} 1"));
    }

    #[tokio::test]
    async fn test_health_reports_status() {
        let response = health_handler(State(state())).await.into_response();
        assert_eq!(response.status(), StatusCode::OK);

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let health: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(health["status"], "healthy");
    }
}
