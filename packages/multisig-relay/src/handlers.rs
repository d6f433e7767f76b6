//! HTTP request handlers.

use crate::metrics::METRICS;
use crate::response::HealthResponse;
use crate::state::AppState;
use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use std::sync::Arc;

/// Prometheus metrics in text exposition format.
pub async fn metrics(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let scheduler = state.scheduler.state();
    let last_hour = scheduler
        .last_processed()
        .map(|slot| i64::from(slot.hour_of_day()))
        .unwrap_or(-1);
    let body = METRICS.render(scheduler.is_in_flight(), last_hour);
    (
        [(
            axum::http::header::CONTENT_TYPE,
            "text/plain; version=0.0.4",
        )],
        body,
    )
}

/// Health check with scheduler progress and RPC status.
pub async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let rpc_status = state.rpc.health_check().await.unwrap_or("unavailable");
    let status = match rpc_status {
        "ok" => "ok",
        "degraded" => "degraded",
        _ => "unavailable",
    };
    let scheduler = state.scheduler.state();

    Json(HealthResponse {
        status,
        account: state.config.account.clone(),
        role: state.scheduler.role().to_string(),
        rotation: state.rotation.members().to_vec(),
        last_processed_hour: scheduler.last_processed().map(|slot| slot.hour_of_day()),
        in_flight: scheduler.is_in_flight(),
        rpc_status,
        active_rpc: state.rpc.active_url().to_string(),
        rpc_failovers: state.rpc.failover_count(),
        uptime_secs: state.start_time.elapsed().as_secs(),
    })
}
