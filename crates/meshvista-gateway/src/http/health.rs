use axum::{extract::State, Json};
use meshvista_scheduler::HealthStatus;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::app::AppState;

/// GET /health: liveness plus per-collector health.
pub async fn health_handler(State(state): State<Arc<AppState>>) -> Json<Value> {
    let collectors = state.scheduler.health_status();
    let all_healthy = collectors
        .values()
        .all(|c| c.status == HealthStatus::Healthy);

    Json(json!({
        "status": if all_healthy { "ok" } else { "degraded" },
        "version": env!("CARGO_PKG_VERSION"),
        "authenticated": state.api.is_authenticated(),
        "scheduler_running": state.scheduler.is_running(),
        "dns_enabled": state.config.dns.enabled,
        "collectors": collectors,
    }))
}
