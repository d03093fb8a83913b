use std::collections::BTreeMap;
use std::sync::Arc;

use axum::{extract::State, http::StatusCode, Json};
use meshvista_collectors::{last_collection, CollectorId};
use meshvista_storage::format_ts;
use serde_json::{json, Value};
use tracing::{error, info};

use crate::app::AppState;

type ApiResult = Result<(StatusCode, Json<Value>), (StatusCode, Json<Value>)>;

/// GET /api/collection-status: last successful run per collector and the
/// registered triggers.
pub async fn collection_status(State(state): State<Arc<AppState>>) -> ApiResult {
    let mut last = BTreeMap::new();
    for id in CollectorId::ALL {
        let ts = last_collection(&state.db, id).map_err(|e| {
            error!(collector = %id, error = %e, "failed to read collection status");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": e.to_string() })),
            )
        })?;
        last.insert(id, ts.map(format_ts));
    }

    Ok((
        StatusCode::OK,
        Json(json!({
            "scheduler_running": state.scheduler.is_running(),
            "last_collection": last,
            "jobs": state.scheduler.jobs(),
        })),
    ))
}

/// POST /api/collect: run every collector now, in the background.
pub async fn collect_now(State(state): State<Arc<AppState>>) -> ApiResult {
    if !state.scheduler.is_running() {
        return Err((
            StatusCode::CONFLICT,
            Json(json!({ "error": "scheduler is not running" })),
        ));
    }

    let scheduler = state.scheduler.clone();
    tokio::spawn(async move {
        let results = scheduler.run_all_now().await;
        let failed = results.values().filter(|r| !r.success && !r.skipped).count();
        info!(collectors = results.len(), failed, "on-demand collection finished");
    });
    Ok((StatusCode::ACCEPTED, Json(json!({ "status": "accepted" }))))
}
