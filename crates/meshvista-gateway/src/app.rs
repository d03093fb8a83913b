use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use meshvista_api::MeshApi;
use meshvista_core::MeshvistaConfig;
use meshvista_scheduler::Scheduler;
use meshvista_storage::Database;
use tower_http::trace::TraceLayer;

/// Central shared state, passed as `Arc<AppState>` to all Axum handlers.
pub struct AppState {
    pub config: MeshvistaConfig,
    pub db: Database,
    pub api: Arc<dyn MeshApi>,
    pub scheduler: Arc<Scheduler>,
}

impl AppState {
    pub fn new(
        config: MeshvistaConfig,
        db: Database,
        api: Arc<dyn MeshApi>,
        scheduler: Arc<Scheduler>,
    ) -> Self {
        Self {
            config,
            db,
            api,
            scheduler,
        }
    }
}

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(crate::http::health::health_handler))
        .route(
            "/api/collection-status",
            get(crate::http::collect::collection_status),
        )
        .route("/api/collect", post(crate::http::collect::collect_now))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
