use axum::{
    routing::{get, post},
    Router,
};
use keeper_core::KeeperConfig;
use keeper_scheduler::{Dispatcher, JobCatalog};
use keeper_sync::CheckpointStore;
use std::sync::Arc;

/// Central shared state: passed as Arc<AppState> to all Axum handlers.
pub struct AppState {
    pub config: KeeperConfig,
    /// Same dispatcher the job loops use, so triggered runs respect their run keys.
    pub dispatcher: Arc<Dispatcher>,
    pub catalog: JobCatalog,
    pub checkpoints: Arc<dyn CheckpointStore>,
}

impl AppState {
    pub fn new(
        config: KeeperConfig,
        dispatcher: Arc<Dispatcher>,
        catalog: JobCatalog,
        checkpoints: Arc<dyn CheckpointStore>,
    ) -> Self {
        Self {
            config,
            dispatcher,
            catalog,
            checkpoints,
        }
    }
}

/// Assemble the full Axum router.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(crate::http::health::health_handler))
        .route("/jobs", get(crate::http::jobs::list_jobs))
        .route("/jobs/trigger", post(crate::http::trigger::trigger_handler))
        .route(
            "/checkpoints",
            get(crate::http::checkpoints::list_checkpoints),
        )
        .with_state(state)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}
