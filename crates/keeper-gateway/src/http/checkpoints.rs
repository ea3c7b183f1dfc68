use axum::{extract::State, http::StatusCode, Json};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::warn;

use crate::app::AppState;

/// GET /checkpoints: last processed block per category and chain.
pub async fn list_checkpoints(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let checkpoints = state.checkpoints.list().await.map_err(|e| {
        warn!(error = %e, "failed to list checkpoints");
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"error": "internal error"})),
        )
    })?;
    Ok(Json(json!({ "checkpoints": checkpoints })))
}
