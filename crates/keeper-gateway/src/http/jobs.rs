use axum::{extract::State, Json};
use serde_json::{json, Value};
use std::sync::Arc;

use crate::app::AppState;

/// GET /jobs: configured jobs with their latest outcome and counters.
pub async fn list_jobs(State(state): State<Arc<AppState>>) -> Json<Value> {
    let active = state.dispatcher.limiter().active();
    let stats = state.dispatcher.emitter().stats();

    let jobs: Vec<Value> = state
        .catalog
        .jobs()
        .iter()
        .map(|job| {
            let key = job.run_key();
            let def = &job.definition;
            json!({
                "name": def.name,
                "chain": job.chain,
                "run_key": key,
                "cadence_ms": def.cadence_ms,
                "timeout_ms": def.timeout_ms,
                "policy": def.policy,
                "running": active.contains(&key),
                "stats": stats.get(&key),
            })
        })
        .collect();

    Json(json!({
        "jobs": jobs,
        "active": active,
    }))
}
