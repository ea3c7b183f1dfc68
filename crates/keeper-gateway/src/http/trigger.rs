//! On-demand job execution: POST /jobs/trigger.
//!
//! Runs the job through the same dispatcher path as its scheduled loop, so an
//! overlapping trigger is skipped rather than run twice. The response is 200
//! whenever the job was found, whatever the body did; the outcome is reported
//! in the JSON and through the usual metrics.

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    Json,
};
use keeper_scheduler::SchedulerError;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{info, warn};

use crate::app::AppState;

#[derive(Debug, Deserialize)]
pub struct TriggerRequest {
    pub job_name: String,
    /// Required for chain-scoped jobs, ignored otherwise.
    #[serde(default)]
    pub chain: Option<String>,
}

type ApiError = (StatusCode, Json<Value>);

/// POST /jobs/trigger
///
/// 401 when a trigger token is configured and not presented, 404 for an
/// unknown job, 400 for a missing or unknown chain.
pub async fn trigger_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<TriggerRequest>,
) -> Result<Json<Value>, ApiError> {
    if let Some(expected) = state.config.gateway.trigger_token.as_deref() {
        verify_bearer_token(&headers, expected).map_err(|e| {
            warn!(job = %req.job_name, reason = %e, "trigger rejected");
            (StatusCode::UNAUTHORIZED, Json(json!({"error": "unauthorized"})))
        })?;
    }

    let job = state
        .catalog
        .resolve(&req.job_name, req.chain.as_deref())
        .map_err(|e| {
            warn!(job = %req.job_name, chain = ?req.chain, error = %e, "trigger refused");
            match e {
                SchedulerError::UnknownJob { .. } => (
                    StatusCode::NOT_FOUND,
                    Json(json!({"error": "unknown job"})),
                ),
                other => (
                    StatusCode::BAD_REQUEST,
                    Json(json!({"error": other.to_string()})),
                ),
            }
        })?;

    let receipt_id = uuid::Uuid::new_v4().to_string();
    let run_key = job.run_key();
    info!(run_key = %run_key, receipt_id = %receipt_id, "manual trigger");

    let outcome = state.dispatcher.run_once(job).await;

    Ok(Json(json!({
        "ok": true,
        "receipt_id": receipt_id,
        "run_key": run_key,
        "outcome": outcome.status,
        "duration_ms": outcome.duration.as_millis() as u64,
        "touched": outcome.touched,
        "error": outcome.error,
    })))
}

/// Verify a static bearer token in the `Authorization: Bearer <token>` header.
fn verify_bearer_token(headers: &HeaderMap, expected: &str) -> Result<(), String> {
    let auth_header = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| "missing Authorization header".to_string())?;

    let token = auth_header
        .strip_prefix("Bearer ")
        .ok_or_else(|| "Authorization header must use Bearer scheme".to_string())?;

    if token == expected {
        Ok(())
    } else {
        Err("bearer token mismatch".to_string())
    }
}
