use axum::{
    Json,
    extract::{Path, State},
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use serde_json::Value;

use super::engine_error;
use crate::core::error::EngineResult;
use crate::core::store::JobRecord;
use crate::interfaces::web::AppState;

#[derive(Deserialize)]
pub struct CreateJobRequest {
    /// Omitted means the plugin's defaults.
    pub config: Option<Value>,
    pub description: Option<String>,
}

#[derive(Deserialize)]
pub struct UpdateJobRequest {
    pub config: Value,
    pub description: Option<String>,
}

fn job_response(result: EngineResult<JobRecord>) -> Response {
    match result {
        Ok(job) => Json(serde_json::json!({ "success": true, "job": job })).into_response(),
        Err(e) => engine_error(e),
    }
}

pub async fn create_job(
    State(state): State<AppState>,
    Path((plugin_id, subscriber_id)): Path<(i64, i64)>,
    Json(payload): Json<CreateJobRequest>,
) -> Response {
    job_response(
        state
            .orchestrator
            .add_job(
                subscriber_id,
                plugin_id,
                payload.config,
                payload.description.as_deref(),
            )
            .await,
    )
}

pub async fn update_job(
    State(state): State<AppState>,
    Path(job_id): Path<i64>,
    Json(payload): Json<UpdateJobRequest>,
) -> Response {
    job_response(
        state
            .orchestrator
            .update_job(job_id, payload.config, payload.description.as_deref())
            .await,
    )
}

pub async fn delete_job(State(state): State<AppState>, Path(job_id): Path<i64>) -> Response {
    job_response(state.orchestrator.remove_job(job_id).await)
}

pub async fn activate_job(State(state): State<AppState>, Path(job_id): Path<i64>) -> Response {
    job_response(state.orchestrator.activate_job(job_id).await)
}

pub async fn deactivate_job(State(state): State<AppState>, Path(job_id): Path<i64>) -> Response {
    job_response(state.orchestrator.deactivate_job(job_id).await)
}

pub async fn list_tasks(State(state): State<AppState>) -> Json<Value> {
    Json(serde_json::json!({
        "success": true,
        "tasks": state.orchestrator.tasks(),
        "dropped_log_events": state.orchestrator.pipeline().dropped()
    }))
}
