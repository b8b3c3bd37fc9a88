use axum::{
    Json,
    extract::{Path, State},
    response::{IntoResponse, Response},
};
use serde::Deserialize;

use super::engine_error;
use crate::interfaces::web::AppState;

#[derive(Deserialize)]
pub struct CreatePluginRequest {
    pub package: String,
    pub interval: u64,
    pub description: Option<String>,
}

#[derive(Deserialize)]
pub struct UpdatePluginRequest {
    pub description: Option<String>,
}

pub async fn list_plugins(State(state): State<AppState>) -> Response {
    match state.orchestrator.list_plugins().await {
        Ok(plugins) => Json(serde_json::json!({
            "success": true,
            "plugins": plugins,
            "loaded": state.orchestrator.registry().names()
        }))
        .into_response(),
        Err(e) => engine_error(e),
    }
}

pub async fn create_plugin(
    State(state): State<AppState>,
    Json(payload): Json<CreatePluginRequest>,
) -> Response {
    match state
        .orchestrator
        .register_plugin(
            &payload.package,
            payload.interval,
            payload.description.as_deref(),
        )
        .await
    {
        Ok(plugin) => {
            Json(serde_json::json!({ "success": true, "plugin": plugin })).into_response()
        }
        Err(e) => engine_error(e),
    }
}

pub async fn reload_plugin(State(state): State<AppState>, Path(plugin_id): Path<i64>) -> Response {
    match state.orchestrator.reload_plugin(plugin_id).await {
        Ok(plugin) => Json(serde_json::json!({
            "success": true,
            "plugin": plugin,
            "message": "Plugin reloaded"
        }))
        .into_response(),
        Err(e) => engine_error(e),
    }
}

pub async fn update_plugin(
    State(state): State<AppState>,
    Path(plugin_id): Path<i64>,
    Json(payload): Json<UpdatePluginRequest>,
) -> Response {
    match state
        .orchestrator
        .update_plugin_description(plugin_id, payload.description.as_deref())
        .await
    {
        Ok(plugin) => {
            Json(serde_json::json!({ "success": true, "plugin": plugin })).into_response()
        }
        Err(e) => engine_error(e),
    }
}

/// Schema plus the subscriber's jobs, everything a config form needs.
pub async fn plugin_view(
    State(state): State<AppState>,
    Path((plugin_id, subscriber_id)): Path<(i64, i64)>,
) -> Response {
    match state.orchestrator.plugin_view(plugin_id, subscriber_id).await {
        Ok(view) => Json(serde_json::json!({
            "success": true,
            "plugin": view.plugin,
            "schema": view.schema,
            "jobs": view.jobs
        }))
        .into_response(),
        Err(e) => engine_error(e),
    }
}
