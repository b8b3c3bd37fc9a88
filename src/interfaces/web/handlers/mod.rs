pub mod jobs;
pub mod logs;
pub mod plugins;

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};

use crate::core::error::EngineError;

/// Maps an engine error onto the `{ success: false, error }` envelope.
pub(crate) fn engine_error(e: EngineError) -> Response {
    let status = match &e {
        e if e.is_not_found() => StatusCode::NOT_FOUND,
        EngineError::ConfigValidation(_) | EngineError::Json(_) => StatusCode::UNPROCESSABLE_ENTITY,
        EngineError::PluginLoad { .. } | EngineError::InvalidPlugin(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status.is_server_error() {
        tracing::error!("Request failed: {}", e);
    }
    (
        status,
        Json(serde_json::json!({
            "success": false,
            "error": e.to_string()
        })),
    )
        .into_response()
}
