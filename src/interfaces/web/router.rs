use axum::{
    Router,
    body::Body,
    http::{HeaderValue, Method, Request, header},
    middleware,
    middleware::Next,
    routing::{get, post},
};
use tower_http::cors::CorsLayer;

use super::AppState;
use super::handlers::{jobs, logs, plugins};

fn build_localhost_cors(api_port: u16) -> CorsLayer {
    let origins: Vec<HeaderValue> = [
        format!("http://127.0.0.1:{}", api_port),
        format!("http://localhost:{}", api_port),
    ]
    .iter()
    .filter_map(|o| o.parse().ok())
    .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::DELETE,
            Method::PATCH,
            Method::OPTIONS,
        ])
        .allow_headers(tower_http::cors::Any)
}

pub fn build_api_router(state: AppState) -> Router {
    Router::new()
        .route(
            "/api/plugins",
            get(plugins::list_plugins).post(plugins::create_plugin),
        )
        .route(
            "/api/plugins/{plugin_id}",
            axum::routing::patch(plugins::update_plugin),
        )
        .route(
            "/api/plugins/{plugin_id}/reload",
            post(plugins::reload_plugin),
        )
        .route(
            "/api/plugins/{plugin_id}/subscribers/{subscriber_id}",
            get(plugins::plugin_view),
        )
        .route(
            "/api/plugins/{plugin_id}/subscribers/{subscriber_id}/jobs",
            post(jobs::create_job),
        )
        .route(
            "/api/jobs/{job_id}",
            axum::routing::patch(jobs::update_job).delete(jobs::delete_job),
        )
        .route("/api/jobs/{job_id}/activate", post(jobs::activate_job))
        .route("/api/jobs/{job_id}/deactivate", post(jobs::deactivate_job))
        .route("/api/tasks", get(jobs::list_tasks))
        .route("/api/logs", get(super::sse_logs_endpoint))
        .route(
            "/ws/logs/{plugin_id}/{subscriber_id}",
            get(logs::job_log_socket),
        )
        .layer(middleware::from_fn(security_headers))
        .layer(build_localhost_cors(state.api_port))
        .with_state(state)
}

async fn security_headers(req: Request<Body>, next: Next) -> axum::response::Response {
    let mut response = next.run(req).await;
    let headers = response.headers_mut();
    headers.insert(
        header::X_CONTENT_TYPE_OPTIONS,
        HeaderValue::from_static("nosniff"),
    );
    headers.insert(header::X_FRAME_OPTIONS, HeaderValue::from_static("DENY"));
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::OverlapPolicy;
    use crate::core::executor::ExecutionIsolator;
    use crate::core::fanout::WsFanout;
    use crate::core::logs::LogPipeline;
    use crate::core::orchestrator::JobOrchestrator;
    use crate::core::registry::PluginRegistry;
    use crate::core::store::JobStore;
    use crate::plugins::builtin::BuiltinResolver;
    use axum::http::StatusCode;
    use serde_json::{Value, json};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio_cron_scheduler::JobScheduler;
    use tower::ServiceExt;

    async fn test_app() -> Router {
        let builtins = Arc::new(BuiltinResolver::with_defaults());
        let registry = Arc::new(PluginRegistry::new().with_resolver(builtins));
        let fanout = Arc::new(WsFanout::new(Duration::from_millis(200)));
        let pipeline = LogPipeline::spawn(fanout.clone(), 256, 4);
        let orchestrator = JobOrchestrator::new(
            JobStore::in_memory().unwrap(),
            registry,
            Arc::new(ExecutionIsolator::new(2, None)),
            pipeline,
            JobScheduler::new().await.unwrap(),
            OverlapPolicy::Skip,
        );
        let (log_tx, _) = tokio::sync::broadcast::channel(16);
        build_api_router(AppState::new(orchestrator, fanout, log_tx, 17900))
    }

    async fn call(
        app: &Router,
        method: Method,
        uri: &str,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(body) => {
                builder = builder.header(header::CONTENT_TYPE, "application/json");
                Body::from(body.to_string())
            }
            None => Body::empty(),
        };
        let resp = app.clone().oneshot(builder.body(body).unwrap()).await.unwrap();
        let status = resp.status();
        let bytes = axum::body::to_bytes(resp.into_body(), 1024 * 1024)
            .await
            .unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn plugin_and_job_lifecycle_over_http() {
        let app = test_app().await;

        let (status, body) = call(
            &app,
            Method::POST,
            "/api/plugins",
            Some(json!({ "package": "builtin:sample@v1", "interval": 5 })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        let plugin_id = body["plugin"]["id"].as_i64().unwrap();

        let (status, body) = call(
            &app,
            Method::POST,
            &format!("/api/plugins/{}/subscribers/1/jobs", plugin_id),
            Some(json!({ "description": "defaults" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["job"]["active"], false);
        let job_id = body["job"]["id"].as_i64().unwrap();

        let uri = format!("/api/jobs/{}/activate", job_id);
        let (status, _) = call(&app, Method::POST, &uri, None).await;
        assert_eq!(status, StatusCode::OK);

        let (_, body) = call(&app, Method::GET, "/api/tasks", None).await;
        assert_eq!(body["tasks"][0]["paused"], false);

        let (_, body) = call(
            &app,
            Method::GET,
            &format!("/api/plugins/{}/subscribers/1", plugin_id),
            None,
        )
        .await;
        assert_eq!(body["schema"]["title"], "Config");
        assert_eq!(body["jobs"][0]["active"], true);

        let (status, _) = call(&app, Method::DELETE, &format!("/api/jobs/{}", job_id), None).await;
        assert_eq!(status, StatusCode::OK);
        let (_, body) = call(&app, Method::GET, "/api/tasks", None).await;
        assert_eq!(body["tasks"], json!([]));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn errors_map_to_status_codes() {
        let app = test_app().await;

        let (status, body) = call(
            &app,
            Method::POST,
            "/api/plugins",
            Some(json!({ "package": "builtin:unknown", "interval": 5 })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["success"], false);

        let (status, _) = call(&app, Method::POST, "/api/jobs/404/activate", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (_, body) = call(
            &app,
            Method::POST,
            "/api/plugins",
            Some(json!({ "package": "builtin:sample@v2", "interval": 5 })),
        )
        .await;
        let plugin_id = body["plugin"]["id"].as_i64().unwrap();
        let (status, body) = call(
            &app,
            Method::POST,
            &format!("/api/plugins/{}/subscribers/1/jobs", plugin_id),
            Some(json!({ "config": { "version": 2 } })),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert!(body["error"].as_str().unwrap().contains("invalid config"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn security_headers_present_on_responses() {
        let app = test_app().await;
        let req = Request::builder()
            .method(Method::GET)
            .uri("/api/plugins")
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers().get(header::X_FRAME_OPTIONS).unwrap(), "DENY");
    }
}
