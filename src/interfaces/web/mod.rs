mod handlers;
mod router;

use anyhow::Result;
use async_trait::async_trait;
use axum::{
    extract::State,
    response::sse::{Event, Sse},
};
use std::convert::Infallible;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_stream::Stream;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;
use tracing::info;

use crate::core::fanout::WsFanout;
use crate::core::lifecycle::LifecycleComponent;
use crate::core::orchestrator::JobOrchestrator;

pub use router::build_api_router;

pub struct ApiServer {
    state: AppState,
    host: String,
    server: Option<JoinHandle<()>>,
}

#[derive(Clone)]
pub struct AppState {
    pub(crate) orchestrator: JobOrchestrator,
    pub(crate) fanout: Arc<WsFanout>,
    pub(crate) log_tx: tokio::sync::broadcast::Sender<String>,
    pub(crate) api_port: u16,
}

impl AppState {
    pub fn new(
        orchestrator: JobOrchestrator,
        fanout: Arc<WsFanout>,
        log_tx: tokio::sync::broadcast::Sender<String>,
        api_port: u16,
    ) -> Self {
        Self {
            orchestrator,
            fanout,
            log_tx,
            api_port,
        }
    }
}

impl ApiServer {
    pub fn new(state: AppState, host: String) -> Self {
        Self {
            state,
            host,
            server: None,
        }
    }
}

// --- SSE Logs (used by router) ---

async fn sse_logs_endpoint(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let receiver = state.log_tx.subscribe();
    let stream = BroadcastStream::new(receiver).map(|msg| match msg {
        Ok(line) => Ok(Event::default().data(line)),
        Err(_) => Ok(Event::default().data("Log stream lagged")),
    });

    Sse::new(stream)
}

#[async_trait]
impl LifecycleComponent for ApiServer {
    async fn on_init(&mut self) -> Result<()> {
        info!("API Server initializing...");
        Ok(())
    }

    async fn on_start(&mut self) -> Result<()> {
        let addr = format!("{}:{}", self.host, self.state.api_port);
        let listener = tokio::net::TcpListener::bind(&addr).await?;
        let app = router::build_api_router(self.state.clone());

        self.server = Some(tokio::spawn(async move {
            info!("API Server running at http://{addr}");
            if let Err(e) = axum::serve(listener, app).await {
                tracing::error!("API Server crashed: {}", e);
            }
        }));
        Ok(())
    }

    async fn on_shutdown(&mut self) -> Result<()> {
        info!("API Server shutting down...");
        // Live log streams never end on their own, so the server is aborted
        // rather than drained.
        if let Some(server) = self.server.take() {
            server.abort();
        }
        Ok(())
    }
}
