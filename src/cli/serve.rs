use anyhow::Result;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{Level, info};

use crate::core::config::EngineConfig;
use crate::core::executor::ExecutionIsolator;
use crate::core::fanout::WsFanout;
use crate::core::lifecycle::{EngineComponent, LifecycleManager};
use crate::core::logs::LogPipeline;
use crate::core::orchestrator::JobOrchestrator;
use crate::core::registry::PluginRegistry;
use crate::core::store::JobStore;
use crate::core::terminal::{self, GuideSection};
use crate::interfaces::web::{ApiServer, AppState};
use crate::logging::{self, LOG_TAIL_CAPACITY};
use crate::plugins::builtin::BuiltinResolver;
use crate::plugins::script::ScriptResolver;

use super::ServeFlags;

/// Everything `serve` and the offline plugin commands share.
pub(crate) struct Engine {
    pub orchestrator: JobOrchestrator,
    pub fanout: Arc<WsFanout>,
}

pub(crate) fn build_registry(config: &EngineConfig) -> PluginRegistry {
    PluginRegistry::new()
        .with_resolver(Arc::new(BuiltinResolver::with_defaults()))
        .with_resolver(Arc::new(ScriptResolver::new(
            config.plugins.script_dir.clone(),
        )))
}

/// Wires store, registry, isolator and log path around `lifecycle`'s
/// scheduler. Nothing ticks until the lifecycle starts.
pub(crate) async fn build_engine(
    config: &EngineConfig,
    lifecycle: &LifecycleManager,
) -> Result<Engine> {
    let store = JobStore::open(&config.storage.path).await?;
    let registry = Arc::new(build_registry(config));
    let fanout = Arc::new(WsFanout::new(config.logs.send_timeout()));
    let pipeline = LogPipeline::spawn(
        fanout.clone(),
        config.logs.queue_capacity,
        config.logs.max_in_flight,
    );
    let executor = Arc::new(ExecutionIsolator::new(
        config.executor.max_concurrency,
        config.executor.timeout(),
    ));
    let orchestrator = JobOrchestrator::new(
        store,
        registry,
        executor,
        pipeline,
        lifecycle.scheduler.clone(),
        config.executor.overlap,
    );
    Ok(Engine {
        orchestrator,
        fanout,
    })
}

pub(crate) async fn load_config(path: &Path) -> Result<EngineConfig> {
    EngineConfig::load(path).await
}

pub async fn run_serve(flags: ServeFlags) -> Result<()> {
    let (log_tx, _) = tokio::sync::broadcast::channel(LOG_TAIL_CAPACITY);
    logging::init(log_tx.clone(), Level::INFO)?;

    let mut config = load_config(&flags.config).await?;
    if let Some(host) = flags.host {
        config.server.host = host;
    }
    if let Some(port) = flags.port {
        config.server.port = port;
    }

    let mut lifecycle = LifecycleManager::new().await?;
    let engine = build_engine(&config, &lifecycle).await?;

    lifecycle.attach(Arc::new(Mutex::new(EngineComponent::new(
        engine.orchestrator.clone(),
        config.shutdown_grace(),
    ))));
    let state = AppState::new(
        engine.orchestrator.clone(),
        engine.fanout.clone(),
        log_tx,
        config.server.port,
    );
    lifecycle.attach(Arc::new(Mutex::new(ApiServer::new(
        state,
        config.server.host.clone(),
    ))));

    lifecycle.start().await?;

    terminal::print_banner();
    GuideSection::new("Engine")
        .status("Database", &format!("{}", config.storage.path.display()))
        .status(
            "Scripts",
            &format!("{}", config.plugins.script_dir.display()),
        )
        .status("Tasks", &engine.orchestrator.tasks().len().to_string())
        .print();
    terminal::print_link(
        "API",
        &format!("http://{}:{}", config.server.host, config.server.port),
    );
    terminal::print_info("Press Ctrl+C to stop.");

    tokio::signal::ctrl_c().await?;
    info!("Shutdown requested");
    lifecycle.shutdown().await?;
    Ok(())
}
