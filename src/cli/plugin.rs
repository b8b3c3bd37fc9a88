use anyhow::Result;
use std::path::Path;
use std::time::Duration;

use crate::core::lifecycle::LifecycleManager;
use crate::core::terminal::{print_info, print_plugin, print_success};

use super::serve::{build_engine, load_config};

/// Grace for flushing lifecycle events emitted by offline commands.
const OFFLINE_GRACE: Duration = Duration::from_secs(2);

pub async fn list_plugins(config_path: &Path) -> Result<()> {
    let config = load_config(config_path).await?;
    let lifecycle = LifecycleManager::new().await?;
    let engine = build_engine(&config, &lifecycle).await?;

    let plugins = engine.orchestrator.list_plugins().await?;
    if plugins.is_empty() {
        print_info(
            "No plugins registered yet. Try: plugboard plugin add builtin:sample@v1 --interval 60",
        );
    }
    for plugin in &plugins {
        print_plugin(
            plugin.id,
            &plugin.package,
            plugin.interval,
            plugin.description.as_deref(),
        );
    }
    engine.orchestrator.shutdown(OFFLINE_GRACE).await;
    Ok(())
}

pub async fn add_plugin(
    config_path: &Path,
    package: &str,
    interval: u64,
    description: Option<&str>,
) -> Result<()> {
    let config = load_config(config_path).await?;
    let lifecycle = LifecycleManager::new().await?;
    let engine = build_engine(&config, &lifecycle).await?;

    let record = engine
        .orchestrator
        .register_plugin(package, interval, description)
        .await?;
    print_success(&format!("Registered plugin {} as id {}", record.package, record.id));
    print_plugin(
        record.id,
        &record.package,
        record.interval,
        record.description.as_deref(),
    );
    engine.orchestrator.shutdown(OFFLINE_GRACE).await;
    Ok(())
}
