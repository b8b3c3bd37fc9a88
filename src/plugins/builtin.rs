use parking_lot::RwLock;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

use super::{Plugin, PluginResolver, apply_defaults, validate_config};
use crate::core::error::{EngineError, EngineResult};
use crate::core::logs::JobLogger;

pub type PluginFactory = Arc<dyn Fn() -> Arc<dyn Plugin> + Send + Sync>;

/// Plugins compiled into the binary, addressed as `builtin:<name>`.
/// Every resolve calls the factory, so each load gets its own instance.
pub struct BuiltinResolver {
    factories: RwLock<HashMap<String, PluginFactory>>,
}

impl BuiltinResolver {
    pub fn new() -> Self {
        Self {
            factories: RwLock::new(HashMap::new()),
        }
    }

    pub fn with_defaults() -> Self {
        let resolver = Self::new();
        resolver.register("sample@v1", || Arc::new(SamplePlugin::new("1.0")));
        resolver.register("sample@v2", || Arc::new(SamplePlugin::new("2.0")));
        resolver
    }

    /// Adds or replaces a factory. A replaced factory is only picked up by
    /// loads that override the registered instance.
    pub fn register<F>(&self, name: &str, factory: F)
    where
        F: Fn() -> Arc<dyn Plugin> + Send + Sync + 'static,
    {
        info!("Registering builtin plugin factory: {}", name);
        self.factories
            .write()
            .insert(name.to_string(), Arc::new(factory));
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.read().keys().cloned().collect();
        names.sort();
        names
    }
}

impl Default for BuiltinResolver {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl PluginResolver for BuiltinResolver {
    fn scheme(&self) -> &'static str {
        "builtin"
    }

    fn resolve(&self, name: &str) -> EngineResult<Arc<dyn Plugin>> {
        let factory = self
            .factories
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| EngineError::load(&format!("builtin:{}", name), "no such builtin"))?;
        Ok(factory())
    }
}

/// Minimal plugin that logs its config on every tick.
pub struct SamplePlugin {
    default_version: &'static str,
}

impl SamplePlugin {
    pub fn new(default_version: &'static str) -> Self {
        Self { default_version }
    }
}

impl Plugin for SamplePlugin {
    fn schema(&self) -> Value {
        json!({
            "title": "Config",
            "type": "object",
            "properties": {
                "version": { "type": "string", "default": self.default_version }
            },
            "additionalProperties": false
        })
    }

    fn config(&self, raw: Option<&Value>) -> EngineResult<Value> {
        let config = apply_defaults(&json!({ "version": self.default_version }), raw)?;
        validate_config(&self.schema(), &config)?;
        Ok(config)
    }

    fn run(&self, config: &Value, logger: &JobLogger) -> anyhow::Result<bool> {
        logger.info(format!("running with config: {}", config));
        Ok(true)
    }
}
