//! Process-wide table of loaded plugin instances, keyed by package reference.

use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

use crate::core::error::{EngineError, EngineResult};
use crate::plugins::{Plugin, PluginResolver};

pub struct PluginRegistry {
    resolvers: HashMap<&'static str, Arc<dyn PluginResolver>>,
    plugins: RwLock<HashMap<String, Arc<dyn Plugin>>>,
    // Serializes loads so two overrides of one reference cannot interleave.
    load_lock: Mutex<()>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self {
            resolvers: HashMap::new(),
            plugins: RwLock::new(HashMap::new()),
            load_lock: Mutex::new(()),
        }
    }

    pub fn with_resolver(mut self, resolver: Arc<dyn PluginResolver>) -> Self {
        self.resolvers.insert(resolver.scheme(), resolver);
        self
    }

    /// Loads `reference` and returns the registered instance.
    ///
    /// Without `override_existing` an already registered instance is returned
    /// as is. With it the resolver's cache is purged and a fresh instance
    /// replaces the old one; ticks already running keep the instance they
    /// started with. A failed load leaves any registered instance in place.
    pub fn load(&self, reference: &str, override_existing: bool) -> EngineResult<Arc<dyn Plugin>> {
        let (scheme, name) = split_reference(reference)?;
        let resolver = self
            .resolvers
            .get(scheme)
            .ok_or_else(|| EngineError::load(reference, format!("unknown scheme '{}'", scheme)))?;

        let _guard = self.load_lock.lock();
        if !override_existing && let Some(existing) = self.plugins.read().get(reference) {
            return Ok(existing.clone());
        }

        if override_existing {
            resolver.purge(name);
        }
        let plugin = resolver.resolve(name)?;
        if let Err(e) = verify_capabilities(reference, plugin.as_ref()) {
            warn!("Rejected plugin {}: {}", reference, e);
            return Err(e);
        }

        let replaced = self
            .plugins
            .write()
            .insert(reference.to_string(), plugin.clone())
            .is_some();
        if replaced {
            info!("Hot-swapped plugin {}", reference);
        } else {
            info!("Loaded plugin {}", reference);
        }
        Ok(plugin)
    }

    pub fn unload(&self, reference: &str) -> bool {
        let _guard = self.load_lock.lock();
        if let Ok((scheme, name)) = split_reference(reference)
            && let Some(resolver) = self.resolvers.get(scheme)
        {
            resolver.purge(name);
        }
        self.plugins.write().remove(reference).is_some()
    }

    pub fn get(&self, reference: &str) -> Option<Arc<dyn Plugin>> {
        self.plugins.read().get(reference).cloned()
    }

    pub fn require(&self, reference: &str) -> EngineResult<Arc<dyn Plugin>> {
        self.get(reference)
            .ok_or_else(|| EngineError::PluginNotFound(reference.to_string()))
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.plugins.read().keys().cloned().collect();
        names.sort();
        names
    }
}

impl Default for PluginRegistry {
    fn default() -> Self {
        Self::new()
    }
}

pub fn split_reference(reference: &str) -> EngineResult<(&str, &str)> {
    match reference.split_once(':') {
        Some((scheme, name)) if !scheme.is_empty() && !name.is_empty() => Ok((scheme, name)),
        _ => Err(EngineError::load(
            reference,
            "package reference must look like 'scheme:name'",
        )),
    }
}

/// Checks the capability set before an instance is registered: an object
/// schema that compiles, and a default config that validates against it.
fn verify_capabilities(reference: &str, plugin: &dyn Plugin) -> EngineResult<()> {
    let schema = plugin.schema();
    if !matches!(schema, Value::Object(_)) {
        return Err(EngineError::load(reference, "schema capability must be a JSON object"));
    }
    jsonschema::validator_for(&schema)
        .map_err(|e| EngineError::load(reference, format!("schema does not compile: {}", e)))?;
    plugin
        .config(None)
        .map_err(|e| EngineError::load(reference, format!("default config rejected: {}", e)))?;
    Ok(())
}
