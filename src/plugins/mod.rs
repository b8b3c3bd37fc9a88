pub mod builtin;
pub mod script;

use serde_json::Value;
use std::sync::Arc;

use crate::core::error::{EngineError, EngineResult};
use crate::core::logs::JobLogger;

/// The capability set every registered plugin exposes.
///
/// `run` may block for as long as it likes: it is always invoked from the
/// executor's blocking pool, never on the scheduling loop.
pub trait Plugin: Send + Sync {
    /// JSON Schema describing the plugin's config.
    fn schema(&self) -> Value;

    /// Validates `raw` and fills in defaults. `None` yields the default config.
    fn config(&self, raw: Option<&Value>) -> EngineResult<Value>;

    /// Runs one tick with an already validated config.
    fn run(&self, config: &Value, logger: &JobLogger) -> anyhow::Result<bool>;
}

/// Turns the name part of a `scheme:name` package reference into a fresh
/// plugin instance.
pub trait PluginResolver: Send + Sync {
    fn scheme(&self) -> &'static str;

    fn resolve(&self, name: &str) -> EngineResult<Arc<dyn Plugin>>;

    /// Forgets anything cached for `name`, so the next `resolve` reads the
    /// code again.
    fn purge(&self, _name: &str) {}
}

/// Overlays the top-level keys of `raw` on `defaults`.
pub fn apply_defaults(defaults: &Value, raw: Option<&Value>) -> EngineResult<Value> {
    let mut merged = match defaults {
        Value::Object(map) => map.clone(),
        _ => serde_json::Map::new(),
    };
    match raw {
        None | Some(Value::Null) => {}
        Some(Value::Object(overrides)) => {
            for (key, value) in overrides {
                merged.insert(key.clone(), value.clone());
            }
        }
        Some(other) => {
            return Err(EngineError::ConfigValidation(format!(
                "config must be a JSON object, got {}",
                json_type(other)
            )));
        }
    }
    Ok(Value::Object(merged))
}

pub fn validate_config(schema: &Value, config: &Value) -> EngineResult<()> {
    let validator = jsonschema::validator_for(schema)
        .map_err(|e| EngineError::ConfigValidation(format!("schema does not compile: {}", e)))?;
    let errors: Vec<String> = validator
        .iter_errors(config)
        .map(|e| e.to_string())
        .collect();
    if errors.is_empty() {
        Ok(())
    } else {
        Err(EngineError::ConfigValidation(errors.join("; ")))
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
