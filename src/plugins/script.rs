use anyhow::anyhow;
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::Arc;
use tracing::{debug, info};

use super::{Plugin, PluginResolver, apply_defaults, validate_config};
use crate::core::error::{EngineError, EngineResult};
use crate::core::logs::JobLogger;

pub const MANIFEST_FILE: &str = "manifest.toml";
pub const SCHEMA_FILE: &str = "schema.json";

/// Exit status a script uses to report a clean run that did no work.
pub const EXIT_FALSE: i32 = 2;

#[derive(Debug, Clone, Deserialize)]
pub struct ScriptManifest {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default = "default_run_command")]
    pub run_command: String,
    #[serde(default = "default_entrypoint")]
    pub entrypoint: String,
    /// Merged under the job's config before validation.
    #[serde(default = "default_defaults")]
    pub defaults: Value,
}

fn default_version() -> String {
    "0.1.0".to_string()
}

fn default_run_command() -> String {
    "sh".to_string()
}

fn default_entrypoint() -> String {
    "run.sh".to_string()
}

fn default_defaults() -> Value {
    Value::Object(serde_json::Map::new())
}

/// Everything read from a plugin directory at resolve time.
struct ScriptSource {
    manifest: ScriptManifest,
    schema: Value,
    code: String,
    dir: PathBuf,
}

/// Plugins living on disk under `<root>/<name>/`, addressed as `script:<name>`.
///
/// The manifest, schema and entrypoint source are cached per name. A resolve
/// after `purge` reads the directory again, which is how a reload picks up
/// edited code.
pub struct ScriptResolver {
    root: PathBuf,
    cache: Mutex<HashMap<String, Arc<ScriptSource>>>,
}

impl ScriptResolver {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn read_source(&self, name: &str) -> EngineResult<ScriptSource> {
        let reference = format!("script:{}", name);
        if name.is_empty() || name.contains(['/', '\\']) || name.starts_with('.') {
            return Err(EngineError::load(&reference, "invalid script name"));
        }

        let dir = self.root.join(name);
        if !dir.is_dir() {
            return Err(EngineError::load(
                &reference,
                format!("no plugin directory at {:?}", dir),
            ));
        }

        let manifest_raw = std::fs::read_to_string(dir.join(MANIFEST_FILE))
            .map_err(|e| {
                EngineError::load(&reference, format!("reading {}: {}", MANIFEST_FILE, e))
            })?;
        let manifest: ScriptManifest = toml::from_str(&manifest_raw)
            .map_err(|e| {
                EngineError::load(&reference, format!("parsing {}: {}", MANIFEST_FILE, e))
            })?;

        let schema_raw = std::fs::read_to_string(dir.join(SCHEMA_FILE))
            .map_err(|e| EngineError::load(&reference, format!("missing schema: {}", e)))?;
        let schema: Value = serde_json::from_str(&schema_raw)
            .map_err(|e| EngineError::load(&reference, format!("parsing {}: {}", SCHEMA_FILE, e)))?;

        let code = std::fs::read_to_string(dir.join(&manifest.entrypoint)).map_err(|e| {
            EngineError::load(
                &reference,
                format!("missing entrypoint {}: {}", manifest.entrypoint, e),
            )
        })?;

        Ok(ScriptSource {
            manifest,
            schema,
            code,
            dir,
        })
    }
}

impl PluginResolver for ScriptResolver {
    fn scheme(&self) -> &'static str {
        "script"
    }

    fn resolve(&self, name: &str) -> EngineResult<Arc<dyn Plugin>> {
        let cached = self.cache.lock().get(name).cloned();
        let source = match cached {
            Some(source) => source,
            None => {
                let source = Arc::new(self.read_source(name)?);
                info!(
                    "Loaded script plugin [{}] v{} from {:?}",
                    source.manifest.name, source.manifest.version, source.dir
                );
                self.cache.lock().insert(name.to_string(), source.clone());
                source
            }
        };
        Ok(Arc::new(ScriptPlugin { source }))
    }

    fn purge(&self, name: &str) {
        if self.cache.lock().remove(name).is_some() {
            debug!("Purged cached script source for {}", name);
        }
    }
}

/// Runs the cached entrypoint source with `run_command -c`. The config is
/// written to stdin as JSON and `PLUGBOARD_JOB` carries the job key.
/// stdout lines are logged at INFO and stderr lines at WARN.
pub struct ScriptPlugin {
    source: Arc<ScriptSource>,
}

impl Plugin for ScriptPlugin {
    fn schema(&self) -> Value {
        self.source.schema.clone()
    }

    fn config(&self, raw: Option<&Value>) -> EngineResult<Value> {
        let config = apply_defaults(&self.source.manifest.defaults, raw)?;
        validate_config(&self.source.schema, &config)?;
        Ok(config)
    }

    fn run(&self, config: &Value, logger: &JobLogger) -> anyhow::Result<bool> {
        let manifest = &self.source.manifest;
        let mut child = Command::new(&manifest.run_command)
            .arg("-c")
            .arg(&self.source.code)
            .current_dir(&self.source.dir)
            .env("PLUGBOARD_JOB", logger.key().to_string())
            .env("PLUGBOARD_PLUGIN", &manifest.name)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| anyhow!("failed to start '{}': {}", manifest.run_command, e))?;

        // Fed from its own thread: a script may fill stdout before it reads
        // stdin, and both pipes have to drain at the same time.
        let payload = serde_json::to_vec(config)?;
        let feeder = child.stdin.take().map(|mut stdin| {
            std::thread::spawn(move || {
                // A script that never reads its config closes the pipe early.
                let _ = stdin.write_all(&payload);
            })
        });

        let output = child.wait_with_output()?;
        if let Some(feeder) = feeder
            && feeder.join().is_err()
        {
            debug!("stdin feeder for {} panicked", manifest.name);
        }
        for line in String::from_utf8_lossy(&output.stdout).lines() {
            if !line.trim().is_empty() {
                logger.info(line);
            }
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        for line in stderr.lines() {
            if !line.trim().is_empty() {
                logger.warn(line);
            }
        }

        match output.status.code() {
            Some(0) => Ok(true),
            Some(EXIT_FALSE) => Ok(false),
            Some(code) => Err(anyhow!("script exited with status {}", code)),
            None => Err(anyhow!("script terminated by signal")),
        }
    }
}
