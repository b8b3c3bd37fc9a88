use anyhow::Result;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

pub const CONFIG_FILE: &str = "plugboard.toml";

#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub executor: ExecutorConfig,

    #[serde(default)]
    pub logs: LogConfig,

    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub plugins: PluginDirConfig,

    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

/// What happens when a tick fires while the previous run for the same key
/// is still executing.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum OverlapPolicy {
    #[default]
    Skip,
    Allow,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExecutorConfig {
    /// Ceiling on plugin runs in flight across the whole engine.
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    #[serde(default)]
    pub timeout_secs: Option<u64>,

    #[serde(default)]
    pub overlap: OverlapPolicy,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogConfig {
    /// Events queued but not yet delivered; emits beyond this are dropped.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,

    #[serde(default = "default_send_timeout_ms")]
    pub send_timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PluginDirConfig {
    #[serde(default = "default_script_dir")]
    pub script_dir: PathBuf,
}

fn default_shutdown_grace_secs() -> u64 {
    10
}
fn default_db_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("plugboard")
        .join("plugboard.db")
}
fn default_max_concurrency() -> usize {
    8
}
fn default_queue_capacity() -> usize {
    4096
}
fn default_max_in_flight() -> usize {
    16
}
fn default_send_timeout_ms() -> u64 {
    2000
}
fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    17900
}
fn default_script_dir() -> PathBuf {
    PathBuf::from("plugins")
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            storage: StorageConfig::default(),
            executor: ExecutorConfig::default(),
            logs: LogConfig::default(),
            server: ServerConfig::default(),
            plugins: PluginDirConfig::default(),
            shutdown_grace_secs: default_shutdown_grace_secs(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
            timeout_secs: None,
            overlap: OverlapPolicy::default(),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            max_in_flight: default_max_in_flight(),
            send_timeout_ms: default_send_timeout_ms(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for PluginDirConfig {
    fn default() -> Self {
        Self {
            script_dir: default_script_dir(),
        }
    }
}

impl ExecutorConfig {
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }
}

impl LogConfig {
    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }
}

impl EngineConfig {
    pub async fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            info!("No {} found at {:?}, using defaults.", CONFIG_FILE, path);
            return Ok(Self::default());
        }
        let content = tokio::fs::read_to_string(path).await?;
        let mut config: EngineConfig = toml::from_str(&content)?;

        // A zero ceiling would park every tick forever.
        if config.executor.max_concurrency == 0 {
            config.executor.max_concurrency = 1;
        }
        if config.logs.max_in_flight == 0 {
            config.logs.max_in_flight = 1;
        }

        info!(
            "Loaded engine config: db={:?}, max_concurrency={}, overlap={:?}, timeout={:?}",
            config.storage.path,
            config.executor.max_concurrency,
            config.executor.overlap,
            config.executor.timeout_secs
        );
        Ok(config)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}
