use thiserror::Error;

/// Failures surfaced by the engine's control-plane operations.
///
/// Background paths (ticks, log delivery) never return these to a caller;
/// they are absorbed and reported through the log stream instead.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("failed to load plugin '{package}': {reason}")]
    PluginLoad { package: String, reason: String },

    #[error("plugin '{0}' is not registered")]
    PluginNotFound(String),

    #[error("plugin {0} not found")]
    UnknownPlugin(i64),

    #[error("job {0} not found")]
    JobNotFound(i64),

    #[error("invalid config: {0}")]
    ConfigValidation(String),

    #[error("invalid plugin definition: {0}")]
    InvalidPlugin(String),

    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("scheduler error: {0}")]
    Scheduler(#[from] tokio_cron_scheduler::JobSchedulerError),

    #[error("malformed JSON: {0}")]
    Json(#[from] serde_json::Error),
}

impl EngineError {
    pub fn load(package: &str, reason: impl std::fmt::Display) -> Self {
        Self::PluginLoad {
            package: package.to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::PluginNotFound(_) | Self::UnknownPlugin(_) | Self::JobNotFound(_)
        )
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
