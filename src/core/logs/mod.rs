mod pipeline;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::core::types::JobKey;

pub use pipeline::{LogPipeline, LogSink};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warn => "WARN",
            LogLevel::Error => "ERROR",
        };
        f.write_str(label)
    }
}

/// A single record from plugin execution or a task lifecycle transition.
/// Ephemeral: delivered at most once and never persisted here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEvent {
    pub job_key: JobKey,
    pub level: LogLevel,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl LogEvent {
    pub fn new(job_key: JobKey, level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            job_key,
            level,
            message: message.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Logger handed to a plugin run. Every call is mirrored to `tracing` and
/// emitted into the pipeline tagged with the job key. Safe to use from any
/// thread; emitting never blocks.
#[derive(Clone)]
pub struct JobLogger {
    key: JobKey,
    pipeline: LogPipeline,
}

impl JobLogger {
    pub fn new(key: JobKey, pipeline: LogPipeline) -> Self {
        Self { key, pipeline }
    }

    pub fn key(&self) -> JobKey {
        self.key
    }

    pub fn log(&self, level: LogLevel, message: impl Into<String>) {
        let message = message.into();
        match level {
            LogLevel::Debug => tracing::debug!(job = %self.key, "{}", message),
            LogLevel::Info => tracing::info!(job = %self.key, "{}", message),
            LogLevel::Warn => tracing::warn!(job = %self.key, "{}", message),
            LogLevel::Error => tracing::error!(job = %self.key, "{}", message),
        }
        self.pipeline.emit(LogEvent::new(self.key, level, message));
    }

    pub fn debug(&self, message: impl Into<String>) {
        self.log(LogLevel::Debug, message);
    }

    pub fn info(&self, message: impl Into<String>) {
        self.log(LogLevel::Info, message);
    }

    pub fn warn(&self, message: impl Into<String>) {
        self.log(LogLevel::Warn, message);
    }

    pub fn error(&self, message: impl Into<String>) {
        self.log(LogLevel::Error, message);
    }
}
