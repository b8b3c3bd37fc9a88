//! Runs plugin ticks off the scheduling loop.
//!
//! Each run takes a permit from a global semaphore and executes on the
//! blocking pool, so a slow or stuck plugin never stalls the scheduler or
//! the control plane. Plugin errors and panics become a `Failed` outcome
//! and an ERROR event on the job's log stream.

use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{info, warn};

use crate::core::logs::JobLogger;
use crate::plugins::Plugin;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum ExecutionOutcome {
    Completed(bool),
    Failed(String),
    TimedOut,
    /// The executor was shutting down and the run never started.
    Cancelled,
}

impl ExecutionOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Completed(_))
    }
}

pub struct ExecutionIsolator {
    permits: Arc<Semaphore>,
    max_concurrency: usize,
    timeout: Option<Duration>,
}

impl ExecutionIsolator {
    pub fn new(max_concurrency: usize, timeout: Option<Duration>) -> Self {
        let max_concurrency = max_concurrency.max(1);
        Self {
            permits: Arc::new(Semaphore::new(max_concurrency)),
            max_concurrency,
            timeout,
        }
    }

    pub fn in_flight(&self) -> usize {
        self.max_concurrency - self.permits.available_permits()
    }

    pub async fn execute(
        &self,
        plugin: Arc<dyn Plugin>,
        config: Arc<Value>,
        logger: JobLogger,
    ) -> ExecutionOutcome {
        let Ok(permit) = self.permits.clone().acquire_owned().await else {
            return ExecutionOutcome::Cancelled;
        };

        let run_logger = logger.clone();
        // The permit moves into the closure: it is held until the plugin
        // actually returns, even if the caller stops waiting.
        let handle = tokio::task::spawn_blocking(move || {
            let _permit = permit;
            plugin.run(&config, &run_logger)
        });

        let joined = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, handle).await {
                Ok(joined) => joined,
                Err(_) => {
                    logger.error(format!("run timed out after {:?}", limit));
                    return ExecutionOutcome::TimedOut;
                }
            },
            None => handle.await,
        };

        match joined {
            Ok(Ok(done)) => ExecutionOutcome::Completed(done),
            Ok(Err(e)) => {
                let message = format!("{:#}", e);
                logger.error(format!("run failed: {}", message));
                ExecutionOutcome::Failed(message)
            }
            Err(e) => {
                let message = if e.is_panic() {
                    panic_message(e.into_panic())
                } else {
                    e.to_string()
                };
                logger.error(format!("run panicked: {}", message));
                ExecutionOutcome::Failed(message)
            }
        }
    }

    /// Stops new runs and waits up to `grace` for in-flight ones to finish.
    /// Returns false if runs were still going when the grace period ran out.
    pub async fn drain(&self, grace: Duration) -> bool {
        let total = self.max_concurrency as u32;
        let drained = match tokio::time::timeout(grace, self.permits.acquire_many(total)).await {
            Ok(Ok(permits)) => {
                permits.forget();
                true
            }
            Ok(Err(_)) => true,
            Err(_) => {
                warn!(
                    "{} plugin run(s) still in flight after {:?}, abandoning",
                    self.in_flight(),
                    grace
                );
                false
            }
        };
        self.permits.close();
        if drained {
            info!("Executor drained");
        }
        drained
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
