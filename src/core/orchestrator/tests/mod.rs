mod bootstrap;
mod scenarios;

use parking_lot::Mutex;
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tokio_cron_scheduler::JobScheduler;

use super::JobOrchestrator;
use crate::core::config::OverlapPolicy;
use crate::core::error::EngineResult;
use crate::core::executor::ExecutionIsolator;
use crate::core::logs::testing::RecordingSink;
use crate::core::logs::{JobLogger, LogEvent, LogPipeline};
use crate::core::registry::PluginRegistry;
use crate::core::store::{JobStore, PluginRecord};
use crate::core::types::JobKey;
use crate::plugins::builtin::BuiltinResolver;
use crate::plugins::{Plugin, apply_defaults, validate_config};

/// Records every config it runs with, tagged with its build label.
pub(super) struct Recorder {
    pub label: &'static str,
    pub runs: Arc<Mutex<Vec<(String, Value)>>>,
}

impl Plugin for Recorder {
    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "version": { "type": "string" },
                "threshold": { "type": "integer", "minimum": 0 }
            },
            "additionalProperties": false
        })
    }

    fn config(&self, raw: Option<&Value>) -> EngineResult<Value> {
        let config = apply_defaults(&json!({ "version": "1.0" }), raw)?;
        validate_config(&self.schema(), &config)?;
        Ok(config)
    }

    fn run(&self, config: &Value, logger: &JobLogger) -> anyhow::Result<bool> {
        self.runs.lock().push((self.label.to_string(), config.clone()));
        logger.info(format!("{} ran", self.label));
        Ok(true)
    }
}

pub(super) struct Exploding;

impl Plugin for Exploding {
    fn schema(&self) -> Value {
        json!({ "type": "object" })
    }

    fn config(&self, raw: Option<&Value>) -> EngineResult<Value> {
        apply_defaults(&json!({}), raw)
    }

    fn run(&self, _config: &Value, _logger: &JobLogger) -> anyhow::Result<bool> {
        anyhow::bail!("strategy blew up")
    }
}

pub(super) struct Sleepy(pub Duration);

impl Plugin for Sleepy {
    fn schema(&self) -> Value {
        json!({ "type": "object" })
    }

    fn config(&self, raw: Option<&Value>) -> EngineResult<Value> {
        apply_defaults(&json!({}), raw)
    }

    fn run(&self, _config: &Value, _logger: &JobLogger) -> anyhow::Result<bool> {
        std::thread::sleep(self.0);
        Ok(true)
    }
}

pub(super) struct Harness {
    pub orchestrator: JobOrchestrator,
    pub store: JobStore,
    pub builtins: Arc<BuiltinResolver>,
    pub sink: RecordingSink,
    pub scheduler: JobScheduler,
    pub runs: Arc<Mutex<Vec<(String, Value)>>>,
}

impl Harness {
    pub async fn new() -> Self {
        Self::build(JobStore::in_memory().unwrap(), OverlapPolicy::Skip).await
    }

    pub async fn build(store: JobStore, overlap: OverlapPolicy) -> Self {
        let runs = Arc::new(Mutex::new(Vec::new()));
        let builtins = Arc::new(BuiltinResolver::with_defaults());
        let recorded = runs.clone();
        builtins.register("recorder", move || {
            Arc::new(Recorder {
                label: "v1",
                runs: recorded.clone(),
            })
        });
        builtins.register("exploding", || Arc::new(Exploding));
        builtins.register("sleepy", || Arc::new(Sleepy(Duration::from_millis(400))));

        let registry = Arc::new(PluginRegistry::new().with_resolver(builtins.clone()));
        let sink = RecordingSink::default();
        let pipeline = LogPipeline::spawn(Arc::new(sink.clone()), 1024, 4);
        let scheduler = JobScheduler::new().await.unwrap();
        let orchestrator = JobOrchestrator::new(
            store.clone(),
            registry,
            Arc::new(ExecutionIsolator::new(4, None)),
            pipeline,
            scheduler.clone(),
            overlap,
        );

        Self {
            orchestrator,
            store,
            builtins,
            sink,
            scheduler,
            runs,
        }
    }

    pub async fn register(&self, package: &str, interval: u64) -> PluginRecord {
        self.orchestrator
            .register_plugin(package, interval, None)
            .await
            .unwrap()
    }

    /// Stops the pipeline so every emitted event has reached the sink.
    pub async fn flush_logs(&self) -> Vec<LogEvent> {
        assert!(self.orchestrator.pipeline().shutdown(Duration::from_secs(2)).await);
        self.sink.events()
    }

    pub fn runs(&self) -> Vec<(String, Value)> {
        self.runs.lock().clone()
    }

    /// Checks the cross-structure invariants for `key` against storage.
    pub async fn assert_consistent(&self, key: JobKey) {
        let jobs = self.store.jobs_for(key).await.unwrap();
        let active: Vec<_> = jobs.iter().filter(|j| j.active).collect();
        assert!(active.len() <= 1, "{} has {} active jobs", key, active.len());

        let task = self.orchestrator.task(key);
        assert_eq!(task.is_some(), !jobs.is_empty(), "task existence for {}", key);

        let cached = self.orchestrator.active_config(key);
        match active.first() {
            Some(job) => {
                let task = task.unwrap();
                assert!(!task.paused, "{} should be resumed", key);
                let cached = cached.expect("active job must be cached");
                assert_eq!(cached.job_id, job.id);
                assert_eq!(*cached.config, job.config_value().unwrap());
            }
            None => {
                if let Some(task) = task {
                    assert!(task.paused, "{} should be paused", key);
                }
                assert!(cached.is_none(), "{} should have no cached config", key);
            }
        }
    }
}
