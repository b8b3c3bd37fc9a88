//! Keeps the scheduler's task table, the active-config cache and the jobs
//! table consistent with each other.
//!
//! Per key the task moves through `NO_TASK -> PAUSED -> RESUMED -> PAUSED
//! -> NO_TASK`. A task exists while at least one job row exists for its key
//! and is resumed exactly while one of those rows is active. Every mutating
//! operation runs its check-then-act sequence under the key's lock.

mod state;

use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{debug, info, warn};

use crate::core::config::OverlapPolicy;
use crate::core::error::{EngineError, EngineResult};
use crate::core::executor::{ExecutionIsolator, ExecutionOutcome};
use crate::core::logs::{JobLogger, LogLevel, LogPipeline};
use crate::core::registry::PluginRegistry;
use crate::core::store::{JobRecord, JobStore, PluginRecord};
use crate::core::types::JobKey;
use crate::plugins::Plugin;

pub use state::{ActiveConfig, TaskSnapshot};
use state::{ActiveConfigCache, KeyLocks, ScheduledTask};

/// Schema and jobs of one plugin for one subscriber.
#[derive(Debug, Clone, Serialize)]
pub struct PluginView {
    pub plugin: PluginRecord,
    pub schema: Value,
    pub jobs: Vec<JobRecord>,
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct BootstrapReport {
    pub plugins_loaded: usize,
    pub plugins_failed: usize,
    pub tasks: usize,
    pub resumed: usize,
}

#[derive(Clone)]
pub struct JobOrchestrator {
    inner: Arc<Shared>,
}

struct Shared {
    store: JobStore,
    registry: Arc<PluginRegistry>,
    executor: Arc<ExecutionIsolator>,
    pipeline: LogPipeline,
    scheduler: JobScheduler,
    overlap: OverlapPolicy,
    locks: KeyLocks,
    tasks: parking_lot::Mutex<HashMap<JobKey, ScheduledTask>>,
    cache: ActiveConfigCache,
}

impl JobOrchestrator {
    pub fn new(
        store: JobStore,
        registry: Arc<PluginRegistry>,
        executor: Arc<ExecutionIsolator>,
        pipeline: LogPipeline,
        scheduler: JobScheduler,
        overlap: OverlapPolicy,
    ) -> Self {
        Self {
            inner: Arc::new(Shared {
                store,
                registry,
                executor,
                pipeline,
                scheduler,
                overlap,
                locks: KeyLocks::default(),
                tasks: parking_lot::Mutex::new(HashMap::new()),
                cache: ActiveConfigCache::default(),
            }),
        }
    }

    pub fn store(&self) -> &JobStore {
        &self.inner.store
    }

    pub fn registry(&self) -> &Arc<PluginRegistry> {
        &self.inner.registry
    }

    pub fn pipeline(&self) -> &LogPipeline {
        &self.inner.pipeline
    }

    /// Loads the package first; a load failure leaves nothing persisted.
    pub async fn register_plugin(
        &self,
        package: &str,
        interval: u64,
        description: Option<&str>,
    ) -> EngineResult<PluginRecord> {
        if interval == 0 {
            return Err(EngineError::InvalidPlugin(
                "interval must be greater than zero".to_string(),
            ));
        }
        let was_loaded = self.inner.registry.get(package).is_some();
        self.inner.registry.load(package, false)?;

        match self.inner.store.insert_plugin(package, interval, description).await {
            Ok(record) => {
                info!("Registered plugin {} ({}) every {}s", record.id, package, interval);
                Ok(record)
            }
            Err(e) => {
                if !was_loaded {
                    self.inner.registry.unload(package);
                }
                Err(e)
            }
        }
    }

    pub async fn list_plugins(&self) -> EngineResult<Vec<PluginRecord>> {
        self.inner.store.list_plugins().await
    }

    /// Hot-swaps the plugin's code. Ticks already running finish on the old
    /// instance; the next tick resolves the new one.
    pub async fn reload_plugin(&self, plugin_id: i64) -> EngineResult<PluginRecord> {
        let record = self.plugin_record(plugin_id).await?;
        self.inner.registry.load(&record.package, true)?;
        Ok(record)
    }

    pub async fn update_plugin_description(
        &self,
        plugin_id: i64,
        description: Option<&str>,
    ) -> EngineResult<PluginRecord> {
        if !self
            .inner
            .store
            .update_plugin_description(plugin_id, description)
            .await?
        {
            return Err(EngineError::UnknownPlugin(plugin_id));
        }
        self.plugin_record(plugin_id).await
    }

    pub async fn plugin_view(
        &self,
        plugin_id: i64,
        subscriber_id: i64,
    ) -> EngineResult<PluginView> {
        let plugin = self.plugin_record(plugin_id).await?;
        let schema = self.inner.registry.require(&plugin.package)?.schema();
        let jobs = self
            .inner
            .store
            .jobs_for(JobKey::new(plugin_id, subscriber_id))
            .await?;
        Ok(PluginView { plugin, schema, jobs })
    }

    /// Persists a new inactive job and makes sure its key has a (paused)
    /// task. A missing config means the plugin's defaults.
    pub async fn add_job(
        &self,
        subscriber_id: i64,
        plugin_id: i64,
        config: Option<Value>,
        description: Option<&str>,
    ) -> EngineResult<JobRecord> {
        let (record, plugin) = self.plugin_with_instance(plugin_id).await?;
        let validated = plugin.config(config.as_ref())?;

        let key = JobKey::new(plugin_id, subscriber_id);
        let _guard = self.inner.locks.lock(key).await;
        let job = self
            .inner
            .store
            .insert_job(subscriber_id, plugin_id, &validated.to_string(), description)
            .await?;
        self.ensure_task(key, &record);
        debug!("Added job {} for {}", job.id, key);
        Ok(job)
    }

    /// Replaces a job's config. If the job is the active one the cache
    /// switches to the new config before the key is released.
    pub async fn update_job(
        &self,
        job_id: i64,
        config: Value,
        description: Option<&str>,
    ) -> EngineResult<JobRecord> {
        let existing = self.job_record(job_id).await?;
        let (_, plugin) = self.plugin_with_instance(existing.plugin_id).await?;
        let validated = plugin.config(Some(&config))?;

        let key = existing.key();
        let _guard = self.inner.locks.lock(key).await;
        let updated = self
            .inner
            .store
            .update_job(job_id, &validated.to_string(), description)
            .await?
            .ok_or(EngineError::JobNotFound(job_id))?;
        if updated.active {
            self.inner.cache.set(key, job_id, validated);
            self.lifecycle(key, LogLevel::Info, format!("active job {} config updated", job_id));
        }
        Ok(updated)
    }

    /// Deletes a job. The last job of a key takes the task, the cached
    /// config and the key's log lane with it; otherwise removing the active
    /// job pauses the task.
    pub async fn remove_job(&self, job_id: i64) -> EngineResult<JobRecord> {
        let key = self.job_record(job_id).await?.key();
        let guard = self.inner.locks.lock(key).await;

        let removed = self
            .inner
            .store
            .delete_job(job_id)
            .await?
            .ok_or(EngineError::JobNotFound(job_id))?;
        let remaining = self.inner.store.count_jobs_for(key).await?;

        if remaining == 0 {
            self.inner.cache.remove(key);
            self.drop_task(key).await;
            self.lifecycle(key, LogLevel::Info, "last job removed, task unscheduled");
            self.inner.pipeline.close_key(key);
        } else if removed.active {
            self.inner.cache.remove(key);
            self.pause_task(key).await;
            self.lifecycle(
                key,
                LogLevel::Info,
                format!("active job {} removed, task paused", job_id),
            );
        }

        drop(guard);
        self.inner.locks.prune(key);
        Ok(removed)
    }

    /// Makes the job the only active one for its key, caches its config and
    /// resumes the task. The config is validated against the plugin before
    /// anything changes.
    pub async fn activate_job(&self, job_id: i64) -> EngineResult<JobRecord> {
        self.activate(job_id, true).await
    }

    /// Without `require_plugin` a job whose package is not loaded is still
    /// activated with its stored config; its ticks are skipped until the
    /// plugin loads.
    async fn activate(&self, job_id: i64, require_plugin: bool) -> EngineResult<JobRecord> {
        // Plugin and subscriber never change, so the key is safe to read
        // before locking. Everything else is re-read under the lock.
        let key = self.job_record(job_id).await?.key();
        let guard = self.inner.locks.lock(key).await;
        let result = self.activate_locked(key, job_id, require_plugin).await;
        drop(guard);
        if matches!(result, Err(EngineError::JobNotFound(_))) {
            self.inner.locks.prune(key);
        }
        result
    }

    async fn activate_locked(
        &self,
        key: JobKey,
        job_id: i64,
        require_plugin: bool,
    ) -> EngineResult<JobRecord> {
        // The row may have been removed while we waited for the key.
        let job = self.job_record(job_id).await?;
        let record = self.plugin_record(job.plugin_id).await?;
        let validated = match self.inner.registry.get(&record.package) {
            Some(plugin) => plugin.config(Some(&job.config_value()?))?,
            None if !require_plugin => job.config_value()?,
            None => return Err(EngineError::PluginNotFound(record.package)),
        };

        self.ensure_task(key, &record);
        let resumed_here = self.resume_task(key).await?;

        // Scheduler first, database second: a failed write takes the runner
        // back out so the task never fires for an inactive key.
        let activated = match self.inner.store.activate_job(job_id).await {
            Ok(Some(job)) => job,
            Ok(None) => {
                self.unwind_activation(key, resumed_here).await;
                return Err(EngineError::JobNotFound(job_id));
            }
            Err(e) => {
                self.unwind_activation(key, resumed_here).await;
                return Err(e);
            }
        };

        // Updates hold the same lock, so `validated` matches the committed row.
        self.inner.cache.set(key, job_id, validated);
        self.lifecycle(key, LogLevel::Info, format!("job {} activated", job_id));
        Ok(activated)
    }

    async fn unwind_activation(&self, key: JobKey, resumed_here: bool) {
        match self.inner.store.count_jobs_for(key).await {
            Ok(0) => {
                self.inner.cache.remove(key);
                self.drop_task(key).await;
            }
            _ if resumed_here => self.pause_task(key).await,
            _ => {}
        }
    }

    /// Deactivating the active job clears the cache and pauses the task.
    /// Deactivating any other job only touches its row.
    pub async fn deactivate_job(&self, job_id: i64) -> EngineResult<JobRecord> {
        let key = self.job_record(job_id).await?.key();
        let _guard = self.inner.locks.lock(key).await;

        let mut before = self
            .inner
            .store
            .deactivate_job(job_id)
            .await?
            .ok_or(EngineError::JobNotFound(job_id))?;
        if before.active {
            self.inner.cache.remove(key);
            self.pause_task(key).await;
            self.lifecycle(key, LogLevel::Info, format!("job {} deactivated", job_id));
        }
        before.active = false;
        Ok(before)
    }

    pub async fn get_jobs_for(
        &self,
        plugin_id: i64,
        subscriber_id: i64,
    ) -> EngineResult<Vec<JobRecord>> {
        self.inner
            .store
            .jobs_for(JobKey::new(plugin_id, subscriber_id))
            .await
    }

    pub fn tasks(&self) -> Vec<TaskSnapshot> {
        let mut snapshots: Vec<TaskSnapshot> = self
            .inner
            .tasks
            .lock()
            .iter()
            .map(|(key, task)| task.snapshot(*key))
            .collect();
        snapshots.sort_by_key(|s| s.key);
        snapshots
    }

    pub fn task(&self, key: JobKey) -> Option<TaskSnapshot> {
        self.inner.tasks.lock().get(&key).map(|t| t.snapshot(key))
    }

    pub fn active_config(&self, key: JobKey) -> Option<ActiveConfig> {
        self.inner.cache.get(key)
    }

    /// Rebuilds the in-memory state from storage: loads every plugin, creates
    /// a paused task per key with jobs, then re-activates each key's active
    /// job. Keys with several active rows keep only the newest. A package
    /// that fails to load keeps its rows active and its ticks are skipped
    /// until a reload succeeds. Only a stored config the plugin rejects gets
    /// its key's rows deactivated.
    pub async fn bootstrap(&self) -> EngineResult<BootstrapReport> {
        let mut report = BootstrapReport::default();
        let mut plugins = HashMap::new();
        for record in self.inner.store.list_plugins().await? {
            match self.inner.registry.load(&record.package, false) {
                Ok(_) => report.plugins_loaded += 1,
                Err(e) => {
                    warn!("Plugin {} unavailable at startup: {}", record.package, e);
                    report.plugins_failed += 1;
                }
            }
            plugins.insert(record.id, record);
        }

        // Rows come back ordered by id, so the last active one per key is the newest.
        let mut active: HashMap<JobKey, Vec<i64>> = HashMap::new();
        for job in self.inner.store.all_jobs().await? {
            let key = job.key();
            let Some(record) = plugins.get(&job.plugin_id) else {
                continue;
            };
            self.ensure_task(key, record);
            if job.active {
                active.entry(key).or_default().push(job.id);
            }
        }
        report.tasks = self.inner.tasks.lock().len();

        for (key, job_ids) in active {
            let Some(&newest) = job_ids.last() else {
                continue;
            };
            if job_ids.len() > 1 {
                warn!("{} active jobs for {}, keeping job {}", job_ids.len(), key, newest);
            }
            match self.activate(newest, false).await {
                Ok(_) => report.resumed += 1,
                Err(e @ (EngineError::ConfigValidation(_) | EngineError::Json(_))) => {
                    warn!("Active job {} for {} has a rejected config: {}", newest, key, e);
                    for job_id in job_ids {
                        self.inner.store.deactivate_job(job_id).await?;
                    }
                    self.lifecycle(
                        key,
                        LogLevel::Warn,
                        format!("job {} deactivated, stored config rejected: {}", newest, e),
                    );
                }
                Err(e) => {
                    warn!("Could not restore active job {} for {}: {}", newest, key, e);
                    self.lifecycle(
                        key,
                        LogLevel::Warn,
                        format!("job {} could not be restored, task left paused: {}", newest, e),
                    );
                }
            }
        }

        info!(
            "Bootstrap complete: {} plugin(s) loaded, {} failed, {} task(s), {} resumed",
            report.plugins_loaded, report.plugins_failed, report.tasks, report.resumed
        );
        Ok(report)
    }

    /// Waits for in-flight runs, then for queued log events. The scheduler
    /// must already be stopped.
    pub async fn shutdown(&self, grace: Duration) -> bool {
        let executor_drained = self.inner.executor.drain(grace).await;
        let logs_drained = self.inner.pipeline.shutdown(grace).await;
        executor_drained && logs_drained
    }

    /// One firing of the key's task. Reads only the cache, never storage.
    /// Returns `None` when the tick did not run a plugin.
    pub async fn tick(&self, key: JobKey) -> Option<ExecutionOutcome> {
        let (package, in_flight) = {
            let tasks = self.inner.tasks.lock();
            let task = tasks.get(&key)?;
            (task.package.clone(), task.in_flight.clone())
        };
        let active = self.inner.cache.get(key)?;
        let Some(plugin) = self.inner.registry.get(&package) else {
            debug!("Tick for {} skipped, plugin {} not loaded", key, package);
            return None;
        };

        match self.inner.overlap {
            OverlapPolicy::Skip => {
                if in_flight
                    .compare_exchange(0, 1, Ordering::AcqRel, Ordering::Acquire)
                    .is_err()
                {
                    self.lifecycle(
                        key,
                        LogLevel::Warn,
                        "previous run still in flight, tick skipped",
                    );
                    return None;
                }
            }
            OverlapPolicy::Allow => {
                in_flight.fetch_add(1, Ordering::AcqRel);
            }
        }

        let logger = JobLogger::new(key, self.inner.pipeline.clone());
        let outcome = self
            .inner
            .executor
            .execute(plugin, active.config, logger)
            .await;
        in_flight.fetch_sub(1, Ordering::AcqRel);

        if let Some(task) = self.inner.tasks.lock().get_mut(&key) {
            task.last_run = Some(chrono::Utc::now());
            task.last_outcome = Some(outcome.clone());
        }
        Some(outcome)
    }

    // Task table mutations; callers hold the key's lock.

    fn ensure_task(&self, key: JobKey, plugin: &PluginRecord) {
        let mut tasks = self.inner.tasks.lock();
        if tasks.contains_key(&key) {
            return;
        }
        tasks.insert(key, ScheduledTask::new(plugin.package.clone(), plugin.interval));
        drop(tasks);
        self.lifecycle(
            key,
            LogLevel::Info,
            format!("task scheduled every {}s (paused)", plugin.interval),
        );
    }

    /// Returns true if this call added the runner.
    async fn resume_task(&self, key: JobKey) -> EngineResult<bool> {
        let interval = {
            let tasks = self.inner.tasks.lock();
            match tasks.get(&key) {
                Some(task) if task.runner.is_none() => task.interval,
                _ => return Ok(false),
            }
        };

        let runner = runner_job(Arc::downgrade(&self.inner), key, interval)?;
        let runner_id = self.inner.scheduler.add(runner).await?;
        if let Some(task) = self.inner.tasks.lock().get_mut(&key) {
            task.runner = Some(runner_id);
        }
        debug!("Task {} resumed (runner {})", key, runner_id);
        Ok(true)
    }

    async fn pause_task(&self, key: JobKey) {
        let runner = self
            .inner
            .tasks
            .lock()
            .get_mut(&key)
            .and_then(|task| task.runner.take());
        if let Some(runner_id) = runner {
            self.remove_runner(key, runner_id).await;
        }
    }

    async fn drop_task(&self, key: JobKey) {
        let removed = self.inner.tasks.lock().remove(&key);
        if let Some(runner_id) = removed.and_then(|task| task.runner) {
            self.remove_runner(key, runner_id).await;
        }
    }

    async fn remove_runner(&self, key: JobKey, runner_id: uuid::Uuid) {
        // A runner that survives here only fires no-op ticks: the cache
        // entry for the key is already gone.
        if let Err(e) = self.inner.scheduler.remove(&runner_id).await {
            warn!("Failed to remove runner {} for {}: {}", runner_id, key, e);
        }
    }

    fn lifecycle(&self, key: JobKey, level: LogLevel, message: impl Into<String>) {
        JobLogger::new(key, self.inner.pipeline.clone()).log(level, message);
    }

    async fn job_record(&self, job_id: i64) -> EngineResult<JobRecord> {
        self.inner
            .store
            .get_job(job_id)
            .await?
            .ok_or(EngineError::JobNotFound(job_id))
    }

    async fn plugin_record(&self, plugin_id: i64) -> EngineResult<PluginRecord> {
        self.inner
            .store
            .get_plugin(plugin_id)
            .await?
            .ok_or(EngineError::UnknownPlugin(plugin_id))
    }

    async fn plugin_with_instance(
        &self,
        plugin_id: i64,
    ) -> EngineResult<(PluginRecord, Arc<dyn Plugin>)> {
        let record = self.plugin_record(plugin_id).await?;
        let plugin = self.inner.registry.require(&record.package)?;
        Ok((record, plugin))
    }
}

fn runner_job(inner: Weak<Shared>, key: JobKey, interval: u64) -> EngineResult<Job> {
    let job = Job::new_repeated_async(Duration::from_secs(interval), move |_uuid, _l| {
        let inner = inner.clone();
        Box::pin(async move {
            let Some(inner) = inner.upgrade() else {
                return;
            };
            // Detached so a long run never holds up the scheduler's loop.
            tokio::spawn(async move {
                JobOrchestrator { inner }.tick(key).await;
            });
        })
    })?;
    Ok(job)
}

#[cfg(test)]
mod tests;
