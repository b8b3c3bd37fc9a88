use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::OwnedMutexGuard;
use uuid::Uuid;

use crate::core::executor::ExecutionOutcome;
use crate::core::types::JobKey;

/// The config a tick runs with, tagged with the job it came from.
#[derive(Debug, Clone)]
pub struct ActiveConfig {
    pub job_id: i64,
    pub config: Arc<Value>,
}

/// Key -> config of the currently active job. Ticks only ever read this.
#[derive(Default)]
pub struct ActiveConfigCache {
    entries: RwLock<HashMap<JobKey, ActiveConfig>>,
}

impl ActiveConfigCache {
    pub fn get(&self, key: JobKey) -> Option<ActiveConfig> {
        self.entries.read().get(&key).cloned()
    }

    pub fn set(&self, key: JobKey, job_id: i64, config: Value) {
        self.entries.write().insert(
            key,
            ActiveConfig {
                job_id,
                config: Arc::new(config),
            },
        );
    }

    pub fn remove(&self, key: JobKey) -> Option<ActiveConfig> {
        self.entries.write().remove(&key)
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }
}

/// One recurring trigger per key. `runner` is the scheduler job id and is
/// only present while the task is resumed.
pub struct ScheduledTask {
    pub task_id: Uuid,
    pub package: String,
    pub interval: u64,
    pub runner: Option<Uuid>,
    pub in_flight: Arc<AtomicUsize>,
    pub last_run: Option<DateTime<Utc>>,
    pub last_outcome: Option<ExecutionOutcome>,
}

impl ScheduledTask {
    pub fn new(package: String, interval: u64) -> Self {
        Self {
            task_id: Uuid::new_v4(),
            package,
            interval,
            runner: None,
            in_flight: Arc::new(AtomicUsize::new(0)),
            last_run: None,
            last_outcome: None,
        }
    }

    pub fn snapshot(&self, key: JobKey) -> TaskSnapshot {
        TaskSnapshot {
            key,
            task_id: self.task_id,
            package: self.package.clone(),
            interval: self.interval,
            paused: self.runner.is_none(),
            running: self.in_flight.load(Ordering::Acquire) > 0,
            last_run: self.last_run,
            last_outcome: self.last_outcome.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TaskSnapshot {
    pub key: JobKey,
    pub task_id: Uuid,
    pub package: String,
    pub interval: u64,
    pub paused: bool,
    pub running: bool,
    pub last_run: Option<DateTime<Utc>>,
    pub last_outcome: Option<ExecutionOutcome>,
}

/// Per-key async mutexes serializing the check-then-act sequences of the
/// mutating operations. Entries are dropped once nobody holds them.
#[derive(Default)]
pub struct KeyLocks {
    locks: Mutex<HashMap<JobKey, Arc<tokio::sync::Mutex<()>>>>,
}

impl KeyLocks {
    pub async fn lock(&self, key: JobKey) -> OwnedMutexGuard<()> {
        let lock = self.locks.lock().entry(key).or_default().clone();
        lock.lock_owned().await
    }

    /// Drops the entry for `key` if no guard or waiter references it.
    pub fn prune(&self, key: JobKey) {
        let mut locks = self.locks.lock();
        if locks.get(&key).is_some_and(|lock| Arc::strong_count(lock) == 1) {
            locks.remove(&key);
        }
    }

    pub fn len(&self) -> usize {
        self.locks.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn cache_replaces_whole_entry() {
        let cache = ActiveConfigCache::default();
        let key = JobKey::new(1, 1);
        cache.set(key, 10, json!({ "v": 1 }));
        cache.set(key, 11, json!({ "v": 2 }));
        let entry = cache.get(key).unwrap();
        assert_eq!(entry.job_id, 11);
        assert_eq!(*entry.config, json!({ "v": 2 }));
        assert_eq!(cache.remove(key).unwrap().job_id, 11);
        assert!(cache.get(key).is_none());
    }

    #[tokio::test]
    async fn key_locks_are_pruned_when_released() {
        let locks = KeyLocks::default();
        let key = JobKey::new(2, 3);
        let guard = locks.lock(key).await;
        locks.prune(key);
        assert_eq!(locks.len(), 1);
        drop(guard);
        locks.prune(key);
        assert_eq!(locks.len(), 0);
    }

    #[test]
    fn fresh_task_is_paused() {
        let task = ScheduledTask::new("builtin:sample@v1".into(), 5);
        let snapshot = task.snapshot(JobKey::new(1, 1));
        assert!(snapshot.paused);
        assert!(!snapshot.running);
        assert!(snapshot.last_run.is_none());
    }
}
