use serde_json::json;

use super::Harness;
use crate::core::executor::ExecutionOutcome;
use crate::core::logs::LogLevel;
use crate::core::types::JobKey;

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn first_job_creates_paused_task_without_cache_entry() {
    let h = Harness::new().await;
    let plugin = h.register("builtin:recorder", 5).await;
    let key = JobKey::new(plugin.id, 1);

    let job = h
        .orchestrator
        .add_job(1, plugin.id, Some(json!({ "version": "1.0" })), None)
        .await
        .unwrap();

    assert!(!job.active);
    let task = h.orchestrator.task(key).expect("task for the key");
    assert!(task.paused);
    assert_eq!(task.interval, 5);
    assert!(h.orchestrator.active_config(key).is_none());
    assert!(h.orchestrator.tick(key).await.is_none());
    h.assert_consistent(key).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn activation_resumes_task_and_next_tick_uses_job_config() {
    let h = Harness::new().await;
    let plugin = h.register("builtin:recorder", 5).await;
    let key = JobKey::new(plugin.id, 1);
    let j1 = h
        .orchestrator
        .add_job(1, plugin.id, Some(json!({ "threshold": 4 })), None)
        .await
        .unwrap();

    h.orchestrator.activate_job(j1.id).await.unwrap();

    assert!(!h.orchestrator.task(key).unwrap().paused);
    let cached = h.orchestrator.active_config(key).unwrap();
    assert_eq!(cached.job_id, j1.id);
    assert_eq!(*cached.config, json!({ "version": "1.0", "threshold": 4 }));

    let outcome = h.orchestrator.tick(key).await;
    assert_eq!(outcome, Some(ExecutionOutcome::Completed(true)));
    assert_eq!(h.runs(), vec![("v1".to_string(), j1.config_value().unwrap())]);
    h.assert_consistent(key).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn reactivation_swaps_config_without_new_task() {
    let h = Harness::new().await;
    let plugin = h.register("builtin:recorder", 5).await;
    let key = JobKey::new(plugin.id, 1);
    let j1 = h.orchestrator.add_job(1, plugin.id, None, None).await.unwrap();
    h.orchestrator.activate_job(j1.id).await.unwrap();
    let task_before = h.orchestrator.task(key).unwrap();

    let j2 = h
        .orchestrator
        .add_job(1, plugin.id, Some(json!({ "version": "2.0" })), None)
        .await
        .unwrap();
    h.orchestrator.activate_job(j2.id).await.unwrap();

    let jobs = h.orchestrator.get_jobs_for(plugin.id, 1).await.unwrap();
    let state: Vec<(i64, bool)> = jobs.iter().map(|j| (j.id, j.active)).collect();
    assert_eq!(state, vec![(j1.id, false), (j2.id, true)]);

    let task_after = h.orchestrator.task(key).unwrap();
    assert_eq!(task_after.task_id, task_before.task_id);
    assert!(!task_after.paused);
    assert_eq!(
        *h.orchestrator.active_config(key).unwrap().config,
        json!({ "version": "2.0" })
    );
    h.assert_consistent(key).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn removing_inactive_job_leaves_task_alone() {
    let h = Harness::new().await;
    let plugin = h.register("builtin:recorder", 5).await;
    let key = JobKey::new(plugin.id, 1);
    let j1 = h.orchestrator.add_job(1, plugin.id, None, None).await.unwrap();
    let j2 = h
        .orchestrator
        .add_job(1, plugin.id, Some(json!({ "version": "2.0" })), None)
        .await
        .unwrap();
    h.orchestrator.activate_job(j1.id).await.unwrap();
    h.orchestrator.activate_job(j2.id).await.unwrap();

    h.orchestrator.remove_job(j1.id).await.unwrap();

    assert!(!h.orchestrator.task(key).unwrap().paused);
    assert_eq!(h.orchestrator.active_config(key).unwrap().job_id, j2.id);
    h.orchestrator.tick(key).await;
    assert_eq!(h.runs()[0].1, json!({ "version": "2.0" }));
    h.assert_consistent(key).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn removing_last_job_drops_task_and_cache() {
    let h = Harness::new().await;
    let plugin = h.register("builtin:recorder", 5).await;
    let key = JobKey::new(plugin.id, 1);
    let j1 = h.orchestrator.add_job(1, plugin.id, None, None).await.unwrap();
    let j2 = h.orchestrator.add_job(1, plugin.id, None, None).await.unwrap();
    h.orchestrator.activate_job(j2.id).await.unwrap();
    h.orchestrator.remove_job(j1.id).await.unwrap();

    let removed = h.orchestrator.remove_job(j2.id).await.unwrap();
    assert_eq!(removed.id, j2.id);

    assert!(h.orchestrator.task(key).is_none());
    assert!(h.orchestrator.active_config(key).is_none());
    assert!(h.orchestrator.tick(key).await.is_none());
    assert!(h.orchestrator.tasks().is_empty());

    let events = h.flush_logs().await;
    let last = events.iter().rev().find(|e| e.job_key == key).unwrap();
    assert!(last.message.contains("task unscheduled"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn failing_run_is_reported_and_does_not_stop_ticks() {
    let h = Harness::new().await;
    let plugin = h.register("builtin:exploding", 5).await;
    let key = JobKey::new(plugin.id, 7);
    let job = h.orchestrator.add_job(7, plugin.id, None, None).await.unwrap();
    h.orchestrator.activate_job(job.id).await.unwrap();

    for _ in 0..2 {
        match h.orchestrator.tick(key).await {
            Some(ExecutionOutcome::Failed(message)) => assert!(message.contains("blew up")),
            other => panic!("expected a failure outcome, got {:?}", other),
        }
    }

    let task = h.orchestrator.task(key).unwrap();
    assert!(!task.paused);
    assert!(matches!(task.last_outcome, Some(ExecutionOutcome::Failed(_))));

    let errors: Vec<_> = h
        .flush_logs()
        .await
        .into_iter()
        .filter(|e| e.level == LogLevel::Error)
        .collect();
    assert_eq!(errors.len(), 2);
    assert!(errors.iter().all(|e| e.job_key == key));
}
