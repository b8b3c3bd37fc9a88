use serde_json::json;
use std::sync::Arc;

use super::{Harness, Recorder};
use crate::core::config::OverlapPolicy;
use crate::core::executor::ExecutionOutcome;
use crate::core::orchestrator::BootstrapReport;
use crate::core::store::JobStore;
use crate::core::types::JobKey;

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn bootstrap_rebuilds_tasks_and_repairs_duplicate_actives() {
    let store = JobStore::in_memory().unwrap();
    let recorder = store.insert_plugin("builtin:recorder", 5, None).await.unwrap();
    let missing = store.insert_plugin("builtin:retired", 5, None).await.unwrap();

    let older = store
        .insert_job(1, recorder.id, &json!({ "version": "1.0" }).to_string(), None)
        .await
        .unwrap();
    let newer = store
        .insert_job(1, recorder.id, &json!({ "version": "1.1" }).to_string(), None)
        .await
        .unwrap();
    store.insert_job(2, recorder.id, "{}", None).await.unwrap();
    let orphan = store.insert_job(1, missing.id, "{}", None).await.unwrap();
    store.force_active(older.id).await.unwrap();
    store.force_active(newer.id).await.unwrap();
    store.force_active(orphan.id).await.unwrap();

    let h = Harness::build(store, OverlapPolicy::Skip).await;
    let report = h.orchestrator.bootstrap().await.unwrap();
    assert_eq!(
        report,
        BootstrapReport {
            plugins_loaded: 1,
            plugins_failed: 1,
            tasks: 3,
            resumed: 2,
        }
    );

    let key = JobKey::new(recorder.id, 1);
    let jobs = h.store.jobs_for(key).await.unwrap();
    assert!(!jobs.iter().find(|j| j.id == older.id).unwrap().active);
    assert!(jobs.iter().find(|j| j.id == newer.id).unwrap().active);
    assert_eq!(
        *h.orchestrator.active_config(key).unwrap().config,
        json!({ "version": "1.1" })
    );

    // The unloadable package keeps its active row; its ticks are no-ops.
    let idle = JobKey::new(recorder.id, 2);
    let unloaded = JobKey::new(missing.id, 1);
    assert!(h.orchestrator.task(idle).unwrap().paused);
    assert!(h.store.get_job(orphan.id).await.unwrap().unwrap().active);
    assert!(h.orchestrator.tick(unloaded).await.is_none());

    for key in [key, idle, unloaded] {
        h.assert_consistent(key).await;
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn unloadable_package_resumes_after_reload() {
    let store = JobStore::in_memory().unwrap();
    let plugin = store.insert_plugin("builtin:late", 5, None).await.unwrap();
    let job = store
        .insert_job(4, plugin.id, &json!({ "version": "2.0" }).to_string(), None)
        .await
        .unwrap();
    store.force_active(job.id).await.unwrap();

    let h = Harness::build(store, OverlapPolicy::Skip).await;
    let report = h.orchestrator.bootstrap().await.unwrap();
    assert_eq!(report.plugins_failed, 1);

    let key = JobKey::new(plugin.id, 4);
    assert!(h.orchestrator.tick(key).await.is_none());
    assert!(h.runs().is_empty());

    // The package shows up later, e.g. after a deploy.
    let runs = h.runs.clone();
    h.builtins.register("late", move || {
        Arc::new(Recorder {
            label: "late",
            runs: runs.clone(),
        })
    });
    h.orchestrator.reload_plugin(plugin.id).await.unwrap();

    assert_eq!(
        h.orchestrator.tick(key).await,
        Some(ExecutionOutcome::Completed(true))
    );
    assert_eq!(
        h.runs(),
        vec![("late".to_string(), json!({ "version": "2.0" }))]
    );
    assert!(h.store.get_job(job.id).await.unwrap().unwrap().active);
    h.assert_consistent(key).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn rejected_stored_config_is_deactivated() {
    let store = JobStore::in_memory().unwrap();
    let recorder = store.insert_plugin("builtin:recorder", 5, None).await.unwrap();
    let job = store
        .insert_job(1, recorder.id, &json!({ "threshold": -3 }).to_string(), None)
        .await
        .unwrap();
    store.force_active(job.id).await.unwrap();

    let h = Harness::build(store, OverlapPolicy::Skip).await;
    let report = h.orchestrator.bootstrap().await.unwrap();
    assert_eq!(report.resumed, 0);

    let key = JobKey::new(recorder.id, 1);
    assert!(!h.store.get_job(job.id).await.unwrap().unwrap().active);
    assert!(h.orchestrator.task(key).unwrap().paused);
    h.assert_consistent(key).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn bootstrap_on_empty_store_is_a_noop() {
    let h = Harness::new().await;
    let report = h.orchestrator.bootstrap().await.unwrap();
    assert_eq!(report, BootstrapReport::default());
    assert!(h.orchestrator.tasks().is_empty());
}
