//! Ordered, non-blocking delivery of [`LogEvent`]s to a single sink.
//!
//! Producers push into an unbounded ingress queue guarded by a soft
//! capacity counter, so `emit` never waits. One dispatcher task owns the
//! queue and routes each event to a per-key lane; a lane is a single
//! consumer, which keeps delivery FIFO per job key. Lanes for different
//! keys deliver concurrently, bounded by a semaphore of `max_in_flight`
//! permits. Sink failures are logged here and dropped.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::oneshot::error::TryRecvError;
use tokio::sync::{Semaphore, mpsc, oneshot};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, warn};

use super::LogEvent;
use crate::core::types::JobKey;

/// The delivery end of the pipeline. Only the pipeline calls `deliver`.
#[async_trait]
pub trait LogSink: Send + Sync {
    async fn deliver(&self, event: &LogEvent) -> anyhow::Result<()>;
}

enum PipelineMsg {
    Event(LogEvent),
    CloseKey(JobKey),
    Shutdown,
}

#[derive(Clone)]
pub struct LogPipeline {
    tx: mpsc::UnboundedSender<PipelineMsg>,
    pending: Arc<AtomicUsize>,
    dropped: Arc<AtomicU64>,
    capacity: usize,
    dispatcher: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl LogPipeline {
    /// Starts the dispatcher on the current tokio runtime.
    pub fn spawn(sink: Arc<dyn LogSink>, capacity: usize, max_in_flight: usize) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let pending = Arc::new(AtomicUsize::new(0));
        let permits = Arc::new(Semaphore::new(max_in_flight.max(1)));
        let handle = tokio::spawn(dispatch(rx, sink, permits, pending.clone()));

        Self {
            tx,
            pending,
            dropped: Arc::new(AtomicU64::new(0)),
            capacity: capacity.max(1),
            dispatcher: Arc::new(Mutex::new(Some(handle))),
        }
    }

    /// Queues an event. Returns false if it was dropped because the queue
    /// is full or the pipeline has shut down.
    pub fn emit(&self, event: LogEvent) -> bool {
        if self.pending.fetch_add(1, Ordering::AcqRel) >= self.capacity {
            self.pending.fetch_sub(1, Ordering::AcqRel);
            let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
            if dropped.is_power_of_two() {
                warn!("Log pipeline full, {} event(s) dropped so far", dropped);
            }
            return false;
        }
        if self.tx.send(PipelineMsg::Event(event)).is_err() {
            self.pending.fetch_sub(1, Ordering::AcqRel);
            return false;
        }
        true
    }

    /// Drops the routing lane for `key` once its queued events are delivered.
    pub fn close_key(&self, key: JobKey) {
        let _ = self.tx.send(PipelineMsg::CloseKey(key));
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    /// Stops accepting work and waits up to `grace` for queued events to be
    /// delivered. Returns false if the grace period ran out.
    pub async fn shutdown(&self, grace: Duration) -> bool {
        let _ = self.tx.send(PipelineMsg::Shutdown);
        let Some(handle) = self.dispatcher.lock().take() else {
            return true;
        };
        let abort = handle.abort_handle();
        match tokio::time::timeout(grace, handle).await {
            Ok(_) => {
                info!("Log pipeline drained");
                true
            }
            Err(_) => {
                warn!(
                    "Log pipeline did not drain within {:?}, {} event(s) abandoned",
                    grace,
                    self.pending()
                );
                abort.abort();
                false
            }
        }
    }
}

struct Lane {
    tx: mpsc::UnboundedSender<LogEvent>,
    done: oneshot::Receiver<()>,
}

async fn dispatch(
    mut rx: mpsc::UnboundedReceiver<PipelineMsg>,
    sink: Arc<dyn LogSink>,
    permits: Arc<Semaphore>,
    pending: Arc<AtomicUsize>,
) {
    let mut lanes: HashMap<JobKey, Lane> = HashMap::new();
    // Closed lanes that may still be draining; a reopened lane waits on them.
    let mut closing: HashMap<JobKey, oneshot::Receiver<()>> = HashMap::new();
    let mut workers = JoinSet::new();

    loop {
        tokio::select! {
            msg = rx.recv() => match msg {
                Some(PipelineMsg::Event(event)) => {
                    let key = event.job_key;
                    let lane = lanes.entry(key).or_insert_with(|| {
                        let (lane_tx, lane_rx) = mpsc::unbounded_channel();
                        let (done_tx, done_rx) = oneshot::channel();
                        workers.spawn(run_lane(
                            key,
                            lane_rx,
                            closing.remove(&key),
                            done_tx,
                            sink.clone(),
                            permits.clone(),
                            pending.clone(),
                        ));
                        Lane {
                            tx: lane_tx,
                            done: done_rx,
                        }
                    });
                    if lane.tx.send(event).is_err() {
                        // The lane worker died; the next event for this key gets a fresh one.
                        pending.fetch_sub(1, Ordering::AcqRel);
                        lanes.remove(&key);
                    }
                }
                Some(PipelineMsg::CloseKey(key)) => {
                    if let Some(lane) = lanes.remove(&key) {
                        closing.insert(key, lane.done);
                    }
                }
                Some(PipelineMsg::Shutdown) | None => break,
            },
            Some(_) = workers.join_next(), if !workers.is_empty() => {
                closing.retain(|_, done| matches!(done.try_recv(), Err(TryRecvError::Empty)));
            }
        }
    }

    // Closing every lane lets each worker finish what it already holds.
    lanes.clear();
    while workers.join_next().await.is_some() {}
}

async fn run_lane(
    key: JobKey,
    mut rx: mpsc::UnboundedReceiver<LogEvent>,
    predecessor: Option<oneshot::Receiver<()>>,
    done: oneshot::Sender<()>,
    sink: Arc<dyn LogSink>,
    permits: Arc<Semaphore>,
    pending: Arc<AtomicUsize>,
) {
    if let Some(predecessor) = predecessor {
        let _ = predecessor.await;
    }
    while let Some(event) = rx.recv().await {
        let _permit = permits.acquire().await.ok();
        if let Err(e) = sink.deliver(&event).await {
            debug!("Log delivery for {} failed: {}", key, e);
        }
        pending.fetch_sub(1, Ordering::AcqRel);
    }
    let _ = done.send(());
}
