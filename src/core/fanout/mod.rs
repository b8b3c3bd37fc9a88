//! Live delivery of job log events to connected subscribers.
//!
//! Subscribers are grouped by job key. A broadcast sends to every handle of
//! the key concurrently; a handle whose send fails or times out is pruned
//! and the rest keep receiving. Empty keys are removed.

use anyhow::anyhow;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::core::logs::{LogEvent, LogSink};
use crate::core::types::JobKey;

#[async_trait]
pub trait Subscriber: Send + Sync {
    async fn send(&self, payload: Arc<str>) -> anyhow::Result<()>;
}

/// Subscriber backed by a bounded channel; the receiving side forwards to
/// the actual connection. Sending fails once the receiver is gone.
pub struct ChannelSubscriber {
    tx: mpsc::Sender<Arc<str>>,
}

impl ChannelSubscriber {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<Arc<str>>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }
}

#[async_trait]
impl Subscriber for ChannelSubscriber {
    async fn send(&self, payload: Arc<str>) -> anyhow::Result<()> {
        self.tx
            .send(payload)
            .await
            .map_err(|_| anyhow!("subscriber disconnected"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle {
    key: JobKey,
    id: u64,
}

impl SubscriptionHandle {
    pub fn key(&self) -> JobKey {
        self.key
    }
}

type HandleSet = HashMap<u64, Arc<dyn Subscriber>>;

pub struct WsFanout {
    subscribers: RwLock<HashMap<JobKey, HandleSet>>,
    next_id: AtomicU64,
    send_timeout: Duration,
}

impl WsFanout {
    pub fn new(send_timeout: Duration) -> Self {
        Self {
            subscribers: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            send_timeout,
        }
    }

    pub fn connect(&self, key: JobKey, subscriber: Arc<dyn Subscriber>) -> SubscriptionHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.subscribers
            .write()
            .entry(key)
            .or_default()
            .insert(id, subscriber);
        debug!("Subscriber {} connected to {}", id, key);
        SubscriptionHandle { key, id }
    }

    /// Returns false if the handle was already gone (pruned or disconnected).
    pub fn disconnect(&self, handle: &SubscriptionHandle) -> bool {
        let mut subscribers = self.subscribers.write();
        remove_handles(&mut subscribers, handle.key, &[handle.id]) > 0
    }

    pub fn subscriber_count(&self, key: JobKey) -> usize {
        self.subscribers.read().get(&key).map_or(0, HashMap::len)
    }

    pub fn has_key(&self, key: JobKey) -> bool {
        self.subscribers.read().contains_key(&key)
    }

    /// Sends `payload` to every subscriber of `key` and returns how many
    /// sends succeeded.
    pub async fn broadcast(&self, key: JobKey, payload: Arc<str>) -> usize {
        let targets: Vec<(u64, Arc<dyn Subscriber>)> = match self.subscribers.read().get(&key) {
            Some(set) => set.iter().map(|(id, sub)| (*id, sub.clone())).collect(),
            None => return 0,
        };

        let mut sends = JoinSet::new();
        for (id, subscriber) in targets {
            let payload = payload.clone();
            let limit = self.send_timeout;
            sends.spawn(async move {
                let result = match tokio::time::timeout(limit, subscriber.send(payload)).await {
                    Ok(result) => result,
                    Err(_) => Err(anyhow!("send timed out after {:?}", limit)),
                };
                (id, result)
            });
        }

        let mut delivered = 0;
        let mut failed = Vec::new();
        while let Some(joined) = sends.join_next().await {
            match joined {
                Ok((_, Ok(()))) => delivered += 1,
                Ok((id, Err(e))) => {
                    debug!("Dropping subscriber {} of {}: {}", id, key, e);
                    failed.push(id);
                }
                Err(e) => warn!("Subscriber send task for {} aborted: {}", key, e),
            }
        }

        if !failed.is_empty() {
            let mut subscribers = self.subscribers.write();
            remove_handles(&mut subscribers, key, &failed);
        }
        delivered
    }
}

fn remove_handles(subscribers: &mut HashMap<JobKey, HandleSet>, key: JobKey, ids: &[u64]) -> usize {
    let Some(set) = subscribers.get_mut(&key) else {
        return 0;
    };
    let removed = ids.iter().filter(|id| set.remove(id).is_some()).count();
    if set.is_empty() {
        subscribers.remove(&key);
    }
    removed
}

#[async_trait]
impl LogSink for WsFanout {
    async fn deliver(&self, event: &LogEvent) -> anyhow::Result<()> {
        if !self.has_key(event.job_key) {
            return Ok(());
        }
        let payload: Arc<str> = serde_json::to_string(event)?.into();
        self.broadcast(event.job_key, payload).await;
        Ok(())
    }
}
