use serde::{Deserialize, Serialize};
use std::fmt;

/// Identity of a scheduled task: one per (plugin, subscriber) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct JobKey {
    pub plugin_id: i64,
    pub subscriber_id: i64,
}

impl JobKey {
    pub fn new(plugin_id: i64, subscriber_id: i64) -> Self {
        Self {
            plugin_id,
            subscriber_id,
        }
    }
}

impl fmt::Display for JobKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.plugin_id, self.subscriber_id)
    }
}
