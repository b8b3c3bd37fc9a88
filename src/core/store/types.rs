use serde::Serialize;

use crate::core::types::JobKey;

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct PluginRecord {
    pub id: i64,
    pub package: String,
    /// Seconds between ticks, always > 0.
    pub interval: u64,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct JobRecord {
    pub id: i64,
    pub subscriber_id: i64,
    pub plugin_id: i64,
    /// Validated JSON text; opaque to storage.
    pub config: String,
    pub active: bool,
    pub description: Option<String>,
}

impl JobRecord {
    pub fn key(&self) -> JobKey {
        JobKey::new(self.plugin_id, self.subscriber_id)
    }

    pub fn config_value(&self) -> serde_json::Result<serde_json::Value> {
        serde_json::from_str(&self.config)
    }
}
