use rusqlite::{OptionalExtension, params};

use super::{JobStore, PLUGIN_COLUMNS, PluginRecord, plugin_from_row};
use crate::core::error::{EngineError, EngineResult};

impl JobStore {
    pub async fn insert_plugin(
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
        let db = self.db.lock().await;
        let exists: bool = db.query_row(
            "SELECT EXISTS(SELECT 1 FROM plugins WHERE package = ?1)",
            params![package],
            |row| row.get(0),
        )?;
        if exists {
            return Err(EngineError::InvalidPlugin(format!(
                "package '{}' is already registered",
                package
            )));
        }

        db.execute(
            "INSERT INTO plugins (package, interval, description) VALUES (?1, ?2, ?3)",
            params![package, interval as i64, description],
        )?;
        Ok(PluginRecord {
            id: db.last_insert_rowid(),
            package: package.to_string(),
            interval,
            description: description.map(str::to_string),
        })
    }

    pub async fn get_plugin(&self, id: i64) -> EngineResult<Option<PluginRecord>> {
        let db = self.db.lock().await;
        let record = db
            .query_row(
                &format!("SELECT {PLUGIN_COLUMNS} FROM plugins WHERE id = ?1"),
                params![id],
                plugin_from_row,
            )
            .optional()?;
        Ok(record)
    }

    pub async fn get_plugin_by_package(&self, package: &str) -> EngineResult<Option<PluginRecord>> {
        let db = self.db.lock().await;
        let record = db
            .query_row(
                &format!("SELECT {PLUGIN_COLUMNS} FROM plugins WHERE package = ?1"),
                params![package],
                plugin_from_row,
            )
            .optional()?;
        Ok(record)
    }

    pub async fn list_plugins(&self) -> EngineResult<Vec<PluginRecord>> {
        let db = self.db.lock().await;
        let mut stmt = db.prepare(&format!("SELECT {PLUGIN_COLUMNS} FROM plugins ORDER BY id"))?;
        let rows = stmt.query_map([], plugin_from_row)?;

        let mut results = Vec::new();
        for row in rows {
            results.push(row?);
        }
        Ok(results)
    }

    /// Description is the only mutable attribute of a plugin.
    pub async fn update_plugin_description(
        &self,
        id: i64,
        description: Option<&str>,
    ) -> EngineResult<bool> {
        let db = self.db.lock().await;
        let updated = db.execute(
            "UPDATE plugins SET description = ?1 WHERE id = ?2",
            params![description, id],
        )?;
        Ok(updated > 0)
    }
}
