use rusqlite::{OptionalExtension, params};

use super::{JOB_COLUMNS, JobRecord, JobStore, job_from_row};
use crate::core::error::EngineResult;
use crate::core::types::JobKey;

impl JobStore {
    /// New jobs always start inactive.
    pub async fn insert_job(
        &self,
        subscriber_id: i64,
        plugin_id: i64,
        config: &str,
        description: Option<&str>,
    ) -> EngineResult<JobRecord> {
        let db = self.db.lock().await;
        db.execute(
            "INSERT INTO jobs (subscriber_id, plugin_id, config, active, description)
             VALUES (?1, ?2, ?3, 0, ?4)",
            params![subscriber_id, plugin_id, config, description],
        )?;
        Ok(JobRecord {
            id: db.last_insert_rowid(),
            subscriber_id,
            plugin_id,
            config: config.to_string(),
            active: false,
            description: description.map(str::to_string),
        })
    }

    pub async fn get_job(&self, id: i64) -> EngineResult<Option<JobRecord>> {
        let db = self.db.lock().await;
        let job = db
            .query_row(
                &format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = ?1"),
                params![id],
                job_from_row,
            )
            .optional()?;
        Ok(job)
    }

    /// Replaces the config; the description is only touched when one is given.
    pub async fn update_job(
        &self,
        id: i64,
        config: &str,
        description: Option<&str>,
    ) -> EngineResult<Option<JobRecord>> {
        let mut db = self.db.lock().await;
        let tx = db.transaction()?;
        let updated = match description {
            Some(description) => tx.execute(
                "UPDATE jobs SET config = ?1, description = ?2 WHERE id = ?3",
                params![config, description, id],
            )?,
            None => tx.execute(
                "UPDATE jobs SET config = ?1 WHERE id = ?2",
                params![config, id],
            )?,
        };
        if updated == 0 {
            return Ok(None);
        }
        let job = tx.query_row(
            &format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = ?1"),
            params![id],
            job_from_row,
        )?;
        tx.commit()?;
        Ok(Some(job))
    }

    /// Deletes the row and returns it as it was before deletion.
    pub async fn delete_job(&self, id: i64) -> EngineResult<Option<JobRecord>> {
        let mut db = self.db.lock().await;
        let tx = db.transaction()?;
        let job = tx
            .query_row(
                &format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = ?1"),
                params![id],
                job_from_row,
            )
            .optional()?;
        if job.is_some() {
            tx.execute("DELETE FROM jobs WHERE id = ?1", params![id])?;
        }
        tx.commit()?;
        Ok(job)
    }

    pub async fn jobs_for(&self, key: JobKey) -> EngineResult<Vec<JobRecord>> {
        let db = self.db.lock().await;
        let mut stmt = db.prepare(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs WHERE plugin_id = ?1 AND subscriber_id = ?2 ORDER BY id"
        ))?;
        let rows = stmt.query_map(params![key.plugin_id, key.subscriber_id], job_from_row)?;

        let mut results = Vec::new();
        for row in rows {
            results.push(row?);
        }
        Ok(results)
    }

    pub async fn count_jobs_for(&self, key: JobKey) -> EngineResult<u64> {
        let db = self.db.lock().await;
        let count: i64 = db.query_row(
            "SELECT COUNT(*) FROM jobs WHERE plugin_id = ?1 AND subscriber_id = ?2",
            params![key.plugin_id, key.subscriber_id],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    pub async fn active_jobs(&self) -> EngineResult<Vec<JobRecord>> {
        self.select_jobs("WHERE active = 1 ORDER BY id").await
    }

    pub async fn all_jobs(&self) -> EngineResult<Vec<JobRecord>> {
        self.select_jobs("ORDER BY id").await
    }

    async fn select_jobs(&self, clause: &str) -> EngineResult<Vec<JobRecord>> {
        let db = self.db.lock().await;
        let mut stmt = db.prepare(&format!("SELECT {JOB_COLUMNS} FROM jobs {clause}"))?;
        let rows = stmt.query_map([], job_from_row)?;

        let mut results = Vec::new();
        for row in rows {
            results.push(row?);
        }
        Ok(results)
    }

    /// Makes `id` the only active job for its key, in one transaction.
    pub async fn activate_job(&self, id: i64) -> EngineResult<Option<JobRecord>> {
        let mut db = self.db.lock().await;
        let tx = db.transaction()?;
        let Some(mut job) = tx
            .query_row(
                &format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = ?1"),
                params![id],
                job_from_row,
            )
            .optional()?
        else {
            return Ok(None);
        };

        tx.execute(
            "UPDATE jobs SET active = 0
             WHERE active = 1 AND plugin_id = ?1 AND subscriber_id = ?2 AND id != ?3",
            params![job.plugin_id, job.subscriber_id, id],
        )?;
        tx.execute("UPDATE jobs SET active = 1 WHERE id = ?1", params![id])?;
        tx.commit()?;

        job.active = true;
        Ok(Some(job))
    }

    /// Returns the row as it was before the update, so callers can tell
    /// whether it had been the active one.
    pub async fn deactivate_job(&self, id: i64) -> EngineResult<Option<JobRecord>> {
        let mut db = self.db.lock().await;
        let tx = db.transaction()?;
        let job = tx
            .query_row(
                &format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = ?1"),
                params![id],
                job_from_row,
            )
            .optional()?;
        if job.is_some() {
            tx.execute("UPDATE jobs SET active = 0 WHERE id = ?1", params![id])?;
        }
        tx.commit()?;
        Ok(job)
    }

    /// Sets the flag without touching siblings, to reproduce rows written
    /// by an older build or an interrupted process.
    #[cfg(test)]
    pub(crate) async fn force_active(&self, id: i64) -> EngineResult<()> {
        let db = self.db.lock().await;
        db.execute("UPDATE jobs SET active = 1 WHERE id = ?1", params![id])?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::EngineError;

    async fn store_with_plugin() -> (JobStore, i64) {
        let store = JobStore::in_memory().unwrap();
        let plugin = store
            .insert_plugin("builtin:sample@v1", 5, None)
            .await
            .unwrap();
        (store, plugin.id)
    }

    #[tokio::test]
    async fn new_jobs_start_inactive() {
        let (store, plugin_id) = store_with_plugin().await;
        let job = store
            .insert_job(1, plugin_id, r#"{"version":"1.0"}"#, Some("first"))
            .await
            .unwrap();
        assert!(!job.active);
        assert_eq!(store.count_jobs_for(job.key()).await.unwrap(), 1);
        assert!(store.active_jobs().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn rejects_invalid_json_config() {
        let (store, plugin_id) = store_with_plugin().await;
        let result = store.insert_job(1, plugin_id, "{not json", None).await;
        assert!(matches!(result, Err(EngineError::Storage(_))));
    }

    #[tokio::test]
    async fn activation_keeps_one_active_job_per_key() {
        let (store, plugin_id) = store_with_plugin().await;
        let first = store.insert_job(1, plugin_id, "{}", None).await.unwrap();
        let second = store.insert_job(1, plugin_id, "{}", None).await.unwrap();
        let other_subscriber = store.insert_job(2, plugin_id, "{}", None).await.unwrap();

        store.activate_job(first.id).await.unwrap().unwrap();
        store.activate_job(other_subscriber.id).await.unwrap().unwrap();
        let activated = store.activate_job(second.id).await.unwrap().unwrap();
        assert!(activated.active);

        let active: Vec<i64> = store
            .active_jobs()
            .await
            .unwrap()
            .iter()
            .map(|j| j.id)
            .collect();
        assert_eq!(active, vec![second.id, other_subscriber.id]);
    }

    #[tokio::test]
    async fn deactivate_reports_previous_state() {
        let (store, plugin_id) = store_with_plugin().await;
        let job = store.insert_job(1, plugin_id, "{}", None).await.unwrap();
        store.activate_job(job.id).await.unwrap();

        let before = store.deactivate_job(job.id).await.unwrap().unwrap();
        assert!(before.active);
        assert!(!store.get_job(job.id).await.unwrap().unwrap().active);
        assert!(store.deactivate_job(404).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn update_keeps_description_unless_given() {
        let (store, plugin_id) = store_with_plugin().await;
        let job = store
            .insert_job(1, plugin_id, "{}", Some("keep me"))
            .await
            .unwrap();

        let updated = store
            .update_job(job.id, r#"{"version":"1.1"}"#, None)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.description.as_deref(), Some("keep me"));
        assert_eq!(updated.config, r#"{"version":"1.1"}"#);

        assert!(store.update_job(404, "{}", None).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn delete_returns_removed_row() {
        let (store, plugin_id) = store_with_plugin().await;
        let job = store.insert_job(1, plugin_id, "{}", None).await.unwrap();

        let removed = store.delete_job(job.id).await.unwrap().unwrap();
        assert_eq!(removed.id, job.id);
        assert_eq!(store.count_jobs_for(job.key()).await.unwrap(), 0);
        assert!(store.delete_job(job.id).await.unwrap().is_none());
    }
}
