mod jobs;
mod plugins;
pub mod types;

use anyhow::Result;
use rusqlite::Connection;
use std::path::Path;
use std::sync::Arc;
use tokio::fs;
use tokio::sync::Mutex;
use tracing::info;

pub use types::{JobRecord, PluginRecord};

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS plugins (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        package TEXT NOT NULL UNIQUE,
        interval INTEGER NOT NULL CHECK (interval > 0),
        description TEXT
    )",
    // No uniqueness on (plugin_id, subscriber_id): inactive rows are kept as history.
    "CREATE TABLE IF NOT EXISTS jobs (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        subscriber_id INTEGER NOT NULL,
        plugin_id INTEGER NOT NULL REFERENCES plugins(id),
        config TEXT NOT NULL CHECK (json_valid(config)),
        active INTEGER NOT NULL DEFAULT 0 CHECK (active IN (0, 1)),
        description TEXT
    )",
    "CREATE INDEX IF NOT EXISTS idx_jobs_plugin_subscriber ON jobs(plugin_id, subscriber_id)",
    "CREATE INDEX IF NOT EXISTS idx_jobs_active ON jobs(active)",
];

/// Transactional store for Plugin and Job rows.
#[derive(Clone)]
pub struct JobStore {
    db: Arc<Mutex<Connection>>,
}

impl JobStore {
    pub async fn open<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let db_path = db_path.as_ref();
        if let Some(parent) = db_path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            fs::create_dir_all(parent).await?;
        }

        let db = Connection::open(db_path)?;
        Self::init_schema(&db)?;
        info!("Job store opened at {:?}", db_path);

        Ok(Self {
            db: Arc::new(Mutex::new(db)),
        })
    }

    pub fn in_memory() -> Result<Self> {
        let db = Connection::open_in_memory()?;
        Self::init_schema(&db)?;
        Ok(Self {
            db: Arc::new(Mutex::new(db)),
        })
    }

    fn init_schema(db: &Connection) -> rusqlite::Result<()> {
        db.pragma_update(None, "foreign_keys", "ON")?;
        for statement in SCHEMA {
            db.execute(statement, [])?;
        }
        Ok(())
    }
}

fn job_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<JobRecord> {
    Ok(JobRecord {
        id: row.get(0)?,
        subscriber_id: row.get(1)?,
        plugin_id: row.get(2)?,
        config: row.get(3)?,
        active: row.get::<_, i64>(4)? == 1,
        description: row.get(5)?,
    })
}

fn plugin_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<PluginRecord> {
    Ok(PluginRecord {
        id: row.get(0)?,
        package: row.get(1)?,
        interval: row.get::<_, i64>(2)? as u64,
        description: row.get(3)?,
    })
}

const JOB_COLUMNS: &str = "id, subscriber_id, plugin_id, config, active, description";
const PLUGIN_COLUMNS: &str = "id, package, interval, description";
