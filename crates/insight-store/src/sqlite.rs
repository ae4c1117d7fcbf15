use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use insight_core::{AnalysisRecord, RecordSink, StoreError};
use rusqlite::{Connection, OptionalExtension as _, params};
use tracing::info;

/// SQLite-backed history store.
///
/// `rusqlite::Connection` is not `Sync`, so the connection lives behind a
/// mutex and every query runs on tokio's blocking pool.
#[derive(Clone)]
pub struct SqliteRecordStore {
    conn: Arc<Mutex<Connection>>,
    db_path: Option<PathBuf>,
}

impl SqliteRecordStore {
    /// Opens (or creates) the database file and initialises the schema.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path).map_err(sql_error)?;
        info!(path = %path.display(), "history database opened");
        Self::with_connection(conn, Some(path.to_path_buf()))
    }

    /// Opens a private in-memory database.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().map_err(sql_error)?;
        Self::with_connection(conn, None)
    }

    fn with_connection(conn: Connection, db_path: Option<PathBuf>) -> Result<Self, StoreError> {
        init_schema(&conn).map_err(sql_error)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            db_path,
        })
    }

    /// Path of the database file, if file-backed.
    pub fn path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> rusqlite::Result<T> + Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let guard = conn
                .lock()
                .map_err(|_| StoreError::Backend("history connection mutex poisoned".into()))?;
            f(&guard).map_err(sql_error)
        })
        .await
        .map_err(|e| StoreError::TaskJoin(e.to_string()))?
    }
}

fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS image_records (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            image_path      TEXT NOT NULL,
            result_text     TEXT NOT NULL,
            created_at      TEXT NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_image_records_created_at
         ON image_records(created_at)",
        [],
    )?;
    Ok(())
}

fn sql_error(err: rusqlite::Error) -> StoreError {
    StoreError::Backend(err.to_string())
}

fn map_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<AnalysisRecord> {
    Ok(AnalysisRecord {
        id: row.get("id")?,
        label: row.get("image_path")?,
        result_text: row.get("result_text")?,
        created_at: row.get::<_, DateTime<Utc>>("created_at")?,
    })
}

#[async_trait::async_trait]
impl RecordSink for SqliteRecordStore {
    async fn save_record(&self, label: &str, text: &str) -> Result<AnalysisRecord, StoreError> {
        let label = label.to_string();
        let text = text.to_string();
        self.with_conn(move |conn| {
            let created_at = Utc::now();
            conn.execute(
                "INSERT INTO image_records (image_path, result_text, created_at) VALUES (?1, ?2, ?3)",
                params![label, text, created_at],
            )?;
            Ok(AnalysisRecord {
                id: conn.last_insert_rowid(),
                label,
                result_text: text,
                created_at,
            })
        })
        .await
    }

    async fn list_records(&self) -> Result<Vec<AnalysisRecord>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, image_path, result_text, created_at FROM image_records
                 ORDER BY created_at ASC, id ASC",
            )?;
            let records = stmt
                .query_map([], map_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(records)
        })
        .await
    }

    async fn get_record(&self, id: i64) -> Result<Option<AnalysisRecord>, StoreError> {
        self.with_conn(move |conn| {
            conn.query_row(
                "SELECT id, image_path, result_text, created_at FROM image_records WHERE id = ?1",
                params![id],
                map_row,
            )
            .optional()
        })
        .await
    }

    async fn delete_record(&self, id: i64) -> Result<bool, StoreError> {
        self.with_conn(move |conn| {
            let deleted = conn.execute("DELETE FROM image_records WHERE id = ?1", params![id])?;
            Ok(deleted > 0)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn saved_records_survive_reopen_in_creation_order() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nested").join("history.db");
        {
            let store = SqliteRecordStore::open(&path).expect("open");
            store.save_record("图片_1.jpg", "第一条").await.expect("save");
            store.save_record("图片_2.jpg", "第二条").await.expect("save");
        }

        let store = SqliteRecordStore::open(&path).expect("reopen");
        assert_eq!(store.path(), Some(path.as_path()));
        let records = store.list_records().await.expect("list");
        let texts: Vec<_> = records.iter().map(|r| r.result_text.as_str()).collect();
        assert_eq!(texts, vec!["第一条", "第二条"]);
        assert!(records[0].id < records[1].id);
    }

    #[tokio::test]
    async fn get_and_delete_by_id() {
        let store = SqliteRecordStore::open_in_memory().expect("open");
        let saved = store.save_record("test-image-path", "测试AI分析结果").await.expect("save");

        let fetched = store.get_record(saved.id).await.expect("get").expect("present");
        assert_eq!(fetched.label, "test-image-path");
        assert_eq!(fetched.result_text, "测试AI分析结果");

        assert!(store.delete_record(saved.id).await.expect("delete"));
        assert!(!store.delete_record(saved.id).await.expect("delete missing"));
        assert!(store.get_record(saved.id).await.expect("get").is_none());
    }
}
