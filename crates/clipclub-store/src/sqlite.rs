//! SQLite job store.

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tracing::{debug, info, warn};

use clipclub_models::{
    CompilationJob, JobId, JobStatus, ManifestEntry, NewCompilationJob, SelectionMethod,
};

use crate::error::{StoreError, StoreResult};
use crate::metrics::record_query;
use crate::repository::JobRepository;

/// Table layout. `session` holds the submitting session reference.
///
/// Submitters only write the job columns; timestamps fill themselves in.
const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS compilations (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    channel     TEXT    NOT NULL,
    count       INTEGER NOT NULL,
    method      TEXT    NOT NULL,
    "range"     INTEGER NOT NULL,
    status      TEXT    NOT NULL DEFAULT 'pending',
    manifest    TEXT,
    session     TEXT,
    created_at  TEXT    NOT NULL DEFAULT CURRENT_TIMESTAMP,
    updated_at  TEXT    NOT NULL DEFAULT CURRENT_TIMESTAMP
);
CREATE INDEX IF NOT EXISTS idx_compilations_status ON compilations(status, id);
"#;

const SELECT_COLUMNS: &str =
    r#"SELECT id, channel, count, method, "range", status, manifest, session FROM compilations"#;

/// Columns every release of the schema must have.
const REQUIRED_COLUMNS: &[&str] = &[
    "id", "channel", "count", "method", "range", "status", "manifest", "session",
    "created_at", "updated_at",
];

/// Bookkeeping columns missing from tables created by older releases.
///
/// `ALTER TABLE` cannot add a `CURRENT_TIMESTAMP` default, so these are
/// nullable when added after the fact.
const TIMESTAMP_COLUMNS: &[&str] = &["created_at", "updated_at"];

/// Job store backed by a single SQLite connection.
///
/// Queries run on the blocking pool; the connection is shared behind a
/// mutex since only one worker uses it.
#[derive(Clone)]
pub struct SqliteJobStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteJobStore {
    /// Open (or create) the database at `path` and apply the schema.
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get::<_, String>(0))?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        info!(path = %path.display(), "Opened job database");
        Self::from_connection(conn)
    }

    /// In-memory database, for tests and dry runs.
    pub fn open_in_memory() -> StoreResult<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> StoreResult<Self> {
        conn.execute_batch(SCHEMA)?;
        add_missing_timestamps(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Verify the `compilations` table has every expected column.
    pub async fn check_schema(&self) -> StoreResult<()> {
        self.with_conn("check_schema", |conn| {
            let columns = table_columns(conn)?;

            match REQUIRED_COLUMNS
                .iter()
                .find(|required| !columns.iter().any(|c| c == *required))
            {
                Some(missing) => Err(StoreError::Unavailable(format!(
                    "compilations table is missing column {}",
                    missing
                ))),
                None => Ok(()),
            }
        })
        .await
    }

    /// Run `f` against the connection on the blocking pool.
    async fn with_conn<T, F>(&self, operation: &'static str, f: F) -> StoreResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> StoreResult<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        let started = Instant::now();

        let result = tokio::task::spawn_blocking(move || {
            let guard = conn
                .lock()
                .map_err(|_| StoreError::Unavailable("connection mutex poisoned".to_string()))?;
            f(&guard)
        })
        .await
        .unwrap_or_else(|e| Err(StoreError::Unavailable(format!("store task failed: {}", e))));

        record_query(operation, result.is_ok(), started.elapsed().as_secs_f64());
        result
    }
}

fn table_columns(conn: &Connection) -> StoreResult<Vec<String>> {
    let mut stmt = conn.prepare("SELECT name FROM pragma_table_info('compilations')")?;
    let columns = stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(columns)
}

fn add_missing_timestamps(conn: &Connection) -> StoreResult<()> {
    let columns = table_columns(conn)?;
    for column in TIMESTAMP_COLUMNS {
        if !columns.iter().any(|c| c == column) {
            conn.execute_batch(&format!("ALTER TABLE compilations ADD COLUMN {} TEXT", column))?;
            info!(column = %column, "Added missing column to compilations table");
        }
    }
    Ok(())
}

fn now() -> String {
    chrono::Utc::now().to_rfc3339()
}

/// Raw column values, decoded outside the rusqlite row callback.
struct JobRow {
    id: i64,
    channel: String,
    count: u32,
    method: String,
    range: u32,
    status: String,
    manifest: Option<String>,
    session: Option<String>,
}

impl JobRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            channel: row.get(1)?,
            count: row.get(2)?,
            method: row.get(3)?,
            range: row.get(4)?,
            status: row.get(5)?,
            manifest: row.get(6)?,
            session: row.get(7)?,
        })
    }

    fn into_job(self) -> StoreResult<CompilationJob> {
        let id = self.id;
        let method = SelectionMethod::from_str(&self.method).map_err(|e| StoreError::corrupt(id, e))?;
        let status =
            JobStatus::from_str(&self.status).map_err(|e| StoreError::corrupt(id, e.to_string()))?;
        let manifest = self
            .manifest
            .as_deref()
            .map(|m| serde_json::from_str::<Vec<ManifestEntry>>(m))
            .transpose()
            .map_err(|e| StoreError::corrupt(id, format!("manifest: {}", e)))?;

        Ok(CompilationJob {
            id: JobId(id),
            channel: self.channel,
            count: self.count,
            method,
            range: self.range,
            status,
            manifest,
            owner_ref: self.session,
        })
    }
}

fn select_one(conn: &Connection, clause: &str, param: Option<i64>) -> StoreResult<Option<CompilationJob>> {
    let sql = format!("{} {}", SELECT_COLUMNS, clause);
    let row = match param {
        Some(p) => conn.query_row(&sql, params![p], JobRow::read).optional()?,
        None => conn.query_row(&sql, [], JobRow::read).optional()?,
    };
    row.map(JobRow::into_job).transpose()
}

#[async_trait]
impl JobRepository for SqliteJobStore {
    async fn create(&self, request: &NewCompilationJob) -> StoreResult<CompilationJob> {
        request.validate()?;
        let request = request.clone();

        self.with_conn("create", move |conn| {
            let ts = now();
            conn.execute(
                r#"INSERT INTO compilations (channel, count, method, "range", status, session, created_at, updated_at)
                   VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)"#,
                params![
                    request.channel,
                    request.count,
                    request.method.as_str(),
                    request.range,
                    JobStatus::Pending.as_str(),
                    request.owner_ref,
                    ts,
                ],
            )?;
            let id = conn.last_insert_rowid();
            debug!(job_id = id, channel = %request.channel, "Created compilation job");

            Ok(CompilationJob {
                id: JobId(id),
                channel: request.channel,
                count: request.count,
                method: request.method,
                range: request.range,
                status: JobStatus::Pending,
                manifest: None,
                owner_ref: request.owner_ref,
            })
        })
        .await
    }

    async fn get(&self, id: JobId) -> StoreResult<Option<CompilationJob>> {
        self.with_conn("get", move |conn| select_one(conn, "WHERE id = ?1", Some(id.as_i64())))
            .await
    }

    async fn next_pending(&self) -> StoreResult<Option<CompilationJob>> {
        self.with_conn("next_pending", |conn| {
            let sql = format!("{} WHERE status = ?1 ORDER BY id ASC", SELECT_COLUMNS);
            let mut stmt = conn.prepare(&sql)?;
            let mut rows = stmt.query(params![JobStatus::Pending.as_str()])?;

            // Rows written by other submitters may not decode; they must not
            // hold up the jobs behind them
            while let Some(row) = rows.next()? {
                let id: i64 = row.get(0)?;
                let job = JobRow::read(row)
                    .map_err(|e| StoreError::corrupt(id, e.to_string()))
                    .and_then(JobRow::into_job);
                match job {
                    Ok(job) => return Ok(Some(job)),
                    Err(e) => warn!(job_id = id, error = %e, "Skipping unreadable pending job"),
                }
            }
            Ok(None)
        })
        .await
    }

    async fn set_status(&self, id: JobId, status: JobStatus) -> StoreResult<()> {
        self.with_conn("set_status", move |conn| {
            let updated = conn.execute(
                "UPDATE compilations SET status = ?1, updated_at = ?2 WHERE id = ?3",
                params![status.as_str(), now(), id.as_i64()],
            )?;
            if updated == 0 {
                return Err(StoreError::NotFound(id));
            }
            Ok(())
        })
        .await
    }

    async fn set_manifest(&self, id: JobId, manifest: &[ManifestEntry]) -> StoreResult<()> {
        let json = serde_json::to_string(manifest)?;

        self.with_conn("set_manifest", move |conn| {
            let updated = conn.execute(
                "UPDATE compilations SET manifest = ?1, updated_at = ?2 WHERE id = ?3 AND manifest IS NULL",
                params![json, now(), id.as_i64()],
            )?;
            if updated == 1 {
                return Ok(());
            }

            let exists: bool = conn.query_row(
                "SELECT EXISTS(SELECT 1 FROM compilations WHERE id = ?1)",
                params![id.as_i64()],
                |row| row.get(0),
            )?;
            Err(if exists {
                StoreError::ManifestAlreadyWritten(id)
            } else {
                StoreError::NotFound(id)
            })
        })
        .await
    }

    async fn reset_interrupted(&self) -> StoreResult<usize> {
        self.with_conn("reset_interrupted", |conn| {
            let requeued = conn.execute(
                "UPDATE compilations SET status = ?1, updated_at = ?2 WHERE status IN (?3, ?4, ?5)",
                params![
                    JobStatus::Pending.as_str(),
                    now(),
                    JobStatus::Downloading.as_str(),
                    JobStatus::Rendering.as_str(),
                    JobStatus::Uploading.as_str(),
                ],
            )?;
            Ok(requeued)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clipclub_models::FailureCode;
    use std::path::PathBuf;

    fn request(channel: &str) -> NewCompilationJob {
        NewCompilationJob::new(channel, 3, SelectionMethod::Popular, 7)
    }

    fn manifest() -> Vec<ManifestEntry> {
        vec![ManifestEntry {
            file: PathBuf::from("/state/a.mp4"),
            text: "A\nClipped by b on May 1, 2023\n5 views".into(),
            width: 1920,
            height: 1080,
            duration: 12.5,
            fps: 59.94,
        }]
    }

    #[tokio::test]
    async fn test_create_and_get() {
        let store = SqliteJobStore::open_in_memory().unwrap();
        let created = store
            .create(&request("ironmouse").with_owner("session-1"))
            .await
            .unwrap();

        assert_eq!(created.status, JobStatus::Pending);
        let fetched = store.get(created.id).await.unwrap().unwrap();
        assert_eq!(fetched, created);
        assert_eq!(fetched.owner_ref.as_deref(), Some("session-1"));
        assert!(store.get(JobId(999)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_create_rejects_invalid_request() {
        let store = SqliteJobStore::open_in_memory().unwrap();
        let err = store.create(&request("ab")).await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn test_next_pending_is_oldest_first() {
        let store = SqliteJobStore::open_in_memory().unwrap();
        let first = store.create(&request("first_channel")).await.unwrap();
        let second = store.create(&request("second_channel")).await.unwrap();

        assert_eq!(store.next_pending().await.unwrap().unwrap().id, first.id);

        store.set_status(first.id, JobStatus::Downloading).await.unwrap();
        assert_eq!(store.next_pending().await.unwrap().unwrap().id, second.id);

        store
            .set_status(second.id, JobStatus::Failed(FailureCode::NotEnoughClips))
            .await
            .unwrap();
        assert!(store.next_pending().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_failure_code_persisted_verbatim() {
        let store = SqliteJobStore::open_in_memory().unwrap();
        let job = store.create(&request("ironmouse")).await.unwrap();
        store
            .set_status(job.id, JobStatus::Failed(FailureCode::RenderAudioFailed))
            .await
            .unwrap();

        let raw: String = store
            .with_conn("test", move |conn| {
                Ok(conn.query_row(
                    "SELECT status FROM compilations WHERE id = ?1",
                    params![job.id.as_i64()],
                    |row| row.get(0),
                )?)
            })
            .await
            .unwrap();
        assert_eq!(raw, "RENDERAUDIOFAILED");
    }

    #[tokio::test]
    async fn test_manifest_written_once() {
        let store = SqliteJobStore::open_in_memory().unwrap();
        let job = store.create(&request("ironmouse")).await.unwrap();

        store.set_manifest(job.id, &manifest()).await.unwrap();
        let fetched = store.get(job.id).await.unwrap().unwrap();
        assert_eq!(fetched.manifest, Some(manifest()));

        let err = store.set_manifest(job.id, &manifest()).await.unwrap_err();
        assert!(matches!(err, StoreError::ManifestAlreadyWritten(id) if id == job.id));

        let err = store.set_manifest(JobId(404), &manifest()).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(JobId(404))));
    }

    #[tokio::test]
    async fn test_set_status_unknown_job() {
        let store = SqliteJobStore::open_in_memory().unwrap();
        let err = store.set_status(JobId(1), JobStatus::Complete).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_reset_interrupted_requeues_in_flight_only() {
        let store = SqliteJobStore::open_in_memory().unwrap();
        let a = store.create(&request("channel_a")).await.unwrap();
        let b = store.create(&request("channel_b")).await.unwrap();
        let c = store.create(&request("channel_c")).await.unwrap();

        store.set_status(a.id, JobStatus::Rendering).await.unwrap();
        store.set_status(b.id, JobStatus::Complete).await.unwrap();
        store
            .set_status(c.id, JobStatus::Failed(FailureCode::DownloadFailed))
            .await
            .unwrap();

        assert_eq!(store.reset_interrupted().await.unwrap(), 1);
        assert_eq!(store.get(a.id).await.unwrap().unwrap().status, JobStatus::Pending);
        assert_eq!(store.get(b.id).await.unwrap().unwrap().status, JobStatus::Complete);
    }

    #[tokio::test]
    async fn test_corrupt_status_is_reported() {
        let store = SqliteJobStore::open_in_memory().unwrap();
        let id = store.create(&request("ironmouse")).await.unwrap().id;
        store
            .with_conn("test", move |conn| {
                conn.execute(
                    "UPDATE compilations SET status = 'exploded' WHERE id = ?1",
                    params![id.as_i64()],
                )?;
                Ok(())
            })
            .await
            .unwrap();

        let err = store.get(id).await.unwrap_err();
        assert!(matches!(err, StoreError::CorruptRow { .. }));
    }

    #[tokio::test]
    async fn test_unreadable_pending_row_is_skipped() {
        let store = SqliteJobStore::open_in_memory().unwrap();
        let bad_method = store.create(&request("first_channel")).await.unwrap().id;
        let bad_count = store.create(&request("second_channel")).await.unwrap().id;
        let good = store.create(&request("third_channel")).await.unwrap().id;
        store
            .with_conn("test", move |conn| {
                conn.execute(
                    "UPDATE compilations SET method = 'newest' WHERE id = ?1",
                    params![bad_method.as_i64()],
                )?;
                conn.execute(
                    "UPDATE compilations SET count = -3 WHERE id = ?1",
                    params![bad_count.as_i64()],
                )?;
                Ok(())
            })
            .await
            .unwrap();

        for _ in 0..2 {
            assert_eq!(store.next_pending().await.unwrap().unwrap().id, good);
        }

        store.set_status(good, JobStatus::Complete).await.unwrap();
        assert!(store.next_pending().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_submitter_insert_without_timestamps() {
        let store = SqliteJobStore::open_in_memory().unwrap();
        store
            .with_conn("test", |conn| {
                conn.execute(
                    r#"INSERT INTO compilations (channel, count, method, "range", status, session)
                       VALUES ('ironmouse', 5, 'random', 30, 'pending', 'sess-abc')"#,
                    [],
                )?;
                Ok(())
            })
            .await
            .unwrap();

        let job = store.next_pending().await.unwrap().unwrap();
        assert_eq!(job.method, SelectionMethod::Random);
        assert_eq!(job.owner_ref.as_deref(), Some("sess-abc"));

        store.set_status(job.id, JobStatus::Downloading).await.unwrap();
        store.set_manifest(job.id, &manifest()).await.unwrap();
        tokio_test::assert_ok!(store.check_schema().await);
    }

    #[tokio::test]
    async fn test_table_without_timestamps_is_upgraded() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("legacy.sqlite");
        {
            let conn = Connection::open(&path).unwrap();
            conn.execute_batch(
                r#"CREATE TABLE compilations (
                       id INTEGER PRIMARY KEY AUTOINCREMENT,
                       channel TEXT, count INTEGER, method TEXT, "range" INTEGER,
                       status TEXT, manifest TEXT, session TEXT
                   );
                   INSERT INTO compilations (channel, count, method, "range", status, session)
                   VALUES ('ironmouse', 3, 'popular', 7, 'pending', NULL);"#,
            )
            .unwrap();
        }

        let store = SqliteJobStore::open(&path).unwrap();
        tokio_test::assert_ok!(store.check_schema().await);

        let job = store.next_pending().await.unwrap().unwrap();
        store.set_status(job.id, JobStatus::Downloading).await.unwrap();
        store.set_manifest(job.id, &manifest()).await.unwrap();
        assert_eq!(store.get(job.id).await.unwrap().unwrap().status, JobStatus::Downloading);

        // Submitters keep working against the upgraded table
        let created = store.create(&request("another_one")).await.unwrap();
        assert_eq!(store.next_pending().await.unwrap().unwrap().id, created.id);
    }

    #[tokio::test]
    async fn test_open_file_database_persists() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("nested").join("clipclub.sqlite");

        let id = {
            let store = SqliteJobStore::open(&path).unwrap();
            store.create(&request("ironmouse")).await.unwrap().id
        };

        let reopened = SqliteJobStore::open(&path).unwrap();
        tokio_test::assert_ok!(reopened.check_schema().await);
        assert_eq!(reopened.next_pending().await.unwrap().unwrap().id, id);
    }
}
