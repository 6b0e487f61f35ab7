//! SQLite persistence for review records.
//!
//! Records are keyed by (owner, repo, pr_number) with a UNIQUE constraint,
//! so the database enforces the one-record-per-PR invariant the rest of the
//! system assumes. Scalar fields get their own columns; the comment and
//! file lists are stored as JSON text since nothing queries inside them.
//!
//! # Schema Versioning
//!
//! The database uses SQLite's `user_version` pragma to track schema versions.
//! When the schema changes, increment `SCHEMA_VERSION` and add a migration
//! function in `run_migrations`.

use std::path::Path;
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension};

use reviewbot_core::{
    PrSnapshot, RecordId, RecordKey, RecordStore, ReviewComment, ReviewError, ReviewRecord,
    ReviewStatus, ReviewedFile,
};

/// Current schema version. Increment when making schema changes.
const SCHEMA_VERSION: i32 = 1;

/// SQLite database for persisting review records.
///
/// Uses a `Mutex<Connection>` because `rusqlite::Connection` is not `Sync`.
/// Callers should wrap operations in `tokio::task::spawn_blocking` for async
/// compatibility; `SqliteRecordStore` does exactly that.
pub struct SqliteDb {
    conn: Mutex<Connection>,
}

impl SqliteDb {
    /// Open or create the database file at the given path.
    pub fn new(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open SQLite database at {:?}", path))?;

        let db = Self {
            conn: Mutex::new(conn),
        };
        db.init_schema()?;

        Ok(db)
    }

    /// Create an in-memory database (for testing).
    pub fn new_in_memory() -> Result<Self> {
        let conn =
            Connection::open_in_memory().context("Failed to open in-memory SQLite database")?;

        let db = Self {
            conn: Mutex::new(conn),
        };
        db.init_schema()?;

        Ok(db)
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.conn.lock().expect("mutex poisoned");

        let current_version: i32 =
            conn.pragma_query_value(None, "user_version", |row| row.get(0))?;

        if current_version > SCHEMA_VERSION {
            anyhow::bail!(
                "Database schema version {} is newer than supported version {}. \
                 Please upgrade the application.",
                current_version,
                SCHEMA_VERSION
            );
        }

        if current_version < SCHEMA_VERSION {
            Self::run_migrations(&conn, current_version)?;
            conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;
        }

        Ok(())
    }

    fn run_migrations(conn: &Connection, from_version: i32) -> Result<()> {
        if from_version < 1 {
            Self::migrate_v0_to_v1(conn)?;
        }

        // Future migrations go here:
        // if from_version < 2 {
        //     Self::migrate_v1_to_v2(conn)?;
        // }

        Ok(())
    }

    fn migrate_v0_to_v1(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS review_records (
                id INTEGER PRIMARY KEY AUTOINCREMENT,

                owner TEXT NOT NULL,
                repo TEXT NOT NULL,
                pr_number INTEGER NOT NULL,

                -- PR snapshot the current review was computed against
                repo_full_name TEXT NOT NULL,
                title TEXT NOT NULL,
                body TEXT,
                author TEXT NOT NULL,
                base_branch TEXT NOT NULL,
                head_branch TEXT NOT NULL,
                head_sha TEXT NOT NULL,

                status TEXT NOT NULL CHECK(status IN (
                    'pending', 'in_progress', 'completed', 'failed', 'skipped'
                )),

                -- JSON arrays; nothing queries inside them
                comments TEXT NOT NULL DEFAULT '[]',
                files_reviewed TEXT NOT NULL DEFAULT '[]',

                summary_comment TEXT,
                external_review_id INTEGER,
                review_started_at TEXT,
                review_completed_at TEXT,
                error_message TEXT,
                retry_count INTEGER NOT NULL DEFAULT 0,

                UNIQUE (owner, repo, pr_number)
            );
            "#,
        )
        .context("Failed to create initial schema (v0 -> v1)")?;

        Ok(())
    }

    /// Insert a record, or update the existing row for its key in place.
    /// Returns the record with its database id filled in.
    pub fn create_record(&self, record: &ReviewRecord) -> Result<ReviewRecord> {
        let (comments, files) = encode_lists(record)?;
        let conn = self.conn.lock().expect("mutex poisoned");

        conn.execute(
            r#"
            INSERT INTO review_records (
                owner, repo, pr_number,
                repo_full_name, title, body, author, base_branch, head_branch, head_sha,
                status, comments, files_reviewed, summary_comment,
                external_review_id, review_started_at, review_completed_at,
                error_message, retry_count
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19)
            ON CONFLICT (owner, repo, pr_number)
            DO UPDATE SET
                repo_full_name = excluded.repo_full_name,
                title = excluded.title,
                body = excluded.body,
                author = excluded.author,
                base_branch = excluded.base_branch,
                head_branch = excluded.head_branch,
                head_sha = excluded.head_sha,
                status = excluded.status,
                comments = excluded.comments,
                files_reviewed = excluded.files_reviewed,
                summary_comment = excluded.summary_comment,
                external_review_id = excluded.external_review_id,
                review_started_at = excluded.review_started_at,
                review_completed_at = excluded.review_completed_at,
                error_message = excluded.error_message,
                retry_count = excluded.retry_count
            "#,
            rusqlite::params![
                &record.key.owner,
                &record.key.repo,
                record.key.pr_number,
                &record.snapshot.repo_full_name,
                &record.snapshot.title,
                &record.snapshot.body,
                &record.snapshot.author,
                &record.snapshot.base_branch,
                &record.snapshot.head_branch,
                &record.snapshot.head_sha,
                record.status.as_str(),
                &comments,
                &files,
                &record.summary_comment,
                record.external_review_id,
                record.review_started_at.map(|t| t.to_rfc3339()),
                record.review_completed_at.map(|t| t.to_rfc3339()),
                &record.error_message,
                record.retry_count,
            ],
        )
        .context("Failed to insert review record")?;

        drop(conn);

        self.get_by_key(&record.key)?
            .ok_or_else(|| anyhow!("Record for {} vanished after insert", record.key))
    }

    /// Update an existing record's row, matched by key.
    pub fn save_record(&self, record: &ReviewRecord) -> Result<()> {
        let (comments, files) = encode_lists(record)?;
        let conn = self.conn.lock().expect("mutex poisoned");

        let rows = conn
            .execute(
                r#"
                UPDATE review_records SET
                    repo_full_name = ?4,
                    title = ?5,
                    body = ?6,
                    author = ?7,
                    base_branch = ?8,
                    head_branch = ?9,
                    head_sha = ?10,
                    status = ?11,
                    comments = ?12,
                    files_reviewed = ?13,
                    summary_comment = ?14,
                    external_review_id = ?15,
                    review_started_at = ?16,
                    review_completed_at = ?17,
                    error_message = ?18,
                    retry_count = ?19
                WHERE owner = ?1 AND repo = ?2 AND pr_number = ?3
                "#,
                rusqlite::params![
                    &record.key.owner,
                    &record.key.repo,
                    record.key.pr_number,
                    &record.snapshot.repo_full_name,
                    &record.snapshot.title,
                    &record.snapshot.body,
                    &record.snapshot.author,
                    &record.snapshot.base_branch,
                    &record.snapshot.head_branch,
                    &record.snapshot.head_sha,
                    record.status.as_str(),
                    &comments,
                    &files,
                    &record.summary_comment,
                    record.external_review_id,
                    record.review_started_at.map(|t| t.to_rfc3339()),
                    record.review_completed_at.map(|t| t.to_rfc3339()),
                    &record.error_message,
                    record.retry_count,
                ],
            )
            .context("Failed to update review record")?;

        if rows == 0 {
            anyhow::bail!("No review record exists for {}", record.key);
        }

        Ok(())
    }

    pub fn get_by_key(&self, key: &RecordKey) -> Result<Option<ReviewRecord>> {
        let conn = self.conn.lock().expect("mutex poisoned");

        let mut stmt = conn
            .prepare(&format!(
                "{} WHERE owner = ?1 AND repo = ?2 AND pr_number = ?3",
                SELECT_RECORD
            ))
            .context("Failed to prepare get-by-key statement")?;

        let row = stmt
            .query_row(
                rusqlite::params![&key.owner, &key.repo, key.pr_number],
                read_row,
            )
            .optional()
            .context("Failed to get review record by key")?;

        row.map(row_to_record).transpose()
    }

    pub fn get_by_id(&self, id: RecordId) -> Result<Option<ReviewRecord>> {
        let conn = self.conn.lock().expect("mutex poisoned");

        let mut stmt = conn
            .prepare(&format!("{} WHERE id = ?1", SELECT_RECORD))
            .context("Failed to prepare get-by-id statement")?;

        let row = stmt
            .query_row(rusqlite::params![id.0], read_row)
            .optional()
            .context("Failed to get review record by id")?;

        row.map(row_to_record).transpose()
    }
}

const SELECT_RECORD: &str = r#"
    SELECT
        id, owner, repo, pr_number,
        repo_full_name, title, body, author, base_branch, head_branch, head_sha,
        status, comments, files_reviewed, summary_comment,
        external_review_id, review_started_at, review_completed_at,
        error_message, retry_count
    FROM review_records
"#;

/// Serialize the JSON list columns.
fn encode_lists(record: &ReviewRecord) -> Result<(String, String)> {
    let comments =
        serde_json::to_string(&record.comments).context("Failed to serialize comments")?;
    let files = serde_json::to_string(&record.files_reviewed)
        .context("Failed to serialize files_reviewed")?;
    Ok((comments, files))
}

/// Intermediate struct for reading rows from the database.
struct RecordRow {
    id: i64,
    owner: String,
    repo: String,
    pr_number: u64,
    repo_full_name: String,
    title: String,
    body: Option<String>,
    author: String,
    base_branch: String,
    head_branch: String,
    head_sha: String,
    status: String,
    comments: String,
    files_reviewed: String,
    summary_comment: Option<String>,
    external_review_id: Option<u64>,
    review_started_at: Option<String>,
    review_completed_at: Option<String>,
    error_message: Option<String>,
    retry_count: u32,
}

fn read_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RecordRow> {
    Ok(RecordRow {
        id: row.get(0)?,
        owner: row.get(1)?,
        repo: row.get(2)?,
        pr_number: row.get(3)?,
        repo_full_name: row.get(4)?,
        title: row.get(5)?,
        body: row.get(6)?,
        author: row.get(7)?,
        base_branch: row.get(8)?,
        head_branch: row.get(9)?,
        head_sha: row.get(10)?,
        status: row.get(11)?,
        comments: row.get(12)?,
        files_reviewed: row.get(13)?,
        summary_comment: row.get(14)?,
        external_review_id: row.get(15)?,
        review_started_at: row.get(16)?,
        review_completed_at: row.get(17)?,
        error_message: row.get(18)?,
        retry_count: row.get(19)?,
    })
}

fn row_to_record(row: RecordRow) -> Result<ReviewRecord> {
    let status = ReviewStatus::parse(&row.status)
        .ok_or_else(|| anyhow!("Unknown review status: {}", row.status))?;

    let comments: Vec<ReviewComment> =
        serde_json::from_str(&row.comments).context("Failed to deserialize comments")?;
    let files_reviewed: Vec<ReviewedFile> =
        serde_json::from_str(&row.files_reviewed).context("Failed to deserialize files_reviewed")?;

    Ok(ReviewRecord {
        id: RecordId(row.id),
        key: RecordKey::new(&row.owner, &row.repo, row.pr_number),
        snapshot: PrSnapshot {
            repo_full_name: row.repo_full_name,
            title: row.title,
            body: row.body,
            author: row.author,
            base_branch: row.base_branch,
            head_branch: row.head_branch,
            head_sha: row.head_sha,
        },
        status,
        comments,
        summary_comment: row.summary_comment,
        files_reviewed,
        external_review_id: row.external_review_id,
        review_started_at: parse_timestamp(row.review_started_at)?,
        review_completed_at: parse_timestamp(row.review_completed_at)?,
        error_message: row.error_message,
        retry_count: row.retry_count,
    })
}

fn parse_timestamp(value: Option<String>) -> Result<Option<DateTime<Utc>>> {
    value
        .map(|s| {
            DateTime::parse_from_rfc3339(&s)
                .map(|t| t.with_timezone(&Utc))
                .with_context(|| format!("Failed to parse timestamp: {}", s))
        })
        .transpose()
}

/// Async `RecordStore` backed by `SqliteDb`. Every call runs the blocking
/// SQLite work on the blocking thread pool.
#[derive(Clone)]
pub struct SqliteRecordStore {
    db: Arc<SqliteDb>,
}

impl SqliteRecordStore {
    pub fn new(db: Arc<SqliteDb>) -> Self {
        Self { db }
    }
}

fn storage_err(err: anyhow::Error) -> ReviewError {
    ReviewError::storage(format!("{:#}", err))
}

fn join_err(err: tokio::task::JoinError) -> ReviewError {
    ReviewError::storage(format!("database task panicked: {}", err))
}

#[async_trait]
impl RecordStore for SqliteRecordStore {
    async fn find_by_key(&self, key: &RecordKey) -> Result<Option<ReviewRecord>, ReviewError> {
        let db = self.db.clone();
        let key = key.clone();
        tokio::task::spawn_blocking(move || db.get_by_key(&key))
            .await
            .map_err(join_err)?
            .map_err(storage_err)
    }

    async fn find_by_id(&self, id: RecordId) -> Result<Option<ReviewRecord>, ReviewError> {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || db.get_by_id(id))
            .await
            .map_err(join_err)?
            .map_err(storage_err)
    }

    async fn create(&self, record: ReviewRecord) -> Result<ReviewRecord, ReviewError> {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || db.create_record(&record))
            .await
            .map_err(join_err)?
            .map_err(storage_err)
    }

    async fn save(&self, record: &ReviewRecord) -> Result<(), ReviewError> {
        let db = self.db.clone();
        let record = record.clone();
        tokio::task::spawn_blocking(move || db.save_record(&record))
            .await
            .map_err(join_err)?
            .map_err(storage_err)
    }
}
