//! SQLite-backed job store implementation.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use super::{
    Asset, CreateJobRequest, ErrorRecord, Export, ExportKind, Job, JobError, JobFilter, JobKind,
    JobStatus, JobStore, NewAsset, NewErrorRecord, Segment, Summary, Transcript,
};

const JOB_COLUMNS: &str = "id, reference, kind, status, retry_count, last_error, created_at, updated_at, started_at, completed_at";

const ASSET_COLUMNS: &str = "id, job_id, kind, original_name, mime_type, path, size_bytes, duration_secs, sha256, downloaded_at, deleted_at";

/// SQLite-backed job store.
///
/// A single connection behind a mutex is the only writer path, so the
/// read-then-write sequences below are atomic with respect to other callers.
pub struct SqliteJobStore {
    conn: Mutex<Connection>,
    artifact_root: Option<PathBuf>,
}

impl SqliteJobStore {
    /// Open (or create) the database file and its tables.
    pub fn new(path: &Path) -> Result<Self, JobError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| JobError::Database(e.to_string()))?;
            }
        }
        let conn = Connection::open(path).map_err(|e| JobError::Database(e.to_string()))?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            artifact_root: None,
        })
    }

    /// Create an in-memory store (useful for testing).
    pub fn in_memory() -> Result<Self, JobError> {
        let conn = Connection::open_in_memory().map_err(|e| JobError::Database(e.to_string()))?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            artifact_root: None,
        })
    }

    /// Store export paths relative to `root` when they live under it.
    pub fn with_artifact_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.artifact_root = Some(root.into());
        self
    }

    fn initialize_schema(conn: &Connection) -> Result<(), JobError> {
        let _ = conn.pragma_update(None, "journal_mode", "WAL");

        conn.execute_batch(
            r#"
            PRAGMA foreign_keys = ON;

            CREATE TABLE IF NOT EXISTS jobs (
                id TEXT PRIMARY KEY,
                reference TEXT NOT NULL UNIQUE,
                kind TEXT NOT NULL DEFAULT 'undetermined',
                status TEXT NOT NULL DEFAULT 'pending',
                retry_count INTEGER NOT NULL DEFAULT 0,
                last_error TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                started_at TEXT,
                completed_at TEXT
            );

            CREATE TABLE IF NOT EXISTS assets (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                job_id TEXT NOT NULL REFERENCES jobs(id),
                kind TEXT NOT NULL,
                original_name TEXT,
                mime_type TEXT,
                path TEXT,
                size_bytes INTEGER NOT NULL DEFAULT 0,
                duration_secs REAL,
                sha256 TEXT,
                downloaded_at TEXT NOT NULL,
                deleted_at TEXT
            );

            CREATE TABLE IF NOT EXISTS transcripts (
                job_id TEXT PRIMARY KEY REFERENCES jobs(id),
                full_text TEXT NOT NULL,
                segments_json TEXT NOT NULL,
                language TEXT,
                engine TEXT NOT NULL,
                duration_secs REAL,
                word_count INTEGER NOT NULL DEFAULT 0,
                low_confidence_count INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS summaries (
                job_id TEXT PRIMARY KEY REFERENCES jobs(id),
                content TEXT NOT NULL,
                engine TEXT NOT NULL,
                language TEXT NOT NULL,
                chunks INTEGER NOT NULL DEFAULT 1,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS exports (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                job_id TEXT NOT NULL REFERENCES jobs(id),
                kind TEXT NOT NULL,
                path TEXT NOT NULL,
                size_bytes INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                UNIQUE(job_id, kind)
            );

            CREATE TABLE IF NOT EXISTS errors (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                job_id TEXT NOT NULL REFERENCES jobs(id),
                stage TEXT NOT NULL,
                error_type TEXT NOT NULL,
                message TEXT NOT NULL,
                detail TEXT,
                occurred_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_jobs_status ON jobs(status);
            CREATE INDEX IF NOT EXISTS idx_assets_job ON assets(job_id);
            CREATE INDEX IF NOT EXISTS idx_errors_job ON errors(job_id);
            "#,
        )
        .map_err(|e| JobError::Database(e.to_string()))?;

        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, JobError> {
        self.conn
            .lock()
            .map_err(|_| JobError::Database("connection mutex poisoned".to_string()))
    }

    fn build_where_clause(filter: &JobFilter) -> (String, Vec<Box<dyn rusqlite::ToSql>>) {
        let mut conditions = Vec::new();
        let mut params: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(status) = filter.status {
            conditions.push("status = ?");
            params.push(Box::new(status.as_str()));
        }

        if let Some(kind) = filter.kind {
            conditions.push("kind = ?");
            params.push(Box::new(kind.as_str()));
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        (where_clause, params)
    }

    fn row_to_job(row: &rusqlite::Row) -> rusqlite::Result<Job> {
        let kind: String = row.get(2)?;
        let status: String = row.get(3)?;
        let created_at: String = row.get(6)?;
        let updated_at: String = row.get(7)?;
        let started_at: Option<String> = row.get(8)?;
        let completed_at: Option<String> = row.get(9)?;

        Ok(Job {
            id: row.get(0)?,
            reference: row.get(1)?,
            kind: kind.parse().unwrap_or(JobKind::Undetermined),
            status: status.parse().unwrap_or(JobStatus::Pending),
            retry_count: row.get::<_, Option<u32>>(4)?.unwrap_or(0),
            last_error: row.get(5)?,
            created_at: parse_timestamp(&created_at),
            updated_at: parse_timestamp(&updated_at),
            started_at: started_at.as_deref().map(parse_timestamp),
            completed_at: completed_at.as_deref().map(parse_timestamp),
        })
    }

    fn row_to_asset(row: &rusqlite::Row) -> rusqlite::Result<Asset> {
        let kind: String = row.get(2)?;
        let path: Option<String> = row.get(5)?;
        let size: i64 = row.get(6)?;
        let downloaded_at: String = row.get(9)?;
        let deleted_at: Option<String> = row.get(10)?;

        Ok(Asset {
            id: row.get(0)?,
            job_id: row.get(1)?,
            kind: kind.parse().unwrap_or(crate::job::MediaKind::Document),
            original_name: row.get(3)?,
            mime_type: row.get(4)?,
            path: path.map(PathBuf::from),
            size_bytes: size.max(0) as u64,
            duration_secs: row.get(7)?,
            sha256: row.get(8)?,
            downloaded_at: parse_timestamp(&downloaded_at),
            deleted_at: deleted_at.as_deref().map(parse_timestamp),
        })
    }

    fn row_to_export(row: &rusqlite::Row) -> rusqlite::Result<Export> {
        let kind: String = row.get(2)?;
        let path: String = row.get(3)?;
        let size: i64 = row.get(4)?;
        let created_at: String = row.get(5)?;

        Ok(Export {
            id: row.get(0)?,
            job_id: row.get(1)?,
            kind: kind.parse().unwrap_or(ExportKind::CollectedBundle),
            path: PathBuf::from(path),
            size_bytes: size.max(0) as u64,
            created_at: parse_timestamp(&created_at),
        })
    }

    fn row_to_error(row: &rusqlite::Row) -> rusqlite::Result<ErrorRecord> {
        let occurred_at: String = row.get(6)?;
        Ok(ErrorRecord {
            id: row.get(0)?,
            job_id: row.get(1)?,
            stage: row.get(2)?,
            error_type: row.get(3)?,
            message: row.get(4)?,
            detail: row.get(5)?,
            occurred_at: parse_timestamp(&occurred_at),
        })
    }

    fn select_job(conn: &Connection, id: &str) -> Result<Option<Job>, JobError> {
        conn.query_row(
            &format!("SELECT {} FROM jobs WHERE id = ?", JOB_COLUMNS),
            params![id],
            Self::row_to_job,
        )
        .optional()
        .map_err(|e| JobError::Database(e.to_string()))
    }

    fn require_job(conn: &Connection, id: &str) -> Result<Job, JobError> {
        Self::select_job(conn, id)?.ok_or_else(|| JobError::NotFound(id.to_string()))
    }

    /// Returns the number of rows changed. With `unless_cancelled` a
    /// cancelled job is left untouched.
    fn write_status(
        conn: &Connection,
        id: &str,
        status: JobStatus,
        last_error: Option<&str>,
        unless_cancelled: bool,
    ) -> Result<usize, JobError> {
        let done = status == JobStatus::Done;
        conn.execute(
            r#"UPDATE jobs SET
                status = ?1,
                updated_at = ?2,
                started_at = CASE WHEN ?3 THEN COALESCE(started_at, ?2) ELSE started_at END,
                completed_at = CASE WHEN ?4 THEN ?2 ELSE completed_at END,
                last_error = CASE WHEN ?4 THEN NULL ELSE COALESCE(?5, last_error) END
            WHERE id = ?6 AND (NOT ?7 OR status != 'cancelled')"#,
            params![
                status.as_str(),
                Utc::now().to_rfc3339(),
                status.is_in_progress(),
                done,
                last_error,
                id,
                unless_cancelled
            ],
        )
        .map_err(|e| JobError::Database(e.to_string()))
    }

    fn insert_job(conn: &Connection, request: &CreateJobRequest, or_ignore: bool) -> Result<usize, JobError> {
        let id = uuid::Uuid::new_v4().to_string();
        let now = Utc::now().to_rfc3339();
        let verb = if or_ignore {
            "INSERT OR IGNORE"
        } else {
            "INSERT"
        };

        conn.execute(
            &format!(
                "{} INTO jobs (id, reference, kind, status, retry_count, created_at, updated_at) VALUES (?, ?, ?, 'pending', 0, ?, ?)",
                verb
            ),
            params![id, request.reference, request.kind.as_str(), now, now],
        )
        .map_err(|e| match e {
            rusqlite::Error::SqliteFailure(err, _)
                if err.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                JobError::Duplicate(request.reference.clone())
            }
            other => JobError::Database(other.to_string()),
        })
    }

    /// Path as stored: relative to the artifact root when possible.
    fn to_stored_path(&self, path: &Path) -> String {
        if let Some(ref root) = self.artifact_root {
            if let Ok(relative) = path.strip_prefix(root) {
                return relative.to_string_lossy().into_owned();
            }
        }
        path.to_string_lossy().into_owned()
    }

    fn resolve_export(&self, mut export: Export) -> Export {
        if export.path.is_relative() {
            if let Some(ref root) = self.artifact_root {
                export.path = root.join(&export.path);
            }
        }
        export
    }
}

fn parse_timestamp(value: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

impl JobStore for SqliteJobStore {
    fn create(&self, request: CreateJobRequest) -> Result<Job, JobError> {
        let conn = self.lock()?;
        Self::insert_job(&conn, &request, false)?;

        conn.query_row(
            &format!("SELECT {} FROM jobs WHERE reference = ?", JOB_COLUMNS),
            params![request.reference],
            Self::row_to_job,
        )
        .map_err(|e| JobError::Database(e.to_string()))
    }

    fn get_or_create(&self, request: CreateJobRequest) -> Result<(Job, bool), JobError> {
        let conn = self.lock()?;
        let inserted = Self::insert_job(&conn, &request, true)?;

        let job = conn
            .query_row(
                &format!("SELECT {} FROM jobs WHERE reference = ?", JOB_COLUMNS),
                params![request.reference],
                Self::row_to_job,
            )
            .map_err(|e| JobError::Database(e.to_string()))?;

        Ok((job, inserted == 1))
    }

    fn get(&self, id: &str) -> Result<Option<Job>, JobError> {
        let conn = self.lock()?;
        Self::select_job(&conn, id)
    }

    fn get_by_reference(&self, reference: &str) -> Result<Option<Job>, JobError> {
        let conn = self.lock()?;
        conn.query_row(
            &format!("SELECT {} FROM jobs WHERE reference = ?", JOB_COLUMNS),
            params![reference],
            Self::row_to_job,
        )
        .optional()
        .map_err(|e| JobError::Database(e.to_string()))
    }

    fn list(&self, filter: &JobFilter) -> Result<Vec<Job>, JobError> {
        let conn = self.lock()?;

        let (where_clause, params) = Self::build_where_clause(filter);
        let sql = format!(
            "SELECT {} FROM jobs {} ORDER BY created_at ASC, rowid ASC LIMIT ? OFFSET ?",
            JOB_COLUMNS, where_clause
        );

        let mut stmt = conn
            .prepare(&sql)
            .map_err(|e| JobError::Database(e.to_string()))?;

        let mut all_params: Vec<Box<dyn rusqlite::ToSql>> = params;
        all_params.push(Box::new(filter.limit));
        all_params.push(Box::new(filter.offset));
        let param_refs: Vec<&dyn rusqlite::ToSql> = all_params.iter().map(|p| p.as_ref()).collect();

        let rows = stmt
            .query_map(param_refs.as_slice(), Self::row_to_job)
            .map_err(|e| JobError::Database(e.to_string()))?;

        let mut jobs = Vec::new();
        for row in rows {
            jobs.push(row.map_err(|e| JobError::Database(e.to_string()))?);
        }
        Ok(jobs)
    }

    fn count(&self, filter: &JobFilter) -> Result<i64, JobError> {
        let conn = self.lock()?;

        let (where_clause, params) = Self::build_where_clause(filter);
        let sql = format!("SELECT COUNT(*) FROM jobs {}", where_clause);
        let param_refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();

        conn.query_row(&sql, param_refs.as_slice(), |row| row.get(0))
            .map_err(|e| JobError::Database(e.to_string()))
    }

    fn update_status(
        &self,
        id: &str,
        status: JobStatus,
        last_error: Option<&str>,
    ) -> Result<Job, JobError> {
        let conn = self.lock()?;
        if Self::write_status(&conn, id, status, last_error, false)? == 0 {
            return Err(JobError::NotFound(id.to_string()));
        }
        Self::require_job(&conn, id)
    }

    fn advance_status(
        &self,
        id: &str,
        status: JobStatus,
        last_error: Option<&str>,
    ) -> Result<Option<Job>, JobError> {
        let conn = self.lock()?;
        if Self::write_status(&conn, id, status, last_error, true)? == 0 {
            Self::require_job(&conn, id)?;
            return Ok(None);
        }
        Self::require_job(&conn, id).map(Some)
    }

    fn set_kind(&self, id: &str, kind: JobKind) -> Result<Job, JobError> {
        let conn = self.lock()?;
        let current = Self::require_job(&conn, id)?;

        if current.kind == kind {
            return Ok(current);
        }

        if current.kind.is_fixed() {
            return Err(JobError::InvalidState {
                job_id: id.to_string(),
                current: format!("kind is fixed as {}", current.kind),
                operation: format!("reclassify as {}", kind),
            });
        }

        conn.execute(
            "UPDATE jobs SET kind = ?, updated_at = ? WHERE id = ?",
            params![kind.as_str(), Utc::now().to_rfc3339(), id],
        )
        .map_err(|e| JobError::Database(e.to_string()))?;

        Self::require_job(&conn, id)
    }

    fn increment_retry(&self, id: &str) -> Result<Job, JobError> {
        let conn = self.lock()?;

        let changed = conn
            .execute(
                "UPDATE jobs SET retry_count = retry_count + 1, updated_at = ? WHERE id = ?",
                params![Utc::now().to_rfc3339(), id],
            )
            .map_err(|e| JobError::Database(e.to_string()))?;

        if changed == 0 {
            return Err(JobError::NotFound(id.to_string()));
        }

        Self::require_job(&conn, id)
    }

    fn reset_for_retry(&self, id: &str) -> Result<Job, JobError> {
        let conn = self.lock()?;

        let changed = conn
            .execute(
                "UPDATE jobs SET status = 'pending', retry_count = 0, last_error = NULL, completed_at = NULL, updated_at = ? WHERE id = ?",
                params![Utc::now().to_rfc3339(), id],
            )
            .map_err(|e| JobError::Database(e.to_string()))?;

        if changed == 0 {
            return Err(JobError::NotFound(id.to_string()));
        }

        Self::require_job(&conn, id)
    }

    fn save_asset(&self, asset: NewAsset) -> Result<Asset, JobError> {
        let conn = self.lock()?;
        let now = Utc::now().to_rfc3339();

        conn.execute(
            "UPDATE assets SET path = NULL, deleted_at = ? WHERE job_id = ? AND deleted_at IS NULL",
            params![now, asset.job_id],
        )
        .map_err(|e| JobError::Database(e.to_string()))?;

        conn.execute(
            "INSERT INTO assets (job_id, kind, original_name, mime_type, path, size_bytes, duration_secs, sha256, downloaded_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                asset.job_id,
                asset.kind.as_str(),
                asset.original_name,
                asset.mime_type,
                asset.path.to_string_lossy(),
                asset.size_bytes as i64,
                asset.duration_secs,
                asset.sha256,
                now,
            ],
        )
        .map_err(|e| JobError::Database(e.to_string()))?;

        let id = conn.last_insert_rowid();
        conn.query_row(
            &format!("SELECT {} FROM assets WHERE id = ?", ASSET_COLUMNS),
            params![id],
            Self::row_to_asset,
        )
        .map_err(|e| JobError::Database(e.to_string()))
    }

    fn get_asset(&self, job_id: &str) -> Result<Option<Asset>, JobError> {
        let conn = self.lock()?;
        conn.query_row(
            &format!(
                "SELECT {} FROM assets WHERE job_id = ? AND deleted_at IS NULL ORDER BY id DESC LIMIT 1",
                ASSET_COLUMNS
            ),
            params![job_id],
            Self::row_to_asset,
        )
        .optional()
        .map_err(|e| JobError::Database(e.to_string()))
    }

    fn mark_asset_deleted(&self, job_id: &str) -> Result<(), JobError> {
        let conn = self.lock()?;
        conn.execute(
            "UPDATE assets SET path = NULL, deleted_at = ? WHERE job_id = ? AND deleted_at IS NULL",
            params![Utc::now().to_rfc3339(), job_id],
        )
        .map_err(|e| JobError::Database(e.to_string()))?;
        Ok(())
    }

    fn save_transcript(&self, transcript: &Transcript) -> Result<(), JobError> {
        let conn = self.lock()?;
        let segments_json = serde_json::to_string(&transcript.segments)
            .map_err(|e| JobError::Database(e.to_string()))?;

        conn.execute(
            "INSERT INTO transcripts (job_id, full_text, segments_json, language, engine, duration_secs, word_count, low_confidence_count, created_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                transcript.job_id,
                transcript.full_text,
                segments_json,
                transcript.language,
                transcript.engine,
                transcript.duration_secs,
                transcript.word_count,
                transcript.low_confidence_count,
                Utc::now().to_rfc3339(),
            ],
        )
        .map_err(|e| match e {
            rusqlite::Error::SqliteFailure(err, _)
                if err.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                JobError::Duplicate(format!("transcript for job {}", transcript.job_id))
            }
            other => JobError::Database(other.to_string()),
        })?;

        Ok(())
    }

    fn get_transcript(&self, job_id: &str) -> Result<Option<Transcript>, JobError> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT job_id, full_text, segments_json, language, engine, duration_secs, word_count, low_confidence_count FROM transcripts WHERE job_id = ?",
            params![job_id],
            |row| {
                let segments_json: String = row.get(2)?;
                let segments: Vec<Segment> =
                    serde_json::from_str(&segments_json).unwrap_or_default();
                Ok(Transcript {
                    job_id: row.get(0)?,
                    full_text: row.get(1)?,
                    segments,
                    language: row.get(3)?,
                    engine: row.get(4)?,
                    duration_secs: row.get(5)?,
                    word_count: row.get(6)?,
                    low_confidence_count: row.get(7)?,
                })
            },
        )
        .optional()
        .map_err(|e| JobError::Database(e.to_string()))
    }

    fn save_summary(&self, summary: &Summary) -> Result<(), JobError> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO summaries (job_id, content, engine, language, chunks, created_at) VALUES (?, ?, ?, ?, ?, ?)",
            params![
                summary.job_id,
                summary.content,
                summary.engine,
                summary.language,
                summary.chunks,
                Utc::now().to_rfc3339(),
            ],
        )
        .map_err(|e| match e {
            rusqlite::Error::SqliteFailure(err, _)
                if err.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                JobError::Duplicate(format!("summary for job {}", summary.job_id))
            }
            other => JobError::Database(other.to_string()),
        })?;
        Ok(())
    }

    fn get_summary(&self, job_id: &str) -> Result<Option<Summary>, JobError> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT job_id, content, engine, language, chunks FROM summaries WHERE job_id = ?",
            params![job_id],
            |row| {
                Ok(Summary {
                    job_id: row.get(0)?,
                    content: row.get(1)?,
                    engine: row.get(2)?,
                    language: row.get(3)?,
                    chunks: row.get(4)?,
                })
            },
        )
        .optional()
        .map_err(|e| JobError::Database(e.to_string()))
    }

    fn save_export(
        &self,
        job_id: &str,
        kind: ExportKind,
        path: &Path,
        size_bytes: u64,
    ) -> Result<Export, JobError> {
        let conn = self.lock()?;
        let stored = self.to_stored_path(path);

        conn.execute(
            "INSERT OR REPLACE INTO exports (job_id, kind, path, size_bytes, created_at) VALUES (?, ?, ?, ?, ?)",
            params![
                job_id,
                kind.as_str(),
                stored,
                size_bytes as i64,
                Utc::now().to_rfc3339()
            ],
        )
        .map_err(|e| JobError::Database(e.to_string()))?;

        let export = conn
            .query_row(
                "SELECT id, job_id, kind, path, size_bytes, created_at FROM exports WHERE job_id = ? AND kind = ?",
                params![job_id, kind.as_str()],
                Self::row_to_export,
            )
            .map_err(|e| JobError::Database(e.to_string()))?;

        Ok(self.resolve_export(export))
    }

    fn get_export(&self, job_id: &str, kind: ExportKind) -> Result<Option<Export>, JobError> {
        let conn = self.lock()?;
        let export = conn
            .query_row(
                "SELECT id, job_id, kind, path, size_bytes, created_at FROM exports WHERE job_id = ? AND kind = ?",
                params![job_id, kind.as_str()],
                Self::row_to_export,
            )
            .optional()
            .map_err(|e| JobError::Database(e.to_string()))?;

        Ok(export.map(|e| self.resolve_export(e)))
    }

    fn list_exports(&self, job_id: &str) -> Result<Vec<Export>, JobError> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT id, job_id, kind, path, size_bytes, created_at FROM exports WHERE job_id = ? ORDER BY id ASC",
            )
            .map_err(|e| JobError::Database(e.to_string()))?;

        let rows = stmt
            .query_map(params![job_id], Self::row_to_export)
            .map_err(|e| JobError::Database(e.to_string()))?;

        let mut exports = Vec::new();
        for row in rows {
            let export = row.map_err(|e| JobError::Database(e.to_string()))?;
            exports.push(self.resolve_export(export));
        }
        Ok(exports)
    }

    fn record_error(&self, record: NewErrorRecord) -> Result<ErrorRecord, JobError> {
        let conn = self.lock()?;
        let now = Utc::now();

        conn.execute(
            "INSERT INTO errors (job_id, stage, error_type, message, detail, occurred_at) VALUES (?, ?, ?, ?, ?, ?)",
            params![
                record.job_id,
                record.stage,
                record.error_type,
                record.message,
                record.detail,
                now.to_rfc3339(),
            ],
        )
        .map_err(|e| JobError::Database(e.to_string()))?;

        Ok(ErrorRecord {
            id: conn.last_insert_rowid(),
            job_id: record.job_id,
            stage: record.stage,
            error_type: record.error_type,
            message: record.message,
            detail: record.detail,
            occurred_at: now,
        })
    }

    fn list_errors(&self, job_id: &str) -> Result<Vec<ErrorRecord>, JobError> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT id, job_id, stage, error_type, message, detail, occurred_at FROM errors WHERE job_id = ? ORDER BY id ASC",
            )
            .map_err(|e| JobError::Database(e.to_string()))?;

        let rows = stmt
            .query_map(params![job_id], Self::row_to_error)
            .map_err(|e| JobError::Database(e.to_string()))?;

        let mut errors = Vec::new();
        for row in rows {
            errors.push(row.map_err(|e| JobError::Database(e.to_string()))?);
        }
        Ok(errors)
    }

    fn clear_artifacts(&self, job_id: &str) -> Result<(), JobError> {
        let mut conn = self.lock()?;
        let now = Utc::now().to_rfc3339();

        let tx = conn
            .transaction()
            .map_err(|e| JobError::Database(e.to_string()))?;

        tx.execute("DELETE FROM transcripts WHERE job_id = ?", params![job_id])
            .map_err(|e| JobError::Database(e.to_string()))?;
        tx.execute("DELETE FROM summaries WHERE job_id = ?", params![job_id])
            .map_err(|e| JobError::Database(e.to_string()))?;
        tx.execute("DELETE FROM exports WHERE job_id = ?", params![job_id])
            .map_err(|e| JobError::Database(e.to_string()))?;
        tx.execute(
            "UPDATE assets SET path = NULL, deleted_at = ? WHERE job_id = ? AND deleted_at IS NULL",
            params![now, job_id],
        )
        .map_err(|e| JobError::Database(e.to_string()))?;

        tx.commit().map_err(|e| JobError::Database(e.to_string()))
    }
}
