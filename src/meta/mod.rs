//! Metadata storage using SQLite
//!
//! This module handles all local metadata storage including:
//! - Repositories (registered sources of code)
//! - Repository cache (analysis snapshot, analysis status, file tree)
//! - Repository files (per-path parsed payloads)
//! - Jobs (background task state)

mod schema;

pub use schema::*;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::segment::FileStructure;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::{Executor, FromRow, Sqlite};
use std::collections::HashSet;
use std::str::FromStr;
use tracing::{debug, info};

/// Where a repository's files come from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    Github,
    Local,
}

impl std::fmt::Display for SourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceType::Github => write!(f, "github"),
            SourceType::Local => write!(f, "local"),
        }
    }
}

impl FromStr for SourceType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "github" => Ok(SourceType::Github),
            "local" => Ok(SourceType::Local),
            _ => Err(Error::Config(format!("Unknown source type: {}", s))),
        }
    }
}

/// Slots in the repository cache table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheType {
    Analysis,
    AnalysisStatus,
    FileTree,
}

impl CacheType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheType::Analysis => "analysis",
            CacheType::AnalysisStatus => "analysis_status",
            CacheType::FileTree => "file_tree",
        }
    }
}

impl std::fmt::Display for CacheType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Background job kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    FullAnalysis,
    Reconcile,
}

impl std::fmt::Display for JobKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobKind::FullAnalysis => write!(f, "full_analysis"),
            JobKind::Reconcile => write!(f, "reconcile"),
        }
    }
}

impl FromStr for JobKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "full_analysis" => Ok(JobKind::FullAnalysis),
            "reconcile" => Ok(JobKind::Reconcile),
            _ => Err(Error::Config(format!("Unknown job kind: {}", s))),
        }
    }
}

/// Job lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Queued,
    Running,
    Completed,
    Failed,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed)
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobState::Queued => write!(f, "queued"),
            JobState::Running => write!(f, "running"),
            JobState::Completed => write!(f, "completed"),
            JobState::Failed => write!(f, "failed"),
        }
    }
}

impl FromStr for JobState {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "queued" => Ok(JobState::Queued),
            "running" => Ok(JobState::Running),
            "completed" => Ok(JobState::Completed),
            "failed" => Ok(JobState::Failed),
            _ => Err(Error::Config(format!("Unknown job state: {}", s))),
        }
    }
}

/// A registered repository
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Repository {
    pub id: i64,
    /// `owner/name` for GitHub, a display name for local checkouts
    pub full_name: String,
    pub source_type: String,
    /// Local checkout path (local sources only)
    pub uri: Option<String>,
    pub default_branch: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl Repository {
    pub fn get_type(&self) -> Result<SourceType> {
        self.source_type.parse()
    }
}

/// A cache slot
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct CacheEntry {
    pub repository_id: i64,
    pub cache_type: String,
    pub payload_json: String,
    pub created_at: String,
    pub updated_at: String,
}

/// Latest parsed payload for one path
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct FileRecord {
    pub id: i64,
    pub repository_id: i64,
    pub path: String,
    pub language: String,
    pub payload_json: String,
    pub content_hash: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl FileRecord {
    /// Decoded functions and classes
    pub fn structure(&self) -> Result<FileStructure> {
        Ok(serde_json::from_str(&self.payload_json)?)
    }
}

/// Values written for a file record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecordInput {
    pub path: String,
    pub language: String,
    pub payload_json: String,
    pub content_hash: Option<String>,
}

/// A background job row
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: String,
    pub kind: String,
    pub repository_id: i64,
    pub state: String,
    pub result_json: Option<String>,
    pub error: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl JobRecord {
    pub fn get_state(&self) -> Result<JobState> {
        self.state.parse()
    }

    pub fn get_kind(&self) -> Result<JobKind> {
        self.kind.parse()
    }

    pub fn result(&self) -> Option<serde_json::Value> {
        self.result_json
            .as_ref()
            .and_then(|j| serde_json::from_str(j).ok())
    }
}

/// Everything a completed full analysis writes, committed atomically
#[derive(Debug, Clone)]
pub struct AnalysisCommit {
    pub repository_id: i64,
    pub snapshot_json: String,
    pub status_json: String,
    pub file_tree_json: String,
    pub files: Vec<FileRecordInput>,
    /// Paths that failed this run; their existing records are left alone
    pub retained: Vec<String>,
}

/// Metadata database handle
#[derive(Clone)]
pub struct MetaDb {
    pool: SqlitePool,
}

async fn upsert_cache_in<'e, E>(
    executor: E,
    repository_id: i64,
    cache_type: CacheType,
    payload_json: &str,
) -> Result<()>
where
    E: Executor<'e, Database = Sqlite>,
{
    let now = Utc::now().to_rfc3339();
    sqlx::query(
        r#"
        INSERT INTO repository_cache (repository_id, cache_type, payload_json, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?)
        ON CONFLICT(repository_id, cache_type) DO UPDATE SET
            payload_json = excluded.payload_json,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(repository_id)
    .bind(cache_type.as_str())
    .bind(payload_json)
    .bind(&now)
    .bind(&now)
    .execute(executor)
    .await?;
    Ok(())
}

async fn upsert_file_in<'e, E>(
    executor: E,
    repository_id: i64,
    record: &FileRecordInput,
) -> Result<()>
where
    E: Executor<'e, Database = Sqlite>,
{
    let now = Utc::now().to_rfc3339();
    sqlx::query(
        r#"
        INSERT INTO repository_files (repository_id, path, language, payload_json, content_hash, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(repository_id, path) DO UPDATE SET
            language = excluded.language,
            payload_json = excluded.payload_json,
            content_hash = excluded.content_hash,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(repository_id)
    .bind(&record.path)
    .bind(&record.language)
    .bind(&record.payload_json)
    .bind(&record.content_hash)
    .bind(&now)
    .bind(&now)
    .execute(executor)
    .await?;
    Ok(())
}

impl MetaDb {
    /// Connect to the metadata database
    pub async fn connect(config: &Config) -> Result<Self> {
        Self::open(&config.paths.db_file).await
    }

    async fn open(db_path: &std::path::Path) -> Result<Self> {
        // Create parent directory if needed
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal);

        debug!("Connecting to SQLite database at {:?}", db_path);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        Ok(Self { pool })
    }

    /// Create database with path directly, initializing the schema if needed
    pub async fn new(db_path: &std::path::Path) -> Result<Self> {
        let db = Self::open(db_path).await?;

        if !db.is_initialized().await? {
            db.init_schema().await?;
        }

        Ok(db)
    }

    /// Initialize the database schema
    pub async fn init_schema(&self) -> Result<()> {
        info!("Initializing database schema");
        sqlx::query(SCHEMA_SQL).execute(&self.pool).await?;
        Ok(())
    }

    /// Check if database is initialized
    pub async fn is_initialized(&self) -> Result<bool> {
        let result: Option<(i32,)> = sqlx::query_as(
            "SELECT 1 FROM sqlite_master WHERE type='table' AND name='repositories'",
        )
        .fetch_optional(&self.pool)
        .await?;
        Ok(result.is_some())
    }

    // ===== Repository Operations =====

    /// Register a repository
    pub async fn insert_repository(
        &self,
        full_name: &str,
        source_type: SourceType,
        uri: Option<&str>,
    ) -> Result<Repository> {
        let now = Utc::now().to_rfc3339();
        let result = sqlx::query(
            r#"
            INSERT INTO repositories (full_name, source_type, uri, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(full_name)
        .bind(source_type.to_string())
        .bind(uri)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await?;

        let id = result.last_insert_rowid();
        self.get_repository(id)
            .await?
            .ok_or_else(|| Error::RepositoryNotFound(id.to_string()))
    }

    /// Get repository by ID
    pub async fn get_repository(&self, id: i64) -> Result<Option<Repository>> {
        let repo = sqlx::query_as::<_, Repository>("SELECT * FROM repositories WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(repo)
    }

    /// Get repository by full name
    pub async fn get_repository_by_name(&self, full_name: &str) -> Result<Option<Repository>> {
        let repo =
            sqlx::query_as::<_, Repository>("SELECT * FROM repositories WHERE full_name = ?")
                .bind(full_name)
                .fetch_optional(&self.pool)
                .await?;
        Ok(repo)
    }

    /// Resolve a numeric id or a full name
    pub async fn resolve_repository(&self, key: &str) -> Result<Repository> {
        if let Ok(id) = key.parse::<i64>() {
            if let Some(repo) = self.get_repository(id).await? {
                return Ok(repo);
            }
        }
        self.get_repository_by_name(key)
            .await?
            .ok_or_else(|| Error::RepositoryNotFound(key.to_string()))
    }

    /// List all repositories
    pub async fn list_repositories(&self) -> Result<Vec<Repository>> {
        let repos = sqlx::query_as::<_, Repository>("SELECT * FROM repositories ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        Ok(repos)
    }

    /// Record the branch a repository was last read from
    pub async fn update_default_branch(&self, id: i64, branch: &str) -> Result<()> {
        sqlx::query("UPDATE repositories SET default_branch = ?, updated_at = ? WHERE id = ?")
            .bind(branch)
            .bind(Utc::now().to_rfc3339())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Delete a repository and every row that hangs off it
    pub async fn delete_repository(&self, id: i64) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM repository_files WHERE repository_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        sqlx::query("DELETE FROM repository_cache WHERE repository_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        sqlx::query("DELETE FROM jobs WHERE repository_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        sqlx::query("DELETE FROM repositories WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    // ===== Cache Operations =====

    /// Replace a cache slot
    pub async fn upsert_cache(
        &self,
        repository_id: i64,
        cache_type: CacheType,
        payload_json: &str,
    ) -> Result<()> {
        upsert_cache_in(&self.pool, repository_id, cache_type, payload_json).await
    }

    /// Read a cache slot
    pub async fn get_cache(
        &self,
        repository_id: i64,
        cache_type: CacheType,
    ) -> Result<Option<CacheEntry>> {
        let entry = sqlx::query_as::<_, CacheEntry>(
            "SELECT * FROM repository_cache WHERE repository_id = ? AND cache_type = ?",
        )
        .bind(repository_id)
        .bind(cache_type.as_str())
        .fetch_optional(&self.pool)
        .await?;
        Ok(entry)
    }

    /// Drop a cache slot so the next read recomputes it
    pub async fn delete_cache(&self, repository_id: i64, cache_type: CacheType) -> Result<()> {
        sqlx::query("DELETE FROM repository_cache WHERE repository_id = ? AND cache_type = ?")
            .bind(repository_id)
            .bind(cache_type.as_str())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    // ===== File Record Operations =====

    /// Insert or update a file record
    pub async fn upsert_file_record(
        &self,
        repository_id: i64,
        record: &FileRecordInput,
    ) -> Result<()> {
        upsert_file_in(&self.pool, repository_id, record).await
    }

    /// Get file record by repository and path
    pub async fn get_file_record(
        &self,
        repository_id: i64,
        path: &str,
    ) -> Result<Option<FileRecord>> {
        let record = sqlx::query_as::<_, FileRecord>(
            "SELECT * FROM repository_files WHERE repository_id = ? AND path = ?",
        )
        .bind(repository_id)
        .bind(path)
        .fetch_optional(&self.pool)
        .await?;
        Ok(record)
    }

    /// List file records for a repository
    pub async fn list_file_records(&self, repository_id: i64) -> Result<Vec<FileRecord>> {
        let records = sqlx::query_as::<_, FileRecord>(
            "SELECT * FROM repository_files WHERE repository_id = ? ORDER BY path",
        )
        .bind(repository_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(records)
    }

    /// Paths with a file record
    pub async fn list_file_paths(&self, repository_id: i64) -> Result<Vec<String>> {
        let paths: Vec<String> = sqlx::query_scalar(
            "SELECT path FROM repository_files WHERE repository_id = ? ORDER BY path",
        )
        .bind(repository_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(paths)
    }

    /// Delete a file record; `true` when a row existed
    pub async fn delete_file_record(&self, repository_id: i64, path: &str) -> Result<bool> {
        let result =
            sqlx::query("DELETE FROM repository_files WHERE repository_id = ? AND path = ?")
                .bind(repository_id)
                .bind(path)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Write the snapshot, status, file tree and file records of a full
    /// analysis in one transaction. Records for paths in neither `files`
    /// nor `retained` are removed; their paths are returned.
    pub async fn commit_analysis(&self, commit: &AnalysisCommit) -> Result<Vec<String>> {
        let repository_id = commit.repository_id;
        let mut tx = self.pool.begin().await?;

        upsert_cache_in(
            &mut *tx,
            repository_id,
            CacheType::Analysis,
            &commit.snapshot_json,
        )
        .await?;
        upsert_cache_in(
            &mut *tx,
            repository_id,
            CacheType::AnalysisStatus,
            &commit.status_json,
        )
        .await?;
        upsert_cache_in(
            &mut *tx,
            repository_id,
            CacheType::FileTree,
            &commit.file_tree_json,
        )
        .await?;

        for record in &commit.files {
            upsert_file_in(&mut *tx, repository_id, record).await?;
        }

        let current: HashSet<&str> = commit
            .files
            .iter()
            .map(|f| f.path.as_str())
            .chain(commit.retained.iter().map(String::as_str))
            .collect();
        let existing: Vec<String> =
            sqlx::query_scalar("SELECT path FROM repository_files WHERE repository_id = ?")
                .bind(repository_id)
                .fetch_all(&mut *tx)
                .await?;

        let mut removed = Vec::new();
        for path in existing {
            if current.contains(path.as_str()) {
                continue;
            }
            sqlx::query("DELETE FROM repository_files WHERE repository_id = ? AND path = ?")
                .bind(repository_id)
                .bind(&path)
                .execute(&mut *tx)
                .await?;
            removed.push(path);
        }

        tx.commit().await?;
        removed.sort();
        Ok(removed)
    }

    // ===== Job Operations =====

    /// Record a newly submitted job as queued
    pub async fn insert_job(&self, id: &str, kind: JobKind, repository_id: i64) -> Result<JobRecord> {
        let now = Utc::now().to_rfc3339();
        sqlx::query(
            r#"
            INSERT INTO jobs (id, kind, repository_id, state, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(id)
        .bind(kind.to_string())
        .bind(repository_id)
        .bind(JobState::Queued.to_string())
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await?;

        self.get_job(id)
            .await?
            .ok_or_else(|| Error::JobNotFound(id.to_string()))
    }

    /// Move a job to a new state
    pub async fn update_job(
        &self,
        id: &str,
        state: JobState,
        result_json: Option<String>,
        error: Option<String>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE jobs SET state = ?, result_json = ?, error = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(state.to_string())
        .bind(result_json)
        .bind(error)
        .bind(Utc::now().to_rfc3339())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Get job by ID
    pub async fn get_job(&self, id: &str) -> Result<Option<JobRecord>> {
        let job = sqlx::query_as::<_, JobRecord>("SELECT * FROM jobs WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(job)
    }

    /// Most recent jobs, newest first
    pub async fn list_jobs(&self, repository_id: Option<i64>, limit: i64) -> Result<Vec<JobRecord>> {
        let jobs = match repository_id {
            Some(id) => {
                sqlx::query_as::<_, JobRecord>(
                    "SELECT * FROM jobs WHERE repository_id = ? ORDER BY created_at DESC LIMIT ?",
                )
                .bind(id)
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as::<_, JobRecord>(
                    "SELECT * FROM jobs ORDER BY created_at DESC LIMIT ?",
                )
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
        };
        Ok(jobs)
    }

    /// Mark jobs left queued or running by a previous process as failed
    pub async fn fail_interrupted_jobs(&self) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE jobs SET state = ?, error = ?, updated_at = ?
            WHERE state IN (?, ?)
            "#,
        )
        .bind(JobState::Failed.to_string())
        .bind("interrupted")
        .bind(Utc::now().to_rfc3339())
        .bind(JobState::Queued.to_string())
        .bind(JobState::Running.to_string())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    // ===== Statistics =====

    /// Get global statistics
    pub async fn get_global_stats(&self) -> Result<GlobalStats> {
        let repository_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM repositories")
            .fetch_one(&self.pool)
            .await?;

        let file_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM repository_files")
            .fetch_one(&self.pool)
            .await?;

        let job_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM jobs")
            .fetch_one(&self.pool)
            .await?;

        let active_job_count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM jobs WHERE state IN ('queued', 'running')")
                .fetch_one(&self.pool)
                .await?;

        Ok(GlobalStats {
            repository_count: repository_count as usize,
            file_count: file_count as usize,
            job_count: job_count as usize,
            active_job_count: active_job_count as usize,
        })
    }

    /// File record count for one repository
    pub async fn count_file_records(&self, repository_id: i64) -> Result<usize> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM repository_files WHERE repository_id = ?")
                .bind(repository_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(count as usize)
    }
}

/// Global statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalStats {
    pub repository_count: usize,
    pub file_count: usize,
    pub job_count: usize,
    pub active_job_count: usize,
}
