//! Analysis snapshot and status cache slots
//!
//! The snapshot holds the result of exactly one completed full analysis
//! and is replaced wholesale. The status slot is overwritten on every
//! transition, so a reader can tell when a newer analysis is running.

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::file_tree::FileTreeNode;
use crate::language::Language;
use crate::meta::{CacheType, MetaDb};
use crate::segment::FileStructure;

/// A path that could not be processed, with the reason
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PathFailure {
    pub path: String,
    pub error: String,
}

/// Per-file entry of a snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalyzedFile {
    pub path: String,
    pub language: Language,
    pub content_hash: String,
    pub structure: FileStructure,
    pub chunk_count: usize,
    /// Set when the file was indexed as a whole-file fallback
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parse_error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisSummary {
    pub total_files: usize,
    pub python_files: usize,
    pub javascript_files: usize,
    pub typescript_files: usize,
    pub failed_files: usize,
}

impl AnalysisSummary {
    pub fn from_files(files: &[AnalyzedFile], failed_files: usize) -> Self {
        let mut summary = Self {
            total_files: files.len(),
            failed_files,
            ..Self::default()
        };
        for file in files {
            match file.language {
                Language::Python => summary.python_files += 1,
                Language::JavaScript => summary.javascript_files += 1,
                Language::TypeScript => summary.typescript_files += 1,
            }
        }
        summary
    }
}

/// Full-repository analysis payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisSnapshot {
    pub repository_id: i64,
    pub branch: String,
    pub analyzed_at: String,
    pub file_tree: FileTreeNode,
    pub files: Vec<AnalyzedFile>,
    pub summary: AnalysisSummary,
    #[serde(default)]
    pub failures: Vec<PathFailure>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnalysisState {
    Running,
    Completed,
    Failed,
}

impl std::fmt::Display for AnalysisState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AnalysisState::Running => "running",
            AnalysisState::Completed => "completed",
            AnalysisState::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisStatus {
    pub status: AnalysisState,
    pub updated_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AnalysisStatus {
    pub fn now(status: AnalysisState, error: Option<String>) -> Self {
        Self {
            status,
            updated_at: Utc::now().to_rfc3339(),
            error,
        }
    }
}

/// A stored snapshot plus its freshness
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotView {
    pub snapshot: AnalysisSnapshot,
    /// When the snapshot slot was written
    pub cached_at: String,
    pub status: Option<AnalysisStatus>,
    /// A newer full analysis is running
    pub refresh_in_progress: bool,
    /// The latest full analysis failed; the snapshot is from an earlier run
    pub last_refresh_failed: bool,
}

/// Overwrite the status slot
pub async fn set_status(db: &MetaDb, repository_id: i64, status: &AnalysisStatus) -> Result<()> {
    db.upsert_cache(
        repository_id,
        CacheType::AnalysisStatus,
        &serde_json::to_string(status)?,
    )
    .await
}

/// Read the status slot
pub async fn get_status(db: &MetaDb, repository_id: i64) -> Result<Option<AnalysisStatus>> {
    match db.get_cache(repository_id, CacheType::AnalysisStatus).await? {
        Some(entry) => Ok(Some(serde_json::from_str(&entry.payload_json)?)),
        None => Ok(None),
    }
}

/// Read the snapshot with an explicit freshness check; `None` when no full
/// analysis has completed yet.
pub async fn get_snapshot(db: &MetaDb, repository_id: i64) -> Result<Option<SnapshotView>> {
    let Some(entry) = db.get_cache(repository_id, CacheType::Analysis).await? else {
        return Ok(None);
    };
    let snapshot: AnalysisSnapshot = serde_json::from_str(&entry.payload_json)?;
    let status = get_status(db, repository_id).await?;
    let state = status.as_ref().map(|s| s.status);

    Ok(Some(SnapshotView {
        snapshot,
        cached_at: entry.updated_at,
        refresh_in_progress: state == Some(AnalysisState::Running),
        last_refresh_failed: state == Some(AnalysisState::Failed),
        status,
    }))
}
