//! Full repository analysis
//!
//! Walks every tracked, allow-listed file of a repository through a
//! temporary workspace, segments and chunks it, syncs the vector index and
//! commits the snapshot, status, file tree and file records together.

use std::collections::HashSet;
use std::path::Path;

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::chunk::chunk_file;
use crate::config::AnalysisConfig;
use crate::error::Result;
use crate::fetch::SourceFetcher;
use crate::file_tree::build_file_tree;
use crate::indexer::IndexSync;
use crate::language::Language;
use crate::meta::{AnalysisCommit, FileRecordInput, MetaDb};
use crate::progress::{advance_progress, finish_progress, start_progress_bar};
use crate::snapshot::{
    set_status, AnalysisSnapshot, AnalysisState, AnalysisStatus, AnalysisSummary, AnalyzedFile,
    PathFailure,
};
use crate::workspace::Workspace;

/// What a completed full analysis did
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisReport {
    pub repository_id: i64,
    pub branch: String,
    pub files_indexed: usize,
    pub chunks_indexed: usize,
    pub chunks_skipped: usize,
    pub chunks_rejected: usize,
    /// Paths whose records and points were dropped because they are gone
    pub removed_paths: Vec<String>,
    pub failures: Vec<PathFailure>,
    pub summary: AnalysisSummary,
}

/// Collaborators for one full analysis
pub struct FullAnalysis<'a> {
    pub db: &'a MetaDb,
    pub index: &'a IndexSync,
    pub fetcher: &'a dyn SourceFetcher,
    pub config: &'a AnalysisConfig,
    pub workspace_root: &'a Path,
}

impl FullAnalysis<'_> {
    /// Run the analysis, keeping the status slot current. On failure the
    /// status becomes `failed` and the previous snapshot stays in place.
    pub async fn run(&self, repository_id: i64) -> Result<AnalysisReport> {
        set_status(
            self.db,
            repository_id,
            &AnalysisStatus::now(AnalysisState::Running, None),
        )
        .await?;

        match self.analyze(repository_id).await {
            Ok(report) => Ok(report),
            Err(e) => {
                warn!(repository_id, error = %e, "Full analysis failed");
                let status = AnalysisStatus::now(AnalysisState::Failed, Some(e.to_string()));
                if let Err(status_err) = set_status(self.db, repository_id, &status).await {
                    error!(repository_id, error = %status_err, "Failed to record analysis failure");
                }
                Err(e)
            }
        }
    }

    async fn analyze(&self, repository_id: i64) -> Result<AnalysisReport> {
        let branch = self.fetcher.default_branch().await?;
        let listed = self.fetcher.list_tracked_files().await?;
        let selected: Vec<String> = listed
            .into_iter()
            .filter(|path| self.config.should_index(path))
            .collect();
        info!(repository_id, branch = %branch, files = selected.len(), "Starting full analysis");

        let workspace = Workspace::create(self.workspace_root, repository_id).await?;
        let materialized = workspace
            .materialize(self.fetcher, &selected, self.config.fetch_concurrency)
            .await?;

        self.index.ensure_collection(false).await?;

        let mut failures: Vec<PathFailure> = materialized
            .failed
            .iter()
            .map(|(path, error)| PathFailure {
                path: path.clone(),
                error: error.clone(),
            })
            .collect();

        let mut files = Vec::with_capacity(materialized.written.len());
        let mut records = Vec::with_capacity(materialized.written.len());
        let mut report = AnalysisReport {
            repository_id,
            branch: branch.clone(),
            files_indexed: 0,
            chunks_indexed: 0,
            chunks_skipped: 0,
            chunks_rejected: 0,
            removed_paths: Vec::new(),
            failures: Vec::new(),
            summary: AnalysisSummary::default(),
        };

        let progress = start_progress_bar(materialized.written.len(), "Indexing files");
        for path in &materialized.written {
            let Some(language) = Language::from_path(path) else {
                failures.push(PathFailure {
                    path: path.clone(),
                    error: "no analyser for this extension".to_string(),
                });
                advance_progress(&progress);
                continue;
            };

            let bytes = workspace.read(path).await?;
            let chunked = chunk_file(path, &bytes, language);
            let outcome = match self
                .index
                .replace_file(repository_id, path, &chunked.chunks)
                .await
            {
                Ok(outcome) => outcome,
                Err(e) if e.is_path_scoped() => {
                    warn!(repository_id, path = %path, error = %e, "Skipping file");
                    failures.push(PathFailure {
                        path: path.clone(),
                        error: e.to_string(),
                    });
                    advance_progress(&progress);
                    continue;
                }
                Err(e) => return Err(e),
            };

            report.files_indexed += 1;
            report.chunks_indexed += outcome.indexed;
            report.chunks_skipped += outcome.skipped_empty;
            report.chunks_rejected += outcome.rejected;

            records.push(FileRecordInput {
                path: path.clone(),
                language: language.as_str().to_string(),
                payload_json: serde_json::to_string(&chunked.structure)?,
                content_hash: Some(chunked.content_hash.clone()),
            });
            files.push(AnalyzedFile {
                path: path.clone(),
                language,
                content_hash: chunked.content_hash,
                structure: chunked.structure,
                chunk_count: chunked.chunks.len(),
                parse_error: chunked.parse_error,
            });
            advance_progress(&progress);
        }
        finish_progress(progress, "Files indexed");

        // Files that failed this run keep their previous record and points.
        let retained: Vec<String> = failures.iter().map(|f| f.path.clone()).collect();

        // Points of files that are gone go before the records do.
        let current: HashSet<&str> = records
            .iter()
            .map(|r| r.path.as_str())
            .chain(retained.iter().map(String::as_str))
            .collect();
        let stale: Vec<String> = self
            .db
            .list_file_paths(repository_id)
            .await?
            .into_iter()
            .filter(|path| !current.contains(path.as_str()))
            .collect();
        for path in &stale {
            debug!(repository_id, path = %path, "Dropping points of vanished file");
            self.index.delete_by_path(repository_id, path).await?;
        }

        failures.sort();
        let summary = AnalysisSummary::from_files(&files, failures.len());
        let file_tree = build_file_tree(&selected);
        let snapshot = AnalysisSnapshot {
            repository_id,
            branch: branch.clone(),
            analyzed_at: Utc::now().to_rfc3339(),
            file_tree: file_tree.clone(),
            files,
            summary: summary.clone(),
            failures: failures.clone(),
        };

        let commit = AnalysisCommit {
            repository_id,
            snapshot_json: serde_json::to_string(&snapshot)?,
            status_json: serde_json::to_string(&AnalysisStatus::now(
                AnalysisState::Completed,
                None,
            ))?,
            file_tree_json: serde_json::to_string(&file_tree)?,
            files: records,
            retained,
        };
        report.removed_paths = self.db.commit_analysis(&commit).await?;
        self.db.update_default_branch(repository_id, &branch).await?;

        report.failures = failures;
        report.summary = summary;
        info!(
            repository_id,
            files = report.files_indexed,
            chunks = report.chunks_indexed,
            removed = report.removed_paths.len(),
            failed = report.failures.len(),
            "Full analysis complete"
        );
        Ok(report)
    }
}
