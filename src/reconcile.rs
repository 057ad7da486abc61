//! Incremental reconciliation of changed paths
//!
//! Only the touched files are re-derived. Removals are applied first, then
//! every added or modified path is fetched, re-chunked and swapped into the
//! index (embed, delete, then upsert) along with its file record. Per-path
//! failures are collected; store and database failures abort the run.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::chunk::chunk_file;
use crate::config::AnalysisConfig;
use crate::downstream::{DownstreamEvent, DownstreamScheduler};
use crate::error::{Error, Result};
use crate::fetch::SourceFetcher;
use crate::indexer::IndexSync;
use crate::language::Language;
use crate::meta::{CacheType, FileRecordInput, MetaDb};
use crate::snapshot::PathFailure;

/// Paths touched by a change event
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeSet {
    #[serde(default)]
    pub added: Vec<String>,
    #[serde(default)]
    pub modified: Vec<String>,
    #[serde(default)]
    pub removed: Vec<String>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.modified.is_empty() && self.removed.is_empty()
    }
}

/// Per-path outcome of one reconciliation
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReconcileReport {
    pub repository_id: i64,
    /// Added or modified paths now indexed
    pub succeeded: Vec<String>,
    /// Removed paths whose points and records were dropped
    pub removed: Vec<String>,
    pub failed: Vec<PathFailure>,
    /// Paths outside the allow-list
    pub ignored: Vec<String>,
    pub chunks_indexed: usize,
    pub downstream_scheduled: bool,
}

/// Collaborators for reconciling one repository
pub struct Reconciler<'a> {
    pub db: &'a MetaDb,
    pub index: &'a IndexSync,
    pub fetcher: &'a dyn SourceFetcher,
    pub config: &'a AnalysisConfig,
    pub scheduler: &'a dyn DownstreamScheduler,
}

impl Reconciler<'_> {
    pub async fn reconcile(
        &self,
        repository_id: i64,
        changes: &ChangeSet,
    ) -> Result<ReconcileReport> {
        let mut report = ReconcileReport {
            repository_id,
            ..ReconcileReport::default()
        };

        let mut ignored = BTreeSet::new();
        let mut keep = |path: &String| {
            if self.config.should_index(path) {
                true
            } else {
                ignored.insert(path.clone());
                false
            }
        };
        let removed: BTreeSet<String> = changes
            .removed
            .iter()
            .filter(|p| keep(*p))
            .cloned()
            .collect();
        let changed: BTreeSet<String> = changes
            .added
            .iter()
            .chain(changes.modified.iter())
            .filter(|p| keep(*p))
            .cloned()
            .collect();
        report.ignored = ignored.into_iter().collect();

        info!(
            repository_id,
            removed = removed.len(),
            changed = changed.len(),
            ignored = report.ignored.len(),
            "Reconciling changes"
        );

        for path in &removed {
            self.index.delete_by_path(repository_id, path).await?;
            self.db.delete_file_record(repository_id, path).await?;
            debug!(repository_id, path = %path, "Removed file");
            report.removed.push(path.clone());
        }

        for path in &changed {
            match self.reindex_path(repository_id, path).await {
                Ok(chunks) => {
                    report.chunks_indexed += chunks;
                    report.succeeded.push(path.clone());
                }
                Err(e) if e.is_path_scoped() => {
                    warn!(repository_id, path = %path, error = %e, "Skipping path");
                    report.failed.push(PathFailure {
                        path: path.clone(),
                        error: e.to_string(),
                    });
                }
                Err(e) => return Err(e),
            }
        }

        if !report.removed.is_empty() || !report.succeeded.is_empty() {
            self.db
                .delete_cache(repository_id, CacheType::FileTree)
                .await?;
        }

        if !report.succeeded.is_empty() {
            self.scheduler.schedule(DownstreamEvent::generate_docs(
                repository_id,
                report.succeeded.clone(),
            ));
            report.downstream_scheduled = true;
        }

        info!(
            repository_id,
            succeeded = report.succeeded.len(),
            removed = report.removed.len(),
            failed = report.failed.len(),
            "Reconciliation complete"
        );
        Ok(report)
    }

    async fn reindex_path(&self, repository_id: i64, path: &str) -> Result<usize> {
        let language = Language::from_path(path)
            .ok_or_else(|| Error::Fetch(format!("{path}: no analyser for this extension")))?;
        let bytes = self
            .fetcher
            .read_file(path)
            .await?
            .ok_or_else(|| Error::Fetch(format!("{path}: not found")))?;

        let chunked = chunk_file(path, &bytes, language);
        let outcome = self
            .index
            .replace_file(repository_id, path, &chunked.chunks)
            .await?;

        self.db
            .upsert_file_record(
                repository_id,
                &FileRecordInput {
                    path: path.to_string(),
                    language: language.as_str().to_string(),
                    payload_json: serde_json::to_string(&chunked.structure)?,
                    content_hash: Some(chunked.content_hash),
                },
            )
            .await?;
        Ok(outcome.indexed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indexer::RetryPolicy;
    use crate::meta::SourceType;
    use crate::store::{MemoryStore, PointFilter, VectorStore};
    use crate::testing::{FlakyStore, HashEmbedder, MapFetcher, RecordingScheduler};
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::TempDir;

    const THREE_DEFS: &str = "def one():\n    return 1\n\n\ndef two():\n    return 2\n\n\ndef three():\n    return 3\n";

    fn index_over(store: Arc<dyn VectorStore>) -> IndexSync {
        index_with(store, Arc::new(HashEmbedder::new(8)))
    }

    fn index_with(store: Arc<dyn VectorStore>, embedder: Arc<HashEmbedder>) -> IndexSync {
        IndexSync::new(
            embedder,
            store,
            RetryPolicy {
                attempts: 2,
                initial_backoff: Duration::from_millis(1),
            },
            8,
        )
    }

    fn paths(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    async fn setup() -> (TempDir, MetaDb, i64) {
        let tmp = TempDir::new().unwrap();
        let db = MetaDb::new(&tmp.path().join("meta.db")).await.unwrap();
        let repo = db
            .insert_repository("acme/widgets", SourceType::Github, None)
            .await
            .unwrap();
        (tmp, db, repo.id)
    }

    #[tokio::test]
    async fn test_add_and_remove() {
        let (_tmp, db, repo_id) = setup().await;
        let store = Arc::new(MemoryStore::new(8));
        let index = index_over(store.clone());
        let fetcher = MapFetcher::new().with_file("b.py", THREE_DEFS);
        let scheduler = RecordingScheduler::default();
        let config = AnalysisConfig::default();
        let reconciler = Reconciler {
            db: &db,
            index: &index,
            fetcher: &fetcher,
            config: &config,
            scheduler: &scheduler,
        };

        reconciler
            .reconcile(repo_id, &ChangeSet { added: paths(&["b.py"]), ..ChangeSet::default() })
            .await
            .unwrap();
        assert_eq!(store.count(&PointFilter::file(repo_id, "b.py")).await.unwrap(), 3);

        fetcher.remove("b.py");
        fetcher.put("a.py", "def a():\n    pass\n\n\nclass A:\n    x = 1\n");
        let report = reconciler
            .reconcile(
                repo_id,
                &ChangeSet {
                    added: paths(&["a.py"]),
                    removed: paths(&["b.py"]),
                    ..ChangeSet::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(report.removed, vec!["b.py"]);
        assert_eq!(report.succeeded, vec!["a.py"]);
        assert_eq!(store.count(&PointFilter::file(repo_id, "b.py")).await.unwrap(), 0);
        assert_eq!(store.count(&PointFilter::file(repo_id, "a.py")).await.unwrap(), 2);
        assert!(db.get_file_record(repo_id, "b.py").await.unwrap().is_none());
        assert!(db.get_file_record(repo_id, "a.py").await.unwrap().is_some());

        let events = scheduler.events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].changed_paths, vec!["a.py"]);
        assert_eq!(events[1].job, "generate_docs");
    }

    #[tokio::test]
    async fn test_unsupported_paths_ignored_entirely() {
        let (_tmp, db, repo_id) = setup().await;
        let store = Arc::new(MemoryStore::new(8));
        let index = index_over(store.clone());
        let fetcher = MapFetcher::new().with_file("README.md", "# hi\n");
        let scheduler = RecordingScheduler::default();
        let config = AnalysisConfig::default();

        let report = Reconciler {
            db: &db,
            index: &index,
            fetcher: &fetcher,
            config: &config,
            scheduler: &scheduler,
        }
        .reconcile(
            repo_id,
            &ChangeSet {
                modified: paths(&["README.md", "node_modules/x/y.js"]),
                removed: paths(&["docs/guide.rst"]),
                ..ChangeSet::default()
            },
        )
        .await
        .unwrap();

        assert_eq!(report.ignored, vec!["README.md", "docs/guide.rst", "node_modules/x/y.js"]);
        assert!(report.succeeded.is_empty());
        assert!(!report.downstream_scheduled);
        assert!(scheduler.events().is_empty());
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_path_failures_do_not_abort_siblings() {
        let (_tmp, db, repo_id) = setup().await;
        let store = Arc::new(MemoryStore::new(8));
        let index = index_over(store.clone());
        let fetcher = MapFetcher::new()
            .with_file("ok.py", "def ok():\n    pass\n")
            .failing("flaky.py");
        let scheduler = RecordingScheduler::default();
        let config = AnalysisConfig::default();

        let report = Reconciler {
            db: &db,
            index: &index,
            fetcher: &fetcher,
            config: &config,
            scheduler: &scheduler,
        }
        .reconcile(
            repo_id,
            &ChangeSet {
                added: paths(&["ok.py", "missing.py"]),
                modified: paths(&["flaky.py", "ok.py"]),
                ..ChangeSet::default()
            },
        )
        .await
        .unwrap();

        assert_eq!(report.succeeded, vec!["ok.py"]);
        let failed: Vec<&str> = report.failed.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(failed, vec!["flaky.py", "missing.py"]);
        assert!(report.failed[1].error.contains("not found"));
        assert_eq!(store.count(&PointFilter::file(repo_id, "ok.py")).await.unwrap(), 1);
        assert_eq!(scheduler.events()[0].changed_paths, vec!["ok.py"]);
    }

    #[tokio::test]
    async fn test_rerun_is_idempotent() {
        let (_tmp, db, repo_id) = setup().await;
        let store = Arc::new(MemoryStore::new(8));
        let index = index_over(store.clone());
        let fetcher = MapFetcher::new().with_file("m.py", THREE_DEFS);
        let scheduler = RecordingScheduler::default();
        let config = AnalysisConfig::default();
        let reconciler = Reconciler {
            db: &db,
            index: &index,
            fetcher: &fetcher,
            config: &config,
            scheduler: &scheduler,
        };
        let changes = ChangeSet {
            modified: paths(&["m.py"]),
            ..ChangeSet::default()
        };

        reconciler.reconcile(repo_id, &changes).await.unwrap();
        reconciler.reconcile(repo_id, &changes).await.unwrap();
        assert_eq!(store.len().await, 3);
        assert_eq!(db.count_file_records(repo_id).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_embedding_outage_fails_path_and_keeps_record() {
        let (_tmp, db, repo_id) = setup().await;
        let store = Arc::new(MemoryStore::new(8));
        let embedder = Arc::new(HashEmbedder::new(8));
        let index = index_with(store.clone(), embedder.clone());
        let fetcher = MapFetcher::new().with_file("a.py", THREE_DEFS);
        let scheduler = RecordingScheduler::default();
        let config = AnalysisConfig::default();
        let reconciler = Reconciler {
            db: &db,
            index: &index,
            fetcher: &fetcher,
            config: &config,
            scheduler: &scheduler,
        };
        let changes = ChangeSet {
            modified: paths(&["a.py"]),
            ..ChangeSet::default()
        };

        reconciler.reconcile(repo_id, &changes).await.unwrap();
        let before = db.get_file_record(repo_id, "a.py").await.unwrap().unwrap();

        embedder.set_down(true);
        fetcher.put("a.py", "def a():\n    pass\n\n\ndef b():\n    pass\n");
        let report = reconciler.reconcile(repo_id, &changes).await.unwrap();

        assert!(report.succeeded.is_empty());
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].path, "a.py");
        assert!(!report.downstream_scheduled);
        assert_eq!(scheduler.events().len(), 1);
        assert_eq!(store.count(&PointFilter::file(repo_id, "a.py")).await.unwrap(), 3);
        let after = db.get_file_record(repo_id, "a.py").await.unwrap().unwrap();
        assert_eq!(after.content_hash, before.content_hash);
    }

    #[tokio::test]
    async fn test_all_chunks_rejected_is_a_failed_path() {
        let (_tmp, db, repo_id) = setup().await;
        let store = Arc::new(MemoryStore::new(8));
        let index = index_with(store.clone(), Arc::new(HashEmbedder::new(8).rejecting("")));
        let fetcher =
            MapFetcher::new().with_file("a.py", "def a():\n    pass\n\n\ndef b():\n    pass\n");
        let scheduler = RecordingScheduler::default();
        let config = AnalysisConfig::default();

        let report = Reconciler {
            db: &db,
            index: &index,
            fetcher: &fetcher,
            config: &config,
            scheduler: &scheduler,
        }
        .reconcile(
            repo_id,
            &ChangeSet {
                added: paths(&["a.py"]),
                ..ChangeSet::default()
            },
        )
        .await
        .unwrap();

        assert!(report.succeeded.is_empty());
        assert_eq!(report.failed[0].path, "a.py");
        assert!(store.is_empty().await);
        assert!(db.get_file_record(repo_id, "a.py").await.unwrap().is_none());
        assert!(scheduler.events().is_empty());
    }

    #[tokio::test]
    async fn test_store_failure_aborts() {
        let (_tmp, db, repo_id) = setup().await;
        let index = index_over(Arc::new(FlakyStore::new(8, usize::MAX)));
        let fetcher = MapFetcher::new().with_file("m.py", THREE_DEFS);
        let scheduler = RecordingScheduler::default();
        let config = AnalysisConfig::default();

        let err = Reconciler {
            db: &db,
            index: &index,
            fetcher: &fetcher,
            config: &config,
            scheduler: &scheduler,
        }
        .reconcile(
            repo_id,
            &ChangeSet {
                added: paths(&["m.py"]),
                ..ChangeSet::default()
            },
        )
        .await
        .unwrap_err();

        assert!(matches!(err, Error::Index(_)));
        assert!(scheduler.events().is_empty());
        assert!(db.get_file_record(repo_id, "m.py").await.unwrap().is_none());
    }
}
