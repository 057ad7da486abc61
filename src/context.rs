//! Service facade
//!
//! Wires the metadata database, vector index, fetchers and job pool
//! together and exposes the client operations over repository names or ids.

use std::sync::Arc;

use tracing::info;

use crate::config::Config;
use crate::downstream::{DownstreamScheduler, LogScheduler};
use crate::embed::create_embedder;
use crate::error::{Error, Result};
use crate::fetch::{FetcherFactory, SourceRouter};
use crate::file_tree::{get_file_tree, FileTreeView};
use crate::indexer::IndexSync;
use crate::jobs::{JobManager, JobServices, JobStatus};
use crate::meta::{MetaDb, Repository};
use crate::reconcile::ChangeSet;
use crate::snapshot::{get_snapshot, SnapshotView};
use crate::store::{QdrantStore, SearchResult, VectorStore};

pub struct IndexContext {
    jobs: JobManager,
}

impl IndexContext {
    /// Connect to the configured database, Qdrant and embedding backend
    pub async fn open(config: &Config) -> Result<Self> {
        let db = MetaDb::connect(config).await?;
        let store: Arc<dyn VectorStore> = Arc::new(QdrantStore::connect(config).await?);
        let embedder = create_embedder(&config.embedding)?;
        let index = IndexSync::from_config(config, embedder, store);

        info!(
            collection = %config.collection_name,
            workers = config.worker.max_concurrent_jobs,
            "Index context ready"
        );

        Self::with_services(
            JobServices {
                db,
                index: Arc::new(index),
                fetchers: Arc::new(SourceRouter::new(config)),
                scheduler: Arc::new(LogScheduler),
                analysis: config.analysis.clone(),
                workspace_root: config.paths.workspace_dir.clone(),
            },
            config.worker.max_concurrent_jobs,
        )
        .await
    }

    pub async fn with_services(services: JobServices, max_concurrent_jobs: usize) -> Result<Self> {
        Ok(Self {
            jobs: JobManager::start(services, max_concurrent_jobs).await?,
        })
    }

    pub fn db(&self) -> &MetaDb {
        &self.jobs.services().db
    }

    pub fn index(&self) -> &Arc<IndexSync> {
        &self.jobs.services().index
    }

    pub fn jobs(&self) -> &JobManager {
        &self.jobs
    }

    pub fn fetchers(&self) -> &Arc<dyn FetcherFactory> {
        &self.jobs.services().fetchers
    }

    pub fn scheduler(&self) -> &Arc<dyn DownstreamScheduler> {
        &self.jobs.services().scheduler
    }

    /// Look a repository up by numeric id or `owner/name`
    pub async fn repository(&self, reference: &str) -> Result<Repository> {
        self.db().resolve_repository(reference).await
    }

    pub async fn start_full_analysis(&self, repository_id: i64) -> Result<String> {
        self.jobs.start_full_analysis(repository_id).await
    }

    pub async fn get_job_status(&self, job_id: &str) -> Result<JobStatus> {
        self.jobs.get_job_status(job_id).await
    }

    pub async fn reconcile(&self, repository_id: i64, changes: ChangeSet) -> Result<String> {
        self.jobs.reconcile(repository_id, changes).await
    }

    /// Latest snapshot; `RepositoryNotFound` for unknown repositories and
    /// `None` before the first completed analysis
    pub async fn get_snapshot(&self, repository_id: i64) -> Result<Option<SnapshotView>> {
        self.require(repository_id).await?;
        get_snapshot(self.db(), repository_id).await
    }

    pub async fn get_file_tree(&self, repository_id: i64) -> Result<FileTreeView> {
        let repository = self.require(repository_id).await?;
        let fetcher = self.fetchers().fetcher_for(&repository)?;
        let services = self.jobs.services();
        get_file_tree(
            &services.db,
            fetcher.as_ref(),
            &services.analysis,
            repository_id,
        )
        .await
    }

    pub async fn search(
        &self,
        repository_id: i64,
        query: &str,
        top_k: usize,
        path: Option<&str>,
    ) -> Result<Vec<SearchResult>> {
        self.require(repository_id).await?;
        self.index().search(repository_id, query, top_k, path).await
    }

    /// Drop a repository's points, then its rows
    pub async fn remove_repository(&self, repository_id: i64) -> Result<()> {
        self.require(repository_id).await?;
        self.index().delete_repository(repository_id).await?;
        self.db().delete_repository(repository_id).await?;
        info!(repository_id, "Removed repository");
        Ok(())
    }

    async fn require(&self, repository_id: i64) -> Result<Repository> {
        self.db()
            .get_repository(repository_id)
            .await?
            .ok_or_else(|| Error::RepositoryNotFound(repository_id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::meta::JobState;
    use crate::store::PointFilter;
    use crate::testing::{MapFetcher, TestContext};

    const B_SOURCE: &str = "def one():\n    return 1\n\n\ndef two():\n    return 2\n\n\nclass Three:\n    pass\n";
    const A_SOURCE: &str = "import os\n\ndef alpha():\n    return os.sep\n\n\nclass Beta:\n    def run(self):\n        return 2\n";

    async fn fixture(fetcher: MapFetcher) -> TestContext {
        TestContext::new(fetcher).await
    }

    #[tokio::test]
    async fn test_reconcile_replaces_removed_and_added_points() {
        let f = fixture(MapFetcher::new().with_file("b.py", B_SOURCE)).await;

        let job = f.ctx.start_full_analysis(f.repo_id).await.unwrap();
        assert_eq!(f.ctx.jobs().wait(&job).await.unwrap().state, JobState::Completed);
        let b_count = f.ctx.index().count_for_path(f.repo_id, "b.py").await.unwrap();
        assert_eq!(b_count, 3);

        f.fetcher.remove("b.py");
        f.fetcher.put("a.py", A_SOURCE);
        let job = f
            .ctx
            .reconcile(
                f.repo_id,
                ChangeSet {
                    added: vec!["a.py".to_string()],
                    removed: vec!["b.py".to_string()],
                    ..ChangeSet::default()
                },
            )
            .await
            .unwrap();
        let status = f.ctx.jobs().wait(&job).await.unwrap();
        assert_eq!(status.state, JobState::Completed);

        assert_eq!(f.ctx.index().count_for_path(f.repo_id, "b.py").await.unwrap(), 0);
        let a_points = f.store.payloads(&PointFilter::file(f.repo_id, "a.py")).await;
        let mut symbols: Vec<String> = a_points.iter().map(|p| p.symbol.clone()).collect();
        symbols.sort();
        assert_eq!(symbols, vec!["Beta", "alpha"]);

        let paths = f.ctx.db().list_file_paths(f.repo_id).await.unwrap();
        assert_eq!(paths, vec!["a.py"]);
        assert_eq!(f.scheduler.events().len(), 1);
    }

    #[tokio::test]
    async fn test_snapshot_tree_and_search() {
        let f = fixture(
            MapFetcher::new()
                .with_file("b.py", B_SOURCE)
                .with_file("docs/readme.md", "# hi\n"),
        )
        .await;
        assert!(f.ctx.get_snapshot(f.repo_id).await.unwrap().is_none());

        let job = f.ctx.start_full_analysis(f.repo_id).await.unwrap();
        f.ctx.jobs().wait(&job).await.unwrap();

        let view = f.ctx.get_snapshot(f.repo_id).await.unwrap().unwrap();
        assert!(!view.refresh_in_progress);
        assert!(!view.last_refresh_failed);
        assert_eq!(view.snapshot.summary.python_files, 1);

        let tree = f.ctx.get_file_tree(f.repo_id).await.unwrap();
        assert_eq!(tree.tree.file_count(), 1);

        let hits = f.ctx.search(f.repo_id, "def two", 2, None).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert!(hits.iter().all(|h| h.payload.path == "b.py"));
        assert!(matches!(
            f.ctx.search(f.repo_id, "  ", 2, None).await,
            Err(Error::InvalidArgument(_))
        ));
    }

    #[tokio::test]
    async fn test_remove_repository_and_unknown_ids() {
        let f = fixture(MapFetcher::new().with_file("b.py", B_SOURCE)).await;
        let job = f.ctx.start_full_analysis(f.repo_id).await.unwrap();
        f.ctx.jobs().wait(&job).await.unwrap();

        assert_eq!(f.ctx.repository("acme/widgets").await.unwrap().id, f.repo_id);
        f.ctx.remove_repository(f.repo_id).await.unwrap();
        assert!(f.store.is_empty().await);
        assert!(matches!(
            f.ctx.get_snapshot(f.repo_id).await,
            Err(Error::RepositoryNotFound(_))
        ));
        assert!(matches!(
            f.ctx.get_file_tree(f.repo_id).await,
            Err(Error::RepositoryNotFound(_))
        ));
    }
}
