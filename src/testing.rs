//! In-memory collaborators shared by unit tests

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;
use tokio::sync::Semaphore;

use crate::config::AnalysisConfig;
use crate::context::IndexContext;
use crate::downstream::{DownstreamEvent, DownstreamScheduler};
use crate::embed::{validate_texts, Embedder};
use crate::error::{Error, Result};
use crate::fetch::{FetcherFactory, SourceFetcher};
use crate::indexer::{IndexSync, RetryPolicy};
use crate::jobs::JobServices;
use crate::meta::{MetaDb, Repository, SourceType};
use crate::store::{
    ChunkPoint, CollectionInfo, MemoryStore, PointFilter, SearchResult, VectorStore,
};

/// Deterministic embedder: each vector is derived from the text's bytes
pub struct HashEmbedder {
    dimension: usize,
    reject: Option<String>,
    down: AtomicBool,
    calls: AtomicUsize,
}

impl HashEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            reject: None,
            down: AtomicBool::new(false),
            calls: AtomicUsize::new(0),
        }
    }

    /// Refuse any request containing a text with `marker`
    pub fn rejecting(mut self, marker: &str) -> Self {
        self.reject = Some(marker.to_string());
        self
    }

    /// Fail every request as an unreachable backend would
    pub fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }

    /// Number of `embed` requests received
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn vector_for(&self, text: &str) -> Vec<f32> {
        let hash = blake3::hash(text.as_bytes());
        hash.as_bytes()
            .iter()
            .cycle()
            .take(self.dimension)
            .map(|b| *b as f32 / 255.0 + 0.01)
            .collect()
    }
}

#[async_trait]
impl Embedder for HashEmbedder {
    async fn embed(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        validate_texts(&texts)?;
        if self.down.load(Ordering::SeqCst) {
            return Err(Error::Embedding("connection refused".to_string()));
        }
        if let Some(marker) = &self.reject {
            if texts.iter().any(|t| t.contains(marker.as_str())) {
                return Err(Error::EmbeddingRejected(format!(
                    "rejected text containing {marker}"
                )));
            }
        }
        Ok(texts.iter().map(|t| self.vector_for(t)).collect())
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_name(&self) -> &str {
        "hash"
    }
}

/// Memory store whose first `failures` writes fail
pub struct FlakyStore {
    inner: MemoryStore,
    remaining_failures: AtomicUsize,
}

impl FlakyStore {
    pub fn new(dimension: usize, failures: usize) -> Self {
        Self {
            inner: MemoryStore::new(dimension),
            remaining_failures: AtomicUsize::new(failures),
        }
    }

    fn trip(&self) -> Result<()> {
        let tripped = self
            .remaining_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                if n == usize::MAX {
                    Some(n)
                } else {
                    n.checked_sub(1)
                }
            })
            .is_ok();
        if tripped {
            return Err(Error::Index("store unavailable".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl VectorStore for FlakyStore {
    async fn ensure_collection(&self, force_recreate: bool) -> Result<()> {
        self.trip()?;
        self.inner.ensure_collection(force_recreate).await
    }

    async fn upsert_points(&self, points: Vec<ChunkPoint>) -> Result<()> {
        self.trip()?;
        self.inner.upsert_points(points).await
    }

    async fn delete_by_filter(&self, filter: &PointFilter) -> Result<()> {
        self.trip()?;
        self.inner.delete_by_filter(filter).await
    }

    async fn search(
        &self,
        query_vector: Vec<f32>,
        limit: usize,
        filter: &PointFilter,
    ) -> Result<Vec<SearchResult>> {
        self.inner.search(query_vector, limit, filter).await
    }

    async fn count(&self, filter: &PointFilter) -> Result<u64> {
        self.inner.count(filter).await
    }

    async fn collection_info(&self) -> Result<Option<CollectionInfo>> {
        self.inner.collection_info().await
    }

    async fn delete_collection(&self) -> Result<bool> {
        self.inner.delete_collection().await
    }

    fn dimension(&self) -> usize {
        self.inner.dimension()
    }
}

#[derive(Default)]
struct MapFetcherState {
    files: HashMap<String, Vec<u8>>,
    failing: HashSet<String>,
    list_error: bool,
    list_panics: bool,
}

/// Fetcher over an editable in-memory file map. Clones share state, so a
/// test can change files after handing the fetcher to a job.
#[derive(Clone, Default)]
pub struct MapFetcher {
    state: Arc<Mutex<MapFetcherState>>,
    gate: Option<Arc<Semaphore>>,
}

impl MapFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_file(self, path: &str, content: impl Into<Vec<u8>>) -> Self {
        self.put(path, content);
        self
    }

    /// Make `read_file(path)` fail with a fetch error
    pub fn failing(self, path: &str) -> Self {
        self.lock().failing.insert(path.to_string());
        self
    }

    /// Make `list_tracked_files` fail
    pub fn failing_listing(self) -> Self {
        self.lock().list_error = true;
        self
    }

    /// Panic inside `list_tracked_files`
    pub fn panicking_listing(self) -> Self {
        self.lock().list_panics = true;
        self
    }

    /// Block `list_tracked_files` until the returned semaphore gets a permit
    pub fn gated(mut self) -> (Self, Arc<Semaphore>) {
        let gate = Arc::new(Semaphore::new(0));
        self.gate = Some(gate.clone());
        (self, gate)
    }

    pub fn put(&self, path: &str, content: impl Into<Vec<u8>>) {
        self.lock().files.insert(path.to_string(), content.into());
    }

    pub fn remove(&self, path: &str) {
        self.lock().files.remove(path);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MapFetcherState> {
        self.state.lock().unwrap()
    }
}

#[async_trait]
impl SourceFetcher for MapFetcher {
    async fn list_tracked_files(&self) -> Result<Vec<String>> {
        if let Some(gate) = &self.gate {
            let permit = gate
                .acquire()
                .await
                .map_err(|e| Error::Fetch(e.to_string()))?;
            permit.forget();
        }
        if self.lock().list_panics {
            panic!("listing exploded");
        }
        let state = self.lock();
        if state.list_error {
            return Err(Error::Fetch("listing unavailable".to_string()));
        }
        let mut paths: Vec<String> = state.files.keys().cloned().collect();
        paths.sort();
        Ok(paths)
    }

    async fn read_file(&self, path: &str) -> Result<Option<Vec<u8>>> {
        let state = self.lock();
        if state.failing.contains(path) {
            return Err(Error::Fetch(format!("{path}: connection reset")));
        }
        Ok(state.files.get(path).cloned())
    }

    async fn default_branch(&self) -> Result<String> {
        Ok("main".to_string())
    }
}

impl FetcherFactory for MapFetcher {
    fn fetcher_for(&self, _repository: &Repository) -> Result<Arc<dyn SourceFetcher>> {
        Ok(Arc::new(self.clone()))
    }
}

/// Scheduler that keeps every event
#[derive(Default)]
pub struct RecordingScheduler {
    events: Mutex<Vec<DownstreamEvent>>,
}

impl RecordingScheduler {
    pub fn events(&self) -> Vec<DownstreamEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl DownstreamScheduler for RecordingScheduler {
    fn schedule(&self, event: DownstreamEvent) {
        self.events.lock().unwrap().push(event);
    }
}

/// A full service stack over a scratch database, an in-memory store and
/// one registered GitHub repository `acme/widgets`
pub struct TestContext {
    pub tmp: TempDir,
    pub ctx: IndexContext,
    pub store: Arc<MemoryStore>,
    pub scheduler: Arc<RecordingScheduler>,
    pub fetcher: MapFetcher,
    pub repo_id: i64,
}

impl TestContext {
    pub async fn new(fetcher: MapFetcher) -> Self {
        let tmp = TempDir::new().unwrap();
        let db = MetaDb::new(&tmp.path().join("meta.db")).await.unwrap();
        let repo = db
            .insert_repository("acme/widgets", SourceType::Github, None)
            .await
            .unwrap();
        let store = Arc::new(MemoryStore::new(8));
        let scheduler = Arc::new(RecordingScheduler::default());
        let index = IndexSync::new(
            Arc::new(HashEmbedder::new(8)),
            store.clone(),
            RetryPolicy {
                attempts: 2,
                initial_backoff: Duration::from_millis(1),
            },
            16,
        );
        let ctx = IndexContext::with_services(
            JobServices {
                db,
                index: Arc::new(index),
                fetchers: Arc::new(fetcher.clone()),
                scheduler: scheduler.clone(),
                analysis: AnalysisConfig::default(),
                workspace_root: tmp.path().join("workspaces"),
            },
            2,
        )
        .await
        .unwrap();

        Self {
            tmp,
            ctx,
            store,
            scheduler,
            fetcher,
            repo_id: repo.id,
        }
    }
}
