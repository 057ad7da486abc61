//! Embedding and vector index synchronisation for chunked files
//!
//! Every write path embeds first, then deletes by `(repo_id, path)` before
//! upserting. Point ids are derived from `(repo_id, path, chunk_index)`, so
//! replaying a file converges on the same point set.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, warn};

use crate::chunk::CodeChunk;
use crate::config::{Config, IndexConfig};
use crate::embed::{embed_in_batches, Embedder};
use crate::error::{Error, Result};
use crate::store::{point_id, ChunkPayload, ChunkPoint, PointFilter, SearchResult, VectorStore};

/// Bounded exponential backoff for vector store calls
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub initial_backoff: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &IndexConfig) -> Self {
        Self {
            attempts: config.retry_attempts.max(1),
            initial_backoff: config.retry_backoff(),
        }
    }

    /// Run `op` until it succeeds or attempts run out, doubling the delay
    /// after each failure. The final error is reported as `Error::Index`.
    pub async fn run<T, F, Fut>(&self, operation: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let attempts = self.attempts.max(1);
        let mut delay = self.initial_backoff;
        let mut last_err = None;

        for attempt in 1..=attempts {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    warn!(
                        operation,
                        attempt,
                        attempts,
                        error = %e,
                        "Vector store call failed"
                    );
                    last_err = Some(e);
                }
            }
            if attempt < attempts {
                tokio::time::sleep(delay).await;
                delay = delay.saturating_mul(2);
            }
        }

        let detail = last_err
            .map(|e| e.to_string())
            .unwrap_or_else(|| "no attempts made".to_string());
        Err(Error::Index(format!(
            "{operation} failed after {attempts} attempts: {detail}"
        )))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&IndexConfig::default())
    }
}

/// Counts from writing one file's chunks
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct UpsertOutcome {
    /// Points written
    pub indexed: usize,
    /// Chunks with no content
    pub skipped_empty: usize,
    /// Chunks the embedding backend refused
    pub rejected: usize,
}

/// Embeds chunks and keeps the vector index in step with them
pub struct IndexSync {
    embedder: Arc<dyn Embedder>,
    store: Arc<dyn VectorStore>,
    retry: RetryPolicy,
    batch_size: usize,
}

impl IndexSync {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        store: Arc<dyn VectorStore>,
        retry: RetryPolicy,
        batch_size: usize,
    ) -> Self {
        Self {
            embedder,
            store,
            retry,
            batch_size: batch_size.max(1),
        }
    }

    pub fn from_config(
        config: &Config,
        embedder: Arc<dyn Embedder>,
        store: Arc<dyn VectorStore>,
    ) -> Self {
        Self::new(
            embedder,
            store,
            RetryPolicy::from_config(&config.index),
            config.embedding.batch_size,
        )
    }

    pub fn store(&self) -> &Arc<dyn VectorStore> {
        &self.store
    }

    pub fn embedder(&self) -> &Arc<dyn Embedder> {
        &self.embedder
    }

    /// Idempotent collection bootstrap
    pub async fn ensure_collection(&self, force_recreate: bool) -> Result<()> {
        let store = &self.store;
        self.retry
            .run("ensure_collection", || store.ensure_collection(force_recreate))
            .await
    }

    /// Remove every point of one file
    pub async fn delete_by_path(&self, repo_id: i64, path: &str) -> Result<()> {
        let filter = PointFilter::file(repo_id, path);
        let store = &self.store;
        debug!(repo_id, path, "Deleting file points");
        self.retry
            .run("delete_by_path", || store.delete_by_filter(&filter))
            .await
    }

    /// Remove every point of a repository
    pub async fn delete_repository(&self, repo_id: i64) -> Result<()> {
        let filter = PointFilter::repository(repo_id);
        let store = &self.store;
        self.retry
            .run("delete_repository", || store.delete_by_filter(&filter))
            .await
    }

    /// Embed the file's chunks, then swap its points: existing points are
    /// deleted only once every vector is in hand, so an embedding failure
    /// leaves the previous point set untouched.
    pub async fn replace_file(
        &self,
        repo_id: i64,
        path: &str,
        chunks: &[CodeChunk],
    ) -> Result<UpsertOutcome> {
        let (points, outcome) = self.prepare_points(repo_id, path, chunks).await?;
        self.delete_by_path(repo_id, path).await?;
        self.write_points(repo_id, path, points, outcome).await
    }

    /// Embed non-empty chunks and write them in a single batch.
    pub async fn upsert_chunks(
        &self,
        repo_id: i64,
        path: &str,
        chunks: &[CodeChunk],
    ) -> Result<UpsertOutcome> {
        let (points, outcome) = self.prepare_points(repo_id, path, chunks).await?;
        self.write_points(repo_id, path, points, outcome).await
    }

    /// Empty chunks are never sent to the embedder. A chunk whose content
    /// the backend refuses is skipped and counted; an unreachable backend,
    /// or one that refuses every chunk, fails the whole file.
    async fn prepare_points(
        &self,
        repo_id: i64,
        path: &str,
        chunks: &[CodeChunk],
    ) -> Result<(Vec<ChunkPoint>, UpsertOutcome)> {
        let mut outcome = UpsertOutcome::default();

        let embeddable: Vec<&CodeChunk> = chunks
            .iter()
            .filter(|chunk| {
                let keep = chunk.has_content();
                if !keep {
                    outcome.skipped_empty += 1;
                }
                keep
            })
            .collect();

        if embeddable.is_empty() {
            return Ok((Vec::new(), outcome));
        }

        let vectors = self.embed_chunks(path, &embeddable).await?;
        let total = embeddable.len();

        let points: Vec<ChunkPoint> = embeddable
            .into_iter()
            .zip(vectors)
            .filter_map(|(chunk, vector)| match vector {
                Some(vector) => Some(ChunkPoint {
                    id: point_id(repo_id, path, chunk.chunk_index),
                    vector,
                    payload: ChunkPayload {
                        repo_id,
                        path: path.to_string(),
                        language: chunk.language.as_str().to_string(),
                        doc_type: chunk.chunk_type.as_str().to_string(),
                        symbol: chunk.name.clone(),
                        chunk_index: chunk.chunk_index as i64,
                        content: chunk.code.clone(),
                    },
                }),
                None => {
                    outcome.rejected += 1;
                    None
                }
            })
            .collect();

        if points.is_empty() {
            return Err(Error::Embedding(format!(
                "{path}: backend rejected all {total} chunks"
            )));
        }
        Ok((points, outcome))
    }

    async fn write_points(
        &self,
        repo_id: i64,
        path: &str,
        points: Vec<ChunkPoint>,
        mut outcome: UpsertOutcome,
    ) -> Result<UpsertOutcome> {
        if points.is_empty() {
            return Ok(outcome);
        }

        outcome.indexed = points.len();
        let store = &self.store;
        self.retry
            .run("upsert_points", || store.upsert_points(points.clone()))
            .await?;

        debug!(
            repo_id,
            path,
            indexed = outcome.indexed,
            rejected = outcome.rejected,
            "Indexed file chunks"
        );
        Ok(outcome)
    }

    /// One vector slot per chunk; `None` where the backend refused the
    /// chunk's content. Any other failure is returned as is.
    async fn embed_chunks(
        &self,
        path: &str,
        chunks: &[&CodeChunk],
    ) -> Result<Vec<Option<Vec<f32>>>> {
        let texts: Vec<String> = chunks.iter().map(|c| c.code.clone()).collect();

        match embed_in_batches(self.embedder.as_ref(), texts, self.batch_size).await {
            Ok(vectors) if vectors.len() == chunks.len() => {
                return Ok(vectors.into_iter().map(Some).collect());
            }
            Ok(vectors) => warn!(
                path,
                expected = chunks.len(),
                got = vectors.len(),
                "Embedding count mismatch, retrying chunks individually"
            ),
            Err(Error::EmbeddingRejected(reason)) => debug!(
                path,
                reason = %reason,
                "Batch rejected, retrying chunks individually"
            ),
            Err(e) => return Err(e),
        }

        let mut vectors = Vec::with_capacity(chunks.len());
        for chunk in chunks {
            match self.embedder.embed_one(&chunk.code).await {
                Ok(vector) => vectors.push(Some(vector)),
                Err(Error::EmbeddingRejected(reason)) => {
                    warn!(
                        path,
                        chunk_index = chunk.chunk_index,
                        symbol = %chunk.name,
                        reason = %reason,
                        "Skipping chunk rejected by embedder"
                    );
                    vectors.push(None);
                }
                Err(e) => return Err(e),
            }
        }
        Ok(vectors)
    }

    /// Semantic search within one repository, optionally one file.
    pub async fn search(
        &self,
        repo_id: i64,
        query: &str,
        top_k: usize,
        path: Option<&str>,
    ) -> Result<Vec<SearchResult>> {
        if query.trim().is_empty() {
            return Err(Error::InvalidArgument("query is required".to_string()));
        }
        if top_k == 0 {
            return Err(Error::InvalidArgument("top_k must be positive".to_string()));
        }

        let vector = self.embedder.embed_one(query).await?;
        let filter = PointFilter {
            repo_id: Some(repo_id),
            path: path.map(str::to_string),
        };
        let store = &self.store;
        self.retry
            .run("search", || store.search(vector.clone(), top_k, &filter))
            .await
    }

    /// Points currently held for one file
    pub async fn count_for_path(&self, repo_id: i64, path: &str) -> Result<u64> {
        self.store.count(&PointFilter::file(repo_id, path)).await
    }
}
