//! Vector store integration
//!
//! This module defines the vector store contract and provides:
//! - A Qdrant-backed store (collection schema, payload indexes)
//! - An in-memory store for tests and offline runs
//! - Point upsert, delete-by-filter, search and count

mod memory;
mod payload;

pub use memory::MemoryStore;
pub use payload::*;

use crate::config::Config;
use crate::error::{Error, Result};
use async_trait::async_trait;
use qdrant_client::qdrant::{
    Condition, CountPointsBuilder, CreateCollectionBuilder, CreateFieldIndexCollectionBuilder,
    DeletePointsBuilder, Distance, FieldType, Filter, PointId, PointStruct, SearchPointsBuilder,
    UpsertPointsBuilder, VectorParamsBuilder,
};
use qdrant_client::Qdrant;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

/// Information about a collection
#[derive(Debug, Clone, Serialize)]
pub struct CollectionInfo {
    pub points_count: u64,
    pub indexed_vectors_count: u64,
    pub status: String,
}

/// Search result
#[derive(Debug, Clone, Serialize)]
pub struct SearchResult {
    pub id: String,
    pub score: f32,
    pub payload: ChunkPayload,
}

/// Payload filter for deletes, searches and counts
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PointFilter {
    pub repo_id: Option<i64>,
    pub path: Option<String>,
}

impl PointFilter {
    /// Every point of a repository
    pub fn repository(repo_id: i64) -> Self {
        Self {
            repo_id: Some(repo_id),
            path: None,
        }
    }

    /// Every point of one file
    pub fn file(repo_id: i64, path: impl Into<String>) -> Self {
        Self {
            repo_id: Some(repo_id),
            path: Some(path.into()),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.repo_id.is_none() && self.path.is_none()
    }

    /// Whether a payload satisfies every condition
    pub fn matches(&self, payload: &ChunkPayload) -> bool {
        self.repo_id.map_or(true, |id| payload.repo_id == id)
            && self.path.as_deref().map_or(true, |p| payload.path == p)
    }

    fn to_qdrant_filter(&self) -> Option<Filter> {
        let mut must_conditions: Vec<Condition> = Vec::new();

        if let Some(repo_id) = self.repo_id {
            must_conditions.push(Condition::matches("repo_id", repo_id));
        }

        if let Some(ref path) = self.path {
            must_conditions.push(Condition::matches("path", path.clone()));
        }

        if must_conditions.is_empty() {
            return None;
        }

        Some(Filter::must(must_conditions))
    }
}

/// Operations the indexer needs from a vector store
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Create the collection and payload indexes if missing; with
    /// `force_recreate`, drop and recreate it first.
    async fn ensure_collection(&self, force_recreate: bool) -> Result<()>;

    /// Write points, overwriting any with the same id
    async fn upsert_points(&self, points: Vec<ChunkPoint>) -> Result<()>;

    /// Remove every point matching the filter
    async fn delete_by_filter(&self, filter: &PointFilter) -> Result<()>;

    async fn search(
        &self,
        query_vector: Vec<f32>,
        limit: usize,
        filter: &PointFilter,
    ) -> Result<Vec<SearchResult>>;

    async fn count(&self, filter: &PointFilter) -> Result<u64>;

    /// Collection state, or `None` when it does not exist
    async fn collection_info(&self) -> Result<Option<CollectionInfo>>;

    /// Drop the collection; `false` when it did not exist
    async fn delete_collection(&self) -> Result<bool>;

    /// Expected vector dimension
    fn dimension(&self) -> usize;
}

pub(crate) fn check_dimensions(points: &[ChunkPoint], dimension: usize, collection: &str) -> Result<()> {
    if let Some(mismatch) = points.iter().find(|p| p.vector.len() != dimension) {
        return Err(Error::Index(format!(
            "Vector dimension mismatch for collection '{}': expected {} (got {})",
            collection,
            dimension,
            mismatch.vector.len()
        )));
    }
    Ok(())
}

pub(crate) fn refuse_unfiltered(filter: &PointFilter) -> Result<()> {
    if filter.is_empty() {
        return Err(Error::Index(
            "refusing to delete points without a repository or path filter".to_string(),
        ));
    }
    Ok(())
}

fn parse_distance(name: &str) -> Result<Distance> {
    match name.to_lowercase().as_str() {
        "cosine" => Ok(Distance::Cosine),
        "dot" => Ok(Distance::Dot),
        "euclid" => Ok(Distance::Euclid),
        "manhattan" => Ok(Distance::Manhattan),
        other => Err(Error::Config(format!("unknown distance metric '{other}'"))),
    }
}

/// Qdrant store handle
pub struct QdrantStore {
    client: Qdrant,
    collection: String,
    dimension: usize,
    distance: Distance,
}

impl QdrantStore {
    /// Connect to Qdrant using config
    pub async fn connect(config: &Config) -> Result<Self> {
        Self::new(
            &config.qdrant_url,
            config.qdrant_api_key(),
            &config.collection_name,
            config.embedding.dimension,
            &config.distance,
        )
        .await
    }

    /// Create a new store connection directly with URL and collection name
    pub async fn new(
        url: &str,
        api_key: Option<String>,
        collection: &str,
        dimension: usize,
        distance: &str,
    ) -> Result<Self> {
        debug!("Connecting to Qdrant at {}", url);

        let mut builder = Qdrant::from_url(url).skip_compatibility_check();
        if let Some(key) = api_key {
            builder = builder.api_key(key);
        }
        let client = builder.build().map_err(|e| Error::Index(e.to_string()))?;

        Ok(Self {
            client,
            collection: collection.to_string(),
            dimension,
            distance: parse_distance(distance)?,
        })
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    async fn create_payload_indexes(&self) {
        for (field, kind) in PAYLOAD_INDEXES {
            let field_type = match kind {
                PayloadIndexKind::Keyword => FieldType::Keyword,
                PayloadIndexKind::Integer => FieldType::Integer,
                PayloadIndexKind::Text => FieldType::Text,
            };
            // Index creation is best effort; searches still work unindexed
            if let Err(e) = self
                .client
                .create_field_index(CreateFieldIndexCollectionBuilder::new(
                    &self.collection,
                    *field,
                    field_type,
                ))
                .await
            {
                warn!(field = %field, error = %e, "Failed to create payload index");
            }
        }
    }
}

#[async_trait]
impl VectorStore for QdrantStore {
    async fn ensure_collection(&self, force_recreate: bool) -> Result<()> {
        let exists = self.client.collection_exists(&self.collection).await?;

        if exists && force_recreate {
            info!("Recreating collection {}", self.collection);
            self.client.delete_collection(&self.collection).await?;
        } else if exists {
            debug!("Collection {} already exists", self.collection);
            return Ok(());
        }

        info!(
            "Creating collection {} with dimension {}",
            self.collection, self.dimension
        );

        let vectors_config = VectorParamsBuilder::new(self.dimension as u64, self.distance);
        self.client
            .create_collection(
                CreateCollectionBuilder::new(&self.collection).vectors_config(vectors_config),
            )
            .await?;

        self.create_payload_indexes().await;

        info!("Collection {} created successfully", self.collection);
        Ok(())
    }

    async fn upsert_points(&self, points: Vec<ChunkPoint>) -> Result<()> {
        if points.is_empty() {
            return Ok(());
        }

        check_dimensions(&points, self.dimension, &self.collection)?;

        debug!(
            "Upserting {} points to collection {}",
            points.len(),
            self.collection
        );

        let point_structs: Vec<PointStruct> =
            points.into_iter().map(|p| p.to_point_struct()).collect();

        self.client
            .upsert_points(UpsertPointsBuilder::new(&self.collection, point_structs).wait(true))
            .await?;

        Ok(())
    }

    async fn delete_by_filter(&self, filter: &PointFilter) -> Result<()> {
        refuse_unfiltered(filter)?;
        let Some(qdrant_filter) = filter.to_qdrant_filter() else {
            return Ok(());
        };

        debug!(?filter, "Deleting points from collection {}", self.collection);

        self.client
            .delete_points(
                DeletePointsBuilder::new(&self.collection)
                    .points(qdrant_filter)
                    .wait(true),
            )
            .await?;

        Ok(())
    }

    async fn search(
        &self,
        query_vector: Vec<f32>,
        limit: usize,
        filter: &PointFilter,
    ) -> Result<Vec<SearchResult>> {
        debug!(
            "Searching collection {} with limit {}",
            self.collection, limit
        );

        let mut search_builder =
            SearchPointsBuilder::new(&self.collection, query_vector, limit as u64)
                .with_payload(true);

        if let Some(qdrant_filter) = filter.to_qdrant_filter() {
            search_builder = search_builder.filter(qdrant_filter);
        }

        let response = self.client.search_points(search_builder).await?;

        let results = response
            .result
            .into_iter()
            .map(|p| {
                let payload: ChunkPayload = p
                    .payload
                    .into_iter()
                    .map(|(k, v)| (k, json_from_qdrant_value(v)))
                    .collect::<serde_json::Map<String, Value>>()
                    .into();

                SearchResult {
                    id: point_id_to_string(p.id),
                    score: p.score,
                    payload,
                }
            })
            .collect();

        Ok(results)
    }

    async fn count(&self, filter: &PointFilter) -> Result<u64> {
        let mut builder = CountPointsBuilder::new(&self.collection).exact(true);
        if let Some(qdrant_filter) = filter.to_qdrant_filter() {
            builder = builder.filter(qdrant_filter);
        }

        let response = self.client.count(builder).await?;
        Ok(response.result.map(|r| r.count).unwrap_or(0))
    }

    async fn collection_info(&self) -> Result<Option<CollectionInfo>> {
        if !self.client.collection_exists(&self.collection).await? {
            return Ok(None);
        }

        let info = self.client.collection_info(&self.collection).await?;
        Ok(info.result.map(|result| CollectionInfo {
            points_count: result.points_count.unwrap_or(0),
            indexed_vectors_count: result.indexed_vectors_count.unwrap_or(0),
            status: format!("{:?}", result.status()),
        }))
    }

    async fn delete_collection(&self) -> Result<bool> {
        if !self.client.collection_exists(&self.collection).await? {
            return Ok(false);
        }

        info!("Deleting collection {}", self.collection);
        self.client.delete_collection(&self.collection).await?;
        Ok(true)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

/// Convert PointId to string
fn point_id_to_string(id: Option<PointId>) -> String {
    match id {
        Some(PointId {
            point_id_options: Some(qdrant_client::qdrant::point_id::PointIdOptions::Uuid(uuid)),
        }) => uuid,
        Some(PointId {
            point_id_options: Some(qdrant_client::qdrant::point_id::PointIdOptions::Num(num)),
        }) => num.to_string(),
        _ => String::new(),
    }
}

/// Convert Qdrant value to serde_json Value
fn json_from_qdrant_value(v: qdrant_client::qdrant::Value) -> Value {
    use qdrant_client::qdrant::value::Kind;

    match v.kind {
        Some(Kind::NullValue(_)) => Value::Null,
        Some(Kind::BoolValue(b)) => Value::Bool(b),
        Some(Kind::IntegerValue(i)) => Value::Number(i.into()),
        Some(Kind::DoubleValue(d)) => serde_json::Number::from_f64(d)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        Some(Kind::StringValue(s)) => Value::String(s),
        Some(Kind::ListValue(list)) => Value::Array(
            list.values
                .into_iter()
                .map(json_from_qdrant_value)
                .collect(),
        ),
        Some(Kind::StructValue(s)) => Value::Object(
            s.fields
                .into_iter()
                .map(|(k, v)| (k, json_from_qdrant_value(v)))
                .collect(),
        ),
        None => Value::Null,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    fn payload(repo_id: i64, path: &str) -> ChunkPayload {
        ChunkPayload {
            repo_id,
            path: path.to_string(),
            language: "python".to_string(),
            doc_type: "function".to_string(),
            symbol: "run".to_string(),
            chunk_index: 0,
            content: "def run(): pass".to_string(),
        }
    }

    #[test]
    fn test_point_filter_to_qdrant() {
        let filter = PointFilter::file(3, "src/app.py");
        let qdrant_filter = filter.to_qdrant_filter();
        assert!(qdrant_filter.is_some());
        assert_eq!(qdrant_filter.unwrap().must.len(), 2);

        assert!(PointFilter::default().to_qdrant_filter().is_none());
    }

    #[test]
    fn test_point_filter_matches() {
        let filter = PointFilter::file(3, "src/app.py");
        assert!(filter.matches(&payload(3, "src/app.py")));
        assert!(!filter.matches(&payload(3, "src/other.py")));
        assert!(!filter.matches(&payload(4, "src/app.py")));
        assert!(PointFilter::repository(3).matches(&payload(3, "anything.py")));
    }

    #[tokio::test]
    async fn test_upsert_points_rejects_dimension_mismatch() {
        let store = QdrantStore::new("http://127.0.0.1:6334", None, "test_collection", 3, "cosine")
            .await
            .expect("store should initialize");

        let point = ChunkPoint {
            id: point_id(1, "a.py", 0),
            vector: vec![0.1, 0.2],
            payload: payload(1, "a.py"),
        };

        let err = store
            .upsert_points(vec![point])
            .await
            .expect_err("should reject mismatched vector length");

        match err {
            Error::Index(message) => assert!(message.contains("Vector dimension mismatch")),
            other => panic!("expected index error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_unfiltered_delete_is_refused() {
        let store = QdrantStore::new("http://127.0.0.1:6334", None, "test_collection", 3, "cosine")
            .await
            .expect("store should initialize");
        assert!(store.delete_by_filter(&PointFilter::default()).await.is_err());
    }

    #[test]
    fn test_parse_distance() {
        assert!(matches!(parse_distance("Cosine"), Ok(Distance::Cosine)));
        assert!(parse_distance("hamming").is_err());
    }
}
