//! In-process vector store with exact cosine search

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{
    check_dimensions, refuse_unfiltered, ChunkPayload, ChunkPoint, CollectionInfo, PointFilter,
    SearchResult, VectorStore,
};
use crate::error::Result;

/// Vector store kept entirely in memory
pub struct MemoryStore {
    dimension: usize,
    points: RwLock<HashMap<Uuid, (Vec<f32>, ChunkPayload)>>,
}

impl MemoryStore {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            points: RwLock::new(HashMap::new()),
        }
    }

    /// Number of stored points
    pub async fn len(&self) -> usize {
        self.points.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.points.read().await.is_empty()
    }

    /// Payloads matching a filter, ordered by path then chunk index
    pub async fn payloads(&self, filter: &PointFilter) -> Vec<ChunkPayload> {
        let points = self.points.read().await;
        let mut payloads: Vec<ChunkPayload> = points
            .values()
            .filter(|(_, payload)| filter.matches(payload))
            .map(|(_, payload)| payload.clone())
            .collect();
        payloads.sort_by(|a, b| (&a.path, a.chunk_index).cmp(&(&b.path, b.chunk_index)));
        payloads
    }
}

fn cosine(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

#[async_trait]
impl VectorStore for MemoryStore {
    async fn ensure_collection(&self, force_recreate: bool) -> Result<()> {
        if force_recreate {
            self.points.write().await.clear();
        }
        Ok(())
    }

    async fn upsert_points(&self, points: Vec<ChunkPoint>) -> Result<()> {
        check_dimensions(&points, self.dimension, "memory")?;
        let mut stored = self.points.write().await;
        for point in points {
            stored.insert(point.id, (point.vector, point.payload));
        }
        Ok(())
    }

    async fn delete_by_filter(&self, filter: &PointFilter) -> Result<()> {
        refuse_unfiltered(filter)?;
        self.points
            .write()
            .await
            .retain(|_, (_, payload)| !filter.matches(payload));
        Ok(())
    }

    async fn search(
        &self,
        query_vector: Vec<f32>,
        limit: usize,
        filter: &PointFilter,
    ) -> Result<Vec<SearchResult>> {
        let points = self.points.read().await;
        let mut results: Vec<SearchResult> = points
            .iter()
            .filter(|(_, (_, payload))| filter.matches(payload))
            .map(|(id, (vector, payload))| SearchResult {
                id: id.to_string(),
                score: cosine(&query_vector, vector),
                payload: payload.clone(),
            })
            .collect();
        results.sort_by(|a, b| b.score.total_cmp(&a.score));
        results.truncate(limit);
        Ok(results)
    }

    async fn count(&self, filter: &PointFilter) -> Result<u64> {
        let points = self.points.read().await;
        Ok(points
            .values()
            .filter(|(_, payload)| filter.matches(payload))
            .count() as u64)
    }

    async fn collection_info(&self) -> Result<Option<CollectionInfo>> {
        let count = self.points.read().await.len() as u64;
        Ok(Some(CollectionInfo {
            points_count: count,
            indexed_vectors_count: count,
            status: "Green".to_string(),
        }))
    }

    async fn delete_collection(&self) -> Result<bool> {
        self.points.write().await.clear();
        Ok(true)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::point_id;

    fn point(repo_id: i64, path: &str, index: usize, vector: Vec<f32>) -> ChunkPoint {
        ChunkPoint {
            id: point_id(repo_id, path, index),
            vector,
            payload: ChunkPayload {
                repo_id,
                path: path.to_string(),
                language: "python".to_string(),
                doc_type: "function".to_string(),
                symbol: format!("f{index}"),
                chunk_index: index as i64,
                content: "def f(): pass".to_string(),
            },
        }
    }

    #[tokio::test]
    async fn test_upsert_overwrites_same_id() {
        let store = MemoryStore::new(2);
        store
            .upsert_points(vec![point(1, "a.py", 0, vec![1.0, 0.0])])
            .await
            .unwrap();
        store
            .upsert_points(vec![point(1, "a.py", 0, vec![0.0, 1.0])])
            .await
            .unwrap();
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_delete_by_file_filter() {
        let store = MemoryStore::new(2);
        store
            .upsert_points(vec![
                point(1, "a.py", 0, vec![1.0, 0.0]),
                point(1, "a.py", 1, vec![1.0, 0.0]),
                point(1, "b.py", 0, vec![1.0, 0.0]),
                point(2, "a.py", 0, vec![1.0, 0.0]),
            ])
            .await
            .unwrap();

        store
            .delete_by_filter(&PointFilter::file(1, "a.py"))
            .await
            .unwrap();

        assert_eq!(store.count(&PointFilter::file(1, "a.py")).await.unwrap(), 0);
        assert_eq!(store.count(&PointFilter::repository(1)).await.unwrap(), 1);
        assert_eq!(store.count(&PointFilter::repository(2)).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_search_orders_by_score() {
        let store = MemoryStore::new(2);
        store
            .upsert_points(vec![
                point(1, "a.py", 0, vec![1.0, 0.0]),
                point(1, "a.py", 1, vec![0.7, 0.7]),
                point(1, "a.py", 2, vec![0.0, 1.0]),
            ])
            .await
            .unwrap();

        let results = store
            .search(vec![1.0, 0.1], 2, &PointFilter::repository(1))
            .await
            .unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].payload.chunk_index, 0);
        assert_eq!(results[1].payload.chunk_index, 1);
    }
}
