//! Payload schema for vector points

use qdrant_client::qdrant::{PointStruct, Value as QdrantValue};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use uuid::Uuid;

/// Namespace for deterministic point ids
const POINT_NAMESPACE: Uuid = Uuid::from_u128(0x6f1c_2a4e_93b8_5d07_a1e2_4c3b_9f80_d715);

/// Payload fields and the index kind each one gets
pub const PAYLOAD_INDEXES: &[(&str, PayloadIndexKind)] = &[
    ("repo_id", PayloadIndexKind::Integer),
    ("path", PayloadIndexKind::Keyword),
    ("language", PayloadIndexKind::Keyword),
    ("doc_type", PayloadIndexKind::Keyword),
    ("symbol", PayloadIndexKind::Keyword),
    ("chunk_index", PayloadIndexKind::Integer),
    ("content", PayloadIndexKind::Text),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadIndexKind {
    Keyword,
    Integer,
    Text,
}

/// Deterministic point id for a chunk position
pub fn point_id(repo_id: i64, path: &str, chunk_index: usize) -> Uuid {
    let name = format!("{repo_id}:{path}:{chunk_index}");
    Uuid::new_v5(&POINT_NAMESPACE, name.as_bytes())
}

/// A point ready to be upserted
#[derive(Debug, Clone)]
pub struct ChunkPoint {
    pub id: Uuid,
    pub vector: Vec<f32>,
    pub payload: ChunkPayload,
}

impl ChunkPoint {
    /// Convert to qdrant-client PointStruct
    pub fn to_point_struct(self) -> PointStruct {
        let payload_map = self.payload.to_qdrant_payload();
        PointStruct::new(self.id.to_string(), self.vector, payload_map)
    }
}

/// Payload stored with each chunk
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkPayload {
    pub repo_id: i64,

    /// Repository-relative path with `/` separators
    pub path: String,

    pub language: String,

    /// Chunk kind ("function", "class", "file")
    pub doc_type: String,

    /// Symbol name, or the file's base name for whole-file chunks
    pub symbol: String,

    pub chunk_index: i64,

    /// Chunk source text
    pub content: String,
}

impl ChunkPayload {
    /// Convert to Qdrant payload format
    pub fn to_qdrant_payload(self) -> HashMap<String, QdrantValue> {
        let mut map = HashMap::new();

        map.insert("repo_id".to_string(), int_to_qdrant(self.repo_id));
        map.insert("path".to_string(), string_to_qdrant(&self.path));
        map.insert("language".to_string(), string_to_qdrant(&self.language));
        map.insert("doc_type".to_string(), string_to_qdrant(&self.doc_type));
        map.insert("symbol".to_string(), string_to_qdrant(&self.symbol));
        map.insert("chunk_index".to_string(), int_to_qdrant(self.chunk_index));
        map.insert("content".to_string(), string_to_qdrant(&self.content));

        map
    }
}

fn string_to_qdrant(s: &str) -> QdrantValue {
    QdrantValue {
        kind: Some(qdrant_client::qdrant::value::Kind::StringValue(s.to_string())),
    }
}

fn int_to_qdrant(i: i64) -> QdrantValue {
    QdrantValue {
        kind: Some(qdrant_client::qdrant::value::Kind::IntegerValue(i)),
    }
}

impl From<Map<String, Value>> for ChunkPayload {
    fn from(map: Map<String, Value>) -> Self {
        serde_json::from_value(Value::Object(map)).unwrap_or_else(|_| ChunkPayload {
            repo_id: 0,
            path: String::new(),
            language: String::new(),
            doc_type: String::new(),
            symbol: String::new(),
            chunk_index: 0,
            content: String::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_point_id_is_deterministic() {
        assert_eq!(point_id(1, "a.py", 0), point_id(1, "a.py", 0));
        assert_ne!(point_id(1, "a.py", 0), point_id(1, "a.py", 1));
        assert_ne!(point_id(1, "a.py", 0), point_id(2, "a.py", 0));
        assert_ne!(point_id(1, "a.py", 0), point_id(1, "b.py", 0));
    }

    #[test]
    fn test_payload_from_json_map() {
        let json = serde_json::json!({
            "repo_id": 7,
            "path": "pkg/mod.py",
            "language": "python",
            "doc_type": "function",
            "symbol": "run",
            "chunk_index": 2,
            "content": "def run(): pass",
        });
        let Value::Object(map) = json else {
            panic!("expected object");
        };
        let payload = ChunkPayload::from(map);
        assert_eq!(payload.repo_id, 7);
        assert_eq!(payload.symbol, "run");

        let qdrant = payload.to_qdrant_payload();
        assert_eq!(qdrant.len(), 7);
    }
}
