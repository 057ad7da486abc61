//! Chunk building for embedding
//!
//! This module turns a source file into uniform chunk records:
//! - One chunk per top-level Python function or class, in declaration order
//! - Module-level imports attached to every chunk of the file
//! - A single whole-file chunk for languages without a grammar, or when
//!   parsing fails

use std::path::Path;

use blake3::Hasher;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::language::Language;
use crate::segment::{self, FileStructure};

/// Kind of construct a chunk covers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkType {
    Function,
    Class,
    File,
}

impl ChunkType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChunkType::Function => "function",
            ChunkType::Class => "class",
            ChunkType::File => "file",
        }
    }
}

/// A chunk ready for embedding
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeChunk {
    pub chunk_type: ChunkType,

    /// Symbol name, or the file's base name for whole-file chunks
    pub name: String,

    pub signature: String,

    /// Module-level import statements shared by every chunk of the file
    pub imports: Vec<String>,

    pub language: Language,

    /// Exact source text of the span
    pub code: String,

    /// Chunk index (0-based, declaration order)
    pub chunk_index: usize,

    pub start_byte: usize,
    pub end_byte: usize,
}

impl CodeChunk {
    /// Whether there is anything worth embedding
    pub fn has_content(&self) -> bool {
        !self.code.trim().is_empty()
    }
}

/// Result of chunking one file
#[derive(Debug, Clone)]
pub struct ChunkedFile {
    pub language: Language,

    /// Extracted functions/classes (empty for non-structural files)
    pub structure: FileStructure,

    pub chunks: Vec<CodeChunk>,

    /// Blake3 hash of the raw bytes
    pub content_hash: String,

    /// Why structural extraction was skipped, if it failed
    pub parse_error: Option<String>,
}

/// Compute the content hash recorded on file records
pub fn content_hash(bytes: &[u8]) -> String {
    let mut hasher = Hasher::new();
    hasher.update(bytes);
    hasher.finalize().to_hex().to_string()
}

/// Chunk a file's bytes
pub fn chunk_file(path: &str, bytes: &[u8], language: Language) -> ChunkedFile {
    let hash = content_hash(bytes);

    if language.is_structural() {
        match segment::parse(bytes, language) {
            Ok(parsed) => {
                let structure = parsed.structure();
                let imports = parsed.imports();
                let chunks = structural_chunks(&structure, &parsed.source, &imports, language);
                return ChunkedFile {
                    language,
                    structure,
                    chunks,
                    content_hash: hash,
                    parse_error: None,
                };
            }
            Err(e) => {
                debug!(path = %path, error = %e, "Falling back to whole-file chunk");
                return ChunkedFile {
                    language,
                    structure: FileStructure::default(),
                    chunks: vec![whole_file_chunk(path, bytes, language)],
                    content_hash: hash,
                    parse_error: Some(e.to_string()),
                };
            }
        }
    }

    ChunkedFile {
        language,
        structure: FileStructure::default(),
        chunks: vec![whole_file_chunk(path, bytes, language)],
        content_hash: hash,
        parse_error: None,
    }
}

fn structural_chunks(
    structure: &FileStructure,
    source: &str,
    imports: &[String],
    language: Language,
) -> Vec<CodeChunk> {
    let mut spans: Vec<(usize, usize, ChunkType, &str, &str)> = structure
        .functions
        .iter()
        .map(|f| {
            (
                f.start_byte,
                f.end_byte,
                ChunkType::Function,
                f.name.as_str(),
                f.signature.as_str(),
            )
        })
        .chain(structure.classes.iter().map(|c| {
            (
                c.start_byte,
                c.end_byte,
                ChunkType::Class,
                c.name.as_str(),
                c.signature.as_str(),
            )
        }))
        .collect();
    spans.sort_by_key(|(start, ..)| *start);

    spans
        .into_iter()
        .enumerate()
        .map(|(index, (start, end, chunk_type, name, signature))| CodeChunk {
            chunk_type,
            name: name.to_string(),
            signature: signature.to_string(),
            imports: imports.to_vec(),
            language,
            code: source.get(start..end).unwrap_or_default().to_string(),
            chunk_index: index,
            start_byte: start,
            end_byte: end,
        })
        .collect()
}

fn whole_file_chunk(path: &str, bytes: &[u8], language: Language) -> CodeChunk {
    let base_name = Path::new(path)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(path)
        .to_string();

    CodeChunk {
        chunk_type: ChunkType::File,
        name: base_name.clone(),
        signature: base_name,
        imports: Vec::new(),
        language,
        code: String::from_utf8_lossy(bytes).into_owned(),
        chunk_index: 0,
        start_byte: 0,
        end_byte: bytes.len(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MODULE: &str = "import os\nfrom typing import List\n\n\nclass Store:\n    def get(self):\n        return 1\n\n\ndef helper(x: int) -> int:\n    return x\n\n\n@cached\ndef other():\n    pass\n";

    #[test]
    fn test_python_chunks_in_declaration_order() {
        let chunked = chunk_file("pkg/store.py", MODULE.as_bytes(), Language::Python);
        assert!(chunked.parse_error.is_none());

        let names: Vec<&str> = chunked.chunks.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["Store", "helper", "other"]);

        let indices: Vec<usize> = chunked.chunks.iter().map(|c| c.chunk_index).collect();
        assert_eq!(indices, vec![0, 1, 2]);

        assert_eq!(chunked.chunks[0].chunk_type, ChunkType::Class);
        assert_eq!(chunked.chunks[1].signature, "def helper(x: int) -> int");
        for chunk in &chunked.chunks {
            assert_eq!(chunk.imports, vec!["import os", "from typing import List"]);
            assert_eq!(&MODULE[chunk.start_byte..chunk.end_byte], chunk.code);
        }
        // Methods travel inside their class
        assert!(chunked.chunks[0].code.contains("def get(self)"));
    }

    #[test]
    fn test_rechunking_is_stable() {
        let first = chunk_file("a.py", MODULE.as_bytes(), Language::Python);
        let second = chunk_file("a.py", MODULE.as_bytes(), Language::Python);
        assert_eq!(first.chunks, second.chunks);
        assert_eq!(first.content_hash, second.content_hash);
    }

    #[test]
    fn test_unsupported_language_whole_file() {
        let source = b"export function add(a, b) { return a + b; }\n";
        let chunked = chunk_file("web/src/math.js", source, Language::JavaScript);
        assert_eq!(chunked.chunks.len(), 1);

        let chunk = &chunked.chunks[0];
        assert_eq!(chunk.chunk_type, ChunkType::File);
        assert_eq!(chunk.name, "math.js");
        assert_eq!(chunk.signature, "math.js");
        assert_eq!(chunk.end_byte, source.len());
        assert!(chunk.imports.is_empty());
    }

    #[test]
    fn test_unparsable_python_degrades_to_whole_file() {
        let bytes = b"def f():\n    return '\xff'\n";
        let chunked = chunk_file("bad.py", bytes, Language::Python);
        assert!(chunked.parse_error.is_some());
        assert_eq!(chunked.chunks.len(), 1);
        assert_eq!(chunked.chunks[0].chunk_type, ChunkType::File);
        assert_eq!(chunked.chunks[0].name, "bad.py");
    }

    #[test]
    fn test_python_without_definitions_has_no_chunks() {
        let chunked = chunk_file("consts.py", b"VALUE = 1\n", Language::Python);
        assert!(chunked.chunks.is_empty());
        assert!(chunked.structure.is_empty());
    }
}
