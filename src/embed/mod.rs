//! Embedding generation
//!
//! This module provides an abstraction over embedding models with:
//! - A trait for different embedding backends
//! - HTTP embedding backend (default)
//! - Local FastEmbed backend behind the `local-embed` feature
//! - Batch processing for efficiency

#[cfg(feature = "local-embed")]
mod fastembed_impl;
mod http_backend;

#[cfg(feature = "local-embed")]
pub use fastembed_impl::FastEmbedder;
pub use http_backend::*;

use crate::config::EmbeddingConfig;
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::sync::Arc;

/// Trait for embedding providers
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed a batch of texts. Fails with `Error::Embedding` if any text is
    /// empty or whitespace-only.
    async fn embed(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>>;

    /// Embed a single text
    async fn embed_one(&self, text: &str) -> Result<Vec<f32>> {
        self.embed(vec![text.to_string()])
            .await?
            .pop()
            .ok_or_else(|| Error::Embedding("Backend returned no embedding".to_string()))
    }

    /// Get the embedding dimension
    fn dimension(&self) -> usize;

    /// Get the model name
    fn model_name(&self) -> &str;
}

/// Reject empty or whitespace-only inputs before they reach a backend
pub fn validate_texts(texts: &[String]) -> Result<()> {
    if let Some(position) = texts.iter().position(|t| t.trim().is_empty()) {
        return Err(Error::Embedding(format!(
            "Cannot embed empty text (input {position})"
        )));
    }
    Ok(())
}

/// Create an embedder based on configuration
pub fn create_embedder(config: &EmbeddingConfig) -> Result<Arc<dyn Embedder>> {
    match config.backend.to_lowercase().as_str() {
        "http" | "https" => Ok(Arc::new(HttpEmbedder::new(config)?)),
        #[cfg(feature = "local-embed")]
        "local" | "fastembed" => Ok(Arc::new(FastEmbedder::new(config)?)),
        #[cfg(not(feature = "local-embed"))]
        "local" | "fastembed" => Err(Error::Config(
            "Local embeddings require building with the 'local-embed' feature".to_string(),
        )),
        other => Err(Error::Config(format!(
            "Unsupported embedding backend '{}'; expected 'http' or 'local'",
            other
        ))),
    }
}

/// Helper to embed in batches
pub async fn embed_in_batches(
    embedder: &dyn Embedder,
    texts: Vec<String>,
    batch_size: usize,
) -> Result<Vec<Vec<f32>>> {
    let mut all_embeddings = Vec::with_capacity(texts.len());

    for chunk in texts.chunks(batch_size.max(1)) {
        let batch_texts: Vec<String> = chunk.to_vec();
        let embeddings = embedder.embed(batch_texts).await?;
        all_embeddings.extend(embeddings);
    }

    Ok(all_embeddings)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_texts() {
        assert!(validate_texts(&["def f(): pass".to_string()]).is_ok());
        assert!(matches!(
            validate_texts(&["ok".to_string(), "  \n".to_string()]),
            Err(Error::Embedding(_))
        ));
        assert!(matches!(
            validate_texts(&[String::new()]),
            Err(Error::Embedding(_))
        ));
    }

    #[test]
    fn test_batch_splitting() {
        let texts: Vec<String> = (0..10).map(|i| format!("text {}", i)).collect();
        let chunks: Vec<_> = texts.chunks(3).collect();

        assert_eq!(chunks.len(), 4); // 3 + 3 + 3 + 1
        assert_eq!(chunks[0].len(), 3);
        assert_eq!(chunks[3].len(), 1);
    }

    #[test]
    fn test_unknown_backend_rejected() {
        let config = EmbeddingConfig {
            backend: "carrier-pigeon".to_string(),
            ..EmbeddingConfig::default()
        };
        assert!(matches!(create_embedder(&config), Err(Error::Config(_))));
    }
}
