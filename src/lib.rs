//! repoindex - structural code indexing for repositories
//!
//! Fetches a repository's tracked files, extracts Python structure with
//! tree-sitter, embeds one chunk per top-level definition and keeps a
//! Qdrant collection in step with pushes through incremental
//! reconciliation.

pub mod analysis;
pub mod chunk;
pub mod commands;
pub mod config;
pub mod context;
pub mod downstream;
pub mod embed;
pub mod error;
pub mod fetch;
pub mod file_tree;
pub mod indexer;
pub mod jobs;
pub mod language;
pub mod meta;
pub mod progress;
pub mod reconcile;
pub mod segment;
pub mod snapshot;
pub mod store;
pub mod webhook;
pub mod workspace;

#[cfg(test)]
mod testing;

pub use context::IndexContext;
pub use error::{Error, Result};
