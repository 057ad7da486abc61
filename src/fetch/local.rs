//! Local checkout fetcher

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use ignore::WalkBuilder;
use tracing::debug;

use super::{check_relative_path, SourceFetcher};
use crate::error::{Error, Result};

/// Reads files from a directory on disk, honouring `.gitignore`
pub struct LocalFetcher {
    root: PathBuf,
}

impl LocalFetcher {
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref();
        let root = root
            .canonicalize()
            .map_err(|e| Error::Fetch(format!("{}: {}", root.display(), e)))?;
        if !root.is_dir() {
            return Err(Error::Fetch(format!(
                "{} is not a directory",
                root.display()
            )));
        }
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn walk(root: &Path) -> Vec<String> {
        let walker = WalkBuilder::new(root)
            .hidden(false)
            .git_ignore(true)
            .git_exclude(true)
            .require_git(false)
            .filter_entry(|entry| entry.file_name() != ".git")
            .build();

        let mut paths: Vec<String> = walker
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_some_and(|t| t.is_file()))
            .filter_map(|entry| {
                let relative = entry.path().strip_prefix(root).ok()?;
                let parts: Vec<String> = relative
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy().into_owned())
                    .collect();
                Some(parts.join("/"))
            })
            .collect();
        paths.sort();
        paths
    }
}

#[async_trait]
impl SourceFetcher for LocalFetcher {
    async fn list_tracked_files(&self) -> Result<Vec<String>> {
        let root = self.root.clone();
        let paths = tokio::task::spawn_blocking(move || Self::walk(&root))
            .await
            .map_err(|e| Error::Fetch(format!("Directory walk failed: {}", e)))?;
        debug!(root = %self.root.display(), count = paths.len(), "Listed local files");
        Ok(paths)
    }

    async fn read_file(&self, path: &str) -> Result<Option<Vec<u8>>> {
        check_relative_path(path)?;
        match tokio::fs::read(self.root.join(path)).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::Fetch(format!("{}: {}", path, e))),
        }
    }

    async fn default_branch(&self) -> Result<String> {
        let head = self.root.join(".git").join("HEAD");
        let branch = tokio::fs::read_to_string(&head)
            .await
            .ok()
            .and_then(|content| {
                content
                    .trim()
                    .strip_prefix("ref: refs/heads/")
                    .map(str::to_string)
            })
            .unwrap_or_else(|| "local".to_string());
        Ok(branch)
    }
}
