//! Temporary per-repository workspaces for full analyses
//!
//! A `Workspace` owns its directory: dropping it removes the directory,
//! whichever way the owning job ends.

use std::path::{Path, PathBuf};

use futures::stream::{self, StreamExt};
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::fetch::SourceFetcher;

/// Outcome of copying files into a workspace
#[derive(Debug, Default)]
pub struct Materialized {
    /// Paths written, sorted
    pub written: Vec<String>,
    /// Listed paths the source no longer had
    pub missing: Vec<String>,
    /// Paths that could not be fetched, with the reason
    pub failed: Vec<(String, String)>,
}

/// Directory removed on drop
#[derive(Debug)]
pub struct Workspace {
    dir: PathBuf,
}

impl Workspace {
    /// Create a fresh workspace for `repository_id` under `root`, clearing
    /// anything a previous run left behind.
    pub async fn create(root: &Path, repository_id: i64) -> Result<Self> {
        let dir = root.join(format!("repo-{repository_id}"));
        if tokio::fs::try_exists(&dir).await.unwrap_or(false) {
            debug!(dir = %dir.display(), "Removing stale workspace");
            tokio::fs::remove_dir_all(&dir)
                .await
                .map_err(|e| Error::Workspace(format!("{}: {}", dir.display(), e)))?;
        }
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| Error::Workspace(format!("{}: {}", dir.display(), e)))?;
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        &self.dir
    }

    /// Fetch `paths` and write them into the workspace, `concurrency` at a
    /// time. Fetch failures are recorded per path; write failures abort.
    pub async fn materialize(
        &self,
        fetcher: &dyn SourceFetcher,
        paths: &[String],
        concurrency: usize,
    ) -> Result<Materialized> {
        let results: Vec<(String, Result<Option<Vec<u8>>>)> = stream::iter(paths.iter().cloned())
            .map(|path| async move {
                let result = fetcher.read_file(&path).await;
                (path, result)
            })
            .buffer_unordered(concurrency.max(1))
            .collect()
            .await;

        let mut materialized = Materialized::default();
        for (path, result) in results {
            match result {
                Ok(Some(bytes)) => {
                    self.write_file(&path, &bytes).await?;
                    materialized.written.push(path);
                }
                Ok(None) => {
                    debug!(path = %path, "Listed file disappeared before fetch");
                    materialized.missing.push(path);
                }
                Err(e) if e.is_path_scoped() => {
                    warn!(path = %path, error = %e, "Skipping file");
                    materialized.failed.push((path, e.to_string()));
                }
                Err(e) => return Err(e),
            }
        }

        materialized.written.sort();
        materialized.missing.sort();
        materialized.failed.sort();
        Ok(materialized)
    }

    async fn write_file(&self, path: &str, bytes: &[u8]) -> Result<()> {
        let target = self.dir.join(path);
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| Error::Workspace(format!("{}: {}", parent.display(), e)))?;
        }
        tokio::fs::write(&target, bytes)
            .await
            .map_err(|e| Error::Workspace(format!("{}: {}", target.display(), e)))
    }

    /// Read back a materialized file
    pub async fn read(&self, path: &str) -> Result<Vec<u8>> {
        tokio::fs::read(self.dir.join(path))
            .await
            .map_err(|e| Error::Workspace(format!("{}: {}", path, e)))
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_dir_all(&self.dir) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(dir = %self.dir.display(), error = %e, "Failed to remove workspace");
            }
        }
    }
}
