//! Source fetching
//!
//! A `SourceFetcher` lists the tracked files of one repository and reads
//! their bytes. GitHub repositories go through the REST API; local
//! repositories are read from a checkout on disk.

mod github;
mod local;

pub use github::GitHubFetcher;
pub use local::LocalFetcher;

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::meta::{Repository, SourceType};

/// Read access to one repository's files
#[async_trait]
pub trait SourceFetcher: Send + Sync {
    /// Every tracked file path, `/`-separated and relative to the root
    async fn list_tracked_files(&self) -> Result<Vec<String>>;

    /// File bytes, or `None` when the path does not exist
    async fn read_file(&self, path: &str) -> Result<Option<Vec<u8>>>;

    /// Branch the files are read from
    async fn default_branch(&self) -> Result<String>;
}

/// Builds the fetcher for a registered repository
pub trait FetcherFactory: Send + Sync {
    fn fetcher_for(&self, repository: &Repository) -> Result<Arc<dyn SourceFetcher>>;
}

/// Picks the GitHub or local fetcher from the repository's source type
pub struct SourceRouter {
    config: Config,
}

impl SourceRouter {
    pub fn new(config: &Config) -> Self {
        Self {
            config: config.clone(),
        }
    }
}

impl FetcherFactory for SourceRouter {
    fn fetcher_for(&self, repository: &Repository) -> Result<Arc<dyn SourceFetcher>> {
        match repository.get_type()? {
            SourceType::Github => Ok(Arc::new(GitHubFetcher::new(
                &self.config.github,
                &repository.full_name,
                self.config.github_token(),
            )?)),
            SourceType::Local => {
                let root = repository.uri.as_deref().ok_or_else(|| {
                    Error::Config(format!(
                        "Local repository '{}' has no checkout path",
                        repository.full_name
                    ))
                })?;
                Ok(Arc::new(LocalFetcher::new(root)?))
            }
        }
    }
}

/// Reject paths that could escape the repository root
pub(crate) fn check_relative_path(path: &str) -> Result<()> {
    let escapes = path.starts_with('/')
        || path.contains('\\')
        || path.split('/').any(|part| part == ".." || part.is_empty());
    if escapes {
        return Err(Error::Fetch(format!("Invalid repository path: {path}")));
    }
    Ok(())
}
