//! GitHub REST API fetcher

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{header, Client, StatusCode};
use serde::Deserialize;
use tokio::sync::OnceCell;
use tracing::{debug, warn};
use url::Url;

use super::{check_relative_path, SourceFetcher};
use crate::config::GitHubConfig;
use crate::error::{Error, Result};

const RAW_MEDIA_TYPE: &str = "application/vnd.github.raw";
const JSON_MEDIA_TYPE: &str = "application/vnd.github+json";

#[derive(Debug, Deserialize)]
struct RepoResponse {
    default_branch: String,
}

#[derive(Debug, Deserialize)]
struct TreeResponse {
    tree: Vec<TreeEntry>,
    #[serde(default)]
    truncated: bool,
}

#[derive(Debug, Deserialize)]
struct TreeEntry {
    path: String,
    #[serde(rename = "type")]
    kind: String,
}

/// Reads an `owner/name` repository through the GitHub API
pub struct GitHubFetcher {
    client: Client,
    api_url: Url,
    owner: String,
    name: String,
    token: Option<String>,
    branch: OnceCell<String>,
}

impl GitHubFetcher {
    pub fn new(config: &GitHubConfig, full_name: &str, token: Option<String>) -> Result<Self> {
        let (owner, name) = full_name
            .split_once('/')
            .filter(|(o, n)| !o.is_empty() && !n.is_empty() && !n.contains('/'))
            .ok_or_else(|| {
                Error::Config(format!(
                    "GitHub repository must be 'owner/name', got '{}'",
                    full_name
                ))
            })?;

        let client = Client::builder()
            .user_agent(concat!("repoindex/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(config.timeout_secs))
            .gzip(true)
            .build()
            .map_err(|e| Error::Fetch(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            api_url: Url::parse(&config.api_url)?,
            owner: owner.to_string(),
            name: name.to_string(),
            token,
            branch: OnceCell::new(),
        })
    }

    fn endpoint<'a>(&self, segments: impl IntoIterator<Item = &'a str>) -> Result<Url> {
        let mut url = self.api_url.clone();
        url.path_segments_mut()
            .map_err(|_| Error::Config(format!("Invalid GitHub API URL: {}", self.api_url)))?
            .pop_if_empty()
            .extend(["repos", self.owner.as_str(), self.name.as_str()])
            .extend(segments);
        Ok(url)
    }

    fn get(&self, url: Url, accept: &str) -> reqwest::RequestBuilder {
        let request = self
            .client
            .get(url)
            .header(header::ACCEPT, accept)
            .header("X-GitHub-Api-Version", "2022-11-28");
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn get_json<T: for<'de> Deserialize<'de>>(&self, url: Url) -> Result<T> {
        let response = self
            .get(url.clone(), JSON_MEDIA_TYPE)
            .send()
            .await
            .map_err(|e| Error::Fetch(format!("GET {}: {}", url, e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::Fetch(format!("GET {} returned {}", url, status)));
        }

        response
            .json::<T>()
            .await
            .map_err(|e| Error::Fetch(format!("Malformed response from {}: {}", url, e)))
    }
}

#[async_trait]
impl SourceFetcher for GitHubFetcher {
    async fn list_tracked_files(&self) -> Result<Vec<String>> {
        let branch = self.default_branch().await?;
        let mut url = self.endpoint(["git", "trees", branch.as_str()])?;
        url.query_pairs_mut().append_pair("recursive", "1");

        let tree: TreeResponse = self.get_json(url).await?;
        if tree.truncated {
            warn!(
                repository = %format!("{}/{}", self.owner, self.name),
                "GitHub truncated the tree listing; some files will be missing"
            );
        }

        let mut paths: Vec<String> = tree
            .tree
            .into_iter()
            .filter(|entry| entry.kind == "blob")
            .map(|entry| entry.path)
            .collect();
        paths.sort();
        debug!(count = paths.len(), branch = %branch, "Listed tracked files");
        Ok(paths)
    }

    async fn read_file(&self, path: &str) -> Result<Option<Vec<u8>>> {
        check_relative_path(path)?;
        let branch = self.default_branch().await?;

        let mut url = self.endpoint(std::iter::once("contents").chain(path.split('/')))?;
        url.query_pairs_mut().append_pair("ref", &branch);

        let response = self
            .get(url, RAW_MEDIA_TYPE)
            .send()
            .await
            .map_err(|e| Error::Fetch(format!("{}: {}", path, e)))?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => {
                let bytes = response
                    .bytes()
                    .await
                    .map_err(|e| Error::Fetch(format!("{}: {}", path, e)))?;
                Ok(Some(bytes.to_vec()))
            }
            status => Err(Error::Fetch(format!("{}: GitHub returned {}", path, status))),
        }
    }

    async fn default_branch(&self) -> Result<String> {
        let branch = self
            .branch
            .get_or_try_init(|| async {
                let url = self.endpoint(std::iter::empty::<&str>())?;
                let repo: RepoResponse = self.get_json(url).await?;
                Ok::<_, Error>(repo.default_branch)
            })
            .await?;
        Ok(branch.clone())
    }
}
