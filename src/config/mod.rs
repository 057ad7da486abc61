//! Configuration management for repoindex
//!
//! Handles loading, saving, and validating configuration from TOML files.

mod defaults;

pub use defaults::*;

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Qdrant connection URL
    #[serde(default = "default_qdrant_url")]
    pub qdrant_url: String,

    /// Environment variable name for Qdrant API key
    #[serde(default = "default_qdrant_api_key_env")]
    pub qdrant_api_key_env: String,

    /// Qdrant collection name
    #[serde(default = "default_collection_name")]
    pub collection_name: String,

    /// Distance metric ("cosine", "dot", "euclid", "manhattan")
    #[serde(default = "default_distance")]
    pub distance: String,

    /// Embedding model configuration
    #[serde(default)]
    pub embedding: EmbeddingConfig,

    /// Source-control provider configuration
    #[serde(default)]
    pub github: GitHubConfig,

    /// Full analysis configuration
    #[serde(default)]
    pub analysis: AnalysisConfig,

    /// Vector index write policy
    #[serde(default)]
    pub index: IndexConfig,

    /// Background job pool
    #[serde(default)]
    pub worker: WorkerConfig,

    /// Paths configuration (internal, not user-editable)
    #[serde(skip)]
    pub paths: PathsConfig,
}

/// Embedding configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// Backend kind ("http" or "local")
    #[serde(default = "default_embedding_backend")]
    pub backend: String,

    /// Base URL of the HTTP embedding backend
    #[serde(default = "default_embedding_url")]
    pub url: String,

    /// Model name/identifier
    #[serde(default = "default_embedding_model")]
    pub model: String,

    /// Embedding dimension (must match model)
    #[serde(default = "default_embedding_dimension")]
    pub dimension: usize,

    /// Batch size for embedding
    #[serde(default = "default_embedding_batch_size")]
    pub batch_size: usize,

    /// Request timeout in seconds
    #[serde(default = "default_embedding_timeout")]
    pub timeout_secs: u64,
}

/// GitHub configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitHubConfig {
    /// REST API base URL
    #[serde(default = "default_github_api_url")]
    pub api_url: String,

    /// Environment variable holding the access token
    #[serde(default = "default_github_token_env")]
    pub token_env: String,

    /// Environment variable holding the push webhook secret
    #[serde(default = "default_github_webhook_secret_env")]
    pub webhook_secret_env: String,

    /// Request timeout in seconds
    #[serde(default = "default_github_timeout")]
    pub timeout_secs: u64,
}

/// Full analysis configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisConfig {
    /// File extensions (with leading dot) that are analysed and indexed
    #[serde(default = "default_analysis_extensions")]
    pub extensions: Vec<String>,

    /// Directory names skipped while walking
    #[serde(default = "default_ignored_dirs")]
    pub ignored_dirs: Vec<String>,

    /// Concurrent file downloads while materializing a workspace
    #[serde(default = "default_fetch_concurrency")]
    pub fetch_concurrency: usize,

    /// Seconds a cached file tree stays fresh
    #[serde(default = "default_file_tree_ttl")]
    pub file_tree_ttl_secs: u64,

    /// Override for the temporary workspace root
    #[serde(default)]
    pub workspace_dir: Option<PathBuf>,
}

/// Vector index write policy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexConfig {
    /// Attempts per store operation before the job fails
    #[serde(default = "default_index_retry_attempts")]
    pub retry_attempts: u32,

    /// Initial backoff in milliseconds, doubled per attempt
    #[serde(default = "default_index_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
}

/// Worker pool configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Jobs allowed to run concurrently across repositories
    #[serde(default = "default_max_concurrent_jobs")]
    pub max_concurrent_jobs: usize,
}

/// Internal paths configuration
#[derive(Debug, Clone, Default)]
pub struct PathsConfig {
    /// Base directory for repoindex data
    pub base_dir: PathBuf,

    /// Path to config file
    pub config_file: PathBuf,

    /// Path to SQLite database
    pub db_file: PathBuf,

    /// Root for temporary analysis workspaces
    pub workspace_dir: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            qdrant_url: default_qdrant_url(),
            qdrant_api_key_env: default_qdrant_api_key_env(),
            collection_name: default_collection_name(),
            distance: default_distance(),
            embedding: EmbeddingConfig::default(),
            github: GitHubConfig::default(),
            analysis: AnalysisConfig::default(),
            index: IndexConfig::default(),
            worker: WorkerConfig::default(),
            paths: PathsConfig::default(),
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            backend: default_embedding_backend(),
            url: default_embedding_url(),
            model: default_embedding_model(),
            dimension: default_embedding_dimension(),
            batch_size: default_embedding_batch_size(),
            timeout_secs: default_embedding_timeout(),
        }
    }
}

impl Default for GitHubConfig {
    fn default() -> Self {
        Self {
            api_url: default_github_api_url(),
            token_env: default_github_token_env(),
            webhook_secret_env: default_github_webhook_secret_env(),
            timeout_secs: default_github_timeout(),
        }
    }
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            extensions: default_analysis_extensions(),
            ignored_dirs: default_ignored_dirs(),
            fetch_concurrency: default_fetch_concurrency(),
            file_tree_ttl_secs: default_file_tree_ttl(),
            workspace_dir: None,
        }
    }
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            retry_attempts: default_index_retry_attempts(),
            retry_backoff_ms: default_index_retry_backoff_ms(),
        }
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: default_max_concurrent_jobs(),
        }
    }
}

impl AnalysisConfig {
    /// Whether `path` carries an allow-listed extension
    pub fn is_supported_path(&self, path: &str) -> bool {
        let Some(ext) = extension_of(path) else {
            return false;
        };
        self.extensions
            .iter()
            .any(|allowed| allowed.trim_start_matches('.').eq_ignore_ascii_case(ext))
    }

    /// Whether any directory component of `path` is ignored
    pub fn is_ignored_path(&self, path: &str) -> bool {
        let mut parts: Vec<&str> = path.split('/').collect();
        parts.pop();
        parts
            .iter()
            .any(|part| self.ignored_dirs.iter().any(|dir| dir == part))
    }

    /// Allow-listed and outside ignored directories
    pub fn should_index(&self, path: &str) -> bool {
        self.is_supported_path(path) && !self.is_ignored_path(path)
    }

    pub fn file_tree_ttl(&self) -> Duration {
        Duration::from_secs(self.file_tree_ttl_secs)
    }
}

fn extension_of(path: &str) -> Option<&str> {
    let file_name = path.rsplit('/').next()?;
    let (stem, ext) = file_name.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() {
        return None;
    }
    Some(ext)
}

impl IndexConfig {
    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

impl Config {
    /// Get the default base directory for repoindex (~/.repoindex)
    pub fn default_base_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".repoindex")
    }

    /// Get the default config file path
    pub fn default_config_path() -> PathBuf {
        Self::default_base_dir().join("config.toml")
    }

    fn paths_for(base: PathBuf, config_file: PathBuf, workspace_override: Option<&Path>) -> PathsConfig {
        let workspace_dir = workspace_override
            .map(Path::to_path_buf)
            .unwrap_or_else(|| std::env::temp_dir().join("repoindex").join("repos"));
        PathsConfig {
            config_file,
            db_file: base.join("metadata.db"),
            workspace_dir,
            base_dir: base,
        }
    }

    /// Initialize paths configuration
    pub fn init_paths(&mut self, base_dir: Option<PathBuf>) {
        let base = base_dir.unwrap_or_else(Self::default_base_dir);
        self.paths = Self::paths_for(
            base.clone(),
            base.join("config.toml"),
            self.analysis.workspace_dir.as_deref(),
        );
    }

    /// Load configuration from a specific file path
    pub fn load(config_path: &Path) -> Result<Self> {
        debug!("Loading config from {:?}", config_path);

        if !config_path.exists() {
            return Err(Error::Config(format!(
                "Config file not found: {}",
                config_path.display()
            )));
        }

        let content = std::fs::read_to_string(config_path)?;
        let mut config: Config = toml::from_str(&content)?;

        // Set up paths based on config file location
        let base = config_path
            .parent()
            .unwrap_or(Path::new("."))
            .to_path_buf();
        config.paths = Self::paths_for(
            base,
            config_path.to_path_buf(),
            config.analysis.workspace_dir.as_deref(),
        );

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from default location
    pub fn load_default() -> Result<Self> {
        Self::load(&Self::default_config_path())
    }

    /// Load configuration from a specific base directory
    pub fn load_from(base_dir: Option<PathBuf>) -> Result<Self> {
        let mut config = Config::default();
        config.init_paths(base_dir);

        if config.paths.config_file.exists() {
            debug!("Loading config from {:?}", config.paths.config_file);
            let content = std::fs::read_to_string(&config.paths.config_file)?;
            let mut loaded: Config = toml::from_str(&content)?;
            loaded.paths = Self::paths_for(
                config.paths.base_dir.clone(),
                config.paths.config_file.clone(),
                loaded.analysis.workspace_dir.as_deref(),
            );
            config = loaded;
        } else {
            debug!("No config file found, using defaults");
        }

        config.validate()?;
        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.paths.config_file.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(&self.paths.config_file, content)?;
        info!("Saved config to {:?}", self.paths.config_file);
        Ok(())
    }

    /// Get the Qdrant API key from environment
    pub fn qdrant_api_key(&self) -> Option<String> {
        std::env::var(&self.qdrant_api_key_env).ok()
    }

    /// Get the GitHub token from environment
    pub fn github_token(&self) -> Option<String> {
        std::env::var(&self.github.token_env)
            .ok()
            .filter(|token| !token.is_empty())
    }

    /// Get the push webhook secret from environment
    pub fn webhook_secret(&self) -> Option<String> {
        std::env::var(&self.github.webhook_secret_env)
            .ok()
            .filter(|secret| !secret.is_empty())
    }

    /// Check if repoindex is initialized (config and DB exist)
    pub fn is_initialized(&self) -> bool {
        self.paths.config_file.exists() && self.paths.db_file.exists()
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.collection_name.trim().is_empty() {
            return Err(Error::Config("collection_name must not be empty".to_string()));
        }

        if !matches!(
            self.distance.to_lowercase().as_str(),
            "cosine" | "dot" | "euclid" | "manhattan"
        ) {
            return Err(Error::Config(format!(
                "distance must be one of cosine, dot, euclid, manhattan (got '{}')",
                self.distance
            )));
        }

        if self.embedding.dimension == 0 {
            return Err(Error::Config(
                "embedding.dimension must be positive".to_string(),
            ));
        }

        if self.embedding.batch_size == 0 {
            return Err(Error::Config(
                "embedding.batch_size must be positive".to_string(),
            ));
        }

        if self.analysis.extensions.is_empty() {
            return Err(Error::Config(
                "analysis.extensions must list at least one extension".to_string(),
            ));
        }

        if self.analysis.fetch_concurrency == 0 {
            return Err(Error::Config(
                "analysis.fetch_concurrency must be positive".to_string(),
            ));
        }

        if self.index.retry_attempts == 0 {
            return Err(Error::Config(
                "index.retry_attempts must be at least 1".to_string(),
            ));
        }

        if self.worker.max_concurrent_jobs == 0 {
            return Err(Error::Config(
                "worker.max_concurrent_jobs must be positive".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.collection_name, "repoindex_code");
        assert_eq!(config.analysis.file_tree_ttl_secs, 3600);
        assert_eq!(config.embedding.dimension, 384);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_save_load() {
        let tmp = TempDir::new().unwrap();
        let mut config = Config::default();
        config.init_paths(Some(tmp.path().to_path_buf()));
        config.collection_name = "test_collection".to_string();
        config.worker.max_concurrent_jobs = 2;

        config.save().unwrap();
        assert!(config.paths.config_file.exists());

        let loaded = Config::load_from(Some(tmp.path().to_path_buf())).unwrap();
        assert_eq!(loaded.collection_name, "test_collection");
        assert_eq!(loaded.worker.max_concurrent_jobs, 2);
        assert_eq!(loaded.paths.db_file, tmp.path().join("metadata.db"));
    }

    #[test]
    fn test_config_validation() {
        let mut config = Config::default();

        config.distance = "hamming".to_string();
        assert!(config.validate().is_err());

        config.distance = "Dot".to_string();
        assert!(config.validate().is_ok());

        config.index.retry_attempts = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_supported_paths() {
        let analysis = AnalysisConfig::default();
        assert!(analysis.should_index("src/app.py"));
        assert!(analysis.should_index("web/index.TS"));
        assert!(!analysis.should_index("README.md"));
        assert!(!analysis.should_index("node_modules/lib/index.js"));
        assert!(!analysis.should_index("pkg/__pycache__/mod.py"));
        assert!(!analysis.should_index(".py"));
    }
}
