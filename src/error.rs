//! Custom error types for repoindex

use thiserror::Error;

/// Main error type for repoindex operations
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Source unreachable or path missing
    #[error("Fetch error: {0}")]
    Fetch(String),

    /// Source bytes the grammar cannot tokenize
    #[error("Parse error{}: {message}", offset_suffix(.offset))]
    Parse {
        message: String,
        offset: Option<usize>,
    },

    /// Backend unreachable, timed out or answered malformed
    #[error("Embedding error: {0}")]
    Embedding(String),

    /// Backend refused one input's content
    #[error("Embedding rejected: {0}")]
    EmbeddingRejected(String),

    /// Vector store write/delete/search failure
    #[error("Index error: {0}")]
    Index(String),

    /// Clone/workspace setup failure
    #[error("Workspace error: {0}")]
    Workspace(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("Repository not found: {0}")]
    RepositoryNotFound(String),

    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("Full analysis already running for repository {0}")]
    AnalysisInProgress(i64),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Webhook signature rejected: {0}")]
    Signature(String),

    #[error("Not initialized: run 'repoindex init' first")]
    NotInitialized,

    #[error("Already initialized at {0}")]
    AlreadyInitialized(String),

    #[error("{0}")]
    Other(String),
}

fn offset_suffix(offset: &Option<usize>) -> String {
    offset.map(|o| format!(" at byte {o}")).unwrap_or_default()
}

impl Error {
    pub fn parse(message: impl Into<String>, offset: Option<usize>) -> Self {
        Error::Parse {
            message: message.into(),
            offset,
        }
    }

    /// Errors that only affect the file being processed. Everything else
    /// (store, database, workspace) aborts the owning job.
    pub fn is_path_scoped(&self) -> bool {
        matches!(
            self,
            Error::Fetch(_)
                | Error::Parse { .. }
                | Error::Embedding(_)
                | Error::EmbeddingRejected(_)
        )
    }
}

impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Error::Other(err.to_string())
    }
}

/// Result type alias for repoindex
pub type Result<T> = std::result::Result<T, Error>;

/// Convert qdrant errors
impl From<qdrant_client::QdrantError> for Error {
    fn from(err: qdrant_client::QdrantError) -> Self {
        Error::Index(err.to_string())
    }
}
