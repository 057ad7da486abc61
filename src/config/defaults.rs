//! Default values for configuration

/// Default Qdrant URL for local development (gRPC port)
pub fn default_qdrant_url() -> String {
    std::env::var("QDRANT_URL").unwrap_or_else(|_| "http://127.0.0.1:6334".to_string())
}

/// Default environment variable name for Qdrant API key
pub fn default_qdrant_api_key_env() -> String {
    "QDRANT_API_KEY".to_string()
}

/// Default collection name
pub fn default_collection_name() -> String {
    "repoindex_code".to_string()
}

/// Default distance metric for the collection
pub fn default_distance() -> String {
    "cosine".to_string()
}

/// Default embedding backend
pub fn default_embedding_backend() -> String {
    "http".to_string()
}

/// Default embedding backend URL
pub fn default_embedding_url() -> String {
    std::env::var("REPOINDEX_EMBEDDING_URL").unwrap_or_else(|_| "http://127.0.0.1:7997".to_string())
}

/// Default embedding model (all-MiniLM-L6-v2)
pub fn default_embedding_model() -> String {
    "sentence-transformers/all-MiniLM-L6-v2".to_string()
}

/// Default embedding dimension for all-MiniLM-L6-v2
pub fn default_embedding_dimension() -> usize {
    384
}

/// Default batch size for embedding
pub fn default_embedding_batch_size() -> usize {
    32
}

/// Default embedding request timeout in seconds
pub fn default_embedding_timeout() -> u64 {
    30
}

/// Default GitHub REST API base URL
pub fn default_github_api_url() -> String {
    "https://api.github.com".to_string()
}

/// Default environment variable holding the GitHub token
pub fn default_github_token_env() -> String {
    "GITHUB_TOKEN".to_string()
}

/// Default environment variable holding the webhook secret
pub fn default_github_webhook_secret_env() -> String {
    "GITHUB_WEBHOOK_SECRET".to_string()
}

/// Default source-control request timeout in seconds
pub fn default_github_timeout() -> u64 {
    30
}

/// Extensions that are segmented and indexed
pub fn default_analysis_extensions() -> Vec<String> {
    [".py", ".js", ".ts"].iter().map(|s| s.to_string()).collect()
}

/// Directories never walked
pub fn default_ignored_dirs() -> Vec<String> {
    [".git", "node_modules", "__pycache__"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

/// Concurrent file downloads while materializing a workspace
pub fn default_fetch_concurrency() -> usize {
    8
}

/// File tree cache freshness window (one hour)
pub fn default_file_tree_ttl() -> u64 {
    3600
}

/// Vector store write attempts before giving up
pub fn default_index_retry_attempts() -> u32 {
    3
}

/// Initial backoff between vector store attempts (milliseconds)
pub fn default_index_retry_backoff_ms() -> u64 {
    500
}

/// Background jobs allowed to run at once
pub fn default_max_concurrent_jobs() -> usize {
    4
}
