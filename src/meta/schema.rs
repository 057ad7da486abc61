//! SQLite schema definition

/// SQL schema for the metadata database
pub const SCHEMA_SQL: &str = r#"
-- Repositories: root of every other row
CREATE TABLE IF NOT EXISTS repositories (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    full_name TEXT NOT NULL UNIQUE,
    source_type TEXT NOT NULL,
    uri TEXT,
    default_branch TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

-- Repository cache: one slot per (repository, cache type)
CREATE TABLE IF NOT EXISTS repository_cache (
    repository_id INTEGER NOT NULL REFERENCES repositories(id),
    cache_type TEXT NOT NULL,
    payload_json TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    PRIMARY KEY (repository_id, cache_type)
);

-- Repository files: latest parsed payload per path
CREATE TABLE IF NOT EXISTS repository_files (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    repository_id INTEGER NOT NULL REFERENCES repositories(id),
    path TEXT NOT NULL,
    language TEXT NOT NULL,
    payload_json TEXT NOT NULL,
    content_hash TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    UNIQUE(repository_id, path)
);

-- Jobs: background analysis and reconciliation tracking
CREATE TABLE IF NOT EXISTS jobs (
    id TEXT PRIMARY KEY,
    kind TEXT NOT NULL,
    repository_id INTEGER NOT NULL,
    state TEXT NOT NULL,
    result_json TEXT,
    error TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

-- Indexes for performance
CREATE INDEX IF NOT EXISTS idx_files_repository ON repository_files(repository_id);
CREATE INDEX IF NOT EXISTS idx_jobs_repository ON jobs(repository_id);
CREATE INDEX IF NOT EXISTS idx_jobs_state ON jobs(state);
"#;
