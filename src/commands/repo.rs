//! Repository registry commands

use std::path::PathBuf;

use serde::Serialize;
use tracing::info;

use crate::context::IndexContext;
use crate::error::{Error, Result};
use crate::meta::{MetaDb, Repository, SourceType};
use crate::snapshot::{get_status, AnalysisStatus};

/// Options for `repo add`
#[derive(Debug, Clone)]
pub struct RepoAddOptions {
    /// `owner/name` for GitHub; any display name for a local checkout
    pub name: String,
    /// Local checkout to index instead of GitHub
    pub path: Option<PathBuf>,
}

/// A repository with its indexing state
#[derive(Debug, Clone, Serialize)]
pub struct RepositoryInfo {
    #[serde(flatten)]
    pub repository: Repository,
    pub file_count: usize,
    pub analysis: Option<AnalysisStatus>,
}

/// Register a repository
pub async fn cmd_repo_add(db: &MetaDb, options: RepoAddOptions) -> Result<Repository> {
    let name = options.name.trim();
    if db.get_repository_by_name(name).await?.is_some() {
        return Err(Error::InvalidArgument(format!(
            "repository '{name}' is already registered"
        )));
    }

    let repository = match options.path {
        Some(path) => {
            let root = std::fs::canonicalize(&path)?;
            if !root.is_dir() {
                return Err(Error::InvalidArgument(format!(
                    "{} is not a directory",
                    path.display()
                )));
            }
            if name.is_empty() {
                return Err(Error::InvalidArgument("name is required".to_string()));
            }
            let uri = root.display().to_string();
            db.insert_repository(name, SourceType::Local, Some(&uri))
                .await?
        }
        None => {
            validate_github_name(name)?;
            db.insert_repository(name, SourceType::Github, None).await?
        }
    };

    info!(
        repository_id = repository.id,
        name = %repository.full_name,
        source_type = %repository.source_type,
        "Registered repository"
    );
    Ok(repository)
}

fn validate_github_name(name: &str) -> Result<()> {
    let valid = match name.split_once('/') {
        Some((owner, repo)) => {
            !owner.is_empty() && !repo.is_empty() && !repo.contains('/') && !name.contains(' ')
        }
        None => false,
    };
    if valid {
        Ok(())
    } else {
        Err(Error::InvalidArgument(format!(
            "GitHub repositories are named 'owner/name' (got '{name}')"
        )))
    }
}

/// All repositories with file counts and analysis status
pub async fn cmd_repo_list(db: &MetaDb) -> Result<Vec<RepositoryInfo>> {
    let repositories = db.list_repositories().await?;
    let mut infos = Vec::with_capacity(repositories.len());
    for repository in repositories {
        infos.push(RepositoryInfo {
            file_count: db.count_file_records(repository.id).await?,
            analysis: get_status(db, repository.id).await?,
            repository,
        });
    }
    Ok(infos)
}

/// Remove a repository, its vector points and all of its rows
pub async fn cmd_repo_remove(ctx: &IndexContext, reference: &str) -> Result<Repository> {
    let repository = ctx.repository(reference).await?;
    ctx.remove_repository(repository.id).await?;
    Ok(repository)
}

pub fn print_repositories(repositories: &[RepositoryInfo]) {
    println!("\n📚 Registered Repositories\n");

    if repositories.is_empty() {
        println!("No repositories registered. Use 'repoindex repo add' to add one.");
        return;
    }

    for info in repositories {
        let repo = &info.repository;
        println!("• {} [{}]", repo.full_name, repo.source_type);
        println!("  ID: {}", repo.id);
        if let Some(uri) = &repo.uri {
            println!("  Path: {}", uri);
        }
        if let Some(branch) = &repo.default_branch {
            println!("  Branch: {}", branch);
        }
        println!("  Files indexed: {}", info.file_count);
        match &info.analysis {
            Some(status) => match &status.error {
                Some(error) => println!("  Analysis: {} ({})", status.status, error),
                None => println!("  Analysis: {} at {}", status.status, status.updated_at),
            },
            None => println!("  Analysis: never run"),
        }
        println!();
    }
}
