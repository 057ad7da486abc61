//! repoindex CLI entry point

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{generate, Shell};
use repoindex::{
    commands::{
        cmd_analyze, cmd_init, cmd_job, cmd_push, cmd_query, cmd_reconcile, cmd_repo_add,
        cmd_repo_list, cmd_repo_remove, cmd_snapshot, cmd_status, cmd_tree, print_job_status,
        print_push_outcome, print_query_results, print_repositories, print_snapshot,
        print_status, print_tree, PushOptions, RepoAddOptions,
    },
    config::Config,
    error::Result,
    meta::{JobState, MetaDb},
    progress::LogWriterFactory,
    reconcile::ChangeSet,
    store::{QdrantStore, VectorStore},
    IndexContext,
};
use serde::Serialize;
use std::path::PathBuf;
use tracing::error;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "repoindex")]
#[command(version, about = "Structural code indexing with incremental reconciliation", long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize repoindex configuration and database
    Init {
        /// Force overwrite existing config
        #[arg(long)]
        force: bool,
    },

    /// Manage registered repositories
    Repo {
        #[command(subcommand)]
        action: RepoAction,
    },

    /// Run a full analysis of a repository
    Analyze {
        /// Repository id or owner/name
        repo: String,
    },

    /// Re-index the given changed paths of a repository
    Reconcile {
        /// Repository id or owner/name
        repo: String,

        /// Added paths
        #[arg(long, value_delimiter = ',')]
        added: Vec<String>,

        /// Modified paths
        #[arg(long, value_delimiter = ',')]
        modified: Vec<String>,

        /// Removed paths
        #[arg(long, value_delimiter = ',')]
        removed: Vec<String>,
    },

    /// Apply a GitHub push webhook payload
    Push {
        /// File containing the raw payload body
        payload: PathBuf,

        /// Value of the X-Hub-Signature-256 header
        #[arg(long)]
        signature_256: Option<String>,

        /// Value of the legacy X-Hub-Signature header
        #[arg(long)]
        signature: Option<String>,

        /// Repository to update instead of the payload's repository
        #[arg(long)]
        repo: Option<String>,
    },

    /// Show a job's state and result
    Job {
        /// Job id
        id: String,
    },

    /// Show the latest analysis snapshot of a repository
    Snapshot {
        /// Repository id or owner/name
        repo: String,
    },

    /// Show a repository's indexable file tree
    Tree {
        /// Repository id or owner/name
        repo: String,
    },

    /// Semantic search over a repository's code
    Query {
        /// Repository id or owner/name
        repo: String,

        /// The search query
        query: String,

        /// Maximum number of results
        #[arg(short, long, default_value = "5")]
        limit: usize,

        /// Restrict to one file
        #[arg(long)]
        path: Option<String>,
    },

    /// Show system status
    Status,

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },

    /// Manage Qdrant vector database
    Db {
        #[command(subcommand)]
        action: DbAction,
    },
}

#[derive(Subcommand)]
enum RepoAction {
    /// Register a GitHub repository or a local checkout
    Add {
        /// owner/name on GitHub, or a display name with --path
        name: String,

        /// Index a local checkout instead of GitHub
        #[arg(long)]
        path: Option<PathBuf>,
    },

    /// List registered repositories
    List {
        /// Output only repository names (one per line, for scripting)
        #[arg(long)]
        names_only: bool,
    },

    /// Remove a repository and all its data
    Remove {
        /// Repository id or owner/name
        repo: String,
    },
}

/// Database management actions
#[derive(Subcommand)]
enum DbAction {
    /// Initialize/create the Qdrant collection
    Init,

    /// Show Qdrant collection status
    Status,

    /// Reset the collection (delete all vectors and recreate)
    Reset {
        /// Skip confirmation prompt
        #[arg(long)]
        yes: bool,
    },
}

#[tokio::main]
async fn main() {
    match run().await {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            error!("{}", e);
            std::process::exit(1);
        }
    }
}

async fn run() -> Result<i32> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(LogWriterFactory))
        .with(filter)
        .init();

    if let Commands::Init { force } = cli.command {
        handle_init(cli.config, force).await?;
        return Ok(0);
    }

    if let Commands::Completions { shell } = cli.command {
        let mut cmd = Cli::command();
        generate(shell, &mut cmd, "repoindex", &mut std::io::stdout());
        return Ok(0);
    }

    let config = load_config(cli.config.as_deref())?;

    if let Commands::Db { action } = cli.command {
        handle_db_action(&config, action, cli.json).await?;
        return Ok(0);
    }

    let ctx = IndexContext::open(&config).await?;
    let json = cli.json;

    match cli.command {
        Commands::Init { .. } | Commands::Completions { .. } | Commands::Db { .. } => {
            unreachable!()
        }

        Commands::Repo { action } => handle_repo_action(&ctx, action, json).await?,

        Commands::Analyze { repo } => {
            let status = cmd_analyze(&ctx, &repo).await?;
            output(json, &status, print_job_status)?;
            return Ok(exit_code(status.state));
        }

        Commands::Reconcile {
            repo,
            added,
            modified,
            removed,
        } => {
            let changes = ChangeSet {
                added,
                modified,
                removed,
            };
            let status = cmd_reconcile(&ctx, &repo, changes).await?;
            output(json, &status, print_job_status)?;
            return Ok(exit_code(status.state));
        }

        Commands::Push {
            payload,
            signature_256,
            signature,
            repo,
        } => {
            let secret = config.webhook_secret();
            let options = PushOptions {
                payload,
                signature_256,
                signature,
                repository: repo,
            };
            let outcome = cmd_push(&ctx, secret.as_deref(), options).await?;
            output(json, &outcome, print_push_outcome)?;
        }

        Commands::Job { id } => {
            let status = cmd_job(&ctx, &id).await?;
            output(json, &status, print_job_status)?;
        }

        Commands::Snapshot { repo } => {
            let view = cmd_snapshot(&ctx, &repo).await?;
            output(json, &view, print_snapshot)?;
        }

        Commands::Tree { repo } => {
            let view = cmd_tree(&ctx, &repo).await?;
            output(json, &view, print_tree)?;
        }

        Commands::Query {
            repo,
            query,
            limit,
            path,
        } => {
            let results = cmd_query(&ctx, &repo, &query, limit, path.as_deref()).await?;
            output(json, &results, print_query_results)?;
        }

        Commands::Status => {
            let status = cmd_status(&config, &ctx).await?;
            output(json, &status, print_status)?;
        }
    }

    Ok(0)
}

fn output<T: Serialize>(json: bool, value: &T, print: fn(&T)) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(value)?);
    } else {
        print(value);
    }
    Ok(())
}

fn exit_code(state: JobState) -> i32 {
    match state {
        JobState::Failed => 1,
        _ => 0,
    }
}

async fn handle_init(config: Option<PathBuf>, force: bool) -> Result<()> {
    // A .toml path names the file; anything else names the base directory
    let (base_dir, config_path) = match config {
        Some(path) if path.extension().is_some_and(|e| e == "toml") => {
            let base = path
                .parent()
                .map(PathBuf::from)
                .unwrap_or_else(Config::default_base_dir);
            (base, path)
        }
        Some(dir) => (dir.clone(), dir.join("config.toml")),
        None => {
            let base = Config::default_base_dir();
            (base.clone(), base.join("config.toml"))
        }
    };

    let config = cmd_init(base_dir, config_path.clone(), force).await?;

    match QdrantStore::connect(&config).await {
        Ok(store) => match store.ensure_collection(false).await {
            Ok(()) => tracing::info!("Qdrant collection '{}' ready", config.collection_name),
            Err(e) => tracing::warn!(
                "Could not create Qdrant collection: {}. Run 'repoindex db init' later.",
                e
            ),
        },
        Err(e) => tracing::warn!("Could not connect to Qdrant: {}", e),
    }

    println!("✓ repoindex initialized successfully");
    println!("  Config: {}", config_path.display());
    println!("  Database: {}", config.paths.db_file.display());
    println!("\nNext steps:");
    println!("  1. Start Qdrant: docker run -p 6333:6333 -p 6334:6334 qdrant/qdrant");
    println!("  2. Start an embedding backend at {}", config.embedding.url);
    println!("  3. Register a repository: repoindex repo add owner/name");
    println!("  4. Index it: repoindex analyze owner/name");

    Ok(())
}

async fn handle_repo_action(ctx: &IndexContext, action: RepoAction, json: bool) -> Result<()> {
    match action {
        RepoAction::Add { name, path } => {
            let repository = cmd_repo_add(ctx.db(), RepoAddOptions { name, path }).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&repository)?);
            } else {
                println!(
                    "✓ Registered {} [{}] with id {}",
                    repository.full_name, repository.source_type, repository.id
                );
            }
        }
        RepoAction::List { names_only } => {
            let repositories = cmd_repo_list(ctx.db()).await?;
            if names_only {
                for info in &repositories {
                    println!("{}", info.repository.full_name);
                }
            } else {
                output(json, &repositories, |r: &Vec<_>| print_repositories(r))?;
            }
        }
        RepoAction::Remove { repo } => {
            let repository = cmd_repo_remove(ctx, &repo).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&repository)?);
            } else {
                println!("✓ Repository '{}' removed", repository.full_name);
            }
        }
    }
    Ok(())
}

async fn handle_db_action(config: &Config, action: DbAction, json: bool) -> Result<()> {
    let store = QdrantStore::connect(config).await?;

    match action {
        DbAction::Init => {
            store.ensure_collection(false).await?;
            MetaDb::new(&config.paths.db_file).await?;
            if json {
                println!(r#"{{"status": "ok", "message": "Collection initialized"}}"#);
            } else {
                println!("✓ Qdrant collection initialized");
            }
        }
        DbAction::Status => match store.collection_info().await? {
            Some(info) => {
                if json {
                    println!(
                        r#"{{"exists": true, "points_count": {}, "indexed_vectors_count": {}, "status": "{}"}}"#,
                        info.points_count, info.indexed_vectors_count, info.status
                    );
                } else {
                    println!("Qdrant Collection Status:");
                    println!("  Status: {}", info.status);
                    println!("  Points: {}", info.points_count);
                    println!("  Indexed Vectors: {}", info.indexed_vectors_count);
                }
            }
            None => {
                if json {
                    println!(r#"{{"exists": false}}"#);
                } else {
                    println!("Collection does not exist. Run 'repoindex db init' to create it.");
                }
            }
        },
        DbAction::Reset { yes } => {
            if !yes {
                eprintln!("⚠️  This will delete ALL indexed vectors!");
                eprintln!("Run with --yes to confirm.");
                std::process::exit(1);
            }
            store.ensure_collection(true).await?;
            if json {
                println!(r#"{{"status": "ok", "message": "Collection reset"}}"#);
            } else {
                println!("✓ Qdrant collection reset. Re-run 'repoindex analyze' for each repository.");
            }
        }
    }

    Ok(())
}

fn load_config(path: Option<&std::path::Path>) -> Result<Config> {
    let config_path = path
        .map(PathBuf::from)
        .unwrap_or_else(Config::default_config_path);

    if !config_path.exists() {
        eprintln!(
            "Config file not found: {}\nRun 'repoindex init' first.",
            config_path.display()
        );
        std::process::exit(1);
    }

    Config::load(&config_path)
}
