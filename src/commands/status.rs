//! Status command implementation

use serde::Serialize;
use tracing::{debug, info};

use crate::config::Config;
use crate::context::IndexContext;
use crate::error::Result;
use crate::meta::GlobalStats;
use crate::store::CollectionInfo;

/// Status information
#[derive(Debug, Clone, Serialize)]
pub struct StatusInfo {
    pub config_path: String,
    pub db_path: String,
    pub qdrant_url: String,
    pub collection_name: String,
    pub embedding_model: String,
    pub qdrant_connected: bool,
    pub collection: Option<CollectionInfo>,
    pub db_stats: GlobalStats,
}

/// Database counts plus the vector collection's state
pub async fn cmd_status(config: &Config, ctx: &IndexContext) -> Result<StatusInfo> {
    info!("Getting status");

    let db_stats = ctx.db().get_global_stats().await?;

    let (qdrant_connected, collection) = match ctx.index().store().collection_info().await {
        Ok(info) => (true, info),
        Err(e) => {
            debug!("Qdrant connection error: {:?}", e);
            (false, None)
        }
    };

    Ok(StatusInfo {
        config_path: config.paths.config_file.display().to_string(),
        db_path: config.paths.db_file.display().to_string(),
        qdrant_url: config.qdrant_url.clone(),
        collection_name: config.collection_name.clone(),
        embedding_model: config.embedding.model.clone(),
        qdrant_connected,
        collection,
        db_stats,
    })
}

/// Print status to console
pub fn print_status(status: &StatusInfo) {
    println!("\n📊 repoindex Status\n");
    println!("Configuration: {}", status.config_path);
    println!("Database: {}", status.db_path);
    println!("\nQdrant:");
    println!("  URL: {}", status.qdrant_url);
    println!("  Collection: {}", status.collection_name);

    let connection_status = match (status.qdrant_connected, &status.collection) {
        (true, Some(_)) => "✓ Connected",
        (true, None) => "⚠ Connected (collection not created - run 'repoindex db init')",
        (false, _) => "✗ Not connected",
    };
    println!("  Status: {}", connection_status);
    if let Some(collection) = &status.collection {
        println!("  Points: {}", collection.points_count);
        println!("  Indexed Vectors: {}", collection.indexed_vectors_count);
    }
    println!("\nEmbedding Model: {}", status.embedding_model);
    println!("\nDatabase Stats:");
    println!("  Repositories: {}", status.db_stats.repository_count);
    println!("  Files: {}", status.db_stats.file_count);
    println!(
        "  Jobs: {} ({} active)",
        status.db_stats.job_count, status.db_stats.active_job_count
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MapFetcher, TestContext};

    #[tokio::test]
    async fn test_status_counts() {
        let t = TestContext::new(MapFetcher::new().with_file("a.py", "def a():\n    pass\n")).await;
        crate::commands::cmd_analyze(&t.ctx, "acme/widgets")
            .await
            .unwrap();

        let status = cmd_status(&Config::default(), &t.ctx).await.unwrap();
        assert!(status.qdrant_connected);
        assert_eq!(status.collection.unwrap().points_count, 1);
        assert_eq!(status.db_stats.repository_count, 1);
        assert_eq!(status.db_stats.file_count, 1);
        assert_eq!(status.db_stats.job_count, 1);
        assert_eq!(status.db_stats.active_job_count, 0);
    }
}
