//! Read-side commands: snapshot, file tree and semantic search

use serde::Serialize;
use tracing::debug;

use crate::context::IndexContext;
use crate::error::{Error, Result};
use crate::file_tree::{FileTreeNode, FileTreeView, NodeKind};
use crate::snapshot::SnapshotView;
use crate::store::SearchResult;

pub async fn cmd_snapshot(ctx: &IndexContext, reference: &str) -> Result<SnapshotView> {
    let repository = ctx.repository(reference).await?;
    ctx.get_snapshot(repository.id).await?.ok_or_else(|| {
        Error::Other(format!(
            "No analysis for '{}' yet. Run 'repoindex analyze {}' first.",
            repository.full_name, repository.full_name
        ))
    })
}

pub async fn cmd_tree(ctx: &IndexContext, reference: &str) -> Result<FileTreeView> {
    let repository = ctx.repository(reference).await?;
    ctx.get_file_tree(repository.id).await
}

/// Search results for CLI display
#[derive(Debug, Clone, Serialize)]
pub struct QueryResult {
    pub repository: String,
    pub query: String,
    pub results: Vec<SearchResult>,
}

pub async fn cmd_query(
    ctx: &IndexContext,
    reference: &str,
    query: &str,
    limit: usize,
    path: Option<&str>,
) -> Result<QueryResult> {
    let repository = ctx.repository(reference).await?;
    let results = ctx.search(repository.id, query, limit, path).await?;
    debug!(hits = results.len(), "Search finished");
    Ok(QueryResult {
        repository: repository.full_name,
        query: query.to_string(),
        results,
    })
}

pub fn print_snapshot(view: &SnapshotView) {
    let snapshot = &view.snapshot;
    let summary = &snapshot.summary;

    println!("\n🔎 Analysis of repository {}\n", snapshot.repository_id);
    println!("Branch: {}", snapshot.branch);
    println!("Analyzed: {}", snapshot.analyzed_at);
    if view.refresh_in_progress {
        println!("⚠ A newer analysis is running; this snapshot may be stale");
    }
    if view.last_refresh_failed {
        let error = view
            .status
            .as_ref()
            .and_then(|s| s.error.as_deref())
            .unwrap_or("unknown error");
        println!("⚠ The latest analysis failed ({}); showing the previous one", error);
    }

    println!("\nFiles: {}", summary.total_files);
    println!("  Python: {}", summary.python_files);
    println!("  JavaScript: {}", summary.javascript_files);
    println!("  TypeScript: {}", summary.typescript_files);
    println!("  Failed: {}", summary.failed_files);

    for file in &snapshot.files {
        let functions = file.structure.functions.len();
        let classes = file.structure.classes.len();
        if functions + classes == 0 {
            continue;
        }
        println!(
            "\n{} ({} functions, {} classes)",
            file.path, functions, classes
        );
        for function in &file.structure.functions {
            println!("  def {}", function.name);
        }
        for class in &file.structure.classes {
            println!("  class {}", class.qualified_name);
        }
    }

    if !snapshot.failures.is_empty() {
        println!("\nFailures:");
        for failure in &snapshot.failures {
            println!("  {}: {}", failure.path, failure.error);
        }
    }
}

pub fn print_tree(view: &FileTreeView) {
    let source = if view.cached { "cached" } else { "fresh" };
    println!(
        "{} files ({}, generated {})",
        view.tree.file_count(),
        source,
        view.generated_at
    );

    let mut stack: Vec<(&FileTreeNode, usize)> =
        view.tree.children.iter().rev().map(|n| (n, 0)).collect();
    while let Some((node, depth)) = stack.pop() {
        let indent = "  ".repeat(depth);
        match node.kind {
            NodeKind::Directory => {
                println!("{}{}/", indent, node.name);
                stack.extend(node.children.iter().rev().map(|n| (n, depth + 1)));
            }
            NodeKind::File => println!("{}{}", indent, node.name),
        }
    }
}

pub fn print_query_results(result: &QueryResult) {
    if result.results.is_empty() {
        println!("No results found for query: {}", result.query);
        return;
    }

    println!(
        "\n🔍 Results for \"{}\" in {}:\n",
        result.query, result.repository
    );
    for (i, hit) in result.results.iter().enumerate() {
        let payload = &hit.payload;
        println!(
            "{}. {} :: {} [score: {:.3}]",
            i + 1,
            payload.path,
            payload.symbol,
            hit.score
        );
        let preview: String = payload.content.lines().take(6).collect::<Vec<_>>().join("\n");
        for line in preview.lines() {
            println!("   │ {}", line);
        }
        println!();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MapFetcher, TestContext};

    const SOURCE: &str = "class Store:\n    def get(self):\n        return 1\n\n\ndef helper():\n    return 2\n";

    #[tokio::test]
    async fn test_snapshot_requires_analysis() {
        let t = TestContext::new(MapFetcher::new().with_file("pkg/store.py", SOURCE)).await;
        assert!(matches!(
            cmd_snapshot(&t.ctx, "acme/widgets").await,
            Err(Error::Other(_))
        ));

        crate::commands::cmd_analyze(&t.ctx, "acme/widgets")
            .await
            .unwrap();
        let view = cmd_snapshot(&t.ctx, "acme/widgets").await.unwrap();
        assert_eq!(view.snapshot.files.len(), 1);
        assert_eq!(view.snapshot.files[0].structure.classes[0].name, "Store");
    }

    #[tokio::test]
    async fn test_tree_and_query() {
        let t = TestContext::new(
            MapFetcher::new()
                .with_file("pkg/store.py", SOURCE)
                .with_file("README.md", "# widgets\n"),
        )
        .await;
        let tree = cmd_tree(&t.ctx, &t.repo_id.to_string()).await.unwrap();
        assert!(!tree.cached);
        assert_eq!(tree.tree.children[0].name, "pkg");

        crate::commands::cmd_analyze(&t.ctx, "acme/widgets")
            .await
            .unwrap();
        let result = cmd_query(&t.ctx, "acme/widgets", "helper", 5, None)
            .await
            .unwrap();
        assert_eq!(result.results.len(), 2);
        let filtered = cmd_query(&t.ctx, "acme/widgets", "helper", 5, Some("other.py"))
            .await
            .unwrap();
        assert!(filtered.results.is_empty());
    }
}
