//! Repository file tree and its cache slot

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::AnalysisConfig;
use crate::error::Result;
use crate::fetch::SourceFetcher;
use crate::language::Language;
use crate::meta::{CacheType, MetaDb};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    Directory,
    File,
}

/// One directory or file. Directories list their children directories
/// first, then files, each group ordered by name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileTreeNode {
    pub name: String,
    /// `/`-separated path from the repository root; empty for the root
    pub path: String,
    #[serde(rename = "type")]
    pub kind: NodeKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<Language>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<FileTreeNode>,
}

impl FileTreeNode {
    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    /// Number of file leaves
    pub fn file_count(&self) -> usize {
        let mut count = 0;
        let mut stack = vec![self];
        while let Some(node) = stack.pop() {
            if node.kind == NodeKind::File {
                count += 1;
            }
            stack.extend(node.children.iter());
        }
        count
    }
}

struct Slot {
    name: String,
    path: String,
    kind: NodeKind,
    children: BTreeMap<(NodeKind, String), usize>,
}

/// Build the tree for a set of file paths
pub fn build_file_tree(paths: &[String]) -> FileTreeNode {
    let mut arena = vec![Slot {
        name: String::new(),
        path: String::new(),
        kind: NodeKind::Directory,
        children: BTreeMap::new(),
    }];

    for path in paths {
        let parts: Vec<&str> = path.split('/').filter(|p| !p.is_empty()).collect();
        let mut current = 0;
        for (depth, part) in parts.iter().enumerate() {
            let kind = if depth + 1 == parts.len() {
                NodeKind::File
            } else {
                NodeKind::Directory
            };
            let key = (kind, part.to_string());
            current = match arena[current].children.get(&key) {
                Some(&idx) => idx,
                None => {
                    let idx = arena.len();
                    let child_path = parts[..=depth].join("/");
                    arena.push(Slot {
                        name: part.to_string(),
                        path: child_path,
                        kind,
                        children: BTreeMap::new(),
                    });
                    arena[current].children.insert(key, idx);
                    idx
                }
            };
        }
    }

    // Children always sit after their parent in the arena.
    let mut built: Vec<Option<FileTreeNode>> = vec![None; arena.len()];
    for idx in (0..arena.len()).rev() {
        let slot = &arena[idx];
        let children = slot
            .children
            .values()
            .filter_map(|&child| built[child].take())
            .collect();
        built[idx] = Some(FileTreeNode {
            name: slot.name.clone(),
            path: slot.path.clone(),
            kind: slot.kind,
            language: match slot.kind {
                NodeKind::File => Language::from_path(&slot.path),
                NodeKind::Directory => None,
            },
            children,
        });
    }

    built[0].take().unwrap_or(FileTreeNode {
        name: String::new(),
        path: String::new(),
        kind: NodeKind::Directory,
        language: None,
        children: Vec::new(),
    })
}

/// A file tree with where it came from
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileTreeView {
    pub tree: FileTreeNode,
    /// Whether the cached copy was served
    pub cached: bool,
    pub generated_at: String,
}

/// Serve the cached tree while it is fresh and non-empty; otherwise list
/// the tracked files again and store the rebuilt tree.
pub async fn get_file_tree(
    db: &MetaDb,
    fetcher: &dyn SourceFetcher,
    config: &AnalysisConfig,
    repository_id: i64,
) -> Result<FileTreeView> {
    if let Some(entry) = db.get_cache(repository_id, CacheType::FileTree).await? {
        let fresh = DateTime::parse_from_rfc3339(&entry.updated_at)
            .ok()
            .and_then(|updated| {
                let age = Utc::now().signed_duration_since(updated.with_timezone(&Utc));
                age.to_std().ok()
            })
            .is_some_and(|age| age < config.file_tree_ttl());

        if fresh {
            if let Ok(tree) = serde_json::from_str::<FileTreeNode>(&entry.payload_json) {
                if !tree.is_empty() {
                    debug!(repository_id, "Serving cached file tree");
                    return Ok(FileTreeView {
                        tree,
                        cached: true,
                        generated_at: entry.updated_at,
                    });
                }
            }
        }
    }

    let listed = fetcher.list_tracked_files().await?;
    let supported: Vec<String> = listed
        .into_iter()
        .filter(|path| config.should_index(path))
        .collect();
    let tree = build_file_tree(&supported);
    db.upsert_cache(repository_id, CacheType::FileTree, &serde_json::to_string(&tree)?)
        .await?;
    debug!(repository_id, files = supported.len(), "Rebuilt file tree");

    Ok(FileTreeView {
        tree,
        cached: false,
        generated_at: Utc::now().to_rfc3339(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::meta::SourceType;
    use crate::testing::MapFetcher;
    use tempfile::TempDir;

    fn paths(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_directories_before_files_by_name() {
        let tree = build_file_tree(&paths(&["zeta.py", "src/b.py", "src/a.py", "alpha.js", "lib/x.ts"]));
        let names: Vec<&str> = tree.children.iter().map(|n| n.name.as_str()).collect();
        assert_eq!(names, vec!["lib", "src", "alpha.js", "zeta.py"]);

        let src = &tree.children[1];
        assert_eq!(src.kind, NodeKind::Directory);
        assert_eq!(src.path, "src");
        let files: Vec<&str> = src.children.iter().map(|n| n.path.as_str()).collect();
        assert_eq!(files, vec!["src/a.py", "src/b.py"]);
        assert_eq!(src.children[0].language, Some(Language::Python));
        assert_eq!(tree.file_count(), 5);
    }

    #[test]
    fn test_empty_tree() {
        let tree = build_file_tree(&[]);
        assert!(tree.is_empty());
        assert_eq!(tree.kind, NodeKind::Directory);
    }

    #[tokio::test]
    async fn test_cache_served_while_fresh() {
        let tmp = TempDir::new().unwrap();
        let db = MetaDb::new(&tmp.path().join("meta.db")).await.unwrap();
        let repo = db
            .insert_repository("acme/widgets", SourceType::Github, None)
            .await
            .unwrap();
        let fetcher = MapFetcher::new()
            .with_file("a.py", "x = 1\n")
            .with_file("README.md", "# hi\n")
            .with_file("node_modules/dep/index.js", "x\n");
        let config = AnalysisConfig::default();

        let first = get_file_tree(&db, &fetcher, &config, repo.id).await.unwrap();
        assert!(!first.cached);
        assert_eq!(first.tree.file_count(), 1);

        fetcher.put("b.py", "y = 2\n");
        let second = get_file_tree(&db, &fetcher, &config, repo.id).await.unwrap();
        assert!(second.cached);
        assert_eq!(second.tree.file_count(), 1);

        let expired = AnalysisConfig {
            file_tree_ttl_secs: 0,
            ..AnalysisConfig::default()
        };
        let third = get_file_tree(&db, &fetcher, &expired, repo.id).await.unwrap();
        assert!(!third.cached);
        assert_eq!(third.tree.file_count(), 2);
    }
}
