//! Language tags derived from file extensions

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// Languages recognised by the analysis pipeline.
///
/// Only Python is segmented structurally; the others are indexed as
/// whole-file chunks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Python,
    JavaScript,
    TypeScript,
}

impl Language {
    /// Tag a path by its extension
    pub fn from_path(path: impl AsRef<Path>) -> Option<Self> {
        let ext = path.as_ref().extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "py" => Some(Language::Python),
            "js" => Some(Language::JavaScript),
            "ts" => Some(Language::TypeScript),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Language::Python => "python",
            Language::JavaScript => "javascript",
            Language::TypeScript => "typescript",
        }
    }

    /// Whether a grammar is available for structural extraction
    pub fn is_structural(&self) -> bool {
        matches!(self, Language::Python)
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_path() {
        assert_eq!(Language::from_path("pkg/app.py"), Some(Language::Python));
        assert_eq!(Language::from_path("web/main.JS"), Some(Language::JavaScript));
        assert_eq!(Language::from_path("web/types.ts"), Some(Language::TypeScript));
        assert_eq!(Language::from_path("README.md"), None);
        assert_eq!(Language::from_path("Makefile"), None);
    }

    #[test]
    fn test_structural() {
        assert!(Language::Python.is_structural());
        assert!(!Language::TypeScript.is_structural());
        assert_eq!(Language::JavaScript.to_string(), "javascript");
    }
}
