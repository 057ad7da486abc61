//! Structural segmentation of source files
//!
//! Turns raw bytes into a syntax tree and extracts top-level functions and
//! classes (with nested classes to any depth). Only Python has a grammar;
//! every other language parses to a `ParsedFile` without a tree and is
//! indexed as a whole file.

mod literal;
mod python;

use serde::{Deserialize, Serialize};
use tree_sitter::Tree;

use crate::error::{Error, Result};
use crate::language::Language;

/// A function or method definition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionInfo {
    pub name: String,
    /// Dotted through enclosing classes, outer to inner
    pub qualified_name: String,
    /// `def name(params) -> ret`
    pub signature: String,
    /// Verbatim text of each formal parameter
    pub parameters: Vec<String>,
    pub parameters_text: String,
    pub return_type: Option<String>,
    pub docstring: Option<String>,
    pub decorators: Vec<String>,
    pub is_async: bool,
    pub start_byte: usize,
    pub end_byte: usize,
}

/// A class definition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassInfo {
    pub name: String,
    pub qualified_name: String,
    /// `class Name(bases)`
    pub signature: String,
    pub bases: Vec<String>,
    pub docstring: Option<String>,
    /// Names bound at class-body level
    pub attributes: Vec<String>,
    pub methods: Vec<FunctionInfo>,
    pub nested_classes: Vec<ClassInfo>,
    pub decorators: Vec<String>,
    pub start_byte: usize,
    pub end_byte: usize,
}

/// Extracted structure of one file
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileStructure {
    pub functions: Vec<FunctionInfo>,
    pub classes: Vec<ClassInfo>,
}

impl FileStructure {
    pub fn is_empty(&self) -> bool {
        self.functions.is_empty() && self.classes.is_empty()
    }
}

/// Decoded source plus its syntax tree, when the language has a grammar
pub struct ParsedFile {
    pub language: Language,
    pub source: String,
    pub root: Option<Tree>,
}

impl ParsedFile {
    /// Top-level functions and classes; empty without a tree
    pub fn structure(&self) -> FileStructure {
        match &self.root {
            Some(tree) => python::extract_structure(tree, &self.source),
            None => FileStructure::default(),
        }
    }

    /// Module-level import statements
    pub fn imports(&self) -> Vec<String> {
        match &self.root {
            Some(tree) => python::extract_imports(tree, &self.source),
            None => Vec::new(),
        }
    }
}

impl std::fmt::Debug for ParsedFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParsedFile")
            .field("language", &self.language)
            .field("bytes", &self.source.len())
            .field("has_tree", &self.root.is_some())
            .finish()
    }
}

/// Decode and parse a file.
///
/// Fails with `Error::Parse` when the bytes are not UTF-8 (offset of the
/// first invalid byte) or when the grammar cannot produce a usable tree.
/// Partial syntax errors are tolerated.
pub fn parse(bytes: &[u8], language: Language) -> Result<ParsedFile> {
    let source = std::str::from_utf8(bytes)
        .map_err(|e| Error::parse("source is not valid UTF-8", Some(e.valid_up_to())))?
        .to_string();

    let root = if language.is_structural() && !source.is_empty() {
        Some(python::parse_tree(&source)?)
    } else {
        None
    };

    Ok(ParsedFile {
        language,
        source,
        root,
    })
}

/// Parse and extract in one step
pub fn segment(bytes: &[u8], language: Language) -> Result<FileStructure> {
    Ok(parse(bytes, language)?.structure())
}

#[cfg(test)]
mod tests {
    use super::*;

    const OUTER: &str = r#"class Base:
    """Base docstring."""


class Outer(Base):
    """Outer docs."""
    count = 0
    label: str = "x"
    width: int
    a, (b, c) = 1, (2, 3)

    class Inner:
        def method(self) -> int:
            return 1

    def __init__(self):
        self.ready = True

    def run(self, value: int = 2, *args, **kwargs) -> None:
        pass
"#;

    #[test]
    fn test_outer_inner_scenario() {
        let structure = segment(OUTER.as_bytes(), Language::Python).unwrap();
        assert!(structure.functions.is_empty());
        assert_eq!(structure.classes.len(), 2);

        let outer = &structure.classes[1];
        assert_eq!(outer.name, "Outer");
        assert_eq!(outer.bases, vec!["Base"]);
        assert_eq!(outer.signature, "class Outer(Base)");
        assert_eq!(outer.docstring.as_deref(), Some("Outer docs."));
        assert_eq!(outer.attributes, vec!["count", "label", "width", "a", "b", "c"]);
        assert_eq!(outer.nested_classes.len(), 1);
        assert_eq!(outer.nested_classes[0].qualified_name, "Outer.Inner");

        let method = &outer.nested_classes[0].methods[0];
        assert_eq!(method.qualified_name, "Outer.Inner.method");
        assert_eq!(method.signature, "def method(self) -> int");

        assert_eq!(outer.methods[0].qualified_name, "Outer.__init__");
        let run = &outer.methods[1];
        assert_eq!(
            run.parameters,
            vec!["self", "value: int = 2", "*args", "**kwargs"]
        );
        assert_eq!(run.parameters_text, "(self, value: int = 2, *args, **kwargs)");
        assert_eq!(run.return_type.as_deref(), Some("None"));

        let base = &structure.classes[0];
        assert_eq!(base.signature, "class Base");
        assert!(base.bases.is_empty());
        assert_eq!(base.docstring.as_deref(), Some("Base docstring."));
        assert_eq!(
            OUTER[base.start_byte..base.end_byte].trim_end(),
            "class Base:\n    \"\"\"Base docstring.\"\"\""
        );
    }

    #[test]
    fn test_three_deep_nesting() {
        let source = "class A:\n    class B:\n        class C:\n            x = 1\n";
        let structure = segment(source.as_bytes(), Language::Python).unwrap();
        let a = &structure.classes[0];
        let b = &a.nested_classes[0];
        let c = &b.nested_classes[0];
        assert_eq!(b.qualified_name, "A.B");
        assert_eq!(c.qualified_name, "A.B.C");
        assert_eq!(c.attributes, vec!["x"]);
    }

    #[test]
    fn test_nested_siblings_keep_declaration_order() {
        let source = "class A:\n    class First:\n        class Deep:\n            pass\n    class Second:\n        pass\n";
        let structure = segment(source.as_bytes(), Language::Python).unwrap();
        let names: Vec<&str> = structure.classes[0]
            .nested_classes
            .iter()
            .map(|c| c.name.as_str())
            .collect();
        assert_eq!(names, vec!["First", "Second"]);
        assert_eq!(
            structure.classes[0].nested_classes[0].nested_classes[0].qualified_name,
            "A.First.Deep"
        );
    }

    #[test]
    fn test_decorated_async_function() {
        let source = "import os\n\n@decorator\n@other(1)\nasync def fetch(url):\n    'Fetch it.'\n    return url\n";
        let structure = segment(source.as_bytes(), Language::Python).unwrap();
        let fetch = &structure.functions[0];
        assert_eq!(fetch.name, "fetch");
        assert_eq!(fetch.decorators, vec!["decorator", "other(1)"]);
        assert!(fetch.is_async);
        assert_eq!(fetch.docstring.as_deref(), Some("Fetch it."));
        assert_eq!(fetch.return_type, None);
        assert_eq!(fetch.signature, "def fetch(url)");

        let span = &source[fetch.start_byte..fetch.end_byte];
        assert!(span.starts_with("async def fetch"));
        assert!(span.trim_end().ends_with("return url"));
    }

    #[test]
    fn test_fstring_docstring_falls_back_to_raw() {
        let source = "def greet(name):\n    f\"Hello {name}\"\n";
        let structure = segment(source.as_bytes(), Language::Python).unwrap();
        assert_eq!(
            structure.functions[0].docstring.as_deref(),
            Some("f\"Hello {name}\"")
        );
    }

    #[test]
    fn test_imports_skip_function_bodies() {
        let source = "import os\nfrom typing import List\n\ndef f():\n    import json\n    return json\n";
        let parsed = parse(source.as_bytes(), Language::Python).unwrap();
        assert_eq!(parsed.imports(), vec!["import os", "from typing import List"]);
    }

    #[test]
    fn test_empty_and_unsupported_input() {
        assert!(segment(b"", Language::Python).unwrap().is_empty());

        let parsed = parse(b"export const x = 1;", Language::TypeScript).unwrap();
        assert!(parsed.root.is_none());
        assert!(parsed.structure().is_empty());
    }

    #[test]
    fn test_invalid_utf8_reports_offset() {
        let bytes = b"def ok():\n    pass\n\xff\xfe";
        match parse(bytes, Language::Python) {
            Err(Error::Parse { offset, .. }) => assert_eq!(offset, Some(19)),
            other => panic!("expected parse error, got {other:?}"),
        }
    }

    #[test]
    fn test_partial_syntax_errors_tolerated() {
        let source = "def ok():\n    return 1\n\nclass Broken(\n";
        let structure = segment(source.as_bytes(), Language::Python).unwrap();
        assert!(structure.functions.iter().any(|f| f.name == "ok"));
    }

    #[test]
    fn test_segmenting_is_deterministic() {
        let first = segment(OUTER.as_bytes(), Language::Python).unwrap();
        let second = segment(OUTER.as_bytes(), Language::Python).unwrap();
        assert_eq!(first, second);
    }
}
