//! Python structural extraction over a tree-sitter syntax tree
//!
//! All walks use explicit stacks or queues so deeply nested input cannot
//! exhaust the call stack.

use std::collections::VecDeque;
use std::sync::LazyLock;

use tree_sitter::{Node, Parser, Tree};

use super::literal::{unescape_concatenated, unescape_literal};
use super::{ClassInfo, FileStructure, FunctionInfo};
use crate::error::{Error, Result};

static PYTHON: LazyLock<tree_sitter::Language> =
    LazyLock::new(|| tree_sitter_python::LANGUAGE.into());

const IMPORT_KINDS: &[&str] = &[
    "import_statement",
    "import_from_statement",
    "future_import_statement",
];

/// Parse Python source, rejecting input the grammar cannot make sense of.
pub(super) fn parse_tree(source: &str) -> Result<Tree> {
    let mut parser = Parser::new();
    parser
        .set_language(&PYTHON)
        .map_err(|e| Error::parse(format!("grammar rejected: {e}"), None))?;

    let tree = parser
        .parse(source.as_bytes(), None)
        .ok_or_else(|| Error::parse("grammar produced no syntax tree", None))?;

    let root = tree.root_node();
    if root.is_error() || is_all_error(root) {
        return Err(Error::parse(
            "no parsable statements",
            first_error_offset(root),
        ));
    }

    Ok(tree)
}

fn is_all_error(root: Node<'_>) -> bool {
    let statements: Vec<Node<'_>> = named_children(root)
        .into_iter()
        .filter(|n| n.kind() != "comment")
        .collect();
    !statements.is_empty() && statements.iter().all(|n| n.is_error())
}

fn first_error_offset(root: Node<'_>) -> Option<usize> {
    let mut stack = vec![root];
    while let Some(node) = stack.pop() {
        if node.is_error() || node.is_missing() {
            return Some(node.start_byte());
        }
        if !node.has_error() {
            continue;
        }
        let mut cursor = node.walk();
        let children: Vec<Node<'_>> = node.children(&mut cursor).collect();
        stack.extend(children.into_iter().rev());
    }
    None
}

fn named_children(node: Node<'_>) -> Vec<Node<'_>> {
    let mut cursor = node.walk();
    node.named_children(&mut cursor).collect()
}

fn text<'s>(node: Node<'_>, source: &'s str) -> &'s str {
    source.get(node.byte_range()).unwrap_or_default()
}

fn field_text(node: Node<'_>, field: &str, source: &str) -> Option<String> {
    node.child_by_field_name(field)
        .map(|n| text(n, source).to_string())
}

/// Unwrap `decorated_definition`, returning the inner definition and the
/// decorator expressions in source order.
fn unwrap_decorated<'t>(node: Node<'t>, source: &str) -> (Node<'t>, Vec<String>) {
    if node.kind() != "decorated_definition" {
        return (node, Vec::new());
    }
    let decorators = named_children(node)
        .into_iter()
        .filter(|n| n.kind() == "decorator")
        .map(|n| text(n, source).trim_start_matches('@').trim().to_string())
        .collect();
    match node.child_by_field_name("definition") {
        Some(definition) => (definition, decorators),
        None => (node, decorators),
    }
}

/// Top-level functions and classes (with nested classes) of a module.
pub(super) fn extract_structure(tree: &Tree, source: &str) -> FileStructure {
    let mut structure = FileStructure::default();
    if source.is_empty() {
        return structure;
    }

    let mut class_roots = Vec::new();
    for child in named_children(tree.root_node()) {
        let (definition, decorators) = unwrap_decorated(child, source);
        match definition.kind() {
            "function_definition" => structure
                .functions
                .push(build_function(definition, source, decorators, None)),
            "class_definition" => class_roots.push((definition, decorators)),
            _ => {}
        }
    }

    structure.classes = build_classes(class_roots, source);
    structure
}

fn build_function(
    node: Node<'_>,
    source: &str,
    decorators: Vec<String>,
    owner: Option<&str>,
) -> FunctionInfo {
    let name = field_text(node, "name", source).unwrap_or_default();
    let qualified_name = match owner {
        Some(owner) => format!("{owner}.{name}"),
        None => name.clone(),
    };

    let params_node = node.child_by_field_name("parameters");
    let parameters_text = params_node
        .map(|n| text(n, source).to_string())
        .unwrap_or_else(|| "()".to_string());
    let parameters = params_node
        .map(|n| {
            named_children(n)
                .into_iter()
                .filter(|p| p.kind() != "comment")
                .map(|p| text(p, source).to_string())
                .collect()
        })
        .unwrap_or_default();
    let return_type = field_text(node, "return_type", source);

    let mut signature = format!("def {name}{parameters_text}");
    if let Some(ret) = &return_type {
        signature.push_str(" -> ");
        signature.push_str(ret);
    }

    let mut cursor = node.walk();
    let is_async = node.children(&mut cursor).any(|c| c.kind() == "async");

    FunctionInfo {
        name,
        qualified_name,
        signature,
        parameters,
        parameters_text,
        return_type,
        docstring: node
            .child_by_field_name("body")
            .and_then(|body| extract_docstring(body, source)),
        decorators,
        is_async,
        start_byte: node.start_byte(),
        end_byte: node.end_byte(),
    }
}

struct PendingClass<'t> {
    node: Node<'t>,
    decorators: Vec<String>,
    owner: Option<String>,
    parent: Option<usize>,
}

/// Build classes breadth-first into an arena, then fold children into their
/// parents from the back so every child is complete before it is moved.
fn build_classes(roots: Vec<(Node<'_>, Vec<String>)>, source: &str) -> Vec<ClassInfo> {
    let mut queue: VecDeque<PendingClass<'_>> = roots
        .into_iter()
        .map(|(node, decorators)| PendingClass {
            node,
            decorators,
            owner: None,
            parent: None,
        })
        .collect();

    let mut slots: Vec<Option<ClassInfo>> = Vec::new();
    let mut parents: Vec<Option<usize>> = Vec::new();

    while let Some(pending) = queue.pop_front() {
        let index = slots.len();
        let (class, nested) = build_class_shell(
            pending.node,
            source,
            pending.decorators,
            pending.owner.as_deref(),
        );
        for (node, decorators) in nested {
            queue.push_back(PendingClass {
                node,
                decorators,
                owner: Some(class.qualified_name.clone()),
                parent: Some(index),
            });
        }
        slots.push(Some(class));
        parents.push(pending.parent);
    }

    for index in (0..slots.len()).rev() {
        let Some(parent) = parents[index] else {
            continue;
        };
        if let Some(child) = slots[index].take() {
            if let Some(parent_class) = slots[parent].as_mut() {
                parent_class.nested_classes.insert(0, child);
            }
        }
    }

    slots.into_iter().flatten().collect()
}

/// Everything about a class except its nested classes, which are returned
/// as nodes for the caller to queue.
fn build_class_shell<'t>(
    node: Node<'t>,
    source: &str,
    decorators: Vec<String>,
    owner: Option<&str>,
) -> (ClassInfo, Vec<(Node<'t>, Vec<String>)>) {
    let name = field_text(node, "name", source).unwrap_or_default();
    let qualified_name = match owner {
        Some(owner) => format!("{owner}.{name}"),
        None => name.clone(),
    };

    let bases: Vec<String> = node
        .child_by_field_name("superclasses")
        .map(|list| {
            named_children(list)
                .into_iter()
                .filter(|b| b.kind() != "comment")
                .map(|b| text(b, source).to_string())
                .collect()
        })
        .unwrap_or_default();

    let signature = if bases.is_empty() {
        format!("class {name}")
    } else {
        format!("class {name}({})", bases.join(", "))
    };

    let mut methods = Vec::new();
    let mut attributes = Vec::new();
    let mut nested = Vec::new();
    let mut docstring = None;

    if let Some(body) = node.child_by_field_name("body") {
        docstring = extract_docstring(body, source);
        for child in named_children(body) {
            let (definition, child_decorators) = unwrap_decorated(child, source);
            match definition.kind() {
                "function_definition" => methods.push(build_function(
                    definition,
                    source,
                    child_decorators,
                    Some(&qualified_name),
                )),
                "class_definition" => nested.push((definition, child_decorators)),
                "expression_statement" => {
                    for expr in named_children(definition) {
                        if expr.kind() == "assignment" {
                            if let Some(left) = expr.child_by_field_name("left") {
                                attributes.extend(assignment_targets(left, source));
                            }
                        }
                    }
                }
                _ => {}
            }
        }
    }

    let class = ClassInfo {
        name,
        qualified_name,
        signature,
        bases,
        docstring,
        attributes,
        methods,
        nested_classes: Vec::new(),
        decorators,
        start_byte: node.start_byte(),
        end_byte: node.end_byte(),
    };
    (class, nested)
}

/// Names bound by an assignment target, descending into tuple/list patterns.
fn assignment_targets(target: Node<'_>, source: &str) -> Vec<String> {
    let mut names = Vec::new();
    let mut stack = vec![target];
    while let Some(node) = stack.pop() {
        match node.kind() {
            "identifier" => names.push(text(node, source).to_string()),
            "pattern_list" | "tuple_pattern" | "list_pattern" | "list_splat_pattern"
            | "parenthesized_expression" | "tuple" | "list" | "expression_list" => {
                stack.extend(named_children(node).into_iter().rev());
            }
            _ => {}
        }
    }
    names
}

/// First statement of a body when it is a string literal, evaluated where
/// possible and raw otherwise.
fn extract_docstring(body: Node<'_>, source: &str) -> Option<String> {
    let first = named_children(body)
        .into_iter()
        .find(|n| n.kind() != "comment")?;
    if first.kind() != "expression_statement" {
        return None;
    }
    let expr = named_children(first).into_iter().next()?;
    let raw = text(expr, source);

    match expr.kind() {
        "string" => Some(unescape_literal(raw).unwrap_or_else(|| raw.to_string())),
        "concatenated_string" => {
            let parts: Vec<&str> = named_children(expr)
                .into_iter()
                .filter(|n| n.kind() == "string")
                .map(|n| text(n, source))
                .collect();
            Some(unescape_concatenated(parts).unwrap_or_else(|| raw.to_string()))
        }
        _ => None,
    }
}

/// Import statements outside function and class bodies, in source order.
pub(super) fn extract_imports(tree: &Tree, source: &str) -> Vec<String> {
    let mut imports = Vec::new();
    let mut stack = vec![tree.root_node()];
    while let Some(node) = stack.pop() {
        let kind = node.kind();
        if IMPORT_KINDS.contains(&kind) {
            imports.push(text(node, source).to_string());
            continue;
        }
        if matches!(
            kind,
            "function_definition" | "class_definition" | "decorated_definition"
        ) {
            continue;
        }
        stack.extend(named_children(node).into_iter().rev());
    }
    imports
}
