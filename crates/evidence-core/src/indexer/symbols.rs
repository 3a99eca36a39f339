//! Tag extraction from source code.
//!
//! Each file is parsed with its tree-sitter grammar and walked once in
//! document order. Definitions (functions, methods, classes, module-level
//! variables), call/constructor references and imports become [`Tag`]s.
//! Extraction is a pure function of the file content and path, so files can
//! be processed on any thread in any order.

use std::fmt;
use std::path::Path;

use tree_sitter::{Node, TreeCursor};

use crate::indexer::filesystem::hash_bytes;
use crate::indexer::parser::{detect_language, parse_source, Lang};
use crate::models::{compact_details, relative_path, to_module_name, Tag, TagCategory};

/// Deepest syntax tree the collector will walk. Deeper files are skipped.
pub const MAX_TREE_DEPTH: usize = 256;

// ---------------------------------------------------------------------------
// Outcome types
// ---------------------------------------------------------------------------

/// Why a file contributed no tags.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ExtractIssue {
    Unreadable(String),
    Unsupported,
    Unparsable { line: usize },
    TooDeep { line: usize, limit: usize },
}

impl fmt::Display for ExtractIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExtractIssue::Unreadable(reason) => write!(f, "unreadable: {reason}"),
            ExtractIssue::Unsupported => f.write_str("no grammar for this file type"),
            ExtractIssue::Unparsable { line } => write!(f, "syntax error near line {line}"),
            ExtractIssue::TooDeep { line, limit } => {
                write!(f, "nesting deeper than {limit} levels near line {line}")
            }
        }
    }
}

/// Result of extracting a single file.
#[derive(Clone, Debug)]
pub struct FileExtraction {
    pub relative_path: String,
    pub tags: Vec<Tag>,
    pub content_hash: Option<String>,
    pub issue: Option<ExtractIssue>,
}

/// Read and extract one file. Never fails: problems are reported in `issue`.
pub fn extract_file(root: &Path, path: &Path) -> FileExtraction {
    let rel = relative_path(root, path);
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) => {
            return FileExtraction {
                relative_path: rel,
                tags: Vec::new(),
                content_hash: None,
                issue: Some(ExtractIssue::Unreadable(e.to_string())),
            }
        }
    };
    let content_hash = Some(hash_bytes(&bytes));

    let Some(lang) = detect_language(path) else {
        return FileExtraction {
            relative_path: rel,
            tags: Vec::new(),
            content_hash,
            issue: Some(ExtractIssue::Unsupported),
        };
    };
    let source = match String::from_utf8(bytes) {
        Ok(s) => s,
        Err(e) => {
            return FileExtraction {
                relative_path: rel,
                tags: Vec::new(),
                content_hash,
                issue: Some(ExtractIssue::Unreadable(e.to_string())),
            }
        }
    };

    match extract_source(&source, &rel, path, lang) {
        Ok(tags) => FileExtraction {
            relative_path: rel,
            tags,
            content_hash,
            issue: None,
        },
        Err(issue) => FileExtraction {
            relative_path: rel,
            tags: Vec::new(),
            content_hash,
            issue: Some(issue),
        },
    }
}

/// Extract tags from already-loaded source.
pub fn extract_source(
    source: &str,
    relative: &str,
    absolute: &Path,
    lang: Lang,
) -> Result<Vec<Tag>, ExtractIssue> {
    let tree = parse_source(source, lang).map_err(ExtractIssue::Unreadable)?;
    let root = tree.root_node();
    if let Some(line) = depth_overflow_line(root, MAX_TREE_DEPTH) {
        return Err(ExtractIssue::TooDeep {
            line,
            limit: MAX_TREE_DEPTH,
        });
    }
    if root.has_error() {
        let line = first_error_line(root).unwrap_or(1);
        return Err(ExtractIssue::Unparsable { line });
    }

    let mut collector = TagCollector {
        source,
        lines: source.lines().collect(),
        relative,
        absolute,
        lang,
        module: to_module_name(relative),
        scope: Vec::new(),
        function_depth: 0,
        tags: Vec::new(),
    };
    collector.visit_children(root);
    Ok(collector.tags)
}

/// Step the cursor to the next node in pre-order that is not below the
/// current one. Returns false once the walk is back at its starting node.
fn skip_subtree(cursor: &mut TreeCursor<'_>, depth: &mut usize) -> bool {
    loop {
        if cursor.goto_next_sibling() {
            return true;
        }
        if !cursor.goto_parent() {
            return false;
        }
        *depth -= 1;
    }
}

/// Line of the first node nested more than `limit` levels below `root`.
fn depth_overflow_line(root: Node<'_>, limit: usize) -> Option<usize> {
    let mut cursor = root.walk();
    let mut depth = 0;
    loop {
        if depth > limit {
            return Some(cursor.node().start_position().row + 1);
        }
        if cursor.goto_first_child() {
            depth += 1;
            continue;
        }
        if !skip_subtree(&mut cursor, &mut depth) {
            return None;
        }
    }
}

fn first_error_line(root: Node<'_>) -> Option<usize> {
    let mut cursor = root.walk();
    let mut depth = 0;
    loop {
        let node = cursor.node();
        if node.is_error() || node.is_missing() {
            return Some(node.start_position().row + 1);
        }
        if node.has_error() && cursor.goto_first_child() {
            depth += 1;
            continue;
        }
        if !skip_subtree(&mut cursor, &mut depth) {
            return None;
        }
    }
}

/// Normalize an import path (`./utils/io`, `github.com/x/y`) to dotted form.
pub fn normalize_module_path(raw: &str) -> String {
    let trimmed = raw.trim().trim_matches(|c| c == '"' || c == '\'' || c == '`');
    let mut rest = trimmed;
    loop {
        if let Some(r) = rest.strip_prefix("./") {
            rest = r;
        } else if let Some(r) = rest.strip_prefix("../") {
            rest = r;
        } else {
            break;
        }
    }
    rest.trim_start_matches('.').replace('/', ".")
}

fn last_segment(dotted: &str) -> &str {
    dotted
        .rsplit(['.', '/'])
        .find(|s| !s.is_empty())
        .unwrap_or(dotted)
}

// ---------------------------------------------------------------------------
// Tree walk
// ---------------------------------------------------------------------------

struct TagCollector<'a> {
    source: &'a str,
    lines: Vec<&'a str>,
    relative: &'a str,
    absolute: &'a Path,
    lang: Lang,
    module: String,
    scope: Vec<String>,
    function_depth: usize,
    tags: Vec<Tag>,
}

impl<'a> TagCollector<'a> {
    fn text(&self, node: Node<'_>) -> &'a str {
        node.utf8_text(self.source.as_bytes()).unwrap_or("")
    }

    fn field_text(&self, node: Node<'_>, field: &str) -> Option<&'a str> {
        node.child_by_field_name(field)
            .map(|n| self.text(n))
            .filter(|t| !t.is_empty())
    }

    fn qualify(&self, name: &str) -> String {
        let mut parts: Vec<&str> = Vec::with_capacity(self.scope.len() + 2);
        if !self.module.is_empty() {
            parts.push(&self.module);
        }
        parts.extend(self.scope.iter().map(String::as_str));
        parts.push(name);
        parts.join(".")
    }

    /// Header text of a definition: everything before its body.
    fn signature(&self, node: Node<'_>) -> String {
        let end = node
            .child_by_field_name("body")
            .map(|b| b.start_byte())
            .unwrap_or_else(|| node.end_byte());
        let raw = self.source.get(node.start_byte()..end).unwrap_or("");
        let header = if node.child_by_field_name("body").is_some() {
            raw
        } else {
            raw.lines().next().unwrap_or("")
        };
        compact_details(header)
    }

    fn line_text(&self, row: usize) -> String {
        compact_details(self.lines.get(row).copied().unwrap_or(""))
    }

    fn push(&mut self, node: Node<'_>, name: &str, identifier: String, category: TagCategory, details: String) {
        if name.is_empty() {
            return;
        }
        let line = (node.start_position().row + 1) as u32;
        let end_line = if category.is_definition() {
            (node.end_position().row + 1) as u32
        } else {
            line
        };
        self.tags.push(Tag {
            absolute_path: self.absolute.to_path_buf(),
            relative_path: self.relative.to_string(),
            line,
            end_line: end_line.max(line),
            name: name.to_string(),
            identifier,
            category,
            details,
        });
    }

    fn define(&mut self, node: Node<'_>, name: &str, category: TagCategory) {
        let identifier = self.qualify(name);
        let details = self.signature(node);
        self.push(node, name, identifier, category, details);
    }

    fn reference(&mut self, node: Node<'_>, name: &str, expression: &str) {
        let identifier: String = expression.split_whitespace().collect();
        let details = self.line_text(node.start_position().row);
        self.push(node, name, identifier, TagCategory::Reference, details);
    }

    fn import(&mut self, node: Node<'_>, name: &str, identifier: String, statement: Node<'_>) {
        let details = compact_details(self.text(statement));
        self.push(node, name, identifier, TagCategory::Import, details);
    }

    fn visit_children(&mut self, node: Node<'_>) {
        let mut cursor = node.walk();
        let children: Vec<Node<'_>> = node.named_children(&mut cursor).collect();
        for child in children {
            self.visit(child);
        }
    }

    fn in_scope(&mut self, name: &str, is_function: bool, node: Node<'_>) {
        self.scope.push(name.to_string());
        if is_function {
            self.function_depth += 1;
        }
        self.visit_children(node);
        if is_function {
            self.function_depth -= 1;
        }
        self.scope.pop();
    }

    /// Emit references for every type name under `node` (base classes, interfaces).
    fn type_references(&mut self, node: Node<'_>) {
        match node.kind() {
            "identifier" | "type_identifier" => {
                let name = self.text(node);
                self.reference(node, name, name);
            }
            "attribute" | "scoped_type_identifier" | "member_expression" => {
                let expr = self.text(node);
                self.reference(node, last_segment(expr), expr);
            }
            "type_arguments" | "keyword_argument" => {}
            _ => {
                let mut cursor = node.walk();
                let children: Vec<Node<'_>> = node.named_children(&mut cursor).collect();
                for child in children {
                    self.type_references(child);
                }
            }
        }
    }

    fn visit(&mut self, node: Node<'_>) {
        let handled = match self.lang {
            Lang::Python => self.visit_python(node),
            Lang::Java => self.visit_java(node),
            Lang::TypeScript | Lang::Tsx => self.visit_typescript(node),
            Lang::Go => self.visit_go(node),
        };
        if !handled {
            self.visit_children(node);
        }
    }

    // -- Python --------------------------------------------------------------

    fn visit_python(&mut self, node: Node<'_>) -> bool {
        match node.kind() {
            "function_definition" => {
                let Some(name) = self.field_text(node, "name") else {
                    return false;
                };
                self.define(node, name, TagCategory::FunctionDefinition);
                self.in_scope(name, true, node);
                true
            }
            "class_definition" => {
                let Some(name) = self.field_text(node, "name") else {
                    return false;
                };
                self.define(node, name, TagCategory::ClassDefinition);
                if let Some(bases) = node.child_by_field_name("superclasses") {
                    self.type_references(bases);
                }
                if let Some(body) = node.child_by_field_name("body") {
                    self.scope.push(name.to_string());
                    self.visit_children(body);
                    self.scope.pop();
                }
                true
            }
            "call" => {
                if let Some(function) = node.child_by_field_name("function") {
                    match function.kind() {
                        "identifier" => {
                            let name = self.text(function);
                            self.reference(function, name, name);
                        }
                        "attribute" => {
                            if let Some(attr) = self.field_text(function, "attribute") {
                                let expr = self.text(function);
                                self.reference(function, attr, expr);
                            }
                        }
                        _ => {}
                    }
                }
                self.visit_children(node);
                true
            }
            "import_statement" => {
                let mut cursor = node.walk();
                let names: Vec<Node<'_>> = node.children_by_field_name("name", &mut cursor).collect();
                for item in names {
                    match item.kind() {
                        "aliased_import" => {
                            let module = self.field_text(item, "name").unwrap_or("");
                            let alias = self.field_text(item, "alias").unwrap_or(module);
                            self.import(item, alias, module.to_string(), node);
                        }
                        _ => {
                            let module = self.text(item);
                            self.import(item, module, module.to_string(), node);
                        }
                    }
                }
                true
            }
            "import_from_statement" => {
                let module = self
                    .field_text(node, "module_name")
                    .map(normalize_module_path)
                    .unwrap_or_default();
                let mut cursor = node.walk();
                let names: Vec<Node<'_>> = node.children_by_field_name("name", &mut cursor).collect();
                if names.is_empty() {
                    let identifier = format!("{module}.*");
                    self.import(node, "*", identifier, node);
                }
                for item in names {
                    let imported = match item.kind() {
                        "aliased_import" => self.field_text(item, "name").unwrap_or(""),
                        _ => self.text(item),
                    };
                    let identifier = if module.is_empty() {
                        imported.to_string()
                    } else {
                        format!("{module}.{imported}")
                    };
                    self.import(item, last_segment(imported), identifier, node);
                }
                true
            }
            "assignment" if self.function_depth == 0 => {
                if let Some(left) = node.child_by_field_name("left") {
                    let targets: Vec<Node<'_>> = match left.kind() {
                        "identifier" => vec![left],
                        "pattern_list" | "tuple_pattern" => {
                            let mut cursor = left.walk();
                            left.named_children(&mut cursor)
                                .filter(|n| n.kind() == "identifier")
                                .collect()
                        }
                        _ => Vec::new(),
                    };
                    for target in targets {
                        let name = self.text(target);
                        let identifier = self.qualify(name);
                        let details = self.line_text(node.start_position().row);
                        self.push(node, name, identifier, TagCategory::VariableDefinition, details);
                    }
                }
                if let Some(right) = node.child_by_field_name("right") {
                    self.visit(right);
                }
                true
            }
            _ => false,
        }
    }

    // -- Java ----------------------------------------------------------------

    fn visit_java(&mut self, node: Node<'_>) -> bool {
        match node.kind() {
            "class_declaration"
            | "interface_declaration"
            | "enum_declaration"
            | "record_declaration"
            | "annotation_type_declaration" => {
                let Some(name) = self.field_text(node, "name") else {
                    return false;
                };
                self.define(node, name, TagCategory::ClassDefinition);
                for field in ["superclass", "interfaces"] {
                    if let Some(parent) = node.child_by_field_name(field) {
                        self.type_references(parent);
                    }
                }
                if let Some(body) = node.child_by_field_name("body") {
                    self.scope.push(name.to_string());
                    self.visit_children(body);
                    self.scope.pop();
                }
                true
            }
            "method_declaration" | "constructor_declaration" => {
                let Some(name) = self.field_text(node, "name") else {
                    return false;
                };
                self.define(node, name, TagCategory::FunctionDefinition);
                self.in_scope(name, true, node);
                true
            }
            "field_declaration" if self.function_depth == 0 => {
                let mut cursor = node.walk();
                let declarators: Vec<Node<'_>> =
                    node.children_by_field_name("declarator", &mut cursor).collect();
                for declarator in declarators {
                    if let Some(name) = self.field_text(declarator, "name") {
                        let identifier = self.qualify(name);
                        let details = self.line_text(node.start_position().row);
                        self.push(declarator, name, identifier, TagCategory::VariableDefinition, details);
                    }
                    if let Some(value) = declarator.child_by_field_name("value") {
                        self.visit(value);
                    }
                }
                true
            }
            "method_invocation" => {
                if let Some(name_node) = node.child_by_field_name("name") {
                    let name = self.text(name_node);
                    let expr = match self.field_text(node, "object") {
                        Some(object) => format!("{object}.{name}"),
                        None => name.to_string(),
                    };
                    self.reference(name_node, name, &expr);
                }
                self.visit_children(node);
                true
            }
            "object_creation_expression" => {
                if let Some(type_node) = node.child_by_field_name("type") {
                    let base = if type_node.kind() == "generic_type" {
                        type_node.named_child(0).unwrap_or(type_node)
                    } else {
                        type_node
                    };
                    let expr = self.text(base);
                    self.reference(type_node, last_segment(expr), expr);
                }
                self.visit_children(node);
                true
            }
            "import_declaration" => {
                let mut cursor = node.walk();
                let target = node
                    .named_children(&mut cursor)
                    .find(|n| matches!(n.kind(), "scoped_identifier" | "identifier"));
                if let Some(target) = target {
                    let path = self.text(target);
                    let wildcard = node
                        .named_children(&mut node.walk())
                        .any(|n| n.kind() == "asterisk");
                    let (name, identifier) = if wildcard {
                        ("*", format!("{path}.*"))
                    } else {
                        (last_segment(path), path.to_string())
                    };
                    self.import(target, name, identifier, node);
                }
                true
            }
            "package_declaration" => true,
            _ => false,
        }
    }

    // -- TypeScript ----------------------------------------------------------

    fn visit_typescript(&mut self, node: Node<'_>) -> bool {
        match node.kind() {
            "function_declaration" | "generator_function_declaration" => {
                let Some(name) = self.field_text(node, "name") else {
                    return false;
                };
                self.define(node, name, TagCategory::FunctionDefinition);
                self.in_scope(name, true, node);
                true
            }
            "class_declaration" | "abstract_class_declaration" => {
                let Some(name) = self.field_text(node, "name") else {
                    return false;
                };
                self.define(node, name, TagCategory::ClassDefinition);
                let mut cursor = node.walk();
                let heritage = node
                    .named_children(&mut cursor)
                    .find(|n| n.kind() == "class_heritage");
                if let Some(heritage) = heritage {
                    self.type_references(heritage);
                }
                if let Some(body) = node.child_by_field_name("body") {
                    self.scope.push(name.to_string());
                    self.visit_children(body);
                    self.scope.pop();
                }
                true
            }
            "interface_declaration" | "type_alias_declaration" | "enum_declaration" => {
                if let Some(name) = self.field_text(node, "name") {
                    self.define(node, name, TagCategory::ClassDefinition);
                }
                true
            }
            "method_definition" => {
                let Some(name) = self.field_text(node, "name") else {
                    return false;
                };
                self.define(node, name, TagCategory::FunctionDefinition);
                self.in_scope(name, true, node);
                true
            }
            "variable_declarator" => {
                let Some(name_node) = node.child_by_field_name("name") else {
                    return false;
                };
                if name_node.kind() != "identifier" {
                    return false;
                }
                let name = self.text(name_node);
                let value = node.child_by_field_name("value");
                let is_function = value.is_some_and(|v| {
                    matches!(
                        v.kind(),
                        "arrow_function" | "function_expression" | "function" | "generator_function"
                    )
                });
                if is_function {
                    self.define(node, name, TagCategory::FunctionDefinition);
                    if let Some(value) = value {
                        self.in_scope(name, true, value);
                    }
                    return true;
                }
                if self.function_depth == 0 {
                    let identifier = self.qualify(name);
                    let details = self.line_text(node.start_position().row);
                    self.push(node, name, identifier, TagCategory::VariableDefinition, details);
                }
                if let Some(value) = value {
                    self.visit(value);
                }
                true
            }
            "call_expression" => {
                if let Some(function) = node.child_by_field_name("function") {
                    match function.kind() {
                        "identifier" => {
                            let name = self.text(function);
                            self.reference(function, name, name);
                        }
                        "member_expression" => {
                            if let Some(prop) = self.field_text(function, "property") {
                                let expr = self.text(function);
                                self.reference(function, prop, expr);
                            }
                        }
                        _ => {}
                    }
                }
                self.visit_children(node);
                true
            }
            "new_expression" => {
                if let Some(ctor) = node.child_by_field_name("constructor") {
                    let expr = self.text(ctor);
                    self.reference(ctor, last_segment(expr), expr);
                }
                self.visit_children(node);
                true
            }
            "import_statement" => {
                let module = self
                    .field_text(node, "source")
                    .map(normalize_module_path)
                    .unwrap_or_default();
                let mut imported: Vec<(Node<'_>, &str)> = Vec::new();
                collect_ts_import_names(node, self.source, &mut imported);
                if imported.is_empty() {
                    let name = last_segment(&module).to_string();
                    self.import(node, &name, module.clone(), node);
                }
                for (item, name) in imported {
                    let identifier = format!("{module}.{name}");
                    self.import(item, name, identifier, node);
                }
                true
            }
            _ => false,
        }
    }

    // -- Go ------------------------------------------------------------------

    fn visit_go(&mut self, node: Node<'_>) -> bool {
        match node.kind() {
            "function_declaration" => {
                let Some(name) = self.field_text(node, "name") else {
                    return false;
                };
                self.define(node, name, TagCategory::FunctionDefinition);
                self.in_scope(name, true, node);
                true
            }
            "method_declaration" => {
                let Some(name) = self.field_text(node, "name") else {
                    return false;
                };
                let receiver = node
                    .child_by_field_name("receiver")
                    .and_then(|r| find_descendant(r, "type_identifier"))
                    .map(|n| self.text(n));
                if let Some(owner) = receiver {
                    self.scope.push(owner.to_string());
                }
                self.define(node, name, TagCategory::FunctionDefinition);
                self.in_scope(name, true, node);
                if receiver.is_some() {
                    self.scope.pop();
                }
                true
            }
            "type_spec" => {
                if let Some(name) = self.field_text(node, "name") {
                    self.define(node, name, TagCategory::ClassDefinition);
                }
                true
            }
            "const_spec" | "var_spec" if self.function_depth == 0 => {
                let mut cursor = node.walk();
                let names: Vec<Node<'_>> = node.children_by_field_name("name", &mut cursor).collect();
                for name_node in names {
                    let name = self.text(name_node);
                    let identifier = self.qualify(name);
                    let details = self.line_text(node.start_position().row);
                    self.push(name_node, name, identifier, TagCategory::VariableDefinition, details);
                }
                if let Some(value) = node.child_by_field_name("value") {
                    self.visit(value);
                }
                true
            }
            "call_expression" => {
                if let Some(function) = node.child_by_field_name("function") {
                    match function.kind() {
                        "identifier" => {
                            let name = self.text(function);
                            self.reference(function, name, name);
                        }
                        "selector_expression" => {
                            if let Some(field) = self.field_text(function, "field") {
                                let expr = self.text(function);
                                self.reference(function, field, expr);
                            }
                        }
                        _ => {}
                    }
                }
                self.visit_children(node);
                true
            }
            "composite_literal" => {
                if let Some(type_node) = node.child_by_field_name("type") {
                    if matches!(type_node.kind(), "type_identifier" | "qualified_type") {
                        let expr = self.text(type_node);
                        self.reference(type_node, last_segment(expr), expr);
                    }
                }
                if let Some(body) = node.child_by_field_name("body") {
                    self.visit(body);
                }
                true
            }
            "import_spec" => {
                if let Some(path) = self.field_text(node, "path") {
                    let trimmed = path.trim_matches('"');
                    let alias = self.field_text(node, "name");
                    let name = alias.unwrap_or_else(|| last_segment(trimmed));
                    self.import(node, name, trimmed.to_string(), node);
                }
                true
            }
            "package_clause" => true,
            _ => false,
        }
    }
}

fn find_descendant<'t>(node: Node<'t>, kind: &str) -> Option<Node<'t>> {
    let mut cursor = node.walk();
    let mut depth = 0;
    loop {
        let current = cursor.node();
        if current.is_named() && current.kind() == kind {
            return Some(current);
        }
        if cursor.goto_first_child() {
            depth += 1;
            continue;
        }
        if !skip_subtree(&mut cursor, &mut depth) {
            return None;
        }
    }
}

fn collect_ts_import_names<'t, 's>(node: Node<'t>, source: &'s str, out: &mut Vec<(Node<'t>, &'s str)>) {
    let mut cursor = node.walk();
    let children: Vec<Node<'t>> = node.named_children(&mut cursor).collect();
    for child in children {
        match child.kind() {
            "import_specifier" => {
                if let Some(name) = child.child_by_field_name("name") {
                    out.push((child, name.utf8_text(source.as_bytes()).unwrap_or("")));
                }
            }
            "namespace_import" => {
                if let Some(alias) = find_descendant(child, "identifier") {
                    out.push((child, alias.utf8_text(source.as_bytes()).unwrap_or("")));
                }
            }
            "identifier" if node.kind() == "import_clause" => {
                out.push((child, child.utf8_text(source.as_bytes()).unwrap_or("")));
            }
            "import_clause" | "named_imports" => collect_ts_import_names(child, source, out),
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn tags_for(src: &str, rel: &str) -> Vec<Tag> {
        let lang = detect_language(Path::new(rel)).unwrap();
        extract_source(src, rel, &PathBuf::from("/ws").join(rel), lang).unwrap()
    }

    fn summary(tags: &[Tag]) -> Vec<(TagCategory, String, u32)> {
        tags.iter().map(|t| (t.category, t.name.clone(), t.line)).collect()
    }

    // -- Python -------------------------------------------------------------

    #[test]
    fn python_definitions_and_calls() {
        let src = "\
import os
from pkg.util import helper as h

LIMIT = 3

class Store(Base):
    def load(self, key):
        return helper(key)

def main():
    s = Store()
    s.load(os.path.join('a', 'b'))
";
        let tags = tags_for(src, "app/store.py");
        let defs: Vec<_> = tags
            .iter()
            .filter(|t| t.is_definition())
            .map(|t| (t.category, t.identifier.as_str()))
            .collect();
        assert_eq!(
            defs,
            vec![
                (TagCategory::VariableDefinition, "app.store.LIMIT"),
                (TagCategory::ClassDefinition, "app.store.Store"),
                (TagCategory::FunctionDefinition, "app.store.Store.load"),
                (TagCategory::FunctionDefinition, "app.store.main"),
            ]
        );

        let refs: Vec<_> = tags
            .iter()
            .filter(|t| t.category == TagCategory::Reference)
            .map(|t| (t.name.as_str(), t.identifier.as_str(), t.line))
            .collect();
        assert_eq!(
            refs,
            vec![
                ("Base", "Base", 6),
                ("helper", "helper", 8),
                ("Store", "Store", 11),
                ("load", "s.load", 12),
                ("join", "os.path.join", 12),
            ]
        );

        let imports: Vec<_> = tags
            .iter()
            .filter(|t| t.category == TagCategory::Import)
            .map(|t| (t.name.as_str(), t.identifier.as_str()))
            .collect();
        assert_eq!(imports, vec![("os", "os"), ("helper", "pkg.util.helper")]);
    }

    #[test]
    fn python_definition_spans_body() {
        let src = "def foo(a, b):\n    x = 1\n    return a + b\n";
        let tags = tags_for(src, "a.py");
        assert_eq!(tags.len(), 1);
        assert_eq!(tags[0].line_range(), (1, 3));
        assert_eq!(tags[0].details, "def foo(a, b):");
        // Locals inside functions are not module variables.
        assert!(tags.iter().all(|t| t.category != TagCategory::VariableDefinition));
    }

    #[test]
    fn python_syntax_error_is_unparsable() {
        let err = extract_source("def broken(:\n  pass\n", "x.py", Path::new("/ws/x.py"), Lang::Python)
            .unwrap_err();
        assert!(matches!(err, ExtractIssue::Unparsable { .. }));
    }

    #[test]
    fn deeply_nested_expression_is_skipped_not_fatal() {
        let src = format!("x = 1{}\n", " + 1".repeat(20_000));
        let err = extract_source(&src, "gen.py", Path::new("/ws/gen.py"), Lang::Python).unwrap_err();
        assert_eq!(err, ExtractIssue::TooDeep { line: 1, limit: MAX_TREE_DEPTH });

        let shallow = format!("x = 1{}\n", " + 1".repeat(50));
        let tags = extract_source(&shallow, "gen.py", Path::new("/ws/gen.py"), Lang::Python).unwrap();
        assert_eq!(tags.len(), 1);
        assert_eq!(tags[0].category, TagCategory::VariableDefinition);
    }

    #[test]
    fn extraction_is_deterministic() {
        let src = "def a():\n    b()\n\ndef b():\n    a()\n";
        assert_eq!(tags_for(src, "m.py"), tags_for(src, "m.py"));
    }

    // -- Java ---------------------------------------------------------------

    #[test]
    fn java_classes_methods_and_invocations() {
        let src = "\
package com.example;

import java.util.List;

public class Service extends BaseService {
    private int count = 0;

    public void run() {
        Helper h = new Helper();
        h.assist(count);
    }
}
";
        let tags = tags_for(src, "src/Service.java");
        assert_eq!(
            summary(&tags),
            vec![
                (TagCategory::Import, "List".to_string(), 3),
                (TagCategory::ClassDefinition, "Service".to_string(), 5),
                (TagCategory::Reference, "BaseService".to_string(), 5),
                (TagCategory::VariableDefinition, "count".to_string(), 6),
                (TagCategory::FunctionDefinition, "run".to_string(), 8),
                (TagCategory::Reference, "Helper".to_string(), 9),
                (TagCategory::Reference, "assist".to_string(), 10),
            ]
        );
        let run = tags.iter().find(|t| t.name == "run").unwrap();
        assert_eq!(run.identifier, "src.Service.Service.run");
        assert_eq!(run.end_line, 11);
    }

    // -- TypeScript ---------------------------------------------------------

    #[test]
    fn typescript_functions_classes_and_imports() {
        let src = "\
import { parse, format as fmt } from './utils/text';

export function render(input: string): string {
  return fmt(parse(input));
}

export const shout = (s: string) => s.toUpperCase();

class Widget extends Base {
  draw() {
    render('x');
  }
}
";
        let tags = tags_for(src, "ui/widget.ts");
        let imports: Vec<_> = tags
            .iter()
            .filter(|t| t.category == TagCategory::Import)
            .map(|t| (t.name.as_str(), t.identifier.as_str()))
            .collect();
        assert_eq!(imports, vec![("parse", "utils.text.parse"), ("format", "utils.text.format")]);

        let defs: Vec<_> = tags
            .iter()
            .filter(|t| t.is_definition())
            .map(|t| t.identifier.as_str())
            .collect();
        assert_eq!(
            defs,
            vec!["ui.widget.render", "ui.widget.shout", "ui.widget.Widget", "ui.widget.Widget.draw"]
        );

        let refs: Vec<_> = tags
            .iter()
            .filter(|t| t.category == TagCategory::Reference)
            .map(|t| t.name.as_str())
            .collect();
        assert_eq!(refs, vec!["fmt", "parse", "toUpperCase", "Base", "render"]);
    }

    // -- Go -----------------------------------------------------------------

    #[test]
    fn go_functions_methods_and_types() {
        let src = "\
package server

import (
\t\"fmt\"
\tlog \"github.com/acme/logging\"
)

const MaxConns = 10

type Server struct {
\tname string
}

func (s *Server) Start() error {
\tfmt.Println(s.name)
\treturn nil
}

func New() *Server {
\tlog.Info(\"new\")
\treturn &Server{name: \"x\"}
}
";
        let tags = tags_for(src, "server/server.go");
        assert_eq!(
            summary(&tags),
            vec![
                (TagCategory::Import, "fmt".to_string(), 4),
                (TagCategory::Import, "log".to_string(), 5),
                (TagCategory::VariableDefinition, "MaxConns".to_string(), 8),
                (TagCategory::ClassDefinition, "Server".to_string(), 10),
                (TagCategory::FunctionDefinition, "Start".to_string(), 14),
                (TagCategory::Reference, "Println".to_string(), 15),
                (TagCategory::FunctionDefinition, "New".to_string(), 19),
                (TagCategory::Reference, "Info".to_string(), 20),
                (TagCategory::Reference, "Server".to_string(), 21),
            ]
        );
        let start = tags.iter().find(|t| t.name == "Start").unwrap();
        assert_eq!(start.identifier, "server.server.Server.Start");
    }

    // -- Files ----------------------------------------------------------------

    #[test]
    fn extract_file_reports_issues_without_failing() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("notes.txt"), "hello").unwrap();
        std::fs::write(dir.path().join("bin.py"), [0xff, 0xfe, 0x00]).unwrap();
        std::fs::write(dir.path().join("ok.py"), "def ok():\n    pass\n").unwrap();

        let unsupported = extract_file(dir.path(), &dir.path().join("notes.txt"));
        assert_eq!(unsupported.issue, Some(ExtractIssue::Unsupported));
        assert!(unsupported.tags.is_empty());

        let binary = extract_file(dir.path(), &dir.path().join("bin.py"));
        assert!(matches!(binary.issue, Some(ExtractIssue::Unreadable(_))));
        assert!(binary.content_hash.is_some());

        let missing = extract_file(dir.path(), &dir.path().join("gone.py"));
        assert!(matches!(missing.issue, Some(ExtractIssue::Unreadable(_))));

        let ok = extract_file(dir.path(), &dir.path().join("ok.py"));
        assert!(ok.issue.is_none());
        assert_eq!(ok.relative_path, "ok.py");
        assert_eq!(ok.tags.len(), 1);
        assert_eq!(ok.tags[0].absolute_path, dir.path().join("ok.py"));
    }

    #[test]
    fn module_paths_normalize_to_dotted_form() {
        assert_eq!(normalize_module_path("'./utils/text'"), "utils.text");
        assert_eq!(normalize_module_path("../../core/io"), "core.io");
        assert_eq!(normalize_module_path("..models"), "models");
        assert_eq!(normalize_module_path("github.com/acme/x"), "github.com.acme.x");
    }
}
