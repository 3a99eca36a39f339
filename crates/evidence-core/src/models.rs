//! Shared typed models used across indexing, storage, and query layers.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::EvidenceError;

/// Upper bound on the length of `Tag::details`.
pub const MAX_DETAILS_CHARS: usize = 240;

// ---------------------------------------------------------------------------
// TagCategory
// ---------------------------------------------------------------------------

/// Kind of symbol occurrence. Closed for a given build.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TagCategory {
    FunctionDefinition,
    ClassDefinition,
    VariableDefinition,
    Reference,
    Import,
}

impl TagCategory {
    pub const ALL: [TagCategory; 5] = [
        TagCategory::FunctionDefinition,
        TagCategory::ClassDefinition,
        TagCategory::VariableDefinition,
        TagCategory::Reference,
        TagCategory::Import,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            TagCategory::FunctionDefinition => "function_definition",
            TagCategory::ClassDefinition => "class_definition",
            TagCategory::VariableDefinition => "variable_definition",
            TagCategory::Reference => "reference",
            TagCategory::Import => "import",
        }
    }

    pub fn is_definition(self) -> bool {
        matches!(
            self,
            TagCategory::FunctionDefinition
                | TagCategory::ClassDefinition
                | TagCategory::VariableDefinition
        )
    }
}

impl fmt::Display for TagCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TagCategory {
    type Err = EvidenceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TagCategory::ALL
            .into_iter()
            .find(|c| c.as_str() == s.trim())
            .ok_or_else(|| EvidenceError::Index(format!("unknown tag category: {s}")))
    }
}

// ---------------------------------------------------------------------------
// Tag
// ---------------------------------------------------------------------------

/// One recorded occurrence of a named symbol.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Tag {
    pub absolute_path: PathBuf,
    pub relative_path: String,
    /// 1-based.
    pub line: u32,
    /// Last line of the enclosing body for definitions, `line` otherwise.
    pub end_line: u32,
    pub name: String,
    pub identifier: String,
    pub category: TagCategory,
    #[serde(default)]
    pub details: String,
}

impl Tag {
    pub fn is_definition(&self) -> bool {
        self.category.is_definition()
    }

    pub fn line_range(&self) -> (u32, u32) {
        (self.line, self.end_line.max(self.line))
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Convert a relative file path to a dotted module name.
///
/// Strips the file extension and joins path components with dots,
/// skipping any leading `/` or `.` segments.
pub fn to_module_name(path: &str) -> String {
    let p = Path::new(path);
    let without_ext = p.with_extension("");
    let parts: Vec<&str> = without_ext
        .components()
        .filter_map(|c| match c {
            std::path::Component::Normal(os) => os.to_str(),
            _ => None,
        })
        .filter(|s| !s.is_empty() && *s != ".")
        .collect();
    parts.join(".")
}

/// Workspace-relative path with `/` separators.
pub fn relative_path(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .to_string_lossy()
        .replace('\\', "/")
}

/// Collapse whitespace runs and cap the result at `MAX_DETAILS_CHARS`.
pub fn compact_details(raw: &str) -> String {
    let collapsed = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.chars().count() <= MAX_DETAILS_CHARS {
        return collapsed;
    }
    collapsed.chars().take(MAX_DETAILS_CHARS).collect()
}
