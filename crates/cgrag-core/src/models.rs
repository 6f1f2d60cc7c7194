//! Shared typed models used across the graph, search, and refinement layers.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::CgragError;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Build the canonical node id `"<file_path>::<symbol_name>"`.
pub fn node_id(file_path: &str, symbol_name: &str) -> String {
    format!("{file_path}::{symbol_name}")
}

/// Normalize a document path for deduplication: forward slashes, no leading
/// `./`, no trailing slash, lowercase.
pub fn normalize_path(path: &str) -> String {
    let mut normalized = path.trim().replace('\\', "/");
    while let Some(stripped) = normalized.strip_prefix("./") {
        normalized = stripped.to_string();
    }
    while normalized.len() > 1 && normalized.ends_with('/') {
        normalized.pop();
    }
    normalized.to_lowercase()
}

// ---------------------------------------------------------------------------
// 1. NodeKind
// ---------------------------------------------------------------------------

/// Kind of code symbol a graph node represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Function,
    Method,
    Class,
    Interface,
    Enum,
    Variable,
    Constant,
    Route,
    CliCommand,
}

impl NodeKind {
    pub const ALL: [NodeKind; 9] = [
        NodeKind::Function,
        NodeKind::Method,
        NodeKind::Class,
        NodeKind::Interface,
        NodeKind::Enum,
        NodeKind::Variable,
        NodeKind::Constant,
        NodeKind::Route,
        NodeKind::CliCommand,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            NodeKind::Function => "function",
            NodeKind::Method => "method",
            NodeKind::Class => "class",
            NodeKind::Interface => "interface",
            NodeKind::Enum => "enum",
            NodeKind::Variable => "variable",
            NodeKind::Constant => "constant",
            NodeKind::Route => "route",
            NodeKind::CliCommand => "cli_command",
        }
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NodeKind {
    type Err = CgragError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let lowered = value.trim().to_lowercase();
        NodeKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == lowered)
            .ok_or_else(|| CgragError::Store(format!("Unknown node kind: {value}")))
    }
}

// ---------------------------------------------------------------------------
// 2. Node
// ---------------------------------------------------------------------------

/// A code symbol in the graph. Immutable within a graph snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: String,
    pub kind: NodeKind,
    pub name: String,
    pub file_path: String,
    pub line_start: i64,
    pub line_end: i64,
    pub docstring: Option<String>,
    pub signature: Option<String>,
}

impl Node {
    pub fn new(
        kind: NodeKind,
        name: impl Into<String>,
        file_path: impl Into<String>,
        line_start: i64,
        line_end: i64,
    ) -> Self {
        let name = name.into();
        let file_path = file_path.into();
        Self {
            id: node_id(&file_path, &name),
            kind,
            name,
            file_path,
            line_start,
            line_end,
            docstring: None,
            signature: None,
        }
    }

    pub fn with_signature(mut self, signature: impl Into<String>) -> Self {
        self.signature = Some(signature.into());
        self
    }

    pub fn with_docstring(mut self, docstring: impl Into<String>) -> Self {
        self.docstring = Some(docstring.into());
        self
    }

    /// `file:start-end` location label.
    pub fn location(&self) -> String {
        format!("{}:{}-{}", self.file_path, self.line_start, self.line_end)
    }
}

// ---------------------------------------------------------------------------
// 3. EdgeKind / Edge
// ---------------------------------------------------------------------------

/// Relationship carried by a directed edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeKind {
    Calls,
    Inherits,
    Instantiates,
    TypeAnnotation,
}

impl EdgeKind {
    pub const ALL: [EdgeKind; 4] = [
        EdgeKind::Calls,
        EdgeKind::Inherits,
        EdgeKind::Instantiates,
        EdgeKind::TypeAnnotation,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            EdgeKind::Calls => "calls",
            EdgeKind::Inherits => "inherits",
            EdgeKind::Instantiates => "instantiates",
            EdgeKind::TypeAnnotation => "type_annotation",
        }
    }
}

impl fmt::Display for EdgeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EdgeKind {
    type Err = CgragError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let lowered = value.trim().to_lowercase();
        EdgeKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == lowered)
            .ok_or_else(|| CgragError::Store(format!("Unknown edge kind: {value}")))
    }
}

/// A directed, confidence-scored relation between two symbols.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    pub source_id: String,
    pub target_id: String,
    pub kind: EdgeKind,
    pub confidence: f64,
    pub line: i64,
}

impl Edge {
    pub fn new(
        source_id: impl Into<String>,
        target_id: impl Into<String>,
        kind: EdgeKind,
        confidence: f64,
        line: i64,
    ) -> Self {
        Self {
            source_id: source_id.into(),
            target_id: target_id.into(),
            kind,
            confidence: confidence.clamp(0.0, 1.0),
            line,
        }
    }

    pub fn calls(source_id: impl Into<String>, target_id: impl Into<String>, confidence: f64) -> Self {
        Self::new(source_id, target_id, EdgeKind::Calls, confidence, 0)
    }
}

// ---------------------------------------------------------------------------
// 4. SearchResult
// ---------------------------------------------------------------------------

/// Document category of a search hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocType {
    Wiki,
    Code,
    Note,
}

impl DocType {
    /// Fusion tie-break priority; lower sorts first.
    pub fn priority(self) -> u8 {
        match self {
            DocType::Note => 0,
            DocType::Code => 1,
            DocType::Wiki => 2,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DocType::Wiki => "wiki",
            DocType::Code => "code",
            DocType::Note => "note",
        }
    }

    /// Lenient parse used for collaborator metadata; unknown values are wiki.
    pub fn parse_lenient(value: &str) -> Self {
        match value.trim().to_lowercase().as_str() {
            "code" => DocType::Code,
            "note" | "notes" => DocType::Note,
            _ => DocType::Wiki,
        }
    }
}

/// Channel a search result came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultSource {
    Semantic,
    Fts,
    SymbolIndex,
    Graph,
}

/// A transient retrieval hit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub path: String,
    pub content: String,
    pub title: String,
    #[serde(rename = "type")]
    pub doc_type: DocType,
    pub distance: f64,
    pub source: ResultSource,
}

impl SearchResult {
    /// Labeled block used when the hit is fed to the LLM as context.
    pub fn context_block(&self) -> String {
        format!(
            "[{}] {} ({})\n{}",
            self.doc_type.as_str(),
            self.title,
            self.path,
            self.content.trim_end()
        )
    }
}

// ---------------------------------------------------------------------------
// 5. SymbolEntry
// ---------------------------------------------------------------------------

/// Row returned by the symbol-index collaborator.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SymbolEntry {
    pub file_path: String,
    pub symbol_name: String,
    pub symbol_type: String,
    pub line_start: i64,
    pub line_end: i64,
    pub signature: Option<String>,
    pub docstring: Option<String>,
    pub calls: Vec<String>,
    pub called_by: Vec<String>,
    pub raises: Vec<String>,
    pub mutates: Vec<String>,
    pub error_strings: Vec<String>,
}

impl SymbolEntry {
    pub fn id(&self) -> String {
        node_id(&self.file_path, &self.symbol_name)
    }

    /// Render the entry as a context block for the LLM.
    pub fn describe(&self) -> String {
        let mut lines = vec![format!(
            "{} `{}` in {} (lines {}-{})",
            self.symbol_type, self.symbol_name, self.file_path, self.line_start, self.line_end
        )];
        if let Some(signature) = self.signature.as_deref().filter(|s| !s.is_empty()) {
            lines.push(format!("signature: {signature}"));
        }
        if let Some(doc) = self.docstring.as_deref().filter(|s| !s.is_empty()) {
            lines.push(format!("doc: {doc}"));
        }
        for (label, values) in [
            ("calls", &self.calls),
            ("called by", &self.called_by),
            ("raises", &self.raises),
            ("mutates", &self.mutates),
            ("error strings", &self.error_strings),
        ] {
            if !values.is_empty() {
                lines.push(format!("{label}: {}", values.join(", ")));
            }
        }
        lines.join("\n")
    }

    /// Convert to a search hit attributed to the symbol index.
    pub fn to_search_result(&self, distance: f64) -> SearchResult {
        SearchResult {
            path: self.file_path.clone(),
            content: self.describe(),
            title: self.symbol_name.clone(),
            doc_type: DocType::Code,
            distance: distance.clamp(0.0, 1.0),
            source: ResultSource::SymbolIndex,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_id_joins_path_and_name() {
        let node = Node::new(NodeKind::Function, "verify_token", "auth/verify.py", 3, 9);
        assert_eq!(node.id, "auth/verify.py::verify_token");
        assert_eq!(node.location(), "auth/verify.py:3-9");
    }

    #[test]
    fn kinds_round_trip_through_strings() {
        for kind in NodeKind::ALL {
            assert_eq!(kind.as_str().parse::<NodeKind>().unwrap(), kind);
        }
        for kind in EdgeKind::ALL {
            assert_eq!(kind.as_str().parse::<EdgeKind>().unwrap(), kind);
        }
        assert!("lambda".parse::<NodeKind>().is_err());
    }

    #[test]
    fn edge_confidence_is_clamped() {
        assert_eq!(Edge::calls("a", "b", 1.7).confidence, 1.0);
        assert_eq!(Edge::calls("a", "b", -0.2).confidence, 0.0);
    }

    #[test]
    fn doc_type_priority_orders_note_code_wiki() {
        assert!(DocType::Note.priority() < DocType::Code.priority());
        assert!(DocType::Code.priority() < DocType::Wiki.priority());
        assert_eq!(DocType::parse_lenient("CODE"), DocType::Code);
        assert_eq!(DocType::parse_lenient("unknown"), DocType::Wiki);
    }

    #[test]
    fn normalize_path_strips_noise() {
        assert_eq!(normalize_path("./Docs/Auth.md"), "docs/auth.md");
        assert_eq!(normalize_path("src\\db\\"), "src/db");
        assert_eq!(normalize_path("  a/b "), "a/b");
    }

    #[test]
    fn search_result_serializes_type_field() {
        let result = SearchResult {
            path: "wiki/auth.md".into(),
            content: "Auth overview".into(),
            title: "Auth".into(),
            doc_type: DocType::Wiki,
            distance: 0.2,
            source: ResultSource::Semantic,
        };
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["type"], "wiki");
        assert_eq!(json["source"], "semantic");
    }

    #[test]
    fn symbol_entry_describe_lists_facts() {
        let entry = SymbolEntry {
            file_path: "app/db.py".into(),
            symbol_name: "get_db".into(),
            symbol_type: "function".into(),
            line_start: 10,
            line_end: 20,
            raises: vec!["OperationalError".into()],
            ..Default::default()
        };
        let text = entry.describe();
        assert!(text.contains("function `get_db` in app/db.py"));
        assert!(text.contains("raises: OperationalError"));
        assert!(!text.contains("calls:"));
        assert_eq!(entry.to_search_result(0.1).source, ResultSource::SymbolIndex);
    }
}
