//! Question modes and the symbol-index retrievers behind them.

use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use indexmap::IndexMap;
use rayon::prelude::*;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::cgrag::parser::extract_node_name;
use crate::cgrag::strategies::{RetrievalStrategy, Retrieved};
use crate::errors::{CgragError, CgragResult};
use crate::guards::{clamp_usize, MAX_EXPLORE_DEPTH, MAX_HOTSPOTS, MAX_SEARCH_LIMIT, MAX_SYMBOL_SCAN};
use crate::models::{SearchResult, SymbolEntry};
use crate::store::SymbolIndex;

// ---------------------------------------------------------------------------
// AskMode
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AskMode {
    #[default]
    General,
    Diagnostic,
    Exploratory,
    Analytical,
}

impl AskMode {
    pub fn as_str(self) -> &'static str {
        match self {
            AskMode::General => "general",
            AskMode::Diagnostic => "diagnostic",
            AskMode::Exploratory => "exploratory",
            AskMode::Analytical => "analytical",
        }
    }

    /// The extra strategy this mode contributes, if any.
    pub fn strategy(self, index: Arc<dyn SymbolIndex>) -> Option<Arc<dyn RetrievalStrategy>> {
        match self {
            AskMode::General => None,
            AskMode::Diagnostic => Some(Arc::new(DiagnosticStrategy::new(index))),
            AskMode::Exploratory => Some(Arc::new(ExploratoryStrategy::new(index))),
            AskMode::Analytical => Some(Arc::new(AnalyticalStrategy::new(index))),
        }
    }
}

impl fmt::Display for AskMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AskMode {
    type Err = CgragError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "" | "general" => Ok(AskMode::General),
            "diagnostic" => Ok(AskMode::Diagnostic),
            "exploratory" => Ok(AskMode::Exploratory),
            "analytical" => Ok(AskMode::Analytical),
            other => Err(CgragError::Config(format!("Unknown ask mode: {other}"))),
        }
    }
}

// ---------------------------------------------------------------------------
// Shared helpers
// ---------------------------------------------------------------------------

/// Run a symbol-index computation on the blocking pool, abandoning it when
/// `cancel` fires.
async fn run_blocking<T, F>(cancel: &CancellationToken, work: F) -> CgragResult<T>
where
    T: Send + 'static,
    F: FnOnce() -> CgragResult<T> + Send + 'static,
{
    let task = tokio::task::spawn_blocking(work);
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(CgragError::Cancelled),
        joined = task => joined
            .map_err(|e| CgragError::Retrieval(format!("symbol index task failed: {e}")))?,
    }
}

fn package(results: Vec<SearchResult>) -> Option<Retrieved> {
    if results.is_empty() {
        return None;
    }
    let text = results
        .iter()
        .map(SearchResult::context_block)
        .collect::<Vec<_>>()
        .join("\n\n");
    Some(Retrieved {
        text,
        nodes: Vec::new(),
        results,
    })
}

// ---------------------------------------------------------------------------
// Diagnostic
// ---------------------------------------------------------------------------

static EXCEPTION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b([A-Z][A-Za-z0-9_]*(?:Error|Exception|Fault|Failure))\b").unwrap()
});

static QUOTED_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#""([^"\n]{4,200})"|'([^'\n]{4,200})'"#).unwrap());

static PY_FRAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"File "([^"]+)", line \d+, in ([A-Za-z_][A-Za-z0-9_]*)"#).unwrap()
});

static CALL_FRAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(?:in|at)\s+(?:[A-Za-z_][A-Za-z0-9_]*\.)*([A-Za-z_][A-Za-z0-9_]*)\s*\(").unwrap()
});

/// Error evidence pulled out of a question or gap.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiagnosticSignals {
    pub exceptions: Vec<String>,
    pub messages: Vec<String>,
    /// `(file hint, function name)` pairs from stack frames.
    pub frames: Vec<(Option<String>, String)>,
}

impl DiagnosticSignals {
    pub fn is_empty(&self) -> bool {
        self.exceptions.is_empty() && self.messages.is_empty() && self.frames.is_empty()
    }
}

fn push_unique<T: PartialEq>(items: &mut Vec<T>, item: T) {
    if !items.contains(&item) {
        items.push(item);
    }
}

pub fn diagnostic_signals(text: &str) -> DiagnosticSignals {
    let mut signals = DiagnosticSignals::default();
    for caps in EXCEPTION_RE.captures_iter(text) {
        push_unique(&mut signals.exceptions, caps[1].to_string());
    }
    for caps in PY_FRAME_RE.captures_iter(text) {
        push_unique(&mut signals.frames, (Some(caps[1].to_string()), caps[2].to_string()));
    }
    for caps in CALL_FRAME_RE.captures_iter(text) {
        push_unique(&mut signals.frames, (None, caps[1].to_string()));
    }
    for caps in QUOTED_RE.captures_iter(text) {
        let Some(message) = caps.get(1).or_else(|| caps.get(2)) else {
            continue;
        };
        let message = message.as_str().trim();
        let is_frame_path = signals
            .frames
            .iter()
            .any(|(file, _)| file.as_deref() == Some(message));
        if !message.is_empty() && !is_frame_path {
            push_unique(&mut signals.messages, message.to_string());
        }
    }
    signals
}

/// Looks up raisers of named exceptions, emitters of quoted error
/// messages, and functions named in stack frames.
pub struct DiagnosticStrategy {
    index: Arc<dyn SymbolIndex>,
    limit: usize,
}

impl DiagnosticStrategy {
    pub fn new(index: Arc<dyn SymbolIndex>) -> Self {
        Self { index, limit: 10 }
    }
}

fn diagnose(index: &dyn SymbolIndex, signals: &DiagnosticSignals, limit: usize) -> CgragResult<Vec<SearchResult>> {
    let mut found: IndexMap<String, SearchResult> = IndexMap::new();
    let mut add = |entries: Vec<SymbolEntry>, distance: f64| {
        for entry in entries {
            found.entry(entry.id()).or_insert_with(|| entry.to_search_result(distance));
        }
    };
    for exception in &signals.exceptions {
        add(index.by_raises(exception, limit)?, 0.1);
    }
    for message in &signals.messages {
        add(index.by_error_string(message, limit)?, 0.15);
    }
    for (file, function) in &signals.frames {
        add(index.find_symbols(file.as_deref(), Some(function), limit)?, 0.2);
    }
    Ok(found.into_values().take(limit).collect())
}

#[async_trait]
impl RetrievalStrategy for DiagnosticStrategy {
    fn name(&self) -> &'static str {
        "diagnostic"
    }

    fn can_handle(&self, gap: &str) -> bool {
        !diagnostic_signals(gap).is_empty()
    }

    async fn retrieve(&self, gap: &str, cancel: &CancellationToken) -> CgragResult<Option<Retrieved>> {
        let signals = diagnostic_signals(gap);
        if signals.is_empty() {
            return Ok(None);
        }
        debug!(
            "Diagnostic signals: {} exceptions, {} messages, {} frames",
            signals.exceptions.len(),
            signals.messages.len(),
            signals.frames.len()
        );
        let index = self.index.clone();
        let limit = self.limit;
        let results = run_blocking(cancel, move || diagnose(index.as_ref(), &signals, limit)).await?;
        Ok(package(results))
    }
}

// ---------------------------------------------------------------------------
// Exploratory
// ---------------------------------------------------------------------------

/// Resolves the named symbol and walks its outgoing calls breadth-first.
pub struct ExploratoryStrategy {
    index: Arc<dyn SymbolIndex>,
    depth: usize,
    max_nodes: usize,
}

impl ExploratoryStrategy {
    pub fn new(index: Arc<dyn SymbolIndex>) -> Self {
        Self {
            index,
            depth: 2,
            max_nodes: 40,
        }
    }

    pub fn with_depth(mut self, depth: usize) -> Self {
        self.depth = clamp_usize(depth, 1, MAX_EXPLORE_DEPTH);
        self
    }
}

fn lookup_one(index: &dyn SymbolIndex, name: &str) -> CgragResult<Option<SymbolEntry>> {
    Ok(index.find_symbols(None, Some(name), 1)?.into_iter().next())
}

fn explore(
    index: &dyn SymbolIndex,
    root_name: &str,
    depth: usize,
    max_nodes: usize,
) -> CgragResult<Vec<(usize, SymbolEntry)>> {
    let Some(root) = lookup_one(index, root_name)? else {
        return Ok(Vec::new());
    };
    let mut visited: HashSet<String> = HashSet::from([root.symbol_name.clone()]);
    let mut order: Vec<(usize, SymbolEntry)> = Vec::new();
    let mut queue: VecDeque<(usize, SymbolEntry)> = VecDeque::from([(0, root)]);

    while let Some((level, entry)) = queue.pop_front() {
        if level < depth {
            for callee in &entry.calls {
                if order.len() + queue.len() + 1 >= max_nodes {
                    break;
                }
                if !visited.insert(callee.clone()) {
                    continue;
                }
                if let Some(next) = lookup_one(index, callee)? {
                    queue.push_back((level + 1, next));
                }
            }
        }
        order.push((level, entry));
    }
    Ok(order)
}

fn render_call_tree(tree: &[(usize, SymbolEntry)]) -> String {
    let mut lines = Vec::with_capacity(tree.len() + 1);
    if let Some((_, root)) = tree.first() {
        lines.push(format!("Call tree from `{}`:", root.symbol_name));
    }
    for (level, entry) in tree {
        lines.push(format!(
            "{}- {} ({}:{}-{})",
            "  ".repeat(*level),
            entry.symbol_name,
            entry.file_path,
            entry.line_start,
            entry.line_end
        ));
    }
    lines.join("\n")
}

#[async_trait]
impl RetrievalStrategy for ExploratoryStrategy {
    fn name(&self) -> &'static str {
        "exploratory"
    }

    fn can_handle(&self, gap: &str) -> bool {
        extract_node_name(gap).is_some()
    }

    async fn retrieve(&self, gap: &str, cancel: &CancellationToken) -> CgragResult<Option<Retrieved>> {
        let Some(name) = extract_node_name(gap) else {
            return Ok(None);
        };
        let index = self.index.clone();
        let (depth, max_nodes) = (self.depth, self.max_nodes);
        let tree = run_blocking(cancel, move || explore(index.as_ref(), &name, depth, max_nodes)).await?;
        if tree.is_empty() {
            return Ok(None);
        }

        let mut text = render_call_tree(&tree);
        text.push_str("\n\n");
        text.push_str(&tree[0].1.describe());
        let results = tree
            .iter()
            .map(|(level, entry)| entry.to_search_result(0.2 + 0.15 * *level as f64))
            .collect();
        Ok(Some(Retrieved {
            text,
            nodes: Vec::new(),
            results,
        }))
    }
}

// ---------------------------------------------------------------------------
// Analytical
// ---------------------------------------------------------------------------

static ANALYTICAL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(architecture|hotspots?|coupling|coupled|complexity|central|most (?:called|used|connected)|dependencies|overview|structure)\b",
    )
    .unwrap()
});

static FILE_HINT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"([A-Za-z0-9_.\-]+/[A-Za-z0-9_./\-*]*|[A-Za-z0-9_\-]+\.(?:py|rs|ts|tsx|js|go|java|rb))")
        .unwrap()
});

/// A symbol ranked by how connected it is.
#[derive(Debug, Clone, PartialEq)]
pub struct Hotspot {
    pub entry: SymbolEntry,
    pub fan_in: usize,
    pub fan_out: usize,
}

impl Hotspot {
    pub fn score(&self) -> usize {
        self.fan_in + self.fan_out
    }
}

/// Rank entries by fan-in + fan-out; ties by file path then name.
pub fn rank_hotspots(entries: Vec<SymbolEntry>, top: usize) -> Vec<Hotspot> {
    let mut ranked: Vec<Hotspot> = entries
        .into_par_iter()
        .map(|entry| Hotspot {
            fan_in: entry.called_by.len(),
            fan_out: entry.calls.len(),
            entry,
        })
        .filter(|h| h.score() > 0)
        .collect();
    ranked.par_sort_by(|a, b| {
        b.score()
            .cmp(&a.score())
            .then_with(|| a.entry.file_path.cmp(&b.entry.file_path))
            .then_with(|| a.entry.symbol_name.cmp(&b.entry.symbol_name))
    });
    ranked.truncate(top);
    ranked
}

/// Ranks symbols, optionally scoped to a file pattern, by call traffic.
pub struct AnalyticalStrategy {
    index: Arc<dyn SymbolIndex>,
    top: usize,
}

impl AnalyticalStrategy {
    pub fn new(index: Arc<dyn SymbolIndex>) -> Self {
        Self { index, top: 10 }
    }

    pub fn with_top(mut self, top: usize) -> Self {
        self.top = clamp_usize(top, 1, MAX_HOTSPOTS);
        self
    }
}

#[async_trait]
impl RetrievalStrategy for AnalyticalStrategy {
    fn name(&self) -> &'static str {
        "analytical"
    }

    fn can_handle(&self, gap: &str) -> bool {
        ANALYTICAL_RE.is_match(gap)
    }

    async fn retrieve(&self, gap: &str, cancel: &CancellationToken) -> CgragResult<Option<Retrieved>> {
        let pattern = FILE_HINT_RE.find(gap).map(|m| m.as_str().to_string());
        let index = self.index.clone();
        let top = self.top;
        let scan_pattern = pattern.clone();
        let hotspots = run_blocking(cancel, move || {
            let entries = index.find_symbols(scan_pattern.as_deref(), None, MAX_SYMBOL_SCAN)?;
            Ok(rank_hotspots(entries, top))
        })
        .await?;
        if hotspots.is_empty() {
            return Ok(None);
        }

        let scope = pattern.map(|p| format!(" in {p}")).unwrap_or_default();
        let mut lines = vec![format!("Most connected symbols{scope}:")];
        for (rank, hotspot) in hotspots.iter().enumerate() {
            lines.push(format!(
                "{}. {} ({}:{}-{}) fan-in {}, fan-out {}",
                rank + 1,
                hotspot.entry.symbol_name,
                hotspot.entry.file_path,
                hotspot.entry.line_start,
                hotspot.entry.line_end,
                hotspot.fan_in,
                hotspot.fan_out
            ));
        }
        let results = hotspots
            .iter()
            .take(MAX_SEARCH_LIMIT)
            .map(|h| h.entry.to_search_result(0.4))
            .collect();
        Ok(Some(Retrieved {
            text: lines.join("\n"),
            nodes: Vec::new(),
            results,
        }))
    }
}
