//! In-memory collaborators shared by the unit tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use regex::Regex;
use tokio_util::sync::CancellationToken;

use crate::errors::{CgragError, CgragResult, LlmError};
use crate::graph::CodeGraph;
use crate::llm::LanguageModel;
use crate::models::{DocType, Edge, EdgeKind, Node, NodeKind, ResultSource, SearchResult, SymbolEntry};
use crate::search::{FtsHit, FullTextSearch, VectorFilter, VectorHit, VectorMetadata, VectorSearch};
use crate::store::SymbolIndex;

// ---------------------------------------------------------------------------
// Language model
// ---------------------------------------------------------------------------

/// Replays canned replies in order; once exhausted it fails, unless built
/// with [`ScriptedLlm::repeating`].
pub struct ScriptedLlm {
    replies: Mutex<VecDeque<Result<String, LlmError>>>,
    fallback: Option<String>,
    delay: Option<Duration>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedLlm {
    pub fn new(replies: Vec<Result<String, LlmError>>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            fallback: None,
            delay: None,
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn repeating(reply: &str) -> Self {
        Self {
            replies: Mutex::new(VecDeque::new()),
            fallback: Some(reply.to_string()),
            delay: None,
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// Sleep this long inside every call, after recording the prompt.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Prompts seen so far, in call order.
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().clone()
    }
}

#[async_trait]
impl LanguageModel for ScriptedLlm {
    async fn generate(
        &self,
        prompt: &str,
        _system: Option<&str>,
        _temperature: f32,
        _cancel: &CancellationToken,
    ) -> Result<String, LlmError> {
        self.prompts.lock().push(prompt.to_string());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(reply) = self.replies.lock().pop_front() {
            return reply;
        }
        match &self.fallback {
            Some(reply) => Ok(reply.clone()),
            None => Err(LlmError::Generic("script exhausted".into())),
        }
    }
}

// ---------------------------------------------------------------------------
// Search channels
// ---------------------------------------------------------------------------

pub fn vector_hit(path: &str, title: &str, doc_type: &str, distance: f64) -> VectorHit {
    VectorHit {
        id: path.to_string(),
        document: format!("{title} content"),
        metadata: VectorMetadata {
            path: path.to_string(),
            title: title.to_string(),
            doc_type: doc_type.to_string(),
        },
        distance,
    }
}

pub fn fts_hit(path: &str, title: &str, doc_type: &str, score: f64) -> FtsHit {
    FtsHit {
        content: format!("{title} text"),
        title: title.to_string(),
        path: path.to_string(),
        doc_type: doc_type.to_string(),
        relevance_score: score,
    }
}

pub fn result(path: &str, doc_type: DocType, distance: f64, source: ResultSource) -> SearchResult {
    SearchResult {
        path: path.to_string(),
        content: format!("content of {path}"),
        title: path.to_string(),
        doc_type,
        distance,
        source,
    }
}

pub struct StaticVector {
    hits: Vec<VectorHit>,
    calls: AtomicUsize,
}

impl StaticVector {
    pub fn new(hits: Vec<VectorHit>) -> Self {
        Self {
            hits,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl VectorSearch for StaticVector {
    async fn query(
        &self,
        _text: &str,
        top_k: usize,
        _filter: Option<&VectorFilter>,
        _cancel: &CancellationToken,
    ) -> CgragResult<Vec<VectorHit>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.hits.iter().take(top_k).cloned().collect())
    }
}

pub struct StaticFts {
    hits: Vec<FtsHit>,
}

impl StaticFts {
    pub fn new(hits: Vec<FtsHit>) -> Self {
        Self { hits }
    }
}

#[async_trait]
impl FullTextSearch for StaticFts {
    async fn query(&self, _match_expr: &str, limit: usize, _cancel: &CancellationToken) -> CgragResult<Vec<FtsHit>> {
        Ok(self.hits.iter().take(limit).cloned().collect())
    }
}

pub struct FailingVector;

#[async_trait]
impl VectorSearch for FailingVector {
    async fn query(
        &self,
        _text: &str,
        _top_k: usize,
        _filter: Option<&VectorFilter>,
        _cancel: &CancellationToken,
    ) -> CgragResult<Vec<VectorHit>> {
        Err(CgragError::Retrieval("vector store offline".into()))
    }
}

pub struct FailingFts;

#[async_trait]
impl FullTextSearch for FailingFts {
    async fn query(&self, _match_expr: &str, _limit: usize, _cancel: &CancellationToken) -> CgragResult<Vec<FtsHit>> {
        Err(CgragError::Retrieval("fts index missing".into()))
    }
}

/// Sleeps before answering with nothing; honours cancellation.
pub struct SlowVector {
    delay: Duration,
}

impl SlowVector {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

#[async_trait]
impl VectorSearch for SlowVector {
    async fn query(
        &self,
        _text: &str,
        _top_k: usize,
        _filter: Option<&VectorFilter>,
        cancel: &CancellationToken,
    ) -> CgragResult<Vec<VectorHit>> {
        tokio::select! {
            _ = cancel.cancelled() => Err(CgragError::Cancelled),
            _ = tokio::time::sleep(self.delay) => Ok(Vec::new()),
        }
    }
}

// ---------------------------------------------------------------------------
// Symbol index
// ---------------------------------------------------------------------------

pub struct StaticSymbolIndex {
    entries: Vec<SymbolEntry>,
}

impl StaticSymbolIndex {
    pub fn new(entries: Vec<SymbolEntry>) -> Self {
        Self { entries }
    }

    fn collect<F>(&self, limit: usize, keep: F) -> Vec<SymbolEntry>
    where
        F: Fn(&SymbolEntry) -> bool,
    {
        let mut found: Vec<SymbolEntry> = self.entries.iter().filter(|e| keep(e)).cloned().collect();
        found.sort_by(|a, b| {
            a.file_path
                .len()
                .cmp(&b.file_path.len())
                .then_with(|| a.id().cmp(&b.id()))
        });
        found.truncate(limit);
        found
    }
}

fn file_matches(pattern: &str, path: &str) -> bool {
    if !pattern.contains('*') {
        return path.contains(pattern);
    }
    let body = pattern
        .split('*')
        .map(regex::escape)
        .collect::<Vec<_>>()
        .join(".*");
    Regex::new(&format!("^{body}$")).is_ok_and(|re| re.is_match(path))
}

impl SymbolIndex for StaticSymbolIndex {
    fn by_raises(&self, exception: &str, limit: usize) -> CgragResult<Vec<SymbolEntry>> {
        Ok(self.collect(limit, |e| e.raises.iter().any(|r| r == exception)))
    }

    fn by_error_string(&self, fragment: &str, limit: usize) -> CgragResult<Vec<SymbolEntry>> {
        let needle = fragment.to_lowercase();
        Ok(self.collect(limit, |e| {
            e.error_strings.iter().any(|s| s.to_lowercase().contains(&needle))
        }))
    }

    fn by_mutates(&self, variable: &str, limit: usize) -> CgragResult<Vec<SymbolEntry>> {
        Ok(self.collect(limit, |e| e.mutates.iter().any(|m| m == variable)))
    }

    fn find_symbols(
        &self,
        file_pattern: Option<&str>,
        name: Option<&str>,
        limit: usize,
    ) -> CgragResult<Vec<SymbolEntry>> {
        Ok(self.collect(limit, |e| {
            name.map_or(true, |n| e.symbol_name == n)
                && file_pattern.map_or(true, |p| file_matches(p, &e.file_path))
        }))
    }

    fn callers_of(&self, name: &str, limit: usize) -> CgragResult<Vec<SymbolEntry>> {
        Ok(self.collect(limit, |e| e.calls.iter().any(|c| c == name)))
    }

    fn callees_of(&self, name: &str, limit: usize) -> CgragResult<Vec<SymbolEntry>> {
        Ok(self.collect(limit, |e| e.called_by.iter().any(|c| c == name)))
    }
}

// ---------------------------------------------------------------------------
// Graph
// ---------------------------------------------------------------------------

/// `main -> helper -> get_db`, plus `main` instantiating `User`.
pub fn sample_graph() -> CodeGraph {
    let nodes = vec![
        Node::new(NodeKind::Function, "main", "app.py", 1, 20),
        Node::new(NodeKind::Function, "helper", "utils.py", 3, 12).with_signature("def helper(x)"),
        Node::new(NodeKind::Function, "get_db", "db.py", 5, 18),
        Node::new(NodeKind::Class, "User", "models.py", 1, 40),
    ];
    let edges = vec![
        Edge::calls("app.py::main", "utils.py::helper", 0.9),
        Edge::calls("utils.py::helper", "db.py::get_db", 0.8),
        Edge::new("app.py::main", "models.py::User", EdgeKind::Instantiates, 0.6, 4),
    ];
    CodeGraph::new(nodes, edges)
}
