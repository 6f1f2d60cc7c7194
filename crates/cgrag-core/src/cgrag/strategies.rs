//! Gap retrieval strategies and the ordered chain that dispatches them.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::cgrag::parser::{extract_node_name, is_specific_gap};
use crate::cgrag::session::SessionHandle;
use crate::config::CgragConfig;
use crate::errors::{CgragError, CgragResult};
use crate::graph::{CodeGraph, GraphHandle, Subgraph};
use crate::models::{DocType, Node, ResultSource, SearchResult};
use crate::search::VectorSearch;

/// Distance assigned to the symbol a graph lookup resolved exactly.
const GRAPH_HIT_DISTANCE: f64 = 0.2;

/// Context produced for one gap.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Retrieved {
    pub text: String,
    /// Graph nodes to cache in the session.
    pub nodes: Vec<Node>,
    pub results: Vec<SearchResult>,
}

#[async_trait]
pub trait RetrievalStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    fn can_handle(&self, gap: &str) -> bool;

    /// `Ok(None)` is a miss, not an error.
    async fn retrieve(&self, gap: &str, cancel: &CancellationToken) -> CgragResult<Option<Retrieved>>;
}

// ---------------------------------------------------------------------------
// GraphLookup
// ---------------------------------------------------------------------------

pub struct GraphLookup {
    graph: GraphHandle,
    hops: usize,
    min_confidence: f64,
}

impl GraphLookup {
    pub fn new(graph: GraphHandle, hops: usize, min_confidence: f64) -> Self {
        Self {
            graph,
            hops: hops.max(1),
            min_confidence,
        }
    }
}

/// Render a neighborhood around `center` as an LLM context block.
pub fn render_subgraph(center: &Node, subgraph: &Subgraph, graph: &CodeGraph) -> String {
    let mut lines = vec![format!(
        "[code] {} `{}` ({})",
        center.kind,
        center.name,
        center.location()
    )];
    if let Some(signature) = &center.signature {
        lines.push(format!("signature: {signature}"));
    }
    if let Some(doc) = &center.docstring {
        lines.push(format!("doc: {doc}"));
    }
    let related: Vec<&Node> = subgraph.nodes.iter().filter(|n| n.id != center.id).collect();
    if !related.is_empty() {
        lines.push("related symbols:".to_string());
        for node in related {
            lines.push(format!("- {} `{}` ({})", node.kind, node.name, node.location()));
        }
    }
    if !subgraph.edges.is_empty() {
        lines.push("relationships:".to_string());
        for edge in &subgraph.edges {
            let label = |id: &str| graph.node(id).map(|n| n.name.clone()).unwrap_or_else(|| id.to_string());
            lines.push(format!(
                "- {} {} {} (confidence {:.2})",
                label(&edge.source_id),
                edge.kind,
                label(&edge.target_id),
                edge.confidence
            ));
        }
    }
    lines.join("\n")
}

#[async_trait]
impl RetrievalStrategy for GraphLookup {
    fn name(&self) -> &'static str {
        "graph"
    }

    fn can_handle(&self, gap: &str) -> bool {
        is_specific_gap(gap) && self.graph.snapshot().is_some()
    }

    async fn retrieve(&self, gap: &str, _cancel: &CancellationToken) -> CgragResult<Option<Retrieved>> {
        let Some(graph) = self.graph.snapshot() else {
            return Ok(None);
        };
        let Some(name) = extract_node_name(gap) else {
            return Ok(None);
        };
        let Some(center) = graph.find_symbol(&name) else {
            debug!("Graph lookup miss for {name:?}");
            return Ok(None);
        };
        let subgraph = graph.get_neighborhood(&center.id, self.hops, self.min_confidence);
        let text = render_subgraph(center, &subgraph, &graph);
        let result = SearchResult {
            path: center.file_path.clone(),
            content: text.clone(),
            title: center.name.clone(),
            doc_type: DocType::Code,
            distance: GRAPH_HIT_DISTANCE,
            source: ResultSource::Graph,
        };
        Ok(Some(Retrieved {
            text,
            nodes: subgraph.nodes,
            results: vec![result],
        }))
    }
}

// ---------------------------------------------------------------------------
// VectorLookup
// ---------------------------------------------------------------------------

pub struct VectorLookup {
    vector: Arc<dyn VectorSearch>,
    top_k: usize,
}

impl VectorLookup {
    pub fn new(vector: Arc<dyn VectorSearch>, top_k: usize) -> Self {
        Self {
            vector,
            top_k: top_k.max(1),
        }
    }
}

#[async_trait]
impl RetrievalStrategy for VectorLookup {
    fn name(&self) -> &'static str {
        "vector"
    }

    fn can_handle(&self, _gap: &str) -> bool {
        true
    }

    async fn retrieve(&self, gap: &str, cancel: &CancellationToken) -> CgragResult<Option<Retrieved>> {
        let hits = self.vector.query(gap, self.top_k, None, cancel).await?;
        if hits.is_empty() {
            return Ok(None);
        }
        let results: Vec<SearchResult> = hits.into_iter().map(|h| h.into_result()).collect();
        let text = results
            .iter()
            .map(SearchResult::context_block)
            .collect::<Vec<_>>()
            .join("\n\n");
        Ok(Some(Retrieved {
            text,
            nodes: Vec::new(),
            results,
        }))
    }
}

// ---------------------------------------------------------------------------
// Chain
// ---------------------------------------------------------------------------

/// What happened to one gap.
#[derive(Debug, Clone, PartialEq)]
pub enum GapOutcome {
    Resolved {
        strategy: &'static str,
        retrieved: Retrieved,
    },
    /// Every applicable strategy missed; the gap is now in `not_found`.
    Missed,
    /// Retrieval ran out of time; the gap may be retried later.
    TimedOut,
}

/// Ordered strategies tried first to last until one produces context.
#[derive(Clone)]
pub struct StrategyChain {
    strategies: Vec<Arc<dyn RetrievalStrategy>>,
    gap_timeout: Duration,
}

impl StrategyChain {
    pub fn new(strategies: Vec<Arc<dyn RetrievalStrategy>>) -> Self {
        Self {
            strategies,
            gap_timeout: Duration::from_secs(10),
        }
    }

    /// Graph lookup (when a graph is loaded) followed by vector lookup
    /// (when a vector channel exists).
    pub fn standard(
        graph: Option<GraphHandle>,
        vector: Option<Arc<dyn VectorSearch>>,
        config: &CgragConfig,
    ) -> Self {
        let mut strategies: Vec<Arc<dyn RetrievalStrategy>> = Vec::new();
        if let Some(graph) = graph {
            strategies.push(Arc::new(GraphLookup::new(
                graph,
                config.graph_hops,
                config.min_edge_confidence,
            )));
        }
        if let Some(vector) = vector {
            strategies.push(Arc::new(VectorLookup::new(vector, config.vector_top_k)));
        }
        Self::new(strategies).with_gap_timeout(config.gap_timeout())
    }

    pub fn with_gap_timeout(mut self, timeout: Duration) -> Self {
        self.gap_timeout = timeout;
        self
    }

    /// Copy of this chain with `strategy` tried first.
    pub fn with_leading(&self, strategy: Arc<dyn RetrievalStrategy>) -> Self {
        let mut strategies = Vec::with_capacity(self.strategies.len() + 1);
        strategies.push(strategy);
        strategies.extend(self.strategies.iter().cloned());
        Self {
            strategies,
            gap_timeout: self.gap_timeout,
        }
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }

    /// Resolve one gap within the gap timeout. Nodes from a hit are cached in
    /// the session; a total miss marks the gap `not_found`.
    pub async fn retrieve_for_gap(
        &self,
        gap: &str,
        session: &SessionHandle,
        cancel: &CancellationToken,
    ) -> CgragResult<GapOutcome> {
        match tokio::time::timeout(self.gap_timeout, self.try_strategies(gap, session, cancel)).await {
            Ok(outcome) => outcome,
            Err(_) => {
                warn!("Retrieval for gap {gap:?} timed out after {:?}", self.gap_timeout);
                Ok(GapOutcome::TimedOut)
            }
        }
    }

    async fn try_strategies(
        &self,
        gap: &str,
        session: &SessionHandle,
        cancel: &CancellationToken,
    ) -> CgragResult<GapOutcome> {
        for strategy in self.strategies.iter().filter(|s| s.can_handle(gap)) {
            match strategy.retrieve(gap, cancel).await {
                Ok(Some(retrieved)) => {
                    debug!("Gap {gap:?} resolved by {} strategy", strategy.name());
                    if !retrieved.nodes.is_empty() {
                        session.lock().add_nodes(retrieved.nodes.iter().cloned());
                    }
                    return Ok(GapOutcome::Resolved {
                        strategy: strategy.name(),
                        retrieved,
                    });
                }
                Ok(None) => debug!("{} strategy missed gap {gap:?}", strategy.name()),
                Err(CgragError::Cancelled) => return Err(CgragError::Cancelled),
                Err(e) => warn!("{} strategy failed for gap {gap:?}: {e}", strategy.name()),
            }
        }
        session.lock().mark_not_found(gap);
        Ok(GapOutcome::Missed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cgrag::session::SessionStore;
    use crate::testing::{sample_graph, vector_hit, FailingVector, SlowVector, StaticVector};

    fn session() -> SessionHandle {
        SessionStore::new(Duration::from_secs(60), 50).get_or_create(Some("t"))
    }

    #[tokio::test]
    async fn graph_lookup_returns_one_hop_neighborhood() {
        let lookup = GraphLookup::new(GraphHandle::new(sample_graph()), 1, 0.0);
        assert!(lookup.can_handle("helper in utils.py"));
        assert!(!lookup.can_handle("the database connection handler"));

        let hit = lookup
            .retrieve("helper in utils.py", &CancellationToken::new())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(hit.nodes[0].id, "utils.py::helper");
        assert!(hit.nodes.iter().any(|n| n.name == "main"));
        assert!(hit.text.contains("main calls helper"));
        assert_eq!(hit.results[0].source, ResultSource::Graph);
    }

    #[test]
    fn graph_lookup_without_snapshot_declines() {
        let lookup = GraphLookup::new(GraphHandle::empty(), 1, 0.0);
        assert!(!lookup.can_handle("helper in utils.py"));
    }

    #[tokio::test]
    async fn chain_caches_graph_nodes_in_session() {
        let chain = StrategyChain::new(vec![Arc::new(GraphLookup::new(
            GraphHandle::new(sample_graph()),
            1,
            0.0,
        ))]);
        let session = session();
        let outcome = chain
            .retrieve_for_gap("helper in utils.py", &session, &CancellationToken::new())
            .await
            .unwrap();
        assert!(matches!(outcome, GapOutcome::Resolved { strategy: "graph", .. }));
        assert!(session.lock().cached_node("utils.py::helper").is_some());
    }

    #[tokio::test]
    async fn graph_miss_falls_back_to_vector() {
        let chain = StrategyChain::new(vec![
            Arc::new(GraphLookup::new(GraphHandle::new(sample_graph()), 1, 0.0)),
            Arc::new(VectorLookup::new(
                Arc::new(StaticVector::new(vec![vector_hit("docs/x.md", "X", "wiki", 0.3)])),
                3,
            )),
        ]);
        let outcome = chain
            .retrieve_for_gap("nonexistent in nowhere.py", &session(), &CancellationToken::new())
            .await
            .unwrap();
        match outcome {
            GapOutcome::Resolved { strategy, retrieved } => {
                assert_eq!(strategy, "vector");
                assert!(retrieved.text.starts_with("[wiki] X (docs/x.md)"));
            }
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[tokio::test]
    async fn total_miss_marks_not_found() {
        let chain = StrategyChain::new(vec![
            Arc::new(VectorLookup::new(Arc::new(FailingVector), 3)),
            Arc::new(VectorLookup::new(Arc::new(StaticVector::new(Vec::new())), 3)),
        ]);
        let session = session();
        let outcome = chain
            .retrieve_for_gap("anything at all", &session, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(outcome, GapOutcome::Missed);
        assert!(session.lock().is_not_found("anything at all"));
    }

    #[tokio::test]
    async fn timeout_leaves_gap_retryable() {
        let chain = StrategyChain::new(vec![Arc::new(VectorLookup::new(
            Arc::new(SlowVector::new(Duration::from_secs(5))),
            3,
        ))])
        .with_gap_timeout(Duration::from_millis(20));
        let session = session();
        let outcome = chain
            .retrieve_for_gap("slow gap", &session, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(outcome, GapOutcome::TimedOut);
        assert!(!session.lock().is_not_found("slow gap"));
    }

    #[test]
    fn standard_chain_orders_graph_before_vector() {
        let chain = StrategyChain::standard(
            Some(GraphHandle::empty()),
            Some(Arc::new(StaticVector::new(Vec::new()))),
            &CgragConfig::default(),
        );
        assert_eq!(chain.names(), vec!["graph", "vector"]);
        assert_eq!(StrategyChain::standard(None, None, &CgragConfig::default()).names().len(), 0);
    }
}
