//! In-memory, confidence-weighted symbol graph.
//!
//! Nodes live in an arena (`Vec<Node>`) and edges refer to them by index, so
//! cyclic call relationships never create ownership cycles. String ids are
//! resolved through a single lookup table.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};

use serde::Serialize;
use tracing::debug;

use crate::guards::{MAX_FLOW_DEPTH, MAX_GRAPH_VISITED};
use crate::models::{Edge, EdgeKind, Node};

// ---------------------------------------------------------------------------
// Internal structures
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct IndexedEdge {
    edge: Edge,
    source: usize,
    target: usize,
}

/// Nodes and edges reached by a neighborhood query.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Subgraph {
    pub center: String,
    /// Visited nodes in BFS order, the center first.
    pub nodes: Vec<Node>,
    pub edges: Vec<Edge>,
}

impl Subgraph {
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.nodes.iter().any(|n| n.id == id)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct GraphStats {
    pub nodes: usize,
    pub edges: usize,
    pub nodes_by_kind: BTreeMap<String, usize>,
    pub edges_by_kind: BTreeMap<String, usize>,
}

// ---------------------------------------------------------------------------
// CodeGraph
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct CodeGraph {
    nodes: Vec<Node>,
    index: HashMap<String, usize>,
    by_name: HashMap<String, Vec<usize>>,
    edges: Vec<IndexedEdge>,
    outgoing: Vec<Vec<usize>>,
    incoming: Vec<Vec<usize>>,
}

impl CodeGraph {
    /// Build a graph snapshot. Duplicate node ids keep the first occurrence;
    /// edges whose endpoints are unknown are dropped.
    pub fn new(nodes: impl IntoIterator<Item = Node>, edges: impl IntoIterator<Item = Edge>) -> Self {
        let mut graph = CodeGraph::default();

        for node in nodes {
            if graph.index.contains_key(&node.id) {
                debug!("Duplicate node id {} ignored", node.id);
                continue;
            }
            let idx = graph.nodes.len();
            graph.index.insert(node.id.clone(), idx);
            graph.by_name.entry(node.name.clone()).or_default().push(idx);
            graph.nodes.push(node);
        }
        graph.outgoing = vec![Vec::new(); graph.nodes.len()];
        graph.incoming = vec![Vec::new(); graph.nodes.len()];

        let mut dropped = 0usize;
        for edge in edges {
            let (Some(&source), Some(&target)) =
                (graph.index.get(&edge.source_id), graph.index.get(&edge.target_id))
            else {
                dropped += 1;
                continue;
            };
            let edge_idx = graph.edges.len();
            graph.edges.push(IndexedEdge { edge, source, target });
            graph.outgoing[source].push(edge_idx);
            graph.incoming[target].push(edge_idx);
        }
        if dropped > 0 {
            debug!("Dropped {dropped} edges with unknown endpoints");
        }

        graph
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, id: &str) -> Option<&Node> {
        self.index.get(id).map(|&idx| &self.nodes[idx])
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter()
    }

    pub fn edges(&self) -> impl Iterator<Item = &Edge> {
        self.edges.iter().map(|e| &e.edge)
    }

    // -- call queries --------------------------------------------------------

    /// Targets of outgoing `calls` edges at or above `min_confidence`.
    pub fn get_calls(&self, id: &str, min_confidence: f64) -> Vec<&Node> {
        let Some(&idx) = self.index.get(id) else {
            return Vec::new();
        };
        self.collect_call_neighbors(&self.outgoing[idx], min_confidence, |e| e.target)
    }

    /// Sources of incoming `calls` edges at or above `min_confidence`.
    pub fn get_callers(&self, id: &str, min_confidence: f64) -> Vec<&Node> {
        let Some(&idx) = self.index.get(id) else {
            return Vec::new();
        };
        self.collect_call_neighbors(&self.incoming[idx], min_confidence, |e| e.source)
    }

    fn collect_call_neighbors(
        &self,
        edge_ids: &[usize],
        min_confidence: f64,
        endpoint: impl Fn(&IndexedEdge) -> usize,
    ) -> Vec<&Node> {
        let mut seen = HashSet::new();
        edge_ids
            .iter()
            .map(|&e| &self.edges[e])
            .filter(|e| e.edge.kind == EdgeKind::Calls && e.edge.confidence >= min_confidence)
            .map(endpoint)
            .filter(|&n| seen.insert(n))
            .map(|n| &self.nodes[n])
            .collect()
    }

    // -- neighborhood --------------------------------------------------------

    /// Bidirectional BFS up to `hops` steps over edges meeting the
    /// confidence floor. Returns the visited nodes plus every qualifying
    /// edge with both endpoints inside the visited set.
    pub fn get_neighborhood(&self, id: &str, hops: usize, min_confidence: f64) -> Subgraph {
        let Some(&start) = self.index.get(id) else {
            return Subgraph {
                center: id.to_string(),
                ..Default::default()
            };
        };

        let mut reached: HashMap<usize, usize> = HashMap::new();
        let mut order: Vec<usize> = vec![start];
        let mut queue: VecDeque<(usize, usize)> = VecDeque::new();
        reached.insert(start, 0);
        queue.push_back((start, 0));

        while let Some((current, depth)) = queue.pop_front() {
            if depth >= hops {
                continue;
            }
            if reached.len() >= MAX_GRAPH_VISITED {
                break;
            }
            let adjacent = self.outgoing[current]
                .iter()
                .chain(self.incoming[current].iter())
                .map(|&e| &self.edges[e])
                .filter(|e| e.edge.confidence >= min_confidence);
            for edge in adjacent {
                let neighbor = if edge.source == current {
                    edge.target
                } else {
                    edge.source
                };
                if reached.contains_key(&neighbor) {
                    continue;
                }
                reached.insert(neighbor, depth + 1);
                order.push(neighbor);
                queue.push_back((neighbor, depth + 1));
            }
        }

        let edges = self
            .edges
            .iter()
            .filter(|e| {
                e.edge.confidence >= min_confidence
                    && reached.contains_key(&e.source)
                    && reached.contains_key(&e.target)
            })
            .map(|e| e.edge.clone())
            .collect();

        Subgraph {
            center: id.to_string(),
            nodes: order.into_iter().map(|idx| self.nodes[idx].clone()).collect(),
            edges,
        }
    }

    // -- path enumeration ----------------------------------------------------

    /// Simple directed paths from `start` to `end` of at most
    /// [`MAX_FLOW_DEPTH`] edges, shortest first, capped at `max_paths`.
    ///
    /// Paths of equal length are ordered by their node ids.
    pub fn trace_flow(
        &self,
        start: &str,
        end: &str,
        min_confidence: f64,
        max_paths: usize,
    ) -> Vec<Vec<String>> {
        let (Some(&from), Some(&to)) = (self.index.get(start), self.index.get(end)) else {
            return Vec::new();
        };
        if max_paths == 0 || from == to {
            return Vec::new();
        }

        let successors: Vec<Vec<usize>> = self
            .outgoing
            .iter()
            .map(|edge_ids| {
                let mut targets: Vec<usize> = edge_ids
                    .iter()
                    .map(|&e| &self.edges[e])
                    .filter(|e| e.edge.confidence >= min_confidence)
                    .map(|e| e.target)
                    .collect();
                targets.sort_by(|a, b| self.nodes[*a].id.cmp(&self.nodes[*b].id));
                targets.dedup();
                targets
            })
            .collect();

        let mut paths: Vec<Vec<usize>> = Vec::new();
        for depth_limit in 1..=MAX_FLOW_DEPTH {
            let mut stack = vec![from];
            let mut on_path: HashSet<usize> = HashSet::from([from]);
            self.paths_of_length(
                &successors,
                to,
                depth_limit,
                &mut stack,
                &mut on_path,
                &mut paths,
                max_paths,
            );
            if paths.len() >= max_paths {
                break;
            }
        }

        paths
            .into_iter()
            .take(max_paths)
            .map(|path| path.into_iter().map(|idx| self.nodes[idx].id.clone()).collect())
            .collect()
    }

    #[allow(clippy::too_many_arguments)]
    fn paths_of_length(
        &self,
        successors: &[Vec<usize>],
        target: usize,
        remaining: usize,
        stack: &mut Vec<usize>,
        on_path: &mut HashSet<usize>,
        paths: &mut Vec<Vec<usize>>,
        max_paths: usize,
    ) {
        if paths.len() >= max_paths {
            return;
        }
        let Some(&current) = stack.last() else {
            return;
        };
        for &next in &successors[current] {
            if on_path.contains(&next) {
                continue;
            }
            if remaining == 1 {
                if next == target {
                    let mut path = stack.clone();
                    path.push(next);
                    paths.push(path);
                    if paths.len() >= max_paths {
                        return;
                    }
                }
                continue;
            }
            if next == target {
                continue;
            }
            stack.push(next);
            on_path.insert(next);
            self.paths_of_length(successors, target, remaining - 1, stack, on_path, paths, max_paths);
            on_path.remove(&next);
            stack.pop();
        }
    }

    // -- structural queries --------------------------------------------------

    /// Nodes with at least one outgoing `calls` edge and no incoming one.
    pub fn get_entry_points(&self) -> Vec<&Node> {
        (0..self.nodes.len())
            .filter(|&idx| self.call_degree(&self.outgoing[idx]) > 0)
            .filter(|&idx| self.call_degree(&self.incoming[idx]) == 0)
            .map(|idx| &self.nodes[idx])
            .collect()
    }

    /// Nodes with no outgoing `calls` edge.
    pub fn get_leaf_nodes(&self) -> Vec<&Node> {
        (0..self.nodes.len())
            .filter(|&idx| self.call_degree(&self.outgoing[idx]) == 0)
            .map(|idx| &self.nodes[idx])
            .collect()
    }

    fn call_degree(&self, edge_ids: &[usize]) -> usize {
        edge_ids
            .iter()
            .filter(|&&e| self.edges[e].edge.kind == EdgeKind::Calls)
            .count()
    }

    /// Resolve a bare symbol name to a node: id suffix `::<name>` or exact
    /// `name` match. Several candidates resolve to the shortest file path,
    /// then the lexicographically smallest id.
    pub fn find_symbol(&self, name: &str) -> Option<&Node> {
        let name = name.trim();
        if name.is_empty() {
            return None;
        }
        if let Some(node) = self.node(name) {
            return Some(node);
        }
        let suffix = format!("::{name}");
        let mut candidates: Vec<&Node> = self
            .by_name
            .get(name)
            .map(|ids| ids.iter().map(|&idx| &self.nodes[idx]).collect())
            .unwrap_or_default();
        if candidates.is_empty() {
            candidates = self.nodes.iter().filter(|n| n.id.ends_with(&suffix)).collect();
        }
        candidates
            .into_iter()
            .min_by(|a, b| {
                a.file_path
                    .len()
                    .cmp(&b.file_path.len())
                    .then_with(|| a.id.cmp(&b.id))
            })
    }

    pub fn stats(&self) -> GraphStats {
        let mut stats = GraphStats {
            nodes: self.nodes.len(),
            edges: self.edges.len(),
            ..Default::default()
        };
        for node in &self.nodes {
            *stats.nodes_by_kind.entry(node.kind.to_string()).or_default() += 1;
        }
        for edge in &self.edges {
            *stats.edges_by_kind.entry(edge.edge.kind.to_string()).or_default() += 1;
        }
        stats
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
