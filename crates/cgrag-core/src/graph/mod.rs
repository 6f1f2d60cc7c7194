//! Symbol graph and its swappable snapshot handle.

pub mod code_graph;

use std::sync::Arc;

use parking_lot::RwLock;
use tracing::info;

pub use code_graph::{CodeGraph, GraphStats, Subgraph};

/// Shared handle to the current graph snapshot.
///
/// Reindexing builds a new [`CodeGraph`] and swaps it in wholesale; readers
/// holding an earlier snapshot keep using it untouched.
#[derive(Debug, Default, Clone)]
pub struct GraphHandle {
    current: Arc<RwLock<Option<Arc<CodeGraph>>>>,
}

impl GraphHandle {
    pub fn new(graph: CodeGraph) -> Self {
        let handle = Self::default();
        handle.replace(graph);
        handle
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> Option<Arc<CodeGraph>> {
        self.current.read().clone()
    }

    pub fn replace(&self, graph: CodeGraph) {
        info!(
            "Graph snapshot replaced: {} nodes, {} edges",
            graph.node_count(),
            graph.edge_count()
        );
        *self.current.write() = Some(Arc::new(graph));
    }

    pub fn clear(&self) {
        *self.current.write() = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Node, NodeKind};

    #[test]
    fn replace_swaps_snapshot_without_touching_old_readers() {
        let handle = GraphHandle::new(CodeGraph::new(
            vec![Node::new(NodeKind::Function, "a", "x.py", 1, 1)],
            Vec::new(),
        ));
        let old = handle.snapshot().unwrap();
        handle.replace(CodeGraph::new(
            vec![
                Node::new(NodeKind::Function, "a", "x.py", 1, 1),
                Node::new(NodeKind::Function, "b", "x.py", 2, 2),
            ],
            Vec::new(),
        ));
        assert_eq!(old.node_count(), 1);
        assert_eq!(handle.snapshot().unwrap().node_count(), 2);
    }

    #[test]
    fn clones_share_the_same_slot() {
        let handle = GraphHandle::empty();
        let other = handle.clone();
        assert!(other.snapshot().is_none());
        handle.replace(CodeGraph::default());
        assert!(other.snapshot().is_some());
        other.clear();
        assert!(handle.snapshot().is_none());
    }
}
