//! Structural snapshots.
//!
//! A snapshot copies the shape of a graph (labels, edges, which nodes are
//! running) into plain serializable data, for logging or dumping to a file
//! when diagnosing a reload.

use serde::Serialize;

use crate::graph::{GraphScheduler, NodeKind};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GraphSnapshot {
    /// Nodes in creation order.
    pub nodes: Vec<NodeSnapshot>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeSnapshot {
    pub id: u64,
    pub label: String,
    pub kind: NodeKind,
    pub value_type: &'static str,
    pub running: bool,
    pub starts: u64,

    /// Parent per slot; `None` for a detached slot.
    pub parents: Vec<Option<u64>>,
    pub children: Vec<EdgeSnapshot>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct EdgeSnapshot {
    pub child: u64,
    pub parent_index: usize,
}

impl GraphSnapshot {
    pub(crate) fn capture(scheduler: &GraphScheduler) -> Self {
        let nodes = scheduler
            .nodes()
            .map(|node| NodeSnapshot {
                id: node.id().raw(),
                label: node.label().to_owned(),
                kind: node.kind(),
                value_type: node.value_type(),
                running: node.is_running(),
                starts: node.start_count(),
                parents: node
                    .slots()
                    .parents()
                    .map(|parent| parent.map(|id| id.raw()))
                    .collect(),
                children: node
                    .children()
                    .iter()
                    .map(|edge| EdgeSnapshot {
                        child: edge.child.raw(),
                        parent_index: edge.parent_index,
                    })
                    .collect(),
            })
            .collect();

        Self { nodes }
    }

    /// First node with the given label.
    pub fn node(&self, label: &str) -> Option<&NodeSnapshot> {
        self.nodes.iter().find(|node| node.label == label)
    }

    /// Labels of the running nodes, in creation order.
    pub fn running(&self) -> Vec<&str> {
        self.nodes
            .iter()
            .filter(|node| node.running)
            .map(|node| node.label.as_str())
            .collect()
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}
