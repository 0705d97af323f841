//! Start Scheduler
//!
//! The scheduler owns every node of a graph and determines the order in
//! which a subgraph is started and stopped. It ensures that parents are
//! always started before their children.
//!
//! # Algorithm
//!
//! Scheduling a target node works in two passes:
//!
//! 1. Collect the subgraph reachable from the target through child edges,
//!    in child-list order.
//! 2. Count, for every collected node, the edges arriving from inside the
//!    subgraph, then sweep from the target: a child is enqueued once its
//!    arrival count reaches that in-degree.
//!
//! A diamond (a node reachable through two parents) is therefore scheduled
//! exactly once, right after its last pending parent. Parents outside the
//! subgraph are not waited on; their cached values stand in for them.
//!
//! Dependency graphs here are a handful of levels deep, so this is a plain
//! Kahn sweep rather than anything tuned for scale. The order is
//! deterministic for a given structure, which lets teardown replay it in
//! reverse.

use std::collections::{HashMap, VecDeque};

use indexmap::{IndexMap, IndexSet};

use super::edge::Edge;
use super::node::{NodeEntry, NodeId};
use crate::error::{GraphError, Result};

/// Owns the nodes of one graph and computes start/stop orders over them.
#[derive(Debug, Default)]
pub(crate) struct GraphScheduler {
    /// All nodes in the graph, indexed by ID, in creation order.
    nodes: IndexMap<NodeId, NodeEntry>,
}

impl GraphScheduler {
    /// Create a new empty scheduler.
    pub fn new() -> Self {
        Self {
            nodes: IndexMap::new(),
        }
    }

    /// Add a node to the graph.
    pub fn add_node(&mut self, node: NodeEntry) -> NodeId {
        let id = node.id();
        self.nodes.insert(id, node);
        id
    }

    /// Remove a node from the graph.
    ///
    /// Also removes every edge pointing at it from the remaining nodes, and
    /// detaches it from the slots of its children.
    pub fn remove_node(&mut self, node_id: NodeId) -> Option<NodeEntry> {
        let node = self.nodes.shift_remove(&node_id)?;

        for parent_id in node.parent_ids() {
            if let Some(parent) = self.nodes.get_mut(&parent_id) {
                parent.retain_children(|edge| edge.child != node_id);
            }
        }

        for edge in node.children() {
            if let Some(child) = self.nodes.get_mut(&edge.child) {
                child.slots_mut().detach_parent(node_id);
            }
        }

        Some(node)
    }

    pub fn contains(&self, node_id: NodeId) -> bool {
        self.nodes.contains_key(&node_id)
    }

    /// Get a reference to a node.
    pub fn get_node(&self, node_id: NodeId) -> Option<&NodeEntry> {
        self.nodes.get(&node_id)
    }

    /// Get a mutable reference to a node.
    pub fn get_node_mut(&mut self, node_id: NodeId) -> Option<&mut NodeEntry> {
        self.nodes.get_mut(&node_id)
    }

    /// Like [`get_node`](Self::get_node) but reports a missing node as an error.
    pub fn node(&self, node_id: NodeId) -> Result<&NodeEntry> {
        self.nodes
            .get(&node_id)
            .ok_or(GraphError::UnknownNode { id: node_id })
    }

    pub fn node_mut(&mut self, node_id: NodeId) -> Result<&mut NodeEntry> {
        self.nodes
            .get_mut(&node_id)
            .ok_or(GraphError::UnknownNode { id: node_id })
    }

    /// Iterate over all nodes in creation order.
    pub fn nodes(&self) -> impl Iterator<Item = &NodeEntry> {
        self.nodes.values()
    }

    /// Add an edge `parent -> child`.
    ///
    /// The edge fills the child's next unbound parent slot; the index of
    /// that slot is returned. With `early` the child is placed first among
    /// the parent's children.
    pub fn add_edge(&mut self, parent: NodeId, child: NodeId, early: bool) -> Result<usize> {
        if !self.nodes.contains_key(&parent) {
            return Err(GraphError::UnknownNode { id: parent });
        }

        let child_node = self.node_mut(child)?;
        let parent_index =
            child_node
                .slots_mut()
                .bind(parent)
                .ok_or_else(|| GraphError::ParentIndexOutOfRange {
                    label: child_node.label().to_owned(),
                    index: child_node.slots().parent_count(),
                    slots: child_node.slots().parent_count(),
                })?;

        self.node_mut(parent)?
            .add_child(Edge::new(child, parent_index), early);

        Ok(parent_index)
    }

    /// Remove every child edge of `parent`.
    ///
    /// The children forget this parent but keep the value it last
    /// delivered. Returns the distinct detached children in child-list order.
    pub fn remove_children(&mut self, parent: NodeId) -> Result<Vec<NodeId>> {
        let edges = self.node_mut(parent)?.take_children();

        let mut detached = IndexSet::new();
        for edge in edges {
            if let Some(child) = self.nodes.get_mut(&edge.child) {
                child.slots_mut().detach(edge.parent_index);
            }
            detached.insert(edge.child);
        }

        Ok(detached.into_iter().collect())
    }

    /// Collect every node reachable from `target`, target first, in
    /// depth-first child-list order.
    pub fn reachable(&self, target: NodeId) -> IndexSet<NodeId> {
        let mut seen = IndexSet::new();
        let mut stack = vec![target];

        while let Some(node_id) = stack.pop() {
            let Some(node) = self.nodes.get(&node_id) else {
                continue;
            };
            if !seen.insert(node_id) {
                continue;
            }
            // Reverse so the first child is visited first.
            for edge in node.children().iter().rev() {
                if !seen.contains(&edge.child) {
                    stack.push(edge.child);
                }
            }
        }

        seen
    }

    /// Compute the start order for the subgraph rooted at `target`.
    ///
    /// Every node appears after all of its parents that are part of the
    /// same subgraph. Reverse the result for a stop order.
    pub fn schedule(&self, target: NodeId) -> Vec<NodeId> {
        let subgraph = self.reachable(target);
        let mut pending: HashMap<NodeId, usize> = HashMap::with_capacity(subgraph.len());

        // In-degrees, counting only edges that start inside the subgraph.
        for node_id in &subgraph {
            if let Some(node) = self.nodes.get(node_id) {
                for edge in node.children() {
                    if subgraph.contains(&edge.child) {
                        *pending.entry(edge.child).or_insert(0) += 1;
                    }
                }
            }
        }

        let mut order = Vec::with_capacity(subgraph.len());
        let mut queue = VecDeque::new();
        if subgraph.contains(&target) {
            queue.push_back(target);
        }

        while let Some(node_id) = queue.pop_front() {
            order.push(node_id);

            if let Some(node) = self.nodes.get(&node_id) {
                for edge in node.children() {
                    if let Some(count) = pending.get_mut(&edge.child) {
                        *count = count.saturating_sub(1);
                        if *count == 0 {
                            pending.remove(&edge.child);
                            queue.push_back(edge.child);
                        }
                    }
                }
            }
        }

        order
    }

    /// Depth-first, pre-order search from `from` for the first node whose
    /// label equals `label`. `from` itself is included.
    pub fn find_by_label(&self, from: NodeId, label: &str) -> Option<NodeId> {
        self.reachable(from)
            .into_iter()
            .find(|id| self.nodes.get(id).is_some_and(|node| node.label() == label))
    }

    /// Remove `target` and everything reachable from it.
    ///
    /// Returns the removed entries in start order.
    pub fn remove_subtree(&mut self, target: NodeId) -> Vec<NodeEntry> {
        self.schedule(target)
            .into_iter()
            .filter_map(|node_id| self.remove_node(node_id))
            .collect()
    }

    /// Get the total number of nodes in the graph.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }
}
