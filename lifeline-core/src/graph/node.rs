//! Graph Nodes
//!
//! This module defines the node entries that live in the lifecycle graph.
//! An entry owns the type-erased start/stop callbacks, the parent slot
//! bookkeeping, the ordered child edges, and the currently live value.

use std::any::Any;
use std::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;
use smallvec::SmallVec;

use super::edge::{Edge, ParentSlots};
use crate::config::LogLevel;

/// A type-erased resource value produced by a start callback.
pub type Value = Rc<dyn Any>;

/// Type-erased start callback: parent values in slot order to a new value.
pub(crate) type StartFn = Rc<dyn Fn(&[Value]) -> anyhow::Result<Value>>;

/// Type-erased stop callback.
pub(crate) type StopFn = Rc<dyn Fn(&Value)>;

/// Unique identifier for a node in the lifecycle graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u64);

impl NodeId {
    /// Generate a new unique node ID.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<u64> for NodeId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Where a node sits in the graph, derived from its declared parent count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    /// No parents. Started from an external seed.
    Root,

    /// Exactly one parent.
    Child,

    /// Two or more parents. Starts once every parent has delivered.
    Join,
}

impl NodeKind {
    fn for_parent_count(count: usize) -> Self {
        match count {
            0 => NodeKind::Root,
            1 => NodeKind::Child,
            _ => NodeKind::Join,
        }
    }
}

/// A node in the lifecycle graph.
pub(crate) struct NodeEntry {
    /// Unique identifier for this node.
    id: NodeId,

    /// Human-readable name, also the key for restart-by-label.
    label: String,

    /// Level for routine lifecycle events of this node.
    log_level: LogLevel,

    /// Type name of the produced value, for diagnostics.
    value_type: &'static str,

    start: StartFn,
    stop: StopFn,

    /// Parents and the latest value each delivered.
    slots: ParentSlots,

    /// Outgoing edges, in start order among siblings.
    children: Vec<Edge>,

    /// The live resource, if any.
    value: Option<Value>,

    /// Number of successful starts over the node's lifetime.
    starts: u64,
}

impl NodeEntry {
    pub fn new(
        label: impl Into<String>,
        log_level: LogLevel,
        value_type: &'static str,
        parent_count: usize,
        start: StartFn,
        stop: StopFn,
    ) -> Self {
        Self {
            id: NodeId::new(),
            label: label.into(),
            log_level,
            value_type,
            start,
            stop,
            slots: ParentSlots::new(parent_count),
            children: Vec::new(),
            value: None,
            starts: 0,
        }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn log_level(&self) -> LogLevel {
        self.log_level
    }

    pub fn value_type(&self) -> &'static str {
        self.value_type
    }

    pub fn kind(&self) -> NodeKind {
        NodeKind::for_parent_count(self.slots.parent_count())
    }

    pub fn start_fn(&self) -> StartFn {
        Rc::clone(&self.start)
    }

    pub fn stop_fn(&self) -> StopFn {
        Rc::clone(&self.stop)
    }

    pub fn slots(&self) -> &ParentSlots {
        &self.slots
    }

    pub fn slots_mut(&mut self) -> &mut ParentSlots {
        &mut self.slots
    }

    pub fn children(&self) -> &[Edge] {
        &self.children
    }

    /// Append a child edge, or put it first when `early` is set.
    pub fn add_child(&mut self, edge: Edge, early: bool) {
        if early {
            self.children.insert(0, edge);
        } else {
            self.children.push(edge);
        }
    }

    /// Remove every child edge and hand them back.
    pub fn take_children(&mut self) -> Vec<Edge> {
        std::mem::take(&mut self.children)
    }

    /// Keep only the edges for which `keep` returns true.
    pub fn retain_children(&mut self, mut keep: impl FnMut(&Edge) -> bool) {
        self.children.retain(|edge| keep(edge));
    }

    /// Distinct parent IDs still attached, in slot order.
    pub fn parent_ids(&self) -> SmallVec<[NodeId; 4]> {
        let mut ids: SmallVec<[NodeId; 4]> = SmallVec::new();
        for id in self.slots.parents().flatten() {
            if !ids.contains(&id) {
                ids.push(id);
            }
        }
        ids
    }

    pub fn is_running(&self) -> bool {
        self.value.is_some()
    }

    pub fn value(&self) -> Option<&Value> {
        self.value.as_ref()
    }

    /// Store a freshly started value, returning whatever it replaces.
    pub fn set_value(&mut self, value: Value) -> Option<Value> {
        self.starts += 1;
        self.value.replace(value)
    }

    pub fn take_value(&mut self) -> Option<Value> {
        self.value.take()
    }

    pub fn start_count(&self) -> u64 {
        self.starts
    }
}

impl fmt::Debug for NodeEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeEntry")
            .field("id", &self.id)
            .field("label", &self.label)
            .field("kind", &self.kind())
            .field("value_type", &self.value_type)
            .field("children", &self.children)
            .field("running", &self.is_running())
            .field("starts", &self.starts)
            .finish()
    }
}
