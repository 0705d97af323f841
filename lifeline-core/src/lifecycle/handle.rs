//! Graph and node handles.
//!
//! [`Graph`] is the explicit root handle an application creates once and
//! threads through every subsystem that binds into it. [`Node`] is a typed
//! handle to one node; [`AnyNode`] is the same handle with the parent and
//! value types erased, as returned when a subtree is detached.

use std::any::type_name;
use std::cell::RefCell;
use std::fmt;
use std::marker::PhantomData;
use std::ops::Deref;
use std::rc::Rc;

use tracing::info;

use super::controller::GraphState;
use super::trace::{lifecycle_event, EndReport, EpisodeReport};
use crate::config::{GraphConfig, LogLevel};
use crate::error::{GraphError, Result};
use crate::graph::{NodeEntry, NodeId, NodeKind, StartFn, StopFn, Value};
use crate::snapshot::GraphSnapshot;

/// Parent type of a node with two or more parents.
///
/// Uninhabited: a joined node cannot be given a typed seed, only values for
/// individual slots through [`AnyNode::start_at`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Joined {}

/// Handle to a lifecycle graph.
///
/// Cloning the handle is cheap and every clone refers to the same graph.
/// The graph is single-threaded: handles are neither `Send` nor `Sync`.
#[derive(Clone)]
pub struct Graph {
    pub(crate) state: Rc<RefCell<GraphState>>,
}

impl Graph {
    /// Create an empty graph with the default configuration.
    pub fn new() -> Self {
        Self::with_config(GraphConfig::default())
    }

    /// Create an empty graph with the given configuration.
    pub fn with_config(config: GraphConfig) -> Self {
        Self {
            state: Rc::new(RefCell::new(GraphState::new(config))),
        }
    }

    pub fn config(&self) -> GraphConfig {
        self.state.borrow().config.clone()
    }

    /// Create a root node.
    ///
    /// `start` turns the seed given to [`Node::start`] into the node's
    /// value; `stop` tears a value down before it is dropped.
    pub fn create<P, T, S, X>(&self, label: impl Into<String>, start: S, stop: X) -> Node<P, T>
    where
        P: 'static,
        T: 'static,
        S: Fn(&P) -> anyhow::Result<T> + 'static,
        X: Fn(&T) + 'static,
    {
        let level = self.state.borrow().config.default_log_level;
        self.create_with_level(label, level, start, stop)
    }

    /// Create a root node whose lifecycle events, and those of the children
    /// bound below it, are logged at `level`.
    pub fn create_with_level<P, T, S, X>(
        &self,
        label: impl Into<String>,
        level: LogLevel,
        start: S,
        stop: X,
    ) -> Node<P, T>
    where
        P: 'static,
        T: 'static,
        S: Fn(&P) -> anyhow::Result<T> + 'static,
        X: Fn(&T) + 'static,
    {
        let label = label.into();
        let entry = NodeEntry::new(
            label.clone(),
            level,
            type_name::<T>(),
            0,
            erase_start1(label.clone(), start),
            erase_stop(stop),
        );
        let id = self.state.borrow_mut().scheduler.add_node(entry);
        lifecycle_event!(level, node = %id, label = %label, "created root");

        Node::new(AnyNode::new(self.clone(), id, label))
    }

    /// Bind a node to any number of parents.
    ///
    /// The start callback receives the parents' values in the order the
    /// parents are listed. This is the untyped path for joins wider than
    /// [`Node::join4`]; each value is recovered with `downcast_ref`.
    pub fn join_all<T, S, X>(
        &self,
        parents: &[AnyNode],
        label: impl Into<String>,
        start: S,
        stop: X,
    ) -> Result<Node<Joined, T>>
    where
        T: 'static,
        S: Fn(&[Value]) -> anyhow::Result<T> + 'static,
        X: Fn(&T) + 'static,
    {
        let start: StartFn =
            Rc::new(move |values: &[Value]| -> anyhow::Result<Value> { Ok(Rc::new(start(values)?)) });
        let node = self.attach(
            parents,
            label.into(),
            type_name::<T>(),
            start,
            erase_stop(stop),
            false,
        )?;
        Ok(Node::new(node))
    }

    /// Number of nodes in the graph, detached ones included.
    pub fn node_count(&self) -> usize {
        self.state.borrow().scheduler.node_count()
    }

    /// First node, in creation order, carrying `label`.
    pub fn find(&self, label: &str) -> Option<AnyNode> {
        let state = self.state.borrow();
        let node = state.scheduler.nodes().find(|node| node.label() == label)?;
        Some(AnyNode::new(self.clone(), node.id(), node.label().to_owned()))
    }

    /// Structural dump of the graph for diagnostics.
    pub fn snapshot(&self) -> GraphSnapshot {
        GraphSnapshot::capture(&self.state.borrow().scheduler)
    }

    fn same_graph(&self, other: &Graph) -> bool {
        Rc::ptr_eq(&self.state, &other.state)
    }

    /// Insert a node below `parents`, one edge per parent in order.
    ///
    /// Parents that are already running hand their current value to the new
    /// node's slot right away, so a later restart of the new node finds it.
    pub(crate) fn attach(
        &self,
        parents: &[AnyNode],
        label: String,
        value_type: &'static str,
        start: StartFn,
        stop: StopFn,
        early: bool,
    ) -> Result<AnyNode> {
        let first = parents.first().ok_or_else(|| GraphError::NoParents {
            label: label.clone(),
        })?;
        if let Some(foreign) = parents.iter().find(|parent| !self.same_graph(&parent.graph)) {
            return Err(GraphError::ForeignNode { id: foreign.id });
        }

        let mut state = self.state.borrow_mut();
        for parent in parents {
            state.scheduler.node(parent.id)?;
        }

        let level = state.scheduler.node(first.id)?.log_level();
        let entry = NodeEntry::new(label.clone(), level, value_type, parents.len(), start, stop);
        let id = state.scheduler.add_node(entry);

        for parent in parents {
            let index = match state.scheduler.add_edge(parent.id, id, early) {
                Ok(index) => index,
                Err(err) => {
                    state.scheduler.remove_node(id);
                    return Err(err);
                }
            };
            let live = state
                .scheduler
                .get_node(parent.id)
                .and_then(|parent| parent.value().cloned());
            if let (Some(value), Some(node)) = (live, state.scheduler.get_node_mut(id)) {
                node.slots_mut().set(index, value);
            }
        }
        drop(state);

        let parent_labels: Vec<&str> = parents.iter().map(|parent| parent.label()).collect();
        lifecycle_event!(level, node = %id, label = %label, parents = ?parent_labels, early, "bound");

        Ok(AnyNode::new(self.clone(), id, label))
    }
}

impl Default for Graph {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Graph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.borrow();
        f.debug_struct("Graph")
            .field("nodes", &state.scheduler.node_count())
            .field("episodes", &state.episodes)
            .finish()
    }
}

/// Untyped handle to a node.
#[derive(Clone)]
pub struct AnyNode {
    graph: Graph,
    id: NodeId,
    label: Rc<str>,
}

impl AnyNode {
    fn new(graph: Graph, id: NodeId, label: impl Into<Rc<str>>) -> Self {
        Self {
            graph,
            id,
            label: label.into(),
        }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    /// False once the node has been discarded.
    pub fn exists(&self) -> bool {
        self.graph.state.borrow().scheduler.contains(self.id)
    }

    pub fn kind(&self) -> Option<NodeKind> {
        Some(self.graph.state.borrow().scheduler.get_node(self.id)?.kind())
    }

    /// Whether the node currently holds a live value.
    pub fn is_running(&self) -> bool {
        self.graph.is_running(self.id)
    }

    /// Number of successful starts so far.
    pub fn start_count(&self) -> u64 {
        self.graph
            .state
            .borrow()
            .scheduler
            .get_node(self.id)
            .map_or(0, |node| node.start_count())
    }

    /// Current children, in start order.
    pub fn children(&self) -> Vec<AnyNode> {
        let state = self.graph.state.borrow();
        let Some(node) = state.scheduler.get_node(self.id) else {
            return Vec::new();
        };
        node.children()
            .iter()
            .filter_map(|edge| state.scheduler.get_node(edge.child))
            .map(|child| AnyNode::new(self.graph.clone(), child.id(), child.label().to_owned()))
            .collect()
    }

    /// Deliver `value` into parent slot `parent_index` and start the
    /// subgraph from this node.
    ///
    /// On a root, slot 0 is the seed. On other nodes the value stands in
    /// for the parent bound at that index until that parent delivers again.
    /// A running node is ended first.
    pub fn start_at(&self, parent_index: usize, value: Value) -> Result<EpisodeReport> {
        self.graph.seed(self.id, parent_index, value)
    }

    /// Stop this node and everything below it, children first.
    ///
    /// Ending a node that is not running logs a warning and stops nothing
    /// at this node; running descendants are still stopped.
    pub fn end(&self) -> EndReport {
        self.graph.end_subtree(self.id)
    }

    /// End, then start again reusing the cached parent values.
    pub fn restart(&self) -> Result<EpisodeReport> {
        self.graph.restart_node(self.id)
    }

    /// End, then start again with a new value in `parent_index`.
    ///
    /// An out-of-range index is rejected before anything is stopped.
    pub fn restart_at(&self, parent_index: usize, value: Value) -> Result<EpisodeReport> {
        self.graph.reseed(self.id, parent_index, value)
    }

    /// Restart the first node labelled `label` found depth-first from here.
    ///
    /// Returns `Ok(None)`, after logging, when no node matches.
    pub fn restart_by_label(&self, label: &str) -> Result<Option<EpisodeReport>> {
        let found = self
            .graph
            .state
            .borrow()
            .scheduler
            .find_by_label(self.id, label);

        match found {
            Some(node_id) => self.graph.restart_node(node_id).map(Some),
            None => {
                tracing::warn!(from = %self.label, label, "no node to restart with this label");
                Ok(None)
            }
        }
    }

    /// Detach every child of this node and return them.
    ///
    /// Nothing is stopped: the detached subtrees keep running, keep their
    /// cached parent values, and can be restarted, ended, or discarded on
    /// their own. The graph no longer reaches them from this node.
    pub fn remove_children(&self) -> Result<Vec<AnyNode>> {
        let detached = self
            .graph
            .state
            .borrow_mut()
            .scheduler
            .remove_children(self.id)?;

        let state = self.graph.state.borrow();
        let handles: Vec<AnyNode> = detached
            .into_iter()
            .filter_map(|id| state.scheduler.get_node(id))
            .map(|node| AnyNode::new(self.graph.clone(), node.id(), node.label().to_owned()))
            .collect();

        info!(node = %self.id, label = %self.label, detached = handles.len(), "removed children");
        Ok(handles)
    }

    /// End this node's subtree and remove it from the graph.
    ///
    /// Every node reachable from here is removed, including joined nodes
    /// that also had parents elsewhere; edges into the removed nodes are
    /// dropped from the remaining ones.
    pub fn discard(self) -> EndReport {
        let mut report = if self.is_running() {
            self.end()
        } else {
            // Descendants may still run even when this node does not.
            let order = self.graph.state.borrow().scheduler.schedule(self.id);
            let mut report = EndReport::default();
            for id in order.into_iter().skip(1) {
                if self.graph.is_running(id) {
                    report.merge(self.graph.end_subtree(id));
                }
            }
            report
        };

        let removed = self
            .graph
            .state
            .borrow_mut()
            .scheduler
            .remove_subtree(self.id);
        report.removed = removed.iter().map(|node| node.id()).collect();

        info!(node = %self.id, label = %self.label, removed = report.removed.len(), "discarded subtree");
        report
    }
}

impl fmt::Debug for AnyNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnyNode")
            .field("id", &self.id)
            .field("label", &self.label)
            .finish()
    }
}

impl PartialEq for AnyNode {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && self.graph.same_graph(&other.graph)
    }
}

impl Eq for AnyNode {}

/// Typed handle to a node taking `P` from its parent and producing `T`.
pub struct Node<P, T> {
    node: AnyNode,
    _marker: PhantomData<fn(&P) -> T>,
}

impl<P, T> Node<P, T> {
    fn new(node: AnyNode) -> Self {
        Self {
            node,
            _marker: PhantomData,
        }
    }

    /// The untyped handle.
    pub fn erase(&self) -> AnyNode {
        self.node.clone()
    }
}

impl<P: 'static, T: 'static> Node<P, T> {
    /// Start a root from `seed`.
    ///
    /// A running root is ended first. Fails with [`GraphError::NotRoot`] on
    /// a node that has parents.
    pub fn start(&self, seed: P) -> Result<EpisodeReport> {
        self.ensure_root()?;
        self.node.start_at(0, Rc::new(seed))
    }

    /// End a root, then start it again from a new seed.
    pub fn restart_with(&self, seed: P) -> Result<EpisodeReport> {
        self.ensure_root()?;
        self.node.restart_at(0, Rc::new(seed))
    }

    /// The live value.
    pub fn value(&self) -> Result<Rc<T>> {
        let value = self
            .graph
            .state
            .borrow()
            .scheduler
            .node(self.id)?
            .value()
            .cloned()
            .ok_or_else(|| GraphError::NotStarted {
                label: self.label().to_owned(),
            })?;

        value.downcast::<T>().map_err(|_| GraphError::TypeMismatch {
            label: self.label().to_owned(),
            expected: type_name::<T>(),
        })
    }

    /// Bind a child fed by this node's value.
    pub fn bind<C, S, X>(&self, label: impl Into<String>, start: S, stop: X) -> Result<Node<T, C>>
    where
        C: 'static,
        S: Fn(&T) -> anyhow::Result<C> + 'static,
        X: Fn(&C) + 'static,
    {
        self.bind_child(label.into(), start, stop, false)
    }

    /// Like [`bind`](Self::bind) but places the child ahead of its existing
    /// siblings, so it starts before them.
    pub fn bind_early<C, S, X>(
        &self,
        label: impl Into<String>,
        start: S,
        stop: X,
    ) -> Result<Node<T, C>>
    where
        C: 'static,
        S: Fn(&T) -> anyhow::Result<C> + 'static,
        X: Fn(&C) + 'static,
    {
        self.bind_child(label.into(), start, stop, true)
    }

    fn bind_child<C, S, X>(&self, label: String, start: S, stop: X, early: bool) -> Result<Node<T, C>>
    where
        C: 'static,
        S: Fn(&T) -> anyhow::Result<C> + 'static,
        X: Fn(&C) + 'static,
    {
        let node = self.graph.attach(
            std::slice::from_ref(&self.node),
            label.clone(),
            type_name::<C>(),
            erase_start1(label, start),
            erase_stop(stop),
            early,
        )?;
        Ok(Node::new(node))
    }

    /// Bind a child of this node and `b`. The child starts once both have
    /// delivered a value.
    pub fn join<PB, B, C, S, X>(
        &self,
        b: &Node<PB, B>,
        label: impl Into<String>,
        start: S,
        stop: X,
    ) -> Result<Node<Joined, C>>
    where
        B: 'static,
        C: 'static,
        S: Fn(&T, &B) -> anyhow::Result<C> + 'static,
        X: Fn(&C) + 'static,
    {
        let label = label.into();
        let name = label.clone();
        let start: StartFn = Rc::new(move |values: &[Value]| -> anyhow::Result<Value> {
            let a = arg::<T>(values, 0, &name)?;
            let b = arg::<B>(values, 1, &name)?;
            Ok(Rc::new(start(a, b)?))
        });
        let parents = [self.erase(), b.erase()];
        let node = self
            .graph
            .attach(&parents, label, type_name::<C>(), start, erase_stop(stop), false)?;
        Ok(Node::new(node))
    }

    /// Three-parent [`join`](Self::join).
    pub fn join3<PB, B, PC, C, D, S, X>(
        &self,
        b: &Node<PB, B>,
        c: &Node<PC, C>,
        label: impl Into<String>,
        start: S,
        stop: X,
    ) -> Result<Node<Joined, D>>
    where
        B: 'static,
        C: 'static,
        D: 'static,
        S: Fn(&T, &B, &C) -> anyhow::Result<D> + 'static,
        X: Fn(&D) + 'static,
    {
        let label = label.into();
        let name = label.clone();
        let start: StartFn = Rc::new(move |values: &[Value]| -> anyhow::Result<Value> {
            let a = arg::<T>(values, 0, &name)?;
            let b = arg::<B>(values, 1, &name)?;
            let c = arg::<C>(values, 2, &name)?;
            Ok(Rc::new(start(a, b, c)?))
        });
        let parents = [self.erase(), b.erase(), c.erase()];
        let node = self
            .graph
            .attach(&parents, label, type_name::<D>(), start, erase_stop(stop), false)?;
        Ok(Node::new(node))
    }

    /// Four-parent [`join`](Self::join). Wider joins go through
    /// [`Graph::join_all`].
    #[allow(clippy::too_many_arguments)]
    pub fn join4<PB, B, PC, C, PD, D, E, S, X>(
        &self,
        b: &Node<PB, B>,
        c: &Node<PC, C>,
        d: &Node<PD, D>,
        label: impl Into<String>,
        start: S,
        stop: X,
    ) -> Result<Node<Joined, E>>
    where
        B: 'static,
        C: 'static,
        D: 'static,
        E: 'static,
        S: Fn(&T, &B, &C, &D) -> anyhow::Result<E> + 'static,
        X: Fn(&E) + 'static,
    {
        let label = label.into();
        let name = label.clone();
        let start: StartFn = Rc::new(move |values: &[Value]| -> anyhow::Result<Value> {
            let a = arg::<T>(values, 0, &name)?;
            let b = arg::<B>(values, 1, &name)?;
            let c = arg::<C>(values, 2, &name)?;
            let d = arg::<D>(values, 3, &name)?;
            Ok(Rc::new(start(a, b, c, d)?))
        });
        let parents = [self.erase(), b.erase(), c.erase(), d.erase()];
        let node = self
            .graph
            .attach(&parents, label, type_name::<E>(), start, erase_stop(stop), false)?;
        Ok(Node::new(node))
    }

    fn ensure_root(&self) -> Result<()> {
        match self.kind() {
            Some(NodeKind::Root) => Ok(()),
            Some(_) => Err(GraphError::NotRoot {
                label: self.label().to_owned(),
            }),
            None => Err(GraphError::UnknownNode { id: self.id() }),
        }
    }
}

impl<P, T> Deref for Node<P, T> {
    type Target = AnyNode;

    fn deref(&self) -> &AnyNode {
        &self.node
    }
}

impl<P, T> Clone for Node<P, T> {
    fn clone(&self) -> Self {
        Self::new(self.node.clone())
    }
}

impl<P, T> fmt::Debug for Node<P, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("id", &self.node.id)
            .field("label", &self.node.label)
            .field("value_type", &type_name::<T>())
            .finish()
    }
}

/// Downcast slot `index` of a start callback's arguments.
fn arg<'a, A: 'static>(values: &'a [Value], index: usize, label: &str) -> anyhow::Result<&'a A> {
    values
        .get(index)
        .and_then(|value| value.downcast_ref::<A>())
        .ok_or_else(|| {
            GraphError::TypeMismatch {
                label: label.to_owned(),
                expected: type_name::<A>(),
            }
            .into()
        })
}

fn erase_start1<P, T, S>(label: String, start: S) -> StartFn
where
    P: 'static,
    T: 'static,
    S: Fn(&P) -> anyhow::Result<T> + 'static,
{
    Rc::new(move |values: &[Value]| -> anyhow::Result<Value> {
        let parent = arg::<P>(values, 0, &label)?;
        Ok(Rc::new(start(parent)?))
    })
}

fn erase_stop<T, X>(stop: X) -> StopFn
where
    T: 'static,
    X: Fn(&T) + 'static,
{
    Rc::new(move |value: &Value| {
        if let Some(value) = value.downcast_ref::<T>() {
            stop(value);
        }
    })
}
