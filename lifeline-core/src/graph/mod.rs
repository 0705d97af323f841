//! Lifecycle Graph
//!
//! This module implements the structural half of the lifecycle graph: the
//! node arena, the edges between nodes, and the scheduler that orders them.
//!
//! # Overview
//!
//! The graph is a directed acyclic graph (DAG) where:
//!
//! - Nodes are resource factories with a start and a stop callback
//! - Edges run from a parent to a child and carry the positional parent
//!   index the child's start callback receives the parent's value at
//!
//! Starting a node walks the subgraph below it parents-first; stopping it
//! walks the same order backwards.
//!
//! # Design Decisions
//!
//! 1. Nodes live in one arena per graph, addressed by `NodeId`. Handles held
//!    by callers are an id plus a reference to the arena.
//!
//! 2. Values are stored type-erased (`Rc<dyn Any>`); the typed handle that
//!    created a node recovers the concrete type.
//!
//! 3. Edges are only ever added from an existing node to a new one, so the
//!    graph cannot contain a cycle.

mod edge;
pub(crate) mod node;
mod scheduler;

pub use edge::Edge;
pub use node::{NodeId, NodeKind, Value};

pub(crate) use node::{NodeEntry, StartFn, StopFn};
pub(crate) use scheduler::GraphScheduler;
