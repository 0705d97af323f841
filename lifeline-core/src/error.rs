//! Error types for graph construction and value access.
//!
//! Start and stop failures inside user callbacks are not represented here:
//! they are logged and absorbed by the controller. Only misuse of the graph
//! API itself surfaces as a [`GraphError`].

use thiserror::Error;

use crate::graph::NodeId;

/// Errors returned by graph construction, seeding, and value access.
#[derive(Debug, Error)]
pub enum GraphError {
    /// A parent slot was addressed that the node does not have.
    #[error("node `{label}` has {slots} parent slot(s), index {index} is out of range")]
    ParentIndexOutOfRange {
        label: String,
        index: usize,
        slots: usize,
    },

    /// A join was requested with an empty parent list.
    #[error("cannot bind `{label}` without any parents")]
    NoParents { label: String },

    /// A handle belonging to another graph was passed in.
    #[error("node {id} belongs to a different graph")]
    ForeignNode { id: NodeId },

    /// The node was discarded and no longer exists in the graph.
    #[error("node {id} does not exist in this graph")]
    UnknownNode { id: NodeId },

    /// A typed seed was supplied to a node that has parents.
    #[error("node `{label}` has parents and cannot take a seed, use `start_at`")]
    NotRoot { label: String },

    /// The node has no live value.
    #[error("node `{label}` has not been started")]
    NotStarted { label: String },

    /// A stored value did not have the type the handle expected.
    #[error("node `{label}` expected a value of type `{expected}`")]
    TypeMismatch {
        label: String,
        expected: &'static str,
    },
}

/// Result alias used across the crate.
pub type Result<T, E = GraphError> = std::result::Result<T, E>;
