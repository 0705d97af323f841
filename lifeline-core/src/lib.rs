//! Lifeline Core
//!
//! This crate provides the resource lifecycle graph behind the Lifeline
//! hot-reload runtime. It lets an application declare that stateful
//! resources (a window, a rendering surface, a GPU pipeline, an overlay
//! scene) depend on one another, then:
//!
//! - Start them parents-first from a seed
//! - Stop them in exactly the reverse order
//! - Restart any subtree while everything above it keeps running
//! - Swap a subtree out on a hot-reload signal
//!
//! The graph knows nothing about the resources themselves. Each node is a
//! pair of callbacks: produce a value from the parent value(s), and tear a
//! value down.
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `graph`: Node arena, edges, and the start-order scheduler
//! - `lifecycle`: Public handles and the start/stop controller
//! - `reload`: Hot-reload bridge that rebuilds one region of the graph
//! - `config`: Graph-wide settings
//! - `snapshot`: Serializable structural dumps for diagnostics
//!
//! The graph is single-threaded. Callbacks run synchronously on the thread
//! that calls `start`, `end`, or `restart`.
//!
//! # Example
//!
//! ```rust
//! use lifeline_core::Graph;
//!
//! let graph = Graph::new();
//!
//! // A root is started from a seed.
//! let window = graph.create("window", |size: &(u32, u32)| Ok(*size), |_| {});
//!
//! // Children are built from their parent's value.
//! let surface = window
//!     .bind("surface", |&(w, h): &(u32, u32)| Ok(w * h), |_| {})
//!     .unwrap();
//!
//! window.start((640, 480)).unwrap();
//! assert_eq!(*surface.value().unwrap(), 640 * 480);
//!
//! // Restarting the surface reuses the window's live value.
//! surface.restart().unwrap();
//! assert_eq!(window.start_count(), 1);
//! assert_eq!(surface.start_count(), 2);
//! ```

pub mod config;
pub mod error;
pub mod graph;
pub mod lifecycle;
pub mod reload;
pub mod snapshot;

pub use config::{GraphConfig, LogLevel};
pub use error::GraphError;
pub use graph::{NodeId, NodeKind, Value};
pub use lifecycle::{AnyNode, EndReport, EpisodeReport, Graph, Joined, Node};
pub use reload::{ReloadBridge, ReloadReport, ReloadTrigger};
pub use snapshot::GraphSnapshot;
