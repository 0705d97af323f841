//! Lifecycle Control
//!
//! This module turns the structural graph into running resources. It
//! exposes the public handles and drives start and stop episodes.
//!
//! # Concepts
//!
//! ## Episodes
//!
//! A start episode runs every node scheduled from a target, parents first.
//! Roots take the seed supplied by the caller; every other node takes the
//! values its parents produced, either earlier in the same episode or in
//! an earlier one if that parent was not part of the episode.
//!
//! ## Joins
//!
//! A node with several parents keeps one slot per parent. It starts the
//! first time every slot is filled and restarts, with every slot's latest
//! value, whenever one of its parents delivers again.
//!
//! ## Teardown
//!
//! Ending a node stops its subgraph in exactly the reverse of the start
//! order, so nothing is stopped while a dependent still holds it. A stopped
//! parent clears the slots it filled.

mod controller;
mod handle;
mod trace;

pub use handle::{AnyNode, Graph, Joined, Node};
pub use trace::{EndReport, EpisodeReport};
