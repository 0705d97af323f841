//! Lifecycle diagnostics.
//!
//! Failures inside callbacks never propagate to the caller, so the trace is
//! the primary record of what a start or stop episode did. Routine events
//! are emitted at each node's own [`LogLevel`](crate::LogLevel); the reports
//! below summarize an episode for callers that want to react in code.

use std::any::Any;

use crate::graph::NodeId;

/// Emit a tracing event at a [`LogLevel`](crate::LogLevel) chosen at
/// runtime.
macro_rules! lifecycle_event {
    ($level:expr, $($arg:tt)+) => {{
        let level: ::tracing::Level = ($level).into();
        if level == ::tracing::Level::ERROR {
            ::tracing::error!($($arg)+)
        } else if level == ::tracing::Level::WARN {
            ::tracing::warn!($($arg)+)
        } else if level == ::tracing::Level::INFO {
            ::tracing::info!($($arg)+)
        } else if level == ::tracing::Level::DEBUG {
            ::tracing::debug!($($arg)+)
        } else {
            ::tracing::trace!($($arg)+)
        }
    }};
}

pub(crate) use lifecycle_event;

/// Outcome of one start episode.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EpisodeReport {
    /// Sequence number of the episode within its graph.
    pub episode: u64,

    /// Nodes whose start callback succeeded, in start order.
    pub started: Vec<NodeId>,

    /// Nodes whose start callback returned an error or panicked.
    pub failed: Vec<NodeId>,

    /// Joined nodes still waiting for a parent that has never delivered.
    pub waiting: Vec<NodeId>,

    /// Nodes not started because a parent failed or was skipped.
    pub skipped: Vec<NodeId>,
}

impl EpisodeReport {
    pub(crate) fn new(episode: u64) -> Self {
        Self {
            episode,
            ..Self::default()
        }
    }

    /// True when nothing failed and nothing was skipped.
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty() && self.skipped.is_empty()
    }
}

/// Outcome of an end (and, for [`discard`](crate::AnyNode::discard), removal).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EndReport {
    /// Nodes whose value was stopped, in stop order.
    pub stopped: Vec<NodeId>,

    /// Nodes removed from the graph.
    pub removed: Vec<NodeId>,
}

impl EndReport {
    pub(crate) fn merge(&mut self, other: EndReport) {
        self.stopped.extend(other.stopped);
        self.removed.extend(other.removed);
    }
}

/// Best-effort text of a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "non-string panic payload"
    }
}
