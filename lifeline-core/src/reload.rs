//! Hot Reload
//!
//! The reload bridge swaps out everything below one boundary node while the
//! boundary and the rest of the graph keep running.
//!
//! # How a Reload Works
//!
//! 1. The boundary's children are detached from the graph.
//! 2. The detached subtrees are ended (children first) and discarded.
//! 3. The rebuild closure binds a fresh subtree under the boundary.
//! 4. The new subtree is started from the boundary's current value.
//!
//! The boundary's own start and stop callbacks never run during a reload.
//!
//! # Signalling
//!
//! Reload notifications usually come from another thread (a file watcher or
//! a code reloader). [`ReloadTrigger`] is the `Send` half that such a thread
//! keeps; the thread that owns the graph calls [`ReloadBridge::poll`] once
//! per frame or loop iteration to act on it.

use std::sync::mpsc::{self, Receiver, Sender};

use tracing::{info, info_span};

use crate::error::Result;
use crate::lifecycle::{EndReport, EpisodeReport, Node};

/// Sending half of a reload bridge.
#[derive(Debug, Clone)]
pub struct ReloadTrigger {
    sender: Sender<()>,
}

impl ReloadTrigger {
    /// Report that a reload has completed and the subtree should be rebuilt.
    ///
    /// Returns `false` if the bridge no longer exists.
    pub fn reload_completed(&self) -> bool {
        self.sender.send(()).is_ok()
    }
}

/// What a reload did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReloadReport {
    /// Sequence number of this reload, starting at 1.
    pub generation: u64,

    /// Teardown of the old subtree.
    pub ended: EndReport,

    /// Start episode of the new subtree.
    pub started: EpisodeReport,
}

type Rebuild<P, T> = Box<dyn FnMut(&Node<P, T>) -> Result<()>>;

/// Rebuilds the subtree below a boundary node on demand.
pub struct ReloadBridge<P, T> {
    boundary: Node<P, T>,
    rebuild: Rebuild<P, T>,
    sender: Sender<()>,
    receiver: Receiver<()>,
    generation: u64,
}

impl<P: 'static, T: 'static> ReloadBridge<P, T> {
    /// Install a bridge at `boundary` and bind the initial subtree by
    /// running `rebuild` once.
    ///
    /// The initial subtree is not started: it starts with the boundary, or
    /// right away if the boundary is already running.
    pub fn install<F>(boundary: Node<P, T>, mut rebuild: F) -> Result<Self>
    where
        F: FnMut(&Node<P, T>) -> Result<()> + 'static,
    {
        rebuild(&boundary)?;
        if boundary.is_running() {
            boundary.graph().run_episode(boundary.id(), false);
        }

        let (sender, receiver) = mpsc::channel();
        info!(boundary = %boundary.label(), "reload bridge installed");

        Ok(Self {
            boundary,
            rebuild: Box::new(rebuild),
            sender,
            receiver,
            generation: 0,
        })
    }

    pub fn boundary(&self) -> &Node<P, T> {
        &self.boundary
    }

    /// Number of reloads performed so far.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// A handle other threads can use to request a reload.
    pub fn trigger(&self) -> ReloadTrigger {
        ReloadTrigger {
            sender: self.sender.clone(),
        }
    }

    /// Perform a reload if one was requested since the last poll.
    ///
    /// Several pending requests collapse into a single reload.
    pub fn poll(&mut self) -> Result<Option<ReloadReport>> {
        let mut requested = false;
        while self.receiver.try_recv().is_ok() {
            requested = true;
        }

        if requested {
            self.reload().map(Some)
        } else {
            Ok(None)
        }
    }

    /// Replace the subtree below the boundary now.
    pub fn reload(&mut self) -> Result<ReloadReport> {
        self.generation += 1;
        let span = info_span!("reload", boundary = %self.boundary.label(), generation = self.generation);
        let _enter = span.enter();

        let mut ended = EndReport::default();
        for detached in self.boundary.remove_children()? {
            ended.merge(detached.discard());
        }

        (self.rebuild)(&self.boundary)?;

        let started = self
            .boundary
            .graph()
            .run_episode(self.boundary.id(), false);

        info!(
            stopped = ended.stopped.len(),
            removed = ended.removed.len(),
            started = started.started.len(),
            "reload finished"
        );

        Ok(ReloadReport {
            generation: self.generation,
            ended,
            started,
        })
    }
}
