//! Lifecycle Controller
//!
//! Runs start and stop episodes over the scheduler's orders and invokes the
//! node callbacks.
//!
//! # Borrowing
//!
//! Graph state sits behind a `RefCell`. Every step below takes a short
//! borrow to read or write node bookkeeping and releases it before a user
//! callback runs, so callbacks are free to bind nodes or query the graph.
//! A node removed while an episode is in flight is skipped.
//!
//! # Failure policy
//!
//! A start callback that errors or panics leaves its node without a value
//! and the episode carries on. Nodes that need the missing value are
//! skipped rather than started with a stale or absent parent.

use std::collections::HashSet;
use std::panic::{self, AssertUnwindSafe};

use anyhow::anyhow;
use tracing::{debug, debug_span, error, warn};

use super::handle::Graph;
use super::trace::{lifecycle_event, panic_message, EndReport, EpisodeReport};
use crate::config::GraphConfig;
use crate::error::{GraphError, Result};
use crate::graph::{Edge, GraphScheduler, NodeId, StartFn, StopFn, Value};

/// Mutable state shared by every handle of one graph.
#[derive(Debug)]
pub(crate) struct GraphState {
    pub scheduler: GraphScheduler,
    pub config: GraphConfig,

    /// Number of start episodes run so far.
    pub episodes: u64,
}

impl GraphState {
    pub fn new(config: GraphConfig) -> Self {
        Self {
            scheduler: GraphScheduler::new(),
            config,
            episodes: 0,
        }
    }
}

/// Everything needed to run one node's start callback, captured under a
/// borrow so the callback itself runs without one.
struct PreparedStart {
    label: String,
    level: crate::config::LogLevel,
    value_type: &'static str,
    start: StartFn,
    args: Vec<Value>,
    parents: Vec<String>,
    restarting: bool,
}

enum Readiness {
    Ready(PreparedStart),
    /// A slot is empty. Holds the parent that should have filled it.
    Missing {
        label: String,
        slot: usize,
        parent: Option<NodeId>,
    },
    Gone,
}

impl Graph {
    /// Store `value` into slot `index` of `target`, ending the target first
    /// if it is running, then run a start episode from it.
    pub(crate) fn seed(&self, target: NodeId, index: usize, value: Value) -> Result<EpisodeReport> {
        if self.check_slot(target, index)? {
            debug!(node = %target, "already running, ending before reseeding");
            self.end_subtree(target);
        }
        self.deliver(target, index, value)
    }

    /// End `target` unconditionally, then seed slot `index` and start it.
    ///
    /// Nothing is ended when `index` is out of range.
    pub(crate) fn reseed(&self, target: NodeId, index: usize, value: Value) -> Result<EpisodeReport> {
        self.check_slot(target, index)?;
        self.end_subtree(target);
        self.deliver(target, index, value)
    }

    /// Validate a slot index, returning whether the target is running.
    fn check_slot(&self, target: NodeId, index: usize) -> Result<bool> {
        let state = self.state.borrow();
        let node = state.scheduler.node(target)?;
        if index >= node.slots().len() {
            return Err(GraphError::ParentIndexOutOfRange {
                label: node.label().to_owned(),
                index,
                slots: node.slots().len(),
            });
        }
        Ok(node.is_running())
    }

    fn deliver(&self, target: NodeId, index: usize, value: Value) -> Result<EpisodeReport> {
        self.state
            .borrow_mut()
            .scheduler
            .node_mut(target)?
            .slots_mut()
            .set(index, value);

        Ok(self.run_episode(target, true))
    }

    /// End `target` and start it again from its cached parent values.
    pub(crate) fn restart_node(&self, target: NodeId) -> Result<EpisodeReport> {
        let label = self.state.borrow().scheduler.node(target)?.label().to_owned();
        debug!(node = %target, label = %label, "restarting");

        self.end_subtree(target);
        Ok(self.run_episode(target, true))
    }

    /// Start every node scheduled from `target`, parents first.
    ///
    /// With `include_target` unset the target itself is left alone and only
    /// its descendants run, fed from the target's current value.
    pub(crate) fn run_episode(&self, target: NodeId, include_target: bool) -> EpisodeReport {
        let (order, episode, catch_panics, label) = {
            let mut state = self.state.borrow_mut();
            state.episodes += 1;
            let label = state
                .scheduler
                .get_node(target)
                .map(|node| node.label().to_owned())
                .unwrap_or_default();
            (
                state.scheduler.schedule(target),
                state.episodes,
                state.config.catch_panics,
                label,
            )
        };

        let span = debug_span!("episode", episode, target = %label);
        let _enter = span.enter();

        let mut report = EpisodeReport::new(episode);
        let mut unavailable = HashSet::new();

        for node_id in order {
            if node_id == target && !include_target {
                continue;
            }
            self.start_one(node_id, catch_panics, &mut report, &mut unavailable);
        }

        debug!(
            started = report.started.len(),
            failed = report.failed.len(),
            waiting = report.waiting.len(),
            skipped = report.skipped.len(),
            "episode finished"
        );

        report
    }

    fn start_one(
        &self,
        node_id: NodeId,
        catch_panics: bool,
        report: &mut EpisodeReport,
        unavailable: &mut HashSet<NodeId>,
    ) {
        let prepared = match self.prepare(node_id) {
            Readiness::Ready(prepared) => prepared,
            Readiness::Gone => return,
            Readiness::Missing {
                label,
                slot,
                parent,
            } => {
                if parent.is_some_and(|parent| unavailable.contains(&parent)) {
                    warn!(
                        node = %node_id,
                        label = %label,
                        slot,
                        "skipping start, parent has no value after this episode"
                    );
                    unavailable.insert(node_id);
                    report.skipped.push(node_id);
                } else {
                    debug!(node = %node_id, label = %label, slot, "waiting for parent value");
                    report.waiting.push(node_id);
                }
                return;
            }
        };

        if self.is_running(node_id) {
            lifecycle_event!(
                prepared.level,
                node = %node_id,
                label = %prepared.label,
                "replacing running value"
            );
            self.end_subtree(node_id);
        }

        let result = invoke_start(&prepared.start, &prepared.args, catch_panics);

        let value = match result {
            Ok(value) => value,
            Err(err) => {
                error!(
                    node = %node_id,
                    label = %prepared.label,
                    parents = ?prepared.parents,
                    "start failed: {err:#}"
                );
                unavailable.insert(node_id);
                report.failed.push(node_id);
                return;
            }
        };

        let stored = {
            let mut state = self.state.borrow_mut();
            match state.scheduler.get_node_mut(node_id) {
                Some(node) => {
                    node.set_value(value.clone());
                    let edges: Vec<Edge> = node.children().to_vec();
                    for edge in edges {
                        if let Some(child) = state.scheduler.get_node_mut(edge.child) {
                            child.slots_mut().set(edge.parent_index, value.clone());
                        }
                    }
                    true
                }
                None => false,
            }
        };

        if !stored {
            // The node was discarded by its own start callback.
            warn!(node = %node_id, label = %prepared.label, "node vanished during start");
            return;
        }

        lifecycle_event!(
            prepared.level,
            node = %node_id,
            label = %prepared.label,
            parents = ?prepared.parents,
            value_type = prepared.value_type,
            "{}",
            if prepared.restarting { "restarted" } else { "started" }
        );
        report.started.push(node_id);
    }

    fn prepare(&self, node_id: NodeId) -> Readiness {
        let state = self.state.borrow();
        let Some(node) = state.scheduler.get_node(node_id) else {
            return Readiness::Gone;
        };

        let args = match node.slots().resolve() {
            Ok(args) => args.into_vec(),
            Err(slot) => {
                return Readiness::Missing {
                    label: node.label().to_owned(),
                    slot,
                    parent: node.slots().parent(slot),
                }
            }
        };

        let parents = (0..node.slots().len())
            .map(|slot| match node.slots().parent(slot) {
                Some(parent) => state
                    .scheduler
                    .get_node(parent)
                    .map(|parent| parent.label().to_owned())
                    .unwrap_or_else(|| parent.to_string()),
                None if node.slots().parent_count() == 0 => "<seed>".to_owned(),
                None => "<detached>".to_owned(),
            })
            .collect();

        Readiness::Ready(PreparedStart {
            label: node.label().to_owned(),
            level: node.log_level(),
            value_type: node.value_type(),
            start: node.start_fn(),
            args,
            parents,
            restarting: node.start_count() > 0,
        })
    }

    /// Stop `target` and everything below it, children before parents.
    pub(crate) fn end_subtree(&self, target: NodeId) -> EndReport {
        let (order, label, running, catch_panics) = {
            let state = self.state.borrow();
            let Some(node) = state.scheduler.get_node(target) else {
                warn!(node = %target, "end requested for a node that is not in the graph");
                return EndReport::default();
            };
            (
                state.scheduler.schedule(target),
                node.label().to_owned(),
                node.is_running(),
                state.config.catch_panics,
            )
        };

        if !running {
            warn!(node = %target, label = %label, "end requested for a node that is not running");
        }

        let span = debug_span!("teardown", target = %label);
        let _enter = span.enter();

        let mut report = EndReport::default();

        for node_id in order.into_iter().rev() {
            let Some((value, stop, label, level)) = self.take_for_stop(node_id) else {
                continue;
            };

            if let Err(err) = invoke_stop(&stop, &value, catch_panics) {
                error!(node = %node_id, label = %label, "stop failed: {err:#}");
            }
            drop(value);

            lifecycle_event!(level, node = %node_id, label = %label, "stopped");
            report.stopped.push(node_id);
        }

        report
    }

    /// Take a node's value for stopping and clear the child slots it fills.
    fn take_for_stop(
        &self,
        node_id: NodeId,
    ) -> Option<(Value, StopFn, String, crate::config::LogLevel)> {
        let mut state = self.state.borrow_mut();
        let node = state.scheduler.get_node_mut(node_id)?;
        let value = node.take_value()?;
        let stop = node.stop_fn();
        let label = node.label().to_owned();
        let level = node.log_level();
        let edges: Vec<Edge> = node.children().to_vec();

        for edge in edges {
            if let Some(child) = state.scheduler.get_node_mut(edge.child) {
                child.slots_mut().clear(edge.parent_index);
            }
        }

        Some((value, stop, label, level))
    }

    pub(crate) fn is_running(&self, node_id: NodeId) -> bool {
        self.state
            .borrow()
            .scheduler
            .get_node(node_id)
            .is_some_and(|node| node.is_running())
    }
}

fn invoke_start(start: &StartFn, args: &[Value], catch_panics: bool) -> anyhow::Result<Value> {
    if !catch_panics {
        return start(args);
    }
    match panic::catch_unwind(AssertUnwindSafe(|| start(args))) {
        Ok(result) => result,
        Err(payload) => Err(anyhow!(
            "start callback panicked: {}",
            panic_message(payload.as_ref())
        )),
    }
}

fn invoke_stop(stop: &StopFn, value: &Value, catch_panics: bool) -> anyhow::Result<()> {
    if !catch_panics {
        stop(value);
        return Ok(());
    }
    panic::catch_unwind(AssertUnwindSafe(|| stop(value))).map_err(|payload| {
        anyhow!(
            "stop callback panicked: {}",
            panic_message(payload.as_ref())
        )
    })
}
