//! Edges and Parent Slots
//!
//! An edge runs from a parent to a child and remembers which positional
//! argument of the child's start callback it feeds. The child side keeps a
//! matching slot array: one entry per parent holding the latest value that
//! parent delivered.

use smallvec::SmallVec;

use super::node::{NodeId, Value};

/// A directed link from a parent node to one of its children.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Edge {
    /// The child this edge points to.
    pub child: NodeId,

    /// Which positional parent slot of the child this edge fills.
    pub parent_index: usize,
}

impl Edge {
    pub fn new(child: NodeId, parent_index: usize) -> Self {
        Self {
            child,
            parent_index,
        }
    }
}

/// Child-side bookkeeping of parents and the values they delivered.
///
/// A root has no parents but still owns one slot, which holds the seed
/// supplied by the caller.
pub(crate) struct ParentSlots {
    /// Which node fills each slot. `None` until bound, or after that parent
    /// detached the child.
    parents: SmallVec<[Option<NodeId>; 4]>,

    /// Latest value per slot.
    values: SmallVec<[Option<Value>; 4]>,

    /// Number of parents bound so far. The next bound parent gets this index.
    bound: usize,
}

impl ParentSlots {
    pub fn new(parent_count: usize) -> Self {
        let slots = parent_count.max(1);
        Self {
            parents: SmallVec::from_elem(None, parent_count),
            values: (0..slots).map(|_| None).collect(),
            bound: 0,
        }
    }

    /// Declared number of parents.
    pub fn parent_count(&self) -> usize {
        self.parents.len()
    }

    /// Number of value slots (at least one, for the root seed).
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Assign the next free parent index to `parent`.
    ///
    /// Returns the index, or `None` when every declared parent is bound.
    pub fn bind(&mut self, parent: NodeId) -> Option<usize> {
        let index = self.bound;
        let slot = self.parents.get_mut(index)?;
        *slot = Some(parent);
        self.bound += 1;
        Some(index)
    }

    /// Forget which parent fills `index`. The cached value stays.
    pub fn detach(&mut self, index: usize) {
        if let Some(slot) = self.parents.get_mut(index) {
            *slot = None;
        }
    }

    /// Detach every slot that `parent` fills.
    pub fn detach_parent(&mut self, parent: NodeId) {
        for slot in self.parents.iter_mut() {
            if *slot == Some(parent) {
                *slot = None;
            }
        }
    }

    pub fn parent(&self, index: usize) -> Option<NodeId> {
        self.parents.get(index).copied().flatten()
    }

    pub fn parents(&self) -> impl Iterator<Item = Option<NodeId>> + '_ {
        self.parents.iter().copied()
    }

    /// Store a delivered value. Returns `false` if `index` is out of range.
    pub fn set(&mut self, index: usize, value: Value) -> bool {
        match self.values.get_mut(index) {
            Some(slot) => {
                *slot = Some(value);
                true
            }
            None => false,
        }
    }

    pub fn clear(&mut self, index: usize) {
        if let Some(slot) = self.values.get_mut(index) {
            *slot = None;
        }
    }

    /// Collect every slot value in order, or report the first empty slot.
    pub fn resolve(&self) -> Result<SmallVec<[Value; 4]>, usize> {
        self.values
            .iter()
            .enumerate()
            .map(|(index, slot)| slot.clone().ok_or(index))
            .collect()
    }
}
