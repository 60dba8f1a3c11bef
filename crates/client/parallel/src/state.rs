//! Key/value view of contract state used while executing a block.
//!
//! Execution never writes to the base state directly. Each transaction runs against a [`LayeredState`]: its own
//! pending writes on top of the block's accumulated changes on top of the base. Once a block is done, the
//! accumulated [`StateChanges`] are handed back to the caller.

use crate::resource::ResourcePath;
use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    sync::Arc,
};

pub type StateValue = Vec<u8>;

/// `None` marks a deleted key.
pub type StateChanges = BTreeMap<ResourcePath, Option<StateValue>>;

pub trait StateReader: Send + Sync {
    fn get_state(&self, path: &ResourcePath) -> Option<StateValue>;
}

impl<T: StateReader + ?Sized> StateReader for Arc<T> {
    fn get_state(&self, path: &ResourcePath) -> Option<StateValue> {
        (**self).get_state(path)
    }
}

impl<T: StateReader + ?Sized> StateReader for &T {
    fn get_state(&self, path: &ResourcePath) -> Option<StateValue> {
        (**self).get_state(path)
    }
}

/// Plain in-memory state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemoryState {
    values: HashMap<ResourcePath, StateValue>,
}

impl MemoryState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, path: ResourcePath, value: StateValue) {
        self.values.insert(path, value);
    }

    pub fn apply(&mut self, changes: &StateChanges) {
        for (path, value) in changes {
            match value {
                Some(value) => self.values.insert(path.clone(), value.clone()),
                None => self.values.remove(path),
            };
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl FromIterator<(ResourcePath, StateValue)> for MemoryState {
    fn from_iter<I: IntoIterator<Item = (ResourcePath, StateValue)>>(iter: I) -> Self {
        Self { values: iter.into_iter().collect() }
    }
}

impl StateReader for MemoryState {
    fn get_state(&self, path: &ResourcePath) -> Option<StateValue> {
        self.values.get(path).cloned()
    }
}

/// Pending changes on top of a shared base. Owned, so it can be moved across threads between execution phases.
#[derive(Clone)]
pub struct OverlayState {
    base: Arc<dyn StateReader>,
    changes: StateChanges,
}

impl OverlayState {
    pub fn new(base: Arc<dyn StateReader>) -> Self {
        Self { base, changes: Default::default() }
    }

    pub fn changes(&self) -> &StateChanges {
        &self.changes
    }

    pub fn into_changes(self) -> StateChanges {
        self.changes
    }

    pub fn apply(&mut self, changes: StateChanges) {
        self.changes.extend(changes);
    }
}

impl StateReader for OverlayState {
    fn get_state(&self, path: &ResourcePath) -> Option<StateValue> {
        match self.changes.get(path) {
            Some(value) => value.clone(),
            None => self.base.get_state(path),
        }
    }
}

/// State seen by a parallel group. Each finished transaction is committed on top of it together with the reads the
/// executor reported, so that merges can detect conflicts.
pub struct LayeredState<'a> {
    base: &'a dyn StateReader,
    delta: StateDelta,
}

impl<'a> LayeredState<'a> {
    pub fn new(base: &'a dyn StateReader) -> Self {
        Self { base, delta: Default::default() }
    }

    /// Layers the reads and writes of a finished transaction on top of this state.
    pub fn commit(&mut self, delta: StateDelta) {
        self.delta.extend(delta);
    }

    pub fn delta(&self) -> &StateDelta {
        &self.delta
    }

    pub fn into_delta(self) -> StateDelta {
        self.delta
    }
}

/// Plain reads through this impl are not recorded.
impl StateReader for LayeredState<'_> {
    fn get_state(&self, path: &ResourcePath) -> Option<StateValue> {
        match self.delta.writes.get(path) {
            Some(value) => value.clone(),
            None => self.base.get_state(path),
        }
    }
}

/// Keys read and written by one execution unit (a transaction or a whole group).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StateDelta {
    pub writes: StateChanges,
    pub reads: BTreeSet<ResourcePath>,
}

impl StateDelta {
    pub fn touched(&self) -> impl Iterator<Item = &ResourcePath> {
        self.writes.keys().chain(self.reads.iter().filter(|p| !self.writes.contains_key(*p)))
    }

    /// Layers `other` on top of `self`. Reads of keys already written by `self` are internal and not recorded.
    pub fn extend(&mut self, other: StateDelta) {
        for read in other.reads {
            if !self.writes.contains_key(&read) {
                self.reads.insert(read);
            }
        }
        self.writes.extend(other.writes);
    }
}
