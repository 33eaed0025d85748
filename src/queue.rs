//! The task queue and the lazy/triggered computation registries.

use std::collections::VecDeque;

use rustc_hash::{FxHashMap, FxHashSet};

use crate::entity::EntityId;
use crate::error::StoreError;
use crate::kind::KindId;
use crate::result::PropertyComputation;
use crate::store::PropertyStore;

/// A zero-argument unit of work: an analysis call or a continuation re-invocation, already bound
/// to its arguments.
pub(crate) type Task = Box<dyn FnOnce(&PropertyStore) + Send>;

/// A plain double-ended queue. Tasks are normally appended (FIFO); the "delay" flags may
/// instead prepend (LIFO) to apply a just-observed update ahead of older pending work.
#[derive(Default)]
pub(crate) struct TaskQueue {
    tasks: VecDeque<Task>,
}

impl TaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, task: Task) {
        self.tasks.push_back(task);
    }

    pub fn prepend(&mut self, task: Task) {
        self.tasks.push_front(task);
    }

    pub fn pop(&mut self) -> Option<Task> {
        self.tasks.pop_front()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }
}

/// Registers lazy computations (`schedule_lazy`) and triggered computations
/// (`register_triggered`), and remembers which `(entity, kind)` lazy placeholders have already
/// been scheduled so `get` only fires a lazy computation once per pair.
#[derive(Default)]
pub(crate) struct ComputationRegistry {
    lazy: FxHashMap<KindId, PropertyComputation>,
    triggered: Vec<(KindId, PropertyComputation)>,
    lazy_scheduled: FxHashSet<(EntityId, KindId)>,
}

impl ComputationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_lazy(&mut self, kind: KindId, pc: PropertyComputation) -> Result<(), StoreError> {
        if self.lazy.contains_key(&kind) {
            return Err(StoreError::LazyConflict { kind: kind.to_string() });
        }
        self.lazy.insert(kind, pc);
        Ok(())
    }

    pub fn is_lazy(&self, kind: KindId) -> bool {
        self.lazy.contains_key(&kind)
    }

    pub fn lazy_for(&self, kind: KindId) -> Option<PropertyComputation> {
        self.lazy.get(&kind).cloned()
    }

    /// Returns `true` the first time it is called for a given `(entity, kind)`, `false` on every
    /// later call — the caller uses this to schedule the lazy computation exactly once.
    pub fn mark_lazy_scheduled(&mut self, entity: EntityId, kind: KindId) -> bool {
        self.lazy_scheduled.insert((entity, kind))
    }

    pub fn register_triggered(&mut self, kind: KindId, pc: PropertyComputation) {
        self.triggered.push((kind, pc));
    }

    pub fn triggered_for(&self, kind: KindId) -> Vec<PropertyComputation> {
        self.triggered
            .iter()
            .filter(|(k, _)| *k == kind)
            .map(|(_, pc)| pc.clone())
            .collect()
    }
}
