use crate::id::MachineId;
use std::collections::BTreeSet;

/// Tracks which machines have changed since their last write to the store.
///
/// The registry marks machines here as they change; a checkpoint drains the
/// set with [`take`](DirtyTracker::take) and persists only those machines.
#[derive(Debug, Clone, Default)]
pub struct DirtyTracker {
    dirty_machines: BTreeSet<MachineId>,
}

impl DirtyTracker {
    /// Create a new tracker with nothing dirty.
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a machine as changed.
    pub fn mark(&mut self, id: MachineId) {
        self.dirty_machines.insert(id);
    }

    /// Forget a machine, e.g. after it was removed or saved.
    pub fn unmark(&mut self, id: MachineId) {
        self.dirty_machines.remove(&id);
    }

    /// Returns `true` if anything has been marked since the last clean.
    pub fn is_dirty(&self) -> bool {
        !self.dirty_machines.is_empty()
    }

    /// Returns `true` if the given machine has been marked.
    pub fn is_machine_dirty(&self, id: MachineId) -> bool {
        self.dirty_machines.contains(&id)
    }

    pub fn len(&self) -> usize {
        self.dirty_machines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dirty_machines.is_empty()
    }

    /// Drain the dirty set, leaving the tracker clean.
    pub fn take(&mut self) -> BTreeSet<MachineId> {
        std::mem::take(&mut self.dirty_machines)
    }

    /// Reset all flags, marking everything as clean.
    pub fn mark_clean(&mut self) {
        self.dirty_machines.clear();
    }
}
