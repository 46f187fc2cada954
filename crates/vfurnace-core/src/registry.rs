//! The authoritative collection of live machines.
//!
//! # Locking
//!
//! - The id → machine map sits behind an `RwLock` and is only touched by
//!   registry methods. [`MachineRegistry::list_all`] copies the handles out,
//!   so a tick can iterate while other callers create or remove machines.
//! - Every machine is an `Arc<Mutex<Machine>>`, which serializes `advance()`
//!   against slot-set calls on the same machine.
//! - The store sits behind its own `Mutex` (single writer). Records are
//!   snapshotted before the store lock is taken, and no machine lock is held
//!   while writing.
//! - Saves hold a checkpoint lock from snapshot to write, so checkpoints land
//!   in the order their snapshots were taken. Under the store lock each
//!   record is checked against the live map: a machine removed after its
//!   record was taken is never written back.
//! - Do not hold a machine lock while calling a save method.

use crate::blueprint::{BlueprintError, BlueprintRegistry};
use crate::dirty::DirtyTracker;
use crate::id::MachineId;
use crate::machine::{Machine, MachineKind};
use crate::serialize::MachineRecord;
use crate::store::{PersistenceStore, StoreError};
use crate::token::{MachineIdTag, Token, TokenTag};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, info, warn};

/// Shared handle to a registered machine.
pub type MachineHandle = Arc<Mutex<Machine>>;

/// Lock a machine. A lock poisoned by a panicking advance is recovered: the
/// machine's fields are always individually valid.
pub fn lock_machine(handle: &MachineHandle) -> MutexGuard<'_, Machine> {
    handle.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error(transparent)]
    Blueprint(#[from] BlueprintError),
}

/// A machine's record as of one checkpoint, with the handle it was taken from.
struct Snapshot {
    id: MachineId,
    handle: MachineHandle,
    record: MachineRecord,
}

pub struct MachineRegistry {
    blueprints: Arc<BlueprintRegistry>,
    machines: RwLock<HashMap<MachineId, MachineHandle>>,
    dirty: Mutex<DirtyTracker>,
    checkpoint: Mutex<()>,
    store: Mutex<Box<dyn PersistenceStore>>,
}

impl fmt::Debug for MachineRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MachineRegistry")
            .field("machines", &self.len())
            .field("blueprints", &self.blueprints.len())
            .finish_non_exhaustive()
    }
}

impl MachineRegistry {
    pub fn new(blueprints: Arc<BlueprintRegistry>, store: impl PersistenceStore + 'static) -> Self {
        Self::with_boxed_store(blueprints, Box::new(store))
    }

    pub fn with_boxed_store(
        blueprints: Arc<BlueprintRegistry>,
        store: Box<dyn PersistenceStore>,
    ) -> Self {
        Self {
            blueprints,
            machines: RwLock::new(HashMap::new()),
            dirty: Mutex::new(DirtyTracker::new()),
            checkpoint: Mutex::new(()),
            store: Mutex::new(store),
        }
    }

    pub fn blueprints(&self) -> &Arc<BlueprintRegistry> {
        &self.blueprints
    }

    // -- Creation ------------------------------------------------------------

    /// Create a machine from a named blueprint, register it and persist it.
    pub fn create(&self, name: &str, blueprint: &str) -> Result<MachineHandle, RegistryError> {
        self.create_with(name, blueprint, |_| {})
    }

    /// Like [`create`](Self::create), running `init` on the machine before
    /// it becomes visible to any other registry caller.
    pub fn create_with<F>(
        &self,
        name: &str,
        blueprint: &str,
        init: F,
    ) -> Result<MachineHandle, RegistryError>
    where
        F: FnOnce(&mut Machine),
    {
        let properties = self.blueprints.get(blueprint)?;
        let mut machine = Machine::new(MachineId::random(), name, properties);
        init(&mut machine);

        let (id, record, handle) = {
            let mut machines = self.write_machines();
            while machines.contains_key(&machine.id()) {
                warn!(id = %machine.id(), "machine id collision, regenerating");
                machine.reassign_id(MachineId::random());
            }
            let id = machine.id();
            let record = machine.to_record();
            let handle = Arc::new(Mutex::new(machine));
            machines.insert(id, handle.clone());
            (id, record, handle)
        };

        self.write_through(id, Some(record), true);
        info!(%id, name, blueprint, "machine created");
        Ok(handle)
    }

    /// Create a machine and bind it to a copy of `token`.
    pub fn create_token_with_machine<F>(
        &self,
        name: &str,
        blueprint: &str,
        token: &Token,
        glowing: bool,
        init: F,
    ) -> Result<(Token, MachineHandle), RegistryError>
    where
        F: FnOnce(&mut Machine),
    {
        let handle = self.create_with(name, blueprint, init)?;
        let bound = self.bind_to_token(token, &lock_machine(&handle), glowing);
        Ok((bound, handle))
    }

    // -- Lookup --------------------------------------------------------------

    pub fn get(&self, id: MachineId) -> Option<MachineHandle> {
        self.read_machines().get(&id).cloned()
    }

    pub fn contains(&self, id: MachineId) -> bool {
        self.read_machines().contains_key(&id)
    }

    /// A snapshot of every registered machine, ordered by id. Later creates
    /// and removes never affect a snapshot already taken.
    pub fn list_all(&self) -> Vec<MachineHandle> {
        self.entries().into_iter().map(|(_, handle)| handle).collect()
    }

    /// A snapshot of the machines of one kind.
    pub fn machines_of_kind(&self, kind: MachineKind) -> Vec<MachineHandle> {
        self.list_all()
            .into_iter()
            .filter(|handle| lock_machine(handle).kind() == kind)
            .collect()
    }

    pub fn ids(&self) -> Vec<MachineId> {
        let mut ids: Vec<MachineId> = self.read_machines().keys().copied().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.read_machines().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read_machines().is_empty()
    }

    // -- Mutation ------------------------------------------------------------

    /// Remove a machine from memory and stage its removal from the store.
    /// With `persist` the store is flushed immediately; otherwise the
    /// removal lands with the next flush.
    pub fn remove(&self, id: MachineId, persist: bool) -> Option<MachineHandle> {
        let removed = self.write_machines().remove(&id);
        self.lock_dirty().unmark(id);
        self.write_through(id, None, persist);
        if removed.is_some() {
            info!(%id, "machine removed");
        }
        removed
    }

    /// Run `f` on a machine under its lock and mark it for the next
    /// checkpoint. `None` if the id is unknown.
    pub fn update<R>(&self, id: MachineId, f: impl FnOnce(&mut Machine) -> R) -> Option<R> {
        let handle = self.get(id)?;
        let out = f(&mut lock_machine(&handle));
        self.mark_dirty(id);
        Some(out)
    }

    /// Record that a machine changed outside the registry's knowledge.
    pub fn mark_dirty(&self, id: MachineId) {
        self.lock_dirty().mark(id);
    }

    pub fn dirty_count(&self) -> usize {
        self.lock_dirty().len()
    }

    // -- Tokens --------------------------------------------------------------

    /// A copy of `token` carrying `machine`'s id, optionally marked glowing.
    /// The original token is left untouched.
    pub fn bind_to_token(&self, token: &Token, machine: &Machine, glowing: bool) -> Token {
        if let Some(existing) = MachineIdTag::read(token) {
            if existing != machine.id() {
                debug!(%existing, new = %machine.id(), "token rebound to another machine");
            }
        }
        let marked = if glowing { token.with_glow(true) } else { token.clone() };
        MachineIdTag::write(&marked, &machine.id())
    }

    /// The machine bound to `token`. Missing, malformed or stale tags all
    /// yield `None`.
    pub fn resolve_from_token(&self, token: &Token) -> Option<MachineHandle> {
        MachineIdTag::read(token).and_then(|id| self.get(id))
    }

    // -- Persistence ---------------------------------------------------------

    /// Stage the current state of one machine; flush if `persist`.
    /// Returns `false` if the id is unknown.
    pub fn save(&self, id: MachineId, persist: bool) -> bool {
        let _checkpoint = self.lock_checkpoint();
        let Some(handle) = self.get(id) else {
            return false;
        };
        self.lock_dirty().unmark(id);
        let snapshot = self.snapshot_records(vec![(id, handle)]);
        if let Err(e) = self.commit(snapshot, persist) {
            warn!(%id, error = %e, "failed to persist machine");
        }
        true
    }

    /// Write every machine to the store and flush. Returns how many
    /// machines were written.
    pub fn save_all(&self) -> Result<usize, StoreError> {
        let _checkpoint = self.lock_checkpoint();
        // Clean first: anything that changes after its record is taken is
        // marked again and caught by the next checkpoint.
        self.lock_dirty().mark_clean();
        let snapshot = self.snapshot_records(self.entries());
        let count = self.commit(snapshot, true)?;
        info!(count, "saved all machines");
        Ok(count)
    }

    /// Write only the machines marked dirty since the last checkpoint.
    pub fn flush_dirty(&self) -> Result<usize, StoreError> {
        let _checkpoint = self.lock_checkpoint();
        let ids = self.lock_dirty().take();
        if ids.is_empty() {
            return Ok(0);
        }
        let entries = ids
            .into_iter()
            .filter_map(|id| self.get(id).map(|handle| (id, handle)))
            .collect();
        let snapshot = self.snapshot_records(entries);
        let count = self.commit(snapshot, true)?;
        debug!(count, "flushed dirty machines");
        Ok(count)
    }

    /// Populate the registry from the store. An empty or missing store loads
    /// nothing. Records with a malformed id or an unknown blueprint are
    /// logged and skipped.
    pub fn load_all(&self) -> Result<usize, StoreError> {
        let records = self.lock_store().load_all()?;
        let mut loaded = 0;
        let mut machines = self.write_machines();
        for (key, record) in records {
            let Some(id) = MachineId::parse(&key) else {
                warn!(key, "skipping machine record with malformed id");
                continue;
            };
            match Machine::from_record(id, record, &self.blueprints) {
                Ok(machine) => {
                    machines.insert(id, Arc::new(Mutex::new(machine)));
                    loaded += 1;
                }
                Err(e) => warn!(%id, error = %e, "skipping machine record"),
            }
        }
        info!(loaded, "loaded machines");
        Ok(loaded)
    }

    /// Save everything, then clear the in-memory map. Calling it again is
    /// harmless: there is nothing left to save. If the save fails the
    /// machines stay loaded, so the host can retry.
    pub fn shutdown(&self) -> Result<usize, StoreError> {
        let saved = self
            .save_all()
            .inspect_err(|e| warn!(error = %e, "final save failed, keeping machines loaded"))?;
        self.write_machines().clear();
        self.lock_dirty().mark_clean();
        Ok(saved)
    }

    // -- Internals -----------------------------------------------------------

    fn entries(&self) -> Vec<(MachineId, MachineHandle)> {
        let mut entries: Vec<(MachineId, MachineHandle)> = self
            .read_machines()
            .iter()
            .map(|(id, handle)| (*id, handle.clone()))
            .collect();
        entries.sort_by_key(|(id, _)| *id);
        entries
    }

    fn snapshot_records(&self, entries: Vec<(MachineId, MachineHandle)>) -> Vec<Snapshot> {
        entries
            .into_iter()
            .map(|(id, handle)| {
                let record = lock_machine(&handle).to_record();
                Snapshot { id, handle, record }
            })
            .collect()
    }

    /// Stage snapshots whose machine is still registered under the same
    /// handle, then flush if asked. Returns how many were staged.
    fn commit(&self, snapshots: Vec<Snapshot>, flush: bool) -> Result<usize, StoreError> {
        let mut store = self.lock_store();
        let mut staged = 0;
        {
            let machines = self.read_machines();
            for Snapshot { id, handle, record } in snapshots {
                if machines.get(&id).is_some_and(|live| Arc::ptr_eq(live, &handle)) {
                    store.put(&id.to_string(), record);
                    staged += 1;
                } else {
                    debug!(%id, "machine removed before its save landed, skipping");
                }
            }
        }
        if flush {
            store.flush()?;
        }
        Ok(staged)
    }

    /// Stage a change in the store, flushing if asked. Failures are logged:
    /// the in-memory registry stays authoritative.
    fn write_through(&self, id: MachineId, record: Option<MachineRecord>, flush: bool) {
        let key = id.to_string();
        let mut store = self.lock_store();
        match record {
            Some(record) => store.put(&key, record),
            None => store.delete(&key),
        }
        if flush {
            if let Err(e) = store.flush() {
                warn!(%id, error = %e, "failed to persist machine");
            }
        }
    }

    fn read_machines(&self) -> RwLockReadGuard<'_, HashMap<MachineId, MachineHandle>> {
        self.machines.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_machines(&self) -> RwLockWriteGuard<'_, HashMap<MachineId, MachineHandle>> {
        self.machines.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_dirty(&self) -> MutexGuard<'_, DirtyTracker> {
        self.dirty.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_checkpoint(&self) -> MutexGuard<'_, ()> {
        self.checkpoint.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_store(&self) -> MutexGuard<'_, Box<dyn PersistenceStore>> {
        self.store.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
