//! Periodic driver that advances every registered machine.
//!
//! Each step takes a [`MachineRegistry::list_all`] snapshot and advances the
//! machines in it one by one, under each machine's own lock. The registry can
//! be mutated freely while a step runs: machines created mid-step are picked
//! up on the next one, and machines removed mid-step finish their current
//! advance harmlessly.

use crate::id::MachineId;
use crate::machine::{AdvanceResult, Machine};
use crate::recipe::RecipeCatalog;
use crate::registry::{MachineHandle, MachineRegistry, lock_machine};
use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, trace, warn};

pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_millis(50);
pub const DEFAULT_AUTOSAVE_EVERY: u64 = 1200;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerConfig {
    pub tick_interval: Duration,
    /// Flush dirty machines every this many steps. `0` disables autosave.
    pub autosave_every: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval: DEFAULT_TICK_INTERVAL,
            autosave_every: DEFAULT_AUTOSAVE_EVERY,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("no tokio runtime is available to drive the scheduler")]
    NoRuntime,
}

/// What one step did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StepReport {
    /// Machines advanced without panicking.
    pub advanced: usize,
    /// Recipe cycles finished.
    pub completed: usize,
    /// Machines whose advance panicked and were skipped.
    pub failed: usize,
}

// ---------------------------------------------------------------------------
// Step body
// ---------------------------------------------------------------------------

/// Advance every machine in a registry snapshot once. Machines whose state
/// changed are marked dirty for the next checkpoint.
pub fn advance_all(registry: &MachineRegistry, catalog: &RecipeCatalog) -> StepReport {
    advance_all_with(registry, |machine| machine.advance(catalog))
}

pub(crate) fn advance_all_with<F>(registry: &MachineRegistry, advance: F) -> StepReport
where
    F: Fn(&mut Machine) -> AdvanceResult + Sync,
{
    let snapshot = registry.list_all();

    #[cfg(feature = "parallel")]
    let outcomes: Vec<Result<(MachineId, AdvanceResult), MachineId>> = {
        use rayon::prelude::*;
        snapshot
            .par_iter()
            .map(|handle| advance_one(handle, &advance))
            .collect()
    };
    #[cfg(not(feature = "parallel"))]
    let outcomes: Vec<Result<(MachineId, AdvanceResult), MachineId>> = snapshot
        .iter()
        .map(|handle| advance_one(handle, &advance))
        .collect();

    let mut report = StepReport::default();
    for outcome in outcomes {
        match outcome {
            Ok((id, result)) => {
                report.advanced += 1;
                if result.completed {
                    report.completed += 1;
                }
                if result.is_dirty() {
                    registry.mark_dirty(id);
                }
            }
            Err(_) => report.failed += 1,
        }
    }
    report
}

fn advance_one<F>(handle: &MachineHandle, advance: &F) -> Result<(MachineId, AdvanceResult), MachineId>
where
    F: Fn(&mut Machine) -> AdvanceResult,
{
    let mut machine = lock_machine(handle);
    let id = machine.id();
    match catch_unwind(AssertUnwindSafe(|| advance(&mut *machine))) {
        Ok(result) => Ok((id, result)),
        Err(payload) => {
            error!(%id, panic = panic_message(payload.as_ref()), "machine advance panicked, skipping");
            Err(id)
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "<non-string panic>"
    }
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

struct Shared {
    registry: Arc<MachineRegistry>,
    catalog: Arc<RwLock<RecipeCatalog>>,
    running: AtomicBool,
    /// Held for the whole of every step and by `cancel`, so no step body
    /// starts after `cancel` returns.
    gate: Mutex<()>,
    /// Held for the whole of every autosave and by `cancel`, so no autosave
    /// writes after `cancel` returns.
    saving: Mutex<()>,
    ticks: AtomicU64,
    autosave_every: u64,
}

impl Shared {
    fn new(
        registry: Arc<MachineRegistry>,
        catalog: Arc<RwLock<RecipeCatalog>>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            registry,
            catalog,
            running: AtomicBool::new(true),
            gate: Mutex::new(()),
            saving: Mutex::new(()),
            ticks: AtomicU64::new(0),
            autosave_every: config.autosave_every,
        }
    }

    fn step(&self) -> Option<(StepReport, u64)> {
        let _gate = self.gate.lock().unwrap_or_else(PoisonError::into_inner);
        if !self.running.load(Ordering::Acquire) {
            return None;
        }
        let report = {
            let catalog = self.catalog.read().unwrap_or_else(PoisonError::into_inner);
            advance_all(&self.registry, &catalog)
        };
        let ticks = self.ticks.fetch_add(1, Ordering::AcqRel) + 1;
        trace!(tick = ticks, advanced = report.advanced, completed = report.completed, "tick");
        Some((report, ticks))
    }

    fn autosave_due(&self, ticks: u64) -> bool {
        self.autosave_every > 0 && ticks % self.autosave_every == 0
    }

    fn autosave(&self) {
        let _saving = self.saving.lock().unwrap_or_else(PoisonError::into_inner);
        if !self.running.load(Ordering::Acquire) {
            return;
        }
        match self.registry.flush_dirty() {
            Ok(0) => {}
            Ok(count) => debug!(count, "autosave checkpoint written"),
            Err(e) => warn!(error = %e, "autosave failed"),
        }
    }
}

/// Drives the registry's machines on a fixed period.
///
/// A scheduler built with [`start`](Self::start) ticks on a tokio task until
/// [`cancel`](Self::cancel) is called or it is dropped. One built with
/// [`manual`](Self::manual) only steps when [`step_once`](Self::step_once) is
/// called.
pub struct TickScheduler {
    shared: Arc<Shared>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for TickScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TickScheduler")
            .field("running", &self.is_running())
            .field("ticks", &self.ticks())
            .finish_non_exhaustive()
    }
}

impl TickScheduler {
    /// Start ticking on the current tokio runtime.
    pub fn start(
        registry: Arc<MachineRegistry>,
        catalog: Arc<RwLock<RecipeCatalog>>,
        config: SchedulerConfig,
    ) -> Result<Self, SchedulerError> {
        let runtime = Handle::try_current().map_err(|_| SchedulerError::NoRuntime)?;
        let shared = Arc::new(Shared::new(registry, catalog, config));
        let period = config.tick_interval.max(Duration::from_millis(1));
        let task = runtime.spawn(run(shared.clone(), period));
        info!(?period, autosave_every = config.autosave_every, "tick scheduler started");
        Ok(Self {
            shared,
            task: Mutex::new(Some(task)),
        })
    }

    /// A scheduler with no background task; the host calls
    /// [`step_once`](Self::step_once) on its own clock.
    pub fn manual(
        registry: Arc<MachineRegistry>,
        catalog: Arc<RwLock<RecipeCatalog>>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            shared: Arc::new(Shared::new(registry, catalog, config)),
            task: Mutex::new(None),
        }
    }

    /// Run one step synchronously. Autosave, when due, is written inline.
    /// Returns `None` once the scheduler is cancelled.
    pub fn step_once(&self) -> Option<StepReport> {
        let (report, ticks) = self.shared.step()?;
        if self.shared.autosave_due(ticks) {
            self.shared.autosave();
        }
        Some(report)
    }

    /// Stop ticking. Safe to call any number of times. Once it returns, no
    /// further step runs and any autosave in flight has finished.
    pub fn cancel(&self) {
        {
            let _gate = self.shared.gate.lock().unwrap_or_else(PoisonError::into_inner);
            if !self.shared.running.swap(false, Ordering::AcqRel) {
                return;
            }
        }
        drop(self.shared.saving.lock().unwrap_or_else(PoisonError::into_inner));
        if let Some(task) = self.task.lock().unwrap_or_else(PoisonError::into_inner).take() {
            task.abort();
        }
        info!(ticks = self.ticks(), "tick scheduler cancelled");
    }

    /// Completed steps so far.
    pub fn ticks(&self) -> u64 {
        self.shared.ticks.load(Ordering::Acquire)
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }
}

impl Drop for TickScheduler {
    fn drop(&mut self) {
        self.cancel();
    }
}

async fn run(shared: Arc<Shared>, period: Duration) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    // The first tick completes immediately.
    interval.tick().await;
    loop {
        interval.tick().await;
        let Some((_, ticks)) = shared.step() else {
            break;
        };
        if shared.autosave_due(ticks) {
            let shared = shared.clone();
            tokio::task::spawn_blocking(move || shared.autosave());
        }
    }
    trace!("tick task exited");
}
