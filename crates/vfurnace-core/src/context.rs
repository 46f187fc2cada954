//! The host-facing entry point that owns the catalog, the blueprints and the
//! machine registry.

use crate::blueprint::BlueprintRegistry;
use crate::config::{ConfigError, FurnaceConfig};
use crate::id::MachineId;
use crate::machine::Machine;
use crate::recipe::{Recipe, RecipeCatalog};
use crate::registry::{MachineHandle, MachineRegistry, RegistryError};
use crate::scheduler::{SchedulerError, TickScheduler};
use crate::store::{FileStore, MemoryStore, PersistenceStore, StoreError};
use crate::token::Token;
use std::path::Path;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::info;

#[derive(Debug, thiserror::Error)]
pub enum ContextError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Scheduler(#[from] SchedulerError),
}

/// Everything a host needs to run machines. Build one at startup and share
/// it as `Arc<FurnaceContext>`.
#[derive(Debug)]
pub struct FurnaceContext {
    config: FurnaceConfig,
    catalog: Arc<RwLock<RecipeCatalog>>,
    blueprints: Arc<BlueprintRegistry>,
    registry: Arc<MachineRegistry>,
}

impl FurnaceContext {
    /// Build the content from `config` and load every stored machine.
    /// Load failures other than a missing store are returned.
    pub fn new(config: FurnaceConfig, store: Box<dyn PersistenceStore>) -> Result<Self, ContextError> {
        let catalog = Arc::new(RwLock::new(config.build_catalog()?));
        let blueprints = Arc::new(config.build_blueprints()?);
        let registry = Arc::new(MachineRegistry::with_boxed_store(blueprints.clone(), store));
        let loaded = registry.load_all()?;
        info!(loaded, blueprints = blueprints.len(), "furnace context ready");
        Ok(Self {
            config,
            catalog,
            blueprints,
            registry,
        })
    }

    /// Like [`new`](Self::new), with a [`FileStore`] at `store_path`, or an
    /// in-memory store when none is configured.
    pub fn open(config: FurnaceConfig) -> Result<Self, ContextError> {
        let store: Box<dyn PersistenceStore> = match &config.store_path {
            Some(path) => Box::new(FileStore::new(path)),
            None => Box::new(MemoryStore::new()),
        };
        Self::new(config, store)
    }

    /// Read a config file and [`open`](Self::open) it.
    pub fn from_config_file(path: impl AsRef<Path>) -> Result<Self, ContextError> {
        Self::open(FurnaceConfig::from_path(path)?)
    }

    pub fn config(&self) -> &FurnaceConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<MachineRegistry> {
        &self.registry
    }

    pub fn blueprints(&self) -> &Arc<BlueprintRegistry> {
        &self.blueprints
    }

    pub fn catalog(&self) -> &Arc<RwLock<RecipeCatalog>> {
        &self.catalog
    }

    /// Register a recipe at runtime. Running schedulers see it on their
    /// next step.
    pub fn register_recipe(&self, recipe: Recipe) -> Option<Recipe> {
        self.catalog
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .register(recipe)
    }

    // -- Collaborator surface ------------------------------------------------

    pub fn create_machine(&self, name: &str, blueprint: &str) -> Result<MachineHandle, RegistryError> {
        self.registry.create(name, blueprint)
    }

    pub fn create_machine_with<F>(
        &self,
        name: &str,
        blueprint: &str,
        init: F,
    ) -> Result<MachineHandle, RegistryError>
    where
        F: FnOnce(&mut Machine),
    {
        self.registry.create_with(name, blueprint, init)
    }

    pub fn get_by_id(&self, id: MachineId) -> Option<MachineHandle> {
        self.registry.get(id)
    }

    pub fn bind_to_token(&self, token: &Token, machine: &Machine, glowing: bool) -> Token {
        self.registry.bind_to_token(token, machine, glowing)
    }

    pub fn resolve_from_token(&self, token: &Token) -> Option<MachineHandle> {
        self.registry.resolve_from_token(token)
    }

    pub fn save_all(&self) -> Result<usize, StoreError> {
        self.registry.save_all()
    }

    // -- Lifecycle -----------------------------------------------------------

    /// Start a scheduler on the current tokio runtime using the configured
    /// tick interval and autosave period.
    pub fn start_ticking(&self) -> Result<TickScheduler, SchedulerError> {
        TickScheduler::start(self.registry.clone(), self.catalog.clone(), self.config.scheduler())
    }

    /// A scheduler the host steps by hand.
    pub fn manual_ticker(&self) -> TickScheduler {
        TickScheduler::manual(self.registry.clone(), self.catalog.clone(), self.config.scheduler())
    }

    /// Stop `scheduler` if given, write every machine, and clear the
    /// registry. Safe to call more than once. If the final write fails the
    /// machines stay loaded and the error is returned.
    pub fn shutdown(&self, scheduler: Option<&TickScheduler>) -> Result<usize, StoreError> {
        if let Some(scheduler) = scheduler {
            scheduler.cancel();
        }
        let saved = self.registry.shutdown()?;
        info!(saved, "furnace context shut down");
        Ok(saved)
    }
}
