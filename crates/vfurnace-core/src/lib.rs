//! vfurnace core -- virtual machines that run without a physical presence.
//!
//! A host registers recipes and machine blueprints, creates machines, binds
//! them to portable item tokens, and lets a tick scheduler advance them on a
//! fixed period. Machine state is mirrored to a durable store so it survives
//! restarts.
//!
//! # Tick Step
//!
//! Each step of [`scheduler::TickScheduler`]:
//!
//! 1. **Snapshot** -- Copy the registry's machine handles, so creates and
//!    removes during the step never disturb it.
//! 2. **Advance** -- Lock each machine and call
//!    [`machine::Machine::advance`]. A panicking machine is logged and
//!    skipped.
//! 3. **Mark** -- Machines whose state changed are marked dirty.
//! 4. **Checkpoint** -- Every `autosave_every` steps, dirty machines are
//!    flushed to the store off the tick task.
//!
//! # Usage
//!
//! ```rust,ignore
//! let ctx = FurnaceContext::open(FurnaceConfig::from_path("vfurnace.toml")?)?;
//! let furnace = ctx.create_machine("Smelter", DEFAULT_BLUEPRINT)?;
//! let token = ctx.bind_to_token(&Token::new("stick", 1), &lock_machine(&furnace), true);
//! let ticker = ctx.start_ticking()?;
//! // ...
//! ctx.shutdown(Some(&ticker))?;
//! ```
//!
//! # Key Types
//!
//! - [`context::FurnaceContext`] -- Owns the catalog, blueprints and registry.
//! - [`registry::MachineRegistry`] -- Concurrent id -> machine map with
//!   write-through persistence.
//! - [`machine::Machine`] -- Input, resource and output slots plus progress.
//! - [`recipe::RecipeCatalog`] -- Input material -> recipe, plus fuel values.
//! - [`blueprint::BlueprintRegistry`] -- Named, immutable machine properties.
//! - [`token::TokenTag`] -- Typed key/value codec for item token tags.
//! - [`store::PersistenceStore`] -- Durable mirror (memory or file).
//! - [`fixed::Fixed64`] -- Q32.32 fixed-point type for deterministic progress.

pub mod blueprint;
pub mod config;
pub mod context;
pub mod dirty;
pub mod fixed;
pub mod id;
pub mod item;
pub mod machine;
pub mod recipe;
pub mod registry;
pub mod scheduler;
pub mod serialize;
pub mod store;
pub mod token;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use blueprint::{BlueprintError, BlueprintRegistry, DEFAULT_BLUEPRINT, MachineProperties};
pub use config::{ConfigError, FurnaceConfig};
pub use context::{ContextError, FurnaceContext};
pub use id::{MachineId, MaterialId};
pub use item::{ItemStack, Slot};
pub use machine::{AdvanceResult, Machine, MachineKind, MachineState, StallReason};
pub use recipe::{Fuel, Recipe, RecipeCatalog, RecipeError};
pub use registry::{MachineHandle, MachineRegistry, RegistryError, lock_machine};
pub use scheduler::{SchedulerConfig, SchedulerError, StepReport, TickScheduler};
pub use store::{FileStore, MemoryStore, PersistenceStore, StoreError};
pub use token::{MachineIdTag, Token, TokenTag};
