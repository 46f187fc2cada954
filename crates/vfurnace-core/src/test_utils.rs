//! Shared test helpers for integration tests and benchmarks.
//!
//! Gated behind `#[cfg(any(test, feature = "test-utils"))]` so these helpers
//! are available in unit tests, integration tests, and benchmarks (via the
//! `test-utils` feature).

use crate::blueprint::{BlueprintRegistry, DEFAULT_BLUEPRINT, MachineProperties};
use crate::fixed::Fixed64;
use crate::id::MaterialId;
use crate::item::ItemStack;
use crate::machine::Machine;
use crate::recipe::{Fuel, Recipe, RecipeCatalog};
use crate::registry::{MachineHandle, MachineRegistry};
use crate::store::MemoryStore;
use std::sync::{Arc, RwLock};

// ===========================================================================
// Fixed-point helper
// ===========================================================================

pub fn fixed(v: f64) -> Fixed64 {
    Fixed64::from_num(v)
}

// ===========================================================================
// Materials
// ===========================================================================

pub fn ore() -> MaterialId {
    MaterialId::new("iron_ore")
}
pub fn ingot() -> MaterialId {
    MaterialId::new("iron_ingot")
}
pub fn sand() -> MaterialId {
    MaterialId::new("sand")
}
pub fn glass() -> MaterialId {
    MaterialId::new("glass")
}
pub fn coal() -> MaterialId {
    MaterialId::new("coal")
}

// ===========================================================================
// Recipes and catalogs
// ===========================================================================

/// `iron_ore -> iron_ingot` in 10 steps at 1 unit per step.
pub fn smelt_ore() -> Recipe {
    Recipe::new(ore(), ingot(), 10)
}

/// `sand -> glass` in 4 steps.
pub fn smelt_sand() -> Recipe {
    Recipe::new(sand(), glass(), 4)
}

/// Ore and sand recipes, with coal worth 8 units.
pub fn smelting_catalog() -> RecipeCatalog {
    let mut catalog = RecipeCatalog::new();
    catalog.register(smelt_ore());
    catalog.register(smelt_sand());
    catalog.register_fuel(Fuel::new(coal(), 8));
    catalog
}

pub fn shared_catalog() -> Arc<RwLock<RecipeCatalog>> {
    Arc::new(RwLock::new(smelting_catalog()))
}

// ===========================================================================
// Blueprints
// ===========================================================================

/// The built-in blueprint plus `fast` (speed 2) and `tiny` (capacity 2).
pub fn test_blueprints() -> BlueprintRegistry {
    let mut blueprints = BlueprintRegistry::new();
    for props in [
        MachineProperties::builder("fast").speed(fixed(2.0)).build(),
        MachineProperties::builder("tiny").capacity(2).build(),
    ] {
        blueprints
            .register(props.expect("test blueprint is valid"))
            .expect("test blueprint is valid");
    }
    blueprints
}

// ===========================================================================
// Machines and registries
// ===========================================================================

/// A standalone default furnace with `ore` input and `fuel` units.
pub fn loaded_furnace(ore_count: u32, fuel: u32) -> Machine {
    let mut machine = Machine::new(
        crate::id::MachineId::random(),
        "Test Furnace",
        Arc::new(MachineProperties::standard_furnace()),
    );
    let _ = machine.set_input(Some(ItemStack::new(ore(), ore_count)));
    let _ = machine.set_fuel(fuel);
    machine
}

/// A registry over [`test_blueprints`] and a fresh [`MemoryStore`]. The
/// store is returned too, so tests can inspect what was committed.
pub fn memory_registry() -> (Arc<MachineRegistry>, MemoryStore) {
    let store = MemoryStore::new();
    let registry = Arc::new(MachineRegistry::new(Arc::new(test_blueprints()), store.clone()));
    (registry, store)
}

/// Register a default furnace loaded with ore and fuel.
pub fn add_loaded_furnace(
    registry: &MachineRegistry,
    name: &str,
    ore_count: u32,
    fuel: u32,
) -> MachineHandle {
    registry
        .create_with(name, DEFAULT_BLUEPRINT, |m| {
            let _ = m.set_input(Some(ItemStack::new(ore(), ore_count)));
            let _ = m.set_fuel(fuel);
        })
        .expect("default blueprint is always registered")
}
