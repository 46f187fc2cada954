//! End-to-end scenarios across the registry, machines, tokens and stores.

use std::sync::Arc;
use vfurnace_core::blueprint::{BlueprintError, BlueprintRegistry, DEFAULT_BLUEPRINT};
use vfurnace_core::context::FurnaceContext;
use vfurnace_core::id::{MachineId, MaterialId};
use vfurnace_core::item::ItemStack;
use vfurnace_core::machine::{MachineState, StallReason};
use vfurnace_core::recipe::{Recipe, RecipeCatalog};
use vfurnace_core::registry::{MachineRegistry, RegistryError, lock_machine};
use vfurnace_core::scheduler::advance_all;
use vfurnace_core::store::{FileStore, MemoryStore, PersistenceStore};
use vfurnace_core::test_utils::*;
use vfurnace_core::token::{MachineIdTag, Token, TokenTag};
use vfurnace_core::FurnaceConfig;

// ===========================================================================
// Machine scenarios
// ===========================================================================

#[test]
fn ore_to_ingot_in_ten_steps() {
    let mut catalog = RecipeCatalog::new();
    catalog.register(Recipe::new("ore", "ingot", 10).with_cost(1));

    let (registry, _store) = memory_registry();
    let handle = registry.create("Smelter", DEFAULT_BLUEPRINT).unwrap();
    {
        let mut m = lock_machine(&handle);
        assert_eq!(m.properties().input_capacity, 64);
        let _ = m.set_input(Some(ItemStack::new("ore", 1)));
        let _ = m.set_fuel(20);
    }

    for _ in 0..10 {
        lock_machine(&handle).advance(&catalog);
    }

    let m = lock_machine(&handle);
    assert_eq!(m.output().stack(), Some(&ItemStack::new("ingot", 1)));
    assert!(m.input().is_empty());
    assert_eq!(m.fuel(), 10);
    assert_eq!(m.state(), MachineState::Idle);
}

#[test]
fn full_output_stalls_without_burning_fuel() {
    let catalog = smelting_catalog();
    let (registry, _store) = memory_registry();
    let handle = registry
        .create_with("Tiny", "tiny", |m| {
            let _ = m.set_input(Some(ItemStack::new(ore(), 2)));
            let _ = m.set_fuel(2);
            let _ = m.set_output(Some(ItemStack::new(ingot(), 2)));
        })
        .unwrap();

    let mut m = lock_machine(&handle);
    let result = m.advance(&catalog);
    assert_eq!(result.consumed_fuel, 0);
    assert_eq!(m.fuel(), 2);
    assert_eq!(
        m.state(),
        MachineState::Stalled {
            reason: StallReason::OutputFull
        }
    );

    // Draining the output lets it resume.
    assert_eq!(m.take_output(), Some(ItemStack::new(ingot(), 2)));
    m.advance(&catalog);
    assert_eq!(m.state(), MachineState::Working);
    assert_eq!(m.fuel(), 1);
}

#[test]
fn fast_blueprint_finishes_in_half_the_steps() {
    let catalog = smelting_catalog();
    let (registry, _store) = memory_registry();
    let handle = registry
        .create_with("Fast", "fast", |m| {
            let _ = m.set_input(Some(ItemStack::new(ore(), 1)));
            let _ = m.set_fuel(20);
        })
        .unwrap();
    for _ in 0..5 {
        lock_machine(&handle).advance(&catalog);
    }
    assert_eq!(lock_machine(&handle).output().quantity(), 1);
}

#[test]
fn coal_tops_up_the_reserve() {
    let catalog = smelting_catalog();
    let mut furnace = loaded_furnace(1, 0);
    assert_eq!(furnace.add_fuel_item(&ItemStack::new(coal(), 3), &catalog), 3);
    assert_eq!(furnace.fuel(), 24);
    assert_eq!(
        furnace.add_fuel_item(&ItemStack::new(MaterialId::new("dirt"), 3), &catalog),
        0
    );
}

// ===========================================================================
// Registry scenarios
// ===========================================================================

#[test]
fn empty_store_starts_with_zero_machines() {
    let registry = MachineRegistry::new(Arc::new(BlueprintRegistry::new()), MemoryStore::new());
    assert_eq!(registry.load_all().unwrap(), 0);
    assert!(registry.list_all().is_empty());

    let dir = tempfile::tempdir().unwrap();
    let file_backed = MachineRegistry::new(
        Arc::new(BlueprintRegistry::new()),
        FileStore::new(dir.path().join("never-written.bin")),
    );
    assert_eq!(file_backed.load_all().unwrap(), 0);
}

#[test]
fn unknown_blueprint_is_an_error() {
    let (registry, store) = memory_registry();
    let err = registry.create("x", "mythical").unwrap_err();
    assert!(matches!(
        err,
        RegistryError::Blueprint(BlueprintError::UnknownBlueprint(_))
    ));
    assert!(registry.is_empty());
    assert_eq!(store.committed_len(), 0);
}

#[test]
fn token_binding_round_trip() {
    let (registry, _store) = memory_registry();
    let handle = registry.create("Bound", DEFAULT_BLUEPRINT).unwrap();
    let id = lock_machine(&handle).id();

    let stick = Token::new("stick", 1).with_tag("owner", "sam");
    let bound = registry.bind_to_token(&stick, &lock_machine(&handle), true);
    assert_eq!(bound.tag("owner"), Some("sam"));
    assert!(bound.glowing);

    let resolved = registry.resolve_from_token(&bound).unwrap();
    assert_eq!(lock_machine(&resolved).id(), id);

    registry.remove(id, true);
    assert!(registry.resolve_from_token(&bound).is_none());
}

#[test]
fn one_machine_may_be_bound_to_many_tokens() {
    let (registry, _store) = memory_registry();
    let handle = registry.create("Shared", DEFAULT_BLUEPRINT).unwrap();
    let machine = lock_machine(&handle).clone();
    let a = registry.bind_to_token(&Token::new("stick", 1), &machine, false);
    let b = registry.bind_to_token(&Token::new("rod", 1), &machine, false);
    assert_eq!(MachineIdTag::read(&a), MachineIdTag::read(&b));
}

// ===========================================================================
// Persistence scenarios
// ===========================================================================

fn busy_registry(registry: &MachineRegistry) -> MachineId {
    let catalog = smelting_catalog();
    let handle = add_loaded_furnace(registry, "Busy", 5, 30);
    for _ in 0..13 {
        advance_all(registry, &catalog);
    }
    lock_machine(&handle).id()
}

#[test]
fn memory_store_round_trip() {
    let (first, store) = memory_registry();
    let id = busy_registry(&first);
    first.save_all().unwrap();

    let second = MachineRegistry::new(Arc::new(test_blueprints()), store);
    assert_eq!(second.load_all().unwrap(), 1);
    let before = first.get(id).unwrap();
    let after = second.get(id).unwrap();
    assert_eq!(*lock_machine(&after), *lock_machine(&before));
}

#[test]
fn file_store_round_trip_in_every_format() {
    let dir = tempfile::tempdir().unwrap();
    for name in ["machines.bin", "machines.json", "machines.ron"] {
        let path = dir.path().join(name);
        let first = MachineRegistry::new(Arc::new(test_blueprints()), FileStore::new(&path));
        let id = busy_registry(&first);
        first.save_all().unwrap();

        let second = MachineRegistry::new(Arc::new(test_blueprints()), FileStore::new(&path));
        assert_eq!(second.load_all().unwrap(), 1, "{name}");
        let before = lock_machine(&first.get(id).unwrap()).clone();
        let after = lock_machine(&second.get(id).unwrap()).clone();
        assert_eq!(after, before, "{name}");
    }
}

#[test]
fn removed_machines_stay_removed_after_reload() {
    let (first, store) = memory_registry();
    let keep = lock_machine(&first.create("keep", DEFAULT_BLUEPRINT).unwrap()).id();
    let gone = lock_machine(&first.create("gone", DEFAULT_BLUEPRINT).unwrap()).id();
    first.remove(gone, true);

    let second = MachineRegistry::new(Arc::new(test_blueprints()), store);
    second.load_all().unwrap();
    assert!(second.contains(keep));
    assert!(!second.contains(gone));
}

#[test]
fn persist_failure_keeps_machine_in_memory() {
    let dir = tempfile::tempdir().unwrap();
    let blocker = dir.path().join("blocker");
    std::fs::write(&blocker, b"a file, not a directory").unwrap();
    let registry = MachineRegistry::new(
        Arc::new(BlueprintRegistry::new()),
        FileStore::new(blocker.join("machines.json")),
    );

    let handle = registry.create("Orphan", DEFAULT_BLUEPRINT).unwrap();
    let id = lock_machine(&handle).id();
    assert!(registry.get(id).is_some());
    assert!(registry.save_all().is_err());
    assert!(registry.get(id).is_some());
}

#[test]
fn failed_shutdown_keeps_machines_loaded() {
    let dir = tempfile::tempdir().unwrap();
    let blocker = dir.path().join("blocker");
    std::fs::write(&blocker, b"a file, not a directory").unwrap();
    let registry = MachineRegistry::new(
        Arc::new(BlueprintRegistry::new()),
        FileStore::new(blocker.join("machines.json")),
    );
    let id = lock_machine(&registry.create("Stranded", DEFAULT_BLUEPRINT).unwrap()).id();

    assert!(registry.shutdown().is_err());
    assert!(registry.contains(id));

    // Once the store is writable again, a retry saves and clears.
    std::fs::remove_file(&blocker).unwrap();
    assert_eq!(registry.shutdown().unwrap(), 1);
    assert!(registry.is_empty());
}

#[test]
fn reload_under_smaller_blueprint_keeps_contents() {
    let (first, store) = memory_registry();
    let handle = first
        .create_with("Hoarder", DEFAULT_BLUEPRINT, |m| {
            let _ = m.set_input(Some(ItemStack::new(ore(), 5)));
            let _ = m.set_fuel(10);
            let _ = m.set_output(Some(ItemStack::new(ingot(), 64)));
        })
        .unwrap();
    let id = lock_machine(&handle).id();

    let mut smaller = BlueprintRegistry::new();
    smaller
        .register(
            vfurnace_core::blueprint::MachineProperties::builder(DEFAULT_BLUEPRINT)
                .capacity(16)
                .build()
                .unwrap(),
        )
        .unwrap();
    let second = MachineRegistry::new(Arc::new(smaller), store);
    assert_eq!(second.load_all().unwrap(), 1);

    let reloaded = second.get(id).unwrap();
    let mut m = lock_machine(&reloaded);
    assert_eq!(m.output().quantity(), 64);
    m.advance(&smelting_catalog());
    assert_eq!(
        m.state(),
        MachineState::Stalled {
            reason: StallReason::OutputFull
        }
    );
    assert_eq!(m.fuel(), 10);
}

#[test]
fn shutdown_is_idempotent() {
    let (registry, store) = memory_registry();
    add_loaded_furnace(&registry, "a", 1, 1);
    add_loaded_furnace(&registry, "b", 1, 1);
    assert_eq!(registry.shutdown().unwrap(), 2);
    assert_eq!(registry.shutdown().unwrap(), 0);
    assert!(registry.is_empty());
    assert_eq!(store.committed_len(), 2);
}

#[test]
fn stored_records_match_the_machines() {
    let mut store = MemoryStore::new();
    let registry = MachineRegistry::new(Arc::new(test_blueprints()), store.clone());
    let id = busy_registry(&registry);
    registry.save_all().unwrap();

    let records = store.load_all().unwrap();
    let record = &records[&id.to_string()];
    assert_eq!(record.name, "Busy");
    assert_eq!(record.blueprint, DEFAULT_BLUEPRINT);
    assert_eq!(record.output, Some(ItemStack::new(ingot(), 1)));
}

// ===========================================================================
// Context
// ===========================================================================

#[test]
fn context_from_config_file() {
    let dir = tempfile::tempdir().unwrap();
    let config_path = dir.path().join("vfurnace.toml");
    let store_path = dir.path().join("store").join("machines.json");
    std::fs::write(
        &config_path,
        format!(
            r#"
tick_interval_ms = 10
store_path = "{}"

[[recipes]]
input = "ore"
output = "ingot"
time = 3
"#,
            store_path.display().to_string().replace('\\', "/")
        ),
    )
    .unwrap();

    let ctx = FurnaceContext::from_config_file(&config_path).unwrap();
    let handle = ctx.create_machine("Configured", DEFAULT_BLUEPRINT).unwrap();
    let (token, _) = ctx
        .registry()
        .create_token_with_machine("Carried", DEFAULT_BLUEPRINT, &Token::new("stick", 1), true, |_| {})
        .unwrap();
    assert!(ctx.resolve_from_token(&token).is_some());
    assert!(store_path.exists());
    assert_eq!(ctx.config(), &FurnaceConfig::from_path(&config_path).unwrap());

    let id = lock_machine(&handle).id();
    assert!(ctx.get_by_id(id).is_some());
    assert_eq!(ctx.shutdown(None).unwrap(), 2);
}
