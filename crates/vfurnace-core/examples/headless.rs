//! Headless host: load a config, run a few furnaces on the tick scheduler,
//! then shut down and persist.
//!
//! Run with: `cargo run -p vfurnace-core --example headless`
//! Set `RUST_LOG=vfurnace_core=debug` for more detail.

use std::time::Duration;
use tracing_subscriber::EnvFilter;
use vfurnace_core::blueprint::DEFAULT_BLUEPRINT;
use vfurnace_core::context::FurnaceContext;
use vfurnace_core::item::ItemStack;
use vfurnace_core::registry::lock_machine;
use vfurnace_core::token::Token;
use vfurnace_core::FurnaceConfig;

const CONFIG: &str = r#"
tick_interval_ms = 20
autosave_every = 25

[[blueprints]]
name = "blast"
speed = 2.0
fuel_rate = 1.5
capacity = 32

[[recipes]]
input = "iron_ore"
output = "iron_ingot"
time = 10

[[recipes]]
input = "sand"
output = "glass"
time = 4

[[fuels]]
material = "coal"
value = 8
"#;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let store_dir = std::env::temp_dir().join("vfurnace-headless");
    let mut config = FurnaceConfig::from_toml_str(CONFIG)?;
    config.store_path = Some(store_dir.join("machines.json"));

    let ctx = FurnaceContext::open(config)?;
    println!("Loaded {} machine(s) from {}", ctx.registry().len(), store_dir.display());

    // --- Create two furnaces ---

    let smelter = {
        let catalog = ctx.catalog().read().map_err(|_| "recipe catalog poisoned")?;
        ctx.create_machine_with("Smelter", DEFAULT_BLUEPRINT, |m| {
            let _ = m.set_input(Some(ItemStack::new("iron_ore", 3)));
            let burned = m.add_fuel_item(&ItemStack::new("coal", 4), &catalog);
            println!("Smelter burned {burned} coal");
        })?
    };

    let (token, blast) = ctx.registry().create_token_with_machine(
        "Blast",
        "blast",
        &Token::new("furnace_item", 1),
        true,
        |m| {
            let _ = m.set_input(Some(ItemStack::new("sand", 8)));
            let _ = m.set_fuel(32);
        },
    )?;
    println!("Blast furnace bound to token: {:?}", token.tags());

    // --- Tick for a while ---

    let ticker = ctx.start_ticking()?;
    tokio::time::sleep(Duration::from_millis(800)).await;

    for (label, handle) in [("Smelter", &smelter), ("Blast", &blast)] {
        let m = lock_machine(handle);
        println!(
            "{label}: state={:?} fuel={} input={:?} output={:?}",
            m.state(),
            m.fuel(),
            m.input().stack(),
            m.output().stack()
        );
    }

    let resolved = ctx.resolve_from_token(&token).map(|h| lock_machine(&h).name().to_string());
    println!("Token resolves to: {resolved:?}");

    // --- Shut down ---

    let saved = ctx.shutdown(Some(&ticker))?;
    println!("Saved {saved} machine(s) after {} ticks", ticker.ticks());
    Ok(())
}
