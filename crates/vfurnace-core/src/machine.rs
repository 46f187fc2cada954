use crate::blueprint::MachineProperties;
use crate::fixed::{Fixed64, ceil_to_u32};
use crate::id::{MachineId, MaterialId};
use crate::item::{ItemStack, Slot};
use crate::recipe::{Recipe, RecipeCatalog};
use std::sync::Arc;
use tracing::warn;

// ---------------------------------------------------------------------------
// Machine kinds
// ---------------------------------------------------------------------------

/// The kinds of machine the simulation knows. Dispatches via enum match (no
/// trait objects).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum MachineKind {
    /// Consumes resource units to turn input material into output material.
    #[default]
    Furnace,
}

// ---------------------------------------------------------------------------
// Machine state
// ---------------------------------------------------------------------------

/// Why the machine cannot make progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum StallReason {
    /// Resource reserve is below the recipe's cost for one step.
    NoFuel,
    /// The output slot has no room for another batch of the recipe's output.
    OutputFull,
    /// The blueprint does not allow the recipe's category.
    CategoryNotAllowed,
}

/// Runtime state, recomputed on every advance.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum MachineState {
    /// No input, or no recipe for the input.
    #[default]
    Idle,
    /// A recipe is running and progress advanced on the last step.
    Working,
    /// A recipe resolved but the machine cannot make progress.
    Stalled { reason: StallReason },
}

// ---------------------------------------------------------------------------
// Advance result
// ---------------------------------------------------------------------------

/// The outcome of a single advance.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AdvanceResult {
    /// Whether the machine changed state (Idle->Working, Working->Stalled, ...).
    pub state_changed: bool,
    /// Whether a recipe cycle finished this step.
    pub completed: bool,
    /// Whether progress moved this step.
    pub progressed: bool,
    /// Resource units burned this step.
    pub consumed_fuel: u32,
    /// Output units produced this step.
    pub produced: u32,
}

impl AdvanceResult {
    /// Whether anything worth persisting changed.
    pub fn is_dirty(&self) -> bool {
        self.state_changed || self.completed || self.progressed || self.consumed_fuel > 0
    }
}

// ---------------------------------------------------------------------------
// Machine
// ---------------------------------------------------------------------------

/// One running machine: an identifier, a shared blueprint, and its slots.
#[derive(Debug, Clone, PartialEq)]
pub struct Machine {
    id: MachineId,
    name: String,
    kind: MachineKind,
    properties: Arc<MachineProperties>,
    input: Slot,
    fuel: u32,
    progress: Fixed64,
    output: Slot,
    state: MachineState,
}

impl Machine {
    /// A new, empty furnace using `properties`.
    pub fn new(id: MachineId, name: impl Into<String>, properties: Arc<MachineProperties>) -> Self {
        Self {
            id,
            name: name.into(),
            kind: MachineKind::Furnace,
            input: Slot::new(properties.input_capacity),
            fuel: 0,
            progress: Fixed64::ZERO,
            output: Slot::new(properties.output_capacity),
            state: MachineState::Idle,
            properties,
        }
    }

    pub fn with_kind(mut self, kind: MachineKind) -> Self {
        self.kind = kind;
        self
    }

    /// Re-key a machine that is not yet visible to anyone else.
    pub(crate) fn reassign_id(&mut self, id: MachineId) {
        self.id = id;
    }

    /// Rebuild a machine from persisted fields. Contents beyond the
    /// blueprint's capacities are kept and logged; the machine stalls on a
    /// full output until the host drains it.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn restore(
        id: MachineId,
        name: String,
        kind: MachineKind,
        properties: Arc<MachineProperties>,
        input: Option<ItemStack>,
        fuel: u32,
        progress: Fixed64,
        output: Option<ItemStack>,
        state: MachineState,
    ) -> Self {
        let mut machine = Self::new(id, name, properties).with_kind(kind);
        machine.input.restore(input);
        machine.output.restore(output);
        machine.fuel = fuel;
        for (slot, held, capacity) in [
            ("input", machine.input.quantity(), machine.properties.input_capacity),
            ("fuel", machine.fuel, machine.properties.fuel_capacity),
            ("output", machine.output.quantity(), machine.properties.output_capacity),
        ] {
            if held > capacity {
                warn!(%id, slot, held, capacity, "stored contents exceed blueprint capacity");
            }
        }
        machine.progress = progress.max(Fixed64::ZERO);
        machine.state = state;
        machine
    }

    pub fn id(&self) -> MachineId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> MachineKind {
        self.kind
    }

    pub fn properties(&self) -> &Arc<MachineProperties> {
        &self.properties
    }

    pub fn input(&self) -> &Slot {
        &self.input
    }

    pub fn output(&self) -> &Slot {
        &self.output
    }

    /// Resource units in reserve.
    pub fn fuel(&self) -> u32 {
        self.fuel
    }

    /// Progress toward the active recipe's required time.
    pub fn progress(&self) -> Fixed64 {
        self.progress
    }

    pub fn state(&self) -> MachineState {
        self.state
    }

    /// The recipe this machine would run on its next advance, if any.
    pub fn active_recipe<'a>(&self, catalog: &'a RecipeCatalog) -> Option<&'a Recipe> {
        let stack = self.input.stack()?;
        let recipe = catalog.resolve(&stack.material)?;
        (stack.quantity >= recipe.input_quantity).then_some(recipe)
    }

    // -- Slot-set operations -------------------------------------------------

    /// Replace the input slot. Changing the material resets progress.
    /// Returns the quantity that didn't fit.
    #[must_use = "overflow count indicates items that did not fit"]
    pub fn set_input(&mut self, stack: Option<ItemStack>) -> u32 {
        let old = self.input.material().cloned();
        let overflow = self.input.set(stack);
        if self.input.material() != old.as_ref() {
            self.progress = Fixed64::ZERO;
        }
        overflow
    }

    /// Add input material. Returns the quantity that didn't fit.
    #[must_use = "overflow count indicates items that did not fit"]
    pub fn add_input(&mut self, material: &MaterialId, quantity: u32) -> u32 {
        self.input.add(material, quantity)
    }

    /// Set the resource reserve, clamped to the blueprint's fuel capacity.
    /// Returns the units that didn't fit.
    #[must_use = "overflow count indicates units that did not fit"]
    pub fn set_fuel(&mut self, units: u32) -> u32 {
        let cap = self.properties.fuel_capacity;
        self.fuel = units.min(cap);
        units - self.fuel
    }

    /// Add to the resource reserve. Returns the units that didn't fit.
    #[must_use = "overflow count indicates units that did not fit"]
    pub fn add_fuel(&mut self, units: u32) -> u32 {
        let space = self.properties.fuel_capacity.saturating_sub(self.fuel);
        let added = units.min(space);
        self.fuel += added;
        units - added
    }

    /// Burn fuel items into the reserve. Only whole items that fit are used.
    /// Returns how many items were consumed; zero if the material is not a
    /// known fuel.
    pub fn add_fuel_item(&mut self, stack: &ItemStack, catalog: &RecipeCatalog) -> u32 {
        let Some(value) = catalog.fuel_value(&stack.material) else {
            return 0;
        };
        if value == 0 {
            return 0;
        }
        let space = self.properties.fuel_capacity.saturating_sub(self.fuel);
        let items = stack.quantity.min(space / value);
        self.fuel += items * value;
        items
    }

    /// Replace the output slot. Returns the quantity that didn't fit.
    #[must_use = "overflow count indicates items that did not fit"]
    pub fn set_output(&mut self, stack: Option<ItemStack>) -> u32 {
        self.output.set(stack)
    }

    /// Drain the output slot.
    pub fn take_output(&mut self) -> Option<ItemStack> {
        self.output.take()
    }

    /// Set progress, clamped to `[0, time]` of the active recipe. With no
    /// active recipe progress is reset to zero.
    pub fn set_progress(&mut self, progress: Fixed64, catalog: &RecipeCatalog) {
        self.progress = match self.active_recipe(catalog) {
            Some(recipe) => progress.clamp(Fixed64::ZERO, Fixed64::saturating_from_num(recipe.time)),
            None => Fixed64::ZERO,
        };
    }

    // -- Advance ---------------------------------------------------------------

    /// Advance the machine by one step.
    ///
    /// Stalls are a steady state, not an error: a stalled machine consumes
    /// nothing and keeps its progress.
    pub fn advance(&mut self, catalog: &RecipeCatalog) -> AdvanceResult {
        let mut result = AdvanceResult::default();

        let Some(recipe) = self.active_recipe(catalog) else {
            self.transition(MachineState::Idle, &mut result);
            return result;
        };

        match self.kind {
            MachineKind::Furnace => self.advance_furnace(recipe, catalog, &mut result),
        }

        result
    }

    fn advance_furnace(&mut self, recipe: &Recipe, catalog: &RecipeCatalog, result: &mut AdvanceResult) {
        if !self.properties.allows(&recipe.category) {
            self.stall(StallReason::CategoryNotAllowed, result);
            return;
        }

        // A full batch must fit, so a completed cycle never drops output.
        if self.output.space_for(&recipe.output) < recipe.output_quantity {
            self.stall(StallReason::OutputFull, result);
            return;
        }

        let cost = self.cost_per_step(recipe);
        if self.fuel < cost {
            self.stall(StallReason::NoFuel, result);
            return;
        }

        self.fuel -= cost;
        result.consumed_fuel = cost;
        let before = self.progress;
        self.progress = self.progress.saturating_add(self.properties.speed);
        result.progressed = self.progress != before;

        if self.progress >= Fixed64::saturating_from_num(recipe.time) {
            let _ = self.input.remove(recipe.input_quantity);
            let overflow = self.output.add(&recipe.output, recipe.output_quantity);
            debug_assert_eq!(overflow, 0, "output room is checked before progressing");
            self.progress = Fixed64::ZERO;
            result.completed = true;
            result.produced = recipe.output_quantity - overflow;

            // Re-evaluate now so a stocked input runs continuously.
            let next = if self.active_recipe(catalog).is_some() {
                MachineState::Working
            } else {
                MachineState::Idle
            };
            self.transition(next, result);
        } else {
            self.transition(MachineState::Working, result);
        }
    }

    /// Resource units one step of `recipe` costs on this machine.
    pub fn cost_per_step(&self, recipe: &Recipe) -> u32 {
        ceil_to_u32(Fixed64::saturating_from_num(recipe.cost_per_step).saturating_mul(self.properties.fuel_rate))
    }

    fn stall(&mut self, reason: StallReason, result: &mut AdvanceResult) {
        self.transition(MachineState::Stalled { reason }, result);
    }

    fn transition(&mut self, next: MachineState, result: &mut AdvanceResult) {
        if self.state != next {
            self.state = next;
            result.state_changed = true;
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================
