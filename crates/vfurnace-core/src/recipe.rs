//! Transformation rules and the catalog that resolves them.
//!
//! The catalog holds at most one [`Recipe`] per input material. Registering a
//! second recipe for the same input replaces the first: last write wins.

use crate::id::MaterialId;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, warn};

/// Largest `time` or `cost_per_step` a recipe may carry: the integer range
/// of the Q32.32 arithmetic machines run on.
pub const MAX_RECIPE_VALUE: u32 = i32::MAX as u32;

/// Category assigned to recipes that don't name one.
pub const DEFAULT_CATEGORY: &str = "smelting";

/// A rule turning `input_quantity` of `input` into `output_quantity` of
/// `output` after `time` steps at speed 1, burning `cost_per_step` resource
/// units on every step that makes progress.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recipe {
    pub input: MaterialId,
    pub input_quantity: u32,
    pub output: MaterialId,
    pub output_quantity: u32,
    pub time: u32,
    pub cost_per_step: u32,
    pub category: String,
}

impl Recipe {
    /// A 1-to-1 recipe costing one resource unit per step.
    pub fn new(input: impl Into<MaterialId>, output: impl Into<MaterialId>, time: u32) -> Self {
        Self {
            input: input.into(),
            input_quantity: 1,
            output: output.into(),
            output_quantity: 1,
            time,
            cost_per_step: 1,
            category: DEFAULT_CATEGORY.to_string(),
        }
    }

    pub fn with_quantities(mut self, input_quantity: u32, output_quantity: u32) -> Self {
        self.input_quantity = input_quantity.max(1);
        self.output_quantity = output_quantity;
        self
    }

    pub fn with_cost(mut self, cost_per_step: u32) -> Self {
        self.cost_per_step = cost_per_step;
        self
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = category.into();
        self
    }

    /// Check the quantities and limits a machine relies on. Config input is
    /// rejected with this; [`RecipeCatalog::register`] normalizes instead.
    pub fn validate(&self) -> Result<(), RecipeError> {
        if self.input_quantity == 0 {
            return Err(RecipeError::ZeroInput {
                input: self.input.clone(),
            });
        }
        for (field, value) in [("time", self.time), ("cost_per_step", self.cost_per_step)] {
            if value > MAX_RECIPE_VALUE {
                return Err(RecipeError::OutOfRange {
                    input: self.input.clone(),
                    field,
                    value,
                });
            }
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RecipeError {
    #[error("recipe for {input}: input quantity must be at least 1")]
    ZeroInput { input: MaterialId },

    #[error("recipe for {input}: {field} {value} exceeds 2147483647")]
    OutOfRange {
        input: MaterialId,
        field: &'static str,
        value: u32,
    },
}

/// A material that can be burned into resource units.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fuel {
    pub material: MaterialId,
    /// Resource units gained per item burned.
    pub value: u32,
}

impl Fuel {
    pub fn new(material: impl Into<MaterialId>, value: u32) -> Self {
        Self {
            material: material.into(),
            value,
        }
    }
}

/// Known recipes keyed by input material, plus known fuels.
#[derive(Debug, Clone, Default)]
pub struct RecipeCatalog {
    recipes: HashMap<MaterialId, Recipe>,
    fuels: HashMap<MaterialId, u32>,
}

impl RecipeCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a recipe, replacing any recipe with the same input material.
    /// Returns the replaced recipe. Never fails: a zero input quantity is
    /// raised to 1 and `time`/`cost_per_step` are capped at
    /// [`MAX_RECIPE_VALUE`], with a warning.
    pub fn register(&mut self, mut recipe: Recipe) -> Option<Recipe> {
        if let Err(e) = recipe.validate() {
            warn!(error = %e, "normalizing recipe");
            recipe.input_quantity = recipe.input_quantity.max(1);
            recipe.time = recipe.time.min(MAX_RECIPE_VALUE);
            recipe.cost_per_step = recipe.cost_per_step.min(MAX_RECIPE_VALUE);
        }
        let replaced = self.recipes.insert(recipe.input.clone(), recipe);
        if let Some(old) = &replaced {
            debug!(input = %old.input, old_output = %old.output, "recipe replaced");
        }
        replaced
    }

    /// The recipe for an input material. `None` means no transformation is
    /// available for it.
    pub fn resolve(&self, input: &MaterialId) -> Option<&Recipe> {
        self.recipes.get(input)
    }

    /// Insert a fuel, replacing any fuel entry for the same material.
    pub fn register_fuel(&mut self, fuel: Fuel) -> Option<u32> {
        self.fuels.insert(fuel.material, fuel.value)
    }

    /// Resource units one item of `material` burns for.
    pub fn fuel_value(&self, material: &MaterialId) -> Option<u32> {
        self.fuels.get(material).copied()
    }

    pub fn len(&self) -> usize {
        self.recipes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.recipes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Recipe> {
        self.recipes.values()
    }
}
