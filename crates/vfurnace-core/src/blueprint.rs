//! Machine blueprints: immutable, named configuration shared by many machines.

use crate::fixed::Fixed64;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

/// Name of the built-in blueprint, equivalent to a standard furnace.
pub const DEFAULT_BLUEPRINT: &str = "default";

/// Default slot capacity for the built-in blueprint.
pub const DEFAULT_CAPACITY: u32 = 64;

/// Configuration for a class of machines. Never mutated after construction;
/// machines hold it as `Arc<MachineProperties>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MachineProperties {
    pub name: String,
    /// Progress added per step. 2.0 finishes recipes twice as fast.
    pub speed: Fixed64,
    /// Multiplier on a recipe's resource cost per step.
    pub fuel_rate: Fixed64,
    pub input_capacity: u32,
    pub fuel_capacity: u32,
    pub output_capacity: u32,
    /// Recipe categories this machine may run. Empty allows every category.
    pub categories: BTreeSet<String>,
}

impl MachineProperties {
    pub fn builder(name: impl Into<String>) -> MachinePropertiesBuilder {
        MachinePropertiesBuilder {
            props: MachineProperties {
                name: name.into(),
                ..MachineProperties::standard_furnace()
            },
        }
    }

    /// The built-in blueprint: speed 1, rate 1, capacity 64, any category.
    pub fn standard_furnace() -> Self {
        Self {
            name: DEFAULT_BLUEPRINT.to_string(),
            speed: Fixed64::ONE,
            fuel_rate: Fixed64::ONE,
            input_capacity: DEFAULT_CAPACITY,
            fuel_capacity: DEFAULT_CAPACITY,
            output_capacity: DEFAULT_CAPACITY,
            categories: BTreeSet::new(),
        }
    }

    /// Check the numeric fields: speed must be positive and the fuel rate
    /// must not be negative.
    pub fn validate(&self) -> Result<(), BlueprintError> {
        if self.speed <= Fixed64::ZERO {
            return Err(BlueprintError::InvalidSpeed {
                blueprint: self.name.clone(),
                speed: self.speed,
            });
        }
        if self.fuel_rate < Fixed64::ZERO {
            return Err(BlueprintError::InvalidFuelRate {
                blueprint: self.name.clone(),
                fuel_rate: self.fuel_rate,
            });
        }
        Ok(())
    }

    /// Whether a recipe of `category` may run on this blueprint.
    pub fn allows(&self, category: &str) -> bool {
        self.categories.is_empty() || self.categories.contains(category)
    }
}

impl Default for MachineProperties {
    fn default() -> Self {
        Self::standard_furnace()
    }
}

/// Fluent builder for [`MachineProperties`].
#[derive(Debug, Clone)]
pub struct MachinePropertiesBuilder {
    props: MachineProperties,
}

impl MachinePropertiesBuilder {
    pub fn speed(mut self, speed: Fixed64) -> Self {
        self.props.speed = speed;
        self
    }

    pub fn fuel_rate(mut self, rate: Fixed64) -> Self {
        self.props.fuel_rate = rate;
        self
    }

    /// Set the input, fuel and output capacities at once.
    pub fn capacity(mut self, capacity: u32) -> Self {
        self.props.input_capacity = capacity;
        self.props.fuel_capacity = capacity;
        self.props.output_capacity = capacity;
        self
    }

    pub fn input_capacity(mut self, capacity: u32) -> Self {
        self.props.input_capacity = capacity;
        self
    }

    pub fn fuel_capacity(mut self, capacity: u32) -> Self {
        self.props.fuel_capacity = capacity;
        self
    }

    pub fn output_capacity(mut self, capacity: u32) -> Self {
        self.props.output_capacity = capacity;
        self
    }

    pub fn category(mut self, category: impl Into<String>) -> Self {
        self.props.categories.insert(category.into());
        self
    }

    pub fn build(self) -> Result<MachineProperties, BlueprintError> {
        self.props.validate()?;
        Ok(self.props)
    }
}

/// Blueprints looked up by name at machine creation. Always holds
/// [`DEFAULT_BLUEPRINT`].
#[derive(Debug, Clone)]
pub struct BlueprintRegistry {
    blueprints: HashMap<String, Arc<MachineProperties>>,
}

impl Default for BlueprintRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl BlueprintRegistry {
    pub fn new() -> Self {
        let mut blueprints = HashMap::new();
        blueprints.insert(
            DEFAULT_BLUEPRINT.to_string(),
            Arc::new(MachineProperties::standard_furnace()),
        );
        Self { blueprints }
    }

    /// Insert a blueprint, replacing any blueprint with the same name.
    pub fn register(&mut self, props: MachineProperties) -> Result<Arc<MachineProperties>, BlueprintError> {
        props.validate()?;
        let props = Arc::new(props);
        self.blueprints.insert(props.name.clone(), props.clone());
        Ok(props)
    }

    /// Look up a blueprint. A missing name is an error, never a fallback.
    pub fn get(&self, name: &str) -> Result<Arc<MachineProperties>, BlueprintError> {
        self.blueprints
            .get(name)
            .cloned()
            .ok_or_else(|| BlueprintError::UnknownBlueprint(name.to_string()))
    }

    pub fn default_blueprint(&self) -> Arc<MachineProperties> {
        self.blueprints
            .get(DEFAULT_BLUEPRINT)
            .cloned()
            .unwrap_or_else(|| Arc::new(MachineProperties::standard_furnace()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.blueprints.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.blueprints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blueprints.is_empty()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BlueprintError {
    #[error("unknown blueprint: {0}")]
    UnknownBlueprint(String),

    #[error("blueprint {blueprint}: speed must be positive, got {speed}")]
    InvalidSpeed { blueprint: String, speed: Fixed64 },

    #[error("blueprint {blueprint}: fuel rate must not be negative, got {fuel_rate}")]
    InvalidFuelRate { blueprint: String, fuel_rate: Fixed64 },
}
