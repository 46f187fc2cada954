//! Host configuration: tick timing, the store location, and the content
//! (blueprints, recipes, fuels) to register at startup.
//!
//! A config file is TOML, JSON or RON, detected from its extension. Every
//! field has a default, so an empty file is a valid configuration.

use crate::blueprint::{BlueprintError, BlueprintRegistry, DEFAULT_CAPACITY, MachineProperties};
use crate::fixed::{Fixed64, f64_to_fixed64};
use crate::recipe::{DEFAULT_CATEGORY, Fuel, Recipe, RecipeCatalog, RecipeError};
use crate::scheduler::{DEFAULT_AUTOSAVE_EVERY, SchedulerConfig};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

// ===========================================================================
// Errors
// ===========================================================================

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {file}: {source}")]
    Io {
        file: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The file has an extension we don't support.
    #[error("unsupported config format: {file}")]
    UnsupportedFormat { file: PathBuf },

    #[error("parse error in {file}: {detail}")]
    Parse { file: PathBuf, detail: String },

    /// A number that has no fixed-point value: NaN, infinite, or out of range.
    #[error("blueprint {blueprint}: {field} = {value} is out of range")]
    OutOfRange {
        blueprint: String,
        field: &'static str,
        value: f64,
    },

    #[error(transparent)]
    Blueprint(#[from] BlueprintError),

    #[error(transparent)]
    Recipe(#[from] RecipeError),
}

// ===========================================================================
// Format detection
// ===========================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Toml,
    Json,
    Ron,
}

impl ConfigFormat {
    pub fn detect(path: &Path) -> Result<Self, ConfigError> {
        match path.extension().and_then(|e| e.to_str()) {
            Some("toml") => Ok(ConfigFormat::Toml),
            Some("json") => Ok(ConfigFormat::Json),
            Some("ron") => Ok(ConfigFormat::Ron),
            _ => Err(ConfigError::UnsupportedFormat {
                file: path.to_path_buf(),
            }),
        }
    }
}

// ===========================================================================
// Data structs
// ===========================================================================

fn default_tick_interval_ms() -> u64 {
    50
}

fn default_autosave_every() -> u64 {
    DEFAULT_AUTOSAVE_EVERY
}

fn default_one() -> f64 {
    1.0
}

fn default_capacity() -> u32 {
    DEFAULT_CAPACITY
}

fn default_quantity() -> u32 {
    1
}

fn default_category() -> String {
    DEFAULT_CATEGORY.to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FurnaceConfig {
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
    /// Steps between autosave checkpoints. `0` disables autosave.
    #[serde(default = "default_autosave_every")]
    pub autosave_every: u64,
    /// Where machines are persisted. Without one, machines live in memory
    /// only.
    #[serde(default)]
    pub store_path: Option<PathBuf>,
    #[serde(default)]
    pub blueprints: Vec<BlueprintData>,
    #[serde(default)]
    pub recipes: Vec<RecipeData>,
    #[serde(default)]
    pub fuels: Vec<FuelData>,
}

/// A blueprint definition. Omitted capacities fall back to `capacity`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlueprintData {
    pub name: String,
    #[serde(default = "default_one")]
    pub speed: f64,
    #[serde(default = "default_one")]
    pub fuel_rate: f64,
    #[serde(default = "default_capacity")]
    pub capacity: u32,
    #[serde(default)]
    pub input_capacity: Option<u32>,
    #[serde(default)]
    pub fuel_capacity: Option<u32>,
    #[serde(default)]
    pub output_capacity: Option<u32>,
    #[serde(default)]
    pub categories: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecipeData {
    pub input: String,
    #[serde(default = "default_quantity")]
    pub input_quantity: u32,
    pub output: String,
    #[serde(default = "default_quantity")]
    pub output_quantity: u32,
    pub time: u32,
    #[serde(default = "default_quantity")]
    pub cost_per_step: u32,
    #[serde(default = "default_category")]
    pub category: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FuelData {
    pub material: String,
    pub value: u32,
}

impl Default for FurnaceConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: default_tick_interval_ms(),
            autosave_every: default_autosave_every(),
            store_path: None,
            blueprints: Vec::new(),
            recipes: Vec::new(),
            fuels: Vec::new(),
        }
    }
}

// ===========================================================================
// Loading
// ===========================================================================

impl FurnaceConfig {
    /// Read a config file, with the format detected from its extension.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let format = ConfigFormat::detect(path)?;
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            file: path.to_path_buf(),
            source,
        })?;
        let config = Self::parse(&content, format, path)?;
        debug!(
            file = %path.display(),
            blueprints = config.blueprints.len(),
            recipes = config.recipes.len(),
            fuels = config.fuels.len(),
            "config loaded"
        );
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Self::parse(content, ConfigFormat::Toml, Path::new("<inline>"))
    }

    fn parse(content: &str, format: ConfigFormat, file: &Path) -> Result<Self, ConfigError> {
        let parse_error = |detail: String| ConfigError::Parse {
            file: file.to_path_buf(),
            detail,
        };
        match format {
            ConfigFormat::Toml => toml::from_str(content).map_err(|e| parse_error(e.to_string())),
            ConfigFormat::Json => {
                serde_json::from_str(content).map_err(|e| parse_error(e.to_string()))
            }
            ConfigFormat::Ron => ron::from_str(content).map_err(|e| parse_error(e.to_string())),
        }
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn scheduler(&self) -> SchedulerConfig {
        SchedulerConfig {
            tick_interval: self.tick_interval(),
            autosave_every: self.autosave_every,
        }
    }

    /// The built-in blueprint plus every configured one. A configured
    /// blueprint named `default` replaces the built-in. The first invalid
    /// blueprint fails the whole build.
    pub fn build_blueprints(&self) -> Result<BlueprintRegistry, ConfigError> {
        let mut registry = BlueprintRegistry::new();
        for data in &self.blueprints {
            registry.register(data.to_properties()?)?;
        }
        Ok(registry)
    }

    pub fn build_catalog(&self) -> Result<RecipeCatalog, ConfigError> {
        let mut catalog = RecipeCatalog::new();
        for data in &self.recipes {
            let recipe = data.to_recipe();
            recipe.validate()?;
            catalog.register(recipe);
        }
        for fuel in &self.fuels {
            catalog.register_fuel(Fuel::new(fuel.material.as_str(), fuel.value));
        }
        Ok(catalog)
    }
}

impl BlueprintData {
    pub fn to_properties(&self) -> Result<MachineProperties, ConfigError> {
        let mut builder = MachineProperties::builder(&self.name)
            .speed(self.fixed("speed", self.speed)?)
            .fuel_rate(self.fixed("fuel_rate", self.fuel_rate)?)
            .input_capacity(self.input_capacity.unwrap_or(self.capacity))
            .fuel_capacity(self.fuel_capacity.unwrap_or(self.capacity))
            .output_capacity(self.output_capacity.unwrap_or(self.capacity));
        for category in &self.categories {
            builder = builder.category(category);
        }
        Ok(builder.build()?)
    }

    fn fixed(&self, field: &'static str, value: f64) -> Result<Fixed64, ConfigError> {
        f64_to_fixed64(value).ok_or_else(|| ConfigError::OutOfRange {
            blueprint: self.name.clone(),
            field,
            value,
        })
    }
}

impl RecipeData {
    pub fn to_recipe(&self) -> Recipe {
        Recipe::new(self.input.as_str(), self.output.as_str(), self.time)
            .with_quantities(self.input_quantity, self.output_quantity)
            .with_cost(self.cost_per_step)
            .with_category(&self.category)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixed::Fixed64;
    use crate::id::MaterialId;

    const SAMPLE: &str = r#"
tick_interval_ms = 25
autosave_every = 100
store_path = "data/machines.json"

[[blueprints]]
name = "blast"
speed = 2.0
fuel_rate = 1.5
capacity = 32
output_capacity = 16
categories = ["smelting", "alloying"]

[[recipes]]
input = "iron_ore"
output = "iron_ingot"
time = 10

[[recipes]]
input = "copper_ore"
output = "copper_ingot"
input_quantity = 2
output_quantity = 3
time = 8
cost_per_step = 2
category = "alloying"

[[fuels]]
material = "coal"
value = 8
"#;

    #[test]
    fn empty_toml_is_all_defaults() {
        let config = FurnaceConfig::from_toml_str("").unwrap();
        assert_eq!(config, FurnaceConfig::default());
        assert_eq!(config.tick_interval(), Duration::from_millis(50));
        assert_eq!(config.autosave_every, 1200);
    }

    #[test]
    fn loads_blueprints_recipes_and_fuels() {
        let config = FurnaceConfig::from_toml_str(SAMPLE).unwrap();
        assert_eq!(config.tick_interval(), Duration::from_millis(25));
        assert_eq!(config.store_path, Some(PathBuf::from("data/machines.json")));

        let blueprints = config.build_blueprints().unwrap();
        assert!(blueprints.contains("default"));
        let blast = blueprints.get("blast").unwrap();
        assert_eq!(blast.speed, Fixed64::from_num(2));
        assert_eq!(blast.fuel_rate, Fixed64::from_num(1.5));
        assert_eq!(blast.input_capacity, 32);
        assert_eq!(blast.output_capacity, 16);
        assert!(blast.allows("alloying"));
        assert!(!blast.allows("cooking"));

        let catalog = config.build_catalog().unwrap();
        let iron = catalog.resolve(&MaterialId::new("iron_ore")).unwrap();
        assert_eq!(iron.time, 10);
        assert_eq!(iron.cost_per_step, 1);
        assert_eq!(iron.category, DEFAULT_CATEGORY);
        let copper = catalog.resolve(&MaterialId::new("copper_ore")).unwrap();
        assert_eq!((copper.input_quantity, copper.output_quantity), (2, 3));
        assert_eq!(catalog.fuel_value(&MaterialId::new("coal")), Some(8));
    }

    #[test]
    fn json_file_by_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vfurnace.json");
        std::fs::write(
            &path,
            r#"{ "autosave_every": 0, "recipes": [{ "input": "sand", "output": "glass", "time": 4 }] }"#,
        )
        .unwrap();
        let config = FurnaceConfig::from_path(&path).unwrap();
        assert_eq!(config.autosave_every, 0);
        assert_eq!(config.build_catalog().unwrap().len(), 1);
    }

    #[test]
    fn unknown_extension_is_rejected() {
        let err = FurnaceConfig::from_path("vfurnace.yaml").unwrap_err();
        assert!(matches!(err, ConfigError::UnsupportedFormat { .. }));
    }

    #[test]
    fn missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = FurnaceConfig::from_path(dir.path().join("absent.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }

    #[test]
    fn malformed_toml_is_parse_error() {
        let err = FurnaceConfig::from_toml_str("tick_interval_ms = \"soon\"").unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn backwards_or_stuck_speed_is_rejected() {
        for speed in ["-1.0", "0.0"] {
            let config = FurnaceConfig::from_toml_str(&format!(
                "[[blueprints]]\nname = \"bad\"\nspeed = {speed}\n"
            ))
            .unwrap();
            let err = config.build_blueprints().unwrap_err();
            assert!(
                matches!(err, ConfigError::Blueprint(BlueprintError::InvalidSpeed { .. })),
                "speed {speed}: {err}"
            );
        }
    }

    #[test]
    fn negative_fuel_rate_is_rejected() {
        let config =
            FurnaceConfig::from_toml_str("[[blueprints]]\nname = \"bad\"\nfuel_rate = -2.0\n")
                .unwrap();
        assert!(matches!(
            config.build_blueprints(),
            Err(ConfigError::Blueprint(BlueprintError::InvalidFuelRate { .. }))
        ));
    }

    #[test]
    fn non_finite_or_huge_numbers_are_errors() {
        for value in ["nan", "inf", "1e12"] {
            let config = FurnaceConfig::from_toml_str(&format!(
                "[[blueprints]]\nname = \"bad\"\nspeed = {value}\n"
            ))
            .unwrap();
            let err = config.build_blueprints().unwrap_err();
            assert!(
                matches!(err, ConfigError::OutOfRange { field: "speed", .. }),
                "speed {value}: {err}"
            );
        }
    }

    #[test]
    fn oversized_recipe_time_is_rejected() {
        let config = FurnaceConfig::from_toml_str(
            "[[recipes]]\ninput = \"ore\"\noutput = \"ingot\"\ntime = 3000000000\n",
        )
        .unwrap();
        assert!(matches!(
            config.build_catalog(),
            Err(ConfigError::Recipe(RecipeError::OutOfRange { field: "time", .. }))
        ));
    }
}
