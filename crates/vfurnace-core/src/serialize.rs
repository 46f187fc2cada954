//! Machine records and the store document codec.
//!
//! A [`MachineRecord`] is the persisted form of one machine. A
//! [`StoreDocument`] is the whole durable mirror: a versioned header plus a
//! map from the string form of each machine id to its record. Documents are
//! encoded with `bitcode` (compact binary) or as JSON / RON for stores a
//! human might want to read.

use crate::blueprint::{BlueprintError, BlueprintRegistry};
use crate::fixed::{fixed64_from_bits, fixed64_to_bits};
use crate::id::MachineId;
use crate::item::ItemStack;
use crate::machine::{Machine, MachineKind, MachineState};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Magic number identifying a vfurnace store document.
pub const STORE_MAGIC: u32 = 0xF0C5_0001;

/// Current format version. Increment when breaking the record layout.
pub const FORMAT_VERSION: u32 = 1;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("encoding failed: {0}")]
    Encode(String),
    #[error("decoding failed: {0}")]
    Decode(String),
    #[error("invalid magic number: expected 0x{:08X}, got 0x{:08X}", STORE_MAGIC, .0)]
    InvalidMagic(u32),
    #[error("unsupported format version: expected {}, got {}", FORMAT_VERSION, .0)]
    UnsupportedVersion(u32),
    #[error("store from future version {0} (this build supports up to {FORMAT_VERSION})")]
    FutureVersion(u32),
}

// ---------------------------------------------------------------------------
// Machine record
// ---------------------------------------------------------------------------

/// Persisted form of a machine. Progress is kept as raw fixed-point bits so
/// that a round trip is exact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MachineRecord {
    pub name: String,
    pub kind: MachineKind,
    pub blueprint: String,
    pub input: Option<ItemStack>,
    pub fuel: u32,
    pub output: Option<ItemStack>,
    pub progress_bits: i64,
    pub state: MachineState,
}

impl Machine {
    pub fn to_record(&self) -> MachineRecord {
        MachineRecord {
            name: self.name().to_string(),
            kind: self.kind(),
            blueprint: self.properties().name.clone(),
            input: self.input().stack().cloned(),
            fuel: self.fuel(),
            output: self.output().stack().cloned(),
            progress_bits: fixed64_to_bits(self.progress()),
            state: self.state(),
        }
    }

    /// Rebuild a machine from its record. The blueprint must be registered.
    pub fn from_record(
        id: MachineId,
        record: MachineRecord,
        blueprints: &BlueprintRegistry,
    ) -> Result<Self, BlueprintError> {
        let properties = blueprints.get(&record.blueprint)?;
        Ok(Machine::restore(
            id,
            record.name,
            record.kind,
            properties,
            record.input,
            record.fuel,
            fixed64_from_bits(record.progress_bits),
            record.output,
            record.state,
        ))
    }
}

// ---------------------------------------------------------------------------
// Store document
// ---------------------------------------------------------------------------

/// Header carried by every store document. Enables format detection and
/// version checking before the records are trusted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreHeader {
    pub magic: u32,
    pub version: u32,
}

impl StoreHeader {
    pub fn new() -> Self {
        Self {
            magic: STORE_MAGIC,
            version: FORMAT_VERSION,
        }
    }

    pub fn validate(&self) -> Result<(), CodecError> {
        if self.magic != STORE_MAGIC {
            return Err(CodecError::InvalidMagic(self.magic));
        }
        if self.version > FORMAT_VERSION {
            return Err(CodecError::FutureVersion(self.version));
        }
        if self.version < FORMAT_VERSION {
            return Err(CodecError::UnsupportedVersion(self.version));
        }
        Ok(())
    }
}

impl Default for StoreHeader {
    fn default() -> Self {
        Self::new()
    }
}

/// The complete durable mirror.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreDocument {
    pub header: StoreHeader,
    pub machines: BTreeMap<String, MachineRecord>,
}

impl StoreDocument {
    pub fn new(machines: BTreeMap<String, MachineRecord>) -> Self {
        Self {
            header: StoreHeader::new(),
            machines,
        }
    }
}

// ---------------------------------------------------------------------------
// Formats
// ---------------------------------------------------------------------------

/// Encodings a store document can be written in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreFormat {
    Bitcode,
    Json,
    Ron,
}

impl StoreFormat {
    /// Pick a format from a file extension: `.json`, `.ron`, anything else
    /// is bitcode.
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => StoreFormat::Json,
            Some("ron") => StoreFormat::Ron,
            _ => StoreFormat::Bitcode,
        }
    }

    pub fn encode(self, doc: &StoreDocument) -> Result<Vec<u8>, CodecError> {
        match self {
            StoreFormat::Bitcode => {
                bitcode::serialize(doc).map_err(|e| CodecError::Encode(e.to_string()))
            }
            StoreFormat::Json => {
                serde_json::to_vec_pretty(doc).map_err(|e| CodecError::Encode(e.to_string()))
            }
            StoreFormat::Ron => ron::ser::to_string_pretty(doc, ron::ser::PrettyConfig::default())
                .map(String::into_bytes)
                .map_err(|e| CodecError::Encode(e.to_string())),
        }
    }

    /// Decode and validate a document. Empty input is an empty document.
    pub fn decode(self, data: &[u8]) -> Result<StoreDocument, CodecError> {
        if data.iter().all(u8::is_ascii_whitespace) {
            return Ok(StoreDocument::default());
        }
        let doc: StoreDocument = match self {
            StoreFormat::Bitcode => {
                bitcode::deserialize(data).map_err(|e| CodecError::Decode(e.to_string()))?
            }
            StoreFormat::Json => {
                serde_json::from_slice(data).map_err(|e| CodecError::Decode(e.to_string()))?
            }
            StoreFormat::Ron => {
                let text =
                    std::str::from_utf8(data).map_err(|e| CodecError::Decode(e.to_string()))?;
                ron::from_str(text).map_err(|e| CodecError::Decode(e.to_string()))?
            }
        };
        doc.header.validate()?;
        Ok(doc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blueprint::MachineProperties;
    use crate::fixed::Fixed64;
    use crate::recipe::{Recipe, RecipeCatalog};

    fn busy_machine(blueprints: &BlueprintRegistry) -> Machine {
        let mut catalog = RecipeCatalog::new();
        catalog.register(Recipe::new("ore", "ingot", 10));
        let mut m = Machine::new(MachineId::random(), "Smelter #1", blueprints.default_blueprint());
        let _ = m.set_input(Some(ItemStack::new("ore", 12)));
        let _ = m.set_fuel(40);
        let _ = m.set_output(Some(ItemStack::new("ingot", 3)));
        for _ in 0..4 {
            m.advance(&catalog);
        }
        m
    }

    #[test]
    fn record_round_trip_reproduces_machine() {
        let blueprints = BlueprintRegistry::new();
        let m = busy_machine(&blueprints);
        let restored = Machine::from_record(m.id(), m.to_record(), &blueprints).unwrap();
        assert_eq!(restored, m);
    }

    #[test]
    fn fractional_progress_survives_exactly() {
        let mut blueprints = BlueprintRegistry::new();
        blueprints.register(
            MachineProperties::builder("odd")
                .speed(Fixed64::from_num(1.0 / 3.0))
                .build()
                .unwrap(),
        )
        .unwrap();
        let mut catalog = RecipeCatalog::new();
        catalog.register(Recipe::new("ore", "ingot", 10));
        let mut m = Machine::new(MachineId::random(), "odd", blueprints.get("odd").unwrap());
        let _ = m.set_input(Some(ItemStack::new("ore", 1)));
        let _ = m.set_fuel(10);
        m.advance(&catalog);

        let record = m.to_record();
        let data = StoreFormat::Json
            .encode(&StoreDocument::new(BTreeMap::from([(m.id().to_string(), record)])))
            .unwrap();
        let doc = StoreFormat::Json.decode(&data).unwrap();
        let restored =
            Machine::from_record(m.id(), doc.machines[&m.id().to_string()].clone(), &blueprints)
                .unwrap();
        assert_eq!(restored.progress(), m.progress());
    }

    #[test]
    fn unknown_blueprint_fails_restore() {
        let blueprints = BlueprintRegistry::new();
        let mut record = busy_machine(&blueprints).to_record();
        record.blueprint = "missing".to_string();
        assert!(matches!(
            Machine::from_record(MachineId::random(), record, &blueprints),
            Err(BlueprintError::UnknownBlueprint(_))
        ));
    }

    #[test]
    fn every_format_round_trips_document() {
        let blueprints = BlueprintRegistry::new();
        let m = busy_machine(&blueprints);
        let doc = StoreDocument::new(BTreeMap::from([(m.id().to_string(), m.to_record())]));
        for format in [StoreFormat::Bitcode, StoreFormat::Json, StoreFormat::Ron] {
            let data = format.encode(&doc).unwrap();
            let decoded = format.decode(&data).unwrap();
            assert_eq!(decoded, doc, "format {format:?}");
        }
    }

    #[test]
    fn empty_input_decodes_to_empty_document() {
        for format in [StoreFormat::Bitcode, StoreFormat::Json, StoreFormat::Ron] {
            let doc = format.decode(b"").unwrap();
            assert!(doc.machines.is_empty());
        }
    }

    #[test]
    fn header_validation() {
        assert!(StoreHeader::new().validate().is_ok());

        let bad_magic = StoreHeader {
            magic: 0xDEAD_BEEF,
            version: FORMAT_VERSION,
        };
        assert!(matches!(
            bad_magic.validate(),
            Err(CodecError::InvalidMagic(0xDEAD_BEEF))
        ));

        let future = StoreHeader {
            magic: STORE_MAGIC,
            version: 999,
        };
        assert!(matches!(future.validate(), Err(CodecError::FutureVersion(999))));

        let past = StoreHeader {
            magic: STORE_MAGIC,
            version: 0,
        };
        assert!(matches!(past.validate(), Err(CodecError::UnsupportedVersion(0))));
    }

    #[test]
    fn garbage_is_a_decode_error() {
        assert!(matches!(
            StoreFormat::Json.decode(b"{ not json"),
            Err(CodecError::Decode(_))
        ));
    }

    #[test]
    fn format_from_extension() {
        assert_eq!(StoreFormat::from_path(Path::new("m.json")), StoreFormat::Json);
        assert_eq!(StoreFormat::from_path(Path::new("m.ron")), StoreFormat::Ron);
        assert_eq!(StoreFormat::from_path(Path::new("m.bin")), StoreFormat::Bitcode);
        assert_eq!(StoreFormat::from_path(Path::new("machines")), StoreFormat::Bitcode);
    }
}
