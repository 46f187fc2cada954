//! Portable item tokens and the tag codec that binds machines to them.
//!
//! A [`Token`] is an opaque item owned by the host (something a player can
//! carry). It stores string key/value tags; [`TokenTag`] defines how a typed
//! value is encoded under a fixed key. Tokens are values: every mutation
//! returns a new token and the original is left untouched.

use crate::id::{MachineId, MaterialId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A portable, opaque item carrying string tags.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    pub material: MaterialId,
    pub amount: u32,
    /// Cosmetic marker the host may render as a glow.
    pub glowing: bool,
    tags: BTreeMap<String, String>,
}

impl Token {
    pub fn new(material: impl Into<MaterialId>, amount: u32) -> Self {
        Self {
            material: material.into(),
            amount,
            glowing: false,
            tags: BTreeMap::new(),
        }
    }

    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags.get(key).map(String::as_str)
    }

    pub fn tags(&self) -> &BTreeMap<String, String> {
        &self.tags
    }

    #[must_use]
    pub fn with_tag(&self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let mut token = self.clone();
        token.tags.insert(key.into(), value.into());
        token
    }

    #[must_use]
    pub fn without_tag(&self, key: &str) -> Self {
        let mut token = self.clone();
        token.tags.remove(key);
        token
    }

    #[must_use]
    pub fn with_glow(&self, glowing: bool) -> Self {
        Self {
            glowing,
            ..self.clone()
        }
    }
}

/// A typed value stored in a token under a fixed key as a string.
pub trait TokenTag {
    type Value;

    /// Tag key the value is stored under.
    const KEY: &'static str;

    fn encode(value: &Self::Value) -> String;

    /// Decode the stored string. Malformed input yields `None`.
    fn decode(raw: &str) -> Option<Self::Value>;

    /// Read the value from a token. Absent or malformed tags yield `None`.
    fn read(token: &Token) -> Option<Self::Value> {
        token.tag(Self::KEY).and_then(Self::decode)
    }

    /// A copy of `token` carrying `value`.
    fn write(token: &Token, value: &Self::Value) -> Token {
        token.with_tag(Self::KEY, Self::encode(value))
    }
}

/// Binds a machine identifier to a token.
#[derive(Debug, Clone, Copy)]
pub struct MachineIdTag;

impl TokenTag for MachineIdTag {
    type Value = MachineId;

    const KEY: &'static str = "vfurnace:machine_id";

    fn encode(value: &MachineId) -> String {
        value.to_string()
    }

    fn decode(raw: &str) -> Option<MachineId> {
        MachineId::parse(raw)
    }
}
