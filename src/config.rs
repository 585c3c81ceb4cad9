//! Configuration for memory maps.
//!
//! Provides the settings a map carries with it: default byte order, file size
//! limits for file-backed buffers, and how dumps are named and reloaded.

use serde::{Deserialize, Serialize};

use crate::core::byte_order::Endianness;
use crate::io::IOLimits;

/// Master configuration for a memory map.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MapConfig {
    /// Byte order for multi-byte convenience reads and writes.
    pub byte_order: Endianness,
    /// Limits applied when files are mapped or read into buffers.
    pub io: IOLimits,
    /// Dump and load settings.
    pub persist: PersistConfig,
}

impl MapConfig {
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

/// Settings for `MemoryMap::dump` and `MemoryMap::load`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistConfig {
    /// Extension of the index file, appended to the dump's base name.
    pub index_extension: String,
    /// Extension of each per-segment data file.
    pub data_extension: String,
    /// Map data files privately on load instead of reading them into memory.
    pub map_data_files: bool,
}

impl Default for PersistConfig {
    fn default() -> Self {
        Self {
            index_extension: "index".to_string(),
            data_extension: "data".to_string(),
            map_data_files: false,
        }
    }
}
