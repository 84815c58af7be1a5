//! Tile type registry: the grid spec provider.

use crate::grid::{TileGridSpec, TileTypeId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use thiserror::Error;

/// Errors raised loading or saving a registry definition file.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// Underlying filesystem failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The definition file is not valid JSON for a registry.
    #[error("registry definition error: {0}")]
    Format(#[from] serde_json::Error),
}

/// Supplies the supported tile types and their grid definitions.
///
/// The engine treats tile type ids as opaque lookup keys; the registry is
/// populated once by the ingestion driver - from its catalogue or from a
/// JSON definition file stored alongside the tile root - and shared
/// read-only afterwards.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct TileTypeRegistry {
    specs: HashMap<TileTypeId, TileGridSpec>,
}

impl TileTypeRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a tile type, replacing any previous definition.
    pub fn register(&mut self, id: TileTypeId, spec: TileGridSpec) {
        self.specs.insert(id, spec);
    }

    /// Builder-style registration.
    pub fn with_spec(mut self, id: TileTypeId, spec: TileGridSpec) -> Self {
        self.register(id, spec);
        self
    }

    /// Grid definition for a tile type.
    pub fn get(&self, id: TileTypeId) -> Option<&TileGridSpec> {
        self.specs.get(&id)
    }

    /// Registered tile type ids, in no particular order.
    pub fn ids(&self) -> impl Iterator<Item = TileTypeId> + '_ {
        self.specs.keys().copied()
    }

    /// Loads a registry from a JSON definition file.
    pub fn load_json(path: &Path) -> Result<Self, RegistryError> {
        let json = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&json)?)
    }

    /// Saves the registry as a JSON definition file.
    pub fn save_json(&self, path: &Path) -> Result<(), RegistryError> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_registered_spec() {
        let registry =
            TileTypeRegistry::new().with_spec(TileTypeId(1), TileGridSpec::wgs84_one_degree());
        assert!(registry.get(TileTypeId(1)).is_some());
        assert!(registry.get(TileTypeId(2)).is_none());
    }

    #[test]
    fn test_register_replaces_definition() {
        let mut registry =
            TileTypeRegistry::new().with_spec(TileTypeId(1), TileGridSpec::wgs84_one_degree());
        let mut coarse = TileGridSpec::wgs84_one_degree();
        coarse.tile_width = 2000;
        registry.register(TileTypeId(1), coarse.clone());
        assert_eq!(registry.get(TileTypeId(1)), Some(&coarse));
    }

    #[test]
    fn test_save_and_load_json_definition() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tile_types.json");
        let registry = TileTypeRegistry::new()
            .with_spec(TileTypeId(1), TileGridSpec::wgs84_one_degree());

        registry.save_json(&path).unwrap();
        let loaded = TileTypeRegistry::load_json(&path).unwrap();
        assert_eq!(
            loaded.get(TileTypeId(1)),
            Some(&TileGridSpec::wgs84_one_degree())
        );
    }

    #[test]
    fn test_load_rejects_invalid_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tile_types.json");
        fs::write(&path, "not json").unwrap();
        assert!(matches!(
            TileTypeRegistry::load_json(&path),
            Err(RegistryError::Format(_))
        ));
    }
}
