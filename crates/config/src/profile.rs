//! Profiles: named sets of layers, each mapping pad ids to actions.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::{
    error::{Error, Result},
    mapping::Mapping,
    validate,
};

/// One layer: pad control id to mapping. Ordered by id for stable
/// iteration when painting and exporting.
pub type Layer = BTreeMap<u8, Mapping>;

/// A named set of layers with a designated base layer.
///
/// Invariant: `base_layer` is always present as a key of `layers`. The
/// constructors and [`Profile::from_json`] maintain this; direct mutation
/// through [`Profile::ensure_layer`] keeps it cheap to restore.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    /// Display name of the profile.
    pub name: String,
    /// Free-form description.
    #[serde(default)]
    pub description: String,
    /// Name of the layer the stack resets to.
    pub base_layer: String,
    /// Layer name to layer contents.
    pub layers: HashMap<String, Layer>,
}

impl Default for Profile {
    fn default() -> Self {
        Self::new("Default", "Base")
    }
}

impl Profile {
    /// Create an empty profile with a single empty base layer.
    pub fn new(name: impl Into<String>, base_layer: impl Into<String>) -> Self {
        let base_layer = base_layer.into();
        let mut layers = HashMap::new();
        layers.insert(base_layer.clone(), Layer::new());
        Self {
            name: name.into(),
            description: String::new(),
            base_layer,
            layers,
        }
    }

    /// Insert or replace a mapping in `layer` (the base layer when `None`),
    /// creating the layer if needed. The mapping is stored under its own
    /// note id.
    pub fn add_mapping(&mut self, mapping: Mapping, layer: Option<&str>) {
        let name = layer.unwrap_or(&self.base_layer).to_string();
        self.layers
            .entry(name)
            .or_default()
            .insert(mapping.note, mapping);
    }

    /// Remove a mapping; absent notes or layers are a safe no-op.
    pub fn remove_mapping(&mut self, note: u8, layer: Option<&str>) {
        let name = layer.unwrap_or(&self.base_layer);
        if let Some(l) = self.layers.get_mut(name) {
            l.remove(&note);
        }
    }

    /// Look up a mapping by note in `layer` (base layer when `None`).
    pub fn get_mapping(&self, note: u8, layer: Option<&str>) -> Option<&Mapping> {
        let name = layer.unwrap_or(&self.base_layer);
        self.layers.get(name).and_then(|l| l.get(&note))
    }

    /// All mappings of a layer; empty when the layer does not exist.
    pub fn layer_mappings(&self, layer: Option<&str>) -> impl Iterator<Item = &Mapping> {
        let name = layer.unwrap_or(&self.base_layer);
        self.layers.get(name).into_iter().flat_map(|l| l.values())
    }

    /// Create the layer if absent; idempotent.
    pub fn ensure_layer(&mut self, layer: &str) {
        self.layers.entry(layer.to_string()).or_default();
    }

    /// Parse and validate a profile from JSON.
    ///
    /// Validation runs on the parsed value before anything is returned, so
    /// a failed import can never leave a half-built profile behind. The
    /// base layer is ensured to exist on success.
    pub fn from_json(raw: &str) -> Result<Self> {
        if raw.len() > validate::MAX_PROFILE_SIZE_BYTES {
            return Err(Error::validation(
                "profile",
                format!(
                    "profile too large ({} bytes, max {})",
                    raw.len(),
                    validate::MAX_PROFILE_SIZE_BYTES
                ),
            ));
        }
        let mut profile: Self = serde_json::from_str(raw).map_err(|e| Error::Parse {
            message: e.to_string(),
        })?;
        validate::validate_profile(&profile)?;
        profile.ensure_layer(&profile.base_layer.clone());
        Ok(profile)
    }

    /// Serialize the profile to pretty JSON.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| Error::Parse {
            message: e.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::PadColor;

    #[test]
    fn base_layer_present_on_new() {
        let p = Profile::new("Test", "Base");
        assert!(p.layers.contains_key("Base"));
    }

    #[test]
    fn mapping_crud() {
        let mut p = Profile::default();
        p.add_mapping(
            Mapping::key(81, "ctrl+c", PadColor::Palette("green".into())),
            None,
        );
        assert!(p.get_mapping(81, None).is_some());
        assert_eq!(p.layer_mappings(None).count(), 1);

        // Adding to a missing layer creates it.
        p.add_mapping(
            Mapping::key(82, "ctrl+v", PadColor::Palette("blue".into())),
            Some("Editing"),
        );
        assert!(p.layers.contains_key("Editing"));
        assert!(p.get_mapping(82, Some("Editing")).is_some());
        assert!(p.get_mapping(82, None).is_none());

        p.remove_mapping(81, None);
        assert!(p.get_mapping(81, None).is_none());
        // Removing again is a no-op.
        p.remove_mapping(81, None);
    }

    #[test]
    fn ensure_layer_is_idempotent() {
        let mut p = Profile::default();
        p.ensure_layer("L");
        p.add_mapping(
            Mapping::key(11, "a", PadColor::Palette("red".into())),
            Some("L"),
        );
        p.ensure_layer("L");
        assert_eq!(p.layer_mappings(Some("L")).count(), 1);
    }

    #[test]
    fn json_round_trip() {
        let mut p = Profile::new("Studio", "Base");
        p.description = "test".into();
        p.add_mapping(
            Mapping::key(81, "ctrl+c", PadColor::Palette("green".into())),
            None,
        );
        let json = p.to_json().unwrap();
        let back = Profile::from_json(&json).unwrap();
        assert_eq!(back, p);
    }

    #[test]
    fn from_json_ensures_base_layer() {
        let json = r#"{"name":"P","base_layer":"Base","layers":{}}"#;
        let p = Profile::from_json(json).unwrap();
        assert!(p.layers.contains_key("Base"));
    }
}
