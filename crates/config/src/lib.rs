//! Profile, layer and mapping data model for padgrid.
//!
//! A [`Profile`] is a named set of layers; each layer maps a pad control id
//! (0-127) to a [`Mapping`]. Mappings carry a tagged [`PadAction`] plus the
//! interaction modifiers (repeat, long-press, velocity rules, macros).
//!
//! Profiles are imported from JSON through [`Profile::from_json`], which
//! validates every field with size caps before anything is constructed, and
//! exported with [`Profile::to_json`].

mod error;
mod mapping;
mod palette;
mod profile;
mod validate;

pub use error::{Error, Result};
pub use mapping::{LongPress, MacroStep, Mapping, PadAction, PadColor, Repeat, VelocityRule};
pub use palette::{nearest, palette_lookup, PaletteEntry, PALETTE};
pub use profile::{Layer, Profile};
pub use validate::{
    MAX_LAYERS, MAX_MACRO_STEPS, MAX_MAPPINGS_PER_LAYER, MAX_NAME_LENGTH, MAX_PROFILE_SIZE_BYTES,
    MAX_VELOCITY_RULES,
};
