//! Pad mapping types: the tagged action union and its modifiers.

use std::fmt;

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

use crate::palette::{nearest, palette_lookup};

/// Color of a pad LED: a palette name or an absolute RGB value.
///
/// Serialized as a string: either the palette name (`"green"`) or a hex
/// triplet (`"#00FF00"`). Absolute colors resolve to the nearest palette
/// entry when painted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PadColor {
    /// A named entry of the device palette.
    Palette(String),
    /// An absolute RGB color, matched to the nearest palette entry.
    Rgb {
        /// Red component.
        r: u8,
        /// Green component.
        g: u8,
        /// Blue component.
        b: u8,
    },
}

impl PadColor {
    /// Shorthand for the unlit color.
    pub fn off() -> Self {
        Self::Palette("off".into())
    }

    /// Velocity byte the hardware expects for this color.
    pub fn velocity(&self) -> u8 {
        match self {
            Self::Palette(name) => palette_lookup(name).map_or(0, |e| e.velocity),
            Self::Rgb { r, g, b } => nearest((*r, *g, *b)).velocity,
        }
    }

    /// Dimmed variant of this color, used by pulse animations.
    ///
    /// Named colors fall back to their `_dim` palette sibling when one
    /// exists; everything else dims to "off".
    pub fn dim(&self) -> Self {
        if let Self::Palette(name) = self {
            let dim = format!("{}_dim", name);
            if palette_lookup(&dim).is_some() {
                return Self::Palette(dim);
            }
        }
        Self::off()
    }
}

impl fmt::Display for PadColor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Palette(name) => f.write_str(name),
            Self::Rgb { r, g, b } => write!(f, "#{:02X}{:02X}{:02X}", r, g, b),
        }
    }
}

impl std::str::FromStr for PadColor {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(hex) = s.strip_prefix('#') {
            if hex.len() != 6 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
                return Err(format!("invalid hex color: {}", s));
            }
            let byte = |i: usize| u8::from_str_radix(&hex[i..i + 2], 16).unwrap_or(0);
            return Ok(Self::Rgb {
                r: byte(0),
                g: byte(2),
                b: byte(4),
            });
        }
        Ok(Self::Palette(s.to_string()))
    }
}

impl Serialize for PadColor {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for PadColor {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}

/// Software key-repeat configuration; presence enables the repeat loop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Repeat {
    /// Delay before the first repeat, in milliseconds.
    pub initial_delay_ms: u64,
    /// Interval between repeats, in milliseconds.
    pub interval_ms: u64,
}

impl Default for Repeat {
    fn default() -> Self {
        Self {
            initial_delay_ms: 500,
            interval_ms: 50,
        }
    }
}

/// Long-press alternate action; presence enables long-press handling.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LongPress {
    /// Key combo injected when the hold crosses the threshold.
    pub combo: String,
    /// Hold duration that triggers the alternate action, in milliseconds.
    #[serde(default = "default_long_press_threshold_ms")]
    pub threshold_ms: u64,
}

fn default_long_press_threshold_ms() -> u64 {
    500
}

/// One step of a macro sequence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MacroStep {
    /// Key combo to inject; empty means a pure delay step.
    #[serde(default)]
    pub combo: String,
    /// Delay after the step, in milliseconds.
    #[serde(default)]
    pub delay_after_ms: u64,
}

/// One velocity range rule. Ranges are inclusive on both ends and are
/// evaluated in stored order; the first match wins, even when ranges
/// overlap.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VelocityRule {
    /// Inclusive lower bound, 0-127.
    pub lo: u8,
    /// Inclusive upper bound, 0-127.
    pub hi: u8,
    /// Key combo selected when the velocity falls in the range.
    pub combo: String,
}

/// What a pad does when pressed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PadAction {
    /// Inject a key combo, optionally selected by velocity and repeated
    /// while held.
    Key {
        /// Default key combo; also the fallback when no velocity rule
        /// matches.
        combo: String,
        /// Ordered velocity rules; first match wins.
        #[serde(default)]
        velocity: Vec<VelocityRule>,
        /// Repeat-while-held configuration.
        #[serde(default)]
        repeat: Option<Repeat>,
    },
    /// Run an ordered macro sequence as one unit.
    Macro {
        /// Steps executed strictly in order.
        steps: Vec<MacroStep>,
    },
    /// Push a layer onto the layer stack.
    LayerPush {
        /// Name of the layer to activate.
        target: String,
    },
    /// Pop the top layer off the stack (no-op at depth 1).
    LayerPop,
}

/// Binding of one pad to an action, with LED color and modifiers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mapping {
    /// Control id of the pad (0-127); must equal the key in the owning
    /// layer.
    pub note: u8,
    /// Short display label.
    #[serde(default)]
    pub label: String,
    /// LED color shown while the mapping's layer is active.
    pub color: PadColor,
    /// Disabled mappings are neither painted nor dispatched.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// The action performed on press.
    pub action: PadAction,
    /// Optional long-press alternate action.
    #[serde(default)]
    pub long_press: Option<LongPress>,
}

fn default_enabled() -> bool {
    true
}

impl Mapping {
    /// A minimal enabled key mapping, mostly useful in tests and tools.
    pub fn key(note: u8, combo: impl Into<String>, color: PadColor) -> Self {
        Self {
            note,
            label: String::new(),
            color,
            enabled: true,
            action: PadAction::Key {
                combo: combo.into(),
                velocity: Vec::new(),
                repeat: None,
            },
            long_press: None,
        }
    }
}
