//! Shared types crossing the padgrid engine boundary.
//!
//! These are the serde-derived event and outcome shapes the engine emits and
//! that the request layer maps onto its responses. No behavior lives here.

use serde::{Deserialize, Serialize};

/// An event emitted by the dispatch engine to subscribers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// A pad was pressed, with the velocity reported by the hardware.
    PadPress {
        /// Control id of the pad.
        note: u8,
        /// Press intensity, 0-127.
        velocity: u8,
    },
    /// A pad was released.
    PadRelease {
        /// Control id of the pad.
        note: u8,
    },
    /// The active layer changed (push, pop, set, or profile swap).
    LayerChange {
        /// Name of the layer now on top of the stack.
        layer: String,
    },
    /// A software key-repeat tick fired for a held pad.
    KeyRepeat {
        /// Control id of the pad.
        note: u8,
        /// Key combo that was injected.
        combo: String,
    },
    /// A long-press alternate action fired for a held pad.
    LongPress {
        /// Control id of the pad.
        note: u8,
        /// Alternate key combo that was injected.
        combo: String,
    },
}

/// Which kind of action a press resolved to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    /// A key combo was injected immediately.
    Key,
    /// A macro sequence was started.
    Macro,
    /// A layer was pushed onto the stack.
    LayerPush,
    /// The top layer was popped.
    LayerPop,
    /// A long-press timer was armed; the action fires at release or timeout.
    LongPressArmed,
}

/// Summary of the action a (possibly emulated) press resolved to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionSummary {
    /// Control id of the pad.
    pub note: u8,
    /// Display label of the mapping.
    pub label: String,
    /// What the press resolved to.
    pub kind: ActionKind,
    /// The key combo that was (or will be) injected, when applicable.
    pub combo: Option<String>,
    /// Name of the active layer after the action.
    pub layer: String,
}

/// Result of a connect attempt, including partial-success detail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectOutcome {
    /// True when at least one side of the transport opened.
    pub success: bool,
    /// Human-readable description of the outcome.
    pub message: String,
    /// True when the input side opened (presses will be received).
    pub input_connected: bool,
    /// True when the output side opened (LED feedback available).
    pub output_connected: bool,
    /// 1-based attempt number that succeeded, or the total attempts made.
    pub attempt: u32,
    /// Accumulated error messages across failed attempts.
    pub errors: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_serializes_with_type_tag() {
        let ev = Event::PadPress {
            note: 81,
            velocity: 100,
        };
        let json = serde_json::to_string(&ev).unwrap();
        assert!(json.contains("\"type\":\"pad_press\""));
        let back: Event = serde_json::from_str(&json).unwrap();
        assert_eq!(back, ev);
    }

    #[test]
    fn layer_change_round_trips() {
        let ev = Event::LayerChange {
            layer: "Editing".into(),
        };
        let back: Event = serde_json::from_str(&serde_json::to_string(&ev).unwrap()).unwrap();
        assert_eq!(back, ev);
    }
}
