//! Pure action resolution: press event + mapping -> concrete plan.
//!
//! No side effects here; the dispatch engine interprets the returned plan.
//! Keeping this pure makes the ordering rules directly testable.

use config::{LongPress, MacroStep, Mapping, PadAction, Repeat, VelocityRule};

use crate::press::ShortAction;

/// What a press resolves to, in dispatch order: layer ops first, then a
/// long-press arm, then macro, then velocity-resolved key.
#[derive(Debug, Clone)]
pub enum PressPlan {
    /// Pop the top layer (safe no-op at depth 1).
    LayerPop,
    /// Push the named layer.
    LayerPush {
        /// Layer to activate.
        target: String,
    },
    /// Arm a long-press timer; the short action is deferred to release.
    ArmLongPress {
        /// Long-press config (alternate combo + threshold).
        long: LongPress,
        /// The primary action to run on a short release.
        short: ShortAction,
    },
    /// Run the macro steps as a background task.
    Macro {
        /// Steps executed strictly in order.
        steps: Vec<MacroStep>,
    },
    /// Inject a key combo now, optionally starting a repeat loop.
    Key {
        /// The velocity-resolved combo.
        combo: String,
        /// Repeat configuration, when enabled for this mapping.
        repeat: Option<Repeat>,
    },
    /// Nothing to do (mapping disabled).
    Disabled,
}

/// Resolve the effective combo for a velocity: first rule in stored order
/// whose inclusive range contains the velocity; the mapping's own combo
/// when none matches. Overlapping ranges are allowed; first match wins.
pub fn velocity_combo<'a>(rules: &'a [VelocityRule], default: &'a str, velocity: u8) -> &'a str {
    rules
        .iter()
        .find(|r| r.lo <= velocity && velocity <= r.hi)
        .map_or(default, |r| r.combo.as_str())
}

/// Resolve a press against its mapping.
pub fn resolve_press(mapping: &Mapping, velocity: u8) -> PressPlan {
    if !mapping.enabled {
        return PressPlan::Disabled;
    }
    match &mapping.action {
        PadAction::LayerPop => PressPlan::LayerPop,
        PadAction::LayerPush { target } => PressPlan::LayerPush {
            target: target.clone(),
        },
        PadAction::Macro { steps } => match &mapping.long_press {
            Some(long) => PressPlan::ArmLongPress {
                long: long.clone(),
                short: ShortAction::Macro(steps.clone()),
            },
            None => PressPlan::Macro {
                steps: steps.clone(),
            },
        },
        PadAction::Key {
            combo,
            velocity: rules,
            repeat,
        } => {
            // Velocity is resolved at press time; a deferred short press
            // keeps the combo selected by the original press.
            let combo = velocity_combo(rules, combo, velocity).to_string();
            match &mapping.long_press {
                Some(long) => PressPlan::ArmLongPress {
                    long: long.clone(),
                    short: ShortAction::Inject(combo),
                },
                None => PressPlan::Key {
                    combo,
                    repeat: repeat.clone(),
                },
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use config::PadColor;

    use super::*;

    fn rules() -> Vec<VelocityRule> {
        vec![
            VelocityRule {
                lo: 0,
                hi: 42,
                combo: "a".into(),
            },
            VelocityRule {
                lo: 43,
                hi: 84,
                combo: "b".into(),
            },
            VelocityRule {
                lo: 85,
                hi: 127,
                combo: "c".into(),
            },
        ]
    }

    #[test]
    fn velocity_table_boundaries() {
        let rules = rules();
        for (vel, expect) in [
            (0, "a"),
            (42, "a"),
            (43, "b"),
            (84, "b"),
            (85, "c"),
            (127, "c"),
        ] {
            assert_eq!(velocity_combo(&rules, "fallback", vel), expect);
        }
    }

    #[test]
    fn velocity_outside_ranges_falls_back() {
        let rules = vec![VelocityRule {
            lo: 50,
            hi: 60,
            combo: "x".into(),
        }];
        assert_eq!(velocity_combo(&rules, "fallback", 30), "fallback");
        assert_eq!(velocity_combo(&[], "fallback", 100), "fallback");
    }

    #[test]
    fn overlapping_ranges_first_match_wins() {
        let rules = vec![
            VelocityRule {
                lo: 0,
                hi: 100,
                combo: "first".into(),
            },
            VelocityRule {
                lo: 50,
                hi: 127,
                combo: "second".into(),
            },
        ];
        assert_eq!(velocity_combo(&rules, "d", 75), "first");
    }

    #[test]
    fn layer_ops_resolve_before_long_press() {
        let mut m = Mapping::key(19, "unused", PadColor::off());
        m.action = PadAction::LayerPop;
        m.long_press = Some(LongPress {
            combo: "alt".into(),
            threshold_ms: 500,
        });
        assert!(matches!(resolve_press(&m, 64), PressPlan::LayerPop));
    }

    #[test]
    fn long_press_defers_key_with_press_velocity() {
        let mut m = Mapping::key(81, "default", PadColor::off());
        m.action = PadAction::Key {
            combo: "default".into(),
            velocity: rules(),
            repeat: None,
        };
        m.long_press = Some(LongPress {
            combo: "alt".into(),
            threshold_ms: 500,
        });
        match resolve_press(&m, 100) {
            PressPlan::ArmLongPress {
                short: ShortAction::Inject(combo),
                ..
            } => assert_eq!(combo, "c"),
            other => panic!("unexpected plan: {:?}", other),
        }
    }

    #[test]
    fn disabled_mapping_resolves_to_nothing() {
        let mut m = Mapping::key(81, "x", PadColor::off());
        m.enabled = false;
        assert!(matches!(resolve_press(&m, 64), PressPlan::Disabled));
    }
}
