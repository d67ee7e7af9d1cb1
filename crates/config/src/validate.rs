//! Import validation: size caps and field checks for profiles.
//!
//! Validation runs against a fully parsed [`Profile`] and reports the first
//! failure with a dotted field path. Nothing is mutated; callers only swap
//! in a profile that validated cleanly.

use crate::{
    error::{Error, Result},
    mapping::{LongPress, MacroStep, Mapping, PadAction, PadColor, Repeat, VelocityRule},
    palette::palette_lookup,
    profile::Profile,
};

/// Maximum accepted size of a raw profile import, in bytes.
pub const MAX_PROFILE_SIZE_BYTES: usize = 10 * 1024 * 1024;
/// Maximum number of layers in a profile.
pub const MAX_LAYERS: usize = 50;
/// Maximum number of mappings in one layer.
pub const MAX_MAPPINGS_PER_LAYER: usize = 500;
/// Maximum number of steps in a macro.
pub const MAX_MACRO_STEPS: usize = 100;
/// Maximum number of velocity rules on one mapping.
pub const MAX_VELOCITY_RULES: usize = 20;
/// Maximum length of profile, layer and label names.
pub const MAX_NAME_LENGTH: usize = 100;

const MAX_COMBO_LENGTH: usize = 500;
const MAX_DESCRIPTION_LENGTH: usize = 1000;
const MAX_STEP_DELAY_MS: u64 = 60_000;
const MIN_REPEAT_INTERVAL_MS: u64 = 10;
const MAX_REPEAT_DELAY_MS: u64 = 10_000;

/// Characters never allowed in a key combo. Combos end up in OS-level
/// injection calls, so shell metacharacters are rejected outright.
const FORBIDDEN_COMBO_CHARS: &[char] = &['`', '$', '|', '>', '<', ';', '&', '\n', '\r'];

fn check_name(value: &str, field: &str) -> Result<()> {
    if value.is_empty() {
        return Err(Error::validation(field, "must not be empty"));
    }
    if value.len() > MAX_NAME_LENGTH {
        return Err(Error::validation(
            field,
            format!("exceeds maximum length of {}", MAX_NAME_LENGTH),
        ));
    }
    Ok(())
}

fn check_combo(value: &str, field: &str, allow_empty: bool) -> Result<()> {
    if value.is_empty() && !allow_empty {
        return Err(Error::validation(field, "must not be empty"));
    }
    if value.len() > MAX_COMBO_LENGTH {
        return Err(Error::validation(
            field,
            format!("exceeds maximum length of {}", MAX_COMBO_LENGTH),
        ));
    }
    if let Some(c) = value.chars().find(|c| FORBIDDEN_COMBO_CHARS.contains(c)) {
        return Err(Error::validation(
            field,
            format!("invalid character in key combo: {:?}", c),
        ));
    }
    Ok(())
}

fn check_color(color: &PadColor, field: &str) -> Result<()> {
    if let PadColor::Palette(name) = color {
        if palette_lookup(name).is_none() {
            return Err(Error::validation(
                field,
                format!("unknown palette color: {}", name),
            ));
        }
    }
    Ok(())
}

fn check_repeat(repeat: &Repeat, field: &str) -> Result<()> {
    if repeat.interval_ms < MIN_REPEAT_INTERVAL_MS {
        return Err(Error::validation(
            format!("{}.interval_ms", field),
            format!("must be >= {}", MIN_REPEAT_INTERVAL_MS),
        ));
    }
    if repeat.initial_delay_ms > MAX_REPEAT_DELAY_MS {
        return Err(Error::validation(
            format!("{}.initial_delay_ms", field),
            format!("must be <= {}", MAX_REPEAT_DELAY_MS),
        ));
    }
    Ok(())
}

fn check_long_press(lp: &LongPress, field: &str) -> Result<()> {
    check_combo(&lp.combo, &format!("{}.combo", field), false)?;
    if lp.threshold_ms == 0 || lp.threshold_ms > MAX_REPEAT_DELAY_MS {
        return Err(Error::validation(
            format!("{}.threshold_ms", field),
            format!("must be between 1 and {}", MAX_REPEAT_DELAY_MS),
        ));
    }
    Ok(())
}

fn check_macro_steps(steps: &[MacroStep], field: &str) -> Result<()> {
    if steps.is_empty() {
        return Err(Error::validation(field, "macro must have at least one step"));
    }
    if steps.len() > MAX_MACRO_STEPS {
        return Err(Error::validation(
            field,
            format!("too many macro steps (max {})", MAX_MACRO_STEPS),
        ));
    }
    for (i, step) in steps.iter().enumerate() {
        let step_field = format!("{}[{}]", field, i);
        check_combo(&step.combo, &format!("{}.combo", step_field), true)?;
        if step.delay_after_ms > MAX_STEP_DELAY_MS {
            return Err(Error::validation(
                format!("{}.delay_after_ms", step_field),
                format!("must be <= {}", MAX_STEP_DELAY_MS),
            ));
        }
    }
    Ok(())
}

fn check_velocity_rules(rules: &[VelocityRule], field: &str) -> Result<()> {
    if rules.len() > MAX_VELOCITY_RULES {
        return Err(Error::validation(
            field,
            format!("too many velocity rules (max {})", MAX_VELOCITY_RULES),
        ));
    }
    for (i, rule) in rules.iter().enumerate() {
        let rule_field = format!("{}[{}]", field, i);
        if rule.lo > rule.hi {
            return Err(Error::validation(
                &rule_field,
                format!("range {}-{} is inverted", rule.lo, rule.hi),
            ));
        }
        if rule.hi > 127 {
            return Err(Error::validation(
                &rule_field,
                "velocity bounds must be 0-127",
            ));
        }
        check_combo(&rule.combo, &format!("{}.combo", rule_field), false)?;
    }
    Ok(())
}

fn check_mapping(mapping: &Mapping, field: &str) -> Result<()> {
    if mapping.note > 127 {
        return Err(Error::validation(
            format!("{}.note", field),
            "note must be 0-127",
        ));
    }
    if mapping.label.len() > MAX_NAME_LENGTH {
        return Err(Error::validation(
            format!("{}.label", field),
            format!("exceeds maximum length of {}", MAX_NAME_LENGTH),
        ));
    }
    check_color(&mapping.color, &format!("{}.color", field))?;
    match &mapping.action {
        PadAction::Key {
            combo,
            velocity,
            repeat,
        } => {
            check_combo(combo, &format!("{}.action.combo", field), false)?;
            check_velocity_rules(velocity, &format!("{}.action.velocity", field))?;
            if let Some(r) = repeat {
                check_repeat(r, &format!("{}.action.repeat", field))?;
            }
        }
        PadAction::Macro { steps } => {
            check_macro_steps(steps, &format!("{}.action.steps", field))?;
        }
        PadAction::LayerPush { target } => {
            check_name(target, &format!("{}.action.target", field))?;
        }
        PadAction::LayerPop => {}
    }
    if let Some(lp) = &mapping.long_press {
        check_long_press(lp, &format!("{}.long_press", field))?;
    }
    Ok(())
}

/// Validate a parsed profile; returns the first failure with a
/// field-qualified error.
pub fn validate_profile(profile: &Profile) -> Result<()> {
    check_name(&profile.name, "profile.name")?;
    if profile.description.len() > MAX_DESCRIPTION_LENGTH {
        return Err(Error::validation(
            "profile.description",
            format!("exceeds maximum length of {}", MAX_DESCRIPTION_LENGTH),
        ));
    }
    check_name(&profile.base_layer, "profile.base_layer")?;
    if profile.layers.len() > MAX_LAYERS {
        return Err(Error::validation(
            "profile.layers",
            format!("too many layers (max {})", MAX_LAYERS),
        ));
    }
    let mut total = 0usize;
    for (layer_name, layer) in &profile.layers {
        let layer_field = format!("profile.layers.{}", layer_name);
        check_name(layer_name, &layer_field)?;
        if layer.len() > MAX_MAPPINGS_PER_LAYER {
            return Err(Error::validation(
                &layer_field,
                format!("too many mappings in layer (max {})", MAX_MAPPINGS_PER_LAYER),
            ));
        }
        total += layer.len();
        for (note, mapping) in layer {
            let mapping_field = format!("{}.{}", layer_field, note);
            if mapping.note != *note {
                return Err(Error::validation(
                    &mapping_field,
                    format!(
                        "mapping note {} does not match its layer key {}",
                        mapping.note, note
                    ),
                ));
            }
            check_mapping(mapping, &mapping_field)?;
        }
    }
    if total > 1000 {
        tracing::warn!(total, "profile contains many mappings; painting may be slow");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::Layer;

    fn profile_with(mapping: Mapping) -> Profile {
        let mut p = Profile::default();
        p.add_mapping(mapping, None);
        p
    }

    #[test]
    fn accepts_default_profile() {
        assert!(validate_profile(&Profile::default()).is_ok());
    }

    #[test]
    fn rejects_shell_metacharacters_in_combo() {
        let m = Mapping::key(81, "ctrl+c; rm -rf", PadColor::Palette("green".into()));
        let err = validate_profile(&profile_with(m)).unwrap_err();
        match err {
            Error::Validation { field, .. } => {
                assert_eq!(field, "profile.layers.Base.81.action.combo");
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn rejects_unknown_palette_color() {
        let m = Mapping::key(81, "ctrl+c", PadColor::Palette("mauve".into()));
        assert!(validate_profile(&profile_with(m)).is_err());
    }

    #[test]
    fn rejects_note_key_mismatch() {
        let mut p = Profile::default();
        let m = Mapping::key(82, "a", PadColor::Palette("red".into()));
        p.layers.get_mut("Base").unwrap().insert(81, m);
        assert!(validate_profile(&p).is_err());
    }

    #[test]
    fn rejects_too_many_layers() {
        let mut p = Profile::default();
        for i in 0..=MAX_LAYERS {
            p.layers.insert(format!("L{}", i), Layer::new());
        }
        let err = validate_profile(&p).unwrap_err();
        match err {
            Error::Validation { field, .. } => assert_eq!(field, "profile.layers"),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn rejects_inverted_velocity_range() {
        let mut m = Mapping::key(81, "a", PadColor::Palette("red".into()));
        m.action = PadAction::Key {
            combo: "a".into(),
            velocity: vec![VelocityRule {
                lo: 60,
                hi: 40,
                combo: "b".into(),
            }],
            repeat: None,
        };
        assert!(validate_profile(&profile_with(m)).is_err());
    }

    #[test]
    fn rejects_empty_macro() {
        let mut m = Mapping::key(81, "a", PadColor::Palette("red".into()));
        m.action = PadAction::Macro { steps: vec![] };
        assert!(validate_profile(&profile_with(m)).is_err());
    }

    #[test]
    fn overlapping_velocity_ranges_are_accepted() {
        let mut m = Mapping::key(81, "a", PadColor::Palette("red".into()));
        m.action = PadAction::Key {
            combo: "a".into(),
            velocity: vec![
                VelocityRule {
                    lo: 0,
                    hi: 80,
                    combo: "soft".into(),
                },
                VelocityRule {
                    lo: 50,
                    hi: 127,
                    combo: "hard".into(),
                },
            ],
            repeat: None,
        };
        assert!(validate_profile(&profile_with(m)).is_ok());
    }

    #[test]
    fn from_json_rejects_invalid_and_reports_field() {
        let json = r#"{
            "name": "P",
            "base_layer": "Base",
            "layers": {
                "Base": {
                    "81": {
                        "note": 81,
                        "color": "green",
                        "action": {"kind": "key", "combo": "ctrl+`x"}
                    }
                }
            }
        }"#;
        let err = Profile::from_json(json).unwrap_err();
        assert!(matches!(err, Error::Validation { .. }));
    }
}
