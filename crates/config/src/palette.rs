//! LED palette for the pad surface.
//!
//! Each named color carries the velocity byte the hardware expects for its
//! LED and a reference RGB value used for nearest-match resolution of
//! absolute colors. The set mirrors the device's fixed palette; "off" is a
//! real entry (velocity 0) but is never considered a nearest-match candidate.

use std::collections::HashMap;

use once_cell::sync::Lazy;

/// One named palette color.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PaletteEntry {
    /// Palette name, e.g. `"green"` or `"green_dim"`.
    pub name: &'static str,
    /// Velocity byte to send for this LED color.
    pub velocity: u8,
    /// Reference RGB used for nearest-color matching.
    pub rgb: (u8, u8, u8),
}

const fn entry(name: &'static str, velocity: u8, rgb: (u8, u8, u8)) -> PaletteEntry {
    PaletteEntry {
        name,
        velocity,
        rgb,
    }
}

/// The device palette, in display order.
pub const PALETTE: &[PaletteEntry] = &[
    entry("off", 0, (0x33, 0x33, 0x33)),
    entry("white", 3, (0xFF, 0xFF, 0xFF)),
    entry("red", 5, (0xFF, 0x00, 0x00)),
    entry("red_dim", 7, (0x80, 0x00, 0x00)),
    entry("orange", 9, (0xFF, 0x80, 0x00)),
    entry("orange_dim", 11, (0x80, 0x40, 0x00)),
    entry("yellow", 13, (0xFF, 0xFF, 0x00)),
    entry("yellow_dim", 15, (0x80, 0x80, 0x00)),
    entry("lime", 17, (0x80, 0xFF, 0x00)),
    entry("lime_dim", 19, (0x40, 0x80, 0x00)),
    entry("green", 21, (0x00, 0xFF, 0x00)),
    entry("green_dim", 23, (0x00, 0x80, 0x00)),
    entry("spring", 29, (0x00, 0xFF, 0x80)),
    entry("spring_dim", 27, (0x00, 0x80, 0x40)),
    entry("cyan", 37, (0x00, 0xFF, 0xFF)),
    entry("cyan_dim", 35, (0x00, 0x80, 0x80)),
    entry("sky", 41, (0x00, 0x80, 0xFF)),
    entry("sky_dim", 39, (0x00, 0x40, 0x80)),
    entry("blue", 45, (0x00, 0x00, 0xFF)),
    entry("blue_dim", 43, (0x00, 0x00, 0x80)),
    entry("purple", 49, (0x80, 0x00, 0xFF)),
    entry("purple_dim", 47, (0x40, 0x00, 0x80)),
    entry("magenta", 53, (0xFF, 0x00, 0xFF)),
    entry("magenta_dim", 51, (0x80, 0x00, 0x80)),
    entry("pink", 57, (0xFF, 0x00, 0x80)),
    entry("pink_dim", 55, (0x80, 0x00, 0x40)),
    entry("coral", 61, (0xFF, 0x40, 0x40)),
    entry("coral_dim", 59, (0x80, 0x20, 0x20)),
    entry("amber", 65, (0xFF, 0xBF, 0x00)),
    entry("amber_dim", 63, (0x80, 0x60, 0x00)),
];

static BY_NAME: Lazy<HashMap<&'static str, &'static PaletteEntry>> =
    Lazy::new(|| PALETTE.iter().map(|e| (e.name, e)).collect());

/// Look up a palette entry by name.
pub fn palette_lookup(name: &str) -> Option<&'static PaletteEntry> {
    BY_NAME.get(name).copied()
}

fn distance_sq(a: (u8, u8, u8), b: (u8, u8, u8)) -> u32 {
    let d = |x: u8, y: u8| {
        let diff = i32::from(x) - i32::from(y);
        (diff * diff) as u32
    };
    d(a.0, b.0) + d(a.1, b.1) + d(a.2, b.2)
}

/// Find the palette entry closest to an absolute RGB value ("off" excluded).
pub fn nearest(rgb: (u8, u8, u8)) -> &'static PaletteEntry {
    PALETTE
        .iter()
        .filter(|e| e.name != "off")
        .min_by_key(|e| distance_sq(e.rgb, rgb))
        .unwrap_or(&PALETTE[0])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_known_names() {
        assert_eq!(palette_lookup("green").unwrap().velocity, 21);
        assert_eq!(palette_lookup("off").unwrap().velocity, 0);
        assert!(palette_lookup("chartreuse").is_none());
    }

    #[test]
    fn nearest_matches_exact_reference() {
        assert_eq!(nearest((0xFF, 0x00, 0x00)).name, "red");
        assert_eq!(nearest((0x00, 0xFF, 0x00)).name, "green");
    }

    #[test]
    fn nearest_never_returns_off() {
        // Dark grey is closest to "off" by distance, which is excluded.
        assert_ne!(nearest((0x30, 0x30, 0x30)).name, "off");
    }
}
