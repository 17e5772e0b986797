//! Frame colors.
//!
//! Normal flame graphs use a warm palette keyed by a hash of the frame name,
//! so a function keeps its color across renders. Differential graphs color
//! by rate change: red for growth, blue for shrinkage, gray for none.

use serde::{Serialize, Serializer};
use std::fmt;

/// 8-bit RGB color
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// Neutral gray used for the root and unchanged diff frames
    pub const NEUTRAL: Rgb = Rgb::new(200, 200, 200);
}

impl fmt::Display for Rgb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "rgb({},{},{})", self.r, self.g, self.b)
    }
}

impl Serialize for Rgb {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Delta at which diff colors reach full intensity
pub const DIFF_SATURATION_DELTA: f64 = 0.3;

/// djb2 string hash
pub fn djb2(name: &str) -> u32 {
    name.bytes()
        .fold(5381u32, |hash, byte| hash.wrapping_mul(33).wrapping_add(u32::from(byte)))
}

/// Deterministic warm color for a frame name
///
/// Hue 0-59°, saturation 160-214, value 200-255 (out of 255), all drawn
/// from different bits of the name's djb2 hash.
pub fn name_color(name: &str) -> Rgb {
    let hash = djb2(name);
    let hue = f64::from(hash % 60);
    let sat = f64::from(160 + (hash >> 8) % 55) / 255.0;
    let val = f64::from(200 + (hash >> 16) % 56) / 255.0;
    hsv_to_rgb(hue, sat, val)
}

/// HSV (hue in degrees, s and v in 0..=1) to RGB
pub fn hsv_to_rgb(hue: f64, sat: f64, val: f64) -> Rgb {
    let c = val * sat;
    let h = (hue.rem_euclid(360.0)) / 60.0;
    let x = c * (1.0 - ((h % 2.0) - 1.0).abs());
    let m = val - c;

    let (r, g, b) = match h as u32 {
        0 => (c, x, 0.0),
        1 => (x, c, 0.0),
        2 => (0.0, c, x),
        3 => (0.0, x, c),
        4 => (x, 0.0, c),
        _ => (c, 0.0, x),
    };

    Rgb::new(to_channel(r + m), to_channel(g + m), to_channel(b + m))
}

fn to_channel(v: f64) -> u8 {
    (v * 255.0).round().clamp(0.0, 255.0) as u8
}

/// Two-tone gradient for a rate delta
///
/// `delta > 0` shades from gray to red, `delta < 0` from gray to blue;
/// intensity is `min(|delta| / 0.3, 1)`. Exactly zero is neutral gray.
pub fn diff_color(delta: f64) -> Rgb {
    if delta == 0.0 || delta.is_nan() {
        return Rgb::NEUTRAL;
    }
    let intensity = (delta.abs() / DIFF_SATURATION_DELTA).min(1.0);
    let lerp = |base: f64, span: f64| (base + span * intensity).round().clamp(0.0, 255.0) as u8;

    if delta > 0.0 {
        Rgb::new(lerp(200.0, 55.0), lerp(200.0, -140.0), lerp(200.0, -140.0))
    } else {
        Rgb::new(lerp(200.0, -140.0), lerp(200.0, -80.0), lerp(200.0, 55.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_djb2_known_values() {
        assert_eq!(djb2(""), 5381);
        assert_eq!(djb2("a"), 5381 * 33 + 97);
    }

    #[test]
    fn test_name_color_is_deterministic_and_warm() {
        for name in ["main", "compute_hot", "std::rt::lang_start", "[unknown]"] {
            let color = name_color(name);
            assert_eq!(color, name_color(name));
            // Hue 0-60: red is the max channel, blue the min.
            assert!(color.r >= color.g && color.g >= color.b, "{name}: {color}");
            assert!(color.r >= 200);
        }
    }

    #[test]
    fn test_hsv_primary_hues() {
        assert_eq!(hsv_to_rgb(0.0, 1.0, 1.0), Rgb::new(255, 0, 0));
        assert_eq!(hsv_to_rgb(120.0, 1.0, 1.0), Rgb::new(0, 255, 0));
        assert_eq!(hsv_to_rgb(60.0, 0.0, 1.0), Rgb::new(255, 255, 255));
    }

    #[test]
    fn test_diff_color_gradient() {
        assert_eq!(diff_color(0.0), Rgb::NEUTRAL);
        assert_eq!(diff_color(0.3), Rgb::new(255, 60, 60));
        assert_eq!(diff_color(0.9), Rgb::new(255, 60, 60));
        assert_eq!(diff_color(-0.3), Rgb::new(60, 120, 255));

        let mild = diff_color(0.15);
        assert!(mild.r > 200 && mild.r < 255);
        assert!(mild.g < 200 && mild.g > 60);
    }

    #[test]
    fn test_rgb_display() {
        assert_eq!(Rgb::new(1, 2, 3).to_string(), "rgb(1,2,3)");
    }
}
