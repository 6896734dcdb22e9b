//! Shared types used throughout the library.

mod transform;

pub use transform::{normal_matrix, Transform};

use std::fmt;
use std::str::FromStr;

/// An 8-bit RGB color, used for the atlas chroma key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Rgb(pub u8, pub u8, pub u8);

impl Default for Rgb {
    fn default() -> Self {
        Rgb(255, 255, 255)
    }
}

impl Rgb {
    /// Euclidean distance in RGB space to the color part of an RGBA pixel.
    pub fn distance(&self, pixel: [u8; 4]) -> f32 {
        let dr = self.0 as f32 - pixel[0] as f32;
        let dg = self.1 as f32 - pixel[1] as f32;
        let db = self.2 as f32 - pixel[2] as f32;
        (dr * dr + dg * dg + db * db).sqrt()
    }

    /// This color as an RGBA pixel with the given alpha.
    pub fn with_alpha(&self, alpha: u8) -> [u8; 4] {
        [self.0, self.1, self.2, alpha]
    }
}

impl FromStr for Rgb {
    type Err = String;

    /// Parse `#rrggbb` or `rrggbb`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let hex = s.trim_start_matches('#');
        if hex.len() != 6 || !hex.is_ascii() {
            return Err(format!("Invalid color '{}'. Use #rrggbb", s));
        }
        let channel = |range: std::ops::Range<usize>| {
            u8::from_str_radix(&hex[range], 16).map_err(|e| format!("Invalid color '{}': {}", s, e))
        };
        Ok(Rgb(channel(0..2)?, channel(2..4)?, channel(4..6)?))
    }
}

impl fmt::Display for Rgb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{:02x}{:02x}{:02x}", self.0, self.1, self.2)
    }
}

/// An axis-aligned bounding box.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub min: [f32; 3],
    pub max: [f32; 3],
}

impl BoundingBox {
    pub fn from_points(points: impl Iterator<Item = [f32; 3]>) -> Option<Self> {
        let mut min = [f32::MAX; 3];
        let mut max = [f32::MIN; 3];
        let mut has_points = false;

        for p in points {
            has_points = true;
            for i in 0..3 {
                min[i] = min[i].min(p[i]);
                max[i] = max[i].max(p[i]);
            }
        }

        if has_points {
            Some(Self { min, max })
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rgb_parse_and_display() {
        let c: Rgb = "#ffcc99".parse().unwrap();
        assert_eq!(c, Rgb(255, 204, 153));
        assert_eq!(c.to_string(), "#ffcc99");
        assert_eq!("a0b0c0".parse::<Rgb>().unwrap(), Rgb(0xa0, 0xb0, 0xc0));
        assert!("#fff".parse::<Rgb>().is_err());
        assert!("#gggggg".parse::<Rgb>().is_err());
    }

    #[test]
    fn test_rgb_distance_ignores_alpha() {
        let key = Rgb(10, 20, 30);
        assert_eq!(key.distance([10, 20, 30, 0]), 0.0);
        assert!((key.distance([13, 24, 30, 255]) - 5.0).abs() < 1e-6);
    }

    #[test]
    fn test_bounding_box_from_points() {
        let bounds = BoundingBox::from_points(
            [[0.0, 1.0, 2.0], [-1.0, 3.0, 0.5]].into_iter(),
        )
        .unwrap();
        assert_eq!(bounds.min, [-1.0, 1.0, 0.5]);
        assert_eq!(bounds.max, [0.0, 3.0, 2.0]);
        assert!(BoundingBox::from_points(std::iter::empty()).is_none());
    }
}
