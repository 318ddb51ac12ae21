use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::ParseError;

/// Axial coordinates for a hex grid (q, r). The implicit cube coordinate is `s = -q - r`.
///
/// The textual form used by the move language is `<q>x<r>`, e.g. `-4x2`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Hex {
    pub q: i32,
    pub r: i32,
}

impl Hex {
    pub const DIRECTIONS: [Hex; 6] = [
        Hex { q: 1, r: 0 },  // East
        Hex { q: 1, r: -1 }, // Northeast
        Hex { q: 0, r: -1 }, // Northwest
        Hex { q: -1, r: 0 }, // West
        Hex { q: -1, r: 1 }, // Southwest
        Hex { q: 0, r: 1 },  // Southeast
    ];

    pub const fn new(q: i32, r: i32) -> Self {
        Self { q, r }
    }

    #[inline]
    pub const fn s(self) -> i32 {
        -self.q - self.r
    }

    pub fn neighbors(self) -> impl Iterator<Item = Hex> {
        Self::DIRECTIONS.into_iter().map(move |d| self + d)
    }

    #[inline]
    pub fn distance(self, other: Hex) -> i32 {
        ((self.q - other.q).abs() + (self.r - other.r).abs() + (self.s() - other.s()).abs()) / 2
    }

    /// Rotate 60° clockwise around the origin. Cube rotation `(x, y, z) -> (-z, -x, -y)`.
    #[inline]
    pub const fn rotated_cw(self) -> Hex {
        Hex {
            q: -self.r,
            r: -self.s(),
        }
    }

    /// Rotate `times` * 60° clockwise around `center`.
    pub fn rotated_around(self, center: Hex, times: u32) -> Hex {
        let mut rel = self - center;
        for _ in 0..(times % 6) {
            rel = rel.rotated_cw();
        }
        rel + center
    }
}

impl std::ops::Add for Hex {
    type Output = Hex;

    fn add(self, other: Hex) -> Hex {
        Hex {
            q: self.q + other.q,
            r: self.r + other.r,
        }
    }
}

impl std::ops::Sub for Hex {
    type Output = Hex;

    fn sub(self, other: Hex) -> Hex {
        Hex {
            q: self.q - other.q,
            r: self.r - other.r,
        }
    }
}

impl fmt::Display for Hex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.q, self.r)
    }
}

impl FromStr for Hex {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (q, r) = s
            .split_once('x')
            .ok_or_else(|| ParseError::Coordinate(s.to_string()))?;
        let q = q
            .parse::<i32>()
            .map_err(|_| ParseError::Coordinate(s.to_string()))?;
        let r = r
            .parse::<i32>()
            .map_err(|_| ParseError::Coordinate(s.to_string()))?;
        Ok(Hex { q, r })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_distance_matches_expected() {
        let a = Hex::new(0, 0);
        let b = Hex::new(3, -1);
        assert_eq!(a.distance(b), 3);
    }

    #[test]
    fn hex_neighbors_has_six_adjacent() {
        let center = Hex::new(0, 0);
        let neighbors: Vec<_> = center.neighbors().collect();
        assert_eq!(neighbors.len(), 6);
        assert!(neighbors.iter().all(|n| center.distance(*n) == 1));
    }

    #[test]
    fn rotation_preserves_distance_and_cycles() {
        let center = Hex::new(2, -1);
        let hex = Hex::new(4, 1);
        let mut seen = Vec::new();
        for times in 0..6 {
            let rotated = hex.rotated_around(center, times);
            assert_eq!(center.distance(rotated), center.distance(hex));
            seen.push(rotated);
        }
        assert_eq!(hex.rotated_around(center, 6), hex);
        seen.sort();
        seen.dedup();
        assert_eq!(seen.len(), 6);
    }

    #[test]
    fn coordinate_text_round_trips() {
        for text in ["0x0", "-4x2", "3x-5", "12x7"] {
            let hex: Hex = text.parse().expect("parse");
            assert_eq!(hex.to_string(), text);
        }
        assert!("4y2".parse::<Hex>().is_err());
        assert!("ax2".parse::<Hex>().is_err());
    }
}
