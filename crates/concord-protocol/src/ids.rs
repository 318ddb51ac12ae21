use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::ParseError;

/// Player ID is a simple seat index (0-based, max 5 players).
///
/// The move language addresses players as `p1`..`p5` (1-based) or by their
/// chosen faction name once factions are picked.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlayerId(pub u8);

impl PlayerId {
    #[inline]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "p{}", self.0 + 1)
    }
}

impl FromStr for PlayerId {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits = s
            .strip_prefix('p')
            .ok_or_else(|| ParseError::Player(s.to_string()))?;
        let seat = digits
            .parse::<u8>()
            .map_err(|_| ParseError::Player(s.to_string()))?;
        if seat == 0 || seat > 5 {
            return Err(ParseError::Player(s.to_string()));
        }
        Ok(PlayerId(seat - 1))
    }
}
