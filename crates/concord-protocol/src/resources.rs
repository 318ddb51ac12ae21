use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors produced while reading the textual move language or any of its
/// embedded vocabularies (coordinates, resource lists, keywords).
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("unrecognized coordinate `{0}`")]
    Coordinate(String),
    #[error("unrecognized player `{0}`")]
    Player(String),
    #[error("unrecognized resource `{0}`")]
    Resource(String),
    #[error("unrecognized {kind} `{found}`")]
    Keyword { kind: &'static str, found: String },
    #[error("missing argument: {0}")]
    MissingArgument(&'static str),
    #[error("empty move")]
    Empty,
}

impl ParseError {
    pub fn keyword(kind: &'static str, found: &str) -> Self {
        ParseError::Keyword {
            kind,
            found: found.to_string(),
        }
    }
}

/// Every kind of value a cost or an income can be denominated in.
///
/// The plain economy kinds (`c o k q vp`) are pools on the player; the power
/// kinds move tokens between areas; the remainder are deferred effects that
/// the executor resolves into a subphase when they are gained.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Resource {
    Credit,
    Ore,
    Knowledge,
    Qic,
    VictoryPoint,
    /// `pw`: charge as income, spend (area 3 -> area 1) as cost.
    ChargePower,
    /// `t`: a new power token in area 1.
    GainToken,
    /// `t3`: a token taken out of area 3 (conversion cost, Nevlas).
    TokenArea3,
    /// `gf`: a gaiaformer added to (or spent from) the player's stock.
    GaiaFormer,
    /// `up`: one free research advance on a track of the player's choice.
    AdvanceResearch,
    /// `up-lowest`: one free advance on the player's lowest track (Bescods).
    UpgradeLowest,
    /// `tech`: opens the tech-tile choice.
    TechTile,
    /// `lp`: opens the lost-planet placement.
    LostPlanet,
    /// `sp`: opens the space-station placement (Ivits).
    SpaceStation,
    /// `fed`: a federation token chosen from the pool.
    FederationToken,
    /// `rescore`: re-score one owned federation token.
    RescoreFederation,
    /// `dig`: one temporary terraforming step for the current turn.
    TemporaryStep,
    /// `range`: temporary range for the current turn.
    TemporaryRange,
    /// `ship`: a trade ship placed on one of the player's planets.
    Ship,
    /// `swap-pi`: opens the planetary-institute swap (Ambas).
    PiSwap,
    /// `down-lab`: opens the lab downgrade (Firaks).
    DowngradeLab,
}

impl Resource {
    pub const fn code(self) -> &'static str {
        match self {
            Resource::Credit => "c",
            Resource::Ore => "o",
            Resource::Knowledge => "k",
            Resource::Qic => "q",
            Resource::VictoryPoint => "vp",
            Resource::ChargePower => "pw",
            Resource::GainToken => "t",
            Resource::TokenArea3 => "t3",
            Resource::GaiaFormer => "gf",
            Resource::AdvanceResearch => "up",
            Resource::UpgradeLowest => "up-lowest",
            Resource::TechTile => "tech",
            Resource::LostPlanet => "lp",
            Resource::SpaceStation => "sp",
            Resource::FederationToken => "fed",
            Resource::RescoreFederation => "rescore",
            Resource::TemporaryStep => "dig",
            Resource::TemporaryRange => "range",
            Resource::Ship => "ship",
            Resource::PiSwap => "swap-pi",
            Resource::DowngradeLab => "down-lab",
        }
    }

    const ALL: [Resource; 21] = [
        Resource::Credit,
        Resource::Ore,
        Resource::Knowledge,
        Resource::Qic,
        Resource::VictoryPoint,
        Resource::ChargePower,
        Resource::GainToken,
        Resource::TokenArea3,
        Resource::GaiaFormer,
        Resource::AdvanceResearch,
        Resource::UpgradeLowest,
        Resource::TechTile,
        Resource::LostPlanet,
        Resource::SpaceStation,
        Resource::FederationToken,
        Resource::RescoreFederation,
        Resource::TemporaryStep,
        Resource::TemporaryRange,
        Resource::Ship,
        Resource::PiSwap,
        Resource::DowngradeLab,
    ];
}

impl FromStr for Resource {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Resource::ALL
            .into_iter()
            .find(|r| r.code() == s)
            .ok_or_else(|| ParseError::Resource(s.to_string()))
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// A signed amount of one resource kind. Every cost and income in the
/// engine is denominated in lists of these.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Reward {
    pub count: i32,
    pub kind: Resource,
}

impl Reward {
    pub const fn new(count: i32, kind: Resource) -> Self {
        Self { count, kind }
    }

    pub fn negated(self) -> Self {
        Self {
            count: -self.count,
            kind: self.kind,
        }
    }

    /// Parse a comma-joined reward list such as `4pw,1t`. An omitted count
    /// means 1 (`dig` == `1dig`); an empty string or `~` is the empty list.
    pub fn parse_list(s: &str) -> Result<Vec<Reward>, ParseError> {
        let s = s.trim();
        if s.is_empty() || s == "~" {
            return Ok(Vec::new());
        }
        s.split(',')
            .map(|token| token.trim().parse::<Reward>())
            .collect()
    }

    /// Render a reward list back into its `4pw,1t` form. The empty list is `~`.
    pub fn format_list(rewards: &[Reward]) -> String {
        if rewards.is_empty() {
            return "~".to_string();
        }
        rewards
            .iter()
            .map(Reward::to_string)
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Merge duplicates by kind, drop zero entries, and return in a stable
    /// kind order.
    pub fn merge(rewards: impl IntoIterator<Item = Reward>) -> Vec<Reward> {
        let mut totals: std::collections::BTreeMap<Resource, i32> = std::collections::BTreeMap::new();
        for reward in rewards {
            *totals.entry(reward.kind).or_insert(0) += reward.count;
        }
        totals
            .into_iter()
            .filter(|(_, count)| *count != 0)
            .map(|(kind, count)| Reward::new(count, kind))
            .collect()
    }

    pub fn negate(rewards: &[Reward]) -> Vec<Reward> {
        rewards.iter().map(|r| r.negated()).collect()
    }

    /// Affordability subset check: does `pool` contain at least `cost`,
    /// kind for kind? Both sides are interpreted as positive amounts.
    pub fn includes(pool: &[Reward], cost: &[Reward]) -> bool {
        Reward::merge(cost.iter().copied()).iter().all(|needed| {
            let have: i32 = pool
                .iter()
                .filter(|r| r.kind == needed.kind)
                .map(|r| r.count)
                .sum();
            have >= needed.count
        })
    }
}

impl fmt::Display for Reward {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.count, self.kind)
    }
}

impl FromStr for Reward {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let split = s
            .char_indices()
            .find(|(_, ch)| !ch.is_ascii_digit() && *ch != '-' && *ch != '+')
            .map(|(i, _)| i)
            .unwrap_or(s.len());
        let (digits, code) = s.split_at(split);
        if code.is_empty() {
            return Err(ParseError::Resource(s.to_string()));
        }
        let count = if digits.is_empty() || digits == "+" {
            1
        } else {
            digits
                .parse::<i32>()
                .map_err(|_| ParseError::Resource(s.to_string()))?
        };
        let kind = code.parse::<Resource>()?;
        Ok(Reward::new(count, kind))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_compact_lists() {
        let rewards = Reward::parse_list("4pw,1t").unwrap();
        assert_eq!(
            rewards,
            vec![
                Reward::new(4, Resource::ChargePower),
                Reward::new(1, Resource::GainToken)
            ]
        );
        assert_eq!(Reward::parse_list("~").unwrap(), Vec::new());
        assert_eq!(Reward::parse_list("").unwrap(), Vec::new());
        assert_eq!(
            Reward::parse_list("dig").unwrap(),
            vec![Reward::new(1, Resource::TemporaryStep)]
        );
        assert_eq!(
            "-2o".parse::<Reward>().unwrap(),
            Reward::new(-2, Resource::Ore)
        );
        assert!(Reward::parse_list("4zz").is_err());
        assert!("4".parse::<Reward>().is_err());
    }

    #[test]
    fn display_round_trips_through_parse() {
        let rewards = Reward::parse_list("3k,2vp,1swap-pi,1up-lowest").unwrap();
        let text = Reward::format_list(&rewards);
        assert_eq!(Reward::parse_list(&text).unwrap(), rewards);
    }

    #[test]
    fn merge_sums_and_drops_zeroes() {
        let merged = Reward::merge(
            Reward::parse_list("2c,1o,3c,-1o")
                .unwrap()
                .into_iter(),
        );
        assert_eq!(merged, vec![Reward::new(5, Resource::Credit)]);
    }

    #[test]
    fn includes_is_a_subset_check() {
        let pool = Reward::parse_list("4c,2o,1q").unwrap();
        assert!(Reward::includes(&pool, &Reward::parse_list("2c,1o").unwrap()));
        assert!(Reward::includes(&pool, &Reward::parse_list("1c,1c").unwrap()));
        assert!(!Reward::includes(&pool, &Reward::parse_list("5c").unwrap()));
        assert!(!Reward::includes(&pool, &Reward::parse_list("1k").unwrap()));
    }
}
