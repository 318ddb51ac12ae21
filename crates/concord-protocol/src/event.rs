use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{
    AdvTechTile, BoardAction, Booster, ParseError, ResearchTrack, Reward, ScoringTile, TechTile,
};

text_enum! {
    kind = "event operator";
    pub enum Operator {
        /// Paid out immediately when the event is gained.
        Once => "once",
        /// Paid out during the round income phase.
        Income => "income",
        /// Paid out each time the condition occurs.
        Trigger => "trigger",
        /// A special action the owner may take once per round.
        Activate => "activate",
        /// Paid out when the owner passes.
        Pass => "pass",
    }
}

text_enum! {
    kind = "event condition";
    /// Conditions double as trigger kinds (`trigger ... on step`) and as
    /// countable quantities (`pass 1vp per mine`).
    pub enum Condition {
        Mine => "mine",
        TradingStation => "ts",
        ResearchLab => "lab",
        BigBuilding => "big-building",
        GaiaPlanet => "gaia-planet",
        PlanetTypes => "planet-type",
        Sector => "sector",
        FedTokens => "fed",
        Step => "step",
        Advance => "advance",
        MineOnGaia => "gaia-mine",
        Federation => "federation",
        NewPlanetType => "new-type",
        GuestMine => "guest-mine",
    }
}

/// Where an event was loaded from. Removal is by exact spec + source match,
/// so two identical specs from different tiles stay independent.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum EventSource {
    FactionBoard,
    Research { track: ResearchTrack, level: u8 },
    Tech { tile: TechTile },
    AdvTech { tile: AdvTechTile },
    Booster { tile: Booster },
    Scoring { tile: ScoringTile },
    Board { action: BoardAction },
}

/// One entry of a player's event ledger, parsed from its textual spec.
///
/// The text grammar is `<operator> <rewards>` with an optional
/// `per <condition>` (count scaling) or `on <condition>` (trigger kind)
/// suffix: `income 1o,1pw`, `pass 1vp per mine`, `trigger 2vp on step`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub spec: String,
    pub operator: Operator,
    #[serde(default)]
    pub condition: Option<Condition>,
    pub rewards: Vec<Reward>,
    pub source: EventSource,
    /// For `activate` events: already used this round.
    #[serde(default)]
    pub activated: bool,
}

impl Event {
    pub fn parse(spec: &str, source: EventSource) -> Result<Event, ParseError> {
        let mut words = spec.split_whitespace();
        let operator: Operator = words
            .next()
            .ok_or(ParseError::MissingArgument("event operator"))?
            .parse()?;
        let rewards = Reward::parse_list(
            words
                .next()
                .ok_or(ParseError::MissingArgument("event rewards"))?,
        )?;
        let condition = match words.next() {
            None => None,
            Some(link @ ("per" | "on")) => {
                let cond: Condition = words
                    .next()
                    .ok_or(ParseError::MissingArgument("event condition"))?
                    .parse()?;
                let trigger_link = link == "on";
                if trigger_link != (operator == Operator::Trigger) {
                    return Err(ParseError::keyword("event spec", spec));
                }
                Some(cond)
            }
            Some(other) => return Err(ParseError::keyword("event spec", other)),
        };
        if operator == Operator::Trigger && condition.is_none() {
            return Err(ParseError::keyword("event spec", spec));
        }
        if words.next().is_some() {
            return Err(ParseError::keyword("event spec", spec));
        }
        Ok(Event {
            spec: spec.to_string(),
            operator,
            condition,
            rewards,
            source,
            activated: false,
        })
    }

    /// Exact-removal identity: same text and same origin.
    pub fn matches(&self, spec: &str, source: EventSource) -> bool {
        self.spec == spec && self.source == source
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.spec)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Resource;

    fn src() -> EventSource {
        EventSource::Tech {
            tile: TechTile::Tech5,
        }
    }

    #[test]
    fn parses_income_spec() {
        let event = Event::parse("income 1o,1pw", src()).unwrap();
        assert_eq!(event.operator, Operator::Income);
        assert_eq!(event.condition, None);
        assert_eq!(
            event.rewards,
            vec![
                Reward::new(1, Resource::Ore),
                Reward::new(1, Resource::ChargePower)
            ]
        );
    }

    #[test]
    fn parses_scaled_pass_spec() {
        let event = Event::parse("pass 1vp per mine", src()).unwrap();
        assert_eq!(event.operator, Operator::Pass);
        assert_eq!(event.condition, Some(Condition::Mine));
    }

    #[test]
    fn parses_trigger_spec() {
        let event = Event::parse("trigger 3vp on gaia-mine", src()).unwrap();
        assert_eq!(event.operator, Operator::Trigger);
        assert_eq!(event.condition, Some(Condition::MineOnGaia));
    }

    /// `per` scales any non-trigger payout; the tile data relies on it for
    /// `once` as well as `pass`.
    #[test]
    fn count_scaling_works_for_every_payout_operator() {
        let event = Event::parse("once 1k per planet-type", src()).unwrap();
        assert_eq!(event.operator, Operator::Once);
        assert_eq!(event.condition, Some(Condition::PlanetTypes));
        let event = Event::parse("income 1c per mine", src()).unwrap();
        assert_eq!(event.operator, Operator::Income);
        assert_eq!(event.condition, Some(Condition::Mine));
    }

    #[test]
    fn rejects_malformed_specs() {
        assert!(Event::parse("trigger 3vp", src()).is_err());
        assert!(Event::parse("trigger 3vp per mine", src()).is_err());
        assert!(Event::parse("income 1o per nothing", src()).is_err());
        assert!(Event::parse("pass 1vp on mine", src()).is_err());
        assert!(Event::parse("sometimes 1vp", src()).is_err());
        assert!(Event::parse("income 1o,1pw extra", src()).is_err());
    }

    #[test]
    fn removal_matches_on_spec_and_source() {
        let event = Event::parse("income 4c", src()).unwrap();
        assert!(event.matches("income 4c", src()));
        assert!(!event.matches("income 4c", EventSource::FactionBoard));
        assert!(!event.matches("income 3c", src()));
    }
}
