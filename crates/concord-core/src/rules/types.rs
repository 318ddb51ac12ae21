use std::collections::BTreeMap;

use concord_protocol::{
    AdvTechTile, BoardAction, Booster, Event, EventSource, Faction, FedToken, FinalTile, Hex,
    Operator, PlanetType, ResearchTrack, Reward, ScoringTile, TechTile,
};
use serde::Deserialize;

use crate::error::RulesError;

/// All static game data, compiled once from the YAML sources and never
/// mutated afterwards. Players copy events out of here; they never point
/// back in.
#[derive(Debug, Clone)]
pub struct CompiledRules {
    pub factions: BTreeMap<Faction, FactionBoard>,
    pub research: BTreeMap<ResearchTrack, TrackData>,
    pub tech_tiles: BTreeMap<TechTile, Vec<Event>>,
    pub adv_tech_tiles: BTreeMap<AdvTechTile, Vec<Event>>,
    pub boosters: BTreeMap<Booster, Vec<Event>>,
    pub fed_tokens: BTreeMap<FedToken, FedTokenData>,
    /// Minimum combined power value of a federation.
    pub fed_threshold: u32,
    pub round_scoring: BTreeMap<ScoringTile, Event>,
    /// Final scoring tile -> neutral baseline count for 2-player games.
    pub final_scoring: BTreeMap<FinalTile, u32>,
    pub board_actions: BTreeMap<BoardAction, BoardActionData>,
    pub sectors: Vec<SectorLayout>,
    /// Sector center coordinates for 2-3 players and for 4-5 players.
    pub centers_small: Vec<Hex>,
    pub centers_large: Vec<Hex>,
}

impl CompiledRules {
    pub fn faction(&self, faction: Faction) -> &FactionBoard {
        &self.factions[&faction]
    }

    pub fn track(&self, track: ResearchTrack) -> &TrackData {
        &self.research[&track]
    }

    /// Ore cost of one terraforming step at the given terraforming level.
    pub fn terraform_cost(&self, level: u8) -> u32 {
        self.track(ResearchTrack::Terraforming)
            .terraform_cost
            .as_ref()
            .map(|costs| costs[level as usize])
            .unwrap_or(3)
    }

    /// Base build range at the given navigation level.
    pub fn nav_range(&self, level: u8) -> u32 {
        self.track(ResearchTrack::Navigation)
            .range
            .as_ref()
            .map(|ranges| ranges[level as usize])
            .unwrap_or(1)
    }

    /// Gaiaformer stock unlocked at the given gaia-project level.
    pub fn gaiaformers(&self, level: u8) -> u32 {
        self.track(ResearchTrack::GaiaProject)
            .gaiaformers
            .as_ref()
            .map(|counts| counts[level as usize])
            .unwrap_or(0)
    }

    /// Power tokens one gaiaformer costs at the given gaia-project level.
    pub fn gaiaformer_cost(&self, level: u8) -> u32 {
        self.track(ResearchTrack::GaiaProject)
            .former_cost
            .as_ref()
            .map(|costs| costs[level as usize])
            .unwrap_or(6)
    }
}

/// One faction's printed board: starting position plus the income uncovered
/// by each building slot.
#[derive(Debug, Clone)]
pub struct FactionBoard {
    pub faction: Faction,
    pub home: PlanetType,
    pub start_resources: Vec<Reward>,
    /// Power tokens starting in areas 1 and 2.
    pub start_power: (u32, u32),
    pub start_research: BTreeMap<ResearchTrack, u8>,
    /// Always-on board events (base income).
    pub base_events: Vec<Event>,
    /// Income uncovered by the n-th mine; a `None` slot uncovers nothing.
    pub mine_income: Vec<Option<Event>>,
    pub trading_station_income: Vec<Event>,
    pub research_lab_income: Vec<Event>,
    pub planetary_institute_income: Event,
    pub academy1_event: Event,
    pub academy2_event: Event,
    /// Extra events gained when the planetary institute is built.
    pub pi_events: Vec<Event>,
}

#[derive(Debug, Clone)]
pub struct TrackData {
    /// Events granted on reaching each level, 0..=5.
    pub events: Vec<Vec<Event>>,
    pub terraform_cost: Option<Vec<u32>>,
    pub range: Option<Vec<u32>>,
    pub gaiaformers: Option<Vec<u32>>,
    pub former_cost: Option<Vec<u32>>,
}

#[derive(Debug, Clone)]
pub struct FedTokenData {
    pub rewards: Vec<Reward>,
    /// Copies in the supply pool (0 for tokens outside the pool).
    pub count: u32,
}

#[derive(Debug, Clone)]
pub struct BoardActionData {
    pub cost: Vec<Reward>,
    /// Resolved immediately when taken; always `once` events.
    pub effects: Vec<Event>,
}

/// One sector tile: 19 hexes in row order (rows of 3, 4, 5, 4, 3).
#[derive(Debug, Clone)]
pub struct SectorLayout {
    pub name: String,
    pub planets: Vec<Option<PlanetType>>,
}

impl SectorLayout {
    /// Local axial coordinates of the 19 hexes, in the same row order as the
    /// layout string.
    pub fn local_coordinates() -> Vec<Hex> {
        let mut out = Vec::with_capacity(19);
        for r in -2_i32..=2 {
            for q in -2_i32..=2 {
                let s = -q - r;
                if q.abs() <= 2 && r.abs() <= 2 && s.abs() <= 2 {
                    out.push(Hex::new(q, r));
                }
            }
        }
        out
    }
}

// ---------------------------------------------------------------------------
// Raw YAML shapes
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct RawFaction {
    pub start: String,
    pub power: RawPower,
    #[serde(default)]
    pub research: BTreeMap<ResearchTrack, u8>,
    pub board: RawBoard,
    #[serde(default)]
    pub pi_events: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct RawPower {
    pub area1: u32,
    pub area2: u32,
}

#[derive(Debug, Deserialize)]
pub struct RawBoard {
    #[serde(default)]
    pub base: Vec<String>,
    pub mine: Vec<Option<String>>,
    pub trading_station: Vec<String>,
    pub research_lab: Vec<String>,
    pub planetary_institute: String,
    pub academy1: String,
    pub academy2: String,
}

impl RawFaction {
    pub fn compile(self, faction: Faction) -> Result<FactionBoard, RulesError> {
        let src = EventSource::FactionBoard;
        if self.board.mine.len() != 8 {
            return Err(RulesError::Invalid(format!(
                "{faction}: expected 8 mine slots, found {}",
                self.board.mine.len()
            )));
        }
        if self.board.trading_station.len() != 4 || self.board.research_lab.len() != 3 {
            return Err(RulesError::Invalid(format!(
                "{faction}: wrong trading-station/research-lab slot count"
            )));
        }
        if let Some((track, level)) = self.research.iter().find(|(_, level)| **level > 5) {
            return Err(RulesError::Invalid(format!(
                "{faction}: starting level {level} on {track} is out of range"
            )));
        }
        let mine_income = self
            .board
            .mine
            .iter()
            .map(|slot| slot.as_deref().map(|s| Event::parse(s, src)).transpose())
            .collect::<Result<_, _>>()?;
        Ok(FactionBoard {
            faction,
            home: faction.home_planet(),
            start_resources: Reward::parse_list(&self.start)?,
            start_power: (self.power.area1, self.power.area2),
            start_research: self.research,
            base_events: parse_events(&self.board.base, src)?,
            mine_income,
            trading_station_income: parse_events(&self.board.trading_station, src)?,
            research_lab_income: parse_events(&self.board.research_lab, src)?,
            planetary_institute_income: Event::parse(&self.board.planetary_institute, src)?,
            academy1_event: Event::parse(&self.board.academy1, src)?,
            academy2_event: Event::parse(&self.board.academy2, src)?,
            pi_events: parse_events(&self.pi_events, src)?,
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct RawTrack {
    pub events: Vec<Vec<String>>,
    #[serde(default)]
    pub terraform_cost: Option<Vec<u32>>,
    #[serde(default)]
    pub range: Option<Vec<u32>>,
    #[serde(default)]
    pub gaiaformers: Option<Vec<u32>>,
    #[serde(default)]
    pub former_cost: Option<Vec<u32>>,
}

impl RawTrack {
    pub fn compile(self, track: ResearchTrack) -> Result<TrackData, RulesError> {
        let levels = 6;
        if self.events.len() != levels {
            return Err(RulesError::Invalid(format!(
                "{track}: expected {levels} event levels, found {}",
                self.events.len()
            )));
        }
        for curve in [&self.terraform_cost, &self.range, &self.gaiaformers, &self.former_cost]
            .into_iter()
            .flatten()
        {
            if curve.len() != levels {
                return Err(RulesError::Invalid(format!(
                    "{track}: numeric curve must have {levels} entries"
                )));
            }
        }
        let events = self
            .events
            .iter()
            .enumerate()
            .map(|(level, specs)| {
                parse_events(
                    specs,
                    EventSource::Research {
                        track,
                        level: level as u8,
                    },
                )
            })
            .collect::<Result<_, _>>()?;
        Ok(TrackData {
            events,
            terraform_cost: self.terraform_cost,
            range: self.range,
            gaiaformers: self.gaiaformers,
            former_cost: self.former_cost,
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct RawTechTiles {
    pub standard: BTreeMap<TechTile, Vec<String>>,
    pub advanced: BTreeMap<AdvTechTile, Vec<String>>,
}

#[derive(Debug, Deserialize)]
pub struct RawFederations {
    pub tokens: BTreeMap<FedToken, RawFedToken>,
    pub threshold: u32,
}

#[derive(Debug, Deserialize)]
pub struct RawFedToken {
    pub rewards: String,
    pub count: u32,
}

#[derive(Debug, Deserialize)]
pub struct RawScoring {
    pub round: BTreeMap<ScoringTile, String>,
    #[serde(rename = "final")]
    pub final_tiles: BTreeMap<FinalTile, RawFinalTile>,
}

#[derive(Debug, Deserialize)]
pub struct RawFinalTile {
    pub neutral: u32,
}

#[derive(Debug, Deserialize)]
pub struct RawBoardAction {
    pub cost: String,
    pub effects: Vec<String>,
}

impl RawBoardAction {
    pub fn compile(self, action: BoardAction) -> Result<BoardActionData, RulesError> {
        let effects = parse_events(&self.effects, EventSource::Board { action })?;
        if let Some(event) = effects.iter().find(|e| e.operator != Operator::Once) {
            return Err(RulesError::Invalid(format!(
                "{action}: board action effect `{event}` must be a once event"
            )));
        }
        Ok(BoardActionData {
            cost: Reward::parse_list(&self.cost)?,
            effects,
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct RawSectors {
    pub sectors: Vec<RawSector>,
    pub centers_small: Vec<String>,
    pub centers_large: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct RawSector {
    pub name: String,
    pub layout: String,
}

impl RawSector {
    pub fn compile(self) -> Result<SectorLayout, RulesError> {
        let mut planets = Vec::with_capacity(19);
        for ch in self.layout.chars() {
            match ch {
                ',' | ' ' => continue,
                'e' => planets.push(None),
                other => {
                    let planet: PlanetType = other.to_string().parse()?;
                    planets.push(Some(planet));
                }
            }
        }
        if planets.len() != 19 {
            return Err(RulesError::Invalid(format!(
                "sector {}: expected 19 hexes, found {}",
                self.name,
                planets.len()
            )));
        }
        Ok(SectorLayout {
            name: self.name,
            planets,
        })
    }
}

fn parse_events(specs: &[String], source: EventSource) -> Result<Vec<Event>, RulesError> {
    specs
        .iter()
        .map(|spec| Ok(Event::parse(spec, source)?))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sector_local_coordinates_cover_a_radius_two_hex() {
        let coords = SectorLayout::local_coordinates();
        assert_eq!(coords.len(), 19);
        assert_eq!(coords[0], Hex::new(0, -2));
        assert_eq!(coords[9], Hex::new(0, 0));
        assert_eq!(coords[18], Hex::new(0, 2));
        assert!(coords.iter().all(|h| Hex::new(0, 0).distance(*h) <= 2));
    }

    #[test]
    fn sector_layout_rejects_wrong_length() {
        let raw = RawSector {
            name: "bad".to_string(),
            layout: "eee,eeee".to_string(),
        };
        assert!(matches!(raw.compile(), Err(RulesError::Invalid(_))));
    }
}
