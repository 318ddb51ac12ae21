use std::collections::{BTreeMap, BTreeSet};

use concord_protocol::{
    AdvTechTile, Booster, Building, Condition, Event, Faction, FedToken, FederationInfo, Operator,
    PlanetType, PlayerId, ResearchTrack, Resource, Reward, TechTile,
};
use serde::{Deserialize, Serialize};

use crate::map::SpaceMap;
use crate::power::PowerBowls;
use crate::rules::CompiledRules;

pub const MAX_CREDITS: u32 = 30;
pub const MAX_ORE: u32 = 15;
pub const MAX_KNOWLEDGE: u32 = 15;
pub const STARTING_VP: u32 = 10;

/// The plain spendable pools. Power lives in [`PowerBowls`]; everything the
/// move language writes as `c o k q vp` lives here.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourcePool {
    pub credits: u32,
    pub ore: u32,
    pub knowledge: u32,
    pub qic: u32,
    pub vp: u32,
}

impl ResourcePool {
    /// Apply a signed amount, clamping at zero and at the printed storage
    /// caps (30 credits, 15 ore, 15 knowledge).
    pub fn apply(&mut self, kind: Resource, count: i32) {
        let slot = match kind {
            Resource::Credit => &mut self.credits,
            Resource::Ore => &mut self.ore,
            Resource::Knowledge => &mut self.knowledge,
            Resource::Qic => &mut self.qic,
            Resource::VictoryPoint => &mut self.vp,
            _ => return,
        };
        let cap = match kind {
            Resource::Credit => MAX_CREDITS,
            Resource::Ore => MAX_ORE,
            Resource::Knowledge => MAX_KNOWLEDGE,
            _ => u32::MAX,
        };
        if count >= 0 {
            *slot = slot.saturating_add(count as u32).min(cap);
        } else {
            *slot = slot.saturating_sub(count.unsigned_abs());
        }
    }

    pub fn amount(&self, kind: Resource) -> u32 {
        match kind {
            Resource::Credit => self.credits,
            Resource::Ore => self.ore,
            Resource::Knowledge => self.knowledge,
            Resource::Qic => self.qic,
            Resource::VictoryPoint => self.vp,
            _ => 0,
        }
    }
}

/// A standard tech tile in a player's display. Covered tiles (an advanced
/// tile sits on top) keep their identity but contribute nothing.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnedTechTile {
    pub tile: TechTile,
    #[serde(default)]
    pub covered: bool,
}

/// One seat at the table: everything that is the player's own rather than
/// the board's. Structure positions live on the map; the counts here are
/// kept in lockstep by the executor.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Player {
    pub id: PlayerId,
    pub faction: Faction,
    pub resources: ResourcePool,
    pub power: PowerBowls,
    pub research: BTreeMap<ResearchTrack, u8>,
    /// The event ledger. Everything that pays the player comes through here.
    pub events: Vec<Event>,
    /// Placed structures by kind (the map holds where).
    #[serde(default)]
    pub buildings: BTreeMap<Building, u32>,
    /// Gaiaformer stock unlocked by research.
    #[serde(default)]
    pub gaiaformers: u32,
    /// Gaiaformers parked in the gaia area (Bal T'aks conversion); they
    /// return in the next gaia phase.
    #[serde(default)]
    pub gaiaformers_in_gaia: u32,
    #[serde(default)]
    pub tech_tiles: Vec<OwnedTechTile>,
    #[serde(default)]
    pub adv_tech_tiles: Vec<AdvTechTile>,
    #[serde(default)]
    pub federations: Vec<FedToken>,
    /// Federations formed on the map (tokens can also arrive without one).
    #[serde(default)]
    pub federations_formed: u32,
    /// Federation tokens flipped gray by a level-5 research advance.
    #[serde(default)]
    pub used_federations: u32,
    #[serde(default)]
    pub booster: Option<Booster>,
    #[serde(default)]
    pub passed: bool,
    /// Victory points bid away at the faction auction.
    #[serde(default)]
    pub bid: u32,
    /// Satellites placed for federations (tokens gone from the bowls).
    #[serde(default)]
    pub satellites: u32,
    /// Candidate federations for the current map state, keyed by the
    /// satellite budget they were computed under. Rebuilt on demand; never
    /// snapshotted.
    #[serde(skip)]
    pub fed_cache: Option<FedCache>,
}

/// Cached federation candidates with the budget they are valid for.
#[derive(Clone, Debug)]
pub struct FedCache {
    pub budget: u32,
    pub candidates: Vec<FederationInfo>,
}

impl Player {
    pub fn new(rules: &CompiledRules, id: PlayerId, faction: Faction) -> Player {
        let board = rules.faction(faction);
        let mut research: BTreeMap<ResearchTrack, u8> =
            ResearchTrack::ALL.iter().map(|t| (*t, 0)).collect();
        for (track, level) in &board.start_research {
            research.insert(*track, *level);
        }

        let mut player = Player {
            id,
            faction,
            resources: ResourcePool {
                vp: STARTING_VP,
                ..ResourcePool::default()
            },
            power: PowerBowls::new(
                board.start_power.0,
                board.start_power.1,
                faction == Faction::Taklons,
            ),
            research,
            events: board.base_events.clone(),
            buildings: BTreeMap::new(),
            gaiaformers: 0,
            gaiaformers_in_gaia: 0,
            tech_tiles: Vec::new(),
            adv_tech_tiles: Vec::new(),
            federations: Vec::new(),
            federations_formed: 0,
            used_federations: 0,
            booster: None,
            passed: false,
            bid: 0,
            satellites: 0,
            fed_cache: None,
        };

        for reward in &board.start_resources {
            player.gain_plain(*reward);
        }
        // Starting track levels grant their level events up front. Only
        // plain rewards appear below level 2, so no subphase can open here.
        for (track, level) in board.start_research.clone() {
            for step in 1..=level {
                for event in &rules.track(track).events[step as usize] {
                    if event.operator == Operator::Once {
                        for reward in &event.rewards {
                            player.gain_plain(*reward);
                        }
                    } else {
                        player.events.push(event.clone());
                    }
                }
            }
        }
        player.gaiaformers = rules.gaiaformers(player.level(ResearchTrack::GaiaProject));
        player
    }

    pub fn level(&self, track: ResearchTrack) -> u8 {
        self.research.get(&track).copied().unwrap_or(0)
    }

    pub fn pi_built(&self) -> bool {
        self.building_count(Building::PlanetaryInstitute) > 0
    }

    /// Gleens take ore in place of QIC until their planetary institute
    /// stands.
    pub fn qic_locked(&self) -> bool {
        self.faction == Faction::Gleens && !self.pi_built()
    }

    /// Nevlas planetary institute: area-3 tokens are worth 2 power.
    pub fn power_doubled(&self) -> bool {
        self.faction == Faction::Nevlas && self.pi_built()
    }

    /// Itars pipe burned tokens into the gaia area instead of out of play.
    pub fn burns_to_gaia(&self) -> bool {
        self.faction == Faction::Itars
    }

    /// Apply one plain reward: the five pools, new tokens, or a direct
    /// charge. Deferred kinds (`up`, `tech`, `lp`...) are the executor's
    /// business and are ignored here.
    pub fn gain_plain(&mut self, reward: Reward) {
        let mut reward = reward;
        if reward.kind == Resource::Qic && reward.count > 0 && self.qic_locked() {
            reward.kind = Resource::Ore;
        }
        match reward.kind {
            Resource::Credit
            | Resource::Ore
            | Resource::Knowledge
            | Resource::Qic
            | Resource::VictoryPoint => self.resources.apply(reward.kind, reward.count),
            Resource::GainToken => {
                if reward.count > 0 {
                    self.power.gain(reward.count as u32);
                }
            }
            Resource::ChargePower => {
                if reward.count > 0 {
                    self.power.charge(reward.count as u32);
                }
            }
            _ => {}
        }
    }

    pub fn building_count(&self, building: Building) -> u32 {
        self.buildings.get(&building).copied().unwrap_or(0)
    }

    /// Structures still in stock.
    pub fn stock_left(&self, building: Building) -> u32 {
        let limit = match building {
            Building::Mine => 8,
            Building::TradingStation => 4,
            Building::ResearchLab => 3,
            Building::PlanetaryInstitute | Building::Academy1 | Building::Academy2 => 1,
            Building::LostPlanet => 1,
            Building::GaiaFormer => self.gaiaformers,
            // Ivits station supply outlasts the six rounds.
            Building::SpaceStation => u32::MAX,
        };
        limit.saturating_sub(self.building_count(building))
    }

    /// Gaiaformers neither deployed on the map nor parked in the gaia area.
    pub fn formers_in_stock(&self) -> u32 {
        self.stock_left(Building::GaiaFormer)
            .saturating_sub(self.gaiaformers_in_gaia)
    }

    pub fn add_building(&mut self, building: Building) {
        *self.buildings.entry(building).or_insert(0) += 1;
    }

    pub fn remove_building(&mut self, building: Building) {
        if let Some(count) = self.buildings.get_mut(&building) {
            *count = count.saturating_sub(1);
        }
    }

    /// Add a batch of events to the ledger (fresh `activated` state).
    pub fn add_events(&mut self, events: &[Event]) {
        for event in events {
            let mut event = event.clone();
            event.activated = false;
            self.events.push(event);
        }
    }

    /// Remove by exact spec + source identity. Returns whether anything was
    /// removed.
    pub fn remove_event(&mut self, event: &Event) -> bool {
        match self
            .events
            .iter()
            .position(|e| e.matches(&event.spec, event.source))
        {
            Some(index) => {
                self.events.remove(index);
                true
            }
            None => false,
        }
    }

    pub fn events_with(&self, operator: Operator) -> impl Iterator<Item = &Event> {
        self.events.iter().filter(move |e| e.operator == operator)
    }

    pub fn owns_tech(&self, tile: TechTile) -> bool {
        self.tech_tiles.iter().any(|t| t.tile == tile)
    }

    pub fn uncovered_tech(&self) -> impl Iterator<Item = TechTile> + '_ {
        self.tech_tiles
            .iter()
            .filter(|t| !t.covered)
            .map(|t| t.tile)
    }

    /// Federation tokens still green (available for level-5 advances).
    pub fn green_federations(&self) -> u32 {
        (self.federations.len() as u32).saturating_sub(self.used_federations)
    }

    /// Count a scaling condition against the current board.
    pub fn condition_count(&self, map: &SpaceMap, condition: Condition) -> u32 {
        match condition {
            Condition::Mine => {
                self.building_count(Building::Mine) + self.building_count(Building::LostPlanet)
            }
            Condition::TradingStation => self.building_count(Building::TradingStation),
            Condition::ResearchLab => self.building_count(Building::ResearchLab),
            Condition::BigBuilding => {
                self.building_count(Building::PlanetaryInstitute)
                    + self.building_count(Building::Academy1)
                    + self.building_count(Building::Academy2)
            }
            Condition::GaiaPlanet => {
                self.colonized(map, |hex| hex.planet == Some(PlanetType::Gaia))
            }
            Condition::PlanetTypes => {
                let mut types = BTreeSet::new();
                for (_, data) in map.planet_hexes() {
                    if self.occupies(data) {
                        if let Some(planet) = data.planet {
                            types.insert(planet);
                        }
                    }
                }
                types.len() as u32
            }
            Condition::Sector => {
                let mut sectors = BTreeSet::new();
                for (_, data) in map.planet_hexes() {
                    if self.occupies(data) {
                        sectors.insert(data.sector);
                    }
                }
                sectors.len() as u32
            }
            Condition::FedTokens => self.federations.len() as u32,
            // Trigger-only kinds never scale a payout.
            Condition::Step
            | Condition::Advance
            | Condition::MineOnGaia
            | Condition::Federation
            | Condition::NewPlanetType
            | Condition::GuestMine => 0,
        }
    }

    fn occupies(&self, hex: &crate::map::MapHex) -> bool {
        (hex.owner == Some(self.id)
            && hex.building.map(Building::is_colonizing).unwrap_or(false))
            || hex.additional_mine == Some(self.id)
    }

    fn colonized(&self, map: &SpaceMap, filter: impl Fn(&crate::map::MapHex) -> bool) -> u32 {
        map.planet_hexes()
            .filter(|(_, data)| self.occupies(data) && filter(data))
            .count() as u32
    }

    pub fn invalidate_federations(&mut self) {
        self.fed_cache = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::{load_rules, RulesSource};

    fn rules() -> CompiledRules {
        load_rules(RulesSource::Embedded).unwrap()
    }

    #[test]
    fn pools_respect_their_caps() {
        let mut pool = ResourcePool::default();
        pool.apply(Resource::Credit, 40);
        assert_eq!(pool.credits, MAX_CREDITS);
        pool.apply(Resource::Ore, 20);
        assert_eq!(pool.ore, MAX_ORE);
        pool.apply(Resource::Ore, -20);
        assert_eq!(pool.ore, 0);
        pool.apply(Resource::Qic, 3);
        assert_eq!(pool.amount(Resource::Qic), 3);
    }

    #[test]
    fn new_player_starts_from_the_faction_board() {
        let rules = rules();
        let player = Player::new(&rules, PlayerId(0), Faction::Terrans);
        assert_eq!(player.resources.credits, 15);
        assert_eq!(player.resources.ore, 4);
        assert_eq!(player.resources.knowledge, 3);
        assert_eq!(player.resources.qic, 1);
        assert_eq!(player.resources.vp, STARTING_VP);
        assert_eq!(player.power.area1(), 4);
        assert_eq!(player.power.area2(), 4);
        assert_eq!(player.level(ResearchTrack::GaiaProject), 1);
        assert_eq!(player.gaiaformers, 1);
    }

    #[test]
    fn taklons_bring_the_brainstone() {
        let rules = rules();
        let taklons = Player::new(&rules, PlayerId(0), Faction::Taklons);
        assert!(taklons.power.brainstone().is_some());
        let terrans = Player::new(&rules, PlayerId(1), Faction::Terrans);
        assert!(terrans.power.brainstone().is_none());
    }

    #[test]
    fn gleens_swap_qic_gains_for_ore() {
        let rules = rules();
        let mut player = Player::new(&rules, PlayerId(0), Faction::Gleens);
        // Their navigation start level pays its QIC as ore.
        assert_eq!(player.level(ResearchTrack::Navigation), 1);
        assert_eq!(player.resources.qic, 0);
        assert_eq!(player.resources.ore, 6);
        player.gain_plain(Reward::new(1, Resource::Qic));
        assert_eq!(player.resources.qic, 0);
        assert_eq!(player.resources.ore, 7);
        // Spending QIC is never substituted.
        player.gain_plain(Reward::new(-1, Resource::Qic));
        assert_eq!(player.resources.ore, 7);
    }

    #[test]
    fn starting_levels_add_income_events() {
        let rules = rules();
        let player = Player::new(&rules, PlayerId(0), Faction::Nevlas);
        // Base board income plus the science level-1 knowledge income.
        let incomes: Vec<&Event> = player.events_with(Operator::Income).collect();
        assert!(incomes.iter().any(|e| e.spec == "income 1k"));
        assert_eq!(player.level(ResearchTrack::Science), 1);
    }

    #[test]
    fn event_removal_is_by_identity() {
        let rules = rules();
        let mut player = Player::new(&rules, PlayerId(0), Faction::Terrans);
        let before = player.events.len();
        let base = player.events[0].clone();
        assert!(player.remove_event(&base));
        assert_eq!(player.events.len(), before - 1);
        assert!(!player.remove_event(&base));
    }

    #[test]
    fn stock_runs_out() {
        let rules = rules();
        let mut player = Player::new(&rules, PlayerId(0), Faction::Terrans);
        assert_eq!(player.stock_left(Building::Mine), 8);
        for _ in 0..8 {
            player.add_building(Building::Mine);
        }
        assert_eq!(player.stock_left(Building::Mine), 0);
        player.remove_building(Building::Mine);
        assert_eq!(player.stock_left(Building::Mine), 1);
        assert_eq!(player.stock_left(Building::PlanetaryInstitute), 1);
    }
}
