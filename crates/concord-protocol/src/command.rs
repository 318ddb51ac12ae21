use serde::{Deserialize, Serialize};

use crate::{
    AdvTechTile, BoardAction, Booster, Building, Faction, FedToken, Hex, PlayerId, PowerArea,
    ResearchTrack, Reward, SubPhase, TechTile, TechTilePos,
};

text_enum! {
    kind = "command";
    /// The first word of a sub-command in the move language.
    pub enum CommandName {
        Init => "init",
        ChooseFaction => "faction",
        Bid => "bid",
        Build => "build",
        ChooseBooster => "booster",
        Pass => "pass",
        UpgradeResearch => "up",
        ChooseTechTile => "tech",
        CoverTechTile => "cover",
        Special => "special",
        BoardAction => "action",
        Spend => "spend",
        Burn => "burn",
        Charge => "charge",
        Decline => "decline",
        FormFederation => "federation",
        ChooseFederationTile => "fedtile",
        BrainStone => "brainstone",
        PiSwap => "swap",
        DowngradeLab => "downgrade",
        MoveShip => "move",
        PlaceShip => "ship",
        /// Sentinel: a mandatory subphase produced zero legal options and the
        /// move must be undone. Never submitted as a move.
        DeadEnd => "dead-end",
    }
}

/// One legal action for one player, carrying enough embedded data to render a
/// menu entry and to validate a blind replay of the same choice.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AvailableCommand {
    pub name: CommandName,
    pub player: PlayerId,
    #[serde(default)]
    pub data: CommandData,
}

impl AvailableCommand {
    pub fn new(name: CommandName, player: PlayerId, data: CommandData) -> Self {
        Self { name, player, data }
    }

    pub fn bare(name: CommandName, player: PlayerId) -> Self {
        Self::new(name, player, CommandData::Empty)
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum CommandData {
    #[default]
    Empty,
    ChooseFaction {
        factions: Vec<Faction>,
    },
    Bid {
        options: Vec<BidOption>,
    },
    Build {
        options: Vec<BuildOption>,
    },
    ChooseBooster {
        boosters: Vec<Booster>,
    },
    Pass {
        /// Empty in the last round: the booster is kept, not exchanged.
        boosters: Vec<Booster>,
    },
    UpgradeResearch {
        tracks: Vec<ResearchTrack>,
    },
    ChooseTechTile {
        options: Vec<TechTileOption>,
    },
    CoverTechTile {
        tiles: Vec<TechTile>,
    },
    Special {
        options: Vec<SpecialOption>,
    },
    BoardAction {
        options: Vec<BoardActionOption>,
    },
    Spend {
        /// Atomic conversion rates; a submitted `spend` may combine multiples.
        conversions: Vec<Conversion>,
    },
    Burn {
        max: u32,
    },
    Leech {
        offers: Vec<ChargeOffer>,
    },
    FormFederation {
        federations: Vec<FederationInfo>,
        tiles: Vec<FedToken>,
    },
    ChooseFederationTile {
        tiles: Vec<FedToken>,
    },
    PlaceLostPlanet {
        hexes: Vec<Hex>,
    },
    PlaceShip {
        hexes: Vec<Hex>,
    },
    MoveShip {
        ships: Vec<ShipMove>,
    },
    BrainStone {
        areas: Vec<PowerArea>,
    },
    PiSwap {
        hexes: Vec<Hex>,
    },
    DowngradeLab {
        hexes: Vec<Hex>,
    },
    SpaceStation {
        hexes: Vec<Hex>,
    },
    DeadEnd {
        subphase: SubPhase,
    },
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BidOption {
    pub faction: Faction,
    /// Lowest admissible bid in victory points.
    pub min_bid: i32,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BuildOption {
    pub building: Building,
    pub hex: Hex,
    pub cost: Vec<Reward>,
    /// Terraforming steps this placement pays for (drives step triggers).
    #[serde(default)]
    pub steps: u32,
    /// Non-blocking caveats a UI should surface ("downgrades existing lab").
    #[serde(default)]
    pub warnings: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TechTileOption {
    pub pos: TechTilePos,
    #[serde(default)]
    pub standard: Option<TechTile>,
    #[serde(default)]
    pub advanced: Option<AdvTechTile>,
}

/// A special action, identified by its reward text (`special 4pw`).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SpecialOption {
    pub rewards: Vec<Reward>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BoardActionOption {
    pub action: BoardAction,
    pub cost: Vec<Reward>,
    pub rewards: Vec<Reward>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Conversion {
    pub cost: Vec<Reward>,
    pub income: Vec<Reward>,
}

/// One way of accepting a leech: the reward order matters for Taklons, whose
/// planetary institute makes "token then charge" and "charge then token"
/// different offers.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChargeOffer {
    pub rewards: Vec<Reward>,
    /// Victory points paid on acceptance (charge amount minus one).
    pub vp_cost: i32,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ShipMove {
    pub from: Hex,
    pub targets: Vec<Hex>,
}

/// One candidate federation produced by the search: the exact hex set plus the
/// counts the dominance relation and the satellite budget are checked against.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FederationInfo {
    pub hexes: Vec<Hex>,
    pub planets: u32,
    pub satellites: u32,
    pub new_satellites: u32,
    pub power_value: u32,
}

impl FederationInfo {
    /// Dominance: a candidate covering no more planets while spending no
    /// fewer new satellites than `other` is never worth presenting.
    pub fn outclassed_by(&self, other: &FederationInfo) -> bool {
        self.planets <= other.planets
            && self.new_satellites >= other.new_satellites
            && (self.planets < other.planets || self.new_satellites > other.new_satellites)
    }

    pub fn same_hexes(&self, other: &FederationInfo) -> bool {
        if self.hexes.len() != other.hexes.len() {
            return false;
        }
        let mut a = self.hexes.clone();
        let mut b = other.hexes.clone();
        a.sort();
        b.sort();
        a == b
    }
}
