use std::collections::BTreeMap;

use concord_protocol::{Building, Hex, ParseError, PlanetType, PlayerId};
use serde::{Deserialize, Serialize};

use crate::rng::GameRng;
use crate::rules::{CompiledRules, SectorLayout};

/// One hex of the assembled map. The coordinate is the key in the arena;
/// players refer to hexes by coordinate, never by reference.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MapHex {
    /// Sector letter (position on the table) plus the printed 1..=19 index.
    pub sector: char,
    pub local_index: u8,
    #[serde(default)]
    pub planet: Option<PlanetType>,
    #[serde(default)]
    pub building: Option<Building>,
    #[serde(default)]
    pub owner: Option<PlayerId>,
    /// Second mine on an already-occupied planet (guest mines). Always a
    /// different player than `owner`.
    #[serde(default)]
    pub additional_mine: Option<PlayerId>,
    /// Players whose federation contains this hex.
    #[serde(default)]
    pub federations: Vec<PlayerId>,
    /// Players with a satellite here. Satellites of different players
    /// coexist on one hex.
    #[serde(default)]
    pub satellites: Vec<PlayerId>,
    #[serde(default)]
    pub ships: Vec<PlayerId>,
    /// Players who already delivered a trade token at this hex.
    #[serde(default)]
    pub trade_tokens: Vec<PlayerId>,
}

impl MapHex {
    pub fn has_structure_of(&self, player: PlayerId) -> bool {
        (self.owner == Some(player) && self.building.is_some())
            || self.additional_mine == Some(player)
    }

    pub fn in_federation_of(&self, player: PlayerId) -> bool {
        self.federations.contains(&player)
    }
}

/// The arena is persisted as an array of `(hex, data)` entries; a JSON
/// object cannot be keyed by a composite coordinate.
mod arena_entries {
    use serde::{Deserialize, Deserializer, Serializer};

    use super::{BTreeMap, Hex, MapHex};

    pub fn serialize<S: Serializer>(
        hexes: &BTreeMap<Hex, MapHex>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(hexes.iter())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<BTreeMap<Hex, MapHex>, D::Error> {
        let entries = Vec::<(Hex, MapHex)>::deserialize(deserializer)?;
        Ok(entries.into_iter().collect())
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SpaceMap {
    #[serde(with = "arena_entries")]
    pub hexes: BTreeMap<Hex, MapHex>,
}

impl SpaceMap {
    /// Assemble the map for the given player count: shuffle the sector tiles,
    /// deal them onto the fixed center positions with random rotations, and
    /// letter the positions A, B, C... in center order.
    pub fn assemble(rules: &CompiledRules, player_count: usize, rng: &mut GameRng) -> SpaceMap {
        let centers = if player_count <= 3 {
            &rules.centers_small
        } else {
            &rules.centers_large
        };
        let mut tile_order: Vec<usize> = (0..rules.sectors.len()).collect();
        rng.shuffle(&mut tile_order);

        let locals = SectorLayout::local_coordinates();
        let mut hexes = BTreeMap::new();
        for (position, center) in centers.iter().enumerate() {
            let layout = &rules.sectors[tile_order[position]];
            let rotation = rng.gen_index(6) as u32;
            let letter = (b'A' + position as u8) as char;
            for (i, local) in locals.iter().enumerate() {
                let hex = *center + local.rotated_around(Hex::new(0, 0), rotation);
                hexes.insert(
                    hex,
                    MapHex {
                        sector: letter,
                        local_index: i as u8 + 1,
                        planet: layout.planets[i],
                        building: None,
                        owner: None,
                        additional_mine: None,
                        federations: Vec::new(),
                        satellites: Vec::new(),
                        ships: Vec::new(),
                        trade_tokens: Vec::new(),
                    },
                );
            }
        }
        SpaceMap { hexes }
    }

    pub fn get(&self, hex: Hex) -> Option<&MapHex> {
        self.hexes.get(&hex)
    }

    pub fn get_mut(&mut self, hex: Hex) -> Option<&mut MapHex> {
        self.hexes.get_mut(&hex)
    }

    /// Resolve a location written either as axial text (`-4x2`) or as a
    /// sector code (`B7`).
    pub fn parse_location(&self, text: &str) -> Result<Hex, ParseError> {
        if text.contains('x') {
            let hex: Hex = text.parse()?;
            if self.hexes.contains_key(&hex) {
                return Ok(hex);
            }
            return Err(ParseError::Coordinate(text.to_string()));
        }
        let mut chars = text.chars();
        let letter = chars
            .next()
            .map(|c| c.to_ascii_uppercase())
            .ok_or_else(|| ParseError::Coordinate(text.to_string()))?;
        let index: u8 = chars
            .as_str()
            .parse()
            .map_err(|_| ParseError::Coordinate(text.to_string()))?;
        self.hexes
            .iter()
            .find(|(_, data)| data.sector == letter && data.local_index == index)
            .map(|(hex, _)| *hex)
            .ok_or_else(|| ParseError::Coordinate(text.to_string()))
    }

    /// In-map neighbors only; hexes outside every sector do not exist.
    pub fn neighbors(&self, hex: Hex) -> impl Iterator<Item = Hex> + '_ {
        hex.neighbors().filter(|n| self.hexes.contains_key(n))
    }

    /// Hexes within the given distance (excluding the center itself).
    pub fn within(&self, hex: Hex, distance: i32) -> impl Iterator<Item = Hex> + '_ {
        self.hexes
            .keys()
            .copied()
            .filter(move |other| *other != hex && hex.distance(*other) <= distance)
    }

    pub fn planet_hexes(&self) -> impl Iterator<Item = (Hex, &MapHex)> {
        self.hexes
            .iter()
            .filter(|(_, data)| data.planet.is_some())
            .map(|(hex, data)| (*hex, data))
    }

    /// Structures a new building at `hex` would draw leech offers from:
    /// every other player owning a structure within distance 2. Guest mines
    /// have no power value and draw nothing.
    pub fn leech_sources(&self, hex: Hex, builder: PlayerId) -> Vec<PlayerId> {
        let mut players = Vec::new();
        for other in self.within(hex, 2) {
            let Some(data) = self.get(other) else { continue };
            if let Some(candidate) = data.owner {
                if candidate != builder
                    && data.building.map(|b| b.base_value() > 0).unwrap_or(false)
                    && !players.contains(&candidate)
                {
                    players.push(candidate);
                }
            }
        }
        players
    }
}
