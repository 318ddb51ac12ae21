use std::collections::BTreeMap;

use concord_protocol::{
    Building, Condition, Faction, FinalTile, Phase, PlayerId, ResearchTrack, Resource,
};
use serde::Serialize;

use crate::engine::GameState;
use crate::player::Player;
use crate::rules::CompiledRules;

/// Place values for the two final scoring tiles: first takes 18, second 12,
/// third 6. Ties pool the tied places and split the floor.
const PLACE_VP: [u32; 5] = [18, 12, 6, 0, 0];

/// One row of the final table.
#[derive(Clone, Debug, Serialize)]
pub struct Standing {
    pub player: PlayerId,
    pub faction: Faction,
    /// Points scored during play, before the end-of-game additions.
    pub game_vp: u32,
    pub final_tile_vp: u32,
    pub research_vp: u32,
    pub resource_vp: u32,
    pub total: u32,
}

/// Bank the end-of-game points into the players' pools and freeze the game.
pub(super) fn finish_game(rules: &CompiledRules, state: &mut GameState) {
    let standings = final_standings(rules, state);
    for standing in &standings {
        let bonus = standing.final_tile_vp + standing.research_vp + standing.resource_vp;
        state
            .player_mut(standing.player)
            .resources
            .apply(Resource::VictoryPoint, bonus as i32);
    }
    state.set_phase(Phase::EndGame);
    state.current = None;
    state.subphases.clear();
}

/// The final table, highest total first. Before the game ends this is a
/// projection from the current state; afterwards it reproduces the banked
/// totals.
pub fn final_standings(rules: &CompiledRules, state: &GameState) -> Vec<Standing> {
    let mut tile_vp: BTreeMap<PlayerId, u32> = BTreeMap::new();
    for tile in &state.pools.final_scoring {
        for (id, vp) in tile_rankings(rules, state, *tile) {
            *tile_vp.entry(id).or_default() += vp;
        }
    }
    let mut out = Vec::new();
    for player in &state.players {
        let final_tile_vp = tile_vp.get(&player.id).copied().unwrap_or(0);
        let research_vp = research_vp(player);
        let resource_vp = (player.resources.credits
            + player.resources.ore
            + player.resources.knowledge
            + player.resources.qic)
            / 3;
        let bonus = final_tile_vp + research_vp + resource_vp;
        let game_vp = if state.phase == Phase::EndGame {
            player.resources.vp.saturating_sub(bonus)
        } else {
            player.resources.vp
        };
        out.push(Standing {
            player: player.id,
            faction: player.faction,
            game_vp,
            final_tile_vp,
            research_vp,
            resource_vp,
            total: game_vp + bonus,
        });
    }
    out.sort_by(|a, b| b.total.cmp(&a.total).then(a.player.cmp(&b.player)));
    out
}

/// Rank everyone on one tile's count. Two-player games add a neutral third
/// entry at the tile's printed count; the neutral takes its place's points
/// out of the pool without receiving them.
fn tile_rankings(
    rules: &CompiledRules,
    state: &GameState,
    tile: FinalTile,
) -> Vec<(PlayerId, u32)> {
    let mut counts: Vec<(Option<PlayerId>, u32)> = state
        .players
        .iter()
        .map(|p| (Some(p.id), final_count(state, p, tile)))
        .collect();
    if state.player_count == 2 {
        let neutral = rules.final_scoring.get(&tile).copied().unwrap_or(0);
        counts.push((None, neutral));
    }
    counts.sort_by(|a, b| b.1.cmp(&a.1));
    let mut out = Vec::new();
    let mut place = 0;
    while place < counts.len() {
        let value = counts[place].1;
        let tied = counts[place..]
            .iter()
            .take_while(|(_, count)| *count == value)
            .count();
        let pool: u32 = (place..place + tied)
            .map(|i| PLACE_VP.get(i).copied().unwrap_or(0))
            .sum();
        let share = pool / tied as u32;
        for (id, _) in &counts[place..place + tied] {
            if let Some(id) = id {
                out.push((*id, share));
            }
        }
        place += tied;
    }
    out
}

fn final_count(state: &GameState, player: &Player, tile: FinalTile) -> u32 {
    match tile {
        FinalTile::Structure => structures(state, player, false),
        FinalTile::StructureFed => structures(state, player, true),
        FinalTile::PlanetTypes => player.condition_count(&state.map, Condition::PlanetTypes),
        FinalTile::Gaia => player.condition_count(&state.map, Condition::GaiaPlanet),
        FinalTile::Sector => player.condition_count(&state.map, Condition::Sector),
        FinalTile::Satellite => satellites(state, player),
    }
}

/// Structures standing on planets, guest mines included. `fed_only`
/// restricts the count to hexes inside one of the player's federations.
fn structures(state: &GameState, player: &Player, fed_only: bool) -> u32 {
    let mut n = 0;
    for data in state.map.hexes.values() {
        if fed_only && !data.in_federation_of(player.id) {
            continue;
        }
        if data.planet.is_none() {
            continue;
        }
        if data.owner == Some(player.id)
            && data.building.map(Building::is_colonizing).unwrap_or(false)
        {
            n += 1;
        }
        if data.additional_mine == Some(player.id) {
            n += 1;
        }
    }
    n
}

fn satellites(state: &GameState, player: &Player) -> u32 {
    let stations = state
        .map
        .hexes
        .values()
        .filter(|d| d.owner == Some(player.id) && d.building == Some(Building::SpaceStation))
        .count() as u32;
    player.satellites + stations
}

/// Four points per research level above two.
fn research_vp(player: &Player) -> u32 {
    ResearchTrack::ALL
        .iter()
        .map(|t| (player.level(*t) as u32).saturating_sub(2) * 4)
        .sum()
}
