use concord_protocol::{
    Building, Event, Faction, Hex, LogEntry, Operator, Phase, PlanetType, PlayerId, Resource,
    Reward, SubPhase,
};

use crate::engine::GameState;
use crate::error::MoveError;
use crate::faction::FactionAbility;
use crate::rules::CompiledRules;

/// Open the next round: rotate the turn order to pass order, reset the
/// per-round flags, swap the scoring tile and pay income, then run the gaia
/// phase. Unless a gaia-phase decision stalls it, the state comes out in
/// [`Phase::RoundMove`] with the first player up.
pub(super) fn round_begin(rules: &CompiledRules, state: &mut GameState) -> Result<(), MoveError> {
    state.round += 1;
    state.log.push(LogEntry::RoundChange { round: state.round });
    if !state.passed.is_empty() {
        state.turn_order = state.passed.clone();
        state.passed.clear();
    }
    for player in &mut state.players {
        player.passed = false;
        for event in &mut player.events {
            event.activated = false;
        }
    }
    state.actions_taken.clear();
    swap_scoring(rules, state);
    state.set_phase(Phase::RoundIncome);
    for seat in 0..state.players.len() {
        pay_income(state, PlayerId(seat as u8));
    }
    begin_gaia(state);
    Ok(())
}

/// The previous round's scoring event leaves every player's list and the
/// new one joins it.
fn swap_scoring(rules: &CompiledRules, state: &mut GameState) {
    if state.round >= 2 {
        if let Some(tile) = state.pools.scoring_for(state.round - 1) {
            if let Some(event) = rules.round_scoring.get(&tile) {
                for player in &mut state.players {
                    player.remove_event(event);
                }
            }
        }
    }
    if let Some(tile) = state.pools.scoring_for(state.round) {
        if let Some(event) = rules.round_scoring.get(&tile) {
            for player in &mut state.players {
                player.add_events(std::slice::from_ref(event));
            }
        }
    }
}

/// All income events pay at once. Fresh tokens land before charges so that
/// a token gained this round can absorb a charge this round.
fn pay_income(state: &mut GameState, id: PlayerId) {
    let incomes: Vec<Event> = state
        .player(id)
        .events_with(Operator::Income)
        .cloned()
        .collect();
    let mut plain: Vec<Reward> = Vec::new();
    let mut tokens = 0;
    let mut charges = 0;
    for event in &incomes {
        for reward in &event.rewards {
            match reward.kind {
                Resource::GainToken => tokens += reward.count.max(0) as u32,
                Resource::ChargePower => charges += reward.count.max(0) as u32,
                _ => plain.push(*reward),
            }
        }
    }
    let player = state.player_mut(id);
    for reward in plain {
        player.gain_plain(reward);
    }
    player.power.gain(tokens);
    player.power.charge(charges);
}

/// Finished gaiaformers flip their transdim planets to gaia, committed
/// formers come home, and gaia-area tokens return to the bowls. Itars with
/// four or more gaia tokens instead get the choice to forge them into tech
/// tiles first.
fn begin_gaia(state: &mut GameState) {
    state.set_phase(Phase::RoundGaia);
    let done: Vec<Hex> = state
        .map
        .hexes
        .iter()
        .filter(|(_, d)| {
            d.planet == Some(PlanetType::Transdim) && d.building == Some(Building::GaiaFormer)
        })
        .map(|(h, _)| *h)
        .collect();
    for hex in done {
        if let Some(data) = state.map.get_mut(hex) {
            data.planet = Some(PlanetType::Gaia);
        }
    }
    for player in &mut state.players {
        player.gaiaformers_in_gaia = 0;
    }
    let stalled = state
        .players
        .iter()
        .find(|p| p.faction == Faction::Itars && p.power.gaia() >= 4)
        .map(|p| p.id);
    for player in &mut state.players {
        if Some(player.id) == stalled {
            continue;
        }
        let area = FactionAbility::of(player.faction).gaia_return_area();
        player.power.gaia_return(area);
    }
    if let Some(id) = stalled {
        state.current = Some(id);
        state.subphases.push(SubPhase::ChooseTechTile);
        return;
    }
    finish_gaia(state);
}

/// Re-arm the Itars conversion while four gaia tokens remain, otherwise
/// close out the gaia phase.
pub(super) fn gaia_continue(state: &mut GameState) {
    if let Some(id) = state.current {
        let player = state.player(id);
        if player.faction == Faction::Itars && player.power.gaia() >= 4 {
            state.subphases.push(SubPhase::ChooseTechTile);
            return;
        }
    }
    finish_gaia(state);
}

pub(super) fn finish_gaia(state: &mut GameState) {
    for player in &mut state.players {
        let area = FactionAbility::of(player.faction).gaia_return_area();
        player.power.gaia_return(area);
    }
    state.set_phase(Phase::RoundMove);
    state.current = state.turn_order.first().copied();
    state.subphases.clear();
    state.subphases.push(SubPhase::BeforeMove);
}

#[cfg(test)]
mod tests {
    use concord_protocol::{Faction, Operator, Phase, PlayerId, PowerArea};

    use crate::engine::GameEngine;
    use crate::rules::{load_rules, RulesSource};

    fn two_player() -> GameEngine {
        let rules = load_rules(RulesSource::Embedded).unwrap();
        let mut engine = GameEngine::new(rules);
        engine.process("init 2 income-tests").unwrap();
        engine.process("p1 faction terrans").unwrap();
        engine.process("p2 faction hadsch-hallas").unwrap();
        let mut safety = 16;
        while engine.state.phase == Phase::SetupBuilding
            || engine.state.phase == Phase::SetupBooster
        {
            let offer = engine.state.available[0].clone();
            let seat = offer.player.0 + 1;
            let text = match &offer.data {
                concord_protocol::CommandData::Build { options } => {
                    format!("p{seat} build {} {}", options[0].building, options[0].hex)
                }
                concord_protocol::CommandData::ChooseBooster { boosters } => {
                    format!("p{seat} booster {}", boosters[0])
                }
                other => panic!("unexpected setup offer {other:?}"),
            };
            engine.process(&text).unwrap();
            safety -= 1;
            assert!(safety > 0, "setup never finished");
        }
        engine
    }

    #[test]
    fn the_first_round_opens_with_income_paid() {
        let engine = two_player();
        assert_eq!(engine.state.round, 1);
        assert_eq!(engine.state.phase, Phase::RoundMove);
        let terrans = engine.state.player(PlayerId(0));
        // base income plus whatever the setup mines and booster uncovered
        assert!(terrans.resources.knowledge >= 4);
        assert!(terrans.resources.ore >= 5);
    }

    #[test]
    fn round_scoring_swaps_in_as_a_trigger() {
        let engine = two_player();
        let tile = engine.state.pools.scoring_for(1).unwrap();
        let expected = engine.rules().round_scoring.get(&tile).unwrap().clone();
        for player in &engine.state.players {
            assert!(
                player
                    .events
                    .iter()
                    .any(|e| e.operator == Operator::Trigger && e.spec == expected.spec),
                "{} is missing the round trigger",
                player.faction
            );
        }
    }

    #[test]
    fn terrans_gaia_tokens_return_to_area_two() {
        let ability = crate::faction::FactionAbility::of(Faction::Terrans);
        assert_eq!(ability.gaia_return_area(), PowerArea::Area2);
    }

    #[test]
    fn income_keeps_the_bowls_conserved() {
        let engine = two_player();
        for player in &engine.state.players {
            assert!(player.power.conserved(), "{} bowls leak", player.faction);
        }
    }
}
