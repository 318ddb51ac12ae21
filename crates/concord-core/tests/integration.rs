//! Integration tests driving whole games through the textual move interface,
//! the way a server or UI front end would.
//!
//! Scripts are built from the published available commands rather than from
//! hard-coded coordinates, so they stay valid across reshuffled tile pools.

use concord_core::{final_standings, load_rules, CompiledRules, GameEngine, RulesSource};
use concord_protocol::{
    wire, AvailableCommand, Building, CommandData, CommandName, FedToken, Hex, LogEntry, Phase,
    PlayerId, Reward, SubPhase,
};

fn rules() -> CompiledRules {
    load_rules(RulesSource::Embedded).unwrap()
}

/// The first published concrete answer for one available command, as move
/// text without the player prefix.
fn first_answer(offer: &AvailableCommand) -> String {
    match &offer.data {
        CommandData::Empty => offer.name.to_string(),
        CommandData::ChooseFaction { factions } => format!("faction {}", factions[0]),
        CommandData::Bid { options } => {
            format!("bid {} {}", options[0].faction, options[0].min_bid)
        }
        CommandData::Build { options } => {
            format!("build {} {}", options[0].building, options[0].hex)
        }
        CommandData::ChooseBooster { boosters } => format!("booster {}", boosters[0]),
        CommandData::Pass { boosters } if !boosters.is_empty() => {
            format!("pass {}", boosters[0])
        }
        CommandData::Pass { .. } => "pass".to_string(),
        CommandData::UpgradeResearch { tracks } => format!("up {}", tracks[0]),
        CommandData::ChooseTechTile { options } => format!("tech {}", options[0].pos),
        CommandData::CoverTechTile { tiles } => format!("cover {}", tiles[0]),
        CommandData::Special { options } => {
            format!("special {}", Reward::format_list(&options[0].rewards))
        }
        CommandData::BoardAction { options } => format!("action {}", options[0].action),
        CommandData::Spend { conversions } => format!(
            "spend {} for {}",
            Reward::format_list(&conversions[0].cost),
            Reward::format_list(&conversions[0].income)
        ),
        CommandData::Burn { .. } => "burn 1".to_string(),
        CommandData::Leech { offers } => {
            format!("charge {}", Reward::format_list(&offers[0].rewards))
        }
        CommandData::FormFederation { federations, tiles } => {
            let hexes: Vec<String> = federations[0].hexes.iter().map(|h| h.to_string()).collect();
            format!("federation {} {}", hexes.join(","), tiles[0])
        }
        CommandData::ChooseFederationTile { tiles } => format!("fedtile {}", tiles[0]),
        CommandData::PlaceLostPlanet { hexes } => format!("build lp {}", hexes[0]),
        CommandData::SpaceStation { hexes } => format!("build sp {}", hexes[0]),
        CommandData::PlaceShip { hexes } => format!("ship {}", hexes[0]),
        CommandData::MoveShip { ships } => {
            format!("move {} {}", ships[0].from, ships[0].targets[0])
        }
        CommandData::BrainStone { areas } => format!("brainstone {}", areas[0]),
        CommandData::PiSwap { hexes } => format!("swap {}", hexes[0]),
        CommandData::DowngradeLab { hexes } => format!("downgrade {}", hexes[0]),
        CommandData::DeadEnd { subphase } => panic!("dead end in {subphase}"),
    }
}

/// Answer setup placements and booster picks by always taking the first
/// published option.
fn drive_setup(engine: &mut GameEngine) {
    let mut safety = 24;
    while matches!(
        engine.state.phase,
        Phase::SetupBuilding | Phase::SetupBooster
    ) {
        let offer = engine.available_commands()[0].clone();
        let line = format!("p{} {}", offer.player.0 + 1, first_answer(&offer));
        engine.process(&line).unwrap();
        safety -= 1;
        assert!(safety > 0, "setup never finished");
    }
}

/// A two-player table played through setup, ready for the first round-move
/// decision.
fn two_player_opening(seed: &str) -> GameEngine {
    let mut engine = GameEngine::new(rules());
    engine.process(&format!("init 2 {seed}")).unwrap();
    engine.process("p1 faction terrans").unwrap();
    engine.process("p2 faction geodens").unwrap();
    drive_setup(&mut engine);
    assert_eq!(engine.state.phase, Phase::RoundMove);
    engine
}

/// The current player passes, exchanging boosters while the round still
/// swaps them.
fn pass_current(engine: &mut GameEngine) {
    let current = engine.state.current.expect("no one to pass");
    let pass = engine
        .available_commands()
        .iter()
        .find(|c| c.name == CommandName::Pass && c.player == current)
        .cloned()
        .expect("pass not on offer");
    let line = format!("p{} {}", current.0 + 1, first_answer(&pass));
    engine.process(&line).unwrap();
}

/// A complete game in which both players do nothing but pass still walks
/// through all six rounds and lands in final scoring.
#[test]
fn a_pass_only_game_reaches_final_scoring() {
    let mut engine = two_player_opening("integration-pass-game");
    let mut safety = 20;
    while engine.state.phase != Phase::EndGame {
        pass_current(&mut engine);
        safety -= 1;
        assert!(safety > 0, "the rounds never ran out");
    }
    assert_eq!(engine.state.round, 6);
    assert!(engine.state.current.is_none());

    let rounds = engine
        .state
        .log
        .iter()
        .filter(|entry| matches!(entry, LogEntry::RoundChange { .. }))
        .count();
    assert_eq!(rounds, 6);

    let standings = final_standings(engine.rules(), &engine.state);
    assert_eq!(standings.len(), 2);
    assert!(standings[0].total >= standings[1].total);
    for row in &standings {
        assert_eq!(
            row.total,
            row.game_vp + row.final_tile_vp + row.research_vp + row.resource_vp
        );
        // The banked totals match what the players actually hold.
        let held = engine.state.player(row.player).resources.vp;
        assert_eq!(row.total, held);
    }
}

/// Replaying the recorded move history reproduces the exact state,
/// structured log included.
#[test]
fn the_move_history_replays_to_an_identical_state() {
    let mut engine = two_player_opening("integration-replay");
    pass_current(&mut engine);
    pass_current(&mut engine);
    assert_eq!(engine.state.round, 2);

    let history = engine.state.move_history.clone();
    let replayed = GameEngine::replay(rules(), &history).unwrap();
    assert_eq!(replayed.snapshot().unwrap(), engine.snapshot().unwrap());
}

/// `replay_to` rewinds to the state as it stood after any move prefix.
#[test]
fn replay_to_rewinds_to_a_checkpoint() {
    let mut engine = two_player_opening("integration-time-travel");
    let checkpoint = engine.snapshot().unwrap();
    let at = engine.state.move_history.len();

    pass_current(&mut engine);
    pass_current(&mut engine);
    let history = engine.state.move_history.clone();
    assert!(history.len() > at);

    let rewound = GameEngine::replay_to(rules(), &history, at).unwrap();
    assert_eq!(rewound.snapshot().unwrap(), checkpoint);
}

/// The compact replay file survives its byte codec and still rebuilds the
/// same game.
#[test]
fn a_replay_file_round_trips_through_msgpack() {
    let mut engine = two_player_opening("integration-replay-file");
    pass_current(&mut engine);

    let replay = engine.replay_file();
    let bytes = wire::encode_replay(&replay).unwrap();
    let decoded = wire::decode_replay(&bytes).unwrap();
    assert_eq!(decoded, replay);

    let rebuilt = GameEngine::replay(rules(), &decoded.moves).unwrap();
    assert_eq!(rebuilt.snapshot().unwrap(), engine.snapshot().unwrap());
}

/// A restored snapshot publishes the same menus and accepts the same moves.
#[test]
fn a_restored_snapshot_keeps_the_same_menus() {
    let mut engine = two_player_opening("integration-snapshot");
    let snapshot = engine.snapshot().unwrap();
    let mut restored = GameEngine::restore(rules(), &snapshot).unwrap();

    let published = serde_json::to_string(engine.available_commands()).unwrap();
    let republished = serde_json::to_string(restored.available_commands()).unwrap();
    assert_eq!(published, republished);

    pass_current(&mut engine);
    pass_current(&mut restored);
    assert_eq!(engine.snapshot().unwrap(), restored.snapshot().unwrap());
}

/// Moves outside the published set are refused without touching the state.
#[test]
fn refused_moves_leave_no_trace() {
    let mut engine = two_player_opening("integration-refused");
    let before = engine.snapshot().unwrap();
    let waiting = engine.state.current.unwrap();
    let other = PlayerId(1 - waiting.0);

    // Not this player's turn.
    assert!(engine.process(&format!("p{} burn 1", other.0 + 1)).is_err());
    // Not an offered command for the player whose turn it is.
    assert!(engine
        .process(&format!("p{} federation 0x0 fed1", waiting.0 + 1))
        .is_err());
    // Unknown command word.
    assert!(engine.process("p1 colonize 0x0").is_err());

    assert_eq!(engine.snapshot().unwrap(), before);
}

/// Grow a head command into a full legal line by answering every follow-up
/// question with its first published option. The tolerant bulk-replay mode
/// exposes each intermediate menu.
fn complete_line(history: &[String], head: String) -> String {
    let mut line = head;
    for _ in 0..8 {
        let mut moves = history.to_vec();
        moves.push(line.clone());
        let probe = GameEngine::replay(rules(), &moves).expect("probe replay");
        let open = matches!(
            probe.state.subphase(),
            Some(sub) if sub != SubPhase::BeforeMove && sub != SubPhase::AfterMove
        );
        if !open {
            return line;
        }
        let active = probe.state.active_player().expect("open question, no one to ask");
        let offer = probe
            .available_commands()
            .iter()
            .find(|c| c.player == active && c.name != CommandName::DeadEnd)
            .cloned()
            .expect("open question carries no menu");
        line = format!("{line}. {}", first_answer(&offer));
    }
    panic!("line never completed: {line}");
}

/// Every command published at the first round-move decision can actually be
/// played, follow-up questions and all.
#[test]
fn every_published_command_can_be_played() {
    let engine = two_player_opening("integration-closure");
    let history = engine.state.move_history.clone();
    let snapshot = engine.snapshot().unwrap();
    let offers = engine.available_commands().to_vec();
    assert!(offers.len() >= 2, "expected a real menu, got {offers:?}");

    for offer in offers {
        let head = format!("p{} {}", offer.player.0 + 1, first_answer(&offer));
        let line = complete_line(&history, head);
        let mut branch = GameEngine::restore(rules(), &snapshot).unwrap();
        branch
            .process(&line)
            .unwrap_or_else(|err| panic!("`{line}` was published but refused: {err}"));
    }
}

/// The rescore board action pays an owned federation token out a second
/// time, and is spent for the round once taken.
#[test]
fn rescoring_a_federation_pays_its_token_again() {
    let mut engine = two_player_opening("integration-rescore");
    engine.state.player_mut(PlayerId(0)).federations.push(FedToken::Fed2);
    engine.state.player_mut(PlayerId(0)).resources.qic = 3;
    engine.state.player_mut(PlayerId(1)).federations.push(FedToken::Fed4);
    engine.state.player_mut(PlayerId(1)).resources.qic = 3;
    // Republish the menus with the granted tokens in place.
    let snapshot = engine.snapshot().unwrap();
    let mut engine = GameEngine::restore(rules(), &snapshot).unwrap();

    let before = engine.state.player(PlayerId(0)).resources.vp;
    engine.process("p1 action qic2. fedtile fed2").unwrap();
    let holder = engine.state.player(PlayerId(0));
    assert_eq!(holder.resources.vp - before, 8);
    // 3 qic paid for the action, 1 came back with the token.
    assert_eq!(holder.resources.qic, 1);
    // The token itself was rescored, not duplicated.
    assert_eq!(holder.federations, vec![FedToken::Fed2]);

    // The action is gone for the round even though the second player holds
    // a token and the qic to pay for it.
    let refused = engine.process("p2 action qic2");
    assert!(refused.is_err(), "rescore was taken twice in one round");
}

/// A granted trade ship launches from one of the player's own planets and
/// can then move.
#[test]
fn a_granted_ship_launches_from_an_own_planet() {
    let mut engine = two_player_opening("integration-ship-launch");
    engine.state.subphases.push(SubPhase::PlaceShip);
    let snapshot = engine.snapshot().unwrap();
    let mut engine = GameEngine::restore(rules(), &snapshot).unwrap();

    let offer = engine.available_commands()[0].clone();
    assert_eq!(offer.name, CommandName::PlaceShip);
    let CommandData::PlaceShip { hexes } = &offer.data else {
        panic!("ship offer carries no hexes");
    };
    let home = hexes[0];
    engine.process(&format!("p1 ship {home}")).unwrap();

    let data = engine.state.map.get(home).unwrap();
    assert!(data.ships.contains(&PlayerId(0)));
    // The main action is still open, and moving the ship is now one of them.
    assert!(engine
        .available_commands()
        .iter()
        .any(|c| c.name == CommandName::MoveShip && c.player == PlayerId(0)));
}

/// Moving a ship next to a foreign colony delivers a trade token and pays
/// both sides, but only once per colony.
#[test]
fn a_trade_ship_delivers_once_per_colony() {
    fn foreign_mine(engine: &GameEngine, hex: Hex) -> bool {
        engine
            .state
            .map
            .get(hex)
            .map(|d| d.owner == Some(PlayerId(1)) && d.building == Some(Building::Mine))
            .unwrap_or(false)
    }
    fn empty_space(engine: &GameEngine, hex: Hex) -> bool {
        engine
            .state
            .map
            .get(hex)
            .map(|d| d.planet.is_none() && d.building.is_none())
            .unwrap_or(false)
    }

    let mut engine = two_player_opening("integration-ship-trade");

    // A colonized planet of the second player, an empty hex beside it to
    // deliver from and a quiet empty hex beside that to shuttle back to.
    let mines: Vec<Hex> = engine
        .state
        .map
        .planet_hexes()
        .filter(|(hex, _)| foreign_mine(&engine, *hex))
        .map(|(hex, _)| hex)
        .collect();
    let mut lane = None;
    'search: for colony in mines {
        for dock in engine.state.map.neighbors(colony).collect::<Vec<_>>() {
            if !empty_space(&engine, dock) {
                continue;
            }
            for offshore in engine.state.map.neighbors(dock).collect::<Vec<_>>() {
                let quiet = empty_space(&engine, offshore)
                    && !engine
                        .state
                        .map
                        .neighbors(offshore)
                        .any(|n| foreign_mine(&engine, n));
                if quiet {
                    lane = Some((colony, dock, offshore));
                    break 'search;
                }
            }
        }
    }
    let (colony, dock, offshore) = lane.expect("no delivery lane beside the opponent");

    engine
        .state
        .map
        .get_mut(offshore)
        .unwrap()
        .ships
        .push(PlayerId(0));
    let snapshot = engine.snapshot().unwrap();
    let mut engine = GameEngine::restore(rules(), &snapshot).unwrap();

    // Arriving beside the colony delivers: a trade token on the colony,
    // 2c,1k for the shipper, 1c and a charge for the host.
    let deliveries = engine
        .state
        .map
        .neighbors(dock)
        .filter(|hex| foreign_mine(&engine, *hex))
        .count() as u32;
    assert!(deliveries >= 1);
    let shipper_before = engine.state.player(PlayerId(0)).resources.clone();
    let host_before = engine.state.player(PlayerId(1)).resources.clone();

    engine.process(&format!("p1 move {offshore} {dock}")).unwrap();
    let shipper = engine.state.player(PlayerId(0));
    let host = engine.state.player(PlayerId(1));
    assert_eq!(shipper.resources.credits - shipper_before.credits, 2 * deliveries);
    assert_eq!(shipper.resources.knowledge - shipper_before.knowledge, deliveries);
    assert_eq!(host.resources.credits - host_before.credits, deliveries);
    assert!(engine
        .state
        .map
        .get(colony)
        .unwrap()
        .trade_tokens
        .contains(&PlayerId(0)));

    // The second player steps out of the round; the shipper keeps moving.
    pass_current(&mut engine);
    let paid = engine.state.player(PlayerId(0)).resources.clone();
    engine.process(&format!("p1 move {dock} {offshore}")).unwrap();
    engine.process(&format!("p1 move {offshore} {dock}")).unwrap();

    // Same colony, same ship owner: nothing is paid twice.
    let after = engine.state.player(PlayerId(0)).resources.clone();
    assert_eq!(after.credits, paid.credits);
    assert_eq!(after.knowledge, paid.knowledge);
}
