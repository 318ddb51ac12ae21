use concord_protocol::{
    AvailableCommand, BoardAction, Booster, Building, BuildOption, ChargeOffer, CommandData,
    CommandName, Condition, Conversion, Event, EventSource, Faction, FedToken, Hex, LogEntry,
    Operator, ParseError, Phase, PlanetType, PlayerId, PowerArea, ResearchTrack, Resource,
    Reward, SubPhase, TechTile, TechTilePos,
};

use crate::engine::{generate, income, scoring, GameSettings, GameState, PendingCharge, PendingLeech, TilePools};
use crate::engine::parse::{MoveLine, SubCommand};
use crate::error::MoveError;
use crate::faction::FactionAbility;
use crate::federation;
use crate::map::SpaceMap;
use crate::player::{OwnedTechTile, Player};
use crate::rng::GameRng;
use crate::rules::CompiledRules;

/// Run one move line against the state.
///
/// The line is parsed, each dot-separated command is matched against the
/// published [`GameState::available`] set and applied, and the turn is closed
/// out if the line completes it. Callers snapshot the state beforehand; any
/// error here leaves partial mutations behind that the caller must roll back.
pub(super) fn apply_line(
    rules: &CompiledRules,
    state: &mut GameState,
    text: &str,
    tolerate_incomplete: bool,
) -> Result<(), MoveError> {
    let line = MoveLine::parse(state, text)?;
    if let Some(player) = line.player {
        if state.active_player() != Some(player) {
            return Err(MoveError::NotYourTurn { player });
        }
    }
    for command in &line.commands {
        let offered = find_offer(state, &line, command)?;
        dispatch(rules, state, &line, command, &offered)?;
        if state.phase == Phase::RoundLeech && state.leech.is_empty() {
            state.set_phase(Phase::RoundMove);
        }
        let available = generate::refresh(rules, state);
        state.available = available;
    }
    finish_line(rules, state, &line, tolerate_incomplete)?;
    state.move_history.push(line.text.clone());
    state.log.push(LogEntry::Move {
        player: line.player.unwrap_or(PlayerId(0)),
        text: line.text,
    });
    Ok(())
}

/// Post-line bookkeeping: refuse lines that strand a mandatory decision,
/// close the turn when the main action is spent, and resume the gaia phase
/// once its pending question is answered.
fn finish_line(
    rules: &CompiledRules,
    state: &mut GameState,
    line: &MoveLine,
    tolerate_incomplete: bool,
) -> Result<(), MoveError> {
    if state.available.iter().any(|c| c.name == CommandName::DeadEnd) {
        let player = line.player.unwrap_or(PlayerId(0));
        return Err(MoveError::illegal(
            player,
            "a mandatory follow-up decision has no legal option",
        ));
    }
    if let Some(player) = line.player {
        let open = state
            .subphase()
            .map(|s| !matches!(s, SubPhase::BeforeMove | SubPhase::AfterMove))
            .unwrap_or(false);
        if open && !tolerate_incomplete {
            return Err(MoveError::illegal(
                player,
                "the move leaves a pending decision unanswered",
            ));
        }
    }
    let mut advanced = false;
    if state.phase == Phase::RoundMove
        && state.leech.is_empty()
        && state.subphases == [SubPhase::AfterMove]
    {
        close_turn(rules, state)?;
        advanced = true;
    }
    if state.phase == Phase::RoundGaia && state.subphases.is_empty() {
        income::gaia_continue(state);
        advanced = true;
    }
    if advanced {
        let available = generate::refresh(rules, state);
        state.available = available;
    }
    Ok(())
}

fn find_offer(
    state: &GameState,
    line: &MoveLine,
    command: &SubCommand,
) -> Result<AvailableCommand, MoveError> {
    let player = line.player.unwrap_or(PlayerId(0));
    state
        .available
        .iter()
        .find(|a| {
            a.name == command.name
                && a.name != CommandName::DeadEnd
                && (command.name == CommandName::Init || Some(a.player) == line.player)
        })
        .cloned()
        .ok_or(MoveError::Unavailable {
            player,
            command: command.name,
        })
}

fn dispatch(
    rules: &CompiledRules,
    state: &mut GameState,
    line: &MoveLine,
    command: &SubCommand,
    offered: &AvailableCommand,
) -> Result<(), MoveError> {
    let actor = offered.player;
    match command.name {
        CommandName::Init => handle_init(rules, state, command),
        CommandName::ChooseFaction => handle_faction(rules, state, command, offered),
        CommandName::Bid => handle_bid(rules, state, actor, command, offered),
        CommandName::Build => handle_build(rules, state, actor, command, offered),
        CommandName::ChooseBooster => handle_booster(rules, state, actor, command, offered),
        CommandName::Pass => handle_pass(rules, state, actor, command, offered),
        CommandName::UpgradeResearch => handle_up(rules, state, actor, command, offered),
        CommandName::ChooseTechTile => handle_tech(rules, state, actor, command, offered),
        CommandName::CoverTechTile => handle_cover(rules, state, actor, command, offered),
        CommandName::Special => handle_special(state, actor, command, offered),
        CommandName::BoardAction => handle_action(rules, state, actor, command, offered),
        CommandName::Spend => handle_spend(state, actor, command, offered),
        CommandName::Burn => handle_burn(state, actor, command, offered),
        CommandName::Charge => handle_charge(state, actor, command),
        CommandName::Decline => handle_decline(state, actor),
        CommandName::FormFederation => handle_federation(rules, state, actor, command, offered),
        CommandName::ChooseFederationTile => handle_fedtile(rules, state, actor, command, offered),
        CommandName::BrainStone => handle_brainstone(state, actor, command, offered),
        CommandName::PiSwap => handle_swap(state, actor, command, offered),
        CommandName::DowngradeLab => handle_downgrade(rules, state, actor, command, offered),
        CommandName::MoveShip => handle_move_ship(state, actor, command, offered),
        CommandName::PlaceShip => handle_place_ship(state, actor, command, offered),
        CommandName::DeadEnd => Err(MoveError::Unavailable {
            player: line.player.unwrap_or(PlayerId(0)),
            command: command.name,
        }),
    }
}

fn arg<'a>(command: &'a SubCommand, index: usize, name: &'static str) -> Result<&'a str, MoveError> {
    command
        .args
        .get(index)
        .map(String::as_str)
        .ok_or(MoveError::Parse(ParseError::MissingArgument(name)))
}

// ---------------------------------------------------------------------------
// Turn flow

/// Swap the pending main-action marker for the spent one. Free actions and
/// forced follow-ups leave the marker alone.
fn mark_main(state: &mut GameState) {
    if let Some(slot) = state
        .subphases
        .iter_mut()
        .find(|s| **s == SubPhase::BeforeMove)
    {
        *slot = SubPhase::AfterMove;
    }
}

fn close_turn(rules: &CompiledRules, state: &mut GameState) -> Result<(), MoveError> {
    state.temp_steps = 0;
    state.temp_range = 0;
    state.subphases.clear();
    if state.players.iter().all(|p| p.passed) {
        if state.round >= 6 {
            scoring::finish_game(rules, state);
        } else {
            income::round_begin(rules, state)?;
        }
        return Ok(());
    }
    let order = &state.turn_order;
    let here = state
        .current
        .and_then(|c| order.iter().position(|p| *p == c))
        .unwrap_or(0);
    for offset in 1..=order.len() {
        let seat = order[(here + offset) % order.len()];
        if !state.player(seat).passed {
            state.current = Some(seat);
            break;
        }
    }
    state.subphases.push(SubPhase::BeforeMove);
    Ok(())
}

// ---------------------------------------------------------------------------
// Setup commands

fn handle_init(
    rules: &CompiledRules,
    state: &mut GameState,
    command: &SubCommand,
) -> Result<(), MoveError> {
    let count_text = arg(command, 0, "player count")?;
    let count: usize = count_text
        .parse()
        .map_err(|_| ParseError::keyword("player count", count_text))?;
    if !(2..=5).contains(&count) {
        return Err(ParseError::keyword("player count", count_text).into());
    }
    let seed = arg(command, 1, "seed")?.to_string();
    let mut settings = GameSettings::default();
    for extra in command.args.iter().skip(2) {
        match extra.as_str() {
            "auction" => settings.auction = true,
            "flexfed" => settings.flexible_federations = true,
            other => return Err(ParseError::keyword("init option", other).into()),
        }
    }
    state.settings = settings;
    state.player_count = count;
    state.seed = seed.clone();
    state.set_phase(Phase::SetupBoard);
    let mut rng = GameRng::seed_from_text(&seed);
    let map = SpaceMap::assemble(rules, count, &mut rng);
    let pools = TilePools::draw(rules, count, &mut rng);
    state.map = map;
    state.pools = pools;
    state.rng = rng;
    state.turn_order = (0..count as u8).map(PlayerId).collect();
    state.setup_queue = state.turn_order.clone();
    state.set_phase(Phase::SetupFaction);
    Ok(())
}

fn handle_faction(
    rules: &CompiledRules,
    state: &mut GameState,
    command: &SubCommand,
    offered: &AvailableCommand,
) -> Result<(), MoveError> {
    let actor = offered.player;
    let faction: Faction = arg(command, 0, "faction")?.parse()?;
    let CommandData::ChooseFaction { factions } = &offered.data else {
        return Err(MoveError::Invariant("faction offer carries no choices".into()));
    };
    if !factions.contains(&faction) {
        return Err(MoveError::illegal(
            actor,
            format!("faction {faction} is not available"),
        ));
    }
    if state.settings.auction {
        state.auction.push(crate::engine::AuctionSlot {
            faction,
            holder: None,
            bid: 0,
        });
    } else {
        let player = Player::new(rules, actor, faction);
        state.players.push(player);
    }
    advance_setup_queue(state);
    if state.setup_queue.is_empty() {
        if state.settings.auction {
            state.set_phase(Phase::SetupAuction);
        } else {
            begin_setup_building(state);
        }
    }
    Ok(())
}

fn handle_bid(
    rules: &CompiledRules,
    state: &mut GameState,
    actor: PlayerId,
    command: &SubCommand,
    offered: &AvailableCommand,
) -> Result<(), MoveError> {
    let faction: Faction = arg(command, 0, "faction")?.parse()?;
    let bid: u32 = match command.args.get(1) {
        Some(text) => text
            .parse()
            .map_err(|_| ParseError::keyword("bid", text.as_str()))?,
        None => 0,
    };
    let CommandData::Bid { options } = &offered.data else {
        return Err(MoveError::Invariant("bid offer carries no options".into()));
    };
    let Some(option) = options.iter().find(|o| o.faction == faction) else {
        return Err(MoveError::illegal(
            actor,
            format!("faction {faction} is not up for auction"),
        ));
    };
    if (bid as i32) < option.min_bid {
        return Err(MoveError::illegal(
            actor,
            format!("bid of {bid} is below the current price"),
        ));
    }
    for slot in &mut state.auction {
        if slot.faction == faction {
            slot.holder = Some(actor);
            slot.bid = bid;
        }
    }
    if state.next_bidder().is_none() {
        let mut players = Vec::with_capacity(state.player_count);
        for seat in 0..state.player_count as u8 {
            let id = PlayerId(seat);
            let slot = state
                .auction
                .iter()
                .find(|s| s.holder == Some(id))
                .ok_or_else(|| MoveError::Invariant("auction closed without a seat".into()))?;
            let mut player = Player::new(rules, id, slot.faction);
            player.bid = slot.bid;
            player.resources.apply(Resource::VictoryPoint, -(slot.bid as i32));
            players.push(player);
        }
        state.players = players;
        begin_setup_building(state);
    }
    Ok(())
}

/// Seat order for initial buildings: forward, then reverse, then the factions
/// with a third setup mine, with institute-only factions moved to the very
/// end of the queue.
fn begin_setup_building(state: &mut GameState) {
    let seats = state.turn_order.clone();
    let mut queue = Vec::new();
    for seat in &seats {
        if !FactionAbility::of(state.player(*seat).faction).setup_institute_only() {
            queue.push(*seat);
        }
    }
    for seat in seats.iter().rev() {
        if !FactionAbility::of(state.player(*seat).faction).setup_institute_only() {
            queue.push(*seat);
        }
    }
    for seat in &seats {
        if FactionAbility::of(state.player(*seat).faction).setup_third_mine() {
            queue.push(*seat);
        }
    }
    for seat in &seats {
        if FactionAbility::of(state.player(*seat).faction).setup_institute_only() {
            queue.push(*seat);
        }
    }
    state.setup_queue = queue;
    state.set_phase(Phase::SetupBuilding);
}

fn advance_setup_queue(state: &mut GameState) {
    if !state.setup_queue.is_empty() {
        state.setup_queue.remove(0);
    }
}

fn handle_booster(
    rules: &CompiledRules,
    state: &mut GameState,
    actor: PlayerId,
    command: &SubCommand,
    offered: &AvailableCommand,
) -> Result<(), MoveError> {
    let booster: Booster = arg(command, 0, "booster")?.parse()?;
    let CommandData::ChooseBooster { boosters } = &offered.data else {
        return Err(MoveError::Invariant("booster offer carries no choices".into()));
    };
    if !boosters.contains(&booster) {
        return Err(MoveError::illegal(
            actor,
            format!("booster {booster} is not in the pool"),
        ));
    }
    take_booster(rules, state, actor, booster)?;
    advance_setup_queue(state);
    if state.setup_queue.is_empty() {
        income::round_begin(rules, state)?;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Building

fn handle_build(
    rules: &CompiledRules,
    state: &mut GameState,
    actor: PlayerId,
    command: &SubCommand,
    offered: &AvailableCommand,
) -> Result<(), MoveError> {
    let building: Building = arg(command, 0, "building")?.parse()?;
    let hex = state.map.parse_location(arg(command, 1, "location")?)?;
    match &offered.data {
        CommandData::Build { options } => {
            let Some(option) = options
                .iter()
                .find(|o| o.building == building && o.hex == hex)
                .cloned()
            else {
                return Err(MoveError::illegal(
                    actor,
                    format!("cannot build {building} at {hex}"),
                ));
            };
            if state.phase == Phase::SetupBuilding {
                setup_place(rules, state, actor, &option)
            } else {
                round_build(rules, state, actor, &option)
            }
        }
        CommandData::PlaceLostPlanet { hexes } => {
            if building != Building::LostPlanet || !hexes.contains(&hex) {
                return Err(MoveError::illegal(actor, "the lost planet cannot go there"));
            }
            place_lost_planet(state, actor, hex)
        }
        CommandData::SpaceStation { hexes } => {
            if building != Building::SpaceStation || !hexes.contains(&hex) {
                return Err(MoveError::illegal(actor, "the space station cannot go there"));
            }
            place_station(state, actor, hex)
        }
        _ => Err(MoveError::Invariant("build offer carries no options".into())),
    }
}

fn setup_place(
    rules: &CompiledRules,
    state: &mut GameState,
    actor: PlayerId,
    option: &BuildOption,
) -> Result<(), MoveError> {
    let data = state
        .map
        .get_mut(option.hex)
        .ok_or_else(|| MoveError::Invariant("setup build on a missing hex".into()))?;
    data.building = Some(option.building);
    data.owner = Some(actor);
    state.player_mut(actor).add_building(option.building);
    uncover_slot(rules, state, actor, option.building);
    if option.building == Building::PlanetaryInstitute {
        let extras = rules.faction(state.player(actor).faction).pi_events.clone();
        state.player_mut(actor).add_events(&extras);
    }
    advance_setup_queue(state);
    if state.setup_queue.is_empty() {
        state.setup_queue = state.turn_order.iter().rev().copied().collect();
        state.set_phase(Phase::SetupBooster);
    }
    Ok(())
}

fn round_build(
    rules: &CompiledRules,
    state: &mut GameState,
    actor: PlayerId,
    option: &BuildOption,
) -> Result<(), MoveError> {
    let hex = option.hex;
    let building = option.building;
    let snapshot = state
        .map
        .get(hex)
        .cloned()
        .ok_or_else(|| MoveError::Invariant("build on a missing hex".into()))?;
    let planet = snapshot.planet;
    let prev = if snapshot.owner == Some(actor) {
        snapshot.building
    } else {
        None
    };
    let guest = snapshot.owner.is_some() && snapshot.owner != Some(actor);

    if matches!(state.subphase(), Some(SubPhase::BuildMineOrGaiaFormer)) {
        state.subphases.pop();
    } else {
        mark_main(state);
    }
    pay_build_cost(state, actor, &option.cost)?;

    // A planet newly colonized this build may be a new type for the player.
    let fresh = building == Building::Mine && !prev.map(Building::is_colonizing).unwrap_or(false);
    let new_type = fresh
        && planet
            .map(|p| !occupies_type(state, actor, p))
            .unwrap_or(false);

    match building {
        Building::GaiaFormer => {
            let data = state
                .map
                .get_mut(hex)
                .ok_or_else(|| MoveError::Invariant("build on a missing hex".into()))?;
            data.building = Some(Building::GaiaFormer);
            data.owner = Some(actor);
            state.player_mut(actor).add_building(Building::GaiaFormer);
        }
        Building::Mine if guest => {
            let data = state
                .map
                .get_mut(hex)
                .ok_or_else(|| MoveError::Invariant("build on a missing hex".into()))?;
            data.additional_mine = Some(actor);
            state.player_mut(actor).add_building(Building::Mine);
            uncover_slot(rules, state, actor, Building::Mine);
        }
        _ => {
            if let Some(old) = prev {
                if old == Building::GaiaFormer {
                    // the former goes back to stock once the mine lands
                    state.player_mut(actor).remove_building(Building::GaiaFormer);
                } else {
                    cover_slot(rules, state, actor, old);
                    state.player_mut(actor).remove_building(old);
                }
            }
            let data = state
                .map
                .get_mut(hex)
                .ok_or_else(|| MoveError::Invariant("build on a missing hex".into()))?;
            data.building = Some(building);
            data.owner = Some(actor);
            state.player_mut(actor).add_building(building);
            uncover_slot(rules, state, actor, building);
            if building == Building::PlanetaryInstitute {
                let extras = rules.faction(state.player(actor).faction).pi_events.clone();
                state.player_mut(actor).add_events(&extras);
                if state.player(actor).faction == Faction::Gleens {
                    gain_fed_token(rules, state, actor, FedToken::FedGleens)?;
                }
            }
        }
    }

    fire_trigger(state, actor, Condition::Step, option.steps)?;
    match building {
        Building::Mine => {
            if guest {
                fire_trigger(state, actor, Condition::GuestMine, 1)?;
            }
            fire_trigger(state, actor, Condition::Mine, 1)?;
            if planet == Some(PlanetType::Gaia) {
                fire_trigger(state, actor, Condition::MineOnGaia, 1)?;
                let vp = FactionAbility::of(state.player(actor).faction).gaia_colonize_vp();
                if vp > 0 {
                    state
                        .player_mut(actor)
                        .gain_plain(Reward::new(vp, Resource::VictoryPoint));
                }
            }
            if new_type {
                fire_trigger(state, actor, Condition::NewPlanetType, 1)?;
            }
        }
        Building::TradingStation => {
            fire_trigger(state, actor, Condition::TradingStation, 1)?;
        }
        Building::ResearchLab => {
            fire_trigger(state, actor, Condition::ResearchLab, 1)?;
            state.subphases.push(SubPhase::ChooseTechTile);
        }
        Building::PlanetaryInstitute => {
            fire_trigger(state, actor, Condition::BigBuilding, 1)?;
        }
        Building::Academy1 | Building::Academy2 => {
            fire_trigger(state, actor, Condition::BigBuilding, 1)?;
            state.subphases.push(SubPhase::ChooseTechTile);
        }
        _ => {}
    }

    if building.base_value() > 0 {
        enqueue_leech(state, hex, actor);
    }
    state.temp_steps = 0;
    state.temp_range = 0;
    state.invalidate_fed_caches();
    Ok(())
}

fn place_lost_planet(state: &mut GameState, actor: PlayerId, hex: Hex) -> Result<(), MoveError> {
    state.subphases.pop();
    let new_type = !occupies_type(state, actor, PlanetType::Lost);
    let data = state
        .map
        .get_mut(hex)
        .ok_or_else(|| MoveError::Invariant("lost planet on a missing hex".into()))?;
    data.planet = Some(PlanetType::Lost);
    data.building = Some(Building::LostPlanet);
    data.owner = Some(actor);
    state.player_mut(actor).add_building(Building::LostPlanet);
    // the lost planet counts as a mine for scoring and conditions
    fire_trigger(state, actor, Condition::Mine, 1)?;
    if new_type {
        fire_trigger(state, actor, Condition::NewPlanetType, 1)?;
    }
    enqueue_leech(state, hex, actor);
    state.invalidate_fed_caches();
    Ok(())
}

fn place_station(state: &mut GameState, actor: PlayerId, hex: Hex) -> Result<(), MoveError> {
    state.subphases.pop();
    let data = state
        .map
        .get_mut(hex)
        .ok_or_else(|| MoveError::Invariant("space station on a missing hex".into()))?;
    data.building = Some(Building::SpaceStation);
    data.owner = Some(actor);
    state.player_mut(actor).add_building(Building::SpaceStation);
    state.invalidate_fed_caches();
    Ok(())
}

fn pay_build_cost(
    state: &mut GameState,
    actor: PlayerId,
    cost: &[Reward],
) -> Result<(), MoveError> {
    for reward in cost {
        let count = reward.count.max(0) as u32;
        match reward.kind {
            Resource::Credit | Resource::Ore | Resource::Knowledge | Resource::Qic => {
                debit(state, actor, reward.kind, count)?;
            }
            Resource::GainToken => {
                state
                    .player_mut(actor)
                    .power
                    .to_gaia(count)
                    .map_err(|e| MoveError::illegal(actor, e.to_string()))?;
            }
            _ => {
                return Err(MoveError::Invariant(format!(
                    "unpayable build cost `{reward}`"
                )))
            }
        }
    }
    Ok(())
}

fn debit(
    state: &mut GameState,
    actor: PlayerId,
    kind: Resource,
    count: u32,
) -> Result<(), MoveError> {
    let player = state.player_mut(actor);
    if player.resources.amount(kind) < count {
        return Err(MoveError::illegal(
            actor,
            format!("cannot pay {}{}", count, kind),
        ));
    }
    player.resources.apply(kind, -(count as i32));
    Ok(())
}

fn occupies_type(state: &GameState, actor: PlayerId, planet: PlanetType) -> bool {
    state.map.planet_hexes().any(|(_, data)| {
        data.planet == Some(planet)
            && (data.additional_mine == Some(actor)
                || (data.owner == Some(actor)
                    && data.building.map(Building::is_colonizing).unwrap_or(false)))
    })
}

/// Board-printed income events uncover one at a time as buildings leave the
/// faction board.
fn slot_event(
    board: &crate::rules::FactionBoard,
    building: Building,
    count: u32,
) -> Option<Event> {
    let index = count.checked_sub(1)? as usize;
    match building {
        Building::Mine => board.mine_income.get(index).cloned().flatten(),
        Building::TradingStation => board.trading_station_income.get(index).cloned(),
        Building::ResearchLab => board.research_lab_income.get(index).cloned(),
        Building::PlanetaryInstitute => {
            (count == 1).then(|| board.planetary_institute_income.clone())
        }
        Building::Academy1 => (count == 1).then(|| board.academy1_event.clone()),
        Building::Academy2 => (count == 1).then(|| board.academy2_event.clone()),
        _ => None,
    }
}

fn uncover_slot(rules: &CompiledRules, state: &mut GameState, actor: PlayerId, building: Building) {
    let board = rules.faction(state.player(actor).faction);
    let count = state.player(actor).building_count(building);
    if let Some(event) = slot_event(board, building, count) {
        state
            .player_mut(actor)
            .add_events(std::slice::from_ref(&event));
    }
}

fn cover_slot(rules: &CompiledRules, state: &mut GameState, actor: PlayerId, building: Building) {
    let board = rules.faction(state.player(actor).faction);
    let count = state.player(actor).building_count(building);
    if let Some(event) = slot_event(board, building, count) {
        state.player_mut(actor).remove_event(&event);
    }
}

// ---------------------------------------------------------------------------
// Power leeching

/// Offer power charges to every neighbour of a fresh structure, in seat
/// order starting after the builder. Taklons with their institute get the
/// token-first and token-last variants.
fn enqueue_leech(state: &mut GameState, hex: Hex, builder: PlayerId) {
    if state.phase != Phase::RoundMove {
        return;
    }
    let sources = state.map.leech_sources(hex, builder);
    if sources.is_empty() {
        return;
    }
    let count = state.player_count as u8;
    for offset in 1..count {
        let seat = PlayerId((builder.0 + offset) % count);
        if !sources.contains(&seat) {
            continue;
        }
        let target = state.player(seat);
        let value = state
            .map
            .within(hex, 2)
            .filter_map(|h| state.map.get(h))
            .filter(|d| d.owner == Some(seat))
            .filter_map(|d| d.building)
            .map(|b| federation::structure_value(target, b))
            .max()
            .unwrap_or(0);
        if value == 0 {
            continue;
        }
        let chargeable = target.power.chargeable();
        let vp_room = target.resources.vp + 1;
        let plain = value.min(chargeable).min(vp_room);
        let offers = if FactionAbility::of(target.faction).dual_leech(target) {
            let boosted = value.min(chargeable + 2).min(vp_room);
            if boosted == 0 {
                continue;
            }
            vec![
                ChargeOffer {
                    rewards: vec![
                        Reward::new(1, Resource::GainToken),
                        Reward::new(boosted as i32, Resource::ChargePower),
                    ],
                    vp_cost: boosted.saturating_sub(1) as i32,
                },
                ChargeOffer {
                    rewards: vec![
                        Reward::new(plain as i32, Resource::ChargePower),
                        Reward::new(1, Resource::GainToken),
                    ],
                    vp_cost: plain.saturating_sub(1) as i32,
                },
            ]
        } else {
            if plain == 0 {
                continue;
            }
            vec![ChargeOffer {
                rewards: vec![Reward::new(plain as i32, Resource::ChargePower)],
                vp_cost: plain.saturating_sub(1) as i32,
            }]
        };
        state.leech.push(PendingLeech {
            player: seat,
            offers,
        });
    }
    if !state.leech.is_empty() {
        state.set_phase(Phase::RoundLeech);
    }
}

fn handle_charge(
    state: &mut GameState,
    actor: PlayerId,
    command: &SubCommand,
) -> Result<(), MoveError> {
    let rewards = Reward::parse_list(arg(command, 0, "charge amount")?)?;
    let Some(pending) = state.leech.first().cloned() else {
        return Err(MoveError::Invariant("charge with no pending leech".into()));
    };
    let Some(offer) = pending.offers.iter().find(|o| o.rewards == rewards).cloned() else {
        return Err(MoveError::illegal(actor, "no such charge on offer"));
    };
    let mut charged = 0;
    for (index, reward) in offer.rewards.iter().enumerate() {
        let count = reward.count.max(0) as u32;
        match reward.kind {
            Resource::GainToken => state.player_mut(actor).power.gain(count),
            Resource::ChargePower => {
                if generate::brainstone_targets(state.player(actor), count).len() > 1 {
                    let tokens_after = offer.rewards[index + 1..]
                        .iter()
                        .filter(|r| r.kind == Resource::GainToken)
                        .map(|r| r.count.max(0) as u32)
                        .sum();
                    state.pending_charge = Some(PendingCharge {
                        steps: count,
                        vp: offer.vp_cost,
                        tokens_after,
                    });
                    state.subphases.push(SubPhase::BrainStone);
                    return Ok(());
                }
                charged += state.player_mut(actor).power.charge(count);
            }
            _ => return Err(MoveError::Invariant("malformed charge offer".into())),
        }
    }
    settle_leech(state, actor, charged, offer.vp_cost);
    Ok(())
}

fn handle_brainstone(
    state: &mut GameState,
    actor: PlayerId,
    command: &SubCommand,
    offered: &AvailableCommand,
) -> Result<(), MoveError> {
    let area: PowerArea = arg(command, 0, "power area")?.parse()?;
    let CommandData::BrainStone { areas } = &offered.data else {
        return Err(MoveError::Invariant("brainstone offer carries no areas".into()));
    };
    if !areas.contains(&area) {
        return Err(MoveError::illegal(
            actor,
            format!("the brainstone cannot reach {area}"),
        ));
    }
    let Some(pending) = state.pending_charge.take() else {
        return Err(MoveError::Invariant("brainstone with no pending charge".into()));
    };
    let player = state.player_mut(actor);
    let start = player.power.brainstone().map(area_rank).unwrap_or(0);
    let moved = area_rank(area).saturating_sub(start);
    player.power.move_brainstone(area);
    let charged = moved + player.power.charge(pending.steps.saturating_sub(moved));
    if pending.tokens_after > 0 {
        player.power.gain(pending.tokens_after);
    }
    state.subphases.pop();
    settle_leech(state, actor, charged, pending.vp);
    Ok(())
}

fn area_rank(area: PowerArea) -> u32 {
    match area {
        PowerArea::Area2 => 1,
        PowerArea::Area3 => 2,
        _ => 0,
    }
}

fn settle_leech(state: &mut GameState, actor: PlayerId, charged: u32, vp_cost: i32) {
    state
        .player_mut(actor)
        .resources
        .apply(Resource::VictoryPoint, -vp_cost);
    state.log.push(LogEntry::LeechSettled {
        player: actor,
        charged,
        vp_paid: vp_cost,
        declined: false,
    });
    if !state.leech.is_empty() {
        state.leech.remove(0);
    }
}

fn decline_leech(state: &mut GameState, actor: PlayerId) {
    state.log.push(LogEntry::LeechSettled {
        player: actor,
        charged: 0,
        vp_paid: 0,
        declined: true,
    });
    if !state.leech.is_empty() {
        state.leech.remove(0);
    }
}

fn handle_decline(state: &mut GameState, actor: PlayerId) -> Result<(), MoveError> {
    // An open subphase comes first: mid-line the mover's decline answers
    // their own pending question, not a charge offer further down the queue.
    match state.subphase() {
        Some(SubPhase::UpgradeResearch) => {
            state.subphases.pop();
            state.pending_tracks = None;
            return Ok(());
        }
        Some(SubPhase::ChooseTechTile) if state.phase == Phase::RoundGaia => {
            state.subphases.pop();
            income::finish_gaia(state);
            return Ok(());
        }
        _ => {}
    }
    if state.phase == Phase::RoundLeech {
        decline_leech(state, actor);
        return Ok(());
    }
    Err(MoveError::Unavailable {
        player: actor,
        command: CommandName::Decline,
    })
}

// ---------------------------------------------------------------------------
// Research and tech tiles

fn handle_up(
    rules: &CompiledRules,
    state: &mut GameState,
    actor: PlayerId,
    command: &SubCommand,
    offered: &AvailableCommand,
) -> Result<(), MoveError> {
    let track: ResearchTrack = arg(command, 0, "research track")?.parse()?;
    let CommandData::UpgradeResearch { tracks } = &offered.data else {
        return Err(MoveError::Invariant("research offer carries no tracks".into()));
    };
    if !tracks.contains(&track) {
        return Err(MoveError::illegal(
            actor,
            format!("cannot advance {track} right now"),
        ));
    }
    if matches!(state.subphase(), Some(SubPhase::UpgradeResearch)) {
        state.subphases.pop();
        state.pending_tracks = None;
    } else {
        debit(state, actor, Resource::Knowledge, 4)?;
        mark_main(state);
    }
    advance_research(rules, state, actor, track)
}

fn advance_research(
    rules: &CompiledRules,
    state: &mut GameState,
    actor: PlayerId,
    track: ResearchTrack,
) -> Result<(), MoveError> {
    let old = state.player(actor).level(track);
    if old >= 5 {
        return Err(MoveError::illegal(actor, format!("{track} is already at 5")));
    }
    let new = old + 1;
    let data = rules.track(track);
    // the previous level's standing events are replaced, not stacked
    for event in &data.events[old as usize] {
        if event.operator != Operator::Once {
            state.player_mut(actor).remove_event(event);
        }
    }
    state.player_mut(actor).research.insert(track, new);
    grant_tile_events(state, actor, data.events[new as usize].clone())?;
    if track == ResearchTrack::GaiaProject {
        let formers = rules.gaiaformers(new);
        state.player_mut(actor).gaiaformers = formers;
    }
    if new == 5 {
        {
            let player = state.player_mut(actor);
            if player.green_federations() == 0 {
                return Err(MoveError::illegal(
                    actor,
                    "level 5 requires an unused federation token",
                ));
            }
            player.used_federations += 1;
        }
        if track == ResearchTrack::Terraforming {
            if let Some(token) = state.pools.terraform_federation.take() {
                gain_fed_token(rules, state, actor, token)?;
            }
        }
    }
    fire_trigger(state, actor, Condition::Advance, 1)
}

fn handle_tech(
    rules: &CompiledRules,
    state: &mut GameState,
    actor: PlayerId,
    command: &SubCommand,
    offered: &AvailableCommand,
) -> Result<(), MoveError> {
    let pos: TechTilePos = arg(command, 0, "tech tile slot")?.parse()?;
    let CommandData::ChooseTechTile { options } = &offered.data else {
        return Err(MoveError::Invariant("tech offer carries no options".into()));
    };
    let Some(option) = options.iter().find(|o| o.pos == pos).cloned() else {
        return Err(MoveError::illegal(
            actor,
            format!("tech tile {pos} is not on offer"),
        ));
    };
    let gaia_conversion = state.phase == Phase::RoundGaia;
    if matches!(state.subphase(), Some(SubPhase::ChooseTechTile)) {
        state.subphases.pop();
    }
    if gaia_conversion {
        state
            .player_mut(actor)
            .power
            .consume_gaia(4)
            .map_err(|e| MoveError::illegal(actor, e.to_string()))?;
    }
    if let Some(tile) = option.standard {
        state.player_mut(actor).tech_tiles.push(OwnedTechTile {
            tile,
            covered: false,
        });
        let events = rules.tech_tiles.get(&tile).cloned().unwrap_or_default();
        grant_tile_events(state, actor, events)?;
        state.pending_tracks = pos.track().map(|t| vec![t]);
        state.subphases.push(SubPhase::UpgradeResearch);
    } else if let Some(tile) = option.advanced {
        state.pools.advanced.remove(&pos);
        {
            let player = state.player_mut(actor);
            if player.green_federations() == 0 {
                return Err(MoveError::illegal(
                    actor,
                    "advanced tiles require an unused federation token",
                ));
            }
            player.used_federations += 1;
            player.adv_tech_tiles.push(tile);
        }
        let events = rules.adv_tech_tiles.get(&tile).cloned().unwrap_or_default();
        grant_tile_events(state, actor, events)?;
        state.pending_tracks = pos.track().map(|t| vec![t]);
        state.subphases.push(SubPhase::UpgradeResearch);
        state.subphases.push(SubPhase::CoverTechTile);
    } else {
        return Err(MoveError::Invariant("tech option names no tile".into()));
    }
    state.invalidate_fed_caches();
    Ok(())
}

fn handle_cover(
    rules: &CompiledRules,
    state: &mut GameState,
    actor: PlayerId,
    command: &SubCommand,
    offered: &AvailableCommand,
) -> Result<(), MoveError> {
    let tile: TechTile = arg(command, 0, "tech tile")?.parse()?;
    let CommandData::CoverTechTile { tiles } = &offered.data else {
        return Err(MoveError::Invariant("cover offer carries no tiles".into()));
    };
    if !tiles.contains(&tile) {
        return Err(MoveError::illegal(
            actor,
            format!("tile {tile} cannot be covered"),
        ));
    }
    let events = rules.tech_tiles.get(&tile).cloned().unwrap_or_default();
    let player = state.player_mut(actor);
    let Some(owned) = player
        .tech_tiles
        .iter_mut()
        .find(|t| t.tile == tile && !t.covered)
    else {
        return Err(MoveError::illegal(actor, "no uncovered copy of that tile"));
    };
    owned.covered = true;
    for event in &events {
        player.remove_event(event);
    }
    state.subphases.pop();
    state.invalidate_fed_caches();
    Ok(())
}

/// Grant a tile's events: one-shots pay out immediately (scaled by their
/// condition when they have one), standing events join the player's list.
fn grant_tile_events(
    state: &mut GameState,
    actor: PlayerId,
    events: Vec<Event>,
) -> Result<(), MoveError> {
    for event in events {
        if event.operator == Operator::Once {
            let scale = match event.condition {
                Some(condition) => state.player(actor).condition_count(&state.map, condition),
                None => 1,
            };
            gain_rewards_scaled(state, actor, &event.rewards, scale)?;
        } else {
            state
                .player_mut(actor)
                .add_events(std::slice::from_ref(&event));
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Actions

fn handle_special(
    state: &mut GameState,
    actor: PlayerId,
    command: &SubCommand,
    offered: &AvailableCommand,
) -> Result<(), MoveError> {
    let rewards = Reward::parse_list(arg(command, 0, "special rewards")?)?;
    let CommandData::Special { options } = &offered.data else {
        return Err(MoveError::Invariant("special offer carries no options".into()));
    };
    if !options.iter().any(|o| o.rewards == rewards) {
        return Err(MoveError::illegal(actor, "no such special action available"));
    }
    {
        let player = state.player_mut(actor);
        let Some(event) = player
            .events
            .iter_mut()
            .find(|e| e.operator == Operator::Activate && !e.activated && e.rewards == rewards)
        else {
            return Err(MoveError::illegal(actor, "that special is already spent"));
        };
        event.activated = true;
    }
    mark_main(state);
    gain_rewards_scaled(state, actor, &rewards, 1)
}

fn handle_action(
    rules: &CompiledRules,
    state: &mut GameState,
    actor: PlayerId,
    command: &SubCommand,
    offered: &AvailableCommand,
) -> Result<(), MoveError> {
    let action: BoardAction = arg(command, 0, "board action")?.parse()?;
    let CommandData::BoardAction { options } = &offered.data else {
        return Err(MoveError::Invariant("action offer carries no options".into()));
    };
    let Some(option) = options.iter().find(|o| o.action == action).cloned() else {
        return Err(MoveError::illegal(
            actor,
            format!("action {action} is not available"),
        ));
    };
    for reward in &option.cost {
        let count = reward.count.max(0) as u32;
        match reward.kind {
            Resource::ChargePower => spend_power(state, actor, count)?,
            Resource::Qic => debit(state, actor, Resource::Qic, count)?,
            _ => return Err(MoveError::Invariant("unpayable action cost".into())),
        }
    }
    state.actions_taken.insert(action);
    mark_main(state);
    let effects = rules
        .board_actions
        .get(&action)
        .map(|d| d.effects.clone())
        .unwrap_or_default();
    for event in effects {
        let scale = match event.condition {
            Some(condition) => state.player(actor).condition_count(&state.map, condition),
            None => 1,
        };
        gain_rewards_scaled(state, actor, &event.rewards, scale)?;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Free actions

fn handle_spend(
    state: &mut GameState,
    actor: PlayerId,
    command: &SubCommand,
    offered: &AvailableCommand,
) -> Result<(), MoveError> {
    let (cost_text, income_text) = match command.args.as_slice() {
        [cost, kw, income] if kw.as_str() == "for" => (cost.as_str(), income.as_str()),
        _ => return Err(MoveError::Parse(ParseError::MissingArgument("for"))),
    };
    let cost = Reward::merge(Reward::parse_list(cost_text)?);
    let income = Reward::merge(Reward::parse_list(income_text)?);
    let CommandData::Spend { conversions } = &offered.data else {
        return Err(MoveError::Invariant("spend offer carries no rates".into()));
    };
    let conversions = conversions.clone();
    let mut cost_left = tally(&cost);
    let mut income_left = tally(&income);
    while !cost_left.is_empty() || !income_left.is_empty() {
        let Some(rate) = conversions
            .iter()
            .find(|c| covers(c, &cost_left, &income_left))
        else {
            return Err(MoveError::illegal(
                actor,
                "not a combination of legal conversions",
            ));
        };
        let times = max_times(rate, &cost_left, &income_left);
        apply_conversion(state, actor, rate, times)?;
        subtract(&mut cost_left, &rate.cost, times);
        subtract(&mut income_left, &rate.income, times);
    }
    Ok(())
}

fn tally(rewards: &[Reward]) -> std::collections::BTreeMap<Resource, u32> {
    rewards
        .iter()
        .filter(|r| r.count > 0)
        .map(|r| (r.kind, r.count as u32))
        .collect()
}

fn covers(
    rate: &Conversion,
    cost_left: &std::collections::BTreeMap<Resource, u32>,
    income_left: &std::collections::BTreeMap<Resource, u32>,
) -> bool {
    !rate.cost.is_empty()
        && rate
            .cost
            .iter()
            .all(|r| cost_left.get(&r.kind).copied().unwrap_or(0) >= r.count.max(0) as u32)
        && rate
            .income
            .iter()
            .all(|r| income_left.get(&r.kind).copied().unwrap_or(0) >= r.count.max(0) as u32)
}

fn max_times(
    rate: &Conversion,
    cost_left: &std::collections::BTreeMap<Resource, u32>,
    income_left: &std::collections::BTreeMap<Resource, u32>,
) -> u32 {
    let mut times = u32::MAX;
    for reward in rate.cost.iter().chain(&rate.income) {
        let per = reward.count.max(0) as u32;
        if per == 0 {
            continue;
        }
        let left = if rate.cost.contains(reward) {
            cost_left.get(&reward.kind).copied().unwrap_or(0)
        } else {
            income_left.get(&reward.kind).copied().unwrap_or(0)
        };
        times = times.min(left / per);
    }
    times.max(1)
}

fn subtract(
    left: &mut std::collections::BTreeMap<Resource, u32>,
    rewards: &[Reward],
    times: u32,
) {
    for reward in rewards {
        let total = reward.count.max(0) as u32 * times;
        if let Some(slot) = left.get_mut(&reward.kind) {
            *slot = slot.saturating_sub(total);
            if *slot == 0 {
                left.remove(&reward.kind);
            }
        }
    }
}

fn apply_conversion(
    state: &mut GameState,
    actor: PlayerId,
    rate: &Conversion,
    times: u32,
) -> Result<(), MoveError> {
    for reward in &rate.cost {
        let total = reward.count.max(0) as u32 * times;
        match reward.kind {
            Resource::ChargePower => spend_power(state, actor, total)?,
            Resource::Credit | Resource::Ore | Resource::Knowledge | Resource::Qic => {
                debit(state, actor, reward.kind, total)?;
            }
            Resource::TokenArea3 => {
                state
                    .player_mut(actor)
                    .power
                    .spend_tokens(total)
                    .map_err(|e| MoveError::illegal(actor, e.to_string()))?;
            }
            Resource::GaiaFormer => {
                let player = state.player_mut(actor);
                if player.formers_in_stock() < total {
                    return Err(MoveError::illegal(actor, "no gaiaformer left to commit"));
                }
                player.gaiaformers_in_gaia += total;
            }
            _ => return Err(MoveError::Invariant("unpayable conversion cost".into())),
        }
    }
    for reward in &rate.income {
        state
            .player_mut(actor)
            .gain_plain(Reward::new(reward.count * times as i32, reward.kind));
    }
    Ok(())
}

/// Spend power, moving the brainstone only when the regular tokens in area
/// three cannot cover the bill on their own.
fn spend_power(state: &mut GameState, actor: PlayerId, amount: u32) -> Result<(), MoveError> {
    let player = state.player_mut(actor);
    let doubled = player.power_doubled();
    let worth = if doubled { 2 } else { 1 };
    let use_brainstone =
        player.power.brainstone() == Some(PowerArea::Area3) && player.power.area3() * worth < amount;
    player
        .power
        .spend(amount, doubled, use_brainstone)
        .map_err(|e| MoveError::illegal(actor, e.to_string()))
}

fn handle_burn(
    state: &mut GameState,
    actor: PlayerId,
    command: &SubCommand,
    offered: &AvailableCommand,
) -> Result<(), MoveError> {
    let text = arg(command, 0, "burn count")?;
    let count: u32 = text
        .parse()
        .map_err(|_| ParseError::keyword("burn count", text))?;
    let CommandData::Burn { max } = offered.data else {
        return Err(MoveError::Invariant("burn offer carries no limit".into()));
    };
    if count == 0 || count > max {
        return Err(MoveError::illegal(
            actor,
            format!("can burn between 1 and {max} power"),
        ));
    }
    let to_gaia = state.player(actor).burns_to_gaia();
    state
        .player_mut(actor)
        .power
        .burn(count, to_gaia)
        .map_err(|e| MoveError::illegal(actor, e.to_string()))
}

// ---------------------------------------------------------------------------
// Passing

fn handle_pass(
    rules: &CompiledRules,
    state: &mut GameState,
    actor: PlayerId,
    command: &SubCommand,
    offered: &AvailableCommand,
) -> Result<(), MoveError> {
    let events: Vec<Event> = state
        .player(actor)
        .events_with(Operator::Pass)
        .cloned()
        .collect();
    for event in events {
        let scale = match event.condition {
            Some(condition) => state.player(actor).condition_count(&state.map, condition),
            None => 1,
        };
        gain_rewards_scaled(state, actor, &event.rewards, scale)?;
    }
    if state.round < 6 {
        let booster: Booster = arg(command, 0, "booster")?.parse()?;
        let CommandData::Pass { boosters } = &offered.data else {
            return Err(MoveError::Invariant("pass offer carries no boosters".into()));
        };
        if !boosters.contains(&booster) {
            return Err(MoveError::illegal(
                actor,
                format!("booster {booster} is not in the pool"),
            ));
        }
        return_booster(state, actor);
        take_booster(rules, state, actor, booster)?;
    } else if !command.args.is_empty() {
        return Err(MoveError::illegal(
            actor,
            "no booster exchange in the last round",
        ));
    }
    state.player_mut(actor).passed = true;
    state.passed.push(actor);
    mark_main(state);
    Ok(())
}

fn take_booster(
    rules: &CompiledRules,
    state: &mut GameState,
    actor: PlayerId,
    booster: Booster,
) -> Result<(), MoveError> {
    let Some(pos) = state.pools.boosters.iter().position(|b| *b == booster) else {
        return Err(MoveError::illegal(actor, "booster not in the pool"));
    };
    state.pools.boosters.remove(pos);
    let events = rules.boosters.get(&booster).cloned().unwrap_or_default();
    let player = state.player_mut(actor);
    player.booster = Some(booster);
    player.add_events(&events);
    Ok(())
}

fn return_booster(state: &mut GameState, actor: PlayerId) {
    let player = state.player_mut(actor);
    let Some(old) = player.booster.take() else {
        return;
    };
    let stale: Vec<Event> = player
        .events
        .iter()
        .filter(|e| matches!(e.source, EventSource::Booster { .. }))
        .cloned()
        .collect();
    for event in &stale {
        player.remove_event(event);
    }
    state.pools.boosters.push(old);
    state.pools.boosters.sort_unstable();
}

// ---------------------------------------------------------------------------
// Federations

fn handle_federation(
    rules: &CompiledRules,
    state: &mut GameState,
    actor: PlayerId,
    command: &SubCommand,
    offered: &AvailableCommand,
) -> Result<(), MoveError> {
    let hex_list = arg(command, 0, "federation hexes")?;
    let token: FedToken = arg(command, 1, "federation token")?.parse()?;
    let mut hexes = Vec::new();
    for part in hex_list.split(',') {
        hexes.push(state.map.parse_location(part.trim())?);
    }
    let CommandData::FormFederation { federations, tiles } = &offered.data else {
        return Err(MoveError::Invariant("federation offer carries no layouts".into()));
    };
    if !tiles.contains(&token) {
        return Err(MoveError::illegal(
            actor,
            format!("federation token {token} is not in the pool"),
        ));
    }
    let Some(info) = federation::matches_candidate(federations, &hexes) else {
        return Err(MoveError::illegal(
            actor,
            "those hexes do not form a valid federation",
        ));
    };
    // satellites are paid one power token (or one QIC for Ivits) apiece
    let satellite_cost = FactionAbility::of(state.player(actor).faction).satellite_cost();
    let new_satellites = info.new_satellites;
    if new_satellites > 0 {
        match satellite_cost {
            Resource::Qic => debit(state, actor, Resource::Qic, new_satellites)?,
            _ => {
                state
                    .player_mut(actor)
                    .power
                    .discard_any(new_satellites)
                    .map_err(|e| MoveError::illegal(actor, e.to_string()))?;
            }
        }
    }
    let mut placed = 0;
    for hex in &info.hexes {
        let Some(data) = state.map.get_mut(*hex) else {
            return Err(MoveError::Invariant("federation hex missing".into()));
        };
        if !data.federations.contains(&actor) {
            data.federations.push(actor);
        }
        let structure = data.has_structure_of(actor);
        if !structure && !data.satellites.contains(&actor) {
            data.satellites.push(actor);
            placed += 1;
        }
    }
    if placed != new_satellites {
        return Err(MoveError::Invariant(
            "federation satellite count out of step".into(),
        ));
    }
    state.player_mut(actor).satellites += placed;
    state.player_mut(actor).federations_formed += 1;
    {
        let Some(count) = state.pools.federations.get_mut(&token) else {
            return Err(MoveError::Invariant("unknown federation token".into()));
        };
        if *count == 0 {
            return Err(MoveError::illegal(actor, "that token pile is empty"));
        }
        *count -= 1;
    }
    gain_fed_token(rules, state, actor, token)?;
    fire_trigger(state, actor, Condition::Federation, 1)?;
    state.invalidate_fed_caches();
    mark_main(state);
    Ok(())
}

fn gain_fed_token(
    rules: &CompiledRules,
    state: &mut GameState,
    actor: PlayerId,
    token: FedToken,
) -> Result<(), MoveError> {
    state.player_mut(actor).federations.push(token);
    let rewards = rules
        .fed_tokens
        .get(&token)
        .map(|d| d.rewards.clone())
        .unwrap_or_default();
    gain_rewards_scaled(state, actor, &rewards, 1)
}

fn handle_fedtile(
    rules: &CompiledRules,
    state: &mut GameState,
    actor: PlayerId,
    command: &SubCommand,
    offered: &AvailableCommand,
) -> Result<(), MoveError> {
    let token: FedToken = arg(command, 0, "federation token")?.parse()?;
    let CommandData::ChooseFederationTile { tiles } = &offered.data else {
        return Err(MoveError::Invariant("token offer carries no tiles".into()));
    };
    if !tiles.contains(&token) {
        return Err(MoveError::illegal(
            actor,
            format!("federation token {token} is not on offer"),
        ));
    }
    match state.subphase() {
        Some(SubPhase::RescoreFederationTile) => {
            state.subphases.pop();
            let rewards = rules
                .fed_tokens
                .get(&token)
                .map(|d| d.rewards.clone())
                .unwrap_or_default();
            gain_rewards_scaled(state, actor, &rewards, 1)
        }
        Some(SubPhase::ChooseFederationTile) => {
            state.subphases.pop();
            {
                let Some(count) = state.pools.federations.get_mut(&token) else {
                    return Err(MoveError::Invariant("unknown federation token".into()));
                };
                if *count == 0 {
                    return Err(MoveError::illegal(actor, "that token pile is empty"));
                }
                *count -= 1;
            }
            gain_fed_token(rules, state, actor, token)
        }
        _ => Err(MoveError::Unavailable {
            player: actor,
            command: CommandName::ChooseFederationTile,
        }),
    }
}

// ---------------------------------------------------------------------------
// Faction follow-ups

fn handle_swap(
    state: &mut GameState,
    actor: PlayerId,
    command: &SubCommand,
    offered: &AvailableCommand,
) -> Result<(), MoveError> {
    let hex = state.map.parse_location(arg(command, 0, "mine location")?)?;
    let CommandData::PiSwap { hexes } = &offered.data else {
        return Err(MoveError::Invariant("swap offer carries no hexes".into()));
    };
    if !hexes.contains(&hex) {
        return Err(MoveError::illegal(actor, "no own mine at that location"));
    }
    let pi_hex = state
        .map
        .hexes
        .iter()
        .find(|(_, d)| {
            d.owner == Some(actor) && d.building == Some(Building::PlanetaryInstitute)
        })
        .map(|(h, _)| *h);
    let Some(pi_hex) = pi_hex else {
        return Err(MoveError::illegal(actor, "no planetary institute on the map"));
    };
    if let Some(data) = state.map.get_mut(pi_hex) {
        data.building = Some(Building::Mine);
    }
    if let Some(data) = state.map.get_mut(hex) {
        data.building = Some(Building::PlanetaryInstitute);
    }
    state.subphases.pop();
    state.invalidate_fed_caches();
    Ok(())
}

fn handle_downgrade(
    rules: &CompiledRules,
    state: &mut GameState,
    actor: PlayerId,
    command: &SubCommand,
    offered: &AvailableCommand,
) -> Result<(), MoveError> {
    let hex = state.map.parse_location(arg(command, 0, "lab location")?)?;
    let CommandData::DowngradeLab { hexes } = &offered.data else {
        return Err(MoveError::Invariant("downgrade offer carries no hexes".into()));
    };
    if !hexes.contains(&hex) {
        return Err(MoveError::illegal(actor, "no own research lab there"));
    }
    cover_slot(rules, state, actor, Building::ResearchLab);
    state.player_mut(actor).remove_building(Building::ResearchLab);
    state.player_mut(actor).add_building(Building::TradingStation);
    uncover_slot(rules, state, actor, Building::TradingStation);
    if let Some(data) = state.map.get_mut(hex) {
        data.building = Some(Building::TradingStation);
    }
    state.subphases.pop();
    state.pending_tracks = None;
    state.subphases.push(SubPhase::UpgradeResearch);
    state.invalidate_fed_caches();
    Ok(())
}

// ---------------------------------------------------------------------------
// Ships

fn handle_move_ship(
    state: &mut GameState,
    actor: PlayerId,
    command: &SubCommand,
    offered: &AvailableCommand,
) -> Result<(), MoveError> {
    let from = state.map.parse_location(arg(command, 0, "ship location")?)?;
    let to = state.map.parse_location(arg(command, 1, "destination")?)?;
    let CommandData::MoveShip { ships } = &offered.data else {
        return Err(MoveError::Invariant("ship offer carries no moves".into()));
    };
    let Some(ship) = ships.iter().find(|s| s.from == from) else {
        return Err(MoveError::illegal(actor, "no own ship at that location"));
    };
    if !ship.targets.contains(&to) {
        return Err(MoveError::illegal(actor, "the ship cannot reach there"));
    }
    {
        let Some(data) = state.map.get_mut(from) else {
            return Err(MoveError::Invariant("ship hex missing".into()));
        };
        let Some(pos) = data.ships.iter().position(|p| *p == actor) else {
            return Err(MoveError::illegal(actor, "no own ship at that location"));
        };
        data.ships.remove(pos);
    }
    {
        let Some(data) = state.map.get_mut(to) else {
            return Err(MoveError::Invariant("ship hex missing".into()));
        };
        data.ships.push(actor);
    }
    // deliver to each newly adjacent foreign colony, once per colony per ship owner
    let neighbor_hexes: Vec<Hex> = state.map.neighbors(to).collect();
    let mut deliveries: Vec<(Hex, PlayerId)> = Vec::new();
    for hex in neighbor_hexes {
        let Some(data) = state.map.get(hex) else {
            continue;
        };
        let colonized = data.planet.is_some()
            && data.building.map(Building::is_colonizing).unwrap_or(false);
        if !colonized || data.trade_tokens.contains(&actor) {
            continue;
        }
        match data.owner {
            Some(host) if host != actor => deliveries.push((hex, host)),
            _ => {}
        }
    }
    for (hex, host) in deliveries {
        if let Some(data) = state.map.get_mut(hex) {
            data.trade_tokens.push(actor);
        }
        let deliverer = state.player_mut(actor);
        deliverer.gain_plain(Reward::new(2, Resource::Credit));
        deliverer.gain_plain(Reward::new(1, Resource::Knowledge));
        let hosting = state.player_mut(host);
        hosting.gain_plain(Reward::new(1, Resource::Credit));
        hosting.power.charge(1);
    }
    mark_main(state);
    Ok(())
}

fn handle_place_ship(
    state: &mut GameState,
    actor: PlayerId,
    command: &SubCommand,
    offered: &AvailableCommand,
) -> Result<(), MoveError> {
    let hex = state.map.parse_location(arg(command, 0, "ship location")?)?;
    let CommandData::PlaceShip { hexes } = &offered.data else {
        return Err(MoveError::Invariant("ship offer carries no hexes".into()));
    };
    if !hexes.contains(&hex) {
        return Err(MoveError::illegal(actor, "ships launch from own planets"));
    }
    let Some(data) = state.map.get_mut(hex) else {
        return Err(MoveError::Invariant("ship hex missing".into()));
    };
    data.ships.push(actor);
    state.subphases.pop();
    Ok(())
}

// ---------------------------------------------------------------------------
// Reward payout

pub(super) fn gain_rewards_scaled(
    state: &mut GameState,
    actor: PlayerId,
    rewards: &[Reward],
    scale: u32,
) -> Result<(), MoveError> {
    if scale == 0 {
        return Ok(());
    }
    for reward in rewards {
        gain_one(state, actor, Reward::new(reward.count * scale as i32, reward.kind))?;
    }
    Ok(())
}

/// One reward lands either in a pool or as a pending decision on the
/// subphase stack.
fn gain_one(state: &mut GameState, actor: PlayerId, reward: Reward) -> Result<(), MoveError> {
    let count = reward.count.max(0) as u32;
    match reward.kind {
        Resource::Credit
        | Resource::Ore
        | Resource::Knowledge
        | Resource::Qic
        | Resource::VictoryPoint
        | Resource::GainToken
        | Resource::ChargePower => {
            state.player_mut(actor).gain_plain(reward);
        }
        Resource::TokenArea3 => {
            state
                .player_mut(actor)
                .gain_plain(Reward::new(reward.count, Resource::GainToken));
        }
        Resource::GaiaFormer => state.player_mut(actor).gaiaformers += count,
        Resource::AdvanceResearch => {
            for _ in 0..count {
                state.pending_tracks = None;
                state.subphases.push(SubPhase::UpgradeResearch);
            }
        }
        Resource::UpgradeLowest => {
            let player = state.player(actor);
            let lowest = ResearchTrack::ALL
                .iter()
                .map(|t| player.level(*t))
                .min()
                .unwrap_or(0);
            let tracks: Vec<ResearchTrack> = ResearchTrack::ALL
                .iter()
                .copied()
                .filter(|t| player.level(*t) == lowest)
                .collect();
            state.pending_tracks = Some(tracks);
            state.subphases.push(SubPhase::UpgradeResearch);
        }
        Resource::TechTile => {
            for _ in 0..count {
                state.subphases.push(SubPhase::ChooseTechTile);
            }
        }
        Resource::LostPlanet => state.subphases.push(SubPhase::PlaceLostPlanet),
        Resource::SpaceStation => state.subphases.push(SubPhase::SpaceStation),
        Resource::FederationToken => state.subphases.push(SubPhase::ChooseFederationTile),
        Resource::RescoreFederation => state.subphases.push(SubPhase::RescoreFederationTile),
        Resource::TemporaryStep => {
            state.temp_steps += count;
            state.subphases.push(SubPhase::BuildMineOrGaiaFormer);
        }
        Resource::TemporaryRange => {
            state.temp_range += count;
            state.subphases.push(SubPhase::BuildMineOrGaiaFormer);
        }
        Resource::Ship => {
            for _ in 0..count {
                state.subphases.push(SubPhase::PlaceShip);
            }
        }
        Resource::PiSwap => state.subphases.push(SubPhase::PiSwap),
        Resource::DowngradeLab => state.subphases.push(SubPhase::DowngradeLab),
    }
    Ok(())
}

fn fire_trigger(
    state: &mut GameState,
    actor: PlayerId,
    condition: Condition,
    times: u32,
) -> Result<(), MoveError> {
    if times == 0 {
        return Ok(());
    }
    let payouts: Vec<Vec<Reward>> = state
        .player(actor)
        .events
        .iter()
        .filter(|e| e.operator == Operator::Trigger && e.condition == Some(condition))
        .map(|e| e.rewards.clone())
        .collect();
    for rewards in payouts {
        gain_rewards_scaled(state, actor, &rewards, times)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use concord_protocol::{Phase, PlayerId, Resource};

    use crate::engine::GameEngine;
    use crate::rules::{load_rules, RulesSource};

    fn engine() -> GameEngine {
        let rules = load_rules(RulesSource::Embedded).unwrap();
        GameEngine::new(rules)
    }

    #[test]
    fn init_builds_the_board_and_seats_the_players() {
        let mut engine = engine();
        engine.process("init 2 autumn-drift").unwrap();
        assert_eq!(engine.state.phase, Phase::SetupFaction);
        assert_eq!(engine.state.player_count, 2);
        assert_eq!(engine.state.map.hexes.len(), 7 * 19);
        assert_eq!(engine.state.pools.boosters.len(), 5);
        assert_eq!(engine.state.pools.scoring.len(), 6);
    }

    #[test]
    fn init_rejects_silly_player_counts() {
        let mut engine = engine();
        assert!(engine.process("init 1 autumn-drift").is_err());
        assert!(engine.process("init 6 autumn-drift").is_err());
        // a failed line leaves the state untouched
        assert_eq!(engine.state.phase, Phase::SetupInit);
    }

    #[test]
    fn faction_choices_shrink_as_seats_fill() {
        let mut engine = engine();
        engine.process("init 2 autumn-drift").unwrap();
        engine.process("p1 faction terrans").unwrap();
        let err = engine.process("p2 faction terrans").unwrap_err();
        assert!(err.to_string().contains("not available"));
        engine.process("p2 faction hadsch-hallas").unwrap();
        assert_eq!(engine.state.phase, Phase::SetupBuilding);
        assert_eq!(engine.state.players.len(), 2);
    }

    #[test]
    fn out_of_turn_moves_are_refused() {
        let mut engine = engine();
        engine.process("init 2 autumn-drift").unwrap();
        let err = engine.process("p2 faction terrans").unwrap_err();
        assert!(matches!(
            err,
            crate::error::MoveError::NotYourTurn { player: PlayerId(1) }
        ));
    }

    #[test]
    fn auction_seats_factions_by_bid() {
        let mut engine = engine();
        engine.process("init 2 autumn-drift auction").unwrap();
        engine.process("p1 faction terrans").unwrap();
        engine.process("p2 faction gleens").unwrap();
        assert_eq!(engine.state.phase, Phase::SetupAuction);
        engine.process("p1 bid terrans 0").unwrap();
        engine.process("p2 bid terrans 1").unwrap();
        // p1 was outbid and must bid again
        engine.process("p1 bid gleens 0").unwrap();
        assert_eq!(engine.state.phase, Phase::SetupBuilding);
        let id = engine
            .state
            .player_by_faction(concord_protocol::Faction::Terrans)
            .unwrap();
        assert_eq!(id, PlayerId(1));
        let terrans = engine.state.player(id);
        assert_eq!(terrans.bid, 1);
        assert_eq!(terrans.resources.vp, 9);
    }

    #[test]
    fn setup_places_mines_snake_order() {
        let mut engine = engine();
        engine.process("init 2 autumn-drift").unwrap();
        engine.process("p1 faction terrans").unwrap();
        engine.process("p2 faction hadsch-hallas").unwrap();
        // p1, p2, p2, p1
        let order: Vec<PlayerId> = engine.state.setup_queue.clone();
        assert_eq!(
            order,
            vec![PlayerId(0), PlayerId(1), PlayerId(1), PlayerId(0)]
        );
    }

    #[test]
    fn setup_flows_into_the_first_round() {
        let mut engine = engine();
        engine.process("init 2 autumn-drift").unwrap();
        engine.process("p1 faction terrans").unwrap();
        engine.process("p2 faction hadsch-hallas").unwrap();
        // drive setup from the published menus
        while engine.state.phase == Phase::SetupBuilding
            || engine.state.phase == Phase::SetupBooster
        {
            let offer = engine.state.available[0].clone();
            let player = offer.player;
            let text = match &offer.data {
                concord_protocol::CommandData::Build { options } => {
                    format!(
                        "p{} build {} {}",
                        player.0 + 1,
                        options[0].building,
                        options[0].hex
                    )
                }
                concord_protocol::CommandData::ChooseBooster { boosters } => {
                    format!("p{} booster {}", player.0 + 1, boosters[0])
                }
                other => panic!("unexpected setup offer {other:?}"),
            };
            engine.process(&text).unwrap();
        }
        assert_eq!(engine.state.phase, Phase::RoundMove);
        assert_eq!(engine.state.round, 1);
    }

    #[test]
    fn burn_converts_two_tokens_into_one_charge() {
        let mut engine = engine();
        engine.process("init 2 autumn-drift").unwrap();
        engine.process("p1 faction terrans").unwrap();
        engine.process("p2 faction hadsch-hallas").unwrap();
        // skip to the burn arithmetic without driving a whole setup
        let player = engine.state.player_mut(PlayerId(0));
        let before = player.power.area2();
        assert!(before >= 2);
        player.power.burn(1, false).unwrap();
        assert_eq!(player.power.area2(), before - 2);
        assert_eq!(player.power.area3(), 1);
    }

    #[test]
    fn spend_decomposes_into_offered_rates() {
        use super::{covers, max_times, tally};
        use concord_protocol::{Conversion, Reward};

        let rates = vec![Conversion {
            cost: "4pw".parse::<Reward>().map(|r| vec![r]).unwrap(),
            income: "1q".parse::<Reward>().map(|r| vec![r]).unwrap(),
        }];
        let cost = tally(&["8pw".parse::<Reward>().unwrap()]);
        let income = tally(&["2q".parse::<Reward>().unwrap()]);
        assert!(covers(&rates[0], &cost, &income));
        assert_eq!(max_times(&rates[0], &cost, &income), 2);
    }

    /// A leech offer is the structure value, capped by the target's open
    /// charge capacity and by the victory points they can pay (vp + 1).
    #[test]
    fn leech_offers_honour_all_three_caps() {
        use concord_protocol::{Building, Hex, Reward};

        use crate::power::PowerBowls;

        let mut engine = engine();
        engine.process("init 2 autumn-drift").unwrap();
        engine.process("p1 faction terrans").unwrap();
        engine.process("p2 faction hadsch-hallas").unwrap();
        let state = &mut engine.state;
        state.phase = Phase::RoundMove;

        let planets: Vec<Hex> = state.map.planet_hexes().map(|(hex, _)| hex).collect();
        let (site, neighbour) = planets
            .iter()
            .flat_map(|a| planets.iter().map(move |b| (*a, *b)))
            .find(|(a, b)| a != b && a.distance(*b) <= 2)
            .expect("no close planet pair on this map");
        {
            let cell = state.map.get_mut(site).unwrap();
            cell.owner = Some(PlayerId(0));
            cell.building = Some(Building::Mine);
        }
        {
            let cell = state.map.get_mut(neighbour).unwrap();
            cell.owner = Some(PlayerId(1));
            cell.building = Some(Building::PlanetaryInstitute);
        }

        // Uncapped: the institute's full value of 3 is offered for 2 vp.
        super::enqueue_leech(state, site, PlayerId(0));
        assert_eq!(state.leech.len(), 1);
        let offer = &state.leech[0].offers[0];
        assert_eq!(offer.rewards, vec![Reward::new(3, Resource::ChargePower)]);
        assert_eq!(offer.vp_cost, 2);

        // One token in area 1 can only absorb two steps.
        state.leech.clear();
        state.phase = Phase::RoundMove;
        state.player_mut(PlayerId(1)).power = PowerBowls::new(1, 0, false);
        super::enqueue_leech(state, site, PlayerId(0));
        let offer = &state.leech[0].offers[0];
        assert_eq!(offer.rewards, vec![Reward::new(2, Resource::ChargePower)]);
        assert_eq!(offer.vp_cost, 1);

        // At zero vp only the free first step is on offer.
        state.leech.clear();
        state.phase = Phase::RoundMove;
        state.player_mut(PlayerId(1)).power = PowerBowls::new(4, 4, false);
        state.player_mut(PlayerId(1)).resources.vp = 0;
        super::enqueue_leech(state, site, PlayerId(0));
        let offer = &state.leech[0].offers[0];
        assert_eq!(offer.rewards, vec![Reward::new(1, Resource::ChargePower)]);
        assert_eq!(offer.vp_cost, 0);
    }

    /// A build that opens a tech choice must settle it in the same line,
    /// even when the new building also queues charge offers for a
    /// neighbour and hands them the next decision.
    #[test]
    fn open_decisions_cannot_hide_behind_the_charge_queue() {
        use concord_protocol::{Building, Hex, SubPhase};

        use crate::engine::generate;

        let mut engine = engine();
        engine.process("init 2 autumn-drift").unwrap();
        engine.process("p1 faction terrans").unwrap();
        engine.process("p2 faction hadsch-hallas").unwrap();
        let state = &mut engine.state;
        state.phase = Phase::RoundMove;
        state.round = 1;
        state.current = Some(PlayerId(0));
        state.subphases = vec![SubPhase::BeforeMove];

        let planets: Vec<Hex> = state.map.planet_hexes().map(|(hex, _)| hex).collect();
        let (site, neighbour) = planets
            .iter()
            .flat_map(|a| planets.iter().map(move |b| (*a, *b)))
            .find(|(a, b)| a != b && a.distance(*b) <= 2)
            .expect("no close planet pair on this map");
        {
            let cell = state.map.get_mut(site).unwrap();
            cell.owner = Some(PlayerId(0));
            cell.building = Some(Building::TradingStation);
        }
        {
            let cell = state.map.get_mut(neighbour).unwrap();
            cell.owner = Some(PlayerId(1));
            cell.building = Some(Building::Mine);
        }
        state.player_mut(PlayerId(0)).add_building(Building::TradingStation);
        state.player_mut(PlayerId(0)).resources.credits = 20;
        state.player_mut(PlayerId(0)).resources.knowledge = 10;

        let rules = load_rules(RulesSource::Embedded).unwrap();
        let available = generate::refresh(&rules, &mut engine.state);
        engine.state.available = available;

        // The bare upgrade leaves the tech choice dangling: refused and
        // rolled back, charge offers included.
        let err = engine.process(&format!("p1 build lab {site}")).unwrap_err();
        assert!(err.to_string().contains("pending decision"));
        assert!(engine.state.leech.is_empty());
        assert_eq!(engine.state.subphases, vec![SubPhase::BeforeMove]);

        // Settled in the same line, the move stands and the neighbour is
        // owed their charge offer.
        let slot = *engine.state.pools.tech.keys().next().unwrap();
        engine
            .process(&format!("p1 build lab {site}. tech {slot}. decline"))
            .unwrap();
        assert_eq!(engine.state.player(PlayerId(0)).tech_tiles.len(), 1);
        assert_eq!(engine.state.subphases, vec![SubPhase::AfterMove]);
        assert_eq!(engine.state.leech.len(), 1);
        assert_eq!(engine.state.leech[0].player, PlayerId(1));
    }
}
