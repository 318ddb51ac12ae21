use std::collections::BTreeSet;

use concord_protocol::{
    AvailableCommand, BidOption, BoardAction, BoardActionOption, BuildOption, Building,
    CommandData, CommandName, Conversion, Faction, FederationInfo, FedToken, Hex, Operator,
    Phase, PlanetType, PlayerId, PowerArea, ResearchTrack, Resource, Reward, ShipMove,
    SpecialOption, SubPhase, TechTile, TechTileOption,
};

use crate::engine::GameState;
use crate::faction::FactionAbility;
use crate::federation;
use crate::player::{FedCache, Player};
use crate::rules::CompiledRules;

/// Rebuild the legal next moves for the current state.
///
/// Dispatches on the active subphase first, then on the phase. The result is
/// both the UI menu and the executor's validation grammar; a mandatory
/// subphase with no legal answer yields the [`CommandName::DeadEnd`]
/// sentinel instead of an empty set.
pub fn refresh(rules: &CompiledRules, state: &mut GameState) -> Vec<AvailableCommand> {
    match state.phase {
        Phase::SetupInit => vec![AvailableCommand::bare(CommandName::Init, PlayerId(0))],
        Phase::SetupBoard | Phase::RoundIncome | Phase::EndGame => Vec::new(),
        Phase::SetupFaction => faction_choices(state),
        Phase::SetupAuction => auction_bids(state),
        Phase::SetupBuilding => setup_builds(state),
        Phase::SetupBooster => booster_choices(state),
        Phase::RoundGaia => gaia_choices(rules, state),
        Phase::RoundLeech => leech_choices(rules, state),
        Phase::RoundMove => move_choices(rules, state),
    }
}

fn dead_end(player: PlayerId, subphase: SubPhase) -> AvailableCommand {
    AvailableCommand::new(CommandName::DeadEnd, player, CommandData::DeadEnd { subphase })
}

// ---------------------------------------------------------------------------
// Setup phases
// ---------------------------------------------------------------------------

fn faction_choices(state: &GameState) -> Vec<AvailableCommand> {
    let Some(actor) = state.setup_queue.first().copied() else {
        return Vec::new();
    };
    let taken: Vec<Faction> = if state.settings.auction {
        state.auction.iter().map(|slot| slot.faction).collect()
    } else {
        state.players.iter().map(|p| p.faction).collect()
    };
    let homes: Vec<PlanetType> = taken.iter().map(|f| f.home_planet()).collect();
    let factions: Vec<Faction> = Faction::ALL
        .iter()
        .copied()
        .filter(|f| !taken.contains(f) && !homes.contains(&f.home_planet()))
        .collect();
    vec![AvailableCommand::new(
        CommandName::ChooseFaction,
        actor,
        CommandData::ChooseFaction { factions },
    )]
}

fn auction_bids(state: &GameState) -> Vec<AvailableCommand> {
    let Some(actor) = state.next_bidder() else {
        return Vec::new();
    };
    let options: Vec<BidOption> = state
        .auction
        .iter()
        .filter(|slot| slot.holder != Some(actor))
        .map(|slot| BidOption {
            faction: slot.faction,
            min_bid: if slot.holder.is_some() {
                slot.bid as i32 + 1
            } else {
                0
            },
        })
        .collect();
    vec![AvailableCommand::new(
        CommandName::Bid,
        actor,
        CommandData::Bid { options },
    )]
}

fn setup_builds(state: &GameState) -> Vec<AvailableCommand> {
    let Some(actor) = state.setup_queue.first().copied() else {
        return Vec::new();
    };
    let player = state.player(actor);
    let building = if FactionAbility::of(player.faction).setup_institute_only() {
        Building::PlanetaryInstitute
    } else {
        Building::Mine
    };
    let home = player.faction.home_planet();
    let options: Vec<BuildOption> = state
        .map
        .planet_hexes()
        .filter(|(_, data)| data.planet == Some(home) && data.building.is_none())
        .map(|(hex, _)| BuildOption {
            building,
            hex,
            cost: Vec::new(),
            steps: 0,
            warnings: Vec::new(),
        })
        .collect();
    vec![AvailableCommand::new(
        CommandName::Build,
        actor,
        CommandData::Build { options },
    )]
}

fn booster_choices(state: &GameState) -> Vec<AvailableCommand> {
    let Some(actor) = state.setup_queue.first().copied() else {
        return Vec::new();
    };
    vec![AvailableCommand::new(
        CommandName::ChooseBooster,
        actor,
        CommandData::ChooseBooster {
            boosters: state.pools.boosters.clone(),
        },
    )]
}

// ---------------------------------------------------------------------------
// Round phases
// ---------------------------------------------------------------------------

/// During the gaia phase only the Itars conversion question (and whatever
/// subphases a taken tech tile chains onto it) can be open.
fn gaia_choices(rules: &CompiledRules, state: &GameState) -> Vec<AvailableCommand> {
    let Some(actor) = state.current else {
        return Vec::new();
    };
    match state.subphase() {
        Some(sub) => subphase_choices(rules, state, actor, sub),
        None => Vec::new(),
    }
}

fn leech_choices(rules: &CompiledRules, state: &GameState) -> Vec<AvailableCommand> {
    let Some(pending) = state.leech.first() else {
        return Vec::new();
    };
    let actor = pending.player;
    if state.subphase() == Some(SubPhase::BrainStone) {
        return brainstone_choices(state, actor);
    }
    // An open decision of the mover outranks the charge queue, so a
    // compound line can settle it before the table answers.
    if let (Some(mover), Some(sub)) = (state.current, state.subphase()) {
        if !matches!(sub, SubPhase::BeforeMove | SubPhase::AfterMove) {
            return subphase_choices(rules, state, mover, sub);
        }
    }
    vec![
        AvailableCommand::new(
            CommandName::Charge,
            actor,
            CommandData::Leech {
                offers: pending.offers.clone(),
            },
        ),
        AvailableCommand::bare(CommandName::Decline, actor),
    ]
}

fn move_choices(rules: &CompiledRules, state: &mut GameState) -> Vec<AvailableCommand> {
    let Some(actor) = state.current else {
        return Vec::new();
    };
    let mut commands = match state.subphase() {
        Some(SubPhase::BeforeMove) => main_actions(rules, state, actor),
        Some(SubPhase::AfterMove) | None => Vec::new(),
        Some(sub) => subphase_choices(rules, state, actor, sub),
    };
    // A dead end suppresses everything else: the line must be rolled back.
    if commands.iter().any(|c| c.name == CommandName::DeadEnd) {
        return commands;
    }
    commands.extend(free_actions(state.player(actor)));
    commands
}

fn main_actions(
    rules: &CompiledRules,
    state: &mut GameState,
    actor: PlayerId,
) -> Vec<AvailableCommand> {
    let mut commands = Vec::new();

    let builds = build_options(rules, state, actor, BuildContext::current(state));
    if !builds.is_empty() {
        commands.push(AvailableCommand::new(
            CommandName::Build,
            actor,
            CommandData::Build { options: builds },
        ));
    }

    let player = state.player(actor);
    if player.resources.knowledge >= 4 {
        let tracks = research_options(state, player, None);
        if !tracks.is_empty() {
            commands.push(AvailableCommand::new(
                CommandName::UpgradeResearch,
                actor,
                CommandData::UpgradeResearch { tracks },
            ));
        }
    }

    let actions = board_action_options(rules, state, actor);
    if !actions.is_empty() {
        commands.push(AvailableCommand::new(
            CommandName::BoardAction,
            actor,
            CommandData::BoardAction { options: actions },
        ));
    }

    let specials = special_options(rules, state, actor);
    if !specials.is_empty() {
        commands.push(AvailableCommand::new(
            CommandName::Special,
            actor,
            CommandData::Special { options: specials },
        ));
    }

    let (federations, tiles) = federation_options(rules, state, actor);
    if !federations.is_empty() && !tiles.is_empty() {
        commands.push(AvailableCommand::new(
            CommandName::FormFederation,
            actor,
            CommandData::FormFederation { federations, tiles },
        ));
    }

    let ships = ship_moves(rules, state, actor);
    if !ships.is_empty() {
        commands.push(AvailableCommand::new(
            CommandName::MoveShip,
            actor,
            CommandData::MoveShip { ships },
        ));
    }

    // Passing is always open as the main action. In the last round the
    // booster is kept rather than exchanged.
    let boosters = if state.round >= 6 {
        Vec::new()
    } else {
        state.pools.boosters.clone()
    };
    commands.push(AvailableCommand::new(
        CommandName::Pass,
        actor,
        CommandData::Pass { boosters },
    ));
    commands
}

fn subphase_choices(
    rules: &CompiledRules,
    state: &GameState,
    actor: PlayerId,
    sub: SubPhase,
) -> Vec<AvailableCommand> {
    match sub {
        SubPhase::BeforeMove | SubPhase::AfterMove => Vec::new(),
        SubPhase::ChooseTechTile => {
            // Only the Itars gaia-phase conversion may be declined.
            tech_tile_choice(state, actor, state.phase == Phase::RoundGaia)
        }
        SubPhase::CoverTechTile => {
            let tiles: Vec<TechTile> = state.player(actor).uncovered_tech().collect();
            if tiles.is_empty() {
                return vec![dead_end(actor, sub)];
            }
            vec![AvailableCommand::new(
                CommandName::CoverTechTile,
                actor,
                CommandData::CoverTechTile { tiles },
            )]
        }
        SubPhase::UpgradeResearch => {
            let restrict = state.pending_tracks.clone();
            let tracks = research_options(state, state.player(actor), restrict.as_deref());
            let mut commands = Vec::new();
            if !tracks.is_empty() {
                commands.push(AvailableCommand::new(
                    CommandName::UpgradeResearch,
                    actor,
                    CommandData::UpgradeResearch { tracks },
                ));
            }
            // A free advance may always be forfeited.
            commands.push(AvailableCommand::bare(CommandName::Decline, actor));
            commands
        }
        SubPhase::PlaceLostPlanet => {
            let hexes = empty_space_in_range(rules, state, actor);
            if hexes.is_empty() {
                return vec![dead_end(actor, sub)];
            }
            vec![AvailableCommand::new(
                CommandName::Build,
                actor,
                CommandData::PlaceLostPlanet { hexes },
            )]
        }
        SubPhase::BuildMineOrGaiaFormer => {
            let options = build_options(rules, state, actor, BuildContext::current(state).new_only());
            if options.is_empty() {
                return vec![dead_end(actor, sub)];
            }
            vec![AvailableCommand::new(
                CommandName::Build,
                actor,
                CommandData::Build { options },
            )]
        }
        SubPhase::SpaceStation => {
            let hexes = empty_space_in_range(rules, state, actor);
            if hexes.is_empty() {
                return vec![dead_end(actor, sub)];
            }
            vec![AvailableCommand::new(
                CommandName::Build,
                actor,
                CommandData::SpaceStation { hexes },
            )]
        }
        SubPhase::PlaceShip => {
            let hexes: Vec<Hex> = state
                .map
                .planet_hexes()
                .filter(|(_, data)| {
                    data.owner == Some(actor)
                        && data.building.map(Building::is_colonizing).unwrap_or(false)
                })
                .map(|(hex, _)| hex)
                .collect();
            if hexes.is_empty() {
                return vec![dead_end(actor, sub)];
            }
            vec![AvailableCommand::new(
                CommandName::PlaceShip,
                actor,
                CommandData::PlaceShip { hexes },
            )]
        }
        SubPhase::PiSwap => {
            let hexes: Vec<Hex> = state
                .map
                .planet_hexes()
                .filter(|(_, data)| {
                    data.owner == Some(actor) && data.building == Some(Building::Mine)
                })
                .map(|(hex, _)| hex)
                .collect();
            if hexes.is_empty() {
                return vec![dead_end(actor, sub)];
            }
            vec![AvailableCommand::new(
                CommandName::PiSwap,
                actor,
                CommandData::PiSwap { hexes },
            )]
        }
        SubPhase::DowngradeLab => {
            let player = state.player(actor);
            let hexes: Vec<Hex> = if player.stock_left(Building::TradingStation) == 0 {
                Vec::new()
            } else {
                state
                    .map
                    .planet_hexes()
                    .filter(|(_, data)| {
                        data.owner == Some(actor)
                            && data.building == Some(Building::ResearchLab)
                    })
                    .map(|(hex, _)| hex)
                    .collect()
            };
            if hexes.is_empty() {
                return vec![dead_end(actor, sub)];
            }
            vec![AvailableCommand::new(
                CommandName::DowngradeLab,
                actor,
                CommandData::DowngradeLab { hexes },
            )]
        }
        SubPhase::RescoreFederationTile => {
            let mut tiles: Vec<FedToken> = state.player(actor).federations.clone();
            tiles.sort_unstable();
            tiles.dedup();
            if tiles.is_empty() {
                return vec![dead_end(actor, sub)];
            }
            vec![AvailableCommand::new(
                CommandName::ChooseFederationTile,
                actor,
                CommandData::ChooseFederationTile { tiles },
            )]
        }
        SubPhase::ChooseFederationTile => {
            let tiles: Vec<FedToken> = state
                .pools
                .federations
                .iter()
                .filter(|(_, count)| **count > 0)
                .map(|(token, _)| *token)
                .collect();
            if tiles.is_empty() {
                return vec![dead_end(actor, sub)];
            }
            vec![AvailableCommand::new(
                CommandName::ChooseFederationTile,
                actor,
                CommandData::ChooseFederationTile { tiles },
            )]
        }
        SubPhase::BrainStone => brainstone_choices(state, actor),
    }
}

// ---------------------------------------------------------------------------
// Tech tiles and research
// ---------------------------------------------------------------------------

fn tech_tile_choice(
    state: &GameState,
    actor: PlayerId,
    declinable: bool,
) -> Vec<AvailableCommand> {
    let player = state.player(actor);
    let mut options: Vec<TechTileOption> = state
        .pools
        .tech
        .iter()
        .filter(|(_, tile)| !player.owns_tech(**tile))
        .map(|(pos, tile)| TechTileOption {
            pos: *pos,
            standard: Some(*tile),
            advanced: None,
        })
        .collect();
    // Advanced tiles ask for level 4+, a green federation token, and a
    // standard tile left to cover.
    if player.green_federations() > 0 && player.uncovered_tech().next().is_some() {
        for (pos, tile) in &state.pools.advanced {
            let track_ok = pos.track().map(|t| player.level(t) >= 4).unwrap_or(false);
            if track_ok {
                options.push(TechTileOption {
                    pos: *pos,
                    standard: None,
                    advanced: Some(*tile),
                });
            }
        }
    }
    let mut commands = Vec::new();
    if options.is_empty() && !declinable {
        return vec![dead_end(actor, SubPhase::ChooseTechTile)];
    }
    if !options.is_empty() {
        commands.push(AvailableCommand::new(
            CommandName::ChooseTechTile,
            actor,
            CommandData::ChooseTechTile { options },
        ));
    }
    if declinable {
        commands.push(AvailableCommand::bare(CommandName::Decline, actor));
    }
    commands
}

/// Tracks the player may advance on right now. Level 5 demands single
/// occupancy and a green federation token; Bal T'aks cannot touch
/// navigation before their planetary institute.
fn research_options(
    state: &GameState,
    player: &Player,
    restrict: Option<&[ResearchTrack]>,
) -> Vec<ResearchTrack> {
    let ability = FactionAbility::of(player.faction);
    ResearchTrack::ALL
        .iter()
        .copied()
        .filter(|track| {
            if let Some(allowed) = restrict {
                if !allowed.contains(track) {
                    return false;
                }
            }
            let level = player.level(*track);
            if level >= 5 {
                return false;
            }
            if *track == ResearchTrack::Navigation && ability.navigation_locked(player) {
                return false;
            }
            if level == 4 {
                if player.green_federations() == 0 {
                    return false;
                }
                let occupied = state
                    .players
                    .iter()
                    .any(|p| p.id != player.id && p.level(*track) == 5);
                if occupied {
                    return false;
                }
            }
            true
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Building placement
// ---------------------------------------------------------------------------

/// Range and terraforming context for one build enumeration. Chained
/// "mine or gaiaformer" rewards restrict to fresh placements and may count
/// an extra bonus before it is actually granted.
#[derive(Clone, Copy)]
pub(crate) struct BuildContext {
    temp_steps: u32,
    temp_range: u32,
    new_only: bool,
}

impl BuildContext {
    pub(crate) fn current(state: &GameState) -> BuildContext {
        BuildContext {
            temp_steps: state.temp_steps,
            temp_range: state.temp_range,
            new_only: false,
        }
    }

    pub(crate) fn new_only(mut self) -> BuildContext {
        self.new_only = true;
        self
    }

    fn with_bonus(mut self, reward: Reward) -> BuildContext {
        match reward.kind {
            Resource::TemporaryStep => self.temp_steps += reward.count.max(0) as u32,
            Resource::TemporaryRange => self.temp_range += reward.count.max(0) as u32,
            _ => {}
        }
        self.new_only = true;
        self
    }
}

pub(crate) fn build_options(
    rules: &CompiledRules,
    state: &GameState,
    actor: PlayerId,
    ctx: BuildContext,
) -> Vec<BuildOption> {
    let player = state.player(actor);
    let ability = FactionAbility::of(player.faction);
    let reach = rules.nav_range(player.level(ResearchTrack::Navigation)) + ctx.temp_range;
    let sources = range_sources(state, actor);
    let mut options = Vec::new();

    for (hex, data) in state.map.planet_hexes() {
        let Some(planet) = data.planet else { continue };

        match (data.owner, data.building) {
            (Some(owner), Some(existing)) if owner == actor => {
                if existing == Building::GaiaFormer {
                    // Completing an own gaia project needs no range and no
                    // access QIC.
                    if planet == PlanetType::Gaia && player.stock_left(Building::Mine) > 0 {
                        let cost = mine_base_cost();
                        if affords(player, &cost) {
                            options.push(option(Building::Mine, hex, cost, 0));
                        }
                    }
                } else if !ctx.new_only {
                    upgrade_options(state, actor, hex, existing, &mut options);
                }
            }
            (Some(_), Some(existing)) => {
                // Lantids may mine under a foreign colonized planet.
                if ability.builds_guest_mines()
                    && existing.is_colonizing()
                    && data.additional_mine.is_none()
                    && player.stock_left(Building::Mine) > 0
                {
                    let Some(extra_qic) = range_qic(player, &sources, hex, reach) else {
                        continue;
                    };
                    let cost = with_qic(mine_base_cost(), extra_qic);
                    if affords(player, &cost) {
                        options.push(option(Building::Mine, hex, cost, 0));
                    }
                }
            }
            (_, Some(_)) => {}
            (_, None) => {
                let Some(extra_qic) = range_qic(player, &sources, hex, reach) else {
                    continue;
                };
                match planet {
                    PlanetType::Transdim => {
                        let former_cost =
                            rules.gaiaformer_cost(player.level(ResearchTrack::GaiaProject));
                        if player.formers_in_stock() > 0
                            && player.power.tokens_in_bowls() >= former_cost
                        {
                            let cost = with_qic(
                                vec![Reward::new(former_cost as i32, Resource::GainToken)],
                                extra_qic,
                            );
                            if player.resources.qic >= extra_qic {
                                options.push(option(Building::GaiaFormer, hex, cost, 0));
                            }
                        }
                    }
                    PlanetType::Gaia => {
                        if player.stock_left(Building::Mine) > 0 {
                            let mut cost = mine_base_cost();
                            cost.push(ability.gaia_access_cost());
                            let cost = with_qic(cost, extra_qic);
                            if affords(player, &cost) {
                                options.push(option(Building::Mine, hex, cost, 0));
                            }
                        }
                    }
                    _ => {
                        let Some(steps) = player.faction.home_planet().terraform_steps(planet)
                        else {
                            continue;
                        };
                        if player.stock_left(Building::Mine) > 0 {
                            let paid = steps.saturating_sub(ctx.temp_steps);
                            let ore =
                                1 + paid * rules.terraform_cost(player.level(ResearchTrack::Terraforming));
                            let cost = with_qic(
                                vec![
                                    Reward::new(2, Resource::Credit),
                                    Reward::new(ore as i32, Resource::Ore),
                                ],
                                extra_qic,
                            );
                            if affords(player, &cost) {
                                options.push(option(Building::Mine, hex, cost, steps));
                            }
                        }
                    }
                }
            }
        }
    }
    options
}

fn option(building: Building, hex: Hex, cost: Vec<Reward>, steps: u32) -> BuildOption {
    BuildOption {
        building,
        hex,
        cost: Reward::merge(cost),
        steps,
        warnings: Vec::new(),
    }
}

fn mine_base_cost() -> Vec<Reward> {
    vec![Reward::new(2, Resource::Credit), Reward::new(1, Resource::Ore)]
}

fn with_qic(mut cost: Vec<Reward>, qic: u32) -> Vec<Reward> {
    if qic > 0 {
        cost.push(Reward::new(qic as i32, Resource::Qic));
    }
    cost
}

/// QIC needed to bridge the distance to `hex`, or `None` when the target is
/// out of reach even with the player's whole QIC pool.
fn range_qic(player: &Player, sources: &[Hex], hex: Hex, reach: u32) -> Option<u32> {
    let distance = sources.iter().map(|s| s.distance(hex)).min()?;
    let over = distance - reach as i32;
    if over <= 0 {
        return Some(0);
    }
    let qic = ((over + 1) / 2) as u32;
    (qic <= player.resources.qic).then_some(qic)
}

/// Hexes a player's reach is measured from: every structure except
/// gaiaformers, plus Lantids guest mines.
fn range_sources(state: &GameState, actor: PlayerId) -> Vec<Hex> {
    state
        .map
        .hexes
        .iter()
        .filter(|(_, data)| {
            (data.owner == Some(actor)
                && data.building.map(|b| b != Building::GaiaFormer).unwrap_or(false))
                || data.additional_mine == Some(actor)
        })
        .map(|(hex, _)| *hex)
        .collect()
}

fn upgrade_options(
    state: &GameState,
    actor: PlayerId,
    hex: Hex,
    existing: Building,
    options: &mut Vec<BuildOption>,
) {
    let player = state.player(actor);
    let mut push = |building: Building, cost: Vec<Reward>| {
        if player.stock_left(building) > 0 && affords(player, &cost) {
            options.push(option(building, hex, cost, 0));
        }
    };
    match existing {
        Building::Mine => {
            let credits = if foreign_structure_near(state, hex, actor) { 3 } else { 6 };
            push(
                Building::TradingStation,
                vec![
                    Reward::new(2, Resource::Ore),
                    Reward::new(credits, Resource::Credit),
                ],
            );
        }
        Building::TradingStation => {
            push(
                Building::ResearchLab,
                vec![
                    Reward::new(3, Resource::Knowledge),
                    Reward::new(5, Resource::Credit),
                ],
            );
            push(
                Building::PlanetaryInstitute,
                vec![Reward::new(4, Resource::Ore), Reward::new(6, Resource::Credit)],
            );
        }
        Building::ResearchLab => {
            let cost = vec![Reward::new(6, Resource::Ore), Reward::new(6, Resource::Credit)];
            push(Building::Academy1, cost.clone());
            push(Building::Academy2, cost);
        }
        _ => {}
    }
}

/// Is any other player's structure (anything but a gaiaformer) within
/// distance 3? Decides the trading-station discount. Wider than the
/// leeching distance of 2.
fn foreign_structure_near(state: &GameState, hex: Hex, actor: PlayerId) -> bool {
    state.map.within(hex, 3).any(|near| {
        state.map.get(near).is_some_and(|data| {
            let foreign_primary = data.owner.is_some()
                && data.owner != Some(actor)
                && data.building.map(|b| b != Building::GaiaFormer).unwrap_or(false);
            let foreign_guest = data
                .additional_mine
                .is_some_and(|guest| guest != actor);
            foreign_primary || foreign_guest
        })
    })
}

fn affords(player: &Player, cost: &[Reward]) -> bool {
    Reward::merge(cost.iter().copied()).iter().all(|reward| {
        let need = reward.count.max(0) as u32;
        match reward.kind {
            Resource::Credit | Resource::Ore | Resource::Knowledge | Resource::Qic => {
                player.resources.amount(reward.kind) >= need
            }
            Resource::GainToken => player.power.tokens_in_bowls() >= need,
            _ => false,
        }
    })
}

// ---------------------------------------------------------------------------
// Board actions, specials, free actions
// ---------------------------------------------------------------------------

fn board_action_options(
    rules: &CompiledRules,
    state: &GameState,
    actor: PlayerId,
) -> Vec<BoardActionOption> {
    let player = state.player(actor);
    let doubled = player.power_doubled();
    rules
        .board_actions
        .iter()
        .filter(|(action, _)| !state.actions_taken.contains(action))
        .filter(|(action, _)| {
            // Rescoring needs a token to rescore.
            **action != BoardAction::Qic2 || !player.federations.is_empty()
        })
        .filter(|(_, data)| {
            data.cost.iter().all(|reward| match reward.kind {
                Resource::ChargePower => {
                    player.power.spendable(doubled) >= reward.count.max(0) as u32
                }
                Resource::Qic => player.resources.qic >= reward.count.max(0) as u32,
                _ => false,
            })
        })
        .filter(|(_, data)| {
            data.effects
                .iter()
                .flat_map(|event| event.rewards.iter())
                .all(|reward| bonus_reachable(rules, state, actor, *reward))
        })
        .map(|(action, data)| BoardActionOption {
            action: *action,
            cost: data.cost.clone(),
            rewards: data
                .effects
                .iter()
                .flat_map(|event| event.rewards.iter().copied())
                .collect(),
        })
        .collect()
}

fn special_options(
    rules: &CompiledRules,
    state: &GameState,
    actor: PlayerId,
) -> Vec<SpecialOption> {
    let player = state.player(actor);
    player
        .events_with(Operator::Activate)
        .filter(|event| !event.activated)
        .filter(|event| {
            event
                .rewards
                .iter()
                .all(|reward| bonus_reachable(rules, state, actor, *reward))
        })
        .map(|event| SpecialOption {
            rewards: event.rewards.clone(),
        })
        .collect()
}

/// Would gaining this reward leave the player a legal follow-up? Deferred
/// rewards that open a subphase are only offered when the subphase cannot
/// dead-end.
fn bonus_reachable(
    rules: &CompiledRules,
    state: &GameState,
    actor: PlayerId,
    reward: Reward,
) -> bool {
    let player = state.player(actor);
    match reward.kind {
        Resource::TemporaryStep | Resource::TemporaryRange => !build_options(
            rules,
            state,
            actor,
            BuildContext::current(state).with_bonus(reward),
        )
        .is_empty(),
        Resource::PiSwap => {
            player.pi_built()
                && state.map.planet_hexes().any(|(_, data)| {
                    data.owner == Some(actor) && data.building == Some(Building::Mine)
                })
        }
        Resource::DowngradeLab => {
            player.stock_left(Building::TradingStation) > 0
                && state.map.planet_hexes().any(|(_, data)| {
                    data.owner == Some(actor)
                        && data.building == Some(Building::ResearchLab)
                })
        }
        Resource::SpaceStation => !empty_space_in_range(rules, state, actor).is_empty(),
        Resource::RescoreFederation => !player.federations.is_empty(),
        _ => true,
    }
}

fn free_actions(player: &Player) -> Vec<AvailableCommand> {
    let mut commands = Vec::new();
    let conversions = conversions_for(player);
    if !conversions.is_empty() {
        commands.push(AvailableCommand::new(
            CommandName::Spend,
            player.id,
            CommandData::Spend { conversions },
        ));
    }
    let max = player.power.max_burn();
    if max > 0 {
        commands.push(AvailableCommand::new(
            CommandName::Burn,
            player.id,
            CommandData::Burn { max },
        ));
    }
    commands
}

/// Atomic conversion rates open to this player right now. A submitted
/// `spend` may combine several of them; the executor re-derives the split.
pub(crate) fn conversions_for(player: &Player) -> Vec<Conversion> {
    let doubled = player.power_doubled();
    let power = player.power.spendable(doubled);
    let mut out = Vec::new();
    let mut rate = |cost: Vec<Reward>, income: Vec<Reward>| {
        out.push(Conversion { cost, income });
    };
    let pw = |n: i32| vec![Reward::new(n, Resource::ChargePower)];
    let one = |kind: Resource| vec![Reward::new(1, kind)];

    if power >= 1 {
        rate(pw(1), one(Resource::Credit));
    }
    if power >= 3 {
        rate(pw(3), one(Resource::Ore));
    }
    if power >= 4 {
        rate(pw(4), one(Resource::Qic));
        rate(pw(4), one(Resource::Knowledge));
    }
    if player.resources.qic >= 1 && !player.qic_locked() {
        rate(one(Resource::Qic), one(Resource::Ore));
    }
    if player.resources.knowledge >= 1 {
        rate(one(Resource::Knowledge), one(Resource::Credit));
    }
    if player.resources.ore >= 1 {
        rate(one(Resource::Ore), one(Resource::Credit));
        rate(one(Resource::Ore), one(Resource::GainToken));
    }
    match player.faction {
        Faction::HadschHallas if player.pi_built() => {
            if player.resources.credits >= 3 {
                rate(vec![Reward::new(3, Resource::Credit)], one(Resource::Ore));
            }
            if player.resources.credits >= 4 {
                rate(vec![Reward::new(4, Resource::Credit)], one(Resource::Knowledge));
                rate(vec![Reward::new(4, Resource::Credit)], one(Resource::Qic));
            }
        }
        Faction::Nevlas => {
            if player.power.area3() >= 1 {
                rate(one(Resource::TokenArea3), one(Resource::Knowledge));
            }
        }
        Faction::BalTaks => {
            if player.formers_in_stock() > 0 {
                rate(one(Resource::GaiaFormer), one(Resource::Qic));
            }
        }
        _ => {}
    }
    out
}

// ---------------------------------------------------------------------------
// Federations, ships, placements
// ---------------------------------------------------------------------------

fn federation_options(
    rules: &CompiledRules,
    state: &mut GameState,
    actor: PlayerId,
) -> (Vec<FederationInfo>, Vec<FedToken>) {
    let flexible = state.settings.flexible_federations;
    let budget = {
        let player = state.player(actor);
        FactionAbility::of(player.faction).satellite_budget(player)
    };
    let cached = state
        .player(actor)
        .fed_cache
        .as_ref()
        .filter(|cache| cache.budget == budget)
        .map(|cache| cache.candidates.clone());
    let candidates = match cached {
        Some(candidates) => candidates,
        None => {
            let computed =
                federation::federation_candidates(rules, &state.map, state.player(actor), flexible);
            state.player_mut(actor).fed_cache = Some(FedCache {
                budget,
                candidates: computed.clone(),
            });
            computed
        }
    };
    let tiles: Vec<FedToken> = state
        .pools
        .federations
        .iter()
        .filter(|(_, count)| **count > 0)
        .map(|(token, _)| *token)
        .collect();
    (candidates, tiles)
}

fn ship_moves(rules: &CompiledRules, state: &GameState, actor: PlayerId) -> Vec<ShipMove> {
    let player = state.player(actor);
    let range = rules.nav_range(player.level(ResearchTrack::Navigation)) + state.temp_range;
    state
        .map
        .hexes
        .iter()
        .filter(|(_, data)| data.ships.contains(&actor))
        .filter_map(|(hex, _)| {
            let targets = space_reach(state, *hex, range);
            (!targets.is_empty()).then_some(ShipMove {
                from: *hex,
                targets,
            })
        })
        .collect()
}

/// Space hexes reachable through empty space in at most `range` steps.
fn space_reach(state: &GameState, from: Hex, range: u32) -> Vec<Hex> {
    let mut seen: BTreeSet<Hex> = BTreeSet::new();
    let mut frontier = vec![from];
    seen.insert(from);
    for _ in 0..range {
        let mut next = Vec::new();
        for hex in frontier {
            for neighbor in state.map.neighbors(hex) {
                let Some(data) = state.map.get(neighbor) else { continue };
                if data.planet.is_none() && data.building.is_none() && seen.insert(neighbor) {
                    next.push(neighbor);
                }
            }
        }
        frontier = next;
    }
    seen.remove(&from);
    seen.into_iter().collect()
}

/// Empty space hexes (no planet, building, ship or satellite) within the
/// player's current reach. No QIC extension here: these placements carry no
/// cost line to pay it with.
fn empty_space_in_range(rules: &CompiledRules, state: &GameState, actor: PlayerId) -> Vec<Hex> {
    let player = state.player(actor);
    let reach = rules.nav_range(player.level(ResearchTrack::Navigation)) + state.temp_range;
    let sources = range_sources(state, actor);
    state
        .map
        .hexes
        .iter()
        .filter(|(hex, data)| {
            data.planet.is_none()
                && data.building.is_none()
                && data.ships.is_empty()
                && data.satellites.is_empty()
                && sources.iter().any(|s| s.distance(**hex) <= reach as i32)
        })
        .map(|(hex, _)| *hex)
        .collect()
}

// ---------------------------------------------------------------------------
// Brainstone
// ---------------------------------------------------------------------------

fn brainstone_choices(state: &GameState, actor: PlayerId) -> Vec<AvailableCommand> {
    let Some(pending) = state.pending_charge else {
        return Vec::new();
    };
    let areas = brainstone_targets(state.player(actor), pending.steps);
    if areas.is_empty() {
        return vec![dead_end(actor, SubPhase::BrainStone)];
    }
    vec![AvailableCommand::new(
        CommandName::BrainStone,
        actor,
        CommandData::BrainStone { areas },
    )]
}

/// End areas the brainstone can occupy after charging `steps`, leaving the
/// remainder coverable by regular tokens alone.
pub(crate) fn brainstone_targets(player: &Player, steps: u32) -> Vec<PowerArea> {
    let Some(start) = player.power.brainstone() else {
        return Vec::new();
    };
    let start_rank = match start {
        PowerArea::Area1 => 0_u32,
        PowerArea::Area2 => 1,
        PowerArea::Area3 => 2,
        PowerArea::Gaia | PowerArea::Discard => return Vec::new(),
    };
    let regular = 2 * player.power.area1() + player.power.area2();
    [(0, PowerArea::Area1), (1, PowerArea::Area2), (2, PowerArea::Area3)]
        .into_iter()
        .filter(|(rank, _)| *rank >= start_rank)
        .filter(|(rank, _)| {
            let moved = rank - start_rank;
            moved <= steps && steps - moved <= regular
        })
        .map(|(_, area)| area)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::power::PowerBowls;
    use crate::rules::{load_rules, RulesSource};

    #[test]
    fn conversion_rates_track_the_resources_at_hand() {
        let rules = load_rules(RulesSource::Embedded).unwrap();
        let mut player = Player::new(&rules, PlayerId(0), Faction::Terrans);
        player.power = PowerBowls::new(0, 0, false);
        player.resources.credits = 0;
        player.resources.ore = 0;
        player.resources.knowledge = 0;
        player.resources.qic = 0;
        assert!(conversions_for(&player).is_empty());

        player.resources.ore = 2;
        let rates = conversions_for(&player);
        assert!(rates
            .iter()
            .any(|c| c.cost == vec![Reward::new(1, Resource::Ore)]
                && c.income == vec![Reward::new(1, Resource::GainToken)]));
        assert!(!rates.iter().any(|c| c.cost[0].kind == Resource::ChargePower));
    }

    #[test]
    fn hadsch_hallas_rates_appear_with_the_institute() {
        let rules = load_rules(RulesSource::Embedded).unwrap();
        let mut player = Player::new(&rules, PlayerId(0), Faction::HadschHallas);
        player.resources.credits = 10;
        let before = conversions_for(&player);
        assert!(!before
            .iter()
            .any(|c| c.cost == vec![Reward::new(3, Resource::Credit)]));
        player.add_building(Building::PlanetaryInstitute);
        let after = conversions_for(&player);
        assert!(after
            .iter()
            .any(|c| c.cost == vec![Reward::new(3, Resource::Credit)]
                && c.income == vec![Reward::new(1, Resource::Ore)]));
    }

    #[test]
    fn brainstone_targets_respect_the_token_capacity() {
        let rules = load_rules(RulesSource::Embedded).unwrap();
        let mut player = Player::new(&rules, PlayerId(0), Faction::Taklons);
        // Brainstone in area 1 beside one regular token in area 1: charging
        // 2 can move the stone 0, 1 or 2 areas, but leaving it put demands
        // both steps from the regular token (which has exactly 2).
        player.power = PowerBowls::new(1, 0, true);
        let targets = brainstone_targets(&player, 2);
        assert_eq!(
            targets,
            vec![PowerArea::Area1, PowerArea::Area2, PowerArea::Area3]
        );
        // With no regular tokens every step must come from the stone.
        player.power = PowerBowls::new(0, 0, true);
        let targets = brainstone_targets(&player, 2);
        assert_eq!(targets, vec![PowerArea::Area3]);
    }

    /// A rival structure anywhere out to distance 3 buys the cheap
    /// trading station; the leeching range stays at 2.
    #[test]
    fn trading_station_discount_reaches_distance_three() {
        use crate::engine::GameEngine;

        let mut engine = GameEngine::new(load_rules(RulesSource::Embedded).unwrap());
        engine.process("init 2 autumn-drift").unwrap();
        engine.process("p1 faction terrans").unwrap();
        engine.process("p2 faction hadsch-hallas").unwrap();
        let state = &mut engine.state;
        state.player_mut(PlayerId(0)).resources.ore = 10;
        state.player_mut(PlayerId(0)).resources.credits = 20;

        let planets: Vec<Hex> = state.map.planet_hexes().map(|(hex, _)| hex).collect();
        let (site, rival) = planets
            .iter()
            .flat_map(|a| planets.iter().map(move |b| (*a, *b)))
            .find(|(a, b)| a.distance(*b) == 3)
            .expect("no planet pair at distance 3 on this map");
        {
            let cell = state.map.get_mut(site).unwrap();
            cell.owner = Some(PlayerId(0));
            cell.building = Some(Building::Mine);
        }
        {
            let cell = state.map.get_mut(rival).unwrap();
            cell.owner = Some(PlayerId(1));
            cell.building = Some(Building::Mine);
        }

        // A rival at exactly distance 3 still counts as company.
        let mut options = Vec::new();
        upgrade_options(state, PlayerId(0), site, Building::Mine, &mut options);
        let station = options
            .iter()
            .find(|o| o.building == Building::TradingStation)
            .expect("no trading station on offer");
        assert!(station.cost.contains(&Reward::new(3, Resource::Credit)));

        // With the rival gone the station is isolated and pays full price.
        let cell = state.map.get_mut(rival).unwrap();
        cell.owner = None;
        cell.building = None;
        let mut options = Vec::new();
        upgrade_options(state, PlayerId(0), site, Building::Mine, &mut options);
        let station = options
            .iter()
            .find(|o| o.building == Building::TradingStation)
            .expect("no trading station on offer");
        assert!(station.cost.contains(&Reward::new(6, Resource::Credit)));
    }
}
