use std::collections::{BTreeMap, BTreeSet};

use concord_protocol::{
    wire, AdvTechTile, AvailableCommand, BoardAction, Booster, ChargeOffer, CommandName, Faction,
    FedToken, FinalTile, LogEntry, Phase, PlayerId, ReplayFile, ResearchTrack, ScoringTile,
    SubPhase, TechTile, TechTilePos,
};
use serde::{Deserialize, Serialize};

use crate::error::{MoveError, ReplayError};
use crate::map::SpaceMap;
use crate::player::Player;
use crate::rng::GameRng;
use crate::rules::CompiledRules;

mod execute;
mod generate;
mod income;
mod parse;
mod scoring;

pub use parse::{MoveLine, SubCommand};
pub use scoring::{final_standings, Standing};

/// Table options fixed at `init`.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize)]
pub struct GameSettings {
    /// Chosen factions are auctioned for victory points instead of kept.
    #[serde(default)]
    pub auction: bool,
    /// The federation search explores alternative equal-cost layouts.
    #[serde(default)]
    pub flexible_federations: bool,
}

/// One faction up for auction and the bid currently leading on it.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AuctionSlot {
    pub faction: Faction,
    #[serde(default)]
    pub holder: Option<PlayerId>,
    #[serde(default)]
    pub bid: u32,
}

/// Everything drawn from the shared supply during setup.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct TilePools {
    pub tech: BTreeMap<TechTilePos, TechTile>,
    pub advanced: BTreeMap<TechTilePos, AdvTechTile>,
    pub boosters: Vec<Booster>,
    /// Remaining copies of each federation token.
    pub federations: BTreeMap<FedToken, u32>,
    /// The token drawn onto the level-5 terraforming space at setup.
    #[serde(default)]
    pub terraform_federation: Option<FedToken>,
    /// Scoring tiles for rounds 1..=6, in play order.
    pub scoring: Vec<ScoringTile>,
    pub final_scoring: Vec<FinalTile>,
}

impl TilePools {
    /// Seeded draw of every tile rack. The draw order is part of the
    /// deterministic contract: standard tech, advanced tech, boosters,
    /// round scoring, final scoring, then the terraforming-track token.
    fn draw(rules: &CompiledRules, player_count: usize, rng: &mut GameRng) -> TilePools {
        let mut standard: Vec<TechTile> = TechTile::ALL.to_vec();
        rng.shuffle(&mut standard);
        let slots = [
            TechTilePos::Terra,
            TechTilePos::Nav,
            TechTilePos::Int,
            TechTilePos::Gaia,
            TechTilePos::Eco,
            TechTilePos::Sci,
            TechTilePos::Free1,
            TechTilePos::Free2,
            TechTilePos::Free3,
        ];
        let tech = slots.into_iter().zip(standard).collect();

        let mut advanced_tiles: Vec<AdvTechTile> = AdvTechTile::ALL.to_vec();
        rng.shuffle(&mut advanced_tiles);
        let advanced = ResearchTrack::ALL
            .iter()
            .map(|track| TechTilePos::advanced_slot(*track))
            .zip(advanced_tiles)
            .collect();

        let mut boosters: Vec<Booster> = Booster::ALL.to_vec();
        rng.shuffle(&mut boosters);
        boosters.truncate(player_count + 3);
        boosters.sort_unstable();

        let mut scoring: Vec<ScoringTile> = ScoringTile::ALL.to_vec();
        rng.shuffle(&mut scoring);
        scoring.truncate(6);

        let mut final_scoring: Vec<FinalTile> = FinalTile::ALL.to_vec();
        rng.shuffle(&mut final_scoring);
        final_scoring.truncate(2);

        let mut federations: BTreeMap<FedToken, u32> = rules
            .fed_tokens
            .iter()
            .map(|(token, data)| (*token, data.count))
            .collect();
        let pool: Vec<FedToken> = federations
            .iter()
            .flat_map(|(token, count)| std::iter::repeat(*token).take(*count as usize))
            .collect();
        let terraform_federation = if pool.is_empty() {
            None
        } else {
            let token = pool[rng.gen_index(pool.len())];
            if let Some(count) = federations.get_mut(&token) {
                *count -= 1;
            }
            Some(token)
        };

        TilePools {
            tech,
            advanced,
            boosters,
            federations,
            terraform_federation,
            scoring,
            final_scoring,
        }
    }

    /// The scoring tile governing the given round (1-based).
    pub fn scoring_for(&self, round: u32) -> Option<ScoringTile> {
        round
            .checked_sub(1)
            .and_then(|index| self.scoring.get(index as usize))
            .copied()
    }
}

/// One opponent's unresolved charge question after a build or upgrade.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PendingLeech {
    pub player: PlayerId,
    pub offers: Vec<ChargeOffer>,
}

/// A charge put on hold while its owner places the brainstone.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct PendingCharge {
    pub steps: u32,
    pub vp: i32,
    /// Tokens the accepted offer grants after the charge (Taklons).
    #[serde(default)]
    pub tokens_after: u32,
}

/// The root aggregate: everything a game is, serializable at any point.
/// Mutated only by the executor; the available-command cache is rebuilt
/// after every sub-command and skipped by serde.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GameState {
    pub settings: GameSettings,
    pub seed: String,
    pub player_count: usize,
    pub phase: Phase,
    /// Interrupt stack; the top entry is answered first. During `RoundMove`
    /// the bottom entry is `BeforeMove` until the main action, then
    /// `AfterMove`.
    #[serde(default)]
    pub subphases: Vec<SubPhase>,
    /// Current round, 1..=6; 0 before the first income phase.
    #[serde(default)]
    pub round: u32,
    pub turn_order: Vec<PlayerId>,
    #[serde(default)]
    pub current: Option<PlayerId>,
    /// Players in the order they passed; becomes next round's turn order.
    #[serde(default)]
    pub passed: Vec<PlayerId>,
    pub players: Vec<Player>,
    pub map: SpaceMap,
    pub rng: GameRng,
    pub pools: TilePools,
    /// Board actions already taken this round.
    #[serde(default)]
    pub actions_taken: BTreeSet<BoardAction>,
    /// Pending placements during the setup phases, front first.
    #[serde(default)]
    pub setup_queue: Vec<PlayerId>,
    #[serde(default)]
    pub auction: Vec<AuctionSlot>,
    /// Opponents still owed a leech decision, front first.
    #[serde(default)]
    pub leech: Vec<PendingLeech>,
    #[serde(default)]
    pub pending_charge: Option<PendingCharge>,
    /// Tracks a pending free research advance is restricted to.
    #[serde(default)]
    pub pending_tracks: Option<Vec<ResearchTrack>>,
    #[serde(default)]
    pub temp_range: u32,
    #[serde(default)]
    pub temp_steps: u32,
    #[serde(default)]
    pub move_history: Vec<String>,
    #[serde(default)]
    pub log: Vec<LogEntry>,
    #[serde(skip)]
    pub available: Vec<AvailableCommand>,
}

impl GameState {
    fn new() -> GameState {
        GameState {
            settings: GameSettings::default(),
            seed: String::new(),
            player_count: 0,
            phase: Phase::SetupInit,
            subphases: Vec::new(),
            round: 0,
            turn_order: Vec::new(),
            current: None,
            passed: Vec::new(),
            players: Vec::new(),
            map: SpaceMap::default(),
            rng: GameRng::seed_from_u64(0),
            pools: TilePools::default(),
            actions_taken: BTreeSet::new(),
            setup_queue: Vec::new(),
            auction: Vec::new(),
            leech: Vec::new(),
            pending_charge: None,
            pending_tracks: None,
            temp_range: 0,
            temp_steps: 0,
            move_history: Vec::new(),
            log: Vec::new(),
            available: vec![AvailableCommand::bare(CommandName::Init, PlayerId(0))],
        }
    }

    pub fn player(&self, id: PlayerId) -> &Player {
        &self.players[id.0 as usize]
    }

    pub fn player_mut(&mut self, id: PlayerId) -> &mut Player {
        &mut self.players[id.0 as usize]
    }

    pub fn player_by_faction(&self, faction: Faction) -> Option<PlayerId> {
        self.players
            .iter()
            .find(|p| p.faction == faction)
            .map(|p| p.id)
    }

    pub fn subphase(&self) -> Option<SubPhase> {
        self.subphases.last().copied()
    }

    /// Whose decision the engine is waiting on, if anyone's.
    pub fn active_player(&self) -> Option<PlayerId> {
        match self.phase {
            Phase::SetupInit | Phase::SetupBoard | Phase::EndGame => None,
            Phase::SetupFaction | Phase::SetupBuilding | Phase::SetupBooster => {
                self.setup_queue.first().copied()
            }
            Phase::SetupAuction => self.next_bidder(),
            Phase::RoundLeech => self.leech.first().map(|pending| pending.player),
            Phase::RoundIncome | Phase::RoundGaia | Phase::RoundMove => self.current,
        }
    }

    /// The first seat not currently holding an auction slot.
    fn next_bidder(&self) -> Option<PlayerId> {
        (0..self.player_count as u8)
            .map(PlayerId)
            .find(|seat| !self.auction.iter().any(|slot| slot.holder == Some(*seat)))
    }

    pub(crate) fn set_phase(&mut self, phase: Phase) {
        if self.phase != phase {
            self.phase = phase;
            self.log.push(LogEntry::PhaseChange { phase });
        }
    }

    pub(crate) fn invalidate_fed_caches(&mut self) {
        for player in &mut self.players {
            player.invalidate_federations();
        }
    }
}

/// The engine facade: compiled rules plus one mutable [`GameState`].
///
/// Moves go in as text lines; a refused move leaves the state exactly as it
/// was. The state can be snapshotted to JSON at any point and the whole game
/// re-derived from its move history.
pub struct GameEngine {
    rules: CompiledRules,
    pub state: GameState,
}

impl GameEngine {
    pub fn new(rules: CompiledRules) -> GameEngine {
        GameEngine {
            rules,
            state: GameState::new(),
        }
    }

    pub fn rules(&self) -> &CompiledRules {
        &self.rules
    }

    /// The legal next moves, re-derived after every executed sub-command.
    pub fn available_commands(&self) -> &[AvailableCommand] {
        &self.state.available
    }

    pub fn player(&self, id: PlayerId) -> Option<&Player> {
        self.state.players.get(id.0 as usize)
    }

    /// Execute one move line. On error the state is left untouched.
    pub fn process(&mut self, line: &str) -> Result<(), MoveError> {
        self.process_inner(line, false)
    }

    fn process_inner(&mut self, line: &str, tolerate_incomplete: bool) -> Result<(), MoveError> {
        let saved = self.state.clone();
        match execute::apply_line(&self.rules, &mut self.state, line, tolerate_incomplete) {
            Ok(()) => Ok(()),
            Err(err) => {
                self.state = saved;
                Err(err)
            }
        }
    }

    /// Re-derive a game from an ordered move list. Incomplete trailing
    /// moves are tolerated; anything else aborts with the failing index.
    pub fn replay(rules: CompiledRules, moves: &[String]) -> Result<GameEngine, ReplayError> {
        Self::replay_to(rules, moves, moves.len())
    }

    /// Replay only the first `count` moves (time travel to that point).
    pub fn replay_to(
        rules: CompiledRules,
        moves: &[String],
        count: usize,
    ) -> Result<GameEngine, ReplayError> {
        let mut engine = GameEngine::new(rules);
        for (index, text) in moves.iter().take(count).enumerate() {
            engine
                .process_inner(text, true)
                .map_err(|source| ReplayError::Move {
                    index,
                    text: text.clone(),
                    source,
                })?;
        }
        Ok(engine)
    }

    /// Replay that downgrades refused moves to warnings and keeps going,
    /// returning whatever state the surviving moves produce.
    pub fn replay_permissive(
        rules: CompiledRules,
        moves: &[String],
    ) -> (GameEngine, Vec<(usize, MoveError)>) {
        let mut engine = GameEngine::new(rules);
        let mut rejected = Vec::new();
        for (index, text) in moves.iter().enumerate() {
            if let Err(err) = engine.process_inner(text, true) {
                tracing::warn!(index, text, error = %err, "replay: move refused, skipping");
                rejected.push((index, err));
            }
        }
        (engine, rejected)
    }

    pub fn replay_file(&self) -> ReplayFile {
        ReplayFile::new(self.state.move_history.clone())
    }

    /// JSON snapshot of the whole state.
    pub fn snapshot(&self) -> Result<String, wire::WireError> {
        wire::encode_json(&self.state)
    }

    /// Rebuild an engine from a snapshot; the available-command cache is
    /// re-derived rather than trusted from the wire.
    pub fn restore(rules: CompiledRules, snapshot: &str) -> Result<GameEngine, wire::WireError> {
        let mut state: GameState = wire::decode_json(snapshot)?;
        let available = generate::refresh(&rules, &mut state);
        state.available = available;
        Ok(GameEngine { rules, state })
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
    fn a_fresh_engine_waits_for_init() {
        let engine = GameEngine::new(rules());
        let commands = engine.available_commands();
        assert_eq!(commands.len(), 1);
        assert_eq!(commands[0].name, CommandName::Init);
    }

    #[test]
    fn init_is_deterministic_per_seed() {
        let mut a = GameEngine::new(rules());
        let mut b = GameEngine::new(rules());
        a.process("init 2 concord-7").unwrap();
        b.process("init 2 concord-7").unwrap();
        assert_eq!(a.snapshot().unwrap(), b.snapshot().unwrap());

        let mut c = GameEngine::new(rules());
        c.process("init 2 other-seed").unwrap();
        assert_ne!(a.snapshot().unwrap(), c.snapshot().unwrap());
    }

    #[test]
    fn pool_draw_sizes_follow_the_player_count() {
        let rules = rules();
        let mut rng = GameRng::seed_from_text("pools");
        let pools = TilePools::draw(&rules, 4, &mut rng);
        assert_eq!(pools.tech.len(), 9);
        assert_eq!(pools.advanced.len(), 6);
        assert_eq!(pools.boosters.len(), 7);
        assert_eq!(pools.scoring.len(), 6);
        assert_eq!(pools.final_scoring.len(), 2);
        assert!(pools.terraform_federation.is_some());
        // The drawn token came out of the pool.
        let total: u32 = pools.federations.values().sum();
        let printed: u32 = rules.fed_tokens.values().map(|d| d.count).sum();
        assert_eq!(total + 1, printed);
    }

    #[test]
    fn a_refused_move_leaves_the_state_alone() {
        let mut engine = GameEngine::new(rules());
        engine.process("init 2 rollback").unwrap();
        let before = engine.snapshot().unwrap();
        assert!(engine.process("p1 build m 0x0").is_err());
        assert_eq!(engine.snapshot().unwrap(), before);
    }
}
