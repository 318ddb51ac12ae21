//! The Stellar Concord rules engine.
//!
//! A game is a seed plus an ordered list of move lines. [`GameEngine`]
//! parses each line against the published set of available commands,
//! mutates a [`GameState`] transactionally, and re-derives the next set.
//! Everything downstream of the seed is deterministic, which is what the
//! replay and snapshot tooling relies on.
//!
//! The vocabulary types (commands, events, rewards, hexes, the wire
//! codecs) live in `concord-protocol`; this crate owns the rules: the
//! phase machine, the power economy, research, federations, and scoring.

mod engine;
mod error;
mod faction;
mod federation;
mod map;
mod player;
mod power;
mod rng;
mod rules;

pub use crate::engine::*;
pub use crate::error::*;
pub use crate::faction::*;
pub use crate::federation::*;
pub use crate::map::*;
pub use crate::player::*;
pub use crate::power::*;
pub use crate::rng::*;
pub use crate::rules::*;
