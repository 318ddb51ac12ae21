//! Shared vocabulary for the Stellar Concord rules engine: coordinates,
//! players, resources, events, commands, phases, the structured log, the
//! replay file, and the wire codecs. Everything here is serializable and
//! engine-agnostic; the rules themselves live in `concord-core`.

#[macro_use]
mod macros;

mod command;
mod event;
mod hex;
mod ids;
mod log;
mod replay;
mod resources;
mod types;
pub mod wire;

pub use crate::command::*;
pub use crate::event::*;
pub use crate::hex::*;
pub use crate::ids::*;
pub use crate::log::*;
pub use crate::replay::*;
pub use crate::resources::*;
pub use crate::types::*;
