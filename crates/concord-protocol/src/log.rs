use serde::{Deserialize, Serialize};

use crate::{Phase, PlayerId};

/// One line of the structured game log, appended by the engine as it runs and
/// serialized with the snapshot.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum LogEntry {
    /// A fully executed move line, as submitted.
    Move { player: PlayerId, text: String },
    PhaseChange { phase: Phase },
    RoundChange { round: u32 },
    /// A resolved leech offer: how much was charged (0 when declined) and the
    /// victory points paid for it.
    LeechSettled {
        player: PlayerId,
        charged: u32,
        vp_paid: i32,
        declined: bool,
    },
}
