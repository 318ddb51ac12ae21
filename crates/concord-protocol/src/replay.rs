use serde::{Deserialize, Serialize};

pub const REPLAY_VERSION: u32 = 1;

/// A complete game as an ordered move list. The first move carries the seed,
/// so the file is the whole game: replaying it reproduces every state.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReplayFile {
    pub version: u32,
    pub moves: Vec<String>,
}

impl ReplayFile {
    pub fn new(moves: Vec<String>) -> Self {
        Self {
            version: REPLAY_VERSION,
            moves,
        }
    }
}
