use concord_protocol::wire::WireError;
use concord_protocol::{CommandName, ParseError, PlayerId};
use thiserror::Error;

/// Why a submitted move was refused. Structural problems come in through
/// [`ParseError`]; everything else means the move text was well-formed but not
/// legal in the current state. A refused move leaves the state untouched.
#[derive(Debug, Error)]
pub enum MoveError {
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error("not {player}'s turn")]
    NotYourTurn { player: PlayerId },
    #[error("`{command}` is not available to {player} right now")]
    Unavailable {
        player: PlayerId,
        command: CommandName,
    },
    #[error("illegal move for {player}: {reason}")]
    Illegal { player: PlayerId, reason: String },
    #[error("internal invariant violated: {0}")]
    Invariant(String),
}

impl MoveError {
    pub fn illegal(player: PlayerId, reason: impl Into<String>) -> Self {
        MoveError::Illegal {
            player,
            reason: reason.into(),
        }
    }
}

/// Problems in the embedded rules data, surfaced once at startup.
#[derive(Debug, Error)]
pub enum RulesError {
    #[error("rules yaml: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("rules text: {0}")]
    Text(#[from] ParseError),
    #[error("invalid rules data: {0}")]
    Invalid(String),
}

#[derive(Debug, Error)]
pub enum ReplayError {
    #[error("replay move {index} (`{text}`): {source}")]
    Move {
        index: usize,
        text: String,
        #[source]
        source: MoveError,
    },
    #[error(transparent)]
    Wire(#[from] WireError),
}
