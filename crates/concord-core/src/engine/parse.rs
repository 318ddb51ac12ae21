use concord_protocol::{CommandName, Faction, ParseError, PlayerId};

use crate::engine::GameState;

/// One `<command> [args...]` segment of a move line.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SubCommand {
    pub name: CommandName,
    pub args: Vec<String>,
}

/// One parsed move line: an acting player (absent only for `init`) and the
/// dot-separated sub-commands submitted on their turn.
#[derive(Clone, Debug)]
pub struct MoveLine {
    pub player: Option<PlayerId>,
    pub text: String,
    pub commands: Vec<SubCommand>,
}

impl MoveLine {
    /// `p2 build m -4x2. burn 2` -> player + [build, burn]. The player
    /// prefix is a seat (`p2`) or a chosen faction name; `init` carries no
    /// prefix. Empty segments from trailing dots are skipped.
    pub fn parse(state: &GameState, text: &str) -> Result<MoveLine, ParseError> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Err(ParseError::Empty);
        }
        let first = trimmed.split_whitespace().next().unwrap_or_default();
        let (player, rest) = if first.eq_ignore_ascii_case("init") {
            (None, trimmed)
        } else {
            let id = resolve_player(state, first)?;
            (Some(id), trimmed[first.len()..].trim_start())
        };

        let mut commands = Vec::new();
        for segment in rest.split('.') {
            let segment = segment.trim();
            if segment.is_empty() {
                continue;
            }
            let mut words = segment.split_whitespace();
            let name: CommandName = words
                .next()
                .ok_or(ParseError::MissingArgument("command"))?
                .parse()?;
            commands.push(SubCommand {
                name,
                args: words.map(str::to_string).collect(),
            });
        }
        if commands.is_empty() {
            return Err(ParseError::Empty);
        }
        Ok(MoveLine {
            player,
            text: trimmed.to_string(),
            commands,
        })
    }
}

fn resolve_player(state: &GameState, token: &str) -> Result<PlayerId, ParseError> {
    if let Ok(id) = token.parse::<PlayerId>() {
        return Ok(id);
    }
    if let Ok(faction) = token.parse::<Faction>() {
        if let Some(id) = state.player_by_faction(faction) {
            return Ok(id);
        }
    }
    Err(ParseError::Player(token.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::GameEngine;
    use crate::rules::{load_rules, RulesSource};

    fn state_after_init() -> GameState {
        let mut engine = GameEngine::new(load_rules(RulesSource::Embedded).unwrap());
        engine.process("init 2 parse-fixture").unwrap();
        engine.state
    }

    #[test]
    fn init_lines_carry_no_player() {
        let state = state_after_init();
        let line = MoveLine::parse(&state, "init 3 some-seed auction").unwrap();
        assert_eq!(line.player, None);
        assert_eq!(line.commands.len(), 1);
        assert_eq!(line.commands[0].name, CommandName::Init);
        assert_eq!(line.commands[0].args, ["3", "some-seed", "auction"]);
    }

    #[test]
    fn dots_separate_sub_commands() {
        let state = state_after_init();
        let line = MoveLine::parse(&state, "p2 build m -4x2. burn 2.").unwrap();
        assert_eq!(line.player, Some(PlayerId(1)));
        let names: Vec<CommandName> = line.commands.iter().map(|c| c.name).collect();
        assert_eq!(names, [CommandName::Build, CommandName::Burn]);
        assert_eq!(line.commands[0].args, ["m", "-4x2"]);
    }

    #[test]
    fn a_chosen_faction_name_resolves_to_its_seat() {
        let mut engine = GameEngine::new(load_rules(RulesSource::Embedded).unwrap());
        engine.process("init 2 parse-fixture").unwrap();
        engine.process("p1 faction terrans").unwrap();
        engine.process("p2 faction bescods").unwrap();
        let line = MoveLine::parse(&engine.state, "bescods build m 0x0").unwrap();
        assert_eq!(line.player, Some(PlayerId(1)));
        assert!(MoveLine::parse(&engine.state, "xenos build m 0x0").is_err());
    }

    #[test]
    fn unknown_players_and_commands_are_refused() {
        let state = state_after_init();
        assert!(matches!(
            MoveLine::parse(&state, "p9teen build m 0x0"),
            Err(ParseError::Player(_))
        ));
        assert!(matches!(
            MoveLine::parse(&state, "p1 teleport 0x0"),
            Err(ParseError::Keyword { .. })
        ));
        assert!(matches!(MoveLine::parse(&state, "   "), Err(ParseError::Empty)));
    }
}
