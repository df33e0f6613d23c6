//! Line-oriented operator console used by the binary.

use std::fmt::Write;

use thiserror::Error;

use crate::tournament::{
    CategoryId, MatchId, MatchStatus, Player, PlayerId, TournamentAction, TournamentState,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplCommand {
    Player { first_name: String, last_name: String },
    Category { name: String },
    Join { category: CategoryId, players: Vec<PlayerId> },
    Pause(MatchId),
    Resume(MatchId),
    Undo,
    Redo,
    Show,
    Help,
    Quit,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ReplError {
    #[error("unknown command `{0}`, try `help`")]
    UnknownCommand(String),
    #[error("usage: {0}")]
    Usage(&'static str),
    #[error("invalid id `{0}`")]
    InvalidId(String),
}

pub const HELP: &str = "\
player <first> <last>           add a player
category <name>                 add a category
join <category> <player>...     add players to a category and redraw it
pause <category> <match>        pause a match
resume <category> <match>       start or resume a match
undo | redo                     undo your last edit, redo the last undo
show                            print the tournament
quit";

fn parse_id(word: &str) -> Result<u64, ReplError> {
    u64::from_str_radix(word, 16).map_err(|_| ReplError::InvalidId(word.to_string()))
}

fn parse_match(words: &[&str], usage: &'static str) -> Result<MatchId, ReplError> {
    match words {
        [category, index] => Ok(MatchId {
            category: CategoryId(parse_id(category)?),
            index: index
                .parse()
                .map_err(|_| ReplError::InvalidId(index.to_string()))?,
        }),
        _ => Err(ReplError::Usage(usage)),
    }
}

pub fn parse(line: &str) -> Result<Option<ReplCommand>, ReplError> {
    let words: Vec<&str> = line.split_whitespace().collect();
    let (command, args) = match words.split_first() {
        Some((command, args)) => (*command, args),
        None => return Ok(None),
    };

    let command = match command {
        "player" => match args {
            [first_name, last_name] => ReplCommand::Player {
                first_name: first_name.to_string(),
                last_name: last_name.to_string(),
            },
            _ => return Err(ReplError::Usage("player <first> <last>")),
        },
        "category" if !args.is_empty() => ReplCommand::Category {
            name: args.join(" "),
        },
        "category" => return Err(ReplError::Usage("category <name>")),
        "join" => match args {
            [category, players @ ..] if !players.is_empty() => ReplCommand::Join {
                category: CategoryId(parse_id(category)?),
                players: players
                    .iter()
                    .map(|player| parse_id(player).map(PlayerId))
                    .collect::<Result<_, _>>()?,
            },
            _ => return Err(ReplError::Usage("join <category> <player>...")),
        },
        "pause" => ReplCommand::Pause(parse_match(args, "pause <category> <match>")?),
        "resume" => ReplCommand::Resume(parse_match(args, "resume <category> <match>")?),
        "undo" => ReplCommand::Undo,
        "redo" => ReplCommand::Redo,
        "show" => ReplCommand::Show,
        "help" => ReplCommand::Help,
        "quit" | "exit" => ReplCommand::Quit,
        other => return Err(ReplError::UnknownCommand(other.to_string())),
    };

    Ok(Some(command))
}

impl ReplCommand {
    /// The action this command dispatches, stamped with `master_time` when
    /// it touches a match clock.
    pub fn to_action(&self, master_time: i64) -> Option<TournamentAction> {
        Some(match self {
            ReplCommand::Player {
                first_name,
                last_name,
            } => TournamentAction::AddPlayers(vec![(
                PlayerId::generate(),
                Player::new(first_name.as_str(), last_name.as_str()),
            )]),
            ReplCommand::Category { name } => TournamentAction::AddCategory {
                category: CategoryId::generate(),
                name: name.clone(),
            },
            ReplCommand::Join { category, players } => TournamentAction::AddPlayersToCategory {
                category: *category,
                players: players.clone(),
            },
            ReplCommand::Pause(match_id) => TournamentAction::PauseMatch {
                match_id: *match_id,
                master_time,
            },
            ReplCommand::Resume(match_id) => TournamentAction::ResumeMatch {
                match_id: *match_id,
                master_time,
            },
            _ => return None,
        })
    }
}

pub fn render(state: &TournamentState, master_time: i64) -> String {
    let mut out = String::new();

    let _ = writeln!(out, "== {} ==", state.name);
    let _ = writeln!(out, "Players:");
    for (id, player) in &state.players {
        let _ = writeln!(
            out,
            "  {:016x}  {} {}",
            id.0, player.first_name, player.last_name
        );
    }

    for (id, category) in &state.categories {
        let _ = writeln!(out, "Category {:016x}  {}", id.0, category.name);
        for match_id in &category.matches {
            let entry = match state.matches.get(match_id) {
                Some(entry) => entry,
                None => continue,
            };
            let status = match entry.status {
                MatchStatus::NotStarted => "not started",
                MatchStatus::Running => "running",
                MatchStatus::Paused => "paused",
            };
            let name = |id: &PlayerId| {
                state
                    .player(id)
                    .map(|player| player.last_name.clone())
                    .unwrap_or_else(|| "?".to_string())
            };
            let _ = writeln!(
                out,
                "  #{} {} vs {}  {} {}s",
                match_id.index,
                name(&entry.white),
                name(&entry.blue),
                status,
                entry.elapsed_millis(master_time) / 1000
            );
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::{parse, ReplCommand, ReplError};
    use crate::tournament::{CategoryId, MatchId, PlayerId, TournamentAction};

    #[test]
    fn parses_commands() {
        assert_eq!(parse("   ").unwrap(), None);
        assert_eq!(parse("undo").unwrap(), Some(ReplCommand::Undo));
        assert_eq!(
            parse("category Juniors -60kg").unwrap(),
            Some(ReplCommand::Category {
                name: "Juniors -60kg".to_string()
            })
        );
        assert_eq!(
            parse("join ff 1 a").unwrap(),
            Some(ReplCommand::Join {
                category: CategoryId(255),
                players: vec![PlayerId(1), PlayerId(10)],
            })
        );
        assert_eq!(
            parse("resume 2 3").unwrap(),
            Some(ReplCommand::Resume(MatchId {
                category: CategoryId(2),
                index: 3
            }))
        );
    }

    #[test]
    fn rejects_bad_input() {
        assert_eq!(
            parse("dance").unwrap_err(),
            ReplError::UnknownCommand("dance".to_string())
        );
        assert_eq!(
            parse("join zz 1").unwrap_err(),
            ReplError::InvalidId("zz".to_string())
        );
        assert!(matches!(parse("player Ana"), Err(ReplError::Usage(_))));
        assert!(matches!(parse("pause 1"), Err(ReplError::Usage(_))));
    }

    #[test]
    fn timed_commands_carry_master_time() {
        let match_id = MatchId {
            category: CategoryId(1),
            index: 0,
        };

        assert_eq!(
            ReplCommand::Pause(match_id).to_action(42),
            Some(TournamentAction::PauseMatch {
                match_id,
                master_time: 42
            })
        );
        assert_eq!(ReplCommand::Show.to_action(42), None);
    }
}
