use std::io::{self, BufRead};
use std::sync::mpsc::{self, Receiver};
use std::thread;

use aloft::engine::{Action, PlayerDelta, Team};

/// What a line typed at the prompt asks for.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Chat(String),
    RCon(String),
    Spawn,
    Nick(String),
    Team(Team),
    Action { action: Action, state: bool },
    Quit,
}

impl Command {
    /// Lines starting with `/` are commands, anything else is chat.
    pub fn parse(line: &str) -> Result<Self, String> {
        let line = line.trim();
        let Some(command) = line.strip_prefix('/') else {
            return Ok(Command::Chat(line.to_string()));
        };
        let (verb, argument) = match command.split_once(char::is_whitespace) {
            Some((verb, argument)) => (verb, argument.trim()),
            None => (command, ""),
        };
        match verb {
            "rcon" => Ok(Command::RCon(argument.to_string())),
            "spawn" => Ok(Command::Spawn),
            "nick" if !argument.is_empty() => Ok(Command::Nick(argument.to_string())),
            "team" => argument
                .parse()
                .map(Command::Team)
                .map_err(|_| format!("not a team: '{}'", argument)),
            "press" | "release" => Action::from_name(argument)
                .map(|action| Command::Action {
                    action,
                    state: verb == "press",
                })
                .ok_or_else(|| format!("unknown action '{}'", argument)),
            "quit" => Ok(Command::Quit),
            _ => Err(format!("unknown command '/{}'", verb)),
        }
    }

    pub fn player_delta(&self) -> Option<PlayerDelta> {
        match self {
            Command::Nick(nickname) => Some(PlayerDelta {
                nickname: Some(nickname.clone()),
                ..Default::default()
            }),
            Command::Team(team) => Some(PlayerDelta {
                team: Some(*team),
                ..Default::default()
            }),
            _ => None,
        }
    }
}

pub fn spawn_reader() -> Receiver<String> {
    let (sender, lines) = mpsc::channel();
    thread::spawn(move || {
        for line in io::stdin().lock().lines() {
            let Ok(line) = line else {
                break;
            };
            if line.trim().is_empty() {
                continue;
            }
            if sender.send(line).is_err() {
                break;
            }
        }
    });
    lines
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_lines_are_chat() {
        assert_eq!(
            Command::parse("  tally ho "),
            Ok(Command::Chat("tally ho".into()))
        );
    }

    #[test]
    fn slash_commands() {
        assert_eq!(
            Command::parse("/rcon login hunter2"),
            Ok(Command::RCon("login hunter2".into()))
        );
        assert_eq!(Command::parse("/team 2"), Ok(Command::Team(2)));
        assert_eq!(
            Command::parse("/release thrust"),
            Ok(Command::Action {
                action: Action::Thrust,
                state: false
            })
        );
        assert!(Command::parse("/team red").is_err());
        assert!(Command::parse("/nick").is_err());
        assert!(Command::parse("/loop").is_err());
    }

    #[test]
    fn profile_changes_become_deltas() {
        let delta = Command::Nick("osprey".into()).player_delta().unwrap();
        assert_eq!(delta.nickname.as_deref(), Some("osprey"));
        assert!(Command::Spawn.player_delta().is_none());
    }
}
