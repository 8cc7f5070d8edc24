use std::fmt;
use std::sync::mpsc::Sender;

use super::types::{ArenaMode, Team};

/// Something a human watching the arena would want to know about.
#[derive(Debug, Clone, PartialEq)]
pub enum ArenaEvent {
    Join { nickname: String },
    Quit { nickname: String },
    NickChange { old: String, new: String },
    TeamChange { nickname: String, old: Team, new: Team },
    ModeChange(ArenaMode),
    MapChange(String),
}

impl fmt::Display for ArenaEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArenaEvent::Join { nickname } => write!(f, "{} joined the arena", nickname),
            ArenaEvent::Quit { nickname } => write!(f, "{} left the arena", nickname),
            ArenaEvent::NickChange { old, new } => write!(f, "{} is now known as {}", old, new),
            ArenaEvent::TeamChange { nickname, new, .. } => {
                write!(f, "{} joined team {}", nickname, new)
            }
            ArenaEvent::ModeChange(mode) => write!(f, "mode changed to {}", mode.as_str()),
            ArenaEvent::MapChange(map) => write!(f, "next map is {}", map),
        }
    }
}

pub trait ArenaLogger: Send {
    fn on_event(&mut self, event: &ArenaEvent);
}

/// Writes arena events through the `log` facade.
#[derive(Debug, Clone, Default)]
pub struct LogLogger {
    pub prefix: String,
}

impl LogLogger {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }
}

impl ArenaLogger for LogLogger {
    fn on_event(&mut self, event: &ArenaEvent) {
        if self.prefix.is_empty() {
            log::info!("{}", event);
        } else {
            log::info!("[{}] {}", self.prefix, event);
        }
    }
}

impl ArenaLogger for Sender<ArenaEvent> {
    fn on_event(&mut self, event: &ArenaEvent) {
        // a dropped receiver just means nobody is listening any more
        let _ = self.send(event.clone());
    }
}
