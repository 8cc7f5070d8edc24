use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::telegraph::{Pack, PackEnum, byte_pack, enum_pack};

/// Participant identifier, unique within one arena at a time.
pub type Pid = u8;
pub type Team = u8;
/// Seconds since some origin.
pub type Time = f64;
/// Seconds.
pub type TimeDiff = f32;

pub fn pid_pack() -> Pack<Pid> {
    byte_pack::<u8>()
}

/// Smallest value of `0..=max` that is not in `used`.
pub fn smallest_unused<T>(used: impl IntoIterator<Item = T>, max: T) -> Option<T>
where
    T: Copy + Ord + TryFrom<usize> + Into<usize>,
{
    let used: BTreeSet<T> = used.into_iter().collect();
    (0..=max.into())
        .filter_map(|n| T::try_from(n).ok())
        .find(|n| !used.contains(n))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ArenaMode {
    Lobby,
    Game,
    Scoring,
}

impl PackEnum for ArenaMode {
    const NAME: &'static str = "ArenaMode";

    fn to_tag(self) -> u64 {
        match self {
            ArenaMode::Lobby => 0,
            ArenaMode::Game => 1,
            ArenaMode::Scoring => 2,
        }
    }

    fn from_tag(tag: u64) -> Option<Self> {
        match tag {
            0 => Some(ArenaMode::Lobby),
            1 => Some(ArenaMode::Game),
            2 => Some(ArenaMode::Scoring),
            _ => None,
        }
    }
}

impl ArenaMode {
    pub fn pack() -> Pack<Self> {
        enum_pack(2)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ArenaMode::Lobby => "lobby",
            ArenaMode::Game => "game",
            ArenaMode::Scoring => "scoring",
        }
    }
}

/// Player inputs, each either held or released.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Action {
    Thrust,
    Reverse,
    Left,
    Right,
    Primary,
    Secondary,
    Special,
    Suicide,
}

impl Action {
    pub const ALL: [Action; 8] = [
        Action::Thrust,
        Action::Reverse,
        Action::Left,
        Action::Right,
        Action::Primary,
        Action::Secondary,
        Action::Special,
        Action::Suicide,
    ];

    pub fn pack() -> Pack<Self> {
        enum_pack(3)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Thrust => "thrust",
            Action::Reverse => "reverse",
            Action::Left => "left",
            Action::Right => "right",
            Action::Primary => "primary",
            Action::Secondary => "secondary",
            Action::Special => "special",
            Action::Suicide => "suicide",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|a| a.as_str() == name)
    }
}

impl PackEnum for Action {
    const NAME: &'static str = "Action";

    fn to_tag(self) -> u64 {
        self as u64
    }

    fn from_tag(tag: u64) -> Option<Self> {
        Self::ALL.get(tag as usize).copied()
    }
}

/// Which side of the wire an arena lives on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Server,
    Client,
}

impl Role {
    pub fn is_server(&self) -> bool {
        matches!(self, Role::Server)
    }
}

/// Counts down a fixed period; `cool` reports when it has run out.
#[derive(Debug, Clone, Copy)]
pub struct Cooldown {
    pub period: TimeDiff,
    remaining: TimeDiff,
}

impl Cooldown {
    pub fn new(period: TimeDiff) -> Self {
        Self {
            period,
            remaining: period,
        }
    }

    /// Advances by `delta`. Returns true once the period has elapsed.
    pub fn cool(&mut self, delta: TimeDiff) -> bool {
        self.remaining = (self.remaining - delta).max(0.0);
        self.remaining <= 0.0
    }

    pub fn is_cool(&self) -> bool {
        self.remaining <= 0.0
    }

    pub fn reset(&mut self) {
        self.remaining = self.period;
    }

    /// `cool` followed by `reset` when it fires.
    pub fn tick(&mut self, delta: TimeDiff) -> bool {
        if self.cool(delta) {
            self.reset();
            true
        } else {
            false
        }
    }
}
