mod arena;
mod event;
mod latency;
mod networked;
mod player;
mod scoreboard;
pub mod sky;
mod subsystem;
mod types;

pub use arena::{Arena, ArenaDelta, ArenaError, ArenaInit, ArenaState, DEFAULT_NICKNAME};
pub use event::{ArenaEvent, ArenaLogger, LogLogger};
pub use latency::{LatencyTracker, PlayerLatency};
pub use networked::{AutoNetworked, Networked, VerifyStructure};
pub use player::{LatencyStats, MAX_NICKNAME_LEN, Player, PlayerDelta, PlayerInit};
pub use scoreboard::{
    DEATHS, SPAWNS, ScoreRecord, ScoreRecordDelta, ScoreRecordInit, Scoreboard, ScoreboardDelta,
    ScoreboardInit,
};
pub use subsystem::{
    ArenaContext, AsAny, Subsystem, SubsystemHandle, SubsystemId, SubsystemListener,
};
pub use types::{
    Action, ArenaMode, Cooldown, Pid, Role, Team, Time, TimeDiff, pid_pack, smallest_unused,
};
