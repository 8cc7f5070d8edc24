use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::telegraph::{ClassPack, Pack, bool_pack, byte_pack, optional_pack, string_pack};

use super::networked::{Networked, VerifyStructure};
use super::subsystem::SubsystemId;
use super::types::{Pid, Team, pid_pack};

pub const MAX_NICKNAME_LEN: usize = 64;

/// Round-trip latency and clock offset, in milliseconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LatencyStats {
    pub latency: u32,
    pub clock_offset: i32,
}

impl LatencyStats {
    pub fn pack() -> Pack<Self> {
        ClassPack::<Self>::new()
            .member(byte_pack(), |s| &s.latency, |s| &mut s.latency)
            .member(byte_pack(), |s| &s.clock_offset, |s| &mut s.clock_offset)
            .build()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlayerInit {
    pub pid: Pid,
    pub nickname: String,
    pub admin: bool,
    pub team: Team,
    pub latency: LatencyStats,
}

impl PlayerInit {
    pub fn new(pid: Pid, nickname: impl Into<String>) -> Self {
        Self {
            pid,
            nickname: nickname.into(),
            ..Default::default()
        }
    }

    pub fn pack() -> Pack<Self> {
        ClassPack::<Self>::new()
            .member(pid_pack(), |p| &p.pid, |p| &mut p.pid)
            .member(string_pack(), |p| &p.nickname, |p| &mut p.nickname)
            .member(bool_pack(), |p| &p.admin, |p| &mut p.admin)
            .member(byte_pack(), |p| &p.team, |p| &mut p.team)
            .member(LatencyStats::pack(), |p| &p.latency, |p| &mut p.latency)
            .build()
    }
}

impl VerifyStructure for PlayerInit {
    fn verify_structure(&self) -> bool {
        !self.nickname.is_empty() && self.nickname.len() <= MAX_NICKNAME_LEN
    }
}

/// Changes to one player. `None` fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlayerDelta {
    pub nickname: Option<String>,
    pub admin: Option<bool>,
    pub team: Option<Team>,
    pub latency: Option<LatencyStats>,
}

impl PlayerDelta {
    pub fn pack() -> Pack<Self> {
        ClassPack::<Self>::new()
            .member(optional_pack(string_pack()), |d| &d.nickname, |d| &mut d.nickname)
            .member(optional_pack(bool_pack()), |d| &d.admin, |d| &mut d.admin)
            .member(optional_pack(byte_pack()), |d| &d.team, |d| &mut d.team)
            .member(optional_pack(LatencyStats::pack()), |d| &d.latency, |d| &mut d.latency)
            .build()
    }

    pub fn is_empty(&self) -> bool {
        self.nickname.is_none() && self.admin.is_none() && self.team.is_none() && self.latency.is_none()
    }
}

impl VerifyStructure for PlayerDelta {
    fn verify_structure(&self) -> bool {
        self.nickname
            .as_ref()
            .is_none_or(|n| !n.is_empty() && n.len() <= MAX_NICKNAME_LEN)
    }
}

/// One connected participant. Owned by the arena; subsystems keep their own
/// per-player data and only leave their ID in `attachments`.
#[derive(Debug, PartialEq)]
pub struct Player {
    pid: Pid,
    pub nickname: String,
    pub admin: bool,
    pub team: Team,
    pub latency: LatencyStats,
    attachments: BTreeSet<SubsystemId>,
}

impl Player {
    pub(crate) fn new(init: &PlayerInit) -> Self {
        Self {
            pid: init.pid,
            nickname: init.nickname.clone(),
            admin: init.admin,
            team: init.team,
            latency: init.latency,
            attachments: BTreeSet::new(),
        }
    }

    pub fn pid(&self) -> Pid {
        self.pid
    }

    pub fn is_attached(&self, subsystem: SubsystemId) -> bool {
        self.attachments.contains(&subsystem)
    }

    pub fn attachments(&self) -> impl Iterator<Item = SubsystemId> + '_ {
        self.attachments.iter().copied()
    }

    pub(crate) fn attach(&mut self, subsystem: SubsystemId) {
        self.attachments.insert(subsystem);
    }

    pub(crate) fn detach(&mut self, subsystem: SubsystemId) {
        self.attachments.remove(&subsystem);
    }
}

impl Networked for Player {
    type Init = PlayerInit;
    type Delta = PlayerDelta;

    fn apply_delta(&mut self, delta: &PlayerDelta) {
        if let Some(nickname) = &delta.nickname {
            self.nickname = nickname.clone();
        }
        if let Some(admin) = delta.admin {
            self.admin = admin;
        }
        if let Some(team) = delta.team {
            self.team = team;
        }
        if let Some(latency) = delta.latency {
            self.latency = latency;
        }
    }

    fn capture_initializer(&self) -> PlayerInit {
        PlayerInit {
            pid: self.pid,
            nickname: self.nickname.clone(),
            admin: self.admin,
            team: self.team,
            latency: self.latency,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_delta_changes_nothing() {
        let init = PlayerInit {
            pid: 3,
            nickname: "kestrel".into(),
            admin: true,
            team: 2,
            latency: LatencyStats {
                latency: 40,
                clock_offset: -3,
            },
        };
        let mut player = Player::new(&init);
        player.apply_delta(&PlayerDelta::default());
        assert_eq!(player.capture_initializer(), init);
    }

    #[test]
    fn partial_delta_touches_only_its_fields() {
        let mut player = Player::new(&PlayerInit::new(0, "kestrel"));
        player.apply_delta(&PlayerDelta {
            team: Some(1),
            ..Default::default()
        });
        assert_eq!(player.team, 1);
        assert_eq!(player.nickname, "kestrel");
        assert!(!player.admin);
    }

    #[test]
    fn delta_pack_preserves_absent_fields() {
        let delta = PlayerDelta {
            nickname: Some("osprey".into()),
            latency: Some(LatencyStats {
                latency: 120,
                clock_offset: 7,
            }),
            ..Default::default()
        };
        let pack = PlayerDelta::pack();
        let mut packet = pack.to_packet(&delta);
        assert_eq!(pack.unpack(&mut packet).unwrap(), delta);
    }

    #[test]
    fn nickname_bounds_are_verified() {
        assert!(!PlayerInit::new(0, "").verify_structure());
        assert!(!PlayerInit::new(0, "x".repeat(MAX_NICKNAME_LEN + 1)).verify_structure());
        assert!(
            !PlayerDelta {
                nickname: Some(String::new()),
                ..Default::default()
            }
            .verify_structure()
        );
    }
}
