use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::telegraph::{ClassPack, Pack, PackError, byte_pack, map_pack, string_pack};

use super::event::{ArenaEvent, ArenaLogger};
use super::networked::{Networked, VerifyStructure};
use super::player::{MAX_NICKNAME_LEN, Player, PlayerDelta, PlayerInit};
use super::subsystem::{
    ArenaContext, Notice, SubsystemHandle, SubsystemId, SubsystemListener, SubsystemTable,
};
use super::types::{Action, ArenaMode, Pid, Time, TimeDiff, pid_pack, smallest_unused};

pub const DEFAULT_NICKNAME: &str = "nameless plane";

/// Room kept at the end of a nickname for a `(n)` suffix.
const NICKNAME_SUFFIX_ROOM: usize = 5;

/// Spawn and kill notices may raise further notices; this bounds the cascade.
const MAX_NOTICE_ROUNDS: usize = 8;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ArenaError {
    #[error("no free player IDs left")]
    Full,
    #[error("no free subsystem IDs left")]
    NoSubsystemSlot,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArenaInit {
    pub name: String,
    pub motd: String,
    pub next_map: String,
    pub mode: ArenaMode,
    pub uptime: Time,
    pub players: BTreeMap<Pid, PlayerInit>,
}

impl Default for ArenaInit {
    fn default() -> Self {
        Self {
            name: "my arena".into(),
            motd: String::new(),
            next_map: "ocean".into(),
            mode: ArenaMode::Lobby,
            uptime: 0.0,
            players: BTreeMap::new(),
        }
    }
}

impl ArenaInit {
    pub fn pack() -> Pack<Self> {
        ClassPack::<Self>::new()
            .member(string_pack(), |a| &a.name, |a| &mut a.name)
            .member(string_pack(), |a| &a.motd, |a| &mut a.motd)
            .member(string_pack(), |a| &a.next_map, |a| &mut a.next_map)
            .member(ArenaMode::pack(), |a| &a.mode, |a| &mut a.mode)
            .member(byte_pack(), |a| &a.uptime, |a| &mut a.uptime)
            .member(
                map_pack(pid_pack(), PlayerInit::pack()),
                |a| &a.players,
                |a| &mut a.players,
            )
            .build()
    }
}

impl VerifyStructure for ArenaInit {
    fn verify_structure(&self) -> bool {
        self.players
            .iter()
            .all(|(&pid, player)| pid == player.pid && player.verify_structure())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ArenaDelta {
    Quit(Pid),
    Join(PlayerInit),
    PlayerDeltas(BTreeMap<Pid, PlayerDelta>),
    Motd(String),
    Mode(ArenaMode),
    MapChange(String),
}

impl ArenaDelta {
    const TAG_BITS: u32 = 3;

    pub fn pack() -> Pack<Self> {
        let join = PlayerInit::pack();
        let deltas = map_pack(pid_pack(), PlayerDelta::pack());
        let text = string_pack();
        let mode = ArenaMode::pack();
        let (join_rx, deltas_rx, text_rx, mode_rx) =
            (join.clone(), deltas.clone(), text.clone(), mode.clone());

        Pack::new(
            move |packet, delta: &ArenaDelta| {
                let tag = match delta {
                    ArenaDelta::Quit(_) => 0,
                    ArenaDelta::Join(_) => 1,
                    ArenaDelta::PlayerDeltas(_) => 2,
                    ArenaDelta::Motd(_) => 3,
                    ArenaDelta::Mode(_) => 4,
                    ArenaDelta::MapChange(_) => 5,
                };
                packet.write_bits(tag, Self::TAG_BITS);
                match delta {
                    ArenaDelta::Quit(pid) => packet.write_value(*pid),
                    ArenaDelta::Join(init) => join.pack(packet, init),
                    ArenaDelta::PlayerDeltas(map) => deltas.pack(packet, map),
                    ArenaDelta::Motd(motd) => text.pack(packet, motd),
                    ArenaDelta::Mode(m) => mode.pack(packet, m),
                    ArenaDelta::MapChange(map) => text.pack(packet, map),
                }
            },
            move |packet| {
                let tag = packet.read_bits(Self::TAG_BITS)?;
                Ok(match tag {
                    0 => ArenaDelta::Quit(packet.read_value()?),
                    1 => ArenaDelta::Join(join_rx.unpack(packet)?),
                    2 => ArenaDelta::PlayerDeltas(deltas_rx.unpack(packet)?),
                    3 => ArenaDelta::Motd(text_rx.unpack(packet)?),
                    4 => ArenaDelta::Mode(mode_rx.unpack(packet)?),
                    5 => ArenaDelta::MapChange(text_rx.unpack(packet)?),
                    tag => {
                        return Err(PackError::InvalidTag {
                            what: "ArenaDelta",
                            tag,
                        });
                    }
                })
            },
        )
    }
}

impl VerifyStructure for ArenaDelta {
    fn verify_structure(&self) -> bool {
        match self {
            ArenaDelta::Join(init) => init.verify_structure(),
            ArenaDelta::PlayerDeltas(deltas) => !deltas.is_empty() && deltas.verify_structure(),
            ArenaDelta::MapChange(map) => !map.is_empty(),
            ArenaDelta::Quit(_) | ArenaDelta::Motd(_) | ArenaDelta::Mode(_) => true,
        }
    }
}

/// The replicated part of an arena, readable by subsystems while they run.
#[derive(Debug)]
pub struct ArenaState {
    name: String,
    motd: String,
    next_map: String,
    mode: ArenaMode,
    uptime: Time,
    players: BTreeMap<Pid, Player>,
}

impl ArenaState {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn motd(&self) -> &str {
        &self.motd
    }

    pub fn next_map(&self) -> &str {
        &self.next_map
    }

    pub fn mode(&self) -> ArenaMode {
        self.mode
    }

    pub fn uptime(&self) -> Time {
        self.uptime
    }

    pub fn player(&self, pid: Pid) -> Option<&Player> {
        self.players.get(&pid)
    }

    pub fn players(&self) -> impl Iterator<Item = &Player> {
        self.players.values()
    }

    pub fn pids(&self) -> impl Iterator<Item = Pid> + '_ {
        self.players.keys().copied()
    }

    pub fn player_count(&self) -> usize {
        self.players.len()
    }

    pub fn find_player(&self, nickname: &str) -> Option<&Player> {
        self.players.values().find(|p| p.nickname == nickname)
    }
}

/// Session root: owns the players, the attached subsystems and the loggers.
pub struct Arena {
    state: ArenaState,
    subsystems: SubsystemTable,
    loggers: Vec<Box<dyn ArenaLogger>>,
    notices: Vec<Notice>,
}

impl fmt::Debug for Arena {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Arena")
            .field("state", &self.state)
            .field("subsystems", &self.subsystems)
            .field("loggers", &self.loggers.len())
            .finish()
    }
}

impl Arena {
    pub fn new(init: &ArenaInit) -> Self {
        let players = init
            .players
            .values()
            .map(|player| (player.pid, Player::new(player)))
            .collect();
        Self {
            state: ArenaState {
                name: init.name.clone(),
                motd: init.motd.clone(),
                next_map: init.next_map.clone(),
                mode: init.mode,
                uptime: init.uptime,
                players,
            },
            subsystems: SubsystemTable::default(),
            loggers: Vec::new(),
            notices: Vec::new(),
        }
    }

    pub fn state(&self) -> &ArenaState {
        &self.state
    }

    pub fn add_logger(&mut self, logger: impl ArenaLogger + 'static) {
        self.loggers.push(Box::new(logger));
    }

    /// Attaches a subsystem under the smallest free ID and registers every
    /// player already present.
    pub fn attach<S: SubsystemListener>(
        &mut self,
        build: impl FnOnce(SubsystemId) -> S,
    ) -> Result<SubsystemHandle<S>, ArenaError> {
        let id = smallest_unused(self.subsystems.ids(), SubsystemId::MAX)
            .ok_or(ArenaError::NoSubsystemSlot)?;
        let mut subsystem = build(id);
        for player in self.state.players.values_mut() {
            subsystem.register_player(player);
        }
        self.subsystems.insert(id, Box::new(subsystem));
        log::debug!("attached subsystem {} ({})", id, std::any::type_name::<S>());
        Ok(SubsystemHandle::new(id))
    }

    pub fn detach<S: SubsystemListener>(&mut self, handle: SubsystemHandle<S>) -> Option<S> {
        self.subsystems.get(handle)?;
        let mut subsystem = self.subsystems.take(handle.id())?;
        for player in self.state.players.values_mut() {
            subsystem.unregister_player(player);
        }
        subsystem.into_any().downcast::<S>().ok().map(|s| *s)
    }

    pub fn subsystem<S: SubsystemListener>(&self, handle: SubsystemHandle<S>) -> Option<&S> {
        self.subsystems.get(handle)
    }

    pub fn subsystem_mut<S: SubsystemListener>(
        &mut self,
        handle: SubsystemHandle<S>,
    ) -> Option<&mut S> {
        self.subsystems.get_mut(handle)
    }

    /// Runs `f` on one subsystem with a full context, then delivers any
    /// notices it raised.
    pub fn with_subsystem<S: SubsystemListener, R>(
        &mut self,
        handle: SubsystemHandle<S>,
        f: impl FnOnce(&mut S, &mut ArenaContext<'_>) -> R,
    ) -> Option<R> {
        let mut boxed = self.subsystems.take(handle.id())?;
        let result = match (*boxed).as_any_mut().downcast_mut::<S>() {
            Some(subsystem) => {
                let mut ctx =
                    ArenaContext::new(&self.state, &self.subsystems, &mut self.notices);
                Some(f(subsystem, &mut ctx))
            }
            None => None,
        };
        self.subsystems.insert(handle.id(), boxed);
        self.flush_notices();
        result
    }

    /// Picks a nickname for `pid` that no other player is using: the
    /// request with trailing whitespace removed, suffixed with the smallest
    /// free `(n)` if taken.
    pub fn alloc_new_nickname(&self, pid: Pid, requested: &str) -> String {
        let trimmed = requested.trim_end();
        let base = if trimmed.is_empty() {
            DEFAULT_NICKNAME
        } else {
            truncate(trimmed, MAX_NICKNAME_LEN - NICKNAME_SUFFIX_ROOM)
        };

        let others = self.state.players.values().filter(|p| p.pid() != pid);
        let used = others.filter_map(|p| nickname_suffix(&p.nickname, base));
        match smallest_unused::<usize>(used, self.state.players.len()).unwrap_or(0) {
            0 => base.to_string(),
            n => format!("{}({})", base, n),
        }
    }

    /// Admits a new player under the smallest free PID and returns the
    /// `Join` that has already been applied here.
    pub fn connect_player(&mut self, requested: &str) -> Result<ArenaDelta, ArenaError> {
        let pid = smallest_unused(self.state.players.keys().copied(), Pid::MAX)
            .ok_or(ArenaError::Full)?;
        let nickname = self.alloc_new_nickname(pid, requested);
        let delta = ArenaDelta::Join(PlayerInit::new(pid, nickname));
        self.apply_delta(&delta);
        Ok(delta)
    }

    pub fn tick(&mut self, delta: TimeDiff) {
        self.state.uptime += Time::from(delta);
        self.dispatch(|subsystem, ctx| subsystem.on_tick(ctx, delta));
    }

    pub fn poll(&mut self, delta: TimeDiff) {
        self.dispatch(|subsystem, ctx| subsystem.on_poll(ctx, delta));
    }

    pub fn do_action(&mut self, pid: Pid, action: Action, state: bool) {
        if !self.state.players.contains_key(&pid) {
            return;
        }
        self.dispatch(|subsystem, ctx| {
            if let Some(player) = ctx.player(pid) {
                subsystem.on_action(ctx, player, action, state);
            }
        });
    }

    fn emit(&mut self, event: ArenaEvent) {
        for logger in &mut self.loggers {
            logger.on_event(&event);
        }
    }

    fn run_hooks(&mut self, mut hook: impl FnMut(&mut dyn SubsystemListener, &mut ArenaContext<'_>)) {
        for id in self.subsystems.ids() {
            let Some(mut subsystem) = self.subsystems.take(id) else {
                continue;
            };
            let mut ctx = ArenaContext::new(&self.state, &self.subsystems, &mut self.notices);
            hook(subsystem.as_mut(), &mut ctx);
            self.subsystems.insert(id, subsystem);
        }
    }

    fn dispatch(&mut self, hook: impl FnMut(&mut dyn SubsystemListener, &mut ArenaContext<'_>)) {
        self.run_hooks(hook);
        self.flush_notices();
    }

    fn flush_notices(&mut self) {
        for _ in 0..MAX_NOTICE_ROUNDS {
            if self.notices.is_empty() {
                return;
            }
            for notice in std::mem::take(&mut self.notices) {
                self.run_hooks(|subsystem, ctx| match notice {
                    Notice::Spawn(pid) => {
                        if let Some(player) = ctx.player(pid) {
                            subsystem.on_spawn(ctx, player);
                        }
                    }
                    Notice::Kill(pid) => {
                        if let Some(player) = ctx.player(pid) {
                            subsystem.on_kill(ctx, player);
                        }
                    }
                });
            }
        }
        if !self.notices.is_empty() {
            log::warn!("dropping {} notices raised in a cascade", self.notices.len());
            self.notices.clear();
        }
    }

    fn remove_player(&mut self, pid: Pid) -> Option<Player> {
        if !self.state.players.contains_key(&pid) {
            return None;
        }
        self.dispatch(|subsystem, ctx| {
            if let Some(player) = ctx.player(pid) {
                subsystem.on_quit(ctx, player);
            }
        });
        let mut player = self.state.players.remove(&pid)?;
        for subsystem in self.subsystems.listeners_mut() {
            subsystem.unregister_player(&mut player);
        }
        Some(player)
    }

    fn add_player(&mut self, init: &PlayerInit) {
        if let Some(stale) = self.remove_player(init.pid) {
            log::debug!("evicted stale player {} ({})", stale.pid(), stale.nickname);
        }
        let mut player = Player::new(init);
        for subsystem in self.subsystems.listeners_mut() {
            subsystem.register_player(&mut player);
        }
        self.state.players.insert(init.pid, player);

        let pid = init.pid;
        self.dispatch(|subsystem, ctx| {
            if let Some(player) = ctx.player(pid) {
                subsystem.on_join(ctx, player);
            }
        });
        self.emit(ArenaEvent::Join {
            nickname: init.nickname.clone(),
        });
    }

    fn apply_player_delta(&mut self, pid: Pid, delta: &PlayerDelta) {
        let Some(player) = self.state.players.get_mut(&pid) else {
            log::debug!("ignoring delta for unknown player {}", pid);
            return;
        };
        let old_nickname = player.nickname.clone();
        let old_team = player.team;
        player.apply_delta(delta);
        let (nickname, team) = (player.nickname.clone(), player.team);

        if nickname != old_nickname {
            self.emit(ArenaEvent::NickChange {
                old: old_nickname,
                new: nickname.clone(),
            });
        }
        if team != old_team {
            self.emit(ArenaEvent::TeamChange {
                nickname,
                old: old_team,
                new: team,
            });
        }
        self.dispatch(|subsystem, ctx| {
            if let Some(player) = ctx.player(pid) {
                subsystem.on_delta(ctx, player, delta);
            }
        });
    }
}

impl Networked for Arena {
    type Init = ArenaInit;
    type Delta = ArenaDelta;

    fn apply_delta(&mut self, delta: &ArenaDelta) {
        match delta {
            ArenaDelta::Quit(pid) => {
                if let Some(player) = self.remove_player(*pid) {
                    self.emit(ArenaEvent::Quit {
                        nickname: player.nickname,
                    });
                }
            }
            ArenaDelta::Join(init) => self.add_player(init),
            ArenaDelta::PlayerDeltas(deltas) => {
                for (&pid, player_delta) in deltas {
                    self.apply_player_delta(pid, player_delta);
                }
            }
            ArenaDelta::Motd(motd) => self.state.motd = motd.clone(),
            ArenaDelta::Mode(mode) => {
                if *mode == self.state.mode {
                    return;
                }
                self.state.mode = *mode;
                self.emit(ArenaEvent::ModeChange(*mode));
                let mode = *mode;
                self.dispatch(|subsystem, ctx| subsystem.on_mode(ctx, mode));
            }
            ArenaDelta::MapChange(map) => {
                if *map == self.state.next_map {
                    return;
                }
                self.state.next_map = map.clone();
                self.emit(ArenaEvent::MapChange(map.clone()));
                self.dispatch(|subsystem, ctx| subsystem.on_map_change(ctx, map));
            }
        }
    }

    fn capture_initializer(&self) -> ArenaInit {
        ArenaInit {
            name: self.state.name.clone(),
            motd: self.state.motd.clone(),
            next_map: self.state.next_map.clone(),
            mode: self.state.mode,
            uptime: self.state.uptime,
            players: self
                .state
                .players
                .iter()
                .map(|(&pid, player)| (pid, player.capture_initializer()))
                .collect(),
        }
    }
}

fn nickname_suffix(nickname: &str, base: &str) -> Option<usize> {
    let rest = nickname.strip_prefix(base)?;
    if rest.is_empty() {
        return Some(0);
    }
    let digits = rest.strip_prefix('(')?.strip_suffix(')')?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

fn truncate(s: &str, max_len: usize) -> &str {
    if s.len() <= max_len {
        return s;
    }
    let mut end = max_len;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc;

    use super::*;

    fn arena_with(nicks: &[&str]) -> Arena {
        let mut arena = Arena::new(&ArenaInit::default());
        for nick in nicks {
            arena.connect_player(nick).unwrap();
        }
        arena
    }

    fn nicknames(arena: &Arena) -> Vec<String> {
        arena.state().players().map(|p| p.nickname.clone()).collect()
    }

    #[test]
    fn nicknames_get_numbered_suffixes() {
        let arena = arena_with(&["", "nameless somebody", "nameless plane", "nameless plane", "nameless plane"]);
        assert_eq!(
            nicknames(&arena),
            [
                "nameless plane",
                "nameless somebody",
                "nameless plane(1)",
                "nameless plane(2)",
                "nameless plane(3)",
            ]
        );

        assert_eq!(arena.alloc_new_nickname(3, "nameless plane "), "nameless plane(2)");
        assert_eq!(arena.alloc_new_nickname(3, "nameless somebody"), "nameless somebody(1)");
        assert_eq!(arena.alloc_new_nickname(1, "nameless plane"), "nameless plane(4)");
    }

    #[test]
    fn blank_nickname_becomes_default() {
        let arena = arena_with(&[]);
        assert_eq!(arena.alloc_new_nickname(0, "   "), DEFAULT_NICKNAME);
    }

    #[test]
    fn long_nicknames_leave_room_for_suffix() {
        let long = "w".repeat(MAX_NICKNAME_LEN);
        let arena = arena_with(&[long.as_str(), long.as_str()]);
        for player in arena.state().players() {
            assert!(player.nickname.len() <= MAX_NICKNAME_LEN);
        }
        assert!(arena.state().player(1).unwrap().nickname.ends_with("(1)"));
    }

    #[test]
    fn freed_pid_is_reused() {
        let mut arena = arena_with(&["a", "b", "c"]);
        arena.apply_delta(&ArenaDelta::Quit(1));
        let ArenaDelta::Join(init) = arena.connect_player("d").unwrap() else {
            panic!("connect_player must return a join");
        };
        assert_eq!(init.pid, 1);
        assert_eq!(arena.state().player(1).unwrap().nickname, "d");
    }

    #[test]
    fn quit_for_unknown_pid_changes_nothing() {
        let mut arena = arena_with(&["a"]);
        let before = arena.capture_initializer();
        arena.apply_delta(&ArenaDelta::Quit(9));
        assert_eq!(arena.capture_initializer(), before);
    }

    #[test]
    fn events_reach_loggers() {
        let (tx, rx) = mpsc::channel();
        let mut arena = arena_with(&[]);
        arena.add_logger(tx);

        arena.connect_player("kestrel").unwrap();
        arena.apply_delta(&ArenaDelta::Mode(ArenaMode::Game));
        arena.apply_delta(&ArenaDelta::Mode(ArenaMode::Game));
        arena.apply_delta(&ArenaDelta::PlayerDeltas(BTreeMap::from([(
            0,
            PlayerDelta {
                nickname: Some("osprey".into()),
                ..Default::default()
            },
        )])));
        arena.apply_delta(&ArenaDelta::Quit(0));

        let events: Vec<_> = rx.try_iter().collect();
        assert_eq!(
            events,
            [
                ArenaEvent::Join {
                    nickname: "kestrel".into()
                },
                ArenaEvent::ModeChange(ArenaMode::Game),
                ArenaEvent::NickChange {
                    old: "kestrel".into(),
                    new: "osprey".into()
                },
                ArenaEvent::Quit {
                    nickname: "osprey".into()
                },
            ]
        );
    }

    #[test]
    fn mirror_converges_on_the_same_deltas() {
        let mut source = arena_with(&["a"]);
        let mut mirror = Arena::new(&source.capture_initializer());

        let mut deltas = vec![source.connect_player("b").unwrap()];
        for delta in [
            ArenaDelta::Motd("welcome".into()),
            ArenaDelta::MapChange("canyon".into()),
            ArenaDelta::Quit(0),
        ] {
            source.apply_delta(&delta);
            deltas.push(delta);
        }
        for delta in &deltas {
            mirror.apply_delta(delta);
        }
        assert_eq!(mirror.capture_initializer(), source.capture_initializer());
    }

    #[test]
    fn delta_structure_is_checked() {
        assert!(!ArenaDelta::PlayerDeltas(BTreeMap::new()).verify_structure());
        assert!(!ArenaDelta::Join(PlayerInit::new(0, "")).verify_structure());
        assert!(ArenaDelta::Quit(3).verify_structure());

        let mut init = ArenaInit::default();
        init.players.insert(2, PlayerInit::new(1, "mismatched"));
        assert!(!init.verify_structure());
    }

    #[test]
    fn unknown_tag_is_rejected() {
        let mut packet = crate::telegraph::Packet::new();
        packet.write_bits(7, 3);
        assert!(matches!(
            ArenaDelta::pack().unpack(&mut packet),
            Err(PackError::InvalidTag { what: "ArenaDelta", tag: 7 })
        ));
    }
}
