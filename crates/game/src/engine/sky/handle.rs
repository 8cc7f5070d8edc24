use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::engine::networked::{AutoNetworked, Networked, VerifyStructure};
use crate::engine::player::Player;
use crate::engine::subsystem::{ArenaContext, SubsystemId, SubsystemListener};
use crate::engine::types::{Action, ArenaMode, Pid, Role, TimeDiff};
use crate::telegraph::{ClassPack, Pack, PackError, optional_pack};

use super::map::MapProvider;
use super::plane::PlaneTuning;
use super::sky::{Sky, SkyDelta, SkyInit};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SkyHandleInit {
    pub sky: Option<SkyInit>,
}

impl SkyHandleInit {
    pub fn pack() -> Pack<Self> {
        ClassPack::<Self>::new()
            .member(optional_pack(SkyInit::pack()), |h| &h.sky, |h| &mut h.sky)
            .build()
    }
}

impl VerifyStructure for SkyHandleInit {
    fn verify_structure(&self) -> bool {
        self.sky.verify_structure()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SkyHandleDelta {
    /// A new sky, replacing whatever was there.
    Start(SkyInit),
    Stop,
    Sky(SkyDelta),
}

impl SkyHandleDelta {
    pub fn pack() -> Pack<Self> {
        let init = SkyInit::pack();
        let delta = SkyDelta::pack();
        let (init_rx, delta_rx) = (init.clone(), delta.clone());
        Pack::new(
            move |packet, value: &SkyHandleDelta| match value {
                SkyHandleDelta::Start(sky) => {
                    packet.write_bits(0, 2);
                    init.pack(packet, sky);
                }
                SkyHandleDelta::Stop => packet.write_bits(1, 2),
                SkyHandleDelta::Sky(sky) => {
                    packet.write_bits(2, 2);
                    delta.pack(packet, sky);
                }
            },
            move |packet| match packet.read_bits(2)? {
                0 => Ok(SkyHandleDelta::Start(init_rx.unpack(packet)?)),
                1 => Ok(SkyHandleDelta::Stop),
                2 => Ok(SkyHandleDelta::Sky(delta_rx.unpack(packet)?)),
                tag => Err(PackError::InvalidTag {
                    what: "SkyHandleDelta",
                    tag,
                }),
            },
        )
    }

    /// See [`SkyDelta::respect_authority`]. Returns `None` when nothing is
    /// left to send.
    pub fn respect_authority(&self, pid: Pid) -> Option<Self> {
        match self {
            SkyHandleDelta::Sky(delta) => {
                let delta = delta.respect_authority(pid);
                (!delta.is_empty()).then_some(SkyHandleDelta::Sky(delta))
            }
            other => Some(other.clone()),
        }
    }
}

impl VerifyStructure for SkyHandleDelta {
    fn verify_structure(&self) -> bool {
        match self {
            SkyHandleDelta::Start(init) => init.verify_structure(),
            SkyHandleDelta::Stop => true,
            SkyHandleDelta::Sky(delta) => delta.verify_structure(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    Unchanged,
    Started,
    Stopped,
}

/// Subsystem owning the sky of the current round, if one is running.
///
/// On the server the sky starts when the arena enters [`ArenaMode::Game`]
/// and stops when it leaves; clients follow through [`SkyHandleDelta`]s.
#[derive(Debug)]
pub struct SkyHandle {
    id: SubsystemId,
    role: Role,
    maps: Arc<dyn MapProvider>,
    sky: Option<Sky>,
    lifecycle: Lifecycle,
    pub tuning: PlaneTuning,
}

impl SkyHandle {
    pub fn new(id: SubsystemId, role: Role, init: &SkyHandleInit, maps: Arc<dyn MapProvider>) -> Self {
        let sky = init.sky.as_ref().map(|sky| Sky::new(sky, maps.as_ref()));
        Self {
            id,
            role,
            maps,
            sky,
            lifecycle: Lifecycle::Unchanged,
            tuning: PlaneTuning::default(),
        }
    }

    pub fn id(&self) -> SubsystemId {
        self.id
    }

    pub fn sky(&self) -> Option<&Sky> {
        self.sky.as_ref()
    }

    pub fn sky_mut(&mut self) -> Option<&mut Sky> {
        self.sky.as_mut()
    }

    pub fn is_active(&self) -> bool {
        self.sky.is_some()
    }

    /// Starts a fresh sky on the arena's next map, with every current player
    /// participating.
    pub fn start(&mut self, ctx: &ArenaContext<'_>) {
        let arena = ctx.arena();
        let mut sky = Sky::new(&SkyInit::new(arena.next_map()), self.maps.as_ref());
        for pid in arena.pids() {
            sky.join(pid);
        }
        log::info!("sky started on {}", sky.map().name);
        self.sky = Some(sky);
        self.lifecycle = Lifecycle::Started;
    }

    pub fn stop(&mut self) {
        if self.sky.take().is_some() {
            log::info!("sky stopped");
            self.lifecycle = Lifecycle::Stopped;
        }
    }

    /// Spawns `pid`'s plane and notifies every subsystem. Returns false if
    /// there is no sky or the player is already alive.
    pub fn spawn(&mut self, ctx: &mut ArenaContext<'_>, pid: Pid) -> bool {
        let Some(player) = ctx.player(pid) else {
            return false;
        };
        let tuning = self.tuning;
        let spawned = self
            .sky
            .as_mut()
            .is_some_and(|sky| sky.spawn(pid, player.team, tuning));
        if spawned {
            ctx.notify_spawn(pid);
        }
        spawned
    }

    /// Kills `pid`'s plane and notifies every subsystem.
    pub fn kill(&mut self, ctx: &mut ArenaContext<'_>, pid: Pid) -> bool {
        let killed = self.sky.as_mut().is_some_and(|sky| sky.kill(pid));
        if killed {
            ctx.notify_kill(pid);
        }
        killed
    }
}

impl SubsystemListener for SkyHandle {
    fn on_tick(&mut self, ctx: &mut ArenaContext<'_>, delta: TimeDiff) {
        let Some(sky) = &mut self.sky else {
            return;
        };
        for pid in sky.tick(delta, self.role.is_server()) {
            log::debug!("player {} crashed", pid);
            ctx.notify_kill(pid);
        }
    }

    fn on_join(&mut self, _ctx: &mut ArenaContext<'_>, player: &Player) {
        if let Some(sky) = &mut self.sky {
            sky.join(player.pid());
        }
    }

    fn on_quit(&mut self, _ctx: &mut ArenaContext<'_>, player: &Player) {
        if let Some(sky) = &mut self.sky {
            sky.quit(player.pid());
        }
    }

    fn on_mode(&mut self, ctx: &mut ArenaContext<'_>, mode: ArenaMode) {
        if !self.role.is_server() {
            return;
        }
        match mode {
            ArenaMode::Game if !self.is_active() => self.start(ctx),
            ArenaMode::Game => {}
            ArenaMode::Lobby | ArenaMode::Scoring => self.stop(),
        }
    }

    fn on_action(&mut self, ctx: &mut ArenaContext<'_>, player: &Player, action: Action, state: bool) {
        let Some(sky) = &mut self.sky else {
            return;
        };
        sky.do_action(player.pid(), action, state);
        if action == Action::Suicide && state && self.role.is_server() {
            self.kill(ctx, player.pid());
        }
    }
}

impl Networked for SkyHandle {
    type Init = SkyHandleInit;
    type Delta = SkyHandleDelta;

    fn apply_delta(&mut self, delta: &SkyHandleDelta) {
        match delta {
            SkyHandleDelta::Start(init) => self.sky = Some(Sky::new(init, self.maps.as_ref())),
            SkyHandleDelta::Stop => self.sky = None,
            SkyHandleDelta::Sky(delta) => {
                if let Some(sky) = &mut self.sky {
                    sky.apply_delta(delta);
                }
            }
        }
    }

    fn capture_initializer(&self) -> SkyHandleInit {
        SkyHandleInit {
            sky: self.sky.as_ref().map(Sky::capture_initializer),
        }
    }
}

impl AutoNetworked for SkyHandle {
    fn collect_delta(&mut self) -> Option<SkyHandleDelta> {
        let lifecycle = std::mem::replace(&mut self.lifecycle, Lifecycle::Unchanged);
        match (lifecycle, &mut self.sky) {
            (Lifecycle::Started, Some(sky)) => {
                // the start carries the full state
                sky.collect_delta();
                Some(SkyHandleDelta::Start(sky.capture_initializer()))
            }
            (Lifecycle::Stopped, None) => Some(SkyHandleDelta::Stop),
            (_, Some(sky)) => sky.collect_delta().map(SkyHandleDelta::Sky),
            (_, None) => None,
        }
    }
}
