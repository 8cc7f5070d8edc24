use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::engine::networked::{AutoNetworked, Networked, VerifyStructure};
use crate::engine::types::{Action, Pid, Team, pid_pack};
use crate::telegraph::{ClassPack, Pack, byte_pack, map_pack, optional_pack, string_pack};

use super::map::{Map, MapProvider};
use super::participation::{Participation, ParticipationDelta, ParticipationInit};
use super::plane::PlaneTuning;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SkySettings {
    /// Downward acceleration on stalled planes.
    pub gravity: f32,
    pub view_scale: f32,
}

impl Default for SkySettings {
    fn default() -> Self {
        Self {
            gravity: 150.0,
            view_scale: 1.0,
        }
    }
}

impl SkySettings {
    pub fn pack() -> Pack<Self> {
        ClassPack::<Self>::new()
            .member(byte_pack(), |s| &s.gravity, |s| &mut s.gravity)
            .member(byte_pack(), |s| &s.view_scale, |s| &mut s.view_scale)
            .build()
    }
}

impl VerifyStructure for SkySettings {
    fn verify_structure(&self) -> bool {
        self.gravity.is_finite() && self.view_scale.is_finite() && self.view_scale > 0.0
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SkyInit {
    pub map: String,
    pub settings: SkySettings,
    pub participations: BTreeMap<Pid, ParticipationInit>,
}

impl SkyInit {
    pub fn new(map: impl Into<String>) -> Self {
        Self {
            map: map.into(),
            ..Default::default()
        }
    }

    pub fn pack() -> Pack<Self> {
        ClassPack::<Self>::new()
            .member(string_pack(), |s| &s.map, |s| &mut s.map)
            .member(SkySettings::pack(), |s| &s.settings, |s| &mut s.settings)
            .member(
                map_pack(pid_pack(), ParticipationInit::pack()),
                |s| &s.participations,
                |s| &mut s.participations,
            )
            .build()
    }
}

impl VerifyStructure for SkyInit {
    fn verify_structure(&self) -> bool {
        !self.map.is_empty()
            && self.settings.verify_structure()
            && self.participations.verify_structure()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SkyDelta {
    pub settings: Option<SkySettings>,
    pub participations: BTreeMap<Pid, ParticipationDelta>,
}

impl SkyDelta {
    pub fn pack() -> Pack<Self> {
        ClassPack::<Self>::new()
            .member(optional_pack(SkySettings::pack()), |d| &d.settings, |d| &mut d.settings)
            .member(
                map_pack(pid_pack(), ParticipationDelta::pack()),
                |d| &d.participations,
                |d| &mut d.participations,
            )
            .build()
    }

    pub fn is_empty(&self) -> bool {
        self.settings.is_none() && self.participations.is_empty()
    }

    /// The delta as it should be sent to `pid`: that player's own controls
    /// are theirs to drive, so they are left out.
    pub fn respect_authority(&self, pid: Pid) -> Self {
        let mut delta = self.clone();
        if let Some(own) = delta.participations.get_mut(&pid) {
            *own = own.respect_authority();
            if own.is_empty() {
                delta.participations.remove(&pid);
            }
        }
        delta
    }
}

impl VerifyStructure for SkyDelta {
    fn verify_structure(&self) -> bool {
        self.settings.verify_structure() && self.participations.verify_structure()
    }
}

/// One round of play on one map.
#[derive(Debug, Clone, PartialEq)]
pub struct Sky {
    map: Map,
    settings: SkySettings,
    participations: BTreeMap<Pid, Participation>,
    settings_dirty: bool,
}

impl Sky {
    /// Builds a sky from `init`, loading its map through `maps`. An unknown
    /// map name gives an empty map of that name.
    pub fn new(init: &SkyInit, maps: &dyn MapProvider) -> Self {
        let map = maps.load(&init.map).unwrap_or_else(|| {
            log::warn!("unknown map '{}', flying over open water", init.map);
            Map::empty(init.map.clone())
        });
        Self {
            map,
            settings: init.settings,
            participations: init
                .participations
                .iter()
                .map(|(&pid, participation)| (pid, Participation::new(participation)))
                .collect(),
            settings_dirty: false,
        }
    }

    pub fn map(&self) -> &Map {
        &self.map
    }

    pub fn settings(&self) -> &SkySettings {
        &self.settings
    }

    pub fn set_settings(&mut self, settings: SkySettings) {
        if settings != self.settings {
            self.settings = settings;
            self.settings_dirty = true;
        }
    }

    pub fn participation(&self, pid: Pid) -> Option<&Participation> {
        self.participations.get(&pid)
    }

    pub fn participations(&self) -> impl Iterator<Item = (Pid, &Participation)> {
        self.participations.iter().map(|(&pid, p)| (pid, p))
    }

    pub fn join(&mut self, pid: Pid) {
        self.participations
            .entry(pid)
            .or_insert_with(|| Participation::new(&ParticipationInit::default()));
    }

    pub fn quit(&mut self, pid: Pid) {
        self.participations.remove(&pid);
    }

    /// Spawns `pid`'s plane at the next spawn point for `team`. Returns false
    /// if the player is not participating or is already alive.
    pub fn spawn(&mut self, pid: Pid, team: Team, tuning: PlaneTuning) -> bool {
        let alive = self.participations.values().filter(|p| p.is_spawned()).count();
        let point = self.map.spawn_point(team, alive);
        match self.participations.get_mut(&pid) {
            Some(participation) if !participation.is_spawned() => {
                participation.spawn(tuning, point.position, point.angle);
                true
            }
            _ => false,
        }
    }

    pub fn kill(&mut self, pid: Pid) -> bool {
        self.participations
            .get_mut(&pid)
            .is_some_and(Participation::kill)
    }

    pub fn do_action(&mut self, pid: Pid, action: Action, state: bool) {
        if let Some(participation) = self.participations.get_mut(&pid) {
            participation.do_action(action, state);
        }
    }

    /// Advances every participation by `delta` seconds. With `authority`,
    /// planes that crashed are killed and their PIDs returned.
    pub fn tick(&mut self, delta: f32, authority: bool) -> Vec<Pid> {
        let mut crashed = Vec::new();
        for (&pid, participation) in &mut self.participations {
            if participation.tick(&self.map, self.settings.gravity, delta, authority) {
                participation.kill();
                crashed.push(pid);
            }
        }
        crashed
    }
}

impl Networked for Sky {
    type Init = SkyInit;
    type Delta = SkyDelta;

    fn apply_delta(&mut self, delta: &SkyDelta) {
        if let Some(settings) = delta.settings {
            self.settings = settings;
        }
        for (pid, participation_delta) in &delta.participations {
            if let Some(participation) = self.participations.get_mut(pid) {
                participation.apply_delta(participation_delta);
            }
        }
    }

    fn capture_initializer(&self) -> SkyInit {
        SkyInit {
            map: self.map.name.clone(),
            settings: self.settings,
            participations: self
                .participations
                .iter()
                .map(|(&pid, participation)| (pid, participation.capture_initializer()))
                .collect(),
        }
    }
}

impl AutoNetworked for Sky {
    fn collect_delta(&mut self) -> Option<SkyDelta> {
        let settings = self.settings_dirty.then_some(self.settings);
        self.settings_dirty = false;
        let participations: BTreeMap<Pid, ParticipationDelta> = self
            .participations
            .iter_mut()
            .filter_map(|(&pid, participation)| Some((pid, participation.collect_delta()?)))
            .collect();

        let delta = SkyDelta {
            settings,
            participations,
        };
        (!delta.is_empty()).then_some(delta)
    }
}

#[cfg(test)]
mod tests {
    use glam::Vec2;

    use super::*;
    use crate::engine::sky::{BuiltinMaps, PlaneControls, PlaneDelta};

    fn sky_with(pids: &[Pid]) -> Sky {
        let mut sky = Sky::new(&SkyInit::new("ocean"), &BuiltinMaps);
        for &pid in pids {
            sky.join(pid);
        }
        sky
    }

    #[test]
    fn spawn_uses_team_spawn_points() {
        let mut sky = sky_with(&[0, 1]);
        assert!(sky.spawn(0, 2, PlaneTuning::default()));
        assert!(!sky.spawn(0, 2, PlaneTuning::default()));
        assert!(!sky.spawn(7, 1, PlaneTuning::default()));

        let plane = sky.participation(0).unwrap().plane().unwrap();
        assert_eq!(plane.state.physical.pos, Vec2::new(2900.0, 450.0));
    }

    #[test]
    fn unknown_map_is_empty() {
        let sky = Sky::new(&SkyInit::new("atlantis"), &BuiltinMaps);
        assert_eq!(sky.map().name, "atlantis");
        assert!(sky.map().obstacles.is_empty());
    }

    #[test]
    fn respect_authority_drops_only_own_controls() {
        let mut sky = sky_with(&[0, 1]);
        sky.do_action(0, Action::Thrust, true);
        sky.do_action(1, Action::Left, true);
        let delta = sky.collect_delta().unwrap();

        let for_zero = delta.respect_authority(0);
        assert!(!for_zero.participations.contains_key(&0));
        assert_eq!(
            for_zero.participations[&1].controls,
            Some(PlaneControls::LEFT)
        );
    }

    #[test]
    fn mirror_converges_while_flying() {
        let mut source = sky_with(&[0, 1]);
        let mut mirror = Sky::new(&source.capture_initializer(), &BuiltinMaps);

        source.spawn(0, 1, PlaneTuning::default());
        source.do_action(0, Action::Thrust, true);
        source.set_settings(SkySettings {
            gravity: 200.0,
            view_scale: 1.5,
        });
        for step in 0..30 {
            if step == 5 {
                source.spawn(1, 2, PlaneTuning::default());
                source.do_action(1, Action::Primary, true);
            }
            if step == 20 {
                source.kill(0);
            }
            source.tick(1.0 / 30.0, true);
            if let Some(delta) = source.collect_delta() {
                mirror.apply_delta(&delta);
            }
        }
        assert_eq!(mirror.capture_initializer(), source.capture_initializer());
        assert_eq!(mirror.settings().gravity, 200.0);
    }

    #[test]
    fn crashing_kills_the_plane() {
        let mut sky = Sky::new(&SkyInit::new("canyon"), &BuiltinMaps);
        sky.join(3);
        sky.spawn(3, 1, PlaneTuning::default());
        sky.collect_delta();

        // the middle rock of the canyon
        let mut init = sky.capture_initializer();
        let plane = init.participations.get_mut(&3).unwrap().plane.as_mut().unwrap();
        plane.state.physical.pos = Vec2::new(1600.0, 450.0);
        let mut sky = Sky::new(&init, &BuiltinMaps);

        assert_eq!(sky.tick(0.01, true), vec![3]);
        let delta = sky.collect_delta().unwrap();
        assert_eq!(delta.participations[&3].plane, Some(PlaneDelta::Kill));
    }
}
