use std::collections::BTreeMap;

use glam::Vec2;
use serde::{Deserialize, Serialize};

use crate::engine::networked::{AutoNetworked, Networked, VerifyStructure};
use crate::engine::types::Action;
use crate::telegraph::{ClassPack, Pack, byte_pack, map_pack, optional_pack};

use super::map::Map;
use super::plane::{PhysicalState, Plane, PlaneControls, PlaneDelta, PlaneInit, PlaneState, PlaneTuning};
use super::prop::{Prop, PropDelta, PropId, PropInit};

/// Where a shot leaves the plane, along its heading.
const MUZZLE_OFFSET: f32 = 100.0;
const MUZZLE_VELOCITY: f32 = 300.0;

fn prop_id_pack() -> Pack<PropId> {
    byte_pack::<u16>()
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParticipationInit {
    pub controls: PlaneControls,
    pub plane: Option<PlaneInit>,
    pub props: BTreeMap<PropId, PropInit>,
}

impl ParticipationInit {
    pub fn pack() -> Pack<Self> {
        ClassPack::<Self>::new()
            .member(PlaneControls::pack(), |p| &p.controls, |p| &mut p.controls)
            .member(optional_pack(PlaneInit::pack()), |p| &p.plane, |p| &mut p.plane)
            .member(
                map_pack(prop_id_pack(), PropInit::pack()),
                |p| &p.props,
                |p| &mut p.props,
            )
            .build()
    }
}

impl VerifyStructure for ParticipationInit {
    fn verify_structure(&self) -> bool {
        self.plane.verify_structure() && self.props.verify_structure()
    }
}

/// Changes to one participation. `props`, when present, is the complete set
/// of live props.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParticipationDelta {
    pub plane: Option<PlaneDelta>,
    pub controls: Option<PlaneControls>,
    pub props: Option<BTreeMap<PropId, PropDelta>>,
}

impl ParticipationDelta {
    pub fn pack() -> Pack<Self> {
        ClassPack::<Self>::new()
            .member(optional_pack(PlaneDelta::pack()), |d| &d.plane, |d| &mut d.plane)
            .member(optional_pack(PlaneControls::pack()), |d| &d.controls, |d| &mut d.controls)
            .member(
                optional_pack(map_pack(prop_id_pack(), PropInit::pack())),
                |d| &d.props,
                |d| &mut d.props,
            )
            .build()
    }

    pub fn is_empty(&self) -> bool {
        self.plane.is_none() && self.controls.is_none() && self.props.is_none()
    }

    /// The same delta without the fields the receiving client is
    /// authoritative over.
    pub fn respect_authority(&self) -> Self {
        Self {
            controls: None,
            ..self.clone()
        }
    }
}

impl VerifyStructure for ParticipationDelta {
    fn verify_structure(&self) -> bool {
        self.plane.verify_structure() && self.props.verify_structure()
    }
}

/// One player's presence in a sky: their controls, their plane if it is
/// alive, and the props it has fired.
#[derive(Debug, Clone, PartialEq)]
pub struct Participation {
    controls: PlaneControls,
    plane: Option<Plane>,
    props: BTreeMap<PropId, Prop>,
    next_prop_id: PropId,

    newly_alive: bool,
    newly_dead: bool,
    controls_dirty: bool,
    props_dirty: bool,
}

impl Participation {
    pub fn new(init: &ParticipationInit) -> Self {
        let props: BTreeMap<PropId, Prop> =
            init.props.iter().map(|(&id, prop)| (id, Prop::new(prop))).collect();
        let next_prop_id = next_id_after(&props);
        Self {
            controls: init.controls,
            plane: init.plane.as_ref().map(Plane::new),
            props,
            next_prop_id,
            newly_alive: false,
            newly_dead: false,
            controls_dirty: false,
            props_dirty: false,
        }
    }

    pub fn controls(&self) -> PlaneControls {
        self.controls
    }

    pub fn plane(&self) -> Option<&Plane> {
        self.plane.as_ref()
    }

    pub fn props(&self) -> impl Iterator<Item = (PropId, &Prop)> {
        self.props.iter().map(|(&id, prop)| (id, prop))
    }

    pub fn is_spawned(&self) -> bool {
        self.plane.is_some()
    }

    pub fn do_action(&mut self, action: Action, state: bool) {
        self.set_controls({
            let mut controls = self.controls;
            controls.do_action(action, state);
            controls
        });
    }

    pub fn set_controls(&mut self, controls: PlaneControls) {
        if controls != self.controls {
            self.controls = controls;
            self.controls_dirty = true;
        }
    }

    pub fn spawn(&mut self, tuning: PlaneTuning, pos: Vec2, rot: f32) {
        self.plane = Some(Plane::new(&PlaneInit {
            tuning,
            state: PlaneState::new(&tuning, pos, rot),
        }));
        self.newly_alive = true;
        self.newly_dead = false;
    }

    /// Returns false if there was no plane to kill.
    pub fn kill(&mut self) -> bool {
        if self.plane.take().is_none() {
            return false;
        }
        self.newly_alive = false;
        self.newly_dead = true;
        true
    }

    /// Advances the plane and props. Returns true if the plane flew into an
    /// obstacle; only an `authority` tick detects crashes or fires shots.
    pub(super) fn tick(&mut self, map: &Map, gravity: f32, delta: f32, authority: bool) -> bool {
        let mut crashed = false;
        let mut shot = None;

        if let Some(plane) = &mut self.plane {
            let fired = plane.tick(self.controls, gravity, delta, authority);
            let physical = &mut plane.state.physical;
            let bounded = physical.pos.clamp(Vec2::ZERO, map.dimensions);
            if bounded.x != physical.pos.x {
                physical.vel.x = 0.0;
            }
            if bounded.y != physical.pos.y {
                physical.vel.y = 0.0;
            }
            physical.pos = bounded;

            crashed = authority && map.obstacle_at(physical.pos).is_some();
            if fired {
                let heading = plane.heading();
                let physical = plane.state.physical;
                shot = Some(PropInit {
                    physical: PhysicalState {
                        rot: physical.rot,
                        ..PhysicalState::new(
                            physical.pos + heading * MUZZLE_OFFSET,
                            physical.vel + heading * MUZZLE_VELOCITY,
                        )
                    },
                    lifetime: 0.0,
                });
            }
        }

        if let Some(shot) = shot {
            let id = self.next_prop_id;
            self.next_prop_id = id.wrapping_add(1);
            self.props.insert(id, Prop::new(&shot));
            self.props_dirty = true;
        }

        let live = self.props.len();
        for prop in self.props.values_mut() {
            prop.tick(delta);
        }
        self.props.retain(|_, prop| !prop.is_spent(map));
        if self.props.len() != live {
            self.props_dirty = true;
        }

        crashed
    }
}

fn next_id_after(props: &BTreeMap<PropId, Prop>) -> PropId {
    props
        .keys()
        .next_back()
        .map_or(0, |last| last.wrapping_add(1))
}

impl Networked for Participation {
    type Init = ParticipationInit;
    type Delta = ParticipationDelta;

    fn apply_delta(&mut self, delta: &ParticipationDelta) {
        match &delta.plane {
            Some(PlaneDelta::Spawn(init)) => self.plane = Some(Plane::new(init)),
            Some(PlaneDelta::State(state)) => {
                if let Some(plane) = &mut self.plane {
                    plane.state = *state;
                }
            }
            Some(PlaneDelta::Kill) => self.plane = None,
            None => {}
        }
        if let Some(controls) = delta.controls {
            self.controls = controls;
        }
        if let Some(props) = &delta.props {
            self.props.retain(|id, _| props.contains_key(id));
            for (&id, prop_delta) in props {
                self.props
                    .entry(id)
                    .and_modify(|prop| prop.apply_delta(prop_delta))
                    .or_insert_with(|| Prop::new(prop_delta));
            }
            self.next_prop_id = next_id_after(&self.props);
        }
    }

    fn capture_initializer(&self) -> ParticipationInit {
        ParticipationInit {
            controls: self.controls,
            plane: self.plane.as_ref().map(Plane::capture),
            props: self
                .props
                .iter()
                .map(|(&id, prop)| (id, prop.capture_initializer()))
                .collect(),
        }
    }
}

impl AutoNetworked for Participation {
    fn collect_delta(&mut self) -> Option<ParticipationDelta> {
        let plane = match &self.plane {
            Some(plane) if self.newly_alive => Some(PlaneDelta::Spawn(plane.capture())),
            Some(plane) => Some(PlaneDelta::State(plane.state)),
            None if self.newly_dead => Some(PlaneDelta::Kill),
            None => None,
        };
        let controls = self.controls_dirty.then_some(self.controls);
        let props = (self.props_dirty || !self.props.is_empty()).then(|| {
            self.props
                .iter()
                .map(|(&id, prop)| (id, prop.capture_initializer()))
                .collect()
        });

        self.newly_alive = false;
        self.newly_dead = false;
        self.controls_dirty = false;
        self.props_dirty = false;

        let delta = ParticipationDelta {
            plane,
            controls,
            props,
        };
        (!delta.is_empty()).then_some(delta)
    }
}
