use bitflags::bitflags;
use glam::Vec2;
use serde::{Deserialize, Serialize};

use crate::engine::networked::VerifyStructure;
use crate::engine::types::Action;
use crate::telegraph::{ClassPack, Pack, PackError, bool_pack, byte_pack, vec2_pack};

/// Seconds between two primary shots.
pub const PRIMARY_COOLDOWN: f32 = 0.25;

bitflags! {
    /// Held/released state of every action, one bit each.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct PlaneControls: u8 {
        const THRUST = 1 << 0;
        const REVERSE = 1 << 1;
        const LEFT = 1 << 2;
        const RIGHT = 1 << 3;
        const PRIMARY = 1 << 4;
        const SECONDARY = 1 << 5;
        const SPECIAL = 1 << 6;
        const SUICIDE = 1 << 7;
    }
}

impl PlaneControls {
    pub fn from_action(action: Action) -> Self {
        match action {
            Action::Thrust => Self::THRUST,
            Action::Reverse => Self::REVERSE,
            Action::Left => Self::LEFT,
            Action::Right => Self::RIGHT,
            Action::Primary => Self::PRIMARY,
            Action::Secondary => Self::SECONDARY,
            Action::Special => Self::SPECIAL,
            Action::Suicide => Self::SUICIDE,
        }
    }

    pub fn do_action(&mut self, action: Action, state: bool) {
        self.set(Self::from_action(action), state);
    }

    pub fn is_held(&self, action: Action) -> bool {
        self.contains(Self::from_action(action))
    }

    /// -1 turning left, 1 turning right, 0 when both or neither are held.
    pub fn rot_movement(&self) -> f32 {
        movement(self.contains(Self::LEFT), self.contains(Self::RIGHT))
    }

    pub fn throttle_movement(&self) -> f32 {
        movement(self.contains(Self::REVERSE), self.contains(Self::THRUST))
    }

    pub fn pack() -> Pack<Self> {
        byte_pack::<u8>().map(Self::from_bits_retain, |controls: &Self| controls.bits())
    }
}

fn movement(down: bool, up: bool) -> f32 {
    match (down, up) {
        (true, false) => -1.0,
        (false, true) => 1.0,
        _ => 0.0,
    }
}

/// Moves `value` towards `target` by at most `amount`.
fn approach(value: f32, target: f32, amount: f32) -> f32 {
    if value < target {
        (value + amount).min(target)
    } else {
        (value - amount).max(target)
    }
}

fn heading(rot: f32) -> Vec2 {
    Vec2::from_angle(rot.to_radians())
}

/// Kinematic state shared by planes and props. Rotation is in degrees.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PhysicalState {
    pub pos: Vec2,
    pub vel: Vec2,
    pub rot: f32,
    pub rotvel: f32,
}

impl PhysicalState {
    pub fn new(pos: Vec2, vel: Vec2) -> Self {
        Self {
            pos,
            vel,
            ..Default::default()
        }
    }

    pub fn integrate(&mut self, delta: f32) {
        self.pos += self.vel * delta;
        self.rot = (self.rot + self.rotvel * delta).rem_euclid(360.0);
    }

    pub fn is_finite(&self) -> bool {
        self.pos.is_finite() && self.vel.is_finite() && self.rot.is_finite() && self.rotvel.is_finite()
    }

    pub fn pack() -> Pack<Self> {
        ClassPack::<Self>::new()
            .member(vec2_pack(), |p| &p.pos, |p| &mut p.pos)
            .member(vec2_pack(), |p| &p.vel, |p| &mut p.vel)
            .member(byte_pack(), |p| &p.rot, |p| &mut p.rot)
            .member(byte_pack(), |p| &p.rotvel, |p| &mut p.rotvel)
            .build()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EnergyTuning {
    pub thrust_drain: f32,
    pub recharge: f32,
    pub laser_gun: f32,
}

impl Default for EnergyTuning {
    fn default() -> Self {
        Self {
            thrust_drain: 1.0,
            recharge: 0.5,
            laser_gun: 0.3,
        }
    }
}

/// Mechanics while stalled.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StallTuning {
    /// Degrees per second.
    pub max_rot_vel: f32,
    /// Terminal velocity.
    pub max_vel: f32,
    pub thrust: f32,
    pub damping: f32,
    /// Forward speed needed to leave the stall.
    pub threshold: f32,
}

impl Default for StallTuning {
    fn default() -> Self {
        Self {
            max_rot_vel: 200.0,
            max_vel: 300.0,
            thrust: 500.0,
            damping: 0.8,
            threshold: 130.0,
        }
    }
}

/// Mechanics while flying.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FlightTuning {
    pub max_rot_vel: f32,
    pub airspeed_factor: f32,
    pub throttle_influence: f32,
    pub throttle_effect: f32,
    pub gravity_effect: f32,
    pub afterburn_drive: f32,
    pub leftover_damping: f32,
    /// Forward speed below which the plane stalls.
    pub threshold: f32,
}

impl Default for FlightTuning {
    fn default() -> Self {
        Self {
            max_rot_vel: 180.0,
            airspeed_factor: 330.0,
            throttle_influence: 0.6,
            throttle_effect: 0.3,
            gravity_effect: 0.6,
            afterburn_drive: 0.9,
            leftover_damping: 0.3,
            threshold: 110.0,
        }
    }
}

/// Static parameters of a plane, fixed from spawn to death.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PlaneTuning {
    /// Length along the heading, then width.
    pub hitbox: Vec2,
    pub max_health: f32,
    pub throttle_speed: f32,
    pub energy: EnergyTuning,
    pub stall: StallTuning,
    pub flight: FlightTuning,
}

impl Default for PlaneTuning {
    fn default() -> Self {
        Self {
            hitbox: Vec2::new(110.0, 60.0),
            max_health: 10.0,
            throttle_speed: 1.5,
            energy: EnergyTuning::default(),
            stall: StallTuning::default(),
            flight: FlightTuning::default(),
        }
    }
}

impl PlaneTuning {
    pub fn pack() -> Pack<Self> {
        let energy = ClassPack::<EnergyTuning>::new()
            .member(byte_pack(), |e| &e.thrust_drain, |e| &mut e.thrust_drain)
            .member(byte_pack(), |e| &e.recharge, |e| &mut e.recharge)
            .member(byte_pack(), |e| &e.laser_gun, |e| &mut e.laser_gun)
            .build();
        let stall = ClassPack::<StallTuning>::new()
            .member(byte_pack(), |s| &s.max_rot_vel, |s| &mut s.max_rot_vel)
            .member(byte_pack(), |s| &s.max_vel, |s| &mut s.max_vel)
            .member(byte_pack(), |s| &s.thrust, |s| &mut s.thrust)
            .member(byte_pack(), |s| &s.damping, |s| &mut s.damping)
            .member(byte_pack(), |s| &s.threshold, |s| &mut s.threshold)
            .build();
        let flight = ClassPack::<FlightTuning>::new()
            .member(byte_pack(), |f| &f.max_rot_vel, |f| &mut f.max_rot_vel)
            .member(byte_pack(), |f| &f.airspeed_factor, |f| &mut f.airspeed_factor)
            .member(byte_pack(), |f| &f.throttle_influence, |f| &mut f.throttle_influence)
            .member(byte_pack(), |f| &f.throttle_effect, |f| &mut f.throttle_effect)
            .member(byte_pack(), |f| &f.gravity_effect, |f| &mut f.gravity_effect)
            .member(byte_pack(), |f| &f.afterburn_drive, |f| &mut f.afterburn_drive)
            .member(byte_pack(), |f| &f.leftover_damping, |f| &mut f.leftover_damping)
            .member(byte_pack(), |f| &f.threshold, |f| &mut f.threshold)
            .build();

        ClassPack::<Self>::new()
            .member(vec2_pack(), |t| &t.hitbox, |t| &mut t.hitbox)
            .member(byte_pack(), |t| &t.max_health, |t| &mut t.max_health)
            .member(byte_pack(), |t| &t.throttle_speed, |t| &mut t.throttle_speed)
            .member(energy, |t| &t.energy, |t| &mut t.energy)
            .member(stall, |t| &t.stall, |t| &mut t.stall)
            .member(flight, |t| &t.flight, |t| &mut t.flight)
            .build()
    }
}

/// Everything about a living plane that changes while it flies. The
/// `afterburner`, `airspeed`, `throttle`, `energy` and `health` fields are
/// fractions in `0..=1`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PlaneState {
    pub physical: PhysicalState,
    pub stalled: bool,
    pub afterburner: f32,
    pub leftover_vel: Vec2,
    pub airspeed: f32,
    pub throttle: f32,
    pub energy: f32,
    pub health: f32,
    pub primary_cooldown: f32,
}

impl PlaneState {
    pub fn new(tuning: &PlaneTuning, pos: Vec2, rot: f32) -> Self {
        let airspeed = tuning.flight.throttle_influence;
        Self {
            physical: PhysicalState {
                pos,
                vel: heading(rot) * airspeed * tuning.flight.airspeed_factor,
                rot,
                rotvel: 0.0,
            },
            stalled: false,
            afterburner: 0.0,
            leftover_vel: Vec2::ZERO,
            airspeed,
            throttle: 1.0,
            energy: 1.0,
            health: 1.0,
            primary_cooldown: 0.0,
        }
    }

    pub fn forward_velocity(&self) -> f32 {
        self.physical.vel.dot(heading(self.physical.rot))
    }

    pub fn velocity(&self) -> f32 {
        self.physical.vel.length()
    }

    /// Draws `amount` if there is that much energy left.
    pub fn request_discrete_energy(&mut self, amount: f32) -> bool {
        if self.energy < amount {
            return false;
        }
        self.energy -= amount;
        true
    }

    /// Draws up to `amount` and returns the fraction that was available.
    pub fn request_energy(&mut self, amount: f32) -> f32 {
        if amount <= 0.0 {
            return 1.0;
        }
        let drawn = self.energy.min(amount);
        self.energy -= drawn;
        drawn / amount
    }

    pub fn pack() -> Pack<Self> {
        ClassPack::<Self>::new()
            .member(PhysicalState::pack(), |s| &s.physical, |s| &mut s.physical)
            .member(bool_pack(), |s| &s.stalled, |s| &mut s.stalled)
            .member(byte_pack(), |s| &s.afterburner, |s| &mut s.afterburner)
            .member(vec2_pack(), |s| &s.leftover_vel, |s| &mut s.leftover_vel)
            .member(byte_pack(), |s| &s.airspeed, |s| &mut s.airspeed)
            .member(byte_pack(), |s| &s.throttle, |s| &mut s.throttle)
            .member(byte_pack(), |s| &s.energy, |s| &mut s.energy)
            .member(byte_pack(), |s| &s.health, |s| &mut s.health)
            .member(byte_pack(), |s| &s.primary_cooldown, |s| &mut s.primary_cooldown)
            .build()
    }
}

impl VerifyStructure for PlaneState {
    fn verify_structure(&self) -> bool {
        let fractions = [self.afterburner, self.airspeed, self.throttle, self.energy, self.health];
        self.physical.is_finite()
            && self.leftover_vel.is_finite()
            && fractions.iter().all(|f| (0.0..=1.0).contains(f))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PlaneInit {
    pub tuning: PlaneTuning,
    pub state: PlaneState,
}

impl PlaneInit {
    pub fn pack() -> Pack<Self> {
        ClassPack::<Self>::new()
            .member(PlaneTuning::pack(), |p| &p.tuning, |p| &mut p.tuning)
            .member(PlaneState::pack(), |p| &p.state, |p| &mut p.state)
            .build()
    }
}

impl VerifyStructure for PlaneInit {
    fn verify_structure(&self) -> bool {
        self.state.verify_structure() && self.tuning.max_health > 0.0
    }
}

/// What happened to a participation's plane since the last delta.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum PlaneDelta {
    Spawn(PlaneInit),
    State(PlaneState),
    Kill,
}

impl PlaneDelta {
    pub fn pack() -> Pack<Self> {
        let init = PlaneInit::pack();
        let state = PlaneState::pack();
        let (init_rx, state_rx) = (init.clone(), state.clone());
        Pack::new(
            move |packet, delta: &PlaneDelta| match delta {
                PlaneDelta::Spawn(spawn) => {
                    packet.write_bits(0, 2);
                    init.pack(packet, spawn);
                }
                PlaneDelta::State(s) => {
                    packet.write_bits(1, 2);
                    state.pack(packet, s);
                }
                PlaneDelta::Kill => packet.write_bits(2, 2),
            },
            move |packet| match packet.read_bits(2)? {
                0 => Ok(PlaneDelta::Spawn(init_rx.unpack(packet)?)),
                1 => Ok(PlaneDelta::State(state_rx.unpack(packet)?)),
                2 => Ok(PlaneDelta::Kill),
                tag => Err(PackError::InvalidTag {
                    what: "PlaneDelta",
                    tag,
                }),
            },
        )
    }
}

impl VerifyStructure for PlaneDelta {
    fn verify_structure(&self) -> bool {
        match self {
            PlaneDelta::Spawn(init) => init.verify_structure(),
            PlaneDelta::State(state) => state.verify_structure(),
            PlaneDelta::Kill => true,
        }
    }
}

/// A living plane.
#[derive(Debug, Clone, PartialEq)]
pub struct Plane {
    pub tuning: PlaneTuning,
    pub state: PlaneState,
}

impl Plane {
    pub fn new(init: &PlaneInit) -> Self {
        Self {
            tuning: init.tuning,
            state: init.state,
        }
    }

    pub fn capture(&self) -> PlaneInit {
        PlaneInit {
            tuning: self.tuning,
            state: self.state,
        }
    }

    pub fn heading(&self) -> Vec2 {
        heading(self.state.physical.rot)
    }

    /// Advances the plane by `delta` seconds. Returns true if the primary
    /// weapon fired; `armed` false keeps it from firing at all.
    pub fn tick(&mut self, controls: PlaneControls, gravity: f32, delta: f32, armed: bool) -> bool {
        if self.state.stalled {
            self.state.physical.vel.y += gravity * delta;
        }
        self.state.physical.integrate(delta);
        self.tick_flight(controls, delta);
        armed && self.tick_weapons(controls, delta)
    }

    fn switch_stall(&mut self) {
        let forward = self.state.forward_velocity();
        let (stall, flight) = (&self.tuning.stall, &self.tuning.flight);
        let state = &mut self.state;

        if state.stalled {
            if forward > stall.threshold {
                state.stalled = false;
                state.leftover_vel = state.physical.vel - forward * heading(state.physical.rot);
                state.airspeed = (forward / flight.airspeed_factor).clamp(0.0, 1.0);
                state.throttle = (state.airspeed / flight.throttle_influence).clamp(0.0, 1.0);
            }
        } else if forward < flight.threshold {
            state.stalled = true;
            state.throttle = 1.0;
            state.airspeed = 0.0;
        }
    }

    fn tick_flight(&mut self, controls: PlaneControls, delta: f32) {
        self.switch_stall();

        let tuning = self.tuning;
        let velocity = self.state.velocity();
        let throttle_ctrl = controls.throttle_movement();
        let dir = self.heading();
        let state = &mut self.state;

        let max_rot_vel = if state.stalled {
            tuning.stall.max_rot_vel
        } else {
            tuning.flight.max_rot_vel
        };
        state.physical.rotvel = max_rot_vel * controls.rot_movement();
        state.energy = (state.energy + tuning.energy.recharge * delta).min(1.0);
        state.afterburner = 0.0;

        if state.stalled {
            if throttle_ctrl > 0.0 {
                let efficacy = state.request_energy(tuning.energy.thrust_drain * delta);
                state.physical.vel += dir * (delta * tuning.stall.thrust * efficacy);
                state.afterburner = efficacy;
            }
            if velocity > tuning.stall.max_vel {
                let damping = tuning.stall.max_vel / velocity;
                state.physical.vel *= damping * tuning.stall.damping.powf(delta);
            }
        } else {
            state.throttle =
                (state.throttle + throttle_ctrl * tuning.throttle_speed * delta).clamp(0.0, 1.0);
            let afterburning = throttle_ctrl > 0.0 && state.throttle >= 1.0;
            state.leftover_vel *= tuning.flight.leftover_damping.powf(delta);

            let mut speed_mod = state.physical.rot.to_radians().sin() * tuning.flight.gravity_effect * delta;
            if afterburning {
                let efficacy = state.request_energy(tuning.energy.thrust_drain * delta);
                state.afterburner = efficacy;
                speed_mod += tuning.flight.afterburn_drive * delta * efficacy;
            }
            state.airspeed = (state.airspeed + speed_mod).clamp(0.0, 1.0);
            state.airspeed = approach(
                state.airspeed,
                state.throttle * tuning.flight.throttle_influence,
                tuning.flight.throttle_effect * delta,
            );

            let target_speed = state.airspeed * tuning.flight.airspeed_factor;
            state.physical.vel = dir * target_speed + state.leftover_vel;
        }
    }

    fn tick_weapons(&mut self, controls: PlaneControls, delta: f32) -> bool {
        let state = &mut self.state;
        state.primary_cooldown = (state.primary_cooldown - delta).max(0.0);
        if state.primary_cooldown > 0.0 || !controls.contains(PlaneControls::PRIMARY) {
            return false;
        }
        if !state.request_discrete_energy(self.tuning.energy.laser_gun) {
            return false;
        }
        state.primary_cooldown = PRIMARY_COOLDOWN;
        true
    }
}
