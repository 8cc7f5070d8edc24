use serde::{Deserialize, Serialize};

use crate::engine::networked::{Networked, VerifyStructure};
use crate::telegraph::{ClassPack, Pack, byte_pack};

use super::map::Map;
use super::plane::PhysicalState;

pub type PropId = u16;

/// Seconds a prop lives before it expires.
pub const PROP_LIFETIME: f32 = 1.0;

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PropInit {
    pub physical: PhysicalState,
    /// Seconds since the prop was spawned.
    pub lifetime: f32,
}

/// Props are small enough to always be sent whole.
pub type PropDelta = PropInit;

impl PropInit {
    pub fn pack() -> Pack<Self> {
        ClassPack::<Self>::new()
            .member(PhysicalState::pack(), |p| &p.physical, |p| &mut p.physical)
            .member(byte_pack(), |p| &p.lifetime, |p| &mut p.lifetime)
            .build()
    }
}

impl VerifyStructure for PropInit {
    fn verify_structure(&self) -> bool {
        self.physical.is_finite() && self.lifetime.is_finite() && self.lifetime >= 0.0
    }
}

/// A short-lived projectile owned by one participation.
#[derive(Debug, Clone, PartialEq)]
pub struct Prop {
    physical: PhysicalState,
    lifetime: f32,
}

impl Prop {
    pub fn new(init: &PropInit) -> Self {
        Self {
            physical: init.physical,
            lifetime: init.lifetime,
        }
    }

    pub fn physical(&self) -> &PhysicalState {
        &self.physical
    }

    pub fn lifetime(&self) -> f32 {
        self.lifetime
    }

    pub fn tick(&mut self, delta: f32) {
        self.physical.integrate(delta);
        self.lifetime += delta;
    }

    /// Expired, out of the map, or inside an obstacle.
    pub fn is_spent(&self, map: &Map) -> bool {
        self.lifetime > PROP_LIFETIME
            || !map.contains(self.physical.pos)
            || map.obstacle_at(self.physical.pos).is_some()
    }
}

impl Networked for Prop {
    type Init = PropInit;
    type Delta = PropDelta;

    fn apply_delta(&mut self, delta: &PropDelta) {
        self.physical = delta.physical;
        self.lifetime = delta.lifetime;
    }

    fn capture_initializer(&self) -> PropInit {
        PropInit {
            physical: self.physical,
            lifetime: self.lifetime,
        }
    }
}
