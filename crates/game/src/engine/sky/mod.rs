mod handle;
mod map;
mod participation;
mod plane;
mod prop;
#[allow(clippy::module_inception)]
mod sky;

pub use handle::{SkyHandle, SkyHandleDelta, SkyHandleInit};
pub use map::{BuiltinMaps, Map, MapProvider, Obstacle, SpawnPoint};
pub use participation::{Participation, ParticipationDelta, ParticipationInit};
pub use plane::{
    EnergyTuning, FlightTuning, PRIMARY_COOLDOWN, PhysicalState, Plane, PlaneControls, PlaneDelta,
    PlaneInit, PlaneState, PlaneTuning, StallTuning,
};
pub use prop::{PROP_LIFETIME, Prop, PropDelta, PropId, PropInit};
pub use sky::{Sky, SkyDelta, SkyInit, SkySettings};
