use std::fmt;

use glam::Vec2;
use serde::{Deserialize, Serialize};

use crate::engine::types::Team;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Obstacle {
    pub position: Vec2,
    pub radius: f32,
}

impl Obstacle {
    pub fn new(position: Vec2, radius: f32) -> Self {
        Self { position, radius }
    }

    pub fn contains(&self, point: Vec2) -> bool {
        self.position.distance_squared(point) <= self.radius * self.radius
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SpawnPoint {
    pub position: Vec2,
    /// Degrees, 0 pointing along +x.
    pub angle: f32,
    pub team: Team,
}

/// Static geometry a sky plays out in. Never replicated: both ends load it
/// by name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Map {
    pub name: String,
    pub dimensions: Vec2,
    pub obstacles: Vec<Obstacle>,
    pub spawn_points: Vec<SpawnPoint>,
}

impl Map {
    pub const DEFAULT_DIMENSIONS: Vec2 = Vec2::new(3200.0, 900.0);

    /// An empty rectangle, used when a map name is unknown.
    pub fn empty(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            dimensions: Self::DEFAULT_DIMENSIONS,
            obstacles: Vec::new(),
            spawn_points: Vec::new(),
        }
    }

    pub fn contains(&self, point: Vec2) -> bool {
        point.cmpge(Vec2::ZERO).all() && point.cmple(self.dimensions).all()
    }

    pub fn obstacle_at(&self, point: Vec2) -> Option<&Obstacle> {
        self.obstacles.iter().find(|o| o.contains(point))
    }

    /// Picks the `n`th spawn point for `team`, cycling through them. Maps
    /// without spawn points for that team fall back to any spawn point, then
    /// to the middle of the map.
    pub fn spawn_point(&self, team: Team, n: usize) -> SpawnPoint {
        let for_team: Vec<&SpawnPoint> =
            self.spawn_points.iter().filter(|s| s.team == team).collect();
        let candidates: Vec<&SpawnPoint> = if for_team.is_empty() {
            self.spawn_points.iter().collect()
        } else {
            for_team
        };
        match candidates.get(n % candidates.len().max(1)) {
            Some(point) => **point,
            None => SpawnPoint {
                position: self.dimensions / 2.0,
                angle: 0.0,
                team,
            },
        }
    }
}

/// Source of map geometry, looked up by name.
pub trait MapProvider: fmt::Debug + Send + Sync {
    fn load(&self, name: &str) -> Option<Map>;
    fn names(&self) -> Vec<String>;
}

/// The maps that ship with the game.
#[derive(Debug, Clone, Copy, Default)]
pub struct BuiltinMaps;

impl BuiltinMaps {
    fn ocean() -> Map {
        Map {
            name: "ocean".into(),
            dimensions: Map::DEFAULT_DIMENSIONS,
            obstacles: Vec::new(),
            spawn_points: vec![
                SpawnPoint {
                    position: Vec2::new(300.0, 450.0),
                    angle: 0.0,
                    team: 1,
                },
                SpawnPoint {
                    position: Vec2::new(2900.0, 450.0),
                    angle: 180.0,
                    team: 2,
                },
            ],
        }
    }

    fn canyon() -> Map {
        let mut obstacles = Vec::new();
        for i in 0..6 {
            let x = 500.0 + 440.0 * i as f32;
            let y = if i % 2 == 0 { 80.0 } else { 820.0 };
            obstacles.push(Obstacle::new(Vec2::new(x, y), 160.0));
        }
        obstacles.push(Obstacle::new(Vec2::new(1600.0, 450.0), 90.0));

        Map {
            name: "canyon".into(),
            dimensions: Map::DEFAULT_DIMENSIONS,
            obstacles,
            spawn_points: vec![
                SpawnPoint {
                    position: Vec2::new(200.0, 300.0),
                    angle: 0.0,
                    team: 1,
                },
                SpawnPoint {
                    position: Vec2::new(200.0, 600.0),
                    angle: 0.0,
                    team: 1,
                },
                SpawnPoint {
                    position: Vec2::new(3000.0, 300.0),
                    angle: 180.0,
                    team: 2,
                },
                SpawnPoint {
                    position: Vec2::new(3000.0, 600.0),
                    angle: 180.0,
                    team: 2,
                },
            ],
        }
    }
}

impl MapProvider for BuiltinMaps {
    fn load(&self, name: &str) -> Option<Map> {
        match name {
            "ocean" => Some(Self::ocean()),
            "canyon" => Some(Self::canyon()),
            _ => None,
        }
    }

    fn names(&self) -> Vec<String> {
        vec!["ocean".into(), "canyon".into()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_maps_load_by_name() {
        for name in BuiltinMaps.names() {
            let map = BuiltinMaps.load(&name).unwrap();
            assert_eq!(map.name, name);
            for spawn in &map.spawn_points {
                assert!(map.contains(spawn.position));
                assert!(map.obstacle_at(spawn.position).is_none());
            }
        }
        assert!(BuiltinMaps.load("atlantis").is_none());
    }

    #[test]
    fn spawn_points_cycle_and_fall_back() {
        let canyon = BuiltinMaps.load("canyon").unwrap();
        let first = canyon.spawn_point(2, 0);
        assert_eq!(first.team, 2);
        assert_eq!(canyon.spawn_point(2, 2), first);

        let ocean = BuiltinMaps.load("ocean").unwrap();
        assert_eq!(ocean.spawn_point(0, 0).team, 1);

        let empty = Map::empty("void");
        assert_eq!(empty.spawn_point(0, 3).position, Map::DEFAULT_DIMENSIONS / 2.0);
    }
}
