use std::collections::{BTreeMap, VecDeque};

use super::arena::{ArenaDelta, ArenaState};
use super::player::{LatencyStats, Player, PlayerDelta};
use super::subsystem::{Subsystem, SubsystemId, SubsystemListener};
use super::types::{Pid, Time};

const SAMPLE_COUNT: usize = 5;

/// Mean of the last few samples pushed.
#[derive(Debug, Clone, Default)]
struct RollingSampler {
    samples: VecDeque<f64>,
}

impl RollingSampler {
    fn push(&mut self, sample: f64) {
        if self.samples.len() == SAMPLE_COUNT {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
    }

    fn mean(&self) -> Option<f64> {
        if self.samples.is_empty() {
            return None;
        }
        Some(self.samples.iter().sum::<f64>() / self.samples.len() as f64)
    }
}

#[derive(Debug, Clone, Default)]
pub struct PlayerLatency {
    latency: RollingSampler,
    offset: RollingSampler,
}

impl PlayerLatency {
    /// `now` and `ping_time` are server uptimes, `pong_time` the client's
    /// uptime when it answered.
    pub fn register_pong(&mut self, now: Time, ping_time: Time, pong_time: Time) {
        self.latency.push(now - ping_time);
        let latency = self.latency.mean().unwrap_or_default();
        self.offset.push(pong_time - (ping_time + latency / 2.0));
    }

    pub fn stats(&self) -> Option<LatencyStats> {
        let latency = self.latency.mean()?;
        let offset = self.offset.mean()?;
        Some(LatencyStats {
            latency: (latency * 1000.0).round().clamp(0.0, f64::from(u32::MAX)) as u32,
            clock_offset: (offset * 1000.0)
                .round()
                .clamp(f64::from(i32::MIN), f64::from(i32::MAX)) as i32,
        })
    }
}

/// Server-side subsystem measuring round trips from ping/pong exchanges.
#[derive(Debug)]
pub struct LatencyTracker {
    latencies: Subsystem<PlayerLatency>,
}

impl LatencyTracker {
    pub fn new(id: SubsystemId) -> Self {
        Self {
            latencies: Subsystem::new(id),
        }
    }

    pub fn register_pong(&mut self, pid: Pid, now: Time, ping_time: Time, pong_time: Time) {
        if let Some(latency) = self.latencies.by_pid_mut(pid) {
            latency.register_pong(now, ping_time, pong_time);
        }
    }

    pub fn stats(&self, pid: Pid) -> Option<LatencyStats> {
        self.latencies.by_pid(pid)?.stats()
    }

    /// Player deltas for every player whose measured stats differ from what
    /// the arena currently holds.
    pub fn make_delta(&self, arena: &ArenaState) -> Option<ArenaDelta> {
        let deltas: BTreeMap<Pid, PlayerDelta> = arena
            .players()
            .filter_map(|player| {
                let stats = self.latencies.get(player)?.stats()?;
                (stats != player.latency).then(|| {
                    (
                        player.pid(),
                        PlayerDelta {
                            latency: Some(stats),
                            ..Default::default()
                        },
                    )
                })
            })
            .collect();
        (!deltas.is_empty()).then_some(ArenaDelta::PlayerDeltas(deltas))
    }
}

impl SubsystemListener for LatencyTracker {
    fn register_player(&mut self, player: &mut Player) {
        self.latencies.attach(player, PlayerLatency::default());
    }

    fn unregister_player(&mut self, player: &mut Player) {
        self.latencies.detach(player);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::arena::{Arena, ArenaInit};
    use crate::engine::networked::Networked;

    #[test]
    fn samples_roll_over() {
        let mut sampler = RollingSampler::default();
        assert_eq!(sampler.mean(), None);
        for sample in [10.0, 10.0, 10.0, 10.0, 10.0, 20.0] {
            sampler.push(sample);
        }
        assert_eq!(sampler.mean(), Some(12.0));
    }

    #[test]
    fn pongs_become_latency_deltas() {
        let mut arena = Arena::new(&ArenaInit::default());
        arena.connect_player("kestrel").unwrap();
        let handle = arena.attach(LatencyTracker::new).unwrap();
        assert_eq!(arena.subsystem(handle).unwrap().make_delta(arena.state()), None);

        // 100ms round trip, client clock 2s ahead
        arena
            .subsystem_mut(handle)
            .unwrap()
            .register_pong(0, 10.1, 10.0, 12.05);
        let delta = arena.subsystem(handle).unwrap().make_delta(arena.state()).unwrap();
        let ArenaDelta::PlayerDeltas(deltas) = &delta else {
            panic!("expected player deltas");
        };
        assert_eq!(
            deltas[&0].latency,
            Some(LatencyStats {
                latency: 100,
                clock_offset: 2000,
            })
        );

        arena.apply_delta(&delta);
        assert_eq!(arena.subsystem(handle).unwrap().make_delta(arena.state()), None);
    }
}
