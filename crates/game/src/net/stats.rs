use std::collections::hash_map::RandomState;
use std::hash::{BuildHasher, Hasher};

/// Drops a share of outbound datagrams, for exercising the reliable channels
/// under loss.
#[derive(Debug, Clone, Default)]
pub struct PacketLossSimulation {
    pub enabled: bool,
    pub loss_percent: f32,
}

impl PacketLossSimulation {
    pub fn new(loss_percent: f32) -> Self {
        Self {
            enabled: true,
            loss_percent,
        }
    }

    pub fn should_drop(&self) -> bool {
        if !self.enabled || self.loss_percent <= 0.0 {
            return false;
        }
        rand_percent() * 100.0 < self.loss_percent
    }
}

#[derive(Debug, Clone, Default)]
pub struct NetworkStats {
    pub packets_sent: u64,
    pub packets_received: u64,
    pub packets_dropped: u64,
    pub packets_resent: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub malformed_frames: u64,
}

fn rand_percent() -> f32 {
    (rand_u64() % 10_000) as f32 / 10_000.0
}

fn rand_u64() -> u64 {
    let mut hasher = RandomState::new().build_hasher();
    hasher.write_u128(
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or_default(),
    );
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_simulation_never_drops() {
        let sim = PacketLossSimulation::default();
        assert!((0..100).all(|_| !sim.should_drop()));
    }

    #[test]
    fn full_loss_always_drops() {
        let sim = PacketLossSimulation::new(100.0);
        assert!((0..100).all(|_| sim.should_drop()));
    }
}
