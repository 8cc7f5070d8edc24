use std::sync::Arc;
use std::time::Duration;

use crate::engine::ArenaInit;
use crate::engine::sky::{BuiltinMaps, MapProvider};
use crate::net::HostConfig;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub tick_rate: u32,
    /// Name, motd and first map of the arena; players are ignored.
    pub arena: ArenaInit,
    /// Remote console is closed to everyone when unset.
    pub rcon_password: Option<String>,
    pub host: HostConfig,
    pub maps: Arc<dyn MapProvider>,
    /// Seconds between sky delta broadcasts.
    pub sky_delta_interval: f32,
    pub score_delta_interval: f32,
    pub ping_interval: f32,
    pub latency_update_interval: f32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            tick_rate: 60,
            arena: ArenaInit::default(),
            rcon_password: None,
            host: HostConfig::default(),
            maps: Arc::new(BuiltinMaps),
            sky_delta_interval: 0.03,
            score_delta_interval: 0.5,
            ping_interval: 1.0,
            latency_update_interval: 2.0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub nickname: String,
    pub bind: String,
    pub host: HostConfig,
    pub maps: Arc<dyn MapProvider>,
    /// How long a graceful disconnect may wait for the server's answer.
    pub disconnect_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            nickname: String::new(),
            bind: "0.0.0.0:0".into(),
            host: HostConfig::default(),
            maps: Arc::new(BuiltinMaps),
            disconnect_timeout: Duration::from_secs(1),
        }
    }
}
