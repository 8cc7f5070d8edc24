use std::collections::BTreeMap;
use std::io;
use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use crate::engine::sky::{SkyHandle, SkyHandleInit};
use crate::engine::{
    Arena, ArenaDelta, ArenaMode, AutoNetworked, Cooldown, LatencyTracker, LogLogger, Networked,
    Pid, PlayerDelta, Role, Scoreboard, ScoreboardInit, SubsystemHandle, Time, TimeDiff,
};
use crate::net::{Host, NetworkStats, PeerId, Strategy};
use crate::protocol::{ClientPacket, ServerPacket, server_telegraph};
use crate::telegraph::{Reception, Telegraph};

use super::SessionError;
use super::config::ServerConfig;

#[derive(Debug, Default)]
struct Connection {
    /// Set once the join handshake is done.
    pid: Option<Pid>,
}

#[derive(Debug, Clone)]
pub struct ServerStats {
    pub uptime: Time,
    pub players: usize,
    pub mode: ArenaMode,
    pub network: NetworkStats,
}

/// The authoritative side of a session: owns the arena, answers client
/// requests and streams deltas to every joined client.
pub struct Server {
    host: Host,
    telegraph: Telegraph<ServerPacket, ClientPacket>,
    config: ServerConfig,
    arena: Arena,
    sky: SubsystemHandle<SkyHandle>,
    scoreboard: SubsystemHandle<Scoreboard>,
    latency: SubsystemHandle<LatencyTracker>,
    connections: BTreeMap<PeerId, Connection>,
    tick_duration: Duration,
    last_tick_time: Instant,
    accumulator: Duration,
    running: Arc<AtomicBool>,
    sky_cooldown: Cooldown,
    score_cooldown: Cooldown,
    ping_cooldown: Cooldown,
    latency_cooldown: Cooldown,
}

impl Server {
    pub fn new<A: ToSocketAddrs>(bind_addr: A, config: ServerConfig) -> Result<Self, SessionError> {
        let host = Host::bind(bind_addr, config.host.clone())?;

        let mut init = config.arena.clone();
        init.players.clear();
        let mut arena = Arena::new(&init);
        arena.add_logger(LogLogger::new("arena"));

        let maps = Arc::clone(&config.maps);
        let sky = arena
            .attach(|id| SkyHandle::new(id, Role::Server, &SkyHandleInit::default(), maps))?;
        let scoreboard = arena
            .attach(|id| Scoreboard::new(id, Role::Server, &ScoreboardInit::default()))?;
        let latency = arena.attach(LatencyTracker::new)?;
        if init.mode == ArenaMode::Game {
            arena.with_subsystem(sky, |sky, ctx| sky.start(ctx));
        }

        let tick_duration = Duration::from_secs_f64(1.0 / f64::from(config.tick_rate.max(1)));
        Ok(Self {
            host,
            telegraph: server_telegraph(),
            arena,
            sky,
            scoreboard,
            latency,
            connections: BTreeMap::new(),
            tick_duration,
            last_tick_time: Instant::now(),
            accumulator: Duration::ZERO,
            running: Arc::new(AtomicBool::new(true)),
            sky_cooldown: Cooldown::new(config.sky_delta_interval),
            score_cooldown: Cooldown::new(config.score_delta_interval),
            ping_cooldown: Cooldown::new(config.ping_interval),
            latency_cooldown: Cooldown::new(config.latency_update_interval),
            config,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.host.local_addr()
    }

    pub fn running(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    pub fn arena(&self) -> &Arena {
        &self.arena
    }

    pub fn sky(&self) -> Option<&SkyHandle> {
        self.arena.subsystem(self.sky)
    }

    pub fn scoreboard(&self) -> Option<&Scoreboard> {
        self.arena.subsystem(self.scoreboard)
    }

    pub fn stats(&self) -> ServerStats {
        let state = self.arena.state();
        ServerStats {
            uptime: state.uptime(),
            players: state.player_count(),
            mode: state.mode(),
            network: self.host.stats().clone(),
        }
    }

    /// Runs until the flag from [`Server::running`] is cleared, handing the
    /// server to `between` after every `tick_once`.
    pub fn run(&mut self, mut between: impl FnMut(&mut Self)) -> io::Result<()> {
        log::info!("Server listening on {}", self.local_addr());
        while self.running.load(Ordering::SeqCst) {
            self.tick_once()?;
            between(self);
            std::thread::sleep(Duration::from_millis(1));
        }
        self.shutdown();
        Ok(())
    }

    /// Handles pending network traffic, then runs as many fixed ticks as
    /// the wall clock calls for.
    pub fn tick_once(&mut self) -> io::Result<()> {
        let now = Instant::now();
        let elapsed = now - self.last_tick_time;
        self.last_tick_time = now;
        self.accumulator += elapsed;

        self.poll()?;
        self.arena.poll(elapsed.as_secs_f32());

        let delta = self.tick_duration.as_secs_f32();
        while self.accumulator >= self.tick_duration {
            self.accumulator -= self.tick_duration;
            self.tick(delta);
        }
        Ok(())
    }

    pub fn poll(&mut self) -> io::Result<()> {
        for reception in self.telegraph.receive(&mut self.host)? {
            self.handle_reception(reception);
        }
        Ok(())
    }

    pub fn tick(&mut self, delta: TimeDiff) {
        self.arena.tick(delta);

        if self.sky_cooldown.tick(delta) {
            self.broadcast_sky_delta();
        }
        if self.score_cooldown.tick(delta) {
            self.broadcast_score_delta();
        }
        if self.ping_cooldown.tick(delta) {
            let ping_time = self.arena.state().uptime();
            self.broadcast(&ServerPacket::Ping { ping_time }, Strategy::Unreliable);
        }
        if self.latency_cooldown.tick(delta) {
            let delta = self
                .arena
                .subsystem(self.latency)
                .and_then(|latency| latency.make_delta(self.arena.state()));
            if let Some(delta) = delta {
                self.register_arena_delta(delta);
            }
        }
    }

    pub fn register_arena_delta(&mut self, delta: ArenaDelta) {
        self.arena.apply_delta(&delta);
        self.broadcast(&ServerPacket::DeltaArena(delta), Strategy::Ordered);
    }

    pub fn exec_console(&mut self, command: &str) -> String {
        self.exec_rcon(None, command)
    }

    pub fn kick(&mut self, pid: Pid) -> bool {
        let Some(peer) = self.peer_of(pid) else {
            return false;
        };
        self.connections.remove(&peer);
        if let Err(e) = self.host.disconnect(peer) {
            log::warn!("Failed to disconnect {}: {}", peer, e);
        }
        self.register_arena_delta(ArenaDelta::Quit(pid));
        true
    }

    pub fn shutdown(&mut self) {
        for peer in std::mem::take(&mut self.connections).into_keys() {
            if let Err(e) = self.host.disconnect(peer) {
                log::debug!("Failed to disconnect {}: {}", peer, e);
            }
        }
    }

    fn peer_of(&self, pid: Pid) -> Option<PeerId> {
        self.connections
            .iter()
            .find(|(_, connection)| connection.pid == Some(pid))
            .map(|(&peer, _)| peer)
    }

    fn joined(&self) -> Vec<(PeerId, Pid)> {
        self.connections
            .iter()
            .filter_map(|(&peer, connection)| Some((peer, connection.pid?)))
            .collect()
    }

    fn send(&mut self, peer: PeerId, packet: &ServerPacket, strategy: Strategy) {
        if let Err(e) = self.telegraph.transmit(&mut self.host, peer, packet, strategy) {
            log::warn!("Failed to send {} to {}: {}", packet.name(), peer, e);
        }
    }

    fn broadcast(&mut self, packet: &ServerPacket, strategy: Strategy) {
        let peers: Vec<PeerId> = self.joined().into_iter().map(|(peer, _)| peer).collect();
        if peers.is_empty() {
            return;
        }
        if let Err(e) = self
            .telegraph
            .transmit_to(&mut self.host, peers, packet, strategy)
        {
            log::warn!("Failed to broadcast {}: {}", packet.name(), e);
        }
    }

    fn broadcast_sky_delta(&mut self) {
        let Some(delta) = self
            .arena
            .subsystem_mut(self.sky)
            .and_then(|sky| sky.collect_delta())
        else {
            return;
        };
        for (peer, pid) in self.joined() {
            if let Some(delta) = delta.respect_authority(pid) {
                self.send(peer, &ServerPacket::DeltaSky(delta), Strategy::Ordered);
            }
        }
    }

    fn broadcast_score_delta(&mut self) {
        let delta = self
            .arena
            .subsystem_mut(self.scoreboard)
            .and_then(|scoreboard| scoreboard.collect_delta());
        if let Some(delta) = delta {
            self.broadcast(&ServerPacket::DeltaScore(delta), Strategy::Ordered);
        }
    }

    fn handle_reception(&mut self, reception: Reception<ClientPacket>) {
        match reception {
            Reception::Connect(peer) => {
                if let Some(addr) = self.host.peer_addr(peer) {
                    log::info!("{} connected from {}", peer, addr);
                }
                self.connections.insert(peer, Connection::default());
            }
            Reception::Disconnect(peer, reason) => {
                let Some(connection) = self.connections.remove(&peer) else {
                    return;
                };
                log::info!("{} {}", peer, reason.as_str());
                if let Some(pid) = connection.pid {
                    self.register_arena_delta(ArenaDelta::Quit(pid));
                }
            }
            Reception::Message(peer, packet) => self.handle_packet(peer, packet),
        }
    }

    fn handle_packet(&mut self, peer: PeerId, packet: ClientPacket) {
        let Some(connection) = self.connections.get(&peer) else {
            log::debug!("Dropping {} from unknown {}", packet.name(), peer);
            return;
        };
        match (connection.pid, packet) {
            (_, ClientPacket::Ping) => self.send(peer, &ServerPacket::Pong, Strategy::Unreliable),
            (None, ClientPacket::ReqJoin(nickname)) => self.handle_join(peer, &nickname),
            (Some(pid), packet) => self.handle_player_packet(peer, pid, packet),
            (None, packet) => {
                log::debug!("Dropping {} from {} before join", packet.name(), peer);
            }
        }
    }

    fn handle_join(&mut self, peer: PeerId, nickname: &str) {
        // clients already joined must be up to date before the newcomer's
        // snapshot is taken
        self.broadcast_sky_delta();
        self.broadcast_score_delta();

        let delta = match self.arena.connect_player(nickname) {
            Ok(delta) => delta,
            Err(e) => {
                log::warn!("Refusing {}: {}", peer, e);
                if let Err(e) = self.host.disconnect(peer) {
                    log::debug!("Failed to disconnect {}: {}", peer, e);
                }
                return;
            }
        };
        let ArenaDelta::Join(player) = &delta else {
            return;
        };
        let pid = player.pid;
        self.broadcast(&ServerPacket::DeltaArena(delta.clone()), Strategy::Ordered);

        if let Some(connection) = self.connections.get_mut(&peer) {
            connection.pid = Some(pid);
        }
        let init = ServerPacket::Init {
            pid,
            arena: self.arena.capture_initializer(),
            sky: self
                .sky()
                .map(|sky| sky.capture_initializer())
                .unwrap_or_default(),
            scoreboard: self
                .scoreboard()
                .map(|scoreboard| scoreboard.capture_initializer())
                .unwrap_or_default(),
        };
        if let Err(e) = self.telegraph.transmit(&mut self.host, peer, &init, Strategy::Ordered) {
            // the client would otherwise wait for an Init that never comes
            log::error!("Could not send Init to {}, dropping player {}: {}", peer, pid, e);
            self.kick(pid);
        }
    }

    fn handle_player_packet(&mut self, peer: PeerId, pid: Pid, packet: ClientPacket) {
        match packet {
            ClientPacket::Pong {
                ping_time,
                pong_time,
            } => {
                let now = self.arena.state().uptime();
                if let Some(latency) = self.arena.subsystem_mut(self.latency) {
                    latency.register_pong(pid, now, ping_time, pong_time);
                }
            }
            ClientPacket::ReqPlayerDelta(delta) => self.handle_player_delta(pid, delta),
            ClientPacket::ReqAction { action, state } => self.arena.do_action(pid, action, state),
            ClientPacket::ReqSpawn => {
                self.arena.with_subsystem(self.sky, |sky, ctx| sky.spawn(ctx, pid));
            }
            ClientPacket::Chat(message) => {
                if let Some(player) = self.arena.state().player(pid) {
                    log::info!("<{}> {}", player.nickname, message);
                }
                self.broadcast(&ServerPacket::Chat { pid, message }, Strategy::Reliable);
            }
            ClientPacket::RCon(command) => {
                let response = self.exec_rcon(Some(pid), &command);
                self.send(peer, &ServerPacket::RCon(response), Strategy::Reliable);
            }
            ClientPacket::Ping | ClientPacket::ReqJoin(_) => {
                log::debug!("Dropping {} from joined {}", packet.name(), peer);
            }
        }
    }

    /// Clients may only rename themselves and switch teams; the nickname is
    /// deconflicted here.
    fn handle_player_delta(&mut self, pid: Pid, requested: PlayerDelta) {
        let Some(player) = self.arena.state().player(pid) else {
            return;
        };
        let nickname = requested
            .nickname
            .map(|nickname| self.arena.alloc_new_nickname(pid, &nickname))
            .filter(|nickname| *nickname != player.nickname);
        let team = requested.team.filter(|&team| team != player.team);

        let delta = PlayerDelta {
            nickname,
            team,
            ..Default::default()
        };
        if delta.is_empty() {
            return;
        }
        self.register_arena_delta(ArenaDelta::PlayerDeltas(BTreeMap::from([(pid, delta)])));
    }

    /// Runs a remote console command for `pid`, or for the local console
    /// when `pid` is `None`. Returns the response text.
    fn exec_rcon(&mut self, pid: Option<Pid>, command: &str) -> String {
        let command = command.trim();
        let (verb, argument) = command
            .split_once(' ')
            .map(|(verb, argument)| (verb, argument.trim()))
            .unwrap_or((command, ""));

        if verb == "login" {
            return self.rcon_login(pid, argument);
        }
        let admin = match pid {
            None => true,
            Some(pid) => self.arena.state().player(pid).is_some_and(|p| p.admin),
        };
        if !admin {
            return "not logged in".into();
        }

        match verb {
            "start" => {
                self.register_arena_delta(ArenaDelta::Mode(ArenaMode::Game));
                "game started".into()
            }
            "stop" => {
                self.register_arena_delta(ArenaDelta::Mode(ArenaMode::Lobby));
                "game stopped".into()
            }
            "motd" => {
                self.register_arena_delta(ArenaDelta::Motd(argument.to_string()));
                "motd set".into()
            }
            "map" if argument.is_empty() => "usage: map <name>".into(),
            "map" => {
                if self.config.maps.load(argument).is_none() {
                    return format!("unknown map '{}'", argument);
                }
                self.register_arena_delta(ArenaDelta::MapChange(argument.to_string()));
                format!("next map is {}", argument)
            }
            "broadcast" if argument.is_empty() => "usage: broadcast <message>".into(),
            "broadcast" => {
                self.broadcast(
                    &ServerPacket::Broadcast(argument.to_string()),
                    Strategy::Reliable,
                );
                "broadcast sent".into()
            }
            "kick" => {
                let target = self.arena.state().find_player(argument).map(|p| p.pid());
                if let Some(target) = target
                    && self.kick(target)
                {
                    format!("kicked {}", argument)
                } else {
                    format!("no connected player named '{}'", argument)
                }
            }
            "" => "empty command".into(),
            _ => format!("unknown command '{}'", verb),
        }
    }

    fn rcon_login(&mut self, pid: Option<Pid>, password: &str) -> String {
        let Some(pid) = pid else {
            return "the console is always logged in".into();
        };
        match &self.config.rcon_password {
            Some(expected) if expected == password => {
                log::info!("player {} logged in to rcon", pid);
                let delta = PlayerDelta {
                    admin: Some(true),
                    ..Default::default()
                };
                self.register_arena_delta(ArenaDelta::PlayerDeltas(BTreeMap::from([(pid, delta)])));
                "logged in".into()
            }
            _ => {
                log::warn!("failed rcon login from player {}", pid);
                "wrong password".into()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::DEATHS;

    fn server(rcon_password: Option<&str>) -> Server {
        let config = ServerConfig {
            rcon_password: rcon_password.map(str::to_string),
            ..Default::default()
        };
        Server::new("127.0.0.1:0", config).unwrap()
    }

    #[test]
    fn run_stops_when_the_flag_clears() {
        let mut server = server(None);
        let running = server.running();
        let mut rounds = 0;
        server
            .run(|server| {
                rounds += 1;
                if rounds == 1 {
                    assert_eq!(server.exec_console("start"), "game started");
                }
                if rounds == 3 {
                    running.store(false, Ordering::SeqCst);
                }
            })
            .unwrap();

        assert_eq!(rounds, 3);
        assert_eq!(server.arena().state().mode(), ArenaMode::Game);
    }

    #[test]
    fn console_drives_the_arena() {
        let mut server = server(None);
        assert_eq!(server.exec_console("start"), "game started");
        assert_eq!(server.arena().state().mode(), ArenaMode::Game);
        assert!(server.sky().unwrap().is_active());

        assert_eq!(server.exec_console("map atlantis"), "unknown map 'atlantis'");
        assert_eq!(server.exec_console("map canyon"), "next map is canyon");
        assert_eq!(server.arena().state().next_map(), "canyon");

        assert_eq!(server.exec_console("  motd   clear skies "), "motd set");
        assert_eq!(server.arena().state().motd(), "clear skies");

        assert_eq!(server.exec_console("stop"), "game stopped");
        assert!(!server.sky().unwrap().is_active());
        assert_eq!(server.exec_console("barrel-roll"), "unknown command 'barrel-roll'");
    }

    #[test]
    fn remote_commands_need_login() {
        let mut server = server(Some("hunter2"));
        server.arena.connect_player("kestrel").unwrap();

        assert_eq!(server.exec_rcon(Some(0), "start"), "not logged in");
        assert_eq!(server.exec_rcon(Some(0), "login swordfish"), "wrong password");
        assert_eq!(server.exec_rcon(Some(0), "login hunter2"), "logged in");
        assert!(server.arena().state().player(0).unwrap().admin);
        assert_eq!(server.exec_rcon(Some(0), "start"), "game started");
    }

    #[test]
    fn login_fails_without_password() {
        let mut server = server(None);
        server.arena.connect_player("kestrel").unwrap();
        assert_eq!(server.exec_rcon(Some(0), "login "), "wrong password");
    }

    #[test]
    fn player_deltas_are_sanitized() {
        let mut server = server(None);
        server.arena.connect_player("kestrel").unwrap();
        server.arena.connect_player("osprey").unwrap();

        server.handle_player_delta(
            1,
            PlayerDelta {
                nickname: Some("kestrel".into()),
                admin: Some(true),
                team: Some(2),
                ..Default::default()
            },
        );
        let player = server.arena().state().player(1).unwrap();
        assert_eq!(player.nickname, "kestrel(1)");
        assert_eq!(player.team, 2);
        assert!(!player.admin);
    }

    #[test]
    fn suicide_counts_a_death() {
        let mut server = server(None);
        server.arena.connect_player("kestrel").unwrap();
        server.exec_console("start");
        server.handle_player_packet(PeerId(0), 0, ClientPacket::ReqSpawn);
        assert!(server.sky().unwrap().sky().unwrap().participation(0).unwrap().is_spawned());

        server.handle_player_packet(
            PeerId(0),
            0,
            ClientPacket::ReqAction {
                action: crate::engine::Action::Suicide,
                state: true,
            },
        );
        assert_eq!(server.scoreboard().unwrap().value(0, DEATHS), Some(1));
    }
}
