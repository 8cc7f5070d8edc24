use std::collections::VecDeque;
use std::io;
use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, Sender};

use crate::engine::sky::{MapProvider, SkyHandle, SkyHandleInit};
use crate::engine::{
    Action, Arena, ArenaError, ArenaEvent, ArenaInit, Cooldown, MAX_NICKNAME_LEN, Networked, Pid,
    Player, PlayerDelta, Role, Scoreboard, ScoreboardInit, SubsystemHandle, TimeDiff,
    VerifyStructure,
};
use crate::net::{Host, PeerId, Strategy};
use crate::protocol::{ClientPacket, ServerPacket, client_telegraph};
use crate::telegraph::{Reception, Telegraph};

use super::config::ClientConfig;

/// How a session came to an end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectType {
    /// We asked to leave and the server answered.
    Graceful,
    /// We asked to leave and gave up waiting for the answer.
    Timeout,
    /// The connection dropped without us asking.
    Lost,
}

impl DisconnectType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DisconnectType::Graceful => "graceful",
            DisconnectType::Timeout => "timed out",
            DisconnectType::Lost => "connection lost",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Disconnected,
    Connecting,
    AwaitingJoinAck,
    Joined,
    Disconnecting,
    Closed(DisconnectType),
}

#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    Joined { pid: Pid },
    Arena(ArenaEvent),
    Chat {
        pid: Pid,
        /// `None` if the sender is not in our copy of the arena.
        nickname: Option<String>,
        message: String,
    },
    Broadcast(String),
    RCon(String),
    Closed(DisconnectType),
}

/// The client's copy of the server's session.
#[derive(Debug)]
pub struct Mirror {
    pid: Pid,
    arena: Arena,
    sky: SubsystemHandle<SkyHandle>,
    scoreboard: SubsystemHandle<Scoreboard>,
}

impl Mirror {
    fn new(
        pid: Pid,
        arena: &ArenaInit,
        sky: &SkyHandleInit,
        scoreboard: &ScoreboardInit,
        maps: Arc<dyn MapProvider>,
        logger: Sender<ArenaEvent>,
    ) -> Result<Self, ArenaError> {
        let mut arena = Arena::new(arena);
        arena.add_logger(logger);
        let sky = arena.attach(|id| SkyHandle::new(id, Role::Client, sky, maps))?;
        let scoreboard = arena.attach(|id| Scoreboard::new(id, Role::Client, scoreboard))?;
        Ok(Self {
            pid,
            arena,
            sky,
            scoreboard,
        })
    }

    pub fn pid(&self) -> Pid {
        self.pid
    }

    pub fn player(&self) -> Option<&Player> {
        self.arena.state().player(self.pid)
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

    fn apply(&mut self, packet: &ServerPacket) {
        match packet {
            ServerPacket::DeltaArena(delta) => self.arena.apply_delta(delta),
            ServerPacket::DeltaSky(delta) => {
                if let Some(sky) = self.arena.subsystem_mut(self.sky) {
                    sky.apply_delta(delta);
                }
            }
            ServerPacket::DeltaScore(delta) => {
                if let Some(scoreboard) = self.arena.subsystem_mut(self.scoreboard) {
                    scoreboard.apply_delta(delta);
                }
            }
            _ => {}
        }
    }
}

/// The mirroring side of a session. Drive it with [`Client::poll`].
pub struct Client {
    host: Host,
    telegraph: Telegraph<ClientPacket, ServerPacket>,
    config: ClientConfig,
    state: ClientState,
    server: Option<PeerId>,
    mirror: Option<Mirror>,
    events: VecDeque<ClientEvent>,
    arena_events: Receiver<ArenaEvent>,
    arena_logger: Sender<ArenaEvent>,
    disconnect_cooldown: Cooldown,
}

impl Client {
    pub fn new(config: ClientConfig) -> io::Result<Self> {
        let host = Host::bind(config.bind.as_str(), config.host.clone())?;
        let (arena_logger, arena_events) = mpsc::channel();
        Ok(Self {
            host,
            telegraph: client_telegraph(),
            state: ClientState::Disconnected,
            server: None,
            mirror: None,
            events: VecDeque::new(),
            arena_events,
            arena_logger,
            disconnect_cooldown: Cooldown::new(config.disconnect_timeout.as_secs_f32()),
            config,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.host.local_addr()
    }

    pub fn state(&self) -> ClientState {
        self.state
    }

    pub fn mirror(&self) -> Option<&Mirror> {
        self.mirror.as_ref()
    }

    pub fn drain_events(&mut self) -> impl Iterator<Item = ClientEvent> + '_ {
        self.events.drain(..)
    }

    pub fn connect<A: ToSocketAddrs>(&mut self, addr: A) -> io::Result<()> {
        if !matches!(self.state, ClientState::Disconnected | ClientState::Closed(_)) {
            return Err(io::Error::other("client session already in progress"));
        }
        let peer = self.host.connect(addr)?;
        if let Some(addr) = self.host.peer_addr(peer) {
            log::info!("Connecting to {}", addr);
        }
        self.server = Some(peer);
        self.state = ClientState::Connecting;
        Ok(())
    }

    /// Starts leaving. The session closes when the server answers or the
    /// disconnect timeout runs out, whichever comes first.
    pub fn disconnect(&mut self) -> io::Result<()> {
        if !matches!(
            self.state,
            ClientState::Connecting | ClientState::AwaitingJoinAck | ClientState::Joined
        ) {
            return Ok(());
        }
        if let Some(peer) = self.server {
            self.host.disconnect(peer)?;
        }
        log::info!("Disconnecting");
        self.state = ClientState::Disconnecting;
        self.disconnect_cooldown.reset();
        Ok(())
    }

    /// Handles network traffic and advances the mirror by `delta` seconds.
    pub fn poll(&mut self, delta: TimeDiff) -> io::Result<()> {
        for reception in self.telegraph.receive(&mut self.host)? {
            self.handle_reception(reception);
            self.drain_arena_events();
        }

        match self.state {
            ClientState::Joined => {
                if let Some(mirror) = &mut self.mirror {
                    mirror.arena.poll(delta);
                    mirror.arena.tick(delta);
                }
                self.drain_arena_events();
            }
            ClientState::Disconnecting => {
                if self.disconnect_cooldown.cool(delta) {
                    log::warn!("Server did not answer our disconnect");
                    if let Some(peer) = self.server.take() {
                        self.host.reset_peer(peer);
                    }
                    self.close(DisconnectType::Timeout);
                }
            }
            _ => {}
        }
        Ok(())
    }

    pub fn chat(&mut self, message: &str) -> io::Result<()> {
        self.send_joined(ClientPacket::Chat(message.to_string()), Strategy::Reliable)
    }

    pub fn rcon(&mut self, command: &str) -> io::Result<()> {
        self.send_joined(ClientPacket::RCon(command.to_string()), Strategy::Reliable)
    }

    pub fn request_player_delta(&mut self, delta: PlayerDelta) -> io::Result<()> {
        self.send_joined(ClientPacket::ReqPlayerDelta(delta), Strategy::Ordered)
    }

    /// Applies the action to our own plane at once and tells the server.
    pub fn do_action(&mut self, action: Action, state: bool) -> io::Result<()> {
        if self.state != ClientState::Joined {
            return Ok(());
        }
        if let Some(mirror) = &mut self.mirror {
            mirror.arena.do_action(mirror.pid, action, state);
        }
        self.send_joined(ClientPacket::ReqAction { action, state }, Strategy::Ordered)
    }

    pub fn request_spawn(&mut self) -> io::Result<()> {
        self.send_joined(ClientPacket::ReqSpawn, Strategy::Reliable)
    }

    fn send(&mut self, packet: &ClientPacket, strategy: Strategy) -> io::Result<()> {
        match self.server {
            Some(peer) => self
                .telegraph
                .transmit(&mut self.host, peer, packet, strategy),
            None => Ok(()),
        }
    }

    fn send_joined(&mut self, packet: ClientPacket, strategy: Strategy) -> io::Result<()> {
        if self.state != ClientState::Joined {
            log::debug!("Not joined, dropping outgoing {}", packet.name());
            return Ok(());
        }
        if !packet.verify_structure() {
            log::warn!("Not sending malformed {}", packet.name());
            return Ok(());
        }
        self.send(&packet, strategy)
    }

    fn close(&mut self, kind: DisconnectType) {
        log::info!("Session closed ({})", kind.as_str());
        self.drain_arena_events();
        self.mirror = None;
        self.state = ClientState::Closed(kind);
        self.events.push_back(ClientEvent::Closed(kind));
    }

    fn drain_arena_events(&mut self) {
        self.events
            .extend(self.arena_events.try_iter().map(ClientEvent::Arena));
    }

    fn handle_reception(&mut self, reception: Reception<ServerPacket>) {
        match reception {
            Reception::Connect(peer) => {
                if self.state != ClientState::Connecting || self.server != Some(peer) {
                    return;
                }
                let mut nickname = self.config.nickname.clone();
                while nickname.len() > MAX_NICKNAME_LEN {
                    nickname.pop();
                }
                log::info!("Connected, joining as '{}'", nickname);
                self.state = ClientState::AwaitingJoinAck;
                if let Err(e) = self.send(&ClientPacket::ReqJoin(nickname), Strategy::Ordered) {
                    log::warn!("Failed to send join request: {}", e);
                }
            }
            Reception::Disconnect(peer, reason) => {
                if self.server != Some(peer) {
                    return;
                }
                self.server = None;
                if self.state == ClientState::Disconnecting {
                    self.close(DisconnectType::Graceful);
                } else {
                    log::warn!("Lost connection to server: {}", reason.as_str());
                    self.close(DisconnectType::Lost);
                }
            }
            Reception::Message(peer, packet) => {
                if self.server == Some(peer) {
                    self.handle_packet(packet);
                }
            }
        }
    }

    fn handle_packet(&mut self, packet: ServerPacket) {
        match (self.state, packet) {
            (
                ClientState::AwaitingJoinAck,
                ServerPacket::Init {
                    pid,
                    arena,
                    sky,
                    scoreboard,
                },
            ) => {
                let maps = Arc::clone(&self.config.maps);
                let logger = self.arena_logger.clone();
                match Mirror::new(pid, &arena, &sky, &scoreboard, maps, logger) {
                    Ok(mirror) => {
                        log::info!("Joined {} as player {}", arena.name, pid);
                        self.mirror = Some(mirror);
                        self.state = ClientState::Joined;
                        self.events.push_back(ClientEvent::Joined { pid });
                    }
                    Err(e) => log::warn!("Could not mirror the arena: {}", e),
                }
            }
            (ClientState::Joined, packet) => self.handle_joined_packet(packet),
            (state, packet) => {
                log::debug!("Dropping {} in state {:?}", packet.name(), state);
            }
        }
    }

    fn handle_joined_packet(&mut self, packet: ServerPacket) {
        let Some(mirror) = &mut self.mirror else {
            return;
        };
        match packet {
            ServerPacket::DeltaArena(_) | ServerPacket::DeltaSky(_) | ServerPacket::DeltaScore(_) => {
                mirror.apply(&packet);
            }
            ServerPacket::Ping { ping_time } => {
                let pong_time = mirror.arena.state().uptime();
                let pong = ClientPacket::Pong {
                    ping_time,
                    pong_time,
                };
                if let Err(e) = self.send(&pong, Strategy::Unreliable) {
                    log::debug!("Failed to answer ping: {}", e);
                }
            }
            ServerPacket::Chat { pid, message } => {
                let nickname = mirror
                    .arena
                    .state()
                    .player(pid)
                    .map(|player| player.nickname.clone());
                self.events.push_back(ClientEvent::Chat {
                    pid,
                    nickname,
                    message,
                });
            }
            ServerPacket::Broadcast(message) => {
                self.events.push_back(ClientEvent::Broadcast(message));
            }
            ServerPacket::RCon(message) => self.events.push_back(ClientEvent::RCon(message)),
            ServerPacket::Pong | ServerPacket::Init { .. } => {
                log::debug!("Dropping {} while joined", packet.name());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::net::UdpSocket;

    use super::*;
    use crate::engine::{ArenaDelta, ArenaMode, PlayerInit};

    fn client() -> Client {
        Client::new(ClientConfig {
            nickname: "kestrel".into(),
            bind: "127.0.0.1:0".into(),
            ..Default::default()
        })
        .unwrap()
    }

    fn init_packet() -> ServerPacket {
        let mut arena = ArenaInit::default();
        arena.players.insert(2, PlayerInit::new(2, "kestrel"));
        ServerPacket::Init {
            pid: 2,
            arena,
            sky: SkyHandleInit::default(),
            scoreboard: ScoreboardInit::default(),
        }
    }

    #[test]
    fn packets_invalid_for_the_state_are_dropped() {
        let mut client = client();
        client.handle_packet(init_packet());
        assert_eq!(client.state(), ClientState::Disconnected);
        assert!(client.mirror().is_none());

        client.state = ClientState::AwaitingJoinAck;
        client.handle_packet(ServerPacket::DeltaArena(ArenaDelta::Mode(ArenaMode::Game)));
        assert_eq!(client.state(), ClientState::AwaitingJoinAck);

        client.handle_packet(init_packet());
        assert_eq!(client.state(), ClientState::Joined);
        assert_eq!(client.mirror().unwrap().player().unwrap().nickname, "kestrel");
        assert_eq!(
            client.drain_events().collect::<Vec<_>>(),
            vec![ClientEvent::Joined { pid: 2 }]
        );

        client.handle_packet(ServerPacket::DeltaArena(ArenaDelta::Mode(ArenaMode::Game)));
        client.handle_packet(init_packet());
        let mirror = client.mirror().unwrap();
        assert_eq!(mirror.arena().state().mode(), ArenaMode::Game);
    }

    #[test]
    fn chat_resolves_nicknames() {
        let mut client = client();
        client.state = ClientState::AwaitingJoinAck;
        client.handle_packet(init_packet());
        client.drain_events().for_each(drop);

        client.handle_packet(ServerPacket::Chat {
            pid: 2,
            message: "hello".into(),
        });
        client.handle_packet(ServerPacket::Chat {
            pid: 9,
            message: "boo".into(),
        });
        let events: Vec<_> = client.drain_events().collect();
        assert_eq!(
            events,
            vec![
                ClientEvent::Chat {
                    pid: 2,
                    nickname: Some("kestrel".into()),
                    message: "hello".into(),
                },
                ClientEvent::Chat {
                    pid: 9,
                    nickname: None,
                    message: "boo".into(),
                },
            ]
        );
    }

    #[test]
    fn unanswered_disconnect_times_out() {
        let silent = UdpSocket::bind("127.0.0.1:0").unwrap();
        let mut client = client();
        client.connect(silent.local_addr().unwrap()).unwrap();
        assert_eq!(client.state(), ClientState::Connecting);
        assert!(client.connect(silent.local_addr().unwrap()).is_err());

        client.disconnect().unwrap();
        assert_eq!(client.state(), ClientState::Disconnecting);
        client.poll(0.5).unwrap();
        assert_eq!(client.state(), ClientState::Disconnecting);
        client.poll(0.6).unwrap();
        assert_eq!(client.state(), ClientState::Closed(DisconnectType::Timeout));
        assert!(
            client
                .drain_events()
                .any(|event| event == ClientEvent::Closed(DisconnectType::Timeout))
        );
    }

    #[test]
    fn requests_before_join_are_not_sent() {
        let mut client = client();
        client.chat("anyone there?").unwrap();
        client.do_action(Action::Thrust, true).unwrap();
        client.disconnect().unwrap();
        assert_eq!(client.state(), ClientState::Disconnected);
    }
}
