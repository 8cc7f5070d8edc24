//! Messages exchanged between clients and the server, with their wire
//! packing and structural checks.

use crate::engine::sky::{SkyHandleDelta, SkyHandleInit};
use crate::engine::{
    Action, ArenaDelta, ArenaInit, MAX_NICKNAME_LEN, Pid, PlayerDelta, ScoreboardDelta,
    ScoreboardInit, Time, VerifyStructure,
};
use crate::telegraph::{Pack, PackError, Telegraph, bool_pack, string_pack};

pub const MAX_MESSAGE_LEN: usize = 1024;

const CLIENT_TAG_BITS: u32 = 3;
const SERVER_TAG_BITS: u32 = 4;

fn is_message(text: &str) -> bool {
    !text.is_empty() && text.len() <= MAX_MESSAGE_LEN
}

#[derive(Debug, Clone, PartialEq)]
pub enum ClientPacket {
    Ping,
    /// Answer to a server ping; `pong_time` is the client's own uptime.
    Pong { ping_time: Time, pong_time: Time },
    ReqJoin(String),
    ReqPlayerDelta(PlayerDelta),
    ReqAction { action: Action, state: bool },
    ReqSpawn,
    Chat(String),
    RCon(String),
}

impl ClientPacket {
    pub fn name(&self) -> &'static str {
        match self {
            ClientPacket::Ping => "Ping",
            ClientPacket::Pong { .. } => "Pong",
            ClientPacket::ReqJoin(_) => "ReqJoin",
            ClientPacket::ReqPlayerDelta(_) => "ReqPlayerDelta",
            ClientPacket::ReqAction { .. } => "ReqAction",
            ClientPacket::ReqSpawn => "ReqSpawn",
            ClientPacket::Chat(_) => "Chat",
            ClientPacket::RCon(_) => "RCon",
        }
    }

    pub fn pack() -> Pack<Self> {
        let text = string_pack();
        let player_delta = PlayerDelta::pack();
        let action = Action::pack();
        let flag = bool_pack();
        let (text_rx, player_delta_rx, action_rx, flag_rx) =
            (text.clone(), player_delta.clone(), action.clone(), flag.clone());

        Pack::new(
            move |packet, value: &ClientPacket| match value {
                ClientPacket::Ping => packet.write_bits(0, CLIENT_TAG_BITS),
                ClientPacket::Pong {
                    ping_time,
                    pong_time,
                } => {
                    packet.write_bits(1, CLIENT_TAG_BITS);
                    packet.write_value(*ping_time);
                    packet.write_value(*pong_time);
                }
                ClientPacket::ReqJoin(nickname) => {
                    packet.write_bits(2, CLIENT_TAG_BITS);
                    text.pack(packet, nickname);
                }
                ClientPacket::ReqPlayerDelta(delta) => {
                    packet.write_bits(3, CLIENT_TAG_BITS);
                    player_delta.pack(packet, delta);
                }
                ClientPacket::ReqAction {
                    action: a,
                    state,
                } => {
                    packet.write_bits(4, CLIENT_TAG_BITS);
                    action.pack(packet, a);
                    flag.pack(packet, state);
                }
                ClientPacket::ReqSpawn => packet.write_bits(5, CLIENT_TAG_BITS),
                ClientPacket::Chat(message) => {
                    packet.write_bits(6, CLIENT_TAG_BITS);
                    text.pack(packet, message);
                }
                ClientPacket::RCon(command) => {
                    packet.write_bits(7, CLIENT_TAG_BITS);
                    text.pack(packet, command);
                }
            },
            move |packet| {
                Ok(match packet.read_bits(CLIENT_TAG_BITS)? {
                    0 => ClientPacket::Ping,
                    1 => ClientPacket::Pong {
                        ping_time: packet.read_value()?,
                        pong_time: packet.read_value()?,
                    },
                    2 => ClientPacket::ReqJoin(text_rx.unpack(packet)?),
                    3 => ClientPacket::ReqPlayerDelta(player_delta_rx.unpack(packet)?),
                    4 => ClientPacket::ReqAction {
                        action: action_rx.unpack(packet)?,
                        state: flag_rx.unpack(packet)?,
                    },
                    5 => ClientPacket::ReqSpawn,
                    6 => ClientPacket::Chat(text_rx.unpack(packet)?),
                    7 => ClientPacket::RCon(text_rx.unpack(packet)?),
                    tag => {
                        return Err(PackError::InvalidTag {
                            what: "ClientPacket",
                            tag,
                        });
                    }
                })
            },
        )
    }
}

impl VerifyStructure for ClientPacket {
    fn verify_structure(&self) -> bool {
        match self {
            ClientPacket::Ping | ClientPacket::ReqSpawn | ClientPacket::ReqAction { .. } => true,
            ClientPacket::Pong {
                ping_time,
                pong_time,
            } => ping_time.is_finite() && pong_time.is_finite(),
            ClientPacket::ReqJoin(nickname) => nickname.len() <= MAX_NICKNAME_LEN,
            ClientPacket::ReqPlayerDelta(delta) => !delta.is_empty() && delta.verify_structure(),
            ClientPacket::Chat(text) | ClientPacket::RCon(text) => is_message(text),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ServerPacket {
    Pong,
    /// `ping_time` is the server's uptime when the ping was sent.
    Ping { ping_time: Time },
    Init {
        pid: Pid,
        arena: ArenaInit,
        sky: SkyHandleInit,
        scoreboard: ScoreboardInit,
    },
    DeltaArena(ArenaDelta),
    DeltaSky(SkyHandleDelta),
    DeltaScore(ScoreboardDelta),
    Chat { pid: Pid, message: String },
    Broadcast(String),
    RCon(String),
}

impl ServerPacket {
    pub fn name(&self) -> &'static str {
        match self {
            ServerPacket::Pong => "Pong",
            ServerPacket::Ping { .. } => "Ping",
            ServerPacket::Init { .. } => "Init",
            ServerPacket::DeltaArena(_) => "DeltaArena",
            ServerPacket::DeltaSky(_) => "DeltaSky",
            ServerPacket::DeltaScore(_) => "DeltaScore",
            ServerPacket::Chat { .. } => "Chat",
            ServerPacket::Broadcast(_) => "Broadcast",
            ServerPacket::RCon(_) => "RCon",
        }
    }

    pub fn pack() -> Pack<Self> {
        let text = string_pack();
        let arena_init = ArenaInit::pack();
        let sky_init = SkyHandleInit::pack();
        let score_init = ScoreboardInit::pack();
        let arena_delta = ArenaDelta::pack();
        let sky_delta = SkyHandleDelta::pack();
        let score_delta = ScoreboardDelta::pack();
        let (text_rx, arena_init_rx, sky_init_rx, score_init_rx) =
            (text.clone(), arena_init.clone(), sky_init.clone(), score_init.clone());
        let (arena_delta_rx, sky_delta_rx, score_delta_rx) =
            (arena_delta.clone(), sky_delta.clone(), score_delta.clone());

        Pack::new(
            move |packet, value: &ServerPacket| match value {
                ServerPacket::Pong => packet.write_bits(0, SERVER_TAG_BITS),
                ServerPacket::Ping { ping_time } => {
                    packet.write_bits(1, SERVER_TAG_BITS);
                    packet.write_value(*ping_time);
                }
                ServerPacket::Init {
                    pid,
                    arena,
                    sky,
                    scoreboard,
                } => {
                    packet.write_bits(2, SERVER_TAG_BITS);
                    packet.write_value(*pid);
                    arena_init.pack(packet, arena);
                    sky_init.pack(packet, sky);
                    score_init.pack(packet, scoreboard);
                }
                ServerPacket::DeltaArena(delta) => {
                    packet.write_bits(3, SERVER_TAG_BITS);
                    arena_delta.pack(packet, delta);
                }
                ServerPacket::DeltaSky(delta) => {
                    packet.write_bits(4, SERVER_TAG_BITS);
                    sky_delta.pack(packet, delta);
                }
                ServerPacket::DeltaScore(delta) => {
                    packet.write_bits(5, SERVER_TAG_BITS);
                    score_delta.pack(packet, delta);
                }
                ServerPacket::Chat { pid, message } => {
                    packet.write_bits(6, SERVER_TAG_BITS);
                    packet.write_value(*pid);
                    text.pack(packet, message);
                }
                ServerPacket::Broadcast(message) => {
                    packet.write_bits(7, SERVER_TAG_BITS);
                    text.pack(packet, message);
                }
                ServerPacket::RCon(message) => {
                    packet.write_bits(8, SERVER_TAG_BITS);
                    text.pack(packet, message);
                }
            },
            move |packet| {
                Ok(match packet.read_bits(SERVER_TAG_BITS)? {
                    0 => ServerPacket::Pong,
                    1 => ServerPacket::Ping {
                        ping_time: packet.read_value()?,
                    },
                    2 => ServerPacket::Init {
                        pid: packet.read_value()?,
                        arena: arena_init_rx.unpack(packet)?,
                        sky: sky_init_rx.unpack(packet)?,
                        scoreboard: score_init_rx.unpack(packet)?,
                    },
                    3 => ServerPacket::DeltaArena(arena_delta_rx.unpack(packet)?),
                    4 => ServerPacket::DeltaSky(sky_delta_rx.unpack(packet)?),
                    5 => ServerPacket::DeltaScore(score_delta_rx.unpack(packet)?),
                    6 => ServerPacket::Chat {
                        pid: packet.read_value()?,
                        message: text_rx.unpack(packet)?,
                    },
                    7 => ServerPacket::Broadcast(text_rx.unpack(packet)?),
                    8 => ServerPacket::RCon(text_rx.unpack(packet)?),
                    tag => {
                        return Err(PackError::InvalidTag {
                            what: "ServerPacket",
                            tag,
                        });
                    }
                })
            },
        )
    }
}

impl VerifyStructure for ServerPacket {
    fn verify_structure(&self) -> bool {
        match self {
            ServerPacket::Pong => true,
            ServerPacket::Ping { ping_time } => ping_time.is_finite(),
            ServerPacket::Init {
                pid,
                arena,
                sky,
                scoreboard,
            } => {
                arena.players.contains_key(pid)
                    && scoreboard
                        .records
                        .keys()
                        .all(|owner| arena.players.contains_key(owner))
                    && arena.verify_structure()
                    && sky.verify_structure()
                    && scoreboard.verify_structure()
            }
            ServerPacket::DeltaArena(delta) => delta.verify_structure(),
            ServerPacket::DeltaSky(delta) => delta.verify_structure(),
            ServerPacket::DeltaScore(delta) => delta.verify_structure(),
            ServerPacket::Chat { message, .. } => is_message(message),
            ServerPacket::Broadcast(message) | ServerPacket::RCon(message) => is_message(message),
        }
    }
}

/// Sends server packets, receives client packets.
pub fn server_telegraph() -> Telegraph<ServerPacket, ClientPacket> {
    Telegraph::new(ServerPacket::pack(), ClientPacket::pack())
}

/// Sends client packets, receives server packets.
pub fn client_telegraph() -> Telegraph<ClientPacket, ServerPacket> {
    Telegraph::new(ClientPacket::pack(), ServerPacket::pack())
}
