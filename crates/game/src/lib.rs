pub mod engine;
pub mod net;
pub mod protocol;
pub mod session;
pub mod telegraph;

pub use engine::{
    Action, Arena, ArenaDelta, ArenaError, ArenaEvent, ArenaInit, ArenaMode, AutoNetworked,
    Networked, Pid, PlayerDelta, PlayerInit, Role, VerifyStructure,
};
pub use net::{DEFAULT_PORT, DisconnectReason, Host, HostConfig, PacketLossSimulation, Strategy};
pub use protocol::{ClientPacket, ServerPacket, client_telegraph, server_telegraph};
pub use session::{
    Client, ClientConfig, ClientEvent, ClientState, DisconnectType, Server, ServerConfig,
    SessionError,
};
pub use telegraph::{Pack, PackError, Packet, Telegraph, TelegraphError};
