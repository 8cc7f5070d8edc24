mod connection;
mod frame;
mod host;
mod stats;
mod tracking;

pub use connection::{ConnectionState, Peer, PeerId};
pub use frame::{Frame, FrameError, FrameHeader, MAX_PACKET_SIZE, Message, PROTOCOL_MAGIC, PROTOCOL_VERSION, Strategy};
pub use host::{DisconnectReason, Host, HostConfig, HostEvent};
pub use stats::{NetworkStats, PacketLossSimulation};
pub use tracking::{AckTracker, ReceiveTracker, sequence_greater_than};

pub const DEFAULT_PORT: u16 = 4242;
