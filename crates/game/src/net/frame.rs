use crate::telegraph::{Packet, PacketError};

pub const PROTOCOL_MAGIC: u32 = 0x414C_4654;
pub const PROTOCOL_VERSION: u8 = 1;
pub const MAX_PACKET_SIZE: usize = 8 * 1024;

/// Delivery guarantee for one message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Strategy {
    /// Fire and forget.
    Unreliable,
    /// Resent until acknowledged, delivered once, in any order.
    Reliable,
    /// Reliable, and delivered in send order relative to other ordered
    /// messages to the same peer.
    Ordered,
}

impl Strategy {
    fn tag(self) -> u64 {
        match self {
            Strategy::Unreliable => 0,
            Strategy::Reliable => 1,
            Strategy::Ordered => 2,
        }
    }

    fn from_tag(tag: u64) -> Option<Self> {
        match tag {
            0 => Some(Strategy::Unreliable),
            1 => Some(Strategy::Reliable),
            2 => Some(Strategy::Ordered),
            _ => None,
        }
    }

    pub fn is_reliable(self) -> bool {
        !matches!(self, Strategy::Unreliable)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub sequence: u32,
    pub ack: u32,
    pub ack_bitfield: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub strategy: Strategy,
    /// Set for reliable and ordered messages; stable across resends.
    pub id: u32,
    /// Position in the ordered stream, ordered messages only.
    pub order: u32,
    pub payload: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Connect,
    Accept,
    Disconnect,
    Ack(FrameHeader),
    Message(FrameHeader, Message),
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("bad magic or version")]
    Foreign,
    #[error("unknown frame kind {0}")]
    UnknownKind(u64),
    #[error("unknown delivery strategy {0}")]
    UnknownStrategy(u64),
    #[error(transparent)]
    Truncated(#[from] PacketError),
}

const KIND_CONNECT: u64 = 0;
const KIND_ACCEPT: u64 = 1;
const KIND_DISCONNECT: u64 = 2;
const KIND_ACK: u64 = 3;
const KIND_MESSAGE: u64 = 4;

fn write_header(packet: &mut Packet, header: &FrameHeader) {
    packet.write_value(header.sequence);
    packet.write_value(header.ack);
    packet.write_value(header.ack_bitfield);
}

fn read_header(packet: &mut Packet) -> Result<FrameHeader, PacketError> {
    Ok(FrameHeader {
        sequence: packet.read_value()?,
        ack: packet.read_value()?,
        ack_bitfield: packet.read_value()?,
    })
}

impl Frame {
    pub fn encode(&self) -> Vec<u8> {
        let mut packet = Packet::new();
        packet.write_value(PROTOCOL_MAGIC);
        packet.write_value(PROTOCOL_VERSION);

        match self {
            Frame::Connect => packet.write_bits(KIND_CONNECT, 3),
            Frame::Accept => packet.write_bits(KIND_ACCEPT, 3),
            Frame::Disconnect => packet.write_bits(KIND_DISCONNECT, 3),
            Frame::Ack(header) => {
                packet.write_bits(KIND_ACK, 3);
                write_header(&mut packet, header);
            }
            Frame::Message(header, message) => {
                packet.write_bits(KIND_MESSAGE, 3);
                packet.write_bits(message.strategy.tag(), 2);
                write_header(&mut packet, header);
                if message.strategy.is_reliable() {
                    packet.write_value(message.id);
                }
                if message.strategy == Strategy::Ordered {
                    packet.write_value(message.order);
                }
                packet.write_value(message.payload.len() as u32);
                packet.write_bytes(&message.payload);
            }
        }

        packet.into_bytes()
    }

    pub fn decode(bytes: &[u8]) -> Result<Frame, FrameError> {
        let mut packet = Packet::from_bytes(bytes);
        if packet.read_value::<u32>()? != PROTOCOL_MAGIC
            || packet.read_value::<u8>()? != PROTOCOL_VERSION
        {
            return Err(FrameError::Foreign);
        }

        match packet.read_bits(3)? {
            KIND_CONNECT => Ok(Frame::Connect),
            KIND_ACCEPT => Ok(Frame::Accept),
            KIND_DISCONNECT => Ok(Frame::Disconnect),
            KIND_ACK => Ok(Frame::Ack(read_header(&mut packet)?)),
            KIND_MESSAGE => {
                let tag = packet.read_bits(2)?;
                let strategy = Strategy::from_tag(tag).ok_or(FrameError::UnknownStrategy(tag))?;
                let header = read_header(&mut packet)?;
                let id = if strategy.is_reliable() {
                    packet.read_value()?
                } else {
                    0
                };
                let order = if strategy == Strategy::Ordered {
                    packet.read_value()?
                } else {
                    0
                };
                let len = packet.read_value::<u32>()? as usize;
                let payload = packet.read_bytes(len)?;
                Ok(Frame::Message(
                    header,
                    Message {
                        strategy,
                        id,
                        order,
                        payload,
                    },
                ))
            }
            kind => Err(FrameError::UnknownKind(kind)),
        }
    }
}
