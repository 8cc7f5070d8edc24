use std::io;

use crate::engine::VerifyStructure;
use crate::net::{DisconnectReason, Host, HostEvent, PeerId, Strategy};

use super::pack::{Pack, PackError};
use super::packet::Packet;

#[derive(Debug, thiserror::Error)]
pub enum TelegraphError {
    #[error("could not unpack message: {0}")]
    Unpack(#[from] PackError),
    #[error("message failed structural verification")]
    Malformed,
}

/// What a poll of the host turned up, with messages already decoded.
#[derive(Debug)]
pub enum Reception<Rx> {
    Connect(PeerId),
    Disconnect(PeerId, DisconnectReason),
    Message(PeerId, Rx),
}

/// Binds an outbound and an inbound packing rule to a transport host.
#[derive(Debug, Clone)]
pub struct Telegraph<Tx, Rx> {
    tx: Pack<Tx>,
    rx: Pack<Rx>,
}

impl<Tx: 'static, Rx: VerifyStructure + 'static> Telegraph<Tx, Rx> {
    pub fn new(tx: Pack<Tx>, rx: Pack<Rx>) -> Self {
        Self { tx, rx }
    }

    pub fn encode(&self, value: &Tx) -> Packet {
        self.tx.to_packet(value)
    }

    pub fn decode(&self, packet: &mut Packet) -> Result<Rx, TelegraphError> {
        let value = self.rx.unpack(packet)?;
        if !value.verify_structure() {
            return Err(TelegraphError::Malformed);
        }
        Ok(value)
    }

    pub fn transmit(
        &self,
        host: &mut Host,
        peer: PeerId,
        value: &Tx,
        strategy: Strategy,
    ) -> io::Result<()> {
        host.send(peer, &self.encode(value), strategy)
    }

    /// Packs once and sends to every peer in `peers`. A failed send to one
    /// peer does not stop the others; the first error is returned.
    pub fn transmit_to(
        &self,
        host: &mut Host,
        peers: impl IntoIterator<Item = PeerId>,
        value: &Tx,
        strategy: Strategy,
    ) -> io::Result<()> {
        let packet = self.encode(value);
        let mut result = Ok(());
        for peer in peers {
            if let Err(e) = host.send(peer, &packet, strategy) {
                log::debug!("Send to {} failed: {}", peer, e);
                if result.is_ok() {
                    result = Err(e);
                }
            }
        }
        result
    }

    /// Drains the host and decodes every inbound message. Messages that fail
    /// to decode are logged and dropped.
    pub fn receive(&self, host: &mut Host) -> io::Result<Vec<Reception<Rx>>> {
        let mut receptions = Vec::new();
        for event in host.poll()? {
            match event {
                HostEvent::Connect { peer } => receptions.push(Reception::Connect(peer)),
                HostEvent::Disconnect { peer, reason } => {
                    receptions.push(Reception::Disconnect(peer, reason))
                }
                HostEvent::Receive { peer, mut packet } => match self.decode(&mut packet) {
                    Ok(value) => receptions.push(Reception::Message(peer, value)),
                    Err(e) => log::warn!("Dropping malformed packet from {}: {}", peer, e),
                },
            }
        }
        Ok(receptions)
    }
}
