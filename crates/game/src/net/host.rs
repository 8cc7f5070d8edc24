use std::collections::HashMap;
use std::io;
use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};
use std::time::Duration;

use crate::telegraph::Packet;

use super::connection::{ConnectionState, Peer, PeerId};
use super::frame::{Frame, FrameHeader, MAX_PACKET_SIZE, Message, Strategy};
use super::stats::{NetworkStats, PacketLossSimulation};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    Graceful,
    Timeout,
    Refused,
    /// The remote broke the protocol and was dropped.
    Protocol,
}

impl DisconnectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DisconnectReason::Graceful => "disconnected",
            DisconnectReason::Timeout => "timed out",
            DisconnectReason::Refused => "refused",
            DisconnectReason::Protocol => "dropped for a protocol violation",
        }
    }
}

#[derive(Debug)]
pub enum HostEvent {
    Connect {
        peer: PeerId,
    },
    Disconnect {
        peer: PeerId,
        reason: DisconnectReason,
    },
    Receive {
        peer: PeerId,
        packet: Packet,
    },
}

#[derive(Debug, Clone)]
pub struct HostConfig {
    pub max_peers: usize,
    pub timeout: Duration,
    pub connect_timeout: Duration,
    pub connect_retry: Duration,
    pub keepalive: Duration,
    pub disconnect_linger: Duration,
    pub packet_loss: Option<PacketLossSimulation>,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            max_peers: 32,
            timeout: Duration::from_secs(10),
            connect_timeout: Duration::from_secs(5),
            connect_retry: Duration::from_millis(250),
            keepalive: Duration::from_millis(500),
            disconnect_linger: Duration::from_secs(2),
            packet_loss: None,
        }
    }
}

/// A non-blocking UDP endpoint managing any number of peers. Nothing happens
/// on the wire except inside `connect`, `send`, `disconnect` and `poll`.
pub struct Host {
    socket: UdpSocket,
    local_addr: SocketAddr,
    config: HostConfig,
    peers: HashMap<PeerId, Peer>,
    peers_by_addr: HashMap<SocketAddr, PeerId>,
    next_peer_id: u32,
    stats: NetworkStats,
    recv_buffer: Vec<u8>,
}

impl Host {
    pub fn bind<A: ToSocketAddrs>(addr: A, config: HostConfig) -> io::Result<Self> {
        let socket = UdpSocket::bind(addr)?;
        socket.set_nonblocking(true)?;
        let local_addr = socket.local_addr()?;

        Ok(Self {
            socket,
            local_addr,
            config,
            peers: HashMap::new(),
            peers_by_addr: HashMap::new(),
            next_peer_id: 0,
            stats: NetworkStats::default(),
            recv_buffer: vec![0u8; MAX_PACKET_SIZE + 64],
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn stats(&self) -> &NetworkStats {
        &self.stats
    }

    pub fn peer(&self, peer: PeerId) -> Option<&Peer> {
        self.peers.get(&peer)
    }

    pub fn peer_addr(&self, peer: PeerId) -> Option<SocketAddr> {
        self.peers.get(&peer).map(|p| p.addr)
    }

    pub fn connected_peers(&self) -> impl Iterator<Item = PeerId> + '_ {
        self.peers
            .values()
            .filter(|p| p.state == ConnectionState::Connected)
            .map(|p| p.id)
    }

    pub fn set_packet_loss(&mut self, sim: Option<PacketLossSimulation>) {
        self.config.packet_loss = sim;
    }

    fn allocate_peer(&mut self, addr: SocketAddr, state: ConnectionState) -> PeerId {
        let id = PeerId(self.next_peer_id);
        self.next_peer_id = self.next_peer_id.wrapping_add(1);
        self.peers.insert(id, Peer::new(id, addr, state));
        self.peers_by_addr.insert(addr, id);
        id
    }

    fn remove_peer(&mut self, peer: PeerId) -> Option<Peer> {
        let removed = self.peers.remove(&peer)?;
        self.peers_by_addr.remove(&removed.addr);
        Some(removed)
    }

    /// Starts a handshake. The returned peer produces a `Connect` event once
    /// the remote accepts, or a `Disconnect` if it never does.
    pub fn connect<A: ToSocketAddrs>(&mut self, addr: A) -> io::Result<PeerId> {
        let addr = addr
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "no address resolved"))?;

        if let Some(&existing) = self.peers_by_addr.get(&addr) {
            return Ok(existing);
        }

        let peer = self.allocate_peer(addr, ConnectionState::Connecting);
        self.send_frame(addr, &Frame::Connect)?;
        log::debug!("Connecting to {} as {}", addr, peer);
        Ok(peer)
    }

    pub fn send(&mut self, peer: PeerId, packet: &Packet, strategy: Strategy) -> io::Result<()> {
        if packet.len_bytes() > MAX_PACKET_SIZE {
            log::error!(
                "Not sending {} byte packet to {}: the limit is {} bytes",
                packet.len_bytes(),
                peer,
                MAX_PACKET_SIZE
            );
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!(
                    "packet of {} bytes exceeds the {} byte limit",
                    packet.len_bytes(),
                    MAX_PACKET_SIZE
                ),
            ));
        }

        let Some(link) = self.peers.get_mut(&peer) else {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "Unknown peer"));
        };
        if link.state != ConnectionState::Connected {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "Peer not connected"));
        }

        let message = link.new_message(strategy, packet.as_bytes().to_vec());
        self.send_message(peer, message)
    }

    fn send_message(&mut self, peer: PeerId, message: Message) -> io::Result<()> {
        let Some(link) = self.peers.get_mut(&peer) else {
            return Ok(());
        };
        let header = link.next_header();
        link.track_sent(header.sequence, &message);
        let addr = link.addr;
        self.send_frame(addr, &Frame::Message(header, message))
    }

    /// Begins a graceful disconnect. The peer stops accepting sends at once;
    /// the `Disconnect` event follows when the remote answers or the linger
    /// period runs out.
    pub fn disconnect(&mut self, peer: PeerId) -> io::Result<()> {
        let Some(link) = self.peers.get_mut(&peer) else {
            return Ok(());
        };
        if link.state == ConnectionState::Disconnecting {
            return Ok(());
        }
        link.set_state(ConnectionState::Disconnecting);
        let addr = link.addr;
        self.send_frame(addr, &Frame::Disconnect)
    }

    /// Drops a peer without any exchange and without an event.
    pub fn reset_peer(&mut self, peer: PeerId) {
        if let Some(link) = self.remove_peer(peer) {
            let _ = self.send_frame(link.addr, &Frame::Disconnect);
        }
    }

    fn send_frame(&mut self, addr: SocketAddr, frame: &Frame) -> io::Result<()> {
        let data = frame.encode();

        self.stats.packets_sent += 1;
        if self
            .config
            .packet_loss
            .as_ref()
            .is_some_and(PacketLossSimulation::should_drop)
        {
            self.stats.packets_dropped += 1;
            return Ok(());
        }

        match self.socket.send_to(&data, addr) {
            Ok(bytes) => {
                self.stats.bytes_sent += bytes as u64;
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                self.stats.packets_dropped += 1;
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Drains the socket, runs resends, keepalives and timeouts, and returns
    /// everything that happened since the last poll. Never blocks.
    pub fn poll(&mut self) -> io::Result<Vec<HostEvent>> {
        let mut events = Vec::new();

        loop {
            match self.socket.recv_from(&mut self.recv_buffer) {
                Ok((size, addr)) => {
                    let frame = match Frame::decode(&self.recv_buffer[..size]) {
                        Ok(frame) => frame,
                        Err(e) => {
                            self.stats.malformed_frames += 1;
                            log::debug!("Dropping datagram from {}: {}", addr, e);
                            continue;
                        }
                    };
                    self.stats.packets_received += 1;
                    self.stats.bytes_received += size as u64;
                    self.handle_frame(addr, frame, &mut events)?;
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                // ICMP port unreachable from an earlier send surfaces here
                Err(ref e)
                    if matches!(
                        e.kind(),
                        io::ErrorKind::ConnectionRefused | io::ErrorKind::ConnectionReset
                    ) =>
                {
                    continue;
                }
                Err(e) => return Err(e),
            }
        }

        self.maintain(&mut events)?;
        Ok(events)
    }

    fn handle_frame(
        &mut self,
        addr: SocketAddr,
        frame: Frame,
        events: &mut Vec<HostEvent>,
    ) -> io::Result<()> {
        let known = self.peers_by_addr.get(&addr).copied();

        match frame {
            Frame::Connect => match known {
                Some(peer) => {
                    if self.peers.get(&peer).map(|p| p.state) == Some(ConnectionState::Connected) {
                        // our Accept was lost
                        self.send_frame(addr, &Frame::Accept)?;
                    }
                }
                None if self.peers.len() >= self.config.max_peers => {
                    log::info!("Refusing connection from {}: host full", addr);
                    self.send_frame(addr, &Frame::Disconnect)?;
                }
                None => {
                    let peer = self.allocate_peer(addr, ConnectionState::Connected);
                    self.send_frame(addr, &Frame::Accept)?;
                    log::debug!("Accepted {} from {}", peer, addr);
                    events.push(HostEvent::Connect { peer });
                }
            },
            Frame::Accept => {
                if let Some(link) = known.and_then(|peer| self.peers.get_mut(&peer)) {
                    if link.state == ConnectionState::Connecting {
                        link.set_state(ConnectionState::Connected);
                        link.last_receive_time = link.state_since;
                        events.push(HostEvent::Connect { peer: link.id });
                    }
                }
            }
            Frame::Disconnect => {
                let Some(peer) = known else {
                    return Ok(());
                };
                let Some(link) = self.remove_peer(peer) else {
                    return Ok(());
                };
                let reason = match link.state {
                    ConnectionState::Connected => {
                        self.send_frame(addr, &Frame::Disconnect)?;
                        DisconnectReason::Graceful
                    }
                    ConnectionState::Disconnecting => DisconnectReason::Graceful,
                    ConnectionState::Connecting => DisconnectReason::Refused,
                };
                events.push(HostEvent::Disconnect { peer, reason });
            }
            Frame::Ack(header) => {
                if let Some(link) = known.and_then(|peer| self.peers.get_mut(&peer)) {
                    if link.state == ConnectionState::Connected {
                        link.process_header(&header);
                    }
                }
            }
            Frame::Message(header, message) => {
                let Some(link) = known.and_then(|peer| self.peers.get_mut(&peer)) else {
                    return Ok(());
                };
                if link.state != ConnectionState::Connected || !link.process_header(&header) {
                    // duplicates of reliable messages still need an ack
                    link.ack_pending |= message.strategy.is_reliable();
                    return Ok(());
                }
                let peer = link.id;
                match link.accept_message(message) {
                    Ok(payloads) => {
                        events.extend(payloads.into_iter().map(|payload| HostEvent::Receive {
                            peer,
                            packet: Packet::from_bytes(payload),
                        }));
                    }
                    Err(e) => {
                        log::warn!("{} at {}: {}", peer, addr, e);
                        self.reset_peer(peer);
                        events.push(HostEvent::Disconnect {
                            peer,
                            reason: DisconnectReason::Protocol,
                        });
                    }
                }
            }
        }

        Ok(())
    }

    fn maintain(&mut self, events: &mut Vec<HostEvent>) -> io::Result<()> {
        let mut expired = Vec::new();
        let mut connect_retries = Vec::new();
        let mut resends = Vec::new();
        let mut acks = Vec::new();

        for link in self.peers.values() {
            match link.state {
                ConnectionState::Connecting => {
                    if link.state_since.elapsed() > self.config.connect_timeout {
                        expired.push((link.id, DisconnectReason::Timeout));
                    } else if link.last_send_time.elapsed() >= self.config.connect_retry {
                        connect_retries.push(link.id);
                    }
                }
                ConnectionState::Connected => {
                    if link.is_timed_out(self.config.timeout) {
                        expired.push((link.id, DisconnectReason::Timeout));
                        continue;
                    }
                    let due = link.due_for_resend();
                    if !due.is_empty() {
                        resends.push((link.id, due));
                    } else if link.ack_pending
                        || link.last_send_time.elapsed() >= self.config.keepalive
                    {
                        acks.push(link.id);
                    }
                }
                ConnectionState::Disconnecting => {
                    if link.state_since.elapsed() > self.config.disconnect_linger {
                        expired.push((link.id, DisconnectReason::Timeout));
                    }
                }
            }
        }

        for (peer, reason) in expired {
            if let Some(link) = self.remove_peer(peer) {
                log::debug!("{} at {} {}", peer, link.addr, reason.as_str());
                events.push(HostEvent::Disconnect { peer, reason });
            }
        }

        for peer in connect_retries {
            if let Some(link) = self.peers.get_mut(&peer) {
                link.last_send_time = std::time::Instant::now();
                let addr = link.addr;
                self.send_frame(addr, &Frame::Connect)?;
            }
        }

        for (peer, messages) in resends {
            for message in messages {
                self.stats.packets_resent += 1;
                self.send_message(peer, message)?;
            }
        }

        for peer in acks {
            if let Some(link) = self.peers.get_mut(&peer) {
                let header: FrameHeader = link.next_header();
                let addr = link.addr;
                self.send_frame(addr, &Frame::Ack(header))?;
            }
        }

        Ok(())
    }
}

impl Drop for Host {
    fn drop(&mut self) {
        let addrs: Vec<SocketAddr> = self
            .peers
            .values()
            .filter(|p| p.state == ConnectionState::Connected)
            .map(|p| p.addr)
            .collect();
        for addr in addrs {
            let _ = self.send_frame(addr, &Frame::Disconnect);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    fn host() -> Host {
        Host::bind("127.0.0.1:0", HostConfig::default()).unwrap()
    }

    fn pump(a: &mut Host, b: &mut Host, mut until: impl FnMut(&[HostEvent], &[HostEvent]) -> bool) {
        let start = Instant::now();
        let mut a_events = Vec::new();
        let mut b_events = Vec::new();
        while start.elapsed() < Duration::from_secs(2) {
            a_events.extend(a.poll().unwrap());
            b_events.extend(b.poll().unwrap());
            if until(&a_events, &b_events) {
                return;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
        panic!("condition not reached");
    }

    #[test]
    fn oversized_packets_are_refused() {
        let mut a = host();
        let packet = Packet::from_bytes(vec![0; MAX_PACKET_SIZE + 1]);
        let err = a.send(PeerId(0), &packet, Strategy::Ordered).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
        assert_eq!(a.stats().packets_sent, 0);
    }

    #[test]
    fn handshake_produces_connect_on_both_sides() {
        let mut server = host();
        let mut client = host();
        client.connect(server.local_addr()).unwrap();

        pump(&mut server, &mut client, |s, c| {
            s.iter().any(|e| matches!(e, HostEvent::Connect { .. }))
                && c.iter().any(|e| matches!(e, HostEvent::Connect { .. }))
        });
        assert_eq!(server.connected_peers().count(), 1);
    }

    #[test]
    fn send_before_connect_is_an_error() {
        let mut server = host();
        let mut client = host();
        let peer = client.connect(server.local_addr()).unwrap();
        let err = client
            .send(peer, &Packet::from_bytes(vec![1]), Strategy::Reliable)
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotConnected);
        let _ = server.poll();
    }

    #[test]
    fn full_host_refuses() {
        let mut server = Host::bind(
            "127.0.0.1:0",
            HostConfig {
                max_peers: 0,
                ..Default::default()
            },
        )
        .unwrap();
        let mut client = host();
        let peer = client.connect(server.local_addr()).unwrap();

        pump(&mut server, &mut client, |_, c| {
            c.iter().any(|e| {
                matches!(e, HostEvent::Disconnect { peer: p, reason: DisconnectReason::Refused } if *p == peer)
            })
        });
    }
}
