use std::thread;
use std::time::{Duration, Instant};

use aloft::net::{DisconnectReason, Host, HostConfig, PacketLossSimulation, PeerId, Strategy};
use aloft::protocol::{ClientPacket, ServerPacket, client_telegraph, server_telegraph};
use aloft::telegraph::{Reception, Telegraph};

struct Endpoint<Tx, Rx> {
    host: Host,
    telegraph: Telegraph<Tx, Rx>,
    received: Vec<Reception<Rx>>,
}

type ServerEnd = Endpoint<ServerPacket, ClientPacket>;
type ClientEnd = Endpoint<ClientPacket, ServerPacket>;

fn server_end() -> ServerEnd {
    Endpoint {
        host: Host::bind("127.0.0.1:0", HostConfig::default()).unwrap(),
        telegraph: server_telegraph(),
        received: Vec::new(),
    }
}

fn client_end() -> ClientEnd {
    Endpoint {
        host: Host::bind("127.0.0.1:0", HostConfig::default()).unwrap(),
        telegraph: client_telegraph(),
        received: Vec::new(),
    }
}

fn pump(
    server: &mut ServerEnd,
    client: &mut ClientEnd,
    timeout: Duration,
    mut until: impl FnMut(&ServerEnd, &ClientEnd) -> bool,
) {
    let start = Instant::now();
    while start.elapsed() < timeout {
        let received = server.telegraph.receive(&mut server.host).unwrap();
        server.received.extend(received);
        let received = client.telegraph.receive(&mut client.host).unwrap();
        client.received.extend(received);
        if until(server, client) {
            return;
        }
        thread::sleep(Duration::from_millis(1));
    }
    panic!("condition not reached within {:?}", timeout);
}

fn connected() -> (ServerEnd, ClientEnd, PeerId) {
    let mut server = server_end();
    let mut client = client_end();
    let peer = client.host.connect(server.host.local_addr()).unwrap();
    pump(&mut server, &mut client, Duration::from_secs(2), |_, c| {
        c.received
            .iter()
            .any(|r| matches!(r, Reception::Connect(p) if *p == peer))
    });
    (server, client, peer)
}

fn chats(received: &[Reception<ClientPacket>]) -> Vec<String> {
    received
        .iter()
        .filter_map(|r| match r {
            Reception::Message(_, ClientPacket::Chat(text)) => Some(text.clone()),
            _ => None,
        })
        .collect()
}

#[test]
fn test_messages_arrive_decoded() {
    let (mut server, mut client, peer) = connected();
    client
        .telegraph
        .transmit(&mut client.host, peer, &ClientPacket::Chat("hello".into()), Strategy::Reliable)
        .unwrap();

    pump(&mut server, &mut client, Duration::from_secs(2), |s, _| {
        !chats(&s.received).is_empty()
    });
    assert_eq!(chats(&server.received), vec!["hello"]);
    assert!(
        server
            .received
            .iter()
            .any(|r| matches!(r, Reception::Connect(_)))
    );
}

#[test]
fn test_ordered_delivery_survives_loss() {
    let (mut server, mut client, peer) = connected();
    client.host.set_packet_loss(Some(PacketLossSimulation::new(30.0)));
    server.host.set_packet_loss(Some(PacketLossSimulation::new(30.0)));

    let sent: Vec<String> = (0..40).map(|i| format!("message {}", i)).collect();
    for text in &sent {
        client
            .telegraph
            .transmit(&mut client.host, peer, &ClientPacket::Chat(text.clone()), Strategy::Ordered)
            .unwrap();
    }

    pump(&mut server, &mut client, Duration::from_secs(8), |s, _| {
        chats(&s.received).len() == sent.len()
    });
    assert_eq!(chats(&server.received), sent);
}

#[test]
fn test_malformed_messages_are_dropped() {
    let (mut server, mut client, peer) = connected();

    // encoding does not verify; the receiving side does
    let empty = client.telegraph.encode(&ClientPacket::Chat(String::new()));
    client.host.send(peer, &empty, Strategy::Ordered).unwrap();
    client
        .telegraph
        .transmit(&mut client.host, peer, &ClientPacket::Chat("ok".into()), Strategy::Ordered)
        .unwrap();

    pump(&mut server, &mut client, Duration::from_secs(2), |s, _| {
        !chats(&s.received).is_empty()
    });
    assert_eq!(chats(&server.received), vec!["ok"]);
}

#[test]
fn test_graceful_disconnect_reaches_both_sides() {
    let (mut server, mut client, peer) = connected();
    client.host.disconnect(peer).unwrap();

    pump(&mut server, &mut client, Duration::from_secs(2), |s, c| {
        s.received
            .iter()
            .any(|r| matches!(r, Reception::Disconnect(_, DisconnectReason::Graceful)))
            && c.received
                .iter()
                .any(|r| matches!(r, Reception::Disconnect(p, DisconnectReason::Graceful) if *p == peer))
    });
    assert_eq!(server.host.connected_peers().count(), 0);
}
