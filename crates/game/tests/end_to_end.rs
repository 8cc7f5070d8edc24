use std::thread;
use std::time::{Duration, Instant};

use aloft::engine::{ArenaInit, ArenaMode};
use aloft::session::{Client, ClientConfig, ClientEvent, ClientState, DisconnectType, Server, ServerConfig};

const DT: f32 = 1.0 / 60.0;

fn start_server(rcon_password: Option<&str>) -> Server {
    Server::new(
        "127.0.0.1:0",
        ServerConfig {
            rcon_password: rcon_password.map(String::from),
            ..Default::default()
        },
    )
    .unwrap()
}

fn start_client(server: &Server, nickname: &str) -> Client {
    let mut client = Client::new(ClientConfig {
        nickname: nickname.into(),
        bind: "127.0.0.1:0".into(),
        ..Default::default()
    })
    .unwrap();
    client.connect(server.local_addr()).unwrap();
    client
}

/// Runs server and clients side by side until `until` holds, collecting
/// every client event on the way.
fn run_until(
    server: &mut Server,
    clients: &mut [&mut Client],
    events: &mut [Vec<ClientEvent>],
    mut until: impl FnMut(&Server, &[&mut Client], &[Vec<ClientEvent>]) -> bool,
) {
    let timeout = Duration::from_secs(5);
    let start = Instant::now();
    while start.elapsed() < timeout {
        server.tick_once().unwrap();
        for (client, events) in clients.iter_mut().zip(events.iter_mut()) {
            client.poll(DT).unwrap();
            events.extend(client.drain_events());
        }
        if until(server, clients, events) {
            return;
        }
        thread::sleep(Duration::from_millis(2));
    }
    panic!("condition not reached within {:?}", timeout);
}

fn joined(clients: &[&mut Client]) -> bool {
    clients.iter().all(|c| c.state() == ClientState::Joined)
}

#[test]
fn test_join_and_follow_the_game_start() {
    let mut server = start_server(None);
    let mut alice = start_client(&server, "alice");
    let mut events = vec![Vec::new()];

    run_until(&mut server, &mut [&mut alice], &mut events, |_, c, _| joined(c));
    assert!(events[0].contains(&ClientEvent::Joined { pid: 0 }));
    let mirror = alice.mirror().unwrap();
    assert_eq!(mirror.pid(), 0);
    assert_eq!(mirror.arena().state().mode(), ArenaMode::Lobby);
    assert_eq!(mirror.player().unwrap().nickname, "alice");

    assert_eq!(server.exec_console("start"), "game started");
    run_until(&mut server, &mut [&mut alice], &mut events, |_, c, _| {
        c[0].mirror()
            .is_some_and(|m| m.arena().state().mode() == ArenaMode::Game)
    });
    let mirror = alice.mirror().unwrap();
    assert!(mirror.sky().unwrap().is_active());
    assert_eq!(server.stats().players, 1);
}

#[test]
fn test_chat_reaches_other_players() {
    let mut server = start_server(None);
    let mut alice = start_client(&server, "alice");
    let mut bob = start_client(&server, "alice");
    let mut events = vec![Vec::new(), Vec::new()];

    run_until(&mut server, &mut [&mut alice, &mut bob], &mut events, |_, c, _| {
        joined(c)
    });
    let bob_pid = bob.mirror().unwrap().pid();
    assert_eq!(bob.mirror().unwrap().player().unwrap().nickname, "alice(1)");

    alice.chat("tally ho").unwrap();
    run_until(&mut server, &mut [&mut alice, &mut bob], &mut events, |_, _, e| {
        e[1].iter().any(|event| matches!(event, ClientEvent::Chat { .. }))
    });
    assert!(events[1].contains(&ClientEvent::Chat {
        pid: 0,
        nickname: Some("alice".into()),
        message: "tally ho".into(),
    }));
    assert_ne!(bob_pid, 0);
}

#[test]
fn test_remote_console_after_login() {
    let mut server = start_server(Some("hunter2"));
    let mut alice = start_client(&server, "alice");
    let mut events = vec![Vec::new()];
    run_until(&mut server, &mut [&mut alice], &mut events, |_, c, _| joined(c));

    let replies = |events: &[Vec<ClientEvent>]| -> Vec<String> {
        events[0]
            .iter()
            .filter_map(|e| match e {
                ClientEvent::RCon(reply) => Some(reply.clone()),
                _ => None,
            })
            .collect()
    };

    alice.rcon("start").unwrap();
    run_until(&mut server, &mut [&mut alice], &mut events, |_, _, e| {
        replies(e).len() == 1
    });
    alice.rcon("login hunter2").unwrap();
    run_until(&mut server, &mut [&mut alice], &mut events, |_, c, e| {
        replies(e).len() == 2 && c[0].mirror().and_then(|m| m.player()).is_some_and(|p| p.admin)
    });
    alice.rcon("start").unwrap();
    run_until(&mut server, &mut [&mut alice], &mut events, |_, _, e| {
        replies(e).len() == 3
    });

    assert_eq!(
        replies(&events),
        vec!["not logged in", "logged in", "game started"]
    );
    assert_eq!(server.arena().state().mode(), ArenaMode::Game);
}

#[test]
fn test_graceful_leave_removes_the_player() {
    let mut server = start_server(None);
    let mut alice = start_client(&server, "alice");
    let mut bob = start_client(&server, "bob");
    let mut events = vec![Vec::new(), Vec::new()];
    run_until(&mut server, &mut [&mut alice, &mut bob], &mut events, |_, c, _| {
        joined(c) && c.iter().all(|c| c.mirror().unwrap().arena().state().player_count() == 2)
    });
    let alice_pid = alice.mirror().unwrap().pid();

    alice.disconnect().unwrap();
    assert_eq!(alice.state(), ClientState::Disconnecting);
    run_until(&mut server, &mut [&mut alice, &mut bob], &mut events, |s, c, _| {
        c[0].state() == ClientState::Closed(DisconnectType::Graceful)
            && s.arena().state().player(alice_pid).is_none()
            && c[1].mirror().unwrap().arena().state().player_count() == 1
    });

    assert!(alice.mirror().is_none());
    assert!(events[0].contains(&ClientEvent::Closed(DisconnectType::Graceful)));
}

#[test]
fn test_kicked_player_loses_the_connection() {
    let mut server = start_server(None);
    let mut alice = start_client(&server, "alice");
    let mut events = vec![Vec::new()];
    run_until(&mut server, &mut [&mut alice], &mut events, |_, c, _| joined(c));

    assert_eq!(server.exec_console("kick alice"), "kicked alice");
    run_until(&mut server, &mut [&mut alice], &mut events, |_, c, _| {
        matches!(c[0].state(), ClientState::Closed(_))
    });
    assert_eq!(alice.state(), ClientState::Closed(DisconnectType::Lost));
    assert_eq!(server.arena().state().player_count(), 0);
}

#[test]
fn test_joiner_is_dropped_when_init_cannot_be_sent() {
    let mut server = Server::new(
        "127.0.0.1:0",
        ServerConfig {
            arena: ArenaInit {
                motd: "clear skies ".repeat(1000),
                ..Default::default()
            },
            ..Default::default()
        },
    )
    .unwrap();
    let mut alice = start_client(&server, "alice");
    let mut events = vec![Vec::new()];

    run_until(&mut server, &mut [&mut alice], &mut events, |_, c, _| {
        matches!(c[0].state(), ClientState::Closed(_))
    });
    assert_eq!(alice.state(), ClientState::Closed(DisconnectType::Lost));
    assert!(!events[0].iter().any(|e| matches!(e, ClientEvent::Joined { .. })));
    assert_eq!(server.arena().state().player_count(), 0);
}
