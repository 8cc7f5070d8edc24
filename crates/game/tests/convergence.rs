use std::sync::Arc;

use aloft::engine::sky::{BuiltinMaps, SkyHandle, SkyHandleInit};
use aloft::engine::{
    Action, Arena, ArenaDelta, ArenaInit, ArenaMode, AutoNetworked, DEATHS, Networked, Role,
    SPAWNS, Scoreboard, ScoreboardInit, SubsystemHandle,
};
use aloft::protocol::{ClientPacket, ServerPacket, client_telegraph, server_telegraph};
use aloft::telegraph::Telegraph;

const DT: f32 = 1.0 / 60.0;

struct Side {
    arena: Arena,
    sky: SubsystemHandle<SkyHandle>,
    scoreboard: SubsystemHandle<Scoreboard>,
}

impl Side {
    fn new(
        role: Role,
        arena: &ArenaInit,
        sky: &SkyHandleInit,
        scoreboard: &ScoreboardInit,
    ) -> Self {
        let mut arena = Arena::new(arena);
        let sky = arena
            .attach(|id| SkyHandle::new(id, role, sky, Arc::new(BuiltinMaps)))
            .unwrap();
        let scoreboard = arena
            .attach(|id| Scoreboard::new(id, role, scoreboard))
            .unwrap();
        Self {
            arena,
            sky,
            scoreboard,
        }
    }

    fn mirror(&self) -> Self {
        Self::new(
            Role::Client,
            &self.arena.capture_initializer(),
            &self.arena.subsystem(self.sky).unwrap().capture_initializer(),
            &self.arena.subsystem(self.scoreboard).unwrap().capture_initializer(),
        )
    }

    fn snapshot(&self) -> (ArenaInit, SkyHandleInit, ScoreboardInit) {
        // uptime is local to each side
        let mut arena = self.arena.capture_initializer();
        arena.uptime = 0.0;
        (
            arena,
            self.arena.subsystem(self.sky).unwrap().capture_initializer(),
            self.arena.subsystem(self.scoreboard).unwrap().capture_initializer(),
        )
    }
}

/// Carries server packets across the wire format and applies them.
struct Link {
    server: Telegraph<ServerPacket, ClientPacket>,
    client: Telegraph<ClientPacket, ServerPacket>,
}

impl Link {
    fn new() -> Self {
        Self {
            server: server_telegraph(),
            client: client_telegraph(),
        }
    }

    fn deliver(&self, packet: ServerPacket, mirror: &mut Side) {
        let mut wire = self.server.encode(&packet);
        match self.client.decode(&mut wire).unwrap() {
            ServerPacket::DeltaArena(delta) => mirror.arena.apply_delta(&delta),
            ServerPacket::DeltaSky(delta) => mirror
                .arena
                .subsystem_mut(mirror.sky)
                .unwrap()
                .apply_delta(&delta),
            ServerPacket::DeltaScore(delta) => mirror
                .arena
                .subsystem_mut(mirror.scoreboard)
                .unwrap()
                .apply_delta(&delta),
            other => panic!("unexpected {}", other.name()),
        }
    }

    /// Applies `delta` on the source and ships it.
    fn register(&self, source: &mut Side, mirror: &mut Side, delta: ArenaDelta) {
        source.arena.apply_delta(&delta);
        self.deliver(ServerPacket::DeltaArena(delta), mirror);
    }

    fn sync(&self, source: &mut Side, mirror: &mut Side) {
        if let Some(delta) = source.arena.subsystem_mut(source.sky).unwrap().collect_delta() {
            self.deliver(ServerPacket::DeltaSky(delta), mirror);
        }
        if let Some(delta) = source
            .arena
            .subsystem_mut(source.scoreboard)
            .unwrap()
            .collect_delta()
        {
            self.deliver(ServerPacket::DeltaScore(delta), mirror);
        }
    }
}

fn server_side() -> Side {
    Side::new(
        Role::Server,
        &ArenaInit::default(),
        &SkyHandleInit::default(),
        &ScoreboardInit::default(),
    )
}

fn spawn(side: &mut Side, pid: u8) -> bool {
    let handle = side.sky;
    side.arena
        .with_subsystem(handle, |sky, ctx| sky.spawn(ctx, pid))
        .unwrap_or(false)
}

#[test]
fn test_mirror_converges_through_a_round() {
    let link = Link::new();
    let mut source = server_side();
    source.arena.connect_player("kestrel").unwrap();
    let mut mirror = source.mirror();

    let join = source.arena.connect_player("osprey").unwrap();
    link.deliver(ServerPacket::DeltaArena(join), &mut mirror);
    link.register(&mut source, &mut mirror, ArenaDelta::MapChange("canyon".into()));
    link.register(&mut source, &mut mirror, ArenaDelta::Mode(ArenaMode::Game));
    link.sync(&mut source, &mut mirror);
    assert!(
        mirror.arena.subsystem(mirror.sky).unwrap().is_active(),
        "the start should reach the mirror"
    );

    assert!(spawn(&mut source, 0));
    assert!(spawn(&mut source, 1));
    source.arena.do_action(0, Action::Thrust, true);
    source.arena.do_action(1, Action::Primary, true);

    for step in 0..240 {
        if step == 60 {
            source.arena.do_action(0, Action::Left, true);
        }
        if step == 120 {
            source.arena.do_action(1, Action::Suicide, true);
        }
        if step == 150 {
            spawn(&mut source, 1);
        }
        source.arena.tick(DT);
        link.sync(&mut source, &mut mirror);
    }

    let scoreboard = source.arena.subsystem(source.scoreboard).unwrap();
    assert_eq!(scoreboard.value(1, SPAWNS), Some(2));
    assert!(scoreboard.value(1, DEATHS) >= Some(1));
    assert_eq!(mirror.snapshot(), source.snapshot());
}

#[test]
fn test_stop_and_quit_converge() {
    let link = Link::new();
    let mut source = server_side();
    source.arena.connect_player("kestrel").unwrap();
    source.arena.connect_player("osprey").unwrap();
    let mut mirror = source.mirror();

    link.register(&mut source, &mut mirror, ArenaDelta::Mode(ArenaMode::Game));
    link.sync(&mut source, &mut mirror);
    spawn(&mut source, 1);
    source.arena.tick(DT);
    link.sync(&mut source, &mut mirror);

    link.register(&mut source, &mut mirror, ArenaDelta::Quit(1));
    link.register(&mut source, &mut mirror, ArenaDelta::Mode(ArenaMode::Scoring));
    link.sync(&mut source, &mut mirror);

    assert!(!mirror.arena.subsystem(mirror.sky).unwrap().is_active());
    assert_eq!(mirror.snapshot(), source.snapshot());
}

#[test]
fn test_late_joiner_catches_up_from_snapshot() {
    let link = Link::new();
    let mut source = server_side();
    source.arena.connect_player("kestrel").unwrap();
    source.arena.apply_delta(&ArenaDelta::Mode(ArenaMode::Game));
    spawn(&mut source, 0);
    for _ in 0..30 {
        source.arena.tick(DT);
    }
    // what earlier clients were sent
    source.arena.subsystem_mut(source.sky).unwrap().collect_delta();
    source.arena.subsystem_mut(source.scoreboard).unwrap().collect_delta();

    let mut mirror = source.mirror();
    for _ in 0..30 {
        source.arena.tick(DT);
        link.sync(&mut source, &mut mirror);
    }
    assert_eq!(mirror.snapshot(), source.snapshot());
}
