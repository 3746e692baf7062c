//! Wire-level flows: bytes in, frames out, with the realm ticked and
//! reports dispatched synchronously so every step is deterministic.

use std::sync::Arc;

use loam_core::{
    Capabilities, ChunkPosition, ContentKey, InertBehavior, OccupantId, PacketId, Position,
    RealmId, UpdateCounter, CHUNK_SIZE,
};
use loam_engine::{
    dispatch_report, ChunkRequestPacket, ErrorPacket, LoginPacket, MoveOccupantPacket,
    RealmRegistry, ServerConfig, Session, SessionContext, SessionRegistry,
};
use loam_engine::connection::Connection;
use loam_engine::packets::builtin_registry;
use loam_wire::frame::encode_frame;
use loam_wire::packet::{Packet, PacketRegistry};
use loam_wire::value::{Decoder, Encoder};
use loam_wire::{Frame, FrameAssembler, WireError};
use loam_world::{
    ContentRegistry, FlatGenerator, MemoryPersistence, Mobility, Realm, RealmConfig, TileId,
};

struct Fixture {
    realms: Arc<RealmRegistry>,
    sessions: Arc<SessionRegistry>,
    config: Arc<ServerConfig>,
    packets: Arc<PacketRegistry<SessionContext>>,
    realm: Arc<Realm>,
}

impl Fixture {
    fn new() -> Self {
        Self::build(|config| Arc::new(Realm::new(config)))
    }

    fn with_store(store: Arc<MemoryPersistence>) -> Self {
        Self::build(move |config| Arc::new(Realm::with_persistence(config, store)))
    }

    fn build(make_realm: impl FnOnce(RealmConfig) -> Arc<Realm>) -> Self {
        let mut content = ContentRegistry::new();
        content
            .register(
                ContentKey::new("base:player"),
                Mobility::Mobile,
                Capabilities::VIEWER,
                || Arc::new(InertBehavior),
            )
            .unwrap();
        content
            .register(
                ContentKey::new("base:entity/sheep"),
                Mobility::Mobile,
                Capabilities::none(),
                || Arc::new(InertBehavior),
            )
            .unwrap();

        let realm = make_realm(RealmConfig {
            id: RealmId(1),
            generator: Arc::new(FlatGenerator(TileId(3))),
            content: Arc::new(content),
        });
        let realms = Arc::new(RealmRegistry::new());
        realms.add(Arc::clone(&realm));

        Self {
            realms,
            sessions: Arc::new(SessionRegistry::new()),
            config: Arc::new(ServerConfig::default()),
            packets: Arc::new(builtin_registry()),
            realm,
        }
    }

    fn connect(&self) -> Connection {
        Connection::new(
            Arc::clone(&self.packets),
            SessionContext {
                realms: Arc::clone(&self.realms),
                sessions: Arc::clone(&self.sessions),
                config: Arc::clone(&self.config),
                session: Arc::new(Session::new()),
            },
        )
    }

    /// Tick the realm once and fan the report out to sessions.
    fn step(&self) {
        let report = self.realm.tick(0.05);
        dispatch_report(&self.realms, &self.sessions, &report);
    }
}

fn send<P: Packet<SessionContext>>(connection: &mut Connection, packet: &P) {
    let mut enc = Encoder::new();
    packet.encode(&mut enc);
    let bytes = encode_frame(packet.id(), &enc.into_bytes()).unwrap();
    connection.receive(&bytes).unwrap();
}

fn drain_frames(session: &Session) -> Vec<Frame> {
    let bytes = session.take_outgoing();
    FrameAssembler::new().push(&bytes).unwrap()
}

fn login(fixture: &Fixture, name: &str) -> (Connection, OccupantId) {
    let mut connection = fixture.connect();
    send(
        &mut connection,
        &LoginPacket {
            username: name.into(),
            realm: RealmId(1),
        },
    );
    let player = connection
        .session()
        .player()
        .expect("login should bind the session")
        .1;
    fixture.step();
    (connection, player)
}

#[test]
fn login_binds_session_and_spawns_player() {
    let fixture = Fixture::new();
    let (connection, player) = login(&fixture, "ada");

    assert!(fixture.realm.contains(player));
    assert!(fixture.realm.occupant(player).unwrap().is_viewer());
    assert!(fixture.sessions.for_player(player).is_some());

    // The welcome notice is the first outbound frame.
    let frames = drain_frames(connection.session());
    assert_eq!(frames[0].packet_id, PacketId(7));
}

#[test]
fn login_streams_the_spawn_box_terrain() {
    use std::collections::HashSet;

    let fixture = Fixture::new();
    let (connection, _player) = login(&fixture, "ada");

    // One chunk per tick; a few spare ticks cost nothing.
    for _ in 0..40 {
        fixture.step();
    }

    let frames = drain_frames(connection.session());
    let mut chunks = HashSet::new();
    for frame in frames.iter().filter(|f| f.packet_id == PacketId(4)) {
        chunks.insert(Decoder::new(&frame.payload).take_chunk().unwrap());
    }
    assert_eq!(chunks.len(), 25, "every spawn-box chunk should arrive");
}

#[test]
fn login_resumes_a_persisted_player() {
    let store = Arc::new(MemoryPersistence::new());
    let fixture = Fixture::with_store(Arc::clone(&store));

    let (connection, player) = login(&fixture, "ada");
    fixture.realm.queue_move(player, Position::new(9, 9));
    fixture.step();

    // Disconnect: the occupant is removed intact and written out.
    fixture.realm.queue_remove(player);
    fixture.step();
    store.bind_login("ada", vec![player]);
    drop(connection);
    assert!(!fixture.realm.contains(player));

    // The next login resumes the same occupant where it left off.
    let (_connection, resumed) = login(&fixture, "ada");
    assert_eq!(resumed, player);
    assert_eq!(
        fixture.realm.occupant(resumed).unwrap().position,
        Position::new(9, 9)
    );
}

#[test]
fn generated_chunk_reaches_the_requester() {
    let fixture = Fixture::new();
    let (mut connection, _player) = login(&fixture, "ada");
    drain_frames(connection.session());

    // A chunk far outside the spawn box: not generated yet, so the
    // request queues and the tiles arrive after generation.
    let wanted = ChunkPosition::new(40, 40);
    send(&mut connection, &ChunkRequestPacket { chunk: wanted });
    assert!(!fixture.realm.pipeline().is_generated(wanted));

    // The spawn box queued 25 chunks ahead of ours; budget is one
    // chunk per tick.
    for _ in 0..30 {
        fixture.step();
        if fixture.realm.pipeline().is_generated(wanted) {
            break;
        }
    }

    // Spawn-box tiles stream alongside; count only the wanted chunk.
    let frames = drain_frames(connection.session());
    let tiles: Vec<&Frame> = frames
        .iter()
        .filter(|f| f.packet_id == PacketId(4))
        .filter(|f| Decoder::new(&f.payload).take_chunk().unwrap() == wanted)
        .collect();
    assert_eq!(tiles.len(), 1, "exactly one ChunkTiles for the request");
}

#[test]
fn already_generated_chunk_is_answered_inline() {
    let fixture = Fixture::new();
    let (mut connection, _player) = login(&fixture, "ada");
    fixture.step();
    drain_frames(connection.session());

    // Two ticks in, some spawn-box chunk exists. Ask for it again.
    let chunk = fixture.realm.pipeline().snapshot()[0].0;
    send(&mut connection, &ChunkRequestPacket { chunk });

    let frames = drain_frames(connection.session());
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].packet_id, PacketId(4));
}

#[test]
fn move_request_echoes_with_fresh_counter() {
    let fixture = Fixture::new();
    let (mut connection, player) = login(&fixture, "ada");
    drain_frames(connection.session());

    send(
        &mut connection,
        &MoveOccupantPacket {
            occupant: player,
            to: Position::new(3, 4),
            counter: UpdateCounter(0),
        },
    );
    fixture.step();

    let frames = drain_frames(connection.session());
    let moved = frames
        .iter()
        .find(|f| f.packet_id == PacketId(6))
        .expect("move echo");
    let mut dec = Decoder::new(&moved.payload);
    assert_eq!(dec.take_occupant_id().unwrap(), player);
    assert_eq!(dec.take_position().unwrap(), Position::new(3, 4));
    assert_eq!(dec.take_update_counter().unwrap(), UpdateCounter(1));
    assert_eq!(
        fixture.realm.occupant(player).unwrap().position,
        Position::new(3, 4)
    );
}

#[test]
fn stale_move_is_dropped_without_effect() {
    let fixture = Fixture::new();
    let (mut connection, player) = login(&fixture, "ada");

    // Two server-side moves bump the counter to 2.
    fixture.realm.queue_move(player, Position::new(1, 1));
    fixture.step();
    fixture.realm.queue_move(player, Position::new(2, 2));
    fixture.step();
    drain_frames(connection.session());

    // A re-delivered request carrying the old counter is ignored.
    send(
        &mut connection,
        &MoveOccupantPacket {
            occupant: player,
            to: Position::new(50, 50),
            counter: UpdateCounter(1),
        },
    );
    let report = fixture.realm.tick(0.05);
    assert!(report.moved.is_empty());
    assert_eq!(
        fixture.realm.occupant(player).unwrap().position,
        Position::new(2, 2)
    );
    assert!(!connection.session().is_closed());
}

#[test]
fn moving_someone_else_is_fatal() {
    let fixture = Fixture::new();
    let (mut connection, _player) = login(&fixture, "ada");

    send(
        &mut connection,
        &MoveOccupantPacket {
            occupant: OccupantId(999_999),
            to: Position::new(0, 0),
            counter: UpdateCounter(0),
        },
    );
    assert!(connection.session().is_closed());
}

#[test]
fn viewer_sees_neighbor_move_and_destruction() {
    let fixture = Fixture::new();
    let (watcher_conn, _watcher) = login(&fixture, "watcher");
    drain_frames(watcher_conn.session());

    let sheep = fixture
        .realm
        .queue_spawn(&ContentKey::new("base:entity/sheep"), Position::new(4, 4))
        .unwrap();
    fixture.step();

    // The spawn introduced the sheep to the watcher.
    let frames = drain_frames(watcher_conn.session());
    assert!(frames.iter().any(|f| f.packet_id == PacketId(6)));

    fixture.realm.queue_move(sheep, Position::new(CHUNK_SIZE, 4));
    fixture.step();
    let frames = drain_frames(watcher_conn.session());
    assert!(frames.iter().any(|f| f.packet_id == PacketId(6)));

    fixture.realm.queue_destroy(sheep);
    fixture.step();
    let frames = drain_frames(watcher_conn.session());
    let destroy = frames
        .iter()
        .find(|f| f.packet_id == PacketId(8))
        .expect("destruction notice");
    let mut dec = Decoder::new(&destroy.payload);
    assert_eq!(dec.take_occupant_id().unwrap(), sheep);
}

#[test]
fn entering_visibility_sends_one_update_not_two() {
    let fixture = Fixture::new();
    let (watcher_conn, _watcher) = login(&fixture, "watcher");
    drain_frames(watcher_conn.session());

    // Spawn the sheep three chunks out, beyond the watcher's box.
    let sheep = fixture
        .realm
        .queue_spawn(
            &ContentKey::new("base:entity/sheep"),
            Position::new(CHUNK_SIZE * 3, CHUNK_SIZE * 3),
        )
        .unwrap();
    fixture.step();
    assert!(drain_frames(watcher_conn.session())
        .iter()
        .all(|f| f.packet_id != PacketId(6)));

    // One tick moves it inside the box: the move report and the new
    // visibility edge both fire, but the watcher gets one packet.
    fixture
        .realm
        .queue_move(sheep, Position::new(CHUNK_SIZE * 2, CHUNK_SIZE * 2));
    fixture.step();

    let frames = drain_frames(watcher_conn.session());
    let updates: Vec<&Frame> = frames
        .iter()
        .filter(|f| f.packet_id == PacketId(6))
        .collect();
    assert_eq!(updates.len(), 1);
    let mut dec = Decoder::new(&updates[0].payload);
    assert_eq!(dec.take_occupant_id().unwrap(), sheep);
}

#[test]
fn destroying_a_player_unbinds_and_closes_their_session() {
    let fixture = Fixture::new();
    let (connection, player) = login(&fixture, "ada");

    fixture.realm.queue_destroy(player);
    fixture.step();

    assert!(connection.session().is_closed());
    assert!(fixture.sessions.for_player(player).is_none());
}

#[test]
fn chunk_request_before_login_is_fatal() {
    let fixture = Fixture::new();
    let mut connection = fixture.connect();
    send(
        &mut connection,
        &ChunkRequestPacket {
            chunk: ChunkPosition::new(0, 0),
        },
    );
    assert!(connection.session().is_closed());
}

#[test]
fn corrupt_payload_closes_the_connection() {
    let fixture = Fixture::new();
    let mut connection = fixture.connect();

    // A Login frame whose payload starts with an unknown tag byte.
    let bytes = encode_frame(PacketId(2), &[0xEE, 1, 2, 3]).unwrap();
    let err = connection.receive(&bytes).unwrap_err();
    assert!(matches!(err, WireError::UnknownTag { .. }));
    assert!(connection.session().is_closed());
}

#[test]
fn client_error_packet_is_logged_not_fatal() {
    let fixture = Fixture::new();
    let mut connection = fixture.connect();
    send(&mut connection, &ErrorPacket::new("client-side hiccup"));
    assert!(!connection.session().is_closed());
}
