//! The server: realms, sessions, tick threads, and report fan-out.
//!
//! [`Server`] wires the pieces together. Each added realm gets a
//! [`TickThread`]; every tick's report lands on one channel, and the
//! dispatcher thread translates it into packets on the affected
//! sessions' outgoing buffers. The transport layer's only jobs are
//! feeding [`crate::connection::Connection::receive`] and flushing
//! [`crate::connection::Session::take_outgoing`].

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, Sender};
use log::debug;

use loam_core::{ContentKey, Position};
use loam_wire::packet::PacketRegistry;
use loam_world::{Realm, TickReport};

use crate::connection::{Connection, Session, SessionContext, SessionRegistry};
use crate::packets::{
    builtin_registry, ChunkTilesPacket, DestroyOccupantPacket, OccupantMovedPacket,
};
use crate::registry::RealmRegistry;
use crate::tick_thread::TickThread;
use crate::workers::WorkerPool;

/// Server-wide settings.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Content key spawned for each logging-in player.
    pub player_key: ContentKey,
    /// Where new players appear.
    pub spawn_position: Position,
    /// Realm tick rate.
    pub tick_rate_hz: f64,
    /// Compute worker threads.
    pub worker_count: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            player_key: ContentKey::new("base:player"),
            spawn_position: Position::new(0, 0),
            tick_rate_hz: 20.0,
            worker_count: 2,
        }
    }
}

/// A running loam server.
pub struct Server {
    config: Arc<ServerConfig>,
    realms: Arc<RealmRegistry>,
    sessions: Arc<SessionRegistry>,
    packets: Arc<PacketRegistry<SessionContext>>,
    workers: WorkerPool,
    tick_threads: Vec<TickThread>,
    report_tx: Option<Sender<TickReport>>,
    dispatcher: Option<JoinHandle<()>>,
}

impl Server {
    /// Start a server with no realms.
    pub fn new(config: ServerConfig) -> Self {
        let worker_count = config.worker_count;
        let sessions = Arc::new(SessionRegistry::new());
        let realms = Arc::new(RealmRegistry::new());
        let (report_tx, report_rx) = crossbeam_channel::unbounded();

        let dispatcher_realms = Arc::clone(&realms);
        let dispatcher_sessions = Arc::clone(&sessions);
        let dispatcher = thread::Builder::new()
            .name("loam-dispatch".into())
            .spawn(move || dispatcher_loop(report_rx, dispatcher_realms, dispatcher_sessions))
            .expect("failed to spawn dispatcher");

        Self {
            config: Arc::new(config),
            realms,
            sessions,
            packets: Arc::new(builtin_registry()),
            workers: WorkerPool::new(worker_count),
            tick_threads: Vec::new(),
            report_tx: Some(report_tx),
            dispatcher: Some(dispatcher),
        }
    }

    /// Register a realm and start ticking it.
    pub fn add_realm(&mut self, realm: Arc<Realm>) {
        self.realms.add(Arc::clone(&realm));
        let reports = self
            .report_tx
            .as_ref()
            .expect("server is shut down")
            .clone();
        self.tick_threads
            .push(TickThread::spawn(realm, self.config.tick_rate_hz, reports));
    }

    /// Open a connection for a newly accepted client.
    pub fn open_connection(&self) -> Connection {
        let ctx = SessionContext {
            realms: Arc::clone(&self.realms),
            sessions: Arc::clone(&self.sessions),
            config: Arc::clone(&self.config),
            session: Arc::new(Session::new()),
        };
        Connection::new(Arc::clone(&self.packets), ctx)
    }

    /// The realm registry.
    pub fn realms(&self) -> &Arc<RealmRegistry> {
        &self.realms
    }

    /// The session registry.
    pub fn sessions(&self) -> &Arc<SessionRegistry> {
        &self.sessions
    }

    /// The compute worker pool.
    pub fn workers(&self) -> &WorkerPool {
        &self.workers
    }

    /// Stop tick threads, drain the dispatcher, and join workers.
    pub fn shutdown(&mut self) {
        for thread in &mut self.tick_threads {
            thread.stop();
        }
        self.tick_threads.clear();
        // Dropping the last report sender ends the dispatcher loop.
        self.report_tx = None;
        if let Some(handle) = self.dispatcher.take() {
            let _ = handle.join();
        }
        self.workers.shutdown();
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn dispatcher_loop(
    reports: Receiver<TickReport>,
    realms: Arc<RealmRegistry>,
    sessions: Arc<SessionRegistry>,
) {
    while let Ok(report) = reports.recv() {
        dispatch_report(&realms, &sessions, &report);
    }
    debug!("dispatcher stopped");
}

/// Translate one tick report into packets on session buffers.
///
/// Exposed so tests can drive fan-out synchronously; the dispatcher
/// thread is just this in a loop.
pub fn dispatch_report(
    realms: &RealmRegistry,
    sessions: &SessionRegistry,
    report: &TickReport,
) {
    // Position updates: every watching viewer, plus the mover's own
    // session so clients get an authoritative echo of their moves.
    for moved in &report.moved {
        let packet = OccupantMovedPacket {
            occupant: moved.id,
            position: moved.to,
            counter: moved.update_counter,
        };
        for viewer in &moved.viewers {
            if let Some(session) = sessions.for_player(*viewer) {
                if session.ensure_current(moved.id, moved.update_counter) {
                    session.send::<SessionContext>(&packet);
                }
            }
        }
        if let Some(session) = sessions.for_player(moved.id) {
            if session.ensure_current(moved.id, moved.update_counter) {
                session.send::<SessionContext>(&packet);
            }
        }
    }

    // New visibility edges: introduce the occupant to the viewer.
    if !report.events.is_empty() {
        if let Ok(realm) = realms.get(report.realm) {
            for event in &report.events {
                let loam_world::VisibilityEvent::NowVisible { viewer, occupant } = event;
                let Some(session) = sessions.for_player(*viewer) else {
                    continue;
                };
                // The occupant may already be gone again; skip quietly.
                if let Ok(occupant) = realm.occupant(*occupant) {
                    if session.ensure_current(occupant.id, occupant.update_counter) {
                        session.send::<SessionContext>(&OccupantMovedPacket {
                            occupant: occupant.id,
                            position: occupant.position,
                            counter: occupant.update_counter,
                        });
                    }
                }
            }
        }
    }

    // Freshly generated chunks go to everyone who asked.
    for generated in &report.generated {
        if generated.requesters.is_empty() {
            continue;
        }
        let packet = ChunkTilesPacket::for_chunk(generated.chunk, &generated.data);
        for requester in &generated.requesters {
            if let Some(session) = sessions.for_player(*requester) {
                session.send::<SessionContext>(&packet);
            }
        }
    }

    // Destructions: notify watchers, then tear down the session if
    // the destroyed occupant was itself a player.
    for destroyed in &report.destroyed {
        let packet = DestroyOccupantPacket {
            occupant: destroyed.id,
        };
        for viewer in &destroyed.viewers {
            if let Some(session) = sessions.for_player(*viewer) {
                session.send::<SessionContext>(&packet);
                session.forget_occupant(destroyed.id);
            }
        }
        if let Some(session) = sessions.unbind(destroyed.id) {
            session.close();
        }
    }
}
