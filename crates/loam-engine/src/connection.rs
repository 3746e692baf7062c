//! Per-connection sessions and the inbound dispatch path.
//!
//! A [`Session`] is the server's state for one client connection,
//! owned by whatever transport feeds it bytes. Inbound bytes run
//! through the frame assembler, each completed frame instantiates a
//! packet from the registry, and the packet handles itself against a
//! [`SessionContext`]. Outbound packets accumulate in a buffer the
//! transport flushes when it pleases.
//!
//! Error policy follows the wire layer's split: any [`WireError`]
//! on the inbound path is connection-fatal (the stream can no longer
//! be trusted), a [`HandleError::NotFound`] is logged and dropped,
//! and [`HandleError::Fatal`] closes the session.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use log::{debug, error};

use loam_core::{OccupantId, RealmId, UpdateCounter};
use loam_wire::frame::encode_frame;
use loam_wire::packet::{Packet, PacketRegistry};
use loam_wire::value::Encoder;
use loam_wire::{FrameAssembler, HandleError, WireError};

use crate::registry::RealmRegistry;
use crate::server::ServerConfig;

/// Identifies one client connection for the server's lifetime.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session:{}", self.0)
    }
}

static SESSION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

impl SessionId {
    /// The next process-unique session ID.
    pub fn next() -> Self {
        Self(SESSION_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

/// What the session's packet handlers operate on.
pub struct SessionContext {
    /// The running realms.
    pub realms: Arc<RealmRegistry>,
    /// Sessions by player occupant, for fan-out.
    pub sessions: Arc<SessionRegistry>,
    /// Server-wide settings.
    pub config: Arc<ServerConfig>,
    /// The session the packet arrived on.
    pub session: Arc<Session>,
}

/// Server-side state for one client connection.
pub struct Session {
    id: SessionId,
    /// Set once login succeeds.
    player: Mutex<Option<(RealmId, OccupantId)>>,
    outgoing: Mutex<Vec<u8>>,
    /// Highest update counter sent per occupant, for egress dedupe.
    seen: Mutex<HashMap<OccupantId, UpdateCounter>>,
    closed: AtomicBool,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl Session {
    /// A fresh, not-yet-logged-in session.
    pub fn new() -> Self {
        Self {
            id: SessionId::next(),
            player: Mutex::new(None),
            outgoing: Mutex::new(Vec::new()),
            seen: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
        }
    }

    /// This session's ID.
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// The realm and occupant bound at login, if logged in.
    pub fn player(&self) -> Option<(RealmId, OccupantId)> {
        *self.player.lock().unwrap()
    }

    /// Bind the session to its player occupant. Called by the login
    /// handler.
    pub fn bind_player(&self, realm: RealmId, occupant: OccupantId) {
        *self.player.lock().unwrap() = Some((realm, occupant));
    }

    /// Queue an outbound packet.
    ///
    /// Encoding a packet we constructed cannot exceed the payload cap
    /// in practice; if it somehow does, the session is closed rather
    /// than sending a malformed frame.
    pub fn send<C>(&self, packet: &dyn Packet<C>) {
        let mut enc = Encoder::new();
        packet.encode(&mut enc);
        match encode_frame(packet.id(), &enc.into_bytes()) {
            Ok(bytes) => self.outgoing.lock().unwrap().extend_from_slice(&bytes),
            Err(err) => {
                error!("{}: dropping oversized outbound packet: {err}", self.id);
                self.close();
            }
        }
    }

    /// Record that `counter` for `occupant` is about to be sent.
    ///
    /// Returns false when this session already received that version
    /// or a newer one; callers skip the send. Moves and visibility
    /// introductions can both land in one tick, so the dispatcher
    /// gates every position update through here.
    pub fn ensure_current(&self, occupant: OccupantId, counter: UpdateCounter) -> bool {
        let mut seen = self.seen.lock().unwrap();
        match seen.get(&occupant) {
            Some(prev) if *prev >= counter => false,
            _ => {
                seen.insert(occupant, counter);
                true
            }
        }
    }

    /// Drop the recorded version for a destroyed occupant.
    pub fn forget_occupant(&self, occupant: OccupantId) {
        self.seen.lock().unwrap().remove(&occupant);
    }

    /// Take everything queued for the transport to write.
    pub fn take_outgoing(&self) -> Vec<u8> {
        std::mem::take(&mut self.outgoing.lock().unwrap())
    }

    /// Bytes currently queued outbound.
    pub fn outgoing_len(&self) -> usize {
        self.outgoing.lock().unwrap().len()
    }

    /// Mark the session closed. The transport drops it on next flush.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    /// Whether the session has been closed.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

/// Sessions indexed by the player occupant they are bound to.
///
/// The dispatcher resolves viewer occupants to sessions here when
/// fanning out tick reports.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    by_player: RwLock<HashMap<OccupantId, Arc<Session>>>,
}

impl SessionRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a session to a player occupant.
    pub fn bind(&self, player: OccupantId, session: Arc<Session>) {
        self.by_player.write().unwrap().insert(player, session);
    }

    /// Drop the binding for a player, returning the session.
    pub fn unbind(&self, player: OccupantId) -> Option<Arc<Session>> {
        self.by_player.write().unwrap().remove(&player)
    }

    /// The session bound to a player, if any.
    pub fn for_player(&self, player: OccupantId) -> Option<Arc<Session>> {
        self.by_player.read().unwrap().get(&player).cloned()
    }

    /// Number of bound sessions.
    pub fn len(&self) -> usize {
        self.by_player.read().unwrap().len()
    }

    /// Whether no sessions are bound.
    pub fn is_empty(&self) -> bool {
        self.by_player.read().unwrap().is_empty()
    }
}

/// Drives one session's inbound byte stream.
///
/// Owned by the transport thread reading the socket; everything it
/// calls into is thread-safe, so different connections decode in
/// parallel.
pub struct Connection {
    assembler: FrameAssembler,
    registry: Arc<PacketRegistry<SessionContext>>,
    ctx: SessionContext,
}

impl Connection {
    /// Wire a connection up to a session and the server's registries.
    pub fn new(registry: Arc<PacketRegistry<SessionContext>>, ctx: SessionContext) -> Self {
        Self {
            assembler: FrameAssembler::new(),
            registry,
            ctx,
        }
    }

    /// The session this connection drives.
    pub fn session(&self) -> &Arc<Session> {
        &self.ctx.session
    }

    /// Feed bytes read from the transport.
    ///
    /// # Errors
    ///
    /// Any [`WireError`] means the stream is corrupt; the session is
    /// already closed when this returns `Err` and the transport
    /// should drop the connection.
    pub fn receive(&mut self, bytes: &[u8]) -> Result<(), WireError> {
        if self.ctx.session.is_closed() {
            return Ok(());
        }
        let frames = match self.assembler.push(bytes) {
            Ok(frames) => frames,
            Err(err) => {
                error!("{}: closing on decode error: {err}", self.ctx.session.id());
                self.ctx.session.close();
                return Err(err);
            }
        };

        for frame in frames {
            if let Err(err) = self.dispatch(frame) {
                error!("{}: closing on decode error: {err}", self.ctx.session.id());
                self.ctx.session.close();
                return Err(err);
            }
            if self.ctx.session.is_closed() {
                break;
            }
        }
        Ok(())
    }

    fn dispatch(&mut self, frame: loam_wire::Frame) -> Result<(), WireError> {
        let mut packet = self.registry.instantiate(frame.packet_id)?;
        let mut dec = loam_wire::value::Decoder::new(&frame.payload);
        packet.decode(&mut dec)?;

        match packet.handle(&mut self.ctx) {
            Ok(()) => {}
            Err(HandleError::NotFound(inner)) => {
                // Stale reference; the referent raced its destruction.
                debug!("{}: dropped packet: {inner}", self.ctx.session.id());
            }
            Err(err @ HandleError::Fatal { .. }) => {
                error!("{}: closing: {err}", self.ctx.session.id());
                self.ctx.session.close();
            }
        }
        Ok(())
    }
}
