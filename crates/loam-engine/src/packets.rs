//! The built-in packet set.
//!
//! Numeric IDs are part of the wire contract:
//!
//! | ID | Packet            | Direction        |
//! |----|-------------------|------------------|
//! | 1  | [`ErrorPacket`]          | both       |
//! | 2  | [`LoginPacket`]          | client → server |
//! | 3  | [`ChunkRequestPacket`]   | client → server |
//! | 4  | [`ChunkTilesPacket`]     | server → client |
//! | 5  | [`MoveOccupantPacket`]   | client → server |
//! | 6  | [`OccupantMovedPacket`]  | server → client |
//! | 7  | [`RealmNoticePacket`]    | server → client |
//! | 8  | [`DestroyOccupantPacket`]| server → client |
//!
//! Server-bound handlers never mutate realm state directly; they
//! enqueue through the realm's deferred queues and the tick applies
//! them. Client-bound packets still register (so they decode for
//! logging and tests) but handling one on the server is
//! connection-fatal.

use std::sync::Arc;

use log::{debug, error, warn};

use loam_core::{ChunkPosition, OccupantId, PacketId, Position, RealmId, UpdateCounter};
use loam_wire::packet::{Packet, PacketRegistry};
use loam_wire::value::{Decoder, Encoder};
use loam_wire::{HandleError, WireError};
use loam_world::{ChunkData, RequestOutcome, TileId, TILES_PER_CHUNK};

use crate::connection::SessionContext;

fn client_bound(name: &str) -> HandleError {
    HandleError::Fatal {
        reason: format!("{name} is client-bound"),
    }
}

fn require_login(ctx: &SessionContext) -> Result<(RealmId, OccupantId), HandleError> {
    ctx.session.player().ok_or(HandleError::Fatal {
        reason: "not logged in".into(),
    })
}

/// A registry holding every built-in packet.
pub fn builtin_registry() -> PacketRegistry<SessionContext> {
    let mut registry = PacketRegistry::new();
    registry.register(|| Box::new(ErrorPacket::default()));
    registry.register(|| Box::new(LoginPacket::default()));
    registry.register(|| Box::new(ChunkRequestPacket::default()));
    registry.register(|| Box::new(ChunkTilesPacket::default()));
    registry.register(|| Box::new(MoveOccupantPacket::default()));
    registry.register(|| Box::new(OccupantMovedPacket::default()));
    registry.register(|| Box::new(RealmNoticePacket::default()));
    registry.register(|| Box::new(DestroyOccupantPacket::default()));
    registry
}

// ── Error (1) ────────────────────────────────────────────────────────

/// A human-readable error notice, valid in either direction.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ErrorPacket {
    /// What went wrong.
    pub message: String,
}

impl ErrorPacket {
    /// An error packet carrying `message`.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl Packet<SessionContext> for ErrorPacket {
    fn id(&self) -> PacketId {
        PacketId(1)
    }

    fn encode(&self, enc: &mut Encoder) {
        enc.put_str(&self.message);
    }

    fn decode(&mut self, dec: &mut Decoder<'_>) -> Result<(), WireError> {
        self.message = dec.take_str()?;
        dec.finish()
    }

    fn handle(&self, ctx: &mut SessionContext) -> Result<(), HandleError> {
        error!("{}: client error: {}", ctx.session.id(), self.message);
        Ok(())
    }
}

// ── Login (2) ────────────────────────────────────────────────────────

/// Binds a connection to a player occupant in a realm.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LoginPacket {
    /// Display name.
    pub username: String,
    /// The realm to enter.
    pub realm: RealmId,
}

impl Packet<SessionContext> for LoginPacket {
    fn id(&self) -> PacketId {
        PacketId(2)
    }

    fn encode(&self, enc: &mut Encoder) {
        enc.put_str(&self.username);
        enc.put_realm_id(self.realm);
    }

    fn decode(&mut self, dec: &mut Decoder<'_>) -> Result<(), WireError> {
        self.username = dec.take_str()?;
        self.realm = dec.take_realm_id()?;
        dec.finish()
    }

    fn handle(&self, ctx: &mut SessionContext) -> Result<(), HandleError> {
        if ctx.session.player().is_some() {
            return Err(HandleError::Fatal {
                reason: "already logged in".into(),
            });
        }
        let realm = ctx.realms.get(self.realm)?;
        // A returning player resumes its persisted occupant; anyone
        // else spawns fresh at the configured position.
        let saved = realm
            .persistence()
            .read_on_login(&self.username)
            .unwrap_or_else(|err| {
                warn!("{}: reading login {} failed: {err}", ctx.session.id(), self.username);
                None
            })
            .and_then(|mut owned| {
                let at = owned.iter().position(|o| o.realm == self.realm)?;
                Some(owned.swap_remove(at))
            });
        let player = match saved {
            Some(occupant) => realm.queue_readmit(occupant),
            None => realm.queue_spawn(&ctx.config.player_key, ctx.config.spawn_position),
        }
        .map_err(|err| HandleError::Fatal {
            reason: format!("player content unavailable: {err}"),
        })?;
        ctx.session.bind_player(self.realm, player);
        ctx.sessions.bind(player, Arc::clone(&ctx.session));
        debug!(
            "{}: {} logged into realm {} as {player}",
            ctx.session.id(),
            self.username,
            self.realm
        );
        ctx.session.send::<SessionContext>(&RealmNoticePacket::new(format!(
            "welcome, {}",
            self.username
        )));
        Ok(())
    }
}

// ── ChunkRequest (3) ─────────────────────────────────────────────────

/// Asks for one chunk's tiles.
///
/// Already-generated chunks are answered immediately on the same
/// session; otherwise the request joins the realm's generation queue
/// and the tiles arrive after the tick that generates them.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ChunkRequestPacket {
    /// The chunk wanted.
    pub chunk: ChunkPosition,
}

impl Packet<SessionContext> for ChunkRequestPacket {
    fn id(&self) -> PacketId {
        PacketId(3)
    }

    fn encode(&self, enc: &mut Encoder) {
        enc.put_chunk(self.chunk);
    }

    fn decode(&mut self, dec: &mut Decoder<'_>) -> Result<(), WireError> {
        self.chunk = dec.take_chunk()?;
        dec.finish()
    }

    fn handle(&self, ctx: &mut SessionContext) -> Result<(), HandleError> {
        let (realm_id, player) = require_login(ctx)?;
        let realm = ctx.realms.get(realm_id)?;
        if let RequestOutcome::Ready(data) = realm.request_chunk(self.chunk, Some(player)) {
            ctx.session
                .send::<SessionContext>(&ChunkTilesPacket::for_chunk(self.chunk, &data));
        }
        Ok(())
    }
}

// ── ChunkTiles (4) ───────────────────────────────────────────────────

/// One chunk's tile grid, row-major.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ChunkTilesPacket {
    /// Which chunk.
    pub chunk: ChunkPosition,
    /// The tiles, [`TILES_PER_CHUNK`] of them.
    pub tiles: Vec<TileId>,
}

impl ChunkTilesPacket {
    /// Build from generated chunk data.
    pub fn for_chunk(chunk: ChunkPosition, data: &ChunkData) -> Self {
        Self {
            chunk,
            tiles: data.tiles().to_vec(),
        }
    }
}

impl Packet<SessionContext> for ChunkTilesPacket {
    fn id(&self) -> PacketId {
        PacketId(4)
    }

    fn encode(&self, enc: &mut Encoder) {
        enc.put_chunk(self.chunk);
        let mut bytes = Vec::with_capacity(self.tiles.len() * 2);
        for tile in &self.tiles {
            bytes.extend_from_slice(&tile.0.to_le_bytes());
        }
        enc.put_bytes(&bytes);
    }

    fn decode(&mut self, dec: &mut Decoder<'_>) -> Result<(), WireError> {
        self.chunk = dec.take_chunk()?;
        let bytes = dec.take_bytes()?;
        if bytes.len() != TILES_PER_CHUNK * 2 {
            return Err(WireError::UnexpectedEnd {
                needed: TILES_PER_CHUNK * 2,
                available: bytes.len(),
            });
        }
        self.tiles = bytes
            .chunks_exact(2)
            .map(|pair| TileId(u16::from_le_bytes([pair[0], pair[1]])))
            .collect();
        dec.finish()
    }

    fn handle(&self, _ctx: &mut SessionContext) -> Result<(), HandleError> {
        Err(client_bound("ChunkTiles"))
    }
}

// ── MoveOccupant (5) ─────────────────────────────────────────────────

/// A client's request to move its own occupant.
///
/// Carries the update counter the client last saw for the occupant;
/// a request older than the server's counter is stale (the server
/// moved the occupant since) and is dropped without effect, so
/// re-delivered requests are idempotent.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MoveOccupantPacket {
    /// The occupant to move.
    pub occupant: OccupantId,
    /// Target position.
    pub to: Position,
    /// Client's last-seen counter, `UpdateCounter(0)` to skip the
    /// staleness check.
    pub counter: UpdateCounter,
}

impl Packet<SessionContext> for MoveOccupantPacket {
    fn id(&self) -> PacketId {
        PacketId(5)
    }

    fn encode(&self, enc: &mut Encoder) {
        enc.put_occupant_id(self.occupant);
        enc.put_position(self.to);
        enc.put_update_counter(self.counter);
    }

    fn decode(&mut self, dec: &mut Decoder<'_>) -> Result<(), WireError> {
        self.occupant = dec.take_occupant_id()?;
        self.to = dec.take_position()?;
        self.counter = dec.take_update_counter()?;
        dec.finish()
    }

    fn handle(&self, ctx: &mut SessionContext) -> Result<(), HandleError> {
        let (realm_id, player) = require_login(ctx)?;
        if self.occupant != player {
            return Err(HandleError::Fatal {
                reason: format!("{player} may not move {}", self.occupant),
            });
        }
        let realm = ctx.realms.get(realm_id)?;
        let occupant = realm.occupant(self.occupant)?;
        if self.counter.0 != 0 && self.counter < occupant.update_counter {
            debug!(
                "{}: stale move for {} ({} < {})",
                ctx.session.id(),
                self.occupant,
                self.counter,
                occupant.update_counter
            );
            return Ok(());
        }
        realm.queue_move(self.occupant, self.to);
        Ok(())
    }
}

// ── OccupantMoved (6) ────────────────────────────────────────────────

/// Tells a viewer an occupant's new position and counter.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct OccupantMovedPacket {
    /// Who moved.
    pub occupant: OccupantId,
    /// Where it is now.
    pub position: Position,
    /// Counter after the move.
    pub counter: UpdateCounter,
}

impl Packet<SessionContext> for OccupantMovedPacket {
    fn id(&self) -> PacketId {
        PacketId(6)
    }

    fn encode(&self, enc: &mut Encoder) {
        enc.put_occupant_id(self.occupant);
        enc.put_position(self.position);
        enc.put_update_counter(self.counter);
    }

    fn decode(&mut self, dec: &mut Decoder<'_>) -> Result<(), WireError> {
        self.occupant = dec.take_occupant_id()?;
        self.position = dec.take_position()?;
        self.counter = dec.take_update_counter()?;
        dec.finish()
    }

    fn handle(&self, _ctx: &mut SessionContext) -> Result<(), HandleError> {
        Err(client_bound("OccupantMoved"))
    }
}

// ── RealmNotice (7) ──────────────────────────────────────────────────

/// A broadcast text notice from a realm.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RealmNoticePacket {
    /// The notice text.
    pub message: String,
}

impl RealmNoticePacket {
    /// A notice carrying `message`.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl Packet<SessionContext> for RealmNoticePacket {
    fn id(&self) -> PacketId {
        PacketId(7)
    }

    fn encode(&self, enc: &mut Encoder) {
        enc.put_str(&self.message);
    }

    fn decode(&mut self, dec: &mut Decoder<'_>) -> Result<(), WireError> {
        self.message = dec.take_str()?;
        dec.finish()
    }

    fn handle(&self, _ctx: &mut SessionContext) -> Result<(), HandleError> {
        Err(client_bound("RealmNotice"))
    }
}

// ── DestroyOccupant (8) ──────────────────────────────────────────────

/// Tells a viewer an occupant it knew about no longer exists.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DestroyOccupantPacket {
    /// The destroyed occupant.
    pub occupant: OccupantId,
}

impl Packet<SessionContext> for DestroyOccupantPacket {
    fn id(&self) -> PacketId {
        PacketId(8)
    }

    fn encode(&self, enc: &mut Encoder) {
        enc.put_occupant_id(self.occupant);
    }

    fn decode(&mut self, dec: &mut Decoder<'_>) -> Result<(), WireError> {
        self.occupant = dec.take_occupant_id()?;
        dec.finish()
    }

    fn handle(&self, _ctx: &mut SessionContext) -> Result<(), HandleError> {
        Err(client_bound("DestroyOccupant"))
    }
}
