//! Loam: a server-authoritative, chunk-partitioned tile-world engine.
//!
//! This is the top-level facade crate re-exporting the public API of
//! the loam sub-crates. Most servers only need `loam` as a single
//! dependency.
//!
//! # Quick start
//!
//! ```rust
//! use std::sync::Arc;
//! use loam::prelude::*;
//!
//! // Register the content the world can spawn.
//! let mut content = ContentRegistry::new();
//! content
//!     .register(
//!         ContentKey::new("base:player"),
//!         Mobility::Mobile,
//!         Capabilities::VIEWER,
//!         || Arc::new(loam::core::InertBehavior),
//!     )
//!     .unwrap();
//!
//! // Build a realm over a seeded terrain generator.
//! let realm = Arc::new(Realm::new(RealmConfig {
//!     id: RealmId(1),
//!     generator: Arc::new(PaletteGenerator::new(
//!         42,
//!         vec![(TileId(1), 3), (TileId(2), 1)],
//!     )),
//!     content: Arc::new(content),
//! }));
//!
//! // Start the server and hand it the realm.
//! let mut server = Server::new(ServerConfig::default());
//! server.add_realm(Arc::clone(&realm));
//!
//! // The transport layer opens a connection per accepted client and
//! // shuttles bytes in and out.
//! let connection = server.open_connection();
//! assert!(!connection.session().is_closed());
//! server.shutdown();
//! ```
//!
//! # Modules
//!
//! Each module corresponds to a sub-crate. Use them for types not in
//! the prelude.

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

/// Core identifiers, geometry, and the occupant model (`loam-core`).
///
/// Strongly-typed IDs, [`core::Position`] and chunk arithmetic, the
/// [`core::Occupant`] value with its capability set, and the
/// [`core::Behavior`] trait.
pub use loam_core as core;

/// Wire protocol (`loam-wire`).
///
/// The tagged value codec ([`wire::Encoder`], [`wire::Decoder`]), the
/// frame assembler, and the [`wire::Packet`] trait with its registry.
pub use loam_wire as wire;

/// World state (`loam-world`).
///
/// [`world::Realm`] with its chunk index, visibility tracker,
/// generation pipeline, deferred queues, and snapshot persistence.
pub use loam_world as world;

/// Server orchestration (`loam-engine`).
///
/// [`engine::Server`], per-connection sessions, the built-in packet
/// set, per-realm tick threads, and the compute worker pool.
pub use loam_engine as engine;

/// Common imports for typical loam usage.
///
/// ```rust
/// use loam::prelude::*;
/// ```
pub mod prelude {
    // Identity and geometry
    pub use loam_core::{
        Capabilities, ChunkPosition, ChunkRange, ContentKey, Occupant, OccupantId, Position,
        RealmId, TickId, UpdateCounter, CHUNK_SIZE, VISIBILITY_DIAMETER,
    };

    // Errors
    pub use loam_core::NotFoundError;
    pub use loam_wire::{HandleError, WireError};

    // Wire
    pub use loam_wire::{Decoder, Encoder, Frame, FrameAssembler, Packet, PacketRegistry};

    // World
    pub use loam_world::{
        ChunkData, ChunkGenerator, ContentRegistry, FlatGenerator, Mobility, PaletteGenerator,
        Realm, RealmConfig, TickReport, TileId, VisibilityEvent,
    };

    // Engine
    pub use loam_engine::{
        builtin_registry, RealmRegistry, Server, ServerConfig, Session, SessionContext,
        SessionRegistry, TickThread, WorkerPool,
    };
}
