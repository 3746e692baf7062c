//! Core types and traits for the loam world engine.
//!
//! This is the leaf crate with zero internal dependencies. It defines
//! the fundamental abstractions used throughout the loam workspace:
//! typed IDs, tile and chunk geometry, the occupant data model,
//! capability sets, and error types.

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

pub mod error;
pub mod id;
pub mod occupant;
pub mod position;
pub mod traits;

pub use error::NotFoundError;
pub use id::{OccupantId, PacketId, RealmId, TickId, UpdateCounter};
pub use occupant::{Capabilities, ContentKey, Direction, Occupant, OccupantKind, Offset};
pub use position::{
    can_see, ChunkPosition, ChunkRange, Position, CHUNK_SIZE, VISIBILITY_DIAMETER,
};
pub use traits::{Behavior, InertBehavior};
