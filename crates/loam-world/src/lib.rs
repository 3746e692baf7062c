//! Chunk-partitioned world state for the loam engine.
//!
//! A [`Realm`] is one independently ticking world partition. It owns
//! a [`ChunkIndex`] bucketing every occupant by chunk, a
//! [`VisibilityTracker`] maintaining which occupants each viewer may
//! know about, a [`GenerationPipeline`] lazily materializing chunk
//! content, and the deferred-mutation queues that let other threads
//! request changes without corrupting in-flight iteration.

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

pub mod chunk_index;
pub mod content;
pub mod generation;
pub mod persist;
pub mod queue;
pub mod realm;
pub mod visibility;

pub use chunk_index::ChunkIndex;
pub use content::{ContentError, ContentRegistry, Mobility, SpawnFactory};
pub use generation::{
    ChunkData, ChunkGenerator, FlatGenerator, GeneratedChunk, GenerationPipeline,
    PaletteGenerator, RequestOutcome, TileId, GENERATION_BUDGET, TILES_PER_CHUNK,
};
pub use persist::{
    MemoryPersistence, NullPersistence, PersistError, Persistence, RealmSnapshot,
};
pub use queue::DeferredQueue;
pub use realm::{
    DestroyedOccupant, MovedOccupant, Realm, RealmConfig, RealmTask, TickReport,
};
pub use visibility::{MoveVisibility, VisibilityEvent, VisibilityTracker};
