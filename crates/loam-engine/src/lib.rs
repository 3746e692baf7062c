//! Server orchestration for loam.
//!
//! Ties the world crates together: a [`RealmRegistry`] of running
//! realms, per-connection [`Session`]s feeding packets through the
//! wire layer, a [`TickThread`] per realm driving [`loam_world::Realm::tick`]
//! at a fixed cadence, and a [`WorkerPool`] for heavy per-occupant
//! computations that must not stall the tick.
//!
//! # Threading model
//!
//! ```text
//! Transport threads         Tick thread (per realm)      Workers (N)
//!     |                          |                          |
//!     |--Session::receive()      |                          |
//!     |   decode, handle,        |                          |
//!     |   realm.queue_*() ------>| steal queues             |
//!     |                          | realm.tick()             |
//!     |                          | report --> dispatcher    |
//!     |                          |                          |
//!     |--WorkerPool::submit()-------------------------->  recv job
//!     |                          |                        compute
//!     |                          |<--realm.defer(apply)-- send back
//! ```
//!
//! Handlers and workers never mutate realm state directly; everything
//! goes through the realm's deferred queues and is applied in tick
//! phase order.

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

pub mod connection;
pub mod packets;
pub mod registry;
pub mod server;
pub mod tick_thread;
pub mod workers;

pub use connection::{Connection, Session, SessionContext, SessionId, SessionRegistry};
pub use packets::{
    builtin_registry, ChunkRequestPacket, ChunkTilesPacket, DestroyOccupantPacket,
    ErrorPacket, LoginPacket, MoveOccupantPacket, OccupantMovedPacket, RealmNoticePacket,
};
pub use registry::RealmRegistry;
pub use server::{dispatch_report, Server, ServerConfig};
pub use tick_thread::TickThread;
pub use workers::{ComputeJob, SubmitOutcome, WorkerPool};
