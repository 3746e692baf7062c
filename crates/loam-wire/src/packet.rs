//! The packet trait and the numeric-ID factory registry.
//!
//! A packet is an ephemeral value: a numeric ID, a typed payload,
//! `encode`/`decode` against the value codec, and a `handle` behavior
//! run once fully decoded. The registry maps IDs to factories; it is
//! built explicitly at startup and injected into every decode path,
//! never ambient global state.

use indexmap::IndexMap;

use loam_core::PacketId;

use crate::error::{HandleError, WireError};
use crate::value::{Decoder, Encoder};

/// One packet type, generic over the simulation context its handler
/// needs (the gameplay layer supplies the concrete context).
pub trait Packet<C>: Send {
    /// The numeric wire identifier for this packet type.
    fn id(&self) -> PacketId;

    /// Serialize the payload into `enc`.
    fn encode(&self, enc: &mut Encoder);

    /// Populate this packet from a received payload.
    ///
    /// Implementations should end with `dec.finish()?` so trailing
    /// bytes surface as decode errors.
    fn decode(&mut self, dec: &mut Decoder<'_>) -> Result<(), WireError>;

    /// Run the packet's behavior against the simulation context.
    ///
    /// A [`HandleError::NotFound`] is a dropped no-op (logged by the
    /// caller); [`HandleError::Fatal`] closes the connection.
    fn handle(&self, ctx: &mut C) -> Result<(), HandleError>;
}

/// Constructs an empty packet ready to decode itself.
pub type PacketFactory<C> = fn() -> Box<dyn Packet<C>>;

/// Explicit packet-type registry: numeric ID to factory.
///
/// Deterministic iteration order (registration order) via `IndexMap`.
pub struct PacketRegistry<C> {
    factories: IndexMap<PacketId, PacketFactory<C>>,
}

impl<C> Default for PacketRegistry<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> PacketRegistry<C> {
    /// An empty registry.
    pub fn new() -> Self {
        Self {
            factories: IndexMap::new(),
        }
    }

    /// Register a packet factory under the ID its packets report.
    ///
    /// # Panics
    ///
    /// Panics if the ID is already registered; duplicate packet IDs
    /// are a startup configuration bug.
    pub fn register(&mut self, factory: PacketFactory<C>) {
        let id = factory().id();
        let previous = self.factories.insert(id, factory);
        assert!(previous.is_none(), "duplicate packet id {id}");
    }

    /// Build an empty packet for a received packet type.
    ///
    /// # Errors
    ///
    /// [`WireError::UnknownPacketType`] when no factory is registered;
    /// the caller treats this as a connection-fatal decode error.
    pub fn instantiate(&self, id: PacketId) -> Result<Box<dyn Packet<C>>, WireError> {
        self.factories
            .get(&id)
            .map(|factory| factory())
            .ok_or(WireError::UnknownPacketType { packet_type: id.0 })
    }

    /// Whether a packet type is registered.
    pub fn contains(&self, id: PacketId) -> bool {
        self.factories.contains_key(&id)
    }

    /// Number of registered packet types.
    pub fn len(&self) -> usize {
        self.factories.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }
}
