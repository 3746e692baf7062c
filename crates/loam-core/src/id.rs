//! Strongly-typed identifiers and the [`UpdateCounter`] version stamp.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Counter for unique [`OccupantId`] allocation.
static OCCUPANT_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Process-unique identifier for a world occupant.
///
/// Allocated from a monotonic atomic counter via [`OccupantId::next`].
/// The numeric total order doubles as the deterministic tie-break for
/// any operation that must touch two occupants' state: the side with
/// the lower ID is locked (or made responsible) first, which fixes
/// acquisition order and prevents deadlock during mutual-visibility
/// discovery.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OccupantId(pub u64);

impl OccupantId {
    /// Allocate a fresh, unique occupant ID.
    ///
    /// Each call returns an ID never returned before within this
    /// process. Thread-safe.
    pub fn next() -> Self {
        Self(OCCUPANT_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for OccupantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for OccupantId {
    fn from(v: u64) -> Self {
        Self(v)
    }
}

/// Identifies an independently ticking world partition.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RealmId(pub u32);

impl fmt::Display for RealmId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for RealmId {
    fn from(v: u32) -> Self {
        Self(v)
    }
}

/// Monotonically increasing tick counter for one realm.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TickId(pub u64);

impl fmt::Display for TickId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for TickId {
    fn from(v: u64) -> Self {
        Self(v)
    }
}

/// Numeric wire identifier for a packet type.
///
/// Travels as the first two bytes of every frame header and is looked
/// up in the packet registry on receipt.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PacketId(pub u16);

impl fmt::Display for PacketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u16> for PacketId {
    fn from(v: u16) -> Self {
        Self(v)
    }
}

/// Per-occupant monotonically increasing version stamp.
///
/// Bumped on every state-affecting mutation. A viewer that already
/// holds an occupant at the current counter value is skipped when the
/// occupant would otherwise be re-sent, avoiding redundant
/// retransmission of unchanged state.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UpdateCounter(pub u64);

impl UpdateCounter {
    /// Advance the counter by one and return the new value.
    pub fn bump(&mut self) -> UpdateCounter {
        self.0 += 1;
        *self
    }
}

impl fmt::Display for UpdateCounter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
