//! The occupant data model: anything placeable in a realm.
//!
//! An occupant is either *mobile* (moves tick-to-tick, has a facing
//! direction and a sub-tile offset) or *fixed* (anchored to one tile).
//! The original deep inheritance hierarchy is replaced by the closed
//! [`OccupantKind`] variant plus [`Capabilities`] checks.

use std::fmt;

use crate::id::{OccupantId, RealmId, UpdateCounter};
use crate::position::Position;

/// Facing direction of a mobile occupant.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Facing up (decreasing row).
    Up,
    /// Facing down (increasing row).
    #[default]
    Down,
    /// Facing left (decreasing column).
    Left,
    /// Facing right (increasing column).
    Right,
}

/// Sub-tile offset of a mobile occupant, in tile fractions.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Offset {
    /// Horizontal fraction, `[0, 1)` when settled.
    pub x: f32,
    /// Vertical fraction, `[0, 1)` when settled.
    pub y: f32,
}

/// Closed variant distinguishing the two occupant families.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum OccupantKind {
    /// Moves tick-to-tick; carries direction and sub-tile offset.
    Mobile {
        /// Current facing.
        direction: Direction,
        /// Sub-tile offset used for smooth interpolation.
        offset: Offset,
    },
    /// Anchored to a single tile.
    Fixed,
}

/// Capability bitset replacing mixin inheritance.
///
/// Gameplay code asks "does this occupant have X" rather than
/// downcasting to a subclass.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Capabilities(pub u32);

impl Capabilities {
    /// Bound to a network connection; receives visibility
    /// notifications and chunk content.
    pub const VIEWER: Capabilities = Capabilities(1 << 0);
    /// Carries an inventory.
    pub const INVENTORY: Capabilities = Capabilities(1 << 1);
    /// Participates in energy networks.
    pub const ENERGY: Capabilities = Capabilities(1 << 2);
    /// Runs autonomous behavior (pathfinding targets, AI).
    pub const AGENT: Capabilities = Capabilities(1 << 3);
    /// Holds fluid levels.
    pub const FLUIDS: Capabilities = Capabilities(1 << 4);

    /// The empty capability set.
    pub fn none() -> Self {
        Self(0)
    }

    /// Whether every capability in `other` is present.
    pub fn has(&self, other: Capabilities) -> bool {
        self.0 & other.0 == other.0
    }

    /// Union of two capability sets.
    pub fn with(self, other: Capabilities) -> Self {
        Self(self.0 | other.0)
    }
}

/// Namespaced content-type key, e.g. `"base:entity/animal"`.
///
/// Resolved through the content registry to a spawn factory; never
/// interpreted by the engine itself.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContentKey(pub String);

impl ContentKey {
    /// Construct a key from its string form.
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }
}

impl fmt::Display for ContentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A world occupant: one mobile entity or fixed fixture.
///
/// Cross-references to other occupants, the owning realm, and viewers
/// are stored as IDs resolved through the realm's occupant arena, so
/// a dangling reference is a failed lookup, never a dangling pointer.
#[derive(Clone, Debug)]
pub struct Occupant {
    /// Process-unique identifier.
    pub id: OccupantId,
    /// Owning realm.
    pub realm: RealmId,
    /// Current tile position.
    pub position: Position,
    /// Mobile or fixed.
    pub kind: OccupantKind,
    /// Capability set.
    pub capabilities: Capabilities,
    /// Content-type key resolved through the content registry.
    pub content_key: ContentKey,
    /// Version stamp bumped on state-affecting mutation.
    pub update_counter: UpdateCounter,
}

impl Occupant {
    /// Construct a mobile occupant at a position.
    pub fn mobile(id: OccupantId, realm: RealmId, position: Position, key: ContentKey) -> Self {
        Self {
            id,
            realm,
            position,
            kind: OccupantKind::Mobile {
                direction: Direction::default(),
                offset: Offset::default(),
            },
            capabilities: Capabilities::none(),
            content_key: key,
            update_counter: UpdateCounter::default(),
        }
    }

    /// Construct a fixed occupant anchored to a tile.
    pub fn fixed(id: OccupantId, realm: RealmId, position: Position, key: ContentKey) -> Self {
        Self {
            id,
            realm,
            position,
            kind: OccupantKind::Fixed,
            capabilities: Capabilities::none(),
            content_key: key,
            update_counter: UpdateCounter::default(),
        }
    }

    /// Add capabilities, builder-style.
    pub fn with_capabilities(mut self, caps: Capabilities) -> Self {
        self.capabilities = self.capabilities.with(caps);
        self
    }

    /// Whether this occupant is bound to a connection.
    pub fn is_viewer(&self) -> bool {
        self.capabilities.has(Capabilities::VIEWER)
    }

    /// Whether this occupant can move between tiles.
    pub fn is_mobile(&self) -> bool {
        matches!(self.kind, OccupantKind::Mobile { .. })
    }

    /// Record a state-affecting mutation.
    ///
    /// Returns the new counter value so callers can stamp outgoing
    /// packets with it.
    pub fn touch(&mut self) -> UpdateCounter {
        self.update_counter.bump()
    }
}
