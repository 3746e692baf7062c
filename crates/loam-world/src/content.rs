//! Content registry: the table of spawnable occupant types.
//!
//! Game content is identified by namespaced string keys such as
//! `base:entity/sheep`. A registry instance is built at startup and
//! injected into every realm that needs it; nothing here is global,
//! so tests can build small registries with exactly the content they
//! exercise.

use std::error::Error;
use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;

use loam_core::{Behavior, Capabilities, ContentKey, Occupant, OccupantId, Position, RealmId};

/// Builds the behavior instance attached to a freshly spawned
/// occupant.
pub type SpawnFactory = fn() -> Arc<dyn Behavior>;

/// Errors from registry operations.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ContentError {
    /// The key was registered twice.
    DuplicateKey {
        /// The offending key.
        key: ContentKey,
    },
    /// No entry exists for the key.
    UnknownKey {
        /// The missing key.
        key: ContentKey,
    },
}

impl fmt::Display for ContentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DuplicateKey { key } => {
                write!(f, "content key {key} is already registered")
            }
            Self::UnknownKey { key } => write!(f, "unknown content key {key}"),
        }
    }
}

impl Error for ContentError {}

/// Whether spawned occupants of a type can move between tiles.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Mobility {
    /// Spawns as [`loam_core::OccupantKind::Mobile`].
    Mobile,
    /// Spawns as [`loam_core::OccupantKind::Fixed`].
    Fixed,
}

/// One registered occupant type.
#[derive(Clone)]
pub struct ContentEntry {
    mobility: Mobility,
    capabilities: Capabilities,
    factory: SpawnFactory,
}

impl fmt::Debug for ContentEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContentEntry")
            .field("mobility", &self.mobility)
            .field("capabilities", &self.capabilities)
            .finish_non_exhaustive()
    }
}

/// Maps content keys to spawn recipes.
///
/// Registration happens once during startup, before the registry is
/// shared; lookups afterwards are read-only.
#[derive(Debug, Default)]
pub struct ContentRegistry {
    entries: IndexMap<ContentKey, ContentEntry>,
}

impl ContentRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a spawnable type.
    ///
    /// # Errors
    ///
    /// Returns [`ContentError::DuplicateKey`] if the key is taken.
    pub fn register(
        &mut self,
        key: ContentKey,
        mobility: Mobility,
        capabilities: Capabilities,
        factory: SpawnFactory,
    ) -> Result<(), ContentError> {
        if self.entries.contains_key(&key) {
            return Err(ContentError::DuplicateKey { key });
        }
        self.entries.insert(
            key,
            ContentEntry {
                mobility,
                capabilities,
                factory,
            },
        );
        Ok(())
    }

    /// Spawn an occupant of the keyed type.
    ///
    /// # Errors
    ///
    /// Returns [`ContentError::UnknownKey`] for unregistered keys.
    pub fn spawn(
        &self,
        key: &ContentKey,
        realm: RealmId,
        position: Position,
    ) -> Result<(Occupant, Arc<dyn Behavior>), ContentError> {
        let entry = self
            .entries
            .get(key)
            .ok_or_else(|| ContentError::UnknownKey { key: key.clone() })?;
        let id = OccupantId::next();
        let occupant = match entry.mobility {
            Mobility::Mobile => Occupant::mobile(id, realm, position, key.clone()),
            Mobility::Fixed => Occupant::fixed(id, realm, position, key.clone()),
        }
        .with_capabilities(entry.capabilities);
        Ok((occupant, (entry.factory)()))
    }

    /// Capabilities granted to the keyed type.
    pub fn capabilities_of(&self, key: &ContentKey) -> Result<Capabilities, ContentError> {
        self.entries
            .get(key)
            .map(|entry| entry.capabilities)
            .ok_or_else(|| ContentError::UnknownKey { key: key.clone() })
    }

    /// Whether a key is registered.
    pub fn contains(&self, key: &ContentKey) -> bool {
        self.entries.contains_key(key)
    }

    /// Registered keys in registration order.
    pub fn keys(&self) -> impl Iterator<Item = &ContentKey> {
        self.entries.keys()
    }

    /// Number of registered types.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
