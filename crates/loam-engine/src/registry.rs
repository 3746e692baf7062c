//! The realm registry: every running realm, by ID.
//!
//! Built at startup and injected wherever realms are resolved:
//! session handlers, the dispatcher, tests. Never global.

use std::sync::{Arc, RwLock};

use indexmap::IndexMap;

use loam_core::{NotFoundError, RealmId};
use loam_world::Realm;

/// Maps realm IDs to running realms.
#[derive(Debug, Default)]
pub struct RealmRegistry {
    realms: RwLock<IndexMap<RealmId, Arc<Realm>>>,
}

impl RealmRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a realm, replacing any previous realm with the same ID.
    pub fn add(&self, realm: Arc<Realm>) {
        self.realms.write().unwrap().insert(realm.id(), realm);
    }

    /// Resolve a realm.
    ///
    /// # Errors
    ///
    /// Returns [`NotFoundError::Realm`] when no realm has the ID.
    pub fn get(&self, id: RealmId) -> Result<Arc<Realm>, NotFoundError> {
        self.realms
            .read()
            .unwrap()
            .get(&id)
            .cloned()
            .ok_or(NotFoundError::Realm(id))
    }

    /// Remove a realm, returning it if present.
    pub fn remove(&self, id: RealmId) -> Option<Arc<Realm>> {
        self.realms.write().unwrap().shift_remove(&id)
    }

    /// Snapshot of every registered realm, in registration order.
    pub fn all(&self) -> Vec<Arc<Realm>> {
        self.realms.read().unwrap().values().cloned().collect()
    }

    /// Number of registered realms.
    pub fn len(&self) -> usize {
        self.realms.read().unwrap().len()
    }

    /// Whether no realms are registered.
    pub fn is_empty(&self) -> bool {
        self.realms.read().unwrap().is_empty()
    }
}
