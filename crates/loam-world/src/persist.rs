//! Realm and occupant persistence.
//!
//! Two granularities share one backend. The tick loop periodically
//! snapshots a realm (generated chunks plus occupants) and hands it
//! to a [`Persistence`] backend; individual occupants are also
//! written on removal, deleted on destruction, and read back when a
//! player logs in. The trait is the seam: servers plug in a real
//! store, tests use [`MemoryPersistence`], and throwaway worlds use
//! [`NullPersistence`].

use std::collections::HashMap;
use std::error::Error;
use std::fmt;
use std::sync::Mutex;

use loam_core::{ChunkPosition, Occupant, OccupantId, RealmId, TickId};

use crate::generation::ChunkData;

/// A point-in-time copy of one realm's durable state.
#[derive(Clone, Debug)]
pub struct RealmSnapshot {
    /// The realm this snapshot belongs to.
    pub realm: RealmId,
    /// Tick at which the snapshot was taken.
    pub tick: TickId,
    /// Every generated chunk.
    pub chunks: Vec<(ChunkPosition, ChunkData)>,
    /// Every occupant, with positions and counters as of `tick`.
    pub occupants: Vec<Occupant>,
}

/// Errors from a persistence backend.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PersistError {
    /// The backend could not complete the operation.
    Backend {
        /// Backend-specific description.
        reason: String,
    },
}

impl fmt::Display for PersistError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Backend { reason } => write!(f, "persistence backend failed: {reason}"),
        }
    }
}

impl Error for PersistError {}

/// Stores and restores realm snapshots and individual occupants.
pub trait Persistence: Send + Sync {
    /// Persist a snapshot, replacing any previous one for the realm.
    fn store(&self, snapshot: RealmSnapshot) -> Result<(), PersistError>;

    /// Load the latest snapshot for a realm, if one exists.
    fn load(&self, realm: RealmId) -> Result<Option<RealmSnapshot>, PersistError>;

    /// Persist one occupant, replacing any previous copy.
    ///
    /// Called when an occupant is removed intact, so it can be
    /// readmitted later exactly as it left.
    fn write(&self, occupant: &Occupant) -> Result<(), PersistError>;

    /// Remove one occupant's durable state.
    ///
    /// Called on destruction; a destroyed occupant must not come back
    /// at the next login.
    fn delete(&self, occupant: OccupantId) -> Result<(), PersistError>;

    /// The occupants owned by login `name`, if any were persisted.
    fn read_on_login(&self, name: &str) -> Result<Option<Vec<Occupant>>, PersistError>;
}

/// Keeps everything in memory. The test and single-process backend.
#[derive(Debug, Default)]
pub struct MemoryPersistence {
    snapshots: Mutex<HashMap<RealmId, RealmSnapshot>>,
    occupants: Mutex<HashMap<OccupantId, Occupant>>,
    /// Login name to the occupants it owns.
    logins: Mutex<HashMap<String, Vec<OccupantId>>>,
}

impl MemoryPersistence {
    /// An empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of realms with a stored snapshot.
    pub fn len(&self) -> usize {
        self.snapshots.lock().unwrap().len()
    }

    /// Whether anything has been stored.
    pub fn is_empty(&self) -> bool {
        self.snapshots.lock().unwrap().is_empty()
    }

    /// Record which occupants a login name owns.
    ///
    /// Ownership is not derivable from the occupants themselves, so
    /// the login path registers it explicitly.
    pub fn bind_login(&self, name: impl Into<String>, occupants: Vec<OccupantId>) {
        self.logins.lock().unwrap().insert(name.into(), occupants);
    }
}

impl Persistence for MemoryPersistence {
    fn store(&self, snapshot: RealmSnapshot) -> Result<(), PersistError> {
        self.snapshots
            .lock()
            .unwrap()
            .insert(snapshot.realm, snapshot);
        Ok(())
    }

    fn load(&self, realm: RealmId) -> Result<Option<RealmSnapshot>, PersistError> {
        Ok(self.snapshots.lock().unwrap().get(&realm).cloned())
    }

    fn write(&self, occupant: &Occupant) -> Result<(), PersistError> {
        self.occupants
            .lock()
            .unwrap()
            .insert(occupant.id, occupant.clone());
        Ok(())
    }

    fn delete(&self, occupant: OccupantId) -> Result<(), PersistError> {
        self.occupants.lock().unwrap().remove(&occupant);
        Ok(())
    }

    fn read_on_login(&self, name: &str) -> Result<Option<Vec<Occupant>>, PersistError> {
        let ids = match self.logins.lock().unwrap().get(name) {
            Some(ids) => ids.clone(),
            None => return Ok(None),
        };
        let occupants = self.occupants.lock().unwrap();
        // Deleted occupants drop out of the owned set silently.
        let found: Vec<Occupant> = ids
            .iter()
            .filter_map(|id| occupants.get(id).cloned())
            .collect();
        Ok(if found.is_empty() { None } else { Some(found) })
    }
}

/// Discards everything. For ephemeral realms.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullPersistence;

impl Persistence for NullPersistence {
    fn store(&self, _snapshot: RealmSnapshot) -> Result<(), PersistError> {
        Ok(())
    }

    fn load(&self, _realm: RealmId) -> Result<Option<RealmSnapshot>, PersistError> {
        Ok(None)
    }

    fn write(&self, _occupant: &Occupant) -> Result<(), PersistError> {
        Ok(())
    }

    fn delete(&self, _occupant: OccupantId) -> Result<(), PersistError> {
        Ok(())
    }

    fn read_on_login(&self, _name: &str) -> Result<Option<Vec<Occupant>>, PersistError> {
        Ok(None)
    }
}
