//! Core error types shared across the workspace.

use std::error::Error;
use std::fmt;

use crate::id::{OccupantId, RealmId};

/// A typed "not found" condition.
///
/// Raised when a packet or queued operation references a realm or
/// occupant that no longer exists. Handlers must treat this as a
/// dropped no-op: logged, never a crash. The referent may simply have
/// been destroyed between enqueue and apply.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NotFoundError {
    /// The referenced realm is unknown.
    Realm(RealmId),
    /// The referenced occupant is unknown (possibly already destroyed).
    Occupant(OccupantId),
}

impl fmt::Display for NotFoundError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Realm(id) => write!(f, "unknown realm {id}"),
            Self::Occupant(id) => write!(f, "unknown occupant {id}"),
        }
    }
}

impl Error for NotFoundError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_names_the_referent() {
        let err = NotFoundError::Realm(RealmId(3));
        assert_eq!(err.to_string(), "unknown realm 3");
        let err = NotFoundError::Occupant(OccupantId(42));
        assert_eq!(err.to_string(), "unknown occupant 42");
    }
}
