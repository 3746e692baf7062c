//! Collaborator traits supplied by the gameplay layer.

use crate::occupant::Occupant;
use crate::position::Position;

/// Per-occupant gameplay behavior, injected into the tick loop.
///
/// The engine decides *when* occupants update (the behavior phase of
/// a tick, only in chunks some viewer can see, and never on the tick
/// that admitted the occupant); implementations decide *what* an
/// update does. A no-op implementation is valid.
pub trait Behavior: Send + Sync {
    /// Advance one occupant by `dt` seconds.
    ///
    /// Runs on the realm's tick thread with exclusive access to the
    /// occupant. Mutations of *other* occupants must go through the
    /// realm's deferred queues.
    fn tick(&self, occupant: &mut Occupant, dt: f32);

    /// A visible neighbor moved; `neighbor` is its new position.
    ///
    /// Runs after the move settles, with exclusive access to the
    /// occupant. Position writes made here are not settled; move in
    /// [`Behavior::tick`] instead. Default: ignore.
    fn on_neighbor_updated(&self, occupant: &mut Occupant, neighbor: Position) {
        let _ = (occupant, neighbor);
    }
}

/// Behavior that does nothing. Useful for tests and inert fixtures.
#[derive(Clone, Copy, Debug, Default)]
pub struct InertBehavior;

impl Behavior for InertBehavior {
    fn tick(&self, _occupant: &mut Occupant, _dt: f32) {}
}
