//! Mutual-visibility tracking over the chunk index.
//!
//! For every occupant the tracker maintains the set of occupants
//! within its square visibility box (a Chebyshev box of
//! [`loam_core::VISIBILITY_DIAMETER`] chunks), incrementally updated
//! on every chunk-crossing move. Edges are symmetric: "O sees P" and
//! "P sees O" are always written together, under both entries' locks.
//!
//! # Lock ordering
//!
//! Two occupants discovering each other from different tick threads
//! must not deadlock acquiring each other's sets. Every pairwise
//! update locks the entry with the **lower occupant ID first**; the
//! thread that wins establishes both sides of the edge, and the
//! loser's insert becomes an idempotent no-op. The ID order is the
//! deterministic tie-break; nothing else about thread scheduling
//! affects the converged state.

use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockWriteGuard};

use indexmap::IndexSet;
use log::warn;

use loam_core::{can_see, ChunkPosition, ChunkRange, OccupantId};

use crate::chunk_index::ChunkIndex;

/// A notification produced while maintaining visibility edges.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VisibilityEvent {
    /// `occupant` just became visible to `viewer`; the network layer
    /// should serialize the occupant to the viewer's connection.
    NowVisible {
        /// The observing viewer.
        viewer: OccupantId,
        /// The occupant that entered its box.
        occupant: OccupantId,
    },
}

/// Result of one visibility update.
#[derive(Debug, Default)]
pub struct MoveVisibility {
    /// Now-visible notifications for affected viewers.
    pub events: Vec<VisibilityEvent>,
    /// Chunks newly inside the mover's box, when the mover is a
    /// viewer. The realm feeds these to the generation pipeline.
    pub entered_chunks: Vec<ChunkPosition>,
}

/// Per-occupant visibility state.
#[derive(Debug)]
struct Entry {
    chunk: ChunkPosition,
    is_viewer: bool,
    /// Occupants inside this occupant's box.
    visible: IndexSet<OccupantId>,
    /// Subset of `visible` with the viewer capability.
    visible_viewers: IndexSet<OccupantId>,
}

type EntryHandle = Arc<RwLock<Entry>>;

/// Tracks mutual visibility for every occupant of one realm.
#[derive(Debug, Default)]
pub struct VisibilityTracker {
    entries: RwLock<HashMap<OccupantId, EntryHandle>>,
}

/// Lock two entries in occupant-ID order.
///
/// Returns guards in (a, b) argument order regardless of which was
/// locked first.
fn lock_pair<'a>(
    a_id: OccupantId,
    a: &'a EntryHandle,
    b_id: OccupantId,
    b: &'a EntryHandle,
) -> (RwLockWriteGuard<'a, Entry>, RwLockWriteGuard<'a, Entry>) {
    debug_assert_ne!(a_id, b_id);
    if a_id < b_id {
        let guard_a = a.write().unwrap();
        let guard_b = b.write().unwrap();
        (guard_a, guard_b)
    } else {
        let guard_b = b.write().unwrap();
        let guard_a = a.write().unwrap();
        (guard_a, guard_b)
    }
}

impl VisibilityTracker {
    /// An empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an occupant at its starting chunk.
    ///
    /// No edges are computed here; follow with [`moved`] passing
    /// `old_chunk = None`.
    ///
    /// [`moved`]: VisibilityTracker::moved
    pub fn insert(&self, id: OccupantId, chunk: ChunkPosition, is_viewer: bool) {
        let entry = Arc::new(RwLock::new(Entry {
            chunk,
            is_viewer,
            visible: IndexSet::new(),
            visible_viewers: IndexSet::new(),
        }));
        self.entries.write().unwrap().insert(id, entry);
    }

    fn handle(&self, id: OccupantId) -> Option<EntryHandle> {
        self.entries.read().unwrap().get(&id).cloned()
    }

    /// Recompute edges after `id` moved (or first appeared) in chunk
    /// terms.
    ///
    /// Prunes edges that fail the box test from both sides, then
    /// enumerates the chunk-index buckets inside the new box and
    /// inserts edges idempotently. Newly created edges whose far side
    /// is a viewer (and, when `id` is itself a viewer, every newly
    /// visible occupant) yield [`VisibilityEvent::NowVisible`].
    pub fn moved(
        &self,
        id: OccupantId,
        old_chunk: Option<ChunkPosition>,
        new_chunk: ChunkPosition,
        index: &ChunkIndex,
    ) -> MoveVisibility {
        let Some(own) = self.handle(id) else {
            warn!("visibility update for unregistered occupant {id}");
            return MoveVisibility::default();
        };

        let mut out = MoveVisibility::default();

        // Update our chunk and snapshot current edges while holding
        // only our own lock.
        let (is_viewer, previously_visible) = {
            let mut entry = own.write().unwrap();
            entry.chunk = new_chunk;
            (entry.is_viewer, entry.visible.clone())
        };

        // Phase 1: prune edges that no longer satisfy the box test.
        for partner_id in previously_visible {
            let Some(partner) = self.handle(partner_id) else {
                // Partner was destroyed; forget() already cleaned us.
                continue;
            };
            let (mut ours, mut theirs) = lock_pair(id, &own, partner_id, &partner);
            if !can_see(new_chunk, theirs.chunk) {
                ours.visible.shift_remove(&partner_id);
                ours.visible_viewers.shift_remove(&partner_id);
                theirs.visible.shift_remove(&id);
                theirs.visible_viewers.shift_remove(&id);
            }
        }

        // Phase 2: discover occupants inside the new box.
        for chunk in ChunkRange::visibility(new_chunk).chunks() {
            for other_id in index.occupants_in(chunk) {
                if other_id == id {
                    continue;
                }
                let Some(other) = self.handle(other_id) else {
                    warn!("occupant {other_id} is indexed but not visibility-tracked");
                    continue;
                };
                let (mut ours, mut theirs) = lock_pair(id, &own, other_id, &other);
                if !can_see(new_chunk, theirs.chunk) {
                    // Bucket membership lagged behind a concurrent
                    // move; the mover's own update will pick us up.
                    continue;
                }
                let newly = ours.visible.insert(other_id);
                theirs.visible.insert(id);
                if theirs.is_viewer {
                    ours.visible_viewers.insert(other_id);
                }
                if is_viewer {
                    theirs.visible_viewers.insert(id);
                }
                if newly {
                    if theirs.is_viewer {
                        out.events.push(VisibilityEvent::NowVisible {
                            viewer: other_id,
                            occupant: id,
                        });
                    }
                    if is_viewer {
                        out.events.push(VisibilityEvent::NowVisible {
                            viewer: id,
                            occupant: other_id,
                        });
                    }
                }
            }
        }

        // Phase 3: report chunks that entered a viewer's box so the
        // realm can request generation for unknown ones.
        if is_viewer {
            let new_box = ChunkRange::visibility(new_chunk);
            let old_box = old_chunk.map(ChunkRange::visibility);
            for chunk in new_box.chunks() {
                let already = old_box.is_some_and(|range| range.contains(chunk));
                if !already {
                    out.entered_chunks.push(chunk);
                }
            }
        }

        out
    }

    /// Remove an occupant from the tracker and from every partner's
    /// sets. Called on removal and destruction.
    pub fn forget(&self, id: OccupantId) {
        let Some(own) = self.entries.write().unwrap().remove(&id) else {
            return;
        };
        let partners: Vec<OccupantId> =
            own.read().unwrap().visible.iter().copied().collect();
        for partner_id in partners {
            if let Some(partner) = self.handle(partner_id) {
                let mut theirs = partner.write().unwrap();
                theirs.visible.shift_remove(&id);
                theirs.visible_viewers.shift_remove(&id);
            }
        }
    }

    /// Whether the tracked state says `a` sees `b`.
    pub fn sees(&self, a: OccupantId, b: OccupantId) -> bool {
        self.handle(a)
            .is_some_and(|entry| entry.read().unwrap().visible.contains(&b))
    }

    /// Snapshot of everything `id` currently sees.
    pub fn visible_of(&self, id: OccupantId) -> Vec<OccupantId> {
        self.handle(id)
            .map(|entry| entry.read().unwrap().visible.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Snapshot of the viewers that currently see `id`.
    ///
    /// Used to fan out state updates for one occupant to exactly the
    /// connections that may know about it.
    pub fn viewers_seeing(&self, id: OccupantId) -> Vec<OccupantId> {
        self.handle(id)
            .map(|entry| {
                entry
                    .read()
                    .unwrap()
                    .visible_viewers
                    .iter()
                    .copied()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// The chunk the tracker last saw `id` in.
    pub fn chunk_of(&self, id: OccupantId) -> Option<ChunkPosition> {
        self.handle(id).map(|entry| entry.read().unwrap().chunk)
    }

    /// Whether an occupant is registered.
    pub fn is_tracked(&self, id: OccupantId) -> bool {
        self.entries.read().unwrap().contains_key(&id)
    }

    /// Verify tracked state against a from-scratch recomputation.
    ///
    /// For every tracked pair (a, b), the "a sees b" bit must equal
    /// the box test on their current chunks. Returns the offending
    /// pairs; empty means converged. Intended for tests and debug
    /// assertions once all queues are drained.
    pub fn divergent_pairs(&self) -> Vec<(OccupantId, OccupantId)> {
        let entries = self.entries.read().unwrap();
        let snapshot: Vec<(OccupantId, ChunkPosition, Vec<OccupantId>)> = entries
            .iter()
            .map(|(id, entry)| {
                let entry = entry.read().unwrap();
                (*id, entry.chunk, entry.visible.iter().copied().collect())
            })
            .collect();
        drop(entries);

        let chunk_of: HashMap<OccupantId, ChunkPosition> =
            snapshot.iter().map(|(id, chunk, _)| (*id, *chunk)).collect();

        let mut bad = Vec::new();
        for (a, a_chunk, visible) in &snapshot {
            for (b, b_chunk) in &chunk_of {
                if a == b {
                    continue;
                }
                let tracked = visible.contains(b);
                let expected = can_see(*a_chunk, *b_chunk);
                if tracked != expected {
                    bad.push((*a, *b));
                }
            }
        }
        bad
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use loam_core::{Position, CHUNK_SIZE};

    /// Register and attach an occupant, then establish its edges.
    fn spawn(
        tracker: &VisibilityTracker,
        index: &ChunkIndex,
        id: u64,
        chunk: ChunkPosition,
        is_viewer: bool,
    ) -> MoveVisibility {
        let id = OccupantId(id);
        index.attach(id, chunk);
        tracker.insert(id, chunk, is_viewer);
        tracker.moved(id, None, chunk, index)
    }

    /// Move an occupant between chunks, keeping the index current.
    fn hop(
        tracker: &VisibilityTracker,
        index: &ChunkIndex,
        id: u64,
        from: ChunkPosition,
        to: ChunkPosition,
    ) -> MoveVisibility {
        let id = OccupantId(id);
        index.detach(id, from);
        index.attach(id, to);
        tracker.moved(id, Some(from), to, index)
    }

    fn chunk(x: i32, y: i32) -> ChunkPosition {
        ChunkPosition::new(x, y)
    }

    #[test]
    fn spawned_neighbors_see_each_other() {
        let tracker = VisibilityTracker::new();
        let index = ChunkIndex::new();
        spawn(&tracker, &index, 1, chunk(0, 0), false);
        spawn(&tracker, &index, 2, chunk(1, 1), false);

        assert!(tracker.sees(OccupantId(1), OccupantId(2)));
        assert!(tracker.sees(OccupantId(2), OccupantId(1)));
    }

    #[test]
    fn locality_matches_the_box_test() {
        // With D = 5, radius is 2: chunk (2, 2) is visible from the
        // origin, chunk (3, 3) is not. Tile scale: CHUNK_SIZE = 16.
        let tracker = VisibilityTracker::new();
        let index = ChunkIndex::new();

        let near = Position::new(2 * CHUNK_SIZE, 2 * CHUNK_SIZE).chunk();
        let far = Position::new(3 * CHUNK_SIZE, 3 * CHUNK_SIZE).chunk();
        assert_eq!(near, chunk(2, 2));
        assert_eq!(far, chunk(3, 3));

        spawn(&tracker, &index, 1, chunk(0, 0), true);
        spawn(&tracker, &index, 2, near, false);
        spawn(&tracker, &index, 3, far, false);

        assert!(tracker.sees(OccupantId(1), OccupantId(2)));
        assert!(!tracker.sees(OccupantId(1), OccupantId(3)));
    }

    #[test]
    fn crossing_out_of_range_prunes_both_sides() {
        let tracker = VisibilityTracker::new();
        let index = ChunkIndex::new();
        spawn(&tracker, &index, 1, chunk(0, 0), false);
        spawn(&tracker, &index, 2, chunk(1, 0), false);
        assert!(tracker.sees(OccupantId(1), OccupantId(2)));

        hop(&tracker, &index, 2, chunk(1, 0), chunk(10, 0));
        assert!(!tracker.sees(OccupantId(1), OccupantId(2)));
        assert!(!tracker.sees(OccupantId(2), OccupantId(1)));
    }

    #[test]
    fn viewer_edge_creation_emits_now_visible() {
        let tracker = VisibilityTracker::new();
        let index = ChunkIndex::new();
        spawn(&tracker, &index, 1, chunk(0, 0), true);

        let outcome = spawn(&tracker, &index, 2, chunk(1, 0), false);
        assert!(outcome.events.contains(&VisibilityEvent::NowVisible {
            viewer: OccupantId(1),
            occupant: OccupantId(2),
        }));
        // The non-viewer side produces no notification.
        assert_eq!(outcome.events.len(), 1);
    }

    #[test]
    fn mutual_viewers_notify_both_ways() {
        let tracker = VisibilityTracker::new();
        let index = ChunkIndex::new();
        spawn(&tracker, &index, 1, chunk(0, 0), true);
        let outcome = spawn(&tracker, &index, 2, chunk(0, 1), true);

        assert!(outcome.events.contains(&VisibilityEvent::NowVisible {
            viewer: OccupantId(1),
            occupant: OccupantId(2),
        }));
        assert!(outcome.events.contains(&VisibilityEvent::NowVisible {
            viewer: OccupantId(2),
            occupant: OccupantId(1),
        }));
    }

    #[test]
    fn re_entering_range_is_not_a_duplicate_edge() {
        let tracker = VisibilityTracker::new();
        let index = ChunkIndex::new();
        spawn(&tracker, &index, 1, chunk(0, 0), true);
        spawn(&tracker, &index, 2, chunk(1, 0), false);

        // Leave and come back: exactly one fresh notification.
        hop(&tracker, &index, 2, chunk(1, 0), chunk(10, 0));
        let outcome = hop(&tracker, &index, 2, chunk(10, 0), chunk(1, 0));
        let fresh: Vec<_> = outcome
            .events
            .iter()
            .filter(|event| {
                matches!(event, VisibilityEvent::NowVisible { viewer, .. }
                    if *viewer == OccupantId(1))
            })
            .collect();
        assert_eq!(fresh.len(), 1);

        // Moving within range afterwards is silent.
        let outcome = hop(&tracker, &index, 2, chunk(1, 0), chunk(0, 1));
        assert!(outcome.events.is_empty());
    }

    #[test]
    fn viewer_reports_entered_chunks() {
        let tracker = VisibilityTracker::new();
        let index = ChunkIndex::new();
        let outcome = spawn(&tracker, &index, 1, chunk(0, 0), true);
        // First placement: the whole box is new.
        assert_eq!(outcome.entered_chunks.len(), 25);

        // One-chunk step east: one new column of 5 chunks.
        let outcome = hop(&tracker, &index, 1, chunk(0, 0), chunk(1, 0));
        assert_eq!(outcome.entered_chunks.len(), 5);
        assert!(outcome.entered_chunks.iter().all(|c| c.x == 3));
    }

    #[test]
    fn non_viewer_reports_no_chunks() {
        let tracker = VisibilityTracker::new();
        let index = ChunkIndex::new();
        let outcome = spawn(&tracker, &index, 1, chunk(0, 0), false);
        assert!(outcome.entered_chunks.is_empty());
    }

    #[test]
    fn forget_cleans_every_partner() {
        let tracker = VisibilityTracker::new();
        let index = ChunkIndex::new();
        spawn(&tracker, &index, 1, chunk(0, 0), true);
        spawn(&tracker, &index, 2, chunk(1, 0), false);
        spawn(&tracker, &index, 3, chunk(0, 1), false);

        index.detach(OccupantId(2), chunk(1, 0));
        tracker.forget(OccupantId(2));

        assert!(!tracker.is_tracked(OccupantId(2)));
        assert!(!tracker.sees(OccupantId(1), OccupantId(2)));
        assert!(!tracker.sees(OccupantId(3), OccupantId(2)));
        assert!(tracker.sees(OccupantId(1), OccupantId(3)));
        assert!(tracker.divergent_pairs().is_empty());
    }

    #[test]
    fn viewers_seeing_tracks_the_viewer_subset() {
        let tracker = VisibilityTracker::new();
        let index = ChunkIndex::new();
        spawn(&tracker, &index, 1, chunk(0, 0), true);
        spawn(&tracker, &index, 2, chunk(0, 0), false);
        spawn(&tracker, &index, 3, chunk(1, 1), true);

        let mut viewers = tracker.viewers_seeing(OccupantId(2));
        viewers.sort_unstable();
        assert_eq!(viewers, vec![OccupantId(1), OccupantId(3)]);
        assert!(tracker.viewers_seeing(OccupantId(1)).contains(&OccupantId(3)));
    }

    #[test]
    fn converges_under_many_moves() {
        let tracker = VisibilityTracker::new();
        let index = ChunkIndex::new();
        for id in 1..=8u64 {
            spawn(&tracker, &index, id, chunk(0, 0), id % 3 == 0);
        }

        // Deterministic pseudo-random walk over a 7x7 chunk area.
        let mut state = 0x2545_F491_4F6C_DD1Du64;
        let mut positions: Vec<ChunkPosition> = vec![chunk(0, 0); 8];
        for step in 0..200 {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            let mover = (step % 8) as usize;
            let to = chunk((state % 7) as i32 - 3, ((state >> 8) % 7) as i32 - 3);
            let from = positions[mover];
            positions[mover] = to;
            hop(&tracker, &index, mover as u64 + 1, from, to);
        }

        assert!(
            tracker.divergent_pairs().is_empty(),
            "tracked visibility diverged from the box test"
        );
    }

    #[test]
    fn concurrent_mutual_discovery_does_not_deadlock() {
        use std::sync::Arc;
        use std::thread;

        let tracker = Arc::new(VisibilityTracker::new());
        let index = Arc::new(ChunkIndex::new());

        // Two occupants repeatedly hopping into and out of range of
        // each other from different threads. Ordered pair locking
        // must keep this deadlock-free and convergent.
        for id in [1u64, 2] {
            index.attach(OccupantId(id), chunk(0, 0));
            tracker.insert(OccupantId(id), chunk(0, 0), false);
            tracker.moved(OccupantId(id), None, chunk(0, 0), &index);
        }

        let mut handles = Vec::new();
        for id in [1u64, 2] {
            let tracker = Arc::clone(&tracker);
            let index = Arc::clone(&index);
            handles.push(thread::spawn(move || {
                let mut at = chunk(0, 0);
                for round in 0..101 {
                    let to = if round % 2 == 0 {
                        chunk(10 * id as i32, 0)
                    } else {
                        chunk(0, 0)
                    };
                    index.detach(OccupantId(id), at);
                    index.attach(OccupantId(id), to);
                    tracker.moved(OccupantId(id), Some(at), to, &index);
                    at = to;
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        // Both ended far apart; the edge must be gone from each side.
        assert!(!tracker.sees(OccupantId(1), OccupantId(2)));
        assert!(!tracker.sees(OccupantId(2), OccupantId(1)));
        assert!(tracker.divergent_pairs().is_empty());
    }
}
