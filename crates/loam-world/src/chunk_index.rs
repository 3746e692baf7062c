//! Spatial index bucketing occupants by chunk.
//!
//! The index lets simulation and network code answer "what is near X"
//! in O(1): one map lookup yields an independently lockable set of
//! occupant IDs. Buckets are created lazily on attach and discarded
//! when emptied.
//!
//! # Invariant
//!
//! Every live occupant is in exactly one bucket, the bucket of the
//! chunk containing its current position, except momentarily while a
//! move is in flight on the tick thread. A detach that finds nothing
//! to remove means the invariant already broke somewhere else; it is
//! logged loudly, never silently swallowed.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use indexmap::IndexSet;
use log::warn;

use loam_core::{ChunkPosition, ChunkRange, OccupantId};

/// One chunk's occupant set, lockable independently of the index map.
pub type Bucket = Arc<RwLock<IndexSet<OccupantId>>>;

/// Maps chunk coordinates to the occupants located there.
#[derive(Debug, Default)]
pub struct ChunkIndex {
    buckets: RwLock<HashMap<ChunkPosition, Bucket>>,
}

impl ChunkIndex {
    /// An empty index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an occupant into the bucket for `chunk`.
    ///
    /// The bucket is created lazily. Idempotent per bucket: attaching
    /// an already-present occupant changes nothing.
    pub fn attach(&self, id: OccupantId, chunk: ChunkPosition) {
        let mut buckets = self.buckets.write().unwrap();
        let bucket = buckets.entry(chunk).or_default();
        bucket.write().unwrap().insert(id);
    }

    /// Remove an occupant from the bucket for `chunk`.
    ///
    /// Callers pass the occupant's *previous* chunk when the position
    /// has already changed by the time the detach runs. Returns false
    /// when nothing was removed, after logging a contract violation
    /// with whatever bucket the occupant actually turned up in.
    pub fn detach(&self, id: OccupantId, chunk: ChunkPosition) -> bool {
        let mut buckets = self.buckets.write().unwrap();

        let mut removed = false;
        if let Some(bucket) = buckets.get(&chunk) {
            let mut set = bucket.write().unwrap();
            removed = set.shift_remove(&id);
            let now_empty = set.is_empty();
            drop(set);
            if now_empty {
                buckets.remove(&chunk);
            }
        }

        if !removed {
            warn!("couldn't detach occupant {id} from chunk {chunk}: not present");
            for (other_chunk, bucket) in buckets.iter() {
                if bucket.read().unwrap().contains(&id) {
                    warn!("occupant {id} is still present in chunk {other_chunk}");
                }
            }
        }

        removed
    }

    /// The bucket for a chunk, if any occupant is there.
    pub fn bucket(&self, chunk: ChunkPosition) -> Option<Bucket> {
        self.buckets.read().unwrap().get(&chunk).cloned()
    }

    /// Snapshot of the occupants in one chunk.
    pub fn occupants_in(&self, chunk: ChunkPosition) -> Vec<OccupantId> {
        match self.bucket(chunk) {
            Some(bucket) => bucket.read().unwrap().iter().copied().collect(),
            None => Vec::new(),
        }
    }

    /// Snapshot of the occupants in every chunk of a range.
    pub fn occupants_in_range(&self, range: ChunkRange) -> Vec<OccupantId> {
        let mut out = Vec::new();
        for chunk in range.chunks() {
            out.extend(self.occupants_in(chunk));
        }
        out
    }

    /// Whether an occupant is in the bucket for `chunk`.
    pub fn contains(&self, id: OccupantId, chunk: ChunkPosition) -> bool {
        self.bucket(chunk)
            .is_some_and(|bucket| bucket.read().unwrap().contains(&id))
    }

    /// Number of non-empty buckets.
    pub fn bucket_count(&self) -> usize {
        self.buckets.read().unwrap().len()
    }

    /// Every bucket the occupant appears in. Anything other than a
    /// single chunk is an invariant violation; used by tests and the
    /// detach diagnostics.
    pub fn chunks_containing(&self, id: OccupantId) -> Vec<ChunkPosition> {
        let buckets = self.buckets.read().unwrap();
        buckets
            .iter()
            .filter(|(_, bucket)| bucket.read().unwrap().contains(&id))
            .map(|(chunk, _)| *chunk)
            .collect()
    }
}
