//! A realm: one independently ticking world shard.
//!
//! All mutation funnels through deferred queues and is applied in a
//! fixed phase order inside [`Realm::tick`], which runs on exactly
//! one thread per realm. Connection handlers and workers only enqueue;
//! they never touch occupant state directly. That single rule is what
//! lets reads (position lookups, visibility queries) stay lock-cheap
//! and the tick itself stay deterministic for a given queue content.
//!
//! Phase order per tick:
//!
//! 1. additions: new occupants enter the arena, index, and tracker
//! 2. moves: queued client move requests
//! 3. behaviors: [`Behavior::tick`] for occupants in viewer-visible
//!    chunks, then neighbor notifications for every settled move
//! 4. removals: occupants leave intact (realm transfer, disconnect)
//! 5. destructions: occupants cease to exist
//! 6. general tasks: arbitrary deferred closures
//! 7. generation: up to [`GENERATION_BUDGET`] chunks

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use indexmap::{IndexMap, IndexSet};
use log::warn;

use loam_core::{
    Behavior, ChunkPosition, ChunkRange, ContentKey, NotFoundError, Occupant, OccupantId,
    Position, RealmId, TickId, UpdateCounter,
};

use crate::chunk_index::ChunkIndex;
use crate::content::{ContentError, ContentRegistry};
use crate::generation::{
    ChunkGenerator, GeneratedChunk, GenerationPipeline, RequestOutcome, GENERATION_BUDGET,
};
use crate::persist::{NullPersistence, Persistence, RealmSnapshot};
use crate::queue::DeferredQueue;
use crate::visibility::{VisibilityEvent, VisibilityTracker};

/// A deferred task run in the general phase of the tick.
pub type RealmTask = Box<dyn FnOnce(&Realm) + Send>;

/// Static configuration for a realm.
pub struct RealmConfig {
    /// The realm's identity.
    pub id: RealmId,
    /// Terrain generator.
    pub generator: Arc<dyn ChunkGenerator>,
    /// Spawnable content types.
    pub content: Arc<ContentRegistry>,
}

/// An occupant's chunk-level move, reported so the network layer can
/// fan out position updates.
#[derive(Clone, Debug)]
pub struct MovedOccupant {
    /// Who moved.
    pub id: OccupantId,
    /// Position before the move.
    pub from: Position,
    /// Position after the move.
    pub to: Position,
    /// Counter value stamped by the move.
    pub update_counter: UpdateCounter,
    /// Viewers that currently see the mover.
    pub viewers: Vec<OccupantId>,
}

/// A destroyed occupant and the viewers that knew about it.
#[derive(Clone, Debug)]
pub struct DestroyedOccupant {
    /// Who was destroyed.
    pub id: OccupantId,
    /// Viewers to notify.
    pub viewers: Vec<OccupantId>,
}

/// Everything observable that one tick produced.
#[derive(Debug, Default)]
pub struct TickReport {
    /// The realm that ticked.
    pub realm: RealmId,
    /// The tick that just completed.
    pub tick: TickId,
    /// New visibility edges involving viewers.
    pub events: Vec<VisibilityEvent>,
    /// Position changes.
    pub moved: Vec<MovedOccupant>,
    /// Chunk tiles to deliver, with their requesters. Covers chunks
    /// generated this tick and already generated chunks a viewer just
    /// walked into.
    pub generated: Vec<GeneratedChunk>,
    /// Occupants removed intact, available for transfer elsewhere.
    pub removed: Vec<Occupant>,
    /// Occupants destroyed.
    pub destroyed: Vec<DestroyedOccupant>,
}

struct Slot {
    occupant: Occupant,
    behavior: Arc<dyn Behavior>,
}

/// One world shard.
pub struct Realm {
    id: RealmId,
    content: Arc<ContentRegistry>,
    /// ID arena: Slots are owned here and referred to everywhere else
    /// by `OccupantId` only.
    occupants: RwLock<IndexMap<OccupantId, Slot>>,
    index: ChunkIndex,
    visibility: VisibilityTracker,
    pipeline: GenerationPipeline,
    persistence: Arc<dyn Persistence>,
    tick: AtomicU64,

    /// Occupants with the viewer capability.
    viewers: RwLock<IndexSet<OccupantId>>,
    /// Union of every viewer's visibility box. Behaviors only tick
    /// inside it.
    visible_chunks: RwLock<IndexSet<ChunkPosition>>,

    additions: DeferredQueue<(Occupant, Arc<dyn Behavior>)>,
    moves: DeferredQueue<(OccupantId, Position)>,
    removals: DeferredQueue<OccupantId>,
    destructions: DeferredQueue<OccupantId>,
    general: DeferredQueue<RealmTask>,
}

impl fmt::Debug for Realm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Realm")
            .field("id", &self.id)
            .field("occupants", &self.occupants.read().unwrap().len())
            .field("tick", &self.tick.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl Realm {
    /// An ephemeral realm with no occupants or terrain; removed and
    /// destroyed occupants leave no durable trace.
    pub fn new(config: RealmConfig) -> Self {
        Self::with_persistence(config, Arc::new(NullPersistence))
    }

    /// A realm backed by `persistence`: removals write the occupant,
    /// destructions delete it.
    pub fn with_persistence(config: RealmConfig, persistence: Arc<dyn Persistence>) -> Self {
        Self {
            id: config.id,
            content: config.content,
            occupants: RwLock::new(IndexMap::new()),
            index: ChunkIndex::new(),
            visibility: VisibilityTracker::new(),
            pipeline: GenerationPipeline::new(config.id, config.generator),
            persistence,
            tick: AtomicU64::new(0),
            viewers: RwLock::new(IndexSet::new()),
            visible_chunks: RwLock::new(IndexSet::new()),
            additions: DeferredQueue::new(),
            moves: DeferredQueue::new(),
            removals: DeferredQueue::new(),
            destructions: DeferredQueue::new(),
            general: DeferredQueue::new(),
        }
    }

    /// The realm's identity.
    pub fn id(&self) -> RealmId {
        self.id
    }

    /// The last completed tick.
    pub fn tick_id(&self) -> TickId {
        TickId(self.tick.load(Ordering::Acquire))
    }

    // ── Queueing (callable from any thread) ──────────────────────────

    /// Queue a prebuilt occupant for insertion next tick.
    pub fn queue_add(&self, occupant: Occupant, behavior: Arc<dyn Behavior>) {
        self.additions.push((occupant, behavior));
    }

    /// Spawn a registered content type at `position` next tick.
    ///
    /// # Errors
    ///
    /// Returns [`ContentError::UnknownKey`] for unregistered keys.
    pub fn queue_spawn(
        &self,
        key: &ContentKey,
        position: Position,
    ) -> Result<OccupantId, ContentError> {
        let (occupant, behavior) = self.content.spawn(key, self.id, position)?;
        let id = occupant.id;
        self.queue_add(occupant, behavior);
        Ok(id)
    }

    /// Queue a persisted occupant for readmission, keeping its
    /// identity and rebuilding its behavior from the content
    /// registry.
    ///
    /// # Errors
    ///
    /// Returns [`ContentError::UnknownKey`] if the occupant's content
    /// type is no longer registered.
    pub fn queue_readmit(&self, occupant: Occupant) -> Result<OccupantId, ContentError> {
        let (_, behavior) = self
            .content
            .spawn(&occupant.content_key, self.id, occupant.position)?;
        let id = occupant.id;
        self.queue_add(occupant, behavior);
        Ok(id)
    }

    /// Queue a move to an absolute position.
    pub fn queue_move(&self, id: OccupantId, to: Position) {
        self.moves.push((id, to));
    }

    /// Queue removal; the occupant leaves intact and is returned in
    /// the tick report.
    pub fn queue_remove(&self, id: OccupantId) {
        self.removals.push(id);
    }

    /// Queue destruction.
    pub fn queue_destroy(&self, id: OccupantId) {
        self.destructions.push(id);
    }

    /// Run a task in the general phase of the next tick.
    pub fn defer(&self, task: impl FnOnce(&Realm) + Send + 'static) {
        self.general.push(Box::new(task));
    }

    /// Request a chunk, attributing it to `requester` when a client
    /// asked for it.
    pub fn request_chunk(
        &self,
        chunk: ChunkPosition,
        requester: Option<OccupantId>,
    ) -> RequestOutcome {
        self.pipeline.request(chunk, requester)
    }

    // ── Reads (callable from any thread) ─────────────────────────────

    /// Snapshot one occupant.
    ///
    /// # Errors
    ///
    /// Returns [`NotFoundError::Occupant`] if absent.
    pub fn occupant(&self, id: OccupantId) -> Result<Occupant, NotFoundError> {
        self.occupants
            .read()
            .unwrap()
            .get(&id)
            .map(|slot| slot.occupant.clone())
            .ok_or(NotFoundError::Occupant(id))
    }

    /// Whether the occupant is present.
    pub fn contains(&self, id: OccupantId) -> bool {
        self.occupants.read().unwrap().contains_key(&id)
    }

    /// Number of occupants.
    pub fn occupant_count(&self) -> usize {
        self.occupants.read().unwrap().len()
    }

    /// The spatial index.
    pub fn index(&self) -> &ChunkIndex {
        &self.index
    }

    /// The visibility tracker.
    pub fn visibility(&self) -> &VisibilityTracker {
        &self.visibility
    }

    /// The generation pipeline.
    pub fn pipeline(&self) -> &GenerationPipeline {
        &self.pipeline
    }

    /// The persistence backend.
    pub fn persistence(&self) -> &Arc<dyn Persistence> {
        &self.persistence
    }

    /// Snapshot of the chunks some viewer can currently see. Empty
    /// whenever the realm has no viewers.
    pub fn visible_chunks(&self) -> Vec<ChunkPosition> {
        self.visible_chunks.read().unwrap().iter().copied().collect()
    }

    // ── Tick (exactly one thread) ────────────────────────────────────

    /// Advance the realm one tick.
    ///
    /// `delta` is the seconds elapsed since the previous tick, passed
    /// through to behaviors.
    pub fn tick(&self, delta: f32) -> TickReport {
        let mut report = TickReport {
            realm: self.id,
            ..TickReport::default()
        };

        // Phase 1: additions. Newly admitted occupants sit out the
        // behavior phase until the next tick.
        let mut admitted: Vec<OccupantId> = Vec::new();
        for (occupant, behavior) in self.additions.steal() {
            admitted.push(occupant.id);
            self.admit(occupant, behavior, &mut report);
        }

        // Phase 2: queued client moves.
        for (id, to) in self.moves.steal() {
            self.apply_move(id, to, &mut report);
        }

        // Phase 3: behaviors, only where some viewer can see. IDs are
        // snapshotted first so behaviors that queue additions or
        // destructions see them next tick.
        let visible = self.visible_chunks.read().unwrap().clone();
        let ids: Vec<OccupantId> = self
            .occupants
            .read()
            .unwrap()
            .iter()
            .filter_map(|(id, slot)| {
                let eligible = !admitted.contains(id)
                    && visible.contains(&slot.occupant.position.chunk());
                eligible.then_some(*id)
            })
            .collect();
        for id in ids {
            self.run_behavior(id, delta, &mut report);
        }

        // Every move settled this tick fans out to the occupants that
        // can see the mover.
        self.notify_neighbors(&report);

        // Phase 4: removals. The occupant leaves intact and its
        // durable copy is written so it can be readmitted later.
        for id in self.removals.steal() {
            if let Some(occupant) = self.evict(id) {
                if let Err(err) = self.persistence.write(&occupant) {
                    warn!("persisting removed occupant {id} failed: {err}");
                }
                report.removed.push(occupant);
            }
        }

        // Phase 5: destructions. Durable state goes with them.
        for id in self.destructions.steal() {
            let viewers = self.visibility.viewers_seeing(id);
            if self.evict(id).is_some() {
                if let Err(err) = self.persistence.delete(id) {
                    warn!("deleting destroyed occupant {id} failed: {err}");
                }
                report.destroyed.push(DestroyedOccupant { id, viewers });
            }
        }

        // Phase 6: general tasks.
        for task in self.general.steal() {
            task(self);
        }

        // Phase 7: one generation slot. Ready chunks reported during
        // admission are already in the list.
        report.generated.extend(self.pipeline.service(GENERATION_BUDGET));

        report.tick = TickId(self.tick.fetch_add(1, Ordering::AcqRel) + 1);
        report
    }

    fn admit(
        &self,
        occupant: Occupant,
        behavior: Arc<dyn Behavior>,
        report: &mut TickReport,
    ) {
        let id = occupant.id;
        let chunk = occupant.position.chunk();
        let is_viewer = occupant.is_viewer();
        self.occupants
            .write()
            .unwrap()
            .insert(id, Slot { occupant, behavior });
        self.index.attach(id, chunk);
        self.visibility.insert(id, chunk, is_viewer);
        let outcome = self.visibility.moved(id, None, chunk, &self.index);
        report.events.extend(outcome.events);
        if is_viewer {
            self.add_viewer(id);
        }
        self.request_entered(id, outcome.entered_chunks, report);
    }

    fn add_viewer(&self, id: OccupantId) {
        self.viewers.write().unwrap().insert(id);
        self.recalculate_visible_chunks();
    }

    fn remove_viewer(&self, id: OccupantId) {
        if self.viewers.write().unwrap().shift_remove(&id) {
            self.recalculate_visible_chunks();
        }
    }

    /// Feed the chunks that entered a viewer's box to the pipeline,
    /// attributed to the viewer so the finished tiles reach its
    /// session. Chunks that already exist are reported straight away.
    fn request_entered(
        &self,
        viewer: OccupantId,
        entered: Vec<ChunkPosition>,
        report: &mut TickReport,
    ) {
        for chunk in entered {
            match self.pipeline.request(chunk, Some(viewer)) {
                RequestOutcome::Ready(data) => report.generated.push(GeneratedChunk {
                    chunk,
                    data,
                    requesters: vec![viewer],
                }),
                RequestOutcome::Pending => {}
            }
        }
    }

    /// Rebuild the union of every viewer's visibility box.
    fn recalculate_visible_chunks(&self) {
        let viewers = self.viewers.read().unwrap();
        let mut chunks = IndexSet::new();
        for id in viewers.iter() {
            if let Some(chunk) = self.visibility.chunk_of(*id) {
                chunks.extend(ChunkRange::visibility(chunk).chunks());
            }
        }
        drop(viewers);
        *self.visible_chunks.write().unwrap() = chunks;
    }

    /// Tell everything that sees a settled mover about its new
    /// position.
    fn notify_neighbors(&self, report: &TickReport) {
        for moved in &report.moved {
            for partner_id in self.visibility.visible_of(moved.id) {
                let mut occupants = self.occupants.write().unwrap();
                let Some(slot) = occupants.get_mut(&partner_id) else {
                    continue;
                };
                let behavior = Arc::clone(&slot.behavior);
                behavior.on_neighbor_updated(&mut slot.occupant, moved.to);
            }
        }
    }

    /// Apply a queued move request.
    fn apply_move(&self, id: OccupantId, to: Position, report: &mut TickReport) {
        let (from, counter) = {
            let mut occupants = self.occupants.write().unwrap();
            let Some(slot) = occupants.get_mut(&id) else {
                warn!("dropping move for absent occupant {id}");
                return;
            };
            if !slot.occupant.is_mobile() {
                warn!("dropping move for fixed occupant {id}");
                return;
            }
            let from = slot.occupant.position;
            slot.occupant.position = to;
            (from, slot.occupant.touch())
        };
        self.settle_move(id, from, to, counter, report);
    }

    /// Run one occupant's behavior in place, settling any resulting
    /// move. Behaviors only see `&mut Occupant`, so holding the arena
    /// lock across the call cannot re-enter the realm.
    fn run_behavior(&self, id: OccupantId, delta: f32, report: &mut TickReport) {
        let (from, to, counter) = {
            let mut occupants = self.occupants.write().unwrap();
            let Some(slot) = occupants.get_mut(&id) else {
                return;
            };
            let behavior = Arc::clone(&slot.behavior);
            let from = slot.occupant.position;
            behavior.tick(&mut slot.occupant, delta);
            let to = slot.occupant.position;
            if from == to {
                return;
            }
            (from, to, slot.occupant.touch())
        };
        self.settle_move(id, from, to, counter, report);
    }

    /// Maintain index and visibility after a position change and
    /// record it in the report.
    fn settle_move(
        &self,
        id: OccupantId,
        from: Position,
        to: Position,
        counter: UpdateCounter,
        report: &mut TickReport,
    ) {
        let old_chunk = from.chunk();
        let new_chunk = to.chunk();
        if old_chunk != new_chunk {
            self.index.detach(id, old_chunk);
            self.index.attach(id, new_chunk);
            let outcome = self.visibility.moved(id, Some(old_chunk), new_chunk, &self.index);
            report.events.extend(outcome.events);
            if self.viewers.read().unwrap().contains(&id) {
                self.recalculate_visible_chunks();
            }
            self.request_entered(id, outcome.entered_chunks, report);
        }

        report.moved.push(MovedOccupant {
            id,
            from,
            to,
            update_counter: counter,
            viewers: self.visibility.viewers_seeing(id),
        });
    }

    /// Detach an occupant from every structure and return it.
    fn evict(&self, id: OccupantId) -> Option<Occupant> {
        let slot = self.occupants.write().unwrap().shift_remove(&id)?;
        self.index.detach(id, slot.occupant.position.chunk());
        self.visibility.forget(id);
        self.remove_viewer(id);
        Some(slot.occupant)
    }

    // ── Persistence ──────────────────────────────────────────────────

    /// Snapshot durable state. Taken between ticks.
    pub fn snapshot(&self) -> RealmSnapshot {
        RealmSnapshot {
            realm: self.id,
            tick: self.tick_id(),
            chunks: self
                .pipeline
                .snapshot()
                .into_iter()
                .map(|(chunk, data)| (chunk, (*data).clone()))
                .collect(),
            occupants: self
                .occupants
                .read()
                .unwrap()
                .values()
                .map(|slot| slot.occupant.clone())
                .collect(),
        }
    }

    /// Restore a snapshot into a freshly constructed realm.
    ///
    /// Occupants are re-queued as additions with behaviors rebuilt
    /// from the content registry; unknown keys are logged and skipped.
    pub fn restore(&self, snapshot: RealmSnapshot) {
        self.tick.store(snapshot.tick.0, Ordering::Release);
        for (chunk, data) in snapshot.chunks {
            self.pipeline.install(chunk, data);
        }
        for occupant in snapshot.occupants {
            match self.content.spawn(&occupant.content_key, self.id, occupant.position) {
                Ok((_, behavior)) => self.queue_add(occupant, behavior),
                Err(err) => warn!("skipping occupant {}: {err}", occupant.id),
            }
        }
    }
}
