//! Deterministic terrain generation and the per-realm pipeline.
//!
//! Chunks are generated lazily, at most [`GENERATION_BUDGET`] per
//! tick, driven by viewer movement and explicit client requests. The
//! pipeline deduplicates concurrent requests for the same chunk: the
//! first request enqueues it, later ones only register additional
//! requesters, and everyone is answered from the single generated
//! copy.
//!
//! Respects the determinism contract: generators derive a ChaCha8 RNG
//! from `realm seed XOR chunk coordinates`, so the same seed always
//! produces the same world regardless of visit order.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::{Arc, Mutex};

use indexmap::{IndexMap, IndexSet};
use rand::prelude::*;
use rand_chacha::ChaCha8Rng;

use loam_core::{ChunkPosition, OccupantId, RealmId, CHUNK_SIZE};

/// Maximum chunks generated per tick per realm.
///
/// Generation runs on the tick thread; bounding it keeps tick latency
/// flat even when a fast-moving viewer uncovers a whole box of
/// ungenerated terrain at once.
pub const GENERATION_BUDGET: usize = 1;

/// Tiles in one chunk (`CHUNK_SIZE`²).
pub const TILES_PER_CHUNK: usize = (CHUNK_SIZE * CHUNK_SIZE) as usize;

/// Identifies a tile type within a realm's tileset.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TileId(pub u16);

impl fmt::Display for TileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tile:{}", self.0)
    }
}

/// The tile grid of one generated chunk, row-major.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChunkData {
    tiles: Vec<TileId>,
}

impl ChunkData {
    /// A chunk filled with one tile.
    pub fn filled(tile: TileId) -> Self {
        Self {
            tiles: vec![tile; TILES_PER_CHUNK],
        }
    }

    /// Build from a row-major tile vector.
    ///
    /// # Panics
    ///
    /// Panics if `tiles` does not hold exactly [`TILES_PER_CHUNK`]
    /// entries.
    pub fn from_tiles(tiles: Vec<TileId>) -> Self {
        assert_eq!(tiles.len(), TILES_PER_CHUNK, "chunk tile count");
        Self { tiles }
    }

    /// Tile at local coordinates, both in `0..CHUNK_SIZE`.
    pub fn tile(&self, row: i64, column: i64) -> TileId {
        assert!((0..CHUNK_SIZE).contains(&row) && (0..CHUNK_SIZE).contains(&column));
        self.tiles[(row * CHUNK_SIZE + column) as usize]
    }

    /// Overwrite one tile.
    pub fn set_tile(&mut self, row: i64, column: i64, tile: TileId) {
        assert!((0..CHUNK_SIZE).contains(&row) && (0..CHUNK_SIZE).contains(&column));
        self.tiles[(row * CHUNK_SIZE + column) as usize] = tile;
    }

    /// Row-major tile slice, for wire serialization.
    pub fn tiles(&self) -> &[TileId] {
        &self.tiles
    }
}

/// Produces the tile grid for a chunk.
///
/// Implementations must be deterministic: the output may depend only
/// on the realm, the chunk position, and the generator's own
/// configuration.
pub trait ChunkGenerator: Send + Sync {
    /// Generate the tiles for `chunk` in `realm`.
    fn generate(&self, realm: RealmId, chunk: ChunkPosition) -> ChunkData;
}

/// Fills every chunk with a single tile. Used as a test double and
/// for void-like realms.
#[derive(Clone, Copy, Debug)]
pub struct FlatGenerator(pub TileId);

impl ChunkGenerator for FlatGenerator {
    fn generate(&self, _realm: RealmId, _chunk: ChunkPosition) -> ChunkData {
        ChunkData::filled(self.0)
    }
}

/// Seeded terrain generator picking tiles from a weighted palette.
///
/// Each chunk gets its own ChaCha8 stream derived from the seed and
/// the chunk coordinates, so chunks can be generated in any order
/// without affecting each other.
#[derive(Clone, Debug)]
pub struct PaletteGenerator {
    seed: u64,
    /// (tile, weight) pairs; weights need not sum to anything.
    palette: Vec<(TileId, u32)>,
    total_weight: u64,
}

impl PaletteGenerator {
    /// Build from a non-empty weighted palette.
    ///
    /// # Panics
    ///
    /// Panics if `palette` is empty or all weights are zero.
    pub fn new(seed: u64, palette: Vec<(TileId, u32)>) -> Self {
        let total_weight: u64 = palette.iter().map(|(_, w)| u64::from(*w)).sum();
        assert!(total_weight > 0, "palette must carry positive weight");
        Self {
            seed,
            palette,
            total_weight,
        }
    }

    fn chunk_rng(&self, realm: RealmId, chunk: ChunkPosition) -> ChaCha8Rng {
        // Spread the coordinates across the seed word so neighboring
        // chunks land in unrelated streams.
        let mix = ((chunk.x as u32 as u64) << 32) | (chunk.y as u32 as u64);
        ChaCha8Rng::seed_from_u64(self.seed ^ (u64::from(realm.0) << 17) ^ mix)
    }
}

impl ChunkGenerator for PaletteGenerator {
    fn generate(&self, realm: RealmId, chunk: ChunkPosition) -> ChunkData {
        let mut rng = self.chunk_rng(realm, chunk);
        let tiles = (0..TILES_PER_CHUNK)
            .map(|_| {
                let mut roll = rng.random_range(0..self.total_weight);
                for (tile, weight) in &self.palette {
                    let weight = u64::from(*weight);
                    if roll < weight {
                        return *tile;
                    }
                    roll -= weight;
                }
                self.palette[self.palette.len() - 1].0
            })
            .collect();
        ChunkData::from_tiles(tiles)
    }
}

/// A chunk the pipeline finished this tick, with everyone waiting on
/// it.
#[derive(Clone, Debug)]
pub struct GeneratedChunk {
    /// Where it belongs.
    pub chunk: ChunkPosition,
    /// The finished tile grid.
    pub data: Arc<ChunkData>,
    /// Occupants whose requests this satisfies.
    pub requesters: Vec<OccupantId>,
}

/// Outcome of a chunk request.
#[derive(Clone, Debug)]
pub enum RequestOutcome {
    /// The chunk already exists; answer the requester immediately.
    Ready(Arc<ChunkData>),
    /// Generation is queued (or already was); the requester will be
    /// included in the eventual [`GeneratedChunk`].
    Pending,
}

#[derive(Debug, Default)]
struct PipelineState {
    generated: IndexMap<ChunkPosition, Arc<ChunkData>>,
    /// Chunks queued or mid-generation. Membership here is what
    /// deduplicates concurrent requests.
    busy: IndexSet<ChunkPosition>,
    queue: VecDeque<ChunkPosition>,
    waiting: HashMap<ChunkPosition, IndexSet<OccupantId>>,
}

/// Lazily generates chunks for one realm.
pub struct GenerationPipeline {
    realm: RealmId,
    generator: Arc<dyn ChunkGenerator>,
    state: Mutex<PipelineState>,
}

impl fmt::Debug for GenerationPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GenerationPipeline")
            .field("realm", &self.realm)
            .finish_non_exhaustive()
    }
}

impl GenerationPipeline {
    /// A pipeline with no generated chunks.
    pub fn new(realm: RealmId, generator: Arc<dyn ChunkGenerator>) -> Self {
        Self {
            realm,
            generator,
            state: Mutex::new(PipelineState::default()),
        }
    }

    /// Request a chunk, recording `requester` for later delivery when
    /// generation is needed.
    ///
    /// Safe to call from any thread; a chunk is never generated
    /// twice no matter how many requests race on it.
    pub fn request(
        &self,
        chunk: ChunkPosition,
        requester: Option<OccupantId>,
    ) -> RequestOutcome {
        let mut state = self.state.lock().unwrap();
        if let Some(data) = state.generated.get(&chunk) {
            return RequestOutcome::Ready(Arc::clone(data));
        }
        if let Some(requester) = requester {
            state.waiting.entry(chunk).or_default().insert(requester);
        }
        if state.busy.insert(chunk) {
            state.queue.push_back(chunk);
        }
        RequestOutcome::Pending
    }

    /// Generate up to `budget` queued chunks. Called once per tick
    /// from the realm's tick thread.
    ///
    /// The generator runs outside the pipeline lock, so concurrent
    /// [`request`] calls are never blocked on terrain math.
    ///
    /// [`request`]: GenerationPipeline::request
    pub fn service(&self, budget: usize) -> Vec<GeneratedChunk> {
        let batch: Vec<ChunkPosition> = {
            let mut state = self.state.lock().unwrap();
            let take = budget.min(state.queue.len());
            state.queue.drain(..take).collect()
        };

        let mut finished = Vec::with_capacity(batch.len());
        for chunk in batch {
            let data = Arc::new(self.generator.generate(self.realm, chunk));
            let mut state = self.state.lock().unwrap();
            state.generated.insert(chunk, Arc::clone(&data));
            state.busy.shift_remove(&chunk);
            let requesters = state
                .waiting
                .remove(&chunk)
                .map(|set| set.into_iter().collect())
                .unwrap_or_default();
            finished.push(GeneratedChunk {
                chunk,
                data,
                requesters,
            });
        }
        finished
    }

    /// Install a prebuilt chunk, e.g. restored from persistence.
    ///
    /// Replaces any generated copy and cancels a pending request so a
    /// later [`service`] cannot regenerate over the installed tiles.
    /// Waiting requesters are dropped; installation happens during
    /// restore, before clients are connected.
    ///
    /// [`service`]: GenerationPipeline::service
    pub fn install(&self, chunk: ChunkPosition, data: ChunkData) {
        let mut state = self.state.lock().unwrap();
        state.generated.insert(chunk, Arc::new(data));
        state.busy.shift_remove(&chunk);
        state.queue.retain(|queued| *queued != chunk);
        state.waiting.remove(&chunk);
    }

    /// The generated chunk, if it exists yet.
    pub fn tiles_for(&self, chunk: ChunkPosition) -> Option<Arc<ChunkData>> {
        self.state.lock().unwrap().generated.get(&chunk).cloned()
    }

    /// Whether `chunk` has been generated.
    pub fn is_generated(&self, chunk: ChunkPosition) -> bool {
        self.state.lock().unwrap().generated.contains_key(&chunk)
    }

    /// Chunks waiting in the queue.
    pub fn queued(&self) -> usize {
        self.state.lock().unwrap().queue.len()
    }

    /// Number of generated chunks.
    pub fn generated_count(&self) -> usize {
        self.state.lock().unwrap().generated.len()
    }

    /// Snapshot of every generated chunk, for persistence.
    pub fn snapshot(&self) -> Vec<(ChunkPosition, Arc<ChunkData>)> {
        self.state
            .lock()
            .unwrap()
            .generated
            .iter()
            .map(|(chunk, data)| (*chunk, Arc::clone(data)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    const GRASS: TileId = TileId(1);
    const STONE: TileId = TileId(2);

    fn pipeline() -> GenerationPipeline {
        GenerationPipeline::new(RealmId(1), Arc::new(FlatGenerator(GRASS)))
    }

    fn chunk(x: i32, y: i32) -> ChunkPosition {
        ChunkPosition::new(x, y)
    }

    #[test]
    fn request_then_service_delivers_to_requester() {
        let pipeline = pipeline();
        let outcome = pipeline.request(chunk(0, 0), Some(OccupantId(7)));
        assert!(matches!(outcome, RequestOutcome::Pending));

        let finished = pipeline.service(GENERATION_BUDGET);
        assert_eq!(finished.len(), 1);
        assert_eq!(finished[0].chunk, chunk(0, 0));
        assert_eq!(finished[0].requesters, vec![OccupantId(7)]);
        assert_eq!(finished[0].data.tile(0, 0), GRASS);
    }

    #[test]
    fn generated_chunk_is_answered_immediately() {
        let pipeline = pipeline();
        pipeline.request(chunk(0, 0), None);
        pipeline.service(1);

        match pipeline.request(chunk(0, 0), Some(OccupantId(7))) {
            RequestOutcome::Ready(data) => assert_eq!(data.tile(3, 3), GRASS),
            RequestOutcome::Pending => panic!("expected a ready chunk"),
        }
        // Nothing re-queued.
        assert_eq!(pipeline.queued(), 0);
    }

    #[test]
    fn duplicate_requests_generate_once() {
        let pipeline = pipeline();
        pipeline.request(chunk(2, 2), Some(OccupantId(1)));
        pipeline.request(chunk(2, 2), Some(OccupantId(2)));
        pipeline.request(chunk(2, 2), Some(OccupantId(1)));

        assert_eq!(pipeline.queued(), 1);
        let finished = pipeline.service(10);
        assert_eq!(finished.len(), 1);
        let mut requesters = finished[0].requesters.clone();
        requesters.sort_unstable();
        assert_eq!(requesters, vec![OccupantId(1), OccupantId(2)]);
        assert_eq!(pipeline.generated_count(), 1);
    }

    #[test]
    fn concurrent_requests_generate_once() {
        use std::thread;

        let pipeline = Arc::new(pipeline());
        let mut handles = Vec::new();
        for id in 1..=8u64 {
            let pipeline = Arc::clone(&pipeline);
            handles.push(thread::spawn(move || {
                for _ in 0..50 {
                    pipeline.request(chunk(5, 5), Some(OccupantId(id)));
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(pipeline.queued(), 1);
        let finished = pipeline.service(10);
        assert_eq!(finished.len(), 1);
        assert_eq!(finished[0].requesters.len(), 8);
    }

    #[test]
    fn budget_bounds_work_per_tick() {
        let pipeline = pipeline();
        for x in 0..5 {
            pipeline.request(chunk(x, 0), None);
        }

        assert_eq!(pipeline.service(GENERATION_BUDGET).len(), 1);
        assert_eq!(pipeline.queued(), 4);
        assert_eq!(pipeline.service(2).len(), 2);
        assert_eq!(pipeline.service(10).len(), 2);
        assert_eq!(pipeline.queued(), 0);
        assert_eq!(pipeline.generated_count(), 5);
    }

    #[test]
    fn install_preempts_generation() {
        let pipeline = pipeline();
        let mut data = ChunkData::filled(STONE);
        data.set_tile(1, 2, GRASS);
        pipeline.install(chunk(0, 0), data);

        match pipeline.request(chunk(0, 0), Some(OccupantId(1))) {
            RequestOutcome::Ready(data) => {
                assert_eq!(data.tile(1, 2), GRASS);
                assert_eq!(data.tile(0, 0), STONE);
            }
            RequestOutcome::Pending => panic!("installed chunk should be ready"),
        }
    }

    #[test]
    fn install_cancels_a_pending_request() {
        let pipeline = pipeline();
        pipeline.request(chunk(0, 0), Some(OccupantId(1)));

        let mut data = ChunkData::filled(STONE);
        data.set_tile(1, 2, GRASS);
        pipeline.install(chunk(0, 0), data);

        // Nothing left to generate, and the installed tiles survive.
        assert_eq!(pipeline.queued(), 0);
        assert!(pipeline.service(10).is_empty());
        let tiles = pipeline.tiles_for(chunk(0, 0)).unwrap();
        assert_eq!(tiles.tile(1, 2), GRASS);
        assert_eq!(tiles.tile(0, 0), STONE);
    }

    #[test]
    fn palette_generator_is_deterministic() {
        let make = || PaletteGenerator::new(42, vec![(GRASS, 3), (STONE, 1)]);
        let a = make().generate(RealmId(1), chunk(3, -2));
        let b = make().generate(RealmId(1), chunk(3, -2));
        assert_eq!(a, b);

        // Different chunks, seeds, and realms diverge.
        let c = make().generate(RealmId(1), chunk(3, -1));
        assert_ne!(a, c);
        let d = PaletteGenerator::new(43, vec![(GRASS, 3), (STONE, 1)])
            .generate(RealmId(1), chunk(3, -2));
        assert_ne!(a, d);
    }

    #[test]
    fn palette_generator_draws_from_the_palette() {
        let generator = PaletteGenerator::new(7, vec![(GRASS, 1), (STONE, 1)]);
        let data = generator.generate(RealmId(1), chunk(0, 0));
        assert!(data.tiles().iter().all(|t| *t == GRASS || *t == STONE));
        // Both tiles should appear in 256 fair draws.
        assert!(data.tiles().contains(&GRASS));
        assert!(data.tiles().contains(&STONE));
    }

    #[test]
    #[should_panic(expected = "chunk tile count")]
    fn chunk_data_rejects_wrong_length() {
        ChunkData::from_tiles(vec![GRASS; 10]);
    }
}
