//! Tile positions, chunk coordinates, and the visibility box test.
//!
//! A chunk is a fixed [`CHUNK_SIZE`]×[`CHUNK_SIZE`] square of tiles.
//! Chunk coordinates are the floor division of tile coordinates by
//! the chunk size, so tile (-1, -1) lands in chunk (-1, -1), not
//! (0, 0).

use smallvec::SmallVec;
use std::fmt;

/// Tiles per chunk axis.
pub const CHUNK_SIZE: i64 = 16;

/// Edge length, in chunks, of the square visibility box centered on
/// an observer's chunk. Must be odd so the box has a center.
pub const VISIBILITY_DIAMETER: i32 = 5;

/// A tile position: signed, unbounded row/column coordinates.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Position {
    /// Row (y axis, increasing downward).
    pub row: i64,
    /// Column (x axis, increasing rightward).
    pub column: i64,
}

impl Position {
    /// Construct a position from row and column.
    pub fn new(row: i64, column: i64) -> Self {
        Self { row, column }
    }

    /// The chunk containing this tile.
    ///
    /// Uses euclidean (floor) division so negative coordinates map to
    /// negative chunks without straddling zero.
    pub fn chunk(&self) -> ChunkPosition {
        ChunkPosition {
            x: self.column.div_euclid(CHUNK_SIZE) as i32,
            y: self.row.div_euclid(CHUNK_SIZE) as i32,
        }
    }

    /// Taxicab distance to another position.
    pub fn taxi_distance(&self, other: Position) -> u64 {
        self.row.abs_diff(other.row) + self.column.abs_diff(other.column)
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.row, self.column)
    }
}

/// A chunk coordinate.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChunkPosition {
    /// Chunk x (column axis).
    pub x: i32,
    /// Chunk y (row axis).
    pub y: i32,
}

impl ChunkPosition {
    /// Construct a chunk coordinate.
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    /// Tile position of this chunk's top-left corner.
    pub fn top_left_tile(&self) -> Position {
        Position {
            row: i64::from(self.y) * CHUNK_SIZE,
            column: i64::from(self.x) * CHUNK_SIZE,
        }
    }
}

impl fmt::Display for ChunkPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.x, self.y)
    }
}

/// Whether two chunks are mutually within the visibility box.
///
/// A Chebyshev box test, not euclidean: both axis distances must be
/// at most `VISIBILITY_DIAMETER / 2`. Symmetric by construction.
pub fn can_see(a: ChunkPosition, b: ChunkPosition) -> bool {
    let radius = VISIBILITY_DIAMETER / 2;
    (a.x - b.x).abs() <= radius && (a.y - b.y).abs() <= radius
}

/// An inclusive rectangular range of chunks.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ChunkRange {
    /// Minimum corner (inclusive).
    pub top_left: ChunkPosition,
    /// Maximum corner (inclusive).
    pub bottom_right: ChunkPosition,
}

impl ChunkRange {
    /// Construct a range from two inclusive corners.
    pub fn new(top_left: ChunkPosition, bottom_right: ChunkPosition) -> Self {
        Self {
            top_left,
            bottom_right,
        }
    }

    /// The [`VISIBILITY_DIAMETER`]² box centered on `center`.
    pub fn visibility(center: ChunkPosition) -> Self {
        let radius = VISIBILITY_DIAMETER / 2;
        Self {
            top_left: ChunkPosition::new(center.x - radius, center.y - radius),
            bottom_right: ChunkPosition::new(center.x + radius, center.y + radius),
        }
    }

    /// Whether the range contains a chunk.
    pub fn contains(&self, chunk: ChunkPosition) -> bool {
        self.top_left.x <= chunk.x
            && chunk.x <= self.bottom_right.x
            && self.top_left.y <= chunk.y
            && chunk.y <= self.bottom_right.y
    }

    /// Number of chunks in the range.
    pub fn chunk_count(&self) -> usize {
        let width = (self.bottom_right.x - self.top_left.x + 1) as usize;
        let height = (self.bottom_right.y - self.top_left.y + 1) as usize;
        width * height
    }

    /// All chunks in the range, row-major.
    ///
    /// Inline storage covers the visibility box without allocating.
    pub fn chunks(&self) -> SmallVec<[ChunkPosition; 32]> {
        let mut out = SmallVec::new();
        for y in self.top_left.y..=self.bottom_right.y {
            for x in self.top_left.x..=self.bottom_right.x {
                out.push(ChunkPosition::new(x, y));
            }
        }
        out
    }
}
