//! 2-D tile grid with lock-free greedy claiming.

use std::sync::atomic::{AtomicUsize, Ordering};

/// Rectangular region `[start_row, end_row) × [start_col, end_col)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Tile {
    pub start_row: usize,
    pub end_row: usize,
    pub start_col: usize,
    pub end_col: usize,
    pub id: usize,
}

impl Tile {
    pub fn rows(&self) -> usize {
        self.end_row - self.start_row
    }

    pub fn cols(&self) -> usize {
        self.end_col - self.start_col
    }
}

/// Precomputed tile grid handed out exactly once per tile.
///
/// Claims come from an atomic counter, so tiles go out in id order but a
/// worker's consecutive claims are not adjacent in general. Workers that
/// finish early simply claim more, which balances uneven tile cost.
pub struct TileDistributor {
    tiles: Vec<Tile>,
    next: AtomicUsize,
    threads: usize,
}

impl TileDistributor {
    /// Build the `ceil(rows/tile) × ceil(cols/tile)` grid, row-major by id.
    ///
    /// The last tile in each dimension is clipped to the matrix bound.
    ///
    /// # Panics
    ///
    /// Panics if `tile_size` is zero.
    pub fn new(rows: usize, cols: usize, tile_size: usize, threads: usize) -> Self {
        assert!(tile_size > 0, "tile_size must be > 0");

        let row_tiles = rows.div_ceil(tile_size);
        let col_tiles = cols.div_ceil(tile_size);
        let mut tiles = Vec::with_capacity(row_tiles * col_tiles);

        for i in 0..row_tiles {
            for j in 0..col_tiles {
                let start_row = i * tile_size;
                let start_col = j * tile_size;
                tiles.push(Tile {
                    start_row,
                    end_row: (start_row + tile_size).min(rows),
                    start_col,
                    end_col: (start_col + tile_size).min(cols),
                    id: i * col_tiles + j,
                });
            }
        }

        Self {
            tiles,
            next: AtomicUsize::new(0),
            threads: threads.max(1),
        }
    }

    /// Claim the next unclaimed tile, or `None` once all are taken.
    pub fn next_tile(&self) -> Option<Tile> {
        let index = self.next.fetch_add(1, Ordering::Relaxed);
        self.tiles.get(index).copied()
    }

    pub fn total_tiles(&self) -> usize {
        self.tiles.len()
    }

    /// Successful claims so far.
    pub fn claimed(&self) -> usize {
        self.next.load(Ordering::Relaxed).min(self.tiles.len())
    }

    pub fn threads(&self) -> usize {
        self.threads
    }

    pub fn tiles(&self) -> &[Tile] {
        &self.tiles
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Mutex;

    #[test]
    fn test_grid_clips_last_tiles() {
        let dist = TileDistributor::new(130, 70, 64, 4);
        assert_eq!(dist.total_tiles(), 3 * 2);

        let last = dist.tiles()[5];
        assert_eq!((last.start_row, last.end_row), (128, 130));
        assert_eq!((last.start_col, last.end_col), (64, 70));
        assert_eq!(last.id, 2 * 2 + 1);
        assert_eq!(last.rows(), 2);
        assert_eq!(last.cols(), 6);
    }

    #[test]
    fn test_single_column_grid() {
        let dist = TileDistributor::new(3200, 1, 128, 4);
        assert_eq!(dist.total_tiles(), 25);
        assert!(dist.tiles().iter().all(|t| t.cols() == 1 && t.rows() == 128));
    }

    #[test]
    fn test_sequential_claims_then_exhaustion() {
        let dist = TileDistributor::new(10, 10, 4, 2);
        let ids: Vec<_> = std::iter::from_fn(|| dist.next_tile()).map(|t| t.id).collect();
        assert_eq!(ids, (0..9).collect::<Vec<_>>());
        assert_eq!(dist.next_tile(), None);
        assert_eq!(dist.next_tile(), None);
        assert_eq!(dist.claimed(), 9);
    }

    #[test]
    fn test_empty_space_has_no_tiles() {
        let dist = TileDistributor::new(0, 16, 8, 4);
        assert_eq!(dist.total_tiles(), 0);
        assert_eq!(dist.next_tile(), None);
    }

    #[test]
    fn test_concurrent_claims_are_exactly_once() {
        let dist = TileDistributor::new(1000, 37, 7, 8);
        let seen = Mutex::new(Vec::new());

        std::thread::scope(|s| {
            for _ in 0..8 {
                s.spawn(|| {
                    let mut mine = Vec::new();
                    while let Some(tile) = dist.next_tile() {
                        mine.push(tile.id);
                    }
                    seen.lock().unwrap().extend(mine);
                });
            }
        });

        let seen = seen.into_inner().unwrap();
        let unique: HashSet<_> = seen.iter().copied().collect();
        assert_eq!(seen.len(), dist.total_tiles());
        assert_eq!(unique.len(), dist.total_tiles());
        assert_eq!(unique, (0..dist.total_tiles()).collect::<HashSet<_>>());
        assert_eq!(dist.next_tile(), None);
    }

    #[test]
    #[should_panic(expected = "tile_size must be > 0")]
    fn test_zero_tile_size_panics() {
        TileDistributor::new(8, 8, 0, 1);
    }
}
