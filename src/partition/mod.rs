//! Iteration-space partitioners.
//!
//! - `tile`: eager 2-D tile grid, claimed dynamically via an atomic counter
//! - `kblock`: static contiguous chunks of contraction blocks and K slices

pub mod kblock;
pub mod tile;

pub use kblock::{BlockRange, chunk_size, k_block_ranges, k_slices};
pub use tile::{Tile, TileDistributor};
