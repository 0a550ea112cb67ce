//! GEMM dispatch.
//!
//! - `shapes`: per-shape blocking table with an unsupported-shape fallback
//! - `dispatcher`: [`Dispatcher`], which owns the pool and routes each call
//!   to the single-threaded kernel or a parallel fan-out

pub mod dispatcher;
pub mod shapes;

pub use dispatcher::{DispatchPath, Dispatcher, MAX_TILE_ROWS, tile_size_for};
pub use shapes::{BITNET_SHAPES, ShapeConfig, ShapeTable};
