//! Threaded dispatch for lookup-table ternary GEMM.
//!
//! BitNet-style models store weights as {-1, 0, 1}. A LUT kernel turns the
//! GEMV into table lookups over precomputed activation sums. This crate
//! decides how those kernel calls get spread over a small multi-core CPU:
//! a persistent pinned thread pool, a per-shape blocking table, and
//! contraction-dimension partitioning with a race-free merge.
//!
//! ## Usage
//!
//! ```
//! use tlgemm::{DispatchConfig, Dispatcher, pack_ternary};
//!
//! let (m, k) = (64, 128);
//! let weights: Vec<i8> = (0..m * k).map(|i| (i % 3) as i8 - 1).collect();
//! let activations: Vec<f32> = (0..k).map(|i| i as f32 / k as f32).collect();
//! let packed = pack_ternary(&weights, m, k).unwrap();
//!
//! let dispatcher = Dispatcher::new(DispatchConfig::default()).unwrap();
//! let mut out = vec![0.0f32; m];
//! dispatcher.mul_mat(m, k, &packed, &activations, 1.0, &mut out).unwrap();
//! ```
//!
//! Shapes in the table with more than two K blocks go parallel:
//!
//! ```
//! use tlgemm::{DispatchPath, Dispatcher, ShapeConfig};
//!
//! let mut dispatcher = Dispatcher::default();
//! dispatcher.shapes_mut().register(ShapeConfig::new(64, 512, 16, 64)).unwrap();
//! assert_eq!(dispatcher.shapes().lookup(64, 512).unwrap().k_blocks(), 8);
//! ```
//!
//! ## What's inside
//!
//! - Fixed-size worker pool with core pinning and a spin barrier
//! - Dynamic tile claiming and static K-block ranges
//! - Cache-line aligned accumulators with a stack fallback
//! - A portable scalar kernel behind the [`LutKernel`] trait

pub mod config;
pub mod dispatch;
pub mod error;
pub mod kernel;
pub mod memory;
pub mod partition;
pub mod progress;
pub mod reference;
pub mod threading;

pub use config::{DispatchConfig, IdleStrategy, PoolConfig, PreprocessConfig, TiledConfig};
pub use dispatch::{DispatchPath, Dispatcher, ShapeConfig, ShapeTable};
pub use error::{Result, TlgemmError};
pub use kernel::{LutKernel, ScalarKernel, lut_len, lut_scale, pack_ternary, packed_len};
pub use reference::naive::qgemm_naive;
pub use threading::ThreadPool;
