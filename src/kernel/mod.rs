//! Kernel call interface and the portable reference kernel.
//!
//! The dispatcher never does arithmetic on weights itself. It calls a
//! [`LutKernel`], either once for the whole matrix or once per
//! (row block × contraction block) unit, and only does the final
//! integer-to-float scaling.
//!
//! - `pack`: packed weight layout, activation quantization, LUT build
//! - `scalar`: [`ScalarKernel`], a plain-Rust implementation of the interface

use std::ops::Range;

pub mod pack;
pub mod scalar;

pub use pack::{LUT_ENTRIES, lut_len, lut_scale, pack_ternary, packed_len};
pub use scalar::ScalarKernel;

/// Success status.
pub const STATUS_OK: i32 = 0;
/// Arguments inconsistent with the packed layout.
pub const STATUS_INVALID_ARGS: i32 = -22;
/// Scratch allocation failed.
pub const STATUS_NO_MEMORY: i32 = -12;

/// Narrow call interface to a LUT GEMM implementation.
///
/// Every method returns a status code; `0` is success and anything else is
/// passed to the dispatch caller verbatim. Implementations must be `Sync`
/// because parallel dispatch calls `accumulate_block` from several workers
/// at once, each with its own accumulator slice.
pub trait LutKernel: Sync {
    /// Whole-matrix GEMV: `out[r] = (Σ_k w[r,k] * a[k]) / lut_scale * weight_scale`.
    #[allow(clippy::too_many_arguments)]
    fn qgemm(
        &self,
        m: usize,
        k: usize,
        weights: &[u8],
        lut: &[i16],
        weight_scale: f32,
        lut_scale: f32,
        out: &mut [f32],
    ) -> i32;

    /// Add one block's partial sums into `acc`.
    ///
    /// `weights` and `lut` start at the block's first pair; `pairs` is the
    /// number of K pairs in the block. `rows` selects the output rows and
    /// `acc[i]` receives row `rows.start + i`. `total_rows` is the packed
    /// matrix height, which fixes the weight stride.
    fn accumulate_block(
        &self,
        rows: Range<usize>,
        total_rows: usize,
        pairs: usize,
        weights: &[u8],
        lut: &[i16],
        acc: &mut [i32],
    ) -> i32;

    /// Quantize `activations` with `lut_scale` and write their LUT into `qlut`.
    fn preprocess(&self, activations: &[f32], lut_scale: f32, qlut: &mut [i16]) -> i32;

    fn name(&self) -> &'static str {
        "unnamed"
    }
}

/// `out[i] = acc[i] / lut_scale * weight_scale`.
pub fn scale_accumulator(acc: &[i32], lut_scale: f32, weight_scale: f32, out: &mut [f32]) {
    for (o, &a) in out.iter_mut().zip(acc) {
        *o = a as f32 / lut_scale * weight_scale;
    }
}
