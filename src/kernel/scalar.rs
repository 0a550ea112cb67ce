//! Portable scalar LUT kernel.
//!
//! Reads one 4-bit index per (pair, row), looks it up in the pair's
//! 16-entry table and accumulates in i32. No SIMD, no unsafe. Production
//! builds swap in a vectorized kernel through [`LutKernel`].

use std::ops::Range;

use crate::kernel::pack::{self, LUT_ENTRIES};
use crate::kernel::{LutKernel, STATUS_INVALID_ARGS, STATUS_NO_MEMORY, STATUS_OK, scale_accumulator};
use crate::memory::with_zeroed_accumulator;

#[derive(Debug, Clone, Copy, Default)]
pub struct ScalarKernel;

impl LutKernel for ScalarKernel {
    fn qgemm(
        &self,
        m: usize,
        k: usize,
        weights: &[u8],
        lut: &[i16],
        weight_scale: f32,
        lut_scale: f32,
        out: &mut [f32],
    ) -> i32 {
        if pack::validate_layout(m, k).is_err() || out.len() != m {
            return STATUS_INVALID_ARGS;
        }

        let result = with_zeroed_accumulator(m, |acc| {
            let status = self.accumulate_block(0..m, m, k / 2, weights, lut, acc);
            if status == STATUS_OK {
                scale_accumulator(acc, lut_scale, weight_scale, out);
            }
            status
        });
        result.unwrap_or(STATUS_NO_MEMORY)
    }

    fn accumulate_block(
        &self,
        rows: Range<usize>,
        total_rows: usize,
        pairs: usize,
        weights: &[u8],
        lut: &[i16],
        acc: &mut [i32],
    ) -> i32 {
        let stride = total_rows / 2;
        if !total_rows.is_multiple_of(2)
            || rows.end > total_rows
            || acc.len() != rows.len()
            || weights.len() < pairs * stride
            || lut.len() < pairs * LUT_ENTRIES
        {
            return STATUS_INVALID_ARGS;
        }

        for p in 0..pairs {
            let table = &lut[p * LUT_ENTRIES..(p + 1) * LUT_ENTRIES];
            let column = &weights[p * stride..(p + 1) * stride];
            for (slot, r) in acc.iter_mut().zip(rows.clone()) {
                let index = (column[r >> 1] >> ((r & 1) << 2)) & 0x0f;
                *slot += table[index as usize] as i32;
            }
        }
        STATUS_OK
    }

    fn preprocess(&self, activations: &[f32], lut_scale: f32, qlut: &mut [i16]) -> i32 {
        if !activations.len().is_multiple_of(2) || qlut.len() != pack::lut_len(activations.len()) {
            return STATUS_INVALID_ARGS;
        }
        pack::build_lut(activations, lut_scale, qlut);
        STATUS_OK
    }

    fn name(&self) -> &'static str {
        "scalar-lut"
    }
}
