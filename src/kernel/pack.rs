//! Ternary weight packing and LUT construction.
//!
//! Weights are paired along K. A pair `(w0, w1)` of values in {-1, 0, 1}
//! becomes the 4-bit index `(w0 + 1) * 3 + (w1 + 1)`, so only indices 0..=8
//! occur. Packed weights are pair-major with two rows per byte:
//!
//! ```text
//! byte(p, r) = p * (m / 2) + r / 2      low nibble: even r, high nibble: odd r
//! ```
//!
//! A contraction block of `bk` columns is therefore one contiguous run of
//! `bk / 2 * m / 2` bytes, and its LUT one contiguous run of
//! `bk / 2 * LUT_ENTRIES` entries.

use crate::error::{Result, TlgemmError};

/// LUT entries per activation pair (one per 4-bit index).
pub const LUT_ENTRIES: usize = 16;

/// Largest magnitude of a quantized activation.
pub const ACTIVATION_MAX: f32 = 127.0;

/// 4-bit index of a ternary weight pair.
#[inline(always)]
pub fn pair_index(w0: i8, w1: i8) -> u8 {
    ((w0 + 1) * 3 + (w1 + 1)) as u8
}

/// Inverse of [`pair_index`]; `None` for the unused indices 9..16.
pub fn decode_pair(index: u8) -> Option<(i8, i8)> {
    if index > 8 {
        return None;
    }
    Some(((index / 3) as i8 - 1, (index % 3) as i8 - 1))
}

/// Check that an `m × k` matrix fits the packed layout.
pub fn validate_layout(m: usize, k: usize) -> Result<()> {
    if m == 0 || k == 0 {
        return Err(TlgemmError::InvalidShape(format!(
            "{}x{}: dimensions must be > 0",
            m, k
        )));
    }
    if !m.is_multiple_of(2) || !k.is_multiple_of(2) {
        return Err(TlgemmError::InvalidShape(format!(
            "{}x{}: rows and contraction length must be even",
            m, k
        )));
    }
    Ok(())
}

/// Bytes of packed weights for an `m × k` matrix.
pub fn packed_len(m: usize, k: usize) -> usize {
    (k / 2) * (m / 2)
}

/// LUT entries for a contraction length of `k`.
pub fn lut_len(k: usize) -> usize {
    (k / 2) * LUT_ENTRIES
}

/// Pack a row-major `m × k` ternary matrix.
pub fn pack_ternary(weights: &[i8], m: usize, k: usize) -> Result<Vec<u8>> {
    validate_layout(m, k)?;
    TlgemmError::check_len("weights", m * k, weights.len())?;
    let invalid = weights.iter().enumerate().find(|(_, w)| !(-1..=1).contains(*w));
    if let Some((index, &value)) = invalid {
        return Err(TlgemmError::InvalidWeight { index, value });
    }

    let stride = m / 2;
    let mut packed = vec![0u8; packed_len(m, k)];
    for r in 0..m {
        let row = &weights[r * k..(r + 1) * k];
        let shift = (r & 1) * 4;
        for (p, pair) in row.chunks_exact(2).enumerate() {
            packed[p * stride + r / 2] |= pair_index(pair[0], pair[1]) << shift;
        }
    }
    Ok(packed)
}

/// Activation scale `127 / max|x|`; 1.0 when every activation is zero.
pub fn lut_scale(activations: &[f32]) -> f32 {
    let abs_max = activations.iter().fold(0.0f32, |acc, &x| acc.max(x.abs()));
    if abs_max <= f32::EPSILON || !abs_max.is_finite() {
        return 1.0;
    }
    ACTIVATION_MAX / abs_max
}

#[inline(always)]
fn quantize_one(x: f32, scale: f32) -> i8 {
    (x * scale).round().clamp(-ACTIVATION_MAX, ACTIVATION_MAX) as i8
}

/// Quantize activations to `[-127, 127]` with a precomputed scale.
pub fn quantize_activations(activations: &[f32], scale: f32) -> Vec<i8> {
    activations.iter().map(|&x| quantize_one(x, scale)).collect()
}

/// Fill `lut` for the activation pairs in `activations`.
///
/// `entry[pair_index(w0, w1)] = w0 * a0 + w1 * a1`; unused entries are zero.
pub fn build_lut(activations: &[f32], scale: f32, lut: &mut [i16]) {
    for (pair, table) in activations.chunks_exact(2).zip(lut.chunks_exact_mut(LUT_ENTRIES)) {
        let a0 = quantize_one(pair[0], scale) as i16;
        let a1 = quantize_one(pair[1], scale) as i16;
        table.fill(0);
        for w0 in -1i16..=1 {
            for w1 in -1i16..=1 {
                table[pair_index(w0 as i8, w1 as i8) as usize] = w0 * a0 + w1 * a1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pair_index_covers_nine_codes() {
        let mut seen = Vec::new();
        for w0 in -1..=1 {
            for w1 in -1..=1 {
                let idx = pair_index(w0, w1);
                assert_eq!(decode_pair(idx), Some((w0, w1)));
                seen.push(idx);
            }
        }
        seen.sort();
        assert_eq!(seen, (0..9).collect::<Vec<u8>>());
        assert_eq!(decode_pair(9), None);
        assert_eq!(decode_pair(15), None);
    }

    #[test]
    fn test_pack_layout_two_rows_per_byte() {
        // 2 rows x 4 columns
        let weights = [1, -1, 0, 0, -1, 1, 1, 1];
        let packed = pack_ternary(&weights, 2, 4).unwrap();
        assert_eq!(packed.len(), 2);
        assert_eq!(packed[0] & 0x0f, pair_index(1, -1));
        assert_eq!(packed[0] >> 4, pair_index(-1, 1));
        assert_eq!(packed[1] & 0x0f, pair_index(0, 0));
        assert_eq!(packed[1] >> 4, pair_index(1, 1));
    }

    #[test]
    fn test_pack_rejects_non_ternary() {
        let weights = [0, 2, 0, 0];
        let err = pack_ternary(&weights, 2, 2).unwrap_err();
        assert!(matches!(err, TlgemmError::InvalidWeight { index: 1, value: 2 }));
    }

    #[test]
    fn test_pack_rejects_odd_shapes() {
        assert!(pack_ternary(&[0; 3], 1, 3).is_err());
        assert!(validate_layout(0, 64).is_err());
        assert!(validate_layout(3200, 8640).is_ok());
    }

    #[test]
    fn test_lut_scale() {
        assert_eq!(lut_scale(&[0.5, -2.0, 1.0]), 127.0 / 2.0);
        assert_eq!(lut_scale(&[0.0; 8]), 1.0);
        assert_eq!(lut_scale(&[]), 1.0);
    }

    #[test]
    fn test_quantize_clamps_and_rounds() {
        let q = quantize_activations(&[1.0, -1.0, 0.5, 0.004], 127.0);
        assert_eq!(q, vec![127, -127, 64, 1]);
    }

    #[test]
    fn test_build_lut_entries() {
        let mut lut = vec![-1i16; LUT_ENTRIES];
        build_lut(&[3.0, -5.0], 1.0, &mut lut);
        assert_eq!(lut[pair_index(1, 1) as usize], -2);
        assert_eq!(lut[pair_index(1, -1) as usize], 8);
        assert_eq!(lut[pair_index(-1, 0) as usize], -3);
        assert_eq!(lut[pair_index(0, 0) as usize], 0);
        assert!(lut[9..].iter().all(|&v| v == 0));
    }
}
