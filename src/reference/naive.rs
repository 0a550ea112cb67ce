/// Ternary GEMV without lookup tables.
///
/// Quantizes the activations exactly like the LUT path, then takes plain
/// integer dot products against the unpacked weights. Slow, but every
/// dispatched result can be checked against it.
///
/// # Arguments
///
/// * `weights` - Ternary matrix (m × k), row-major, values in {-1, 0, 1}
/// * `activations` - Float activations (k)
/// * `weight_scale` - Per-tensor weight scale
/// * `out` - Output (m), overwritten
///
/// # Panics
///
/// Panics if the slice sizes don't match m and k.
pub fn qgemm_naive(
    weights: &[i8],
    m: usize,
    k: usize,
    activations: &[f32],
    weight_scale: f32,
    out: &mut [f32],
) {
    assert_eq!(weights.len(), m * k, "weights: expected {}x{}={} elements", m, k, m * k);
    assert_eq!(activations.len(), k, "activations: expected {} elements", k);
    assert_eq!(out.len(), m, "out: expected {} elements", m);

    let scale = crate::kernel::lut_scale(activations);
    let q = crate::kernel::pack::quantize_activations(activations, scale);

    for (i, o) in out.iter_mut().enumerate() {
        let row = &weights[i * k..(i + 1) * k];
        let dot: i32 = row.iter().zip(&q).map(|(&w, &a)| w as i32 * a as i32).sum();
        *o = dot as f32 / scale * weight_scale;
    }
}
