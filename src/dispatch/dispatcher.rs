//! Serial/parallel routing for LUT GEMM calls.

use std::ops::Range;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Mutex, PoisonError};

use once_cell::sync::OnceCell;

use crate::config::DispatchConfig;
use crate::dispatch::shapes::{ShapeConfig, ShapeTable};
use crate::error::{Result, TlgemmError};
use crate::kernel::pack::{lut_len, lut_scale, packed_len, validate_layout};
use crate::kernel::{LutKernel, STATUS_OK, ScalarKernel, scale_accumulator};
use crate::memory::{prefetch_read, prefetch_write, with_zeroed_accumulator};
use crate::partition::{BlockRange, TileDistributor, k_block_ranges, k_slices};
use crate::progress::ProgressTracker;
use crate::threading::{ThreadPool, optimal_thread_count};

/// Largest row tile used by [`Dispatcher::qgemm_tiled`].
pub const MAX_TILE_ROWS: usize = 256;

/// Which execution path a dispatch call took.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchPath {
    /// The kernel ran once on the calling thread; no task was submitted.
    SingleThreaded,
    /// Work was fanned out to the pool.
    Parallel,
}

/// Row tile for the tiled path: 64, 128 above 2048 rows, 256 above 4096.
pub fn tile_size_for(m: usize) -> usize {
    if m > 4096 {
        MAX_TILE_ROWS
    } else if m > 2048 {
        128
    } else {
        64
    }
}

/// Owns the worker pool and decides, per call, how a GEMM is executed.
///
/// The pool is created on the first call that needs it and lives until
/// [`Dispatcher::shutdown`] or drop. Calls on one dispatcher must not
/// overlap; the pool's barrier waits for every task, not just the caller's.
pub struct Dispatcher<K: LutKernel = ScalarKernel> {
    config: DispatchConfig,
    shapes: ShapeTable,
    kernel: K,
    pool: OnceCell<ThreadPool>,
}

impl Default for Dispatcher<ScalarKernel> {
    fn default() -> Self {
        Self {
            config: DispatchConfig::default(),
            shapes: ShapeTable::bitnet_defaults(),
            kernel: ScalarKernel,
            pool: OnceCell::new(),
        }
    }
}

impl Dispatcher<ScalarKernel> {
    /// Dispatcher over the portable kernel and the built-in shapes.
    pub fn new(config: DispatchConfig) -> Result<Self> {
        Self::with_kernel(config, ScalarKernel)
    }
}

impl<K: LutKernel> Dispatcher<K> {
    pub fn with_kernel(config: DispatchConfig, kernel: K) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            shapes: ShapeTable::bitnet_defaults(),
            kernel,
            pool: OnceCell::new(),
        })
    }

    /// Replace the shape table.
    pub fn with_shapes(mut self, shapes: ShapeTable) -> Self {
        self.shapes = shapes;
        self
    }

    pub fn shapes(&self) -> &ShapeTable {
        &self.shapes
    }

    pub fn shapes_mut(&mut self) -> &mut ShapeTable {
        &mut self.shapes
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    pub fn kernel(&self) -> &K {
        &self.kernel
    }

    /// The worker pool, created on first use.
    pub fn pool(&self) -> Result<&ThreadPool> {
        self.pool.get_or_try_init(|| ThreadPool::new(&self.config.pool))
    }

    pub fn is_pool_initialized(&self) -> bool {
        self.pool.get().is_some()
    }

    /// Workers the pool has, or would have once created.
    pub fn thread_count(&self) -> usize {
        match self.pool.get() {
            Some(pool) => pool.thread_count(),
            None => optimal_thread_count(self.config.pool.max_threads),
        }
    }

    /// Stop and join the pool. A later parallel call creates a new one.
    pub fn shutdown(&mut self) {
        if let Some(pool) = self.pool.take() {
            pool.shutdown();
        }
    }

    /// Quantized GEMV: `out[r] = Σ_k w[r,k]·a[k] / lut_scale · weight_scale`.
    ///
    /// Shapes missing from the table, and shapes with no more than
    /// `serial_k_blocks` contraction blocks, run the kernel once on the
    /// calling thread. Everything else is split into contiguous K-block
    /// ranges, one pool task per range. Each task sums into a private
    /// accumulator and merges it into the shared one under a lock, so the
    /// result is bit-identical to the single-threaded one.
    ///
    /// # Arguments
    ///
    /// * `weights` - Packed ternary weights, `packed_len(m, k)` bytes
    /// * `lut` - Activation LUT, `lut_len(k)` entries
    /// * `out` - Output (m), overwritten on success
    ///
    /// # Errors
    ///
    /// Buffer or shape mismatches, an accumulator the stack fallback cannot
    /// hold, a nonzero kernel status (first failure wins), a panicking task,
    /// or pool creation failure.
    #[allow(clippy::too_many_arguments)]
    pub fn qgemm(
        &self,
        m: usize,
        k: usize,
        weights: &[u8],
        lut: &[i16],
        weight_scale: f32,
        lut_scale: f32,
        out: &mut [f32],
    ) -> Result<DispatchPath> {
        check_buffers(m, k, weights, lut, out)?;

        let shape = match self.shapes.lookup(m, k) {
            Some(shape) if !shape.is_serial() => *shape,
            Some(shape) => {
                log::debug!(
                    "qgemm {}x{}: {} k-blocks, single-threaded",
                    m,
                    k,
                    shape.k_blocks()
                );
                self.qgemm_serial(m, k, weights, lut, weight_scale, lut_scale, out)?;
                return Ok(DispatchPath::SingleThreaded);
            }
            None => {
                log::debug!("qgemm {}x{}: unknown shape, single-threaded", m, k);
                self.qgemm_serial(m, k, weights, lut, weight_scale, lut_scale, out)?;
                return Ok(DispatchPath::SingleThreaded);
            }
        };

        let pool = self.pool()?;
        let ranges = k_block_ranges(shape.k_blocks(), pool.thread_count());
        log::debug!(
            "qgemm {}x{}: {} k-blocks over {} tasks",
            m,
            k,
            shape.k_blocks(),
            ranges.len()
        );

        let kernel = &self.kernel;
        let failure = AtomicI32::new(STATUS_OK);
        let alloc_failure: Mutex<Option<TlgemmError>> = Mutex::new(None);
        let progress = ProgressTracker::new("qgemm", shape.k_blocks() * shape.row_blocks());

        with_zeroed_accumulator(m, |acc| -> Result<()> {
            let shared = Mutex::new(acc);
            pool.scope(|s| {
                for &blocks in &ranges {
                    let shared = &shared;
                    let failure = &failure;
                    let alloc_failure = &alloc_failure;
                    let progress = &progress;
                    s.spawn(move || {
                        let result = with_zeroed_accumulator(m, |partial| {
                            let status = accumulate_k_range(
                                kernel, &shape, blocks, weights, lut, partial, progress,
                            );
                            if status == STATUS_OK {
                                let mut acc = shared.lock().unwrap_or_else(PoisonError::into_inner);
                                for (a, p) in acc.iter_mut().zip(partial.iter()) {
                                    *a += *p;
                                }
                            }
                            status
                        });
                        match result {
                            Ok(status) => record_failure(failure, status),
                            Err(err) => {
                                alloc_failure
                                    .lock()
                                    .unwrap_or_else(PoisonError::into_inner)
                                    .get_or_insert(err);
                            }
                        }
                    });
                }
            })?;

            if let Some(err) = alloc_failure.into_inner().unwrap_or_else(PoisonError::into_inner) {
                return Err(err);
            }
            check_status(failure.load(Ordering::SeqCst))?;
            let acc = shared.into_inner().unwrap_or_else(PoisonError::into_inner);
            scale_accumulator(acc, lut_scale, weight_scale, out);
            Ok(())
        })??;

        Ok(DispatchPath::Parallel)
    }

    /// Run the kernel once over the whole matrix on the calling thread.
    ///
    /// The accumulator is allocated here, not in the kernel, so an
    /// allocation the stack fallback cannot cover surfaces as
    /// [`TlgemmError::AccumulatorTooLarge`].
    #[allow(clippy::too_many_arguments)]
    pub fn qgemm_serial(
        &self,
        m: usize,
        k: usize,
        weights: &[u8],
        lut: &[i16],
        weight_scale: f32,
        lut_scale: f32,
        out: &mut [f32],
    ) -> Result<()> {
        check_buffers(m, k, weights, lut, out)?;
        with_zeroed_accumulator(m, |acc| -> Result<()> {
            check_status(self.kernel.accumulate_block(0..m, m, k / 2, weights, lut, acc))?;
            scale_accumulator(acc, lut_scale, weight_scale, out);
            Ok(())
        })?
    }

    /// Row-tiled GEMV with dynamic tile claiming.
    ///
    /// Independent of the shape table. Runs single-threaded when
    /// `m < tiled.min_rows` or `k < tiled.min_k`; otherwise every worker
    /// claims row tiles of [`tile_size_for`]`(m)` rows until none are left,
    /// accumulates a tile in a stack buffer and writes its output rows.
    /// On a kernel failure some rows of `out` may already be written.
    #[allow(clippy::too_many_arguments)]
    pub fn qgemm_tiled(
        &self,
        m: usize,
        k: usize,
        weights: &[u8],
        lut: &[i16],
        weight_scale: f32,
        lut_scale: f32,
        out: &mut [f32],
    ) -> Result<DispatchPath> {
        check_buffers(m, k, weights, lut, out)?;

        let tiled = &self.config.tiled;
        if m < tiled.min_rows || k < tiled.min_k {
            log::debug!("qgemm_tiled {}x{}: below threshold, single-threaded", m, k);
            self.qgemm_serial(m, k, weights, lut, weight_scale, lut_scale, out)?;
            return Ok(DispatchPath::SingleThreaded);
        }

        let pool = self.pool()?;
        let tile_size = tile_size_for(m);
        let distributor = TileDistributor::new(m, 1, tile_size, pool.thread_count());
        log::debug!(
            "qgemm_tiled {}x{}: {} tiles of {} rows",
            m,
            k,
            distributor.total_tiles(),
            tile_size
        );

        // Tile ids are row indices here, so tile i owns chunk i.
        let slots: Vec<Mutex<&mut [f32]>> = out.chunks_mut(tile_size).map(Mutex::new).collect();
        let kernel = &self.kernel;
        let failure = AtomicI32::new(STATUS_OK);
        let progress = ProgressTracker::new("qgemm_tiled", distributor.total_tiles());

        pool.scope(|s| {
            for _ in 0..distributor.threads() {
                let distributor = &distributor;
                let slots = &slots;
                let failure = &failure;
                let progress = &progress;
                s.spawn(move || {
                    let mut partial = [0i32; MAX_TILE_ROWS];
                    while let Some(tile) = distributor.next_tile() {
                        let acc = &mut partial[..tile.rows()];
                        acc.fill(0);
                        let rows = tile.start_row..tile.end_row;
                        let status = kernel.accumulate_block(rows, m, k / 2, weights, lut, acc);
                        if status != STATUS_OK {
                            record_failure(failure, status);
                            continue;
                        }
                        let mut guard =
                            slots[tile.id].lock().unwrap_or_else(PoisonError::into_inner);
                        let dst: &mut [f32] = &mut guard;
                        prefetch_write(&dst[..]);
                        scale_accumulator(acc, lut_scale, weight_scale, dst);
                        progress.mark_completed();
                    }
                });
            }
        })?;

        check_status(failure.load(Ordering::SeqCst))?;
        Ok(DispatchPath::Parallel)
    }

    /// Quantize `activations` and build their LUT into `qlut`.
    ///
    /// The scale is computed once over the whole vector, then K is split
    /// into slices built in parallel when `m >= preprocess.min_rows` and
    /// `k >= preprocess.min_k`. Returns the LUT scale and the path taken.
    pub fn preprocess(
        &self,
        m: usize,
        activations: &[f32],
        qlut: &mut [i16],
    ) -> Result<(f32, DispatchPath)> {
        let k = activations.len();
        validate_layout(m, k)?;
        TlgemmError::check_len("qlut", lut_len(k), qlut.len())?;

        let scale = lut_scale(activations);
        let config = &self.config.preprocess;
        if m < config.min_rows || k < config.min_k {
            check_status(self.kernel.preprocess(activations, scale, qlut))?;
            return Ok((scale, DispatchPath::SingleThreaded));
        }

        let pool = self.pool()?;
        let slices = k_slices(k, pool.thread_count(), config.min_slice, 2);
        if slices.len() <= 1 {
            check_status(self.kernel.preprocess(activations, scale, qlut))?;
            return Ok((scale, DispatchPath::SingleThreaded));
        }

        let chunks = split_lut(qlut, &slices);
        let kernel = &self.kernel;
        let failure = AtomicI32::new(STATUS_OK);

        pool.scope(|s| {
            for (range, chunk) in slices.iter().zip(chunks) {
                let failure = &failure;
                let slice = &activations[range.clone()];
                s.spawn(move || {
                    record_failure(failure, kernel.preprocess(slice, scale, chunk));
                });
            }
        })?;

        check_status(failure.load(Ordering::SeqCst))?;
        Ok((scale, DispatchPath::Parallel))
    }

    /// Preprocess `activations` and run [`Dispatcher::qgemm`] on the result.
    pub fn mul_mat(
        &self,
        m: usize,
        k: usize,
        weights: &[u8],
        activations: &[f32],
        weight_scale: f32,
        out: &mut [f32],
    ) -> Result<DispatchPath> {
        TlgemmError::check_len("activations", k, activations.len())?;
        let mut qlut = vec![0i16; lut_len(k)];
        let (scale, _) = self.preprocess(m, activations, &mut qlut)?;
        self.qgemm(m, k, weights, &qlut, weight_scale, scale, out)
    }
}

fn check_buffers(m: usize, k: usize, weights: &[u8], lut: &[i16], out: &[f32]) -> Result<()> {
    validate_layout(m, k)?;
    TlgemmError::check_len("weights", packed_len(m, k), weights.len())?;
    TlgemmError::check_len("lut", lut_len(k), lut.len())?;
    TlgemmError::check_len("out", m, out.len())
}

fn check_status(status: i32) -> Result<()> {
    if status != STATUS_OK {
        return Err(TlgemmError::Kernel { status });
    }
    Ok(())
}

/// Keep the first nonzero status.
fn record_failure(failure: &AtomicI32, status: i32) {
    if status != STATUS_OK {
        let _ = failure.compare_exchange(STATUS_OK, status, Ordering::SeqCst, Ordering::SeqCst);
    }
}

/// Sum K blocks `blocks` of every row block into `partial` (m slots).
fn accumulate_k_range<K: LutKernel>(
    kernel: &K,
    shape: &ShapeConfig,
    blocks: BlockRange,
    weights: &[u8],
    lut: &[i16],
    partial: &mut [i32],
    progress: &ProgressTracker,
) -> i32 {
    let block_bytes = shape.weight_bytes_per_block();
    let block_entries = shape.lut_entries_per_block();
    let pairs = shape.pairs_per_block();

    for kb in blocks.iter() {
        let block_weights = &weights[kb * block_bytes..(kb + 1) * block_bytes];
        let block_lut = &lut[kb * block_entries..(kb + 1) * block_entries];
        prefetch_read(block_weights);
        prefetch_read(block_lut);

        for row_start in (0..shape.m).step_by(shape.bm) {
            let rows = row_start..(row_start + shape.bm).min(shape.m);
            let status = kernel.accumulate_block(
                rows.clone(),
                shape.m,
                pairs,
                block_weights,
                block_lut,
                &mut partial[rows],
            );
            if status != STATUS_OK {
                return status;
            }
            progress.mark_completed();
        }
    }
    STATUS_OK
}

/// Cut `qlut` into the disjoint chunks backing each K slice.
fn split_lut<'a>(qlut: &'a mut [i16], slices: &[Range<usize>]) -> Vec<&'a mut [i16]> {
    let mut chunks = Vec::with_capacity(slices.len());
    let mut rest = qlut;
    for range in slices {
        let (head, tail) = std::mem::take(&mut rest).split_at_mut(lut_len(range.len()));
        chunks.push(head);
        rest = tail;
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{IdleStrategy, PoolConfig, PreprocessConfig, TiledConfig};
    use crate::kernel::pack::pack_ternary;
    use crate::reference::naive::qgemm_naive;
    use std::sync::atomic::AtomicUsize;

    fn make_case(m: usize, k: usize, seed: u32) -> (Vec<i8>, Vec<f32>) {
        let weights = (0..m * k)
            .map(|i| ((i as u32 ^ seed).wrapping_mul(2654435761) >> 20) as i8 % 2)
            .collect();
        let activations = (0..k)
            .map(|i| (((i as u32).wrapping_mul(seed | 1) % 2000) as f32 / 1000.0) - 1.0)
            .collect();
        (weights, activations)
    }

    fn prepare(m: usize, k: usize, seed: u32) -> (Vec<i8>, Vec<u8>, Vec<f32>, Vec<i16>, f32) {
        let (weights, activations) = make_case(m, k, seed);
        let packed = pack_ternary(&weights, m, k).unwrap();
        let scale = lut_scale(&activations);
        let mut lut = vec![0i16; lut_len(k)];
        crate::kernel::pack::build_lut(&activations, scale, &mut lut);
        (weights, packed, activations, lut, scale)
    }

    fn small_table() -> ShapeTable {
        let mut table = ShapeTable::empty();
        table.register(ShapeConfig::new(64, 256, 16, 32)).unwrap();
        table
    }

    /// Counts block calls and fails on one chosen block.
    struct CountingKernel {
        calls: AtomicUsize,
        fail_rows_start: Option<usize>,
    }

    impl CountingKernel {
        fn new(fail_rows_start: Option<usize>) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                fail_rows_start,
            }
        }
    }

    impl LutKernel for CountingKernel {
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
            ScalarKernel.qgemm(m, k, weights, lut, weight_scale, lut_scale, out)
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
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_rows_start == Some(rows.start) {
                return -5;
            }
            ScalarKernel.accumulate_block(rows, total_rows, pairs, weights, lut, acc)
        }

        fn preprocess(&self, activations: &[f32], lut_scale: f32, qlut: &mut [i16]) -> i32 {
            ScalarKernel.preprocess(activations, lut_scale, qlut)
        }
    }

    #[test]
    fn test_tile_size_for() {
        assert_eq!(tile_size_for(512), 64);
        assert_eq!(tile_size_for(2048), 64);
        assert_eq!(tile_size_for(3200), 128);
        assert_eq!(tile_size_for(8640), 256);
    }

    #[test]
    fn test_parallel_matches_serial_bitwise() {
        let (m, k) = (64, 256);
        let (_, packed, _, lut, scale) = prepare(m, k, 7);
        let dispatcher = Dispatcher::default().with_shapes(small_table());

        let mut serial = vec![0.0f32; m];
        dispatcher.qgemm_serial(m, k, &packed, &lut, 0.25, scale, &mut serial).unwrap();

        let mut parallel = vec![0.0f32; m];
        let path = dispatcher.qgemm(m, k, &packed, &lut, 0.25, scale, &mut parallel).unwrap();

        assert_eq!(path, DispatchPath::Parallel);
        assert_eq!(serial, parallel);
        assert!(dispatcher.is_pool_initialized());
    }

    #[test]
    fn test_parallel_matches_naive() {
        let (m, k) = (64, 256);
        let (weights, packed, activations, lut, scale) = prepare(m, k, 11);
        let dispatcher = Dispatcher::default().with_shapes(small_table());

        let mut expected = vec![0.0f32; m];
        qgemm_naive(&weights, m, k, &activations, 1.5, &mut expected);

        let mut out = vec![0.0f32; m];
        dispatcher.qgemm(m, k, &packed, &lut, 1.5, scale, &mut out).unwrap();

        for i in 0..m {
            assert!(
                (expected[i] - out[i]).abs() < 1e-4,
                "Mismatch at {}: naive={}, dispatched={}",
                i,
                expected[i],
                out[i]
            );
        }
    }

    #[test]
    fn test_every_block_is_visited_once() {
        let (m, k) = (64, 256);
        let (_, packed, _, lut, scale) = prepare(m, k, 3);
        let kernel = CountingKernel::new(None);
        let dispatcher = Dispatcher::with_kernel(DispatchConfig::default(), kernel)
            .unwrap()
            .with_shapes(small_table());

        let mut out = vec![0.0f32; m];
        dispatcher.qgemm(m, k, &packed, &lut, 1.0, scale, &mut out).unwrap();

        // 8 k-blocks × 4 row blocks
        assert_eq!(dispatcher.kernel().calls.load(Ordering::SeqCst), 32);
    }

    #[test]
    fn test_small_shape_stays_single_threaded() {
        let (m, k) = (64, 64);
        let (_, packed, _, lut, scale) = prepare(m, k, 5);
        let mut table = small_table();
        table.register(ShapeConfig::new(m, k, 16, 32)).unwrap();
        let dispatcher = Dispatcher::default().with_shapes(table);

        let mut out = vec![0.0f32; m];
        let path = dispatcher.qgemm(m, k, &packed, &lut, 1.0, scale, &mut out).unwrap();

        assert_eq!(path, DispatchPath::SingleThreaded);
        assert!(!dispatcher.is_pool_initialized());
    }

    #[test]
    fn test_serial_paths_submit_no_tasks_to_live_pool() {
        let (_, big_packed, _, big_lut, big_scale) = prepare(64, 256, 6);
        let (_, packed, _, lut, scale) = prepare(64, 64, 8);
        let mut table = small_table();
        table.register(ShapeConfig::new(64, 64, 16, 32)).unwrap();
        let dispatcher = Dispatcher::default().with_shapes(table);

        let mut out = vec![0.0f32; 64];
        let path = dispatcher
            .qgemm(64, 256, &big_packed, &big_lut, 1.0, big_scale, &mut out)
            .unwrap();
        assert_eq!(path, DispatchPath::Parallel);
        let pool = dispatcher.pool().unwrap();
        let submitted = pool.submitted_tasks();
        assert!(submitted > 0);

        // Registered but below the block threshold
        let path = dispatcher.qgemm(64, 64, &packed, &lut, 1.0, scale, &mut out).unwrap();
        assert_eq!(path, DispatchPath::SingleThreaded);
        assert_eq!(pool.submitted_tasks(), submitted);

        // Not in the table at all
        let (_, packed, _, lut, scale) = prepare(32, 32, 9);
        let mut small_out = vec![0.0f32; 32];
        let path = dispatcher.qgemm(32, 32, &packed, &lut, 1.0, scale, &mut small_out).unwrap();
        assert_eq!(path, DispatchPath::SingleThreaded);
        assert_eq!(pool.submitted_tasks(), submitted);
        assert_eq!(pool.pending_tasks(), 0);
    }

    #[test]
    fn test_unknown_shape_falls_back() {
        let (m, k) = (32, 32);
        let (_, packed, _, lut, scale) = prepare(m, k, 9);
        let dispatcher = Dispatcher::default();

        let mut expected = vec![0.0f32; m];
        ScalarKernel.qgemm(m, k, &packed, &lut, 1.0, scale, &mut expected);

        let mut out = vec![0.0f32; m];
        let path = dispatcher.qgemm(m, k, &packed, &lut, 1.0, scale, &mut out).unwrap();

        assert_eq!(path, DispatchPath::SingleThreaded);
        assert_eq!(out, expected);
        assert!(!dispatcher.is_pool_initialized());
    }

    #[test]
    fn test_kernel_failure_is_propagated() {
        let (m, k) = (64, 256);
        let (_, packed, _, lut, scale) = prepare(m, k, 1);
        let kernel = CountingKernel::new(Some(32));
        let dispatcher = Dispatcher::with_kernel(DispatchConfig::default(), kernel)
            .unwrap()
            .with_shapes(small_table());

        let mut out = vec![0.0f32; m];
        let err = dispatcher.qgemm(m, k, &packed, &lut, 1.0, scale, &mut out).unwrap_err();
        assert_eq!(err.kernel_status(), Some(-5));

        let config = DispatchConfig {
            tiled: TiledConfig { min_rows: 0, min_k: 0 },
            ..DispatchConfig::default()
        };
        let dispatcher = Dispatcher::with_kernel(config, CountingKernel::new(Some(0))).unwrap();
        let err = dispatcher.qgemm_tiled(m, k, &packed, &lut, 1.0, scale, &mut out).unwrap_err();
        assert_eq!(err.kernel_status(), Some(-5));
    }

    #[test]
    fn test_buffer_mismatch_is_rejected() {
        let dispatcher = Dispatcher::default();
        let mut out = vec![0.0f32; 4];
        let err = dispatcher.qgemm(4, 4, &[0; 3], &[0; 32], 1.0, 1.0, &mut out).unwrap_err();
        assert!(err.is_precondition());
        let err = dispatcher.qgemm(3, 4, &[0; 2], &[0; 32], 1.0, 1.0, &mut out).unwrap_err();
        assert!(err.is_precondition());
    }

    #[test]
    fn test_tiled_matches_serial() {
        let (m, k) = (640, 128);
        let (_, packed, _, lut, scale) = prepare(m, k, 21);
        let config = DispatchConfig {
            tiled: TiledConfig { min_rows: 512, min_k: 64 },
            ..DispatchConfig::default()
        };
        let dispatcher = Dispatcher::new(config).unwrap();

        let mut serial = vec![0.0f32; m];
        dispatcher.qgemm_serial(m, k, &packed, &lut, 0.5, scale, &mut serial).unwrap();

        let mut tiled = vec![0.0f32; m];
        let path = dispatcher.qgemm_tiled(m, k, &packed, &lut, 0.5, scale, &mut tiled).unwrap();

        assert_eq!(path, DispatchPath::Parallel);
        assert_eq!(serial, tiled);
    }

    #[test]
    fn test_tiled_below_threshold() {
        let (m, k) = (64, 64);
        let (_, packed, _, lut, scale) = prepare(m, k, 4);
        let dispatcher = Dispatcher::default();
        let mut out = vec![0.0f32; m];
        let path = dispatcher.qgemm_tiled(m, k, &packed, &lut, 1.0, scale, &mut out).unwrap();
        assert_eq!(path, DispatchPath::SingleThreaded);
        assert!(!dispatcher.is_pool_initialized());
    }

    #[test]
    fn test_parallel_preprocess_matches_serial() {
        let k = 1030;
        let (_, activations) = make_case(2, k, 17);
        let config = DispatchConfig {
            preprocess: PreprocessConfig {
                min_rows: 2,
                min_k: 256,
                min_slice: 64,
            },
            ..DispatchConfig::default()
        };
        let dispatcher = Dispatcher::new(config).unwrap();

        let mut expected = vec![0i16; lut_len(k)];
        let scale = lut_scale(&activations);
        ScalarKernel.preprocess(&activations, scale, &mut expected);

        let mut qlut = vec![0i16; lut_len(k)];
        let (got_scale, path) = dispatcher.preprocess(3200, &activations, &mut qlut).unwrap();

        assert_eq!(got_scale, scale);
        assert_eq!(qlut, expected);
        if dispatcher.thread_count() > 1 {
            assert_eq!(path, DispatchPath::Parallel);
        }
    }

    #[test]
    fn test_mul_mat_matches_naive() {
        let (m, k) = (64, 256);
        let (weights, activations) = make_case(m, k, 29);
        let packed = pack_ternary(&weights, m, k).unwrap();
        let dispatcher = Dispatcher::default().with_shapes(small_table());

        let mut expected = vec![0.0f32; m];
        qgemm_naive(&weights, m, k, &activations, 0.75, &mut expected);

        let mut out = vec![0.0f32; m];
        let path = dispatcher.mul_mat(m, k, &packed, &activations, 0.75, &mut out).unwrap();

        assert_eq!(path, DispatchPath::Parallel);
        for i in 0..m {
            assert!((expected[i] - out[i]).abs() < 1e-4, "row {}", i);
        }
    }

    #[test]
    fn test_shutdown_and_lazy_restart() {
        let (m, k) = (64, 256);
        let (_, packed, _, lut, scale) = prepare(m, k, 13);
        let config = DispatchConfig {
            pool: PoolConfig {
                max_threads: 2,
                idle: IdleStrategy::Block,
                pin_cores: false,
            },
            ..DispatchConfig::default()
        };
        let mut dispatcher = Dispatcher::new(config).unwrap().with_shapes(small_table());
        assert!(dispatcher.thread_count() <= 2);

        let mut first = vec![0.0f32; m];
        dispatcher.qgemm(m, k, &packed, &lut, 1.0, scale, &mut first).unwrap();
        dispatcher.shutdown();
        assert!(!dispatcher.is_pool_initialized());

        let mut second = vec![0.0f32; m];
        dispatcher.qgemm(m, k, &packed, &lut, 1.0, scale, &mut second).unwrap();
        assert!(dispatcher.is_pool_initialized());
        assert_eq!(first, second);
    }
}
