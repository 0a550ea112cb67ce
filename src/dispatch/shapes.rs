//! Shape → blocking table.
//!
//! Block sizes are fixed per known `(m, k)` pair rather than derived. A
//! shape missing from the table is not an error; the dispatcher sends it
//! down the single-threaded path.

use crate::error::{Result, TlgemmError};
use crate::kernel::pack::{LUT_ENTRIES, validate_layout};

/// Blocking parameters for one matrix shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShapeConfig {
    /// Output rows.
    pub m: usize,
    /// Contraction length.
    pub k: usize,
    /// Rows per kernel invocation.
    pub bm: usize,
    /// Contraction columns per block.
    pub bk: usize,
    /// At or below this many K blocks the shape runs single-threaded.
    pub serial_k_blocks: usize,
}

impl ShapeConfig {
    /// Built-in threshold: two blocks or fewer never pay for a fan-out.
    pub const SERIAL_K_BLOCKS: usize = 2;

    pub const fn new(m: usize, k: usize, bm: usize, bk: usize) -> Self {
        Self {
            m,
            k,
            bm,
            bk,
            serial_k_blocks: Self::SERIAL_K_BLOCKS,
        }
    }

    pub fn validate(&self) -> Result<()> {
        validate_layout(self.m, self.k)?;
        if self.bm == 0 || self.bk == 0 {
            return Err(TlgemmError::InvalidShape(format!(
                "{}x{}: block sizes must be > 0",
                self.m, self.k
            )));
        }
        if !self.bk.is_multiple_of(2) || !self.k.is_multiple_of(self.bk) {
            return Err(TlgemmError::InvalidShape(format!(
                "{}x{}: bk={} must be even and divide k",
                self.m, self.k, self.bk
            )));
        }
        Ok(())
    }

    pub fn k_blocks(&self) -> usize {
        self.k / self.bk
    }

    pub fn row_blocks(&self) -> usize {
        self.m.div_ceil(self.bm)
    }

    /// Whether this shape is small enough to skip the pool.
    pub fn is_serial(&self) -> bool {
        self.k_blocks() <= self.serial_k_blocks
    }

    /// K pairs per block.
    pub fn pairs_per_block(&self) -> usize {
        self.bk / 2
    }

    /// Packed weight bytes per K block (all rows).
    pub fn weight_bytes_per_block(&self) -> usize {
        self.pairs_per_block() * (self.m / 2)
    }

    /// LUT entries per K block.
    pub fn lut_entries_per_block(&self) -> usize {
        self.pairs_per_block() * LUT_ENTRIES
    }
}

/// BitNet b1.58 2B projection shapes.
pub const BITNET_SHAPES: [ShapeConfig; 3] = [
    ShapeConfig::new(3200, 8640, 160, 64),
    ShapeConfig::new(3200, 3200, 160, 128),
    ShapeConfig::new(8640, 3200, 320, 64),
];

/// Lookup table of supported shapes.
#[derive(Debug, Clone, Default)]
pub struct ShapeTable {
    shapes: Vec<ShapeConfig>,
}

impl ShapeTable {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Table holding [`BITNET_SHAPES`].
    pub fn bitnet_defaults() -> Self {
        Self {
            shapes: BITNET_SHAPES.to_vec(),
        }
    }

    /// Add a shape, replacing any entry with the same `(m, k)`.
    pub fn register(&mut self, config: ShapeConfig) -> Result<()> {
        config.validate()?;
        match self.shapes.iter_mut().find(|s| s.m == config.m && s.k == config.k) {
            Some(existing) => *existing = config,
            None => self.shapes.push(config),
        }
        Ok(())
    }

    pub fn lookup(&self, m: usize, k: usize) -> Option<&ShapeConfig> {
        self.shapes.iter().find(|s| s.m == m && s.k == k)
    }

    pub fn shapes(&self) -> &[ShapeConfig] {
        &self.shapes
    }

    pub fn len(&self) -> usize {
        self.shapes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shapes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_shapes_are_valid_and_parallel() {
        for shape in BITNET_SHAPES {
            assert!(shape.validate().is_ok(), "{:?}", shape);
            assert!(!shape.is_serial(), "{:?}", shape);
        }
    }

    #[test]
    fn test_block_counts() {
        let table = ShapeTable::bitnet_defaults();
        let a = table.lookup(3200, 8640).unwrap();
        assert_eq!(a.k_blocks(), 135);
        assert_eq!(a.row_blocks(), 20);
        assert_eq!(a.weight_bytes_per_block(), 32 * 1600);
        assert_eq!(a.lut_entries_per_block(), 32 * 16);

        assert_eq!(table.lookup(3200, 3200).unwrap().k_blocks(), 25);
        assert_eq!(table.lookup(8640, 3200).unwrap().row_blocks(), 27);
    }

    #[test]
    fn test_unknown_shape() {
        assert!(ShapeTable::bitnet_defaults().lookup(1024, 1024).is_none());
        assert!(ShapeTable::empty().is_empty());
    }

    #[test]
    fn test_register_and_replace() {
        let mut table = ShapeTable::bitnet_defaults();
        table.register(ShapeConfig::new(3200, 128, 160, 64)).unwrap();
        assert_eq!(table.len(), 4);
        assert!(table.lookup(3200, 128).unwrap().is_serial());

        table.register(ShapeConfig::new(3200, 128, 160, 32)).unwrap();
        assert_eq!(table.len(), 4);
        assert_eq!(table.lookup(3200, 128).unwrap().k_blocks(), 4);
    }

    #[test]
    fn test_register_rejects_bad_blocking() {
        let mut table = ShapeTable::empty();
        assert!(table.register(ShapeConfig::new(3200, 8640, 160, 100)).is_err());
        assert!(table.register(ShapeConfig::new(3200, 8640, 0, 64)).is_err());
        assert!(table.register(ShapeConfig::new(3201, 8640, 160, 64)).is_err());
        assert!(table.is_empty());
    }
}
