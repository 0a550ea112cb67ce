//! Error types for tlgemm.
//!
//! Uses thiserror. Kernel failures carry the kernel's status code verbatim.

use thiserror::Error;

/// Main error type for dispatch, pool and configuration operations.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum TlgemmError {
    /// A kernel call returned a nonzero status.
    #[error("Kernel returned status {status}")]
    Kernel { status: i32 },

    /// A caller buffer does not match the declared dimensions.
    #[error("Buffer length mismatch for {name}: expected {expected}, got {actual}")]
    BufferLength {
        name: &'static str,
        expected: usize,
        actual: usize,
    },

    /// Matrix shape the packed layout cannot represent.
    #[error("Invalid shape: {0}")]
    InvalidShape(String),

    /// Weight value outside the ternary alphabet {-1, 0, 1}.
    #[error("Weight at index {index} is {value}, expected -1, 0 or 1")]
    InvalidWeight { index: usize, value: i8 },

    /// Accumulator allocation failed and the stack fallback is too small.
    #[error("Accumulator of {requested} rows exceeds stack fallback capacity {capacity}")]
    AccumulatorTooLarge { requested: usize, capacity: usize },

    /// Spawning a worker thread failed.
    #[error("Failed to spawn worker thread: {0}")]
    Spawn(#[source] std::io::Error),

    /// One or more pool tasks panicked.
    #[error("{count} pool task(s) panicked")]
    TaskPanicked { count: usize },

    /// Invalid configuration value.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// IO error wrapper.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// TOML deserialization error.
    #[error("TOML parse error: {0}")]
    TomlDe(#[from] toml::de::Error),

    /// TOML serialization error.
    #[error("TOML serialization error: {0}")]
    TomlSer(#[from] toml::ser::Error),
}

/// Convenient Result type alias.
pub type Result<T> = std::result::Result<T, TlgemmError>;

impl TlgemmError {
    /// Status code of a kernel failure, if this is one.
    pub fn kernel_status(&self) -> Option<i32> {
        match self {
            TlgemmError::Kernel { status } => Some(*status),
            _ => None,
        }
    }

    /// Check if the error is a violated caller precondition.
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            TlgemmError::BufferLength { .. }
                | TlgemmError::InvalidShape(_)
                | TlgemmError::InvalidWeight { .. }
                | TlgemmError::AccumulatorTooLarge { .. }
        )
    }

    pub(crate) fn check_len(name: &'static str, expected: usize, actual: usize) -> Result<()> {
        if expected != actual {
            return Err(TlgemmError::BufferLength {
                name,
                expected,
                actual,
            });
        }
        Ok(())
    }
}
