//! Error types for simdecode-core.

use thiserror::Error;

/// Result type alias for simdecode-core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types for hit record handling.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    /// Requested record capacity does not fit in the fill mask.
    #[error("record size too long for bit pattern storage (requested {requested}, have {available})")]
    CapacityExceedsMask { requested: usize, available: usize },

    /// A record needs at least the reserved field at index 0.
    #[error("record capacity must be at least 1")]
    ZeroCapacity,

    /// Field index outside the record.
    #[error("index out of range ({index} oor of size {size})")]
    IndexOutOfRange { index: usize, size: usize },

    /// Field was never written.
    #[error("accessing unset data (idx {index}) val: {value}")]
    UnsetField { index: usize, value: f64 },
}
