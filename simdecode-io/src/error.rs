//! I/O error types.

use thiserror::Error;

/// Result type for I/O operations.
pub type Result<T> = std::result::Result<T, Error>;

/// I/O error types.
#[derive(Error, Debug)]
pub enum Error {
    /// File I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Record at `offset` could not be parsed.
    #[error("bad event record at byte {offset}: {source}")]
    Record {
        offset: usize,
        #[source]
        source: simdecode_sbs::EventFormatError,
    },

    /// File ends inside a record.
    #[error("file truncated at byte {offset}: record needs {needed} bytes, {available} left")]
    Truncated {
        offset: usize,
        needed: usize,
        available: usize,
    },
}
