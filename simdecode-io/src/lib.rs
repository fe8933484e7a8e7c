//! simdecode-io: Memory-mapped I/O for simulated event files.
//!
//! An event file is a plain concatenation of event records (see
//! [`simdecode_sbs::event`]); each record carries its own length, which is
//! all the framing the reader needs.
//!

mod error;
mod reader;
mod writer;

pub use error::{Error, Result};
pub use reader::{EventIter, MappedFileReader, SimFileReader};
pub use writer::SimFileWriter;
