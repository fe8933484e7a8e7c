//! simdecode-core: Hit records and digitized output records.
//!
//! This crate provides the per-hit storage used while building simulated
//! events and the per-event output aggregates filled by digitization.
//!

pub mod error;
pub mod hitdata;
pub mod outdata;

pub use error::{Error, Result};
pub use hitdata::{GenData, HitData, FILL_MASK_BITS, GENERATED_SIZE, OUT_OF_RANGE_VALUE};
pub use outdata::{DigOutData, GemDigOutData, OutputRecord, SampledDigOutData, SizeMismatch};
