//! Sparse hit records with a fill mask.
//!
//! A [`HitData`] holds a fixed number of `f64` fields. Each write sets the
//! matching bit of a `u64` fill mask so readers can tell which fields were
//! actually provided by the simulation.

use crate::{Error, Result};
use log::error;
use std::ops::{Deref, DerefMut};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Number of fields a fill mask can track.
pub const FILL_MASK_BITS: usize = u64::BITS as usize;

/// Value stored in the reserved field at index 0.
pub const RESERVED_VALUE: f64 = 3.141_592_7;

/// Value returned by [`HitData::get`] for an index outside the record.
pub const OUT_OF_RANGE_VALUE: f64 = 1e9;

/// Number of kinematic fields in a generated-event record.
pub const GENERATED_SIZE: usize = 7;

/// Combined identifier tagging a record as generated-event data.
pub const GENERATED_ID: i32 = -1;

/// Returns the fill mask of a record with every field in `0..size` set.
#[inline]
fn full_mask(size: usize) -> u64 {
    debug_assert!((1..=FILL_MASK_BITS).contains(&size));
    u64::MAX >> (FILL_MASK_BITS - size)
}

/// A fixed-capacity record of `f64` fields with presence tracking.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct HitData {
    det_type: i32,
    det_id: i32,
    data: Vec<f64>,
    fill_bits: u64,
}

impl HitData {
    /// Creates a record for the combined detector identifier `unique_detid`.
    ///
    /// The identifier is split into a detector instance (`unique_detid % 10`)
    /// and a detector type tag (the quotient). Index 0 is reserved and is
    /// filled with [`RESERVED_VALUE`].
    ///
    /// # Errors
    /// Returns [`Error::CapacityExceedsMask`] if `size` exceeds
    /// [`FILL_MASK_BITS`], or [`Error::ZeroCapacity`] if `size` is zero.
    pub fn new(unique_detid: i32, size: usize) -> Result<Self> {
        if size > FILL_MASK_BITS {
            return Err(Error::CapacityExceedsMask {
                requested: size,
                available: FILL_MASK_BITS,
            });
        }
        if size == 0 {
            return Err(Error::ZeroCapacity);
        }
        Ok(Self::build(unique_detid, size))
    }

    fn build(unique_detid: i32, size: usize) -> Self {
        let det_id = unique_detid % 10;
        let mut data = vec![0.0; size];
        data[0] = RESERVED_VALUE;
        Self {
            det_type: (unique_detid - det_id) / 10,
            det_id,
            data,
            fill_bits: 1,
        }
    }

    /// Detector type tag.
    #[must_use]
    pub fn det_type(&self) -> i32 {
        self.det_type
    }

    /// Detector instance within its type.
    #[must_use]
    pub fn det_id(&self) -> i32 {
        self.det_id
    }

    /// Declared number of fields, including the reserved one.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Raw fill mask.
    #[must_use]
    pub fn fill_mask(&self) -> u64 {
        self.fill_bits
    }

    /// Returns true if `index` has been written.
    #[must_use]
    pub fn is_set(&self, index: usize) -> bool {
        index < self.data.len() && self.fill_bits & (1 << index) != 0
    }

    /// Stores `value` at `index` and marks it filled.
    ///
    /// An out-of-range index is reported and nothing is written.
    pub fn set(&mut self, index: usize, value: f64) {
        if index >= self.data.len() {
            error!(
                "HitData::set: index out of range ({index} oor of size {})",
                self.data.len()
            );
            return;
        }
        self.fill_bits |= 1 << index;
        self.data[index] = value;
    }

    /// Reads the field at `index`.
    ///
    /// Out-of-range reads are reported and return [`OUT_OF_RANGE_VALUE`].
    /// Reading a field that was never set is reported but still returns the
    /// stored value, which is 0.0 for untouched fields.
    #[must_use]
    pub fn get(&self, index: usize) -> f64 {
        match self.try_get(index) {
            Ok(value) => value,
            Err(err @ Error::UnsetField { value, .. }) => {
                error!("HitData::get: {err}");
                value
            }
            Err(err) => {
                error!("HitData::get: {err}");
                OUT_OF_RANGE_VALUE
            }
        }
    }

    /// Reads the field at `index`, failing on out-of-range or unset fields.
    ///
    /// # Errors
    /// Returns [`Error::IndexOutOfRange`] or [`Error::UnsetField`].
    pub fn try_get(&self, index: usize) -> Result<f64> {
        let Some(&value) = self.data.get(index) else {
            return Err(Error::IndexOutOfRange {
                index,
                size: self.data.len(),
            });
        };
        if self.fill_bits & (1 << index) == 0 {
            return Err(Error::UnsetField { index, value });
        }
        Ok(value)
    }

    /// Returns true once every field has been written at least once.
    #[must_use]
    pub fn is_filled(&self) -> bool {
        self.fill_bits == full_mask(self.data.len())
    }
}

/// Generated primary-particle record with an event weight.
///
/// Carries [`GENERATED_SIZE`] kinematic fields plus two extra fields; the
/// weight lives at [`GenData::WEIGHT_INDEX`] and defaults to 1.0.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct GenData {
    hit: HitData,
}

impl GenData {
    /// Field index of the event weight.
    pub const WEIGHT_INDEX: usize = 8;

    /// Creates a generated-event record with weight 1.0.
    #[must_use]
    pub fn new() -> Self {
        let mut hit = HitData::build(GENERATED_ID, GENERATED_SIZE + 2);
        hit.set(Self::WEIGHT_INDEX, 1.0);
        Self { hit }
    }

    /// Event weight.
    #[must_use]
    pub fn weight(&self) -> f64 {
        self.hit.get(Self::WEIGHT_INDEX)
    }

    /// Overrides the event weight.
    pub fn set_weight(&mut self, weight: f64) {
        self.hit.set(Self::WEIGHT_INDEX, weight);
    }
}

impl Default for GenData {
    fn default() -> Self {
        Self::new()
    }
}

impl Deref for GenData {
    type Target = HitData;

    fn deref(&self) -> &HitData {
        &self.hit
    }
}

impl DerefMut for GenData {
    fn deref_mut(&mut self) -> &mut HitData {
        &mut self.hit
    }
}
