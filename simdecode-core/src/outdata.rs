//! Per-event digitized output records.
//!
//! Each record stores one entry per hit in parallel vectors (`SoA` layout).
//! After digitization every populated vector must hold exactly `nhits`
//! entries; [`OutputRecord::check_size`] verifies this.

use log::warn;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// A vector whose length disagrees with the record's hit count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SizeMismatch {
    /// Name of the offending vector.
    pub field: &'static str,
    /// Its actual length.
    pub len: usize,
    /// The record's hit count.
    pub nhits: usize,
}

/// Common behaviour of the output records.
pub trait OutputRecord {
    /// Number of hits recorded for the current event.
    fn hit_count(&self) -> usize;

    /// Empties every vector and resets the hit count.
    fn clear(&mut self);

    /// Lists every vector whose length differs from the hit count.
    ///
    /// ADC and TDC vectors are skipped when the corresponding flag is set,
    /// for detectors that do not produce them.
    fn size_mismatches(&self, ignore_adc: bool, ignore_tdc: bool) -> Vec<SizeMismatch>;

    /// Returns true if all checked vectors hold exactly `hit_count` entries.
    ///
    /// With `verbose`, each mismatch is logged.
    fn check_size(&self, ignore_adc: bool, ignore_tdc: bool, verbose: bool) -> bool {
        let mismatches = self.size_mismatches(ignore_adc, ignore_tdc);
        if verbose {
            for m in &mismatches {
                warn!("{}.size() = {} != {}", m.field, m.len, m.nhits);
            }
        }
        mismatches.is_empty()
    }
}

fn check_len(out: &mut Vec<SizeMismatch>, field: &'static str, len: usize, nhits: usize) {
    if len != nhits {
        out.push(SizeMismatch { field, len, nhits });
    }
}

/// Digitized hits of a detector read out by ADC and/or TDC channels.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct DigOutData {
    /// Number of hits.
    pub nhits: usize,
    /// Channel of each hit.
    pub channel: Vec<i32>,
    /// Encoded data word of each hit.
    pub data_word: Vec<u32>,
    /// ADC value of each hit.
    pub adc: Vec<i32>,
    /// Leading-edge TDC of each hit.
    pub tdc_l: Vec<i32>,
    /// Trailing-edge TDC of each hit.
    pub tdc_t: Vec<i32>,
}

impl DigOutData {
    /// Creates an empty record.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends one hit to every vector.
    pub fn push_hit(&mut self, channel: i32, data_word: u32, adc: i32, tdc_l: i32, tdc_t: i32) {
        self.channel.push(channel);
        self.data_word.push(data_word);
        self.adc.push(adc);
        self.tdc_l.push(tdc_l);
        self.tdc_t.push(tdc_t);
        self.nhits += 1;
    }
}

impl OutputRecord for DigOutData {
    fn hit_count(&self) -> usize {
        self.nhits
    }

    fn clear(&mut self) {
        self.nhits = 0;
        self.channel.clear();
        self.data_word.clear();
        self.adc.clear();
        self.tdc_l.clear();
        self.tdc_t.clear();
    }

    fn size_mismatches(&self, ignore_adc: bool, ignore_tdc: bool) -> Vec<SizeMismatch> {
        let mut out = Vec::new();
        let n = self.nhits;
        check_len(&mut out, "channel", self.channel.len(), n);
        check_len(&mut out, "data_word", self.data_word.len(), n);
        if !ignore_adc {
            check_len(&mut out, "adc", self.adc.len(), n);
        }
        if !ignore_tdc {
            check_len(&mut out, "tdc_l", self.tdc_l.len(), n);
            check_len(&mut out, "tdc_t", self.tdc_t.len(), n);
        }
        out
    }
}

/// Digitized hits that also carry waveform samples.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SampledDigOutData {
    /// Per-hit channel, ADC and TDC data.
    pub base: DigOutData,
    /// Waveform samples of each hit.
    pub samples: Vec<Vec<i32>>,
}

impl SampledDigOutData {
    /// Creates an empty record.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl OutputRecord for SampledDigOutData {
    fn hit_count(&self) -> usize {
        self.base.nhits
    }

    fn clear(&mut self) {
        self.base.clear();
        self.samples.clear();
    }

    fn size_mismatches(&self, ignore_adc: bool, ignore_tdc: bool) -> Vec<SizeMismatch> {
        let mut out = self.base.size_mismatches(ignore_adc, ignore_tdc);
        check_len(&mut out, "samples", self.samples.len(), self.base.nhits);
        out
    }
}

/// Digitized strip hits with plane/module/projection bookkeeping.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct GemDigOutData {
    /// Per-hit channel, ADC and TDC data.
    pub base: DigOutData,
    /// Plane of each hit.
    pub plane: Vec<i32>,
    /// Module of each hit.
    pub module: Vec<i32>,
    /// Strip projection of each hit.
    pub proj: Vec<i32>,
    /// Strip samples of each hit.
    pub samples: Vec<Vec<i32>>,
}

impl GemDigOutData {
    /// Creates an empty record.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl OutputRecord for GemDigOutData {
    fn hit_count(&self) -> usize {
        self.base.nhits
    }

    fn clear(&mut self) {
        self.base.clear();
        self.plane.clear();
        self.module.clear();
        self.proj.clear();
        self.samples.clear();
    }

    fn size_mismatches(&self, ignore_adc: bool, ignore_tdc: bool) -> Vec<SizeMismatch> {
        let mut out = self.base.size_mismatches(ignore_adc, ignore_tdc);
        let n = self.base.nhits;
        check_len(&mut out, "plane", self.plane.len(), n);
        check_len(&mut out, "module", self.module.len(), n);
        check_len(&mut out, "proj", self.proj.len(), n);
        check_len(&mut out, "samples", self.samples.len(), n);
        out
    }
}
