//! Per-slot storage and module loading.
//!
//! The surrounding framework owns one storage object per wired
//! `(crate, slot)`. The decoder only sees it through [`SlotRegistry`]: it asks
//! whether a slot exists and hands each slot one payload buffer per event.
//!
//! [`SlotDataRegistry`] is an in-memory registry whose slots unpack the
//! simulated fADC payload layout. A loaded buffer is a sequence of hits:
//!
//! ```text
//! channel, kind, n, value_1 .. value_n
//! ```
//!
//! where `kind` is [`PAYLOAD_ADC`] (values are waveform samples) or
//! [`PAYLOAD_TDC`] (values are leading and trailing edge times).

use crate::address::SlotAddress;
use crate::{CrateMapConfig, Error, Result};
use log::debug;
use simdecode_core::{OutputRecord, SampledDigOutData};
use std::collections::BTreeMap;

/// Payload kind word for waveform samples.
pub const PAYLOAD_ADC: u32 = 0;

/// Payload kind word for TDC edges.
pub const PAYLOAD_TDC: u32 = 1;

/// Access to the framework's per-slot storage.
pub trait SlotRegistry {
    /// Builds the crate map from `config`.
    ///
    /// # Errors
    /// Returns [`Error::CrateMapInit`] if the crate map is unusable.
    fn init_crate_map(&mut self, config: &CrateMapConfig) -> Result<()>;

    /// Creates storage for every slot in the crate map.
    ///
    /// # Errors
    /// Returns [`Error::SlotDataInit`] if storage cannot be built.
    fn init_slot_data(&mut self) -> Result<()>;

    /// Resets every slot for a new event.
    fn clear_slots(&mut self);

    /// Returns true if storage exists for `slot`.
    fn contains(&self, slot: SlotAddress) -> bool;

    /// Hands `buffer[offset..offset + length]` to the module loader of `slot`.
    ///
    /// The buffer is borrowed for the duration of the call only. Returns the
    /// number of hits the module decoded.
    ///
    /// # Errors
    /// Returns [`Error::UnknownSlot`] or [`Error::MalformedPayload`].
    fn load_slot(
        &mut self,
        slot: SlotAddress,
        buffer: &[u32],
        offset: usize,
        length: usize,
    ) -> Result<usize>;
}

/// Decoded contents of one slot for the current event.
#[derive(Debug, Clone)]
pub struct SlotData {
    address: SlotAddress,
    words: Vec<u32>,
    load_calls: usize,
    hits: SampledDigOutData,
}

impl SlotData {
    /// Creates empty storage for `address`.
    #[must_use]
    pub fn new(address: SlotAddress) -> Self {
        Self {
            address,
            words: Vec::new(),
            load_calls: 0,
            hits: SampledDigOutData::new(),
        }
    }

    /// Slot address.
    #[must_use]
    pub fn address(&self) -> SlotAddress {
        self.address
    }

    /// Raw words loaded this event, in load order.
    #[must_use]
    pub fn words(&self) -> &[u32] {
        &self.words
    }

    /// Number of loader calls this event.
    #[must_use]
    pub fn load_calls(&self) -> usize {
        self.load_calls
    }

    /// Hits decoded this event.
    #[must_use]
    pub fn hits(&self) -> &SampledDigOutData {
        &self.hits
    }

    /// Resets the slot for a new event.
    pub fn clear_event(&mut self) {
        self.words.clear();
        self.load_calls = 0;
        self.hits.clear();
    }

    /// Unpacks `buffer` into hits.
    ///
    /// The whole buffer is validated before anything is stored, so a
    /// malformed buffer leaves the slot unchanged.
    ///
    /// # Errors
    /// Returns [`Error::MalformedPayload`] on an unknown kind word, a hit
    /// running past the end of the buffer, a word that does not fit an
    /// `i32`, or an ADC sum that overflows.
    pub fn load(&mut self, buffer: &[u32]) -> Result<usize> {
        let slot = self.address;
        let malformed = |reason: String| Error::MalformedPayload { slot, reason };
        let signed = |word: u32, pos: usize| {
            i32::try_from(word)
                .map_err(|_| malformed(format!("word {pos} ({word:#x}) exceeds i32 range")))
        };

        let mut decoded = Vec::new();
        let mut pos = 0;
        while pos < buffer.len() {
            let Some(&[channel, kind, n]) = buffer.get(pos..pos + 3) else {
                return Err(malformed(format!("incomplete hit header at word {pos}")));
            };
            let start = pos + 3;
            let Some(values) = start
                .checked_add(n as usize)
                .and_then(|end| buffer.get(start..end))
            else {
                return Err(malformed(format!(
                    "hit at word {pos} needs {n} values, {} left",
                    buffer.len() - start
                )));
            };
            if kind != PAYLOAD_ADC && kind != PAYLOAD_TDC {
                return Err(malformed(format!("unknown payload kind {kind} at word {pos}")));
            }
            let channel = signed(channel, pos)?;
            let samples = values
                .iter()
                .enumerate()
                .map(|(i, &v)| signed(v, start + i))
                .collect::<Result<Vec<i32>>>()?;

            let (adc, tdc_l, tdc_t) = if kind == PAYLOAD_ADC {
                let sum = samples
                    .iter()
                    .try_fold(0i32, |acc, &v| acc.checked_add(v))
                    .ok_or_else(|| malformed(format!("adc sum of hit at word {pos} overflows")))?;
                (sum, 0, 0)
            } else {
                (
                    0,
                    samples.first().copied().unwrap_or(0),
                    samples.get(1).copied().unwrap_or(0),
                )
            };
            decoded.push((channel, kind, adc, tdc_l, tdc_t, samples));
            pos = start + values.len();
        }

        let count = decoded.len();
        for (channel, kind, adc, tdc_l, tdc_t, samples) in decoded {
            self.hits.base.push_hit(channel, kind, adc, tdc_l, tdc_t);
            self.hits.samples.push(samples);
        }

        self.words.extend_from_slice(buffer);
        self.load_calls += 1;
        Ok(count)
    }
}

/// In-memory slot registry.
#[derive(Debug, Default)]
pub struct SlotDataRegistry {
    wired: Vec<SlotAddress>,
    crate_map_ready: bool,
    slots: BTreeMap<SlotAddress, SlotData>,
}

impl SlotDataRegistry {
    /// Creates an empty, uninitialized registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Storage of `slot`, if wired.
    #[must_use]
    pub fn slot(&self, slot: SlotAddress) -> Option<&SlotData> {
        self.slots.get(&slot)
    }

    /// All slots in address order.
    pub fn iter(&self) -> impl Iterator<Item = &SlotData> {
        self.slots.values()
    }

    /// Number of slots with storage.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Returns true if no slot has storage.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

impl SlotRegistry for SlotDataRegistry {
    fn init_crate_map(&mut self, config: &CrateMapConfig) -> Result<()> {
        self.crate_map_ready = false;
        let layout = config
            .layout()
            .map_err(|e| Error::CrateMapInit(e.to_string()))?;
        if let Some(bad) = config
            .slots
            .iter()
            .find(|s| s.slot >= layout.slots_per_crate())
        {
            return Err(Error::CrateMapInit(format!(
                "slot {bad} beyond {} slots per crate",
                layout.slots_per_crate()
            )));
        }
        self.wired.clone_from(&config.slots);
        self.wired.sort_unstable();
        self.wired.dedup();
        self.crate_map_ready = true;
        debug!("crate map: {} wired slots", self.wired.len());
        Ok(())
    }

    fn init_slot_data(&mut self) -> Result<()> {
        if !self.crate_map_ready {
            return Err(Error::SlotDataInit("crate map not initialized".into()));
        }
        self.slots = self
            .wired
            .iter()
            .map(|&addr| (addr, SlotData::new(addr)))
            .collect();
        Ok(())
    }

    fn clear_slots(&mut self) {
        for slot in self.slots.values_mut() {
            slot.clear_event();
        }
    }

    fn contains(&self, slot: SlotAddress) -> bool {
        self.slots.contains_key(&slot)
    }

    fn load_slot(
        &mut self,
        slot: SlotAddress,
        buffer: &[u32],
        offset: usize,
        length: usize,
    ) -> Result<usize> {
        let data = self.slots.get_mut(&slot).ok_or(Error::UnknownSlot(slot))?;
        let chunk = offset
            .checked_add(length)
            .and_then(|end| buffer.get(offset..end))
            .ok_or_else(|| Error::MalformedPayload {
                slot,
                reason: format!(
                    "range {offset}+{length} outside buffer of {}",
                    buffer.len()
                ),
            })?;
        data.load(chunk)
    }
}
