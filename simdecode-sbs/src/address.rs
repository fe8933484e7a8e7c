//! Hardware address mapping.
//!
//! A linear channel index is split into `(crate, slot, channel)` using two
//! crate map constants: channels per slot and slots per crate.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// A readout module position inside the crate system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SlotAddress {
    /// Crate (ROC) number.
    #[serde(rename = "crate")]
    pub crate_id: u32,
    /// Slot within the crate.
    pub slot: u32,
}

impl SlotAddress {
    /// Creates a new slot address.
    #[inline]
    #[must_use]
    pub fn new(crate_id: u32, slot: u32) -> Self {
        Self { crate_id, slot }
    }
}

impl fmt::Display for SlotAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.crate_id, self.slot)
    }
}

/// A physical readout channel: `(crate, slot, channel)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct HardwareAddress {
    /// Crate (ROC) number.
    #[serde(rename = "crate")]
    pub crate_id: u32,
    /// Slot within the crate.
    pub slot: u32,
    /// Channel within the slot.
    pub channel: u32,
}

impl HardwareAddress {
    /// Creates a new hardware address.
    #[inline]
    #[must_use]
    pub fn new(crate_id: u32, slot: u32, channel: u32) -> Self {
        Self {
            crate_id,
            slot,
            channel,
        }
    }

    /// The slot this channel belongs to.
    #[inline]
    #[must_use]
    pub fn slot_address(&self) -> SlotAddress {
        SlotAddress::new(self.crate_id, self.slot)
    }
}

impl fmt::Display for HardwareAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.crate_id, self.slot, self.channel)
    }
}

/// Crate map constants shared by every mapping function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelLayout {
    channels_per_slot: u32,
    slots_per_crate: u32,
}

impl ChannelLayout {
    /// Creates a layout.
    ///
    /// # Errors
    /// Returns [`Error::Config`] if either constant is zero.
    pub fn new(channels_per_slot: u32, slots_per_crate: u32) -> Result<Self> {
        if channels_per_slot == 0 || slots_per_crate == 0 {
            return Err(Error::Config(format!(
                "channels per slot ({channels_per_slot}) and slots per crate \
                 ({slots_per_crate}) must be positive"
            )));
        }
        Ok(Self {
            channels_per_slot,
            slots_per_crate,
        })
    }

    /// Channels per slot.
    #[must_use]
    pub fn channels_per_slot(&self) -> u32 {
        self.channels_per_slot
    }

    /// Slots per crate.
    #[must_use]
    pub fn slots_per_crate(&self) -> u32 {
        self.slots_per_crate
    }

    /// Converts a linear channel index to its hardware address.
    #[inline]
    #[must_use]
    pub fn to_hardware_address(&self, linear_channel: u32) -> HardwareAddress {
        let channel = linear_channel % self.channels_per_slot;
        let slot_raw = linear_channel / self.channels_per_slot;
        HardwareAddress {
            crate_id: slot_raw / self.slots_per_crate,
            slot: slot_raw % self.slots_per_crate,
            channel,
        }
    }

    /// Converts a hardware address back to its linear channel index.
    ///
    /// Exact inverse of [`Self::to_hardware_address`] for addresses with
    /// `slot < slots_per_crate` and `channel < channels_per_slot`. Returns
    /// `None` if the index does not fit in a `u32`.
    #[inline]
    #[must_use]
    pub fn to_linear_channel(&self, addr: HardwareAddress) -> Option<u32> {
        self.slots_per_crate
            .checked_mul(addr.crate_id)?
            .checked_add(addr.slot)?
            .checked_mul(self.channels_per_slot)?
            .checked_add(addr.channel)
    }

    /// Returns true if slot and channel fit inside the layout.
    #[must_use]
    pub fn contains(&self, addr: HardwareAddress) -> bool {
        addr.slot < self.slots_per_crate && addr.channel < self.channels_per_slot
    }
}

/// Maps hardware addresses back to logical indices.
///
/// Keys are the linear encoding of the address under the current layout, so
/// the map must be rebuilt whenever the layout changes.
#[derive(Debug, Clone)]
pub struct ChannelMap {
    layout: ChannelLayout,
    map: HashMap<u32, usize>,
}

impl ChannelMap {
    /// Creates an empty map.
    #[must_use]
    pub fn new(layout: ChannelLayout) -> Self {
        Self {
            layout,
            map: HashMap::new(),
        }
    }

    /// Drops all entries and adopts a new layout.
    pub fn reset(&mut self, layout: ChannelLayout) {
        self.layout = layout;
        self.map.clear();
    }

    /// Removes all entries.
    pub fn clear(&mut self) {
        self.map.clear();
    }

    /// Associates `addr` with `index`, returning the index it replaced.
    ///
    /// # Errors
    /// Returns [`Error::AddressOverflow`] if `addr` has no linear encoding
    /// under the layout.
    pub fn insert(&mut self, addr: HardwareAddress, index: usize) -> Result<Option<usize>> {
        let key = self
            .layout
            .to_linear_channel(addr)
            .ok_or(Error::AddressOverflow(addr))?;
        Ok(self.map.insert(key, index))
    }

    /// Looks up the index stored for `addr`.
    #[must_use]
    pub fn lookup(&self, addr: HardwareAddress) -> Option<usize> {
        if self.map.is_empty() {
            return None;
        }
        let key = self.layout.to_linear_channel(addr)?;
        self.map.get(&key).copied()
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Returns true if the map has no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

/// Counts the bits set in `v`.
///
/// Parallel (SWAR) population count, see
/// <http://graphics.stanford.edu/~seander/bithacks.html#CountBitsSetParallel>.
#[inline]
#[must_use]
pub fn count_set_bits(v: u32) -> u32 {
    let v = v - ((v >> 1) & 0x5555_5555);
    let v = (v & 0x3333_3333) + ((v >> 2) & 0x3333_3333);
    (((v + (v >> 4)) & 0x0F0F_0F0F).wrapping_mul(0x0101_0101)) >> 24
}
