//! simdecode-sbs: Hardware address mapping and event decoding for simulated
//! SBS detector data.
//!
//! Simulation output addresses hits by detector and module index. Replay
//! code expects the data a real DAQ would produce, addressed by
//! `(crate, slot, channel)`. This crate performs that translation.
//!
//! # Key Components
//!
//! - [`ChannelLayout`] - Linear channel <-> hardware address mapping
//! - [`HcalRouter`] - Banked module mapping of the hadron calorimeter
//! - [`SimEvent`] - Versioned event record parser
//! - [`SimDecoder`] - Per-event decode loop feeding a [`SlotRegistry`]
//!
//! # Processing Pipeline
//!
//! 1. Parse the event record
//! 2. Route each detector data entry to a hardware address
//! 3. Group payloads per slot, in arrival order
//! 4. Load each slot once

pub mod address;
pub mod decoder;
mod error;
pub mod event;
pub mod routing;
pub mod slot;

pub use address::{count_set_bits, ChannelLayout, ChannelMap, HardwareAddress, SlotAddress};
pub use decoder::{DecoderState, DecoderStatistics, EventSummary, SimDecoder, PRIMARY_SOURCE};
pub use error::{Error, Result};
pub use event::{DetectorData, EventFormatError, SimEvent};
pub use routing::{ChannelRouter, HcalBankConfig, HcalRouter, LinearRouter, RouteError};
pub use slot::{SlotData, SlotDataRegistry, SlotRegistry};

use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

/// Default channels per slot (16-channel fADC250 boards).
pub const DEFAULT_CHANNELS_PER_SLOT: u32 = 16;

/// Default slots per crate (VME64x).
pub const DEFAULT_SLOTS_PER_CRATE: u32 = 21;

/// Crate map: layout constants and the slots that have storage.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrateMapConfig {
    /// Channels per slot.
    pub channels_per_slot: u32,
    /// Slots per crate.
    pub slots_per_crate: u32,
    /// Wired slots.
    pub slots: Vec<SlotAddress>,
}

impl Default for CrateMapConfig {
    fn default() -> Self {
        Self {
            channels_per_slot: DEFAULT_CHANNELS_PER_SLOT,
            slots_per_crate: DEFAULT_SLOTS_PER_CRATE,
            slots: hcal_slots(&HcalBankConfig::default()),
        }
    }
}

impl CrateMapConfig {
    /// Layout described by the constants.
    ///
    /// # Errors
    /// Returns [`Error::Config`] if a constant is zero.
    pub fn layout(&self) -> Result<ChannelLayout> {
        ChannelLayout::new(self.channels_per_slot, self.slots_per_crate)
    }
}

/// Every slot the HCal mapping can address, or none if `hcal` is invalid.
fn hcal_slots(hcal: &HcalBankConfig) -> Vec<SlotAddress> {
    HcalRouter::new(hcal.clone())
        .map(|router| router.slots().into_iter().collect())
        .unwrap_or_default()
}

/// Decoder configuration.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecoderConfig {
    /// Crate map.
    pub crate_map: CrateMapConfig,
    /// HCal module mapping.
    pub hcal: HcalBankConfig,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct JsonConfig {
    crate_map: JsonCrateMap,
    hcal: HcalBankConfig,
}

#[derive(Deserialize)]
#[serde(default)]
struct JsonCrateMap {
    channels_per_slot: u32,
    slots_per_crate: u32,
    slots: Option<Vec<SlotAddress>>,
}

impl Default for JsonCrateMap {
    fn default() -> Self {
        Self {
            channels_per_slot: DEFAULT_CHANNELS_PER_SLOT,
            slots_per_crate: DEFAULT_SLOTS_PER_CRATE,
            slots: None,
        }
    }
}

impl DecoderConfig {
    /// SBS defaults: 16 channels per slot, 21 slots per crate, HCal in
    /// crates 10 and 11 with every HCal slot wired.
    #[must_use]
    pub fn sbs_defaults() -> Self {
        Self::default()
    }

    /// Loads a configuration from a JSON file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed, or if the
    /// resulting configuration is invalid.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path)?;
        let json_config: JsonConfig = serde_json::from_reader(BufReader::new(file))?;
        Self::from_json_config(json_config)
    }

    /// Loads a configuration from a JSON string.
    ///
    /// Missing fields take their defaults. Without an explicit slot list,
    /// every slot reachable by the HCal mapping is wired.
    ///
    /// # Errors
    /// Returns an error if the JSON cannot be parsed or the configuration is
    /// invalid.
    pub fn from_json(json: &str) -> Result<Self> {
        let json_config: JsonConfig = serde_json::from_str(json)?;
        Self::from_json_config(json_config)
    }

    fn from_json_config(json: JsonConfig) -> Result<Self> {
        let slots = json
            .crate_map
            .slots
            .unwrap_or_else(|| hcal_slots(&json.hcal));
        let config = Self {
            crate_map: CrateMapConfig {
                channels_per_slot: json.crate_map.channels_per_slot,
                slots_per_crate: json.crate_map.slots_per_crate,
                slots,
            },
            hcal: json.hcal,
        };
        config.validate()?;
        Ok(config)
    }

    /// Checks layout constants, HCal parameters and slot ranges.
    ///
    /// # Errors
    /// Returns [`Error::Config`] describing the first problem found.
    pub fn validate(&self) -> Result<()> {
        let layout = self.crate_map.layout()?;
        self.hcal.validate()?;
        if let Some(bad) = self
            .crate_map
            .slots
            .iter()
            .find(|s| s.slot >= layout.slots_per_crate())
        {
            return Err(Error::Config(format!(
                "slot {bad} beyond {} slots per crate",
                layout.slots_per_crate()
            )));
        }
        if self.hcal.channels_per_module > layout.channels_per_slot() {
            return Err(Error::Config(format!(
                "hcal boards have {} channels, slots hold {}",
                self.hcal.channels_per_module,
                layout.channels_per_slot()
            )));
        }

        // The last channel of a slot has the largest linear index.
        let last_channel = layout.channels_per_slot() - 1;
        let fits = |crate_id, slot| {
            layout
                .to_linear_channel(HardwareAddress::new(crate_id, slot, last_channel))
                .is_some()
        };
        if let Some(bad) = self
            .crate_map
            .slots
            .iter()
            .find(|s| !fits(s.crate_id, s.slot))
        {
            return Err(Error::Config(format!("slot {bad} has no linear channel index")));
        }
        // Bounded by HcalBankConfig::validate().
        let hcal_max_slot = self.hcal.max_slot().unwrap_or(u32::MAX);
        if let Some(bad) = self
            .hcal
            .bank_crates
            .iter()
            .find(|&&crate_id| !fits(crate_id, hcal_max_slot))
        {
            return Err(Error::Config(format!("hcal crate {bad} has no linear channel index")));
        }
        Ok(())
    }
}
