//! Per-detector routing from logical channels to hardware addresses.
//!
//! Each detector class read out through the crate system registers a
//! [`ChannelRouter`]. The decoder picks the router by detector id, so adding a
//! detector does not touch the decode loop.

use crate::address::{ChannelLayout, HardwareAddress, SlotAddress};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use thiserror::Error;

/// Routing failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RouteError {
    /// Channel lies outside the range covered by the router.
    #[error("detector {det_id}: channel {channel} outside routed range [0, {limit})")]
    ChannelOutOfRange { det_id: i32, channel: u32, limit: u32 },
}

/// Computes hardware addresses for one detector class.
pub trait ChannelRouter: Send + Sync {
    /// Detector id of the entries this router handles.
    fn detector_id(&self) -> i32;

    /// Number of logical channels the router accepts, `0..channel_count()`.
    fn channel_count(&self) -> u32;

    /// Maps a logical channel (module index) to its hardware address.
    ///
    /// # Errors
    /// Returns [`RouteError::ChannelOutOfRange`] for channels outside
    /// `0..channel_count()`.
    fn route(&self, channel: u32) -> std::result::Result<HardwareAddress, RouteError>;

    /// Every slot the router can address.
    fn slots(&self) -> BTreeSet<SlotAddress> {
        (0..self.channel_count())
            .filter_map(|ch| self.route(ch).ok())
            .map(|addr| addr.slot_address())
            .collect()
    }
}

/// Parameters of the banked HCal module mapping.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HcalBankConfig {
    /// Detector id of HCal entries in the simulation output.
    pub detector_id: i32,
    /// Modules read out by each crate.
    pub modules_per_bank: u32,
    /// Crate of each bank, in module order.
    pub bank_crates: Vec<u32>,
    /// Slot of the first module of a bank.
    pub first_slot: u32,
    /// Modules per readout board.
    pub channels_per_module: u32,
    /// Slots occupied by non-digitizer boards.
    pub reserved_slots: Vec<u32>,
    /// Shift applied to a slot that lands on a reserved one.
    pub reserved_slot_shift: u32,
}

impl Default for HcalBankConfig {
    fn default() -> Self {
        Self {
            detector_id: 2,
            modules_per_bank: 192,
            bank_crates: vec![10, 11],
            first_slot: 4,
            channels_per_module: 16,
            reserved_slots: vec![11, 12],
            reserved_slot_shift: 2,
        }
    }
}

impl HcalBankConfig {
    /// Checks that the mapping is well defined.
    ///
    /// # Errors
    /// Returns [`Error::Config`] for zero divisors or an empty bank list.
    pub fn validate(&self) -> Result<()> {
        if self.modules_per_bank == 0 || self.channels_per_module == 0 {
            return Err(Error::Config(
                "hcal: modules_per_bank and channels_per_module must be positive".into(),
            ));
        }
        if self.bank_crates.is_empty() {
            return Err(Error::Config("hcal: bank_crates is empty".into()));
        }
        if u32::try_from(self.bank_crates.len())
            .ok()
            .and_then(|banks| banks.checked_mul(self.modules_per_bank))
            .is_none()
        {
            return Err(Error::Config("hcal: module count overflows u32".into()));
        }
        if self.max_slot().is_none() {
            return Err(Error::Config("hcal: slot numbers overflow u32".into()));
        }
        Ok(())
    }

    /// Highest slot the mapping produces, or `None` if it overflows `u32`.
    #[must_use]
    pub fn max_slot(&self) -> Option<u32> {
        let last_board = self.modules_per_bank.checked_sub(1)? / self.channels_per_module.max(1);
        let last = self.first_slot.checked_add(last_board)?;
        let mut max = last;
        for &reserved in &self.reserved_slots {
            if (self.first_slot..=last).contains(&reserved) {
                max = max.max(reserved.checked_add(self.reserved_slot_shift)?);
            }
        }
        Some(max)
    }
}

/// Banked HCal mapping.
///
/// Modules are split into banks of `modules_per_bank`, one crate per bank.
/// Within a bank, `slot = first_slot + m / channels_per_module` where `m` is
/// the module offset inside the bank, and slots hitting a reserved slot move
/// up by `reserved_slot_shift`. The channel is `module % channels_per_module`.
/// Modules past the last bank are rejected.
#[derive(Clone, Debug)]
pub struct HcalRouter {
    config: HcalBankConfig,
}

impl HcalRouter {
    /// Creates a router.
    ///
    /// # Errors
    /// Returns [`Error::Config`] if the configuration is invalid.
    pub fn new(config: HcalBankConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    /// The mapping parameters.
    #[must_use]
    pub fn config(&self) -> &HcalBankConfig {
        &self.config
    }

    /// Slot of the `board`-th readout board of a bank.
    fn board_slot(&self, board: u32) -> u32 {
        let c = &self.config;
        // Bounded by HcalBankConfig::max_slot().
        let slot = c.first_slot + board;
        if c.reserved_slots.contains(&slot) {
            slot + c.reserved_slot_shift
        } else {
            slot
        }
    }
}

impl ChannelRouter for HcalRouter {
    fn detector_id(&self) -> i32 {
        self.config.detector_id
    }

    #[allow(clippy::cast_possible_truncation)]
    fn channel_count(&self) -> u32 {
        // Bounded by validate().
        self.config.bank_crates.len() as u32 * self.config.modules_per_bank
    }

    fn route(&self, module: u32) -> std::result::Result<HardwareAddress, RouteError> {
        let c = &self.config;
        let bank = (module / c.modules_per_bank) as usize;
        let Some(&crate_id) = c.bank_crates.get(bank) else {
            return Err(RouteError::ChannelOutOfRange {
                det_id: c.detector_id,
                channel: module,
                limit: self.channel_count(),
            });
        };
        let offset = module % c.modules_per_bank;
        Ok(HardwareAddress::new(
            crate_id,
            self.board_slot(offset / c.channels_per_module),
            module % c.channels_per_module,
        ))
    }

    fn slots(&self) -> BTreeSet<SlotAddress> {
        let c = &self.config;
        let boards = c.modules_per_bank.div_ceil(c.channels_per_module);
        c.bank_crates
            .iter()
            .flat_map(|&crate_id| {
                (0..boards).map(move |board| SlotAddress::new(crate_id, self.board_slot(board)))
            })
            .collect()
    }
}

/// Generic linear mapping through the crate map layout.
#[derive(Clone, Debug)]
pub struct LinearRouter {
    detector_id: i32,
    layout: ChannelLayout,
    channel_count: u32,
}

impl LinearRouter {
    /// Creates a router for `channel_count` channels of detector `detector_id`.
    #[must_use]
    pub fn new(detector_id: i32, layout: ChannelLayout, channel_count: u32) -> Self {
        Self {
            detector_id,
            layout,
            channel_count,
        }
    }
}

impl ChannelRouter for LinearRouter {
    fn detector_id(&self) -> i32 {
        self.detector_id
    }

    fn channel_count(&self) -> u32 {
        self.channel_count
    }

    fn route(&self, channel: u32) -> std::result::Result<HardwareAddress, RouteError> {
        if channel >= self.channel_count {
            return Err(RouteError::ChannelOutOfRange {
                det_id: self.detector_id,
                channel,
                limit: self.channel_count,
            });
        }
        Ok(self.layout.to_hardware_address(channel))
    }
}
