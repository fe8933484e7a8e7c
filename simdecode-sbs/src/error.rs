//! Decoder error types.

use crate::address::{HardwareAddress, SlotAddress};
use crate::event::EventFormatError;
use crate::routing::RouteError;
use thiserror::Error;

/// Result type for decoder operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Decoder error types.
#[derive(Error, Debug)]
pub enum Error {
    /// Event buffer does not follow the event record layout.
    #[error("invalid event buffer: {0}")]
    Format(#[from] EventFormatError),

    /// Module index could not be mapped to a hardware address.
    #[error("routing error: {0}")]
    Route(#[from] RouteError),

    /// Building the crate map failed.
    #[error("crate map initialization failed: {0}")]
    CrateMapInit(String),

    /// Building the per-slot storage failed.
    #[error("slot data initialization failed: {0}")]
    SlotDataInit(String),

    /// No storage exists for the slot.
    #[error("no slot data for crate {} slot {}", .0.crate_id, .0.slot)]
    UnknownSlot(SlotAddress),

    /// A slot rejected the payload handed to it.
    #[error("crate {} slot {}: malformed payload: {reason}", .slot.crate_id, .slot.slot)]
    MalformedPayload { slot: SlotAddress, reason: String },

    /// Hardware address too large for the linear channel encoding.
    #[error("address {0} has no linear channel index")]
    AddressOverflow(HardwareAddress),

    /// Invalid configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// JSON configuration parsing error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
