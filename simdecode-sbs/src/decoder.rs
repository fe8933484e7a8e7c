//! Event decode loop.
//!
//! For every event the decoder
//!
//! 1. initializes the crate map and slot storage on first use or after
//!    [`SimDecoder::request_reinit`],
//! 2. clears slot storage and its own per-event state,
//! 3. routes each detector data entry to a hardware address and appends
//!    `channel, payload...` to the buffer of the target slot,
//! 4. hands each slot its buffer in a single loader call.

use crate::address::{ChannelMap, HardwareAddress, SlotAddress};
use crate::event::SimEvent;
use crate::routing::{ChannelRouter, HcalRouter};
use crate::slot::SlotRegistry;
use crate::{DecoderConfig, Result};
use log::{debug, trace, warn};
use serde::Serialize;
use std::collections::BTreeMap;

/// Event type recorded for decoded physics events.
pub const PHYSICS_EVENT_TYPE: u32 = 1;

/// Source id of events coming straight from the simulation.
pub const PRIMARY_SOURCE: u32 = 0;

/// Initialization state of a decoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecoderState {
    /// Crate map and slot storage not built yet.
    Uninitialized,
    /// Ready to decode events.
    Ready,
}

/// Outcome of decoding one event.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EventSummary {
    /// Event number.
    pub event_num: u32,
    /// Event type.
    pub event_type: u32,
    /// Event source.
    pub event_source: u32,
    /// Event weight.
    pub weight: f64,
    /// Entries appended to a slot buffer.
    pub routed: usize,
    /// Routed entries whose slot has no storage.
    pub skipped_unwired: usize,
    /// Entries whose channel is outside the routed range or whose address
    /// has no linear channel index.
    pub rejected: usize,
    /// Entries without a router or without payload.
    pub ignored: usize,
    /// Slots handed a buffer.
    pub slots_loaded: usize,
    /// Slots whose loader returned an error.
    pub load_failures: usize,
    /// Total words handed to loaders.
    pub words_dispatched: usize,
}

/// Totals over all events decoded by one decoder.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DecoderStatistics {
    /// Events decoded.
    pub events: usize,
    /// Entries appended to a slot buffer.
    pub routed: usize,
    /// Entries dropped because their slot has no storage.
    pub skipped_unwired: usize,
    /// Entries rejected by their router.
    pub rejected: usize,
    /// Entries without a router or without payload.
    pub ignored: usize,
    /// Loader calls made.
    pub slots_loaded: usize,
    /// Loader calls that failed.
    pub load_failures: usize,
    /// Total words handed to loaders.
    pub words_dispatched: usize,
}

impl DecoderStatistics {
    /// Adds one event.
    pub fn record(&mut self, summary: &EventSummary) {
        self.events += 1;
        self.routed += summary.routed;
        self.skipped_unwired += summary.skipped_unwired;
        self.rejected += summary.rejected;
        self.ignored += summary.ignored;
        self.slots_loaded += summary.slots_loaded;
        self.load_failures += summary.load_failures;
        self.words_dispatched += summary.words_dispatched;
    }

    /// Merges totals of another decoder.
    pub fn merge(&mut self, other: &Self) {
        self.events += other.events;
        self.routed += other.routed;
        self.skipped_unwired += other.skipped_unwired;
        self.rejected += other.rejected;
        self.ignored += other.ignored;
        self.slots_loaded += other.slots_loaded;
        self.load_failures += other.load_failures;
        self.words_dispatched += other.words_dispatched;
    }
}

/// Decoder for simulated events.
pub struct SimDecoder {
    config: DecoderConfig,
    routers: BTreeMap<i32, Box<dyn ChannelRouter>>,
    state: DecoderState,
    need_init: bool,
    event_num: u32,
    event_type: u32,
    event_source: u32,
    weight: f64,
    hit_map: ChannelMap,
    stats: DecoderStatistics,
}

impl SimDecoder {
    /// Creates a decoder with the HCal router of `config` registered.
    ///
    /// # Errors
    /// Returns [`crate::Error::Config`] if `config` is invalid.
    pub fn new(config: DecoderConfig) -> Result<Self> {
        config.validate()?;
        let layout = config.crate_map.layout()?;
        let mut decoder = Self {
            routers: BTreeMap::new(),
            state: DecoderState::Uninitialized,
            need_init: true,
            event_num: 0,
            event_type: 0,
            event_source: PRIMARY_SOURCE,
            weight: 1.0,
            hit_map: ChannelMap::new(layout),
            stats: DecoderStatistics::default(),
            config,
        };
        decoder.register_router(Box::new(HcalRouter::new(decoder.config.hcal.clone())?));
        Ok(decoder)
    }

    /// Registers `router` for its detector id, returning the router it replaced.
    pub fn register_router(
        &mut self,
        router: Box<dyn ChannelRouter>,
    ) -> Option<Box<dyn ChannelRouter>> {
        self.routers.insert(router.detector_id(), router)
    }

    /// Router for `det_id`, if any.
    #[must_use]
    pub fn router(&self, det_id: i32) -> Option<&dyn ChannelRouter> {
        self.routers.get(&det_id).map(|r| &**r)
    }

    /// Replaces the configuration and schedules reinitialization.
    ///
    /// The HCal router is rebuilt from the new configuration; other
    /// registered routers are kept.
    ///
    /// # Errors
    /// Returns [`crate::Error::Config`] if `config` is invalid; the current
    /// configuration is kept in that case.
    pub fn set_config(&mut self, config: DecoderConfig) -> Result<()> {
        config.validate()?;
        let layout = config.crate_map.layout()?;
        let hcal = HcalRouter::new(config.hcal.clone())?;
        self.routers.remove(&self.config.hcal.detector_id);
        self.register_router(Box::new(hcal));
        self.hit_map.reset(layout);
        self.config = config;
        self.request_reinit();
        Ok(())
    }

    /// Current configuration.
    #[must_use]
    pub fn config(&self) -> &DecoderConfig {
        &self.config
    }

    /// Forces crate map and slot storage to be rebuilt before the next event.
    pub fn request_reinit(&mut self) {
        self.need_init = true;
    }

    /// Initialization state.
    #[must_use]
    pub fn state(&self) -> DecoderState {
        self.state
    }

    /// Number of the last decoded event.
    #[must_use]
    pub fn event_num(&self) -> u32 {
        self.event_num
    }

    /// Type of the last decoded event.
    #[must_use]
    pub fn event_type(&self) -> u32 {
        self.event_type
    }

    /// Source of the last decoded event.
    #[must_use]
    pub fn event_source(&self) -> u32 {
        self.event_source
    }

    /// Weight of the last decoded event.
    #[must_use]
    pub fn weight(&self) -> f64 {
        self.weight
    }

    /// Totals since construction.
    #[must_use]
    pub fn statistics(&self) -> &DecoderStatistics {
        &self.stats
    }

    /// Index of the detector data entry routed to `addr` in the last event.
    #[must_use]
    pub fn hit_index(&self, addr: HardwareAddress) -> Option<usize> {
        self.hit_map.lookup(addr)
    }

    /// Resets per-event state.
    pub fn clear(&mut self) {
        self.weight = 1.0;
        self.hit_map.clear();
    }

    fn initialize<R: SlotRegistry>(&mut self, registry: &mut R) -> Result<()> {
        self.state = DecoderState::Uninitialized;
        registry.init_crate_map(&self.config.crate_map)?;
        registry.init_slot_data()?;
        self.state = DecoderState::Ready;
        self.need_init = false;
        debug!(
            "decoder initialized: {} router(s), {} wired slot(s)",
            self.routers.len(),
            self.config.crate_map.slots.len()
        );
        Ok(())
    }

    /// Parses `buffer` as an event record and decodes it.
    ///
    /// # Errors
    /// Returns [`crate::Error::Format`] for a malformed buffer, or the
    /// initialization error of the registry.
    pub fn load_event<R: SlotRegistry>(
        &mut self,
        registry: &mut R,
        buffer: &[u32],
    ) -> Result<EventSummary> {
        let event = SimEvent::parse(buffer)?;
        self.decode_event(registry, &event)
    }

    /// Decodes one event into the slots of `registry`.
    ///
    /// # Errors
    /// Returns the registry's initialization error. The decoder stays
    /// uninitialized and retries on the next call.
    pub fn decode_event<R: SlotRegistry>(
        &mut self,
        registry: &mut R,
        event: &SimEvent,
    ) -> Result<EventSummary> {
        if self.need_init || self.state == DecoderState::Uninitialized {
            self.initialize(registry)?;
        }

        self.clear();
        registry.clear_slots();

        self.event_type = PHYSICS_EVENT_TYPE;
        self.event_source = PRIMARY_SOURCE;
        self.event_num = event.event_id;
        self.weight = event.weight;

        let mut summary = EventSummary {
            event_num: self.event_num,
            event_type: self.event_type,
            event_source: self.event_source,
            weight: self.weight,
            ..EventSummary::default()
        };

        debug!("start processing event: {}", self.event_num);
        let mut groups: BTreeMap<SlotAddress, Vec<u32>> = BTreeMap::new();
        for (index, entry) in event.detector_data.iter().enumerate() {
            let Some(router) = self.routers.get(&entry.det_id) else {
                summary.ignored += 1;
                continue;
            };
            if entry.data.is_empty() {
                summary.ignored += 1;
                continue;
            }
            let addr = match router.route(entry.channel) {
                Ok(addr) => addr,
                Err(err) => {
                    warn!("event {}: {err}", self.event_num);
                    summary.rejected += 1;
                    continue;
                }
            };
            let slot = addr.slot_address();
            if !registry.contains(slot) {
                trace!("no slot data for {addr}, entry {index} dropped");
                summary.skipped_unwired += 1;
                continue;
            }
            if entry.data[0] == 1 {
                trace!(
                    "M: {}, C: {}, S: {}, C: {}, I: {:?}",
                    entry.channel,
                    addr.crate_id,
                    addr.slot,
                    addr.channel,
                    entry.data.get(2)
                );
            }
            match self.hit_map.insert(addr, index) {
                Ok(Some(prev)) => warn!(
                    "event {}: entries {prev} and {index} both map to {addr}",
                    self.event_num
                ),
                Ok(None) => {}
                Err(err) => {
                    warn!("event {}: {err}", self.event_num);
                    summary.rejected += 1;
                    continue;
                }
            }
            let buf = groups.entry(slot).or_default();
            buf.push(addr.channel);
            buf.extend_from_slice(&entry.data);
            summary.routed += 1;
        }

        debug!("routed hits: {} in {} slot(s)", summary.routed, groups.len());
        for (slot, buf) in &groups {
            match registry.load_slot(*slot, buf, 0, buf.len()) {
                Ok(_) => {
                    summary.slots_loaded += 1;
                    summary.words_dispatched += buf.len();
                }
                Err(err) => {
                    warn!("event {}: {err}", self.event_num);
                    summary.load_failures += 1;
                }
            }
        }
        debug!("end processing event: {}", self.event_num);

        self.stats.record(&summary);
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::SlotAddress;
    use crate::routing::RouteError;
    use crate::slot::{SlotDataRegistry, PAYLOAD_ADC};
    use crate::{CrateMapConfig, Error};

    /// Registry that records every call and can be told to fail.
    #[derive(Default)]
    struct RecordingRegistry {
        wired: Vec<SlotAddress>,
        fail_crate_map: bool,
        crate_map_inits: usize,
        slot_inits: usize,
        clears: usize,
        loads: Vec<(SlotAddress, Vec<u32>, usize, usize)>,
    }

    impl SlotRegistry for RecordingRegistry {
        fn init_crate_map(&mut self, _config: &CrateMapConfig) -> Result<()> {
            self.crate_map_inits += 1;
            if self.fail_crate_map {
                return Err(Error::CrateMapInit("database unavailable".into()));
            }
            Ok(())
        }

        fn init_slot_data(&mut self) -> Result<()> {
            self.slot_inits += 1;
            Ok(())
        }

        fn clear_slots(&mut self) {
            self.clears += 1;
        }

        fn contains(&self, slot: SlotAddress) -> bool {
            self.wired.contains(&slot)
        }

        fn load_slot(
            &mut self,
            slot: SlotAddress,
            buffer: &[u32],
            offset: usize,
            length: usize,
        ) -> Result<usize> {
            self.loads.push((slot, buffer.to_vec(), offset, length));
            Ok(1)
        }
    }

    fn recording(slots: &[(u32, u32)]) -> RecordingRegistry {
        RecordingRegistry {
            wired: slots.iter().map(|&(c, s)| SlotAddress::new(c, s)).collect(),
            ..RecordingRegistry::default()
        }
    }

    fn decoder() -> SimDecoder {
        SimDecoder::new(DecoderConfig::sbs_defaults()).unwrap()
    }

    #[test]
    fn test_same_slot_grouped_in_arrival_order() {
        let mut dec = decoder();
        let mut reg = recording(&[(11, 4)]);
        let mut ev = SimEvent::new(7, 1.0);
        ev.push(2, 200, vec![0, 2, 5, 6]);
        ev.push(2, 193, vec![1, 1, 9]);
        let summary = dec.decode_event(&mut reg, &ev).unwrap();

        assert_eq!(reg.loads.len(), 1);
        let (slot, buf, offset, length) = &reg.loads[0];
        assert_eq!(*slot, SlotAddress::new(11, 4));
        assert_eq!(buf, &vec![8, 0, 2, 5, 6, 1, 1, 1, 9]);
        assert_eq!((*offset, *length), (0, 9));
        assert_eq!(summary.routed, 2);
        assert_eq!(summary.slots_loaded, 1);
        assert_eq!(summary.words_dispatched, 9);
    }

    #[test]
    fn test_one_load_per_slot() {
        let mut dec = decoder();
        let mut reg = recording(&[(10, 4), (10, 5), (11, 4)]);
        let mut ev = SimEvent::new(1, 1.0);
        ev.push(2, 0, vec![0, 0]);
        ev.push(2, 16, vec![0, 0]);
        ev.push(2, 1, vec![0, 0]);
        ev.push(2, 192, vec![0, 0]);
        dec.decode_event(&mut reg, &ev).unwrap();

        let slots: Vec<_> = reg.loads.iter().map(|l| l.0).collect();
        assert_eq!(
            slots,
            vec![
                SlotAddress::new(10, 4),
                SlotAddress::new(10, 5),
                SlotAddress::new(11, 4)
            ]
        );
        assert_eq!(reg.loads[0].1, vec![0, 0, 0, 1, 0, 0]);
    }

    #[test]
    fn test_unwired_rejected_and_ignored_counted() {
        let mut dec = decoder();
        let mut reg = recording(&[(10, 4)]);
        let mut ev = SimEvent::new(3, 0.5);
        ev.push(2, 3, vec![0, 1, 4]); // routed
        ev.push(2, 40, vec![0, 1, 4]); // slot 10/6 not wired
        ev.push(2, 500, vec![0, 1, 4]); // past the last bank
        ev.push(2, 4, vec![]); // no payload
        ev.push(7, 3, vec![0, 1, 4]); // no router
        let summary = dec.decode_event(&mut reg, &ev).unwrap();

        assert_eq!(summary.routed, 1);
        assert_eq!(summary.skipped_unwired, 1);
        assert_eq!(summary.rejected, 1);
        assert_eq!(summary.ignored, 2);
        assert_eq!(reg.loads.len(), 1);
        assert_eq!(dec.statistics().skipped_unwired, 1);
    }

    #[test]
    fn test_event_info_and_hit_map() {
        let mut dec = decoder();
        let mut reg = recording(&[(11, 4)]);
        let mut ev = SimEvent::new(12, 0.125);
        ev.push(5, 0, vec![1]);
        ev.push(2, 200, vec![0, 0]);
        dec.decode_event(&mut reg, &ev).unwrap();

        assert_eq!(dec.event_num(), 12);
        assert_eq!(dec.event_type(), PHYSICS_EVENT_TYPE);
        assert_eq!(dec.event_source(), PRIMARY_SOURCE);
        assert!((dec.weight() - 0.125).abs() < f64::EPSILON);
        assert_eq!(dec.hit_index(HardwareAddress::new(11, 4, 8)), Some(1));
        assert_eq!(dec.hit_index(HardwareAddress::new(11, 4, 9)), None);

        // The hit map only covers the current event.
        dec.decode_event(&mut reg, &SimEvent::new(13, 1.0)).unwrap();
        assert_eq!(dec.hit_index(HardwareAddress::new(11, 4, 8)), None);
        assert_eq!(reg.clears, 2);
    }

    #[test]
    fn test_extreme_module_indices_rejected() {
        let mut dec = decoder();
        let mut reg = recording(&[(10, 4)]);
        let mut ev = SimEvent::new(u32::MAX, 1.0);
        ev.push(2, u32::MAX, vec![0, 1, 4]);
        ev.push(2, u32::MAX - 1, vec![0, 1, 4]);
        ev.push(2, 383, vec![0, 1, 4]); // last module, 11/15/15
        let summary = dec.decode_event(&mut reg, &ev).unwrap();

        assert_eq!(summary.rejected, 2);
        assert_eq!(summary.skipped_unwired, 1);
        assert!(reg.loads.is_empty());
        assert_eq!(dec.event_num(), u32::MAX);
    }

    #[test]
    fn test_unencodable_address_rejected() {
        // A registry may claim slots the layout cannot encode.
        let mut dec = decoder();
        dec.register_router(Box::new(FarRouter));
        let mut reg = recording(&[(u32::MAX, 4), (10, 4)]);
        let mut ev = SimEvent::new(1, 1.0);
        ev.push(40, 0, vec![0, 1, 4]);
        ev.push(2, 0, vec![0, 1, 4]);
        let summary = dec.decode_event(&mut reg, &ev).unwrap();

        assert_eq!(summary.rejected, 1);
        assert_eq!(summary.routed, 1);
        assert_eq!(reg.loads.len(), 1);
        assert_eq!(reg.loads[0].0, SlotAddress::new(10, 4));
        assert_eq!(dec.hit_index(HardwareAddress::new(u32::MAX, 4, 0)), None);
    }

    /// Routes every channel of detector 40 to crate `u32::MAX`.
    struct FarRouter;

    impl ChannelRouter for FarRouter {
        fn detector_id(&self) -> i32 {
            40
        }

        fn channel_count(&self) -> u32 {
            1
        }

        fn route(&self, channel: u32) -> std::result::Result<HardwareAddress, RouteError> {
            Ok(HardwareAddress::new(u32::MAX, 4, channel))
        }
    }

    #[test]
    fn test_init_once_and_on_request() {
        let mut dec = decoder();
        let mut reg = recording(&[]);
        assert_eq!(dec.state(), DecoderState::Uninitialized);
        let ev = SimEvent::new(1, 1.0);
        dec.decode_event(&mut reg, &ev).unwrap();
        dec.decode_event(&mut reg, &ev).unwrap();
        assert_eq!(dec.state(), DecoderState::Ready);
        assert_eq!((reg.crate_map_inits, reg.slot_inits), (1, 1));

        dec.request_reinit();
        dec.decode_event(&mut reg, &ev).unwrap();
        assert_eq!((reg.crate_map_inits, reg.slot_inits), (2, 2));
    }

    #[test]
    fn test_init_failure_propagates_and_retries() {
        let mut dec = decoder();
        let mut reg = RecordingRegistry {
            fail_crate_map: true,
            ..recording(&[(10, 4)])
        };
        let mut ev = SimEvent::new(1, 1.0);
        ev.push(2, 0, vec![0, 0]);

        assert!(matches!(
            dec.decode_event(&mut reg, &ev),
            Err(Error::CrateMapInit(_))
        ));
        assert_eq!(dec.state(), DecoderState::Uninitialized);
        assert_eq!(reg.slot_inits, 0);
        assert!(reg.loads.is_empty());
        assert_eq!(dec.statistics().events, 0);

        reg.fail_crate_map = false;
        dec.decode_event(&mut reg, &ev).unwrap();
        assert_eq!(dec.state(), DecoderState::Ready);
        assert_eq!(reg.loads.len(), 1);
    }

    #[test]
    fn test_load_event_from_words() {
        let mut dec = decoder();
        let mut reg = SlotDataRegistry::new();
        let mut ev = SimEvent::new(99, 2.0);
        ev.push(2, 200, vec![PAYLOAD_ADC, 2, 30, 40]);
        let summary = dec.load_event(&mut reg, &ev.to_words()).unwrap();
        assert_eq!(summary.slots_loaded, 1);

        let slot = reg.slot(SlotAddress::new(11, 4)).unwrap();
        assert_eq!(slot.hits().base.channel, vec![8]);
        assert_eq!(slot.hits().base.adc, vec![70]);

        let mut words = ev.to_words();
        words[0] = 0;
        assert!(matches!(
            dec.load_event(&mut reg, &words),
            Err(Error::Format(_))
        ));
    }

    #[test]
    fn test_set_config_reroutes() {
        let mut dec = decoder();
        let mut config = DecoderConfig::sbs_defaults();
        config.hcal.detector_id = 20;
        dec.set_config(config).unwrap();
        assert!(dec.router(2).is_none());
        assert!(dec.router(20).is_some());

        let mut bad = DecoderConfig::sbs_defaults();
        bad.crate_map.channels_per_slot = 0;
        assert!(dec.set_config(bad).is_err());
        assert_eq!(dec.config().hcal.detector_id, 20);
    }
}
