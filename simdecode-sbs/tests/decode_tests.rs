#![allow(clippy::cast_possible_truncation)]
use simdecode_core::OutputRecord;
use simdecode_sbs::slot::{PAYLOAD_ADC, PAYLOAD_TDC};
use simdecode_sbs::{
    ChannelLayout, ChannelRouter, DecoderConfig, DecoderState, HardwareAddress, HcalRouter,
    LinearRouter, SimDecoder, SimEvent, SlotAddress, SlotDataRegistry,
};

// Helper to build an fADC waveform payload
fn adc(samples: &[u32]) -> Vec<u32> {
    let mut data = vec![PAYLOAD_ADC, samples.len() as u32];
    data.extend_from_slice(samples);
    data
}

// Helper to build a TDC payload
fn tdc(lead: u32, trail: u32) -> Vec<u32> {
    vec![PAYLOAD_TDC, 2, lead, trail]
}

#[test]
fn test_full_event_into_slots() {
    let mut decoder = SimDecoder::new(DecoderConfig::sbs_defaults()).unwrap();
    let mut registry = SlotDataRegistry::new();

    let mut ev = SimEvent::new(1, 1.0);
    ev.push(2, 200, adc(&[1, 2, 3])); // 11/4/8
    ev.push(2, 201, tdc(40, 55)); // 11/4/9
    ev.push(2, 0, adc(&[10])); // 10/4/0
    ev.push(2, 112, adc(&[5, 5])); // 10/13/0 (slot 11 shifted)

    let summary = decoder.load_event(&mut registry, &ev.to_words()).unwrap();
    assert_eq!(summary.routed, 4);
    assert_eq!(summary.slots_loaded, 3);
    assert_eq!(summary.load_failures, 0);
    assert_eq!(decoder.state(), DecoderState::Ready);

    let slot = registry.slot(SlotAddress::new(11, 4)).unwrap();
    assert_eq!(slot.load_calls(), 1);
    let hits = slot.hits();
    assert_eq!(hits.base.channel, vec![8, 9]);
    assert_eq!(hits.base.adc, vec![6, 0]);
    assert_eq!(hits.base.tdc_l, vec![0, 40]);
    assert_eq!(hits.base.tdc_t, vec![0, 55]);
    assert!(hits.check_size(false, false, true));

    let shifted = registry.slot(SlotAddress::new(10, 13)).unwrap();
    assert_eq!(shifted.hits().base.adc, vec![10]);
    assert!(registry.slot(SlotAddress::new(10, 11)).is_none());

    assert_eq!(decoder.hit_index(HardwareAddress::new(11, 4, 9)), Some(1));
    assert_eq!(decoder.hit_index(HardwareAddress::new(10, 13, 0)), Some(3));
}

#[test]
fn test_slots_cleared_between_events() {
    let mut decoder = SimDecoder::new(DecoderConfig::sbs_defaults()).unwrap();
    let mut registry = SlotDataRegistry::new();

    let mut first = SimEvent::new(1, 1.0);
    first.push(2, 3, adc(&[7, 7]));
    decoder.decode_event(&mut registry, &first).unwrap();
    let addr = SlotAddress::new(10, 4);
    assert_eq!(registry.slot(addr).unwrap().hits().hit_count(), 1);

    let mut second = SimEvent::new(2, 1.0);
    second.push(2, 20, adc(&[1])); // 10/5
    decoder.decode_event(&mut registry, &second).unwrap();
    assert_eq!(registry.slot(addr).unwrap().hits().hit_count(), 0);
    assert_eq!(registry.slot(addr).unwrap().load_calls(), 0);
    assert_eq!(decoder.statistics().events, 2);
}

#[test]
fn test_malformed_payload_counted_not_fatal() {
    let mut decoder = SimDecoder::new(DecoderConfig::sbs_defaults()).unwrap();
    let mut registry = SlotDataRegistry::new();

    let mut ev = SimEvent::new(5, 1.0);
    ev.push(2, 0, vec![PAYLOAD_ADC, 9, 1]); // claims 9 samples
    ev.push(2, 192, adc(&[2]));
    let summary = decoder.decode_event(&mut registry, &ev).unwrap();

    assert_eq!(summary.load_failures, 1);
    assert_eq!(summary.slots_loaded, 1);
    assert_eq!(
        registry.slot(SlotAddress::new(11, 4)).unwrap().hits().hit_count(),
        1
    );
}

#[test]
fn test_partially_wired_crate_map() {
    let json = r#"{ "crate_map": { "slots": [ {"crate": 10, "slot": 4} ] } }"#;
    let mut decoder = SimDecoder::new(DecoderConfig::from_json(json).unwrap()).unwrap();
    let mut registry = SlotDataRegistry::new();

    let mut ev = SimEvent::new(9, 1.0);
    for module in [0, 1, 2, 16, 192, 300] {
        ev.push(2, module, adc(&[1]));
    }
    let summary = decoder.decode_event(&mut registry, &ev).unwrap();
    assert_eq!(registry.len(), 1);
    assert_eq!(summary.routed, 3);
    assert_eq!(summary.skipped_unwired, 3);
    assert_eq!(decoder.statistics().skipped_unwired, 3);
}

#[test]
fn test_reconfigure_rebuilds_slots() {
    let mut decoder = SimDecoder::new(DecoderConfig::sbs_defaults()).unwrap();
    let mut registry = SlotDataRegistry::new();
    decoder
        .decode_event(&mut registry, &SimEvent::new(1, 1.0))
        .unwrap();
    assert_eq!(registry.len(), 20);

    let json = r#"{ "crate_map": { "slots": [ {"crate": 10, "slot": 4}, {"crate": 10, "slot": 5} ] } }"#;
    decoder.set_config(DecoderConfig::from_json(json).unwrap()).unwrap();
    decoder
        .decode_event(&mut registry, &SimEvent::new(2, 1.0))
        .unwrap();
    assert_eq!(registry.len(), 2);
}

#[test]
fn test_extra_detector_with_linear_router() {
    let mut config = DecoderConfig::sbs_defaults();
    config.crate_map.slots.push(SlotAddress::new(0, 1));
    let layout = config.crate_map.layout().unwrap();
    let mut decoder = SimDecoder::new(config).unwrap();
    decoder.register_router(Box::new(LinearRouter::new(30, layout, 64)));

    let mut registry = SlotDataRegistry::new();
    let mut ev = SimEvent::new(4, 1.0);
    ev.push(30, 17, tdc(3, 4)); // linear 17 -> 0/1/1
    ev.push(30, 64, tdc(3, 4)); // out of range
    let summary = decoder.decode_event(&mut registry, &ev).unwrap();
    assert_eq!(summary.routed, 1);
    assert_eq!(summary.rejected, 1);
    assert_eq!(
        registry.slot(SlotAddress::new(0, 1)).unwrap().hits().base.channel,
        vec![1]
    );
}

#[test]
fn test_hcal_routes_inside_layout() {
    let config = DecoderConfig::sbs_defaults();
    let layout: ChannelLayout = config.crate_map.layout().unwrap();
    let router = HcalRouter::new(config.hcal).unwrap();
    for module in 0..router.channel_count() {
        let addr = router.route(module).unwrap();
        assert!(layout.contains(addr), "module {module} -> {addr}");
        let linear = layout.to_linear_channel(addr).unwrap();
        assert_eq!(layout.to_hardware_address(linear), addr);
    }
}

#[test]
fn test_large_adc_samples_do_not_abort_decoding() {
    let mut decoder = SimDecoder::new(DecoderConfig::sbs_defaults()).unwrap();
    let mut registry = SlotDataRegistry::new();

    let mut ev = SimEvent::new(6, 1.0);
    ev.push(2, 0, adc(&[0x7FFF_FFFF, 1])); // sum overflows i32
    ev.push(2, 16, adc(&[0x8000_0000])); // not an i32 sample
    ev.push(2, 32, adc(&[0x7FFF_FFFF])); // 10/6, largest valid sample
    let summary = decoder.decode_event(&mut registry, &ev).unwrap();

    assert_eq!(summary.routed, 3);
    assert_eq!(summary.load_failures, 2);
    assert_eq!(summary.slots_loaded, 1);
    assert_eq!(
        registry.slot(SlotAddress::new(10, 4)).unwrap().hits().hit_count(),
        0
    );
    let kept = registry.slot(SlotAddress::new(10, 6)).unwrap();
    assert_eq!(kept.hits().base.adc, vec![i32::MAX]);
}

#[test]
fn test_largest_encodable_address_decodes() {
    // Linear index u32::MAX - 1 lands on crate 12_782_640, slot 15, channel 14.
    let json = r#"{
        "crate_map": { "slots": [ {"crate": 12782640, "slot": 15} ] },
        "hcal": { "bank_crates": [12782640, 11] }
    }"#;
    let config = DecoderConfig::from_json(json).unwrap();
    let layout = config.crate_map.layout().unwrap();
    let mut decoder = SimDecoder::new(config).unwrap();
    decoder.register_router(Box::new(LinearRouter::new(30, layout, u32::MAX)));
    let mut registry = SlotDataRegistry::new();

    let mut ev = SimEvent::new(8, 1.0);
    ev.push(30, u32::MAX - 1, tdc(1, 2));
    ev.push(30, u32::MAX, tdc(1, 2)); // past channel_count
    ev.push(2, 191, adc(&[4])); // 12782640/15/15
    ev.push(2, u32::MAX, adc(&[4]));
    let summary = decoder.decode_event(&mut registry, &ev).unwrap();

    assert_eq!(summary.routed, 2);
    assert_eq!(summary.rejected, 2);
    let top = SlotAddress::new(12_782_640, 15);
    assert_eq!(registry.slot(top).unwrap().hits().base.channel, vec![14, 15]);
    assert_eq!(
        decoder.hit_index(HardwareAddress::new(12_782_640, 15, 14)),
        Some(0)
    );
    assert_eq!(
        decoder.hit_index(HardwareAddress::new(12_782_640, 15, 15)),
        Some(2)
    );
}

#[test]
fn test_oversized_crate_config_rejected() {
    let json = r#"{ "hcal": { "bank_crates": [300000000, 11] } }"#;
    assert!(DecoderConfig::from_json(json).is_err());

    let mut config = DecoderConfig::sbs_defaults();
    config.hcal.bank_crates = vec![300_000_000, 11];
    assert!(SimDecoder::new(config.clone()).is_err());

    let mut decoder = SimDecoder::new(DecoderConfig::sbs_defaults()).unwrap();
    assert!(decoder.set_config(config).is_err());
    assert_eq!(decoder.config().hcal.bank_crates, vec![10, 11]);
}
