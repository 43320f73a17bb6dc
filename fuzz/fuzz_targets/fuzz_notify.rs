//! Fuzz target: `OtaEngine::set_bluetooth_notify_data`
//!
//! Opens a transfer session, then feeds arbitrary notifications on both
//! channels. The engine must never panic, must keep progress within
//! `[0, 1]`, and must release the session once enough time passes.
//!
//! cargo fuzz run fuzz_notify

#![no_main]

use std::time::Duration;

use libfuzzer_sys::fuzz_target;
use otalink::OtaConfig;
use otalink::ota::{Channel, EngineState, FileKind, OtaEngine, OtaListener};

struct Sink {
    progress: Vec<f32>,
}

impl OtaListener for Sink {
    fn on_packet(&mut self, _packet: &[u8], _channel: Channel) {}

    fn on_progress(&mut self, progress: f32) {
        self.progress.push(progress);
    }
}

fuzz_target!(|data: &[u8]| {
    let config = OtaConfig {
        frame_payload_size: 16,
        ..OtaConfig::default()
    };
    let mut engine = OtaEngine::new(config, Sink { progress: Vec::new() });
    let _ = engine.load_binary(&[0xA5; 100], FileKind::App);
    let _ = engine.read_partition_addr(FileKind::Config);

    // First byte of each chunk picks the channel, the rest is the value.
    for chunk in data.chunks(12) {
        let Some((&selector, value)) = chunk.split_first() else {
            continue;
        };
        let channel = if selector & 1 == 0 { Channel::Data } else { Channel::Command };
        engine.set_bluetooth_notify_data(value, channel);
    }

    assert!(engine.listener().progress.iter().all(|p| (0.0..=1.0).contains(p)));
    engine.tick(Duration::from_secs(60));
    assert_eq!(engine.state(), EngineState::Idle);
});
