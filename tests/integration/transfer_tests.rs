//! End-to-end transfers: engine → transport → simulated target → notify
//! → demux → engine.

use std::time::Duration;

use otalink::OtaConfig;
use otalink::error::{RequestError, TransferError};
use otalink::ota::{EngineState, FileKind, HmacStreamCipher, IspKind, Opcode, TargetStatus};
use otalink::sim::{Faults, SimulatedTarget, TargetMode};

use crate::harness::{Harness, Observed, image};

fn harness_with(config: OtaConfig, faults: Faults) -> Harness {
    let target = SimulatedTarget::new(&config).with_faults(faults);
    Harness::new(config, target)
}

// ── Happy path ────────────────────────────────────────────────

#[test]
fn app_image_lands_on_target() {
    let mut h = Harness::with_defaults();
    let img = image(5_000);
    h.transfer(&img, FileKind::App);

    assert!(h.observed().contains(&Observed::Complete(FileKind::App)));
    assert_eq!(h.link.target().image(FileKind::App), Some(img.as_slice()));
    assert_eq!(h.engine.state(), EngineState::Idle);

    // Target confirms Begin and End.
    assert!(h.observed().contains(&Observed::CommandAck(Opcode::End, TargetStatus::Ok)));
}

#[test]
fn thirty_seven_bytes_at_frame_twenty() {
    let config = OtaConfig {
        frame_payload_size: 20,
        ..OtaConfig::default()
    };
    let mut h = harness_with(config, Faults::default());
    let img = image(37);
    h.transfer(&img, FileKind::Config);

    assert_eq!(h.link.target().image(FileKind::Config), Some(img.as_slice()));
    let progress = h.progress();
    assert_eq!(progress.len(), 3, "start, after frame 0, complete");
    assert_eq!(progress[0], 0.0);
    assert!((progress[1] - 20.0 / 37.0).abs() < 1e-6);
    assert_eq!(progress[2], 1.0);
}

#[test]
fn progress_is_monotonic_and_ends_at_one() {
    let config = OtaConfig {
        frame_payload_size: 64,
        ..OtaConfig::default()
    };
    let mut h = harness_with(config, Faults::default());
    h.transfer(&image(3_001), FileKind::Patch);

    let progress = h.progress();
    assert!(progress.windows(2).all(|w| w[0] <= w[1]));
    assert_eq!(progress.last(), Some(&1.0));
}

#[test]
fn encrypted_transfer_round_trips() {
    let config = OtaConfig::default();
    let target = SimulatedTarget::new(&config).with_cipher(Box::new(HmacStreamCipher::new(b"shared-key")));
    let mut h = Harness::new(config, target);
    h.engine = std::mem::replace(&mut h.engine, placeholder())
        .with_cipher(Box::new(HmacStreamCipher::new(b"shared-key")));
    h.engine.set_encrypt(true);

    let img = image(1_000);
    h.transfer(&img, FileKind::App);
    assert!(h.engine.observer().completed());
    assert_eq!(h.link.target().image(FileKind::App), Some(img.as_slice()));
}

#[test]
fn mismatched_key_is_rejected_by_target() {
    let config = OtaConfig::default();
    let target = SimulatedTarget::new(&config).with_cipher(Box::new(HmacStreamCipher::new(b"right")));
    let mut h = Harness::new(config, target);
    h.engine = std::mem::replace(&mut h.engine, placeholder()).with_cipher(Box::new(HmacStreamCipher::new(b"wrong")));
    h.engine.set_encrypt(true);

    h.transfer(&image(300), FileKind::App);
    assert_eq!(
        h.engine.observer().failure(),
        Some(TransferError::TargetRejected(TargetStatus::CrcMismatch))
    );
    assert_eq!(h.link.target().image(FileKind::App), None);
}

/// A throwaway engine used only to move the real one out of the harness.
fn placeholder() -> crate::harness::Engine {
    Harness::with_defaults().engine
}

// ── Failure paths ─────────────────────────────────────────────

#[test]
fn dropped_ack_times_out() {
    let mut h = harness_with(
        OtaConfig::default(),
        Faults {
            drop_ack_at: Some(2),
            ..Faults::default()
        },
    );
    h.engine.load_binary(&image(1_000), FileKind::App).unwrap();
    h.pump();

    let start = h.progress().len();
    assert!(!h.run_until(Duration::from_millis(2_990), |h| h.engine.observer().finished()));
    assert!(h.run_until(Duration::from_millis(20), |h| h.engine.observer().finished()));
    assert_eq!(h.engine.observer().failure(), Some(TransferError::AckTimeout));
    assert_eq!(h.progress().len(), start, "no progress after the stall");
    assert_eq!(h.engine.state(), EngineState::Idle);
}

#[test]
fn corrupted_ack_fails_session() {
    let mut h = harness_with(
        OtaConfig::default(),
        Faults {
            corrupt_ack_at: Some(0),
            ..Faults::default()
        },
    );
    h.transfer(&image(500), FileKind::App);
    assert_eq!(h.engine.observer().failure(), Some(TransferError::MalformedAck));
}

#[test]
fn rejected_begin_fails_session() {
    let mut h = harness_with(
        OtaConfig::default(),
        Faults {
            reject_begin: true,
            ..Faults::default()
        },
    );
    h.transfer(&image(500), FileKind::App);
    assert_eq!(
        h.engine.observer().failure(),
        Some(TransferError::TargetRejected(TargetStatus::Busy))
    );
}

#[test]
fn oversized_image_rejected_by_target() {
    let mut h = Harness::with_defaults();
    // Patch partition is 0x3000 bytes.
    h.transfer(&image(0x3001), FileKind::Patch);
    assert_eq!(
        h.engine.observer().failure(),
        Some(TransferError::TargetRejected(TargetStatus::InvalidLength))
    );
}

#[test]
fn retry_after_failure_succeeds() {
    let mut h = harness_with(
        OtaConfig::default(),
        Faults {
            drop_ack_at: Some(1),
            ..Faults::default()
        },
    );
    let img = image(2_000);
    h.transfer(&img, FileKind::App);
    assert_eq!(h.engine.observer().failure(), Some(TransferError::AckTimeout));

    h.transfer(&img, FileKind::App);
    assert!(h.engine.observer().completed());
    assert_eq!(h.link.target().image(FileKind::App), Some(img.as_slice()));
}

#[test]
fn cancel_stops_frames() {
    let mut h = Harness::with_defaults();
    h.engine.load_binary(&image(10_000), FileKind::App).unwrap();
    h.engine.cancel();
    let sent = h.engine.listener().inner.packets_sent();
    h.pump();
    assert_eq!(h.engine.listener().inner.packets_sent(), sent);
    assert_eq!(h.engine.observer().failure(), Some(TransferError::Cancelled));
}

#[test]
fn second_load_is_busy() {
    let mut h = Harness::with_defaults();
    h.engine.load_binary(&image(1_000), FileKind::App).unwrap();
    let sent = h.engine.listener().inner.packets_sent();
    assert_eq!(h.engine.load_binary(&image(10), FileKind::Config), Err(RequestError::Busy));
    assert_eq!(h.engine.listener().inner.packets_sent(), sent);
}

// ── Single-shot commands ──────────────────────────────────────

#[test]
fn partition_address_is_reported() {
    let mut h = Harness::with_defaults();
    h.engine.read_partition_addr(FileKind::Config).unwrap();
    h.pump();
    let expected = h.link.target().partition(FileKind::Config).unwrap();
    assert_eq!(h.observed(), &[Observed::Address(expected)]);
}

#[test]
fn user_data_write_reaches_target() {
    let mut h = Harness::with_defaults();
    let base = h.engine.config().user_data_base;
    h.engine.write_user_data(b"serial-0042", base + 8).unwrap();
    h.pump();
    assert_eq!(h.observed(), &[Observed::UserData(Ok(()))]);
    assert_eq!(h.link.target().user_data(base + 8, 11), Some(&b"serial-0042"[..]));
}

#[test]
fn isp_entry_is_acknowledged_when_target_replies() {
    let mut h = Harness::with_defaults();
    h.engine.enter_isp(IspKind::IspAddr);
    h.pump();
    assert_eq!(h.link.target().mode(), TargetMode::Isp(IspKind::IspAddr));
    assert_eq!(h.observed(), &[Observed::CommandAck(Opcode::EnterIsp, TargetStatus::Ok)]);
}

#[test]
fn reset_is_fire_and_forget() {
    let mut h = Harness::with_defaults();
    h.engine.reset_target();
    h.run_until(Duration::from_secs(5), |_| false);
    assert_eq!(h.link.target().resets(), 1);
    assert!(h.observed().is_empty());
}
