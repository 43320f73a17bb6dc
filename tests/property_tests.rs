//! Property tests for the packetizer, codec and transfer engine.

use std::time::Duration;

use otalink::OtaConfig;
use otalink::error::RequestError;
use otalink::ota::frame::{Command, DataAck, Frame};
use otalink::ota::packetizer::{Packetizer, Reassembler};
use otalink::ota::{Channel, EngineState, FileKind, OtaEngine, OtaListener, TargetStatus};
use proptest::prelude::*;

#[derive(Default)]
struct Recorder {
    data: Vec<Vec<u8>>,
    progress: Vec<f32>,
}

impl OtaListener for Recorder {
    fn on_packet(&mut self, packet: &[u8], channel: Channel) {
        if channel == Channel::Data {
            self.data.push(packet.to_vec());
        }
    }

    fn on_progress(&mut self, progress: f32) {
        self.progress.push(progress);
    }
}

fn kind_strategy() -> impl Strategy<Value = FileKind> {
    prop_oneof![Just(FileKind::App), Just(FileKind::Config), Just(FileKind::Patch)]
}

// ── Fragmentation ─────────────────────────────────────────────

proptest! {
    /// Fragmenting and reassembling in sequence order reproduces the payload.
    #[test]
    fn fragment_reassemble_identity(
        payload in proptest::collection::vec(any::<u8>(), 1..2_000),
        frame_size in 1usize..=244,
        kind in kind_strategy(),
    ) {
        let p = Packetizer::new(kind, frame_size);
        let mut r = Reassembler::new(payload.len());
        let mut out = None;
        let mut count = 0;
        for f in p.frames(&payload) {
            prop_assert_eq!(f.seq() as usize, count);
            prop_assert!(f.body().len() <= frame_size);
            out = r.push(f.seq(), f.is_last(), f.body()).unwrap();
            count += 1;
        }
        prop_assert_eq!(count, payload.len().div_ceil(frame_size));
        prop_assert_eq!(out, Some(payload));
    }

    /// Every encoded frame decodes back to itself.
    #[test]
    fn frame_codec_identity(
        body in proptest::collection::vec(any::<u8>(), 0..=244),
        seq in any::<u16>(),
        last in any::<bool>(),
    ) {
        let f = Frame::new(FileKind::App, seq, last, &body).unwrap();
        prop_assert_eq!(Frame::decode(&f.encode()).unwrap(), f);
    }

    /// A single flipped bit never decodes as a valid ack.
    #[test]
    fn corrupted_ack_never_decodes(
        seq in any::<u16>(),
        offset in any::<u32>(),
        bit in 0usize..80,
    ) {
        let ack = DataAck { status: TargetStatus::Ok, seq, next_offset: offset };
        let mut bytes = ack.encode().to_vec();
        bytes[bit / 8] ^= 1 << (bit % 8);
        prop_assert!(DataAck::decode(&bytes).is_err());
    }

    /// Arbitrary bytes never panic the command decoder.
    #[test]
    fn command_decode_total(bytes in proptest::collection::vec(any::<u8>(), 0..300)) {
        let _ = Command::decode(&bytes);
    }
}

// ── Engine ────────────────────────────────────────────────────

#[derive(Debug, Clone)]
enum Step {
    /// Correct ack for the outstanding frame.
    Ack,
    /// Ack naming the wrong sequence.
    WrongSeq,
    /// Random bytes on the data channel.
    Garbage(Vec<u8>),
    Tick(u16),
    Load(usize),
    Cancel,
}

fn step_strategy() -> impl Strategy<Value = Step> {
    prop_oneof![
        6 => Just(Step::Ack),
        1 => Just(Step::WrongSeq),
        1 => proptest::collection::vec(any::<u8>(), 0..16).prop_map(Step::Garbage),
        2 => (0u16..2_000).prop_map(Step::Tick),
        1 => (0usize..600).prop_map(Step::Load),
        1 => Just(Step::Cancel),
    ]
}

proptest! {
    /// Whatever the target does, progress never decreases within a
    /// session, every session ends at Idle, and a busy engine never
    /// accepts a second load.
    #[test]
    fn engine_never_sticks(steps in proptest::collection::vec(step_strategy(), 1..80)) {
        let config = OtaConfig { frame_payload_size: 40, ..OtaConfig::default() };
        let mut engine = OtaEngine::new(config, Recorder::default());
        let mut session_start = 0usize;

        for step in steps {
            let wrong_seq = matches!(step, Step::WrongSeq);
            match step {
                Step::Ack | Step::WrongSeq => {
                    if let EngineState::Sending { seq, acked, total } = engine.state() {
                        let body = (total - acked).min(40) as u32;
                        let seq = if wrong_seq { seq.wrapping_add(1) } else { seq };
                        let ack = DataAck {
                            status: TargetStatus::Ok,
                            seq,
                            next_offset: acked as u32 + body,
                        };
                        engine.set_bluetooth_notify_data(&ack.encode(), Channel::Data);
                    }
                }
                Step::Garbage(bytes) => engine.set_bluetooth_notify_data(&bytes, Channel::Data),
                Step::Tick(ms) => engine.tick(Duration::from_millis(u64::from(ms))),
                Step::Load(len) => {
                    let busy = engine.state() != EngineState::Idle;
                    let before = engine.listener().data.len();
                    let result = engine.load_binary(&vec![0x5A; len], FileKind::App);
                    if busy {
                        prop_assert_eq!(result, Err(RequestError::Busy));
                        prop_assert_eq!(engine.listener().data.len(), before);
                    } else if len == 0 {
                        prop_assert_eq!(result, Err(RequestError::EmptyPayload));
                    } else {
                        prop_assert!(result.is_ok());
                        session_start = engine.listener().progress.len() - 1;
                    }
                }
                Step::Cancel => engine.cancel(),
            }

            let progress = &engine.listener().progress[session_start..];
            prop_assert!(progress.windows(2).all(|w| w[0] <= w[1]));
            prop_assert!(progress.iter().all(|p| (0.0..=1.0).contains(p)));
        }

        // Enough silence always releases the session.
        engine.tick(Duration::from_secs(10));
        prop_assert_eq!(engine.state(), EngineState::Idle);
    }
}
