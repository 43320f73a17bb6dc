//! One in-flight `load_binary` transfer.
//!
//! Flow: frame 0 → ack 0 → frame 1 → ack 1 → … → ack N (complete)
//!
//! The session keeps exactly one outstanding frame. An ack must name
//! that frame's sequence index and the offset just past its body; any
//! other ack ends the session.

use core::time::Duration;

use log::debug;

use crate::error::TransferError;

use super::cipher::FrameCipher;
use super::frame::{DataAck, Frame, crc16};
use super::packetizer::Packetizer;
use super::types::FileKind;

/// What an accepted ack means for the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckOutcome {
    /// More frames remain; send the next one.
    Continue,
    /// The last frame was acknowledged.
    Complete,
}

pub struct TransferSession {
    payload: Vec<u8>,
    packetizer: Packetizer,
    encrypted: bool,
    acked: usize,
    next_seq: u16,
    outstanding: Option<Frame>,
    waited: Duration,
    image_crc: u16,
}

impl TransferSession {
    /// Caller has already rejected empty payloads and payloads needing
    /// more than `u16::MAX + 1` frames.
    pub fn new(payload: &[u8], kind: FileKind, frame_size: usize, encrypted: bool) -> Self {
        Self {
            payload: payload.to_vec(),
            packetizer: Packetizer::new(kind, frame_size),
            encrypted,
            acked: 0,
            next_seq: 0,
            outstanding: None,
            waited: Duration::ZERO,
            image_crc: crc16(payload),
        }
    }

    pub fn kind(&self) -> FileKind {
        self.packetizer.kind()
    }

    pub fn total(&self) -> usize {
        self.payload.len()
    }

    /// Bytes acknowledged by the target so far.
    pub fn acked(&self) -> usize {
        self.acked
    }

    pub fn is_encrypted(&self) -> bool {
        self.encrypted
    }

    pub fn image_crc(&self) -> u16 {
        self.image_crc
    }

    pub fn frame_size(&self) -> usize {
        self.packetizer.frame_size()
    }

    /// Sequence index of the frame awaiting an ack, if any.
    pub fn outstanding_seq(&self) -> Option<u16> {
        self.outstanding.as_ref().map(Frame::seq)
    }

    pub fn progress(&self) -> f32 {
        if self.payload.is_empty() {
            return 1.0;
        }
        self.acked as f32 / self.payload.len() as f32
    }

    /// Build the next frame, seal it when the session is encrypted, and
    /// hold it as the outstanding frame.
    pub fn next_frame(&mut self, cipher: Option<&dyn FrameCipher>) -> Option<&Frame> {
        let mut frame = self.packetizer.frame_at(&self.payload, self.next_seq)?;
        if self.encrypted {
            // The engine refuses to open an encrypted session without a cipher.
            let cipher = cipher?;
            frame = frame.seal(cipher);
        }
        self.waited = Duration::ZERO;
        self.outstanding = Some(frame);
        self.outstanding.as_ref()
    }

    /// Validate an ack against the outstanding frame and advance.
    pub fn acknowledge(&mut self, ack: &DataAck) -> Result<AckOutcome, TransferError> {
        let Some(frame) = self.outstanding.as_ref() else {
            return Err(TransferError::UnexpectedSequence);
        };
        if ack.seq != frame.seq() {
            return Err(TransferError::UnexpectedSequence);
        }
        if !ack.status.is_ok() {
            return Err(TransferError::TargetRejected(ack.status));
        }
        let expected = self.acked + frame.body().len();
        if ack.next_offset as usize != expected {
            return Err(TransferError::UnexpectedSequence);
        }

        debug!("OTA: ack seq={} offset={}/{}", ack.seq, expected, self.payload.len());
        self.acked = expected;
        self.next_seq = self.next_seq.wrapping_add(1);
        self.outstanding = None;

        if self.acked == self.payload.len() {
            Ok(AckOutcome::Complete)
        } else {
            Ok(AckOutcome::Continue)
        }
    }

    /// Advance the ack timer. Returns `true` once the outstanding frame
    /// has waited at least `timeout`.
    pub fn elapse(&mut self, elapsed: Duration, timeout: Duration) -> bool {
        if self.outstanding.is_none() {
            return false;
        }
        self.waited += elapsed;
        self.waited >= timeout
    }
}

// ── Tests ─────────────────────────────────────────────────────
