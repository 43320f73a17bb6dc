//! Payload fragmentation into data frames, and the matching reassembly.
//!
//! A payload is cut into `frame_size`-byte bodies; the final body may
//! be shorter. Frames are numbered from 0 and the last one carries
//! `FLAG_LAST`.
//!
//! ```text
//! Frame 0: seq 0                payload[0 .. fs]
//! Frame 1: seq 1                payload[fs .. 2fs]
//! Frame N: seq N  | FLAG_LAST   payload[N·fs .. len]
//! ```
//!
//! Frames are built lazily with [`Packetizer::frame_at`], so a session
//! never holds more than the one frame awaiting acknowledgement.

use core::fmt;

use super::frame::{Frame, MAX_FRAME_PAYLOAD};
use super::types::FileKind;

/// Cuts one payload into frames of a fixed body size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Packetizer {
    kind: FileKind,
    frame_size: usize,
}

impl Packetizer {
    /// `frame_size` is clamped to `1..=MAX_FRAME_PAYLOAD`.
    pub fn new(kind: FileKind, frame_size: usize) -> Self {
        Self {
            kind,
            frame_size: frame_size.clamp(1, MAX_FRAME_PAYLOAD),
        }
    }

    pub fn kind(&self) -> FileKind {
        self.kind
    }

    pub fn frame_size(&self) -> usize {
        self.frame_size
    }

    /// Number of frames needed for `len` bytes.
    pub fn frame_count(&self, len: usize) -> usize {
        len.div_ceil(self.frame_size)
    }

    /// Byte offset where frame `seq` starts.
    pub fn offset_of(&self, seq: u16) -> usize {
        seq as usize * self.frame_size
    }

    /// Build frame `seq` of `payload`, or `None` past the end.
    pub fn frame_at(&self, payload: &[u8], seq: u16) -> Option<Frame> {
        let start = self.offset_of(seq);
        if start >= payload.len() {
            return None;
        }
        let end = (start + self.frame_size).min(payload.len());
        let last = end == payload.len();
        // Body length is bounded by frame_size <= MAX_FRAME_PAYLOAD.
        Frame::new(self.kind, seq, last, &payload[start..end]).ok()
    }

    /// Every frame of `payload` in sequence order.
    pub fn frames<'a>(&self, payload: &'a [u8]) -> impl Iterator<Item = Frame> + 'a {
        let this = *self;
        (0..=u16::MAX).map_while(move |seq| this.frame_at(payload, seq))
    }
}

// ── Reassembly ───────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReassemblyError {
    /// Frame arrived out of order; the buffer was reset.
    OutOfSequence { expected: u16, got: u16 },
    /// Image would exceed the reassembler's capacity.
    Overflow,
}

impl fmt::Display for ReassemblyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OutOfSequence { expected, got } => {
                write!(f, "frame out of sequence (expected {expected}, got {got})")
            }
            Self::Overflow => write!(f, "reassembly buffer overflow"),
        }
    }
}

/// Rebuilds a payload from plaintext frame bodies delivered in order.
pub struct Reassembler {
    buffer: Vec<u8>,
    expected_seq: u16,
    capacity: usize,
    active: bool,
}

impl Reassembler {
    pub fn new(capacity: usize) -> Self {
        Self {
            buffer: Vec::new(),
            expected_seq: 0,
            capacity,
            active: false,
        }
    }

    /// Append one body. Returns the complete payload when `last` is set.
    pub fn push(&mut self, seq: u16, last: bool, body: &[u8]) -> Result<Option<Vec<u8>>, ReassemblyError> {
        if seq == 0 {
            self.reset();
            self.active = true;
        }
        if !self.active || seq != self.expected_seq {
            let expected = self.expected_seq;
            self.reset();
            return Err(ReassemblyError::OutOfSequence { expected, got: seq });
        }
        if self.buffer.len() + body.len() > self.capacity {
            self.reset();
            return Err(ReassemblyError::Overflow);
        }

        self.buffer.extend_from_slice(body);
        self.expected_seq = seq.wrapping_add(1);

        if last {
            self.active = false;
            self.expected_seq = 0;
            Ok(Some(core::mem::take(&mut self.buffer)))
        } else {
            Ok(None)
        }
    }

    /// Bytes received so far in the current image.
    pub fn received(&self) -> usize {
        self.buffer.len()
    }

    pub fn reset(&mut self) {
        self.buffer.clear();
        self.expected_seq = 0;
        self.active = false;
    }

    pub fn is_active(&self) -> bool {
        self.active
    }
}

// ── Tests ────────────────────────────────────────────────────
