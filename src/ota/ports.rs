//! Port traits: how the engine talks back to its owner.
//!
//! ```text
//!   OtaEngine ──▶ OtaListener  (required: packets + progress)
//!             ──▶ OtaObserver  (optional: replies, completion, failures)
//! ```
//!
//! Both are injected at construction. The engine owns them; there is
//! no weak back-reference, so the owner reads recorded state through
//! [`OtaEngine::listener`](super::engine::OtaEngine::listener) or shares
//! it through its own `Rc`.

use crate::error::TransferError;

use super::types::{Channel, FileKind, Opcode, PartitionAddress, TargetStatus};

// ───────────────────────────────────────────────────────────────
// Required capability
// ───────────────────────────────────────────────────────────────

/// Receives everything the engine needs written to the peripheral,
/// plus transfer progress.
pub trait OtaListener {
    /// An encoded packet to write on `channel`'s characteristic.
    fn on_packet(&mut self, packet: &[u8], channel: Channel);

    /// Transfer progress in `[0.0, 1.0]`, non-decreasing per session.
    fn on_progress(&mut self, progress: f32);
}

// ───────────────────────────────────────────────────────────────
// Optional capability
// ───────────────────────────────────────────────────────────────

/// Asynchronous results. Every method defaults to a no-op so an
/// observer only implements what it cares about.
pub trait OtaObserver {
    /// Reply to `read_partition_addr`.
    fn on_read_address(&mut self, _address: PartitionAddress) {}

    /// Reply to `write_user_data`.
    fn on_user_data_written(&mut self, _result: Result<(), TargetStatus>) {}

    /// The final frame of a session was acknowledged.
    fn on_transfer_complete(&mut self, _kind: FileKind) {}

    /// The open session ended without completing.
    fn on_transfer_failed(&mut self, _error: TransferError) {}

    /// A reply arrived for a command the engine does not await
    /// (ISP entry, reset, begin/end).
    fn on_command_ack(&mut self, _opcode: Opcode, _status: TargetStatus) {}

    /// A single-shot request received no reply in time.
    fn on_request_timeout(&mut self, _opcode: Opcode) {}
}

/// Observer that ignores everything.
pub struct NullObserver;

impl OtaObserver for NullObserver {}

/// Inbound side of the engine, as seen by the notification router.
pub trait ChannelSink {
    /// Bytes notified on `channel`'s characteristic.
    fn on_channel_data(&mut self, data: &[u8], channel: Channel);
}
