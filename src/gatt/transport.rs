//! Characteristic transport: the engine's only path to the radio.
//!
//! The platform BLE stack implements [`CharacteristicTransport`] for a
//! connected peripheral. [`TransportListener`] adapts it to the engine's
//! [`OtaListener`] port, mapping each logical [`Channel`] onto one of
//! the two OTA characteristics and a write mode.
//!
//! ## GATT Service Layout
//!
//! | Characteristic | UUID                                   | Perms                 |
//! |----------------|----------------------------------------|-----------------------|
//! | OTA Service    | `8e5c0001-4d3c-4a3e-9a4b-2f1d6c7b0e11` |                       |
//! | OTA Command    | `8e5c0002-4d3c-4a3e-9a4b-2f1d6c7b0e11` | Write, Notify         |
//! | OTA Data       | `8e5c0003-4d3c-4a3e-9a4b-2f1d6c7b0e11` | Write w/o rsp, Notify |

use log::{debug, warn};
use uuid::Uuid;

use crate::error::GattError;
use crate::ota::ports::OtaListener;
use crate::ota::types::Channel;

// ── Constants ────────────────────────────────────────────────

pub const OTA_SERVICE: Uuid = Uuid::from_u128(0x8e5c0001_4d3c_4a3e_9a4b_2f1d6c7b0e11);
pub const OTA_COMMAND_CHAR: Uuid = Uuid::from_u128(0x8e5c0002_4d3c_4a3e_9a4b_2f1d6c7b0e11);
pub const OTA_DATA_CHAR: Uuid = Uuid::from_u128(0x8e5c0003_4d3c_4a3e_9a4b_2f1d6c7b0e11);

/// ATT MTU before any exchange.
pub const DEFAULT_MTU: usize = 23;
/// ATT write header (opcode + handle).
const ATT_WRITE_OVERHEAD: usize = 3;

// ── Write mode ───────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    WithResponse,
    WithoutResponse,
}

impl WriteMode {
    /// Data frames and fire-and-forget commands skip the ATT response.
    pub const fn for_channel(channel: Channel) -> Self {
        match channel {
            Channel::Command | Channel::CommandInterval => Self::WithResponse,
            Channel::Data | Channel::CommandNoNotify => Self::WithoutResponse,
        }
    }
}

/// Characteristic UUID that carries `channel`.
pub const fn characteristic_for(channel: Channel) -> Uuid {
    match channel {
        Channel::Data => OTA_DATA_CHAR,
        Channel::Command | Channel::CommandInterval | Channel::CommandNoNotify => OTA_COMMAND_CHAR,
    }
}

// ── Transport trait ──────────────────────────────────────────

/// One connected peripheral's characteristic operations.
pub trait CharacteristicTransport {
    /// Write `data` to `characteristic`.
    fn write(&mut self, characteristic: Uuid, data: &[u8], mode: WriteMode) -> Result<(), GattError>;

    /// Enable or disable notifications on `characteristic`.
    fn set_notify(&mut self, characteristic: Uuid, enabled: bool) -> Result<(), GattError>;

    /// Negotiated ATT MTU.
    fn mtu(&self) -> usize {
        DEFAULT_MTU
    }
}

/// A transport that discards every write. Useful before a peripheral
/// is connected.
pub struct NullTransport;

impl CharacteristicTransport for NullTransport {
    fn write(&mut self, _characteristic: Uuid, _data: &[u8], _mode: WriteMode) -> Result<(), GattError> {
        Ok(())
    }

    fn set_notify(&mut self, _characteristic: Uuid, _enabled: bool) -> Result<(), GattError> {
        Ok(())
    }
}

// ── Listener adapter ─────────────────────────────────────────

/// Forwards every packet the engine emits to a transport and keeps the
/// latest progress for the host to render.
pub struct TransportListener<T: CharacteristicTransport> {
    transport: T,
    progress: f32,
    packets_sent: usize,
    last_error: Option<GattError>,
}

impl<T: CharacteristicTransport> TransportListener<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            progress: 0.0,
            packets_sent: 0,
            last_error: None,
        }
    }

    /// Enable notifications on both OTA characteristics.
    pub fn subscribe(&mut self) -> crate::Result<()> {
        self.transport.set_notify(OTA_COMMAND_CHAR, true)?;
        self.transport.set_notify(OTA_DATA_CHAR, true)?;
        Ok(())
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn progress(&self) -> f32 {
        self.progress
    }

    pub fn packets_sent(&self) -> usize {
        self.packets_sent
    }

    /// Most recent write failure; cleared by [`Self::take_error`].
    pub fn take_error(&mut self) -> Option<GattError> {
        self.last_error.take()
    }
}

impl<T: CharacteristicTransport> OtaListener for TransportListener<T> {
    fn on_packet(&mut self, packet: &[u8], channel: Channel) {
        let limit = self.transport.mtu().saturating_sub(ATT_WRITE_OVERHEAD);
        if packet.len() > limit {
            warn!("GATT: {} byte packet exceeds MTU payload {}", packet.len(), limit);
        }

        let characteristic = characteristic_for(channel);
        match self.transport.write(characteristic, packet, WriteMode::for_channel(channel)) {
            Ok(()) => self.packets_sent += 1,
            Err(e) => {
                // A lost write surfaces as an ack or request timeout.
                warn!("GATT: write to {} failed: {}", characteristic, e);
                self.last_error = Some(e);
            }
        }
    }

    fn on_progress(&mut self, progress: f32) {
        debug!("GATT: progress {:.1}%", progress * 100.0);
        self.progress = progress;
    }
}

// ── Tests ────────────────────────────────────────────────────
