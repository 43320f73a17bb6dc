//! OTA protocol engine: turns host requests into packets and target
//! notifications into progress.
//!
//! **Transport-decoupled**: the engine never writes to a radio. Every
//! packet goes out through [`OtaListener::on_packet`], and every byte the
//! peripheral notifies comes back in through
//! [`OtaEngine::set_bluetooth_notify_data`]. Time only moves when the
//! host calls [`OtaEngine::tick`].
//!
//! Requests in flight at any moment:
//!
//! 1. **Transfer session**: at most one `load_binary`, one frame
//!    outstanding at a time.
//! 2. **Partition read**: at most one `read_partition_addr`.
//! 3. **User-data write**: at most one `write_user_data`, and never
//!    alongside a transfer session.
//!
//! ISP entry and reset are fire-and-forget and never tracked.

use core::time::Duration;

use log::{debug, info, warn};

use crate::config::OtaConfig;
use crate::error::{RequestError, TransferError};

use super::cipher::FrameCipher;
use super::frame::{Command, DataAck, MAX_COMMAND_PARAMS};
use super::packetizer::Packetizer;
use super::ports::{ChannelSink, NullObserver, OtaListener, OtaObserver};
use super::session::{AckOutcome, TransferSession};
use super::types::{Channel, FileKind, IspKind, Opcode};

/// Largest blob `write_user_data` accepts (address takes 4 param bytes).
pub const MAX_USER_DATA_LEN: usize = MAX_COMMAND_PARAMS - 4;

/// Externally visible engine state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Idle,
    /// A session is open with frame `seq` awaiting its ack.
    Sending { seq: u16, acked: usize, total: usize },
}

/// A single-shot command awaiting its reply.
#[derive(Debug, Clone, Copy)]
struct PendingRequest {
    opcode: Opcode,
    waited: Duration,
}

impl PendingRequest {
    fn new(opcode: Opcode) -> Self {
        Self {
            opcode,
            waited: Duration::ZERO,
        }
    }
}

/// OTA engine with one optional transfer session.
pub struct OtaEngine<L: OtaListener, O: OtaObserver = NullObserver> {
    config: OtaConfig,
    listener: L,
    observer: O,
    cipher: Option<Box<dyn FrameCipher>>,
    encrypt: bool,
    session: Option<TransferSession>,
    pending_read: Option<PendingRequest>,
    pending_user_write: Option<PendingRequest>,
}

impl<L: OtaListener> OtaEngine<L, NullObserver> {
    pub fn new(config: OtaConfig, listener: L) -> Self {
        Self {
            config,
            listener,
            observer: NullObserver,
            cipher: None,
            encrypt: false,
            session: None,
            pending_read: None,
            pending_user_write: None,
        }
    }
}

impl<L: OtaListener, O: OtaObserver> OtaEngine<L, O> {
    /// Attach the optional observer capability.
    pub fn with_observer<O2: OtaObserver>(self, observer: O2) -> OtaEngine<L, O2> {
        OtaEngine {
            config: self.config,
            listener: self.listener,
            observer,
            cipher: self.cipher,
            encrypt: self.encrypt,
            session: self.session,
            pending_read: self.pending_read,
            pending_user_write: self.pending_user_write,
        }
    }

    /// Install the cipher used when encryption is enabled.
    #[must_use]
    pub fn with_cipher(mut self, cipher: Box<dyn FrameCipher>) -> Self {
        self.cipher = Some(cipher);
        self
    }

    pub fn config(&self) -> &OtaConfig {
        &self.config
    }

    pub fn listener(&self) -> &L {
        &self.listener
    }

    pub fn listener_mut(&mut self) -> &mut L {
        &mut self.listener
    }

    pub fn observer(&self) -> &O {
        &self.observer
    }

    pub fn observer_mut(&mut self) -> &mut O {
        &mut self.observer
    }

    pub fn state(&self) -> EngineState {
        match &self.session {
            None => EngineState::Idle,
            Some(s) => EngineState::Sending {
                seq: s.outstanding_seq().unwrap_or_default(),
                acked: s.acked(),
                total: s.total(),
            },
        }
    }

    /// Whether newly started transfers will be encrypted.
    pub fn encrypt_enabled(&self) -> bool {
        self.encrypt
    }

    /// Whether the open session (if any) is encrypted.
    pub fn session_encrypted(&self) -> Option<bool> {
        self.session.as_ref().map(TransferSession::is_encrypted)
    }

    // ── Requests ─────────────────────────────────────────────

    /// Toggle encryption of data frames for subsequently started
    /// transfers. An open session keeps the setting it started with.
    pub fn set_encrypt(&mut self, enabled: bool) {
        if self.session.is_some() && enabled != self.encrypt {
            debug!("OTA: encrypt={} deferred until the open session ends", enabled);
        }
        self.encrypt = enabled;
    }

    /// Write a small blob to an absolute address in the user-data region.
    pub fn write_user_data(&mut self, payload: &[u8], address: u32) -> Result<(), RequestError> {
        if self.session.is_some() || self.pending_user_write.is_some() {
            return Err(RequestError::Busy);
        }
        if payload.is_empty() || payload.len() > MAX_USER_DATA_LEN {
            return Err(RequestError::InvalidLength);
        }
        if !self.config.user_data_contains(address, payload.len()) {
            return Err(RequestError::InvalidAddress);
        }

        info!("OTA: user data {} bytes @ 0x{:08x}", payload.len(), address);
        self.send_command(&Command::write_user_data(address, payload), Channel::Command);
        self.pending_user_write = Some(PendingRequest::new(Opcode::WriteUserData));
        Ok(())
    }

    /// Start a transfer session. Frame 0 goes out before this returns;
    /// every later frame follows an ack.
    pub fn load_binary(&mut self, payload: &[u8], kind: FileKind) -> Result<(), RequestError> {
        if self.session.is_some() || self.pending_user_write.is_some() {
            warn!("OTA: load_binary rejected, engine busy");
            return Err(RequestError::Busy);
        }
        if payload.is_empty() {
            return Err(RequestError::EmptyPayload);
        }
        if payload.len() > self.config.max_image_size as usize {
            return Err(RequestError::PayloadTooLarge);
        }
        let packetizer = Packetizer::new(kind, self.config.frame_payload_size as usize);
        if packetizer.frame_count(payload.len()) > usize::from(u16::MAX) + 1 {
            return Err(RequestError::PayloadTooLarge);
        }
        if self.encrypt && self.cipher.is_none() {
            return Err(RequestError::CipherMissing);
        }

        let session = TransferSession::new(payload, kind, packetizer.frame_size(), self.encrypt);
        info!(
            "OTA: begin {} ({} bytes, {} frames, encrypted={})",
            kind,
            payload.len(),
            packetizer.frame_count(payload.len()),
            session.is_encrypted()
        );
        let begin = Command::begin(
            kind,
            payload.len() as u32,
            session.frame_size() as u16,
            session.is_encrypted(),
        );
        self.session = Some(session);
        self.send_command(&begin, Channel::Command);
        self.send_next_frame();
        Ok(())
    }

    /// Ask the target where a partition lives.
    pub fn read_partition_addr(&mut self, kind: FileKind) -> Result<(), RequestError> {
        if self.pending_read.is_some() {
            return Err(RequestError::Busy);
        }
        debug!("OTA: read partition address ({})", kind);
        self.send_command(&Command::read_partition(kind), Channel::Command);
        self.pending_read = Some(PendingRequest::new(Opcode::ReadPartition));
        Ok(())
    }

    /// Command the target into ISP mode. No reply is awaited.
    pub fn enter_isp(&mut self, kind: IspKind) {
        if self.session.is_some() {
            warn!("OTA: entering ISP with a transfer session open");
        }
        info!("OTA: enter ISP ({:?})", kind);
        self.send_command(&Command::enter_isp(kind), Channel::CommandNoNotify);
    }

    /// Reset the target. No reply is awaited; an open session is left
    /// for the caller to cancel.
    pub fn reset_target(&mut self) {
        if self.session.is_some() {
            warn!("OTA: resetting target with a transfer session open");
        }
        info!("OTA: reset target");
        self.send_command(&Command::reset(), Channel::CommandNoNotify);
    }

    /// Abort the open session, reporting `Cancelled`. No-op when idle.
    pub fn cancel(&mut self) {
        self.fail(TransferError::Cancelled);
    }

    // ── Inbound ──────────────────────────────────────────────

    /// Feed bytes notified by the peripheral on `channel`.
    pub fn set_bluetooth_notify_data(&mut self, data: &[u8], channel: Channel) {
        if channel.is_command() {
            self.handle_command_notify(data);
        } else {
            self.handle_data_notify(data);
        }
    }

    /// Advance ack and request timers by `elapsed`.
    pub fn tick(&mut self, elapsed: Duration) {
        let ack_timeout = self.config.ack_timeout();
        if let Some(session) = self.session.as_mut() {
            if session.elapse(elapsed, ack_timeout) {
                self.fail(TransferError::AckTimeout);
            }
        }

        let request_timeout = self.config.request_timeout();
        for slot in [&mut self.pending_read, &mut self.pending_user_write] {
            let expired = slot.as_mut().is_some_and(|p| {
                p.waited += elapsed;
                p.waited >= request_timeout
            });
            if expired {
                if let Some(p) = slot.take() {
                    warn!("OTA: {:?} request timed out", p.opcode);
                    self.observer.on_request_timeout(p.opcode);
                }
            }
        }
    }

    fn handle_data_notify(&mut self, data: &[u8]) {
        let ack = match DataAck::decode(data) {
            Ok(ack) => ack,
            Err(e) => {
                if self.session.is_some() {
                    warn!("OTA: malformed ack during transfer: {}", e);
                    self.fail(TransferError::MalformedAck);
                } else {
                    warn!("OTA: dropped malformed data notify: {}", e);
                }
                return;
            }
        };

        let Some(session) = self.session.as_mut() else {
            warn!("OTA: ack seq={} with no open session, dropped", ack.seq);
            return;
        };
        match session.acknowledge(&ack) {
            Ok(AckOutcome::Continue) => self.send_next_frame(),
            Ok(AckOutcome::Complete) => self.finish(),
            Err(e) => self.fail(e),
        }
    }

    fn handle_command_notify(&mut self, data: &[u8]) {
        let cmd = match Command::decode(data) {
            Ok(cmd) => cmd,
            Err(e) => {
                warn!("OTA: dropped malformed command notify: {}", e);
                return;
            }
        };
        if !cmd.reply {
            warn!("OTA: target sent a request ({:?}), dropped", cmd.opcode);
            return;
        }
        let status = match cmd.status() {
            Ok(status) => status,
            Err(e) => {
                warn!("OTA: {:?} reply without status: {}", cmd.opcode, e);
                return;
            }
        };

        match cmd.opcode {
            Opcode::ReadPartition => {
                if self.pending_read.is_none() {
                    warn!("OTA: unsolicited partition reply, dropped");
                    return;
                }
                if !status.is_ok() {
                    self.pending_read = None;
                    warn!("OTA: partition read refused: {}", status);
                    self.observer.on_command_ack(Opcode::ReadPartition, status);
                    return;
                }
                match cmd.partition_address() {
                    Ok(address) => {
                        self.pending_read = None;
                        self.observer.on_read_address(address);
                    }
                    Err(e) => warn!("OTA: malformed partition reply: {}", e),
                }
            }
            Opcode::WriteUserData => {
                if self.pending_user_write.take().is_none() {
                    warn!("OTA: unsolicited user-data reply, dropped");
                    return;
                }
                let result = if status.is_ok() { Ok(()) } else { Err(status) };
                self.observer.on_user_data_written(result);
            }
            Opcode::Begin if !status.is_ok() && self.session.is_some() => {
                self.fail(TransferError::TargetRejected(status));
            }
            op => {
                debug!("OTA: {:?} acknowledged ({})", op, status);
                self.observer.on_command_ack(op, status);
            }
        }
    }

    // ── Internal ─────────────────────────────────────────────

    fn send_command(&mut self, cmd: &Command, channel: Channel) {
        let packet = cmd.encode();
        debug!("OTA: -> {:?} {:?} ({} bytes)", channel, cmd.opcode, packet.len());
        self.listener.on_packet(&packet, channel);
    }

    fn send_next_frame(&mut self) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        let cipher = self.cipher.as_deref();
        let Some(frame) = session.next_frame(cipher) else {
            return;
        };
        let packet = frame.encode();
        debug!("OTA: -> frame seq={} ({} bytes)", frame.seq(), packet.len());
        self.listener.on_packet(&packet, Channel::Data);
        self.listener.on_progress(session.progress());
    }

    fn finish(&mut self) {
        let Some(session) = self.session.take() else {
            return;
        };
        let end = Command::end(session.kind(), session.total() as u32, session.image_crc());
        self.send_command(&end, Channel::CommandInterval);
        self.listener.on_progress(1.0);
        info!("OTA: {} transfer complete ({} bytes)", session.kind(), session.total());
        self.observer.on_transfer_complete(session.kind());
    }

    fn fail(&mut self, error: TransferError) {
        if let Some(session) = self.session.take() {
            warn!(
                "OTA: {} transfer failed at {}/{}: {}",
                session.kind(),
                session.acked(),
                session.total(),
                error
            );
            self.observer.on_transfer_failed(error);
        }
    }
}

impl<L: OtaListener, O: OtaObserver> ChannelSink for OtaEngine<L, O> {
    fn on_channel_data(&mut self, data: &[u8], channel: Channel) {
        self.set_bluetooth_notify_data(data, channel);
    }
}

// ── Tests ─────────────────────────────────────────────────────
