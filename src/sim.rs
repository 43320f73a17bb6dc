//! In-process OTA peripheral.
//!
//! Implements the target side of the wire protocol so the engine can be
//! driven end to end without a radio. Writes arrive through
//! [`SimLink`] (which implements both [`CharacteristicTransport`] and
//! [`GattClient`]); everything the target says back is queued as a
//! [`SimEvent`] for the host loop to dispatch.
//!
//! ```text
//! OtaEngine ─▶ TransportListener<SimLink> ─▶ SimulatedTarget
//!     ▲                                            │ outbox
//!     └──── GattConnection::on_value_updated ◀── poll_event()
//! ```

use std::cell::RefCell;
use std::collections::{BTreeMap, VecDeque};
use std::rc::Rc;

use log::{debug, info, warn};
use uuid::Uuid;

use crate::config::OtaConfig;
use crate::error::GattError;
use crate::gatt::discovery::{AttributeHandle, GattClient};
use crate::gatt::transport::{CharacteristicTransport, OTA_COMMAND_CHAR, OTA_DATA_CHAR, OTA_SERVICE, WriteMode};
use crate::ota::cipher::FrameCipher;
use crate::ota::frame::{Command, DataAck, FLAG_ENCRYPTED, Frame, crc16};
use crate::ota::packetizer::{ReassemblyError, Reassembler};
use crate::ota::types::{FileKind, IspKind, Opcode, PartitionAddress, TargetStatus};

const SERVICE_HANDLE: AttributeHandle = AttributeHandle(0x0010);
const COMMAND_HANDLE: AttributeHandle = AttributeHandle(0x0012);
const DATA_HANDLE: AttributeHandle = AttributeHandle(0x0015);

/// Something the target sends back to the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SimEvent {
    Services(Vec<(Uuid, AttributeHandle)>),
    Characteristics {
        service: Uuid,
        characteristics: Vec<(Uuid, AttributeHandle)>,
    },
    Notify {
        characteristic: Uuid,
        value: Vec<u8>,
    },
    Rssi(i16),
}

/// Injected misbehaviour.
#[derive(Debug, Clone, Copy, Default)]
pub struct Faults {
    /// Swallow the ack for this frame once.
    pub drop_ack_at: Option<u16>,
    /// Replace the ack for this frame with garbage once.
    pub corrupt_ack_at: Option<u16>,
    /// Refuse every `Begin` with `Busy`.
    pub reject_begin: bool,
    /// Hide the OTA service from discovery.
    pub hide_service: bool,
}

/// Firmware mode the target is in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetMode {
    Application,
    Isp(IspKind),
}

struct Upload {
    kind: FileKind,
    total: u32,
    encrypted: bool,
    image: Option<Vec<u8>>,
}

pub struct SimulatedTarget {
    partitions: Vec<PartitionAddress>,
    cipher: Option<Box<dyn FrameCipher>>,
    user_data_base: u32,
    user_data: Vec<u8>,
    reassembler: Reassembler,
    upload: Option<Upload>,
    images: BTreeMap<FileKind, Vec<u8>>,
    outbox: VecDeque<SimEvent>,
    faults: Faults,
    mode: TargetMode,
    resets: u32,
    notify_enabled: bool,
    rssi: i16,
}

impl SimulatedTarget {
    /// A target with one partition per file kind and the user-data
    /// region described by `config`.
    pub fn new(config: &OtaConfig) -> Self {
        let partitions = vec![
            PartitionAddress {
                kind: FileKind::App,
                address: 0x0001_0000,
                length: config.max_image_size,
            },
            PartitionAddress {
                kind: FileKind::Config,
                address: 0x0000_8000,
                length: 0x4000,
            },
            PartitionAddress {
                kind: FileKind::Patch,
                address: 0x0000_C000,
                length: 0x3000,
            },
        ];
        Self {
            partitions,
            cipher: None,
            user_data_base: config.user_data_base,
            user_data: vec![0xFF; config.user_data_size as usize],
            reassembler: Reassembler::new(config.max_image_size as usize),
            upload: None,
            images: BTreeMap::new(),
            outbox: VecDeque::new(),
            faults: Faults::default(),
            mode: TargetMode::Application,
            resets: 0,
            notify_enabled: false,
            rssi: -58,
        }
    }

    #[must_use]
    pub fn with_cipher(mut self, cipher: Box<dyn FrameCipher>) -> Self {
        self.cipher = Some(cipher);
        self
    }

    #[must_use]
    pub fn with_faults(mut self, faults: Faults) -> Self {
        self.faults = faults;
        self
    }

    pub fn faults_mut(&mut self) -> &mut Faults {
        &mut self.faults
    }

    /// Last image committed for `kind`.
    pub fn image(&self, kind: FileKind) -> Option<&[u8]> {
        self.images.get(&kind).map(Vec::as_slice)
    }

    pub fn user_data(&self, address: u32, len: usize) -> Option<&[u8]> {
        let start = address.checked_sub(self.user_data_base)? as usize;
        self.user_data.get(start..start.checked_add(len)?)
    }

    pub fn partition(&self, kind: FileKind) -> Option<PartitionAddress> {
        self.partitions.iter().copied().find(|p| p.kind == kind)
    }

    pub fn mode(&self) -> TargetMode {
        self.mode
    }

    pub fn resets(&self) -> u32 {
        self.resets
    }

    pub fn notify_enabled(&self) -> bool {
        self.notify_enabled
    }

    pub fn poll_event(&mut self) -> Option<SimEvent> {
        self.outbox.pop_front()
    }

    // ── Characteristic writes ────────────────────────────────

    pub fn write(&mut self, characteristic: Uuid, data: &[u8]) -> Result<(), GattError> {
        if characteristic == OTA_DATA_CHAR {
            self.on_data(data);
            Ok(())
        } else if characteristic == OTA_COMMAND_CHAR {
            self.on_command(data);
            Ok(())
        } else {
            // Attribute not found.
            Err(GattError::Att(0x0A))
        }
    }

    fn notify(&mut self, characteristic: Uuid, value: &[u8]) {
        self.outbox.push_back(SimEvent::Notify {
            characteristic,
            value: value.to_vec(),
        });
    }

    fn reply(&mut self, cmd: &Command) {
        self.notify(OTA_COMMAND_CHAR, &cmd.encode());
    }

    fn ack(&mut self, status: TargetStatus, seq: u16) {
        if self.faults.drop_ack_at == Some(seq) {
            self.faults.drop_ack_at = None;
            debug!("SIM: dropping ack seq={}", seq);
            return;
        }
        if self.faults.corrupt_ack_at == Some(seq) {
            self.faults.corrupt_ack_at = None;
            debug!("SIM: corrupting ack seq={}", seq);
            self.notify(OTA_DATA_CHAR, &[0xA5, 0xFF, 0x00]);
            return;
        }
        let ack = DataAck {
            status,
            seq,
            next_offset: self.reassembler.received() as u32
                + self
                    .upload
                    .as_ref()
                    .and_then(|u| u.image.as_ref())
                    .map_or(0, |i| i.len() as u32),
        };
        self.notify(OTA_DATA_CHAR, &ack.encode());
    }

    fn on_data(&mut self, data: &[u8]) {
        let frame = match Frame::decode(data) {
            Ok(frame) => frame,
            Err(e) => {
                warn!("SIM: undecodable data packet: {}", e);
                return;
            }
        };
        let seq = frame.seq();
        let Some(upload) = self.upload.as_ref() else {
            self.ack(TargetStatus::Sequence, seq);
            return;
        };
        if frame.kind() != upload.kind || frame.is_encrypted() != upload.encrypted {
            self.ack(TargetStatus::Sequence, seq);
            return;
        }

        let body = if frame.is_encrypted() {
            let Some(plain) = self.cipher.as_deref().and_then(|c| frame.open(c)) else {
                self.ack(TargetStatus::CrcMismatch, seq);
                return;
            };
            plain.to_vec()
        } else {
            frame.body().to_vec()
        };

        match self.reassembler.push(seq, frame.is_last(), &body) {
            Ok(None) => self.ack(TargetStatus::Ok, seq),
            Ok(Some(image)) => {
                if let Some(upload) = self.upload.as_mut() {
                    upload.image = Some(image);
                }
                self.ack(TargetStatus::Ok, seq);
            }
            Err(ReassemblyError::Overflow) => self.ack(TargetStatus::InvalidLength, seq),
            Err(e @ ReassemblyError::OutOfSequence { .. }) => {
                warn!("SIM: {}", e);
                self.ack(TargetStatus::Sequence, seq);
            }
        }
    }

    fn on_command(&mut self, data: &[u8]) {
        let cmd = match Command::decode(data) {
            Ok(cmd) if !cmd.reply => cmd,
            Ok(_) => return,
            Err(e) => {
                warn!("SIM: undecodable command: {}", e);
                return;
            }
        };
        let p = cmd.params.as_slice();

        match cmd.opcode {
            Opcode::Begin => {
                let status = self.begin(p);
                self.reply(&Command::reply_to(Opcode::Begin, status, &[]));
            }
            Opcode::End => {
                let status = self.end(p);
                self.reply(&Command::reply_to(Opcode::End, status, &[]));
            }
            Opcode::WriteUserData => {
                let status = self.write_user_data(p);
                self.reply(&Command::reply_to(Opcode::WriteUserData, status, &[]));
            }
            Opcode::ReadPartition => {
                let found = p.first().copied().and_then(FileKind::from_code).and_then(|k| self.partition(k));
                let reply = match found {
                    Some(addr) => Command::partition_reply(TargetStatus::Ok, addr),
                    None => Command::reply_to(Opcode::ReadPartition, TargetStatus::Unsupported, &[]),
                };
                self.reply(&reply);
            }
            Opcode::EnterIsp => {
                let Some(kind) = p.first().copied().and_then(IspKind::from_code) else {
                    self.reply(&Command::reply_to(Opcode::EnterIsp, TargetStatus::Unsupported, &[]));
                    return;
                };
                info!("SIM: entering ISP ({:?})", kind);
                self.mode = TargetMode::Isp(kind);
                self.reply(&Command::reply_to(Opcode::EnterIsp, TargetStatus::Ok, &[]));
            }
            Opcode::Reset => {
                info!("SIM: reset");
                self.resets += 1;
                self.mode = TargetMode::Application;
                self.upload = None;
                self.reassembler.reset();
            }
        }
    }

    fn begin(&mut self, p: &[u8]) -> TargetStatus {
        if self.faults.reject_begin {
            return TargetStatus::Busy;
        }
        if p.len() != 8 {
            return TargetStatus::InvalidLength;
        }
        let Some(kind) = FileKind::from_code(p[0]) else {
            return TargetStatus::Unsupported;
        };
        let total = u32::from_le_bytes([p[1], p[2], p[3], p[4]]);
        let encrypted = p[7] & FLAG_ENCRYPTED != 0;
        if encrypted && self.cipher.is_none() {
            return TargetStatus::Unsupported;
        }
        if self.partition(kind).is_none_or(|part| total > part.length) {
            return TargetStatus::InvalidLength;
        }
        info!("SIM: begin {} ({} bytes, encrypted={})", kind, total, encrypted);
        self.reassembler.reset();
        self.upload = Some(Upload {
            kind,
            total,
            encrypted,
            image: None,
        });
        TargetStatus::Ok
    }

    fn end(&mut self, p: &[u8]) -> TargetStatus {
        if p.len() != 7 {
            return TargetStatus::InvalidLength;
        }
        let Some(upload) = self.upload.take() else {
            return TargetStatus::Sequence;
        };
        let total = u32::from_le_bytes([p[1], p[2], p[3], p[4]]);
        let crc = u16::from_le_bytes([p[5], p[6]]);
        let Some(image) = upload.image else {
            return TargetStatus::Sequence;
        };
        if total != upload.total || image.len() as u32 != total {
            return TargetStatus::InvalidLength;
        }
        if crc16(&image) != crc {
            return TargetStatus::CrcMismatch;
        }
        info!("SIM: committed {} image ({} bytes)", upload.kind, image.len());
        self.images.insert(upload.kind, image);
        TargetStatus::Ok
    }

    fn write_user_data(&mut self, p: &[u8]) -> TargetStatus {
        if p.len() <= 4 {
            return TargetStatus::InvalidLength;
        }
        let address = u32::from_le_bytes([p[0], p[1], p[2], p[3]]);
        let data = &p[4..];
        let Some(start) = address.checked_sub(self.user_data_base) else {
            return TargetStatus::InvalidAddress;
        };
        let start = start as usize;
        let Some(region) = self.user_data.get_mut(start..start + data.len()) else {
            return TargetStatus::InvalidAddress;
        };
        region.copy_from_slice(data);
        TargetStatus::Ok
    }

    // ── Discovery ────────────────────────────────────────────

    fn answer_services(&mut self, services: &[Uuid]) {
        let found = if self.faults.hide_service || !services.contains(&OTA_SERVICE) {
            Vec::new()
        } else {
            vec![(OTA_SERVICE, SERVICE_HANDLE)]
        };
        self.outbox.push_back(SimEvent::Services(found));
    }

    /// Signal strength reported to RSSI reads.
    pub fn set_rssi(&mut self, rssi: i16) {
        self.rssi = rssi;
    }

    fn answer_rssi(&mut self) {
        self.outbox.push_back(SimEvent::Rssi(self.rssi));
    }

    fn answer_characteristics(&mut self, service: Uuid, wanted: Option<&[Uuid]>) {
        let all = [(OTA_COMMAND_CHAR, COMMAND_HANDLE), (OTA_DATA_CHAR, DATA_HANDLE)];
        let characteristics = if service == OTA_SERVICE {
            all.into_iter()
                .filter(|(u, _)| wanted.is_none_or(|w| w.contains(u)))
                .collect()
        } else {
            Vec::new()
        };
        self.outbox.push_back(SimEvent::Characteristics {
            service,
            characteristics,
        });
    }
}

// ── Link ─────────────────────────────────────────────────────

/// Shared handle to a [`SimulatedTarget`], usable as both the engine's
/// transport and the connection's GATT client.
#[derive(Clone)]
pub struct SimLink(Rc<RefCell<SimulatedTarget>>);

impl SimLink {
    pub fn new(target: SimulatedTarget) -> Self {
        Self(Rc::new(RefCell::new(target)))
    }

    pub fn target(&self) -> std::cell::Ref<'_, SimulatedTarget> {
        self.0.borrow()
    }

    pub fn target_mut(&self) -> std::cell::RefMut<'_, SimulatedTarget> {
        self.0.borrow_mut()
    }

    pub fn poll_event(&self) -> Option<SimEvent> {
        self.0.borrow_mut().poll_event()
    }
}

impl CharacteristicTransport for SimLink {
    fn write(&mut self, characteristic: Uuid, data: &[u8], _mode: WriteMode) -> Result<(), GattError> {
        self.0.borrow_mut().write(characteristic, data)
    }

    fn set_notify(&mut self, characteristic: Uuid, enabled: bool) -> Result<(), GattError> {
        if characteristic != OTA_COMMAND_CHAR && characteristic != OTA_DATA_CHAR {
            return Err(GattError::Att(0x0A));
        }
        self.0.borrow_mut().notify_enabled = enabled;
        Ok(())
    }

    fn mtu(&self) -> usize {
        247
    }
}

impl GattClient for SimLink {
    fn discover_services(&mut self, services: &[Uuid]) {
        self.0.borrow_mut().answer_services(services);
    }

    fn discover_characteristics(&mut self, service: Uuid, characteristics: Option<&[Uuid]>) {
        self.0.borrow_mut().answer_characteristics(service, characteristics);
    }

    fn read_rssi(&mut self) {
        self.0.borrow_mut().answer_rssi();
    }
}

// ── Tests ────────────────────────────────────────────────────
