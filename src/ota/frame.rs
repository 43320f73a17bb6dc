//! Packet codec for the command and data characteristics.
//!
//! Data packet (host → target, data characteristic):
//! ```text
//! ┌──────┬───────┬────────┬──────┬──────────────┬─────────────┬────────┐
//! │ Kind │ Flags │ Seq    │ Len  │ Body (Len B) │ Tag (4B)    │ CRC16  │
//! │ (1B) │ (1B)  │ LE u16 │ (1B) │              │ if ENCRYPTED│ LE u16 │
//! └──────┴───────┴────────┴──────┴──────────────┴─────────────┴────────┘
//! ```
//!
//! Data ack (target → host, data characteristic), fixed 10 bytes:
//! ```text
//! ┌──────┬────────┬────────┬──────────────┬────────┐
//! │ 0xA5 │ Status │ Seq    │ Next offset  │ CRC16  │
//! │ (1B) │ (1B)   │ LE u16 │ LE u32       │ LE u16 │
//! └──────┴────────┴────────┴──────────────┴────────┘
//! ```
//!
//! Command packet (both directions, command characteristic):
//! ```text
//! ┌────────┬──────┬────────────────┬────────┐
//! │ Opcode │ Len  │ Params (Len B) │ CRC16  │
//! │ (1B)   │ (1B) │                │ LE u16 │
//! └────────┴──────┴────────────────┴────────┘
//! ```
//!
//! CRC is CRC-16/CCITT-FALSE over every byte that precedes it.

use crc::{CRC_16_IBM_3740, Crc};
use heapless::Vec;

use super::cipher::{FrameCipher, TAG_LEN};
use super::types::{FileKind, IspKind, Opcode, PartitionAddress, REPLY_BIT, TargetStatus};
use crate::error::DecodeError;

/// Largest body a single data packet carries.
pub const MAX_FRAME_PAYLOAD: usize = 244;

/// Data packet header size (kind, flags, seq, len).
pub const DATA_HEADER_LEN: usize = 5;

pub const CRC_LEN: usize = 2;

/// Largest encoded packet on either characteristic.
pub const MAX_PACKET_LEN: usize = DATA_HEADER_LEN + MAX_FRAME_PAYLOAD + TAG_LEN + CRC_LEN;

/// Largest command parameter block.
pub const MAX_COMMAND_PARAMS: usize = MAX_PACKET_LEN - 2 - CRC_LEN;

/// Leading byte of every data ack.
pub const ACK_MARKER: u8 = 0xA5;

pub const DATA_ACK_LEN: usize = 10;

/// Flag: body is encrypted and a tag follows it.
pub const FLAG_ENCRYPTED: u8 = 0x01;
/// Flag: final frame of the image.
pub const FLAG_LAST: u8 = 0x02;

/// An encoded packet ready for one characteristic write.
pub type Packet = Vec<u8, MAX_PACKET_LEN>;

// ── CRC ──────────────────────────────────────────────────────

/// CRC-16/CCITT-FALSE (poly 0x1021, init 0xFFFF, no reflection).
pub const CRC16: Crc<u16> = Crc::<u16>::new(&CRC_16_IBM_3740);

pub fn crc16(data: &[u8]) -> u16 {
    CRC16.checksum(data)
}

fn push_crc(buf: &mut Packet) {
    let crc = crc16(buf);
    // Callers size `buf` so the two CRC bytes always fit.
    let _ = buf.extend_from_slice(&crc.to_le_bytes());
}

/// Split `bytes` into content and trailing CRC, verifying the CRC.
fn check_crc(bytes: &[u8]) -> Result<&[u8], DecodeError> {
    if bytes.len() < CRC_LEN {
        return Err(DecodeError::Truncated);
    }
    let (content, tail) = bytes.split_at(bytes.len() - CRC_LEN);
    let expected = u16::from_le_bytes([tail[0], tail[1]]);
    if crc16(content) != expected {
        return Err(DecodeError::BadChecksum);
    }
    Ok(content)
}

// ── Data frames ──────────────────────────────────────────────

/// One fragment of a payload. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    kind: FileKind,
    seq: u16,
    last: bool,
    body: Vec<u8, MAX_FRAME_PAYLOAD>,
    tag: Option<[u8; TAG_LEN]>,
}

impl Frame {
    /// Build a plaintext frame. Fails if `body` exceeds a frame.
    pub fn new(kind: FileKind, seq: u16, last: bool, body: &[u8]) -> Result<Self, DecodeError> {
        let body = Vec::from_slice(body).map_err(|()| DecodeError::Oversized)?;
        Ok(Self {
            kind,
            seq,
            last,
            body,
            tag: None,
        })
    }

    pub fn kind(&self) -> FileKind {
        self.kind
    }

    pub fn seq(&self) -> u16 {
        self.seq
    }

    pub fn is_last(&self) -> bool {
        self.last
    }

    /// Body as carried on the wire (ciphertext when sealed).
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn tag(&self) -> Option<[u8; TAG_LEN]> {
        self.tag
    }

    pub fn is_encrypted(&self) -> bool {
        self.tag.is_some()
    }

    /// Encrypt the body in place of a plaintext frame.
    pub fn seal(mut self, cipher: &dyn FrameCipher) -> Self {
        if self.tag.is_none() {
            let tag = cipher.seal(self.seq, &mut self.body);
            self.tag = Some(tag);
        }
        self
    }

    /// Decrypt and authenticate a sealed frame. Plaintext frames are
    /// returned unchanged; a tag mismatch yields `None`.
    pub fn open(&self, cipher: &dyn FrameCipher) -> Option<Vec<u8, MAX_FRAME_PAYLOAD>> {
        let mut body = self.body.clone();
        match self.tag {
            None => Some(body),
            Some(tag) => cipher.open(self.seq, &mut body, &tag).then_some(body),
        }
    }

    pub fn encode(&self) -> Packet {
        let mut out = Packet::new();
        let mut flags = 0;
        if self.tag.is_some() {
            flags |= FLAG_ENCRYPTED;
        }
        if self.last {
            flags |= FLAG_LAST;
        }
        // Header + body + tag + crc never exceed MAX_PACKET_LEN.
        let _ = out.push(self.kind.code());
        let _ = out.push(flags);
        let _ = out.extend_from_slice(&self.seq.to_le_bytes());
        let _ = out.push(self.body.len() as u8);
        let _ = out.extend_from_slice(&self.body);
        if let Some(tag) = &self.tag {
            let _ = out.extend_from_slice(tag);
        }
        push_crc(&mut out);
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let content = check_crc(bytes)?;
        if content.len() < DATA_HEADER_LEN {
            return Err(DecodeError::Truncated);
        }
        let kind = FileKind::from_code(content[0]).ok_or(DecodeError::UnknownCode(content[0]))?;
        let flags = content[1];
        if flags & !(FLAG_ENCRYPTED | FLAG_LAST) != 0 {
            return Err(DecodeError::UnknownCode(flags));
        }
        let seq = u16::from_le_bytes([content[2], content[3]]);
        let len = content[4] as usize;
        if len > MAX_FRAME_PAYLOAD {
            return Err(DecodeError::Oversized);
        }
        let tag_len = if flags & FLAG_ENCRYPTED != 0 { TAG_LEN } else { 0 };
        let expected = DATA_HEADER_LEN + len + tag_len;
        if content.len() < expected {
            return Err(DecodeError::Truncated);
        }
        if content.len() > expected {
            return Err(DecodeError::TrailingBytes);
        }

        let body_end = DATA_HEADER_LEN + len;
        let mut frame = Self::new(kind, seq, flags & FLAG_LAST != 0, &content[DATA_HEADER_LEN..body_end])?;
        if tag_len > 0 {
            let mut tag = [0u8; TAG_LEN];
            tag.copy_from_slice(&content[body_end..expected]);
            frame.tag = Some(tag);
        }
        Ok(frame)
    }
}

// ── Data acks ────────────────────────────────────────────────

/// Target's acknowledgement of one data frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataAck {
    pub status: TargetStatus,
    pub seq: u16,
    /// Image offset the target expects next (bytes stored so far).
    pub next_offset: u32,
}

impl DataAck {
    pub fn encode(&self) -> Packet {
        let mut out = Packet::new();
        let _ = out.push(ACK_MARKER);
        let _ = out.push(self.status.code());
        let _ = out.extend_from_slice(&self.seq.to_le_bytes());
        let _ = out.extend_from_slice(&self.next_offset.to_le_bytes());
        push_crc(&mut out);
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        if bytes.len() < DATA_ACK_LEN {
            return Err(DecodeError::Truncated);
        }
        if bytes.len() > DATA_ACK_LEN {
            return Err(DecodeError::TrailingBytes);
        }
        let content = check_crc(bytes)?;
        if content[0] != ACK_MARKER {
            return Err(DecodeError::UnknownCode(content[0]));
        }
        let status = TargetStatus::from_code(content[1]).ok_or(DecodeError::UnknownCode(content[1]))?;
        Ok(Self {
            status,
            seq: u16::from_le_bytes([content[2], content[3]]),
            next_offset: u32::from_le_bytes([content[4], content[5], content[6], content[7]]),
        })
    }
}

// ── Command packets ──────────────────────────────────────────

/// A packet on the command characteristic, request or reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub opcode: Opcode,
    pub reply: bool,
    pub params: Vec<u8, MAX_COMMAND_PARAMS>,
}

impl Command {
    fn request(opcode: Opcode, params: &[u8]) -> Self {
        Self {
            opcode,
            reply: false,
            // Every builder below passes far fewer than MAX_COMMAND_PARAMS.
            params: Vec::from_slice(params).unwrap_or_default(),
        }
    }

    pub fn begin(kind: FileKind, total: u32, frame_size: u16, encrypted: bool) -> Self {
        let mut p = [0u8; 8];
        p[0] = kind.code();
        p[1..5].copy_from_slice(&total.to_le_bytes());
        p[5..7].copy_from_slice(&frame_size.to_le_bytes());
        p[7] = if encrypted { FLAG_ENCRYPTED } else { 0 };
        Self::request(Opcode::Begin, &p)
    }

    pub fn end(kind: FileKind, total: u32, image_crc: u16) -> Self {
        let mut p = [0u8; 7];
        p[0] = kind.code();
        p[1..5].copy_from_slice(&total.to_le_bytes());
        p[5..7].copy_from_slice(&image_crc.to_le_bytes());
        Self::request(Opcode::End, &p)
    }

    /// Caller guarantees `data.len() + 4 <= MAX_COMMAND_PARAMS`.
    pub fn write_user_data(address: u32, data: &[u8]) -> Self {
        let mut cmd = Self::request(Opcode::WriteUserData, &address.to_le_bytes());
        let _ = cmd.params.extend_from_slice(data);
        cmd
    }

    pub fn read_partition(kind: FileKind) -> Self {
        Self::request(Opcode::ReadPartition, &[kind.code()])
    }

    pub fn enter_isp(kind: IspKind) -> Self {
        Self::request(Opcode::EnterIsp, &[kind.code()])
    }

    pub fn reset() -> Self {
        Self::request(Opcode::Reset, &[])
    }

    /// Build a target → host reply: status byte followed by `extra`.
    pub fn reply_to(opcode: Opcode, status: TargetStatus, extra: &[u8]) -> Self {
        let mut cmd = Self::request(opcode, &[status.code()]);
        cmd.reply = true;
        let _ = cmd.params.extend_from_slice(extra);
        cmd
    }

    /// Reply to a partition read.
    pub fn partition_reply(status: TargetStatus, addr: PartitionAddress) -> Self {
        let mut extra = [0u8; 9];
        extra[0] = addr.kind.code();
        extra[1..5].copy_from_slice(&addr.address.to_le_bytes());
        extra[5..9].copy_from_slice(&addr.length.to_le_bytes());
        Self::reply_to(Opcode::ReadPartition, status, &extra)
    }

    /// Status byte of a reply.
    pub fn status(&self) -> Result<TargetStatus, DecodeError> {
        let code = *self.params.first().ok_or(DecodeError::Truncated)?;
        TargetStatus::from_code(code).ok_or(DecodeError::UnknownCode(code))
    }

    /// Parse the body of a `ReadPartition` reply.
    pub fn partition_address(&self) -> Result<PartitionAddress, DecodeError> {
        let p = &self.params;
        if p.len() < 10 {
            return Err(DecodeError::Truncated);
        }
        if p.len() > 10 {
            return Err(DecodeError::TrailingBytes);
        }
        let kind = FileKind::from_code(p[1]).ok_or(DecodeError::UnknownCode(p[1]))?;
        Ok(PartitionAddress {
            kind,
            address: u32::from_le_bytes([p[2], p[3], p[4], p[5]]),
            length: u32::from_le_bytes([p[6], p[7], p[8], p[9]]),
        })
    }

    pub fn encode(&self) -> Packet {
        let mut out = Packet::new();
        let op = if self.reply {
            self.opcode.reply_code()
        } else {
            self.opcode.code()
        };
        let _ = out.push(op);
        let _ = out.push(self.params.len() as u8);
        let _ = out.extend_from_slice(&self.params);
        push_crc(&mut out);
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let content = check_crc(bytes)?;
        if content.len() < 2 {
            return Err(DecodeError::Truncated);
        }
        let opcode = Opcode::from_code(content[0]).ok_or(DecodeError::UnknownCode(content[0]))?;
        let len = content[1] as usize;
        if content.len() < 2 + len {
            return Err(DecodeError::Truncated);
        }
        if content.len() > 2 + len {
            return Err(DecodeError::TrailingBytes);
        }
        let params = Vec::from_slice(&content[2..]).map_err(|()| DecodeError::Oversized)?;
        Ok(Self {
            opcode,
            reply: content[0] & REPLY_BIT != 0,
            params,
        })
    }
}

// ── Tests ────────────────────────────────────────────────────
