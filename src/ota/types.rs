//! Wire type codes, split by concern.
//!
//! The target firmware uses one numeric space for three unrelated
//! things: the kind of file being loaded, the characteristic a packet
//! travels on, and the ISP entry flavour. At the API boundary each gets
//! its own enum; the shared numbering only appears in `code()` /
//! `from_code()`.
//!
//! | Type       | Variant         | Code |
//! |------------|-----------------|------|
//! | `FileKind` | App             | 0    |
//! | `FileKind` | Config          | 1    |
//! | `FileKind` | Patch           | 2    |
//! | `Channel`  | CommandInterval | 3    |
//! | `Channel`  | Command         | 4    |
//! | `Channel`  | Data            | 5    |
//! | `Channel`  | CommandNoNotify | 6    |
//! | `IspKind`  | IspAddr         | 7    |
//! | `IspKind`  | EntryIsp        | 8    |

use core::fmt;

/// Kind of binary being loaded (and partition it lands in).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum FileKind {
    /// Application firmware image.
    App = 0,
    /// Configuration blob.
    Config = 1,
    /// Patch image.
    Patch = 2,
}

impl FileKind {
    pub const fn code(self) -> u8 {
        self as u8
    }

    pub const fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Self::App),
            1 => Some(Self::Config),
            2 => Some(Self::Patch),
            _ => None,
        }
    }
}

impl fmt::Display for FileKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::App => write!(f, "app"),
            Self::Config => write!(f, "config"),
            Self::Patch => write!(f, "patch"),
        }
    }
}

/// Characteristic a packet is written to, or was notified on.
///
/// The three command variants all target the command characteristic;
/// they differ in how the transport should issue the write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Channel {
    /// Command write the transport should pace by its write interval
    /// (the target is flushing flash when it arrives).
    CommandInterval = 3,
    /// Command write that expects a reply notification.
    Command = 4,
    /// Payload frame on the data characteristic.
    Data = 5,
    /// Command write with no reply expected.
    CommandNoNotify = 6,
}

impl Channel {
    pub const fn code(self) -> u8 {
        self as u8
    }

    pub const fn from_code(code: u8) -> Option<Self> {
        match code {
            3 => Some(Self::CommandInterval),
            4 => Some(Self::Command),
            5 => Some(Self::Data),
            6 => Some(Self::CommandNoNotify),
            _ => None,
        }
    }

    /// True for every variant that lands on the command characteristic.
    pub const fn is_command(self) -> bool {
        !matches!(self, Self::Data)
    }
}

/// ISP entry flavour passed to `enter_isp`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum IspKind {
    /// Enter ISP at the address of the ISP partition.
    IspAddr = 7,
    /// Jump straight into the ISP module.
    EntryIsp = 8,
}

impl IspKind {
    pub const fn code(self) -> u8 {
        self as u8
    }

    pub const fn from_code(code: u8) -> Option<Self> {
        match code {
            7 => Some(Self::IspAddr),
            8 => Some(Self::EntryIsp),
            _ => None,
        }
    }
}

/// Command opcodes on the command characteristic.
///
/// Replies from the target carry `opcode | REPLY_BIT`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Opcode {
    Begin = 0x01,
    End = 0x02,
    WriteUserData = 0x03,
    ReadPartition = 0x04,
    EnterIsp = 0x05,
    Reset = 0x06,
}

/// Set on the opcode byte of every target → host command reply.
pub const REPLY_BIT: u8 = 0x80;

impl Opcode {
    pub const fn code(self) -> u8 {
        self as u8
    }

    pub const fn reply_code(self) -> u8 {
        self as u8 | REPLY_BIT
    }

    pub const fn from_code(code: u8) -> Option<Self> {
        match code & !REPLY_BIT {
            0x01 => Some(Self::Begin),
            0x02 => Some(Self::End),
            0x03 => Some(Self::WriteUserData),
            0x04 => Some(Self::ReadPartition),
            0x05 => Some(Self::EnterIsp),
            0x06 => Some(Self::Reset),
            _ => None,
        }
    }
}

/// Status byte reported by the target in acks and command replies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TargetStatus {
    Ok = 0,
    InvalidAddress = 1,
    InvalidLength = 2,
    Busy = 3,
    CrcMismatch = 4,
    Unsupported = 5,
    Sequence = 6,
}

impl TargetStatus {
    pub const fn code(self) -> u8 {
        self as u8
    }

    pub const fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Self::Ok),
            1 => Some(Self::InvalidAddress),
            2 => Some(Self::InvalidLength),
            3 => Some(Self::Busy),
            4 => Some(Self::CrcMismatch),
            5 => Some(Self::Unsupported),
            6 => Some(Self::Sequence),
            _ => None,
        }
    }

    pub const fn is_ok(self) -> bool {
        matches!(self, Self::Ok)
    }
}

impl fmt::Display for TargetStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ok => write!(f, "ok"),
            Self::InvalidAddress => write!(f, "invalid address"),
            Self::InvalidLength => write!(f, "invalid length"),
            Self::Busy => write!(f, "target busy"),
            Self::CrcMismatch => write!(f, "CRC mismatch"),
            Self::Unsupported => write!(f, "unsupported request"),
            Self::Sequence => write!(f, "sequence error"),
        }
    }
}

/// Result of a partition-address read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartitionAddress {
    pub kind: FileKind,
    pub address: u32,
    pub length: u32,
}
