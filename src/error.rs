//! Unified error types for the OTA engine and GATT layer.
//!
//! Synchronous request rejections, asynchronous transfer/discovery
//! failures and codec errors each get their own enum; the top-level
//! [`Error`] wraps all of them so the host application can funnel
//! everything through one type. All variants are `Copy`.

use core::fmt;

use crate::ota::types::TargetStatus;

// ---------------------------------------------------------------------------
// Top-level error
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// A request was refused before anything was sent.
    Request(RequestError),
    /// An open transfer session failed.
    Transfer(TransferError),
    /// Attribute discovery did not complete.
    Discovery(DiscoveryError),
    /// Inbound bytes could not be decoded.
    Decode(DecodeError),
    /// A GATT operation reported by the platform stack failed.
    Gatt(GattError),
    /// Configuration is invalid.
    Config(ConfigError),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Request(e) => write!(f, "request: {e}"),
            Self::Transfer(e) => write!(f, "transfer: {e}"),
            Self::Discovery(e) => write!(f, "discovery: {e}"),
            Self::Decode(e) => write!(f, "decode: {e}"),
            Self::Gatt(e) => write!(f, "gatt: {e}"),
            Self::Config(e) => write!(f, "config: {e}"),
        }
    }
}

impl std::error::Error for Error {}

// ---------------------------------------------------------------------------
// Request errors (synchronous status returns)
// ---------------------------------------------------------------------------

/// Rejection of a request at call time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestError {
    /// A session or single-shot request is already in flight.
    Busy,
    /// `load_binary` with zero bytes.
    EmptyPayload,
    /// Payload exceeds the configured maximum image size.
    PayloadTooLarge,
    /// User-data range falls outside the writable region.
    InvalidAddress,
    /// User-data length is zero or does not fit one command packet.
    InvalidLength,
    /// Encryption is enabled but no cipher was installed.
    CipherMissing,
}

impl RequestError {
    /// Numeric status for hosts that expect an `int` return
    /// (0 is success, every rejection is negative).
    pub const fn code(self) -> i32 {
        match self {
            Self::Busy => -1,
            Self::EmptyPayload => -2,
            Self::PayloadTooLarge => -3,
            Self::InvalidAddress => -4,
            Self::InvalidLength => -5,
            Self::CipherMissing => -6,
        }
    }

    /// Collapse a request result into its numeric status.
    pub fn status_code(result: core::result::Result<(), Self>) -> i32 {
        result.map_or_else(Self::code, |()| 0)
    }
}

impl fmt::Display for RequestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Busy => write!(f, "another request is in flight"),
            Self::EmptyPayload => write!(f, "payload is empty"),
            Self::PayloadTooLarge => write!(f, "payload exceeds maximum image size"),
            Self::InvalidAddress => write!(f, "address outside user-data region"),
            Self::InvalidLength => write!(f, "invalid user-data length"),
            Self::CipherMissing => write!(f, "encryption enabled without a cipher"),
        }
    }
}

impl std::error::Error for RequestError {}

impl From<RequestError> for Error {
    fn from(e: RequestError) -> Self {
        Self::Request(e)
    }
}

// ---------------------------------------------------------------------------
// Transfer errors (asynchronous, end an open session)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferError {
    /// No ack arrived for the outstanding frame within the ack timeout.
    AckTimeout,
    /// Bytes on the data channel during an ack wait could not be decoded.
    MalformedAck,
    /// Ack named a sequence or offset other than the outstanding frame's.
    UnexpectedSequence,
    /// The target answered with a non-OK status.
    TargetRejected(TargetStatus),
    /// The host cancelled the session.
    Cancelled,
}

impl fmt::Display for TransferError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AckTimeout => write!(f, "acknowledgement timed out"),
            Self::MalformedAck => write!(f, "malformed acknowledgement"),
            Self::UnexpectedSequence => write!(f, "acknowledgement out of sequence"),
            Self::TargetRejected(status) => write!(f, "target rejected frame: {status}"),
            Self::Cancelled => write!(f, "transfer cancelled"),
        }
    }
}

impl std::error::Error for TransferError {}

impl From<TransferError> for Error {
    fn from(e: TransferError) -> Self {
        Self::Transfer(e)
    }
}

// ---------------------------------------------------------------------------
// Discovery errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscoveryError {
    /// Service or a characteristic was not found before the deadline.
    Timeout,
    /// The link dropped while the request was pending.
    Disconnected,
}

impl fmt::Display for DiscoveryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout => write!(f, "attribute discovery timed out"),
            Self::Disconnected => write!(f, "peripheral disconnected"),
        }
    }
}

impl std::error::Error for DiscoveryError {}

impl From<DiscoveryError> for Error {
    fn from(e: DiscoveryError) -> Self {
        Self::Discovery(e)
    }
}

// ---------------------------------------------------------------------------
// Decode errors (malformed inbound bytes)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeError {
    /// Fewer bytes than the header promises.
    Truncated,
    /// Trailing bytes after the declared length.
    TrailingBytes,
    /// CRC-16 did not match.
    BadChecksum,
    /// Unknown type code, opcode, status or marker byte.
    UnknownCode(u8),
    /// Body longer than a frame may carry.
    Oversized,
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Truncated => write!(f, "packet truncated"),
            Self::TrailingBytes => write!(f, "trailing bytes after packet"),
            Self::BadChecksum => write!(f, "checksum mismatch"),
            Self::UnknownCode(code) => write!(f, "unknown code 0x{code:02x}"),
            Self::Oversized => write!(f, "body exceeds frame capacity"),
        }
    }
}

impl std::error::Error for DecodeError {}

impl From<DecodeError> for Error {
    fn from(e: DecodeError) -> Self {
        Self::Decode(e)
    }
}

// ---------------------------------------------------------------------------
// GATT errors reported by the platform stack
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GattError {
    NotConnected,
    /// ATT error code from the peer.
    Att(u8),
    Io,
}

impl fmt::Display for GattError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotConnected => write!(f, "peripheral not connected"),
            Self::Att(code) => write!(f, "ATT error 0x{code:02x}"),
            Self::Io => write!(f, "GATT I/O error"),
        }
    }
}

impl std::error::Error for GattError {}

impl From<GattError> for Error {
    fn from(e: GattError) -> Self {
        Self::Gatt(e)
    }
}

// ---------------------------------------------------------------------------
// Configuration errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    /// A field failed range validation; names the field.
    ValidationFailed(&'static str),
    /// Stored bytes could not be deserialized.
    Corrupted,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ValidationFailed(field) => write!(f, "validation failed: {field}"),
            Self::Corrupted => write!(f, "config corrupted"),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<ConfigError> for Error {
    fn from(e: ConfigError) -> Self {
        Self::Config(e)
    }
}

/// Crate-wide `Result` alias.
pub type Result<T> = core::result::Result<T, Error>;
