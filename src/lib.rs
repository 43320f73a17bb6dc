//! otalink: host-side BLE OTA transfer engine.
//!
//! Pushes application images, config blobs and patches to a peripheral
//! over a GATT command/data characteristic pair.
//!
//! - [`ota`]: packetizer, wire codec, transfer session and engine
//! - [`gatt`]: characteristic transport, attribute discovery,
//!   notification routing, connection state
//! - [`sim`]: in-process peripheral for tests and the `ota-sim` binary
//!
//! Everything runs in one execution context. Nothing blocks; results
//! arrive through listener/observer callbacks, and time advances only
//! through the `tick` calls the host makes.

#![deny(unused_must_use)]

pub mod config;
pub mod error;
pub mod gatt;
pub mod ota;
pub mod sim;

pub use config::OtaConfig;
pub use error::{ConfigError, DecodeError, DiscoveryError, Error, GattError, RequestError, Result, TransferError};
