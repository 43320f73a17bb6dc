//! GATT side of the link: characteristic transport, attribute
//! discovery, notification routing and per-peripheral state.
//!
//! ```text
//!  platform BLE stack
//!     │  writes ▲                │ callbacks
//!     │         │                ▼
//!  CharacteristicTransport   GattConnection ──▶ DiscoveryEngine
//!         ▲                      │
//!  TransportListener             └──▶ NotificationDemux ──▶ OtaEngine
//!         ▲                                             └─▶ receptors
//!      OtaEngine
//! ```

pub mod connection;
pub mod demux;
pub mod discovery;
pub mod transport;

pub use connection::{ConnectionDelegate, GattConnection};
pub use demux::{CharacteristicReader, CharacteristicWriter, NotificationDemux, NotificationReceptor};
pub use discovery::{AttributeHandle, DiscoveredAttribute, DiscoveryEngine, GattClient};
pub use transport::{
    CharacteristicTransport, NullTransport, OTA_COMMAND_CHAR, OTA_DATA_CHAR, OTA_SERVICE, TransportListener,
    WriteMode,
};
