//! OTA transfer protocol: host side.
//!
//! ```text
//!  load_binary(payload) ─▶ Packetizer ─▶ Frame ─▶ FrameCipher? ─▶ encode
//!                                                                   │
//!                                          OtaListener::on_packet ◀─┘
//!                                                                   │
//!                                                       (characteristic write)
//!                                                                   │
//!  set_bluetooth_notify_data ◀── DataAck / Command reply ◀── notify ┘
//!          │
//!          └─▶ TransferSession::acknowledge ─▶ next frame │ End │ failure
//! ```
//!
//! - [`types`]: file kinds, channels, opcodes and their wire codes
//! - [`frame`]: packet codec and CRC
//! - [`cipher`]: per-frame encryption capability
//! - [`packetizer`]: fragmentation and reassembly
//! - [`session`]: one in-flight transfer
//! - [`engine`]: request API, inbound routing, timeouts
//! - [`ports`]: listener/observer traits

pub mod cipher;
pub mod engine;
pub mod frame;
pub mod packetizer;
pub mod ports;
pub mod session;
pub mod types;

pub use cipher::{FrameCipher, HmacStreamCipher};
pub use engine::{EngineState, MAX_USER_DATA_LEN, OtaEngine};
pub use ports::{ChannelSink, NullObserver, OtaListener, OtaObserver};
pub use types::{Channel, FileKind, IspKind, Opcode, PartitionAddress, TargetStatus};
