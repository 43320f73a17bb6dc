//! Fuzz target: frame, ack and command decoders
//!
//! Arbitrary bytes must either be rejected or decode to a packet that
//! re-encodes to exactly the same bytes.
//!
//! cargo fuzz run fuzz_packet_decoders

#![no_main]

use libfuzzer_sys::fuzz_target;
use otalink::ota::frame::{Command, DataAck, Frame};

fuzz_target!(|data: &[u8]| {
    if let Ok(frame) = Frame::decode(data) {
        assert_eq!(frame.encode().as_slice(), data);
    }
    if let Ok(ack) = DataAck::decode(data) {
        assert_eq!(ack.encode().as_slice(), data);
    }
    if let Ok(cmd) = Command::decode(data) {
        assert_eq!(cmd.encode().as_slice(), data);
    }
});
