//! Integration test driver for `tests/integration/` submodules.
//!
//! Each `mod` below exercises one subsystem end to end against the
//! simulated peripheral. Everything runs on the host with simulated
//! time; no radio is involved.

mod demux_tests;
mod discovery_tests;
mod harness;
mod transfer_tests;
