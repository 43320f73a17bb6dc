//! Attribute discovery against the simulated peripheral.

use std::cell::Cell;
use std::rc::Rc;
use std::time::Duration;

use otalink::OtaConfig;
use otalink::error::DiscoveryError;
use otalink::gatt::{OTA_COMMAND_CHAR, OTA_DATA_CHAR, OTA_SERVICE};
use otalink::sim::{Faults, SimulatedTarget};

use crate::harness::Harness;

type Slot = Rc<Cell<Option<Result<(), DiscoveryError>>>>;

fn slot() -> (Slot, impl FnOnce(Result<(), DiscoveryError>) + 'static) {
    let slot: Slot = Rc::default();
    let writer = Rc::clone(&slot);
    (slot, move |r| writer.set(Some(r)))
}

#[test]
fn ota_service_resolves_immediately() {
    let mut h = Harness::with_defaults();
    let (result, done) = slot();
    h.conn.discover_ota(done);
    h.pump();

    assert_eq!(result.get(), Some(Ok(())));
    assert!(h.conn.ota_ready());
    assert!(h.conn.discovery().characteristic(OTA_DATA_CHAR, OTA_SERVICE).is_some());
    assert!(h.conn.discovery().characteristic(OTA_COMMAND_CHAR, OTA_SERVICE).is_some());
}

#[test]
fn hidden_service_times_out_at_default_not_before() {
    let config = OtaConfig::default();
    let target = SimulatedTarget::new(&config).with_faults(Faults {
        hide_service: true,
        ..Faults::default()
    });
    let mut h = Harness::new(config, target);
    let (result, done) = slot();
    h.conn.discover_ota(done);

    assert!(!h.run_until(Duration::from_millis(4_990), |_| result.get().is_some()));
    assert!(h.run_until(Duration::from_millis(10), |_| result.get().is_some()));
    assert_eq!(result.get(), Some(Err(DiscoveryError::Timeout)));
    assert!(!h.conn.ota_ready());
}

#[test]
fn missing_characteristic_commits_nothing() {
    let mut h = Harness::with_defaults();
    let unknown = uuid::Uuid::from_u128(0x8e5c_00ff_4d3c_4a3e_9a4b_2f1d_6c7b_0e11);
    let (result, done) = slot();
    h.conn
        .discover(OTA_SERVICE, Some(&[OTA_DATA_CHAR, unknown]), Some(Duration::from_secs(1)), done);

    h.run_until(Duration::from_secs(2), |_| result.get().is_some());
    assert_eq!(result.get(), Some(Err(DiscoveryError::Timeout)));
    assert!(h.conn.discovery().characteristic(OTA_DATA_CHAR, OTA_SERVICE).is_none());
    assert!(h.conn.discovery().service(OTA_SERVICE).is_none());
}

#[test]
fn second_discovery_is_served_from_cache() {
    let mut h = Harness::with_defaults();
    let (first, done) = slot();
    h.conn.discover_ota(done);
    h.pump();
    assert_eq!(first.get(), Some(Ok(())));

    let (second, done) = slot();
    h.conn.discover_ota(done);
    assert_eq!(second.get(), Some(Ok(())), "completes without a round trip");
    assert!(h.link.poll_event().is_none());
}

#[test]
fn disconnect_fails_pending_discovery() {
    let config = OtaConfig::default();
    let target = SimulatedTarget::new(&config).with_faults(Faults {
        hide_service: true,
        ..Faults::default()
    });
    let mut h = Harness::new(config, target);
    let (result, done) = slot();
    h.conn.discover_ota(done);
    h.pump();

    h.conn.on_disconnected();
    assert_eq!(result.get(), Some(Err(DiscoveryError::Disconnected)));
    assert_eq!(h.conn.discovery().pending_count(), 0);
}

#[test]
fn reconnect_rediscovers_and_reads_rssi() {
    let mut h = Harness::with_defaults();
    let (first, done) = slot();
    h.conn.discover_ota(done);
    h.pump();
    assert_eq!(first.get(), Some(Ok(())));

    h.conn.on_disconnected();
    assert!(!h.conn.ota_ready());
    h.link.target_mut().set_rssi(-71);
    h.conn.read_peripheral_rssi();
    h.pump();
    assert_eq!(h.conn.rssi(), Some(-71));

    h.conn.on_connected();
    let (second, done) = slot();
    h.conn.discover_ota(done);
    assert_eq!(second.get(), None, "previous attributes are not reused");
    h.pump();
    assert_eq!(second.get(), Some(Ok(())));
    assert!(h.conn.ota_ready());
}
