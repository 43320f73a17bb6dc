//! Notification routing: observers registered on the connection's demux
//! alongside the engine's bound channels.

use std::cell::RefCell;
use std::rc::Rc;

use otalink::gatt::{NotificationReceptor, OTA_DATA_CHAR};
use otalink::ota::FileKind;
use uuid::Uuid;

use crate::harness::{Harness, image};

struct Counter {
    uuid: Uuid,
    values: RefCell<Vec<Vec<u8>>>,
}

impl Counter {
    fn new(uuid: Uuid) -> Rc<Self> {
        Rc::new(Self {
            uuid,
            values: RefCell::new(Vec::new()),
        })
    }

    fn count(&self) -> usize {
        self.values.borrow().len()
    }
}

impl NotificationReceptor for Counter {
    fn characteristic(&self) -> Uuid {
        self.uuid
    }

    fn did_update_value(&self, value: &[u8]) {
        self.values.borrow_mut().push(value.to_vec());
    }
}

#[test]
fn receptor_sees_acks_alongside_engine() {
    let mut h = Harness::with_defaults();
    let tap = Counter::new(OTA_DATA_CHAR);
    h.conn.demux_mut().register_receptor(tap.clone());

    let img = image(1_000);
    h.transfer(&img, FileKind::App);
    assert!(h.engine.observer().completed());

    // 1000 bytes at 128 per frame: one ack per frame.
    assert_eq!(tap.count(), 8);
}

#[test]
fn unregistered_receptor_stops_receiving() {
    let mut h = Harness::with_defaults();
    let a = Counter::new(OTA_DATA_CHAR);
    let b = Counter::new(OTA_DATA_CHAR);
    let a_dyn: Rc<dyn NotificationReceptor> = a.clone();
    h.conn.demux_mut().register_receptor(Rc::clone(&a_dyn));
    h.conn.demux_mut().register_receptor(b.clone());

    h.conn.demux_mut().unregister_receptor(&a_dyn);
    h.transfer(&image(300), FileKind::Config);

    assert_eq!(a.count(), 0);
    assert_eq!(b.count(), 3);
}

#[test]
fn duplicate_registration_delivers_once() {
    let mut h = Harness::with_defaults();
    let tap = Counter::new(OTA_DATA_CHAR);
    assert!(h.conn.demux_mut().register_receptor(tap.clone()));
    assert!(!h.conn.demux_mut().register_receptor(tap.clone()));

    h.transfer(&image(100), FileKind::Patch);
    assert_eq!(tap.count(), 1);
}
