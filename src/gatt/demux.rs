//! Notification demultiplexer: fan inbound GATT events out to the
//! engine and to registered observers.
//!
//! ```text
//!                       ┌─ bound channel? ──▶ ChannelSink (OtaEngine)
//! did_update_value(u) ──┤
//!                       └─ receptors[u] ────▶ NotificationReceptor, in order
//! did_read(u)  ─────────── readers[u] ──────▶ CharacteristicReader
//! did_write(u) ─────────── writers[u] ──────▶ CharacteristicWriter
//! ```
//!
//! Observers are shared `Rc` handles; identity is the allocation, so
//! registering the same handle twice is a no-op and unregistering an
//! unknown one does nothing.

use std::collections::BTreeMap;
use std::rc::Rc;

use log::{debug, trace};
use uuid::Uuid;

use crate::error::GattError;
use crate::ota::ports::ChannelSink;
use crate::ota::types::Channel;

// ── Observer traits ──────────────────────────────────────────

pub trait CharacteristicReader {
    /// Characteristic this observer is interested in.
    fn characteristic(&self) -> Uuid;
    fn did_read(&self, result: Result<&[u8], GattError>);
}

pub trait CharacteristicWriter {
    fn characteristic(&self) -> Uuid;
    fn did_write(&self, result: Result<(), GattError>);
}

pub trait NotificationReceptor {
    fn characteristic(&self) -> Uuid;
    fn did_update_notification_state(&self, _enabled: bool) {}
    fn did_update_value(&self, value: &[u8]);
}

// ── Registry ─────────────────────────────────────────────────

/// Ordered observer lists keyed by characteristic.
struct Registry<T: ?Sized> {
    lists: BTreeMap<Uuid, Vec<Rc<T>>>,
}

impl<T: ?Sized> Registry<T> {
    fn new() -> Self {
        Self {
            lists: BTreeMap::new(),
        }
    }

    fn register(&mut self, uuid: Uuid, observer: Rc<T>) -> bool {
        let list = self.lists.entry(uuid).or_default();
        if list.iter().any(|o| Rc::ptr_eq(o, &observer)) {
            return false;
        }
        list.push(observer);
        true
    }

    fn unregister(&mut self, uuid: Uuid, observer: &Rc<T>) -> bool {
        let Some(list) = self.lists.get_mut(&uuid) else {
            return false;
        };
        let before = list.len();
        list.retain(|o| !Rc::ptr_eq(o, observer));
        let removed = list.len() != before;
        if list.is_empty() {
            self.lists.remove(&uuid);
        }
        removed
    }

    /// Snapshot so callbacks may register or unregister freely.
    fn snapshot(&self, uuid: Uuid) -> Vec<Rc<T>> {
        self.lists.get(&uuid).cloned().unwrap_or_default()
    }

    fn count(&self, uuid: Uuid) -> usize {
        self.lists.get(&uuid).map_or(0, Vec::len)
    }

    fn clear(&mut self) {
        self.lists.clear();
    }
}

// ── Demux ────────────────────────────────────────────────────

pub struct NotificationDemux {
    channels: BTreeMap<Uuid, Channel>,
    readers: Registry<dyn CharacteristicReader>,
    writers: Registry<dyn CharacteristicWriter>,
    receptors: Registry<dyn NotificationReceptor>,
}

impl Default for NotificationDemux {
    fn default() -> Self {
        Self::new()
    }
}

impl NotificationDemux {
    pub fn new() -> Self {
        Self {
            channels: BTreeMap::new(),
            readers: Registry::new(),
            writers: Registry::new(),
            receptors: Registry::new(),
        }
    }

    /// Route values of `characteristic` into the engine on `channel`.
    pub fn bind_channel(&mut self, characteristic: Uuid, channel: Channel) {
        self.channels.insert(characteristic, channel);
    }

    pub fn unbind_channel(&mut self, characteristic: Uuid) {
        self.channels.remove(&characteristic);
    }

    pub fn channel_for(&self, characteristic: Uuid) -> Option<Channel> {
        self.channels.get(&characteristic).copied()
    }

    // ── Registration ─────────────────────────────────────────

    pub fn register_reader(&mut self, reader: Rc<dyn CharacteristicReader>) -> bool {
        let uuid = reader.characteristic();
        self.readers.register(uuid, reader)
    }

    pub fn unregister_reader(&mut self, reader: &Rc<dyn CharacteristicReader>) -> bool {
        self.readers.unregister(reader.characteristic(), reader)
    }

    pub fn register_writer(&mut self, writer: Rc<dyn CharacteristicWriter>) -> bool {
        let uuid = writer.characteristic();
        self.writers.register(uuid, writer)
    }

    pub fn unregister_writer(&mut self, writer: &Rc<dyn CharacteristicWriter>) -> bool {
        self.writers.unregister(writer.characteristic(), writer)
    }

    pub fn register_receptor(&mut self, receptor: Rc<dyn NotificationReceptor>) -> bool {
        let uuid = receptor.characteristic();
        self.receptors.register(uuid, receptor)
    }

    pub fn unregister_receptor(&mut self, receptor: &Rc<dyn NotificationReceptor>) -> bool {
        self.receptors.unregister(receptor.characteristic(), receptor)
    }

    /// Number of receptors registered for `characteristic`.
    pub fn receptor_count(&self, characteristic: Uuid) -> usize {
        self.receptors.count(characteristic)
    }

    /// Drop every registration and channel binding.
    pub fn clear(&mut self) {
        self.channels.clear();
        self.readers.clear();
        self.writers.clear();
        self.receptors.clear();
    }

    // ── Delivery ─────────────────────────────────────────────

    pub fn did_read(&self, characteristic: Uuid, result: Result<&[u8], GattError>) {
        for reader in self.readers.snapshot(characteristic) {
            reader.did_read(result);
        }
    }

    pub fn did_write(&self, characteristic: Uuid, result: Result<(), GattError>) {
        for writer in self.writers.snapshot(characteristic) {
            writer.did_write(result);
        }
    }

    pub fn did_update_notification_state(&self, characteristic: Uuid, enabled: bool) {
        debug!("GATT: notifications on {} {}", characteristic, if enabled { "on" } else { "off" });
        for receptor in self.receptors.snapshot(characteristic) {
            receptor.did_update_notification_state(enabled);
        }
    }

    /// Deliver a notified value. Returns how many consumers saw it.
    pub fn did_update_value<S: ChannelSink + ?Sized>(&self, characteristic: Uuid, value: &[u8], sink: &mut S) -> usize {
        let mut delivered = 0;
        if let Some(channel) = self.channel_for(characteristic) {
            sink.on_channel_data(value, channel);
            delivered += 1;
        }
        for receptor in self.receptors.snapshot(characteristic) {
            receptor.did_update_value(value);
            delivered += 1;
        }
        if delivered == 0 {
            trace!("GATT: {} bytes on {} with no consumer", value.len(), characteristic);
        }
        delivered
    }
}

// ── Tests ────────────────────────────────────────────────────
