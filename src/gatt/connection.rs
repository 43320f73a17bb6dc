//! One connected OTA peripheral: attribute discovery, notification
//! routing and the bits of link state the host displays.
//!
//! The platform stack forwards its callbacks here; the connection owns
//! the [`DiscoveryEngine`] and [`NotificationDemux`] and binds the two
//! OTA characteristics to their engine channels.

use core::time::Duration;

use log::{info, warn};
use uuid::Uuid;

use crate::config::OtaConfig;
use crate::error::{DiscoveryError, GattError};
use crate::ota::ports::ChannelSink;
use crate::ota::types::Channel;

use super::demux::NotificationDemux;
use super::discovery::{AttributeHandle, DiscoveryEngine, GattClient};
use super::transport::{OTA_COMMAND_CHAR, OTA_DATA_CHAR, OTA_SERVICE};

/// Services a scanner matches in advertisements.
pub const ADVERTISED_SERVICES: &[Uuid] = &[OTA_SERVICE];

/// Services used to find peripherals the system already has connected.
pub const INTERESTED_SERVICES: &[Uuid] = &[OTA_SERVICE];

/// Both OTA characteristics.
pub const OTA_CHARACTERISTICS: &[Uuid] = &[OTA_COMMAND_CHAR, OTA_DATA_CHAR];

/// Optional link-state callbacks.
pub trait ConnectionDelegate {
    fn on_name_updated(&mut self, _name: &str) {}
    fn on_rssi(&mut self, _result: Result<i16, GattError>) {}
    fn on_connected(&mut self) {}
    fn on_disconnected(&mut self) {}
}

pub struct GattConnection<C: GattClient> {
    client: C,
    discovery: DiscoveryEngine,
    demux: NotificationDemux,
    name: Option<String>,
    rssi: Option<i16>,
    connected: bool,
    delegate: Option<Box<dyn ConnectionDelegate>>,
}

impl<C: GattClient> GattConnection<C> {
    /// A freshly connected peripheral with the OTA characteristics bound.
    pub fn new(client: C, config: &OtaConfig) -> Self {
        let mut demux = NotificationDemux::new();
        demux.bind_channel(OTA_COMMAND_CHAR, Channel::Command);
        demux.bind_channel(OTA_DATA_CHAR, Channel::Data);
        Self {
            client,
            discovery: DiscoveryEngine::from_config(config),
            demux,
            name: None,
            rssi: None,
            connected: true,
            delegate: None,
        }
    }

    #[must_use]
    pub fn with_delegate(mut self, delegate: Box<dyn ConnectionDelegate>) -> Self {
        self.delegate = Some(delegate);
        self
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    pub fn client_mut(&mut self) -> &mut C {
        &mut self.client
    }

    pub fn discovery(&self) -> &DiscoveryEngine {
        &self.discovery
    }

    pub fn demux(&self) -> &NotificationDemux {
        &self.demux
    }

    pub fn demux_mut(&mut self) -> &mut NotificationDemux {
        &mut self.demux
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn rssi(&self) -> Option<i16> {
        self.rssi
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    // ── Discovery ────────────────────────────────────────────

    pub fn discover<F>(&mut self, service: Uuid, characteristics: Option<&[Uuid]>, timeout: Option<Duration>, completion: F)
    where
        F: FnOnce(Result<(), DiscoveryError>) + 'static,
    {
        if !self.connected {
            completion(Err(DiscoveryError::Disconnected));
            return;
        }
        self.discovery
            .discover(&mut self.client, service, characteristics, timeout, completion);
    }

    /// Resolve the OTA service and both of its characteristics.
    pub fn discover_ota<F>(&mut self, completion: F)
    where
        F: FnOnce(Result<(), DiscoveryError>) + 'static,
    {
        self.discover(OTA_SERVICE, Some(OTA_CHARACTERISTICS), None, completion);
    }

    /// True once both OTA characteristics are in the attribute table.
    pub fn ota_ready(&self) -> bool {
        OTA_CHARACTERISTICS
            .iter()
            .all(|c| self.discovery.characteristic(*c, OTA_SERVICE).is_some())
    }

    pub fn on_services_discovered(&mut self, result: Result<&[(Uuid, AttributeHandle)], GattError>) {
        self.discovery.on_services_discovered(&mut self.client, result);
    }

    pub fn on_characteristics_discovered(&mut self, service: Uuid, result: Result<&[(Uuid, AttributeHandle)], GattError>) {
        self.discovery.on_characteristics_discovered(service, result);
    }

    pub fn tick(&mut self, elapsed: Duration) {
        self.discovery.tick(elapsed);
    }

    // ── Inbound events ───────────────────────────────────────

    /// A characteristic value was notified (or read back).
    pub fn on_value_updated<S: ChannelSink + ?Sized>(&self, characteristic: Uuid, value: &[u8], sink: &mut S) -> usize {
        self.demux.did_update_value(characteristic, value, sink)
    }

    pub fn on_name_updated(&mut self, name: &str) {
        info!("GATT: peripheral name '{}'", name);
        self.name = Some(name.to_owned());
        if let Some(d) = self.delegate.as_mut() {
            d.on_name_updated(name);
        }
    }

    /// Ask the stack for a fresh RSSI reading. Works whether or not the
    /// link is up; the platform reports failure through `on_rssi_read`.
    pub fn read_peripheral_rssi(&mut self) {
        self.client.read_rssi();
    }

    pub fn on_rssi_read(&mut self, result: Result<i16, GattError>) {
        match result {
            Ok(rssi) => self.rssi = Some(rssi),
            Err(e) => warn!("GATT: RSSI read failed: {}", e),
        }
        if let Some(d) = self.delegate.as_mut() {
            d.on_rssi(result);
        }
    }

    /// The link is back. Attributes from the previous link stay cleared
    /// and must be discovered again.
    pub fn on_connected(&mut self) {
        if self.connected {
            return;
        }
        info!("GATT: peripheral reconnected");
        self.connected = true;
        if let Some(d) = self.delegate.as_mut() {
            d.on_connected();
        }
    }

    /// Invalidate every discovered attribute and fail pending discovery.
    pub fn on_disconnected(&mut self) {
        if !self.connected {
            return;
        }
        info!("GATT: peripheral disconnected");
        self.connected = false;
        self.rssi = None;
        self.discovery.clear();
        if let Some(d) = self.delegate.as_mut() {
            d.on_disconnected();
        }
    }
}

// ── Tests ────────────────────────────────────────────────────
