//! Host-side harness for integration tests.
//!
//! Wires an [`OtaEngine`] to a [`SimulatedTarget`] through the real
//! transport adapter and GATT connection, and records every observer
//! callback so tests can assert on the full history.

use std::time::Duration;

use otalink::OtaConfig;
use otalink::error::TransferError;
use otalink::gatt::{GattConnection, TransportListener};
use otalink::ota::{FileKind, Opcode, OtaEngine, OtaListener, OtaObserver, PartitionAddress, TargetStatus};
use otalink::sim::{SimEvent, SimLink, SimulatedTarget};

pub const STEP: Duration = Duration::from_millis(10);

// ── Observer record ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum Observed {
    Address(PartitionAddress),
    UserData(Result<(), TargetStatus>),
    Complete(FileKind),
    Failed(TransferError),
    CommandAck(Opcode, TargetStatus),
    Timeout(Opcode),
}

#[derive(Default)]
pub struct RecordingObserver {
    pub events: Vec<Observed>,
}

#[allow(dead_code)]
impl RecordingObserver {
    pub fn completed(&self) -> bool {
        self.events.iter().any(|e| matches!(e, Observed::Complete(_)))
    }

    pub fn failure(&self) -> Option<TransferError> {
        self.events.iter().find_map(|e| match e {
            Observed::Failed(err) => Some(*err),
            _ => None,
        })
    }

    pub fn finished(&self) -> bool {
        self.completed() || self.failure().is_some()
    }
}

impl OtaObserver for RecordingObserver {
    fn on_read_address(&mut self, address: PartitionAddress) {
        self.events.push(Observed::Address(address));
    }
    fn on_user_data_written(&mut self, result: Result<(), TargetStatus>) {
        self.events.push(Observed::UserData(result));
    }
    fn on_transfer_complete(&mut self, kind: FileKind) {
        self.events.push(Observed::Complete(kind));
    }
    fn on_transfer_failed(&mut self, error: TransferError) {
        self.events.push(Observed::Failed(error));
    }
    fn on_command_ack(&mut self, opcode: Opcode, status: TargetStatus) {
        self.events.push(Observed::CommandAck(opcode, status));
    }
    fn on_request_timeout(&mut self, opcode: Opcode) {
        self.events.push(Observed::Timeout(opcode));
    }
}

// ── Progress-recording listener ───────────────────────────────

/// Wraps the transport listener to keep every progress value.
pub struct ProgressTap {
    pub inner: TransportListener<SimLink>,
    pub progress: Vec<f32>,
}

impl OtaListener for ProgressTap {
    fn on_packet(&mut self, packet: &[u8], channel: otalink::ota::Channel) {
        self.inner.on_packet(packet, channel);
    }
    fn on_progress(&mut self, progress: f32) {
        self.progress.push(progress);
        self.inner.on_progress(progress);
    }
}

pub type Engine = OtaEngine<ProgressTap, RecordingObserver>;

// ── Harness ───────────────────────────────────────────────────

pub struct Harness {
    pub link: SimLink,
    pub conn: GattConnection<SimLink>,
    pub engine: Engine,
}

#[allow(dead_code)]
impl Harness {
    pub fn new(config: OtaConfig, target: SimulatedTarget) -> Self {
        let link = SimLink::new(target);
        let conn = GattConnection::new(link.clone(), &config);
        let tap = ProgressTap {
            inner: TransportListener::new(link.clone()),
            progress: Vec::new(),
        };
        let engine = OtaEngine::new(config, tap).with_observer(RecordingObserver::default());
        Self { link, conn, engine }
    }

    pub fn with_defaults() -> Self {
        let config = OtaConfig::default();
        let target = SimulatedTarget::new(&config);
        Self::new(config, target)
    }

    pub fn observed(&self) -> &[Observed] {
        &self.engine.observer().events
    }

    pub fn progress(&self) -> &[f32] {
        &self.engine.listener().progress
    }

    /// Deliver everything the target has queued.
    pub fn pump(&mut self) {
        while let Some(event) = self.link.poll_event() {
            match event {
                SimEvent::Services(s) => self.conn.on_services_discovered(Ok(s.as_slice())),
                SimEvent::Characteristics {
                    service,
                    characteristics,
                } => self
                    .conn
                    .on_characteristics_discovered(service, Ok(characteristics.as_slice())),
                SimEvent::Notify {
                    characteristic,
                    value,
                } => {
                    self.conn.on_value_updated(characteristic, &value, &mut self.engine);
                }
                SimEvent::Rssi(rssi) => self.conn.on_rssi_read(Ok(rssi)),
            }
        }
    }

    /// Advance both the connection and the engine by one step.
    pub fn tick(&mut self, elapsed: Duration) {
        self.conn.tick(elapsed);
        self.engine.tick(elapsed);
    }

    /// Pump and tick until `done` or `limit`. Returns whether `done` held.
    pub fn run_until(&mut self, limit: Duration, mut done: impl FnMut(&Self) -> bool) -> bool {
        let mut elapsed = Duration::ZERO;
        loop {
            self.pump();
            if done(self) {
                return true;
            }
            if elapsed >= limit {
                return false;
            }
            self.tick(STEP);
            elapsed += STEP;
        }
    }

    pub fn transfer(&mut self, image: &[u8], kind: FileKind) {
        self.engine.load_binary(image, kind).expect("load_binary accepted");
        self.run_until(Duration::from_secs(30), |h| h.engine.observer().finished());
        self.pump();
    }
}

pub fn image(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 7 + i / 251) as u8).collect()
}
