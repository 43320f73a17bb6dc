//! Attribute discovery: resolve service and characteristic UUIDs on a
//! connected peer within a bounded time.
//!
//! ```text
//! discover(S, [A, B]) ──▶ cached? ──yes──▶ completion(Ok)
//!                            │no
//!                            ▼
//!                   discover_services([S]) ──▶ on_services_discovered
//!                            │
//!                            ▼
//!          discover_characteristics(S, [A, B]) ──▶ on_characteristics_discovered
//!                            │
//!                 all found? ──yes──▶ commit staging ──▶ completion(Ok)
//!
//! tick(elapsed): age >= timeout ──▶ drop staging ──▶ completion(Err(Timeout))
//! ```
//!
//! Every request stages what it finds separately and commits to the
//! attribute table only once complete, so a timed-out request leaves
//! no partial entries behind.

use std::collections::{BTreeMap, BTreeSet};

use core::time::Duration;

use log::{debug, info, warn};
use uuid::Uuid;

use crate::config::OtaConfig;
use crate::error::{DiscoveryError, GattError};

/// Platform-native attribute handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AttributeHandle(pub u16);

/// One resolved characteristic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiscoveredAttribute {
    pub service: Uuid,
    pub characteristic: Uuid,
    pub handle: AttributeHandle,
}

/// Queries the platform stack issues on the peer's behalf. Results come
/// back through [`DiscoveryEngine::on_services_discovered`] and
/// [`DiscoveryEngine::on_characteristics_discovered`].
pub trait GattClient {
    fn discover_services(&mut self, services: &[Uuid]);

    /// `None` asks for every characteristic of `service`.
    fn discover_characteristics(&mut self, service: Uuid, characteristics: Option<&[Uuid]>);

    /// Ask for the peer's signal strength; the answer comes back through
    /// the connection's `on_rssi_read`.
    fn read_rssi(&mut self);
}

type Completion = Box<dyn FnOnce(Result<(), DiscoveryError>)>;

struct PendingDiscovery {
    service: Uuid,
    wanted: Option<Vec<Uuid>>,
    service_handle: Option<AttributeHandle>,
    staged: Vec<(Uuid, AttributeHandle)>,
    full_list_received: bool,
    waited: Duration,
    timeout: Duration,
    completion: Completion,
}

impl PendingDiscovery {
    fn is_complete(&self) -> bool {
        if self.service_handle.is_none() {
            return false;
        }
        match &self.wanted {
            // A service with no characteristics at all is not resolved.
            None => self.full_list_received && !self.staged.is_empty(),
            Some(wanted) => wanted.iter().all(|w| self.staged.iter().any(|(u, _)| u == w)),
        }
    }
}

/// Attribute table for one connection plus its in-flight requests.
pub struct DiscoveryEngine {
    default_timeout: Duration,
    services: BTreeMap<Uuid, AttributeHandle>,
    characteristics: BTreeMap<(Uuid, Uuid), AttributeHandle>,
    /// Services whose full characteristic list has been committed.
    fully_discovered: BTreeSet<Uuid>,
    pending: Vec<PendingDiscovery>,
}

impl DiscoveryEngine {
    pub fn new(default_timeout: Duration) -> Self {
        Self {
            default_timeout,
            services: BTreeMap::new(),
            characteristics: BTreeMap::new(),
            fully_discovered: BTreeSet::new(),
            pending: Vec::new(),
        }
    }

    pub fn from_config(config: &OtaConfig) -> Self {
        Self::new(config.discovery_timeout())
    }

    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    /// Resolve `service` and `characteristics` (all of them when `None`).
    /// `completion` runs exactly once; it must not re-enter this engine.
    pub fn discover<C, F>(
        &mut self,
        client: &mut C,
        service: Uuid,
        characteristics: Option<&[Uuid]>,
        timeout: Option<Duration>,
        completion: F,
    ) where
        C: GattClient + ?Sized,
        F: FnOnce(Result<(), DiscoveryError>) + 'static,
    {
        if self.is_resolved(service, characteristics) {
            debug!("GATT: {} already discovered", service);
            completion(Ok(()));
            return;
        }

        let service_handle = self.services.get(&service).copied();
        let timeout = timeout.unwrap_or(self.default_timeout);
        debug!("GATT: discovering {} (timeout {:?})", service, timeout);
        self.pending.push(PendingDiscovery {
            service,
            wanted: characteristics.map(<[Uuid]>::to_vec),
            service_handle,
            staged: Vec::new(),
            full_list_received: false,
            waited: Duration::ZERO,
            timeout,
            completion: Box::new(completion),
        });

        if service_handle.is_some() {
            client.discover_characteristics(service, characteristics);
        } else {
            client.discover_services(&[service]);
        }
    }

    /// Peer reported services. Requests waiting on one of them move on
    /// to characteristic discovery.
    pub fn on_services_discovered<C: GattClient + ?Sized>(
        &mut self,
        client: &mut C,
        result: Result<&[(Uuid, AttributeHandle)], GattError>,
    ) {
        let services = match result {
            Ok(services) => services,
            Err(e) => {
                // Requests stay pending and time out.
                warn!("GATT: service discovery failed: {}", e);
                return;
            }
        };

        for pending in &mut self.pending {
            if pending.service_handle.is_some() {
                continue;
            }
            let Some((_, handle)) = services.iter().find(|(u, _)| *u == pending.service) else {
                continue;
            };
            pending.service_handle = Some(*handle);
            client.discover_characteristics(pending.service, pending.wanted.as_deref());
        }
    }

    /// Peer reported characteristics of `service`.
    pub fn on_characteristics_discovered(
        &mut self,
        service: Uuid,
        result: Result<&[(Uuid, AttributeHandle)], GattError>,
    ) {
        let characteristics = match result {
            Ok(characteristics) => characteristics,
            Err(e) => {
                warn!("GATT: characteristic discovery for {} failed: {}", service, e);
                return;
            }
        };

        for pending in &mut self.pending {
            if pending.service != service || pending.service_handle.is_none() {
                continue;
            }
            for &(uuid, handle) in characteristics {
                let wanted = pending.wanted.as_ref().is_none_or(|w| w.contains(&uuid));
                if wanted && !pending.staged.iter().any(|(u, _)| *u == uuid) {
                    pending.staged.push((uuid, handle));
                }
            }
            if pending.wanted.is_none() {
                pending.full_list_received = true;
            }
        }

        let (done, waiting): (Vec<_>, Vec<_>) =
            core::mem::take(&mut self.pending).into_iter().partition(PendingDiscovery::is_complete);
        self.pending = waiting;
        for pending in done {
            self.commit(&pending);
            info!(
                "GATT: discovered {} ({} characteristics)",
                pending.service,
                pending.staged.len()
            );
            (pending.completion)(Ok(()));
        }
    }

    /// Age pending requests; expired ones complete with `Timeout`.
    pub fn tick(&mut self, elapsed: Duration) {
        for pending in &mut self.pending {
            pending.waited += elapsed;
        }
        let (expired, waiting): (Vec<_>, Vec<_>) = core::mem::take(&mut self.pending)
            .into_iter()
            .partition(|p| p.waited >= p.timeout);
        self.pending = waiting;
        for pending in expired {
            warn!("GATT: discovery of {} timed out after {:?}", pending.service, pending.waited);
            (pending.completion)(Err(DiscoveryError::Timeout));
        }
    }

    /// Drop the table and fail every pending request (disconnect).
    pub fn clear(&mut self) {
        self.services.clear();
        self.characteristics.clear();
        self.fully_discovered.clear();
        for pending in core::mem::take(&mut self.pending) {
            (pending.completion)(Err(DiscoveryError::Disconnected));
        }
    }

    // ── Lookup ───────────────────────────────────────────────

    pub fn service(&self, service: Uuid) -> Option<AttributeHandle> {
        self.services.get(&service).copied()
    }

    pub fn characteristic(&self, characteristic: Uuid, service: Uuid) -> Option<AttributeHandle> {
        self.characteristics.get(&(service, characteristic)).copied()
    }

    /// Every committed characteristic, ordered by service then UUID.
    pub fn attributes(&self) -> impl Iterator<Item = DiscoveredAttribute> + '_ {
        self.characteristics
            .iter()
            .map(|(&(service, characteristic), &handle)| DiscoveredAttribute {
                service,
                characteristic,
                handle,
            })
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    // ── Internal ─────────────────────────────────────────────

    fn is_resolved(&self, service: Uuid, characteristics: Option<&[Uuid]>) -> bool {
        if !self.services.contains_key(&service) {
            return false;
        }
        match characteristics {
            None => self.fully_discovered.contains(&service),
            Some(list) => list
                .iter()
                .all(|c| self.characteristics.contains_key(&(service, *c))),
        }
    }

    fn commit(&mut self, pending: &PendingDiscovery) {
        if let Some(handle) = pending.service_handle {
            self.services.insert(pending.service, handle);
        }
        for &(uuid, handle) in &pending.staged {
            self.characteristics.insert((pending.service, uuid), handle);
        }
        if pending.wanted.is_none() {
            self.fully_discovered.insert(pending.service);
        }
    }
}

// ── Tests ────────────────────────────────────────────────────
