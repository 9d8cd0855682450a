//! In-process transport double
//!
//! A scriptable [`BleTransport`] for tests and demos: peripherals are
//! declared up front, latencies and faults are injected per call, and an
//! operation journal plus a live-connection count make resource discipline
//! observable. Establishment runs on a detached task like the platform
//! daemon, so a connect future dropped mid-flight can still bring the link
//! up afterwards; connections only come down through an explicit
//! `disconnect` or `abort_connect`, so a leaked link shows up as a nonzero
//! count.
//!
//! All waiting uses the tokio clock, so paused-clock tests run instantly.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use gridaware_proto::gatt;
use tokio::time::Instant;

use crate::permissions::{PermissionKind, PermissionOutcome};
use crate::transport::{
    BleConnection, BleTransport, DeviceId, DiscoveredDevice, GattEndpoint, GattService,
    TransportError,
};

/// One scripted peripheral.
#[derive(Debug, Clone)]
pub struct SimPeripheral {
    id: String,
    name: Option<String>,
    rssi: Option<i16>,
    services: Vec<GattService>,
    connectable: bool,
    appears_after: Duration,
    connect_latency: Duration,
}

impl SimPeripheral {
    /// A device advertising `name` with the full provisioning GATT layout.
    pub fn provisionable(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: Some(name.into()),
            rssi: Some(-60),
            services: vec![GattService {
                uuid: gatt::SERVICE_UUID,
                characteristics: vec![gatt::CREDENTIALS_UUID],
            }],
            connectable: true,
            appears_after: Duration::ZERO,
            connect_latency: Duration::ZERO,
        }
    }

    /// A named, connectable device with no services at all.
    pub fn named(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            services: Vec::new(),
            rssi: Some(-70),
            ..Self::provisionable(id, name)
        }
    }

    /// A device that does not advertise a local name.
    pub fn unnamed(id: impl Into<String>) -> Self {
        Self {
            name: None,
            ..Self::named(id, "")
        }
    }

    /// A device exposing the provisioning service but not the credential
    /// characteristic.
    pub fn with_bare_service(id: impl Into<String>, name: impl Into<String>) -> Self {
        let mut p = Self::provisionable(id, name);
        p.services = vec![GattService {
            uuid: gatt::SERVICE_UUID,
            characteristics: Vec::new(),
        }];
        p
    }

    /// Keep the device out of scan results until `delay` after scan start.
    pub fn appears_after(mut self, delay: Duration) -> Self {
        self.appears_after = delay;
        self
    }

    /// Make connection establishment take `latency`.
    pub fn connect_latency(mut self, latency: Duration) -> Self {
        self.connect_latency = latency;
        self
    }

    /// Refuse every connection attempt.
    pub fn refuse_connect(mut self) -> Self {
        self.connectable = false;
        self
    }
}

/// Transport operations worth asserting on. Snapshot polls are deliberately
/// not journaled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SimOp {
    RequestAccess,
    StartScan,
    StopScan,
    Connect(String),
    AbortConnect(String),
    DiscoverServices(String),
    Write(String),
    Disconnect(String),
}

struct Inner {
    devices: Vec<SimPeripheral>,
    scanning: bool,
    scan_started_at: Option<Instant>,
    denied: Vec<PermissionKind>,
    discovery_error: Option<String>,
    write_error: Option<String>,
    write_latency: Duration,
    live_connections: usize,
    aborted_connects: HashSet<String>,
    unclaimed: HashSet<String>,
    journal: Vec<SimOp>,
    written: HashMap<String, Vec<Vec<u8>>>,
}

/// Scriptable transport; clones share state.
#[derive(Clone)]
pub struct SimTransport {
    inner: Arc<Mutex<Inner>>,
}

impl SimTransport {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                devices: Vec::new(),
                scanning: false,
                scan_started_at: None,
                denied: Vec::new(),
                discovery_error: None,
                write_error: None,
                write_latency: Duration::ZERO,
                live_connections: 0,
                aborted_connects: HashSet::new(),
                unclaimed: HashSet::new(),
                journal: Vec::new(),
                written: HashMap::new(),
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().expect("sim transport state poisoned")
    }

    pub fn add_device(&self, device: SimPeripheral) {
        self.lock().devices.push(device);
    }

    /// Make permission requests come back denied for `missing`.
    pub fn deny_permissions(&self, missing: Vec<PermissionKind>) {
        self.lock().denied = missing;
    }

    /// Make every discovery snapshot fail with `reason`.
    pub fn fail_discovery(&self, reason: impl Into<String>) {
        self.lock().discovery_error = Some(reason.into());
    }

    /// Make every characteristic write fail with `reason`.
    pub fn fail_writes(&self, reason: impl Into<String>) {
        self.lock().write_error = Some(reason.into());
    }

    /// Delay every characteristic write by `latency`.
    pub fn set_write_latency(&self, latency: Duration) {
        self.lock().write_latency = latency;
    }

    pub fn is_scanning(&self) -> bool {
        self.lock().scanning
    }

    /// Connections opened and not yet explicitly disconnected.
    pub fn live_connections(&self) -> usize {
        self.lock().live_connections
    }

    pub fn journal(&self) -> Vec<SimOp> {
        self.lock().journal.clone()
    }

    /// Every payload written to `id`, in order.
    pub fn written_payloads(&self, id: &str) -> Vec<Vec<u8>> {
        self.lock().written.get(id).cloned().unwrap_or_default()
    }
}

impl Default for SimTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BleTransport for SimTransport {
    async fn request_access(&self) -> Result<PermissionOutcome, TransportError> {
        let mut inner = self.lock();
        inner.journal.push(SimOp::RequestAccess);
        if inner.denied.is_empty() {
            Ok(PermissionOutcome::Granted)
        } else {
            Ok(PermissionOutcome::Denied(inner.denied.clone()))
        }
    }

    async fn start_scan(&self) -> Result<(), TransportError> {
        let mut inner = self.lock();
        inner.journal.push(SimOp::StartScan);
        inner.scanning = true;
        inner.scan_started_at = Some(Instant::now());
        Ok(())
    }

    async fn stop_scan(&self) -> Result<(), TransportError> {
        let mut inner = self.lock();
        inner.journal.push(SimOp::StopScan);
        inner.scanning = false;
        Ok(())
    }

    async fn discovered(&self) -> Result<Vec<DiscoveredDevice>, TransportError> {
        let inner = self.lock();
        if let Some(reason) = &inner.discovery_error {
            return Err(TransportError::Scan(reason.clone()));
        }
        let Some(started) = inner.scan_started_at.filter(|_| inner.scanning) else {
            return Ok(Vec::new());
        };
        let elapsed = Instant::now() - started;
        Ok(inner
            .devices
            .iter()
            .filter(|d| elapsed >= d.appears_after)
            .map(|d| DiscoveredDevice {
                id: DeviceId::new(d.id.clone()),
                name: d.name.clone(),
                rssi: d.rssi,
            })
            .collect())
    }

    async fn connect(&self, id: &DeviceId) -> Result<Box<dyn BleConnection>, TransportError> {
        let latency = {
            let mut inner = self.lock();
            inner.journal.push(SimOp::Connect(id.as_str().to_string()));
            let Some(device) = inner.devices.iter().find(|d| d.id == id.as_str()) else {
                return Err(TransportError::Connect(format!("unknown device {id}")));
            };
            if !device.connectable {
                return Err(TransportError::Connect("connection refused".to_string()));
            }
            let latency = device.connect_latency;
            // A fresh attempt supersedes any abort left over from an
            // earlier abandoned one.
            inner.aborted_connects.remove(id.as_str());
            latency
        };
        // Establishment runs on its own task, like the platform daemon:
        // dropping this future does not stop it, and the link it brings up
        // counts as live until somebody tears it down.
        let establish = tokio::spawn({
            let transport = self.clone();
            let id = id.as_str().to_string();
            async move {
                tokio::time::sleep(latency).await;
                let mut inner = transport.lock();
                if inner.aborted_connects.remove(&id) {
                    return false;
                }
                inner.live_connections += 1;
                inner.unclaimed.insert(id);
                true
            }
        });
        match establish.await {
            Ok(true) => {
                self.lock().unclaimed.remove(id.as_str());
                Ok(Box::new(SimConnection {
                    transport: self.clone(),
                    id: id.as_str().to_string(),
                    alive: true,
                }))
            }
            Ok(false) => Err(TransportError::Connect("attempt aborted".to_string())),
            Err(e) => Err(TransportError::Connect(format!("establishment task: {e}"))),
        }
    }

    async fn abort_connect(&self, id: &DeviceId) -> Result<(), TransportError> {
        let mut inner = self.lock();
        inner
            .journal
            .push(SimOp::AbortConnect(id.as_str().to_string()));
        if inner.unclaimed.remove(id.as_str()) {
            // Establishment beat the abort; take the link back down.
            inner.live_connections = inner.live_connections.saturating_sub(1);
        } else {
            inner.aborted_connects.insert(id.as_str().to_string());
        }
        Ok(())
    }

    async fn release(&self) -> Result<(), TransportError> {
        let mut inner = self.lock();
        if inner.scanning {
            inner.journal.push(SimOp::StopScan);
            inner.scanning = false;
        }
        Ok(())
    }
}

struct SimConnection {
    transport: SimTransport,
    id: String,
    alive: bool,
}

#[async_trait]
impl BleConnection for SimConnection {
    async fn discover_services(&mut self) -> Result<Vec<GattService>, TransportError> {
        let mut inner = self.transport.lock();
        inner
            .journal
            .push(SimOp::DiscoverServices(self.id.clone()));
        let Some(device) = inner.devices.iter().find(|d| d.id == self.id) else {
            return Err(TransportError::Discovery(format!(
                "unknown device {}",
                self.id
            )));
        };
        Ok(device.services.clone())
    }

    async fn write(&mut self, _endpoint: &GattEndpoint, data: &[u8]) -> Result<(), TransportError> {
        if !self.alive {
            return Err(TransportError::Disconnected);
        }
        let (latency, error) = {
            let inner = self.transport.lock();
            (inner.write_latency, inner.write_error.clone())
        };
        tokio::time::sleep(latency).await;
        if let Some(reason) = error {
            return Err(TransportError::Write(reason));
        }
        let mut inner = self.transport.lock();
        inner.journal.push(SimOp::Write(self.id.clone()));
        inner
            .written
            .entry(self.id.clone())
            .or_default()
            .push(data.to_vec());
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), TransportError> {
        if !self.alive {
            return Ok(());
        }
        self.alive = false;
        let mut inner = self.transport.lock();
        inner.journal.push(SimOp::Disconnect(self.id.clone()));
        inner.live_connections = inner.live_connections.saturating_sub(1);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn devices_are_invisible_until_their_delay_passes() {
        let sim = SimTransport::new();
        sim.add_device(
            SimPeripheral::provisionable("id-1", "ESP32-7A3C")
                .appears_after(Duration::from_secs(5)),
        );
        sim.start_scan().await.unwrap();
        assert!(sim.discovered().await.unwrap().is_empty());
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(sim.discovered().await.unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn nothing_is_discovered_while_not_scanning() {
        let sim = SimTransport::new();
        sim.add_device(SimPeripheral::provisionable("id-1", "ESP32-7A3C"));
        assert!(sim.discovered().await.unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_is_idempotent_and_releases_the_count() {
        let sim = SimTransport::new();
        sim.add_device(SimPeripheral::provisionable("id-1", "ESP32-7A3C"));
        let mut conn = sim.connect(&DeviceId::new("id-1")).await.unwrap();
        assert_eq!(sim.live_connections(), 1);
        conn.disconnect().await.unwrap();
        conn.disconnect().await.unwrap();
        assert_eq!(sim.live_connections(), 0);
        let disconnects = sim
            .journal()
            .into_iter()
            .filter(|op| matches!(op, SimOp::Disconnect(_)))
            .count();
        assert_eq!(disconnects, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn abandoned_connect_still_establishes_until_aborted() {
        let sim = SimTransport::new();
        sim.add_device(
            SimPeripheral::provisionable("id-1", "ESP32-7A3C")
                .connect_latency(Duration::from_secs(5)),
        );
        let id = DeviceId::new("id-1");
        // Give up long before the handshake completes.
        let abandoned = tokio::time::timeout(Duration::from_secs(1), sim.connect(&id)).await;
        assert!(abandoned.is_err());
        tokio::time::sleep(Duration::from_secs(10)).await;
        // The daemon finished the handshake anyway.
        assert_eq!(sim.live_connections(), 1);
        sim.abort_connect(&id).await.unwrap();
        assert_eq!(sim.live_connections(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn abort_before_establishment_discards_the_link() {
        let sim = SimTransport::new();
        sim.add_device(
            SimPeripheral::provisionable("id-1", "ESP32-7A3C")
                .connect_latency(Duration::from_secs(5)),
        );
        let id = DeviceId::new("id-1");
        let abandoned = tokio::time::timeout(Duration::from_secs(1), sim.connect(&id)).await;
        assert!(abandoned.is_err());
        sim.abort_connect(&id).await.unwrap();
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(sim.live_connections(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn writes_after_disconnect_report_a_dead_link() {
        let sim = SimTransport::new();
        sim.add_device(SimPeripheral::provisionable("id-1", "ESP32-7A3C"));
        let mut conn = sim.connect(&DeviceId::new("id-1")).await.unwrap();
        conn.disconnect().await.unwrap();
        let endpoint = GattEndpoint {
            service: gatt::SERVICE_UUID,
            characteristic: gatt::CREDENTIALS_UUID,
        };
        assert_eq!(
            conn.write(&endpoint, b"x").await,
            Err(TransportError::Disconnected)
        );
    }
}
