//! BLE transport capability traits and core types
//!
//! The engine never touches a platform BLE library directly; it consumes the
//! radio through these traits. `ble::BtleplugTransport` implements them over
//! the system Bluetooth stack and `simulated::SimTransport` implements them
//! in-process for tests.

use std::fmt;

use async_trait::async_trait;
use uuid::Uuid;

use crate::permissions::PermissionOutcome;

/// Opaque peripheral identifier, stable for the lifetime of an OS session.
///
/// This is the de-duplication key for scans and the handle used to connect.
/// It is *not* guaranteed to be the device's MAC address (some platforms
/// hand out randomized per-session identifiers).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeviceId(String);

impl DeviceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A peripheral seen during a scan.
///
/// Transient: created from each adapter snapshot and superseded by a fresh
/// record on the next scan; never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredDevice {
    pub id: DeviceId,
    /// Advertised local name, if the peripheral broadcasts one.
    pub name: Option<String>,
    /// Signal strength at discovery time, if reported.
    pub rssi: Option<i16>,
}

/// A GATT service and the UUIDs of its characteristics, as reported by
/// service discovery on a live connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GattService {
    pub uuid: Uuid,
    pub characteristics: Vec<Uuid>,
}

/// A resolved (service, characteristic) pair on a connected peripheral.
///
/// Only `Connector::connect` constructs one, and only after discovery has
/// confirmed both UUIDs exist on the device; a write is never issued against
/// an endpoint that was not resolved this way.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GattEndpoint {
    pub service: Uuid,
    pub characteristic: Uuid,
}

/// Transport-level failures.
///
/// Payloads are plain strings: no backend library error type crosses the
/// engine boundary.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("bluetooth adapter unavailable: {0}")]
    Adapter(String),
    #[error("scan failed: {0}")]
    Scan(String),
    #[error("connection failed: {0}")]
    Connect(String),
    #[error("service discovery failed: {0}")]
    Discovery(String),
    #[error("characteristic write failed: {0}")]
    Write(String),
    #[error("peer disconnected")]
    Disconnected,
}

/// The process-wide radio manager, as a capability.
///
/// One transport value wraps the platform adapter; sessions and scanners
/// share it behind an `Arc`. The owner must call `release` when the
/// surrounding context is torn down, whatever state the engine was in.
#[async_trait]
pub trait BleTransport: Send + Sync {
    /// Check (and on platforms that prompt, request) the permissions needed
    /// before any scan.
    async fn request_access(&self) -> Result<PermissionOutcome, TransportError>;

    /// Start radio scanning.
    async fn start_scan(&self) -> Result<(), TransportError>;

    /// Halt radio scanning. Idempotent.
    async fn stop_scan(&self) -> Result<(), TransportError>;

    /// Snapshot of peripherals seen since scanning started.
    async fn discovered(&self) -> Result<Vec<DiscoveredDevice>, TransportError>;

    /// Open a connection to a peripheral by identifier.
    ///
    /// Dropping the returned future abandons establishment, but the platform
    /// may still bring the link up afterwards. A caller that gives up on a
    /// connect must follow with [`abort_connect`](Self::abort_connect).
    async fn connect(&self, id: &DeviceId) -> Result<Box<dyn BleConnection>, TransportError>;

    /// Best-effort teardown after an abandoned [`connect`](Self::connect),
    /// so a link that establishment brought up anyway does not linger.
    /// The default no-op suits transports whose establishment dies with
    /// the dropped future.
    async fn abort_connect(&self, _id: &DeviceId) -> Result<(), TransportError> {
        Ok(())
    }

    /// Mandatory teardown: halt any scanning and drop adapter resources.
    async fn release(&self) -> Result<(), TransportError>;
}

/// A live connection to one peripheral.
#[async_trait]
pub trait BleConnection: Send + Sync {
    /// Run GATT service discovery and return everything found.
    async fn discover_services(&mut self) -> Result<Vec<GattService>, TransportError>;

    /// Write `data` to the characteristic with a response (acknowledged).
    async fn write(&mut self, endpoint: &GattEndpoint, data: &[u8]) -> Result<(), TransportError>;

    /// Tear the connection down. Idempotent.
    async fn disconnect(&mut self) -> Result<(), TransportError>;
}
