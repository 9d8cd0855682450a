//! GridAware BLE Controller
//!
//! Discovery-and-provisioning engine for GridAware charging boxes: find a
//! box over BLE, connect, and deliver encrypted Wi-Fi credentials and an
//! identity token to its credential endpoint.
//!
//! The engine talks to the radio only through the [`BleTransport`] trait.
//! [`BtleplugTransport`] backs it with the system Bluetooth stack;
//! [`simulated::SimTransport`] backs it in-process for tests.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use gridaware_ble_controller::{BtleplugTransport, ProvisioningSession, SessionConfig};
//! use gridaware_proto::{CredentialPayload, ProvisioningKey};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let transport = Arc::new(BtleplugTransport::new().await?);
//!     let key = ProvisioningKey::from_hex("...", "...")?;
//!
//!     let mut session = ProvisioningSession::new(transport, SessionConfig::new(key));
//!     let device = session.start().await?;
//!     println!("provisioning {device:?}");
//!
//!     session
//!         .submit_credentials(&CredentialPayload::wifi("MySSID", "MyPassword"))
//!         .await?;
//!     session.disconnect().await?;
//!     Ok(())
//! }
//! ```

pub mod ble;
pub mod connector;
pub mod permissions;
pub mod scanner;
pub mod session;
pub mod simulated;
pub mod transport;

pub use ble::BtleplugTransport;
pub use connector::{ConnectError, ConnectedDevice, Connector, ConnectorConfig};
pub use permissions::{PermissionKind, PermissionOutcome, request_permissions};
pub use scanner::{ScanMode, ScanOptions, ScanSession, Scanner};
pub use session::{
    ProvisionError, ProvisioningSession, SessionConfig, SessionState, WriteError,
};
pub use transport::{
    BleConnection, BleTransport, DeviceId, DiscoveredDevice, GattEndpoint, GattService,
    TransportError,
};
