//! Connection establishment and endpoint discovery
//!
//! Takes a discovered device to a live connection with the credential
//! endpoint located, or to a clean disconnect when any step fails. A
//! [`ConnectedDevice`] is the proof that the endpoint exists: it can only be
//! obtained through a full, successful [`Connector::connect`].

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use gridaware_proto::gatt;
use uuid::Uuid;

use crate::transport::{
    BleConnection, BleTransport, DeviceId, GattEndpoint, TransportError,
};

/// Timeouts for the two blocking steps of connection establishment.
#[derive(Debug, Clone, Copy)]
pub struct ConnectorConfig {
    pub connect_timeout: Duration,
    pub discovery_timeout: Duration,
}

impl Default for ConnectorConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            discovery_timeout: Duration::from_secs(10),
        }
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectError {
    /// The link could not be established (or timed out).
    #[error("device unreachable: {0}")]
    Unreachable(String),
    /// The link came up but service discovery failed.
    #[error("service discovery failed: {0}")]
    DiscoveryFailed(String),
    /// The peripheral does not expose the provisioning service.
    #[error("provisioning service {0} not found on device")]
    ServiceMissing(Uuid),
    /// The provisioning service is present but the credential
    /// characteristic is not.
    #[error("credential characteristic {0} not found on device")]
    CharacteristicMissing(Uuid),
}

/// Establishes connections over a shared transport.
pub struct Connector {
    transport: Arc<dyn BleTransport>,
    config: ConnectorConfig,
}

impl Connector {
    pub fn new(transport: Arc<dyn BleTransport>, config: ConnectorConfig) -> Self {
        Self { transport, config }
    }

    /// Connect to `id`, discover its services, and locate the credential
    /// endpoint.
    ///
    /// Every failure past the link step disconnects before returning, and a
    /// timed-out link attempt is aborted through the transport, so an `Err`
    /// never leaves a live connection behind.
    pub async fn connect(&self, id: &DeviceId) -> Result<ConnectedDevice, ConnectError> {
        let mut connection = match tokio::time::timeout(
            self.config.connect_timeout,
            self.transport.connect(id),
        )
        .await
        {
            Ok(Ok(connection)) => connection,
            Ok(Err(e)) => return Err(ConnectError::Unreachable(e.to_string())),
            Err(_) => {
                // The dropped attempt may still complete platform-side;
                // tear down whatever it brings up.
                if let Err(e) = self.transport.abort_connect(id).await {
                    log::debug!("abort of timed-out connect to {id}: {e}");
                }
                return Err(ConnectError::Unreachable(format!(
                    "timed out after {:?}",
                    self.config.connect_timeout
                )));
            }
        };
        log::debug!("connected to {id}, discovering services");

        let services = match tokio::time::timeout(
            self.config.discovery_timeout,
            connection.discover_services(),
        )
        .await
        {
            Ok(Ok(services)) => services,
            Ok(Err(e)) => {
                teardown(connection).await;
                return Err(ConnectError::DiscoveryFailed(e.to_string()));
            }
            Err(_) => {
                teardown(connection).await;
                return Err(ConnectError::DiscoveryFailed(format!(
                    "timed out after {:?}",
                    self.config.discovery_timeout
                )));
            }
        };

        let Some(service) = services.iter().find(|s| s.uuid == gatt::SERVICE_UUID) else {
            teardown(connection).await;
            return Err(ConnectError::ServiceMissing(gatt::SERVICE_UUID));
        };
        if !service
            .characteristics
            .iter()
            .any(|c| *c == gatt::CREDENTIALS_UUID)
        {
            teardown(connection).await;
            return Err(ConnectError::CharacteristicMissing(gatt::CREDENTIALS_UUID));
        }

        log::debug!("credential endpoint located on {id}");
        Ok(ConnectedDevice {
            id: id.clone(),
            endpoint: GattEndpoint {
                service: gatt::SERVICE_UUID,
                characteristic: gatt::CREDENTIALS_UUID,
            },
            connection,
        })
    }
}

async fn teardown(mut connection: Box<dyn BleConnection>) {
    if let Err(e) = connection.disconnect().await {
        log::debug!("disconnect during connect teardown failed: {e}");
    }
}

/// A live connection whose credential endpoint has been verified.
pub struct ConnectedDevice {
    id: DeviceId,
    endpoint: GattEndpoint,
    connection: Box<dyn BleConnection>,
}

impl fmt::Debug for ConnectedDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectedDevice")
            .field("id", &self.id)
            .field("endpoint", &self.endpoint)
            .finish_non_exhaustive()
    }
}

impl ConnectedDevice {
    pub fn id(&self) -> &DeviceId {
        &self.id
    }

    pub fn endpoint(&self) -> GattEndpoint {
        self.endpoint
    }

    /// Write `payload` to the credential endpoint with acknowledgement.
    pub async fn write(&mut self, payload: &[u8]) -> Result<(), TransportError> {
        self.connection.write(&self.endpoint, payload).await
    }

    /// Tear the link down, consuming the handle.
    pub async fn disconnect(mut self) -> Result<(), TransportError> {
        self.connection.disconnect().await
    }
}
