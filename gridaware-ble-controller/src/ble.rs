//! btleplug-backed transport
//!
//! The production [`BleTransport`]: drives the platform Bluetooth stack
//! (BlueZ, CoreBluetooth, WinRT) through btleplug. Everything here is a
//! thin mapping; policy lives in the scanner, connector, and session.

use async_trait::async_trait;
use btleplug::api::{Central, Manager as _, Peripheral as _, ScanFilter, WriteType};
use btleplug::platform::{Adapter, Manager, Peripheral};

use crate::permissions::{PermissionKind, PermissionOutcome};
use crate::transport::{
    BleConnection, BleTransport, DeviceId, DiscoveredDevice, GattEndpoint, GattService,
    TransportError,
};

/// Transport over the first Bluetooth adapter on the system.
pub struct BtleplugTransport {
    adapter: Adapter,
}

impl BtleplugTransport {
    /// Open the default Bluetooth adapter.
    pub async fn new() -> Result<Self, TransportError> {
        let manager = Manager::new()
            .await
            .map_err(|e| TransportError::Adapter(e.to_string()))?;
        let adapters = manager
            .adapters()
            .await
            .map_err(|e| TransportError::Adapter(e.to_string()))?;
        let adapter = adapters
            .into_iter()
            .next()
            .ok_or_else(|| TransportError::Adapter("no Bluetooth adapter found".to_string()))?;
        Ok(Self { adapter })
    }

    /// Look a peripheral up in the adapter's current cache.
    async fn find_peripheral(&self, id: &DeviceId) -> Result<Peripheral, TransportError> {
        let peripherals = self
            .adapter
            .peripherals()
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;
        peripherals
            .into_iter()
            .find(|p| p.id().to_string() == id.as_str())
            .ok_or_else(|| TransportError::Connect(format!("device {id} is no longer visible")))
    }
}

#[async_trait]
impl BleTransport for BtleplugTransport {
    async fn request_access(&self) -> Result<PermissionOutcome, TransportError> {
        // btleplug has no explicit permission API; a powered, accessible
        // adapter answers an info request, a denied or disabled radio does
        // not. Location-gated platforms surface the same way.
        match self.adapter.adapter_info().await {
            Ok(info) => {
                log::debug!("adapter ready: {info}");
                Ok(PermissionOutcome::Granted)
            }
            Err(e) => {
                log::debug!("adapter info request failed: {e}");
                Ok(PermissionOutcome::Denied(vec![PermissionKind::Radio]))
            }
        }
    }

    async fn start_scan(&self) -> Result<(), TransportError> {
        self.adapter
            .start_scan(ScanFilter::default())
            .await
            .map_err(|e| TransportError::Scan(e.to_string()))
    }

    async fn stop_scan(&self) -> Result<(), TransportError> {
        self.adapter
            .stop_scan()
            .await
            .map_err(|e| TransportError::Scan(e.to_string()))
    }

    async fn discovered(&self) -> Result<Vec<DiscoveredDevice>, TransportError> {
        let peripherals = self
            .adapter
            .peripherals()
            .await
            .map_err(|e| TransportError::Scan(e.to_string()))?;
        let mut devices = Vec::new();
        for peripheral in peripherals {
            // A peripheral can vanish between the snapshot and the
            // properties call; skip it rather than failing the poll.
            let props = match peripheral.properties().await {
                Ok(Some(props)) => props,
                Ok(None) => continue,
                Err(e) => {
                    log::trace!("properties for {} unavailable: {e}", peripheral.id());
                    continue;
                }
            };
            devices.push(DiscoveredDevice {
                id: DeviceId::new(peripheral.id().to_string()),
                name: props.local_name,
                rssi: props.rssi,
            });
        }
        Ok(devices)
    }

    async fn connect(&self, id: &DeviceId) -> Result<Box<dyn BleConnection>, TransportError> {
        let peripheral = self.find_peripheral(id).await?;
        peripheral
            .connect()
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;
        Ok(Box::new(BtleplugConnection { peripheral }))
    }

    async fn abort_connect(&self, id: &DeviceId) -> Result<(), TransportError> {
        // `Peripheral::connect` hands establishment to the platform daemon,
        // which can finish it after the Rust future is gone. Disconnect the
        // peripheral so a link that came up anyway is torn back down; a
        // peripheral that vanished has nothing to abort.
        match self.find_peripheral(id).await {
            Ok(peripheral) => {
                if let Err(e) = peripheral.disconnect().await {
                    log::debug!("abort of in-flight connect to {id}: {e}");
                }
            }
            Err(e) => log::debug!("abort of in-flight connect to {id}: {e}"),
        }
        Ok(())
    }

    async fn release(&self) -> Result<(), TransportError> {
        // Scanning is the only adapter state held here; live connections
        // carry their own teardown and abandoned ones go through
        // `abort_connect`.
        if let Err(e) = self.adapter.stop_scan().await {
            log::debug!("stop_scan during release failed: {e}");
        }
        Ok(())
    }
}

struct BtleplugConnection {
    peripheral: Peripheral,
}

#[async_trait]
impl BleConnection for BtleplugConnection {
    async fn discover_services(&mut self) -> Result<Vec<GattService>, TransportError> {
        self.peripheral
            .discover_services()
            .await
            .map_err(|e| TransportError::Discovery(e.to_string()))?;
        Ok(self
            .peripheral
            .services()
            .into_iter()
            .map(|s| GattService {
                uuid: s.uuid,
                characteristics: s.characteristics.iter().map(|c| c.uuid).collect(),
            })
            .collect())
    }

    async fn write(
        &mut self,
        endpoint: &GattEndpoint,
        data: &[u8],
    ) -> Result<(), TransportError> {
        let characteristics = self.peripheral.characteristics();
        let Some(characteristic) = characteristics
            .iter()
            .find(|c| c.uuid == endpoint.characteristic)
        else {
            return Err(TransportError::Write(format!(
                "characteristic {} not present on peer",
                endpoint.characteristic
            )));
        };
        match self
            .peripheral
            .write(characteristic, data, WriteType::WithResponse)
            .await
        {
            Ok(()) => Ok(()),
            Err(e) => {
                if matches!(self.peripheral.is_connected().await, Ok(false)) {
                    Err(TransportError::Disconnected)
                } else {
                    Err(TransportError::Write(e.to_string()))
                }
            }
        }
    }

    async fn disconnect(&mut self) -> Result<(), TransportError> {
        if let Ok(false) = self.peripheral.is_connected().await {
            return Ok(());
        }
        self.peripheral
            .disconnect()
            .await
            .map_err(|e| TransportError::Connect(format!("disconnect failed: {e}")))
    }
}
