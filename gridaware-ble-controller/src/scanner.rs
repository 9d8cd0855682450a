//! Time-boxed peripheral discovery
//!
//! Drives radio scanning through the transport, filters advertisements by
//! name prefix, de-duplicates by device identifier, and yields matches as a
//! lazy pull sequence that the caller can stop at any point.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use crate::transport::{BleTransport, DeviceId, DiscoveredDevice, TransportError};

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Whether a scan stops at the first qualifying peripheral or collects every
/// one it sees until the deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanMode {
    /// Stop (and halt the radio) as soon as one qualifying peripheral is
    /// yielded. The provisioning default: find the one box the user is
    /// holding with minimal radio time.
    FirstMatch,
    /// Keep scanning until the deadline, yielding every qualifying
    /// peripheral.
    Collect,
}

#[derive(Debug, Clone)]
pub struct ScanOptions {
    /// Advertised-name prefix a peripheral must carry to qualify.
    /// Unnamed peripherals never qualify.
    pub prefix: String,
    /// Hard deadline for the whole scan.
    pub timeout: Duration,
    pub mode: ScanMode,
}

/// Factory for scan sessions over a shared transport.
pub struct Scanner {
    transport: Arc<dyn BleTransport>,
    poll_interval: Duration,
}

impl Scanner {
    pub fn new(transport: Arc<dyn BleTransport>) -> Self {
        Self {
            transport,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Override how often the adapter snapshot is polled.
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Start radio scanning and return the session handle.
    pub async fn start(&self, opts: ScanOptions) -> Result<ScanSession, TransportError> {
        self.transport.start_scan().await?;
        log::debug!(
            "scan started: prefix={:?} timeout={:?} mode={:?}",
            opts.prefix,
            opts.timeout,
            opts.mode
        );
        Ok(ScanSession {
            transport: Arc::clone(&self.transport),
            deadline: Instant::now() + opts.timeout,
            seen: HashSet::new(),
            active: true,
            opts,
            poll_interval: self.poll_interval,
        })
    }
}

/// One scan pass: holds the deadline, the set of identifiers already
/// yielded, and the active flag. Finished (and the radio halted) on a
/// FirstMatch yield, on the deadline, on `stop`, or on drop.
pub struct ScanSession {
    transport: Arc<dyn BleTransport>,
    opts: ScanOptions,
    deadline: Instant,
    seen: HashSet<DeviceId>,
    active: bool,
    poll_interval: Duration,
}

impl ScanSession {
    /// Pull the next qualifying peripheral.
    ///
    /// Returns `Ok(None)` once the deadline has passed or the session has
    /// been stopped; never hangs past the deadline. Each identifier is
    /// yielded at most once per session.
    pub async fn next(&mut self) -> Result<Option<DiscoveredDevice>, TransportError> {
        if !self.active {
            return Ok(None);
        }
        loop {
            let snapshot = match self.transport.discovered().await {
                Ok(devices) => devices,
                Err(e) => {
                    self.finish().await;
                    return Err(e);
                }
            };
            for device in snapshot {
                if self.seen.contains(&device.id) {
                    continue;
                }
                let Some(name) = device.name.as_deref() else {
                    continue;
                };
                if !name.starts_with(&self.opts.prefix) {
                    continue;
                }
                self.seen.insert(device.id.clone());
                log::debug!("scan matched {name:?} ({})", device.id);
                if self.opts.mode == ScanMode::FirstMatch {
                    self.finish().await;
                }
                return Ok(Some(device));
            }
            let now = Instant::now();
            if now >= self.deadline {
                self.finish().await;
                return Ok(None);
            }
            tokio::time::sleep_until(self.deadline.min(now + self.poll_interval)).await;
        }
    }

    /// Stop the scan and halt the radio. Idempotent.
    pub async fn stop(&mut self) {
        self.finish().await;
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    async fn finish(&mut self) {
        if !self.active {
            return;
        }
        self.active = false;
        if let Err(e) = self.transport.stop_scan().await {
            log::debug!("stop_scan during scan teardown failed: {e}");
        }
    }
}

impl Drop for ScanSession {
    fn drop(&mut self) {
        // Best-effort radio halt for sessions dropped mid-scan; the explicit
        // paths (yield, deadline, stop) have already cleared `active`.
        if self.active {
            self.active = false;
            let transport = Arc::clone(&self.transport);
            if let Ok(handle) = tokio::runtime::Handle::try_current() {
                handle.spawn(async move {
                    let _ = transport.stop_scan().await;
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulated::{SimOp, SimPeripheral, SimTransport};

    fn scanner(sim: &SimTransport) -> Scanner {
        Scanner::new(Arc::new(sim.clone())).with_poll_interval(Duration::from_millis(50))
    }

    fn opts(mode: ScanMode) -> ScanOptions {
        ScanOptions {
            prefix: "ESP32".to_string(),
            timeout: Duration::from_secs(10),
            mode,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn yields_matching_device() {
        let sim = SimTransport::new();
        sim.add_device(SimPeripheral::provisionable("id-1", "ESP32-7A3C"));
        sim.add_device(SimPeripheral::named("id-2", "OtherDevice"));

        let mut scan = scanner(&sim).start(opts(ScanMode::FirstMatch)).await.unwrap();
        let device = scan.next().await.unwrap().unwrap();
        assert_eq!(device.name.as_deref(), Some("ESP32-7A3C"));
    }

    #[tokio::test(start_paused = true)]
    async fn never_yields_non_matching_names() {
        let sim = SimTransport::new();
        sim.add_device(SimPeripheral::named("id-1", "OtherDevice"));
        sim.add_device(SimPeripheral::named("id-2", "esp32-lowercase"));

        let mut scan = scanner(&sim).start(opts(ScanMode::Collect)).await.unwrap();
        assert_eq!(scan.next().await.unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn drops_unnamed_devices() {
        let sim = SimTransport::new();
        sim.add_device(SimPeripheral::unnamed("id-1"));

        let mut scan = scanner(&sim).start(opts(ScanMode::FirstMatch)).await.unwrap();
        assert_eq!(scan.next().await.unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn empty_scan_ends_at_deadline() {
        let sim = SimTransport::new();
        let started = Instant::now();
        let mut scan = scanner(&sim).start(opts(ScanMode::FirstMatch)).await.unwrap();
        assert_eq!(scan.next().await.unwrap(), None);
        let waited = Instant::now() - started;
        assert!(waited >= Duration::from_secs(10));
        assert!(waited < Duration::from_secs(11));
        assert!(!scan.is_active());
    }

    #[tokio::test(start_paused = true)]
    async fn each_identifier_yielded_at_most_once() {
        let sim = SimTransport::new();
        sim.add_device(SimPeripheral::provisionable("id-1", "ESP32-7A3C"));

        let mut scan = scanner(&sim).start(opts(ScanMode::Collect)).await.unwrap();
        assert!(scan.next().await.unwrap().is_some());
        // The same device stays in every snapshot but is suppressed now.
        assert_eq!(scan.next().await.unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn collect_yields_every_match() {
        let sim = SimTransport::new();
        sim.add_device(SimPeripheral::provisionable("id-1", "ESP32-7A3C"));
        sim.add_device(SimPeripheral::provisionable("id-2", "ESP32-0F11"));

        let mut scan = scanner(&sim).start(opts(ScanMode::Collect)).await.unwrap();
        let first = scan.next().await.unwrap().unwrap();
        let second = scan.next().await.unwrap().unwrap();
        assert_ne!(first.id, second.id);
        assert_eq!(scan.next().await.unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn first_match_halts_radio() {
        let sim = SimTransport::new();
        sim.add_device(SimPeripheral::provisionable("id-1", "ESP32-7A3C"));

        let mut scan = scanner(&sim).start(opts(ScanMode::FirstMatch)).await.unwrap();
        assert!(scan.next().await.unwrap().is_some());
        assert!(!sim.is_scanning());
        assert!(!scan.is_active());
    }

    #[tokio::test(start_paused = true)]
    async fn device_appearing_mid_scan_is_yielded() {
        let sim = SimTransport::new();
        sim.add_device(
            SimPeripheral::provisionable("id-1", "ESP32-7A3C")
                .appears_after(Duration::from_secs(3)),
        );

        let started = Instant::now();
        let mut scan = scanner(&sim).start(opts(ScanMode::FirstMatch)).await.unwrap();
        assert!(scan.next().await.unwrap().is_some());
        assert!(Instant::now() - started >= Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn stop_is_idempotent_and_halts_radio() {
        let sim = SimTransport::new();
        let mut scan = scanner(&sim).start(opts(ScanMode::Collect)).await.unwrap();
        scan.stop().await;
        scan.stop().await;
        assert!(!sim.is_scanning());
        let stops = sim
            .journal()
            .into_iter()
            .filter(|op| *op == SimOp::StopScan)
            .count();
        assert_eq!(stops, 1);
        // A stopped session yields nothing more.
        assert_eq!(scan.next().await.unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn transport_fault_ends_the_scan_and_halts_the_radio() {
        let sim = SimTransport::new();
        let mut scan = scanner(&sim).start(opts(ScanMode::Collect)).await.unwrap();
        sim.fail_discovery("adapter vanished");

        let err = scan.next().await.unwrap_err();
        assert_eq!(err, TransportError::Scan("adapter vanished".to_string()));
        assert!(!sim.is_scanning());
        assert!(!scan.is_active());
        assert_eq!(scan.next().await.unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_an_active_session_stops_the_radio() {
        let sim = SimTransport::new();
        let scan = scanner(&sim).start(opts(ScanMode::Collect)).await.unwrap();
        assert!(sim.is_scanning());
        drop(scan);
        tokio::task::yield_now().await;
        tokio::task::yield_now().await;
        assert!(!sim.is_scanning());
    }
}
