//! Provisioning session state machine
//!
//! One session takes a charging box from "somewhere nearby, advertising"
//! to "credentials delivered, link closed": permissions, scan, connect,
//! encrypted credential writes, disconnect. The session owns at most one
//! connection at a time and releases it before entering any terminal
//! state, so no outcome leaks a live link.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use gridaware_proto::{CredentialPayload, EncodeError, ProvisioningKey, gatt};
use tokio_util::sync::CancellationToken;

use crate::connector::{ConnectError, ConnectedDevice, Connector, ConnectorConfig};
use crate::permissions::{PermissionKind, PermissionOutcome, request_permissions};
use crate::scanner::{ScanMode, ScanOptions, Scanner};
use crate::transport::{BleTransport, DiscoveredDevice};

/// Where a session currently is. Terminal states are `Done`, `Failed`,
/// and `Cancelled`; nothing leaves a terminal state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    RequestingPermissions,
    Scanning,
    Connecting,
    /// Connected, endpoint located, accepting credential writes.
    Ready,
    Writing,
    Disconnecting,
    Done,
    Failed(ProvisionError),
    Cancelled,
}

impl SessionState {
    pub fn name(&self) -> &'static str {
        match self {
            SessionState::Idle => "Idle",
            SessionState::RequestingPermissions => "RequestingPermissions",
            SessionState::Scanning => "Scanning",
            SessionState::Connecting => "Connecting",
            SessionState::Ready => "Ready",
            SessionState::Writing => "Writing",
            SessionState::Disconnecting => "Disconnecting",
            SessionState::Done => "Done",
            SessionState::Failed(_) => "Failed",
            SessionState::Cancelled => "Cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionState::Done | SessionState::Failed(_) | SessionState::Cancelled
        )
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Failed(e) => write!(f, "Failed: {e}"),
            other => f.write_str(other.name()),
        }
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum WriteError {
    /// The device (or its stack) refused the write.
    #[error("rejected by device: {0}")]
    Rejected(String),
    #[error("no acknowledgement within {0:?}")]
    Timeout(Duration),
    /// Caught before anything is sent; the session stays usable.
    #[error("encoded payload is {len} bytes, over the {max}-byte write limit")]
    PayloadTooLarge { len: usize, max: usize },
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ProvisionError {
    #[error("permissions denied: {}", .missing.iter().map(|k| k.to_string()).collect::<Vec<_>>().join(", "))]
    PermissionDenied { missing: Vec<PermissionKind> },
    #[error("no matching device found within {waited:?}")]
    NoDeviceFound { waited: Duration },
    #[error(transparent)]
    Connect(#[from] ConnectError),
    #[error(transparent)]
    Write(#[from] WriteError),
    #[error(transparent)]
    Encode(#[from] EncodeError),
    /// Adapter or scan fault outside the connect/write paths.
    #[error("transport fault: {0}")]
    Transport(String),
    /// The operation is not allowed in the session's current state. The
    /// state is left untouched.
    #[error("{op} is not valid in state {state}")]
    InvalidState { op: &'static str, state: &'static str },
    #[error("session cancelled")]
    Cancelled,
}

/// Tunables for one provisioning session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Advertised-name prefix of provisionable boxes.
    pub device_prefix: String,
    pub scan_timeout: Duration,
    pub connect_timeout: Duration,
    pub discovery_timeout: Duration,
    pub write_timeout: Duration,
    /// Largest transport payload (base64 text) to attempt in one write.
    pub max_write_len: usize,
    pub key: ProvisioningKey,
}

impl SessionConfig {
    pub fn new(key: ProvisioningKey) -> Self {
        Self {
            device_prefix: gatt::DEVICE_NAME_PREFIX.to_string(),
            scan_timeout: Duration::from_secs(10),
            connect_timeout: Duration::from_secs(10),
            discovery_timeout: Duration::from_secs(10),
            write_timeout: Duration::from_secs(10),
            max_write_len: 512,
            key,
        }
    }
}

/// The provisioning state machine. See the module docs for the flow.
pub struct ProvisioningSession {
    transport: Arc<dyn BleTransport>,
    config: SessionConfig,
    state: SessionState,
    connected: Option<ConnectedDevice>,
    cancel: CancellationToken,
}

impl ProvisioningSession {
    pub fn new(transport: Arc<dyn BleTransport>, config: SessionConfig) -> Self {
        Self {
            transport,
            config,
            state: SessionState::Idle,
            connected: None,
            cancel: CancellationToken::new(),
        }
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// Token that aborts the session when cancelled. Clone it into a
    /// signal handler or UI callback; cancellation takes effect at the
    /// next await point.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Run the front half of the flow: permissions, scan, connect,
    /// endpoint discovery. On success the session is `Ready` and the
    /// matched device is returned.
    ///
    /// Valid only from `Idle`. Stop a running `start` through the cancel
    /// token, not by dropping this future: the token path tears down
    /// whatever was in flight at the time.
    pub async fn start(&mut self) -> Result<DiscoveredDevice, ProvisionError> {
        if self.state != SessionState::Idle {
            return Err(self.invalid("start"));
        }
        let cancel = self.cancel.clone();

        self.state = SessionState::RequestingPermissions;
        log::info!("requesting platform permissions");
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            r = request_permissions(self.transport.as_ref()) => Some(r),
        };
        match outcome {
            None => return Err(self.cancelled().await),
            Some(Err(e)) => return Err(self.fail(ProvisionError::Transport(e.to_string()))),
            Some(Ok(PermissionOutcome::Denied(missing))) => {
                return Err(self.fail(ProvisionError::PermissionDenied { missing }));
            }
            Some(Ok(PermissionOutcome::Granted)) => {}
        }

        self.state = SessionState::Scanning;
        log::info!(
            "scanning for {:?} devices (up to {:?})",
            self.config.device_prefix,
            self.config.scan_timeout
        );
        let scanner = Scanner::new(Arc::clone(&self.transport));
        let mut scan = match scanner
            .start(ScanOptions {
                prefix: self.config.device_prefix.clone(),
                timeout: self.config.scan_timeout,
                mode: ScanMode::FirstMatch,
            })
            .await
        {
            Ok(scan) => scan,
            Err(e) => return Err(self.fail(ProvisionError::Transport(e.to_string()))),
        };
        let found = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            r = scan.next() => Some(r),
        };
        let device = match found {
            None => {
                scan.stop().await;
                return Err(self.cancelled().await);
            }
            Some(Ok(Some(device))) => device,
            Some(Ok(None)) => {
                return Err(self.fail(ProvisionError::NoDeviceFound {
                    waited: self.config.scan_timeout,
                }));
            }
            Some(Err(e)) => return Err(self.fail(ProvisionError::Transport(e.to_string()))),
        };

        self.state = SessionState::Connecting;
        log::info!("connecting to {} ({:?})", device.id, device.name);
        let connector = Connector::new(
            Arc::clone(&self.transport),
            ConnectorConfig {
                connect_timeout: self.config.connect_timeout,
                discovery_timeout: self.config.discovery_timeout,
            },
        );
        // A connection is only handed over once fully established; a
        // cancel here drops the connect future mid-flight, so any link
        // the platform still brings up must be aborted below.
        let connected = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            r = connector.connect(&device.id) => Some(r),
        };
        match connected {
            None => {
                if let Err(e) = self.transport.abort_connect(&device.id).await {
                    log::debug!("abort of cancelled connect to {}: {e}", device.id);
                }
                Err(self.cancelled().await)
            }
            Some(Err(e)) => Err(self.fail(ProvisionError::Connect(e))),
            Some(Ok(dev)) => {
                self.connected = Some(dev);
                self.state = SessionState::Ready;
                log::info!("device ready for provisioning");
                Ok(device)
            }
        }
    }

    /// Encrypt `payload` and write it to the credential endpoint.
    ///
    /// Valid only from `Ready`. Encoding and size failures are caught
    /// before anything is sent and leave the session `Ready`; once the
    /// write is in flight, any failure tears the connection down and the
    /// session ends `Failed`.
    pub async fn submit_credentials(
        &mut self,
        payload: &CredentialPayload,
    ) -> Result<(), ProvisionError> {
        if self.state != SessionState::Ready {
            return Err(self.invalid("submit_credentials"));
        }
        let frame = gridaware_proto::encode(payload, &self.config.key)?;
        let transport_payload = frame.to_transport();
        let bytes = transport_payload.as_bytes();
        if bytes.len() > self.config.max_write_len {
            return Err(ProvisionError::Write(WriteError::PayloadTooLarge {
                len: bytes.len(),
                max: self.config.max_write_len,
            }));
        }
        let Some(mut device) = self.connected.take() else {
            return Err(self.invalid("submit_credentials"));
        };

        self.state = SessionState::Writing;
        log::info!(
            "writing {} byte {} payload to {}",
            bytes.len(),
            payload.kind(),
            device.id()
        );
        let cancel = self.cancel.clone();
        let write_timeout = self.config.write_timeout;
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            r = tokio::time::timeout(write_timeout, device.write(bytes)) => Some(r),
        };
        match outcome {
            None => {
                release(device).await;
                Err(self.cancelled().await)
            }
            Some(Err(_elapsed)) => {
                release(device).await;
                Err(self.fail(ProvisionError::Write(WriteError::Timeout(write_timeout))))
            }
            Some(Ok(Err(e))) => {
                release(device).await;
                Err(self.fail(ProvisionError::Write(WriteError::Rejected(e.to_string()))))
            }
            Some(Ok(Ok(()))) => {
                self.connected = Some(device);
                self.state = SessionState::Ready;
                log::info!("credential payload acknowledged");
                Ok(())
            }
        }
    }

    /// Close the link and finish the session.
    ///
    /// Valid only from `Ready`. A teardown fault is logged, not
    /// surfaced: the handle is consumed either way and the session ends
    /// `Done`.
    pub async fn disconnect(&mut self) -> Result<(), ProvisionError> {
        if self.state != SessionState::Ready {
            return Err(self.invalid("disconnect"));
        }
        let Some(device) = self.connected.take() else {
            return Err(self.invalid("disconnect"));
        };
        self.state = SessionState::Disconnecting;
        log::info!("disconnecting from {}", device.id());
        if let Err(e) = device.disconnect().await {
            log::warn!("disconnect reported {e}; treating link as closed");
        }
        self.state = SessionState::Done;
        Ok(())
    }

    fn invalid(&self, op: &'static str) -> ProvisionError {
        ProvisionError::InvalidState {
            op,
            state: self.state.name(),
        }
    }

    fn fail(&mut self, err: ProvisionError) -> ProvisionError {
        log::warn!("session failed: {err}");
        self.state = SessionState::Failed(err.clone());
        err
    }

    async fn cancelled(&mut self) -> ProvisionError {
        self.release_connection().await;
        self.state = SessionState::Cancelled;
        log::info!("session cancelled");
        ProvisionError::Cancelled
    }

    async fn release_connection(&mut self) {
        if let Some(device) = self.connected.take() {
            release(device).await;
        }
    }
}

async fn release(device: ConnectedDevice) {
    if let Err(e) = device.disconnect().await {
        log::warn!("disconnect during teardown failed: {e}");
    }
}

impl Drop for ProvisioningSession {
    fn drop(&mut self) {
        // Sessions dropped while connected still close the link.
        if let Some(device) = self.connected.take() {
            if let Ok(handle) = tokio::runtime::Handle::try_current() {
                handle.spawn(async move {
                    let _ = device.disconnect().await;
                });
            }
        }
    }
}
