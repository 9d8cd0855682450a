//! Radio permission gate

use std::fmt;

use crate::transport::{BleTransport, TransportError};

/// A platform permission the engine needs before scanning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionKind {
    /// Bluetooth radio access (adapter present and powered).
    Radio,
    /// Location access; some mobile platforms gate BLE scans behind it.
    Location,
}

impl fmt::Display for PermissionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Radio => f.write_str("bluetooth radio"),
            Self::Location => f.write_str("location"),
        }
    }
}

/// Outcome of the permission check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PermissionOutcome {
    Granted,
    Denied(Vec<PermissionKind>),
}

impl PermissionOutcome {
    pub fn is_granted(&self) -> bool {
        matches!(self, Self::Granted)
    }
}

/// Single-shot permission check.
///
/// May trigger OS permission prompts as a side effect. A denial is reported
/// once and left to the caller (typically: tell the user which setting to
/// change); the gate never retries on its own.
pub async fn request_permissions(
    transport: &dyn BleTransport,
) -> Result<PermissionOutcome, TransportError> {
    transport.request_access().await
}
