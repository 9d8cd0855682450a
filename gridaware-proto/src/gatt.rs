//! BLE GATT Contract for GridAware Device Provisioning
//!
//! This module defines the service/characteristic UUIDs and advertising
//! constants the charging-control firmware exposes. These values are
//! bit-exact with the firmware and must not change without a coordinated
//! firmware release.

use uuid::Uuid;

/// Provisioning Service UUID: 5c8a1000-94f2-4e0a-8c1b-2a7d6f43e901
pub const SERVICE_UUID: Uuid = Uuid::from_u128(0x5c8a1000_94f2_4e0a_8c1b_2a7d6f43e901);

/// Credentials Characteristic UUID (write)
///
/// A single writable characteristic carries both Wi-Fi credentials and the
/// identity-token handoff; the payload schema, not the characteristic,
/// tells the firmware which one it received.
pub const CREDENTIALS_UUID: Uuid = Uuid::from_u128(0x5c8a1001_94f2_4e0a_8c1b_2a7d6f43e901);

/// Advertised-name prefix for eligible devices ("ESP32-7A3C" etc.)
pub const DEVICE_NAME_PREFIX: &str = "ESP32";

/// Version of the credential frame encoding (JSON / AES-128-CBC / base64)
pub const ENCODING_VERSION: u8 = 1;

/// AES block size; ciphertext length is always a multiple of this
pub const BLOCK_LEN: usize = 16;
