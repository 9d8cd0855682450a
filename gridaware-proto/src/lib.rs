//! GridAware provisioning protocol - GATT contract and payload codec
//!
//! Everything the mobile/desktop tooling and the charging-control firmware
//! must agree on byte-for-byte: the provisioning service UUIDs, the
//! credential payload schema, and the encrypt/encode pipeline that wraps a
//! payload for a single characteristic write.

pub mod gatt;

mod codec;
mod payload;

pub use codec::{
    DecodeError, EncodeError, EncryptedFrame, KeyError, ProvisioningKey, decode, encode,
};
pub use payload::CredentialPayload;
