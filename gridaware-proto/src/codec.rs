//! Credential payload codec: compact JSON -> AES-128-CBC/PKCS7 -> base64
//!
//! Pure data transformation; no radio or network I/O. The encrypted frame is
//! what gets written to the credentials characteristic, and `decode` is the
//! exact inverse (used by tests and any future receive path).

use std::fmt;

use aes::cipher::block_padding::Pkcs7;
use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};

use crate::gatt::{BLOCK_LEN, ENCODING_VERSION};
use crate::payload::CredentialPayload;

type Aes128CbcEnc = cbc::Encryptor<aes::Aes128>;
type Aes128CbcDec = cbc::Decryptor<aes::Aes128>;

/// Symmetric key material shared with the firmware out of band.
///
/// Key and IV are 16 bytes each. The firmware ships with a fixed development
/// key; deployments supply their own through configuration, never through
/// code. `Debug` output is redacted.
#[derive(Clone, PartialEq, Eq)]
pub struct ProvisioningKey {
    key: [u8; 16],
    iv: [u8; 16],
}

impl ProvisioningKey {
    pub fn new(key: [u8; 16], iv: [u8; 16]) -> Self {
        Self { key, iv }
    }

    /// Parse key and IV from hex strings (32 hex characters each, any case).
    pub fn from_hex(key_hex: &str, iv_hex: &str) -> Result<Self, KeyError> {
        Ok(Self {
            key: decode_hex_block(key_hex)?,
            iv: decode_hex_block(iv_hex)?,
        })
    }
}

impl fmt::Debug for ProvisioningKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ProvisioningKey(redacted)")
    }
}

fn decode_hex_block(hex: &str) -> Result<[u8; 16], KeyError> {
    let bytes = data_encoding::HEXLOWER_PERMISSIVE
        .decode(hex.as_bytes())
        .map_err(|e| KeyError::Hex(e.to_string()))?;
    bytes
        .try_into()
        .map_err(|_| KeyError::Length(hex.len() / 2))
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum KeyError {
    #[error("invalid hex in key material: {0}")]
    Hex(String),
    #[error("key material must be 16 bytes, got {0}")]
    Length(usize),
}

/// The wire unit written to the credentials characteristic.
///
/// Invariant: `ciphertext` length is a non-zero multiple of the AES block
/// size; `encode` guarantees this and `from_transport` rejects anything else.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedFrame {
    pub ciphertext: Vec<u8>,
    pub encoding_version: u8,
}

impl EncryptedFrame {
    /// Base64 text handed to the GATT write.
    ///
    /// The write primitive is not guaranteed binary-transparent on every
    /// platform, so ciphertext always travels base64-encoded.
    pub fn to_transport(&self) -> String {
        data_encoding::BASE64.encode(&self.ciphertext)
    }

    /// Parse the transport encoding back into a frame.
    pub fn from_transport(text: &str) -> Result<Self, DecodeError> {
        let ciphertext = data_encoding::BASE64
            .decode(text.as_bytes())
            .map_err(|e| DecodeError::Base64(e.to_string()))?;
        if ciphertext.is_empty() || ciphertext.len() % BLOCK_LEN != 0 {
            return Err(DecodeError::Misaligned(ciphertext.len()));
        }
        Ok(Self {
            ciphertext,
            encoding_version: ENCODING_VERSION,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EncodeError {
    #[error("failed to serialize credential payload: {0}")]
    Serialize(String),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("unsupported encoding version {0}")]
    UnsupportedVersion(u8),
    #[error("invalid base64 in transport payload: {0}")]
    Base64(String),
    #[error("ciphertext length {0} is not a non-zero multiple of the AES block size")]
    Misaligned(usize),
    #[error("decryption failed (bad key or corrupt ciphertext)")]
    Decrypt,
    #[error("decrypted payload is not a valid credential record: {0}")]
    Payload(String),
}

/// Serialize and encrypt a credential payload.
pub fn encode(
    payload: &CredentialPayload,
    key: &ProvisioningKey,
) -> Result<EncryptedFrame, EncodeError> {
    let plain = serde_json::to_vec(payload).map_err(|e| EncodeError::Serialize(e.to_string()))?;
    let ciphertext = Aes128CbcEnc::new(&key.key.into(), &key.iv.into())
        .encrypt_padded_vec_mut::<Pkcs7>(&plain);
    Ok(EncryptedFrame {
        ciphertext,
        encoding_version: ENCODING_VERSION,
    })
}

/// Decrypt and deserialize an encrypted frame.
pub fn decode(
    frame: &EncryptedFrame,
    key: &ProvisioningKey,
) -> Result<CredentialPayload, DecodeError> {
    if frame.encoding_version != ENCODING_VERSION {
        return Err(DecodeError::UnsupportedVersion(frame.encoding_version));
    }
    if frame.ciphertext.is_empty() || frame.ciphertext.len() % BLOCK_LEN != 0 {
        return Err(DecodeError::Misaligned(frame.ciphertext.len()));
    }
    let plain = Aes128CbcDec::new(&key.key.into(), &key.iv.into())
        .decrypt_padded_vec_mut::<Pkcs7>(&frame.ciphertext)
        .map_err(|_| DecodeError::Decrypt)?;
    serde_json::from_slice(&plain).map_err(|e| DecodeError::Payload(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_key() -> ProvisioningKey {
        ProvisioningKey::new(*b"GridAwareProvKey", *b"GridAwareProvIV0")
    }

    #[test]
    fn round_trip_wifi() {
        let key = test_key();
        let payload = CredentialPayload::wifi("Home", "secret123");
        let frame = encode(&payload, &key).unwrap();
        assert_eq!(decode(&frame, &key).unwrap(), payload);
    }

    #[test]
    fn round_trip_identity() {
        let key = test_key();
        let payload = CredentialPayload::identity("bearer-token-xyz");
        let frame = encode(&payload, &key).unwrap();
        assert_eq!(decode(&frame, &key).unwrap(), payload);
    }

    #[test]
    fn ciphertext_is_block_aligned_and_padded() {
        let key = test_key();
        let payload = CredentialPayload::wifi("Home", "secret123");
        let frame = encode(&payload, &key).unwrap();
        let plain = serde_json::to_vec(&payload).unwrap();
        // PKCS7 always adds between 1 and 16 bytes, up to the block boundary.
        assert_eq!(frame.ciphertext.len() % BLOCK_LEN, 0);
        assert!(frame.ciphertext.len() > plain.len());
        assert!(frame.ciphertext.len() <= plain.len() + BLOCK_LEN);
    }

    #[test]
    fn transport_round_trip() {
        let key = test_key();
        let frame = encode(&CredentialPayload::identity("tok"), &key).unwrap();
        let text = frame.to_transport();
        // Base64 alphabet only; safe for text-buffer characteristic writes.
        assert!(text.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'+' || b == b'/' || b == b'='));
        assert_eq!(EncryptedFrame::from_transport(&text).unwrap(), frame);
    }

    #[test]
    fn from_transport_rejects_bad_base64() {
        assert!(matches!(
            EncryptedFrame::from_transport("not base64!!"),
            Err(DecodeError::Base64(_))
        ));
    }

    #[test]
    fn from_transport_rejects_misaligned_ciphertext() {
        // "aGVsbG8=" is valid base64 for the 5-byte string "hello".
        assert_eq!(
            EncryptedFrame::from_transport("aGVsbG8="),
            Err(DecodeError::Misaligned(5))
        );
    }

    #[test]
    fn from_transport_rejects_empty() {
        assert_eq!(
            EncryptedFrame::from_transport(""),
            Err(DecodeError::Misaligned(0))
        );
    }

    #[test]
    fn decode_rejects_wrong_key() {
        let frame = encode(&CredentialPayload::wifi("Home", "pw"), &test_key()).unwrap();
        let wrong = ProvisioningKey::new([0x42; 16], [0x13; 16]);
        // Either unpadding or JSON parsing fails; never a bogus payload.
        assert!(decode(&frame, &wrong).is_err());
    }

    #[test]
    fn decode_rejects_version_mismatch() {
        let key = test_key();
        let mut frame = encode(&CredentialPayload::identity("tok"), &key).unwrap();
        frame.encoding_version = 2;
        assert_eq!(decode(&frame, &key), Err(DecodeError::UnsupportedVersion(2)));
    }

    #[test]
    fn decode_rejects_truncated_ciphertext() {
        let key = test_key();
        let mut frame = encode(&CredentialPayload::identity("tok"), &key).unwrap();
        frame.ciphertext.truncate(7);
        assert_eq!(decode(&frame, &key), Err(DecodeError::Misaligned(7)));
    }

    #[test]
    fn key_from_hex() {
        let key = ProvisioningKey::from_hex(
            "47726964417761726550726f764b6579",
            "47726964417761726550726f76495630",
        )
        .unwrap();
        assert_eq!(key, test_key());
    }

    #[test]
    fn key_from_hex_rejects_bad_input() {
        assert!(matches!(
            ProvisioningKey::from_hex("zz", "47726964417761726550726f76495630"),
            Err(KeyError::Hex(_))
        ));
        assert_eq!(
            ProvisioningKey::from_hex("abcd", "47726964417761726550726f76495630"),
            Err(KeyError::Length(2))
        );
    }

    #[test]
    fn key_debug_is_redacted() {
        let rendered = format!("{:?}", test_key());
        assert_eq!(rendered, "ProvisioningKey(redacted)");
    }
}
