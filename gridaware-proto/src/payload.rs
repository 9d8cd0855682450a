//! Credential payloads written to the provisioning characteristic

use serde::{Deserialize, Serialize};

/// A credential record for the charging-control device.
///
/// Serialized as a compact JSON object with fixed field names; the firmware
/// distinguishes the two kinds by schema (which fields are present), so the
/// enum is untagged on the wire. Immutable once constructed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CredentialPayload {
    /// Wi-Fi network credentials: `{"ssid":"...","password":"..."}`
    Wifi { ssid: String, password: String },
    /// Session-token handoff: `{"token":"..."}`
    Identity { token: String },
}

impl CredentialPayload {
    /// Wi-Fi credentials payload
    pub fn wifi(ssid: impl Into<String>, password: impl Into<String>) -> Self {
        Self::Wifi {
            ssid: ssid.into(),
            password: password.into(),
        }
    }

    /// Identity-token payload
    pub fn identity(token: impl Into<String>) -> Self {
        Self::Identity {
            token: token.into(),
        }
    }

    /// Short human-readable kind, for logs and CLI output
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Wifi { .. } => "wifi",
            Self::Identity { .. } => "identity",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wifi_wire_format_is_fixed() {
        let payload = CredentialPayload::wifi("Home", "secret123");
        let bytes = serde_json::to_vec(&payload).unwrap();
        // Field names and order are a firmware contract.
        assert_eq!(bytes, br#"{"ssid":"Home","password":"secret123"}"#);
    }

    #[test]
    fn identity_wire_format_is_fixed() {
        let payload = CredentialPayload::identity("eyJhbGciOi...");
        let bytes = serde_json::to_vec(&payload).unwrap();
        assert_eq!(bytes, br#"{"token":"eyJhbGciOi..."}"#);
    }

    #[test]
    fn schema_disambiguates_kinds() {
        let wifi: CredentialPayload =
            serde_json::from_str(r#"{"ssid":"Home","password":"pw"}"#).unwrap();
        assert_eq!(wifi, CredentialPayload::wifi("Home", "pw"));

        let identity: CredentialPayload = serde_json::from_str(r#"{"token":"abc"}"#).unwrap();
        assert_eq!(identity, CredentialPayload::identity("abc"));
    }

    #[test]
    fn unknown_schema_is_rejected() {
        assert!(serde_json::from_str::<CredentialPayload>(r#"{"user":"x"}"#).is_err());
        assert!(serde_json::from_str::<CredentialPayload>("{}").is_err());
    }
}
