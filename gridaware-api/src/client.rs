//! GridAware backend REST client
//!
//! Thin wrapper over the charging backend: every operation is a JSON POST
//! to `<base>/api/<op>` carrying the deployment API key, plus the user's
//! JWT and a device MAC where the operation needs them.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

pub const DEFAULT_BASE_URL: &str = "https://gridawarecharging.com/api";

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    /// Non-success status from the backend, with its `message` field when
    /// the body carries one.
    #[error("backend rejected the request ({status}): {message}")]
    Rejected { status: u16, message: String },
}

/// One registered charging box.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Device {
    pub device_mac_address: String,
}

/// One telemetry row from a charging box.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Measurement {
    pub frequency: f64,
    pub voltage: f64,
    pub current: f64,
    pub battery_percentage: f64,
    pub is_charging: bool,
}

#[derive(Serialize)]
struct LoginBody<'a> {
    api_key: &'a str,
    email: &'a str,
    password: &'a str,
}

#[derive(Serialize)]
struct CheckBody<'a> {
    api_key: &'a str,
    device_mac_address: &'a str,
}

#[derive(Serialize)]
struct UserBody<'a> {
    api_key: &'a str,
    user_jwt: &'a str,
}

#[derive(Serialize)]
struct DeviceBody<'a> {
    api_key: &'a str,
    user_jwt: &'a str,
    device_mac_address: &'a str,
}

#[derive(Serialize)]
struct DataBody<'a> {
    api_key: &'a str,
    user_jwt: &'a str,
    device_mac_address: &'a str,
    time_seconds: u64,
}

pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl ApiClient {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        }
    }

    fn url(&self, op: &str) -> String {
        format!("{}/{op}", self.base_url)
    }

    async fn send<B: Serialize>(&self, op: &str, body: &B) -> Result<reqwest::Response, ApiError> {
        log::debug!("POST {}", self.url(op));
        let response = self.http.post(self.url(op)).json(body).send().await?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(ApiError::Rejected {
                status: status.as_u16(),
                message: rejection_message(&text),
            });
        }
        Ok(response)
    }

    async fn post<B: Serialize, T: DeserializeOwned>(
        &self,
        op: &str,
        body: &B,
    ) -> Result<T, ApiError> {
        Ok(self.send(op, body).await?.json::<T>().await?)
    }

    async fn post_unit<B: Serialize>(&self, op: &str, body: &B) -> Result<(), ApiError> {
        self.send(op, body).await.map(|_| ())
    }

    /// Exchange account credentials for a session JWT.
    pub async fn login(&self, email: &str, password: &str) -> Result<String, ApiError> {
        #[derive(Deserialize)]
        struct Reply {
            user_jwt: String,
        }
        let reply: Reply = self
            .post(
                "login",
                &LoginBody {
                    api_key: &self.api_key,
                    email,
                    password,
                },
            )
            .await?;
        Ok(reply.user_jwt)
    }

    /// Whether a charging box is known to the backend at all.
    pub async fn check_device(&self, mac: &str) -> Result<bool, ApiError> {
        #[derive(Deserialize)]
        struct Reply {
            exists: bool,
        }
        let reply: Reply = self
            .post(
                "check_exists",
                &CheckBody {
                    api_key: &self.api_key,
                    device_mac_address: mac,
                },
            )
            .await?;
        Ok(reply.exists)
    }

    /// Attach a charging box to the logged-in account.
    pub async fn register_device(&self, user_jwt: &str, mac: &str) -> Result<(), ApiError> {
        self.post_unit(
            "register_device_for_user",
            &DeviceBody {
                api_key: &self.api_key,
                user_jwt,
                device_mac_address: mac,
            },
        )
        .await
    }

    /// Detach a charging box from the logged-in account.
    pub async fn unregister_device(&self, user_jwt: &str, mac: &str) -> Result<(), ApiError> {
        self.post_unit(
            "unregister_device_for_user",
            &DeviceBody {
                api_key: &self.api_key,
                user_jwt,
                device_mac_address: mac,
            },
        )
        .await
    }

    /// Every charging box attached to the logged-in account.
    pub async fn devices(&self, user_jwt: &str) -> Result<Vec<Device>, ApiError> {
        self.post(
            "get_devices_for_user",
            &UserBody {
                api_key: &self.api_key,
                user_jwt,
            },
        )
        .await
    }

    /// Telemetry rows for a box covering the last `time_seconds` seconds.
    pub async fn recent_data(
        &self,
        user_jwt: &str,
        mac: &str,
        time_seconds: u64,
    ) -> Result<Vec<Measurement>, ApiError> {
        self.post(
            "get_data_in_recent_time_interval",
            &DataBody {
                api_key: &self.api_key,
                user_jwt,
                device_mac_address: mac,
                time_seconds,
            },
        )
        .await
    }
}

/// The backend reports errors as `{"message": "..."}`; fall back to the
/// raw body when it does not.
fn rejection_message(text: &str) -> String {
    serde_json::from_str::<serde_json::Value>(text)
        .ok()
        .and_then(|v| v.get("message").and_then(|m| m.as_str()).map(str::to_string))
        .unwrap_or_else(|| text.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn urls_join_without_doubled_slashes() {
        let client = ApiClient::new("https://gridawarecharging.com/api/", "k");
        assert_eq!(
            client.url("check_exists"),
            "https://gridawarecharging.com/api/check_exists"
        );
    }

    #[test]
    fn bodies_carry_the_backend_field_names() {
        let body = DeviceBody {
            api_key: "k",
            user_jwt: "jwt",
            device_mac_address: "aa:bb:cc:dd:ee:ff",
        };
        assert_eq!(
            serde_json::to_string(&body).unwrap(),
            r#"{"api_key":"k","user_jwt":"jwt","device_mac_address":"aa:bb:cc:dd:ee:ff"}"#
        );

        let body = DataBody {
            api_key: "k",
            user_jwt: "jwt",
            device_mac_address: "aa:bb:cc:dd:ee:ff",
            time_seconds: 60,
        };
        assert!(
            serde_json::to_string(&body)
                .unwrap()
                .ends_with(r#""time_seconds":60}"#)
        );
    }

    #[test]
    fn measurements_deserialize_from_backend_rows() {
        let row = r#"{
            "frequency": 59.98,
            "voltage": 239.7,
            "current": 12.4,
            "battery_percentage": 86.5,
            "is_charging": true,
            "device_mac_address": "aa:bb:cc:dd:ee:ff"
        }"#;
        let m: Measurement = serde_json::from_str(row).unwrap();
        assert_eq!(m.battery_percentage, 86.5);
        assert!(m.is_charging);
    }

    #[test]
    fn rejection_messages_prefer_the_message_field() {
        assert_eq!(
            rejection_message(r#"{"message":"Invalid password"}"#),
            "Invalid password"
        );
        assert_eq!(rejection_message("upstream timeout"), "upstream timeout");
    }
}
