//! CLI configuration
//!
//! `config.json` under the GridAware state directory. Written with defaults
//! on the first run so there is always a file to edit; loaded as-is after
//! that.

use std::path::{Path, PathBuf};
use std::time::Duration;

use gridaware_ble_controller::SessionConfig;
use gridaware_proto::{KeyError, ProvisioningKey, gatt};

// Key material the firmware ships with. Deployments that rotate it edit
// config.json.
const DEFAULT_KEY_HEX: &str = "47726964417761726550726f764b6579";
const DEFAULT_IV_HEX: &str = "47726964417761726550726f76495630";

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Config {
    /// Backend API base URL.
    pub api_url: String,
    /// Deployment API key sent with every backend call.
    #[serde(default)]
    pub api_key: String,
    /// Advertised-name prefix of provisionable charging boxes.
    pub device_prefix: String,
    /// AES-128 key for credential payloads, hex.
    pub provisioning_key: String,
    /// AES-128-CBC initialization vector, hex.
    pub provisioning_iv: String,
    pub scan_timeout_secs: u64,
    pub connect_timeout_secs: u64,
    pub write_timeout_secs: u64,
    /// Largest transport payload attempted in one characteristic write.
    pub max_write_len: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_url: gridaware_api::DEFAULT_BASE_URL.to_string(),
            api_key: String::new(),
            device_prefix: gatt::DEVICE_NAME_PREFIX.to_string(),
            provisioning_key: DEFAULT_KEY_HEX.to_string(),
            provisioning_iv: DEFAULT_IV_HEX.to_string(),
            scan_timeout_secs: 10,
            connect_timeout_secs: 10,
            write_timeout_secs: 10,
            max_write_len: 512,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to access {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error(transparent)]
    Key(#[from] KeyError),
}

impl Config {
    /// Load `config.json` from `home`, writing the defaults first if the
    /// file does not exist yet.
    pub fn load_or_create(home: &Path) -> Result<Self, ConfigError> {
        let path = home.join("config.json");
        if path.exists() {
            let data = std::fs::read_to_string(&path).map_err(|source| ConfigError::Io {
                path: path.clone(),
                source,
            })?;
            return serde_json::from_str(&data).map_err(|source| ConfigError::Parse {
                path: path.clone(),
                source,
            });
        }

        let config = Self::default();
        std::fs::create_dir_all(home).map_err(|source| ConfigError::Io {
            path: home.to_path_buf(),
            source,
        })?;
        let data = serde_json::to_string_pretty(&config).map_err(|source| ConfigError::Parse {
            path: path.clone(),
            source,
        })?;
        std::fs::write(&path, data).map_err(|source| ConfigError::Io {
            path: path.clone(),
            source,
        })?;
        log::info!("wrote default config to {}", path.display());
        Ok(config)
    }

    pub fn provisioning_key(&self) -> Result<ProvisioningKey, ConfigError> {
        Ok(ProvisioningKey::from_hex(
            &self.provisioning_key,
            &self.provisioning_iv,
        )?)
    }

    /// Session tunables derived from this config.
    pub fn session_config(&self) -> Result<SessionConfig, ConfigError> {
        let mut session = SessionConfig::new(self.provisioning_key()?);
        session.device_prefix = self.device_prefix.clone();
        session.scan_timeout = Duration::from_secs(self.scan_timeout_secs);
        session.connect_timeout = Duration::from_secs(self.connect_timeout_secs);
        session.discovery_timeout = Duration::from_secs(self.connect_timeout_secs);
        session.write_timeout = Duration::from_secs(self.write_timeout_secs);
        session.max_write_len = self.max_write_len;
        Ok(session)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_run_writes_the_default_config() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_or_create(dir.path()).unwrap();
        assert_eq!(config.device_prefix, "ESP32");
        assert!(dir.path().join("config.json").exists());
    }

    #[test]
    fn edits_survive_a_reload() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::load_or_create(dir.path()).unwrap();
        config.scan_timeout_secs = 42;
        std::fs::write(
            dir.path().join("config.json"),
            serde_json::to_string_pretty(&config).unwrap(),
        )
        .unwrap();

        let reloaded = Config::load_or_create(dir.path()).unwrap();
        assert_eq!(reloaded.scan_timeout_secs, 42);
    }

    #[test]
    fn malformed_config_is_reported_not_replaced() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("config.json"), "{not json").unwrap();
        let err = Config::load_or_create(dir.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn default_key_material_parses() {
        let config = Config::default();
        config.provisioning_key().unwrap();
    }

    #[test]
    fn bad_key_material_is_rejected() {
        let config = Config {
            provisioning_key: "deadbeef".to_string(),
            ..Config::default()
        };
        assert!(matches!(
            config.provisioning_key(),
            Err(ConfigError::Key(_))
        ));
    }

    #[test]
    fn session_config_reflects_the_file() {
        let config = Config {
            scan_timeout_secs: 3,
            max_write_len: 128,
            ..Config::default()
        };
        let session = config.session_config().unwrap();
        assert_eq!(session.scan_timeout, Duration::from_secs(3));
        assert_eq!(session.max_write_len, 128);
        assert_eq!(session.device_prefix, "ESP32");
    }
}
