//! Daemon settings.
//!
//! Loaded from an optional TOML file, then overridden by `TUNNELGATE_*`
//! environment variables. Paths default to the user's local data directory.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use ipnetwork::IpNetwork;
use serde::{Deserialize, Serialize};
use tunnelgate_core::{AddressSpace, NetworkAddress};
use tunnelgate_wg::PublicKey;

use crate::services::OverlayConfig;

/// Prefix of every environment override.
pub const ENV_PREFIX: &str = "TUNNELGATE_";

/// Errors from loading or validating settings.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid value for {key}: {value:?}")]
    Env { key: String, value: String },
    #[error("invalid setting `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },
    #[error("wireguard.server_public_key is not set")]
    MissingServerPublicKey,
}

/// Top-level daemon settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub database_path: PathBuf,
    pub bind_addr: SocketAddr,
    /// Directory of per-device client configs.
    pub client_config_dir: PathBuf,
    /// The WireGuard server config that peers are appended to.
    pub server_config_path: PathBuf,
    pub wireguard: WireguardSettings,
    pub rate_limit: RateLimitSettings,
}

/// Overlay network and server endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WireguardSettings {
    /// CIDR the device addresses are drawn from.
    pub network: String,
    pub server_address: String,
    /// Address of the first enrolled device.
    pub initial_client_address: String,
    pub server_domain: String,
    pub server_port: u16,
    pub server_public_key: Option<String>,
    pub keepalive_seconds: u16,
}

/// Limits on the redeem endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitSettings {
    pub per_second: u32,
    pub burst: u32,
}

impl Default for Settings {
    fn default() -> Self {
        let data_dir = default_data_dir();
        Self {
            database_path: data_dir.join("tunnelgate.db"),
            bind_addr: ([127, 0, 0, 1], 5000).into(),
            client_config_dir: data_dir.join("clients"),
            server_config_path: data_dir.join("wg0.conf"),
            wireguard: WireguardSettings::default(),
            rate_limit: RateLimitSettings::default(),
        }
    }
}

impl Default for WireguardSettings {
    fn default() -> Self {
        Self {
            network: "fc00::/64".to_string(),
            server_address: "fc00::1".to_string(),
            initial_client_address: "fc00::2".to_string(),
            server_domain: "localhost".to_string(),
            server_port: 3411,
            server_public_key: None,
            keepalive_seconds: 30,
        }
    }
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        // 2 requests/second with burst of 10
        Self {
            per_second: 2,
            burst: 10,
        }
    }
}

fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("tunnelgate")
}

/// Default location of the settings file.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("tunnelgate").join("config.toml"))
}

impl Settings {
    /// Load settings from `path` (or the default location if it exists), then
    /// apply environment overrides.
    ///
    /// An explicitly given path must exist.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut settings = match path {
            Some(path) => Self::from_file(path)?,
            None => match default_config_path().filter(|p| p.exists()) {
                Some(path) => Self::from_file(&path)?,
                None => Self::default(),
            },
        };
        settings.apply_env(|key| std::env::var(key).ok())?;
        Ok(settings)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_toml(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Override fields from `TUNNELGATE_*` variables looked up via `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| {
            let key = format!("{ENV_PREFIX}{name}");
            lookup(&key).map(|value| (key, value))
        };

        if let Some((_, value)) = var("DATABASE_PATH") {
            self.database_path = value.into();
        }
        if let Some((key, value)) = var("BIND_ADDR") {
            self.bind_addr = parse_env(key, value)?;
        }
        if let Some((_, value)) = var("CLIENT_CONFIG_DIR") {
            self.client_config_dir = value.into();
        }
        if let Some((_, value)) = var("SERVER_CONFIG_PATH") {
            self.server_config_path = value.into();
        }

        let wg = &mut self.wireguard;
        if let Some((_, value)) = var("WG_NETWORK") {
            wg.network = value;
        }
        if let Some((_, value)) = var("WG_SERVER_ADDRESS") {
            wg.server_address = value;
        }
        if let Some((_, value)) = var("WG_INITIAL_CLIENT_ADDRESS") {
            wg.initial_client_address = value;
        }
        if let Some((_, value)) = var("WG_SERVER_DOMAIN") {
            wg.server_domain = value;
        }
        if let Some((key, value)) = var("WG_SERVER_PORT") {
            wg.server_port = parse_env(key, value)?;
        }
        if let Some((_, value)) = var("WG_SERVER_PUBLIC_KEY") {
            wg.server_public_key = Some(value);
        }
        if let Some((key, value)) = var("WG_KEEPALIVE_SECONDS") {
            wg.keepalive_seconds = parse_env(key, value)?;
        }

        if let Some((key, value)) = var("RATE_LIMIT_PER_SECOND") {
            self.rate_limit.per_second = parse_env(key, value)?;
        }
        if let Some((key, value)) = var("RATE_LIMIT_BURST") {
            self.rate_limit.burst = parse_env(key, value)?;
        }

        Ok(())
    }

    /// Check the overlay settings and convert them to their typed form.
    pub fn overlay(&self) -> Result<OverlayConfig, ConfigError> {
        let wg = &self.wireguard;

        let network: IpNetwork = wg.network.parse().map_err(|e| ConfigError::Invalid {
            field: "wireguard.network",
            reason: format!("{e}"),
        })?;
        let server_address = parse_address("wireguard.server_address", &wg.server_address)?;
        let initial = parse_address(
            "wireguard.initial_client_address",
            &wg.initial_client_address,
        )?;

        let address_space = AddressSpace::new(network, initial).map_err(|e| ConfigError::Invalid {
            field: "wireguard.initial_client_address",
            reason: e.to_string(),
        })?;

        if !network.contains(server_address.ip()) {
            return Err(ConfigError::Invalid {
                field: "wireguard.server_address",
                reason: format!("{server_address} is outside {network}"),
            });
        }
        if server_address >= initial {
            return Err(ConfigError::Invalid {
                field: "wireguard.server_address",
                reason: "must be below initial_client_address so devices never take it".into(),
            });
        }
        if wg.server_domain.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "wireguard.server_domain",
                reason: "must not be empty".into(),
            });
        }
        if wg.server_port == 0 {
            return Err(ConfigError::Invalid {
                field: "wireguard.server_port",
                reason: "must not be zero".into(),
            });
        }

        let server_public_key = wg
            .server_public_key
            .as_deref()
            .ok_or(ConfigError::MissingServerPublicKey)
            .and_then(|key| {
                PublicKey::from_base64(key).map_err(|e| ConfigError::Invalid {
                    field: "wireguard.server_public_key",
                    reason: e.to_string(),
                })
            })?;

        Ok(OverlayConfig {
            address_space,
            server_address,
            server_domain: wg.server_domain.trim().to_string(),
            server_port: wg.server_port,
            server_public_key,
            keepalive_seconds: wg.keepalive_seconds,
        })
    }

    /// Fail fast on settings the daemon cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.overlay().map(|_| ())
    }
}

fn parse_address(field: &'static str, value: &str) -> Result<NetworkAddress, ConfigError> {
    value.parse().map_err(|e: tunnelgate_core::AddressError| ConfigError::Invalid {
        field,
        reason: e.to_string(),
    })
}

fn parse_env<T: std::str::FromStr>(key: String, value: String) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::Env { key, value })
}
