use std::time::Duration;

use anyhow::Result;
use serde::Deserialize;

/// Registry service configuration, read from the environment
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_bind_ip")]
    pub bridge_ip: String,

    #[serde(default = "default_bridge_port")]
    pub bridge_port: u16,

    #[serde(default = "default_bind_ip")]
    pub ntp_ip: String,

    #[serde(default = "default_ntp_port")]
    pub ntp_port: u16,

    /// Maximum age of a registration before eviction
    #[serde(default = "default_client_timeout_ms")]
    pub client_timeout_ms: u64,

    /// Interval between eviction sweeps
    #[serde(default = "default_client_check_interval_ms")]
    pub client_check_interval_ms: u64,
}

fn default_port() -> u16 {
    8080
}

fn default_bind_ip() -> String {
    "0.0.0.0".to_string()
}

fn default_bridge_port() -> u16 {
    8082
}

fn default_ntp_port() -> u16 {
    8083
}

fn default_client_timeout_ms() -> u64 {
    90_000
}

fn default_client_check_interval_ms() -> u64 {
    5_000
}

impl Config {
    pub fn load() -> Result<Self> {
        // Load .env file if it exists
        dotenvy::dotenv().ok();

        let config = config::Config::builder()
            .add_source(config::Environment::default())
            .build()?;

        let settings: Config = config
            .try_deserialize()
            .unwrap_or_else(|_| Config::default());

        Ok(settings)
    }

    pub fn client_timeout(&self) -> Duration {
        Duration::from_millis(self.client_timeout_ms)
    }

    pub fn client_check_interval(&self) -> Duration {
        Duration::from_millis(self.client_check_interval_ms)
    }

    pub fn bridge_addr(&self) -> String {
        format!("{}:{}", self.bridge_ip, self.bridge_port)
    }

    pub fn ntp_addr(&self) -> String {
        format!("{}:{}", self.ntp_ip, self.ntp_port)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: default_port(),
            bridge_ip: default_bind_ip(),
            bridge_port: default_bridge_port(),
            ntp_ip: default_bind_ip(),
            ntp_port: default_ntp_port(),
            client_timeout_ms: default_client_timeout_ms(),
            client_check_interval_ms: default_client_check_interval_ms(),
        }
    }
}

/// Peer configuration. Environment variables use the `PEER_` prefix.
#[derive(Debug, Clone, Deserialize)]
pub struct PeerConfig {
    #[serde(default = "default_peer_ntp_host")]
    pub ntp_host: String,

    #[serde(default = "default_ntp_port")]
    pub ntp_port: u16,

    #[serde(default = "default_registry_host")]
    pub registry_host: String,

    #[serde(default = "default_port")]
    pub registry_port: u16,

    #[serde(default = "default_username")]
    pub username: String,

    #[serde(default = "default_peer_ip")]
    pub ip: String,

    /// 0 picks an ephemeral port
    #[serde(default)]
    pub port: u16,

    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,

    #[serde(default = "default_clock_sync_timeout_ms")]
    pub clock_sync_timeout_ms: u64,
}

fn default_peer_ntp_host() -> String {
    "127.0.0.1".to_string()
}

fn default_registry_host() -> String {
    "localhost".to_string()
}

fn default_username() -> String {
    "Unknown".to_string()
}

fn default_peer_ip() -> String {
    "127.0.0.1".to_string()
}

fn default_heartbeat_interval_ms() -> u64 {
    60_000
}

fn default_clock_sync_timeout_ms() -> u64 {
    5_000
}

impl PeerConfig {
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = config::Config::builder()
            .add_source(config::Environment::with_prefix("PEER"))
            .build()?;

        let settings: PeerConfig = config
            .try_deserialize()
            .unwrap_or_else(|_| PeerConfig::default());

        Ok(settings)
    }

    pub fn ntp_addr(&self) -> String {
        format!("{}:{}", self.ntp_host, self.ntp_port)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn clock_sync_timeout(&self) -> Duration {
        Duration::from_millis(self.clock_sync_timeout_ms)
    }
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self {
            ntp_host: default_peer_ntp_host(),
            ntp_port: default_ntp_port(),
            registry_host: default_registry_host(),
            registry_port: default_port(),
            username: default_username(),
            ip: default_peer_ip(),
            port: 0,
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            clock_sync_timeout_ms: default_clock_sync_timeout_ms(),
        }
    }
}
