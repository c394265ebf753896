//! Configuration system for meshbridge.
//!
//! Resolution order: command-line flags → environment variables → config
//! file → defaults. Flags are applied by the daemon; everything else here.
//!
//! Config file location:
//!   1. $MESHBRIDGE_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/meshbridge/config.toml
//!   3. ~/.config/meshbridge/config.toml

use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::time::Duration;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MeshbridgeConfig {
    pub network: NetworkConfig,
    pub discovery: DiscoveryConfig,
    pub bridge: BridgeConfig,
    pub log: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Address the HTTP/WebSocket API binds to.
    pub listen_addr: String,
    pub listen_port: u16,
    /// Address the peer link listener binds to.
    pub mesh_addr: String,
    /// TCP port for peer links. 0 = OS-assigned.
    pub mesh_port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// Label shared by every node that should find this one.
    pub rendezvous: String,
    /// Enable DHT discovery.
    pub dht: bool,
    /// Enable local multicast discovery.
    pub local: bool,
    /// Other meshbridge nodes (host:port of their peer link listener)
    /// dialed in parallel while the DHT bootstraps.
    pub seed_peers: Vec<String>,
    /// DHT bootstrap routers (host:port).
    pub dht_bootstrap: Vec<String>,
    pub search_interval_secs: u64,
    pub announce_interval_secs: u64,
    /// Stop the DHT search loop after the first successful connection.
    pub stop_after_first_connect: bool,
    pub multicast_group: Ipv4Addr,
    pub multicast_port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Send a welcome text frame when a socket is bridged.
    pub welcome: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// tracing filter directive, e.g. "info" or "meshbridge_services=debug".
    /// RUST_LOG takes precedence when set.
    pub level: String,
}

// ── Defaults ──────────────────────────────────────────────────────────────────

pub const DEFAULT_RENDEZVOUS: &str = "myspace";
pub const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1";
pub const DEFAULT_LISTEN_PORT: u16 = 5002;

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            listen_addr: DEFAULT_LISTEN_ADDR.to_string(),
            listen_port: DEFAULT_LISTEN_PORT,
            mesh_addr: "0.0.0.0".to_string(),
            mesh_port: 0,
        }
    }
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            rendezvous: DEFAULT_RENDEZVOUS.to_string(),
            dht: true,
            local: true,
            seed_peers: Vec::new(),
            dht_bootstrap: vec![
                "router.bittorrent.com:6881".to_string(),
                "dht.transmissionbt.com:6881".to_string(),
                "dht.libtorrent.org:25401".to_string(),
                "router.utorrent.com:6881".to_string(),
            ],
            search_interval_secs: 10,
            announce_interval_secs: 5,
            stop_after_first_connect: false,
            multicast_group: Ipv4Addr::new(239, 255, 70, 77),
            multicast_port: 47077,
        }
    }
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self { welcome: true }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl DiscoveryConfig {
    pub fn search_interval(&self) -> Duration {
        Duration::from_secs(self.search_interval_secs.max(1))
    }

    pub fn announce_interval(&self) -> Duration {
        Duration::from_secs(self.announce_interval_secs.max(1))
    }
}

impl NetworkConfig {
    /// `listen_addr:listen_port`, the API bind string.
    pub fn api_socket(&self) -> String {
        format!("{}:{}", self.listen_addr, self.listen_port)
    }

    /// `mesh_addr:mesh_port`, the peer link bind string.
    pub fn mesh_socket(&self) -> String {
        format!("{}:{}", self.mesh_addr, self.mesh_port)
    }
}

// ── Path helpers ──────────────────────────────────────────────────────────────

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".config"))
        .join("meshbridge")
}

fn home_dir() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),
    #[error("failed to parse {0}: {1}")]
    ParseFailed(PathBuf, toml::de::Error),
    #[error("failed to write {0}: {1}")]
    WriteFailed(PathBuf, std::io::Error),
    #[error("failed to serialize: {0}")]
    SerializeFailed(toml::ser::Error),
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl MeshbridgeConfig {
    /// Load config: env vars → file → defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::load_file(&Self::file_path())?;
        config.apply_env_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Parse a config file, or return defaults when it does not exist.
    pub fn load_file(path: &PathBuf) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let text =
            std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFailed(path.clone(), e))?;
        toml::from_str(&text).map_err(|e| ConfigError::ParseFailed(path.clone(), e))
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("MESHBRIDGE_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_dir().join("config.toml"))
    }

    /// Write default config to `path` if nothing is there. Returns the path.
    pub fn write_default_if_missing(path: PathBuf) -> Result<PathBuf, ConfigError> {
        if !path.exists() {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
            }
            let text = toml::to_string_pretty(&MeshbridgeConfig::default())
                .map_err(ConfigError::SerializeFailed)?;
            std::fs::write(&path, text).map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
        }
        Ok(path)
    }

    /// Apply MESHBRIDGE_* overrides. `lookup` is `std::env::var` in
    /// production and a map in tests.
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("MESHBRIDGE_ADDR") {
            self.network.listen_addr = v;
        }
        if let Some(p) = lookup("MESHBRIDGE_PORT").and_then(|v| v.parse().ok()) {
            self.network.listen_port = p;
        }
        if let Some(p) = lookup("MESHBRIDGE_MESH_PORT").and_then(|v| v.parse().ok()) {
            self.network.mesh_port = p;
        }
        if let Some(v) = lookup("MESHBRIDGE_LOG_LEVEL") {
            self.log.level = v;
        }
        if let Some(v) = lookup("MESHBRIDGE_RENDEZVOUS") {
            self.discovery.rendezvous = v;
        }
        if let Some(v) = lookup("MESHBRIDGE_SEED_PEERS") {
            self.discovery.seed_peers = v
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect();
        }
        if let Some(v) = lookup("MESHBRIDGE_DHT") {
            self.discovery.dht = v == "true" || v == "1";
        }
        if let Some(v) = lookup("MESHBRIDGE_LOCAL") {
            self.discovery.local = v == "true" || v == "1";
        }
    }
}
