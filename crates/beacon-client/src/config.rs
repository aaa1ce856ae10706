//! # Client Configuration
//!
//! Timeouts, intervals, and per-host root CAs for the push client.
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                           │
//! │     BEACON_REQUEST_TIMEOUT_SECS=30                                     │
//! │     BEACON_PING_INTERVAL_SECS=60                                       │
//! │                                                                         │
//! │  2. TOML Config File                                                   │
//! │     [timeouts] request_secs = 30 ...                                   │
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration File Format
//! ```toml
//! # beacon.toml
//! [timeouts]
//! request_secs = 30
//! connect_secs = 10
//! ping_timeout_secs = 10
//!
//! [intervals]
//! reconnect_secs = 2
//! ping_secs = 60
//! save_secs = 60
//!
//! [tls]
//! # host -> path of a bundled PEM root certificate
//! "push.example.com" = "/etc/beacon/push-ca.pem"
//! ```

use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use tracing::debug;

use crate::error::{ClientError, ClientResult};

// =============================================================================
// Defaults
// =============================================================================

/// Per-call RPC deadline.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Constant delay between reconnect attempts.
pub const DEFAULT_RECONNECT_INTERVAL: Duration = Duration::from_secs(2);

/// Keepalive ping period.
pub const DEFAULT_PING_INTERVAL: Duration = Duration::from_secs(60);

/// Per-ping deadline; elapse tears the connection down.
pub const DEFAULT_PING_TIMEOUT: Duration = Duration::from_secs(10);

/// Minimum spacing between state-snapshot writes to the local store.
pub const DEFAULT_SAVE_INTERVAL: Duration = Duration::from_secs(60);

/// Dial deadline.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

// =============================================================================
// ClientConfig
// =============================================================================

/// Runtime knobs for the push client.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub request_timeout: Duration,
    pub reconnect_interval: Duration,
    pub ping_interval: Duration,
    pub ping_timeout: Duration,
    pub save_interval: Duration,
    pub connect_timeout: Duration,

    /// Bundled root CA per TLS host, PEM-encoded. A `wss://` dial to a
    /// host with an entry here trusts only that CA.
    pub bundled_cas: HashMap<String, Vec<u8>>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            reconnect_interval: DEFAULT_RECONNECT_INTERVAL,
            ping_interval: DEFAULT_PING_INTERVAL,
            ping_timeout: DEFAULT_PING_TIMEOUT,
            save_interval: DEFAULT_SAVE_INTERVAL,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            bundled_cas: HashMap::new(),
        }
    }
}

impl ClientConfig {
    /// Builder-style setters used by hosts and tests.
    pub fn request_timeout(mut self, d: Duration) -> Self {
        self.request_timeout = d;
        self
    }

    pub fn reconnect_interval(mut self, d: Duration) -> Self {
        self.reconnect_interval = d;
        self
    }

    pub fn ping_interval(mut self, d: Duration) -> Self {
        self.ping_interval = d;
        self
    }

    pub fn ping_timeout(mut self, d: Duration) -> Self {
        self.ping_timeout = d;
        self
    }

    pub fn save_interval(mut self, d: Duration) -> Self {
        self.save_interval = d;
        self
    }

    pub fn connect_timeout(mut self, d: Duration) -> Self {
        self.connect_timeout = d;
        self
    }

    /// Registers a bundled root CA (PEM) for one host.
    pub fn bundled_ca(mut self, host: impl Into<String>, pem: Vec<u8>) -> Self {
        self.bundled_cas.insert(host.into(), pem);
        self
    }

    /// Loads configuration from a TOML file, then applies environment
    /// overrides on top.
    pub fn load(path: impl AsRef<Path>) -> ClientResult<Self> {
        let raw = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ClientError::Config(format!("read config: {}", e)))?;
        let file: ConfigFile =
            toml::from_str(&raw).map_err(|e| ClientError::Config(format!("parse config: {}", e)))?;
        let mut config = ClientConfig::from(file);
        config.apply_env();
        Ok(config)
    }

    /// Defaults plus environment overrides, for hosts with no config file.
    pub fn from_env() -> Self {
        let mut config = ClientConfig::default();
        config.apply_env();
        config
    }

    fn apply_env(&mut self) {
        apply_env_secs("BEACON_REQUEST_TIMEOUT_SECS", &mut self.request_timeout);
        apply_env_secs("BEACON_RECONNECT_INTERVAL_SECS", &mut self.reconnect_interval);
        apply_env_secs("BEACON_PING_INTERVAL_SECS", &mut self.ping_interval);
        apply_env_secs("BEACON_PING_TIMEOUT_SECS", &mut self.ping_timeout);
        apply_env_secs("BEACON_SAVE_INTERVAL_SECS", &mut self.save_interval);
        apply_env_secs("BEACON_CONNECT_TIMEOUT_SECS", &mut self.connect_timeout);
    }
}

fn apply_env_secs(var: &str, target: &mut Duration) {
    if let Ok(value) = std::env::var(var) {
        match value.parse::<u64>() {
            Ok(secs) => {
                debug!(var, secs, "config override from environment");
                *target = Duration::from_secs(secs);
            }
            Err(_) => debug!(var, %value, "ignoring unparseable override"),
        }
    }
}

// =============================================================================
// File Format
// =============================================================================

#[derive(Debug, Default, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    timeouts: TimeoutsSection,
    #[serde(default)]
    intervals: IntervalsSection,
    /// host -> PEM file path
    #[serde(default)]
    tls: HashMap<String, String>,
}

#[derive(Debug, Default, Deserialize)]
struct TimeoutsSection {
    request_secs: Option<u64>,
    connect_secs: Option<u64>,
    ping_timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct IntervalsSection {
    reconnect_secs: Option<u64>,
    ping_secs: Option<u64>,
    save_secs: Option<u64>,
}

impl From<ConfigFile> for ClientConfig {
    fn from(file: ConfigFile) -> Self {
        let mut config = ClientConfig::default();
        if let Some(s) = file.timeouts.request_secs {
            config.request_timeout = Duration::from_secs(s);
        }
        if let Some(s) = file.timeouts.connect_secs {
            config.connect_timeout = Duration::from_secs(s);
        }
        if let Some(s) = file.timeouts.ping_timeout_secs {
            config.ping_timeout = Duration::from_secs(s);
        }
        if let Some(s) = file.intervals.reconnect_secs {
            config.reconnect_interval = Duration::from_secs(s);
        }
        if let Some(s) = file.intervals.ping_secs {
            config.ping_interval = Duration::from_secs(s);
        }
        if let Some(s) = file.intervals.save_secs {
            config.save_interval = Duration::from_secs(s);
        }
        for (host, pem_path) in file.tls {
            match std::fs::read(&pem_path) {
                Ok(pem) => {
                    config.bundled_cas.insert(host, pem);
                }
                Err(e) => debug!(%host, %pem_path, error = %e, "skipping unreadable bundled CA"),
            }
        }
        config
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
