//! Bridge configuration with validation.
//!
//! Values come from defaults, then environment variables, then command-line
//! flags (applied in `main`).

use std::env;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

/// Default peer listener port
pub const DEFAULT_PEER_PORT: u16 = 8742;

/// Default maximum inbound peer message size (1MB)
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 1024 * 1024;

/// Main bridge configuration
#[derive(Debug, Clone, Default)]
pub struct BridgeConfig {
    /// Peer WebSocket listener
    pub peer: PeerConfig,
    /// Timeouts
    pub timeouts: TimeoutConfig,
    /// Logging
    pub logging: LoggingConfig,
    /// Block host service until the first peer attaches (bounded by
    /// `timeouts.connection_wait`)
    pub wait_for_peer: bool,
}

impl BridgeConfig {
    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.peer.max_message_size == 0 {
            return Err(ConfigError::InvalidLimit(
                "max_message_size cannot be 0".into(),
            ));
        }

        if self.timeouts.round_trip.is_zero() {
            return Err(ConfigError::InvalidTimeout(
                "round_trip timeout cannot be 0".into(),
            ));
        }

        if self.timeouts.connection_wait.is_zero() {
            return Err(ConfigError::InvalidTimeout(
                "connection_wait timeout cannot be 0".into(),
            ));
        }

        if self.timeouts.sweep_interval.is_zero() {
            return Err(ConfigError::InvalidTimeout(
                "sweep_interval cannot be 0".into(),
            ));
        }

        Ok(())
    }

    /// Get peer listener bind address
    pub fn peer_addr(&self) -> SocketAddr {
        SocketAddr::new(self.peer.host, self.peer.port)
    }

    /// Create configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `PEER_BRIDGE_HOST`: Listener address (default: 127.0.0.1)
    /// - `PEER_BRIDGE_PORT`: Listener port (default: 8742)
    /// - `PEER_BRIDGE_VERBOSE`: Debug logging (default: false)
    /// - `PEER_BRIDGE_JSON_LOGS`: JSON log lines (default: false)
    /// - `PEER_BRIDGE_ROUND_TRIP_TIMEOUT_MS`: Round-trip timeout (default: 30000)
    /// - `PEER_BRIDGE_CONNECTION_TIMEOUT_MS`: Peer wait timeout (default: 30000)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Same as [`BridgeConfig::from_env`] with an injectable variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(host) = lookup("PEER_BRIDGE_HOST") {
            config.peer.host = host
                .parse()
                .map_err(|_| ConfigError::Invalid(format!("PEER_BRIDGE_HOST: {}", host)))?;
        }

        if let Some(port) = lookup("PEER_BRIDGE_PORT") {
            config.peer.port = port
                .parse()
                .map_err(|_| ConfigError::Invalid(format!("PEER_BRIDGE_PORT: {}", port)))?;
        }

        if let Some(verbose) = lookup("PEER_BRIDGE_VERBOSE") {
            config.logging.verbose = parse_flag(&verbose);
        }

        if let Some(json) = lookup("PEER_BRIDGE_JSON_LOGS") {
            config.logging.json = parse_flag(&json);
        }

        if let Some(ms) = lookup("PEER_BRIDGE_ROUND_TRIP_TIMEOUT_MS") {
            config.timeouts.round_trip = parse_millis("PEER_BRIDGE_ROUND_TRIP_TIMEOUT_MS", &ms)?;
        }

        if let Some(ms) = lookup("PEER_BRIDGE_CONNECTION_TIMEOUT_MS") {
            config.timeouts.connection_wait =
                parse_millis("PEER_BRIDGE_CONNECTION_TIMEOUT_MS", &ms)?;
        }

        Ok(config)
    }
}

fn parse_flag(value: &str) -> bool {
    matches!(value.to_lowercase().as_str(), "1" | "true" | "yes" | "on")
}

fn parse_millis(key: &str, value: &str) -> Result<Duration, ConfigError> {
    value
        .trim()
        .parse::<u64>()
        .map(Duration::from_millis)
        .map_err(|_| ConfigError::InvalidTimeout(format!("{}: {}", key, value)))
}

/// Peer WebSocket listener configuration
#[derive(Debug, Clone)]
pub struct PeerConfig {
    /// Bind address (localhost only by default)
    pub host: IpAddr,
    /// Port (default: 8742)
    pub port: u16,
    /// Max inbound message size in bytes
    pub max_message_size: usize,
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: DEFAULT_PEER_PORT,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
        }
    }
}

/// Timeout configuration
#[derive(Debug, Clone)]
pub struct TimeoutConfig {
    /// How long a forwarded request waits for the peer's reply
    pub round_trip: Duration,
    /// How long to wait for a peer to attach
    pub connection_wait: Duration,
    /// Interval of the stale pending-entry sweep
    pub sweep_interval: Duration,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            round_trip: Duration::from_secs(30),
            connection_wait: Duration::from_secs(30),
            sweep_interval: Duration::from_secs(10),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Default)]
pub struct LoggingConfig {
    /// Debug-level output
    pub verbose: bool,
    /// JSON formatted log lines
    pub json: bool,
}

/// Configuration errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigError {
    /// Invalid size or count limit
    #[error("invalid limit: {0}")]
    InvalidLimit(String),
    /// Invalid timeout value
    #[error("invalid timeout: {0}")]
    InvalidTimeout(String),
    /// General configuration error
    #[error("invalid configuration: {0}")]
    Invalid(String),
}
