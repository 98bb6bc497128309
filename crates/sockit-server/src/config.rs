//! Server configuration.
//!
//! Configuration is layered:
//! - Built-in defaults
//! - TOML configuration file (first one found)
//! - Environment variables (`SOCKIT__PORT`, `SOCKIT__MESH__NAME`, ...)

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sockit_core::MeshConfig;
use std::net::SocketAddr;
use std::path::Path;

/// Files searched, in order, by [`Config::load`].
const CONFIG_PATHS: [&str; 3] = [
    "sockit.toml",
    "/etc/sockit/sockit.toml",
    "~/.config/sockit/sockit.toml",
];

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Host to bind to.
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Mesh configuration.
    #[serde(default)]
    pub mesh: MeshSettings,

    /// Transport configuration.
    #[serde(default)]
    pub transport: TransportConfig,

    /// Resource limits.
    #[serde(default)]
    pub limits: LimitsConfig,

    /// Metrics configuration.
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Mesh configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeshSettings {
    /// Application (game) name reported by the mesh.
    #[serde(default = "default_mesh_name")]
    pub name: String,

    /// Bound of each room's message and event queue.
    #[serde(default = "default_room_queue_capacity")]
    pub room_queue_capacity: usize,

    /// Bound of the mesh dispatch queue.
    #[serde(default = "default_dispatch_queue_capacity")]
    pub dispatch_queue_capacity: usize,

    /// Bound of the mesh command queue.
    #[serde(default = "default_command_queue_capacity")]
    pub command_queue_capacity: usize,

    /// Buffer of the membership event feed.
    #[serde(default = "default_event_feed_capacity")]
    pub event_feed_capacity: usize,
}

/// Transport configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Path for WebSocket endpoint.
    #[serde(default = "default_ws_path")]
    pub websocket_path: String,

    /// Per-client outbound buffer, in messages.
    #[serde(default = "default_outbound_buffer")]
    pub outbound_buffer: usize,

    /// Maximum inbound websocket message size in bytes.
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,
}

/// Resource limits configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Maximum number of registered clients.
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Enable metrics export.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Metrics port.
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

// Default value functions
fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_true() -> bool {
    true
}

fn default_mesh_name() -> String {
    "sockit".to_string()
}

fn default_room_queue_capacity() -> usize {
    1
}

fn default_dispatch_queue_capacity() -> usize {
    1
}

fn default_command_queue_capacity() -> usize {
    256
}

fn default_event_feed_capacity() -> usize {
    1024
}

fn default_ws_path() -> String {
    "/ws".to_string()
}

fn default_outbound_buffer() -> usize {
    64
}

fn default_max_message_size() -> usize {
    sockit_protocol::MAX_MESSAGE_SIZE
}

fn default_max_connections() -> usize {
    100_000
}

fn default_metrics_port() -> u16 {
    9090
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            mesh: MeshSettings::default(),
            transport: TransportConfig::default(),
            limits: LimitsConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl Default for MeshSettings {
    fn default() -> Self {
        Self {
            name: default_mesh_name(),
            room_queue_capacity: default_room_queue_capacity(),
            dispatch_queue_capacity: default_dispatch_queue_capacity(),
            command_queue_capacity: default_command_queue_capacity(),
            event_feed_capacity: default_event_feed_capacity(),
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            websocket_path: default_ws_path(),
            outbound_buffer: default_outbound_buffer(),
            max_message_size: default_max_message_size(),
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_connections: default_max_connections(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: default_metrics_port(),
        }
    }
}

impl MeshSettings {
    /// Convert to the core mesh configuration.
    #[must_use]
    pub fn mesh_config(&self) -> MeshConfig {
        MeshConfig {
            room_queue_capacity: self.room_queue_capacity,
            dispatch_queue_capacity: self.dispatch_queue_capacity,
            command_queue_capacity: self.command_queue_capacity,
            event_feed_capacity: self.event_feed_capacity,
        }
    }
}

impl TransportConfig {
    /// Per-client outbound buffer, never below one message.
    #[must_use]
    pub fn outbound_capacity(&self) -> usize {
        self.outbound_buffer.max(1)
    }
}

impl Config {
    /// Load configuration from the first config file found, plus environment
    /// overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if a config file exists but cannot be parsed.
    pub fn load() -> Result<Self> {
        let path = CONFIG_PATHS
            .iter()
            .map(|path| shellexpand::tilde(path).into_owned())
            .find(|path| Path::new(path).exists());

        Self::build(path.as_deref())
    }

    /// Load configuration from a specific file, plus environment overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let path = path
            .to_str()
            .with_context(|| format!("Config path is not valid UTF-8: {}", path.display()))?;
        Self::build(Some(path))
    }

    fn build(path: Option<&str>) -> Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            tracing::info!("Loading configuration from {}", path);
            builder = builder.add_source(config::File::new(path, config::FileFormat::Toml));
        }

        builder = builder.add_source(
            config::Environment::with_prefix("SOCKIT")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder
            .build()
            .context("Failed to read configuration")?
            .try_deserialize()
            .context("Failed to parse configuration")?;

        Ok(config)
    }

    /// Get the socket address to bind to.
    ///
    /// # Errors
    ///
    /// Returns an error if host and port do not form a socket address.
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("Invalid host:port {}:{}", self.host, self.port))
    }
}
